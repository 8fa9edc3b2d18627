use crate::config::OutputParsingConfig;
use crate::error::ProviderError;
use crate::llm::ChatModel;
use crate::models::{ChangeFormat, ComparisonOutput, PromptType};
use crate::parsing::{build_structured_chain, StructuredChain, StructuredOutput};
use crate::prompts::{vars, PromptRegistry};
use crate::telemetry::Telemetry;
use std::sync::Arc;
use tracing::info;

pub const COMPARISON_FORMAT_KEY: &str = "format_instruction";

impl StructuredOutput for ComparisonOutput {
    fn format_instructions() -> String {
        r#"The output must be a JSON array with one object per page:
[
  {"Page": string, "Changes": string}
]
Use "NO CHANGE" as the Changes value for pages without differences.
Return only the JSON array, without commentary."#
            .to_string()
    }
}

/// Page-by-page differences between a reference and an actual document.
pub struct DocumentComparatorLlm {
    chain: StructuredChain<ComparisonOutput>,
    telemetry: Arc<Telemetry>,
}

impl DocumentComparatorLlm {
    pub fn new(
        llm: Arc<dyn ChatModel>,
        prompts: &PromptRegistry,
        settings: OutputParsingConfig,
        telemetry: Arc<Telemetry>,
    ) -> Result<Self, ProviderError> {
        let prompt = prompts.get(PromptType::DocumentComparison)?.clone();
        let chain = build_structured_chain(prompt, llm, settings, COMPARISON_FORMAT_KEY)?;
        Ok(Self { chain, telemetry })
    }

    pub async fn compare_documents(
        &self,
        combined_docs: &str,
    ) -> Result<Vec<ChangeFormat>, ProviderError> {
        info!("invoking document comparison chain");
        let rows = self
            .chain
            .invoke(vars([("combined_docs", combined_docs)]))
            .await?
            .into_rows();

        let llm = self.chain.llm();
        let output = serde_json::to_string(&rows)?;
        self.telemetry.record_comparison(
            llm.model_name(),
            llm.provider(),
            combined_docs,
            "",
            &output,
            None,
        );
        info!(rows = rows.len(), "comparison complete");
        Ok(rows)
    }
}
