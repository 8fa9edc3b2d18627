use crate::config::OutputParsingConfig;
use crate::error::ProviderError;
use crate::llm::ChatModel;
use crate::models::{Metadata, PromptType};
use crate::parsing::{build_structured_chain, StructuredChain, StructuredOutput, DEFAULT_FORMAT_KEY};
use crate::prompts::{vars, PromptRegistry};
use crate::telemetry::Telemetry;
use std::sync::Arc;
use tracing::info;

impl StructuredOutput for Metadata {
    fn format_instructions() -> String {
        r#"The output must be a single JSON object with exactly these keys:
{
  "Summary": [string],        // key points of the document
  "Title": string,
  "Author": [string],
  "DateCreated": string,
  "LastModifiedDate": string,
  "Publisher": string,
  "Language": string,
  "PageCount": integer or string,  // "Not Available" when unknown
  "SentimentTone": string
}
Return only the JSON object, without commentary."#
            .to_string()
    }
}

/// Extracts structured metadata from a document's text.
pub struct DocumentAnalyzer {
    chain: StructuredChain<Metadata>,
    telemetry: Arc<Telemetry>,
}

impl DocumentAnalyzer {
    pub fn new(
        llm: Arc<dyn ChatModel>,
        prompts: &PromptRegistry,
        settings: OutputParsingConfig,
        telemetry: Arc<Telemetry>,
    ) -> Result<Self, ProviderError> {
        let prompt = prompts.get(PromptType::DocumentAnalysis)?.clone();
        let chain = build_structured_chain(prompt, llm, settings, DEFAULT_FORMAT_KEY)?;
        Ok(Self { chain, telemetry })
    }

    pub async fn analyze_document(&self, document_text: &str) -> Result<Metadata, ProviderError> {
        let metadata = self
            .chain
            .invoke(vars([("document_text", document_text)]))
            .await?;

        let llm = self.chain.llm();
        let output = serde_json::to_string(&metadata)?;
        self.telemetry
            .record_analysis(llm.model_name(), llm.provider(), document_text, &output, None);
        info!(title = %metadata.title, "metadata extraction successful");
        Ok(metadata)
    }
}
