use crate::config::AppConfig;
use crate::embeddings::Embedder;
use crate::error::{IndexError, PortalError, ProviderError};
use crate::llm::ChatModel;
use crate::models::{ChatMessage, Document, PromptType};
use crate::prompts::{vars, ChatPromptTemplate, PromptRegistry};
use crate::telemetry::Telemetry;
use crate::vector_store::{FlatIndex, Retriever, SearchType};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub const NO_ANSWER: &str = "no answer generated.";

/// History-aware question answering over one loaded index.
pub struct ConversationalRag {
    session_id: Option<String>,
    llm: Arc<dyn ChatModel>,
    embedder: Arc<dyn Embedder>,
    config: AppConfig,
    contextualize_prompt: ChatPromptTemplate,
    qa_prompt: ChatPromptTemplate,
    telemetry: Arc<Telemetry>,
    retriever: Option<Retriever>,
}

impl ConversationalRag {
    pub fn new(
        session_id: Option<String>,
        llm: Arc<dyn ChatModel>,
        embedder: Arc<dyn Embedder>,
        config: &AppConfig,
        prompts: &PromptRegistry,
        telemetry: Arc<Telemetry>,
    ) -> Result<Self, ProviderError> {
        let rag = Self {
            session_id,
            llm,
            embedder,
            config: config.clone(),
            contextualize_prompt: prompts.get(PromptType::ContextualizeQuestion)?.clone(),
            qa_prompt: prompts.get(PromptType::ContextQa)?.clone(),
            telemetry,
            retriever: None,
        };
        info!(session_id = ?rag.session_id, "conversational rag initialized");
        Ok(rag)
    }

    pub fn with_retriever(mut self, retriever: Retriever) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Loads `{index_name}` from `index_path`; unset arguments fall back to the retriever config.
    pub fn load_retriever_from_index(
        &mut self,
        index_path: &Path,
        k: Option<usize>,
        index_name: Option<&str>,
        search_type: Option<&str>,
    ) -> Result<&Retriever, PortalError> {
        if !index_path.is_dir() {
            return Err(IndexError::DirectoryNotFound(index_path.display().to_string()).into());
        }

        let retriever_config = &self.config.ai.retriever;
        let index_name = index_name.unwrap_or(&self.config.ai.vector_db.faiss.index_name);
        let k = k.unwrap_or(retriever_config.top_k);
        let search = SearchType::parse(
            search_type.unwrap_or(&retriever_config.search_type),
            retriever_config,
        )?;

        let index = FlatIndex::load_local(index_path, index_name)?;
        info!(
            index_path = %index_path.display(),
            index_name,
            k,
            entries = index.len(),
            session_id = ?self.session_id,
            "retriever loaded"
        );
        Ok(self
            .retriever
            .insert(Retriever::new(index, self.embedder.clone(), search, k)))
    }

    pub fn is_ready(&self) -> bool {
        self.retriever.is_some()
    }

    pub fn clear(&mut self) {
        self.retriever = None;
    }

    pub async fn invoke(
        &self,
        question: &str,
        history: &[ChatMessage],
    ) -> Result<String, PortalError> {
        let retriever = self.retriever.as_ref().ok_or_else(|| {
            PortalError::NotReady(
                "RAG chain not initialized; load a retriever before invoking".into(),
            )
        })?;

        let rewrite_messages = self
            .contextualize_prompt
            .format_messages(&vars([("input", question)]), history)?;
        let rewritten = self.llm.complete(&rewrite_messages).await?;
        let rewritten = rewritten.trim();
        let search_query = if rewritten.is_empty() { question } else { rewritten };

        let docs = retriever.retrieve(search_query).await?;
        let context = format_docs(&docs);

        let qa_messages = self
            .qa_prompt
            .format_messages(&vars([("context", &context), ("input", question)]), history)?;
        let answer = self.llm.complete(&qa_messages).await?;

        self.telemetry.record_chat_generation(
            self.llm.model_name(),
            self.llm.provider(),
            question,
            &answer,
            self.session_id.as_deref(),
        );

        if answer.trim().is_empty() {
            warn!(session_id = ?self.session_id, question, "no answer generated");
            return Ok(NO_ANSWER.to_string());
        }
        info!(
            session_id = ?self.session_id,
            retrieved = docs.len(),
            answer_preview = %answer.chars().take(150).collect::<String>(),
            "rag answer generated"
        );
        Ok(answer)
    }
}

fn format_docs(docs: &[Document]) -> String {
    docs.iter()
        .map(|doc| doc.page_content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::models::Role;
    use crate::test_support::ScriptedChat;
    use tempfile::tempdir;

    fn rag(llm: Arc<ScriptedChat>) -> Result<ConversationalRag, ProviderError> {
        ConversationalRag::new(
            Some("session_test".into()),
            llm,
            Arc::new(CharacterNgramEmbedder::new(32)),
            &AppConfig::default(),
            &PromptRegistry::builtin()?,
            Arc::new(Telemetry::disabled()),
        )
    }

    async fn write_index(dir: &Path) -> Result<(), IndexError> {
        let docs = vec![
            Document::new("The warranty lasts two years from purchase."),
            Document::new("Shipping takes five business days."),
        ];
        FlatIndex::from_documents(&docs, &CharacterNgramEmbedder::new(32))
            .await?
            .save_local(dir, "index")
    }

    #[tokio::test]
    async fn invoke_before_loading_fails() -> Result<(), ProviderError> {
        let rag = rag(Arc::new(ScriptedChat::new(&[])))?;
        assert!(!rag.is_ready());
        let result = rag.invoke("anything?", &[]).await;
        assert!(matches!(result, Err(PortalError::NotReady(_))));
        Ok(())
    }

    #[tokio::test]
    async fn missing_index_dir_is_reported() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let mut rag = rag(Arc::new(ScriptedChat::new(&[])))?;
        let result = rag.load_retriever_from_index(&root.path().join("absent"), None, None, None);
        assert!(matches!(
            result,
            Err(PortalError::Index(IndexError::DirectoryNotFound(_)))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn rewrites_retrieves_and_answers() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        write_index(root.path()).await?;

        let llm = Arc::new(ScriptedChat::new(&[
            "How long is the warranty?",
            "Two years.",
        ]));
        let mut rag = rag(llm.clone())?;
        let retriever = rag.load_retriever_from_index(root.path(), Some(1), None, None)?;
        assert_eq!(retriever.k(), 1);
        assert!(rag.is_ready());

        let history = vec![
            ChatMessage::user("I bought a kettle."),
            ChatMessage::assistant("Okay."),
        ];
        let answer = rag.invoke("how long is it covered?", &history).await?;
        assert_eq!(answer, "Two years.");
        assert_eq!(llm.calls(), 2);

        let rewrite = llm.prompt(0);
        assert_eq!(rewrite.len(), 4);
        assert_eq!(rewrite[3].content, "how long is it covered?");

        let qa = llm.prompt(1);
        assert_eq!(qa[0].role, Role::System);
        assert!(qa[0].content.contains("The warranty lasts two years"));
        assert!(!qa[0].content.contains("Shipping"));
        assert_eq!(qa[3].content, "how long is it covered?");
        Ok(())
    }

    #[tokio::test]
    async fn blank_answer_becomes_placeholder() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        write_index(root.path()).await?;
        let llm = Arc::new(ScriptedChat::new(&["shipping time?", "   "]));
        let mut rag = rag(llm)?;
        rag.load_retriever_from_index(root.path(), None, Some("index"), Some("mmr"))?;

        assert_eq!(rag.invoke("shipping?", &[]).await?, NO_ANSWER);
        rag.clear();
        assert!(!rag.is_ready());
        Ok(())
    }
}
