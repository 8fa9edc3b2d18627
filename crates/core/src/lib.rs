pub mod analyzer;
pub mod cache;
pub mod chunking;
pub mod comparator;
pub mod config;
pub mod embeddings;
pub mod env;
pub mod error;
pub mod extractor;
pub mod files;
pub mod index_manager;
pub mod ingest;
pub mod llm;
pub mod loader;
pub mod model_loader;
pub mod models;
pub mod parsing;
pub mod prompts;
pub mod retrieval;
pub mod telemetry;
pub mod tokens;
pub mod vector_store;
pub mod workspace;

#[cfg(test)]
pub(crate) mod test_support;

pub use analyzer::DocumentAnalyzer;
pub use cache::{
    maybe_init_semantic_cache, CachedChatModel, InMemorySemanticCache, RedisSemanticCache,
    SemanticCache,
};
pub use chunking::{ChunkingConfig, RecursiveCharacterSplitter};
pub use comparator::DocumentComparatorLlm;
pub use config::{AppConfig, DEFAULT_CONFIG_PATH};
pub use embeddings::{CharacterNgramEmbedder, Embedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use env::{bootstrap_env, is_production, ApiKeyManager};
pub use error::{IndexError, IngestError, PortalError, ProviderError};
pub use extractor::{extract_page_texts, read_docx, read_pdf_for_analysis, PageText, PdfExtractor};
pub use files::{generate_session_id, save_uploaded_files, UploadedFile};
pub use index_manager::IndexManager;
pub use ingest::{ChatIngestor, IngestSummary, IngestorOptions};
pub use llm::ChatModel;
pub use loader::{concat_for_analysis, concat_for_comparison, load_documents};
pub use model_loader::{ModelLoader, ProviderKind};
pub use models::{
    ChangeFormat, ChatIndexParams, ChatMessage, ChatQueryParams, Document, DocumentMetadata,
    Metadata, PageCount, PromptType, Role,
};
pub use prompts::PromptRegistry;
pub use retrieval::ConversationalRag;
pub use telemetry::Telemetry;
pub use vector_store::{FlatIndex, Retriever, SearchType};
pub use workspace::{ComparisonWorkspace, DocHandler};
