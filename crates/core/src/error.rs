use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("docx parse error: {0}")]
    DocxParse(String),

    #[error("unsupported file type: {0}")]
    UnsupportedFile(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("config error: {0}")]
    Config(String),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from {provider}: {details}")]
    BadResponse { provider: String, details: String },

    #[error("missing required API keys/vars: {}", .0.join(", "))]
    MissingKeys(Vec<String>),

    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("provider '{0}' not found in config")]
    NotConfigured(String),

    #[error("prompt error: {0}")]
    Prompt(String),

    #[error("output parsing failed: {0}")]
    OutputParse(String),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("embedding error: {0}")]
    Embedding(#[from] ProviderError),

    #[error("no existing index at {0} and no data to create one")]
    Missing(String),

    #[error("index directory not found: {0}")]
    DirectoryNotFound(String),

    #[error("index not loaded; call load_or_create first")]
    NotLoaded,

    #[error("dimension mismatch: index has {index}, vector has {vector}")]
    Dimension { index: usize, vector: usize },

    #[error("unknown search type: {0}")]
    UnknownSearchType(String),

    #[error("index store error: {0}")]
    Store(String),
}

#[derive(Debug, Error)]
pub enum PortalError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("{0}")]
    NotReady(String),
}

pub type Result<T, E = PortalError> = std::result::Result<T, E>;
