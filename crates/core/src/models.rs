use crate::config::RetrieverConfig;
use crate::error::IngestError;
use crate::files::check_session_id;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_id: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A unit of loaded text: a PDF page, a whole DOCX/TXT file, or a chunk of either.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub page_content: String,
    #[serde(default)]
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn new(page_content: impl Into<String>) -> Self {
        Self {
            page_content: page_content.into(),
            metadata: DocumentMetadata::default(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.metadata.source = Some(source.into());
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.metadata.page = Some(page);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PageCount {
    Count(u64),
    Text(String),
}

/// Structured metadata extracted from a single document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Metadata {
    pub summary: Vec<String>,
    pub title: String,
    pub author: Vec<String>,
    pub date_created: String,
    pub last_modified_date: String,
    pub publisher: String,
    pub language: String,
    pub page_count: PageCount,
    pub sentiment_tone: String,
}

/// One row of a page-by-page comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChangeFormat {
    #[serde(deserialize_with = "string_or_number")]
    pub page: String,
    pub changes: String,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(text) => Ok(text),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

/// Comparison output as models tend to emit it: a bare list, a `{"root": [...]}`
/// wrapper, or a single row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ComparisonOutput {
    Rows(Vec<ChangeFormat>),
    Wrapped { root: Vec<ChangeFormat> },
    Single(ChangeFormat),
}

impl ComparisonOutput {
    pub fn into_rows(self) -> Vec<ChangeFormat> {
        match self {
            Self::Rows(rows) | Self::Wrapped { root: rows } => rows,
            Self::Single(row) => vec![row],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptType {
    DocumentAnalysis,
    DocumentComparison,
    ContextualizeQuestion,
    ContextQa,
}

impl PromptType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DocumentAnalysis => "document_analysis",
            Self::DocumentComparison => "document_comparison",
            Self::ContextualizeQuestion => "contextualize_question",
            Self::ContextQa => "context_qa",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatIndexParams {
    pub session_id: Option<String>,
    pub use_session_dirs: bool,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub k: usize,
}

impl ChatIndexParams {
    pub fn with_defaults(retriever: &RetrieverConfig) -> Self {
        Self {
            session_id: None,
            use_session_dirs: true,
            chunk_size: retriever.chunk_size,
            chunk_overlap: retriever.chunk_overlap,
            k: retriever.top_k,
        }
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size < 1 {
            return Err(IngestError::InvalidArgument(
                "chunk_size must be at least 1".into(),
            ));
        }
        if self.k < 1 {
            return Err(IngestError::InvalidArgument("k must be at least 1".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(IngestError::InvalidArgument(
                "chunk_overlap must be less than chunk_size".into(),
            ));
        }
        if let Some(session_id) = self.session_id.as_deref() {
            check_session_id(session_id)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatQueryParams {
    pub question: String,
    pub session_id: Option<String>,
    pub use_session_dirs: bool,
    pub k: usize,
}

impl ChatQueryParams {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.question.trim().is_empty() {
            return Err(IngestError::InvalidArgument("question is required".into()));
        }
        if self.k < 1 {
            return Err(IngestError::InvalidArgument("k must be at least 1".into()));
        }
        if self.use_session_dirs && self.session_id.as_deref().map_or(true, str::is_empty) {
            return Err(IngestError::InvalidArgument(
                "session_id is required when use_session_dirs=True".into(),
            ));
        }
        if let Some(session_id) = self.session_id.as_deref() {
            check_session_id(session_id)?;
        }
        Ok(())
    }
}
