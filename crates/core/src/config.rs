//! Typed view of `configs/config.yaml`.
//!
//! Every field carries a serde default so a partial (or empty) YAML file still
//! produces a usable configuration.

use crate::error::IngestError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "configs/config.yaml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub data: DataConfig,
    pub ai: AiConfig,
    pub api: ApiConfig,
    pub secrets: SecretsConfig,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, IngestError> {
        let raw = std::fs::read_to_string(path).map_err(|error| {
            IngestError::Config(format!("cannot read {}: {error}", path.display()))
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, IngestError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).map_err(|error| IngestError::Config(error.to_string()))
    }

    pub fn supported_extensions(&self) -> BTreeSet<String> {
        normalize_extensions(&self.data.supported_extensions)
    }
}

/// Lowercases each extension and guarantees a leading dot; blank entries are dropped.
pub fn normalize_extensions<S: AsRef<str>>(raw: &[S]) -> BTreeSet<String> {
    raw.iter()
        .filter_map(|ext| {
            let ext = ext.as_ref().trim().to_lowercase();
            if ext.is_empty() {
                None
            } else if ext.starts_with('.') {
                Some(ext)
            } else {
                Some(format!(".{ext}"))
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub storage: StorageConfig,
    pub supported_extensions: Vec<String>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            supported_extensions: vec![".pdf".into(), ".docx".into(), ".txt".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub document_analysis: String,
    pub document_compare: String,
    pub document_chat: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            document_analysis: "data/document_analysis".into(),
            document_compare: "data/document_compare".into(),
            document_chat: "data/document_chat".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub llm: BTreeMap<String, LlmSettings>,
    pub embedding_model: BTreeMap<String, EmbeddingSettings>,
    pub vector_db: VectorDbConfig,
    pub retriever: RetrieverConfig,
    pub output_parsing: OutputParsingConfig,
    pub semantic_cache: SemanticCacheConfig,
}

impl Default for AiConfig {
    fn default() -> Self {
        let llm = [
            ("openai", "gpt-4o-mini"),
            ("azure-openai", "gpt-4o-mini"),
            ("google", "gemini-2.0-flash"),
            ("groq", "llama-3.1-8b-instant"),
        ]
        .into_iter()
        .map(|(provider, model)| (provider.to_string(), LlmSettings::named(model)))
        .collect();

        let embedding_model = [
            ("openai", "text-embedding-3-small"),
            ("azure-openai", "text-embedding-3-small"),
            ("google", "models/text-embedding-004"),
            ("local", "char-trigram-128"),
        ]
        .into_iter()
        .map(|(provider, model)| {
            (
                provider.to_string(),
                EmbeddingSettings {
                    model_name: model.to_string(),
                    dimensions: None,
                },
            )
        })
        .collect();

        Self {
            llm,
            embedding_model,
            vector_db: VectorDbConfig::default(),
            retriever: RetrieverConfig::default(),
            output_parsing: OutputParsingConfig::default(),
            semantic_cache: SemanticCacheConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    pub model_name: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

impl LlmSettings {
    fn named(model: &str) -> Self {
        Self {
            model_name: model.to_string(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_output_tokens() -> u32 {
    2048
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    pub model_name: String,
    #[serde(default)]
    pub dimensions: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorDbConfig {
    pub faiss: FaissConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaissConfig {
    pub index_path: String,
    pub index_name: String,
}

impl Default for FaissConfig {
    fn default() -> Self {
        Self {
            index_path: "data/faiss_index".into(),
            index_name: "index".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    pub top_k: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub search_type: String,
    pub fetch_k: usize,
    pub lambda_mult: f32,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            chunk_size: 1000,
            chunk_overlap: 200,
            search_type: "similarity".into(),
            fetch_k: 20,
            lambda_mult: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputParsingConfig {
    pub enable_fix: bool,
    pub enable_retry: bool,
    pub retry_max_attempts: usize,
}

impl Default for OutputParsingConfig {
    fn default() -> Self {
        Self {
            enable_fix: true,
            enable_retry: true,
            retry_max_attempts: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticCacheConfig {
    pub enabled: bool,
    pub redis_url: String,
    pub name: String,
    pub ttl: Option<u64>,
    pub distance_threshold: f32,
    pub embedding_provider: String,
}

impl Default for SemanticCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            redis_url: "redis://localhost:6379".into(),
            name: "llmcache".into(),
            ttl: None,
            distance_threshold: 0.2,
            embedding_provider: "openai".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub title: String,
    pub description: String,
    pub version: String,
    pub prefix: String,
    pub debug: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            title: "Document Portal API".into(),
            description: "Document Portal for analyzing, comparing, and chatting with documents."
                .into(),
            version: "0.1".into(),
            prefix: "/api/v1".into(),
            debug: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    pub known_keys: Vec<String>,
    pub api_keys_env: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            known_keys: [
                "OPENAI_API_KEY",
                "GOOGLE_API_KEY",
                "GROQ_API_KEY",
                "AZURE_OPENAI_API_KEY",
                "AZURE_OPENAI_API_INSTANCE_NAME",
                "AZURE_OPENAI_API_VERSION",
                "AZURE_OPENAI_API_DEPLOYMENT_NAME",
                "AZURE_OPENAI_API_EMBEDDING_DEPLOYMENT_NAME",
                "REDIS_URL",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            api_keys_env: "API_KEYS".into(),
        }
    }
}
