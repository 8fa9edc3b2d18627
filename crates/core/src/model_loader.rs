use crate::cache::{CachedChatModel, SemanticCache};
use crate::config::AppConfig;
use crate::embeddings::{
    CharacterNgramEmbedder, Embedder, GoogleEmbedder, OpenAiEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
use crate::env::ApiKeyManager;
use crate::error::ProviderError;
use crate::llm::{AzureChat, ChatModel, GeminiChat, OpenAiChat};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    AzureOpenAi,
    Google,
    Groq,
    Local,
}

impl ProviderKind {
    /// Accepts `azure` as an alias of `azure-openai`.
    pub fn parse(raw: &str) -> Result<Self, ProviderError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "azure" | "azure-openai" => Ok(Self::AzureOpenAi),
            "google" => Ok(Self::Google),
            "groq" => Ok(Self::Groq),
            "local" => Ok(Self::Local),
            other => Err(ProviderError::UnsupportedProvider(other.to_string())),
        }
    }

    pub fn config_key(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::AzureOpenAi => "azure-openai",
            Self::Google => "google",
            Self::Groq => "groq",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_key())
    }
}

const AZURE_BASE_KEYS: [&str; 3] = [
    "AZURE_OPENAI_API_KEY",
    "AZURE_OPENAI_API_INSTANCE_NAME",
    "AZURE_OPENAI_API_VERSION",
];

struct AzureTarget {
    endpoint: String,
    deployment: String,
    api_version: String,
    api_key: String,
}

/// Builds the configured embedder and chat model from YAML settings plus API keys.
pub struct ModelLoader {
    config: AppConfig,
    keys: ApiKeyManager,
    cache: Option<Arc<dyn SemanticCache>>,
}

impl ModelLoader {
    pub fn new(config: AppConfig, keys: ApiKeyManager) -> Self {
        Self {
            config,
            keys,
            cache: None,
        }
    }

    pub fn with_semantic_cache(mut self, cache: Option<Arc<dyn SemanticCache>>) -> Self {
        self.cache = cache;
        self
    }

    pub fn keys(&self) -> &ApiKeyManager {
        &self.keys
    }

    fn provider_from(&self, var: &str) -> Result<ProviderKind, ProviderError> {
        let raw = self.keys.get(var).unwrap_or_else(|| "openai".to_string());
        ProviderKind::parse(&raw)
    }

    pub fn embedding_provider(&self) -> Result<ProviderKind, ProviderError> {
        self.provider_from("EMBEDDING_PROVIDER")
    }

    /// Provider named by `EMBEDDING_PROVIDER` (default `openai`).
    pub fn load_embeddings(&self) -> Result<Arc<dyn Embedder>, ProviderError> {
        self.embeddings_for(self.embedding_provider()?)
    }

    pub fn embeddings_for(&self, provider: ProviderKind) -> Result<Arc<dyn Embedder>, ProviderError> {
        let settings = self
            .config
            .ai
            .embedding_model
            .get(provider.config_key())
            .ok_or_else(|| {
                error!(%provider, "embedding provider not found in config");
                ProviderError::NotConfigured(provider.to_string())
            })?;
        let model = settings.model_name.clone();
        info!(%provider, model = %model, "loading embedding model");

        let embedder: Arc<dyn Embedder> = match provider {
            ProviderKind::OpenAi => {
                self.keys.require(&["OPENAI_API_KEY"])?;
                Arc::new(
                    OpenAiEmbedder::openai(self.key("OPENAI_API_KEY")?, model)
                        .with_dimensions(settings.dimensions),
                )
            }
            ProviderKind::AzureOpenAi => {
                let target = self.azure_target("AZURE_OPENAI_API_EMBEDDING_DEPLOYMENT_NAME")?;
                Arc::new(
                    OpenAiEmbedder::azure(
                        &target.endpoint,
                        &target.deployment,
                        &target.api_version,
                        target.api_key,
                        model,
                    )
                    .with_dimensions(settings.dimensions),
                )
            }
            ProviderKind::Google => {
                self.keys.require(&["GOOGLE_API_KEY"])?;
                Arc::new(GoogleEmbedder::new(self.key("GOOGLE_API_KEY")?, model))
            }
            ProviderKind::Local => Arc::new(CharacterNgramEmbedder::new(
                settings.dimensions.unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS),
            )),
            ProviderKind::Groq => {
                return Err(ProviderError::UnsupportedProvider(format!(
                    "{provider} has no embedding models"
                )))
            }
        };
        Ok(embedder)
    }

    /// Provider named by `LLM_PROVIDER` (default `openai`), wrapped in the semantic cache when one is set.
    pub fn load_llm(&self) -> Result<Arc<dyn ChatModel>, ProviderError> {
        let provider = self.provider_from("LLM_PROVIDER")?;
        let settings = self
            .config
            .ai
            .llm
            .get(provider.config_key())
            .cloned()
            .ok_or_else(|| {
                error!(%provider, "llm provider not found in config");
                ProviderError::NotConfigured(provider.to_string())
            })?;
        info!(
            %provider,
            model = %settings.model_name,
            temperature = settings.temperature,
            max_tokens = settings.max_output_tokens,
            "loading llm"
        );

        let llm: Arc<dyn ChatModel> = match provider {
            ProviderKind::OpenAi => {
                self.keys.require(&["OPENAI_API_KEY"])?;
                Arc::new(OpenAiChat::new(self.key("OPENAI_API_KEY")?, settings))
            }
            ProviderKind::Groq => {
                self.keys.require(&["GROQ_API_KEY"])?;
                Arc::new(OpenAiChat::groq(self.key("GROQ_API_KEY")?, settings))
            }
            ProviderKind::Google => {
                self.keys.require(&["GOOGLE_API_KEY"])?;
                Arc::new(GeminiChat::new(self.key("GOOGLE_API_KEY")?, settings))
            }
            ProviderKind::AzureOpenAi => {
                let target = self.azure_target("AZURE_OPENAI_API_DEPLOYMENT_NAME")?;
                Arc::new(AzureChat::new(
                    &target.endpoint,
                    &target.deployment,
                    &target.api_version,
                    target.api_key,
                    settings,
                ))
            }
            ProviderKind::Local => {
                return Err(ProviderError::UnsupportedProvider(format!(
                    "{provider} has no chat models"
                )))
            }
        };

        Ok(match &self.cache {
            Some(cache) => Arc::new(CachedChatModel::new(llm, cache.clone())),
            None => llm,
        })
    }

    fn key(&self, name: &str) -> Result<String, ProviderError> {
        self.keys
            .get(name)
            .ok_or_else(|| ProviderError::MissingKeys(vec![name.to_string()]))
    }

    fn azure_target(&self, deployment_var: &str) -> Result<AzureTarget, ProviderError> {
        let mut required = AZURE_BASE_KEYS.to_vec();
        required.push(deployment_var);
        self.keys.require(&required)?;

        Ok(AzureTarget {
            endpoint: format!(
                "https://{}.openai.azure.com/",
                self.key("AZURE_OPENAI_API_INSTANCE_NAME")?
            ),
            deployment: self.key(deployment_var)?,
            api_version: self.key("AZURE_OPENAI_API_VERSION")?,
            api_key: self.key("AZURE_OPENAI_API_KEY")?,
        })
    }
}
