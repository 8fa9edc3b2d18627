use crate::config::LlmSettings;
use crate::error::ProviderError;
use crate::models::{ChatMessage, Role};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn provider(&self) -> &str;

    fn model_name(&self) -> &str;

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

fn openai_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| json!({ "role": message.role, "content": message.content }))
        .collect()
}

async fn read_chat_completion(
    provider: &str,
    response: reqwest::Response,
) -> Result<String, ProviderError> {
    if !response.status().is_success() {
        let status = response.status();
        let details = response.text().await.unwrap_or_default();
        return Err(ProviderError::BadResponse {
            provider: provider.to_string(),
            details: format!("{status}: {details}"),
        });
    }

    let parsed: ChatCompletionResponse = response.json().await?;
    parsed
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content.unwrap_or_default())
        .ok_or_else(|| ProviderError::BadResponse {
            provider: provider.to_string(),
            details: "response contained no choices".into(),
        })
}

/// Chat completions against any OpenAI-compatible endpoint (OpenAI itself, Groq).
pub struct OpenAiChat {
    client: Client,
    provider: String,
    base_url: String,
    api_key: String,
    settings: LlmSettings,
}

impl OpenAiChat {
    pub fn new(api_key: impl Into<String>, settings: LlmSettings) -> Self {
        Self::with_base_url("openai", OPENAI_BASE_URL, api_key, settings)
    }

    pub fn groq(api_key: impl Into<String>, settings: LlmSettings) -> Self {
        Self::with_base_url("groq", GROQ_BASE_URL, api_key, settings)
    }

    pub fn with_base_url(
        provider: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        settings: LlmSettings,
    ) -> Self {
        Self {
            client: Client::new(),
            provider: provider.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            settings,
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn model_name(&self) -> &str {
        &self.settings.model_name
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.settings.model_name,
                "messages": openai_messages(messages),
                "temperature": self.settings.temperature,
                "max_tokens": self.settings.max_output_tokens,
            }))
            .send()
            .await?;

        read_chat_completion(&self.provider, response).await
    }
}

pub struct AzureChat {
    client: Client,
    url: String,
    api_key: String,
    settings: LlmSettings,
}

impl AzureChat {
    pub fn new(
        endpoint: &str,
        deployment: &str,
        api_version: &str,
        api_key: impl Into<String>,
        settings: LlmSettings,
    ) -> Self {
        Self {
            client: Client::new(),
            url: format!(
                "{}/openai/deployments/{deployment}/chat/completions?api-version={api_version}",
                endpoint.trim_end_matches('/')
            ),
            api_key: api_key.into(),
            settings,
        }
    }
}

#[async_trait]
impl ChatModel for AzureChat {
    fn provider(&self) -> &str {
        "azure-openai"
    }

    fn model_name(&self) -> &str {
        &self.settings.model_name
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(&self.url)
            .header("api-key", &self.api_key)
            .json(&json!({
                "messages": openai_messages(messages),
                "temperature": self.settings.temperature,
                "max_tokens": self.settings.max_output_tokens,
            }))
            .send()
            .await?;

        read_chat_completion("azure-openai", response).await
    }
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

pub struct GeminiChat {
    client: Client,
    api_key: String,
    settings: LlmSettings,
}

impl GeminiChat {
    pub fn new(api_key: impl Into<String>, settings: LlmSettings) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            settings,
        }
    }
}

/// System messages become `systemInstruction`; assistant turns use the `model` role.
fn gemini_body(messages: &[ChatMessage], settings: &LlmSettings) -> Value {
    let system = messages
        .iter()
        .filter(|message| message.role == Role::System)
        .map(|message| message.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let contents: Vec<Value> = messages
        .iter()
        .filter(|message| message.role != Role::System)
        .map(|message| {
            let role = match message.role {
                Role::Assistant => "model",
                _ => "user",
            };
            json!({ "role": role, "parts": [{ "text": message.content }] })
        })
        .collect();

    let mut body = json!({
        "contents": contents,
        "generationConfig": {
            "temperature": settings.temperature,
            "maxOutputTokens": settings.max_output_tokens,
        },
    });
    if !system.is_empty() {
        body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
    }
    body
}

#[async_trait]
impl ChatModel for GeminiChat {
    fn provider(&self) -> &str {
        "google"
    }

    fn model_name(&self) -> &str {
        &self.settings.model_name
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(format!(
                "{GEMINI_BASE_URL}/models/{}:generateContent",
                self.settings.model_name
            ))
            .query(&[("key", &self.api_key)])
            .json(&gemini_body(messages, &self.settings))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let details = response.text().await.unwrap_or_default();
            return Err(ProviderError::BadResponse {
                provider: "google".into(),
                details: format!("{status}: {details}"),
            });
        }

        let parsed: GeminiResponse = response.json().await?;
        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::BadResponse {
                provider: "google".into(),
                details: "response contained no candidates".into(),
            })?;

        Ok(candidate
            .content
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .map(|part| part.text)
                    .collect::<String>()
            })
            .unwrap_or_default())
    }
}
