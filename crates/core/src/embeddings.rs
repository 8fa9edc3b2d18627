use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::future::Future;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;
/// Inputs per `/embeddings` call.
pub const OPENAI_EMBEDDING_BATCH: usize = 1000;
/// `batchEmbedContents` rejects more than 100 requests.
pub const GOOGLE_EMBEDDING_BATCH: usize = 100;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut vectors = self.embed_documents(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| ProviderError::BadResponse {
            provider: self.model_name().to_string(),
            details: "no embedding returned".into(),
        })
    }
}

/// Embeds `texts` in consecutive slices of at most `batch_size` and concatenates
/// the vectors in input order. Each slice must come back with one vector per text.
pub async fn embed_in_batches<'a, F, Fut>(
    texts: &'a [String],
    batch_size: usize,
    mut embed_batch: F,
) -> Result<Vec<Vec<f32>>, ProviderError>
where
    F: FnMut(&'a [String]) -> Fut,
    Fut: Future<Output = Result<Vec<Vec<f32>>, ProviderError>>,
{
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let embedded = embed_batch(batch).await?;
        if embedded.len() != batch.len() {
            return Err(ProviderError::BadResponse {
                provider: "embeddings".into(),
                details: format!("expected {} embeddings, got {}", batch.len(), embedded.len()),
            });
        }
        vectors.extend(embedded);
    }
    Ok(vectors)
}

/// Deterministic hashed character-trigram vectors; needs no network.
#[derive(Debug, Clone)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
    model: String,
}

impl CharacterNgramEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            model: format!("char-trigram-{dimensions}"),
        }
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let buckets = self.dimensions.max(1);
        let mut vector = vec![0f32; buckets];
        let chars: Vec<char> = text.to_lowercase().chars().collect();

        let mut utf8 = [0u8; 4];
        for trigram in chars.windows(3) {
            let hash = trigram.iter().fold(FNV_OFFSET, |hash, ch| {
                ch.encode_utf8(&mut utf8)
                    .bytes()
                    .fold(hash, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME))
            });
            vector[(hash % buckets as u64) as usize] += 1.0;
        }

        let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|value| *value /= norm);
        }
        vector
    }
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|text| self.embed(text)).collect())
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

/// OpenAI `/embeddings`; also serves Azure deployments, which differ only in URL and auth header.
pub struct OpenAiEmbedder {
    client: Client,
    url: String,
    auth: ApiAuth,
    model: String,
    dimensions: Option<usize>,
    batch_size: usize,
}

#[derive(Debug, Clone)]
enum ApiAuth {
    Bearer(String),
    AzureKey(String),
}

impl OpenAiEmbedder {
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: "https://api.openai.com/v1/embeddings".into(),
            auth: ApiAuth::Bearer(api_key.into()),
            model: model.into(),
            dimensions: None,
            batch_size: OPENAI_EMBEDDING_BATCH,
        }
    }

    pub fn azure(
        endpoint: &str,
        deployment: &str,
        api_version: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            url: format!(
                "{}/openai/deployments/{deployment}/embeddings?api-version={api_version}",
                endpoint.trim_end_matches('/')
            ),
            auth: ApiAuth::AzureKey(api_key.into()),
            model: model.into(),
            dimensions: None,
            batch_size: OPENAI_EMBEDDING_BATCH,
        }
    }

    pub fn with_dimensions(mut self, dimensions: Option<usize>) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut body = json!({ "model": self.model, "input": texts });
        if let Some(dimensions) = self.dimensions {
            body["dimensions"] = json!(dimensions);
        }

        let request = self.client.post(&self.url).json(&body);
        let request = match &self.auth {
            ApiAuth::Bearer(key) => request.bearer_auth(key),
            ApiAuth::AzureKey(key) => request.header("api-key", key),
        };
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let details = response.text().await.unwrap_or_default();
            return Err(ProviderError::BadResponse {
                provider: "openai-embeddings".into(),
                details: format!("{status}: {details}"),
            });
        }

        let mut parsed: OpenAiEmbeddingResponse = response.json().await?;
        parsed.data.sort_by_key(|item| item.index);
        Ok(parsed.data.into_iter().map(|item| item.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        embed_in_batches(texts, self.batch_size, |batch| self.embed_batch(batch)).await
    }
}

#[derive(Debug, Deserialize)]
struct GoogleBatchResponse {
    #[serde(default)]
    embeddings: Vec<GoogleEmbedding>,
}

#[derive(Debug, Deserialize)]
struct GoogleEmbedding {
    values: Vec<f32>,
}

pub struct GoogleEmbedder {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    batch_size: usize,
}

impl GoogleEmbedder {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let model: String = model.into();
        let model = if model.starts_with("models/") {
            model
        } else {
            format!("models/{model}")
        };
        Self {
            client: Client::new(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
            api_key: api_key.into(),
            model,
            batch_size: GOOGLE_EMBEDDING_BATCH,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, GOOGLE_EMBEDDING_BATCH);
        self
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let requests: Vec<_> = texts
            .iter()
            .map(|text| json!({ "model": self.model, "content": { "parts": [{ "text": text }] } }))
            .collect();

        let response = self
            .client
            .post(format!("{}/{}:batchEmbedContents", self.base_url, self.model))
            .query(&[("key", &self.api_key)])
            .json(&json!({ "requests": requests }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let details = response.text().await.unwrap_or_default();
            return Err(ProviderError::BadResponse {
                provider: "google-embeddings".into(),
                details: format!("{status}: {details}"),
            });
        }

        let parsed: GoogleBatchResponse = response.json().await?;
        Ok(parsed.embeddings.into_iter().map(|item| item.values).collect())
    }
}

#[async_trait]
impl Embedder for GoogleEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        embed_in_batches(texts, self.batch_size, |batch| self.embed_batch(batch)).await
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
    let left_norm = left.iter().map(|v| v * v).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|v| v * v).sum::<f32>().sqrt();
    if left_norm == 0.0 || right_norm == 0.0 {
        0.0
    } else {
        dot / (left_norm * right_norm)
    }
}
