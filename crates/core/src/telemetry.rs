use crate::env::ApiKeyManager;
use crate::error::ProviderError;
use crate::tokens::{count_tokens, heuristic_tokens};
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const DEFAULT_LANGFUSE_HOST: &str = "https://cloud.langfuse.com";
/// Oldest events are dropped beyond this many unsent events.
pub const MAX_PENDING_EVENTS: usize = 256;
/// Pending count that wakes the background flusher early.
pub const FLUSH_AT_EVENTS: usize = 32;

#[derive(Debug, Clone)]
pub struct LangfuseClient {
    client: Client,
    host: String,
    public_key: String,
    secret_key: String,
}

impl LangfuseClient {
    pub fn new(host: &str, public_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            host: host.trim_end_matches('/').to_string(),
            public_key: public_key.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Built from `LANGFUSE_PUBLIC_KEY` / `LANGFUSE_SECRET_KEY` / `LANGFUSE_HOST`; None without both keys.
    pub fn from_keys(keys: &ApiKeyManager) -> Option<Self> {
        let public_key = keys.get("LANGFUSE_PUBLIC_KEY")?;
        let secret_key = keys.get("LANGFUSE_SECRET_KEY")?;
        let host = keys
            .get("LANGFUSE_HOST")
            .unwrap_or_else(|| DEFAULT_LANGFUSE_HOST.to_string());
        Some(Self::new(&host, public_key, secret_key))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub async fn auth_check(&self) -> Result<(), ProviderError> {
        let response = self
            .client
            .get(format!("{}/api/public/projects", self.host))
            .basic_auth(&self.public_key, Some(&self.secret_key))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::BadResponse {
                provider: "langfuse".into(),
                details: response.status().to_string(),
            });
        }
        Ok(())
    }

    pub async fn ingest(&self, batch: &[Value]) -> Result<(), ProviderError> {
        let response = self
            .client
            .post(format!("{}/api/public/ingestion", self.host))
            .basic_auth(&self.public_key, Some(&self.secret_key))
            .json(&json!({ "batch": batch }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::BadResponse {
                provider: "langfuse".into(),
                details: response.status().to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChatUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

struct Generation<'a> {
    name: &'a str,
    model: &'a str,
    provider: &'a str,
    input: Value,
    output: Value,
    input_tokens: usize,
    output_tokens: usize,
    session_id: Option<&'a str>,
}

/// Usage accounting plus an optional Langfuse sink. Every operation soft-fails.
///
/// Events wait in a bounded queue until [`Telemetry::flush`] runs, either from
/// the task started by [`Telemetry::spawn_flusher`] or at shutdown.
#[derive(Debug)]
pub struct Telemetry {
    client: Option<LangfuseClient>,
    pending: Mutex<VecDeque<Value>>,
    capacity: usize,
    flush_at: usize,
    wake: Notify,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Telemetry {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn new(client: Option<LangfuseClient>) -> Self {
        Self {
            client,
            pending: Mutex::new(VecDeque::new()),
            capacity: MAX_PENDING_EVENTS,
            flush_at: FLUSH_AT_EVENTS,
            wake: Notify::new(),
        }
    }

    pub fn with_limits(mut self, capacity: usize, flush_at: usize) -> Self {
        self.capacity = capacity.max(1);
        self.flush_at = flush_at.max(1);
        self
    }

    pub fn from_keys(keys: &ApiKeyManager) -> Self {
        Self::new(LangfuseClient::from_keys(keys))
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().map(|pending| pending.len()).unwrap_or_default()
    }

    pub async fn init(&self) -> bool {
        let Some(client) = &self.client else {
            warn!("langfuse keys not set, tracing disabled");
            return false;
        };
        match client.auth_check().await {
            Ok(()) => {
                info!(host = %client.host(), "langfuse client authenticated");
                true
            }
            Err(error) => {
                error!(%error, "langfuse authentication failed, check credentials and host");
                false
            }
        }
    }

    /// Sends buffered events; returns how many were delivered.
    pub async fn flush(&self) -> usize {
        let Some(client) = &self.client else {
            return 0;
        };
        let batch: Vec<Value> = match self.pending.lock() {
            Ok(mut pending) => pending.drain(..).collect(),
            Err(_) => return 0,
        };
        if batch.is_empty() {
            return 0;
        }

        match client.ingest(&batch).await {
            Ok(()) => {
                info!(events = batch.len(), "langfuse events flushed");
                batch.len()
            }
            Err(error) => {
                error!(%error, dropped = batch.len(), "langfuse flush failed");
                0
            }
        }
    }

    /// Flushes on a fixed period and whenever the queue reaches the flush threshold.
    /// Returns None when no Langfuse client is configured.
    pub fn spawn_flusher(self: &Arc<Self>, every: Duration) -> Option<JoinHandle<()>> {
        self.client.as_ref()?;
        let telemetry = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = telemetry.wake.notified() => {}
                }
                let sent = telemetry.flush().await;
                debug!(sent, "background telemetry flush");
            }
        }))
    }

    pub fn record_embedding_batch(
        &self,
        model: &str,
        provider: &str,
        texts: &[String],
        session_id: Option<&str>,
    ) -> usize {
        let tokens = texts
            .iter()
            .map(|text| count_tokens(provider, model, text))
            .sum();
        info!(provider, model, tokens, batch_size = texts.len(), session_id, "embedding batch usage");
        self.buffer(Generation {
            name: "embedding",
            model,
            provider,
            input: json!({ "batch_size": texts.len() }),
            output: Value::Null,
            input_tokens: tokens,
            output_tokens: 0,
            session_id,
        });
        tokens
    }

    pub fn record_chat_generation(
        &self,
        model: &str,
        provider: &str,
        prompt: &str,
        response: &str,
        session_id: Option<&str>,
    ) -> ChatUsage {
        let usage = ChatUsage {
            prompt_tokens: heuristic_tokens(prompt).max(1),
            completion_tokens: heuristic_tokens(response).max(1),
        };
        info!(
            provider,
            model,
            input_tokens = usage.prompt_tokens,
            output_tokens = usage.completion_tokens,
            session_id,
            "chat generation usage"
        );
        self.buffer(Generation {
            name: "chat",
            model,
            provider,
            input: json!(prompt),
            output: json!(response),
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            session_id,
        });
        usage
    }

    pub fn record_analysis(
        &self,
        model: &str,
        provider: &str,
        input: &str,
        output: &str,
        session_id: Option<&str>,
    ) -> Usage {
        let usage = Usage {
            input_tokens: count_tokens(provider, model, input),
            output_tokens: count_tokens(provider, model, output),
        };
        info!(
            provider,
            model,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            session_id,
            "analysis usage"
        );
        self.buffer(Generation {
            name: "document_analysis",
            model,
            provider,
            input: json!(input),
            output: json!(output),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            session_id,
        });
        usage
    }

    pub fn record_comparison(
        &self,
        model: &str,
        provider: &str,
        left: &str,
        right: &str,
        result: &str,
        session_id: Option<&str>,
    ) -> Usage {
        let usage = Usage {
            input_tokens: count_tokens(provider, model, left) + count_tokens(provider, model, right),
            output_tokens: count_tokens(provider, model, result),
        };
        info!(
            provider,
            model,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            session_id,
            "comparison usage"
        );
        self.buffer(Generation {
            name: "document_comparison",
            model,
            provider,
            input: json!({ "left": left, "right": right }),
            output: json!(result),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            session_id,
        });
        usage
    }

    fn buffer(&self, generation: Generation<'_>) {
        if self.client.is_none() {
            return;
        }
        let now = Utc::now().to_rfc3339();
        let event = json!({
            "id": Uuid::new_v4().to_string(),
            "timestamp": now,
            "type": "generation-create",
            "body": {
                "id": Uuid::new_v4().to_string(),
                "name": generation.name,
                "startTime": now,
                "model": generation.model,
                "input": generation.input,
                "output": generation.output,
                "usageDetails": {
                    "input": generation.input_tokens,
                    "output": generation.output_tokens,
                },
                "metadata": {
                    "provider": generation.provider,
                    "session_id": generation.session_id,
                },
            },
        });
        let (queued, dropped) = match self.pending.lock() {
            Ok(mut pending) => {
                let mut dropped = 0;
                while pending.len() >= self.capacity {
                    pending.pop_front();
                    dropped += 1;
                }
                pending.push_back(event);
                (pending.len(), dropped)
            }
            Err(_) => return,
        };
        if dropped > 0 {
            warn!(dropped, capacity = self.capacity, "telemetry queue full, oldest events dropped");
        }
        if queued >= self.flush_at {
            self.wake.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled() -> Telemetry {
        Telemetry::new(Some(LangfuseClient::new("http://127.0.0.1:9/", "pk", "sk")))
    }

    #[test]
    fn client_requires_both_keys() {
        let partial = ApiKeyManager::from_parts(None, &[("LANGFUSE_PUBLIC_KEY", "pk-lf-1")]);
        if std::env::var("LANGFUSE_SECRET_KEY").is_err() {
            assert!(LangfuseClient::from_keys(&partial).is_none());
        }

        let full = ApiKeyManager::from_parts(
            None,
            &[
                ("LANGFUSE_PUBLIC_KEY", "pk-lf-1"),
                ("LANGFUSE_SECRET_KEY", "sk-lf-1"),
                ("LANGFUSE_HOST", "https://langfuse.example.com/"),
            ],
        );
        let client = LangfuseClient::from_keys(&full);
        assert_eq!(client.map(|c| c.host().to_string()).as_deref(), Some("https://langfuse.example.com"));
    }

    #[test]
    fn usage_helpers_follow_heuristic() {
        let telemetry = Telemetry::disabled();
        let texts = vec!["abcdefgh".to_string(), String::new()];
        assert_eq!(telemetry.record_embedding_batch("m", "google", &texts, None), 2);

        let chat = telemetry.record_chat_generation("m", "openai", "", "abcdefgh", Some("s1"));
        assert_eq!(
            chat,
            ChatUsage {
                prompt_tokens: 1,
                completion_tokens: 2
            }
        );

        let comparison = telemetry.record_comparison("m", "groq", "abcd", "abcdefgh", "", None);
        assert_eq!(
            comparison,
            Usage {
                input_tokens: 3,
                output_tokens: 0
            }
        );
        assert_eq!(telemetry.pending(), 0);
    }

    #[test]
    fn enabled_telemetry_buffers_generations() {
        let telemetry = enabled();
        telemetry.record_analysis("m", "openai", "document text", "{}", None);
        telemetry.record_chat_generation("m", "openai", "q", "a", Some("s1"));
        assert_eq!(telemetry.pending(), 2);
    }

    #[tokio::test]
    async fn disabled_telemetry_soft_fails() {
        let telemetry = Telemetry::disabled();
        assert!(!telemetry.init().await);
        assert_eq!(telemetry.flush().await, 0);
    }

    #[test]
    fn full_queue_drops_oldest_events() {
        let telemetry = enabled().with_limits(3, 100);
        for n in 0..5 {
            telemetry.record_analysis("m", "openai", &format!("doc {n}"), "{}", None);
        }
        assert_eq!(telemetry.pending(), 3);

        let pending = telemetry.pending.lock().unwrap();
        let inputs: Vec<&str> = pending
            .iter()
            .filter_map(|event| event["body"]["input"].as_str())
            .collect();
        assert_eq!(inputs, ["doc 2", "doc 3", "doc 4"]);
    }

    #[tokio::test]
    async fn flusher_drains_queue_at_threshold() {
        let telemetry = Arc::new(enabled().with_limits(100, 2));
        let handle = telemetry.spawn_flusher(Duration::from_secs(3600));
        assert!(handle.is_some());

        telemetry.record_chat_generation("m", "openai", "q1", "a1", None);
        telemetry.record_chat_generation("m", "openai", "q2", "a2", None);
        let drained = tokio::time::timeout(Duration::from_secs(10), async {
            while telemetry.pending() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(drained.is_ok(), "queue never drained");

        if let Some(handle) = handle {
            handle.abort();
        }
    }

    #[tokio::test]
    async fn flusher_needs_a_client() {
        let telemetry = Arc::new(Telemetry::disabled());
        assert!(telemetry.spawn_flusher(Duration::from_secs(1)).is_none());
    }

    #[tokio::test]
    async fn unreachable_host_drops_batch_without_error() {
        let telemetry = enabled();
        telemetry.record_analysis("m", "openai", "in", "out", None);
        assert_eq!(telemetry.flush().await, 0);
        assert_eq!(telemetry.pending(), 0);
    }
}
