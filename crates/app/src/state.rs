use docportal_core::{AppConfig, ChatModel, Embedder, PromptRegistry, Telemetry};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per index directory, kept only while someone holds or awaits it.
#[derive(Clone, Default)]
pub struct IndexLocks(Arc<Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>>);

impl IndexLocks {
    pub async fn acquire(&self, index_dir: &Path) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.0.lock().unwrap_or_else(PoisonError::into_inner);
            // the map's own reference is the only one left on released entries
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(index_dir.to_path_buf())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    pub fn tracked(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Models and settings loaded once at startup and shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub llm: Arc<dyn ChatModel>,
    pub embedder: Arc<dyn Embedder>,
    pub embedding_provider: String,
    pub prompts: Arc<PromptRegistry>,
    pub telemetry: Arc<Telemetry>,
    index_locks: IndexLocks,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        llm: Arc<dyn ChatModel>,
        embedder: Arc<dyn Embedder>,
        embedding_provider: impl Into<String>,
        prompts: PromptRegistry,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            llm,
            embedder,
            embedding_provider: embedding_provider.into(),
            prompts: Arc::new(prompts),
            telemetry,
            index_locks: IndexLocks::default(),
        }
    }

    pub fn index_base(&self) -> PathBuf {
        PathBuf::from(&self.config.ai.vector_db.faiss.index_path)
    }

    /// Serialises work on one index directory across requests.
    pub async fn lock_index(&self, index_dir: &Path) -> OwnedMutexGuard<()> {
        self.index_locks.acquire(index_dir).await
    }
}
