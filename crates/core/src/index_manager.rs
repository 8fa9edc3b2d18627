use crate::embeddings::Embedder;
use crate::error::IndexError;
use crate::models::{Document, DocumentMetadata};
use crate::vector_store::{index_file_paths, FlatIndex};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

const META_FILE: &str = "ingested_meta.json";
const DIMENSION_PROBE: &str = "dimension probe";

#[derive(Debug, Default, Serialize, Deserialize)]
struct IngestedMeta {
    #[serde(default)]
    rows: BTreeMap<String, bool>,
}

/// Owns one on-disk index directory and the record of which contents it already holds.
pub struct IndexManager {
    index_dir: PathBuf,
    index_name: String,
    meta_path: PathBuf,
    meta: IngestedMeta,
    embedder: Arc<dyn Embedder>,
    index: Option<FlatIndex>,
    seeded: usize,
    embedded: Vec<String>,
}

impl IndexManager {
    pub fn new(
        index_dir: impl Into<PathBuf>,
        index_name: impl Into<String>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, IndexError> {
        let index_dir = index_dir.into();
        fs::create_dir_all(&index_dir)?;
        let meta_path = index_dir.join(META_FILE);
        let meta = read_meta(&meta_path);

        Ok(Self {
            index_dir,
            index_name: index_name.into(),
            meta_path,
            meta,
            embedder,
            index: None,
            seeded: 0,
            embedded: Vec::new(),
        })
    }

    /// `"{source}::{row_id}"` when both are known, otherwise the SHA-256 of the text.
    ///
    /// A source alone is not a key: keying on `"{source}::"` would give every
    /// chunk of one file the same fingerprint and drop all but the first.
    pub fn fingerprint(text: &str, metadata: &DocumentMetadata) -> String {
        match (&metadata.source, &metadata.row_id) {
            (Some(source), Some(row_id)) if !source.is_empty() && !row_id.is_empty() => {
                format!("{source}::{row_id}")
            }
            _ => format!("{:x}", Sha256::digest(text.as_bytes())),
        }
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    pub fn exists(&self) -> bool {
        let (vectors, docstore) = index_file_paths(&self.index_dir, &self.index_name);
        vectors.exists() && docstore.exists()
    }

    pub fn index(&self) -> Option<&FlatIndex> {
        self.index.as_ref()
    }

    pub fn into_index(self) -> Option<FlatIndex> {
        self.index
    }

    pub fn known_fingerprints(&self) -> usize {
        self.meta.rows.len()
    }

    /// Documents written when the last `load_or_create` had to build a new index.
    pub fn seeded(&self) -> usize {
        self.seeded
    }

    /// Texts sent to the embedder since the last call, in indexing order.
    pub fn take_embedded_texts(&mut self) -> Vec<String> {
        std::mem::take(&mut self.embedded)
    }

    pub async fn load_or_create(&mut self, seed_docs: &[Document]) -> Result<&FlatIndex, IndexError> {
        self.seeded = 0;
        if self.exists() {
            let loaded = FlatIndex::load_local(&self.index_dir, &self.index_name)?;
            match self.embedder.embed_query(DIMENSION_PROBE).await {
                Ok(probe) if probe.len() != loaded.dimension() => {
                    warn!(
                        index_dir = %self.index_dir.display(),
                        index_dim = loaded.dimension(),
                        embedding_dim = probe.len(),
                        "embedding dimension changed, rebuilding index"
                    );
                    self.remove_index_files()?;
                }
                Ok(_) => return Ok(self.index.insert(loaded)),
                Err(error) => {
                    warn!(%error, "dimension probe failed, keeping loaded index");
                    return Ok(self.index.insert(loaded));
                }
            }
        }

        if seed_docs.is_empty() {
            return Err(IndexError::Missing(self.index_dir.display().to_string()));
        }

        // Rows recorded without index files on disk are stale.
        self.meta = IngestedMeta::default();
        let fresh = self.take_unseen(seed_docs);
        let index = FlatIndex::from_documents(&fresh, self.embedder.as_ref()).await?;
        index.save_local(&self.index_dir, &self.index_name)?;
        self.save_meta()?;
        self.seeded = fresh.len();
        self.embedded
            .extend(fresh.iter().map(|doc| doc.page_content.clone()));

        info!(
            index_dir = %self.index_dir.display(),
            documents = fresh.len(),
            dimension = index.dimension(),
            "index created"
        );
        Ok(self.index.insert(index))
    }

    /// Adds documents whose fingerprint has not been seen; returns how many were added.
    pub async fn add_documents(&mut self, docs: &[Document]) -> Result<usize, IndexError> {
        if self.index.is_none() {
            return Err(IndexError::NotLoaded);
        }

        let fresh = self.take_unseen(docs);
        if fresh.is_empty() {
            return Ok(0);
        }

        let index = self.index.as_mut().ok_or(IndexError::NotLoaded)?;
        index.add_documents(&fresh, self.embedder.as_ref()).await?;
        index.save_local(&self.index_dir, &self.index_name)?;
        self.save_meta()?;
        self.embedded
            .extend(fresh.iter().map(|doc| doc.page_content.clone()));

        info!(index_dir = %self.index_dir.display(), added = fresh.len(), "documents indexed");
        Ok(fresh.len())
    }

    fn take_unseen(&mut self, docs: &[Document]) -> Vec<Document> {
        docs.iter()
            .filter(|doc| {
                let key = Self::fingerprint(&doc.page_content, &doc.metadata);
                self.meta.rows.insert(key, true).is_none()
            })
            .cloned()
            .collect()
    }

    fn remove_index_files(&mut self) -> Result<(), IndexError> {
        let (vectors, docstore) = index_file_paths(&self.index_dir, &self.index_name);
        for path in [vectors, docstore] {
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        self.meta = IngestedMeta::default();
        self.index = None;
        self.save_meta()
    }

    fn save_meta(&self) -> Result<(), IndexError> {
        fs::write(&self.meta_path, serde_json::to_vec_pretty(&self.meta)?)?;
        Ok(())
    }
}

fn read_meta(path: &Path) -> IngestedMeta {
    let Ok(raw) = fs::read(path) else {
        return IngestedMeta::default();
    };
    match serde_json::from_slice(&raw) {
        Ok(meta) => meta,
        Err(error) => {
            warn!(path = %path.display(), %error, "unreadable ingest meta, starting empty");
            IngestedMeta::default()
        }
    }
}
