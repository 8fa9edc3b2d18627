use crate::config::RetrieverConfig;
use crate::embeddings::{cosine_similarity, Embedder};
use crate::error::IndexError;
use crate::models::Document;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
struct StoredVectors {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredDocstore {
    ids: Vec<String>,
    documents: Vec<Document>,
}

pub fn index_file_paths(dir: &Path, name: &str) -> (PathBuf, PathBuf) {
    (
        dir.join(format!("{name}.faiss")),
        dir.join(format!("{name}.pkl")),
    )
}

/// Exact nearest-neighbour index over squared L2 distance, with the documents kept alongside.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
    ids: Vec<String>,
    documents: Vec<Document>,
}

impl FlatIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
            ids: Vec::new(),
            documents: Vec::new(),
        }
    }

    pub async fn from_documents(
        docs: &[Document],
        embedder: &dyn Embedder,
    ) -> Result<Self, IndexError> {
        let texts: Vec<String> = docs.iter().map(|doc| doc.page_content.clone()).collect();
        let vectors = embedder.embed_documents(&texts).await?;
        let dimension = vectors
            .first()
            .map(Vec::len)
            .ok_or_else(|| IndexError::Store("cannot build an index from zero documents".into()))?;

        let mut index = Self::new(dimension);
        index.add_embeddings(docs.to_vec(), vectors)?;
        Ok(index)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub async fn add_documents(
        &mut self,
        docs: &[Document],
        embedder: &dyn Embedder,
    ) -> Result<Vec<String>, IndexError> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<String> = docs.iter().map(|doc| doc.page_content.clone()).collect();
        let vectors = embedder.embed_documents(&texts).await?;
        self.add_embeddings(docs.to_vec(), vectors)
    }

    pub fn add_embeddings(
        &mut self,
        docs: Vec<Document>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Vec<String>, IndexError> {
        if docs.len() != vectors.len() {
            return Err(IndexError::Store(format!(
                "embedding count {} doesn't match document count {}",
                vectors.len(),
                docs.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|vector| vector.len() != self.dimension) {
            return Err(IndexError::Dimension {
                index: self.dimension,
                vector: bad.len(),
            });
        }

        let ids: Vec<String> = docs.iter().map(|_| Uuid::new_v4().to_string()).collect();
        self.ids.extend(ids.iter().cloned());
        self.vectors.extend(vectors);
        self.documents.extend(docs);
        Ok(ids)
    }

    /// Nearest `k` stored documents with their squared L2 distance, closest first.
    pub fn search_by_vector(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<(Document, f32)>, IndexError> {
        Ok(self
            .nearest(query, k)?
            .into_iter()
            .map(|(position, distance)| (self.documents[position].clone(), distance))
            .collect())
    }

    pub async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        embedder: &dyn Embedder,
    ) -> Result<Vec<Document>, IndexError> {
        let vector = embedder.embed_query(query).await?;
        Ok(self
            .search_by_vector(&vector, k)?
            .into_iter()
            .map(|(doc, _)| doc)
            .collect())
    }

    pub async fn max_marginal_relevance_search(
        &self,
        query: &str,
        k: usize,
        fetch_k: usize,
        lambda_mult: f32,
        embedder: &dyn Embedder,
    ) -> Result<Vec<Document>, IndexError> {
        let vector = embedder.embed_query(query).await?;
        let candidates = self.nearest(&vector, fetch_k.max(k))?;
        let candidate_vectors: Vec<&[f32]> = candidates
            .iter()
            .map(|(position, _)| self.vectors[*position].as_slice())
            .collect();

        Ok(maximal_marginal_relevance(&vector, &candidate_vectors, k, lambda_mult)
            .into_iter()
            .map(|picked| self.documents[candidates[picked].0].clone())
            .collect())
    }

    pub fn save_local(&self, dir: &Path, name: &str) -> Result<(), IndexError> {
        fs::create_dir_all(dir)?;
        let (vectors_path, docstore_path) = index_file_paths(dir, name);

        let vectors = StoredVectors {
            dimension: self.dimension,
            vectors: self.vectors.clone(),
        };
        let docstore = StoredDocstore {
            ids: self.ids.clone(),
            documents: self.documents.clone(),
        };
        fs::write(&vectors_path, serde_json::to_vec(&vectors)?)?;
        fs::write(&docstore_path, serde_json::to_vec(&docstore)?)?;

        debug!(dir = %dir.display(), name, entries = self.len(), "index saved");
        Ok(())
    }

    pub fn load_local(dir: &Path, name: &str) -> Result<Self, IndexError> {
        let (vectors_path, docstore_path) = index_file_paths(dir, name);
        if !vectors_path.exists() || !docstore_path.exists() {
            return Err(IndexError::Missing(dir.display().to_string()));
        }

        let vectors: StoredVectors = serde_json::from_slice(&fs::read(&vectors_path)?)?;
        let docstore: StoredDocstore = serde_json::from_slice(&fs::read(&docstore_path)?)?;

        if vectors.vectors.len() != docstore.documents.len()
            || docstore.ids.len() != docstore.documents.len()
        {
            return Err(IndexError::Store(format!(
                "index at {} is inconsistent: {} vectors, {} documents",
                dir.display(),
                vectors.vectors.len(),
                docstore.documents.len()
            )));
        }
        if let Some(bad) = vectors
            .vectors
            .iter()
            .find(|vector| vector.len() != vectors.dimension)
        {
            return Err(IndexError::Dimension {
                index: vectors.dimension,
                vector: bad.len(),
            });
        }

        Ok(Self {
            dimension: vectors.dimension,
            vectors: vectors.vectors,
            ids: docstore.ids,
            documents: docstore.documents,
        })
    }

    fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, IndexError> {
        if query.len() != self.dimension {
            return Err(IndexError::Dimension {
                index: self.dimension,
                vector: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(position, stored)| (position, squared_l2(query, stored)))
            .collect();
        scored.sort_by(|left, right| left.1.total_cmp(&right.1));
        scored.truncate(k);
        Ok(scored)
    }
}

fn squared_l2(left: &[f32], right: &[f32]) -> f32 {
    left.iter()
        .zip(right)
        .map(|(a, b)| (a - b) * (a - b))
        .sum()
}

/// Greedy MMR selection; returns positions into `candidates` in pick order.
pub fn maximal_marginal_relevance(
    query: &[f32],
    candidates: &[&[f32]],
    k: usize,
    lambda_mult: f32,
) -> Vec<usize> {
    if candidates.is_empty() || k == 0 {
        return Vec::new();
    }

    let relevance: Vec<f32> = candidates
        .iter()
        .map(|candidate| cosine_similarity(query, candidate))
        .collect();

    let mut selected = Vec::new();
    while selected.len() < k.min(candidates.len()) {
        let mut best: Option<(usize, f32)> = None;
        for (position, candidate) in candidates.iter().enumerate() {
            if selected.contains(&position) {
                continue;
            }
            let redundancy = selected
                .iter()
                .map(|picked: &usize| cosine_similarity(candidate, candidates[*picked]))
                .fold(f32::MIN, f32::max);
            let redundancy = if selected.is_empty() { 0.0 } else { redundancy };
            let score = lambda_mult * relevance[position] - (1.0 - lambda_mult) * redundancy;
            if best.map_or(true, |(_, current)| score > current) {
                best = Some((position, score));
            }
        }
        match best {
            Some((position, _)) => selected.push(position),
            None => break,
        }
    }
    selected
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchType {
    Similarity,
    Mmr { fetch_k: usize, lambda_mult: f32 },
}

impl SearchType {
    pub fn parse(name: &str, retriever: &RetrieverConfig) -> Result<Self, IndexError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "similarity" => Ok(Self::Similarity),
            "mmr" => Ok(Self::Mmr {
                fetch_k: retriever.fetch_k,
                lambda_mult: retriever.lambda_mult,
            }),
            other => Err(IndexError::UnknownSearchType(other.to_string())),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Similarity => "similarity",
            Self::Mmr { .. } => "mmr",
        }
    }
}

#[derive(Clone)]
pub struct Retriever {
    index: FlatIndex,
    embedder: Arc<dyn Embedder>,
    search: SearchType,
    k: usize,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("entries", &self.index.len())
            .field("embedder", &self.embedder.model_name())
            .field("search", &self.search)
            .field("k", &self.k)
            .finish()
    }
}

impl Retriever {
    pub fn new(index: FlatIndex, embedder: Arc<dyn Embedder>, search: SearchType, k: usize) -> Self {
        Self {
            index,
            embedder,
            search,
            k,
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn search_type(&self) -> SearchType {
        self.search
    }

    pub fn index(&self) -> &FlatIndex {
        &self.index
    }

    pub async fn retrieve(&self, query: &str) -> Result<Vec<Document>, IndexError> {
        match self.search {
            SearchType::Similarity => {
                self.index
                    .similarity_search(query, self.k, self.embedder.as_ref())
                    .await
            }
            SearchType::Mmr {
                fetch_k,
                lambda_mult,
            } => {
                self.index
                    .max_marginal_relevance_search(
                        query,
                        self.k,
                        fetch_k,
                        lambda_mult,
                        self.embedder.as_ref(),
                    )
                    .await
            }
        }
    }
}
