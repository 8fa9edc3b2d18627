use crate::chunking::{ChunkingConfig, RecursiveCharacterSplitter};
use crate::config::{AppConfig, RetrieverConfig};
use crate::embeddings::Embedder;
use crate::error::{IndexError, IngestError, PortalError};
use crate::files::{check_session_id, generate_session_id, save_uploaded_files, UploadedFile};
use crate::index_manager::IndexManager;
use crate::loader::load_documents;
use crate::vector_store::{Retriever, SearchType};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct IngestorOptions {
    pub temp_base: Option<PathBuf>,
    pub index_base: Option<PathBuf>,
    pub use_session_dirs: bool,
    pub session_id: Option<String>,
}

#[derive(Debug)]
pub struct IngestSummary {
    pub session_id: String,
    pub index_dir: PathBuf,
    pub retriever: Retriever,
    pub chunks: usize,
    pub added: usize,
    /// Chunk texts embedded by this run; already indexed chunks are not included.
    pub embedded_texts: Vec<String>,
}

/// Saves uploads for one chat session and folds them into that session's index.
pub struct ChatIngestor {
    session_id: String,
    temp_dir: PathBuf,
    index_dir: PathBuf,
    index_name: String,
    supported: BTreeSet<String>,
    search_type: String,
    retriever_config: RetrieverConfig,
    embedder: Arc<dyn Embedder>,
}

impl ChatIngestor {
    pub fn new(
        config: &AppConfig,
        embedder: Arc<dyn Embedder>,
        options: IngestorOptions,
    ) -> Result<Self, IngestError> {
        let temp_base = options
            .temp_base
            .unwrap_or_else(|| PathBuf::from(&config.data.storage.document_chat));
        let index_base = options
            .index_base
            .unwrap_or_else(|| PathBuf::from(&config.ai.vector_db.faiss.index_path));
        let session_id = match options.session_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => check_session_id(&id).map(str::to_string)?,
            None => generate_session_id("session"),
        };

        let (temp_dir, index_dir) = if options.use_session_dirs {
            (temp_base.join(&session_id), index_base.join(&session_id))
        } else {
            (temp_base, index_base)
        };
        fs::create_dir_all(&temp_dir)?;
        fs::create_dir_all(&index_dir)?;

        info!(
            session_id = %session_id,
            temp_dir = %temp_dir.display(),
            index_dir = %index_dir.display(),
            sessionized = options.use_session_dirs,
            "chat ingestor initialized"
        );

        Ok(Self {
            session_id,
            temp_dir,
            index_dir,
            index_name: config.ai.vector_db.faiss.index_name.clone(),
            supported: config.supported_extensions(),
            search_type: config.ai.retriever.search_type.clone(),
            retriever_config: config.ai.retriever.clone(),
            embedder,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub async fn build_retriever(
        &self,
        uploads: &[UploadedFile],
        chunk_size: usize,
        chunk_overlap: usize,
        k: usize,
    ) -> Result<IngestSummary, PortalError> {
        let splitter = RecursiveCharacterSplitter::new(ChunkingConfig::new(chunk_size, chunk_overlap)?);
        let search = SearchType::parse(&self.search_type, &self.retriever_config)?;

        let paths = save_uploaded_files(uploads, &self.temp_dir, &self.supported)?;
        let docs = load_documents(&paths)?;
        if docs.is_empty() {
            return Err(IngestError::InvalidArgument("no valid documents loaded".into()).into());
        }

        let chunks = splitter.split_documents(&docs);
        info!(session_id = %self.session_id, chunks = chunks.len(), "documents split");

        let mut manager = IndexManager::new(&self.index_dir, &self.index_name, self.embedder.clone())?;
        manager.load_or_create(&chunks).await?;
        let added = manager.seeded() + manager.add_documents(&chunks).await?;
        let embedded_texts = manager.take_embedded_texts();
        let index = manager.into_index().ok_or(IndexError::NotLoaded)?;

        info!(
            session_id = %self.session_id,
            added,
            total = index.len(),
            search_type = search.label(),
            "retriever ready"
        );

        Ok(IngestSummary {
            session_id: self.session_id.clone(),
            index_dir: self.index_dir.clone(),
            retriever: Retriever::new(index, self.embedder.clone(), search, k),
            chunks: chunks.len(),
            added,
            embedded_texts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::test_support::write_pdf;
    use tempfile::{tempdir, TempDir};

    fn ingestor(
        root: &TempDir,
        use_session_dirs: bool,
        session_id: Option<&str>,
    ) -> Result<ChatIngestor, IngestError> {
        ChatIngestor::new(
            &AppConfig::default(),
            Arc::new(CharacterNgramEmbedder::new(32)),
            IngestorOptions {
                temp_base: Some(root.path().join("uploads")),
                index_base: Some(root.path().join("index")),
                use_session_dirs,
                session_id: session_id.map(str::to_string),
            },
        )
    }

    #[test]
    fn session_dirs_nest_under_bases() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let sessionized = ingestor(&root, true, Some("session_abc"))?;
        assert_eq!(sessionized.session_id(), "session_abc");
        assert_eq!(sessionized.index_dir(), root.path().join("index/session_abc"));
        assert!(sessionized.temp_dir().is_dir());

        let shared = ingestor(&root, false, None)?;
        assert!(shared.session_id().starts_with("session_"));
        assert_eq!(shared.index_dir(), root.path().join("index"));
        Ok(())
    }

    #[test]
    fn traversing_session_id_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        for bad in ["../../escaped", "nested/dir", ".."] {
            let result = ingestor(&root, true, Some(bad));
            assert!(matches!(result, Err(IngestError::InvalidArgument(_))), "{bad}");
        }
        assert!(!root.path().join("escaped").exists());
        assert!(!root.path().join("index/nested").exists());
        Ok(())
    }

    #[tokio::test]
    async fn builds_and_reuses_index() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let uploads = vec![
            UploadedFile::new("notes.txt", "Refunds are issued within fourteen days of a return."),
            UploadedFile::new("image.png", vec![0u8, 1, 2]),
        ];

        let first = ingestor(&root, true, Some("session_one"))?
            .build_retriever(&uploads, 200, 20, 2)
            .await?;
        assert_eq!(first.chunks, 1);
        assert_eq!(first.added, 1);
        assert_eq!(
            first.embedded_texts,
            ["Refunds are issued within fourteen days of a return."]
        );
        let hits = first.retriever.retrieve("refund policy").await?;
        assert_eq!(hits.len(), 1);

        let second = ingestor(&root, true, Some("session_one"))?
            .build_retriever(&uploads, 200, 20, 2)
            .await?;
        assert_eq!(second.added, 0);
        assert!(second.embedded_texts.is_empty());
        assert_eq!(second.retriever.index().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn pdf_pages_become_chunks() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let scratch = tempdir()?;
        let pdf = scratch.path().join("report.pdf");
        write_pdf(&pdf, &["first page text", "second page text"])?;
        let uploads = vec![UploadedFile::new("report.pdf", fs::read(&pdf)?)];

        let summary = ingestor(&root, false, None)?
            .build_retriever(&uploads, 100, 10, 5)
            .await?;
        assert_eq!(summary.chunks, 2);
        assert_eq!(summary.retriever.k(), 5);
        Ok(())
    }

    #[tokio::test]
    async fn nothing_loadable_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let uploads = vec![UploadedFile::new("data.csv", "a,b")];
        let result = ingestor(&root, true, None)?
            .build_retriever(&uploads, 100, 10, 5)
            .await;
        assert!(matches!(
            result,
            Err(PortalError::Ingest(IngestError::InvalidArgument(_)))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn invalid_chunking_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let uploads = vec![UploadedFile::new("a.txt", "text")];
        let result = ingestor(&root, true, None)?
            .build_retriever(&uploads, 10, 10, 5)
            .await;
        assert!(matches!(
            result,
            Err(PortalError::Ingest(IngestError::InvalidChunkConfig(_)))
        ));
        Ok(())
    }
}
