use crate::config::AppConfig;
use crate::error::IngestError;
use crate::extractor::{read_pdf_for_analysis, read_pdf_for_comparison};
use crate::files::{check_session_id, generate_session_id, UploadedFile};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

fn require_pdf(file: &UploadedFile) -> Result<String, IngestError> {
    let name = file.file_name()?;
    if file.extension() != ".pdf" {
        return Err(IngestError::UnsupportedFile(format!(
            "{name}: only PDF files are allowed"
        )));
    }
    Ok(name)
}

fn session_dir(base: PathBuf, session_id: Option<String>) -> Result<(String, PathBuf), IngestError> {
    let session_id = match session_id.filter(|id| !id.trim().is_empty()) {
        Some(id) => check_session_id(&id).map(str::to_string)?,
        None => generate_session_id("session"),
    };
    let path = base.join(&session_id);
    fs::create_dir_all(&path)?;
    Ok((session_id, path))
}

/// Per-session storage for single-document analysis uploads.
pub struct DocHandler {
    session_id: String,
    session_path: PathBuf,
}

impl DocHandler {
    pub fn new(
        config: &AppConfig,
        data_dir: Option<PathBuf>,
        session_id: Option<String>,
    ) -> Result<Self, IngestError> {
        let base = data_dir.unwrap_or_else(|| PathBuf::from(&config.data.storage.document_analysis));
        let (session_id, session_path) = session_dir(base, session_id)?;
        info!(session_id = %session_id, session_path = %session_path.display(), "doc handler initialized");
        Ok(Self {
            session_id,
            session_path,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn session_path(&self) -> &Path {
        &self.session_path
    }

    pub fn save_pdf(&self, file: &UploadedFile) -> Result<PathBuf, IngestError> {
        let name = require_pdf(file)?;
        let out = self.session_path.join(&name);
        fs::write(&out, &file.bytes)?;
        info!(file = %name, session_id = %self.session_id, "pdf saved");
        Ok(out)
    }

    pub fn read_pdf(&self, path: &Path) -> Result<String, IngestError> {
        let text = read_pdf_for_analysis(path)?;
        info!(path = %path.display(), session_id = %self.session_id, "pdf read");
        Ok(text)
    }
}

/// Per-session storage for reference/actual document pairs.
pub struct ComparisonWorkspace {
    base_dir: PathBuf,
    session_id: String,
    session_path: PathBuf,
}

impl ComparisonWorkspace {
    pub fn new(
        config: &AppConfig,
        base_dir: Option<PathBuf>,
        session_id: Option<String>,
    ) -> Result<Self, IngestError> {
        let base_dir =
            base_dir.unwrap_or_else(|| PathBuf::from(&config.data.storage.document_compare));
        let (session_id, session_path) = session_dir(base_dir.clone(), session_id)?;
        info!(session_path = %session_path.display(), "comparison workspace initialized");
        Ok(Self {
            base_dir,
            session_id,
            session_path,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn session_path(&self) -> &Path {
        &self.session_path
    }

    pub fn save_uploaded_files(
        &self,
        reference: &UploadedFile,
        actual: &UploadedFile,
    ) -> Result<(PathBuf, PathBuf), IngestError> {
        let reference_name = require_pdf(reference)?;
        let actual_name = require_pdf(actual)?;

        let reference_path = self.session_path.join(reference_name);
        let actual_path = self.session_path.join(actual_name);
        fs::write(&reference_path, &reference.bytes)?;
        fs::write(&actual_path, &actual.bytes)?;

        info!(
            reference = %reference_path.display(),
            actual = %actual_path.display(),
            session_id = %self.session_id,
            "comparison files saved"
        );
        Ok((reference_path, actual_path))
    }

    /// Every PDF in the session, by file name, as `Document: {name}\n{text}` blocks.
    pub fn combine_documents(&self) -> Result<String, IngestError> {
        let mut pdfs: Vec<PathBuf> = WalkDir::new(&self.session_path)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
            })
            .collect();
        pdfs.sort_unstable();

        let mut parts = Vec::with_capacity(pdfs.len());
        for path in &pdfs {
            let content = read_pdf_for_comparison(path)?;
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            parts.push(format!("Document: {name}\n{content}"));
        }

        info!(count = parts.len(), session_id = %self.session_id, "documents combined");
        Ok(parts.join("\n\n"))
    }

    /// Keeps the `keep_latest` newest session directories (by name) and removes the rest.
    pub fn clean_old_sessions(&self, keep_latest: usize) -> Result<usize, IngestError> {
        let mut sessions: Vec<PathBuf> = WalkDir::new(&self.base_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_dir())
            .map(|entry| entry.into_path())
            .collect();
        sessions.sort_unstable_by(|left, right| right.cmp(left));

        let mut removed = 0;
        for folder in sessions.iter().skip(keep_latest) {
            fs::remove_dir_all(folder)?;
            removed += 1;
            info!(path = %folder.display(), "old session folder deleted");
        }
        Ok(removed)
    }
}
