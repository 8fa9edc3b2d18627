use crate::error::IngestError;
use chrono::Utc;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

/// An upload held in memory: the client-supplied name and its bytes.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Final path component of the client-supplied name.
    pub fn file_name(&self) -> Result<String, IngestError> {
        let base = self
            .name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default()
            .trim();
        if base.is_empty() || base == "." || base == ".." {
            return Err(IngestError::MissingFileName(self.name.clone()));
        }
        Ok(base.to_string())
    }

    pub fn extension(&self) -> String {
        Path::new(&self.name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{}", ext.to_lowercase()))
            .unwrap_or_default()
    }
}

fn short_hex() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Sortable session identifier: `{prefix}_{YYYYMMDD}_{HHMMSS}_{8 hex}`.
pub fn generate_session_id(prefix: &str) -> String {
    format!(
        "{prefix}_{}_{}",
        Utc::now().format("%Y%m%d_%H%M%S"),
        short_hex()
    )
}

/// Accepts a session id only when it is a single plain path component made of
/// ASCII letters, digits, `_` and `-`.
pub fn check_session_id(session_id: &str) -> Result<&str, IngestError> {
    let plain = !session_id.is_empty()
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if plain {
        Ok(session_id)
    } else {
        Err(IngestError::InvalidArgument(format!(
            "invalid session_id: {session_id:?}"
        )))
    }
}

/// Writes every upload with a supported extension into `target_dir` under a
/// random name and returns the saved paths in upload order.
pub fn save_uploaded_files(
    files: &[UploadedFile],
    target_dir: &Path,
    supported: &BTreeSet<String>,
) -> Result<Vec<PathBuf>, IngestError> {
    fs::create_dir_all(target_dir)?;

    let mut saved = Vec::new();
    for file in files {
        let ext = file.extension();
        if !supported.contains(&ext) {
            warn!(filename = %file.name, "unsupported file skipped");
            continue;
        }

        let out = target_dir.join(format!("{}{ext}", short_hex()));
        fs::write(&out, &file.bytes)?;
        info!(uploaded = %file.name, saved_as = %out.display(), "file saved for ingestion");
        saved.push(out);
    }

    Ok(saved)
}
