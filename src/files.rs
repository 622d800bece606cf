//! Upload storage and file-id resolution.
//!
//! Uploaded reports are stored flat under one directory as `{uuid}{ext}`.
//! The orchestrator only sees the [`FileResolver`] trait, so a host can
//! keep uploads anywhere it likes.

use crate::error::TaskError;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Largest accepted upload.
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Extensions accepted for upload (lowercase, without the dot).
pub const ALLOWED_UPLOAD_EXTENSIONS: &[&str] = &[
    "pdf", "docx", "pptx", "txt", "jpg", "jpeg", "png", "gif", "webp", "doc", "ppt",
];

/// Resolve an opaque file id to a readable path.
pub trait FileResolver: Send + Sync {
    fn resolve(&self, file_id: &str) -> Result<PathBuf, TaskError>;
}

/// Metadata of a stored upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredUpload {
    pub file_id: String,
    /// Name the file was uploaded under.
    pub filename: String,
    pub size: usize,
    pub path: PathBuf,
}

/// Directory-backed upload store.
#[derive(Debug, Clone)]
pub struct UploadDir {
    root: PathBuf,
}

impl UploadDir {
    /// Open (creating if needed) the upload directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, TaskError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            TaskError::Upload(format!("cannot create {}: {}", root.display(), e))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate and store an upload.
    pub fn save(&self, filename: &str, bytes: &[u8]) -> Result<StoredUpload, TaskError> {
        let ext = Path::new(filename)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if !ALLOWED_UPLOAD_EXTENSIONS.contains(&ext.as_str()) {
            return Err(TaskError::Upload(format!(
                "unsupported file type '.{}'. Allowed: {}",
                ext,
                ALLOWED_UPLOAD_EXTENSIONS.join(", ")
            )));
        }
        if bytes.is_empty() {
            return Err(TaskError::Upload("file is empty".into()));
        }
        if bytes.len() > MAX_UPLOAD_BYTES {
            return Err(TaskError::Upload(format!(
                "file too large ({:.2} MB), limit is {} MB",
                bytes.len() as f64 / (1024.0 * 1024.0),
                MAX_UPLOAD_BYTES / (1024 * 1024)
            )));
        }

        let file_id = uuid::Uuid::new_v4().to_string();
        let path = self.root.join(format!("{file_id}.{ext}"));
        fs::write(&path, bytes)
            .map_err(|e| TaskError::Upload(format!("cannot write {}: {}", path.display(), e)))?;

        info!("Stored upload {} as {}", filename, path.display());
        Ok(StoredUpload {
            file_id,
            filename: filename.to_string(),
            size: bytes.len(),
            path,
        })
    }

    /// Remove every file stored under `file_id`; returns how many were removed.
    pub fn delete(&self, file_id: &str) -> Result<usize, TaskError> {
        let matches = self.matching(file_id)?;
        if matches.is_empty() {
            return Err(TaskError::FileNotFound {
                file_id: file_id.to_string(),
            });
        }
        for path in &matches {
            fs::remove_file(path).map_err(|e| {
                TaskError::Upload(format!("cannot delete {}: {}", path.display(), e))
            })?;
            info!("Deleted upload {}", path.display());
        }
        Ok(matches.len())
    }

    /// Files named `{file_id}.*`, sorted.
    fn matching(&self, file_id: &str) -> Result<Vec<PathBuf>, TaskError> {
        if file_id.is_empty() || !file_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(TaskError::FileNotFound {
                file_id: file_id.to_string(),
            });
        }
        let entries = fs::read_dir(&self.root).map_err(|e| {
            TaskError::Upload(format!("cannot read {}: {}", self.root.display(), e))
        })?;
        let mut found: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file() && p.file_stem().map_or(false, |stem| stem == file_id)
            })
            .collect();
        found.sort();
        Ok(found)
    }
}

impl FileResolver for UploadDir {
    fn resolve(&self, file_id: &str) -> Result<PathBuf, TaskError> {
        self.matching(file_id)?
            .into_iter()
            .next()
            .ok_or_else(|| TaskError::FileNotFound {
                file_id: file_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_resolve_delete() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = UploadDir::new(dir.path().join("uploads")).unwrap();

        let stored = uploads.save("FA Report.PDF", b"%PDF-1.4").unwrap();
        assert_eq!(stored.size, 8);
        assert_eq!(stored.filename, "FA Report.PDF");
        assert!(stored.path.ends_with(format!("{}.pdf", stored.file_id)));

        assert_eq!(uploads.resolve(&stored.file_id).unwrap(), stored.path);
        assert_eq!(uploads.delete(&stored.file_id).unwrap(), 1);
        assert!(matches!(
            uploads.resolve(&stored.file_id),
            Err(TaskError::FileNotFound { .. })
        ));
    }

    #[test]
    fn legacy_extensions_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = UploadDir::new(dir.path()).unwrap();
        assert!(uploads.save("old.ppt", b"\xD0\xCF\x11\xE0").is_ok());
        assert!(uploads.save("old.doc", b"\xD0\xCF\x11\xE0").is_ok());
    }

    #[test]
    fn rejects_bad_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = UploadDir::new(dir.path()).unwrap();
        assert!(matches!(uploads.save("x.exe", b"MZ"), Err(TaskError::Upload(_))));
        assert!(matches!(uploads.save("x.txt", b""), Err(TaskError::Upload(_))));
        let big = vec![b'a'; MAX_UPLOAD_BYTES + 1];
        let err = uploads.save("x.txt", &big).unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn ids_cannot_escape_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = UploadDir::new(dir.path()).unwrap();
        assert!(uploads.resolve("../etc/passwd").is_err());
        assert!(uploads.resolve("").is_err());
        assert!(uploads.delete("nope").is_err());
    }
}
