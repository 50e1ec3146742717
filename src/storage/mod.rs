//! Attachment payload storage.
//!
//! osTicket keeps file metadata in `ost_file` and the bytes either in
//! `ost_file_chunk` rows (backend `D`) or on disk (backend `F`).

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use sha1::{Digest, Sha1};

use crate::config::AttachmentBackend;
use crate::errors::AppError;

/// Size of each `ost_file_chunk` row.
pub const CHUNK_SIZE: usize = 256 * 1024;

/// Longest key osTicket indexes for file lookups.
const MAX_KEY_LEN: usize = 32;

/// Content-derived identifiers recorded on `ost_file`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    /// Filesystem-safe lookup key
    pub key: String,
    /// Base64 SHA-1 of the payload
    pub signature: String,
}

/// Compute the key and signature for a payload.
pub fn digest(data: &[u8]) -> FileDigest {
    let hash = Sha1::digest(data);
    let mut key = URL_SAFE_NO_PAD.encode(hash);
    key.truncate(MAX_KEY_LEN);
    FileDigest {
        key,
        signature: STANDARD.encode(hash),
    }
}

/// Writes attachment payloads for the configured backend.
#[derive(Debug, Clone)]
pub struct AttachmentStore {
    backend: AttachmentBackend,
}

impl AttachmentStore {
    pub fn new(backend: AttachmentBackend) -> Self {
        Self { backend }
    }

    /// Single-letter backend code stored in `ost_file.bk`.
    pub fn backend_code(&self) -> &'static str {
        match self.backend {
            AttachmentBackend::Database => "D",
            AttachmentBackend::Filesystem(_) => "F",
        }
    }

    /// Name reported to API clients.
    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            AttachmentBackend::Database => "database",
            AttachmentBackend::Filesystem(_) => "filesystem",
        }
    }

    /// Write the payload to disk when the backend is the filesystem.
    ///
    /// Returns the written file, or `None` for the database backend where the
    /// caller inserts chunk rows itself.
    pub async fn write_file(&self, key: &str, data: &[u8]) -> Result<Option<StoredFile>, AppError> {
        let AttachmentBackend::Filesystem(root) = &self.backend else {
            return Ok(None);
        };

        let path = file_path(root, key);
        let existed = tokio::fs::try_exists(&path).await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;

        tracing::debug!("Wrote attachment payload to {:?}", path);
        Ok(Some(StoredFile {
            path,
            created: !existed,
        }))
    }
}

/// A payload written by [`AttachmentStore::write_file`].
#[derive(Debug)]
pub struct StoredFile {
    pub path: PathBuf,
    /// Whether this write created the file. Keys are content-derived, so an
    /// identical payload may already be referenced by another attachment.
    created: bool,
}

impl StoredFile {
    /// Undo the write after the database side failed.
    ///
    /// A file that already existed is left in place.
    pub async fn discard(self) {
        if !self.created {
            return;
        }
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            tracing::warn!("Failed to remove orphaned attachment {:?}: {}", self.path, e);
        }
    }
}

/// `<root>/<first key char>/<key>`, the layout of osTicket's filesystem storage.
pub fn file_path(root: &Path, key: &str) -> PathBuf {
    let bucket = key.get(..1).unwrap_or("_");
    root.join(bucket).join(key)
}
