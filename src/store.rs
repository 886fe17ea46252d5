//! Persistence collaborator.
//!
//! The orchestrator needs only a handful of writes plus one read (the
//! original source, for retry). [`DocumentStore`] captures that surface;
//! [`FileStore`] keeps one directory per document and [`MemoryStore`] keeps
//! everything in a map for tests and embedding.
//!
//! ```text
//! <root>/<document-id>/
//!   source.md        original text, written before the first attempt
//!   progress.json    latest ParseProgress snapshot
//!   metadata.json    written once on success
//!   document.json    written once on success
//!   failure.json     written instead of document.json on failure
//!   assets/          materialised figure images
//! ```

use crate::error::StoreError;
use crate::model::{Document, Metadata};
use crate::progress::ParseProgress;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Terminal failure record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub document_id: String,
    pub reason: String,
}

pub trait DocumentStore: Send + Sync {
    fn read_original_source<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<String>, StoreError>>;

    fn write_original_source<'a>(&'a self, id: &'a str, text: &'a str) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Final document. A successful write supersedes an earlier failure record.
    fn write_document<'a>(&'a self, id: &'a str, document: &'a Document) -> BoxFuture<'a, Result<(), StoreError>>;

    fn write_progress<'a>(&'a self, id: &'a str, progress: &'a ParseProgress) -> BoxFuture<'a, Result<(), StoreError>>;

    fn write_metadata<'a>(&'a self, id: &'a str, metadata: &'a Metadata) -> BoxFuture<'a, Result<(), StoreError>>;

    fn write_failure<'a>(&'a self, id: &'a str, reason: &'a str) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Store figure bytes under `name`; returns the stored file name.
    fn write_asset<'a>(
        &'a self,
        id: &'a str,
        name: &'a str,
        bytes: &'a [u8],
    ) -> BoxFuture<'a, Result<String, StoreError>>;
}

/// Reject ids that are empty or could escape a store directory.
pub fn validate_id(id: &str) -> Result<(), StoreError> {
    let ok = !id.is_empty()
        && id.len() <= 128
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}

// ── File store ───────────────────────────────────────────────────────────

/// One directory per document under `root`. JSON files are written
/// atomically (temp file + rename) so readers never see a partial record.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, id: &str) -> Result<PathBuf, StoreError> {
        validate_id(id)?;
        Ok(self.root.join(id))
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let io = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io)?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(io)?;
        tokio::fs::rename(&tmp, path).await.map_err(io)?;
        debug!("wrote {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }

    async fn write_json<T: Serialize + ?Sized>(&self, id: &str, file: &str, value: &T) -> Result<(), StoreError> {
        let path = self.dir(id)?.join(file);
        let json = serde_json::to_vec_pretty(value)?;
        self.write_atomic(&path, &json).await
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(&self, id: &str, file: &str) -> Result<Option<T>, StoreError> {
        let path = self.dir(id)?.join(file);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    pub async fn read_document(&self, id: &str) -> Result<Option<Document>, StoreError> {
        self.read_json(id, "document.json").await
    }

    pub async fn read_progress(&self, id: &str) -> Result<Option<ParseProgress>, StoreError> {
        self.read_json(id, "progress.json").await
    }

    pub async fn read_failure(&self, id: &str) -> Result<Option<FailureRecord>, StoreError> {
        self.read_json(id, "failure.json").await
    }
}

impl DocumentStore for FileStore {
    fn read_original_source<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<String>, StoreError>> {
        Box::pin(async move {
            let path = self.dir(id)?.join("source.md");
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => Ok(Some(text)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(source) => Err(StoreError::Io { path, source }),
            }
        })
    }

    fn write_original_source<'a>(&'a self, id: &'a str, text: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let path = self.dir(id)?.join("source.md");
            self.write_atomic(&path, text.as_bytes()).await
        })
    }

    fn write_document<'a>(&'a self, id: &'a str, document: &'a Document) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.write_json(id, "document.json", document).await?;
            let stale = self.dir(id)?.join("failure.json");
            match tokio::fs::remove_file(&stale).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(source) => Err(StoreError::Io { path: stale, source }),
            }
        })
    }

    fn write_progress<'a>(&'a self, id: &'a str, progress: &'a ParseProgress) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(self.write_json(id, "progress.json", progress))
    }

    fn write_metadata<'a>(&'a self, id: &'a str, metadata: &'a Metadata) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(self.write_json(id, "metadata.json", metadata))
    }

    fn write_failure<'a>(&'a self, id: &'a str, reason: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let record = FailureRecord {
                document_id: id.to_string(),
                reason: reason.to_string(),
            };
            self.write_json(id, "failure.json", &record).await
        })
    }

    fn write_asset<'a>(
        &'a self,
        id: &'a str,
        name: &'a str,
        bytes: &'a [u8],
    ) -> BoxFuture<'a, Result<String, StoreError>> {
        Box::pin(async move {
            validate_id(name)?;
            let path = self.dir(id)?.join("assets").join(name);
            self.write_atomic(&path, bytes).await?;
            Ok(name.to_string())
        })
    }
}

// ── Memory store ─────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone)]
struct Entry {
    source: Option<String>,
    document: Option<Document>,
    metadata: Option<Metadata>,
    progress: Vec<ParseProgress>,
    failure: Option<String>,
    assets: HashMap<String, Vec<u8>>,
}

/// In-process store. Keeps every progress snapshot so callers can inspect
/// the whole history of a run.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entry<R>(&self, id: &str, f: impl FnOnce(&mut Entry) -> R) -> R {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        f(entries.entry(id.to_string()).or_default())
    }

    pub fn document(&self, id: &str) -> Option<Document> {
        self.with_entry(id, |e| e.document.clone())
    }

    pub fn metadata(&self, id: &str) -> Option<Metadata> {
        self.with_entry(id, |e| e.metadata.clone())
    }

    pub fn progress(&self, id: &str) -> Option<ParseProgress> {
        self.with_entry(id, |e| e.progress.last().cloned())
    }

    pub fn progress_history(&self, id: &str) -> Vec<ParseProgress> {
        self.with_entry(id, |e| e.progress.clone())
    }

    pub fn failure(&self, id: &str) -> Option<String> {
        self.with_entry(id, |e| e.failure.clone())
    }

    pub fn asset(&self, id: &str, name: &str) -> Option<Vec<u8>> {
        self.with_entry(id, |e| e.assets.get(name).cloned())
    }
}

impl DocumentStore for MemoryStore {
    fn read_original_source<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<String>, StoreError>> {
        Box::pin(async move { Ok(self.with_entry(id, |e| e.source.clone())) })
    }

    fn write_original_source<'a>(&'a self, id: &'a str, text: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            validate_id(id)?;
            self.with_entry(id, |e| e.source = Some(text.to_string()));
            Ok(())
        })
    }

    fn write_document<'a>(&'a self, id: &'a str, document: &'a Document) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.with_entry(id, |e| {
                e.document = Some(document.clone());
                e.failure = None;
            });
            Ok(())
        })
    }

    fn write_progress<'a>(&'a self, id: &'a str, progress: &'a ParseProgress) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.with_entry(id, |e| e.progress.push(progress.clone()));
            Ok(())
        })
    }

    fn write_metadata<'a>(&'a self, id: &'a str, metadata: &'a Metadata) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.with_entry(id, |e| e.metadata = Some(metadata.clone()));
            Ok(())
        })
    }

    fn write_failure<'a>(&'a self, id: &'a str, reason: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.with_entry(id, |e| e.failure = Some(reason.to_string()));
            Ok(())
        })
    }

    fn write_asset<'a>(
        &'a self,
        id: &'a str,
        name: &'a str,
        bytes: &'a [u8],
    ) -> BoxFuture<'a, Result<String, StoreError>> {
        Box::pin(async move {
            validate_id(name)?;
            self.with_entry(id, |e| e.assets.insert(name.to_string(), bytes.to_vec()));
            Ok(name.to_string())
        })
    }
}
