//! # Attachment byte storage
//!
//! Storage keys are relative, `/`-separated paths of the form
//! `ab/cd/<uuid>-<name>`, sharded on the first hex digits of a random id so
//! no directory grows unbounded. The original file name is kept only as a
//! sanitized suffix for operators browsing the tree.

use std::path::Path;
#[cfg(feature = "media-local")]
use std::path::{Component, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use domains::{DomainError, DomainResult, FileStorage};
use tracing::debug;
use uuid::Uuid;

const MAX_NAME_LEN: usize = 100;

/// Reduces a client supplied name to a single safe path segment.
fn sanitize(suggested: &str) -> String {
    let base = Path::new(suggested)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .take(MAX_NAME_LEN)
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

fn new_key(suggested: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}/{}/{}-{}", &id[0..2], &id[2..4], id, sanitize(suggested))
}

/// Stores attachment bytes below a root directory.
#[cfg(feature = "media-local")]
pub struct LocalFileStorage {
    root: PathBuf,
}

#[cfg(feature = "media-local")]
impl LocalFileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Maps a storage key to a path under the root. Keys that could escape
    /// the root resolve to nothing.
    fn resolve(&self, key: &str) -> Option<PathBuf> {
        let relative = Path::new(key);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        (safe && !key.is_empty()).then(|| self.root.join(relative))
    }

    fn locate(&self, key: &str) -> DomainResult<PathBuf> {
        self.resolve(key).ok_or_else(|| DomainError::not_found("stored file", key))
    }
}

#[cfg(feature = "media-local")]
fn io_error(key: &str, err: std::io::Error) -> DomainError {
    if err.kind() == std::io::ErrorKind::NotFound {
        DomainError::not_found("stored file", key)
    } else {
        DomainError::data_access(err)
    }
}

#[cfg(feature = "media-local")]
#[async_trait]
impl FileStorage for LocalFileStorage {
    async fn store(&self, data: Bytes, suggested_name: &str) -> DomainResult<String> {
        let key = new_key(suggested_name);
        let target = self.locate(&key)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(DomainError::data_access)?;
        }
        tokio::fs::write(&target, &data).await.map_err(DomainError::data_access)?;
        debug!(key, bytes = data.len(), "stored file");
        Ok(key)
    }

    async fn delete(&self, stored_path: &str) -> DomainResult<()> {
        let target = self.locate(stored_path)?;
        tokio::fs::remove_file(&target)
            .await
            .map_err(|e| io_error(stored_path, e))
    }

    async fn retrieve(&self, stored_path: &str) -> DomainResult<Bytes> {
        let target = self.locate(stored_path)?;
        let data = tokio::fs::read(&target)
            .await
            .map_err(|e| io_error(stored_path, e))?;
        Ok(Bytes::from(data))
    }
}

/// Keeps attachment bytes in memory.
#[derive(Default)]
pub struct InMemoryFileStorage {
    blobs: DashMap<String, Bytes>,
}

impl InMemoryFileStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, stored_path: &str) -> bool {
        self.blobs.contains_key(stored_path)
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl FileStorage for InMemoryFileStorage {
    async fn store(&self, data: Bytes, suggested_name: &str) -> DomainResult<String> {
        let key = new_key(suggested_name);
        self.blobs.insert(key.clone(), data);
        Ok(key)
    }

    async fn delete(&self, stored_path: &str) -> DomainResult<()> {
        self.blobs
            .remove(stored_path)
            .map(|_| ())
            .ok_or_else(|| DomainError::not_found("stored file", stored_path))
    }

    async fn retrieve(&self, stored_path: &str) -> DomainResult<Bytes> {
        self.blobs
            .get(stored_path)
            .map(|b| b.value().clone())
            .ok_or_else(|| DomainError::not_found("stored file", stored_path))
    }
}
