//! Attachment bookkeeping: duplicate and no-op detection on edit, and
//! reconciliation of a post's persisted file set with a resubmitted form.
//!
//! Bytes go through `FileStorage`, rows through `BoardTx`. File storage is not
//! transactional, so new bytes are written before the row transaction and
//! removed again if it fails, while bytes of dropped attachments are only
//! removed after the transaction commits.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use domains::{
    BoardStore, BoardTx, DomainResult, FileAttachment, FileId, FileStorage, NewFileAttachment, Post,
    PostId, Upload, ValidationErrors, ValidationKind,
};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::required;

/// The edit form for an existing post.
#[derive(Debug, Clone, Default)]
pub struct PostEdit {
    pub title: String,
    pub content: String,
    /// Names of the already attached files the user kept
    pub retained_file_names: Vec<String>,
    pub uploads: Vec<Upload>,
}

impl PostEdit {
    /// Retained names without blank entries from empty form inputs.
    pub fn retained(&self) -> Vec<String> {
        retained_names(&self.retained_file_names)
    }
}

/// What a reconciliation changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Reconciliation {
    pub removed: Vec<FileAttachment>,
    pub added: Vec<FileAttachment>,
}

/// A stored attachment ready to be handed to the caller.
#[derive(Debug, Clone)]
pub struct Download {
    pub file_name: String,
    pub content_type: mime::Mime,
    pub data: Bytes,
}

/// Bytes already written to storage, not yet registered as a row.
#[derive(Debug, Clone)]
pub(crate) struct StoredUpload {
    pub file_name: String,
    pub file_path: String,
}

fn retained_names(names: &[String]) -> Vec<String> {
    names.iter().filter(|n| !n.trim().is_empty()).cloned().collect()
}

fn real_uploads(uploads: &[Upload]) -> impl Iterator<Item = &Upload> {
    uploads.iter().filter(|u| !u.is_empty())
}

#[derive(Clone)]
pub struct FileService {
    store: Arc<dyn BoardStore>,
    files: Arc<dyn FileStorage>,
}

impl FileService {
    pub fn new(store: Arc<dyn BoardStore>, files: Arc<dyn FileStorage>) -> Self {
        Self { store, files }
    }

    /// Rejects the whole submission if an upload reuses a retained name.
    pub fn check_duplicate_upload(retained: &[String], uploads: &[Upload]) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        let retained: HashSet<&str> = retained.iter().map(String::as_str).collect();
        if real_uploads(uploads).any(|u| retained.contains(u.original_name.as_str())) {
            errors.reject_field("files", ValidationKind::DuplicateFile);
        }
        errors
    }

    /// Rejects an edit that leaves title, content and file set untouched and
    /// uploads nothing.
    pub fn check_for_no_op_edit(original: &Post, persisted_names: &[String], edit: &PostEdit) -> ValidationErrors {
        let mut errors = ValidationErrors::new();

        let mut before = persisted_names.to_vec();
        let mut after = edit.retained();
        before.sort();
        after.sort();

        let unchanged = original.title == edit.title
            && original.content == edit.content
            && before == after
            && real_uploads(&edit.uploads).next().is_none();

        if unchanged {
            errors.reject(ValidationKind::NoChange);
        }
        errors
    }

    /// Brings the post's attachments in line with `retained` plus `uploads`.
    #[instrument(skip(self, retained, uploads), fields(uploads = uploads.len()))]
    pub async fn reconcile_files(
        &self,
        post_id: PostId,
        retained: &[String],
        uploads: Vec<Upload>,
    ) -> DomainResult<Reconciliation> {
        let stored = self.store_uploads(&uploads).await?;

        let result: DomainResult<Reconciliation> = async {
            let mut tx = self.store.begin().await?;
            required(tx.find_post(post_id).await?, "post", post_id)?;
            let outcome = apply_reconciliation(&mut *tx, post_id, &retained_names(retained), &stored).await?;
            tx.commit().await?;
            Ok(outcome)
        }
        .await;

        self.settle(result, &stored).await
    }

    /// Retrieves an attachment's bytes with a content type guessed from its name.
    #[instrument(skip(self))]
    pub async fn download(&self, file_id: FileId) -> DomainResult<Download> {
        let mut tx = self.store.begin().await?;
        let file = required(tx.find_file(file_id).await?, "file", file_id)?;
        tx.commit().await?;

        let data = self.files.retrieve(&file.file_path).await?;
        let content_type = mime_guess::from_path(&file.file_name).first_or_octet_stream();
        Ok(Download {
            file_name: file.file_name,
            content_type,
            data,
        })
    }

    /// Writes every non-empty upload to storage. On failure the bytes written
    /// so far are removed again.
    pub(crate) async fn store_uploads(&self, uploads: &[Upload]) -> DomainResult<Vec<StoredUpload>> {
        let mut stored = Vec::new();
        for upload in real_uploads(uploads) {
            match self.files.store(upload.data.clone(), &upload.original_name).await {
                Ok(file_path) => stored.push(StoredUpload {
                    file_name: upload.original_name.clone(),
                    file_path,
                }),
                Err(e) => {
                    self.purge(stored.iter().map(|s| s.file_path.as_str())).await;
                    return Err(e);
                }
            }
        }
        Ok(stored)
    }

    /// After the row transaction: drop bytes of removed attachments on
    /// success, or the freshly stored bytes on failure.
    pub(crate) async fn settle(
        &self,
        result: DomainResult<Reconciliation>,
        stored: &[StoredUpload],
    ) -> DomainResult<Reconciliation> {
        match result {
            Ok(outcome) => {
                self.purge(outcome.removed.iter().map(|f| f.file_path.as_str())).await;
                Ok(outcome)
            }
            Err(e) => {
                self.purge(stored.iter().map(|s| s.file_path.as_str())).await;
                Err(e)
            }
        }
    }

    /// Best-effort byte removal; rows are already gone or never existed.
    pub(crate) async fn purge<'a>(&self, paths: impl Iterator<Item = &'a str>) {
        for path in paths {
            if let Err(e) = self.files.delete(path).await {
                warn!(path, error = %e, "failed to delete stored file");
            }
        }
    }
}

/// Row half of a reconciliation, run inside the caller's transaction.
pub(crate) async fn apply_reconciliation(
    tx: &mut dyn BoardTx,
    post_id: PostId,
    retained: &[String],
    stored: &[StoredUpload],
) -> DomainResult<Reconciliation> {
    let keep: HashSet<&str> = retained.iter().map(String::as_str).collect();
    let mut outcome = Reconciliation::default();

    for file in tx.find_files_by_post(post_id).await? {
        if !keep.contains(file.file_name.as_str()) {
            tx.delete_file(file.id).await?;
            outcome.removed.push(file);
        }
    }

    outcome.added = attach_uploads(tx, post_id, stored).await?;

    info!(
        %post_id,
        removed = outcome.removed.len(),
        added = outcome.added.len(),
        "reconciled attachments"
    );
    Ok(outcome)
}

/// Inserts one attachment row per stored upload.
pub(crate) async fn attach_uploads(
    tx: &mut dyn BoardTx,
    post_id: PostId,
    stored: &[StoredUpload],
) -> DomainResult<Vec<FileAttachment>> {
    let mut added = Vec::with_capacity(stored.len());
    for upload in stored {
        let row = NewFileAttachment {
            post_id,
            file_name: upload.file_name.clone(),
            file_path: upload.file_path.clone(),
            uploaded_at: Utc::now(),
        };
        let id = tx.insert_file(&row).await?;
        added.push(FileAttachment {
            id,
            post_id,
            file_name: row.file_name,
            file_path: row.file_path,
            uploaded_at: row.uploaded_at,
        });
    }
    Ok(added)
}
