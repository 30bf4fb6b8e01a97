//! Cascade deletion of members and posts.
//!
//! Stores do not cascade on their own, so each delete is an ordered script
//! run in one transaction: children first, then the row that owns them. If any
//! step fails the transaction is dropped uncommitted and the caller receives
//! `DeletionFailed`.

use std::sync::Arc;

use domains::{BoardStore, DomainError, DomainResult, FileAttachment, FileStorage, MemberId, PostId};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::files::FileService;
use crate::required;

/// Rows removed by `delete_member`, per cascade step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemberDeletion {
    pub member_id: Option<MemberId>,
    pub files: u64,
    pub authored_comments: u64,
    pub comments_on_owned_posts: u64,
    pub posts: u64,
}

/// Rows removed by `delete_post`, per cascade step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PostDeletion {
    pub post_id: Option<PostId>,
    pub comments: u64,
    pub files: u64,
}

#[derive(Clone)]
pub struct DeletionService {
    store: Arc<dyn BoardStore>,
    files: FileService,
}

impl DeletionService {
    pub fn new(store: Arc<dyn BoardStore>, files: Arc<dyn FileStorage>) -> Self {
        Self {
            files: FileService::new(store.clone(), files),
            store,
        }
    }

    /// Removes a member with everything that depends on it:
    /// 1. attachments on the member's posts
    /// 2. comments the member wrote anywhere (and replies to them)
    /// 3. remaining comments on the member's posts
    /// 4. the member's posts
    /// 5. the member
    #[instrument(skip(self))]
    pub async fn delete_member(&self, member_id: MemberId) -> DomainResult<MemberDeletion> {
        match self.cascade_member(member_id).await {
            Ok((report, attachments)) => {
                self.files.purge(attachments.iter().map(|f| f.file_path.as_str())).await;
                info!(?report, "member deleted");
                Ok(report)
            }
            Err(e) => Err(abort("member", member_id, e)),
        }
    }

    /// Removes a post's comments, then its attachments, then the post.
    #[instrument(skip(self))]
    pub async fn delete_post(&self, post_id: PostId) -> DomainResult<PostDeletion> {
        match self.cascade_post(post_id).await {
            Ok((report, attachments)) => {
                self.files.purge(attachments.iter().map(|f| f.file_path.as_str())).await;
                info!(?report, "post deleted");
                Ok(report)
            }
            Err(e) => Err(abort("post", post_id, e)),
        }
    }

    async fn cascade_member(&self, member_id: MemberId) -> DomainResult<(MemberDeletion, Vec<FileAttachment>)> {
        let mut tx = self.store.begin().await?;
        required(tx.find_member(member_id).await?, "member", member_id)?;

        let mut report = MemberDeletion {
            member_id: Some(member_id),
            ..Default::default()
        };

        let attachments = tx.find_files_by_owner(member_id).await?;
        report.files = tx.delete_files_by_owner(member_id).await?;
        report.authored_comments = tx.delete_comments_by_author(member_id).await?;
        for post in tx.find_posts_by_owner(member_id).await? {
            report.comments_on_owned_posts += tx.delete_comments_by_post(post.id).await?;
        }
        report.posts = tx.delete_posts_by_owner(member_id).await?;
        tx.delete_member(member_id).await?;

        tx.commit().await?;
        Ok((report, attachments))
    }

    async fn cascade_post(&self, post_id: PostId) -> DomainResult<(PostDeletion, Vec<FileAttachment>)> {
        let mut tx = self.store.begin().await?;
        required(tx.find_post(post_id).await?, "post", post_id)?;

        let mut report = PostDeletion {
            post_id: Some(post_id),
            ..Default::default()
        };

        report.comments = tx.delete_comments_by_post(post_id).await?;
        let attachments = tx.find_files_by_post(post_id).await?;
        report.files = tx.delete_files_by_post(post_id).await?;
        tx.delete_post(post_id).await?;

        tx.commit().await?;
        Ok((report, attachments))
    }
}

/// A miss is reported as-is; anything else aborted a started cascade.
pub(crate) fn abort(entity: &'static str, id: impl std::fmt::Display, err: DomainError) -> DomainError {
    match err {
        DomainError::NotFound { .. } => err,
        other => {
            warn!(entity, %id, error = %other, "cascade delete rolled back");
            DomainError::deletion_failed(entity, id, other)
        }
    }
}
