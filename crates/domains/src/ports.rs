//! # Ports
//!
//! Storage adapters implement these traits; services only ever see
//! `dyn BoardStore` and `dyn FileStorage`.
//!
//! Every data access happens inside a [`BoardTx`]. Writes become visible on
//! [`BoardTx::commit`]; dropping a transaction without committing discards
//! them. Stores are not expected to cascade anything on their own: deleting a
//! parent row while children still reference it is a constraint violation.

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::DomainResult;
use crate::models::{
    Comment, CommentId, CommentView, FileAttachment, FileId, Member, MemberId, MemberSummary,
    NewComment, NewFileAttachment, NewMember, NewPost, Post, PostId, PostSummary,
};
use crate::search::{MemberFilter, PostFilter};

/// Entry point to the relational store.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait BoardStore: Send + Sync {
    /// Opens a transaction. All calls made through it commit or roll back together.
    async fn begin(&self) -> DomainResult<Box<dyn BoardTx>>;
}

/// Data persistence contract for members, posts, comments and attachments,
/// scoped to one transaction.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait BoardTx: Send {
    // Member Operations
    async fn insert_member(&mut self, member: &NewMember) -> DomainResult<MemberId>;
    async fn find_member(&mut self, id: MemberId) -> DomainResult<Option<Member>>;
    async fn find_member_by_login_id(&mut self, login_id: &str) -> DomainResult<Option<Member>>;
    async fn find_member_by_nickname(&mut self, nickname: &str) -> DomainResult<Option<Member>>;
    /// Overwrites every column of the row with `member.id`.
    async fn update_member(&mut self, member: &Member) -> DomainResult<()>;
    async fn delete_member(&mut self, id: MemberId) -> DomainResult<u64>;
    async fn search_members(&mut self, filter: &MemberFilter, offset: u64, limit: u64) -> DomainResult<Vec<MemberSummary>>;
    async fn count_members(&mut self, filter: &MemberFilter) -> DomainResult<u64>;

    // Post Operations
    async fn insert_post(&mut self, post: &NewPost) -> DomainResult<PostId>;
    async fn find_post(&mut self, id: PostId) -> DomainResult<Option<Post>>;
    async fn find_posts_by_owner(&mut self, owner: MemberId) -> DomainResult<Vec<Post>>;
    /// Overwrites title, content, updated_at and view_count.
    async fn update_post(&mut self, post: &Post) -> DomainResult<()>;
    async fn increment_view_count(&mut self, id: PostId) -> DomainResult<u64>;
    async fn delete_post(&mut self, id: PostId) -> DomainResult<u64>;
    async fn delete_posts_by_owner(&mut self, owner: MemberId) -> DomainResult<u64>;
    /// Rows ordered by id ascending.
    async fn search_posts(&mut self, filter: &PostFilter, offset: u64, limit: u64) -> DomainResult<Vec<PostSummary>>;
    async fn count_posts(&mut self, filter: &PostFilter) -> DomainResult<u64>;

    // Comment Operations
    async fn insert_comment(&mut self, comment: &NewComment) -> DomainResult<CommentId>;
    async fn find_comment(&mut self, id: CommentId) -> DomainResult<Option<Comment>>;
    /// Both top-level comments and replies, ordered by creation time then id.
    async fn find_comments_by_post(&mut self, post: PostId) -> DomainResult<Vec<CommentView>>;
    async fn update_comment(&mut self, comment: &Comment) -> DomainResult<()>;
    async fn delete_comment(&mut self, id: CommentId) -> DomainResult<u64>;
    async fn delete_comments_by_parent(&mut self, parent: CommentId) -> DomainResult<u64>;
    /// Removes replies before top-level comments.
    async fn delete_comments_by_post(&mut self, post: PostId) -> DomainResult<u64>;
    /// Removes the author's comments on any post, together with every reply
    /// (by anyone) to those comments.
    async fn delete_comments_by_author(&mut self, author: MemberId) -> DomainResult<u64>;

    // File Operations
    async fn insert_file(&mut self, file: &NewFileAttachment) -> DomainResult<FileId>;
    async fn find_file(&mut self, id: FileId) -> DomainResult<Option<FileAttachment>>;
    async fn find_files_by_post(&mut self, post: PostId) -> DomainResult<Vec<FileAttachment>>;
    /// Attachments on every post owned by `owner`.
    async fn find_files_by_owner(&mut self, owner: MemberId) -> DomainResult<Vec<FileAttachment>>;
    async fn delete_file(&mut self, id: FileId) -> DomainResult<u64>;
    async fn delete_files_by_post(&mut self, post: PostId) -> DomainResult<u64>;
    async fn delete_files_by_owner(&mut self, owner: MemberId) -> DomainResult<u64>;

    /// Makes every write of this transaction visible. Further calls fail.
    async fn commit(&mut self) -> DomainResult<()>;
}

/// Byte storage contract for attachment contents.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Saves raw bytes and returns the storage key to record on the attachment.
    async fn store(&self, data: Bytes, suggested_name: &str) -> DomainResult<String>;
    async fn delete(&self, stored_path: &str) -> DomainResult<()>;
    /// `NotFound` when nothing is stored under `stored_path`.
    async fn retrieve(&self, stored_path: &str) -> DomainResult<Bytes>;
}
