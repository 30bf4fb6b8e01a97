//! # services
//!
//! Orchestration over the storage ports: paged search, cascade deletion,
//! comment threading, attachment reconciliation, and the post/member
//! workflows built on them. Each public operation runs in one transaction.

pub mod comments;
pub mod deletion;
pub mod files;
pub mod members;
pub mod posts;
pub mod search;

pub use comments::{CommentService, CommentThread};
pub use deletion::{DeletionService, MemberDeletion, PostDeletion};
pub use files::{Download, FileService, PostEdit, Reconciliation};
pub use members::{MemberForm, MemberService, MemberUpdate};
pub use posts::{EditedPost, PostForm, PostService};
pub use search::{SearchResults, SearchService};

use domains::{DomainError, DomainResult};

/// Turns a store lookup miss into `NotFound`.
pub(crate) fn required<T>(
    found: Option<T>,
    entity: &'static str,
    id: impl std::fmt::Display,
) -> DomainResult<T> {
    found.ok_or_else(|| DomainError::not_found(entity, id))
}
