//! # Domain Models
//!
//! These structs represent the core entities of the board.
//! Ids are store-assigned `i64` values wrapped in per-entity newtypes so a
//! `PostId` can never be handed to a call expecting a `CommentId`.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

entity_id!(
    /// Primary key of a [`Member`].
    MemberId
);
entity_id!(
    /// Primary key of a [`Post`].
    PostId
);
entity_id!(
    /// Primary key of a [`Comment`].
    CommentId
);
entity_id!(
    /// Primary key of a [`FileAttachment`].
    FileId
);

/// Authorization level of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Admin => "ADMIN",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USER" => Ok(Role::User),
            "ADMIN" => Ok(Role::Admin),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

/// A registered account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    /// Unique sign-in name
    pub login_id: String,
    /// Opaque credential; hashing and verification belong to the auth layer
    #[serde(skip_serializing)]
    pub password: String,
    pub username: String,
    /// Unique display name shown next to posts and comments
    pub nickname: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMember {
    pub login_id: String,
    pub password: String,
    pub username: String,
    pub nickname: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// A board post owned by exactly one member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub owner_id: MemberId,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub view_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPost {
    pub owner_id: MemberId,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A comment on a post. `parent_id` is `None` for top-level comments and
/// points at a top-level comment of the same post for replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub post_id: PostId,
    pub author_id: MemberId,
    pub parent_id: Option<CommentId>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Comment {
    pub fn is_reply(&self) -> bool {
        self.parent_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewComment {
    pub post_id: PostId,
    pub author_id: MemberId,
    pub parent_id: Option<CommentId>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Metadata row for a file attached to a post. The bytes live in the
/// `FileStorage` under `file_path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAttachment {
    pub id: FileId,
    pub post_id: PostId,
    /// Original name as uploaded; what the edit form round-trips
    pub file_name: String,
    /// Storage key returned by `FileStorage::store`
    pub file_path: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFileAttachment {
    pub post_id: PostId,
    pub file_name: String,
    pub file_path: String,
    pub uploaded_at: DateTime<Utc>,
}

/// A file submitted with a create or edit form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Upload {
    pub original_name: String,
    pub data: Bytes,
}

impl Upload {
    pub fn new(original_name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            original_name: original_name.into(),
            data: data.into(),
        }
    }

    /// An untouched file input: no name or no bytes.
    pub fn is_empty(&self) -> bool {
        self.original_name.trim().is_empty() || self.data.is_empty()
    }
}

// Read projections used by listings and detail views.

/// One row of a post listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostSummary {
    pub id: PostId,
    pub title: String,
    /// Owner's nickname
    pub nickname: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub view_count: i64,
}

/// One row of the member administration listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberSummary {
    pub id: MemberId,
    pub login_id: String,
    pub username: String,
    pub nickname: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&Member> for MemberSummary {
    fn from(member: &Member) -> Self {
        Self {
            id: member.id,
            login_id: member.login_id.clone(),
            username: member.username.clone(),
            nickname: member.nickname.clone(),
            role: member.role,
            created_at: member.created_at,
            updated_at: member.updated_at,
        }
    }
}

/// A comment joined with its author's nickname.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentView {
    #[serde(flatten)]
    pub comment: Comment,
    pub nickname: String,
}

/// A post with everything the detail page shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostDetail {
    pub post: Post,
    pub nickname: String,
    pub file_names: Vec<String>,
}
