//! # In-memory board store
//!
//! Keeps every table in one `Tables` value behind a `tokio::sync::Mutex`.
//! A transaction holds the lock for its whole lifetime and works on a clone;
//! `commit` swaps the clone in, dropping the transaction discards it.
//!
//! Referential integrity is enforced the way the SQL schema does it: inserts
//! need their parents, and deleting a row that is still referenced fails.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashSet;
use domains::{
    BoardStore, BoardTx, Comment, CommentId, CommentView, DomainError, DomainResult, FileAttachment,
    FileId, Member, MemberFilter, MemberId, MemberSummary, NewComment, NewFileAttachment, NewMember,
    NewPost, Post, PostFilter, PostId, PostSummary,
};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

#[derive(Debug, Error)]
pub enum MemoryStoreError {
    #[error("constraint violated: {0}")]
    Constraint(String),
    #[error("injected failure in {0}")]
    Injected(String),
    #[error("transaction already committed")]
    Closed,
}

impl From<MemoryStoreError> for DomainError {
    fn from(err: MemoryStoreError) -> Self {
        DomainError::data_access(err)
    }
}

fn constraint(msg: impl Into<String>) -> DomainError {
    MemoryStoreError::Constraint(msg.into()).into()
}

#[derive(Debug, Clone, Default)]
struct Tables {
    members: BTreeMap<MemberId, Member>,
    posts: BTreeMap<PostId, Post>,
    comments: BTreeMap<CommentId, Comment>,
    files: BTreeMap<FileId, FileAttachment>,
    last_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn nickname_of(&self, id: MemberId) -> String {
        self.members.get(&id).map(|m| m.nickname.clone()).unwrap_or_default()
    }

    fn owned_post_ids(&self, owner: MemberId) -> HashSet<PostId> {
        self.posts
            .values()
            .filter(|p| p.owner_id == owner)
            .map(|p| p.id)
            .collect()
    }

    fn remove_comments_where(&mut self, pred: impl Fn(&Comment) -> bool) -> u64 {
        let before = self.comments.len();
        self.comments.retain(|_, c| !pred(c));
        (before - self.comments.len()) as u64
    }

    fn remove_files_where(&mut self, pred: impl Fn(&FileAttachment) -> bool) -> u64 {
        let before = self.files.len();
        self.files.retain(|_, f| !pred(f));
        (before - self.files.len()) as u64
    }

    fn post_is_referenced(&self, id: PostId) -> bool {
        self.comments.values().any(|c| c.post_id == id) || self.files.values().any(|f| f.post_id == id)
    }

    fn matching_posts<'a>(&'a self, filter: &'a PostFilter) -> impl Iterator<Item = &'a Post> + 'a {
        self.posts
            .values()
            .filter(move |p| filter.matches(p, &self.nickname_of(p.owner_id)))
    }
}

/// Offsets past the addressable range skip everything.
fn as_index(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

/// Row counts per table, for assertions in tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowCounts {
    pub members: usize,
    pub posts: usize,
    pub comments: usize,
    pub files: usize,
}

#[derive(Clone, Default)]
pub struct InMemoryBoardStore {
    tables: Arc<Mutex<Tables>>,
    faults: Arc<DashSet<String>>,
}

impl InMemoryBoardStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later call of the named `BoardTx` operation (or `commit`)
    /// fail until [`clear_faults`](Self::clear_faults).
    pub fn fail_on(&self, op: &str) {
        self.faults.insert(op.to_string());
    }

    pub fn clear_faults(&self) {
        self.faults.clear();
    }

    pub async fn row_counts(&self) -> RowCounts {
        let tables = self.tables.lock().await;
        RowCounts {
            members: tables.members.len(),
            posts: tables.posts.len(),
            comments: tables.comments.len(),
            files: tables.files.len(),
        }
    }
}

#[async_trait]
impl BoardStore for InMemoryBoardStore {
    async fn begin(&self) -> DomainResult<Box<dyn BoardTx>> {
        let guard = self.tables.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            work,
            faults: self.faults.clone(),
            committed: false,
        }))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    work: Tables,
    faults: Arc<DashSet<String>>,
    committed: bool,
}

impl MemoryTx {
    fn enter(&mut self, op: &str) -> DomainResult<&mut Tables> {
        if self.committed {
            return Err(MemoryStoreError::Closed.into());
        }
        if self.faults.contains(op) {
            debug!(op, "injected failure");
            return Err(MemoryStoreError::Injected(op.to_string()).into());
        }
        Ok(&mut self.work)
    }
}

#[async_trait]
impl BoardTx for MemoryTx {
    async fn insert_member(&mut self, member: &NewMember) -> DomainResult<MemberId> {
        let t = self.enter("insert_member")?;
        if t.members.values().any(|m| m.login_id == member.login_id) {
            return Err(constraint("members.login_id is not unique"));
        }
        if t.members.values().any(|m| m.nickname == member.nickname) {
            return Err(constraint("members.nickname is not unique"));
        }
        let id = MemberId(t.next_id());
        t.members.insert(
            id,
            Member {
                id,
                login_id: member.login_id.clone(),
                password: member.password.clone(),
                username: member.username.clone(),
                nickname: member.nickname.clone(),
                role: member.role,
                created_at: member.created_at,
                updated_at: None,
            },
        );
        Ok(id)
    }

    async fn find_member(&mut self, id: MemberId) -> DomainResult<Option<Member>> {
        Ok(self.enter("find_member")?.members.get(&id).cloned())
    }

    async fn find_member_by_login_id(&mut self, login_id: &str) -> DomainResult<Option<Member>> {
        let t = self.enter("find_member_by_login_id")?;
        Ok(t.members.values().find(|m| m.login_id == login_id).cloned())
    }

    async fn find_member_by_nickname(&mut self, nickname: &str) -> DomainResult<Option<Member>> {
        let t = self.enter("find_member_by_nickname")?;
        Ok(t.members.values().find(|m| m.nickname == nickname).cloned())
    }

    async fn update_member(&mut self, member: &Member) -> DomainResult<()> {
        let t = self.enter("update_member")?;
        if t
            .members
            .values()
            .any(|m| m.id != member.id && (m.login_id == member.login_id || m.nickname == member.nickname))
        {
            return Err(constraint("members login_id/nickname is not unique"));
        }
        if let Some(row) = t.members.get_mut(&member.id) {
            *row = member.clone();
        }
        Ok(())
    }

    async fn delete_member(&mut self, id: MemberId) -> DomainResult<u64> {
        let t = self.enter("delete_member")?;
        if t.posts.values().any(|p| p.owner_id == id) || t.comments.values().any(|c| c.author_id == id) {
            return Err(constraint(format!("member {id} is still referenced")));
        }
        Ok(t.members.remove(&id).map_or(0, |_| 1))
    }

    async fn search_members(&mut self, filter: &MemberFilter, offset: u64, limit: u64) -> DomainResult<Vec<MemberSummary>> {
        let t = self.enter("search_members")?;
        Ok(t.members
            .values()
            .filter(|m| filter.matches(m))
            .skip(as_index(offset))
            .take(as_index(limit))
            .map(MemberSummary::from)
            .collect())
    }

    async fn count_members(&mut self, filter: &MemberFilter) -> DomainResult<u64> {
        let t = self.enter("count_members")?;
        Ok(t.members.values().filter(|m| filter.matches(m)).count() as u64)
    }

    async fn insert_post(&mut self, post: &NewPost) -> DomainResult<PostId> {
        let t = self.enter("insert_post")?;
        if !t.members.contains_key(&post.owner_id) {
            return Err(constraint(format!("posts.owner_id {} has no member", post.owner_id)));
        }
        let id = PostId(t.next_id());
        t.posts.insert(
            id,
            Post {
                id,
                owner_id: post.owner_id,
                title: post.title.clone(),
                content: post.content.clone(),
                created_at: post.created_at,
                updated_at: None,
                view_count: 0,
            },
        );
        Ok(id)
    }

    async fn find_post(&mut self, id: PostId) -> DomainResult<Option<Post>> {
        Ok(self.enter("find_post")?.posts.get(&id).cloned())
    }

    async fn find_posts_by_owner(&mut self, owner: MemberId) -> DomainResult<Vec<Post>> {
        let t = self.enter("find_posts_by_owner")?;
        Ok(t.posts.values().filter(|p| p.owner_id == owner).cloned().collect())
    }

    async fn update_post(&mut self, post: &Post) -> DomainResult<()> {
        let t = self.enter("update_post")?;
        if let Some(row) = t.posts.get_mut(&post.id) {
            row.title = post.title.clone();
            row.content = post.content.clone();
            row.updated_at = post.updated_at;
            row.view_count = post.view_count;
        }
        Ok(())
    }

    async fn increment_view_count(&mut self, id: PostId) -> DomainResult<u64> {
        let t = self.enter("increment_view_count")?;
        Ok(t.posts.get_mut(&id).map_or(0, |p| {
            p.view_count += 1;
            1
        }))
    }

    async fn delete_post(&mut self, id: PostId) -> DomainResult<u64> {
        let t = self.enter("delete_post")?;
        if t.post_is_referenced(id) {
            return Err(constraint(format!("post {id} is still referenced")));
        }
        Ok(t.posts.remove(&id).map_or(0, |_| 1))
    }

    async fn delete_posts_by_owner(&mut self, owner: MemberId) -> DomainResult<u64> {
        let t = self.enter("delete_posts_by_owner")?;
        let ids = t.owned_post_ids(owner);
        if ids.iter().any(|id| t.post_is_referenced(*id)) {
            return Err(constraint(format!("posts of member {owner} are still referenced")));
        }
        t.posts.retain(|id, _| !ids.contains(id));
        Ok(ids.len() as u64)
    }

    async fn search_posts(&mut self, filter: &PostFilter, offset: u64, limit: u64) -> DomainResult<Vec<PostSummary>> {
        let t = self.enter("search_posts")?;
        Ok(t.matching_posts(filter)
            .skip(as_index(offset))
            .take(as_index(limit))
            .map(|p| PostSummary {
                id: p.id,
                title: p.title.clone(),
                nickname: t.nickname_of(p.owner_id),
                created_at: p.created_at,
                updated_at: p.updated_at,
                view_count: p.view_count,
            })
            .collect())
    }

    async fn count_posts(&mut self, filter: &PostFilter) -> DomainResult<u64> {
        let t = self.enter("count_posts")?;
        Ok(t.matching_posts(filter).count() as u64)
    }

    async fn insert_comment(&mut self, comment: &NewComment) -> DomainResult<CommentId> {
        let t = self.enter("insert_comment")?;
        if !t.posts.contains_key(&comment.post_id) {
            return Err(constraint(format!("comments.post_id {} has no post", comment.post_id)));
        }
        if !t.members.contains_key(&comment.author_id) {
            return Err(constraint(format!("comments.author_id {} has no member", comment.author_id)));
        }
        if let Some(parent) = comment.parent_id {
            if !t.comments.contains_key(&parent) {
                return Err(constraint(format!("comments.parent_id {parent} has no comment")));
            }
        }
        let id = CommentId(t.next_id());
        t.comments.insert(
            id,
            Comment {
                id,
                post_id: comment.post_id,
                author_id: comment.author_id,
                parent_id: comment.parent_id,
                content: comment.content.clone(),
                created_at: comment.created_at,
                updated_at: None,
            },
        );
        Ok(id)
    }

    async fn find_comment(&mut self, id: CommentId) -> DomainResult<Option<Comment>> {
        Ok(self.enter("find_comment")?.comments.get(&id).cloned())
    }

    async fn find_comments_by_post(&mut self, post: PostId) -> DomainResult<Vec<CommentView>> {
        let t = self.enter("find_comments_by_post")?;
        let mut views: Vec<CommentView> = t
            .comments
            .values()
            .filter(|c| c.post_id == post)
            .map(|c| CommentView {
                comment: c.clone(),
                nickname: t.nickname_of(c.author_id),
            })
            .collect();
        views.sort_by_key(|v| (v.comment.created_at, v.comment.id));
        Ok(views)
    }

    async fn update_comment(&mut self, comment: &Comment) -> DomainResult<()> {
        let t = self.enter("update_comment")?;
        if let Some(row) = t.comments.get_mut(&comment.id) {
            row.content = comment.content.clone();
            row.updated_at = comment.updated_at;
        }
        Ok(())
    }

    async fn delete_comment(&mut self, id: CommentId) -> DomainResult<u64> {
        let t = self.enter("delete_comment")?;
        if t.comments.values().any(|c| c.parent_id == Some(id)) {
            return Err(constraint(format!("comment {id} still has replies")));
        }
        Ok(t.comments.remove(&id).map_or(0, |_| 1))
    }

    async fn delete_comments_by_parent(&mut self, parent: CommentId) -> DomainResult<u64> {
        let t = self.enter("delete_comments_by_parent")?;
        Ok(t.remove_comments_where(|c| c.parent_id == Some(parent)))
    }

    async fn delete_comments_by_post(&mut self, post: PostId) -> DomainResult<u64> {
        let t = self.enter("delete_comments_by_post")?;
        Ok(t.remove_comments_where(|c| c.post_id == post))
    }

    async fn delete_comments_by_author(&mut self, author: MemberId) -> DomainResult<u64> {
        let t = self.enter("delete_comments_by_author")?;
        let authored: HashSet<CommentId> = t
            .comments
            .values()
            .filter(|c| c.author_id == author)
            .map(|c| c.id)
            .collect();
        Ok(t.remove_comments_where(|c| {
            authored.contains(&c.id) || c.parent_id.is_some_and(|p| authored.contains(&p))
        }))
    }

    async fn insert_file(&mut self, file: &NewFileAttachment) -> DomainResult<FileId> {
        let t = self.enter("insert_file")?;
        if !t.posts.contains_key(&file.post_id) {
            return Err(constraint(format!("files.post_id {} has no post", file.post_id)));
        }
        let id = FileId(t.next_id());
        t.files.insert(
            id,
            FileAttachment {
                id,
                post_id: file.post_id,
                file_name: file.file_name.clone(),
                file_path: file.file_path.clone(),
                uploaded_at: file.uploaded_at,
            },
        );
        Ok(id)
    }

    async fn find_file(&mut self, id: FileId) -> DomainResult<Option<FileAttachment>> {
        Ok(self.enter("find_file")?.files.get(&id).cloned())
    }

    async fn find_files_by_post(&mut self, post: PostId) -> DomainResult<Vec<FileAttachment>> {
        let t = self.enter("find_files_by_post")?;
        Ok(t.files.values().filter(|f| f.post_id == post).cloned().collect())
    }

    async fn find_files_by_owner(&mut self, owner: MemberId) -> DomainResult<Vec<FileAttachment>> {
        let t = self.enter("find_files_by_owner")?;
        let posts = t.owned_post_ids(owner);
        Ok(t.files.values().filter(|f| posts.contains(&f.post_id)).cloned().collect())
    }

    async fn delete_file(&mut self, id: FileId) -> DomainResult<u64> {
        let t = self.enter("delete_file")?;
        Ok(t.files.remove(&id).map_or(0, |_| 1))
    }

    async fn delete_files_by_post(&mut self, post: PostId) -> DomainResult<u64> {
        let t = self.enter("delete_files_by_post")?;
        Ok(t.remove_files_where(|f| f.post_id == post))
    }

    async fn delete_files_by_owner(&mut self, owner: MemberId) -> DomainResult<u64> {
        let t = self.enter("delete_files_by_owner")?;
        let posts = t.owned_post_ids(owner);
        Ok(t.remove_files_where(|f| posts.contains(&f.post_id)))
    }

    async fn commit(&mut self) -> DomainResult<()> {
        self.enter("commit")?;
        *self.guard = std::mem::take(&mut self.work);
        self.committed = true;
        Ok(())
    }
}
