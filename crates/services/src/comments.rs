//! Comments and their single level of replies.

use std::sync::Arc;

use chrono::Utc;
use domains::{
    BoardStore, BoardTx, Comment, CommentId, CommentView, DomainError, DomainResult, MemberId,
    NewComment, PostId, ValidationErrors, ValidationKind,
};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::deletion::abort;
use crate::required;

/// Every comment of a post in creation order.
///
/// Top-level comments and replies are exposed as two independent sequences;
/// placing a reply under its parent is up to the renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentThread {
    pub post_id: PostId,
    pub comments: Vec<CommentView>,
}

impl CommentThread {
    pub fn new(post_id: PostId, mut comments: Vec<CommentView>) -> Self {
        comments.sort_by_key(|c| (c.comment.created_at, c.comment.id));
        Self { post_id, comments }
    }

    pub fn top_level(&self) -> impl Iterator<Item = &CommentView> {
        self.comments.iter().filter(|c| !c.comment.is_reply())
    }

    pub fn replies(&self) -> impl Iterator<Item = &CommentView> {
        self.comments.iter().filter(|c| c.comment.is_reply())
    }

    pub fn replies_to(&self, parent: CommentId) -> impl Iterator<Item = &CommentView> {
        self.replies().filter(move |c| c.comment.parent_id == Some(parent))
    }

    pub fn len(&self) -> usize {
        self.comments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.comments.is_empty()
    }
}

#[derive(Clone)]
pub struct CommentService {
    store: Arc<dyn BoardStore>,
}

impl CommentService {
    pub fn new(store: Arc<dyn BoardStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, content))]
    pub async fn add_comment(&self, post_id: PostId, author_id: MemberId, content: &str) -> DomainResult<Comment> {
        blank_check(content)?;

        let mut tx = self.store.begin().await?;
        required(tx.find_post(post_id).await?, "post", post_id)?;
        let comment = insert(&mut *tx, post_id, author_id, None, content).await?;
        tx.commit().await?;

        info!(comment_id = %comment.id, %post_id, "comment added");
        Ok(comment)
    }

    /// Replies may only target a top-level comment of the same post.
    #[instrument(skip(self, content))]
    pub async fn add_reply(
        &self,
        parent_id: CommentId,
        post_id: PostId,
        author_id: MemberId,
        content: &str,
    ) -> DomainResult<Comment> {
        blank_check(content)?;

        let mut tx = self.store.begin().await?;
        let parent = required(tx.find_comment(parent_id).await?, "comment", parent_id)?;
        if parent.post_id != post_id || parent.is_reply() {
            let mut errors = ValidationErrors::new();
            errors.reject_field("parent_id", ValidationKind::InvalidParent);
            return Err(DomainError::Validation(errors));
        }
        let reply = insert(&mut *tx, post_id, author_id, Some(parent_id), content).await?;
        tx.commit().await?;

        info!(comment_id = %reply.id, %parent_id, %post_id, "reply added");
        Ok(reply)
    }

    #[instrument(skip(self, content))]
    pub async fn edit_comment(&self, comment_id: CommentId, content: &str) -> DomainResult<Comment> {
        blank_check(content)?;

        let mut tx = self.store.begin().await?;
        let mut comment = required(tx.find_comment(comment_id).await?, "comment", comment_id)?;
        comment.content = content.to_string();
        comment.updated_at = Some(Utc::now());
        tx.update_comment(&comment).await?;
        tx.commit().await?;

        info!(%comment_id, "comment edited");
        Ok(comment)
    }

    /// Deletes the comment together with its replies. Returns the number of
    /// rows removed.
    #[instrument(skip(self))]
    pub async fn delete_comment(&self, comment_id: CommentId) -> DomainResult<u64> {
        let result: DomainResult<u64> = async {
            let mut tx = self.store.begin().await?;
            required(tx.find_comment(comment_id).await?, "comment", comment_id)?;
            let replies = tx.delete_comments_by_parent(comment_id).await?;
            let removed = tx.delete_comment(comment_id).await?;
            tx.commit().await?;
            Ok(replies + removed)
        }
        .await;

        let removed = result.map_err(|e| abort("comment", comment_id, e))?;
        info!(%comment_id, removed, "comment deleted");
        Ok(removed)
    }

    #[instrument(skip(self))]
    pub async fn list_comments(&self, post_id: PostId) -> DomainResult<CommentThread> {
        let mut tx = self.store.begin().await?;
        let comments = tx.find_comments_by_post(post_id).await?;
        tx.commit().await?;

        debug!(%post_id, count = comments.len(), "comments listed");
        Ok(CommentThread::new(post_id, comments))
    }
}

fn blank_check(content: &str) -> DomainResult<()> {
    let mut errors = ValidationErrors::new();
    errors.require_text("content", content);
    errors.into_result()
}

async fn insert(
    tx: &mut dyn BoardTx,
    post_id: PostId,
    author_id: MemberId,
    parent_id: Option<CommentId>,
    content: &str,
) -> DomainResult<Comment> {
    let row = NewComment {
        post_id,
        author_id,
        parent_id,
        content: content.to_string(),
        created_at: Utc::now(),
    };
    let id = tx.insert_comment(&row).await?;
    Ok(Comment {
        id,
        post_id,
        author_id,
        parent_id,
        content: row.content,
        created_at: row.created_at,
        updated_at: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use domains::{DomainError, MockBoardStore, MockBoardTx, Post};
    use mockall::predicate::eq;
    use mockall::Sequence;

    fn boxed(tx: MockBoardTx) -> Box<dyn BoardTx> {
        Box::new(tx)
    }

    fn service(tx: MockBoardTx) -> CommentService {
        let mut store = MockBoardStore::new();
        store.expect_begin().return_once(move || Ok(boxed(tx)));
        CommentService::new(Arc::new(store))
    }

    fn comment(id: i64, post: i64, parent: Option<i64>) -> Comment {
        Comment {
            id: CommentId(id),
            post_id: PostId(post),
            author_id: MemberId(1),
            parent_id: parent.map(CommentId),
            content: format!("comment {id}"),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    fn view(c: Comment) -> CommentView {
        CommentView {
            comment: c,
            nickname: "crab".into(),
        }
    }

    #[tokio::test]
    async fn cross_post_reply_is_an_invalid_parent() {
        let mut tx = MockBoardTx::new();
        tx.expect_find_comment()
            .with(eq(CommentId(5)))
            .returning(|_| Ok(Some(comment(5, 1, None))));
        tx.expect_insert_comment().never();
        tx.expect_commit().never();

        let err = service(tx)
            .add_reply(CommentId(5), PostId(2), MemberId(3), "hi")
            .await
            .unwrap_err();

        let errors = err.validation_errors().unwrap();
        assert!(errors.has(ValidationKind::InvalidParent));
        assert_eq!(errors.for_field("parent_id").count(), 1);
    }

    #[tokio::test]
    async fn reply_to_a_reply_is_rejected() {
        let mut tx = MockBoardTx::new();
        tx.expect_find_comment().returning(|_| Ok(Some(comment(6, 1, Some(5)))));
        tx.expect_insert_comment().never();

        let err = service(tx)
            .add_reply(CommentId(6), PostId(1), MemberId(3), "hi")
            .await
            .unwrap_err();
        assert!(err.validation_errors().is_some_and(|e| e.has(ValidationKind::InvalidParent)));
    }

    #[tokio::test]
    async fn reply_records_its_parent() {
        let mut tx = MockBoardTx::new();
        tx.expect_find_comment().returning(|_| Ok(Some(comment(5, 1, None))));
        tx.expect_insert_comment()
            .withf(|c| c.parent_id == Some(CommentId(5)) && c.post_id == PostId(1))
            .times(1)
            .returning(|_| Ok(CommentId(9)));
        tx.expect_commit().times(1).returning(|| Ok(()));

        let reply = service(tx)
            .add_reply(CommentId(5), PostId(1), MemberId(3), "agreed")
            .await
            .unwrap();
        assert_eq!(reply.id, CommentId(9));
        assert!(reply.is_reply());
    }

    #[tokio::test]
    async fn blank_content_never_reaches_the_store() {
        let store = MockBoardStore::new();
        let service = CommentService::new(Arc::new(store));

        let err = service.add_comment(PostId(1), MemberId(1), "  ").await.unwrap_err();
        assert!(err.validation_errors().is_some_and(|e| e.has(ValidationKind::Blank)));
    }

    #[tokio::test]
    async fn comment_on_missing_post_is_not_found() {
        let mut tx = MockBoardTx::new();
        tx.expect_find_post().returning(|_| Ok(None::<Post>));
        tx.expect_insert_comment().never();

        let err = service(tx).add_comment(PostId(4), MemberId(1), "hello").await.unwrap_err();
        assert!(matches!(err, DomainError::NotFound { entity: "post", .. }));
    }

    #[tokio::test]
    async fn delete_removes_replies_before_the_parent() {
        let id = CommentId(5);
        let mut seq = Sequence::new();
        let mut tx = MockBoardTx::new();
        tx.expect_find_comment().times(1).in_sequence(&mut seq).returning(|_| Ok(Some(comment(5, 1, None))));
        tx.expect_delete_comments_by_parent().with(eq(id)).times(1).in_sequence(&mut seq).returning(|_| Ok(2));
        tx.expect_delete_comment().with(eq(id)).times(1).in_sequence(&mut seq).returning(|_| Ok(1));
        tx.expect_commit().times(1).in_sequence(&mut seq).returning(|| Ok(()));

        assert_eq!(service(tx).delete_comment(id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn failed_delete_is_rolled_back_and_retryable() {
        let mut tx = MockBoardTx::new();
        tx.expect_find_comment().returning(|_| Ok(Some(comment(5, 1, None))));
        tx.expect_delete_comments_by_parent().returning(|_| Ok(2));
        tx.expect_delete_comment()
            .returning(|_| Err(DomainError::data_access(std::io::Error::other("locked"))));
        tx.expect_commit().never();

        let err = service(tx).delete_comment(CommentId(5)).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn thread_splits_top_level_and_replies_in_creation_order() {
        let now = Utc::now();
        let mut first = comment(1, 1, None);
        first.created_at = now;
        let mut reply = comment(3, 1, Some(1));
        reply.created_at = now + chrono::Duration::seconds(2);
        let mut second = comment(2, 1, None);
        second.created_at = now + chrono::Duration::seconds(1);

        let thread = CommentThread::new(PostId(1), vec![view(reply), view(second), view(first)]);

        let top: Vec<_> = thread.top_level().map(|c| c.comment.id.get()).collect();
        let replies: Vec<_> = thread.replies().map(|c| c.comment.id.get()).collect();
        assert_eq!(top, vec![1, 2]);
        assert_eq!(replies, vec![3]);
        assert_eq!(thread.replies_to(CommentId(1)).count(), 1);
        assert_eq!(thread.replies_to(CommentId(2)).count(), 0);
    }
}
