use domains::{CommentId, DomainError, PostId, ValidationKind};
use integration_tests::TestBoard;

#[tokio::test]
async fn deleting_a_comment_removes_exactly_its_replies() {
    let board = TestBoard::new();
    let alice = board.member("alice").await;
    let bob = board.member("bob").await;
    let post = board.post(alice.id, "p").await;

    let parent = board.comment(post.id, alice.id, "parent").await;
    board.reply(&parent, bob.id, "r1").await;
    board.reply(&parent, alice.id, "r2").await;
    let sibling = board.comment(post.id, bob.id, "sibling").await;
    let sibling_reply = board.reply(&sibling, alice.id, "r3").await;

    let removed = board.comments.delete_comment(parent.id).await.unwrap();
    assert_eq!(removed, 3);

    let thread = board.comments.list_comments(post.id).await.unwrap();
    let ids: Vec<CommentId> = thread.comments.iter().map(|c| c.comment.id).collect();
    assert_eq!(ids, vec![sibling.id, sibling_reply.id]);
}

#[tokio::test]
async fn replies_cannot_cross_posts() {
    let board = TestBoard::new();
    let alice = board.member("alice").await;
    let first = board.post(alice.id, "first").await;
    let second = board.post(alice.id, "second").await;
    let parent = board.comment(first.id, alice.id, "on first").await;

    let err = board
        .comments
        .add_reply(parent.id, second.id, alice.id, "sneaky")
        .await
        .unwrap_err();

    assert!(err.validation_errors().is_some_and(|e| e.has(ValidationKind::InvalidParent)));
    assert!(board.comments.list_comments(second.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn replies_are_one_level_deep() {
    let board = TestBoard::new();
    let alice = board.member("alice").await;
    let post = board.post(alice.id, "p").await;
    let parent = board.comment(post.id, alice.id, "top").await;
    let reply = board.reply(&parent, alice.id, "reply").await;

    let err = board
        .comments
        .add_reply(reply.id, post.id, alice.id, "nested")
        .await
        .unwrap_err();
    assert!(err.validation_errors().is_some_and(|e| e.has(ValidationKind::InvalidParent)));
}

#[tokio::test]
async fn thread_lists_top_level_and_replies_separately() {
    let board = TestBoard::new();
    let alice = board.member("alice").await;
    let bob = board.member("bob").await;
    let post = board.post(alice.id, "p").await;

    let c1 = board.comment(post.id, alice.id, "c1").await;
    let r1 = board.reply(&c1, bob.id, "r1").await;
    let c2 = board.comment(post.id, bob.id, "c2").await;

    let thread = board.comments.list_comments(post.id).await.unwrap();

    let top: Vec<_> = thread.top_level().map(|c| c.comment.id).collect();
    let replies: Vec<_> = thread.replies().map(|c| (c.comment.id, c.nickname.as_str())).collect();
    assert_eq!(top, vec![c1.id, c2.id]);
    assert_eq!(replies, vec![(r1.id, "bob")]);
}

#[tokio::test]
async fn editing_stamps_updated_at() {
    let board = TestBoard::new();
    let alice = board.member("alice").await;
    let post = board.post(alice.id, "p").await;
    let comment = board.comment(post.id, alice.id, "typo").await;

    let edited = board.comments.edit_comment(comment.id, "fixed").await.unwrap();
    assert_eq!(edited.content, "fixed");
    assert!(edited.updated_at.is_some());

    let thread = board.comments.list_comments(post.id).await.unwrap();
    assert_eq!(thread.comments[0].comment.content, "fixed");
}

#[tokio::test]
async fn missing_targets_are_not_found() {
    let board = TestBoard::new();
    let alice = board.member("alice").await;

    let err = board.comments.add_comment(PostId(99), alice.id, "hi").await.unwrap_err();
    assert!(matches!(err, DomainError::NotFound { entity: "post", .. }));

    let err = board.comments.delete_comment(CommentId(99)).await.unwrap_err();
    assert!(matches!(err, DomainError::NotFound { entity: "comment", .. }));
}
