use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use domains::{BoardStore, DomainError, DomainResult, FileStorage, PostId, ValidationKind};
use integration_tests::{names, uploads, TestBoard};
use services::{PostEdit, PostForm, PostService};
use storage_adapters::InMemoryFileStorage;

/// Records whether the board store could start a transaction while bytes were
/// being written.
struct StoreWatchingMedia {
    store: Arc<dyn BoardStore>,
    inner: InMemoryFileStorage,
    store_was_busy: AtomicBool,
}

#[async_trait]
impl FileStorage for StoreWatchingMedia {
    async fn store(&self, data: Bytes, suggested_name: &str) -> DomainResult<String> {
        let free = tokio::time::timeout(Duration::from_millis(200), self.store.begin()).await;
        if !matches!(free, Ok(Ok(_))) {
            self.store_was_busy.store(true, Ordering::SeqCst);
        }
        self.inner.store(data, suggested_name).await
    }

    async fn delete(&self, stored_path: &str) -> DomainResult<()> {
        self.inner.delete(stored_path).await
    }

    async fn retrieve(&self, stored_path: &str) -> DomainResult<Bytes> {
        self.inner.retrieve(stored_path).await
    }
}

fn edit(title: &str, content: &str, retained: &[&str], new: &[&str]) -> PostEdit {
    PostEdit {
        title: title.into(),
        content: content.into(),
        retained_file_names: names(retained),
        uploads: uploads(new),
    }
}

#[tokio::test]
async fn created_post_shows_up_with_its_files() {
    let board = TestBoard::new();
    let alice = board.member("alice").await;
    let post = board.post_with_files(alice.id, "hello", &["a.txt"]).await;

    let detail = board.posts.get_post(post.id).await.unwrap();
    assert_eq!(detail.post.title, "hello");
    assert_eq!(detail.nickname, "alice");
    assert_eq!(detail.file_names, names(&["a.txt"]));
    assert_eq!(detail.post.view_count, 0);
}

#[tokio::test]
async fn blank_title_and_content_are_both_reported() {
    let board = TestBoard::new();
    let alice = board.member("alice").await;

    let err = board
        .posts
        .create_post(alice.id, PostForm::default())
        .await
        .unwrap_err();

    let errors = err.validation_errors().unwrap();
    assert_eq!(errors.for_field("title").count(), 1);
    assert_eq!(errors.for_field("content").count(), 1);
    assert_eq!(board.store.row_counts().await.posts, 0);
}

#[tokio::test]
async fn unchanged_edit_is_rejected_without_writing() {
    let board = TestBoard::new();
    let alice = board.member("alice").await;
    let post = board.post_with_files(alice.id, "t", &["a.txt", "b.txt"]).await;

    let err = board
        .posts
        .edit_post(post.id, edit("t", "content of t", &["b.txt", "a.txt"], &[]))
        .await
        .unwrap_err();

    assert!(err.validation_errors().is_some_and(|e| e.has(ValidationKind::NoChange)));
    assert!(board.posts.get_post(post.id).await.unwrap().post.updated_at.is_none());
}

#[tokio::test]
async fn duplicate_upload_rejects_the_whole_edit() {
    let board = TestBoard::new();
    let alice = board.member("alice").await;
    let post = board.post_with_files(alice.id, "t", &["a.txt"]).await;

    let err = board
        .posts
        .edit_post(post.id, edit("new title", "new content", &["a.txt"], &["b.txt", "a.txt"]))
        .await
        .unwrap_err();

    let errors = err.validation_errors().unwrap();
    assert!(errors.has(ValidationKind::DuplicateFile));
    let detail = board.posts.get_post(post.id).await.unwrap();
    assert_eq!(detail.post.title, "t");
    assert_eq!(detail.file_names, names(&["a.txt"]));
    assert_eq!(board.media.len(), 1);
}

#[tokio::test]
async fn edit_updates_text_and_reconciles_files_together() {
    let board = TestBoard::new();
    let alice = board.member("alice").await;
    let post = board.post_with_files(alice.id, "t", &["a.txt", "b.txt"]).await;

    let edited = board
        .posts
        .edit_post(post.id, edit("t", "rewritten", &["a.txt"], &["c.txt"]))
        .await
        .unwrap();

    assert_eq!(edited.files.removed.len(), 1);
    assert_eq!(edited.files.added.len(), 1);

    let mut detail = board.posts.get_post(post.id).await.unwrap();
    detail.file_names.sort();
    assert_eq!(detail.post.content, "rewritten");
    assert!(detail.post.updated_at.is_some());
    assert_eq!(detail.file_names, names(&["a.txt", "c.txt"]));
}

#[tokio::test]
async fn failed_edit_keeps_the_old_post() {
    let board = TestBoard::new();
    let alice = board.member("alice").await;
    let post = board.post_with_files(alice.id, "t", &["a.txt"]).await;

    board.store.fail_on("update_post");
    let result = board
        .posts
        .edit_post(post.id, edit("new", "new", &[], &["b.txt"]))
        .await;
    board.store.clear_faults();

    assert!(matches!(result, Err(DomainError::DataAccess(_))));
    let detail = board.posts.get_post(post.id).await.unwrap();
    assert_eq!(detail.post.title, "t");
    assert_eq!(detail.file_names, names(&["a.txt"]));
    assert_eq!(board.media.len(), 1);
}

#[tokio::test]
async fn every_view_is_counted() {
    let board = TestBoard::new();
    let alice = board.member("alice").await;
    let post = board.post(alice.id, "t").await;

    for _ in 0..3 {
        board.posts.record_view(post.id).await.unwrap();
    }

    assert_eq!(board.posts.get_post(post.id).await.unwrap().post.view_count, 3);
    assert!(matches!(
        board.posts.record_view(PostId(404)).await,
        Err(DomainError::NotFound { .. })
    ));
}

#[tokio::test]
async fn landing_and_return_pages_follow_the_listing() {
    let board = TestBoard::new();
    let alice = board.member("alice").await;
    let bob = board.member("bob").await;
    for i in 0..11 {
        board.post(alice.id, &format!("a{i}")).await;
    }
    let last_of_bob = board.post(bob.id, "b").await;

    assert_eq!(board.posts.landing_page(None, 10).await.unwrap(), 2);
    assert_eq!(board.posts.landing_page(Some(bob.id), 10).await.unwrap(), 1);

    // 12 posts, viewing page 2 with two rows; removing one keeps page 2
    board.deletion.delete_post(last_of_bob.id).await.unwrap();
    assert_eq!(board.posts.page_after_removal(None, 2, 10).await.unwrap(), 2);

    // bob's listing had one row on page 1
    assert_eq!(board.posts.page_after_removal(Some(bob.id), 1, 10).await.unwrap(), 1);
}

#[tokio::test]
async fn uploads_are_written_without_holding_a_transaction() {
    let board = TestBoard::new();
    let alice = board.member("alice").await;
    let post = board.post_with_files(alice.id, "t", &["a.txt"]).await;

    let store: Arc<dyn BoardStore> = board.store.clone();
    let media = Arc::new(StoreWatchingMedia {
        store: store.clone(),
        inner: InMemoryFileStorage::new(),
        store_was_busy: AtomicBool::new(false),
    });
    let posts = PostService::new(store, media.clone());

    let edited = posts
        .edit_post(post.id, edit("t", "content of t", &["a.txt"], &["b.txt"]))
        .await
        .unwrap();

    assert!(!media.store_was_busy.load(Ordering::SeqCst));
    assert_eq!(edited.files.added.len(), 1);
    assert_eq!(media.inner.len(), 1);
}
