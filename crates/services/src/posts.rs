//! Post workflows: create with attachments, detail view, validated edit,
//! view counting, and the page arithmetic around listings.

use std::sync::Arc;

use chrono::Utc;
use domains::{
    BoardStore, DomainError, DomainResult, FileStorage, MemberId, NewPost, Post, PostDetail,
    PostFilter, PostId, Upload, ValidationErrors,
};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::files::{apply_reconciliation, attach_uploads, FileService, PostEdit, Reconciliation};
use crate::required;

/// The create form for a new post.
#[derive(Debug, Clone, Default)]
pub struct PostForm {
    pub title: String,
    pub content: String,
    pub uploads: Vec<Upload>,
}

/// A post after a successful edit, with what happened to its attachments.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EditedPost {
    pub post: Post,
    pub files: Reconciliation,
}

#[derive(Clone)]
pub struct PostService {
    store: Arc<dyn BoardStore>,
    files: FileService,
}

impl PostService {
    pub fn new(store: Arc<dyn BoardStore>, files: Arc<dyn FileStorage>) -> Self {
        Self {
            files: FileService::new(store.clone(), files),
            store,
        }
    }

    #[instrument(skip(self, form), fields(uploads = form.uploads.len()))]
    pub async fn create_post(&self, owner_id: MemberId, form: PostForm) -> DomainResult<Post> {
        let mut errors = ValidationErrors::new();
        errors.require_text("title", &form.title);
        errors.require_text("content", &form.content);
        errors.into_result()?;

        let stored = self.files.store_uploads(&form.uploads).await?;

        let result: DomainResult<(Post, usize)> = async {
            let mut tx = self.store.begin().await?;
            required(tx.find_member(owner_id).await?, "member", owner_id)?;

            let row = NewPost {
                owner_id,
                title: form.title,
                content: form.content,
                created_at: Utc::now(),
            };
            let id = tx.insert_post(&row).await?;
            let attached = attach_uploads(&mut *tx, id, &stored).await?;
            tx.commit().await?;

            let post = Post {
                id,
                owner_id,
                title: row.title,
                content: row.content,
                created_at: row.created_at,
                updated_at: None,
                view_count: 0,
            };
            Ok((post, attached.len()))
        }
        .await;

        match result {
            Ok((post, attached)) => {
                info!(post_id = %post.id, %owner_id, attached, "post created");
                Ok(post)
            }
            Err(e) => {
                self.files.purge(stored.iter().map(|s| s.file_path.as_str())).await;
                Err(e)
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn get_post(&self, post_id: PostId) -> DomainResult<PostDetail> {
        let mut tx = self.store.begin().await?;
        let post = required(tx.find_post(post_id).await?, "post", post_id)?;
        let owner = required(tx.find_member(post.owner_id).await?, "member", post.owner_id)?;
        let file_names = tx
            .find_files_by_post(post_id)
            .await?
            .into_iter()
            .map(|f| f.file_name)
            .collect();
        tx.commit().await?;

        Ok(PostDetail {
            post,
            nickname: owner.nickname,
            file_names,
        })
    }

    /// Validates the edit against the stored post, writes new bytes with no
    /// transaction open, then reconciles attachments and updates the post in
    /// a second transaction.
    ///
    /// A no-op edit and a duplicate upload are both reported when both apply.
    #[instrument(skip(self, edit), fields(uploads = edit.uploads.len()))]
    pub async fn edit_post(&self, post_id: PostId, edit: PostEdit) -> DomainResult<EditedPost> {
        let retained = edit.retained();
        {
            let mut tx = self.store.begin().await?;
            let post = required(tx.find_post(post_id).await?, "post", post_id)?;
            let persisted: Vec<String> = tx
                .find_files_by_post(post_id)
                .await?
                .into_iter()
                .map(|f| f.file_name)
                .collect();
            tx.commit().await?;

            let mut errors = FileService::check_for_no_op_edit(&post, &persisted, &edit);
            errors.merge(FileService::check_duplicate_upload(&retained, &edit.uploads));
            errors.require_text("title", &edit.title);
            errors.require_text("content", &edit.content);
            errors.into_result()?;
        }

        let stored = self.files.store_uploads(&edit.uploads).await?;

        let result: DomainResult<(Post, Reconciliation)> = async {
            let mut tx = self.store.begin().await?;
            let mut post = required(tx.find_post(post_id).await?, "post", post_id)?;
            let outcome = apply_reconciliation(&mut *tx, post_id, &retained, &stored).await?;
            post.title = edit.title;
            post.content = edit.content;
            post.updated_at = Some(Utc::now());
            tx.update_post(&post).await?;
            tx.commit().await?;
            Ok((post, outcome))
        }
        .await;

        let (post, outcome) = match result {
            Ok(edited) => edited,
            Err(e) => {
                self.files.purge(stored.iter().map(|s| s.file_path.as_str())).await;
                return Err(e);
            }
        };
        let files = self.files.settle(Ok(outcome), &stored).await?;
        info!(%post_id, "post edited");
        Ok(EditedPost { post, files })
    }

    /// Counts one view. Suppressing repeated views of the same reader is left
    /// to the caller.
    #[instrument(skip(self))]
    pub async fn record_view(&self, post_id: PostId) -> DomainResult<()> {
        let mut tx = self.store.begin().await?;
        if tx.increment_view_count(post_id).await? == 0 {
            return Err(DomainError::not_found("post", post_id));
        }
        tx.commit().await?;
        debug!(%post_id, "view recorded");
        Ok(())
    }

    /// Page of the global (or one member's) listing where a just created post
    /// shows up.
    pub async fn landing_page(&self, owner: Option<MemberId>, page_size: u64) -> DomainResult<u64> {
        let total = self.count(owner).await?;
        Ok(domains::landing_page(total, page_size))
    }

    /// Page to return to after a post was deleted while `page` was shown.
    pub async fn page_after_removal(&self, owner: Option<MemberId>, page: u64, page_size: u64) -> DomainResult<u64> {
        let remaining = self.count(owner).await?;
        Ok(domains::page_after_removal(remaining + 1, page, page_size))
    }

    async fn count(&self, owner: Option<MemberId>) -> DomainResult<u64> {
        let filter = PostFilter {
            owner,
            ..PostFilter::default()
        };
        let mut tx = self.store.begin().await?;
        let total = tx.count_posts(&filter).await?;
        tx.commit().await?;
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domains::{
        BoardTx, FileAttachment, FileId, Member, MockBoardStore, MockBoardTx, MockFileStorage, Role,
        ValidationKind,
    };
    use mockall::predicate::eq;
    use mockall::Sequence;

    fn boxed(tx: MockBoardTx) -> Box<dyn BoardTx> {
        Box::new(tx)
    }

    fn service(tx: MockBoardTx, files: MockFileStorage) -> PostService {
        service_with(vec![tx], files)
    }

    /// Hands out the transactions in order, one per `begin`.
    fn service_with(txs: Vec<MockBoardTx>, files: MockFileStorage) -> PostService {
        let mut store = MockBoardStore::new();
        let expected = txs.len();
        let mut txs = txs.into_iter();
        store
            .expect_begin()
            .times(expected)
            .returning(move || Ok(boxed(txs.next().expect("unexpected begin"))));
        PostService::new(Arc::new(store), Arc::new(files))
    }

    fn post() -> Post {
        Post {
            id: PostId(1),
            owner_id: MemberId(1),
            title: "title".into(),
            content: "content".into(),
            created_at: Utc::now(),
            updated_at: None,
            view_count: 0,
        }
    }

    fn owner() -> Member {
        Member {
            id: MemberId(1),
            login_id: "ferris".into(),
            password: "pw".into(),
            username: "Ferris".into(),
            nickname: "crab".into(),
            role: Role::User,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    fn attachment(id: i64, name: &str) -> FileAttachment {
        FileAttachment {
            id: FileId(id),
            post_id: PostId(1),
            file_name: name.into(),
            file_path: format!("stored/{name}"),
            uploaded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn no_op_and_duplicate_are_reported_together() {
        let mut tx = MockBoardTx::new();
        tx.expect_find_post().returning(|_| Ok(Some(post())));
        tx.expect_find_files_by_post()
            .returning(|_| Ok(vec![attachment(1, "a.txt")]));
        tx.expect_commit().times(1).returning(|| Ok(()));
        tx.expect_update_post().never();
        let mut files = MockFileStorage::new();
        files.expect_store().never();

        let edit = PostEdit {
            title: "title".into(),
            content: "content".into(),
            retained_file_names: vec!["a.txt".into()],
            uploads: vec![Upload::new("a.txt", "new bytes")],
        };
        let err = service(tx, files).edit_post(PostId(1), edit).await.unwrap_err();

        let errors = err.validation_errors().unwrap();
        assert!(errors.has(ValidationKind::DuplicateFile));
        assert!(!errors.has(ValidationKind::NoChange), "a new upload is a change");
    }

    #[tokio::test]
    async fn edit_drops_unretained_files_and_purges_them_after_commit() {
        let mut read = MockBoardTx::new();
        read.expect_find_post().times(1).returning(|_| Ok(Some(post())));
        read.expect_find_files_by_post()
            .times(1)
            .returning(|_| Ok(vec![attachment(1, "a.txt"), attachment(2, "b.txt")]));
        read.expect_update_post().never();
        read.expect_commit().times(1).returning(|| Ok(()));

        let mut write = MockBoardTx::new();
        write.expect_find_post().times(1).returning(|_| Ok(Some(post())));
        write
            .expect_find_files_by_post()
            .returning(|_| Ok(vec![attachment(1, "a.txt"), attachment(2, "b.txt")]));
        write.expect_delete_file().with(eq(FileId(2))).times(1).returning(|_| Ok(1));
        write
            .expect_update_post()
            .withf(|p| p.title == "new title" && p.updated_at.is_some())
            .times(1)
            .returning(|_| Ok(()));
        write.expect_commit().times(1).returning(|| Ok(()));

        let mut files = MockFileStorage::new();
        files
            .expect_delete()
            .withf(|path| path == "stored/b.txt")
            .times(1)
            .returning(|_| Ok(()));

        let edit = PostEdit {
            title: "new title".into(),
            content: "content".into(),
            retained_file_names: vec!["a.txt".into()],
            uploads: vec![],
        };
        let edited = service_with(vec![read, write], files)
            .edit_post(PostId(1), edit)
            .await
            .unwrap();

        assert_eq!(edited.files.removed.len(), 1);
        assert_eq!(edited.post.title, "new title");
    }

    #[tokio::test]
    async fn uploads_are_stored_between_the_read_and_the_write_transaction() {
        let mut seq = Sequence::new();
        let mut read = MockBoardTx::new();
        read.expect_find_post().returning(|_| Ok(Some(post())));
        read.expect_find_files_by_post().returning(|_| Ok(vec![]));
        read.expect_commit().times(1).in_sequence(&mut seq).returning(|| Ok(()));

        let mut files = MockFileStorage::new();
        files
            .expect_store()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok("aa/bb/new.txt".into()));
        files
            .expect_delete()
            .withf(|path| path == "aa/bb/new.txt")
            .times(1)
            .returning(|_| Ok(()));

        // The post vanished while the bytes were written.
        let mut write = MockBoardTx::new();
        write.expect_find_post().times(1).in_sequence(&mut seq).returning(|_| Ok(None));
        write.expect_update_post().never();
        write.expect_commit().never();

        let edit = PostEdit {
            title: "title".into(),
            content: "content".into(),
            retained_file_names: vec![],
            uploads: vec![Upload::new("new.txt", "bytes")],
        };
        let err = service_with(vec![read, write], files)
            .edit_post(PostId(1), edit)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound { entity: "post", .. }));
    }

    #[tokio::test]
    async fn failed_create_removes_stored_bytes() {
        let mut tx = MockBoardTx::new();
        tx.expect_find_member().returning(|_| Ok(Some(owner())));
        tx.expect_insert_post().returning(|_| Ok(PostId(1)));
        tx.expect_insert_file()
            .returning(|_| Err(DomainError::data_access(std::io::Error::other("full"))));
        tx.expect_commit().never();

        let mut files = MockFileStorage::new();
        files.expect_store().times(1).returning(|_, _| Ok("aa/bb/x".into()));
        files
            .expect_delete()
            .withf(|path| path == "aa/bb/x")
            .times(1)
            .returning(|_| Ok(()));

        let form = PostForm {
            title: "hello".into(),
            content: "world".into(),
            uploads: vec![Upload::new("x.txt", "data")],
        };
        let err = service(tx, files).create_post(MemberId(1), form).await.unwrap_err();
        assert!(matches!(err, DomainError::DataAccess(_)));
    }

    #[tokio::test]
    async fn view_of_missing_post_is_not_found() {
        let mut tx = MockBoardTx::new();
        tx.expect_increment_view_count().returning(|_| Ok(0));
        tx.expect_commit().never();

        let err = service(tx, MockFileStorage::new()).record_view(PostId(9)).await.unwrap_err();
        assert!(matches!(err, DomainError::NotFound { entity: "post", .. }));
    }

    #[tokio::test]
    async fn detail_carries_owner_nickname_and_file_names() {
        let mut tx = MockBoardTx::new();
        tx.expect_find_post().returning(|_| Ok(Some(post())));
        tx.expect_find_member().returning(|_| Ok(Some(owner())));
        tx.expect_find_files_by_post()
            .returning(|_| Ok(vec![attachment(1, "a.txt")]));
        tx.expect_commit().returning(|| Ok(()));

        let detail = service(tx, MockFileStorage::new()).get_post(PostId(1)).await.unwrap();
        assert_eq!(detail.nickname, "crab");
        assert_eq!(detail.file_names, vec!["a.txt".to_string()]);
    }
}
