//! Shared harness for the scenario tests: a board wired to the in-memory
//! adapters, plus fixture helpers that go through the real services.

use std::sync::Arc;

use domains::{BoardStore, Comment, FileStorage, Member, MemberId, Post, PostId, Upload};
use services::{
    CommentService, DeletionService, FileService, MemberForm, MemberService, PostForm, PostService,
    SearchService,
};
use storage_adapters::{InMemoryBoardStore, InMemoryFileStorage};

pub struct TestBoard {
    pub store: Arc<InMemoryBoardStore>,
    pub media: Arc<InMemoryFileStorage>,
    pub search: SearchService,
    pub deletion: DeletionService,
    pub comments: CommentService,
    pub files: FileService,
    pub posts: PostService,
    pub members: MemberService,
}

impl TestBoard {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryBoardStore::new());
        let media = Arc::new(InMemoryFileStorage::new());
        let s: Arc<dyn BoardStore> = store.clone();
        let f: Arc<dyn FileStorage> = media.clone();

        Self {
            search: SearchService::new(s.clone()),
            deletion: DeletionService::new(s.clone(), f.clone()),
            comments: CommentService::new(s.clone()),
            files: FileService::new(s.clone(), f.clone()),
            posts: PostService::new(s.clone(), f),
            members: MemberService::new(s),
            store,
            media,
        }
    }

    /// Registers a member whose login id, username and nickname all derive
    /// from `name`.
    pub async fn member(&self, name: &str) -> Member {
        self.members
            .register(MemberForm {
                login_id: format!("{name}-login"),
                password: "hashed".into(),
                username: format!("{name}-user"),
                nickname: name.into(),
            })
            .await
            .expect("register fixture member")
    }

    pub async fn post(&self, owner: MemberId, title: &str) -> Post {
        self.post_with_files(owner, title, &[]).await
    }

    pub async fn post_with_files(&self, owner: MemberId, title: &str, names: &[&str]) -> Post {
        self.posts
            .create_post(
                owner,
                PostForm {
                    title: title.into(),
                    content: format!("content of {title}"),
                    uploads: uploads(names),
                },
            )
            .await
            .expect("create fixture post")
    }

    pub async fn comment(&self, post: PostId, author: MemberId, content: &str) -> Comment {
        self.comments
            .add_comment(post, author, content)
            .await
            .expect("add fixture comment")
    }

    pub async fn reply(&self, parent: &Comment, author: MemberId, content: &str) -> Comment {
        self.comments
            .add_reply(parent.id, parent.post_id, author, content)
            .await
            .expect("add fixture reply")
    }
}

impl Default for TestBoard {
    fn default() -> Self {
        Self::new()
    }
}

/// One upload per name, with the name as content.
pub fn uploads(names: &[&str]) -> Vec<Upload> {
    names.iter().map(|n| Upload::new(*n, n.to_string())).collect()
}

pub fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}
