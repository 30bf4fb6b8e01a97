//! # agora-seed
//!
//! Fills an empty board with a few members, posts, comments and an
//! attachment, using the configured SQLite database and media directory.

use std::sync::Arc;

use anyhow::Context;
use configs::AppConfig;
use domains::{BoardStore, FileStorage, MemberFilter, PageRequest, PostFilter, Role, Upload};
use secrecy::ExposeSecret;
use services::{CommentService, MemberForm, MemberService, PostForm, PostService, SearchService};
use storage_adapters::{LocalFileStorage, SqliteBoardStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("loading configuration")?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.filter));
    if config.log.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let store: Arc<dyn BoardStore> = Arc::new(
        SqliteBoardStore::connect(config.database.url.expose_secret(), config.database.max_connections)
            .await
            .context("opening database")?,
    );
    let media: Arc<dyn FileStorage> = Arc::new(LocalFileStorage::new(config.media.root.clone()));

    let search = SearchService::new(store.clone());
    let members = MemberService::new(store.clone());
    let posts = PostService::new(store.clone(), media.clone());
    let comments = CommentService::new(store.clone());

    let page = PageRequest::new(1, config.paging.page_size);
    let existing = search.search_members(&MemberFilter::default(), &page).await?;
    if existing.total_count > 0 {
        info!(members = existing.total_count, "board already has data, nothing to seed");
        return Ok(());
    }

    let admin = members
        .register(MemberForm {
            login_id: "admin".into(),
            password: "change-me".into(),
            username: "Administrator".into(),
            nickname: "admin".into(),
        })
        .await?;
    members.change_role(admin.id, Role::Admin).await?;

    let ferris = members
        .register(MemberForm {
            login_id: "ferris".into(),
            password: "change-me".into(),
            username: "Ferris".into(),
            nickname: "crab".into(),
        })
        .await?;

    let welcome = posts
        .create_post(
            admin.id,
            PostForm {
                title: "Welcome".into(),
                content: "Read the board rules before posting.".into(),
                uploads: vec![Upload::new("rules.txt", "Be kind. Stay on topic.")],
            },
        )
        .await?;

    for i in 1..=12 {
        posts
            .create_post(
                ferris.id,
                PostForm {
                    title: format!("Notes #{i}"),
                    content: format!("Entry {i} of the crab's notebook."),
                    uploads: Vec::new(),
                },
            )
            .await?;
    }

    let question = comments.add_comment(welcome.id, ferris.id, "Where are the rules?").await?;
    comments.add_reply(question.id, welcome.id, admin.id, "Attached to this post.").await?;

    let first = search.search_posts(&PostFilter::default(), &page).await?;
    info!(
        total = first.total_count,
        pages = first.window.total_pages,
        begin = first.window.begin_page,
        end = first.window.end_page,
        show_next = first.window.show_next,
        "seeded board"
    );
    Ok(())
}
