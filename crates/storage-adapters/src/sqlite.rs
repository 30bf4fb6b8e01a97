//! # SQLite board store
//!
//! Maps the relational schema in `migrations/` onto the domain models.
//! Every port call runs on the connection owned by one `sqlx::Transaction`;
//! dropping an uncommitted transaction rolls it back.
//!
//! Listings and counts render their WHERE clause through the same builder
//! function, so both see exactly the same rows for a given filter.

use std::str::FromStr;

use async_trait::async_trait;
use domains::{
    BoardStore, BoardTx, Comment, CommentId, CommentView, DomainError, DomainResult, FileAttachment,
    FileId, Member, MemberFilter, MemberId, MemberSearchOption, MemberSummary, NewComment,
    NewFileAttachment, NewMember, NewPost, Post, PostFilter, PostId, PostSearchOption, PostSummary,
    Role,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, Transaction};
use tracing::info;

fn db(err: sqlx::Error) -> DomainError {
    DomainError::data_access(err)
}

pub struct SqliteBoardStore {
    pool: SqlitePool,
}

impl SqliteBoardStore {
    /// Opens a pool, enables foreign keys on every connection and applies
    /// pending migrations.
    ///
    /// With `sqlite::memory:` each connection is a separate database, so
    /// tests pass `max_connections = 1`.
    pub async fn connect(url: &str, max_connections: u32) -> DomainResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(db)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(db)?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> DomainResult<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DomainError::data_access)?;
        info!("sqlite schema is up to date");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl BoardStore for SqliteBoardStore {
    async fn begin(&self) -> DomainResult<Box<dyn BoardTx>> {
        let tx = self.pool.begin().await.map_err(db)?;
        Ok(Box::new(SqliteTx { tx: Some(tx) }))
    }
}

struct SqliteTx {
    tx: Option<Transaction<'static, Sqlite>>,
}

impl SqliteTx {
    fn conn(&mut self) -> DomainResult<&mut SqliteConnection> {
        match self.tx.as_mut() {
            Some(tx) => Ok(&mut **tx),
            None => Err(DomainError::data_access("transaction already committed")),
        }
    }
}

// Row mapping

fn member_from_row(row: &SqliteRow) -> Result<Member, sqlx::Error> {
    let role: String = row.try_get("role")?;
    Ok(Member {
        id: MemberId(row.try_get("id")?),
        login_id: row.try_get("login_id")?,
        password: row.try_get("password")?,
        username: row.try_get("username")?,
        nickname: row.try_get("nickname")?,
        role: Role::from_str(&role).map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn post_from_row(row: &SqliteRow) -> Result<Post, sqlx::Error> {
    Ok(Post {
        id: PostId(row.try_get("id")?),
        owner_id: MemberId(row.try_get("owner_id")?),
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        view_count: row.try_get("view_count")?,
    })
}

fn comment_from_row(row: &SqliteRow) -> Result<Comment, sqlx::Error> {
    Ok(Comment {
        id: CommentId(row.try_get("id")?),
        post_id: PostId(row.try_get("post_id")?),
        author_id: MemberId(row.try_get("author_id")?),
        parent_id: row.try_get::<Option<i64>, _>("parent_id")?.map(CommentId),
        content: row.try_get("content")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn file_from_row(row: &SqliteRow) -> Result<FileAttachment, sqlx::Error> {
    Ok(FileAttachment {
        id: FileId(row.try_get("id")?),
        post_id: PostId(row.try_get("post_id")?),
        file_name: row.try_get("file_name")?,
        file_path: row.try_get("file_path")?,
        uploaded_at: row.try_get("uploaded_at")?,
    })
}

fn collect<T>(rows: Vec<SqliteRow>, map: fn(&SqliteRow) -> Result<T, sqlx::Error>) -> DomainResult<Vec<T>> {
    rows.iter().map(map).collect::<Result<_, _>>().map_err(db)
}

/// SQLite integers are signed; anything larger still means "past the end".
fn sql_int(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

// Filter rendering shared by listing and count

fn push_post_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &PostFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(owner) = filter.owner {
        qb.push(" AND p.owner_id = ").push_bind(owner.get());
    }
    if filter.keyword_applies() {
        let column = match filter.effective_option() {
            PostSearchOption::ByContent => "p.content",
            PostSearchOption::ByTitle => "p.title",
            PostSearchOption::ByWriter => "m.nickname",
            PostSearchOption::All => return,
        };
        qb.push(format!(" AND instr({column}, "))
            .push_bind(filter.keyword.clone())
            .push(") > 0");
    }
}

fn push_member_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &MemberFilter) {
    qb.push(" WHERE 1 = 1");
    if filter.keyword_applies() {
        let column = match filter.option {
            MemberSearchOption::ByLoginId => "login_id",
            MemberSearchOption::ByUsername => "username",
            MemberSearchOption::ByNickname => "nickname",
            MemberSearchOption::All => return,
        };
        qb.push(format!(" AND instr({column}, "))
            .push_bind(filter.keyword.clone())
            .push(") > 0");
    }
}

const OWNED_POSTS: &str = "SELECT id FROM posts WHERE owner_id = ?";

#[async_trait]
impl BoardTx for SqliteTx {
    async fn insert_member(&mut self, member: &NewMember) -> DomainResult<MemberId> {
        let result = sqlx::query(
            "INSERT INTO members (login_id, password, username, nickname, role, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&member.login_id)
        .bind(&member.password)
        .bind(&member.username)
        .bind(&member.nickname)
        .bind(member.role.as_str())
        .bind(member.created_at)
        .execute(self.conn()?)
        .await
        .map_err(db)?;
        Ok(MemberId(result.last_insert_rowid()))
    }

    async fn find_member(&mut self, id: MemberId) -> DomainResult<Option<Member>> {
        let row = sqlx::query("SELECT * FROM members WHERE id = ?")
            .bind(id.get())
            .fetch_optional(self.conn()?)
            .await
            .map_err(db)?;
        row.as_ref().map(member_from_row).transpose().map_err(db)
    }

    async fn find_member_by_login_id(&mut self, login_id: &str) -> DomainResult<Option<Member>> {
        let row = sqlx::query("SELECT * FROM members WHERE login_id = ?")
            .bind(login_id)
            .fetch_optional(self.conn()?)
            .await
            .map_err(db)?;
        row.as_ref().map(member_from_row).transpose().map_err(db)
    }

    async fn find_member_by_nickname(&mut self, nickname: &str) -> DomainResult<Option<Member>> {
        let row = sqlx::query("SELECT * FROM members WHERE nickname = ?")
            .bind(nickname)
            .fetch_optional(self.conn()?)
            .await
            .map_err(db)?;
        row.as_ref().map(member_from_row).transpose().map_err(db)
    }

    async fn update_member(&mut self, member: &Member) -> DomainResult<()> {
        sqlx::query(
            "UPDATE members SET login_id = ?, password = ?, username = ?, nickname = ?, role = ?, created_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&member.login_id)
        .bind(&member.password)
        .bind(&member.username)
        .bind(&member.nickname)
        .bind(member.role.as_str())
        .bind(member.created_at)
        .bind(member.updated_at)
        .bind(member.id.get())
        .execute(self.conn()?)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn delete_member(&mut self, id: MemberId) -> DomainResult<u64> {
        let result = sqlx::query("DELETE FROM members WHERE id = ?")
            .bind(id.get())
            .execute(self.conn()?)
            .await
            .map_err(db)?;
        Ok(result.rows_affected())
    }

    async fn search_members(&mut self, filter: &MemberFilter, offset: u64, limit: u64) -> DomainResult<Vec<MemberSummary>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM members");
        push_member_filter(&mut qb, filter);
        qb.push(" ORDER BY id ASC LIMIT ")
            .push_bind(sql_int(limit))
            .push(" OFFSET ")
            .push_bind(sql_int(offset));

        let rows = qb.build().fetch_all(self.conn()?).await.map_err(db)?;
        let members = collect(rows, member_from_row)?;
        Ok(members.iter().map(MemberSummary::from).collect())
    }

    async fn count_members(&mut self, filter: &MemberFilter) -> DomainResult<u64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM members");
        push_member_filter(&mut qb, filter);
        let total: i64 = qb
            .build_query_scalar::<i64>()
            .fetch_one(self.conn()?)
            .await
            .map_err(db)?;
        Ok(total as u64)
    }

    async fn insert_post(&mut self, post: &NewPost) -> DomainResult<PostId> {
        let result = sqlx::query("INSERT INTO posts (owner_id, title, content, created_at) VALUES (?, ?, ?, ?)")
            .bind(post.owner_id.get())
            .bind(&post.title)
            .bind(&post.content)
            .bind(post.created_at)
            .execute(self.conn()?)
            .await
            .map_err(db)?;
        Ok(PostId(result.last_insert_rowid()))
    }

    async fn find_post(&mut self, id: PostId) -> DomainResult<Option<Post>> {
        let row = sqlx::query("SELECT * FROM posts WHERE id = ?")
            .bind(id.get())
            .fetch_optional(self.conn()?)
            .await
            .map_err(db)?;
        row.as_ref().map(post_from_row).transpose().map_err(db)
    }

    async fn find_posts_by_owner(&mut self, owner: MemberId) -> DomainResult<Vec<Post>> {
        let rows = sqlx::query("SELECT * FROM posts WHERE owner_id = ? ORDER BY id ASC")
            .bind(owner.get())
            .fetch_all(self.conn()?)
            .await
            .map_err(db)?;
        collect(rows, post_from_row)
    }

    async fn update_post(&mut self, post: &Post) -> DomainResult<()> {
        sqlx::query("UPDATE posts SET title = ?, content = ?, updated_at = ?, view_count = ? WHERE id = ?")
            .bind(&post.title)
            .bind(&post.content)
            .bind(post.updated_at)
            .bind(post.view_count)
            .bind(post.id.get())
            .execute(self.conn()?)
            .await
            .map_err(db)?;
        Ok(())
    }

    async fn increment_view_count(&mut self, id: PostId) -> DomainResult<u64> {
        let result = sqlx::query("UPDATE posts SET view_count = view_count + 1 WHERE id = ?")
            .bind(id.get())
            .execute(self.conn()?)
            .await
            .map_err(db)?;
        Ok(result.rows_affected())
    }

    async fn delete_post(&mut self, id: PostId) -> DomainResult<u64> {
        let result = sqlx::query("DELETE FROM posts WHERE id = ?")
            .bind(id.get())
            .execute(self.conn()?)
            .await
            .map_err(db)?;
        Ok(result.rows_affected())
    }

    async fn delete_posts_by_owner(&mut self, owner: MemberId) -> DomainResult<u64> {
        let result = sqlx::query("DELETE FROM posts WHERE owner_id = ?")
            .bind(owner.get())
            .execute(self.conn()?)
            .await
            .map_err(db)?;
        Ok(result.rows_affected())
    }

    async fn search_posts(&mut self, filter: &PostFilter, offset: u64, limit: u64) -> DomainResult<Vec<PostSummary>> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT p.id, p.title, m.nickname, p.created_at, p.updated_at, p.view_count \
             FROM posts p JOIN members m ON m.id = p.owner_id",
        );
        push_post_filter(&mut qb, filter);
        qb.push(" ORDER BY p.id ASC LIMIT ")
            .push_bind(sql_int(limit))
            .push(" OFFSET ")
            .push_bind(sql_int(offset));

        let rows = qb.build().fetch_all(self.conn()?).await.map_err(db)?;
        collect(rows, |row| {
            Ok(PostSummary {
                id: PostId(row.try_get("id")?),
                title: row.try_get("title")?,
                nickname: row.try_get("nickname")?,
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
                view_count: row.try_get("view_count")?,
            })
        })
    }

    async fn count_posts(&mut self, filter: &PostFilter) -> DomainResult<u64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM posts p JOIN members m ON m.id = p.owner_id");
        push_post_filter(&mut qb, filter);
        let total: i64 = qb
            .build_query_scalar::<i64>()
            .fetch_one(self.conn()?)
            .await
            .map_err(db)?;
        Ok(total as u64)
    }

    async fn insert_comment(&mut self, comment: &NewComment) -> DomainResult<CommentId> {
        let result = sqlx::query(
            "INSERT INTO comments (post_id, author_id, parent_id, content, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(comment.post_id.get())
        .bind(comment.author_id.get())
        .bind(comment.parent_id.map(CommentId::get))
        .bind(&comment.content)
        .bind(comment.created_at)
        .execute(self.conn()?)
        .await
        .map_err(db)?;
        Ok(CommentId(result.last_insert_rowid()))
    }

    async fn find_comment(&mut self, id: CommentId) -> DomainResult<Option<Comment>> {
        let row = sqlx::query("SELECT * FROM comments WHERE id = ?")
            .bind(id.get())
            .fetch_optional(self.conn()?)
            .await
            .map_err(db)?;
        row.as_ref().map(comment_from_row).transpose().map_err(db)
    }

    async fn find_comments_by_post(&mut self, post: PostId) -> DomainResult<Vec<CommentView>> {
        let rows = sqlx::query(
            "SELECT c.*, m.nickname FROM comments c JOIN members m ON m.id = c.author_id \
             WHERE c.post_id = ? ORDER BY c.created_at ASC, c.id ASC",
        )
        .bind(post.get())
        .fetch_all(self.conn()?)
        .await
        .map_err(db)?;
        collect(rows, |row| {
            Ok(CommentView {
                comment: comment_from_row(row)?,
                nickname: row.try_get("nickname")?,
            })
        })
    }

    async fn update_comment(&mut self, comment: &Comment) -> DomainResult<()> {
        sqlx::query("UPDATE comments SET content = ?, updated_at = ? WHERE id = ?")
            .bind(&comment.content)
            .bind(comment.updated_at)
            .bind(comment.id.get())
            .execute(self.conn()?)
            .await
            .map_err(db)?;
        Ok(())
    }

    async fn delete_comment(&mut self, id: CommentId) -> DomainResult<u64> {
        let result = sqlx::query("DELETE FROM comments WHERE id = ?")
            .bind(id.get())
            .execute(self.conn()?)
            .await
            .map_err(db)?;
        Ok(result.rows_affected())
    }

    async fn delete_comments_by_parent(&mut self, parent: CommentId) -> DomainResult<u64> {
        let result = sqlx::query("DELETE FROM comments WHERE parent_id = ?")
            .bind(parent.get())
            .execute(self.conn()?)
            .await
            .map_err(db)?;
        Ok(result.rows_affected())
    }

    async fn delete_comments_by_post(&mut self, post: PostId) -> DomainResult<u64> {
        let replies = sqlx::query("DELETE FROM comments WHERE post_id = ? AND parent_id IS NOT NULL")
            .bind(post.get())
            .execute(self.conn()?)
            .await
            .map_err(db)?;
        let top_level = sqlx::query("DELETE FROM comments WHERE post_id = ?")
            .bind(post.get())
            .execute(self.conn()?)
            .await
            .map_err(db)?;
        Ok(replies.rows_affected() + top_level.rows_affected())
    }

    async fn delete_comments_by_author(&mut self, author: MemberId) -> DomainResult<u64> {
        let replies = sqlx::query(
            "DELETE FROM comments WHERE author_id = ? AND parent_id IS NOT NULL \
             OR parent_id IN (SELECT id FROM comments WHERE author_id = ?)",
        )
        .bind(author.get())
        .bind(author.get())
        .execute(self.conn()?)
        .await
        .map_err(db)?;
        let top_level = sqlx::query("DELETE FROM comments WHERE author_id = ?")
            .bind(author.get())
            .execute(self.conn()?)
            .await
            .map_err(db)?;
        Ok(replies.rows_affected() + top_level.rows_affected())
    }

    async fn insert_file(&mut self, file: &NewFileAttachment) -> DomainResult<FileId> {
        let result = sqlx::query("INSERT INTO files (post_id, file_name, file_path, uploaded_at) VALUES (?, ?, ?, ?)")
            .bind(file.post_id.get())
            .bind(&file.file_name)
            .bind(&file.file_path)
            .bind(file.uploaded_at)
            .execute(self.conn()?)
            .await
            .map_err(db)?;
        Ok(FileId(result.last_insert_rowid()))
    }

    async fn find_file(&mut self, id: FileId) -> DomainResult<Option<FileAttachment>> {
        let row = sqlx::query("SELECT * FROM files WHERE id = ?")
            .bind(id.get())
            .fetch_optional(self.conn()?)
            .await
            .map_err(db)?;
        row.as_ref().map(file_from_row).transpose().map_err(db)
    }

    async fn find_files_by_post(&mut self, post: PostId) -> DomainResult<Vec<FileAttachment>> {
        let rows = sqlx::query("SELECT * FROM files WHERE post_id = ? ORDER BY id ASC")
            .bind(post.get())
            .fetch_all(self.conn()?)
            .await
            .map_err(db)?;
        collect(rows, file_from_row)
    }

    async fn find_files_by_owner(&mut self, owner: MemberId) -> DomainResult<Vec<FileAttachment>> {
        let rows = sqlx::query(&format!("SELECT * FROM files WHERE post_id IN ({OWNED_POSTS}) ORDER BY id ASC"))
            .bind(owner.get())
            .fetch_all(self.conn()?)
            .await
            .map_err(db)?;
        collect(rows, file_from_row)
    }

    async fn delete_file(&mut self, id: FileId) -> DomainResult<u64> {
        let result = sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id.get())
            .execute(self.conn()?)
            .await
            .map_err(db)?;
        Ok(result.rows_affected())
    }

    async fn delete_files_by_post(&mut self, post: PostId) -> DomainResult<u64> {
        let result = sqlx::query("DELETE FROM files WHERE post_id = ?")
            .bind(post.get())
            .execute(self.conn()?)
            .await
            .map_err(db)?;
        Ok(result.rows_affected())
    }

    async fn delete_files_by_owner(&mut self, owner: MemberId) -> DomainResult<u64> {
        let result = sqlx::query(&format!("DELETE FROM files WHERE post_id IN ({OWNED_POSTS})"))
            .bind(owner.get())
            .execute(self.conn()?)
            .await
            .map_err(db)?;
        Ok(result.rows_affected())
    }

    async fn commit(&mut self) -> DomainResult<()> {
        match self.tx.take() {
            Some(tx) => tx.commit().await.map_err(db),
            None => Err(DomainError::data_access("transaction already committed")),
        }
    }
}
