use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("invalid: {0}")] Invalid(String),
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Returns the user with this username, inserting it on first sight.
    async fn get_or_create_user(&self, username: &str) -> RepoResult<User>;
    async fn get_user_by_username(&self, username: &str) -> RepoResult<User>;
    /// Removes the user with their posts, comments, likes and follow edges.
    async fn delete_user(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait GroupRepo: Send + Sync {
    async fn list_groups(&self) -> RepoResult<Vec<Group>>;
    async fn create_group(&self, new: NewGroup) -> RepoResult<Group>;
    async fn get_group(&self, id: Id) -> RepoResult<Group>;
    async fn get_group_by_slug(&self, slug: &str) -> RepoResult<Group>;
    /// Removes the group; its posts survive with no group.
    async fn delete_group(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait PostRepo: Send + Sync {
    async fn create_post(&self, new: NewPost) -> RepoResult<Post>;
    async fn get_post(&self, id: Id) -> RepoResult<Post>;
    async fn update_post(&self, id: Id, upd: UpdatePost) -> RepoResult<Post>;
    /// Removes the post with its comments and likes.
    async fn delete_post(&self, id: Id) -> RepoResult<()>;
    async fn count_posts(&self, scope: FeedScope) -> RepoResult<i64>;
    /// Newest first (`pub_date` desc, then `id` desc).
    async fn list_posts(&self, scope: FeedScope, window: PageWindow) -> RepoResult<Vec<Post>>;
    /// Whether any post still references this image key.
    async fn image_in_use(&self, key: &str) -> RepoResult<bool>;
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    async fn create_comment(&self, new: NewComment) -> RepoResult<Comment>;
    async fn list_comments(&self, post_id: Id) -> RepoResult<Vec<Comment>>;
}

#[async_trait]
pub trait FollowRepo: Send + Sync {
    /// `Conflict` when the pair exists, `Invalid` for a self-follow.
    async fn create_follow(&self, user_id: Id, author_id: Id) -> RepoResult<Follow>;
    /// Returns whether a relation was removed.
    async fn delete_follow(&self, user_id: Id, author_id: Id) -> RepoResult<bool>;
    async fn is_following(&self, user_id: Id, author_id: Id) -> RepoResult<bool>;
}

#[async_trait]
pub trait LikeRepo: Send + Sync {
    async fn like_post(&self, post_id: Id, user_id: Id) -> RepoResult<Post>;
    async fn unlike_post(&self, post_id: Id, user_id: Id) -> RepoResult<Post>;
}

pub trait Repo: UserRepo + GroupRepo + PostRepo + CommentRepo + FollowRepo + LikeRepo {}

impl<T> Repo for T where T: UserRepo + GroupRepo + PostRepo + CommentRepo + FollowRepo + LikeRepo {}

pub(crate) fn check_username(username: &str) -> RepoResult<()> {
    let ok = !username.is_empty()
        && username.chars().count() <= 150
        && username.chars().all(|c| c.is_alphanumeric() || "@.+-_".contains(c));
    if ok { Ok(()) } else { Err(RepoError::Invalid(format!("bad username '{username}'"))) }
}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::path::{Path, PathBuf};
    use tracing::{info, warn};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct PostRow {
        id: Id,
        text: String,
        pub_date: chrono::DateTime<Utc>,
        author_id: Id,
        group_id: Option<Id>,
        image: Option<String>,
        like_num: i64,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct CommentRow {
        id: Id,
        post_id: Id,
        author_id: Id,
        text: String,
        created: chrono::DateTime<Utc>,
    }

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        users: HashMap<Id, User>,
        groups: HashMap<Id, Group>,
        posts: HashMap<Id, PostRow>,
        comments: HashMap<Id, CommentRow>,
        follows: HashMap<Id, Follow>,
        likes: BTreeSet<(Id, Id)>, // (post_id, user_id)
        next_id: Id,
    }

    impl State {
        fn next_id(&mut self) -> Id {
            self.next_id += 1;
            self.next_id
        }

        fn user_by_name(&self, username: &str) -> Option<&User> {
            self.users.values().find(|u| u.username == username)
        }

        fn hydrate_post(&self, row: &PostRow) -> Post {
            Post {
                id: row.id,
                text: row.text.clone(),
                pub_date: row.pub_date,
                author_id: row.author_id,
                author: self.users.get(&row.author_id).map(|u| u.username.clone()).unwrap_or_default(),
                group_id: row.group_id,
                group_slug: row.group_id.and_then(|g| self.groups.get(&g)).and_then(|g| g.slug.clone()),
                image: row.image.clone(),
                likes: row.like_num,
            }
        }

        fn hydrate_comment(&self, row: &CommentRow) -> Comment {
            Comment {
                id: row.id,
                post_id: row.post_id,
                author_id: row.author_id,
                author: self.users.get(&row.author_id).map(|u| u.username.clone()).unwrap_or_default(),
                text: row.text.clone(),
                created: row.created,
            }
        }

        fn post(&self, id: Id) -> RepoResult<Post> {
            self.posts.get(&id).map(|p| self.hydrate_post(p)).ok_or(RepoError::NotFound)
        }

        fn scoped_posts(&self, scope: FeedScope) -> Vec<&PostRow> {
            let followed: HashSet<Id> = match scope {
                FeedScope::FollowedBy(uid) => self.follows.values()
                    .filter(|f| f.user_id == uid)
                    .map(|f| f.author_id)
                    .collect(),
                _ => HashSet::new(),
            };
            let mut v: Vec<&PostRow> = self.posts.values()
                .filter(|p| match scope {
                    FeedScope::All => true,
                    FeedScope::Group(g) => p.group_id == Some(g),
                    FeedScope::Author(a) => p.author_id == a,
                    FeedScope::FollowedBy(_) => followed.contains(&p.author_id),
                })
                .collect();
            v.sort_by(|a, b| b.pub_date.cmp(&a.pub_date).then(b.id.cmp(&a.id)));
            v
        }

        // referential cleanup
        fn remove_post(&mut self, id: Id) -> Option<PostRow> {
            let row = self.posts.remove(&id)?;
            self.comments.retain(|_, c| c.post_id != id);
            self.likes.retain(|(p, _)| *p != id);
            Some(row)
        }

        fn remove_user(&mut self, id: Id) -> Option<User> {
            let user = self.users.remove(&id)?;
            let authored: Vec<Id> = self.posts.values().filter(|p| p.author_id == id).map(|p| p.id).collect();
            for pid in authored {
                self.remove_post(pid);
            }
            self.comments.retain(|_, c| c.author_id != id);
            let liked: Vec<(Id, Id)> = self.likes.iter().filter(|(_, u)| *u == id).copied().collect();
            for key in liked {
                self.likes.remove(&key);
                if let Some(p) = self.posts.get_mut(&key.0) { p.like_num -= 1; }
            }
            self.follows.retain(|_, f| f.user_id != id && f.author_id != id);
            Some(user)
        }

        fn remove_group(&mut self, id: Id) -> Option<Group> {
            let group = self.groups.remove(&id)?;
            for p in self.posts.values_mut().filter(|p| p.group_id == Some(id)) {
                p.group_id = None;
            }
            Some(group)
        }
    }

    /// Process-local store; optionally snapshotted to a JSON file after every write.
    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Option<Arc<PathBuf>>,
    }

    impl InMemRepo {
        /// Empty store, nothing written to disk.
        pub fn new() -> Self {
            Self { state: Arc::new(RwLock::new(State::default())), snapshot_path: None }
        }

        /// Store backed by `<dir>/state.json`, loaded now and rewritten on every mutation.
        pub fn with_snapshot_dir(dir: impl AsRef<Path>) -> Self {
            let path = dir.as_ref().join("state.json");
            let state = Self::load_state_from(&path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Some(Arc::new(path)),
            }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        info!(path = %path.display(), "loaded snapshot");
                        s
                    }
                    Err(e) => {
                        warn!(path = %path.display(), "failed to parse snapshot: {e}; starting empty");
                        State::default()
                    }
                },
                Err(e) => {
                    info!(path = %path.display(), "no snapshot ({e}); starting empty");
                    State::default()
                }
            }
        }

        /// Writes `state` to the snapshot file. Callers still hold the write
        /// guard so snapshots land on disk in mutation order.
        fn persist(&self, state: &State) {
            let Some(path) = self.snapshot_path.as_ref() else { return };
            match serde_json::to_vec_pretty(state) {
                Ok(bytes) => {
                    if let Some(dir) = path.parent() {
                        let _ = std::fs::create_dir_all(dir);
                    }
                    if let Err(e) = std::fs::write(path.as_ref(), bytes) {
                        warn!(path = %path.display(), "failed to write snapshot: {e}");
                    }
                }
                Err(e) => warn!("failed to serialise snapshot: {e}"),
            }
        }

        fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
            self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
            self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self { Self::new() }
    }

    #[async_trait]
    impl UserRepo for InMemRepo {
        async fn get_or_create_user(&self, username: &str) -> RepoResult<User> {
            check_username(username)?;
            let mut s = self.write()?;
            if let Some(u) = s.user_by_name(username) {
                return Ok(u.clone());
            }
            let id = s.next_id();
            let user = User { id, username: username.to_string(), date_joined: Utc::now() };
            s.users.insert(id, user.clone());
            self.persist(&s);
            Ok(user)
        }
        async fn get_user_by_username(&self, username: &str) -> RepoResult<User> {
            let s = self.read()?;
            s.user_by_name(username).cloned().ok_or(RepoError::NotFound)
        }
        async fn delete_user(&self, id: Id) -> RepoResult<()> {
            let mut s = self.write()?;
            s.remove_user(id).ok_or(RepoError::NotFound)?;
            self.persist(&s);
            Ok(())
        }
    }

    #[async_trait]
    impl GroupRepo for InMemRepo {
        async fn list_groups(&self) -> RepoResult<Vec<Group>> {
            let s = self.read()?;
            let mut v: Vec<Group> = s.groups.values().cloned().collect();
            v.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
            Ok(v)
        }
        async fn create_group(&self, new: NewGroup) -> RepoResult<Group> {
            let mut s = self.write()?;
            if let Some(ref slug) = new.slug {
                if s.groups.values().any(|g| g.slug.as_deref() == Some(slug.as_str())) {
                    return Err(RepoError::Conflict);
                }
            }
            let id = s.next_id();
            let group = Group { id, title: new.title, slug: new.slug, description: new.description };
            s.groups.insert(id, group.clone());
            self.persist(&s);
            Ok(group)
        }
        async fn get_group(&self, id: Id) -> RepoResult<Group> {
            let s = self.read()?;
            s.groups.get(&id).cloned().ok_or(RepoError::NotFound)
        }
        async fn get_group_by_slug(&self, slug: &str) -> RepoResult<Group> {
            let s = self.read()?;
            s.groups.values()
                .find(|g| g.slug.as_deref() == Some(slug))
                .cloned()
                .ok_or(RepoError::NotFound)
        }
        async fn delete_group(&self, id: Id) -> RepoResult<()> {
            let mut s = self.write()?;
            s.remove_group(id).ok_or(RepoError::NotFound)?;
            self.persist(&s);
            Ok(())
        }
    }

    #[async_trait]
    impl PostRepo for InMemRepo {
        async fn create_post(&self, new: NewPost) -> RepoResult<Post> {
            let mut s = self.write()?;
            if !s.users.contains_key(&new.author_id) { return Err(RepoError::NotFound); }
            if let Some(g) = new.group_id {
                if !s.groups.contains_key(&g) { return Err(RepoError::NotFound); }
            }
            let id = s.next_id();
            let row = PostRow {
                id,
                text: new.text,
                pub_date: Utc::now(),
                author_id: new.author_id,
                group_id: new.group_id,
                image: new.image,
                like_num: 0,
            };
            let post = s.hydrate_post(&row);
            s.posts.insert(id, row);
            self.persist(&s);
            Ok(post)
        }
        async fn get_post(&self, id: Id) -> RepoResult<Post> {
            self.read()?.post(id)
        }
        async fn update_post(&self, id: Id, upd: UpdatePost) -> RepoResult<Post> {
            let mut s = self.write()?;
            if let Some(g) = upd.group_id {
                if !s.groups.contains_key(&g) { return Err(RepoError::NotFound); }
            }
            let row = s.posts.get_mut(&id).ok_or(RepoError::NotFound)?;
            row.text = upd.text;
            row.group_id = upd.group_id;
            row.image = upd.image;

            let updated = s.post(id)?;
            self.persist(&s);
            Ok(updated)
        }
        async fn delete_post(&self, id: Id) -> RepoResult<()> {
            let mut s = self.write()?;
            s.remove_post(id).ok_or(RepoError::NotFound)?;
            self.persist(&s);
            Ok(())
        }
        async fn count_posts(&self, scope: FeedScope) -> RepoResult<i64> {
            let s = self.read()?;
            Ok(s.scoped_posts(scope).len() as i64)
        }
        async fn list_posts(&self, scope: FeedScope, window: PageWindow) -> RepoResult<Vec<Post>> {
            let s = self.read()?;
            let offset = window.offset.max(0) as usize;
            let limit = window.limit.max(0) as usize;
            Ok(s.scoped_posts(scope)
                .into_iter()
                .skip(offset)
                .take(limit)
                .map(|p| s.hydrate_post(p))
                .collect())
        }
        async fn image_in_use(&self, key: &str) -> RepoResult<bool> {
            let s = self.read()?;
            Ok(s.posts.values().any(|p| p.image.as_deref() == Some(key)))
        }
    }

    #[async_trait]
    impl CommentRepo for InMemRepo {
        async fn create_comment(&self, new: NewComment) -> RepoResult<Comment> {
            let mut s = self.write()?;
            if !s.posts.contains_key(&new.post_id) || !s.users.contains_key(&new.author_id) {
                return Err(RepoError::NotFound);
            }
            let id = s.next_id();
            let row = CommentRow {
                id,
                post_id: new.post_id,
                author_id: new.author_id,
                text: new.text,
                created: Utc::now(),
            };
            let comment = s.hydrate_comment(&row);
            s.comments.insert(id, row);
            self.persist(&s);
            Ok(comment)
        }
        async fn list_comments(&self, post_id: Id) -> RepoResult<Vec<Comment>> {
            let s = self.read()?;
            let mut v: Vec<&CommentRow> = s.comments.values().filter(|c| c.post_id == post_id).collect();
            v.sort_by(|a, b| b.created.cmp(&a.created).then(b.id.cmp(&a.id)));    // newest first
            Ok(v.into_iter().map(|c| s.hydrate_comment(c)).collect())
        }
    }

    #[async_trait]
    impl FollowRepo for InMemRepo {
        async fn create_follow(&self, user_id: Id, author_id: Id) -> RepoResult<Follow> {
            if user_id == author_id {
                return Err(RepoError::Invalid("users cannot follow themselves".into()));
            }
            let mut s = self.write()?;
            if !s.users.contains_key(&user_id) || !s.users.contains_key(&author_id) {
                return Err(RepoError::NotFound);
            }
            if s.follows.values().any(|f| f.user_id == user_id && f.author_id == author_id) {
                return Err(RepoError::Conflict);
            }
            let id = s.next_id();
            let follow = Follow { id, user_id, author_id };
            s.follows.insert(id, follow.clone());
            self.persist(&s);
            Ok(follow)
        }
        async fn delete_follow(&self, user_id: Id, author_id: Id) -> RepoResult<bool> {
            let mut s = self.write()?;
            let before = s.follows.len();
            s.follows.retain(|_, f| !(f.user_id == user_id && f.author_id == author_id));
            let removed = s.follows.len() != before;
            if removed { self.persist(&s); }
            Ok(removed)
        }
        async fn is_following(&self, user_id: Id, author_id: Id) -> RepoResult<bool> {
            let s = self.read()?;
            Ok(s.follows.values().any(|f| f.user_id == user_id && f.author_id == author_id))
        }
    }

    #[async_trait]
    impl LikeRepo for InMemRepo {
        async fn like_post(&self, post_id: Id, user_id: Id) -> RepoResult<Post> {
            let mut s = self.write()?;
            if !s.users.contains_key(&user_id) { return Err(RepoError::NotFound); }
            if !s.posts.contains_key(&post_id) { return Err(RepoError::NotFound); }
            if s.likes.insert((post_id, user_id)) {
                if let Some(p) = s.posts.get_mut(&post_id) { p.like_num += 1; }
            }
            let post = s.post(post_id)?;
            self.persist(&s);
            Ok(post)
        }
        async fn unlike_post(&self, post_id: Id, user_id: Id) -> RepoResult<Post> {
            let mut s = self.write()?;
            if !s.posts.contains_key(&post_id) { return Err(RepoError::NotFound); }
            if s.likes.remove(&(post_id, user_id)) {
                if let Some(p) = s.posts.get_mut(&post_id) { p.like_num -= 1; }
            }
            let post = s.post(post_id)?;
            self.persist(&s);
            Ok(post)
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use sqlx::{Pool, Postgres};

    const POST_SELECT: &str = r#"
        SELECT p.id, p.text, p.pub_date, p.author_id, u.username AS author,
               p.group_id, g.slug AS group_slug, p.image, p.like_num AS likes
        FROM posts p
        JOIN users u ON u.id = p.author_id
        LEFT JOIN post_groups g ON g.id = p.group_id
    "#;

    const COMMENT_SELECT: &str = r#"
        SELECT c.id, c.post_id, c.author_id, u.username AS author, c.text, c.created
        FROM comments c
        JOIN users u ON u.id = c.author_id
    "#;

    fn map_err(e: sqlx::Error) -> RepoError {
        match &e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some("23505") => RepoError::Conflict,          // unique_violation
                Some("23503") => RepoError::NotFound,          // foreign_key_violation
                Some("23514") => RepoError::Invalid(db.message().to_string()), // check_violation
                _ => RepoError::Internal(e.to_string()),
            },
            _ => RepoError::Internal(e.to_string()),
        }
    }

    /// WHERE clause for a feed scope and the id it binds, if any.
    fn scope_filter(scope: FeedScope) -> (&'static str, Option<Id>) {
        match scope {
            FeedScope::All => ("TRUE", None),
            FeedScope::Group(id) => ("p.group_id = $1", Some(id)),
            FeedScope::Author(id) => ("p.author_id = $1", Some(id)),
            FeedScope::FollowedBy(id) => ("p.author_id IN (SELECT author_id FROM follows WHERE user_id = $1)", Some(id)),
        }
    }

    #[derive(Clone)]
    pub struct PgRepo { pool: Pool<Postgres> }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }

        pub fn pool(&self) -> &Pool<Postgres> { &self.pool }
    }

    #[async_trait]
    impl UserRepo for PgRepo {
        async fn get_or_create_user(&self, username: &str) -> RepoResult<User> {
            check_username(username)?;
            // no-op update so RETURNING yields the existing row on conflict
            sqlx::query_as::<_, User>(
                "INSERT INTO users (username) VALUES ($1)
                 ON CONFLICT (username) DO UPDATE SET username = EXCLUDED.username
                 RETURNING id, username, date_joined"
            )
            .bind(username)
            .fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn get_user_by_username(&self, username: &str) -> RepoResult<User> {
            sqlx::query_as::<_, User>("SELECT id, username, date_joined FROM users WHERE username = $1")
                .bind(username)
                .fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn delete_user(&self, id: Id) -> RepoResult<()> {
            let mut tx = self.pool.begin().await.map_err(map_err)?;
            sqlx::query("UPDATE posts SET like_num = like_num - 1 WHERE id IN (SELECT post_id FROM post_likes WHERE user_id = $1)")
                .bind(id).execute(&mut *tx).await.map_err(map_err)?;
            sqlx::query("DELETE FROM post_likes WHERE user_id = $1 OR post_id IN (SELECT id FROM posts WHERE author_id = $1)")
                .bind(id).execute(&mut *tx).await.map_err(map_err)?;
            sqlx::query("DELETE FROM comments WHERE author_id = $1 OR post_id IN (SELECT id FROM posts WHERE author_id = $1)")
                .bind(id).execute(&mut *tx).await.map_err(map_err)?;
            sqlx::query("DELETE FROM follows WHERE user_id = $1 OR author_id = $1")
                .bind(id).execute(&mut *tx).await.map_err(map_err)?;
            sqlx::query("DELETE FROM posts WHERE author_id = $1")
                .bind(id).execute(&mut *tx).await.map_err(map_err)?;
            let res = sqlx::query("DELETE FROM users WHERE id = $1")
                .bind(id).execute(&mut *tx).await.map_err(map_err)?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); } // tx rolls back on drop
            tx.commit().await.map_err(map_err)
        }
    }

    #[async_trait]
    impl GroupRepo for PgRepo {
        async fn list_groups(&self) -> RepoResult<Vec<Group>> {
            sqlx::query_as::<_, Group>("SELECT id, title, slug, description FROM post_groups ORDER BY title, id")
                .fetch_all(&self.pool).await.map_err(map_err)
        }
        async fn create_group(&self, new: NewGroup) -> RepoResult<Group> {
            sqlx::query_as::<_, Group>(
                "INSERT INTO post_groups (title, slug, description) VALUES ($1,$2,$3) RETURNING id, title, slug, description"
            )
            .bind(&new.title).bind(&new.slug).bind(&new.description)
            .fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn get_group(&self, id: Id) -> RepoResult<Group> {
            sqlx::query_as::<_, Group>("SELECT id, title, slug, description FROM post_groups WHERE id = $1")
                .bind(id)
                .fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn get_group_by_slug(&self, slug: &str) -> RepoResult<Group> {
            sqlx::query_as::<_, Group>("SELECT id, title, slug, description FROM post_groups WHERE slug = $1")
                .bind(slug)
                .fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn delete_group(&self, id: Id) -> RepoResult<()> {
            let mut tx = self.pool.begin().await.map_err(map_err)?;
            sqlx::query("UPDATE posts SET group_id = NULL WHERE group_id = $1")
                .bind(id).execute(&mut *tx).await.map_err(map_err)?;
            let res = sqlx::query("DELETE FROM post_groups WHERE id = $1")
                .bind(id).execute(&mut *tx).await.map_err(map_err)?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            tx.commit().await.map_err(map_err)
        }
    }

    #[async_trait]
    impl PostRepo for PgRepo {
        async fn create_post(&self, new: NewPost) -> RepoResult<Post> {
            let (id,): (Id,) = sqlx::query_as(
                "INSERT INTO posts (text, author_id, group_id, image) VALUES ($1,$2,$3,$4) RETURNING id"
            )
            .bind(&new.text).bind(new.author_id).bind(new.group_id).bind(&new.image)
            .fetch_one(&self.pool).await.map_err(map_err)?;
            self.get_post(id).await
        }
        async fn get_post(&self, id: Id) -> RepoResult<Post> {
            sqlx::query_as::<_, Post>(&format!("{POST_SELECT} WHERE p.id = $1"))
                .bind(id)
                .fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn update_post(&self, id: Id, upd: UpdatePost) -> RepoResult<Post> {
            let res = sqlx::query("UPDATE posts SET text = $2, group_id = $3, image = $4 WHERE id = $1")
                .bind(id).bind(&upd.text).bind(upd.group_id).bind(&upd.image)
                .execute(&self.pool).await.map_err(map_err)?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            self.get_post(id).await
        }
        async fn delete_post(&self, id: Id) -> RepoResult<()> {
            let mut tx = self.pool.begin().await.map_err(map_err)?;
            sqlx::query("DELETE FROM comments WHERE post_id = $1")
                .bind(id).execute(&mut *tx).await.map_err(map_err)?;
            sqlx::query("DELETE FROM post_likes WHERE post_id = $1")
                .bind(id).execute(&mut *tx).await.map_err(map_err)?;
            let res = sqlx::query("DELETE FROM posts WHERE id = $1")
                .bind(id).execute(&mut *tx).await.map_err(map_err)?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            tx.commit().await.map_err(map_err)
        }
        async fn count_posts(&self, scope: FeedScope) -> RepoResult<i64> {
            let (clause, bound) = scope_filter(scope);
            let sql = format!("SELECT COUNT(*) FROM posts p WHERE {clause}");
            let mut q = sqlx::query_as::<_, (i64,)>(&sql);
            if let Some(id) = bound { q = q.bind(id); }
            let (n,) = q.fetch_one(&self.pool).await.map_err(map_err)?;
            Ok(n)
        }
        async fn list_posts(&self, scope: FeedScope, window: PageWindow) -> RepoResult<Vec<Post>> {
            let (clause, bound) = scope_filter(scope);
            let first = if bound.is_some() { 2 } else { 1 };
            let sql = format!(
                "{POST_SELECT} WHERE {clause} ORDER BY p.pub_date DESC, p.id DESC LIMIT ${} OFFSET ${}",
                first,
                first + 1
            );
            let mut q = sqlx::query_as::<_, Post>(&sql);
            if let Some(id) = bound { q = q.bind(id); }
            q.bind(window.limit).bind(window.offset)
                .fetch_all(&self.pool).await.map_err(map_err)
        }
        async fn image_in_use(&self, key: &str) -> RepoResult<bool> {
            let (used,): (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM posts WHERE image = $1)")
                .bind(key)
                .fetch_one(&self.pool).await.map_err(map_err)?;
            Ok(used)
        }
    }

    #[async_trait]
    impl CommentRepo for PgRepo {
        async fn create_comment(&self, new: NewComment) -> RepoResult<Comment> {
            let (id,): (Id,) = sqlx::query_as(
                "INSERT INTO comments (post_id, author_id, text) VALUES ($1,$2,$3) RETURNING id"
            )
            .bind(new.post_id).bind(new.author_id).bind(&new.text)
            .fetch_one(&self.pool).await.map_err(map_err)?;
            sqlx::query_as::<_, Comment>(&format!("{COMMENT_SELECT} WHERE c.id = $1"))
                .bind(id)
                .fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn list_comments(&self, post_id: Id) -> RepoResult<Vec<Comment>> {
            sqlx::query_as::<_, Comment>(&format!("{COMMENT_SELECT} WHERE c.post_id = $1 ORDER BY c.created DESC, c.id DESC"))
                .bind(post_id)
                .fetch_all(&self.pool).await.map_err(map_err)
        }
    }

    #[async_trait]
    impl FollowRepo for PgRepo {
        async fn create_follow(&self, user_id: Id, author_id: Id) -> RepoResult<Follow> {
            if user_id == author_id {
                return Err(RepoError::Invalid("users cannot follow themselves".into()));
            }
            sqlx::query_as::<_, Follow>(
                "INSERT INTO follows (user_id, author_id) VALUES ($1,$2) RETURNING id, user_id, author_id"
            )
            .bind(user_id).bind(author_id)
            .fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn delete_follow(&self, user_id: Id, author_id: Id) -> RepoResult<bool> {
            let res = sqlx::query("DELETE FROM follows WHERE user_id = $1 AND author_id = $2")
                .bind(user_id).bind(author_id)
                .execute(&self.pool).await.map_err(map_err)?;
            Ok(res.rows_affected() > 0)
        }
        async fn is_following(&self, user_id: Id, author_id: Id) -> RepoResult<bool> {
            let (exists,): (bool,) = sqlx::query_as(
                "SELECT EXISTS (SELECT 1 FROM follows WHERE user_id = $1 AND author_id = $2)"
            )
            .bind(user_id).bind(author_id)
            .fetch_one(&self.pool).await.map_err(map_err)?;
            Ok(exists)
        }
    }

    #[async_trait]
    impl LikeRepo for PgRepo {
        async fn like_post(&self, post_id: Id, user_id: Id) -> RepoResult<Post> {
            let mut tx = self.pool.begin().await.map_err(map_err)?;
            let res = sqlx::query("INSERT INTO post_likes (post_id, user_id) VALUES ($1,$2) ON CONFLICT DO NOTHING")
                .bind(post_id).bind(user_id)
                .execute(&mut *tx).await.map_err(map_err)?;
            if res.rows_affected() > 0 {
                sqlx::query("UPDATE posts SET like_num = like_num + 1 WHERE id = $1")
                    .bind(post_id).execute(&mut *tx).await.map_err(map_err)?;
            }
            tx.commit().await.map_err(map_err)?;
            self.get_post(post_id).await
        }
        async fn unlike_post(&self, post_id: Id, user_id: Id) -> RepoResult<Post> {
            let mut tx = self.pool.begin().await.map_err(map_err)?;
            let res = sqlx::query("DELETE FROM post_likes WHERE post_id = $1 AND user_id = $2")
                .bind(post_id).bind(user_id)
                .execute(&mut *tx).await.map_err(map_err)?;
            if res.rows_affected() > 0 {
                sqlx::query("UPDATE posts SET like_num = like_num - 1 WHERE id = $1")
                    .bind(post_id).execute(&mut *tx).await.map_err(map_err)?;
            }
            tx.commit().await.map_err(map_err)?;
            self.get_post(post_id).await
        }
    }
}
