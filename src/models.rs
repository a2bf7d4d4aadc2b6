use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub type Id = i64;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct User {
    pub id: Id,
    pub username: String,
    pub date_joined: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Group {
    pub id: Id,
    pub title: String,
    pub slug: Option<String>, // unique when present
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct NewGroup {
    pub title: String,
    pub slug: Option<String>,
    pub description: String,
}

/// A post row joined with its author's username and its group's slug.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Post {
    pub id: Id,
    pub text: String,
    pub pub_date: DateTime<Utc>, // set once at creation
    pub author_id: Id,
    pub author: String,
    pub group_id: Option<Id>,
    pub group_slug: Option<String>,
    pub image: Option<String>, // storage key, served under /media/
    pub likes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewPost {
    pub author_id: Id,
    pub text: String,
    pub group_id: Option<Id>,
    pub image: Option<String>,
}

/// Replacement values for an edit. `pub_date` and `author_id` are not editable.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdatePost {
    pub text: String,
    pub group_id: Option<Id>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Comment {
    pub id: Id,
    pub post_id: Id,
    pub author_id: Id,
    pub author: String,
    pub text: String,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewComment {
    pub post_id: Id,
    pub author_id: Id,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Follow {
    pub id: Id,
    pub user_id: Id,
    pub author_id: Id,
}

/// Selects which posts a feed query covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedScope {
    All,
    Group(Id),
    Author(Id),
    FollowedBy(Id),
}

/// Offset/limit slice of an ordered feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub offset: i64,
    pub limit: i64,
}
