use crate::feed::{GroupFeed, PostDetail, PostPage, ProfileFeed};
use crate::forms::{CommentForm, FormErrors, GroupForm, PostForm};
use crate::models::{Comment, Group, Post, User};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::index,
        crate::routes::group_posts,
        crate::routes::profile,
        crate::routes::post_view,
        crate::routes::follow_index,
        crate::routes::new_post,
        crate::routes::post_edit,
        crate::routes::add_comment,
        crate::routes::profile_follow,
        crate::routes::profile_unfollow,
        crate::routes::admin_create_group,
    ),
    components(schemas(
        User, Group, Post, Comment,
        PostPage, GroupFeed, ProfileFeed, PostDetail,
        PostForm, CommentForm, GroupForm, FormErrors,
        crate::error::ApiErrorBody, crate::routes::NewPostContext
    )),
    tags(
        (name = "feeds", description = "Paginated post listings"),
        (name = "posts", description = "Post and comment mutations"),
        (name = "follow", description = "Subscriptions between users"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_feed_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/"));
        assert!(doc.paths.paths.contains_key("/{username}/{post_id}/"));
        let schemas = doc.components.expect("components").schemas;
        assert!(schemas.contains_key("PostPage"));
    }
}
