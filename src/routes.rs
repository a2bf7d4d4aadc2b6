use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::http::header;
use actix_web::web::{self, Bytes};
use actix_web::{HttpRequest, HttpResponse};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::{Auth, Role};
use crate::cache::PageCache;
use crate::config::AppConfig;
use crate::error::ApiError;
use crate::feed::{self, GroupFeed, PageQuery, PostDetail, PostPage, ProfileFeed};
use crate::follow;
use crate::forms::{self, CommentForm, FormErrors, GroupForm, PostForm};
use crate::models::*;
use crate::posts::{self, EditOutcome};
use crate::repo::{Repo, RepoError};
use crate::require_role;
use crate::storage::{ImageStore, ImageStoreError};

pub fn config(cfg: &mut web::ServiceConfig) {
    // literal routes first: everything else below is matched as a username
    cfg.service(web::resource("/").route(web::get().to(index)))
        .service(web::resource("/group/{slug}/").route(web::get().to(group_posts)))
        .service(
            web::resource("/new")
                .route(web::get().to(new_post_form))
                .route(web::post().to(new_post)),
        )
        .service(web::resource("/follow/").route(web::get().to(follow_index)))
        .service(web::resource("/media/{key:.+}").route(web::get().to(get_image)))
        .service(web::resource("/admin/groups").route(web::post().to(admin_create_group)))
        .service(web::resource("/admin/groups/{slug}/").route(web::delete().to(admin_delete_group)))
        .service(web::resource("/admin/users/{username}/").route(web::delete().to(admin_delete_user)))
        .service(web::resource("/admin/posts/{post_id}/").route(web::delete().to(admin_delete_post)))
        .service(web::resource("/admin/cache/clear").route(web::post().to(admin_clear_cache)))
        .service(web::resource("/{username}/").route(web::get().to(profile)))
        .service(web::resource("/{username}/follow/").route(web::get().to(profile_follow)))
        .service(web::resource("/{username}/unfollow/").route(web::get().to(profile_unfollow)))
        .service(web::resource("/{username}/{post_id}/").route(web::get().to(post_view)))
        .service(
            web::resource("/{username}/{post_id}/edit/")
                .route(web::get().to(post_edit_form))
                .route(web::post().to(post_edit)),
        )
        .service(
            web::resource("/{username}/{post_id}/comment")
                .route(web::get().to(list_comments))
                .route(web::post().to(add_comment)),
        )
        .service(web::resource("/{username}/{post_id}/like").route(web::post().to(like_post)))
        .service(web::resource("/{username}/{post_id}/unlike").route(web::post().to(unlike_post)))
        .default_service(web::route().to(not_found));
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub image_store: Arc<dyn ImageStore>,
    pub page_cache: PageCache,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(repo: Arc<dyn Repo>, image_store: Arc<dyn ImageStore>, config: AppConfig) -> Self {
        Self {
            repo,
            image_store,
            page_cache: PageCache::new(config.index_cache_ttl),
            config: Arc::new(config),
        }
    }

    /// Called after writes that can change a cached page.
    fn pages_changed(&self) {
        if self.config.invalidate_on_write {
            self.page_cache.clear();
        }
    }

    /// Resolves the token subject to a stored user, creating it on first use.
    async fn actor(&self, auth: &Auth) -> Result<User, ApiError> {
        Ok(self.repo.get_or_create_user(auth.username()).await?)
    }

    /// Like [`actor`](Self::actor) but never creates; used on read paths.
    async fn viewer(&self, auth: Option<&Auth>) -> Result<Option<Id>, ApiError> {
        let Some(auth) = auth else { return Ok(None) };
        match self.repo.get_user_by_username(auth.username()).await {
            Ok(u) => Ok(Some(u.id)),
            Err(RepoError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn redirect(location: String) -> HttpResponse {
    HttpResponse::Found().insert_header((header::LOCATION, location)).finish()
}

fn profile_url(username: &str) -> String {
    format!("/{}/", urlencoding::encode(username))
}

fn post_url(username: &str, post_id: Id) -> String {
    format!("/{}/{}/", urlencoding::encode(username), post_id)
}

// ---------------- Feeds ---------------------------------------------

#[utoipa::path(
    get,
    path = "/",
    params(PageQuery),
    responses((status = 200, description = "Global feed, newest first", body = PostPage))
)]
pub async fn index(req: HttpRequest, data: web::Data<AppState>, query: web::Query<PageQuery>) -> Result<HttpResponse, ApiError> {
    let key = PageCache::key(req.path(), req.query_string());
    if let Some(hit) = data.page_cache.get(&key) {
        return Ok(HttpResponse::Ok()
            .content_type(hit.content_type)
            .insert_header(("X-Cache", "HIT"))
            .body(hit.body));
    }
    let page = feed::global_feed(data.repo.as_ref(), query.page.as_deref()).await?;
    let body = Bytes::from(serde_json::to_vec(&page).map_err(|e| {
        log::error!("serialise feed: {e}");
        ApiError::Internal
    })?);
    data.page_cache.put(key, body.clone(), "application/json");
    Ok(HttpResponse::Ok()
        .content_type("application/json")
        .insert_header(("X-Cache", "MISS"))
        .body(body))
}

#[utoipa::path(
    get,
    path = "/group/{slug}/",
    params(("slug" = String, Path, description = "Group slug"), PageQuery),
    responses(
        (status = 200, description = "Group feed", body = GroupFeed),
        (status = 404, description = "Unknown group")
    )
)]
pub async fn group_posts(data: web::Data<AppState>, path: web::Path<String>, query: web::Query<PageQuery>) -> Result<HttpResponse, ApiError> {
    let feed = feed::group_feed(data.repo.as_ref(), &path.into_inner(), query.page.as_deref()).await?;
    Ok(HttpResponse::Ok().json(feed))
}

#[utoipa::path(
    get,
    path = "/{username}/",
    params(("username" = String, Path, description = "Author username"), PageQuery),
    responses(
        (status = 200, description = "Author profile and feed", body = ProfileFeed),
        (status = 404, description = "Unknown user")
    )
)]
pub async fn profile(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    let viewer = data.viewer(auth.as_ref()).await?;
    let feed = feed::author_feed(data.repo.as_ref(), &path.into_inner(), viewer, query.page.as_deref()).await?;
    Ok(HttpResponse::Ok().json(feed))
}

#[utoipa::path(
    get,
    path = "/{username}/{post_id}/",
    params(("username" = String, Path,), ("post_id" = i64, Path,)),
    responses(
        (status = 200, description = "Single post with comments", body = PostDetail),
        (status = 404, description = "Unknown user or post")
    )
)]
pub async fn post_view(data: web::Data<AppState>, path: web::Path<(String, Id)>) -> Result<HttpResponse, ApiError> {
    let (username, post_id) = path.into_inner();
    let detail = feed::post_detail(data.repo.as_ref(), &username, post_id).await?;
    Ok(HttpResponse::Ok().json(detail))
}

#[utoipa::path(
    get,
    path = "/follow/",
    params(PageQuery),
    responses(
        (status = 200, description = "Posts by followed authors", body = PostPage),
        (status = 302, description = "Login required")
    )
)]
pub async fn follow_index(auth: Auth, data: web::Data<AppState>, query: web::Query<PageQuery>) -> Result<HttpResponse, ApiError> {
    let actor = data.actor(&auth).await?;
    let page = feed::followed_feed(data.repo.as_ref(), actor.id, query.page.as_deref()).await?;
    Ok(HttpResponse::Ok().json(page))
}

// ---------------- Posts ---------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct NewPostContext {
    /// Choices for the `group` field.
    pub groups: Vec<Group>,
}

pub async fn new_post_form(_auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let groups = data.repo.list_groups().await?;
    Ok(HttpResponse::Ok().json(NewPostContext { groups }))
}

#[utoipa::path(
    post,
    path = "/new",
    request_body(content = PostForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Post created", body = Post),
        (status = 302, description = "Login required"),
        (status = 400, description = "Validation failed", body = FormErrors),
        (status = 413, description = "Image too large")
    )
)]
pub async fn new_post(auth: Auth, data: web::Data<AppState>, payload: Multipart) -> Result<HttpResponse, ApiError> {
    let actor = data.actor(&auth).await?;
    let submission = forms::read_post_submission(payload).await?;
    let post = posts::create_post(data.repo.as_ref(), data.image_store.as_ref(), &actor, submission).await?;
    data.pages_changed();
    Ok(HttpResponse::Created()
        .insert_header((header::LOCATION, post_url(&post.author, post.id)))
        .json(post))
}

pub async fn post_edit_form(auth: Auth, data: web::Data<AppState>, path: web::Path<(String, Id)>) -> Result<HttpResponse, ApiError> {
    let (username, post_id) = path.into_inner();
    let actor = data.actor(&auth).await?;
    let (_, post) = feed::find_post(data.repo.as_ref(), &username, post_id).await?;
    if post.author_id != actor.id {
        return Ok(redirect(post_url(&post.author, post.id)));
    }
    Ok(HttpResponse::Ok().json(post))
}

#[utoipa::path(
    post,
    path = "/{username}/{post_id}/edit/",
    params(("username" = String, Path,), ("post_id" = i64, Path,)),
    request_body(content = PostForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Post updated", body = Post),
        (status = 302, description = "Not the author (redirect to the post) or login required"),
        (status = 400, description = "Validation failed", body = FormErrors),
        (status = 404, description = "Unknown user or post")
    )
)]
pub async fn post_edit(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<(String, Id)>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let (username, post_id) = path.into_inner();
    let actor = data.actor(&auth).await?;
    let submission = forms::read_post_submission(payload).await?;
    match posts::edit_post(data.repo.as_ref(), data.image_store.as_ref(), &actor, &username, post_id, submission).await? {
        EditOutcome::Updated(post) => {
            data.pages_changed();
            Ok(HttpResponse::Ok().json(post))
        }
        EditOutcome::NotAuthor { author, post_id } => Ok(redirect(post_url(&author, post_id))),
    }
}

pub async fn list_comments(_auth: Auth, data: web::Data<AppState>, path: web::Path<(String, Id)>) -> Result<HttpResponse, ApiError> {
    let (username, post_id) = path.into_inner();
    let (_, post) = feed::find_post(data.repo.as_ref(), &username, post_id).await?;
    let comments = data.repo.list_comments(post.id).await?;
    Ok(HttpResponse::Ok().json(comments))
}

#[utoipa::path(
    post,
    path = "/{username}/{post_id}/comment",
    params(("username" = String, Path,), ("post_id" = i64, Path,)),
    request_body(content = CommentForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 201, description = "Comment created", body = Comment),
        (status = 302, description = "Login required"),
        (status = 400, description = "Validation failed", body = FormErrors),
        (status = 404, description = "Unknown user or post")
    )
)]
pub async fn add_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<(String, Id)>,
    form: web::Form<CommentForm>,
) -> Result<HttpResponse, ApiError> {
    let (username, post_id) = path.into_inner();
    let actor = data.actor(&auth).await?;
    let comment = posts::add_comment(data.repo.as_ref(), &actor, &username, post_id, form.into_inner()).await?;
    Ok(HttpResponse::Created()
        .insert_header((header::LOCATION, post_url(&username, post_id)))
        .json(comment))
}

pub async fn like_post(auth: Auth, data: web::Data<AppState>, path: web::Path<(String, Id)>) -> Result<HttpResponse, ApiError> {
    let (username, post_id) = path.into_inner();
    let actor = data.actor(&auth).await?;
    let post = posts::like(data.repo.as_ref(), &actor, &username, post_id).await?;
    data.pages_changed();
    Ok(HttpResponse::Ok().json(post))
}

pub async fn unlike_post(auth: Auth, data: web::Data<AppState>, path: web::Path<(String, Id)>) -> Result<HttpResponse, ApiError> {
    let (username, post_id) = path.into_inner();
    let actor = data.actor(&auth).await?;
    let post = posts::unlike(data.repo.as_ref(), &actor, &username, post_id).await?;
    data.pages_changed();
    Ok(HttpResponse::Ok().json(post))
}

// ---------------- Follow graph --------------------------------------

#[utoipa::path(
    get,
    path = "/{username}/follow/",
    params(("username" = String, Path,)),
    responses(
        (status = 302, description = "Redirect to the author's profile"),
        (status = 404, description = "Unknown user")
    )
)]
pub async fn profile_follow(auth: Auth, data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let username = path.into_inner();
    let actor = data.actor(&auth).await?;
    let author = data.repo.get_user_by_username(&username).await?;
    follow::subscribe(data.repo.as_ref(), &actor, &author).await?;
    Ok(redirect(profile_url(&author.username)))
}

#[utoipa::path(
    get,
    path = "/{username}/unfollow/",
    params(("username" = String, Path,)),
    responses(
        (status = 302, description = "Redirect to the author's profile"),
        (status = 404, description = "Unknown user")
    )
)]
pub async fn profile_unfollow(auth: Auth, data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let username = path.into_inner();
    let actor = data.actor(&auth).await?;
    let author = data.repo.get_user_by_username(&username).await?;
    follow::unsubscribe(data.repo.as_ref(), &actor, &author).await?;
    Ok(redirect(profile_url(&author.username)))
}

// ---------------- Media ---------------------------------------------

pub async fn get_image(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    match data.image_store.load(&path.into_inner()).await {
        Ok((bytes, mime)) => Ok(HttpResponse::Ok().insert_header((header::CONTENT_TYPE, mime)).body(bytes)),
        Err(ImageStoreError::NotFound) | Err(ImageStoreError::InvalidKey) => Err(ApiError::NotFound),
        Err(e) => {
            log::error!("image_store load error: {e}");
            Err(ApiError::Internal)
        }
    }
}

// ---------------- Admin ---------------------------------------------

#[utoipa::path(
    post,
    path = "/admin/groups",
    request_body = GroupForm,
    responses(
        (status = 201, description = "Group created", body = Group),
        (status = 400, description = "Validation failed", body = FormErrors),
        (status = 403, description = "Forbidden – admins only")
    )
)]
pub async fn admin_create_group(auth: Auth, data: web::Data<AppState>, payload: web::Json<GroupForm>) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin);
    let new = payload.into_inner().clean().map_err(ApiError::Validation)?;
    let group = data.repo.create_group(new).await.map_err(|e| match e {
        RepoError::Conflict => ApiError::Validation(FormErrors::single("slug", forms::DUPLICATE_SLUG)),
        e => e.into(),
    })?;
    Ok(HttpResponse::Created().json(group))
}

pub async fn admin_delete_group(auth: Auth, data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin);
    let group = data.repo.get_group_by_slug(&path.into_inner()).await?;
    data.repo.delete_group(group.id).await?;
    data.pages_changed();
    Ok(HttpResponse::NoContent().finish())
}

pub async fn admin_delete_user(auth: Auth, data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin);
    let user = data.repo.get_user_by_username(&path.into_inner()).await?;
    data.repo.delete_user(user.id).await?;
    data.pages_changed();
    Ok(HttpResponse::NoContent().finish())
}

pub async fn admin_delete_post(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin);
    let post_id = path.into_inner();
    data.repo.delete_post(post_id).await?;
    data.pages_changed();
    Ok(HttpResponse::NoContent().finish())
}

pub async fn admin_clear_cache(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin);
    data.page_cache.clear();
    Ok(HttpResponse::NoContent().finish())
}

// --------------------------------------------------------------------

pub async fn not_found(req: HttpRequest) -> HttpResponse {
    HttpResponse::NotFound().json(serde_json::json!({ "error": "not found", "path": req.path() }))
}
