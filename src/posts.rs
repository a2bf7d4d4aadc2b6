//! Post and comment mutations on behalf of an authenticated actor.

use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::ApiError;
use crate::feed::find_post;
use crate::forms::{clean_post, CleanImage, CommentForm, PostSubmission};
use crate::models::{Comment, Id, NewComment, NewPost, Post, UpdatePost, User};
use crate::repo::Repo;
use crate::storage::{ImageStore, ImageStoreError};

/// Result of an edit attempt.
#[derive(Debug)]
pub enum EditOutcome {
    Updated(Post),
    /// The actor does not own the post; nothing was changed.
    NotAuthor { author: String, post_id: Id },
}

/// Stores a validated image under `posts/<sha256>.<ext>` and returns its key.
/// Identical uploads share one file.
pub async fn store_image(images: &dyn ImageStore, image: &CleanImage) -> Result<String, ApiError> {
    let hash = format!("{:x}", Sha256::digest(&image.bytes));
    let key = format!("posts/{hash}.{}", image.extension);
    match images.save(&key, &image.bytes).await {
        Ok(()) | Err(ImageStoreError::Duplicate) => Ok(key),
        Err(e) => {
            log::error!("image_store save error: {e}");
            Err(ApiError::Internal)
        }
    }
}

/// Deletes a stored image once no post refers to it. Failures are logged
/// only; the edit that released the image has already been saved.
async fn release_image(repo: &dyn Repo, images: &dyn ImageStore, key: &str) {
    match repo.image_in_use(key).await {
        Ok(true) => {}
        Ok(false) => {
            if let Err(e) = images.delete(key).await {
                log::warn!("image_store delete error key={key}: {e}");
            }
        }
        Err(e) => log::warn!("image_in_use lookup failed key={key}: {e}"),
    }
}

pub async fn create_post(
    repo: &dyn Repo,
    images: &dyn ImageStore,
    actor: &User,
    sub: PostSubmission,
) -> Result<Post, ApiError> {
    let clean = clean_post(repo, sub).await?;
    let image = match clean.image {
        Some(ref img) => Some(store_image(images, img).await?),
        None => None,
    };
    let post = repo
        .create_post(NewPost { author_id: actor.id, text: clean.text, group_id: clean.group_id, image })
        .await?;
    info!(post_id = post.id, author = %actor.username, "post created");
    Ok(post)
}

/// Replaces text and group; the image changes only when a new file is sent
/// or `image-clear` is set.
pub async fn edit_post(
    repo: &dyn Repo,
    images: &dyn ImageStore,
    actor: &User,
    username: &str,
    post_id: Id,
    sub: PostSubmission,
) -> Result<EditOutcome, ApiError> {
    let (_, post) = find_post(repo, username, post_id).await?;
    if post.author_id != actor.id {
        info!(post_id, actor = %actor.username, "edit refused: not the author");
        return Ok(EditOutcome::NotAuthor { author: post.author, post_id });
    }
    let clean = clean_post(repo, sub).await?;
    let previous = post.image.clone();
    let image = match clean.image {
        Some(ref img) => Some(store_image(images, img).await?),
        None if clean.clear_image => None,
        None => post.image,
    };
    let updated = repo
        .update_post(post.id, UpdatePost { text: clean.text, group_id: clean.group_id, image })
        .await?;
    if let Some(old) = previous.filter(|old| updated.image.as_deref() != Some(old.as_str())) {
        release_image(repo, images, &old).await;
    }
    info!(post_id, "post edited");
    Ok(EditOutcome::Updated(updated))
}

pub async fn add_comment(
    repo: &dyn Repo,
    actor: &User,
    username: &str,
    post_id: Id,
    form: CommentForm,
) -> Result<Comment, ApiError> {
    let (_, post) = find_post(repo, username, post_id).await?;
    let text = form.clean().map_err(ApiError::Validation)?;
    let comment = repo.create_comment(NewComment { post_id: post.id, author_id: actor.id, text }).await?;
    info!(post_id, comment_id = comment.id, "comment added");
    Ok(comment)
}

pub async fn like(repo: &dyn Repo, actor: &User, username: &str, post_id: Id) -> Result<Post, ApiError> {
    let (_, post) = find_post(repo, username, post_id).await?;
    Ok(repo.like_post(post.id, actor.id).await?)
}

pub async fn unlike(repo: &dyn Repo, actor: &User, username: &str, post_id: Id) -> Result<Post, ApiError> {
    let (_, post) = find_post(repo, username, post_id).await?;
    Ok(repo.unlike_post(post.id, actor.id).await?)
}
