use tracing::info;

use crate::models::User;
use crate::repo::{Repo, RepoError, RepoResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowOutcome {
    Created,
    AlreadyFollowing,
    /// Following yourself is silently ignored.
    SelfFollow,
    Removed,
    NotFollowing,
}

/// Idempotent subscribe. The store's unique constraint decides races; the
/// `is_following` check only saves a failed insert in the common case.
pub async fn subscribe(repo: &dyn Repo, user: &User, author: &User) -> RepoResult<FollowOutcome> {
    if user.id == author.id {
        return Ok(FollowOutcome::SelfFollow);
    }
    if repo.is_following(user.id, author.id).await? {
        return Ok(FollowOutcome::AlreadyFollowing);
    }
    match repo.create_follow(user.id, author.id).await {
        Ok(_) => {
            info!(user = %user.username, author = %author.username, "follow created");
            Ok(FollowOutcome::Created)
        }
        Err(RepoError::Conflict) => Ok(FollowOutcome::AlreadyFollowing),
        Err(e) => Err(e),
    }
}

pub async fn unsubscribe(repo: &dyn Repo, user: &User, author: &User) -> RepoResult<FollowOutcome> {
    if repo.delete_follow(user.id, author.id).await? {
        info!(user = %user.username, author = %author.username, "follow removed");
        Ok(FollowOutcome::Removed)
    } else {
        Ok(FollowOutcome::NotFollowing)
    }
}
