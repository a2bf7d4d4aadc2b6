//! Paginated feed queries.
//!
//! Every feed is newest-first and cut into pages of [`PAGE_SIZE`] posts. Page
//! numbers come straight from the `?page=` query parameter and are resolved
//! leniently: anything that is not an integer selects the first page, and any
//! integer outside the valid range selects the last one.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::models::{Comment, FeedScope, Group, Id, PageWindow, Post, User};
use crate::repo::{Repo, RepoResult};

pub const PAGE_SIZE: i64 = 10;

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageQuery {
    /// 1-based page number
    pub page: Option<String>,
}

/// Resolves requested page numbers against a total item count.
#[derive(Debug, Clone, Copy)]
pub struct Paginator {
    pub count: i64,
    pub per_page: i64,
}

impl Paginator {
    pub fn new(count: i64, per_page: i64) -> Self {
        Self { count: count.max(0), per_page: per_page.max(1) }
    }

    /// Always at least one page, even when there is nothing to show.
    pub fn num_pages(&self) -> i64 {
        if self.count == 0 { 1 } else { (self.count + self.per_page - 1) / self.per_page }
    }

    /// Turns a raw `page` parameter into a valid page number.
    pub fn resolve(&self, raw: Option<&str>) -> i64 {
        let last = self.num_pages();
        match raw.and_then(parse_page_number) {
            None => 1,
            Some(n) if n < 1 || n > last => last,
            Some(n) => n,
        }
    }

    pub fn window(&self, number: i64) -> PageWindow {
        PageWindow { offset: (number - 1) * self.per_page, limit: self.per_page }
    }

    pub fn page<T>(&self, number: i64, items: Vec<T>) -> Page<T> {
        let num_pages = self.num_pages();
        Page {
            items,
            number,
            num_pages,
            count: self.count,
            per_page: self.per_page,
            has_next: number < num_pages,
            has_previous: number > 1,
            next_page_number: (number < num_pages).then_some(number + 1),
            previous_page_number: (number > 1).then_some(number - 1),
        }
    }
}

// Only integers are page numbers: "3" is page 3, while "3.0", "1e1" and "x"
// are not pages at all. Digit runs too long for i64 are still integers and
// land past the last page.
fn parse_page_number(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<i64>() {
        return Some(n);
    }
    let digits = raw.strip_prefix(|c: char| c == '+' || c == '-').unwrap_or(raw);
    (!digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())).then_some(i64::MAX)
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[aliases(PostPage = Page<Post>)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub number: i64,
    pub num_pages: i64,
    pub count: i64,
    pub per_page: i64,
    pub has_next: bool,
    pub has_previous: bool,
    pub next_page_number: Option<i64>,
    pub previous_page_number: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GroupFeed {
    pub group: Group,
    #[schema(value_type = PostPage)]
    pub page: Page<Post>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProfileFeed {
    pub author: User,
    /// Total number of posts by this author.
    pub count: i64,
    /// Whether the requester follows this author; false for anonymous requests.
    pub following: bool,
    #[schema(value_type = PostPage)]
    pub page: Page<Post>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PostDetail {
    pub author: User,
    pub post: Post,
    pub count: i64,
    pub comments: Vec<Comment>,
}

async fn paginate(repo: &dyn Repo, scope: FeedScope, raw_page: Option<&str>) -> RepoResult<Page<Post>> {
    let count = repo.count_posts(scope).await?;
    let paginator = Paginator::new(count, PAGE_SIZE);
    let number = paginator.resolve(raw_page);
    let items = repo.list_posts(scope, paginator.window(number)).await?;
    Ok(paginator.page(number, items))
}

pub async fn global_feed(repo: &dyn Repo, raw_page: Option<&str>) -> RepoResult<Page<Post>> {
    paginate(repo, FeedScope::All, raw_page).await
}

pub async fn group_feed(repo: &dyn Repo, slug: &str, raw_page: Option<&str>) -> RepoResult<GroupFeed> {
    let group = repo.get_group_by_slug(slug).await?;
    let page = paginate(repo, FeedScope::Group(group.id), raw_page).await?;
    Ok(GroupFeed { group, page })
}

pub async fn author_feed(
    repo: &dyn Repo,
    username: &str,
    viewer: Option<Id>,
    raw_page: Option<&str>,
) -> RepoResult<ProfileFeed> {
    let author = repo.get_user_by_username(username).await?;
    let page = paginate(repo, FeedScope::Author(author.id), raw_page).await?;
    let following = match viewer {
        Some(uid) => repo.is_following(uid, author.id).await?,
        None => false,
    };
    Ok(ProfileFeed { count: page.count, author, following, page })
}

pub async fn followed_feed(repo: &dyn Repo, user_id: Id, raw_page: Option<&str>) -> RepoResult<Page<Post>> {
    paginate(repo, FeedScope::FollowedBy(user_id), raw_page).await
}

/// Looks a post up by id, requiring `username` to be its author.
pub async fn find_post(repo: &dyn Repo, username: &str, post_id: Id) -> RepoResult<(User, Post)> {
    let author = repo.get_user_by_username(username).await?;
    let post = repo.get_post(post_id).await?;
    if post.author_id != author.id {
        return Err(crate::repo::RepoError::NotFound);
    }
    Ok((author, post))
}

pub async fn post_detail(repo: &dyn Repo, username: &str, post_id: Id) -> RepoResult<PostDetail> {
    let (author, post) = find_post(repo, username, post_id).await?;
    let count = repo.count_posts(FeedScope::Author(author.id)).await?;
    let comments = repo.list_comments(post.id).await?;
    Ok(PostDetail { author, post, count, comments })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_feed_has_one_page() {
        let p = Paginator::new(0, PAGE_SIZE);
        assert_eq!(p.num_pages(), 1);
        assert_eq!(p.resolve(Some("5")), 1);
        let page = p.page::<Post>(1, vec![]);
        assert!(!page.has_next && !page.has_previous);
    }

    #[test]
    fn out_of_range_clamps_to_last_page() {
        let p = Paginator::new(25, PAGE_SIZE);
        assert_eq!(p.num_pages(), 3);
        assert_eq!(p.resolve(Some("99")), 3);
        assert_eq!(p.resolve(Some("0")), 3);
        assert_eq!(p.resolve(Some("-1")), 3);
        assert_eq!(p.resolve(Some(" 2 ")), 2);
        assert_eq!(p.resolve(Some("99999999999999999999")), 3);
        assert_eq!(p.resolve(Some("-99999999999999999999")), 3);
    }

    #[test]
    fn junk_selects_first_page() {
        let p = Paginator::new(25, PAGE_SIZE);
        assert_eq!(p.resolve(None), 1);
        assert_eq!(p.resolve(Some("abc")), 1);
        assert_eq!(p.resolve(Some("2.5")), 1);
        assert_eq!(p.resolve(Some("2.0")), 1);
        assert_eq!(p.resolve(Some("2e0")), 1);
        assert_eq!(p.resolve(Some("1e1")), 1);
        assert_eq!(p.resolve(Some("-")), 1);
        assert_eq!(p.resolve(Some("")), 1);
    }

    #[test]
    fn window_and_metadata() {
        let p = Paginator::new(25, PAGE_SIZE);
        assert_eq!(p.window(3), PageWindow { offset: 20, limit: 10 });
        let page = p.page(2, vec![(); 10]);
        assert_eq!(page.next_page_number, Some(3));
        assert_eq!(page.previous_page_number, Some(1));
        assert_eq!(page.count, 25);
    }
}
