//! Confluence crawler: users, spaces → pages → comments.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{info, instrument, warn};
use url::Url;

use khub_shared::{AuthenticationHeader, CrawlResult, KhubError, Record, RecordExt, Result};

use crate::SourceCrawler;
use crate::cascade::{dedupe_by_value, fan_out, log_task_finish, log_task_start};
use crate::fetcher::{PageFormat, PaginatedFetcher, api_url};

/// Collection names produced by this crawler.
pub const USERS: &str = "users";
pub const SPACES: &str = "spaces";
pub const PAGES: &str = "pages";
pub const COMMENTS: &str = "comments";

/// Injected parent identifiers.
pub const SPACE_ID: &str = "spaceId";
pub const PAGE_ID: &str = "pageId";
/// Direct parent page of a page (last ancestor), or empty.
pub const ANCESTOR: &str = "ancestor";

/// Confluence REST pages: `{"results": [...], "_links": {"next": "/rest/..."}}`.
pub struct ConfluencePages;

impl PageFormat for ConfluencePages {
    fn records(&self, body: Value) -> Option<Vec<Record>> {
        match body {
            Value::Object(mut object) => match object.remove("results")? {
                Value::Array(results) => Some(results),
                _ => None,
            },
            _ => None,
        }
    }

    fn next_cursor(&self, body: &Value) -> Option<String> {
        body.str_at("_links.next").map(String::from)
    }
}

/// Crawls one Confluence site.
pub struct ConfluenceCrawler {
    fetcher: Arc<PaginatedFetcher<ConfluencePages>>,
    concurrency: usize,
}

impl ConfluenceCrawler {
    /// Create a crawler for the site rooted at `endpoint` (e.g. `https://acme.atlassian.net/wiki/`).
    pub fn new(
        client: Client,
        endpoint: Url,
        header: &AuthenticationHeader,
        concurrency: usize,
    ) -> Self {
        Self {
            fetcher: Arc::new(PaginatedFetcher::new(client, endpoint, header, ConfluencePages)),
            concurrency,
        }
    }

    /// Members of every group that own a personal space, deduplicated.
    async fn retrieve_users(&self) -> Vec<Record> {
        let task = "confluence users";
        log_task_start(task);

        let groups = match api_url(self.fetcher.endpoint(), &["rest", "api", "group"], Some("limit=100")) {
            Ok(url) => self.fetcher.fetch_all(&url).await,
            Err(e) => {
                warn!(error = %e, "unable to build group request");
                Vec::new()
            }
        };

        let fetcher = Arc::clone(&self.fetcher);
        let members = fan_out(task, groups, self.concurrency, move |group| {
            group_members(Arc::clone(&fetcher), group)
        })
        .await;

        let users = dedupe_by_value(members);
        log_task_finish(task, &users);
        users
    }

    /// Global spaces, each re-keyed to its homepage id.
    async fn retrieve_spaces(&self) -> Vec<Record> {
        let task = "confluence spaces";
        log_task_start(task);

        let url = match api_url(
            self.fetcher.endpoint(),
            &["rest", "api", "space"],
            Some("type=global&limit=100"),
        ) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "unable to build space request");
                return Vec::new();
            }
        };

        let mut spaces = self.fetcher.fetch_all(&url).await;
        for space in &mut spaces {
            rekey_space_to_homepage(space);
        }

        log_task_finish(task, &spaces);
        spaces
    }

    /// Pages of every space, without the space's own homepage.
    async fn retrieve_pages(&self, spaces: &[Record]) -> Vec<Record> {
        let task = "confluence pages";
        log_task_start(task);

        let fetcher = Arc::clone(&self.fetcher);
        let pages = fan_out(task, spaces.to_vec(), self.concurrency, move |space| {
            space_pages(Arc::clone(&fetcher), space)
        })
        .await;

        log_task_finish(task, &pages);
        pages
    }

    /// Comments of every page that reports having any.
    async fn retrieve_comments(&self, pages: &[Record]) -> Vec<Record> {
        let task = "confluence comments";
        log_task_start(task);

        let commented: Vec<Record> = pages
            .iter()
            .filter(|page| page.i64_at("children.comment.size").unwrap_or(0) > 0)
            .cloned()
            .collect();
        info!(
            with_comments = commented.len(),
            pages = pages.len(),
            "only pages with comments are crawled"
        );

        let fetcher = Arc::clone(&self.fetcher);
        let comments = fan_out(task, commented, self.concurrency, move |page| {
            page_comments(Arc::clone(&fetcher), page)
        })
        .await;

        log_task_finish(task, &comments);
        comments
    }
}

// ---------------------------------------------------------------------------
// Branches
// ---------------------------------------------------------------------------

type Fetcher = Arc<PaginatedFetcher<ConfluencePages>>;

async fn group_members(fetcher: Fetcher, group: Record) -> Result<Vec<Record>> {
    let name = group
        .str_at("name")
        .ok_or_else(|| KhubError::parse("group without a name"))?;
    let url = api_url(
        fetcher.endpoint(),
        &["rest", "api", "group", name, "member"],
        Some("limit=100&expand=personalSpace"),
    )?;

    Ok(fetcher
        .fetch_all(&url)
        .await
        .into_iter()
        .filter(|member| member.has_field("personalSpace"))
        .collect())
}

async fn space_pages(fetcher: Fetcher, space: Record) -> Result<Vec<Record>> {
    let key = space
        .str_at("key")
        .ok_or_else(|| KhubError::parse("space without a key"))?;
    let space_id = space
        .id_at("id")
        .ok_or_else(|| KhubError::parse(format!("space {key} without an id")))?;
    let url = api_url(
        fetcher.endpoint(),
        &["rest", "api", "space", key, "content", "page"],
        Some("type=page&limit=20&expand=body.view,children.comment,ancestors,history.lastUpdated"),
    )?;

    Ok(fetcher
        .fetch_all(&url)
        .await
        .into_iter()
        // The space homepage aggregates the whole space.
        .filter(|page| page.id_at("id").as_deref() != Some(space_id.as_str()))
        .map(|mut page| {
            let ancestor = direct_ancestor(&page);
            page.set_field(ANCESTOR, ancestor);
            page.set_field(SPACE_ID, space_id.as_str());
            page
        })
        .collect())
}

async fn page_comments(fetcher: Fetcher, page: Record) -> Result<Vec<Record>> {
    let page_id = page
        .id_at("id")
        .ok_or_else(|| KhubError::parse("page without an id"))?;
    let space_id = page.id_at(SPACE_ID).unwrap_or_default();
    let url = api_url(
        fetcher.endpoint(),
        &["rest", "api", "content", page_id.as_str(), "child", "comment"],
        Some("limit=100&expand=body.view,ancestors,history.lastUpdated"),
    )?;

    Ok(fetcher
        .fetch_all(&url)
        .await
        .into_iter()
        .map(|mut comment| {
            comment.set_field(PAGE_ID, page_id.as_str());
            comment.set_field(SPACE_ID, space_id.as_str());
            comment
        })
        .collect())
}

#[async_trait]
impl SourceCrawler for ConfluenceCrawler {
    fn name(&self) -> &str {
        "confluence"
    }

    #[instrument(skip_all, fields(source = "confluence", endpoint = %self.fetcher.endpoint()))]
    async fn crawl(&self) -> CrawlResult {
        let (users, spaces) = tokio::join!(self.retrieve_users(), self.retrieve_spaces());
        let pages = self.retrieve_pages(&spaces).await;
        let comments = self.retrieve_comments(&pages).await;

        CrawlResult::new(self.name())
            .with_collection(USERS, users)
            .with_collection(SPACES, spaces)
            .with_collection(PAGES, pages)
            .with_collection(COMMENTS, comments)
    }
}

/// Replace a space's id with its homepage id; downstream joins key on content ids.
fn rekey_space_to_homepage(space: &mut Record) {
    let Some(homepage_id) = space
        .str_at("_expandable.homepage")
        .and_then(|link| link.rsplit('/').next())
        .filter(|id| !id.is_empty())
        .map(String::from)
    else {
        warn!(space = ?space.str_at("key"), "space has no homepage, keeping its id");
        return;
    };
    space.remove_field("id");
    space.set_field("id", homepage_id);
}

/// Id of the last element of `ancestors`, or an empty string.
fn direct_ancestor(page: &Record) -> String {
    page.field("ancestors")
        .and_then(Value::as_array)
        .and_then(|ancestors| ancestors.last())
        .and_then(|last| last.id_at("id"))
        .unwrap_or_default()
}
