//! Microsoft Teams crawler (Graph API): teams → channels → posts.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{instrument, warn};
use url::Url;

use khub_shared::{AuthenticationHeader, CrawlResult, KhubError, Record, RecordExt, Result};

use crate::SourceCrawler;
use crate::cascade::{fan_out, log_task_finish, log_task_start};
use crate::fetcher::{PageFormat, PaginatedFetcher, api_url};

pub const TEAMS: &str = "teams";
pub const CHANNELS: &str = "channels";
pub const POSTS: &str = "posts";

pub const TEAM_ID: &str = "teamId";
pub const CHANNEL_ID: &str = "channelId";

/// Graph collection pages: `{"value": [...], "@odata.nextLink": "https://..."}`.
///
/// A body without `value` is a single entity and becomes the only record.
pub struct GraphPages;

impl PageFormat for GraphPages {
    fn records(&self, body: Value) -> Option<Vec<Record>> {
        match body {
            Value::Object(mut object) => match object.remove("value") {
                Some(Value::Array(values)) => Some(values),
                Some(_) => None,
                None => Some(vec![Value::Object(object)]),
            },
            _ => None,
        }
    }

    fn next_cursor(&self, body: &Value) -> Option<String> {
        body.field("@odata.nextLink")?.as_str().map(String::from)
    }
}

type Fetcher = Arc<PaginatedFetcher<GraphPages>>;

/// Crawls the Teams joined by the authenticated account.
pub struct TeamsCrawler {
    fetcher: Fetcher,
    concurrency: usize,
}

impl TeamsCrawler {
    /// Create a crawler against a Graph root such as `https://graph.microsoft.com/`.
    pub fn new(
        client: Client,
        endpoint: Url,
        header: &AuthenticationHeader,
        concurrency: usize,
    ) -> Self {
        Self {
            fetcher: Arc::new(PaginatedFetcher::new(client, endpoint, header, GraphPages)),
            concurrency,
        }
    }

    async fn retrieve_teams(&self) -> Vec<Record> {
        let task = "teams teams";
        log_task_start(task);

        let teams = match api_url(self.fetcher.endpoint(), &["v1.0", "me", "joinedTeams"], None) {
            Ok(url) => self.fetcher.fetch_all(&url).await,
            Err(e) => {
                warn!(error = %e, "unable to build joined teams request");
                Vec::new()
            }
        };

        log_task_finish(task, &teams);
        teams
    }

    async fn retrieve_channels(&self, teams: &[Record]) -> Vec<Record> {
        let task = "teams channels";
        log_task_start(task);

        let fetcher = Arc::clone(&self.fetcher);
        let channels = fan_out(task, teams.to_vec(), self.concurrency, move |team| {
            team_channels(Arc::clone(&fetcher), team)
        })
        .await;

        log_task_finish(task, &channels);
        channels
    }

    async fn retrieve_posts(&self, channels: &[Record]) -> Vec<Record> {
        let task = "teams posts";
        log_task_start(task);

        let fetcher = Arc::clone(&self.fetcher);
        let posts = fan_out(task, channels.to_vec(), self.concurrency, move |channel| {
            channel_posts(Arc::clone(&fetcher), channel)
        })
        .await;

        log_task_finish(task, &posts);
        posts
    }
}

async fn team_channels(fetcher: Fetcher, team: Record) -> Result<Vec<Record>> {
    let team_id = team
        .id_at("id")
        .ok_or_else(|| KhubError::parse("team without an id"))?;
    let url = api_url(
        fetcher.endpoint(),
        &["v1.0", "teams", team_id.as_str(), "channels"],
        None,
    )?;

    Ok(fetcher
        .fetch_all(&url)
        .await
        .into_iter()
        .map(|mut channel| {
            channel.set_field(TEAM_ID, team_id.as_str());
            channel
        })
        .collect())
}

async fn channel_posts(fetcher: Fetcher, channel: Record) -> Result<Vec<Record>> {
    let channel_id = channel
        .id_at("id")
        .ok_or_else(|| KhubError::parse("channel without an id"))?;
    let team_id = channel
        .id_at(TEAM_ID)
        .ok_or_else(|| KhubError::parse(format!("channel {channel_id} without a team")))?;
    let url = api_url(
        fetcher.endpoint(),
        &["v1.0", "teams", team_id.as_str(), "channels", channel_id.as_str(), "messages"],
        Some("top=100"),
    )?;

    Ok(fetcher
        .fetch_all(&url)
        .await
        .into_iter()
        // System events (member added, renamed...) carry another messageType.
        .filter(|post| post.str_at("messageType") == Some("message"))
        .map(|mut post| {
            post.set_field(CHANNEL_ID, channel_id.as_str());
            post.set_field(TEAM_ID, team_id.as_str());
            post
        })
        .collect())
}

#[async_trait]
impl SourceCrawler for TeamsCrawler {
    fn name(&self) -> &str {
        "teams"
    }

    #[instrument(skip_all, fields(source = "teams", endpoint = %self.fetcher.endpoint()))]
    async fn crawl(&self) -> CrawlResult {
        let teams = self.retrieve_teams().await;
        let channels = self.retrieve_channels(&teams).await;
        let posts = self.retrieve_posts(&channels).await;

        CrawlResult::new(self.name())
            .with_collection(TEAMS, teams)
            .with_collection(CHANNELS, channels)
            .with_collection(POSTS, posts)
    }
}
