//! Hierarchical crawling of collaboration platforms.
//!
//! This crate provides:
//! - [`fetcher`]: paginated JSON fetching with per-source page formats
//! - [`cascade`]: bounded, level-by-level fan-out over parent records
//! - [`sources`]: Confluence and Teams crawlers
//! - [`crawl_sources`]: crawl every enabled source of a configuration

pub mod cascade;
pub mod fetcher;
pub mod sources;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use khub_shared::{AppConfig, CrawlResult, Result};

pub use cascade::{dedupe_by_value, fan_out};
pub use fetcher::{PageFormat, PaginatedFetcher, api_url, build_client, resolve_cursor};
pub use sources::{ConfluenceCrawler, SourceKind, TeamsCrawler};

/// A platform crawler that rebuilds the platform's hierarchy as named collections.
#[async_trait]
pub trait SourceCrawler: Send + Sync {
    /// Source name, used for logging and reporting.
    fn name(&self) -> &str;

    /// Crawl the whole source. Partial failures are logged, never returned.
    async fn crawl(&self) -> CrawlResult;
}

/// Crawl every enabled source concurrently.
///
/// Sources that are not configured contribute nothing. The results come back
/// in [`SourceKind::ALL`] order.
pub async fn crawl_sources(config: &AppConfig) -> Result<Vec<CrawlResult>> {
    let client = build_client(&config.crawl)?;

    let mut tasks = JoinSet::new();
    for (index, kind) in SourceKind::ALL.into_iter().enumerate() {
        if let Some(crawler) = kind.build(config, &client) {
            info!(source = crawler.name(), "crawling source");
            tasks.spawn(async move { (index, crawler.crawl().await) });
        }
    }

    let mut results = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, result)) => {
                if result.is_empty() {
                    warn!(source = %result.source, "source returned no records");
                } else {
                    info!(
                        source = %result.source,
                        records = result.total_records(),
                        "source crawled"
                    );
                }
                results.push((index, result));
            }
            Err(e) => error!(error = %e, "source crawl aborted"),
        }
    }

    results.sort_by_key(|(index, _)| *index);
    Ok(results.into_iter().map(|(_, result)| result).collect())
}
