//! Source platforms and their crawlers.

pub mod confluence;
pub mod teams;

use reqwest::Client;
use tracing::warn;

use khub_shared::{AppConfig, SourceConfig};

use crate::SourceCrawler;

pub use confluence::{ConfluenceCrawler, ConfluencePages};
pub use teams::{GraphPages, TeamsCrawler};

/// Every platform khub knows how to crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Confluence,
    Teams,
}

impl SourceKind {
    pub const ALL: [SourceKind; 2] = [SourceKind::Confluence, SourceKind::Teams];

    pub fn name(self) -> &'static str {
        match self {
            SourceKind::Confluence => "confluence",
            SourceKind::Teams => "teams",
        }
    }

    /// This source's section of the configuration.
    pub fn config(self, config: &AppConfig) -> &SourceConfig {
        match self {
            SourceKind::Confluence => &config.confluence,
            SourceKind::Teams => &config.teams,
        }
    }

    /// Build the crawler, or `None` when the source is not fully configured.
    pub fn build(
        self,
        config: &AppConfig,
        client: &Client,
    ) -> Option<Box<dyn SourceCrawler>> {
        let source = self.config(config);
        if !source.is_enabled() {
            if source.endpoint.is_none() {
                warn!(source = self.name(), "no endpoint configured, source skipped");
            } else {
                warn!(
                    source = self.name(),
                    "authentication header is incomplete, source skipped"
                );
            }
            return None;
        }

        let endpoint = source.endpoint.clone()?;
        let header = source.authentication_header();

        let concurrency = config.crawl.concurrency;
        let client = client.clone();
        Some(match self {
            SourceKind::Confluence => Box::new(ConfluenceCrawler::new(
                client,
                endpoint,
                &header,
                concurrency,
            )),
            SourceKind::Teams => {
                Box::new(TeamsCrawler::new(client, endpoint, &header, concurrency))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::build_client;
    use url::Url;

    #[test]
    fn unconfigured_sources_are_skipped() {
        let config = AppConfig::default();
        let client = build_client(&config.crawl).unwrap();
        for kind in SourceKind::ALL {
            assert!(kind.build(&config, &client).is_none());
        }
    }

    #[test]
    fn source_without_token_is_skipped() {
        let mut config = AppConfig::default();
        config.teams.endpoint = Some(Url::parse("https://graph.microsoft.com/").unwrap());
        config.teams.header.token_env = Some("KHUB_TEST_TOKEN_THAT_IS_NEVER_SET".into());
        let client = build_client(&config.crawl).unwrap();
        assert!(SourceKind::Teams.build(&config, &client).is_none());
    }

    #[test]
    fn configured_source_is_built() {
        let mut config = AppConfig::default();
        config.confluence.endpoint = Some(Url::parse("https://acme.atlassian.net/wiki/").unwrap());
        config.confluence.header.token = Some("bot:secret".into());
        let client = build_client(&config.crawl).unwrap();

        let crawler = SourceKind::Confluence.build(&config, &client).unwrap();
        assert_eq!(crawler.name(), "confluence");
    }

    #[test]
    fn built_sources_match_enabled_sources() {
        let mut config = AppConfig::default();
        config.confluence.endpoint = Some(Url::parse("https://acme.atlassian.net/wiki/").unwrap());
        config.confluence.header.token = Some("bot:secret".into());
        config.teams.header.token = Some("graph-token".into());
        let client = build_client(&config.crawl).unwrap();

        for kind in SourceKind::ALL {
            assert_eq!(
                kind.build(&config, &client).is_some(),
                kind.config(&config).is_enabled(),
                "{}",
                kind.name()
            );
        }
        assert!(SourceKind::Confluence.build(&config, &client).is_some());
        assert!(SourceKind::Teams.build(&config, &client).is_none());
    }

    #[test]
    fn anonymous_source_is_built() {
        let mut config = AppConfig::default();
        config.teams.endpoint = Some(Url::parse("http://localhost:8080/").unwrap());
        config.teams.header.anonymous = true;
        let client = build_client(&config.crawl).unwrap();
        assert!(SourceKind::Teams.build(&config, &client).is_some());
    }
}
