//! Paginated JSON fetching against a source REST API.
//!
//! A [`PaginatedFetcher`] issues a GET, pulls the page's records out with a
//! source-specific [`PageFormat`], follows the "next" cursor and concatenates
//! pages in response order. Failures never escape: a fetch that breaks at any
//! point yields an empty list and a warning, so one bad branch cannot take a
//! crawl down with it.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use khub_shared::{AuthenticationHeader, CrawlConfig, KhubError, Record, Result};

/// User-Agent string for API requests.
const USER_AGENT: &str = concat!("khub/", env!("CARGO_PKG_VERSION"));

/// Build the shared HTTP client for a crawl.
pub fn build_client(config: &CrawlConfig) -> Result<Client> {
    let mut builder = Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(5));

    if let Some(secs) = config.request_timeout_secs {
        builder = builder.timeout(Duration::from_secs(secs));
    }

    builder
        .build()
        .map_err(|e| KhubError::Network(format!("failed to build HTTP client: {e}")))
}

// ---------------------------------------------------------------------------
// PageFormat
// ---------------------------------------------------------------------------

/// Where a source keeps a page's records and its continuation cursor.
pub trait PageFormat: Send + Sync + 'static {
    /// Records on this page, or `None` when the body has an unexpected shape.
    fn records(&self, body: Value) -> Option<Vec<Record>>;

    /// Continuation cursor, absolute or relative to the endpoint.
    fn next_cursor(&self, body: &Value) -> Option<String>;
}

// ---------------------------------------------------------------------------
// PaginatedFetcher
// ---------------------------------------------------------------------------

/// One source's GET + cursor-follow loop.
pub struct PaginatedFetcher<F> {
    client: Client,
    endpoint: Url,
    header: Option<(String, String)>,
    format: F,
}

impl<F: PageFormat> PaginatedFetcher<F> {
    /// Create a fetcher for `endpoint` using `header` on every request.
    pub fn new(client: Client, endpoint: Url, header: &AuthenticationHeader, format: F) -> Self {
        Self {
            client,
            endpoint,
            header: header.to_name_value_pair(),
            format,
        }
    }

    /// The API root this fetcher resolves relative cursors against.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Fetch every page starting at `url`. Empty on any failure.
    pub async fn fetch_all(&self, url: &Url) -> Vec<Record> {
        match self.try_fetch_all(url).await {
            Ok(records) => records,
            Err(e) => {
                warn!(%url, error = %e, "unable to retrieve records");
                Vec::new()
            }
        }
    }

    async fn try_fetch_all(&self, url: &Url) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        let mut next = Some(url.clone());
        let mut pages = 0usize;

        while let Some(current) = next.take() {
            let body = self.get_json(&current).await?;
            let cursor = self.format.next_cursor(&body);

            let page = self
                .format
                .records(body)
                .ok_or_else(|| KhubError::parse(format!("{current}: malformed page body")))?;

            pages += 1;
            debug!(url = %current, page = pages, records = page.len(), "page retrieved");
            records.extend(page);

            next = cursor
                .map(|c| resolve_cursor(&self.endpoint, &c))
                .transpose()?;
        }

        Ok(records)
    }

    async fn get_json(&self, url: &Url) -> Result<Value> {
        let mut request = self.client.get(url.as_str());
        if let Some((name, value)) = &self.header {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| KhubError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(KhubError::Network(format!("{url}: HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| KhubError::Network(format!("{url}: body read failed: {e}")))?;

        serde_json::from_str(body.trim()).map_err(|e| KhubError::parse(format!("{url}: {e}")))
    }
}

// ---------------------------------------------------------------------------
// URL helpers
// ---------------------------------------------------------------------------

/// Resolve a continuation cursor: absolute URLs are taken as-is, anything
/// else is appended to the endpoint.
pub fn resolve_cursor(endpoint: &Url, cursor: &str) -> Result<Url> {
    if let Ok(absolute) = Url::parse(cursor) {
        return Ok(absolute);
    }
    let joined = format!(
        "{}/{}",
        endpoint.as_str().trim_end_matches('/'),
        cursor.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|e| KhubError::parse(format!("invalid cursor {cursor:?}: {e}")))
}

/// Build `<endpoint>/<segments...>?<query>`, percent-encoding each segment.
pub fn api_url(endpoint: &Url, segments: &[&str], query: Option<&str>) -> Result<Url> {
    let mut url = endpoint.clone();
    url.path_segments_mut()
        .map_err(|_| KhubError::config(format!("{endpoint} cannot be used as an API root")))?
        .pop_if_empty()
        .extend(segments);
    url.set_query(query);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// `{"items": [...], "next": "..."}` pages.
    struct ItemsFormat;

    impl PageFormat for ItemsFormat {
        fn records(&self, body: Value) -> Option<Vec<Record>> {
            match body {
                Value::Object(mut object) => match object.remove("items")? {
                    Value::Array(items) => Some(items),
                    _ => None,
                },
                _ => None,
            }
        }

        fn next_cursor(&self, body: &Value) -> Option<String> {
            body.get("next")?.as_str().map(String::from)
        }
    }

    fn fetcher(server: &MockServer, header: &AuthenticationHeader) -> PaginatedFetcher<ItemsFormat> {
        let client = build_client(&CrawlConfig::default()).unwrap();
        let endpoint = Url::parse(&format!("{}/api/", server.uri())).unwrap();
        PaginatedFetcher::new(client, endpoint, header, ItemsFormat)
    }

    fn bearer() -> AuthenticationHeader {
        AuthenticationHeader::new(
            Some("Authorization".into()),
            Some("Bearer".into()),
            Some("t0k3n".into()),
        )
    }

    #[tokio::test]
    async fn follows_cursor_and_keeps_page_order() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/things"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"n": 1}, {"n": 2}],
                "next": "/things?page=2"
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/things"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"n": 3}, {"n": 4}],
                "next": format!("{}/api/things?page=3", server.uri())
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/things"))
            .and(query_param("page", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"n": 5}]
            })))
            .mount(&server)
            .await;

        let fetcher = fetcher(&server, &bearer());
        let start = api_url(fetcher.endpoint(), &["things"], Some("page=1")).unwrap();
        let records = fetcher.fetch_all(&start).await;

        let order: Vec<i64> = records.iter().filter_map(|r| r["n"].as_i64()).collect();
        assert_eq!(order, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn sends_credential_header() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/secure"))
            .and(header("Authorization", "Bearer t0k3n"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [{"ok": true}]})))
            .mount(&server)
            .await;

        let fetcher = fetcher(&server, &bearer());
        let url = api_url(fetcher.endpoint(), &["secure"], None).unwrap();
        assert_eq!(fetcher.fetch_all(&url).await.len(), 1);
    }

    #[tokio::test]
    async fn anonymous_header_sends_no_authorization() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/open"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [{"ok": true}]})))
            .mount(&server)
            .await;

        let fetcher = fetcher(&server, &AuthenticationHeader::anonymous());
        let url = api_url(fetcher.endpoint(), &["open"], None).unwrap();
        assert_eq!(fetcher.fetch_all(&url).await.len(), 1);

        let received = server.received_requests().await.unwrap();
        assert!(received[0].headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn http_error_yields_empty_list() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let fetcher = fetcher(&server, &bearer());
        let url = api_url(fetcher.endpoint(), &["broken"], None).unwrap();
        assert!(fetcher.fetch_all(&url).await.is_empty());
    }

    #[tokio::test]
    async fn malformed_body_yields_empty_list() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/html"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/shape"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rows": []})))
            .mount(&server)
            .await;

        let fetcher = fetcher(&server, &bearer());
        let html = api_url(fetcher.endpoint(), &["html"], None).unwrap();
        let shape = api_url(fetcher.endpoint(), &["shape"], None).unwrap();
        assert!(fetcher.fetch_all(&html).await.is_empty());
        assert!(fetcher.fetch_all(&shape).await.is_empty());
    }

    #[tokio::test]
    async fn failure_mid_pagination_discards_earlier_pages() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/partial"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"n": 1}],
                "next": "partial?page=2"
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/partial"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let fetcher = fetcher(&server, &bearer());
        let url = api_url(fetcher.endpoint(), &["partial"], Some("page=1")).unwrap();
        assert!(fetcher.fetch_all(&url).await.is_empty());
    }

    #[test]
    fn api_url_encodes_segments() {
        let endpoint = Url::parse("https://wiki.example.com/wiki/").unwrap();
        let url = api_url(
            &endpoint,
            &["rest", "api", "group", "site admins", "member"],
            Some("limit=100"),
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://wiki.example.com/wiki/rest/api/group/site%20admins/member?limit=100"
        );
    }

    #[test]
    fn resolve_relative_and_absolute_cursors() {
        let endpoint = Url::parse("https://wiki.example.com/wiki/").unwrap();

        let relative = resolve_cursor(&endpoint, "/rest/api/space?start=100").unwrap();
        assert_eq!(
            relative.as_str(),
            "https://wiki.example.com/wiki/rest/api/space?start=100"
        );

        let absolute = resolve_cursor(&endpoint, "https://graph.example.com/v1.0/x?$skip=20").unwrap();
        assert_eq!(absolute.host_str(), Some("graph.example.com"));
    }
}
