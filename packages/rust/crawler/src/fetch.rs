//! Sequential page fetching for organization websites.

use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, instrument, warn};
use url::Url;

use corpus_shared::{CorpusError, CrawlConfig, Result};

/// User-Agent string for website requests.
const USER_AGENT: &str = concat!("npcorpus/", env!("CARGO_PKG_VERSION"));

/// A successfully fetched HTML page.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Where the request ended up after redirects.
    pub final_url: Url,
    pub html: String,
}

/// Anything that can turn a URL into an HTML page.
///
/// Errors of kind [`CorpusError::Network`] mean "this page is unavailable";
/// any other error kind means the caller cannot continue.
pub trait PageSource {
    fn fetch_page(&self, url: &str) -> impl Future<Output = Result<FetchedPage>> + Send;
}

/// Fetches one page at a time from third-party websites.
pub struct PageFetcher {
    client: Client,
    allow_private_hosts: bool,
}

impl PageFetcher {
    /// Create a fetcher with the given crawl settings.
    pub fn new(config: &CrawlConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CorpusError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            allow_private_hosts: config.allow_private_hosts,
        })
    }

    /// Fetch `raw_url` and return its body.
    ///
    /// Unparsable URLs, blocked hosts, transport failures and non-success
    /// statuses all come back as [`CorpusError::Network`], which callers treat
    /// as "skip this page".
    #[instrument(skip(self))]
    pub async fn fetch(&self, raw_url: &str) -> Result<FetchedPage> {
        let url = Url::parse(raw_url.trim())
            .map_err(|e| CorpusError::Network(format!("{raw_url}: invalid URL: {e}")))?;

        if !self.allow_private_hosts && is_ssrf_target(&url) {
            warn!(%url, "SSRF protection: blocked");
            return Err(CorpusError::Network(format!("{url}: blocked private address")));
        }

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| CorpusError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CorpusError::Network(format!("{url}: HTTP {status}")));
        }

        let final_url = response.url().clone();
        let html = response
            .text()
            .await
            .map_err(|e| CorpusError::Network(format!("{url}: body read failed: {e}")))?;

        debug!(%url, len = html.len(), "fetched page");

        Ok(FetchedPage { final_url, html })
    }
}

impl PageSource for PageFetcher {
    async fn fetch_page(&self, url: &str) -> Result<FetchedPage> {
        self.fetch(url).await
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
fn is_ssrf_target(url: &Url) -> bool {
    // Block non-HTTP schemes
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher(allow_private_hosts: bool) -> PageFetcher {
        PageFetcher::new(&CrawlConfig {
            timeout_secs: 5,
            max_redirects: 2,
            allow_private_hosts,
        })
        .unwrap()
    }

    #[test]
    fn test_ssrf_protection_blocks_file() {
        let url = Url::parse("file:///etc/passwd").unwrap();
        assert!(is_ssrf_target(&url));
    }

    #[test]
    fn test_ssrf_protection_blocks_private_ip() {
        for raw in ["http://192.168.1.1/admin", "http://10.0.0.1/", "http://127.0.0.1:8080/"] {
            let url = Url::parse(raw).unwrap();
            assert!(is_ssrf_target(&url), "{raw} should be blocked");
        }
    }

    #[test]
    fn test_ssrf_protection_allows_public() {
        let url = Url::parse("https://www.northsidefood.org/about").unwrap();
        assert!(!is_ssrf_target(&url));
    }

    #[test]
    fn test_ssrf_blocks_localhost() {
        let url = Url::parse("http://localhost:3000/api").unwrap();
        assert!(is_ssrf_target(&url));
    }

    #[tokio::test]
    async fn test_fetch_returns_body() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::path("/"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string("<p>hi</p>"))
            .mount(&server)
            .await;

        let page = fetcher(true).fetch(&server.uri()).await.unwrap();
        assert_eq!(page.final_url.path(), "/");
        assert_eq!(page.html, "<p>hi</p>");
    }

    #[tokio::test]
    async fn test_fetch_follows_redirects() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::path("/old"))
            .respond_with(
                wiremock::ResponseTemplate::new(301)
                    .insert_header("Location", format!("{}/new", server.uri()).as_str()),
            )
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::path("/new"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string("<p>moved</p>"))
            .mount(&server)
            .await;

        let page = fetcher(true)
            .fetch(&format!("{}/old", server.uri()))
            .await
            .unwrap();
        assert_eq!(page.final_url.path(), "/new");
        assert_eq!(page.html, "<p>moved</p>");
    }

    #[tokio::test]
    async fn test_fetch_non_success_is_error() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::path("/gone"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = fetcher(true)
            .fetch(&format!("{}/gone", server.uri()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_fetch_rejects_bad_and_private_urls() {
        let err = fetcher(false).fetch("www.no-scheme.org").await.unwrap_err();
        assert!(matches!(err, CorpusError::Network(_)));

        let err = fetcher(false).fetch("http://127.0.0.1:9/").await.unwrap_err();
        assert!(err.to_string().contains("blocked"));
    }
}
