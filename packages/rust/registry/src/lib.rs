//! Registry harvester: pages through the nonprofit search API.
//!
//! The registry is queried once per NTEE category with a fixed state filter.
//! Each response declares how many pages exist; the harvester walks them in
//! order and hands back everything it saw. Any non-success response is fatal:
//! a harvest missing some categories is not a useful result.

mod payload;

use std::time::Duration;

use corpus_shared::{CorpusError, RegistryConfig, Result};
use reqwest::Client;
use tracing::{debug, info, instrument};

pub use payload::{RegistryOrganization, SearchPage};

/// Default timeout in seconds for registry requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// User-Agent string for registry requests.
const USER_AGENT: &str = concat!("npcorpus/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// RegistryClient
// ---------------------------------------------------------------------------

/// Client for the registry's `search.json` endpoint.
pub struct RegistryClient {
    client: Client,
    search_url: String,
    region: String,
}

impl RegistryClient {
    /// Build a client for the configured registry and region.
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| CorpusError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            search_url: format!("{}/search.json", config.base_url.trim_end_matches('/')),
            region: config.region.clone(),
        })
    }

    /// Fetch one page of results for a category.
    #[instrument(skip(self), fields(region = %self.region))]
    pub async fn search_page(&self, category: u32, page: u32) -> Result<SearchPage> {
        let response = self
            .client
            .get(&self.search_url)
            .query(&[
                ("state[id]", self.region.clone()),
                ("ntee[id]", category.to_string()),
                ("page", page.to_string()),
            ])
            .send()
            .await
            .map_err(|e| CorpusError::Network(format!("{}: {e}", self.search_url)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CorpusError::Registry {
                url: response.url().to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| {
            CorpusError::Network(format!("{}: failed to read body: {e}", self.search_url))
        })?;

        serde_json::from_str(&body).map_err(|e| {
            CorpusError::parse(format!(
                "category {category} page {page}: invalid search response: {e}"
            ))
        })
    }

    /// Walk every page of one category and return its organizations.
    ///
    /// Stops after page `num_pages - 1`. A category with zero pages stops
    /// after its first response instead of paging forever.
    #[instrument(skip(self), fields(region = %self.region))]
    pub async fn harvest_category(&self, category: u32) -> Result<Vec<RegistryOrganization>> {
        let mut organizations = Vec::new();
        let mut page = 0;

        loop {
            let response = self.search_page(category, page).await?;
            debug!(
                page,
                num_pages = response.num_pages,
                count = response.organizations.len(),
                "fetched registry page"
            );

            let num_pages = response.num_pages;
            organizations.extend(response.organizations);
            page += 1;

            if page >= num_pages {
                break;
            }
        }

        info!(
            pages = page,
            organizations = organizations.len(),
            "category harvested"
        );
        Ok(organizations)
    }
}
