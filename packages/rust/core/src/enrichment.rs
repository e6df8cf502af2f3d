//! Enrichment stage: cause tags from the nonprofit profile API.
//!
//! Each organization is looked up by EIN, one request at a time with a fixed
//! pause after every lookup. The tag string is rebuilt from the response and,
//! when the organization's website cell is blank, the API's website is
//! backfilled. A record is only updated (tags, website, progress marker) once
//! its response has been fully parsed, so a failed lookup leaves it untouched.

use std::path::Path;
use std::time::{Duration, Instant};

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use corpus_shared::{
    CorpusError, Ein, EnrichmentApiConfig, OrganizationRecord, Progress, Result, is_unset,
};
use corpus_storage::{OrganizationTable, incomplete_path};

use crate::pipeline::ProgressReporter;
use crate::stage::{Stage, StageCounts, StageReport, checkpoint_on_failure};

/// Timeout for one profile lookup.
const LOOKUP_TIMEOUT_SECS: u64 = 30;

/// User-Agent string for profile lookups.
const USER_AGENT: &str = concat!("npcorpus/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    data: Option<LookupData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupData {
    #[serde(default)]
    nonprofit_tags: Option<Vec<NonprofitTag>>,
    #[serde(default)]
    nonprofit: Option<NonprofitProfile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NonprofitProfile {
    #[serde(default)]
    website_url: Option<String>,
}

/// One cause tag. Both fields are required; a tag missing either is a
/// malformed response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonprofitTag {
    pub cause_category: String,
    pub tag_name: String,
}

/// The parts of a profile the pipeline uses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileLookup {
    pub tags: Vec<NonprofitTag>,
    pub website_url: Option<String>,
}

impl From<LookupResponse> for ProfileLookup {
    fn from(response: LookupResponse) -> Self {
        let Some(data) = response.data else {
            return Self::default();
        };
        Self {
            tags: data.nonprofit_tags.unwrap_or_default(),
            website_url: data.nonprofit.and_then(|n| n.website_url),
        }
    }
}

/// Parse a lookup body.
pub fn parse_lookup(body: &str) -> Result<ProfileLookup> {
    parse_body(body).map_err(|e| CorpusError::Enrichment(format!("invalid profile response: {e}")))
}

fn parse_body(body: &str) -> serde_json::Result<ProfileLookup> {
    serde_json::from_str::<LookupResponse>(body).map(ProfileLookup::from)
}

// ---------------------------------------------------------------------------
// EnrichmentClient
// ---------------------------------------------------------------------------

/// Client for the `/nonprofit/<ein>` profile endpoint.
pub struct EnrichmentClient {
    client: Client,
    base_url: String,
    api_key: String,
    delay: Duration,
}

impl EnrichmentClient {
    /// Build a client; `api_key` comes from [`EnrichmentApiConfig::api_key`].
    pub fn new(config: &EnrichmentApiConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(LOOKUP_TIMEOUT_SECS))
            .build()
            .map_err(|e| CorpusError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            delay: Duration::from_millis(config.delay_ms),
        })
    }

    /// Look up one organization.
    ///
    /// A non-success status is logged and the body is parsed anyway: the API
    /// answers unknown EINs with an error document that simply carries no
    /// tags. Transport failures and unparsable bodies are errors.
    #[instrument(skip(self))]
    pub async fn lookup(&self, ein: Ein) -> Result<ProfileLookup> {
        let url = format!("{}/nonprofit/{ein}", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("apiKey", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| CorpusError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            warn!(%ein, status = status.as_u16(), "profile lookup returned non-success status");
        }

        let body = response
            .text()
            .await
            .map_err(|e| CorpusError::Network(format!("{url}: failed to read body: {e}")))?;

        parse_body(&body).map_err(|e| {
            CorpusError::Enrichment(format!("EIN {ein}: invalid profile response: {e}"))
        })
    }

    /// The fixed pause between lookups.
    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Record update
// ---------------------------------------------------------------------------

/// Render tags as `Cause Category: <c>, Tag Name: <t>, ` entries in API order.
pub fn format_tags(tags: &[NonprofitTag]) -> String {
    tags.iter()
        .map(|t| format!("Cause Category: {}, Tag Name: {}, ", t.cause_category, t.tag_name))
        .collect()
}

/// Apply a lookup to a record and mark it enriched.
///
/// The website is backfilled only when the record's cell is blank and the
/// response carries at least one tag and a non-blank website. A curated `N/A`
/// is kept.
pub fn apply_lookup(record: &mut OrganizationRecord, lookup: ProfileLookup) {
    record.tags = format_tags(&lookup.tags);

    if !lookup.tags.is_empty() && record.website_is_blank() {
        if let Some(url) = lookup.website_url.filter(|u| !is_unset(u)) {
            debug!(ein = %record.ein, %url, "backfilled website");
            record.website = Some(url);
        }
    }

    record.progress = Progress::Enriched;
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Enrich every record of `input` not yet marked [`Progress::Enriched`] and
/// write the result to `output`.
///
/// If the loop fails, the table as it stands goes to the `.incomplete`
/// checkpoint next to `output`, the error is logged, and `output` is still
/// written. Rerunning on either file picks up where the loop stopped.
#[instrument(skip_all, fields(input = %input.display(), output = %output.display()))]
pub async fn run_enrichment(
    client: &EnrichmentClient,
    input: &Path,
    output: &Path,
    progress: &dyn ProgressReporter,
) -> Result<StageReport> {
    let started = Instant::now();
    let mut table = OrganizationTable::load(input)?;
    let mut counts = StageCounts::default();

    progress.phase("Enriching organizations");
    let outcome = enrich_records(client, &mut table, &mut counts, progress).await;
    let aborted =
        checkpoint_on_failure(Stage::Enrich, &table, &incomplete_path(output), outcome)?;
    table.save(output)?;

    info!(
        enriched = counts.processed,
        skipped = counts.skipped,
        complete = aborted.is_none(),
        "enrichment finished"
    );
    Ok(StageReport::new(
        Stage::Enrich,
        counts,
        table.len(),
        output,
        aborted,
        started,
    ))
}

async fn enrich_records(
    client: &EnrichmentClient,
    table: &mut OrganizationTable,
    counts: &mut StageCounts,
    progress: &dyn ProgressReporter,
) -> Result<()> {
    let total = table.len();

    for (i, record) in table.records.iter_mut().enumerate() {
        if record.progress == Progress::Enriched {
            counts.skipped += 1;
            continue;
        }

        progress.record(i + 1, total, &record.name);
        let lookup = client.lookup(record.ein).await;
        client.pause().await;

        apply_lookup(record, lookup?);
        counts.processed += 1;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SilentProgress;
    use corpus_shared::NOT_AVAILABLE;
    use std::path::PathBuf;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn temp_dir() -> PathBuf {
        let dir =
            std::env::temp_dir().join(format!("npcorpus_enrichment_{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn client(server: &MockServer) -> EnrichmentClient {
        client_with_delay(server, 0)
    }

    fn client_with_delay(server: &MockServer, delay_ms: u64) -> EnrichmentClient {
        let config = EnrichmentApiConfig {
            base_url: server.uri(),
            delay_ms,
            ..EnrichmentApiConfig::default()
        };
        EnrichmentClient::new(&config, "test-key").unwrap()
    }

    fn by_ein(table: &OrganizationTable, ein: u64) -> &OrganizationRecord {
        table
            .records
            .iter()
            .find(|r| r.ein == Ein(ein))
            .expect("record present")
    }

    fn tagged_profile(website: &str) -> serde_json::Value {
        serde_json::json!({
            "data": {
                "nonprofit": {"websiteUrl": website},
                "nonprofitTags": [
                    {"causeCategory": "poverty", "tagName": "hunger"},
                    {"causeCategory": "community", "tagName": "food-security"}
                ]
            }
        })
    }

    async fn mount_profile(server: &MockServer, ein: &str, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(format!("/nonprofit/{ein}")))
            .and(query_param("apiKey", "test-key"))
            .respond_with(response)
            .mount(server)
            .await;
    }

    fn merged_table(eins: &[u64]) -> OrganizationTable {
        OrganizationTable::new(
            eins.iter()
                .map(|&ein| OrganizationRecord::new(Ein(ein), format!("Org {ein}")))
                .collect(),
        )
    }

    #[test]
    fn tags_render_in_api_order() {
        let lookup = parse_lookup(&tagged_profile("https://x.org").to_string()).unwrap();
        assert_eq!(
            format_tags(&lookup.tags),
            "Cause Category: poverty, Tag Name: hunger, \
             Cause Category: community, Tag Name: food-security, "
        );
    }

    #[test]
    fn missing_data_means_no_tags() {
        let lookup = parse_lookup(r#"{"message": "Not found"}"#).unwrap();
        assert!(lookup.tags.is_empty());

        let lookup = parse_lookup(r#"{"data": {"nonprofitTags": null}}"#).unwrap();
        assert!(lookup.tags.is_empty());
    }

    #[test]
    fn tag_without_category_is_malformed() {
        let err = parse_lookup(r#"{"data": {"nonprofitTags": [{"tagName": "x"}]}}"#).unwrap_err();
        assert!(matches!(err, CorpusError::Enrichment(_)));
    }

    #[test]
    fn website_backfill_needs_a_tag() {
        let mut record = OrganizationRecord::new(Ein(1), "A");
        apply_lookup(
            &mut record,
            ProfileLookup {
                tags: vec![],
                website_url: Some("https://a.org".into()),
            },
        );
        assert_eq!(record.website, None);
        assert_eq!(record.tags, "");
        assert_eq!(record.progress, Progress::Enriched);

        let mut record = OrganizationRecord::new(Ein(1), "A");
        record.website = Some("  ".into());
        apply_lookup(&mut record, one_tag_with_website("https://a.org"));
        assert_eq!(record.website.as_deref(), Some("https://a.org"));
    }

    fn one_tag_with_website(website: &str) -> ProfileLookup {
        ProfileLookup {
            tags: vec![NonprofitTag {
                cause_category: "arts".into(),
                tag_name: "music".into(),
            }],
            website_url: Some(website.into()),
        }
    }

    #[test]
    fn curated_sentinel_website_is_kept() {
        let mut record = OrganizationRecord::new(Ein(1), "A");
        record.website = Some(NOT_AVAILABLE.into());

        apply_lookup(&mut record, one_tag_with_website("https://api.org"));
        assert_eq!(record.website.as_deref(), Some(NOT_AVAILABLE));
        assert_eq!(record.tags, "Cause Category: arts, Tag Name: music, ");
    }

    #[test]
    fn existing_website_is_kept() {
        let mut record = OrganizationRecord::new(Ein(1), "A");
        record.website = Some("https://mine.org".into());
        let lookup = parse_lookup(&tagged_profile("https://theirs.org").to_string()).unwrap();

        apply_lookup(&mut record, lookup);
        assert_eq!(record.website.as_deref(), Some("https://mine.org"));
    }

    #[tokio::test]
    async fn enriches_and_resumes_without_requests() {
        let server = MockServer::start().await;
        mount_profile(
            &server,
            "111111111",
            ResponseTemplate::new(200).set_body_json(tagged_profile("https://one.org")),
        )
        .await;
        mount_profile(
            &server,
            "222222222",
            ResponseTemplate::new(404).set_body_json(serde_json::json!({"message": "Not found"})),
        )
        .await;

        let dir = temp_dir();
        let input = dir.join("merged.csv");
        let output = dir.join("enriched.csv");
        merged_table(&[111111111, 222222222]).save(&input).unwrap();

        let client = client(&server);
        let report = run_enrichment(&client, &input, &output, &SilentProgress)
            .await
            .unwrap();
        assert!(report.is_complete());
        assert_eq!(report.counts.processed, 2);

        let enriched = OrganizationTable::load(&output).unwrap();
        let first = by_ein(&enriched, 111111111);
        assert_eq!(first.website(), Some("https://one.org"));
        assert!(first.tags.starts_with("Cause Category: poverty"));
        let second = by_ein(&enriched, 222222222);
        assert_eq!(second.tags, "");
        assert!(enriched.records.iter().all(|r| r.progress == Progress::Enriched));
        assert_eq!(server.received_requests().await.unwrap().len(), 2);

        // A second pass over the stage's own output issues no lookups.
        let rerun = run_enrichment(&client, &output, &output, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(rerun.counts.skipped, 2);
        assert_eq!(rerun.counts.processed, 0);
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
        assert_eq!(OrganizationTable::load(&output).unwrap(), enriched);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn malformed_response_checkpoints_table() {
        let server = MockServer::start().await;
        for ein in ["100000001", "100000002", "100000004"] {
            mount_profile(
                &server,
                ein,
                ResponseTemplate::new(200).set_body_json(tagged_profile("https://x.org")),
            )
            .await;
        }
        mount_profile(
            &server,
            "100000003",
            ResponseTemplate::new(200).set_body_string("{not json"),
        )
        .await;

        let dir = temp_dir();
        let input = dir.join("merged.csv");
        let output = dir.join("enriched.csv");
        merged_table(&[100000001, 100000002, 100000003, 100000004])
            .save(&input)
            .unwrap();

        let report = run_enrichment(&client(&server), &input, &output, &SilentProgress)
            .await
            .unwrap();

        let abort = report.aborted.expect("stage should report the abort");
        assert_eq!(abort.checkpoint, dir.join("enriched.incomplete.csv"));
        assert_eq!(report.counts.processed, 2);

        let checkpoint = OrganizationTable::load(&abort.checkpoint).unwrap();
        assert_eq!(checkpoint.len(), 4);
        let markers: Vec<Progress> = checkpoint.records.iter().map(|r| r.progress).collect();
        assert_eq!(
            markers,
            vec![
                Progress::Enriched,
                Progress::Enriched,
                Progress::Pending,
                Progress::Pending
            ]
        );
        assert_eq!(OrganizationTable::load(&output).unwrap(), checkpoint);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn crawled_but_unenriched_record_is_still_enriched() {
        let server = MockServer::start().await;
        mount_profile(
            &server,
            "333333333",
            ResponseTemplate::new(200).set_body_json(tagged_profile("https://three.org")),
        )
        .await;

        let mut record = OrganizationRecord::new(Ein(333333333), "Org 333333333");
        record.website = Some("https://three.org/".into());
        record.subpages = Some(vec!["https://three.org/about".into()]);

        let dir = temp_dir();
        let input = dir.join("crawled.csv");
        let output = dir.join("enriched.csv");
        OrganizationTable::new(vec![record]).save(&input).unwrap();

        let report = run_enrichment(&client(&server), &input, &output, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(report.counts.processed, 1);
        assert_eq!(report.counts.skipped, 0);

        let enriched = OrganizationTable::load(&output).unwrap();
        let record = by_ein(&enriched, 333333333);
        assert_eq!(record.progress, Progress::Enriched);
        assert!(record.tags.starts_with("Cause Category: poverty"));
        assert_eq!(record.subpages(), ["https://three.org/about"]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn pauses_after_every_lookup_including_failures() {
        const DELAY_MS: u64 = 150;

        let server = MockServer::start().await;
        mount_profile(
            &server,
            "100000001",
            ResponseTemplate::new(200).set_body_json(tagged_profile("https://x.org")),
        )
        .await;
        mount_profile(
            &server,
            "100000002",
            ResponseTemplate::new(404).set_body_json(serde_json::json!({"message": "Not found"})),
        )
        .await;
        mount_profile(
            &server,
            "100000003",
            ResponseTemplate::new(200).set_body_string("{not json"),
        )
        .await;

        let dir = temp_dir();
        let input = dir.join("merged.csv");
        let output = dir.join("enriched.csv");
        merged_table(&[100000001, 100000002, 100000003])
            .save(&input)
            .unwrap();

        let started = Instant::now();
        let report = run_enrichment(
            &client_with_delay(&server, DELAY_MS),
            &input,
            &output,
            &SilentProgress,
        )
        .await
        .unwrap();
        let elapsed = started.elapsed();

        assert!(report.aborted.is_some());
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
        assert!(
            elapsed >= Duration::from_millis(3 * DELAY_MS),
            "expected three pauses, took {elapsed:?}"
        );

        std::fs::remove_dir_all(&dir).ok();
    }
}
