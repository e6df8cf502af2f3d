//! Crawl stage: discover each organization's same-site subpages.

use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use corpus_crawler::{PageSource, same_site_links};
use corpus_shared::Result;
use corpus_storage::{OrganizationTable, incomplete_path};

use crate::pipeline::ProgressReporter;
use crate::stage::{Stage, StageCounts, StageReport, checkpoint_on_failure, is_recoverable};

/// Fetch the homepage of every organization with a website and record the
/// same-site links found on it.
///
/// Records without a usable website are left alone, as are records that
/// already carry a subpage list. Crawling sets only `Subpages` and its own
/// `Subpages Progress` marker, so the enrichment marker is untouched. A
/// homepage that cannot be fetched is logged and skipped; the record stays
/// uncrawled so a rerun tries it again.
#[instrument(skip_all, fields(input = %input.display(), output = %output.display()))]
pub async fn run_crawl<S: PageSource>(
    source: &S,
    input: &Path,
    output: &Path,
    progress: &dyn ProgressReporter,
) -> Result<StageReport> {
    let started = Instant::now();
    let mut table = OrganizationTable::load(input)?;
    let mut counts = StageCounts::default();

    progress.phase("Crawling websites");
    let outcome = crawl_records(source, &mut table, &mut counts, progress).await;
    let aborted =
        checkpoint_on_failure(Stage::Crawl, &table, &incomplete_path(output), outcome)?;
    table.save(output)?;

    info!(
        crawled = counts.processed,
        skipped = counts.skipped,
        failed = counts.failed,
        complete = aborted.is_none(),
        "crawl finished"
    );
    Ok(StageReport::new(
        Stage::Crawl,
        counts,
        table.len(),
        output,
        aborted,
        started,
    ))
}

async fn crawl_records<S: PageSource>(
    source: &S,
    table: &mut OrganizationTable,
    counts: &mut StageCounts,
    progress: &dyn ProgressReporter,
) -> Result<()> {
    let total = table.len();

    for (i, record) in table.records.iter_mut().enumerate() {
        if record.is_crawled() {
            counts.skipped += 1;
            continue;
        }
        let Some(website) = record.website().map(str::to_string) else {
            continue;
        };

        progress.record(i + 1, total, &website);
        let page = match source.fetch_page(&website).await {
            Ok(page) => page,
            Err(e) if is_recoverable(&e) => {
                warn!(ein = %record.ein, url = %website, error = %e, "homepage unavailable, skipping");
                counts.failed += 1;
                continue;
            }
            Err(e) => return Err(e),
        };

        if page.final_url.as_str() != website {
            debug!(ein = %record.ein, from = %website, to = %page.final_url, "homepage redirected");
        }
        let links = same_site_links(&page.html, &website);
        debug!(ein = %record.ein, links = links.len(), "discovered subpages");

        record.subpages = Some(links);
        counts.processed += 1;
    }

    Ok(())
}
