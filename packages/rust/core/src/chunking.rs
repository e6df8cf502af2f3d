//! Chunk stage: fetch every subpage, extract its text and cut it into
//! retrieval-sized segments.

use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use corpus_crawler::PageSource;
use corpus_shared::{ChunkRecord, Result};
use corpus_storage::{OrganizationTable, incomplete_path, save_chunks};
use corpus_text::{TextSplitter, visible_text};

use crate::pipeline::ProgressReporter;
use crate::stage::{Stage, StageCounts, StageReport, checkpoint_on_failure, is_recoverable};

/// Build the chunk table from the subpages recorded by the crawl stage.
///
/// Each chunk row carries a copy of its organization's columns plus
/// `id = {ein}_{subpage_index}_{chunk_index}`, where `subpage_index` counts
/// the organization's successfully fetched subpages. A subpage that cannot be
/// fetched contributes no chunks and does not use up an index.
///
/// If the loop fails, the organization table is checkpointed to the
/// `.incomplete` file next to `output`, and the chunks gathered so far are
/// still written to `output`.
#[instrument(skip_all, fields(input = %input.display(), output = %output.display()))]
pub async fn run_chunking<S: PageSource>(
    source: &S,
    splitter: &TextSplitter,
    input: &Path,
    output: &Path,
    progress: &dyn ProgressReporter,
) -> Result<StageReport> {
    let started = Instant::now();
    let table = OrganizationTable::load(input)?;
    let mut chunks = Vec::new();
    let mut counts = StageCounts::default();

    progress.phase("Chunking subpages");
    let outcome = chunk_records(source, splitter, &table, &mut chunks, &mut counts, progress).await;
    let aborted =
        checkpoint_on_failure(Stage::Chunk, &table, &incomplete_path(output), outcome)?;
    save_chunks(&chunks, output)?;

    info!(
        organizations = counts.processed,
        failed_pages = counts.failed,
        chunks = chunks.len(),
        complete = aborted.is_none(),
        "chunking finished"
    );
    Ok(StageReport::new(
        Stage::Chunk,
        counts,
        chunks.len(),
        output,
        aborted,
        started,
    ))
}

async fn chunk_records<S: PageSource>(
    source: &S,
    splitter: &TextSplitter,
    table: &OrganizationTable,
    chunks: &mut Vec<ChunkRecord>,
    counts: &mut StageCounts,
    progress: &dyn ProgressReporter,
) -> Result<()> {
    let total = table.len();

    for (i, record) in table.records.iter().enumerate() {
        if record.subpages().is_empty() {
            continue;
        }
        progress.record(i + 1, total, &record.name);

        let mut subpage_index = 0;
        for url in record.subpages() {
            let page = match source.fetch_page(url).await {
                Ok(page) => page,
                Err(e) if is_recoverable(&e) => {
                    warn!(ein = %record.ein, %url, error = %e, "subpage unavailable, skipping");
                    counts.failed += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let segments = splitter.split(&visible_text(&page.html));
            debug!(ein = %record.ein, %url, segments = segments.len(), "chunked subpage");

            chunks.extend(
                segments
                    .into_iter()
                    .enumerate()
                    .map(|(chunk_index, text)| {
                        ChunkRecord::new(record, subpage_index, chunk_index, text, url.clone())
                    }),
            );
            subpage_index += 1;
        }
        counts.processed += 1;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SilentProgress;
    use corpus_crawler::FetchedPage;
    use corpus_shared::{ChunkingConfig, CorpusError, Ein, OrganizationRecord, Progress};
    use crate::test_support::read_chunks;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("npcorpus_chunk_{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// In-memory site: known URLs return their HTML, `fatal` URLs return a
    /// non-network error, everything else is a network failure.
    #[derive(Default)]
    struct FakeSite {
        pages: HashMap<String, String>,
        fatal: Vec<String>,
    }

    impl FakeSite {
        fn page(mut self, url: &str, html: &str) -> Self {
            self.pages.insert(url.into(), html.into());
            self
        }
    }

    impl PageSource for FakeSite {
        async fn fetch_page(&self, url: &str) -> Result<FetchedPage> {
            if self.fatal.iter().any(|f| f == url) {
                return Err(CorpusError::Storage("disk full".into()));
            }
            let html = self
                .pages
                .get(url)
                .ok_or_else(|| CorpusError::Network(format!("{url}: HTTP 404")))?;
            let parsed = url::Url::parse(url).map_err(|e| CorpusError::Network(e.to_string()))?;
            Ok(FetchedPage {
                final_url: parsed,
                html: html.clone(),
            })
        }
    }

    fn crawled(ein: u64, subpages: &[&str]) -> OrganizationRecord {
        let mut record = OrganizationRecord::new(Ein(ein), format!("Org {ein}"));
        record.website = Some("https://x.org/".into());
        record.progress = Progress::Enriched;
        record.subpages = Some(subpages.iter().map(|s| s.to_string()).collect());
        record
    }

    fn splitter() -> TextSplitter {
        TextSplitter::new(&ChunkingConfig {
            chunk_size: 12,
            chunk_overlap: 0,
        })
        .unwrap()
    }

    /// Three paragraphs, each short enough to be its own segment.
    const THREE_PARAGRAPHS: &str =
        "<p>First part.</p><p>Second one.</p><p>Third bit.</p>";

    #[tokio::test]
    async fn ids_follow_subpage_and_chunk_positions() {
        let site = FakeSite::default()
            .page("https://x.org/about", THREE_PARAGRAPHS)
            .page("https://x.org/team", THREE_PARAGRAPHS);

        let dir = temp_dir();
        let input = dir.join("crawled.csv");
        let output = dir.join("chunks.csv");
        OrganizationTable::new(vec![crawled(
            411234567,
            &["https://x.org/about", "https://x.org/team"],
        )])
        .save(&input)
        .unwrap();

        let report = run_chunking(&site, &splitter(), &input, &output, &SilentProgress)
            .await
            .unwrap();
        assert!(report.is_complete());
        assert_eq!(report.rows_written, 6);

        let chunks = read_chunks(&output);
        let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "411234567_0_0",
                "411234567_0_1",
                "411234567_0_2",
                "411234567_1_0",
                "411234567_1_1",
                "411234567_1_2",
            ]
        );
        assert_eq!(chunks[1].chunk_text, "Second one.");
        assert_eq!(chunks[4].source_url, "https://x.org/team");
        assert_eq!(chunks[4].name, "Org 411234567");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn failed_subpage_does_not_use_an_index() {
        let site = FakeSite::default().page("https://x.org/team", "<p>Hello there.</p>");

        let dir = temp_dir();
        let input = dir.join("crawled.csv");
        let output = dir.join("chunks.csv");
        OrganizationTable::new(vec![
            crawled(1, &["https://x.org/missing", "https://x.org/team"]),
            crawled(2, &[]),
        ])
        .save(&input)
        .unwrap();

        let report = run_chunking(&site, &splitter(), &input, &output, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(report.counts.failed, 1);
        assert_eq!(report.counts.processed, 1);

        let chunks = read_chunks(&output);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, "1_0_0");
        assert_eq!(chunks[0].source_url, "https://x.org/team");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn fatal_error_keeps_gathered_chunks() {
        let site = FakeSite {
            fatal: vec!["https://x.org/broken".into()],
            ..FakeSite::default()
        }
        .page("https://x.org/about", "<p>Kept text.</p>");

        let dir = temp_dir();
        let input = dir.join("crawled.csv");
        let output = dir.join("chunks.csv");
        let table = OrganizationTable::new(vec![
            crawled(1, &["https://x.org/about"]),
            crawled(2, &["https://x.org/broken"]),
        ]);
        table.save(&input).unwrap();

        let report = run_chunking(&site, &splitter(), &input, &output, &SilentProgress)
            .await
            .unwrap();
        let abort = report.aborted.expect("chunking should abort");

        assert_eq!(abort.checkpoint, dir.join("chunks.incomplete.csv"));
        assert_eq!(OrganizationTable::load(&abort.checkpoint).unwrap(), table);

        let chunks = read_chunks(&output);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_text, "Kept text.");

        std::fs::remove_dir_all(&dir).ok();
    }
}
