//! Stage orchestration: registry → merge → enrich → crawl → chunk.
//!
//! Each stage reads the previous stage's table from the data directory and
//! writes its own. [`run_pipeline`] runs a contiguous range of stages and
//! stops after the first one that had to checkpoint.

use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};

use corpus_crawler::PageFetcher;
use corpus_shared::{AppConfig, CorpusError, Result};
use corpus_text::TextSplitter;

use crate::chunking::run_chunking;
use crate::enrichment::{EnrichmentClient, run_enrichment};
use crate::harvest::run_harvest;
use crate::merge::run_merge;
use crate::stage::{Stage, StageReport};
use crate::subpages::run_crawl;

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when a stage starts its main loop.
    fn phase(&self, name: &str);
    /// Called before each record (or category) is worked on.
    fn record(&self, current: usize, total: usize, detail: &str);
    /// Called when a stage has written its output.
    fn stage_done(&self, report: &StageReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn record(&self, _current: usize, _total: usize, _detail: &str) {}
    fn stage_done(&self, _report: &StageReport) {}
}

/// Which stages to run and where to read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub from: Stage,
    pub to: Stage,
    /// Continue enrich/crawl from their own output file when it exists.
    pub resume: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            from: Stage::Harvest,
            to: Stage::Chunk,
            resume: false,
        }
    }
}

/// Input and output files of one stage, resolved against the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePaths {
    pub input: PathBuf,
    /// Only used by the merge stage.
    pub supplemental: PathBuf,
    pub output: PathBuf,
}

impl StagePaths {
    /// Default files for `stage`.
    ///
    /// With `resume`, the enrich and crawl stages read their own output when
    /// it exists, so records already processed are skipped by their progress
    /// marker.
    pub fn for_stage(config: &AppConfig, stage: Stage, resume: bool) -> Self {
        let files = &config.files;
        let (input, output) = match stage {
            Stage::Harvest => (PathBuf::new(), files.path(&files.harvested)),
            Stage::Merge => (files.path(&files.harvested), files.path(&files.merged)),
            Stage::Enrich => (files.path(&files.merged), files.path(&files.enriched)),
            Stage::Crawl => (files.path(&files.enriched), files.path(&files.crawled)),
            Stage::Chunk => (files.path(&files.crawled), files.path(&files.chunks)),
        };

        let resumable = matches!(stage, Stage::Enrich | Stage::Crawl);
        let input = if resume && resumable && output.exists() {
            output.clone()
        } else {
            input
        };

        Self {
            input,
            supplemental: files.path(&files.supplemental),
            output,
        }
    }
}

/// Run one stage with explicit paths.
#[instrument(skip(config, paths, progress), fields(output = %paths.output.display()))]
pub async fn run_stage(
    config: &AppConfig,
    stage: Stage,
    paths: &StagePaths,
    progress: &dyn ProgressReporter,
) -> Result<StageReport> {
    let report = match stage {
        Stage::Harvest => run_harvest(&config.registry, &paths.output, progress).await?,
        Stage::Merge => run_merge(&paths.input, &paths.supplemental, &paths.output)?,
        Stage::Enrich => {
            let api_key = config.enrichment.api_key()?;
            let client = EnrichmentClient::new(&config.enrichment, api_key)?;
            run_enrichment(&client, &paths.input, &paths.output, progress).await?
        }
        Stage::Crawl => {
            let fetcher = PageFetcher::new(&config.crawl)?;
            run_crawl(&fetcher, &paths.input, &paths.output, progress).await?
        }
        Stage::Chunk => {
            let fetcher = PageFetcher::new(&config.crawl)?;
            let splitter = TextSplitter::new(&config.chunking)?;
            run_chunking(&fetcher, &splitter, &paths.input, &paths.output, progress).await?
        }
    };

    progress.stage_done(&report);
    Ok(report)
}

/// Run stages `options.from ..= options.to` in order.
///
/// A stage that aborts still writes its output, but the stages after it are
/// not run: their input would be incomplete.
#[instrument(skip_all, fields(from = %options.from, to = %options.to))]
pub async fn run_pipeline(
    config: &AppConfig,
    options: &PipelineOptions,
    progress: &dyn ProgressReporter,
) -> Result<Vec<StageReport>> {
    if options.from > options.to {
        return Err(CorpusError::validation(format!(
            "stage range is empty: {} comes after {}",
            options.from, options.to
        )));
    }

    let mut reports = Vec::new();
    for stage in Stage::ALL
        .into_iter()
        .filter(|s| (options.from..=options.to).contains(s))
    {
        let paths = StagePaths::for_stage(config, stage, options.resume);
        if stage != Stage::Harvest {
            require_input(&paths.input)?;
        }

        info!(%stage, input = %paths.input.display(), "starting stage");
        let report = run_stage(config, stage, &paths, progress).await?;
        let complete = report.is_complete();
        reports.push(report);

        if !complete {
            warn!(%stage, "stage aborted; rerun with --resume to continue");
            break;
        }
    }

    Ok(reports)
}

fn require_input(path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(CorpusError::validation(format!(
            "stage input {} does not exist; run the previous stage first",
            path.display()
        )))
    }
}
