//! Shared stage bookkeeping: identities, counters, reports and checkpoints.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};

use tracing::error;

use corpus_shared::{CorpusError, Result};
use corpus_storage::OrganizationTable;

/// The pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Harvest,
    Merge,
    Enrich,
    Crawl,
    Chunk,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Harvest,
        Stage::Merge,
        Stage::Enrich,
        Stage::Crawl,
        Stage::Chunk,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Harvest => "harvest",
            Self::Merge => "merge",
            Self::Enrich => "enrich",
            Self::Crawl => "crawl",
            Self::Chunk => "chunk",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!("unknown stage {s:?} (expected harvest, merge, enrich, crawl or chunk)")
            })
    }
}

/// Per-record counters a stage keeps while it runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageCounts {
    /// Records (or categories, for the harvest) the stage did work for.
    pub processed: usize,
    /// Records passed over because their progress marker showed the work done.
    pub skipped: usize,
    /// Records or pages abandoned after a recoverable network failure.
    pub failed: usize,
}

/// What a finished stage did.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: Stage,
    pub counts: StageCounts,
    /// Rows in the stage's output table.
    pub rows_written: usize,
    pub output: PathBuf,
    /// Set when the stage loop hit a fatal error and wrote a checkpoint.
    pub aborted: Option<StageAbort>,
    pub elapsed: Duration,
}

/// A stage loop that stopped early.
#[derive(Debug, Clone)]
pub struct StageAbort {
    pub error: String,
    pub checkpoint: PathBuf,
}

impl StageReport {
    pub(crate) fn new(
        stage: Stage,
        counts: StageCounts,
        rows_written: usize,
        output: &Path,
        aborted: Option<StageAbort>,
        started: Instant,
    ) -> Self {
        Self {
            stage,
            counts,
            rows_written,
            output: output.to_path_buf(),
            aborted,
            elapsed: started.elapsed(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.aborted.is_none()
    }
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} processed, {} skipped, {} failed, {} rows -> {} ({:.1}s)",
            self.stage,
            self.counts.processed,
            self.counts.skipped,
            self.counts.failed,
            self.rows_written,
            self.output.display(),
            self.elapsed.as_secs_f64()
        )?;
        if let Some(abort) = &self.aborted {
            write!(
                f,
                " [aborted: {}; checkpoint {}]",
                abort.error,
                abort.checkpoint.display()
            )?;
        }
        Ok(())
    }
}

/// Whether a stage loop may log `err` and move on to the next record.
///
/// Only network failures are per-record; everything else stops the loop.
pub(crate) fn is_recoverable(err: &CorpusError) -> bool {
    matches!(err, CorpusError::Network(_))
}

/// Turn the outcome of a stage loop into an optional abort.
///
/// On failure the table, as it stands, is written to `checkpoint` before the
/// caller goes on to write its normal output. Failing to write the checkpoint
/// is itself fatal.
pub(crate) fn checkpoint_on_failure(
    stage: Stage,
    table: &OrganizationTable,
    checkpoint: &Path,
    outcome: Result<()>,
) -> Result<Option<StageAbort>> {
    let Err(err) = outcome else {
        return Ok(None);
    };

    table.save(checkpoint)?;
    error!(
        %stage,
        error = %err,
        checkpoint = %checkpoint.display(),
        "stage aborted, checkpoint written"
    );

    Ok(Some(StageAbort {
        error: err.to_string(),
        checkpoint: checkpoint.to_path_buf(),
    }))
}
