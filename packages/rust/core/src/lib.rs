//! Stage implementations and orchestration for the nonprofit corpus pipeline.
//!
//! This crate ties the registry client, the CSV tables, the crawler and the
//! text splitter together into the five resumable stages (harvest, merge,
//! enrich, crawl, chunk) and a runner that executes a range of them.

pub mod chunking;
pub mod enrichment;
pub mod harvest;
pub mod merge;
pub mod pipeline;
pub mod stage;
pub mod subpages;

#[cfg(test)]
mod test_support;

pub use pipeline::{
    PipelineOptions, ProgressReporter, SilentProgress, StagePaths, run_pipeline, run_stage,
};
pub use stage::{Stage, StageAbort, StageCounts, StageReport};
