//! Harvest stage: registry search results for every configured category.

use std::path::Path;
use std::time::Instant;

use tracing::{info, instrument};

use corpus_registry::RegistryClient;
use corpus_shared::{OrganizationRecord, RegistryConfig, Result};
use corpus_storage::OrganizationTable;

use crate::pipeline::ProgressReporter;
use crate::stage::{Stage, StageCounts, StageReport};

/// Harvest every category in `config.categories` and write the base table.
///
/// Categories are concatenated in configured order without deduplication.
/// Any registry failure aborts the stage before anything is written.
#[instrument(skip_all, fields(region = %config.region, output = %output.display()))]
pub async fn run_harvest(
    config: &RegistryConfig,
    output: &Path,
    progress: &dyn ProgressReporter,
) -> Result<StageReport> {
    let started = Instant::now();
    let client = RegistryClient::new(config)?;

    progress.phase("Harvesting registry");
    let table = harvest_table(&client, &config.categories, progress).await?;
    table.save(output)?;

    let counts = StageCounts {
        processed: config.categories.len(),
        ..StageCounts::default()
    };
    info!(
        categories = counts.processed,
        organizations = table.len(),
        "harvest complete"
    );
    Ok(StageReport::new(
        Stage::Harvest,
        counts,
        table.len(),
        output,
        None,
        started,
    ))
}

async fn harvest_table(
    client: &RegistryClient,
    categories: &[u32],
    progress: &dyn ProgressReporter,
) -> Result<OrganizationTable> {
    let total = categories.len();
    let mut records = Vec::new();

    for (i, &category) in categories.iter().enumerate() {
        progress.record(i + 1, total, &format!("NTEE category {category}"));
        let organizations = client.harvest_category(category).await?;
        records.extend(organizations.into_iter().map(OrganizationRecord::from));
    }

    Ok(OrganizationTable::new(records))
}
