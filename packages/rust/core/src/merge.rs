//! Merge stage: join curated supplemental data onto the harvested table.
//!
//! The join is a left join on EIN: harvested organizations without a
//! supplemental row pass through unchanged, and supplemental rows that match
//! no organization are dropped. For every match the four curated fields are
//! overwritten; blank curated cells become the `N/A` sentinel so later stages
//! can tell "curated, nothing there" from "never curated".

use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use corpus_shared::{Ein, NOT_AVAILABLE, OrganizationRecord, Result};
use corpus_storage::{OrganizationTable, SupplementalRow, load_supplemental};

use crate::stage::{Stage, StageCounts, StageReport};

/// Outcome counters of [`merge_supplemental`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Supplemental rows joined onto an organization.
    pub matched: usize,
    /// Supplemental rows with no harvested counterpart.
    pub unmatched: usize,
    /// Supplemental rows whose EIN did not parse. They join the `0` bucket
    /// like any other EIN.
    pub malformed: usize,
    /// Harvested rows folded away because their EIN appeared earlier.
    pub duplicates: usize,
}

/// Join `supplements` onto `base`.
///
/// Harvested duplicates collapse to one row per EIN, kept at the position of
/// the first occurrence with the values of the last. When several
/// supplemental rows share an EIN the last one wins. Malformed supplemental
/// EINs normalize to `0` and join a harvested row in that bucket, if any. The
/// result keeps harvested order.
pub fn merge_supplemental(
    base: OrganizationTable,
    supplements: &[SupplementalRow],
) -> (OrganizationTable, MergeStats) {
    let mut stats = MergeStats::default();
    let mut rows: Vec<OrganizationRecord> = Vec::with_capacity(base.len());
    let mut position: HashMap<Ein, usize> = HashMap::new();

    for record in base.records {
        match position.get(&record.ein) {
            Some(&idx) => {
                rows[idx] = record;
                stats.duplicates += 1;
            }
            None => {
                position.insert(record.ein, rows.len());
                rows.push(record);
            }
        }
    }

    for supplement in supplements {
        let ein = supplement.ein();
        if ein.is_malformed() {
            debug!(raw = %supplement.raw_ein, "supplemental EIN malformed, joining bucket 0");
            stats.malformed += 1;
        }

        let Some(&idx) = position.get(&ein) else {
            debug!(%ein, "supplemental row matches no organization");
            stats.unmatched += 1;
            continue;
        };

        apply_supplement(&mut rows[idx], supplement);
        stats.matched += 1;
    }

    (OrganizationTable::new(rows), stats)
}

fn apply_supplement(record: &mut OrganizationRecord, supplement: &SupplementalRow) {
    record.website = Some(curated(&supplement.website));
    record.activity_area = Some(curated(&supplement.activity_area));
    record.primary_community_served = Some(curated(&supplement.primary_community_served));
    record.phone = Some(curated(&supplement.phone));
}

/// A curated cell, or the sentinel when the curator left it blank.
fn curated(value: &Option<String>) -> String {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => NOT_AVAILABLE.to_string(),
    }
}

/// Read the harvested and supplemental tables, join them and write the result.
#[instrument(skip_all, fields(base = %base_path.display(), output = %output.display()))]
pub fn run_merge(
    base_path: &Path,
    supplemental_path: &Path,
    output: &Path,
) -> Result<StageReport> {
    let started = Instant::now();
    let base = OrganizationTable::load(base_path)?;
    let supplements = load_supplemental(supplemental_path)?;

    let harvested = base.len();
    let (merged, stats) = merge_supplemental(base, &supplements);
    merged.save(output)?;

    if stats.malformed > 0 {
        warn!(rows = stats.malformed, "supplemental rows with malformed EIN joined bucket 0");
    }
    info!(
        harvested,
        supplemental = supplements.len(),
        matched = stats.matched,
        unmatched = stats.unmatched,
        duplicates = stats.duplicates,
        rows = merged.len(),
        "merge complete"
    );

    let counts = StageCounts {
        processed: stats.matched,
        skipped: stats.unmatched,
        failed: 0,
    };
    Ok(StageReport::new(
        Stage::Merge,
        counts,
        merged.len(),
        output,
        None,
        started,
    ))
}
