//! CSV-backed record store for the pipeline's stage tables.
//!
//! Every stage reads one table and writes one (or two) tables. The
//! [`OrganizationTable`] type owns the rows while a stage runs; the column
//! names in [`corpus_shared::columns`] are the contract between stage files.
//!
//! **Layout rules:**
//! - Registry columns first (`ein`, `name`, `city`, `state`, `ntee_code`)
//! - Then every other registry attribute, sorted by name
//! - Then the pipeline columns (`Website` … `Subpages Progress`)
//! - Chunk tables append `id`, `chunk_index`, `chunk_text`, `source_url`

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use corpus_shared::{
    CRAWLED_MARKER, ChunkRecord, CorpusError, Ein, OrganizationRecord, Progress, Result, columns,
};
use csv::StringRecord;
use serde::Deserialize;
use tracing::debug;

// ---------------------------------------------------------------------------
// OrganizationTable
// ---------------------------------------------------------------------------

/// Ordered organization rows, one per EIN.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrganizationTable {
    pub records: Vec<OrganizationRecord>,
}

impl OrganizationTable {
    pub fn new(records: Vec<OrganizationRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Read a table written by [`OrganizationTable::save`] (or any CSV with an
    /// `ein` column).
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = open_reader(path)?;
        let headers = reader.headers().map_err(|e| csv_error(path, e))?.clone();
        let layout = ReadLayout::from_headers(&headers, path)?;

        let mut records = Vec::new();
        for (row_index, row) in reader.records().enumerate() {
            let row = row.map_err(|e| csv_error(path, e))?;
            records.push(layout.organization(&row, path, row_index)?);
        }

        debug!(path = %path.display(), rows = records.len(), "loaded table");
        Ok(Self { records })
    }

    /// Write the table, replacing any existing file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let attribute_keys = attribute_keys(self.records.iter());
        let mut writer = open_writer(path)?;

        writer
            .write_record(header(&attribute_keys, false))
            .map_err(|e| csv_error(path, e))?;
        for record in &self.records {
            writer
                .write_record(organization_cells(record, &attribute_keys))
                .map_err(|e| csv_error(path, e))?;
        }
        writer.flush().map_err(|e| CorpusError::io(path, e))?;

        debug!(path = %path.display(), rows = self.records.len(), "saved table");
        Ok(())
    }
}

impl From<Vec<OrganizationRecord>> for OrganizationTable {
    fn from(records: Vec<OrganizationRecord>) -> Self {
        Self::new(records)
    }
}

// ---------------------------------------------------------------------------
// Chunk tables
// ---------------------------------------------------------------------------

/// Write the chunk table: every organization column plus the chunk columns.
pub fn save_chunks(chunks: &[ChunkRecord], path: &Path) -> Result<()> {
    let attribute_keys = attribute_keys(chunks.iter().map(|c| &c.organization));
    let mut writer = open_writer(path)?;

    writer
        .write_record(header(&attribute_keys, true))
        .map_err(|e| csv_error(path, e))?;
    for chunk in chunks {
        let mut cells = organization_cells(&chunk.organization, &attribute_keys);
        cells.extend([
            chunk.id.clone(),
            chunk.chunk_index.to_string(),
            chunk.chunk_text.clone(),
            chunk.source_url.clone(),
        ]);
        writer.write_record(&cells).map_err(|e| csv_error(path, e))?;
    }
    writer.flush().map_err(|e| CorpusError::io(path, e))?;

    debug!(path = %path.display(), rows = chunks.len(), "saved chunk table");
    Ok(())
}

// ---------------------------------------------------------------------------
// Supplemental table
// ---------------------------------------------------------------------------

/// One row of the hand-curated supplemental table. Only these columns are
/// read; anything else in the file is ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SupplementalRow {
    /// EIN as typed by the curator (`12-3456789`, `123456789`, junk).
    #[serde(rename = "EIN", default)]
    pub raw_ein: String,
    #[serde(rename = "Website", default)]
    pub website: Option<String>,
    #[serde(rename = "Activity Area", default)]
    pub activity_area: Option<String>,
    #[serde(rename = "Primary Community Served", default)]
    pub primary_community_served: Option<String>,
    #[serde(rename = "Phone", default)]
    pub phone: Option<String>,
}

impl SupplementalRow {
    pub fn ein(&self) -> Ein {
        Ein::normalize(&self.raw_ein)
    }
}

/// Read the supplemental table.
pub fn load_supplemental(path: &Path) -> Result<Vec<SupplementalRow>> {
    let mut reader = open_reader(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row.map_err(|e| csv_error(path, e))?);
    }
    debug!(path = %path.display(), rows = rows.len(), "loaded supplemental table");
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Checkpoint path written when a stage aborts: `enriched.csv` becomes
/// `enriched.incomplete.csv` in the same directory.
pub fn incomplete_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "table".into());
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "csv".into());
    path.with_file_name(format!("{stem}.incomplete.{extension}"))
}

// ---------------------------------------------------------------------------
// Layout helpers
// ---------------------------------------------------------------------------

/// Column positions discovered from a file's header row.
struct ReadLayout {
    ein: usize,
    name: Option<usize>,
    city: Option<usize>,
    state: Option<usize>,
    ntee_code: Option<usize>,
    website: Option<usize>,
    activity_area: Option<usize>,
    primary_community_served: Option<usize>,
    phone: Option<usize>,
    tags: Option<usize>,
    progress: Option<usize>,
    subpages: Option<usize>,
    subpages_progress: Option<usize>,
    attributes: Vec<(usize, String)>,
}

impl ReadLayout {
    fn from_headers(headers: &StringRecord, path: &Path) -> Result<Self> {
        let find = |name: &str| headers.iter().position(|h| h == name);

        let ein = find(columns::EIN).ok_or_else(|| {
            CorpusError::validation(format!("{}: missing `ein` column", path.display()))
        })?;

        let reserved: BTreeSet<&str> = columns::REGISTRY
            .iter()
            .chain(columns::PIPELINE.iter())
            .chain(columns::CHUNK.iter())
            .copied()
            .collect();
        let attributes = headers
            .iter()
            .enumerate()
            .filter(|(_, h)| !reserved.contains(h))
            .map(|(i, h)| (i, h.to_string()))
            .collect();

        Ok(Self {
            ein,
            name: find(columns::NAME),
            city: find(columns::CITY),
            state: find(columns::STATE),
            ntee_code: find(columns::NTEE_CODE),
            website: find(columns::WEBSITE),
            activity_area: find(columns::ACTIVITY_AREA),
            primary_community_served: find(columns::PRIMARY_COMMUNITY_SERVED),
            phone: find(columns::PHONE),
            tags: find(columns::TAGS),
            progress: find(columns::PROGRESS),
            subpages: find(columns::SUBPAGES),
            subpages_progress: find(columns::SUBPAGES_PROGRESS),
            attributes,
        })
    }

    fn organization(
        &self,
        row: &StringRecord,
        path: &Path,
        row_index: usize,
    ) -> Result<OrganizationRecord> {
        let cell = |idx: Option<usize>| idx.and_then(|i| row.get(i)).unwrap_or("");
        let optional = |idx: Option<usize>| {
            let value = cell(idx);
            (!value.trim().is_empty()).then(|| value.to_string())
        };

        let raw_progress = cell(self.progress);
        let progress = Progress::from_column(raw_progress).ok_or_else(|| {
            CorpusError::validation(format!(
                "{}: row {}: unknown progress marker {raw_progress:?}",
                path.display(),
                row_index + 1
            ))
        })?;

        // A crawled record keeps `Some` even when no links were found.
        let raw_crawled = cell(self.subpages_progress).trim();
        let crawled = match raw_crawled {
            "" => false,
            CRAWLED_MARKER => true,
            other => {
                return Err(CorpusError::validation(format!(
                    "{}: row {}: unknown subpages progress marker {other:?}",
                    path.display(),
                    row_index + 1
                )));
            }
        };
        let joined = cell(self.subpages);
        let subpages = (crawled || !joined.trim().is_empty()).then(|| {
            joined
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect()
        });

        let attributes: BTreeMap<String, String> = self
            .attributes
            .iter()
            .map(|(i, name)| (name.clone(), row.get(*i).unwrap_or("").to_string()))
            .collect();

        Ok(OrganizationRecord {
            ein: Ein::normalize(cell(Some(self.ein))),
            name: cell(self.name).to_string(),
            city: cell(self.city).to_string(),
            state: cell(self.state).to_string(),
            ntee_code: cell(self.ntee_code).to_string(),
            attributes,
            website: optional(self.website),
            activity_area: optional(self.activity_area),
            primary_community_served: optional(self.primary_community_served),
            phone: optional(self.phone),
            tags: cell(self.tags).to_string(),
            progress,
            subpages,
        })
    }
}

/// Union of attribute column names across `records`, sorted.
fn attribute_keys<'a>(records: impl Iterator<Item = &'a OrganizationRecord>) -> Vec<String> {
    let keys: BTreeSet<&String> = records.flat_map(|r| r.attributes.keys()).collect();
    keys.into_iter().cloned().collect()
}

fn header(attribute_keys: &[String], with_chunk_columns: bool) -> Vec<String> {
    let mut header: Vec<String> = columns::REGISTRY.iter().map(|c| c.to_string()).collect();
    header.extend(attribute_keys.iter().cloned());
    header.extend(columns::PIPELINE.iter().map(|c| c.to_string()));
    if with_chunk_columns {
        header.extend(columns::CHUNK.iter().map(|c| c.to_string()));
    }
    header
}

fn organization_cells(record: &OrganizationRecord, attribute_keys: &[String]) -> Vec<String> {
    let mut cells = vec![
        record.ein.to_string(),
        record.name.clone(),
        record.city.clone(),
        record.state.clone(),
        record.ntee_code.clone(),
    ];
    cells.extend(
        attribute_keys
            .iter()
            .map(|k| record.attributes.get(k).cloned().unwrap_or_default()),
    );
    cells.extend([
        record.website.clone().unwrap_or_default(),
        record.activity_area.clone().unwrap_or_default(),
        record.primary_community_served.clone().unwrap_or_default(),
        record.phone.clone().unwrap_or_default(),
        record.tags.clone(),
        record.progress.as_str().to_string(),
        record.subpages().join("\n"),
        if record.is_crawled() { CRAWLED_MARKER } else { "" }.to_string(),
    ]);
    cells
}

fn open_reader(path: &Path) -> Result<csv::Reader<std::fs::File>> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| csv_error(path, e))
}

fn open_writer(path: &Path) -> Result<csv::Writer<std::fs::File>> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| CorpusError::io(parent, e))?;
    }
    csv::Writer::from_path(path).map_err(|e| csv_error(path, e))
}

fn csv_error(path: &Path, err: csv::Error) -> CorpusError {
    let message = err.to_string();
    match err.into_kind() {
        csv::ErrorKind::Io(source) => CorpusError::io(path, source),
        _ => CorpusError::Storage(format!("{}: {message}", path.display())),
    }
}
