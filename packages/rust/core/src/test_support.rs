//! Readers for stage outputs used by the tests.

use std::path::Path;

use serde::Deserialize;

/// The columns of a chunk row the tests look at.
#[derive(Debug, Deserialize)]
pub struct ChunkRow {
    pub id: String,
    pub chunk_text: String,
    pub source_url: String,
    pub name: String,
}

pub fn read_chunks(path: &Path) -> Vec<ChunkRow> {
    csv::Reader::from_path(path)
        .unwrap()
        .deserialize()
        .map(|row| row.unwrap())
        .collect()
}
