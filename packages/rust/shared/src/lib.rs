//! Shared types, error model, and configuration for the nonprofit corpus pipeline.
//!
//! This crate is the foundation depended on by all other corpus crates.
//! It provides:
//! - [`CorpusError`]: the unified error type
//! - Domain types ([`OrganizationRecord`], [`ChunkRecord`], [`Ein`], [`Progress`])
//! - Configuration ([`AppConfig`] and its sections, config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ChunkingConfig, CrawlConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE,
    EnrichmentApiConfig, FilesConfig, RegistryConfig, config_dir, config_file_path, init_config,
    load_config, load_config_from,
};
pub use error::{CorpusError, Result};
pub use types::{
    CRAWLED_MARKER, ChunkRecord, Ein, NOT_AVAILABLE, OrganizationRecord, Progress, chunk_id, columns,
    is_unset,
};
