//! Application configuration for the corpus pipeline.
//!
//! User config lives at `~/.npcorpus/npcorpus.toml`, or at an explicit path
//! given on the command line. Every section is optional and falls back to the
//! defaults below.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CorpusError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "npcorpus.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".npcorpus";

/// Default segment length, in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Default number of characters shared by consecutive segments.
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

// ---------------------------------------------------------------------------
// Config structs (matching npcorpus.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub enrichment: EnrichmentApiConfig,

    #[serde(default)]
    pub crawl: CrawlConfig,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub files: FilesConfig,
}

/// `[registry]` section: the nonprofit search API being harvested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// API root; `/search.json` is appended.
    #[serde(default = "default_registry_url")]
    pub base_url: String,

    /// Two-letter state filter.
    #[serde(default = "default_region")]
    pub region: String,

    /// NTEE major category codes to walk, in order.
    #[serde(default = "default_categories")]
    pub categories: Vec<u32>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: default_registry_url(),
            region: default_region(),
            categories: default_categories(),
        }
    }
}

fn default_registry_url() -> String {
    "https://projects.propublica.org/nonprofits/api/v2".into()
}
fn default_region() -> String {
    "MN".into()
}
fn default_categories() -> Vec<u32> {
    (1..=10).collect()
}

/// `[enrichment]` section: the per-organization tag API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentApiConfig {
    /// API root; `/nonprofit/<ein>` is appended.
    #[serde(default = "default_enrichment_url")]
    pub base_url: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Pause after every lookup, in milliseconds.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl Default for EnrichmentApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_enrichment_url(),
            api_key_env: default_api_key_env(),
            delay_ms: default_delay_ms(),
        }
    }
}

fn default_enrichment_url() -> String {
    "https://partners.every.org/v0.2".into()
}
fn default_api_key_env() -> String {
    "EVERYORG_API_KEY".into()
}
fn default_delay_ms() -> u64 {
    800
}

impl EnrichmentApiConfig {
    /// Read the API key from the configured env var.
    pub fn api_key(&self) -> Result<String> {
        let var_name = &self.api_key_env;
        match std::env::var(var_name) {
            Ok(val) if !val.trim().is_empty() => Ok(val),
            _ => Err(CorpusError::config(format!(
                "enrichment API key not found. Set the {var_name} environment variable."
            ))),
        }
    }
}

/// `[crawl]` section: website and subpage fetching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum redirects followed per request.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Permit loopback/private addresses. Off outside of local testing.
    #[serde(default)]
    pub allow_private_hosts: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_redirects: default_max_redirects(),
            allow_private_hosts: false,
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_max_redirects() -> usize {
    5
}

/// `[chunking]` section: text segmentation for the chunk table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

impl ChunkingConfig {
    /// Reject settings the splitter cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(CorpusError::validation("chunk_size must be greater than 0"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(CorpusError::validation(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// `[files]` section: names of the stage tables inside `data_dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_harvested")]
    pub harvested: String,
    #[serde(default = "default_supplemental")]
    pub supplemental: String,
    #[serde(default = "default_merged")]
    pub merged: String,
    #[serde(default = "default_enriched")]
    pub enriched: String,
    #[serde(default = "default_crawled")]
    pub crawled: String,
    #[serde(default = "default_chunks")]
    pub chunks: String,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            harvested: default_harvested(),
            supplemental: default_supplemental(),
            merged: default_merged(),
            enriched: default_enriched(),
            crawled: default_crawled(),
            chunks: default_chunks(),
        }
    }
}

fn default_data_dir() -> String {
    "data".into()
}
fn default_harvested() -> String {
    "harvested.csv".into()
}
fn default_supplemental() -> String {
    "supplemental.csv".into()
}
fn default_merged() -> String {
    "merged.csv".into()
}
fn default_enriched() -> String {
    "enriched.csv".into()
}
fn default_crawled() -> String {
    "crawled.csv".into()
}
fn default_chunks() -> String {
    "chunks.csv".into()
}

impl FilesConfig {
    /// Resolve a table file name against `data_dir`.
    pub fn path(&self, file_name: &str) -> PathBuf {
        Path::new(&self.data_dir).join(file_name)
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.npcorpus/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| CorpusError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.npcorpus/npcorpus.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| CorpusError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        CorpusError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.chunking.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| CorpusError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| CorpusError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| CorpusError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
