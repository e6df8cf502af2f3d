//! Core domain types for the nonprofit corpus tables.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Sentinel written by the supplemental merge when a matched row lacks a value.
pub const NOT_AVAILABLE: &str = "N/A";

/// Exact CSV column names shared by every stage. Renaming one breaks the
/// join between stage files.
pub mod columns {
    pub const EIN: &str = "ein";
    pub const NAME: &str = "name";
    pub const CITY: &str = "city";
    pub const STATE: &str = "state";
    pub const NTEE_CODE: &str = "ntee_code";
    pub const WEBSITE: &str = "Website";
    pub const ACTIVITY_AREA: &str = "Activity Area";
    pub const PRIMARY_COMMUNITY_SERVED: &str = "Primary Community Served";
    pub const PHONE: &str = "Phone";
    pub const TAGS: &str = "Tags";
    pub const PROGRESS: &str = "Progress";
    pub const SUBPAGES: &str = "Subpages";
    pub const SUBPAGES_PROGRESS: &str = "Subpages Progress";

    pub const CHUNK_ID: &str = "id";
    pub const CHUNK_INDEX: &str = "chunk_index";
    pub const CHUNK_TEXT: &str = "chunk_text";
    pub const SOURCE_URL: &str = "source_url";

    /// Registry columns with a dedicated field, in output order.
    pub const REGISTRY: [&str; 5] = [EIN, NAME, CITY, STATE, NTEE_CODE];

    /// Columns added by the pipeline stages, in output order.
    pub const PIPELINE: [&str; 8] = [
        WEBSITE,
        ACTIVITY_AREA,
        PRIMARY_COMMUNITY_SERVED,
        PHONE,
        TAGS,
        PROGRESS,
        SUBPAGES,
        SUBPAGES_PROGRESS,
    ];

    /// Columns appended to every chunk row.
    pub const CHUNK: [&str; 4] = [CHUNK_ID, CHUNK_INDEX, CHUNK_TEXT, SOURCE_URL];
}

// ---------------------------------------------------------------------------
// Ein
// ---------------------------------------------------------------------------

/// Normalized Employer Identification Number, the join key between stages.
///
/// Malformed identifiers all collapse into [`Ein::MALFORMED`] (`0`). That
/// bucket can collide; it is a known limitation of the source data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Ein(pub u64);

impl Ein {
    /// Bucket for identifiers that are not digits once hyphens are removed.
    pub const MALFORMED: Ein = Ein(0);

    /// Strip hyphens and coerce to digits. Anything else maps to `0`.
    pub fn normalize(raw: &str) -> Self {
        let digits: String = raw.trim().chars().filter(|c| *c != '-').collect();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Self::MALFORMED;
        }
        digits.parse().map(Self).unwrap_or(Self::MALFORMED)
    }

    pub fn is_malformed(&self) -> bool {
        *self == Self::MALFORMED
    }
}

impl From<u64> for Ein {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Ein {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for Ein {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Registry payloads carry numbers, curated tables carry "12-3456789".
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawEin {
            Number(u64),
            Text(String),
        }

        Ok(match RawEin::deserialize(deserializer)? {
            RawEin::Number(n) => Self(n),
            RawEin::Text(s) => Self::normalize(&s),
        })
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Enrichment marker stored in the `Progress` column.
///
/// The crawl stage keeps its own marker ([`CRAWLED_MARKER`]) so crawling a
/// record never hides it from enrichment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Progress {
    #[default]
    Pending,
    Enriched,
}

impl Progress {
    /// Value stored in the `Progress` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "",
            Self::Enriched => "Supplemented from Every.org",
        }
    }

    /// Parse a `Progress` column value. Returns `None` for unknown markers.
    pub fn from_column(value: &str) -> Option<Self> {
        match value.trim() {
            "" => Some(Self::Pending),
            "Supplemented from Every.org" => Some(Self::Enriched),
            _ => None,
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Value of the `Subpages Progress` column once a record has been crawled.
pub const CRAWLED_MARKER: &str = "Progressed";

// ---------------------------------------------------------------------------
// OrganizationRecord
// ---------------------------------------------------------------------------

/// One nonprofit row as it moves through the stage tables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrganizationRecord {
    pub ein: Ein,
    pub name: String,
    pub city: String,
    pub state: String,
    pub ntee_code: String,
    /// Remaining registry columns, carried through untouched.
    pub attributes: BTreeMap<String, String>,
    pub website: Option<String>,
    pub activity_area: Option<String>,
    pub primary_community_served: Option<String>,
    pub phone: Option<String>,
    /// `Cause Category: <c>, Tag Name: <t>, ` entries in API order.
    pub tags: String,
    pub progress: Progress,
    /// Same-site URLs found on the website; `None` until crawled, empty when
    /// the homepage had no same-site links.
    pub subpages: Option<Vec<String>>,
}

impl OrganizationRecord {
    pub fn new(ein: Ein, name: impl Into<String>) -> Self {
        Self {
            ein,
            name: name.into(),
            ..Self::default()
        }
    }

    /// The usable website URL, if any. Blank cells and the `N/A` sentinel
    /// count as no website.
    pub fn website(&self) -> Option<&str> {
        self.website
            .as_deref()
            .map(str::trim)
            .filter(|w| !is_unset(w))
    }

    /// Subpages discovered by the crawl stage (empty when not crawled).
    pub fn subpages(&self) -> &[String] {
        self.subpages.as_deref().unwrap_or(&[])
    }

    /// Whether the crawl stage has recorded this organization's subpages.
    pub fn is_crawled(&self) -> bool {
        self.subpages.is_some()
    }

    /// Whether the raw website cell is missing or whitespace. The `N/A`
    /// sentinel is a curated value and does not count as blank.
    pub fn website_is_blank(&self) -> bool {
        self.website.as_deref().is_none_or(|w| w.trim().is_empty())
    }
}

/// Whether a cell value means "nothing here".
pub fn is_unset(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value == NOT_AVAILABLE
}

// ---------------------------------------------------------------------------
// ChunkRecord
// ---------------------------------------------------------------------------

/// One text segment of one subpage, ready for retrieval indexing.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    /// `{ein}_{subpage_index}_{chunk_index}`.
    pub id: String,
    pub chunk_index: usize,
    pub chunk_text: String,
    pub source_url: String,
    /// Snapshot of the parent organization row.
    pub organization: OrganizationRecord,
}

impl ChunkRecord {
    pub fn new(
        parent: &OrganizationRecord,
        subpage_index: usize,
        chunk_index: usize,
        chunk_text: impl Into<String>,
        source_url: impl Into<String>,
    ) -> Self {
        Self {
            id: chunk_id(parent.ein, subpage_index, chunk_index),
            chunk_index,
            chunk_text: chunk_text.into(),
            source_url: source_url.into(),
            organization: parent.clone(),
        }
    }
}

/// Composite chunk identifier.
pub fn chunk_id(ein: Ein, subpage_index: usize, chunk_index: usize) -> String {
    format!("{ein}_{subpage_index}_{chunk_index}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ein_normalization() {
        assert_eq!(Ein::normalize("12-3456789"), Ein(123456789));
        assert_eq!(Ein::normalize("123456789"), Ein(123456789));
        assert_eq!(Ein::from(123456789), Ein(123456789));
        assert_eq!(Ein::normalize("ABC"), Ein::MALFORMED);
        assert_eq!(Ein::normalize(""), Ein::MALFORMED);
        assert_eq!(Ein::normalize("41-0000000.0"), Ein::MALFORMED);
    }

    #[test]
    fn ein_deserializes_from_number_or_string() {
        let from_number: Ein = serde_json::from_str("123456789").expect("number");
        let from_string: Ein = serde_json::from_str(r#""12-3456789""#).expect("string");
        let malformed: Ein = serde_json::from_str(r#""ABC""#).expect("malformed");
        assert_eq!(from_number, Ein(123456789));
        assert_eq!(from_string, Ein(123456789));
        assert!(malformed.is_malformed());
    }

    #[test]
    fn progress_markers_roundtrip() {
        for p in [Progress::Pending, Progress::Enriched] {
            assert_eq!(Progress::from_column(p.as_str()), Some(p));
        }
        assert_eq!(Progress::from_column(CRAWLED_MARKER), None);
        assert_eq!(Progress::from_column("Subpages Crawled"), None);
    }

    #[test]
    fn website_treats_sentinel_as_missing() {
        let mut org = OrganizationRecord::new(Ein(1), "Example Org");
        assert_eq!(org.website(), None);

        org.website = Some("  ".into());
        assert_eq!(org.website(), None);

        org.website = Some(NOT_AVAILABLE.into());
        assert_eq!(org.website(), None);

        org.website = Some(" https://example.org/ ".into());
        assert_eq!(org.website(), Some("https://example.org/"));
    }

    #[test]
    fn sentinel_website_is_not_blank() {
        let mut org = OrganizationRecord::new(Ein(1), "Example Org");
        assert!(org.website_is_blank());

        org.website = Some(" \t".into());
        assert!(org.website_is_blank());

        org.website = Some(NOT_AVAILABLE.into());
        assert!(!org.website_is_blank());
    }

    #[test]
    fn crawl_state_follows_subpages() {
        let mut org = OrganizationRecord::new(Ein(1), "Example Org");
        assert!(!org.is_crawled());

        org.subpages = Some(vec![]);
        assert!(org.is_crawled());
        assert!(org.subpages().is_empty());
    }

    #[test]
    fn chunk_record_copies_parent() {
        let mut org = OrganizationRecord::new(Ein(42), "Food Shelf");
        org.subpages = Some(vec!["https://food.org/about".into()]);

        let chunk = ChunkRecord::new(&org, 0, 3, "we feed people", "https://food.org/about");
        assert_eq!(chunk.id, "42_0_3");
        assert_eq!(chunk.chunk_index, 3);
        assert_eq!(chunk.organization, org);
    }
}
