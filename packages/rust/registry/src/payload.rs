//! Wire types for the registry search endpoint.

use std::collections::BTreeMap;

use corpus_shared::{Ein, OrganizationRecord};
use serde::Deserialize;
use serde_json::Value;

/// One page of `search.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchPage {
    /// Total number of pages for this query. `0` when nothing matched.
    #[serde(default)]
    pub num_pages: u32,
    #[serde(default)]
    pub organizations: Vec<RegistryOrganization>,
}

/// An organization exactly as the registry reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryOrganization {
    pub ein: Ein,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub ntee_code: Option<String>,
    /// Every other field (`strein`, `sub_name`, `score`, ...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl From<RegistryOrganization> for OrganizationRecord {
    fn from(org: RegistryOrganization) -> Self {
        let attributes = org
            .extra
            .into_iter()
            .map(|(key, value)| (key, cell_text(value)))
            .collect();

        Self {
            ein: org.ein,
            name: org.name.unwrap_or_default(),
            city: org.city.unwrap_or_default(),
            state: org.state.unwrap_or_default(),
            ntee_code: org.ntee_code.unwrap_or_default(),
            attributes,
            ..Self::default()
        }
    }
}

/// Flatten a JSON value into a CSV cell.
fn cell_text(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    }
}
