//! Record types flowing through the pipeline.

use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::pipeline::enrich::is_resolved_label;
use crate::traits::client::Row;

lazy_static! {
    /// Identifiers that are safe to splice into a query template.
    static ref SAFE_ID: Regex = Regex::new(r"^[A-Za-z0-9_:\-]+$").unwrap();
}

/// Label used when a batch row carries no display label.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// One primary-entity stub returned by a batch query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub external_id: String,
    pub display_label: String,
}

impl RawRecord {
    pub fn new(external_id: impl Into<String>, display_label: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            display_label: display_label.into(),
        }
    }

    /// Build a record from a result row.
    ///
    /// The identifier variable may hold a full entity URI; only its last path
    /// segment is kept. Rows without a usable identifier yield `None`.
    pub fn from_row(row: &Row, id_variable: &str, label_variable: &str) -> Option<Self> {
        let raw = row.get(id_variable)?.trim();
        let external_id = short_id(raw)?;
        if !SAFE_ID.is_match(&external_id) {
            tracing::debug!(id = %raw, "skipping row with unsafe identifier");
            return None;
        }

        let display_label = row
            .get(label_variable)
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .unwrap_or(UNKNOWN_LABEL)
            .to_string();

        Some(Self {
            external_id,
            display_label,
        })
    }
}

fn short_id(raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    match url::Url::parse(raw) {
        Ok(uri) => uri
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        Err(_) => Some(raw.to_string()),
    }
}

/// A raw record plus everything the enrichment step learned about it.
///
/// List attributes are insertion-ordered and never hold unresolved identifiers.
/// Scalars are first-write-wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub id: String,
    pub label: String,

    #[serde(default)]
    pub attributes: IndexMap<String, Vec<String>>,

    #[serde(default)]
    pub scalars: IndexMap<String, String>,

    /// Detail queries that gave up; their attributes are empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub incomplete: Vec<String>,
}

impl EnrichedRecord {
    /// Start an enriched record with no attributes.
    pub fn from_raw(raw: &RawRecord) -> Self {
        Self {
            id: raw.external_id.clone(),
            label: raw.display_label.clone(),
            attributes: IndexMap::new(),
            scalars: IndexMap::new(),
            incomplete: Vec::new(),
        }
    }

    /// Make sure an attribute collection exists, even if it stays empty.
    pub fn declare_attribute(&mut self, name: &str) {
        if !self.attributes.contains_key(name) {
            self.attributes.insert(name.to_string(), Vec::new());
        }
    }

    /// Append a label to a list attribute.
    ///
    /// Returns `false` when the value is not a resolved label or is already
    /// present (case-sensitive).
    pub fn add_label(&mut self, attribute: &str, value: &str) -> bool {
        let value = value.trim();
        if !is_resolved_label(value) {
            return false;
        }
        let values = self.attributes.entry(attribute.to_string()).or_default();
        if values.iter().any(|v| v == value) {
            return false;
        }
        values.push(value.to_string());
        true
    }

    /// Set a scalar unless it was already set. Returns whether it was written.
    pub fn set_scalar_once(&mut self, name: &str, value: &str) -> bool {
        let value = value.trim();
        if value.is_empty() || self.scalars.contains_key(name) {
            return false;
        }
        self.scalars.insert(name.to_string(), value.to_string());
        true
    }

    pub fn attribute(&self, name: &str) -> &[String] {
        self.attributes.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn scalar(&self, name: &str) -> Option<&str> {
        self.scalars.get(name).map(String::as_str)
    }

    /// Total number of list values across all attributes.
    pub fn data_points(&self) -> usize {
        self.attributes.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>()
    }

    #[test]
    fn test_from_row_strips_entity_uri() {
        let r = row(&[
            ("entity", "http://www.wikidata.org/entity/Q42"),
            ("entityLabel", "Douglas Adams"),
        ]);
        let raw = RawRecord::from_row(&r, "entity", "entityLabel").unwrap();
        assert_eq!(raw.external_id, "Q42");
        assert_eq!(raw.display_label, "Douglas Adams");
    }

    #[test]
    fn test_from_row_defaults_label() {
        let r = row(&[("entity", "Q7")]);
        let raw = RawRecord::from_row(&r, "entity", "entityLabel").unwrap();
        assert_eq!(raw.display_label, UNKNOWN_LABEL);
    }

    #[test]
    fn test_from_row_rejects_missing_or_unsafe_ids() {
        assert!(RawRecord::from_row(&row(&[]), "entity", "entityLabel").is_none());
        let injected = row(&[("entity", "Q1 } UNION { ?x ?y ?z")]);
        assert!(RawRecord::from_row(&injected, "entity", "entityLabel").is_none());
    }

    #[test]
    fn test_add_label_is_idempotent_and_filters_ids() {
        let mut rec = EnrichedRecord::from_raw(&RawRecord::new("Q1", "Acme"));
        assert!(rec.add_label("locations", "Paris"));
        assert!(!rec.add_label("locations", "Paris"));
        assert!(rec.add_label("locations", "paris"));
        assert!(!rec.add_label("locations", "Q90"));
        assert_eq!(rec.attribute("locations"), ["Paris", "paris"]);
    }

    #[test]
    fn test_scalar_first_write_wins() {
        let mut rec = EnrichedRecord::from_raw(&RawRecord::new("Q1", "Acme"));
        assert!(rec.set_scalar_once("website", "https://acme.example"));
        assert!(!rec.set_scalar_once("website", "https://other.example"));
        assert_eq!(rec.scalar("website"), Some("https://acme.example"));
    }

    #[test]
    fn test_declared_attribute_serializes_empty() {
        let mut rec = EnrichedRecord::from_raw(&RawRecord::new("Q1", "Acme"));
        rec.declare_attribute("clients");
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["attributes"]["clients"], serde_json::json!([]));
        assert!(json.get("incomplete").is_none());
    }
}
