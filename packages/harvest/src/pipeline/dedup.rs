//! Deduplication across unioned sub-query results.
//!
//! The same entity can surface under several branches and in several pages.
//! Membership is decided here, before enrichment starts, so each entity is
//! enriched at most once per job.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::types::record::{EnrichedRecord, RawRecord};

/// Identifiers already emitted in this job. Only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenSet {
    ids: HashSet<String>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from records restored out of a checkpoint.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a EnrichedRecord>) -> Self {
        Self {
            ids: records.into_iter().map(|r| r.id.clone()).collect(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Returns `true` if the id was not seen before.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        self.ids.insert(id.to_string())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Split `records` into those not yet seen, in first-seen order.
///
/// Duplicates within `records` collapse onto their first occurrence.
pub fn merge(mut seen: SeenSet, records: Vec<RawRecord>) -> (Vec<RawRecord>, SeenSet) {
    let unique = records
        .into_iter()
        .filter(|r| seen.insert(&r.external_id))
        .collect();
    (unique, seen)
}
