//! Tabular export and coverage statistics.
//!
//! The CSV file is a lossy projection for spreadsheets; the checkpoint stays
//! the source of truth.

use indexmap::IndexSet;
use std::path::Path;

use crate::types::record::EnrichedRecord;

const LIST_SEPARATOR: &str = ", ";

/// Column names in first-seen order: `id`, `label`, list attributes, scalars.
pub fn columns(records: &[EnrichedRecord]) -> (Vec<String>, Vec<String>) {
    let mut lists = IndexSet::new();
    let mut scalars = IndexSet::new();
    for record in records {
        lists.extend(record.attributes.keys().cloned());
        scalars.extend(record.scalars.keys().cloned());
    }
    (lists.into_iter().collect(), scalars.into_iter().collect())
}

/// Render records as CSV text.
pub fn to_csv(records: &[EnrichedRecord]) -> String {
    let (lists, scalars) = columns(records);

    let mut out = String::new();
    let header: Vec<&str> = ["id", "label"]
        .into_iter()
        .chain(lists.iter().map(String::as_str))
        .chain(scalars.iter().map(String::as_str))
        .collect();
    push_row(&mut out, header.iter().copied());

    for record in records {
        let mut cells = vec![record.id.clone(), record.label.clone()];
        cells.extend(lists.iter().map(|name| record.attribute(name).join(LIST_SEPARATOR)));
        cells.extend(scalars.iter().map(|name| record.scalar(name).unwrap_or_default().to_string()));
        push_row(&mut out, cells.iter().map(String::as_str));
    }
    out
}

/// Write `<dir>/<job>.csv`.
pub async fn export_csv(records: &[EnrichedRecord], path: &Path) -> std::io::Result<()> {
    tokio::fs::write(path, to_csv(records)).await?;
    tracing::info!(records = records.len(), path = %path.display(), "Exported CSV");
    Ok(())
}

fn push_row<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>) {
    for (i, cell) in cells.enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&quote(cell));
    }
    out.push('\n');
}

fn quote(cell: &str) -> String {
    if cell.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

/// How many records carry data for one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldCoverage {
    pub field: String,
    pub populated: usize,
    pub total: usize,
}

impl FieldCoverage {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.populated as f64 * 100.0 / self.total as f64
        }
    }
}

/// Coverage of every list attribute and scalar, in column order.
pub fn coverage(records: &[EnrichedRecord]) -> Vec<FieldCoverage> {
    let (lists, scalars) = columns(records);
    let total = records.len();

    let list_cov = lists.into_iter().map(|field| {
        let populated = records.iter().filter(|r| !r.attribute(&field).is_empty()).count();
        FieldCoverage {
            field,
            populated,
            total,
        }
    });
    let scalar_cov = scalars.into_iter().map(|field| {
        let populated = records.iter().filter(|r| r.scalar(&field).is_some()).count();
        FieldCoverage {
            field,
            populated,
            total,
        }
    });
    list_cov.chain(scalar_cov).collect()
}
