//! Extraction pipeline stages.
//!
//! Control flows orchestrator → fetch → dedup → enrich → checkpoint, then
//! back to the orchestrator for the next batch.

pub mod dedup;
pub mod enrich;
pub mod fetch;
pub mod orchestrator;

pub use dedup::{merge, SeenSet};
pub use enrich::{is_resolved_label, normalize_date, DetailEnricher};
pub use fetch::{BatchFetch, BatchFetcher};
pub use orchestrator::{PipelineOrchestrator, RunOutcome, RunReport};
