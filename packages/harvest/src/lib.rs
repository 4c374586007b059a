//! Resilient Paginated Extraction Engine
//!
//! Pulls entity records from a rate-limited, failure-prone query service,
//! enriches each one with secondary lookups, deduplicates across overlapping
//! sub-queries and checkpoints after every batch, so a multi-hour run
//! survives timeouts, server errors and operator interrupts without losing
//! completed work.
//!
//! # Usage
//!
//! ```rust,ignore
//! use harvest::{ExtractionJob, HarvestConfig, JobParams, PipelineOrchestrator};
//! use harvest::clients::{QueryClientExt, SparqlQueryClient};
//! use sparql_client::{SparqlClient, WIKIDATA_ENDPOINT};
//! use std::sync::Arc;
//!
//! let client = SparqlQueryClient::new(SparqlClient::new(WIKIDATA_ENDPOINT, "MyBot/1.0"))
//!     .rate_limited(30);
//! let profile = Arc::new(harvest::profiles::builtin("media-talent-agencies").unwrap());
//! let job = ExtractionJob::new(profile, JobParams::default())?;
//!
//! let report = PipelineOrchestrator::new(Arc::new(client), HarvestConfig::default())
//!     .run(job)
//!     .await?;
//! println!("{} records in {:?}", report.records, report.artifact);
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Seams to the remote service and the clock
//! - [`clients`] - SPARQL and rate-limited query clients
//! - [`retry`] - Adaptive retry policy
//! - [`pipeline`] - Fetch, dedup, enrich and orchestration
//! - [`checkpoint`] - Checkpoint, partial and emergency artifacts
//! - [`export`] - CSV export and coverage statistics
//! - [`testing`] - Mock implementations for testing

pub mod checkpoint;
pub mod clients;
pub mod error;
pub mod export;
pub mod pipeline;
pub mod profiles;
pub mod retry;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use checkpoint::{Checkpoint, CheckpointWriter};
pub use error::{CallResult, CheckpointError, Failure, HarvestError, Result};
pub use pipeline::{
    is_resolved_label, merge, BatchFetch, BatchFetcher, DetailEnricher, PipelineOrchestrator,
    RunOutcome, RunReport, SeenSet,
};
pub use retry::{AdaptiveRetryPolicy, Decision, RetryOutcome, RetryPhase, RetryState};
pub use traits::{
    client::{QueryClient, QueryRequest, QueryResults, Row},
    sleeper::{Sleeper, TokioSleeper},
};
pub use types::{
    config::{HarvestConfig, PacingConfig, RetryConfig},
    job::{BranchCursor, ExtractionJob, JobCursor, JobParams},
    profile::{BranchQuery, DetailQuery, FieldKind, FieldMapping, JobProfile, SpanSpec},
    record::{EnrichedRecord, RawRecord},
};

pub use clients::RateLimitedClient;
#[cfg(feature = "sparql")]
pub use clients::SparqlQueryClient;
