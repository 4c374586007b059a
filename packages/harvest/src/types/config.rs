//! Configuration types for retries, pacing and runs.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Parameters of the adaptive retry policy for one kind of call site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first call
    pub max_attempts: u32,

    /// First backoff after a load-related failure; doubles per attempt
    #[serde(with = "duration_secs")]
    pub base_wait: Duration,

    /// Divisor applied to the result limit after a load-related failure
    pub shrink_factor: usize,

    /// Floor for the shrinking limit
    pub min_limit: usize,

    /// Fixed wait after a network failure (limit untouched)
    #[serde(with = "duration_secs")]
    pub network_wait: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::primary()
    }
}

impl RetryConfig {
    /// Defaults for batch (primary) queries.
    pub fn primary() -> Self {
        Self {
            max_attempts: 5,
            base_wait: Duration::from_secs(5),
            shrink_factor: 2,
            min_limit: 3,
            network_wait: Duration::from_secs(5),
        }
    }

    /// Defaults for per-entity detail queries.
    ///
    /// Fewer attempts: giving up on one attribute costs less than giving up on
    /// a whole batch.
    pub fn detail() -> Self {
        Self {
            max_attempts: 3,
            ..Self::primary()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_wait(mut self, wait: Duration) -> Self {
        self.base_wait = wait;
        self
    }

    pub fn with_min_limit(mut self, min_limit: usize) -> Self {
        self.min_limit = min_limit.max(1);
        self
    }

    pub fn with_network_wait(mut self, wait: Duration) -> Self {
        self.network_wait = wait;
        self
    }
}

/// Mandatory pauses that keep request pressure on the remote service low.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Pause between two entity enrichments
    #[serde(with = "duration_secs")]
    pub entity_pause: Duration,

    /// Pause between two batches
    #[serde(with = "duration_secs")]
    pub batch_pause: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            entity_pause: Duration::from_secs(5),
            batch_pause: Duration::from_secs(15),
        }
    }
}

impl PacingConfig {
    /// No pauses at all. Only meant for tests and local fixtures.
    pub fn none() -> Self {
        Self {
            entity_pause: Duration::ZERO,
            batch_pause: Duration::ZERO,
        }
    }
}

/// Engine-wide settings for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Deadline for a batch query
    #[serde(with = "duration_secs")]
    pub batch_timeout: Duration,

    /// Deadline for a detail query
    #[serde(with = "duration_secs")]
    pub detail_timeout: Duration,

    pub batch_retry: RetryConfig,
    pub detail_retry: RetryConfig,
    pub pacing: PacingConfig,

    /// Entities enriched at once within a batch (1 = sequential)
    pub concurrency: usize,

    /// Directory receiving checkpoint, partial and emergency artifacts
    pub output_dir: PathBuf,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            batch_timeout: Duration::from_secs(180),
            detail_timeout: Duration::from_secs(60),
            batch_retry: RetryConfig::primary(),
            detail_retry: RetryConfig::detail(),
            pacing: PacingConfig::default(),
            concurrency: 1,
            output_dir: PathBuf::from("."),
        }
    }
}

impl HarvestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_pacing(mut self, pacing: PacingConfig) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_batch_retry(mut self, retry: RetryConfig) -> Self {
        self.batch_retry = retry;
        self
    }

    pub fn with_detail_retry(mut self, retry: RetryConfig) -> Self {
        self.detail_retry = retry;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_timeouts(mut self, batch: Duration, detail: Duration) -> Self {
        self.batch_timeout = batch;
        self.detail_timeout = detail;
        self
    }
}

/// Serialize durations as fractional seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
