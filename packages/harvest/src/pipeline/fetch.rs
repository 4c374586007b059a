//! Batch fetching over the profile's sub-query branches.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::retry::{AdaptiveRetryPolicy, RetryOutcome};
use crate::traits::client::{QueryClient, QueryRequest};
use crate::types::job::{ExtractionJob, JobCursor};
use crate::types::record::RawRecord;

/// Raw output of one batch, before deduplication.
#[derive(Debug, Clone)]
pub struct BatchFetch {
    /// Records from every branch, in branch order
    pub records: Vec<RawRecord>,

    /// The job cursor as it stands after this batch
    pub cursor: JobCursor,

    /// Branches that gave up after exhausting retries
    pub exhausted: Vec<String>,
}

impl BatchFetch {
    /// Whether no branch has anything left.
    pub fn end_of_results(&self) -> bool {
        self.cursor.all_finished()
    }
}

/// Retrieves one page per unfinished branch.
///
/// A branch whose retries are exhausted is finished, not failed: the batch
/// carries on with the other branches. A client error is returned as
/// [`HarvestError::Rejected`](crate::error::HarvestError::Rejected).
pub struct BatchFetcher {
    client: Arc<dyn QueryClient>,
    policy: AdaptiveRetryPolicy,
    timeout: Duration,
}

impl BatchFetcher {
    pub fn new(client: Arc<dyn QueryClient>, policy: AdaptiveRetryPolicy, timeout: Duration) -> Self {
        Self {
            client,
            policy,
            timeout,
        }
    }

    /// Fetch the batch at `job.cursor`.
    ///
    /// The job itself is untouched; the advanced cursor is returned so the
    /// caller can adopt it together with the checkpoint commit.
    pub async fn fetch(&self, job: &ExtractionJob, cancel: &CancellationToken) -> Result<BatchFetch> {
        let profile = &job.profile;
        let batch = job.cursor.next_batch;
        let limit = job.batch_size();

        let mut cursor = job.cursor.clone();
        let mut records = Vec::new();
        let mut exhausted = Vec::new();
        let mut smallest_success: Option<usize> = None;

        for branch in &profile.branches {
            let offset = match cursor.branch(&branch.name) {
                Some(state) if !state.finished => state.offset,
                _ => continue,
            };

            let label = format!("branch:{}", branch.name);
            let client = &self.client;
            let timeout = self.timeout;

            let outcome = self
                .policy
                .run(&label, limit, cancel, |l| {
                    let request =
                        QueryRequest::new(label.clone(), branch.render(l, offset)).with_page(l, offset);
                    async move { client.call(&request, timeout).await }
                })
                .await?;

            match outcome {
                RetryOutcome::Succeeded {
                    value,
                    limit: used,
                    ..
                } => {
                    let returned = value.len();
                    let before = records.len();
                    records.extend(value.rows.iter().filter_map(|row| {
                        RawRecord::from_row(row, &profile.id_variable, &profile.label_variable)
                    }));

                    tracing::info!(
                        batch,
                        branch = %branch.name,
                        offset,
                        limit = used,
                        returned,
                        usable = records.len() - before,
                        "Fetched page"
                    );

                    cursor.advance_branch(&branch.name, used, returned);
                    smallest_success = Some(smallest_success.map_or(used, |s| s.min(used)));

                    if returned < used {
                        tracing::info!(batch, branch = %branch.name, "End of results for branch");
                    }
                }
                RetryOutcome::Exhausted {
                    attempts,
                    last_failure,
                } => {
                    tracing::warn!(
                        batch,
                        branch = %branch.name,
                        attempts,
                        error = %last_failure,
                        "Branch exhausted retries, ending it"
                    );
                    cursor.finish_branch(&branch.name);
                    exhausted.push(branch.name.clone());
                }
            }
        }

        if let Some(used) = smallest_success {
            if used < cursor.batch_size {
                tracing::info!(batch, from = cursor.batch_size, to = used, "Keeping reduced batch size");
            }
            cursor.shrink_batch_size(used);
        }
        cursor.next_batch = batch + 1;

        Ok(BatchFetch {
            records,
            cursor,
            exhausted,
        })
    }
}
