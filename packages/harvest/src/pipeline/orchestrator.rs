//! The batch loop: fetch, dedupe, enrich, checkpoint, pace.
//!
//! Records from a batch join the accumulated list only once every entity of
//! the batch is enriched, so a checkpoint never reflects a half-enriched
//! batch. An interrupt is honoured between any two units of work and leads
//! to the partial artifact holding the committed records. A panic anywhere in
//! the loop is caught and takes the same save path before turning fatal.

use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::checkpoint::{self, CheckpointWriter};
use crate::error::{HarvestError, Result};
use crate::pipeline::dedup::{merge, SeenSet};
use crate::pipeline::enrich::DetailEnricher;
use crate::pipeline::fetch::BatchFetcher;
use crate::retry::AdaptiveRetryPolicy;
use crate::traits::client::QueryClient;
use crate::traits::sleeper::{sleep_or_cancel, Sleeper, TokioSleeper};
use crate::types::config::{HarvestConfig, PacingConfig, RetryConfig};
use crate::types::job::ExtractionJob;
use crate::types::record::{EnrichedRecord, RawRecord};

/// How a run ended without a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// All requested batches were processed
    Completed,
    /// Every branch ran out of results, or a batch yielded nothing
    EndOfResults,
    /// Operator stop; partial artifact written
    Interrupted,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub job: String,
    pub outcome: RunOutcome,
    /// Batches committed in this run
    pub batches: usize,
    /// Records held by the last artifact written
    pub records: usize,
    pub artifact: Option<PathBuf>,
    /// Accumulated records, for export
    #[serde(skip)]
    pub data: Vec<EnrichedRecord>,
}

/// Accumulated state of a running job.
struct Progress {
    records: Vec<EnrichedRecord>,
    seen: SeenSet,
    batches: usize,
}

pub struct PipelineOrchestrator {
    client: Arc<dyn QueryClient>,
    config: HarvestConfig,
    sleeper: Arc<dyn Sleeper>,
    cancel: CancellationToken,
}

impl PipelineOrchestrator {
    pub fn new(client: Arc<dyn QueryClient>, config: HarvestConfig) -> Self {
        Self {
            client,
            config,
            sleeper: Arc::new(TokioSleeper),
            cancel: CancellationToken::new(),
        }
    }

    /// Use a custom sleeper for backoff and pacing.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Stop the run when this token fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run a job from its start batch.
    ///
    /// An existing checkpoint of the same job is moved aside first, so a
    /// fresh lineage never overwrites records already saved.
    pub async fn run(&self, job: ExtractionJob) -> Result<RunReport> {
        let writer = CheckpointWriter::new(&self.config.output_dir, job.name());
        if let Some(archived) = writer.archive_existing().await? {
            tracing::warn!(
                job = %job.name(),
                archived = %archived.display(),
                "Starting a fresh run; use resume to continue the previous one"
            );
        }
        let progress = Progress {
            records: Vec::new(),
            seen: SeenSet::new(),
            batches: 0,
        };
        self.execute(job, writer, progress).await
    }

    /// Continue a job from its checkpoint, or start it if there is none.
    pub async fn resume(&self, mut job: ExtractionJob) -> Result<RunReport> {
        let Some(stored) = checkpoint::load(&self.config.output_dir, job.name()).await? else {
            tracing::info!(job = %job.name(), "No checkpoint to resume, starting fresh");
            return self.run(job).await;
        };

        tracing::info!(
            job = %job.name(),
            records = stored.record_count,
            next_batch = stored.cursor.next_batch,
            "Resuming from checkpoint"
        );

        job.resume_from(stored.cursor);
        let writer = CheckpointWriter::new(&self.config.output_dir, job.name())
            .with_baseline(stored.records.len());
        let progress = Progress {
            seen: SeenSet::from_records(&stored.records),
            records: stored.records,
            batches: 0,
        };
        self.execute(job, writer, progress).await
    }

    async fn execute(
        &self,
        mut job: ExtractionJob,
        mut writer: CheckpointWriter,
        mut progress: Progress,
    ) -> Result<RunReport> {
        let pacing = job
            .profile
            .pacing
            .clone()
            .unwrap_or_else(|| self.config.pacing.clone());

        tracing::info!(
            job = %job.name(),
            run_id = %writer.run_id(),
            start_batch = job.cursor.next_batch,
            batch_size = job.batch_size(),
            max_batches = job.max_batches,
            branches = job.cursor.branches.len(),
            "Starting extraction"
        );

        let result = AssertUnwindSafe(self.drive(&mut job, &mut writer, &mut progress, &pacing))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(panicked(payload)));

        match result {
            Ok(outcome) => {
                tracing::info!(
                    job = %job.name(),
                    ?outcome,
                    batches = progress.batches,
                    records = progress.records.len(),
                    "Extraction finished"
                );
                let artifact = writer.has_committed().then(|| writer.checkpoint_path());
                Ok(report(&job, outcome, progress, artifact))
            }
            Err(HarvestError::Interrupted) => {
                tracing::warn!(
                    job = %job.name(),
                    records = progress.records.len(),
                    "Interrupted, saving partial results"
                );
                let artifact = writer.save_on_abort(&progress.records, &job.cursor).await;
                Ok(report(&job, RunOutcome::Interrupted, progress, artifact))
            }
            Err(e) => {
                tracing::error!(job = %job.name(), error = %e, "Extraction failed");
                let artifact = writer.save_on_abort(&progress.records, &job.cursor).await;
                let reason = match e {
                    HarvestError::Fatal { reason, .. } => reason,
                    other => other.to_string(),
                };
                Err(HarvestError::Fatal { reason, artifact })
            }
        }
    }

    async fn drive(
        &self,
        job: &mut ExtractionJob,
        writer: &mut CheckpointWriter,
        progress: &mut Progress,
        pacing: &PacingConfig,
    ) -> Result<RunOutcome> {
        let fetcher = BatchFetcher::new(
            self.client.clone(),
            self.policy(self.config.batch_retry.clone()),
            self.config.batch_timeout,
        );
        let enricher = DetailEnricher::new(
            self.client.clone(),
            self.policy(self.config.detail_retry.clone()),
            job.profile.clone(),
            self.config.detail_timeout,
        );

        if job.cursor.all_finished() {
            tracing::info!(job = %job.name(), "Every branch already reached end of results");
            return Ok(RunOutcome::EndOfResults);
        }

        while job.has_more() {
            let batch = job.cursor.next_batch;
            let fetch = fetcher.fetch(job, &self.cancel).await?;
            let fetched = fetch.records.len();

            let (unique, seen) = merge(std::mem::take(&mut progress.seen), fetch.records);
            progress.seen = seen;
            tracing::info!(batch, fetched, unique = unique.len(), "Batch deduplicated");

            let enriched = self.enrich_batch(&enricher, unique, pacing).await?;

            progress.records.extend(enriched);
            job.cursor = fetch.cursor;
            writer.commit(&progress.records, &job.cursor).await?;
            progress.batches += 1;

            if fetched == 0 {
                tracing::info!(batch, "Batch yielded no records, stopping");
                return Ok(RunOutcome::EndOfResults);
            }
            if job.cursor.all_finished() {
                tracing::info!(batch, "All branches reached end of results");
                return Ok(RunOutcome::EndOfResults);
            }

            if job.has_more() {
                tracing::debug!(batch, pause_secs = pacing.batch_pause.as_secs_f64(), "Pausing between batches");
                sleep_or_cancel(self.sleeper.as_ref(), pacing.batch_pause, &self.cancel).await?;
            }
        }

        Ok(RunOutcome::Completed)
    }

    fn policy(&self, config: RetryConfig) -> AdaptiveRetryPolicy {
        AdaptiveRetryPolicy::new(config).with_sleeper(self.sleeper.clone())
    }

    async fn enrich_batch(
        &self,
        enricher: &DetailEnricher,
        unique: Vec<RawRecord>,
        pacing: &PacingConfig,
    ) -> Result<Vec<EnrichedRecord>> {
        if self.config.concurrency > 1 && unique.len() > 1 {
            return self.enrich_parallel(enricher, unique, pacing).await;
        }

        let total = unique.len();
        let mut enriched = Vec::with_capacity(total);
        for (i, raw) in unique.iter().enumerate() {
            if i > 0 {
                sleep_or_cancel(self.sleeper.as_ref(), pacing.entity_pause, &self.cancel).await?;
            }
            tracing::info!(entity = %raw.external_id, label = %raw.display_label, n = i + 1, total, "Enriching");

            enriched.push(enricher.enrich(raw, &self.cancel).await?);
        }
        Ok(enriched)
    }

    /// Enrich with up to `concurrency` workers. Dispatches stay
    /// `entity_pause` apart and results keep first-seen order.
    async fn enrich_parallel(
        &self,
        enricher: &DetailEnricher,
        unique: Vec<RawRecord>,
        pacing: &PacingConfig,
    ) -> Result<Vec<EnrichedRecord>> {
        let total = unique.len();
        let limit = self.config.concurrency;
        let mut slots: Vec<Option<EnrichedRecord>> = vec![None; total];
        // Dropping the set aborts every worker still running
        let mut workers = JoinSet::new();
        let mut entities: HashMap<Id, String> = HashMap::with_capacity(total);

        for (i, raw) in unique.into_iter().enumerate() {
            if i > 0 {
                sleep_or_cancel(self.sleeper.as_ref(), pacing.entity_pause, &self.cancel).await?;
            }
            while workers.len() >= limit {
                collect_one(&mut workers, &entities, &mut slots).await?;
            }

            tracing::info!(entity = %raw.external_id, n = i + 1, total, "Dispatching enrichment");
            let enricher = enricher.clone();
            let cancel = self.cancel.clone();
            let entity = raw.external_id.clone();
            let handle = workers.spawn(async move {
                let result = enricher.enrich(&raw, &cancel).await;
                (i, result)
            });
            entities.insert(handle.id(), entity);
        }

        while !workers.is_empty() {
            collect_one(&mut workers, &entities, &mut slots).await?;
        }

        Ok(slots.into_iter().flatten().collect())
    }
}

type WorkerResult = (usize, Result<EnrichedRecord>);

async fn collect_one(
    workers: &mut JoinSet<WorkerResult>,
    entities: &HashMap<Id, String>,
    slots: &mut [Option<EnrichedRecord>],
) -> Result<()> {
    match workers.join_next_with_id().await {
        Some(Ok((_, (i, Ok(record))))) => {
            slots[i] = Some(record);
            Ok(())
        }
        Some(Ok((_, (_, Err(e))))) => {
            workers.abort_all();
            Err(e)
        }
        Some(Err(join_err)) => {
            workers.abort_all();
            if join_err.is_panic() {
                let entity = entities
                    .get(&join_err.id())
                    .map(String::as_str)
                    .unwrap_or("unknown entity");
                Err(HarvestError::Fatal {
                    reason: format!("enrichment of {} panicked", entity),
                    artifact: None,
                })
            } else {
                Err(HarvestError::Interrupted)
            }
        }
        None => Ok(()),
    }
}

/// Turn a caught panic into a fatal error carrying its message.
fn panicked(payload: Box<dyn Any + Send>) -> HarvestError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    HarvestError::Fatal {
        reason: format!("extraction panicked: {}", message),
        artifact: None,
    }
}

fn report(
    job: &ExtractionJob,
    outcome: RunOutcome,
    progress: Progress,
    artifact: Option<PathBuf>,
) -> RunReport {
    RunReport {
        job: job.name().to_string(),
        outcome,
        batches: progress.batches,
        records: progress.records.len(),
        artifact,
        data: progress.records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Failure;
    use crate::testing::{entity_rows, row, MockQueryClient, RecordingSleeper};
    use crate::traits::client::QueryResults;
    use crate::types::job::JobParams;
    use crate::types::profile::{BranchQuery, DetailQuery, FieldMapping, JobProfile};
    use std::time::Duration;

    fn profile() -> Arc<JobProfile> {
        Arc::new(
            JobProfile::new("orch")
                .branch(BranchQuery::new("all", "all LIMIT {limit} OFFSET {offset}"))
                .detail(
                    DetailQuery::new("locations", "loc {id}")
                        .field(FieldMapping::list("locationLabel", "locations")),
                ),
        )
    }

    fn job(batch_size: usize, max_batches: usize) -> ExtractionJob {
        ExtractionJob::new(
            profile(),
            JobParams {
                start_batch: 0,
                batch_size,
                max_batches,
            },
        )
        .unwrap()
    }

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    fn orchestrator(
        client: MockQueryClient,
        dir: &std::path::Path,
        concurrency: usize,
    ) -> (PipelineOrchestrator, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::new());
        let config = HarvestConfig::new()
            .with_output_dir(dir)
            .with_concurrency(concurrency);
        let orch = PipelineOrchestrator::new(Arc::new(client), config).with_sleeper(sleeper.clone());
        (orch, sleeper)
    }

    fn paged_client(pages: Vec<Vec<String>>) -> MockQueryClient {
        MockQueryClient::new().with_handler(move |req| {
            if req.label.starts_with("branch:") {
                let page = req.offset / req.limit.max(1);
                let ids = pages.get(page).cloned().unwrap_or_default();
                Ok(entity_rows(ids.iter().map(String::as_str)))
            } else {
                Ok(QueryResults::new(vec![row(&[("locationLabel", "Paris")])]))
            }
        })
    }

    #[tokio::test]
    async fn test_runs_all_batches_with_pacing() {
        let dir = tempfile::tempdir().unwrap();
        let client = paged_client(vec![ids("Q1", 3), ids("Q2", 3), ids("Q3", 3)]);
        let (orch, sleeper) = orchestrator(client, dir.path(), 1);

        let report = orch.run(job(3, 2)).await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.batches, 2);
        assert_eq!(report.records, 6);
        assert_eq!(report.data[0].attribute("locations"), ["Paris"]);
        // 2 entity pauses per batch, 1 pause between the batches
        assert_eq!(sleeper.count(Duration::from_secs(5)), 4);
        assert_eq!(sleeper.count(Duration::from_secs(15)), 1);
    }

    #[tokio::test]
    async fn test_empty_batch_stops_run() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockQueryClient::new().with_handler(|req| {
            if req.label.starts_with("branch:") {
                Err(Failure::ServerError("503".into()))
            } else {
                Ok(QueryResults::default())
            }
        });
        let (orch, _) = orchestrator(client.clone(), dir.path(), 1);

        let report = orch.run(job(10, 3)).await.unwrap();

        assert_eq!(report.outcome, RunOutcome::EndOfResults);
        assert_eq!(report.records, 0);
        assert_eq!(client.calls_for("branch:").len(), 5);
    }

    #[tokio::test]
    async fn test_client_error_is_fatal_with_partial_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockQueryClient::new().with_handler(|req| {
            if req.offset == 0 {
                Ok(entity_rows(["Q1", "Q2"]))
            } else {
                Err(Failure::ClientError("400 malformed".into()))
            }
        });
        let (orch, _) = orchestrator(client, dir.path(), 1);

        let err = orch.run(job(2, 3)).await.unwrap_err();
        match err {
            HarvestError::Fatal { artifact, .. } => {
                assert_eq!(artifact, Some(dir.path().join("orch.partial")));
            }
            other => panic!("expected fatal, got {:?}", other),
        }
        assert!(dir.path().join("orch.checkpoint").exists());
    }

    #[tokio::test]
    async fn test_parallel_enrichment_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let client = paged_client(vec![ids("Q", 6)]).with_delay(Duration::from_millis(5));
        let (orch, sleeper) = orchestrator(client, dir.path(), 3);

        let report = orch.run(job(10, 1)).await.unwrap();

        let got: Vec<_> = report.data.iter().map(|r| r.id.clone()).collect();
        assert_eq!(got, ids("Q", 6));
        assert_eq!(sleeper.count(Duration::from_secs(5)), 5);
    }

    #[tokio::test]
    async fn test_resume_continues_after_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let pages = vec![ids("Q1", 2), ids("Q2", 2), ids("Q3", 1)];

        let (first, _) = orchestrator(paged_client(pages.clone()), dir.path(), 1);
        let report = first.run(job(2, 1)).await.unwrap();
        assert_eq!(report.records, 2);

        let client = paged_client(pages);
        let (second, _) = orchestrator(client.clone(), dir.path(), 1);
        let report = second.resume(job(2, 3)).await.unwrap();

        assert_eq!(report.outcome, RunOutcome::EndOfResults);
        assert_eq!(report.records, 5);
        assert_eq!(report.batches, 2);
        let offsets: Vec<_> = client.calls_for("branch:").iter().map(|c| c.offset).collect();
        assert_eq!(offsets, [2, 4]);
    }

    #[tokio::test]
    async fn test_resume_of_finished_job_reports_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let pages = vec![ids("Q1", 2), ids("Q2", 1)];

        let (first, _) = orchestrator(paged_client(pages.clone()), dir.path(), 1);
        let report = first.run(job(2, 5)).await.unwrap();
        assert_eq!(report.outcome, RunOutcome::EndOfResults);
        assert_eq!(report.records, 3);

        let client = paged_client(pages);
        let (second, _) = orchestrator(client.clone(), dir.path(), 1);
        let report = second.resume(job(2, 5)).await.unwrap();

        assert_eq!(report.outcome, RunOutcome::EndOfResults);
        assert_eq!(report.batches, 0);
        assert_eq!(report.records, 3);
        assert_eq!(report.artifact, Some(dir.path().join("orch.checkpoint")));
        assert!(client.calls().is_empty());
    }
}
