//! The extraction job and its cursor.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{HarvestError, Result};
use crate::types::profile::JobProfile;

/// Run parameters, typically from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobParams {
    pub start_batch: usize,
    pub batch_size: usize,
    pub max_batches: usize,
}

impl Default for JobParams {
    fn default() -> Self {
        Self {
            start_batch: 0,
            batch_size: 10,
            max_batches: 3,
        }
    }
}

/// Paging position of one sub-query branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchCursor {
    pub name: String,
    pub offset: usize,
    /// End of results reached or retries exhausted
    pub finished: bool,
}

/// Where the job stands; persisted with every checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCursor {
    /// Next batch number to fetch
    pub next_batch: usize,
    /// Current page size; only ever shrinks
    pub batch_size: usize,
    pub branches: Vec<BranchCursor>,
}

impl JobCursor {
    pub fn branch(&self, name: &str) -> Option<&BranchCursor> {
        self.branches.iter().find(|b| b.name == name)
    }

    /// True once no branch has anything left to page through.
    pub fn all_finished(&self) -> bool {
        self.branches.iter().all(|b| b.finished)
    }

    /// Record a successful page for a branch.
    ///
    /// The offset moves by the limit actually requested, so a shrunk page
    /// never leaves a gap. A short page ends the branch.
    pub(crate) fn advance_branch(&mut self, name: &str, limit_used: usize, returned: usize) {
        if let Some(branch) = self.branches.iter_mut().find(|b| b.name == name) {
            branch.offset += limit_used;
            if returned < limit_used {
                branch.finished = true;
            }
        }
    }

    pub(crate) fn finish_branch(&mut self, name: &str) {
        if let Some(branch) = self.branches.iter_mut().find(|b| b.name == name) {
            branch.finished = true;
        }
    }

    /// Keep a shrunk page size for later batches.
    pub(crate) fn shrink_batch_size(&mut self, limit: usize) {
        if limit > 0 && limit < self.batch_size {
            self.batch_size = limit;
        }
    }
}

/// The unit of work for one run.
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub profile: Arc<JobProfile>,
    pub max_batches: usize,
    pub start_batch: usize,
    pub cursor: JobCursor,
}

impl ExtractionJob {
    pub fn new(profile: Arc<JobProfile>, params: JobParams) -> Result<Self> {
        profile.validate()?;
        if params.batch_size == 0 {
            return Err(HarvestError::profile("batch size must be positive"));
        }

        let offset = params.start_batch * params.batch_size;
        let branches = profile
            .branches
            .iter()
            .map(|b| BranchCursor {
                name: b.name.clone(),
                offset,
                finished: false,
            })
            .collect();

        Ok(Self {
            profile,
            max_batches: params.max_batches,
            start_batch: params.start_batch,
            cursor: JobCursor {
                next_batch: params.start_batch,
                batch_size: params.batch_size,
                branches,
            },
        })
    }

    pub fn name(&self) -> &str {
        &self.profile.name
    }

    pub fn batch_size(&self) -> usize {
        self.cursor.batch_size
    }

    /// Continue from a stored cursor.
    ///
    /// Branches unknown to the stored cursor start at the current offset;
    /// stored branches no longer in the profile are dropped.
    pub fn resume_from(&mut self, stored: JobCursor) {
        let branches = self
            .cursor
            .branches
            .iter()
            .map(|b| stored.branch(&b.name).cloned().unwrap_or_else(|| b.clone()))
            .collect();

        self.start_batch = stored.next_batch;
        self.cursor = JobCursor {
            next_batch: stored.next_batch,
            batch_size: stored.batch_size.max(1),
            branches,
        };
    }

    /// Whether another batch should be fetched.
    pub fn has_more(&self) -> bool {
        self.cursor.next_batch < self.max_batches && !self.cursor.all_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::profile::BranchQuery;

    fn profile(branches: &[&str]) -> Arc<JobProfile> {
        let mut p = JobProfile::new("job");
        for name in branches {
            p = p.branch(BranchQuery::new(*name, "LIMIT {limit} OFFSET {offset}"));
        }
        Arc::new(p)
    }

    #[test]
    fn test_initial_offset_from_start_batch() {
        let job = ExtractionJob::new(
            profile(&["a", "b"]),
            JobParams {
                start_batch: 2,
                batch_size: 25,
                max_batches: 5,
            },
        )
        .unwrap();

        assert_eq!(job.cursor.branch("a").unwrap().offset, 50);
        assert_eq!(job.cursor.branch("b").unwrap().offset, 50);
        assert!(job.has_more());
    }

    #[test]
    fn test_short_page_finishes_branch() {
        let mut job = ExtractionJob::new(profile(&["a", "b"]), JobParams::default()).unwrap();
        job.cursor.advance_branch("a", 10, 10);
        job.cursor.advance_branch("b", 10, 4);

        assert!(!job.cursor.branch("a").unwrap().finished);
        assert!(job.cursor.branch("b").unwrap().finished);
        assert_eq!(job.cursor.branch("a").unwrap().offset, 10);

        job.cursor.finish_branch("a");
        assert!(!job.has_more());
    }

    #[test]
    fn test_batch_size_only_shrinks() {
        let mut job = ExtractionJob::new(profile(&["a"]), JobParams::default()).unwrap();
        job.cursor.shrink_batch_size(5);
        job.cursor.shrink_batch_size(8);
        assert_eq!(job.batch_size(), 5);
    }

    #[test]
    fn test_resume_keeps_known_branches() {
        let mut job = ExtractionJob::new(profile(&["a", "b"]), JobParams::default()).unwrap();
        job.resume_from(JobCursor {
            next_batch: 2,
            batch_size: 6,
            branches: vec![BranchCursor {
                name: "a".into(),
                offset: 16,
                finished: true,
            }],
        });

        assert_eq!(job.cursor.next_batch, 2);
        assert_eq!(job.batch_size(), 6);
        assert!(job.cursor.branch("a").unwrap().finished);
        assert_eq!(job.cursor.branch("b").unwrap().offset, 0);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let params = JobParams {
            batch_size: 0,
            ..Default::default()
        };
        assert!(ExtractionJob::new(profile(&["a"]), params).is_err());
    }
}
