//! Resize job tracking
//!
//! Lives only on the coordinator and only in memory. A coordinator restart
//! loses the job; the cluster stays in whatever state was last persisted.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use fm_core::{JobId, NodeUri, ResizeInstruction, ResizeInstructionComplete, Topology};

use crate::error::{ClusterError, Result};

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Waiting for completions
    Running,
    /// Every destination succeeded
    Done,
    /// Every destination answered and at least one failed
    Aborted,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Running => write!(f, "running"),
            JobStatus::Done => write!(f, "done"),
            JobStatus::Aborted => write!(f, "aborted"),
        }
    }
}

/// Resize job
#[derive(Debug, Clone)]
pub struct ResizeJob {
    pub id: JobId,
    /// Node whose join started the job
    pub joining: NodeUri,
    /// Topology the job moves the cluster to
    pub topology: Topology,
    pub status: JobStatus,
    /// Destinations that have not reported back
    pub outstanding: BTreeSet<NodeUri>,
    pub destinations: Vec<NodeUri>,
    pub source_n: usize,
    /// Error text per failed destination
    pub errors: Vec<(NodeUri, String)>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ResizeJob {
    pub fn new(
        id: JobId,
        joining: NodeUri,
        topology: Topology,
        instructions: &[ResizeInstruction],
    ) -> Self {
        let destinations: Vec<NodeUri> =
            instructions.iter().map(|i| i.destination.clone()).collect();
        let mut job = Self {
            id,
            joining,
            topology,
            status: JobStatus::Running,
            outstanding: destinations.iter().cloned().collect(),
            destinations,
            source_n: instructions.iter().map(|i| i.sources.len()).sum(),
            errors: Vec::new(),
            created_at: Utc::now(),
            completed_at: None,
        };
        if job.outstanding.is_empty() {
            job.finish();
        }
        job
    }

    pub fn is_finished(&self) -> bool {
        self.status != JobStatus::Running
    }

    fn finish(&mut self) {
        self.status = if self.errors.is_empty() {
            JobStatus::Done
        } else {
            JobStatus::Aborted
        };
        self.completed_at = Some(Utc::now());
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            joining: self.joining.to_string(),
            status: self.status,
            instruction_n: self.destinations.len(),
            source_n: self.source_n,
            destinations: self.destinations.iter().map(|d| d.to_string()).collect(),
            outstanding: self.outstanding.iter().map(|d| d.to_string()).collect(),
            errors: self
                .errors
                .iter()
                .map(|(d, e)| (d.to_string(), e.clone()))
                .collect(),
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }
}

/// Read-only view of a job for callers and status output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub joining: String,
    pub status: JobStatus,
    pub instruction_n: usize,
    pub source_n: usize,
    pub destinations: Vec<String>,
    pub outstanding: Vec<String>,
    pub errors: Vec<(String, String)>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Effect of one completion on its job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobProgress {
    Pending { remaining: usize },
    Done { topology: Topology },
    Aborted { errors: Vec<(NodeUri, String)> },
}

#[derive(Default)]
struct TrackerInner {
    jobs: HashMap<JobId, ResizeJob>,
    latest: Option<JobId>,
}

/// Job tracker
#[derive(Default)]
pub struct JobTracker {
    inner: RwLock<TrackerInner>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Random, non-zero id not used by any tracked job
    pub fn next_id(&self) -> JobId {
        let inner = self.inner.read();
        loop {
            let id: JobId = rand::random();
            if id != 0 && !inner.jobs.contains_key(&id) {
                return id;
            }
        }
    }

    /// Track a new job. A job without instructions is done immediately.
    pub fn start(
        &self,
        id: JobId,
        joining: NodeUri,
        topology: Topology,
        instructions: &[ResizeInstruction],
    ) -> JobSummary {
        let job = ResizeJob::new(id, joining, topology, instructions);
        let summary = job.summary();
        let mut inner = self.inner.write();
        inner.jobs.insert(id, job);
        inner.latest = Some(id);
        summary
    }

    /// Id of the job still waiting for completions, if any
    pub fn running(&self) -> Option<JobId> {
        let inner = self.inner.read();
        inner
            .jobs
            .values()
            .find(|j| j.status == JobStatus::Running)
            .map(|j| j.id)
    }

    pub fn latest_id(&self) -> Option<JobId> {
        self.inner.read().latest
    }

    /// Record one destination's completion
    pub fn complete(&self, completion: &ResizeInstructionComplete) -> Result<JobProgress> {
        let mut inner = self.inner.write();
        let job = inner
            .jobs
            .get_mut(&completion.job_id)
            .ok_or(ClusterError::UnknownJob(completion.job_id))?;

        if job.is_finished() || !job.outstanding.remove(&completion.destination) {
            return Err(ClusterError::UnexpectedCompletion {
                job_id: completion.job_id,
                destination: completion.destination.clone(),
            });
        }
        if let Some(error) = &completion.error {
            job.errors
                .push((completion.destination.clone(), error.clone()));
        }

        if !job.outstanding.is_empty() {
            return Ok(JobProgress::Pending {
                remaining: job.outstanding.len(),
            });
        }
        job.finish();
        Ok(match job.status {
            JobStatus::Done => JobProgress::Done {
                topology: job.topology.clone(),
            },
            _ => JobProgress::Aborted {
                errors: job.errors.clone(),
            },
        })
    }

    /// Abort a job for a failure no destination reported, such as a status
    /// broadcast that did not reach every member
    pub fn fail(&self, id: JobId, source: NodeUri, error: String) -> bool {
        let mut inner = self.inner.write();
        let Some(job) = inner.jobs.get_mut(&id) else {
            return false;
        };
        job.errors.push((source, error));
        job.outstanding.clear();
        job.finish();
        true
    }

    /// Number of jobs still tracked
    pub fn len(&self) -> usize {
        self.inner.read().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().jobs.is_empty()
    }

    pub fn summary(&self, id: JobId) -> Option<JobSummary> {
        self.inner.read().jobs.get(&id).map(|j| j.summary())
    }

    /// Summary of the most recently started job
    pub fn latest(&self) -> Option<JobSummary> {
        let inner = self.inner.read();
        inner
            .latest
            .and_then(|id| inner.jobs.get(&id))
            .map(|j| j.summary())
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.jobs.clear();
        inner.latest = None;
    }

    /// Forget finished jobs other than the latest, keeping the `keep` most
    /// recent of them
    pub fn cleanup(&self, keep: usize) {
        let mut inner = self.inner.write();
        let latest = inner.latest;
        let mut finished: Vec<(DateTime<Utc>, JobId)> = inner
            .jobs
            .values()
            .filter(|j| j.is_finished() && Some(j.id) != latest)
            .map(|j| (j.created_at, j.id))
            .collect();
        if finished.len() <= keep {
            return;
        }
        finished.sort();
        let remove_n = finished.len() - keep;
        for (_, id) in finished.into_iter().take(remove_n) {
            inner.jobs.remove(&id);
        }
    }
}
