//! Join waiters
//!
//! A caller that triggered a join waits on a one-shot signal tagged with the
//! job id. Only the `ClusterStatus` for that job fulfills it, and each job is
//! fulfilled at most once.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use fm_core::JobId;

use crate::error::{ClusterError, Result};

/// Resolved job ids remembered for late registrations
const RESOLVED_HISTORY: usize = 64;

#[derive(Default)]
struct WaiterTable {
    pending: HashMap<JobId, Vec<oneshot::Sender<()>>>,
    resolved: VecDeque<JobId>,
}

/// Waiter registry
#[derive(Clone, Default)]
pub struct JobWaiters {
    table: Arc<Mutex<WaiterTable>>,
}

impl JobWaiters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh waiter. If the job already resolved the waiter is
    /// ready immediately.
    pub fn register(&self, job_id: JobId) -> JobWaiter {
        let (tx, rx) = oneshot::channel();
        let mut table = self.table.lock();
        if table.resolved.contains(&job_id) {
            let _ = tx.send(());
        } else {
            table.pending.entry(job_id).or_default().push(tx);
        }
        JobWaiter { job_id, rx }
    }

    /// Wake every waiter of `job_id`. Returns how many were woken; repeated
    /// calls for the same job wake nobody.
    pub fn fulfill(&self, job_id: JobId) -> usize {
        let mut table = self.table.lock();
        if table.resolved.contains(&job_id) {
            return 0;
        }
        table.resolved.push_back(job_id);
        if table.resolved.len() > RESOLVED_HISTORY {
            table.resolved.pop_front();
        }
        table
            .pending
            .remove(&job_id)
            .unwrap_or_default()
            .into_iter()
            .filter(|tx| !tx.is_closed())
            .map(|tx| tx.send(()))
            .filter(|r| r.is_ok())
            .count()
    }

    /// Number of waiters not yet fulfilled
    pub fn pending(&self) -> usize {
        self.table.lock().pending.values().map(|v| v.len()).sum()
    }

    /// Drop all pending waiters; they observe `ClusterError::Closed`
    pub fn clear(&self) {
        self.table.lock().pending.clear();
    }
}

/// Handle held by a blocked join caller
#[derive(Debug)]
pub struct JobWaiter {
    job_id: JobId,
    rx: oneshot::Receiver<()>,
}

impl JobWaiter {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Block until the job resolves
    pub async fn wait(self) -> Result<()> {
        self.rx.await.map_err(|_| ClusterError::Closed)
    }

    /// Like `wait`, giving up after `after`
    pub async fn wait_timeout(self, after: Duration) -> Result<()> {
        match tokio::time::timeout(after, self.rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ClusterError::Closed),
            Err(_) => Err(ClusterError::JoinTimeout {
                job_id: self.job_id,
                after,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fulfill_once() {
        let waiters = JobWaiters::new();
        let a = waiters.register(7);
        let b = waiters.register(7);
        assert_eq!(waiters.pending(), 2);

        assert_eq!(waiters.fulfill(7), 2);
        assert_eq!(waiters.fulfill(7), 0);
        a.wait().await.unwrap();
        b.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_stray_job_does_not_wake() {
        let waiters = JobWaiters::new();
        let waiter = waiters.register(1);
        assert_eq!(waiters.fulfill(2), 0);

        let err = waiter
            .wait_timeout(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::JoinTimeout { job_id: 1, .. }));
    }

    #[tokio::test]
    async fn test_register_after_resolution() {
        let waiters = JobWaiters::new();
        waiters.fulfill(3);
        waiters
            .register(3)
            .wait_timeout(Duration::from_millis(20))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_clear_closes_waiters() {
        let waiters = JobWaiters::new();
        let waiter = waiters.register(9);
        waiters.clear();
        assert!(matches!(waiter.wait().await, Err(ClusterError::Closed)));
    }
}
