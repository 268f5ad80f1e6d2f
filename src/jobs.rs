use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::debug;

use crate::{error::N2nError, peer_id::JobId};

type Waiter = oneshot::Sender<Result<(), N2nError>>;

/// Correlates outstanding requests with their `RESPONSE`. Every entry is removed
/// by whichever of resolve or timeout gets there first, so a job completes once.
pub struct JobTable {
    pending: DashMap<JobId, Waiter>,
}

/// Receiving half of a registered job, consumed by [`JobTable::wait`].
pub struct JobHandle {
    pub id: JobId,
    rx: oneshot::Receiver<Result<(), N2nError>>,
}

impl JobTable {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }

    pub fn register(&self) -> JobHandle {
        let id = JobId::new();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);
        JobHandle { id, rx }
    }

    /// Feeds a `RESPONSE`. Returns false for unknown or already-finished jobs.
    pub fn resolve(&self, job: &JobId, response: bool, reason: Option<String>) -> bool {
        let outcome = if response {
            Ok(())
        } else {
            Err(N2nError::Rejected {
                reason: reason.unwrap_or_else(|| "rejected".to_string()),
            })
        };
        self.complete(job, outcome)
    }

    fn complete(&self, job: &JobId, outcome: Result<(), N2nError>) -> bool {
        match self.pending.remove(job) {
            Some((_, waiter)) => {
                let _ = waiter.send(outcome);
                true
            }
            None => {
                debug!(job = %job, "jobs: late or unknown response dropped");
                false
            }
        }
    }

    /// Awaits the outcome, giving up after `after`.
    pub async fn wait(&self, handle: JobHandle, after: Duration) -> Result<(), N2nError> {
        let JobHandle { id, rx } = handle;
        match tokio::time::timeout(after, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) | Err(_) => {
                self.pending.remove(&id);
                Err(N2nError::Timeout {
                    job: Some(id),
                    after,
                })
            }
        }
    }

    pub fn cancel(&self, job: &JobId) {
        self.pending.remove(job);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn response_resolves_waiter() {
        let jobs = Arc::new(JobTable::new());
        let h = jobs.register();
        let id = h.id.clone();
        let j2 = jobs.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert!(j2.resolve(&id, true, None));
        });
        jobs.wait(h, Duration::from_secs(1)).await.unwrap();
        assert!(jobs.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn negative_response_carries_reason() {
        let jobs = JobTable::new();
        let h = jobs.register();
        jobs.resolve(&h.id, false, Some("pending connection".into()));
        let err = jobs.wait(h, Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(
            err,
            N2nError::Rejected {
                reason: "pending connection".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_removes_entry_and_late_response_is_ignored() {
        let jobs = JobTable::new();
        let h = jobs.register();
        let id = h.id.clone();
        let err = jobs.wait(h, Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, N2nError::Timeout { job: Some(ref j), .. } if *j == id));
        assert!(jobs.is_empty());
        assert!(!jobs.resolve(&id, true, None));
    }

    #[tokio::test(start_paused = true)]
    async fn only_first_completion_counts() {
        let jobs = JobTable::new();
        let h = jobs.register();
        assert!(jobs.resolve(&h.id, false, Some("busy".into())));
        assert!(!jobs.resolve(&h.id, true, None));
        assert_eq!(
            jobs.wait(h, Duration::from_secs(1)).await.unwrap_err(),
            N2nError::Rejected {
                reason: "busy".into()
            }
        );
    }

    #[test]
    fn ids_are_unique() {
        let jobs = JobTable::new();
        let a = jobs.register();
        let b = jobs.register();
        assert_ne!(a.id, b.id);
        assert_eq!(jobs.len(), 2);
    }
}
