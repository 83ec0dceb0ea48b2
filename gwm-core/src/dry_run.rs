//! Job service that records submissions instead of talking to a cluster

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use crate::abstractions::JobService;
use crate::error::{GwmError, GwmResult};
use crate::jobs::{JobHandle, JobId, JobInfo, JobOperation, JobStatus};

/// How the dry-run service answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshBehavior {
    /// Report every job as queued right away
    #[default]
    Immediate,
    /// Answer refreshes after a delay
    Delay(Duration),
    /// Accept submissions, fail refreshes
    FailRefresh,
    /// Fail submissions
    FailSubmit,
}

#[derive(Debug, Default)]
pub struct DryRunJobService {
    behavior: RefreshBehavior,
    next_id: AtomicU64,
    submitted: RwLock<Vec<(JobHandle, JobOperation)>>,
}

impl DryRunJobService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(behavior: RefreshBehavior) -> Self {
        Self {
            behavior,
            ..Self::default()
        }
    }

    /// Operations accepted so far, in submission order
    pub async fn submitted(&self) -> Vec<JobOperation> {
        self.submitted
            .read()
            .await
            .iter()
            .map(|(_, op)| op.clone())
            .collect()
    }
}

#[async_trait]
impl JobService for DryRunJobService {
    async fn submit(&self, operation: &JobOperation) -> GwmResult<JobHandle> {
        if self.behavior == RefreshBehavior::FailSubmit {
            return Err(GwmError::transport("submit", "job service unavailable"));
        }

        let handle = JobHandle {
            job_id: JobId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
            cluster: operation.cluster(),
            submitted_at: Utc::now(),
        };
        debug!(job_id = %handle.job_id, op = operation.name(), "Dry-run submission");
        self.submitted
            .write()
            .await
            .push((handle.clone(), operation.clone()));
        Ok(handle)
    }

    async fn refresh(&self, handle: &JobHandle) -> GwmResult<JobInfo> {
        match self.behavior {
            RefreshBehavior::FailRefresh => {
                return Err(GwmError::transport("refresh", "job service unavailable"))
            }
            RefreshBehavior::Delay(delay) => tokio::time::sleep(delay).await,
            _ => {}
        }

        let submitted = self.submitted.read().await;
        let (_, operation) = submitted
            .iter()
            .find(|(h, _)| h.job_id == handle.job_id)
            .ok_or_else(|| GwmError::not_found(format!("job {}", handle.job_id)))?;

        Ok(JobInfo {
            job_id: handle.job_id,
            status: JobStatus::Queued,
            summary: vec![operation.describe()],
            payload: serde_json::to_value(operation)?,
        })
    }
}
