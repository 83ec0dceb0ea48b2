//! Job service abstraction over the cluster RPC client

use crate::{
    error::GwmResult,
    jobs::{JobHandle, JobInfo, JobOperation},
};
use async_trait::async_trait;

/// Accepts cluster jobs and reports on them.
///
/// Submissions cannot be cancelled. Failures to reach the service surface
/// as [`GwmError::Transport`](crate::error::GwmError::Transport).
#[async_trait]
pub trait JobService: Send + Sync {
    /// Queue a job on the operation's cluster
    async fn submit(&self, operation: &JobOperation) -> GwmResult<JobHandle>;

    /// Fetch the current state of a submitted job
    async fn refresh(&self, handle: &JobHandle) -> GwmResult<JobInfo>;
}
