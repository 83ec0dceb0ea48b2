//! Cluster jobs
//!
//! Operations are handed to a [`JobService`] as [`JobOperation`] values.
//! After submitting, callers do one bounded status refresh; a refresh that
//! does not answer in time leaves the job submitted with unknown status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

use crate::abstractions::JobService;
use crate::error::GwmResult;
use crate::types::{ClusterId, MigrationMode, NodeRole};
use crate::validation::{
    EvacuationTarget, FieldErrors, ModifyRequest, ValidationResult, VirtualMachineRequest,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to a submitted job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: JobId,
    pub cluster: ClusterId,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Waiting,
    Running,
    Success,
    Error,
    Canceled,
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Error | JobStatus::Canceled)
    }
}

/// Job state as reported by the cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    pub job_id: JobId,
    pub status: JobStatus,
    /// One line per opcode in the job
    #[serde(default)]
    pub summary: Vec<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Work a job performs on a cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JobOperation {
    CreateInstance {
        cluster: ClusterId,
        request: VirtualMachineRequest,
    },
    ModifyInstance {
        cluster: ClusterId,
        hostname: String,
        changes: ModifyRequest,
    },
    RenameInstance {
        cluster: ClusterId,
        hostname: String,
        new_hostname: String,
        ip_check: bool,
        name_check: bool,
    },
    MigrateInstance {
        cluster: ClusterId,
        hostname: String,
        mode: MigrationMode,
        cleanup: bool,
    },
    SetNodeRole {
        cluster: ClusterId,
        node: String,
        role: NodeRole,
        force: bool,
    },
    MigrateNode {
        cluster: ClusterId,
        node: String,
        mode: MigrationMode,
        cleanup: bool,
    },
    EvacuateNode {
        cluster: ClusterId,
        node: String,
        target: EvacuationTarget,
    },
}

impl JobOperation {
    pub fn cluster(&self) -> ClusterId {
        match self {
            JobOperation::CreateInstance { cluster, .. }
            | JobOperation::ModifyInstance { cluster, .. }
            | JobOperation::RenameInstance { cluster, .. }
            | JobOperation::MigrateInstance { cluster, .. }
            | JobOperation::SetNodeRole { cluster, .. }
            | JobOperation::MigrateNode { cluster, .. }
            | JobOperation::EvacuateNode { cluster, .. } => *cluster,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobOperation::CreateInstance { .. } => "create_instance",
            JobOperation::ModifyInstance { .. } => "modify_instance",
            JobOperation::RenameInstance { .. } => "rename_instance",
            JobOperation::MigrateInstance { .. } => "migrate_instance",
            JobOperation::SetNodeRole { .. } => "set_node_role",
            JobOperation::MigrateNode { .. } => "migrate_node",
            JobOperation::EvacuateNode { .. } => "evacuate_node",
        }
    }

    /// Human readable one-liner
    pub fn describe(&self) -> String {
        match self {
            JobOperation::CreateInstance { request, .. } => {
                let hostname = request.hostname.as_deref().unwrap_or("<unnamed>");
                if request.is_recovery() {
                    format!("Recover instance {}", hostname)
                } else {
                    format!("Create instance {}", hostname)
                }
            }
            JobOperation::ModifyInstance { hostname, .. } => format!("Modify instance {}", hostname),
            JobOperation::RenameInstance {
                hostname,
                new_hostname,
                ..
            } => format!("Rename instance {} to {}", hostname, new_hostname),
            JobOperation::MigrateInstance { hostname, mode, .. } => {
                format!("Migrate instance {} ({})", hostname, mode)
            }
            JobOperation::SetNodeRole { node, role, .. } => {
                format!("Set role of node {} to {}", node, role)
            }
            JobOperation::MigrateNode { node, mode, .. } => {
                format!("Migrate primary instances of node {} ({})", node, mode)
            }
            JobOperation::EvacuateNode { node, target, .. } => match target {
                EvacuationTarget::ExplicitNode(to) => format!("Evacuate node {} to {}", node, to),
                EvacuationTarget::AutoAllocate(allocator) => {
                    format!("Evacuate node {} using allocator {}", node, allocator)
                }
            },
        }
    }
}

/// A submitted job and, if the refresh answered in time, its state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub handle: JobHandle,
    pub info: Option<JobInfo>,
}

impl JobOutcome {
    pub fn status_known(&self) -> bool {
        self.info.is_some()
    }
}

/// What became of a request handed to a coordinator
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Dispatch<T> {
    /// Validation failed; nothing was submitted
    Rejected(ValidationResult<T>),
    Submitted { cleaned: T, outcome: JobOutcome },
}

impl<T> Dispatch<T> {
    pub fn is_submitted(&self) -> bool {
        matches!(self, Dispatch::Submitted { .. })
    }

    pub fn outcome(&self) -> Option<&JobOutcome> {
        match self {
            Dispatch::Submitted { outcome, .. } => Some(outcome),
            Dispatch::Rejected(_) => None,
        }
    }

    pub fn errors(&self) -> Option<&FieldErrors> {
        match self {
            Dispatch::Rejected(result) => Some(&result.errors),
            Dispatch::Submitted { .. } => None,
        }
    }
}

/// Submit `operation`, then refresh its status once within `refresh_timeout`.
///
/// Transport failures from either call are returned as is and not retried.
pub async fn submit_and_refresh(
    service: &dyn JobService,
    operation: &JobOperation,
    refresh_timeout: Duration,
) -> GwmResult<JobOutcome> {
    let handle = service.submit(operation).await?;
    info!(
        job_id = %handle.job_id,
        cluster = %handle.cluster,
        op = operation.name(),
        "Submitted job"
    );

    match tokio::time::timeout(refresh_timeout, service.refresh(&handle)).await {
        Ok(info) => Ok(JobOutcome {
            handle,
            info: Some(info?),
        }),
        Err(_) => {
            warn!(
                job_id = %handle.job_id,
                timeout = ?refresh_timeout,
                "Job status refresh timed out, status unknown"
            );
            Ok(JobOutcome { handle, info: None })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dry_run::{DryRunJobService, RefreshBehavior};
    use crate::error::GwmError;

    fn role_change() -> JobOperation {
        JobOperation::SetNodeRole {
            cluster: ClusterId(1),
            node: "node2.example.com".into(),
            role: NodeRole::Drained,
            force: false,
        }
    }

    #[tokio::test]
    async fn test_submit_and_refresh() {
        let service = DryRunJobService::new();
        let outcome = submit_and_refresh(&service, &role_change(), Duration::from_secs(1))
            .await
            .unwrap();

        assert!(outcome.status_known());
        let info = outcome.info.unwrap();
        assert_eq!(info.job_id, outcome.handle.job_id);
        assert_eq!(info.summary, vec!["Set role of node node2.example.com to drained"]);
        assert_eq!(service.submitted().await, vec![role_change()]);
    }

    #[tokio::test]
    async fn test_refresh_timeout_leaves_status_unknown() {
        let service =
            DryRunJobService::with_behavior(RefreshBehavior::Delay(Duration::from_millis(200)));
        let outcome = submit_and_refresh(&service, &role_change(), Duration::from_millis(10))
            .await
            .unwrap();

        assert!(!outcome.status_known());
        assert_eq!(service.submitted().await.len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failures_surface() {
        let service = DryRunJobService::with_behavior(RefreshBehavior::FailRefresh);
        let result = submit_and_refresh(&service, &role_change(), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(GwmError::Transport { .. })));

        let service = DryRunJobService::with_behavior(RefreshBehavior::FailSubmit);
        let result = submit_and_refresh(&service, &role_change(), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(GwmError::Transport { .. })));
        assert!(service.submitted().await.is_empty());
    }

    #[test]
    fn test_operation_wire_format() {
        let json = serde_json::to_value(role_change()).unwrap();
        assert_eq!(json["op"], "set_node_role");
        assert_eq!(json["role"], "drained");
        assert_eq!(role_change().cluster(), ClusterId(1));
    }
}
