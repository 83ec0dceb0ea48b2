//! Audit log of accepted node and VM operations
//!
//! Each operation that reaches the job service leaves one [`AuditEvent`]
//! naming who did what to which object and which job carries it out.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::error::GwmResult;
use crate::jobs::JobId;
use crate::types::{ClusterId, User, UserId};

/// Logged action names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    NodeRoleChange,
    NodeMigrate,
    NodeEvacuate,
    VmCreate,
    VmModify,
    VmRename,
    VmMigrate,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::NodeRoleChange => "NODE_ROLE_CHANGE",
            AuditAction::NodeMigrate => "NODE_MIGRATE",
            AuditAction::NodeEvacuate => "NODE_EVACUATE",
            AuditAction::VmCreate => "VM_CREATE",
            AuditAction::VmModify => "VM_MODIFY",
            AuditAction::VmRename => "VM_RENAME",
            AuditAction::VmMigrate => "VM_MIGRATE",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User that triggered the event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditActor {
    pub id: UserId,
    pub username: String,
}

impl From<&User> for AuditActor {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
        }
    }
}

/// Object the event is about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditResource {
    Node { cluster: ClusterId, hostname: String },
    VirtualMachine { cluster: ClusterId, hostname: String },
}

impl fmt::Display for AuditResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditResource::Node { cluster, hostname } => write!(f, "node:{}/{}", cluster, hostname),
            AuditResource::VirtualMachine { cluster, hostname } => {
                write!(f, "vm:{}/{}", cluster, hostname)
            }
        }
    }
}

/// Audit event entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub actor: AuditActor,
    pub resource: AuditResource,
    /// Job carrying out the action
    pub job: Option<JobId>,
    /// Additional context
    pub details: serde_json::Value,
}

impl AuditEvent {
    pub fn new(action: AuditAction, actor: &User, resource: AuditResource) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            action,
            actor: AuditActor::from(actor),
            resource,
            job: None,
            details: serde_json::Value::Null,
        }
    }

    pub fn with_job(mut self, job: JobId) -> Self {
        self.job = Some(job);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Destination of audit events
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> GwmResult<()>;
}

/// Writes audit events as structured tracing output
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) -> GwmResult<()> {
        info!(
            event_id = %event.id,
            action = %event.action,
            actor = %event.actor.username,
            resource = %event.resource,
            job = ?event.job,
            "{}", event.action
        );
        Ok(())
    }
}

/// Keeps audit events in memory
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: RwLock<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }

    pub async fn actions(&self) -> Vec<AuditAction> {
        self.events.read().await.iter().map(|e| e.action).collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: AuditEvent) -> GwmResult<()> {
        self.events.write().await.push(event);
        Ok(())
    }
}
