//! Node operation coordinator
//!
//! Role changes, migrations and evacuations of a single node. Each one is
//! authorized against the node's cluster before its input is looked at,
//! then validated, submitted as one job and audited.

use serde::Serialize;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::abstractions::ServiceContainer;
use crate::audit::{AuditAction, AuditEvent, AuditResource};
use crate::config::GwmConfig;
use crate::error::{GwmError, GwmResult};
use crate::jobs::{submit_and_refresh, Dispatch, JobOperation};
use crate::types::{Cluster, ClusterId, Node, NodeRole, Permission, ResourceRef, User};
use crate::validation::{
    EvacuateInput, MigrateInput, NodeOperationRequest, NodeValidation, RoleChangeInput,
    ValidationEngine,
};

/// Outcome of a node operation
pub type NodeDispatch = Dispatch<Option<NodeOperationRequest>>;

/// Values to present when asking for a node's new role
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoleForm {
    /// May be `master`, which is never offered as a choice
    pub current: NodeRole,
    pub choices: Vec<NodeRole>,
}

/// Values to present when asking where to evacuate a node to
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvacuateForm {
    pub iallocator: bool,
    pub iallocator_hostname: Option<String>,
    /// Every other node of the cluster
    pub node_choices: Vec<String>,
}

pub struct NodeOperationCoordinator {
    services: ServiceContainer,
    engine: ValidationEngine,
    role_change_requires_admin: bool,
    refresh_timeout: Duration,
}

impl NodeOperationCoordinator {
    pub fn new(services: ServiceContainer, config: &GwmConfig) -> Self {
        Self {
            engine: ValidationEngine::from_services(&services),
            services,
            role_change_requires_admin: config.node_ops.role_change_requires_admin,
            refresh_timeout: config.jobs.refresh_timeout,
        }
    }

    fn role_change_permissions(&self) -> &'static [Permission] {
        if self.role_change_requires_admin {
            &[Permission::Admin]
        } else {
            &[Permission::Admin, Permission::Migrate]
        }
    }

    /// Fail unless `user` holds one of `permissions` on `cluster`
    async fn authorize(
        &self,
        user: &User,
        cluster: &Cluster,
        permissions: &[Permission],
    ) -> GwmResult<()> {
        if user.is_superuser {
            return Ok(());
        }
        let permitted = self
            .services
            .authz
            .has_any_permission(user.grantee(), permissions, &ResourceRef::cluster(cluster.id))
            .await?;
        if permitted {
            Ok(())
        } else {
            warn!(user = %user.username, cluster = %cluster.slug, "Node operation denied");
            Err(GwmError::unauthorized(format!(
                "{} may not manage nodes of cluster {}",
                user.username, cluster.slug
            )))
        }
    }

    async fn lookup(&self, cluster: ClusterId, node: &str) -> GwmResult<(Cluster, Node)> {
        let cluster = self.services.repository.cluster(cluster).await?;
        let node = self.services.repository.node(cluster.id, node).await?;
        Ok((cluster, node))
    }

    /// Current role of a node and the roles it may be given
    pub async fn role_form_initial(
        &self,
        user: &User,
        cluster: ClusterId,
        node: &str,
    ) -> GwmResult<RoleForm> {
        let (cluster, node) = self.lookup(cluster, node).await?;
        self.authorize(user, &cluster, self.role_change_permissions())
            .await?;
        Ok(RoleForm {
            current: node.role,
            choices: NodeRole::ASSIGNABLE.to_vec(),
        })
    }

    /// Initial evacuation choices for a node
    pub async fn evacuate_form(
        &self,
        user: &User,
        cluster: ClusterId,
        node: &str,
    ) -> GwmResult<EvacuateForm> {
        let (cluster, node) = self.lookup(cluster, node).await?;
        self.authorize(user, &cluster, &[Permission::Admin, Permission::Migrate])
            .await?;
        let defaults = self.services.defaults.defaults(&cluster).await?;
        let iallocator_hostname = defaults.iallocator_hostname().map(str::to_owned);

        Ok(EvacuateForm {
            iallocator: iallocator_hostname.is_some(),
            iallocator_hostname,
            node_choices: cluster
                .node_names()
                .into_iter()
                .filter(|name| *name != node.hostname)
                .collect(),
        })
    }

    #[instrument(skip(self, user, input), fields(user = %user.username))]
    pub async fn change_role(
        &self,
        user: &User,
        cluster: ClusterId,
        node: &str,
        input: &RoleChangeInput,
    ) -> GwmResult<NodeDispatch> {
        let (cluster, node) = self.lookup(cluster, node).await?;
        self.authorize(user, &cluster, self.role_change_permissions())
            .await?;

        let result = self.engine.validate_role_change(input);
        self.dispatch(user, &cluster, &node, result, AuditAction::NodeRoleChange)
            .await
    }

    #[instrument(skip(self, user, input), fields(user = %user.username))]
    pub async fn migrate(
        &self,
        user: &User,
        cluster: ClusterId,
        node: &str,
        input: &MigrateInput,
    ) -> GwmResult<NodeDispatch> {
        let (cluster, node) = self.lookup(cluster, node).await?;
        self.authorize(user, &cluster, &[Permission::Admin, Permission::Migrate])
            .await?;

        let result = self.engine.validate_node_migrate(input);
        self.dispatch(user, &cluster, &node, result, AuditAction::NodeMigrate)
            .await
    }

    #[instrument(skip(self, user, input), fields(user = %user.username))]
    pub async fn evacuate(
        &self,
        user: &User,
        cluster: ClusterId,
        node: &str,
        input: &EvacuateInput,
    ) -> GwmResult<NodeDispatch> {
        let (cluster, node) = self.lookup(cluster, node).await?;
        self.authorize(user, &cluster, &[Permission::Admin, Permission::Migrate])
            .await?;

        let defaults = self.services.defaults.defaults(&cluster).await?;
        let result = self
            .engine
            .validate_evacuate(&cluster, &node.hostname, Some(&defaults), input);
        self.dispatch(user, &cluster, &node, result, AuditAction::NodeEvacuate)
            .await
    }

    async fn dispatch(
        &self,
        user: &User,
        cluster: &Cluster,
        node: &Node,
        result: NodeValidation,
        action: AuditAction,
    ) -> GwmResult<NodeDispatch> {
        if !result.is_valid() {
            return Ok(Dispatch::Rejected(result));
        }
        let Some(request) = result.cleaned.clone() else {
            return Ok(Dispatch::Rejected(result));
        };

        let operation = job_for(cluster.id, &node.hostname, &request);
        let outcome =
            submit_and_refresh(self.services.jobs.as_ref(), &operation, self.refresh_timeout)
                .await?;
        info!(
            node = %node.hostname,
            job_id = %outcome.handle.job_id,
            op = operation.name(),
            "Node operation submitted"
        );

        let event = AuditEvent::new(
            action,
            user,
            AuditResource::Node {
                cluster: cluster.id,
                hostname: node.hostname.clone(),
            },
        )
        .with_job(outcome.handle.job_id)
        .with_details(serde_json::to_value(&request)?);
        if let Err(e) = self.services.audit.record(event).await {
            warn!(error = %e, "Failed to record audit event");
        }

        Ok(Dispatch::Submitted {
            cleaned: Some(request),
            outcome,
        })
    }
}

fn job_for(cluster: ClusterId, node: &str, request: &NodeOperationRequest) -> JobOperation {
    let node = node.to_owned();
    match request {
        NodeOperationRequest::RoleChange { new_role, force } => JobOperation::SetNodeRole {
            cluster,
            node,
            role: *new_role,
            force: *force,
        },
        NodeOperationRequest::Migrate { mode, cleanup } => JobOperation::MigrateNode {
            cluster,
            node,
            mode: *mode,
            cleanup: *cleanup,
        },
        NodeOperationRequest::Evacuate { target } => JobOperation::EvacuateNode {
            cluster,
            node,
            target: target.clone(),
        },
    }
}
