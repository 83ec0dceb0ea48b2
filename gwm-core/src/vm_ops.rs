//! VM job dispatcher
//!
//! Runs one instance request end to end: build, validate, submit, record
//! and audit. Requests that consume quota hold the owner's [`QuotaGate`]
//! permit from validation until the new reservation is recorded.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::abstractions::ServiceContainer;
use crate::audit::{AuditAction, AuditEvent, AuditResource};
use crate::config::GwmConfig;
use crate::error::{GwmError, GwmResult};
use crate::jobs::{submit_and_refresh, Dispatch, JobOperation, JobOutcome};
use crate::quota::{QuotaGate, QuotaPermit};
use crate::request_builder::{ModifyContext, ModifyForm, RequestBuilder};
use crate::types::{ClusterId, Owner, Permission, ResourceRef, User, VirtualMachine};
use crate::validation::{
    InstanceMigrateRequest, MigrateInput, ModifyRequest, RenameInput, RenameRequest,
    ValidationEngine, ValidationResult, VirtualMachineRequest, VmCreateInput, VmModifyInput,
};

pub struct VmJobDispatcher {
    services: ServiceContainer,
    engine: ValidationEngine,
    builder: RequestBuilder,
    gate: Arc<QuotaGate>,
    refresh_timeout: Duration,
}

impl VmJobDispatcher {
    pub fn new(services: ServiceContainer, config: &GwmConfig) -> Self {
        let gate = Arc::new(QuotaGate::new(config.quota.serialize_per_owner));
        Self::with_gate(services, config, gate)
    }

    /// Share a quota gate with other dispatchers in the same process
    pub fn with_gate(services: ServiceContainer, config: &GwmConfig, gate: Arc<QuotaGate>) -> Self {
        Self {
            engine: ValidationEngine::from_services(&services),
            builder: RequestBuilder::from_services(&services),
            services,
            gate,
            refresh_timeout: config.jobs.refresh_timeout,
        }
    }

    async fn submit(&self, operation: &JobOperation) -> GwmResult<JobOutcome> {
        submit_and_refresh(self.services.jobs.as_ref(), operation, self.refresh_timeout).await
    }

    async fn audit(
        &self,
        action: AuditAction,
        user: &User,
        vm: (ClusterId, &str),
        outcome: &JobOutcome,
        details: serde_json::Value,
    ) {
        let event = AuditEvent::new(
            action,
            user,
            AuditResource::VirtualMachine {
                cluster: vm.0,
                hostname: vm.1.to_owned(),
            },
        )
        .with_job(outcome.handle.job_id)
        .with_details(details);
        if let Err(e) = self.services.audit.record(event).await {
            warn!(error = %e, "Failed to record audit event");
        }
    }

    /// Store the VM a submitted job will produce. The job is already queued
    /// by then, so a failing store is logged rather than returned.
    async fn record(&self, vm: VirtualMachine) {
        let hostname = vm.hostname.clone();
        if let Err(e) = self.services.repository.record_virtual_machine(vm).await {
            warn!(error = %e, vm = %hostname, "Failed to record submitted instance");
        }
    }

    async fn permit_for(&self, cluster: ClusterId, owner: Option<&Owner>) -> QuotaPermit {
        match owner {
            Some(owner) => self.gate.acquire(cluster, owner.id()).await,
            None => QuotaPermit::unheld(),
        }
    }

    /// Fail unless `user` may act on `vm`: superusers, the VM's owner, and
    /// holders of one of `permissions` on the VM or its cluster
    async fn authorize(
        &self,
        user: &User,
        vm: &VirtualMachine,
        owner: Option<&Owner>,
        permissions: &[Permission],
    ) -> GwmResult<()> {
        if user.is_superuser {
            return Ok(());
        }
        let owns = match owner {
            Some(Owner::Individual(profile)) => profile.user == user.id,
            Some(Owner::Group(org)) => user.is_member_of(org.group),
            None => false,
        };
        if owns {
            return Ok(());
        }

        let grantee = user.grantee();
        let authz = &self.services.authz;
        for resource in [
            ResourceRef::virtual_machine(vm.cluster, vm.hostname.clone()),
            ResourceRef::cluster(vm.cluster),
        ] {
            if authz.has_any_permission(grantee, permissions, &resource).await? {
                return Ok(());
            }
        }

        warn!(user = %user.username, vm = %vm.hostname, "VM operation denied");
        Err(GwmError::unauthorized(format!(
            "{} may not manage {}",
            user.username, vm.hostname
        )))
    }

    /// Validate and submit an instance creation
    #[instrument(skip(self, user, input), fields(user = %user.username))]
    pub async fn create(
        &self,
        user: &User,
        input: VmCreateInput,
    ) -> GwmResult<Dispatch<VirtualMachineRequest>> {
        let bound = self.builder.build_create(user, input).await?;
        let _permit = match &bound.form.cluster {
            Some(cluster) => self.permit_for(cluster.id, bound.form.owner.as_ref()).await,
            None => QuotaPermit::unheld(),
        };

        let result = self.engine.validate_create(&bound).await?;
        if !result.is_valid() {
            return Ok(Dispatch::Rejected(result));
        }
        let request = result.cleaned;
        let (Some(cluster), Some(hostname)) = (request.cluster, request.hostname.clone()) else {
            return Err(GwmError::internal("validated create request lacks cluster or hostname"));
        };

        let operation = JobOperation::CreateInstance {
            cluster,
            request: request.clone(),
        };
        let outcome = self.submit(&operation).await?;
        if let Some(vm) = request.to_virtual_machine() {
            self.record(vm).await;
        }
        info!(
            %hostname,
            job_id = %outcome.handle.job_id,
            recovery = request.is_recovery(),
            "Instance creation submitted"
        );

        self.audit(
            AuditAction::VmCreate,
            user,
            (cluster, &hostname),
            &outcome,
            serde_json::to_value(&request)?,
        )
        .await;
        Ok(Dispatch::Submitted {
            cleaned: request,
            outcome,
        })
    }

    /// Validate and submit a settings change in one step
    #[instrument(skip(self, user, input), fields(user = %user.username))]
    pub async fn modify(
        &self,
        user: &User,
        cluster: ClusterId,
        hostname: &str,
        input: VmModifyInput,
    ) -> GwmResult<Dispatch<ModifyRequest>> {
        let bound = self
            .builder
            .build_modify(user, cluster, hostname, input)
            .await?;
        let context = &bound.context;
        self.authorize(user, &context.vm, context.owner.as_ref(), &[Permission::Admin])
            .await?;
        let _permit = self.permit_for(cluster, context.owner.as_ref()).await;

        let result = self.engine.validate_modify(&bound).await?;
        if !result.is_valid() {
            return Ok(Dispatch::Rejected(result));
        }
        self.submit_modify(user, context, result.cleaned).await
    }

    /// Current settings of a VM, as offered for modification
    pub async fn modify_form(
        &self,
        user: &User,
        cluster: ClusterId,
        hostname: &str,
    ) -> GwmResult<ModifyForm> {
        let context = self.builder.modify_context(user, cluster, hostname).await?;
        self.authorize(user, &context.vm, context.owner.as_ref(), &[Permission::Admin])
            .await?;
        Ok(self.builder.modify_form(&context))
    }

    /// Validate a settings change without submitting it, for review
    pub async fn preview_modify(
        &self,
        user: &User,
        cluster: ClusterId,
        hostname: &str,
        input: VmModifyInput,
    ) -> GwmResult<ValidationResult<ModifyRequest>> {
        let bound = self
            .builder
            .build_modify(user, cluster, hostname, input)
            .await?;
        let context = &bound.context;
        self.authorize(user, &context.vm, context.owner.as_ref(), &[Permission::Admin])
            .await?;
        self.engine.validate_modify(&bound).await
    }

    /// Submit a change the user reviewed, validating it again first
    #[instrument(skip(self, user, change), fields(user = %user.username))]
    pub async fn confirm_modify(
        &self,
        user: &User,
        cluster: ClusterId,
        hostname: &str,
        change: ModifyRequest,
    ) -> GwmResult<Dispatch<ModifyRequest>> {
        let context = self.builder.modify_context(user, cluster, hostname).await?;
        self.authorize(user, &context.vm, context.owner.as_ref(), &[Permission::Admin])
            .await?;
        let _permit = self.permit_for(cluster, context.owner.as_ref()).await;

        let result = self.engine.validate_modify_confirm(&context, change).await?;
        if !result.is_valid() {
            return Ok(Dispatch::Rejected(result));
        }
        self.submit_modify(user, &context, result.cleaned).await
    }

    async fn submit_modify(
        &self,
        user: &User,
        context: &ModifyContext,
        change: ModifyRequest,
    ) -> GwmResult<Dispatch<ModifyRequest>> {
        let vm = &context.vm;
        let operation = JobOperation::ModifyInstance {
            cluster: vm.cluster,
            hostname: vm.hostname.clone(),
            changes: change.clone(),
        };
        let outcome = self.submit(&operation).await?;
        self.record(change.apply_to(vm)).await;

        self.audit(
            AuditAction::VmModify,
            user,
            (vm.cluster, &vm.hostname),
            &outcome,
            serde_json::to_value(&change)?,
        )
        .await;
        Ok(Dispatch::Submitted {
            cleaned: change,
            outcome,
        })
    }

    #[instrument(skip(self, user, input), fields(user = %user.username))]
    pub async fn rename(
        &self,
        user: &User,
        cluster: ClusterId,
        hostname: &str,
        input: &RenameInput,
    ) -> GwmResult<Dispatch<RenameRequest>> {
        let context = self.builder.modify_context(user, cluster, hostname).await?;
        let vm = &context.vm;
        self.authorize(user, vm, context.owner.as_ref(), &[Permission::Admin])
            .await?;

        let result = self.engine.validate_rename(vm, input).await?;
        if !result.is_valid() {
            return Ok(Dispatch::Rejected(result));
        }
        let request = result.cleaned;
        let Some(new_hostname) = request.hostname.clone() else {
            return Err(GwmError::internal("validated rename lacks a hostname"));
        };

        let operation = JobOperation::RenameInstance {
            cluster,
            hostname: vm.hostname.clone(),
            new_hostname,
            ip_check: request.ip_check,
            name_check: request.name_check,
        };
        let outcome = self.submit(&operation).await?;
        self.audit(
            AuditAction::VmRename,
            user,
            (cluster, &vm.hostname),
            &outcome,
            serde_json::to_value(&request)?,
        )
        .await;
        Ok(Dispatch::Submitted {
            cleaned: request,
            outcome,
        })
    }

    #[instrument(skip(self, user, input), fields(user = %user.username))]
    pub async fn migrate(
        &self,
        user: &User,
        cluster: ClusterId,
        hostname: &str,
        input: &MigrateInput,
    ) -> GwmResult<Dispatch<InstanceMigrateRequest>> {
        let context = self.builder.modify_context(user, cluster, hostname).await?;
        let vm = &context.vm;
        self.authorize(
            user,
            vm,
            context.owner.as_ref(),
            &[Permission::Admin, Permission::Migrate],
        )
        .await?;

        let result = self.engine.validate_instance_migrate(input);
        if !result.is_valid() {
            return Ok(Dispatch::Rejected(result));
        }
        let request = result.cleaned;
        let Some(mode) = request.mode else {
            return Err(GwmError::internal("validated migration lacks a mode"));
        };

        let operation = JobOperation::MigrateInstance {
            cluster,
            hostname: vm.hostname.clone(),
            mode,
            cleanup: request.cleanup,
        };
        let outcome = self.submit(&operation).await?;
        self.audit(
            AuditAction::VmMigrate,
            user,
            (cluster, &vm.hostname),
            &outcome,
            serde_json::to_value(&request)?,
        )
        .await;
        Ok(Dispatch::Submitted {
            cleaned: request,
            outcome,
        })
    }
}
