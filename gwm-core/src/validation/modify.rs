//! Pipelines for changes to an existing instance

use tracing::{debug, instrument};

use crate::capability::{schema_for, FieldSet, OperationKind};
use crate::error::{optional, GwmResult};
use crate::quota::{check_quota, Reservation, ResourceDemand};
use crate::request_builder::{BoundModify, ModifyContext};
use crate::types::{MigrationMode, NicSpec, VirtualMachine};
use crate::validation::checks::{
    check_capabilities, check_hv_params, hostname_error, is_mac, messages,
};
use crate::validation::{
    quota_message, ErrorKind, Field, FieldErrors, InstanceMigrateRequest, MigrateInput,
    ModifyRequest, RenameInput, RenameRequest, ValidationEngine, ValidationResult, VmModifyInput,
};

impl ValidationEngine {
    /// Validate a change to an existing VM's settings
    #[instrument(skip(self, bound), fields(vm = %bound.context.vm.hostname))]
    pub async fn validate_modify(
        &self,
        bound: &BoundModify,
    ) -> GwmResult<ValidationResult<ModifyRequest>> {
        let mut result = check_modify_fields(&bound.schema, &bound.context, &bound.input);
        if result.is_valid() {
            self.check_modify_quota(&bound.context, &mut result).await?;
        }

        debug!(errors = result.errors.len(), "Validated modify request");
        Ok(result)
    }

    /// Re-validate a change the user has already reviewed. The change comes
    /// back from the caller, and usage may have moved since it was first
    /// validated, so both the fields and the quota are checked again.
    #[instrument(skip(self, context, change), fields(vm = %context.vm.hostname))]
    pub async fn validate_modify_confirm(
        &self,
        context: &ModifyContext,
        change: ModifyRequest,
    ) -> GwmResult<ValidationResult<ModifyRequest>> {
        let vm = &context.vm;
        let schema = schema_for(vm.hypervisor, Some(vm.disk_template), OperationKind::Modify);
        let mut input = VmModifyInput::from(change);
        input.hvparams.normalize();
        input.hvparams.prune(&schema);

        let mut result = check_modify_fields(&schema, context, &input);
        if result.is_valid() {
            self.check_modify_quota(context, &mut result).await?;
        }

        debug!(errors = result.errors.len(), "Validated confirmed modify request");
        Ok(result)
    }

    async fn check_modify_quota(
        &self,
        context: &ModifyContext,
        result: &mut ValidationResult<ModifyRequest>,
    ) -> GwmResult<()> {
        let Some(owner) = &context.owner else {
            return Ok(());
        };
        let vm = &context.vm;
        let cleaned = &result.cleaned;

        let used = self
            .repository
            .used_resources(context.cluster.id, owner.id())
            .await?;
        let demand = ResourceDemand {
            memory: cleaned.memory.unwrap_or(vm.ram),
            vcpus: cleaned.vcpus.unwrap_or(vm.virtual_cpus),
            disk_size: None,
            start: cleaned.reboot || vm.is_running,
        };
        let previous = Reservation::of(vm);
        let violations = check_quota(
            &context.cluster.quota_for(owner.id()),
            &used,
            &demand,
            Some(&previous),
        );

        for violation in violations {
            debug!(%violation, owner = %owner.id(), "Quota exceeded");
            let field = violation.resource.field();
            result.errors.add(
                field,
                ErrorKind::QuotaExceeded,
                quota_message(&violation, OperationKind::Modify),
            );
            result.cleaned.drop_field(field);
        }
        Ok(())
    }

    /// Validate a new name for `vm`
    #[instrument(skip(self, vm, input), fields(vm = %vm.hostname))]
    pub async fn validate_rename(
        &self,
        vm: &VirtualMachine,
        input: &RenameInput,
    ) -> GwmResult<ValidationResult<RenameRequest>> {
        let mut result = ValidationResult::new(RenameRequest {
            hostname: None,
            ip_check: input.ip_check.unwrap_or(true),
            name_check: input.name_check.unwrap_or(true),
        });

        let hostname = input
            .hostname
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty());
        let Some(hostname) = hostname else {
            result
                .errors
                .add(Field::Hostname, ErrorKind::Invalid, messages::REQUIRED);
            return Ok(result);
        };

        if let Some(message) = hostname_error(hostname) {
            result.errors.add(Field::Hostname, ErrorKind::Invalid, message);
        } else if hostname == vm.hostname {
            result
                .errors
                .add(Field::Hostname, ErrorKind::Invalid, messages::HOSTNAME_UNCHANGED);
        } else if optional(self.repository.virtual_machine(vm.cluster, hostname).await)?.is_some() {
            result
                .errors
                .add(Field::Hostname, ErrorKind::Conflict, messages::HOSTNAME_IN_USE);
        } else {
            result.cleaned.hostname = Some(hostname.to_owned());
        }

        Ok(result)
    }

    /// Validate a live or non-live migration of one instance
    pub fn validate_instance_migrate(
        &self,
        input: &MigrateInput,
    ) -> ValidationResult<InstanceMigrateRequest> {
        let (mode, errors) = migration_mode(input);
        ValidationResult {
            cleaned: InstanceMigrateRequest {
                mode,
                cleanup: input.cleanup,
            },
            errors,
        }
    }
}

/// Field, capability and NIC checks shared by every modify pipeline
fn check_modify_fields(
    schema: &FieldSet,
    context: &ModifyContext,
    input: &VmModifyInput,
) -> ValidationResult<ModifyRequest> {
    let mut errors = FieldErrors::new();
    let mut cleaned = ModifyRequest {
        reboot: input.reboot,
        ..Default::default()
    };

    for field in schema.required() {
        if !input.is_present(field) {
            errors.add(field, ErrorKind::Invalid, messages::REQUIRED);
        }
    }

    if let Some(vcpus) = input.vcpus {
        match u32::try_from(vcpus) {
            Ok(vcpus) if vcpus >= 1 => cleaned.vcpus = Some(vcpus),
            _ => errors.add(Field::Vcpus, ErrorKind::Invalid, messages::VCPUS),
        }
    }
    if let Some(memory) = input.memory {
        if memory < 100 {
            errors.add(Field::Memory, ErrorKind::Invalid, messages::MEMORY_MIN);
        } else {
            cleaned.memory = Some(memory as u64);
        }
    }

    if let Some(os) = input.os.as_deref().map(str::trim).filter(|os| !os.is_empty()) {
        let choices = &context.cluster.operating_systems;
        if choices.iter().any(|choice| choice == os) {
            cleaned.os = Some(os.to_owned());
        } else {
            errors.add(Field::Os, ErrorKind::Invalid, messages::not_a_choice(os));
        }
    }

    cleaned.hvparams = input.hvparams.clone();
    check_hv_params(schema, &mut cleaned.hvparams, &mut errors);

    let has_initrd = cleaned.hvparams.is_set(Field::InitrdPath);
    if has_initrd && !cleaned.hvparams.is_set(Field::KernelPath) {
        errors.add(Field::KernelPath, ErrorKind::Invalid, messages::KERNEL_FOR_INITRD);
        errors.add(Field::InitrdPath, ErrorKind::Invalid, messages::KERNEL_FOR_INITRD);
        cleaned.hvparams.clear(Field::InitrdPath);
    }

    for (index, nic) in input.nics.iter().enumerate() {
        let mac = nic.mac.as_deref().map(str::trim).unwrap_or_default();
        let link = nic.link.as_deref().map(str::trim).unwrap_or_default();

        if mac.is_empty() {
            errors.add(Field::NicMac(index), ErrorKind::Invalid, messages::REQUIRED);
        } else if !is_mac(mac) {
            errors.add(Field::NicMac(index), ErrorKind::Invalid, messages::MAC);
        }
        if link.is_empty() {
            errors.add(Field::NicLinkAt(index), ErrorKind::Invalid, messages::REQUIRED);
        }

        cleaned.nics.push(NicSpec {
            mac: mac.to_owned(),
            link: link.to_owned(),
        });
    }
    let nic_errors = (0..input.nics.len())
        .any(|i| errors.contains(Field::NicMac(i)) || errors.contains(Field::NicLinkAt(i)));
    if nic_errors {
        cleaned.nics.clear();
    }

    check_capabilities(context.vm.hypervisor, &mut cleaned.hvparams, &mut errors);

    ValidationResult { cleaned, errors }
}

/// Parse the requested migration mode
pub(crate) fn migration_mode(input: &MigrateInput) -> (Option<MigrationMode>, FieldErrors) {
    let mut errors = FieldErrors::new();
    let mode = match input.mode.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
        None => {
            errors.add(Field::Mode, ErrorKind::Invalid, messages::REQUIRED);
            None
        }
        Some(value) => match value.parse::<MigrationMode>() {
            Ok(mode) => Some(mode),
            Err(_) => {
                errors.add(Field::Mode, ErrorKind::Invalid, messages::not_a_choice(value));
                None
            }
        },
    };
    (mode, errors)
}
