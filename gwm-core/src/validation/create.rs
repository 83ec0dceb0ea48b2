//! Instance creation pipeline

use tracing::{debug, instrument};

use crate::capability::{constants, OperationKind};
use crate::error::{optional, GwmResult};
use crate::quota::{check_quota, Reservation, ResourceDemand};
use crate::request_builder::{BoundCreate, CREATE_PERMISSIONS};
use crate::types::{DiskTemplate, Hypervisor, NicMode, Owner, ResourceRef};
use crate::validation::checks::{check_capabilities, check_hv_params, hostname_error, messages};
use crate::validation::{
    quota_message, ErrorKind, Field, FieldErrors, ValidationEngine, ValidationResult,
    VirtualMachineRequest,
};

impl ValidationEngine {
    /// Validate an instance creation request.
    ///
    /// Field, structure and capability checks always all run. Authorization
    /// and quota are only checked once those found nothing.
    #[instrument(skip(self, bound), fields(user = %bound.form.user.username))]
    pub async fn validate_create(
        &self,
        bound: &BoundCreate,
    ) -> GwmResult<ValidationResult<VirtualMachineRequest>> {
        let mut result = self.create_fields(bound).await?;
        check_structure(bound, &mut result);
        check_create_capabilities(bound, &mut result);

        if result.is_valid() {
            self.check_access(bound, &mut result).await?;
        }

        debug!(
            hostname = ?result.cleaned.hostname,
            errors = result.errors.len(),
            recovery = result.cleaned.is_recovery(),
            "Validated create request"
        );
        Ok(result)
    }

    async fn create_fields(
        &self,
        bound: &BoundCreate,
    ) -> GwmResult<ValidationResult<VirtualMachineRequest>> {
        let form = &bound.form;
        let input = &bound.input;
        let mut errors = FieldErrors::new();
        let mut cleaned = VirtualMachineRequest {
            iallocator: input.iallocator,
            start: input.start.unwrap_or(true),
            name_check: input.name_check.unwrap_or(true),
            ip_check: input.ip_check.unwrap_or(true),
            ..Default::default()
        };

        // Hypervisor params can only be judged once the cluster is known
        let cluster_known = form.cluster.is_some();
        for field in form.schema.required() {
            if !cluster_known && Field::HV_PARAMS.contains(&field) {
                continue;
            }
            if !input.is_present(field) {
                errors.add(field, ErrorKind::Invalid, messages::REQUIRED);
            }
        }

        if let Some(id) = input.owner {
            match &form.owner {
                Some(owner) if form.owner_choices.contains(&owner.id()) => {
                    cleaned.owner = Some(id)
                }
                _ => errors.add(Field::Owner, ErrorKind::Invalid, messages::INVALID_CHOICE),
            }
        }

        if let Some(id) = input.cluster {
            match &form.cluster {
                Some(cluster) if form.cluster_choices.contains(&cluster.id) => {
                    cleaned.cluster = Some(id)
                }
                _ => errors.add(Field::Cluster, ErrorKind::Invalid, messages::INVALID_CHOICE),
            }
        }

        if let Some(value) = present(&input.hypervisor) {
            match value.parse::<Hypervisor>() {
                Ok(hv) if form.hypervisor_choices.contains(&hv) => cleaned.hypervisor = Some(hv),
                _ => errors.add(
                    Field::Hypervisor,
                    ErrorKind::Invalid,
                    messages::not_a_choice(value),
                ),
            }
        } else {
            cleaned.hypervisor = Some(form.hypervisor);
        }

        if let Some(value) = present(&input.disk_template) {
            match value.parse::<DiskTemplate>() {
                Ok(template) => cleaned.disk_template = Some(template),
                Err(_) => errors.add(
                    Field::DiskTemplate,
                    ErrorKind::Invalid,
                    messages::not_a_choice(value),
                ),
            }
        }

        if let Some(value) = present(&input.nic_mode) {
            match value.parse::<NicMode>() {
                Ok(mode) => cleaned.nic_mode = Some(mode),
                Err(_) => {
                    errors.add(Field::NicMode, ErrorKind::Invalid, messages::not_a_choice(value))
                }
            }
        }

        if let Some(os) = present(&input.os) {
            if !cluster_known || form.os_choices.iter().any(|choice| choice == os) {
                cleaned.os = Some(os.to_owned());
            } else {
                errors.add(Field::Os, ErrorKind::Invalid, messages::not_a_choice(os));
            }
        }

        for (field, value) in [(Field::Pnode, &input.pnode), (Field::Snode, &input.snode)] {
            let Some(node) = present(value) else {
                continue;
            };
            if !cluster_known || form.node_choices.iter().any(|choice| choice == node) {
                match field {
                    Field::Pnode => cleaned.pnode = Some(node.to_owned()),
                    _ => cleaned.snode = Some(node.to_owned()),
                }
            } else {
                errors.add(field, ErrorKind::Invalid, messages::not_a_choice(node));
            }
        }

        if let Some(vcpus) = input.vcpus {
            match u32::try_from(vcpus) {
                Ok(vcpus) if vcpus >= 1 => cleaned.vcpus = Some(vcpus),
                _ => errors.add(Field::Vcpus, ErrorKind::Invalid, messages::VCPUS),
            }
        }

        for (field, value) in [
            (Field::Memory, input.memory),
            (Field::DiskSize, input.disk_size),
        ] {
            let Some(value) = value else {
                continue;
            };
            if value < 100 {
                errors.add(field, ErrorKind::Invalid, messages::MEMORY_MIN);
            } else if field == Field::Memory {
                cleaned.memory = Some(value as u64);
            } else {
                cleaned.disk_size = Some(value as u64);
            }
        }

        cleaned.nic_link = present(&input.nic_link).map(str::to_owned);
        cleaned.iallocator_hostname = present(&input.iallocator_hostname).map(str::to_owned);

        cleaned.hvparams = input.hvparams.clone();
        check_hv_params(&form.schema, &mut cleaned.hvparams, &mut errors);

        if let Some(hostname) = present(&input.hostname) {
            match hostname_error(hostname) {
                Some(message) => errors.add(Field::Hostname, ErrorKind::Invalid, message),
                None => {
                    cleaned.hostname = Some(hostname.to_owned());
                    self.check_hostname_use(bound, hostname, &mut cleaned, &mut errors)
                        .await?;
                }
            }
        }

        Ok(ValidationResult { cleaned, errors })
    }

    /// A hostname already on the cluster is only acceptable when it names a
    /// failed deployment of the same owner, which this request recovers.
    async fn check_hostname_use(
        &self,
        bound: &BoundCreate,
        hostname: &str,
        cleaned: &mut VirtualMachineRequest,
        errors: &mut FieldErrors,
    ) -> GwmResult<()> {
        let Some(cluster) = &bound.form.cluster else {
            return Ok(());
        };
        // Hostnames are only looked up on a cluster the user may pick
        if errors.contains(Field::Cluster) {
            return Ok(());
        }
        let Some(existing) =
            optional(self.repository.virtual_machine(cluster.id, hostname).await)?
        else {
            return Ok(());
        };

        let recoverable = !existing.pending_delete && existing.template.is_none();
        if !recoverable {
            errors.add(Field::Hostname, ErrorKind::Conflict, messages::HOSTNAME_IN_USE);
            cleaned.hostname = None;
            return Ok(());
        }

        match cleaned.owner {
            Some(owner) if existing.owner == Some(owner) => {
                debug!(%hostname, cluster = %cluster.id, "Request recovers a failed deployment");
                cleaned.recovery = Some(existing);
            }
            Some(_) => {
                errors.add(Field::Owner, ErrorKind::Conflict, messages::RECOVERY_OWNER);
                cleaned.owner = None;
            }
            None => {}
        }
        Ok(())
    }

    async fn check_access(
        &self,
        bound: &BoundCreate,
        result: &mut ValidationResult<VirtualMachineRequest>,
    ) -> GwmResult<()> {
        let form = &bound.form;
        let (Some(owner), Some(cluster)) = (&form.owner, &form.cluster) else {
            return Ok(());
        };
        result.cleaned.grantee = Some(owner.grantee());

        let user = &form.user;
        if user.is_superuser {
            return Ok(());
        }

        let denial = match owner {
            Owner::Group(org) if !user.is_member_of(org.group) => Some(messages::NOT_MEMBER),
            Owner::Individual(profile) if profile.user != user.id => Some(messages::NOT_SELF),
            _ => None,
        };
        let denial = match denial {
            Some(message) => Some(message),
            None => {
                let permitted = self
                    .authz
                    .has_any_permission(
                        owner.grantee(),
                        &CREATE_PERMISSIONS,
                        &ResourceRef::cluster(cluster.id),
                    )
                    .await?;
                (!permitted).then_some(messages::NO_CLUSTER_PERMS)
            }
        };
        if let Some(message) = denial {
            debug!(owner = %owner.id(), cluster = %cluster.id, reason = message, "Create denied");
            result
                .errors
                .add(Field::Owner, ErrorKind::Authorization, message);
            result.cleaned.drop_field(Field::Owner);
            return Ok(());
        }

        let used = self.repository.used_resources(cluster.id, owner.id()).await?;
        let cleaned = &result.cleaned;
        let demand = ResourceDemand {
            memory: cleaned.memory.unwrap_or(0),
            vcpus: cleaned.vcpus.unwrap_or(0),
            disk_size: cleaned.disk_size,
            start: cleaned.start,
        };
        let previous = cleaned.recovery.as_ref().map(Reservation::of);
        let violations = check_quota(
            &cluster.quota_for(owner.id()),
            &used,
            &demand,
            previous.as_ref(),
        );

        for violation in violations {
            debug!(%violation, owner = %owner.id(), "Quota exceeded");
            let field = violation.resource.field();
            result.errors.add(
                field,
                ErrorKind::QuotaExceeded,
                quota_message(&violation, OperationKind::Create),
            );
            result.cleaned.drop_field(field);
        }
        Ok(())
    }
}

/// Cross-field rules on the cleaned values
fn check_structure(bound: &BoundCreate, result: &mut ValidationResult<VirtualMachineRequest>) {
    let ValidationResult { cleaned, errors } = result;

    if bound.form.schema.is_allowed(Field::DiskSize) && cleaned.disk_size.unwrap_or(0) == 0 {
        errors.set(Field::DiskSize, ErrorKind::Invalid, messages::DISK_SIZE);
        cleaned.disk_size = None;
    }

    if cleaned.disk_template == Some(DiskTemplate::Drbd) && !cleaned.iallocator {
        if cleaned.pnode.is_some() && cleaned.pnode == cleaned.snode {
            errors.add(Field::Pnode, ErrorKind::Invalid, messages::NODES_MATCH);
            cleaned.pnode = None;
            cleaned.snode = None;
        }
    } else {
        errors.clear(Field::Snode);
    }

    let boots_from_cdrom = cleaned.hvparams.text(Field::BootOrder) == Some(constants::BOOT_CDROM);
    if boots_from_cdrom && !cleaned.hvparams.is_set(Field::CdromImagePath) {
        errors.set(Field::CdromImagePath, ErrorKind::Invalid, messages::CDROM_IMAGE);
    }

    if cleaned.iallocator {
        if cleaned.iallocator_hostname.is_some() {
            errors.clear(Field::Pnode);
            errors.clear(Field::Snode);
        } else {
            errors.set(Field::Iallocator, ErrorKind::Invalid, messages::NO_IALLOCATOR);
        }
    }
}

fn check_create_capabilities(
    bound: &BoundCreate,
    result: &mut ValidationResult<VirtualMachineRequest>,
) {
    let hypervisor = result
        .cleaned
        .hypervisor
        .or(bound.form.defaults.as_ref().map(|d| d.hypervisor))
        .unwrap_or(bound.form.hypervisor);
    check_capabilities(hypervisor, &mut result.cleaned.hvparams, &mut result.errors);
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
