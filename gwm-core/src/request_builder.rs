//! Request builder
//!
//! Turns a raw request into something the validation engine can check:
//! resolves the owner and cluster it names, looks up cluster defaults,
//! picks the schema for the hypervisor and disk template, and works out
//! which owners and clusters the acting user may choose from.
//!
//! Missing owners and clusters are not errors here. They resolve to `None`
//! and validation reports them against the field that named them.

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use crate::abstractions::{
    AuthorizationOracle, ClusterDefaults, ClusterDefaultsProvider, Repository, ServiceContainer,
};
use crate::capability::{schema_for, FieldSet, OperationKind, GENERAL_FIELDS};
use crate::error::{optional, GwmResult};
use crate::types::{
    Cluster, ClusterId, ClusterUserId, DiskTemplate, HvParams, Hypervisor, Owner, Permission,
    ResourceKind, ResourceRef, User, VirtualMachine,
};
use crate::validation::{Field, VmCreateInput, VmModifyInput};

/// Permissions that let an owner place VMs on a cluster
pub const CREATE_PERMISSIONS: [Permission; 2] = [Permission::Admin, Permission::CreateVm];

/// Values a choice field accepts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChoiceSet<T: Ord> {
    Any,
    Only(BTreeSet<T>),
}

impl<T: Ord> ChoiceSet<T> {
    pub fn contains(&self, value: &T) -> bool {
        match self {
            ChoiceSet::Any => true,
            ChoiceSet::Only(values) => values.contains(value),
        }
    }
}

impl<T: Ord> FromIterator<T> for ChoiceSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        ChoiceSet::Only(iter.into_iter().collect())
    }
}

/// Everything needed to validate an instance creation request
#[derive(Debug, Clone)]
pub struct CreateForm {
    pub user: User,
    pub owner: Option<Owner>,
    pub cluster: Option<Cluster>,
    pub defaults: Option<ClusterDefaults>,
    /// Hypervisor the schema was selected for
    pub hypervisor: Hypervisor,
    pub schema: FieldSet,
    pub owner_choices: ChoiceSet<ClusterUserId>,
    pub cluster_choices: ChoiceSet<ClusterId>,
    pub hypervisor_choices: Vec<Hypervisor>,
    pub node_choices: Vec<String>,
    pub os_choices: Vec<String>,
    /// Values to pre-fill when presenting the request for editing
    pub initial: VmCreateInput,
}

/// A creation request bound to its form: defaults applied and fields the
/// schema excludes removed
#[derive(Debug, Clone)]
pub struct BoundCreate {
    pub form: CreateForm,
    pub input: VmCreateInput,
}

impl CreateForm {
    /// Apply cluster defaults to `input` and drop excluded fields
    pub fn bind(self, mut input: VmCreateInput) -> BoundCreate {
        if let Some(defaults) = &self.defaults {
            if input.hypervisor.as_deref().map_or(true, str::is_empty) {
                input.hypervisor = Some(defaults.hypervisor.to_string());
            }
            input.memory = input.memory.or(Some(defaults.memory as i64));
            input.vcpus = input.vcpus.or(Some(i64::from(defaults.vcpus)));
            if !input.is_present(Field::NicLink) {
                input.nic_link = defaults.nic_link.clone();
            }
            if !input.is_present(Field::IallocatorHostname) {
                input.iallocator_hostname = defaults.iallocator_hostname().map(str::to_owned);
            }
        }

        input.hvparams.normalize();
        for field in GENERAL_FIELDS.iter().chain(Field::HV_PARAMS.iter()) {
            if !self.schema.is_allowed(*field) {
                input.clear(*field);
            }
        }

        BoundCreate { form: self, input }
    }
}

/// An existing VM and the objects a change to it is checked against
#[derive(Debug, Clone)]
pub struct ModifyContext {
    pub user: User,
    pub vm: VirtualMachine,
    pub cluster: Cluster,
    pub owner: Option<Owner>,
}

/// A modification request bound to its VM
#[derive(Debug, Clone)]
pub struct BoundModify {
    pub context: ModifyContext,
    pub schema: FieldSet,
    pub input: VmModifyInput,
}

/// Values to pre-fill when presenting a VM for modification
#[derive(Debug, Clone, Serialize)]
pub struct ModifyForm {
    pub schema: FieldSet,
    pub vcpus: u32,
    pub memory: u64,
    pub os: Option<String>,
    pub hvparams: HvParams,
    pub os_choices: Vec<String>,
}

#[derive(Clone)]
pub struct RequestBuilder {
    repository: Arc<dyn Repository>,
    authz: Arc<dyn AuthorizationOracle>,
    defaults: Arc<dyn ClusterDefaultsProvider>,
}

impl RequestBuilder {
    pub fn new(
        repository: Arc<dyn Repository>,
        authz: Arc<dyn AuthorizationOracle>,
        defaults: Arc<dyn ClusterDefaultsProvider>,
    ) -> Self {
        Self {
            repository,
            authz,
            defaults,
        }
    }

    pub fn from_services(services: &ServiceContainer) -> Self {
        Self::new(
            services.repository.clone(),
            services.authz.clone(),
            services.defaults.clone(),
        )
    }

    /// Resolve everything a creation request refers to
    pub async fn create_form(&self, user: &User, initial: &VmCreateInput) -> GwmResult<CreateForm> {
        let owner = match initial.owner {
            Some(id) => optional(self.repository.owner(id).await)?,
            None => None,
        };
        let cluster = match initial.cluster {
            Some(id) => optional(self.repository.cluster(id).await)?,
            None => None,
        };
        let defaults = match &cluster {
            Some(cluster) => Some(self.defaults.defaults(cluster).await?),
            None => None,
        };

        let hypervisor_choices = match &defaults {
            Some(d) if !d.hypervisors.is_empty() => d.hypervisors.clone(),
            Some(d) => vec![d.hypervisor],
            None => Hypervisor::ALL.to_vec(),
        };
        let requested_hv = initial
            .hypervisor
            .as_deref()
            .and_then(|hv| hv.parse::<Hypervisor>().ok())
            .filter(|hv| hypervisor_choices.contains(hv));
        let hypervisor = requested_hv
            .or(defaults.as_ref().map(|d| d.hypervisor))
            .unwrap_or(Hypervisor::Kvm);
        let disk_template = initial
            .disk_template
            .as_deref()
            .and_then(|t| t.parse::<DiskTemplate>().ok());
        let schema = schema_for(hypervisor, disk_template, OperationKind::Create);

        let owner_choices = self.owner_choices(user).await?;
        let cluster_choices = self.cluster_choices(user, owner.as_ref()).await?;

        let (node_choices, os_choices) = match &cluster {
            Some(cluster) => (cluster.node_names(), cluster.operating_systems.clone()),
            None => (Vec::new(), Vec::new()),
        };

        let initial = initial_values(hypervisor, defaults.as_ref(), &schema);

        debug!(
            user = %user.username,
            %hypervisor,
            cluster = ?cluster.as_ref().map(|c| c.id),
            owner = ?owner.as_ref().map(Owner::id),
            "Built create form"
        );

        Ok(CreateForm {
            user: user.clone(),
            owner,
            cluster,
            defaults,
            hypervisor,
            schema,
            owner_choices,
            cluster_choices,
            hypervisor_choices,
            node_choices,
            os_choices,
            initial,
        })
    }

    /// Resolve and bind a creation request in one go
    pub async fn build_create(&self, user: &User, input: VmCreateInput) -> GwmResult<BoundCreate> {
        let form = self.create_form(user, &input).await?;
        Ok(form.bind(input))
    }

    /// Owners `user` may create VMs for. Superusers may pick anyone; other
    /// users pick among their groups, and themselves when they hold create
    /// rights on some cluster.
    async fn owner_choices(&self, user: &User) -> GwmResult<ChoiceSet<ClusterUserId>> {
        if user.is_superuser {
            return Ok(ChoiceSet::Any);
        }

        let mut owners = BTreeSet::new();
        for group in &user.groups {
            if let Some(org) = optional(self.repository.organization_for_group(*group).await)? {
                owners.insert(org.id);
            }
        }

        if let Some(profile) = user.profile {
            let may_create = self
                .authz
                .has_any_permission_anywhere(
                    user.grantee(),
                    ResourceKind::Cluster,
                    &CREATE_PERMISSIONS,
                )
                .await?;
            if may_create {
                owners.insert(profile);
            }
        }

        Ok(ChoiceSet::Only(owners))
    }

    /// Clusters the selected owner, or the user when none is selected, may
    /// create VMs on
    async fn cluster_choices(
        &self,
        user: &User,
        owner: Option<&Owner>,
    ) -> GwmResult<ChoiceSet<ClusterId>> {
        if user.is_superuser {
            return Ok(ChoiceSet::Any);
        }

        let grantee = owner.map(Owner::grantee).unwrap_or_else(|| user.grantee());
        let clusters = self
            .authz
            .objects_with_any_permission(grantee, ResourceKind::Cluster, &CREATE_PERMISSIONS)
            .await?;

        Ok(clusters
            .into_iter()
            .filter_map(|resource| match resource {
                ResourceRef::Cluster { id } => Some(id),
                _ => None,
            })
            .collect())
    }

    /// Look up a VM and the objects a change to it is checked against
    pub async fn modify_context(
        &self,
        user: &User,
        cluster: ClusterId,
        hostname: &str,
    ) -> GwmResult<ModifyContext> {
        let cluster = self.repository.cluster(cluster).await?;
        let vm = self.repository.virtual_machine(cluster.id, hostname).await?;
        let owner = match vm.owner {
            Some(id) => optional(self.repository.owner(id).await)?,
            None => None,
        };

        Ok(ModifyContext {
            user: user.clone(),
            vm,
            cluster,
            owner,
        })
    }

    /// Initial values for editing `context.vm`. Exclusions follow the VM's
    /// current hypervisor.
    pub fn modify_form(&self, context: &ModifyContext) -> ModifyForm {
        let vm = &context.vm;
        let schema = modify_schema(vm);
        let mut hvparams = vm.hvparams.clone();
        hvparams.prune(&schema);

        ModifyForm {
            schema,
            vcpus: vm.virtual_cpus,
            memory: vm.ram,
            os: vm.os.clone(),
            hvparams,
            os_choices: context.cluster.operating_systems.clone(),
        }
    }

    /// Bind a modification request to the VM it changes
    pub async fn build_modify(
        &self,
        user: &User,
        cluster: ClusterId,
        hostname: &str,
        mut input: VmModifyInput,
    ) -> GwmResult<BoundModify> {
        let context = self.modify_context(user, cluster, hostname).await?;
        let schema = modify_schema(&context.vm);

        input.hvparams.normalize();
        input.hvparams.prune(&schema);

        Ok(BoundModify {
            context,
            schema,
            input,
        })
    }
}

fn modify_schema(vm: &VirtualMachine) -> FieldSet {
    schema_for(vm.hypervisor, Some(vm.disk_template), OperationKind::Modify)
}

/// Pre-filled values of a creation form for a cluster's defaults
fn initial_values(
    hypervisor: Hypervisor,
    defaults: Option<&ClusterDefaults>,
    schema: &FieldSet,
) -> VmCreateInput {
    let Some(defaults) = defaults else {
        return VmCreateInput::default();
    };

    let mut initial = VmCreateInput {
        hypervisor: Some(hypervisor.to_string()),
        memory: Some(defaults.memory as i64),
        vcpus: Some(i64::from(defaults.vcpus)),
        nic_link: defaults.nic_link.clone(),
        iallocator: defaults.iallocator_hostname().is_some(),
        iallocator_hostname: defaults.iallocator_hostname().map(str::to_owned),
        start: Some(true),
        name_check: Some(true),
        ..Default::default()
    };

    if hypervisor == Hypervisor::Kvm {
        initial.hvparams.serial_console = defaults.serial_console;
    }
    if matches!(hypervisor, Hypervisor::Kvm | Hypervisor::XenPvm) {
        initial.hvparams.root_path = defaults.root_path.clone();
        initial.hvparams.kernel_path = defaults.kernel_path.clone();
    }
    if matches!(hypervisor, Hypervisor::Kvm | Hypervisor::XenHvm) {
        initial.hvparams.nic_type = defaults.nic_type.clone();
        initial.hvparams.disk_type = defaults.disk_type.clone();
        initial.hvparams.boot_order = defaults.boot_order.clone();
    }
    initial.hvparams.prune(schema);

    initial
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserId;

    fn form(schema: FieldSet, defaults: Option<ClusterDefaults>) -> CreateForm {
        CreateForm {
            user: User {
                id: UserId(1),
                username: "tester".into(),
                is_superuser: false,
                groups: vec![],
                profile: None,
            },
            owner: None,
            cluster: None,
            defaults,
            hypervisor: Hypervisor::XenPvm,
            schema,
            owner_choices: ChoiceSet::Any,
            cluster_choices: ChoiceSet::Any,
            hypervisor_choices: vec![Hypervisor::XenPvm],
            node_choices: vec![],
            os_choices: vec![],
            initial: VmCreateInput::default(),
        }
    }

    #[test]
    fn test_bind_prunes_excluded_fields() {
        let schema = schema_for(Hypervisor::XenPvm, Some(DiskTemplate::Diskless), OperationKind::Create);
        let input = VmCreateInput {
            disk_size: Some(1000),
            snode: Some("node2.example.com".into()),
            hvparams: HvParams {
                disk_type: Some("paravirtual".into()),
                boot_order: Some("disk".into()),
                kernel_path: Some("/boot/vmlinuz".into()),
                ..Default::default()
            },
            ..Default::default()
        };

        let bound = form(schema, None).bind(input);
        assert_eq!(bound.input.disk_size, None);
        assert_eq!(bound.input.snode, None);
        assert_eq!(bound.input.hvparams.disk_type, None);
        assert_eq!(bound.input.hvparams.boot_order, None);
        assert_eq!(bound.input.hvparams.kernel_path.as_deref(), Some("/boot/vmlinuz"));
    }

    #[test]
    fn test_bind_applies_defaults() {
        let schema = schema_for(Hypervisor::XenPvm, None, OperationKind::Create);
        let defaults = ClusterDefaults {
            nic_link: Some("br0".into()),
            iallocator: Some("hail".into()),
            ..ClusterDefaults::minimal(Hypervisor::XenPvm)
        };

        let bound = form(schema, Some(defaults)).bind(VmCreateInput {
            memory: Some(2048),
            ..Default::default()
        });

        assert_eq!(bound.input.hypervisor.as_deref(), Some("xen-pvm"));
        assert_eq!(bound.input.memory, Some(2048));
        assert_eq!(bound.input.vcpus, Some(1));
        assert_eq!(bound.input.nic_link.as_deref(), Some("br0"));
        assert_eq!(bound.input.iallocator_hostname.as_deref(), Some("hail"));
    }

    #[test]
    fn test_choice_set() {
        let any: ChoiceSet<u32> = ChoiceSet::Any;
        assert!(any.contains(&7));

        let only: ChoiceSet<u32> = [1, 2].into_iter().collect();
        assert!(only.contains(&2));
        assert!(!only.contains(&3));
    }

    #[test]
    fn test_initial_values_follow_hypervisor() {
        let defaults = ClusterDefaults {
            nic_type: Some("paravirtual".into()),
            disk_type: Some("paravirtual".into()),
            boot_order: Some("disk".into()),
            kernel_path: Some("/boot/vmlinuz".into()),
            serial_console: Some(true),
            ..ClusterDefaults::minimal(Hypervisor::Kvm)
        };

        let kvm_schema = schema_for(Hypervisor::Kvm, None, OperationKind::Create);
        let kvm = initial_values(Hypervisor::Kvm, Some(&defaults), &kvm_schema);
        assert_eq!(kvm.hvparams.serial_console, Some(true));
        assert_eq!(kvm.hvparams.boot_order.as_deref(), Some("disk"));

        let pvm_schema = schema_for(Hypervisor::XenPvm, None, OperationKind::Create);
        let pvm = initial_values(Hypervisor::XenPvm, Some(&defaults), &pvm_schema);
        assert_eq!(pvm.hvparams.boot_order, None);
        assert_eq!(pvm.hvparams.serial_console, None);
        assert_eq!(pvm.hvparams.kernel_path.as_deref(), Some("/boot/vmlinuz"));
    }
}
