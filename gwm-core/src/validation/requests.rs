//! Raw request inputs and the cleaned data validation produces from them

use serde::{Deserialize, Serialize};

use crate::types::{
    ClusterId, ClusterUserId, DiskTemplate, Grantee, HvParams, Hypervisor, MigrationMode,
    NicMode, NicSpec, NodeRole, VirtualMachine,
};
use crate::validation::Field;

/// Instance creation request as submitted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmCreateInput {
    pub owner: Option<ClusterUserId>,
    pub cluster: Option<ClusterId>,
    pub hostname: Option<String>,
    pub hypervisor: Option<String>,
    pub disk_template: Option<String>,
    pub os: Option<String>,
    /// Memory in MB
    pub memory: Option<i64>,
    pub vcpus: Option<i64>,
    /// Disk size in MB
    pub disk_size: Option<i64>,
    pub pnode: Option<String>,
    pub snode: Option<String>,
    pub iallocator: bool,
    pub iallocator_hostname: Option<String>,
    pub nic_mode: Option<String>,
    pub nic_link: Option<String>,
    /// Start the instance once created; defaults to true
    pub start: Option<bool>,
    pub name_check: Option<bool>,
    pub ip_check: Option<bool>,
    #[serde(flatten)]
    pub hvparams: HvParams,
}

fn filled(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

impl VmCreateInput {
    /// Whether the request carries a value for `field`
    pub fn is_present(&self, field: Field) -> bool {
        match field {
            Field::Owner => self.owner.is_some(),
            Field::Cluster => self.cluster.is_some(),
            Field::Hostname => filled(&self.hostname),
            Field::Hypervisor => filled(&self.hypervisor),
            Field::DiskTemplate => filled(&self.disk_template),
            Field::Os => filled(&self.os),
            Field::Memory => self.memory.is_some(),
            Field::Vcpus => self.vcpus.is_some(),
            Field::DiskSize => self.disk_size.is_some(),
            Field::Pnode => filled(&self.pnode),
            Field::Snode => filled(&self.snode),
            Field::Iallocator => self.iallocator,
            Field::IallocatorHostname => filled(&self.iallocator_hostname),
            Field::NicMode => filled(&self.nic_mode),
            Field::NicLink => filled(&self.nic_link),
            Field::Start => self.start.is_some(),
            Field::NameCheck => self.name_check.is_some(),
            Field::IpCheck => self.ip_check.is_some(),
            other => self.hvparams.is_set(other),
        }
    }

    /// Drop the value submitted for `field`
    pub fn clear(&mut self, field: Field) {
        match field {
            Field::Owner => self.owner = None,
            Field::Cluster => self.cluster = None,
            Field::Hostname => self.hostname = None,
            Field::Hypervisor => self.hypervisor = None,
            Field::DiskTemplate => self.disk_template = None,
            Field::Os => self.os = None,
            Field::Memory => self.memory = None,
            Field::Vcpus => self.vcpus = None,
            Field::DiskSize => self.disk_size = None,
            Field::Pnode => self.pnode = None,
            Field::Snode => self.snode = None,
            Field::Iallocator => self.iallocator = false,
            Field::IallocatorHostname => self.iallocator_hostname = None,
            Field::NicMode => self.nic_mode = None,
            Field::NicLink => self.nic_link = None,
            Field::Start => self.start = None,
            Field::NameCheck => self.name_check = None,
            Field::IpCheck => self.ip_check = None,
            other => self.hvparams.clear(other),
        }
    }
}

/// One NIC of a modification request as submitted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NicInput {
    pub mac: Option<String>,
    pub link: Option<String>,
}

/// Instance modification request as submitted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmModifyInput {
    pub vcpus: Option<i64>,
    pub memory: Option<i64>,
    #[serde(alias = "os_name")]
    pub os: Option<String>,
    #[serde(flatten)]
    pub hvparams: HvParams,
    pub nics: Vec<NicInput>,
    /// Reboot the instance so the change takes effect
    pub reboot: bool,
}

impl VmModifyInput {
    pub fn is_present(&self, field: Field) -> bool {
        match field {
            Field::Vcpus => self.vcpus.is_some(),
            Field::Memory => self.memory.is_some(),
            Field::Os => filled(&self.os),
            other => self.hvparams.is_set(other),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenameInput {
    pub hostname: Option<String>,
    pub ip_check: Option<bool>,
    pub name_check: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrateInput {
    pub mode: Option<String>,
    pub cleanup: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleChangeInput {
    pub role: Option<String>,
    pub force: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvacuateInput {
    pub iallocator: bool,
    pub iallocator_hostname: Option<String>,
    pub node: Option<String>,
}

/// Cleaned instance creation request. Fields that failed validation are
/// `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualMachineRequest {
    pub cluster: Option<ClusterId>,
    pub owner: Option<ClusterUserId>,
    pub hostname: Option<String>,
    pub hypervisor: Option<Hypervisor>,
    pub disk_template: Option<DiskTemplate>,
    pub os: Option<String>,
    pub memory: Option<u64>,
    pub vcpus: Option<u32>,
    pub disk_size: Option<u64>,
    pub pnode: Option<String>,
    pub snode: Option<String>,
    pub iallocator: bool,
    pub iallocator_hostname: Option<String>,
    pub nic_mode: Option<NicMode>,
    pub nic_link: Option<String>,
    pub start: bool,
    pub name_check: bool,
    pub ip_check: bool,
    pub hvparams: HvParams,
    /// Principal the new VM's permissions are granted to
    pub grantee: Option<Grantee>,
    /// Failed deployment this request re-attempts
    pub recovery: Option<VirtualMachine>,
}

impl VirtualMachineRequest {
    pub fn is_recovery(&self) -> bool {
        self.recovery.is_some()
    }

    /// Remove a value that failed validation
    pub fn drop_field(&mut self, field: Field) {
        match field {
            Field::Owner => self.owner = None,
            Field::Cluster => self.cluster = None,
            Field::Hostname => self.hostname = None,
            Field::Hypervisor => self.hypervisor = None,
            Field::DiskTemplate => self.disk_template = None,
            Field::Os => self.os = None,
            Field::Memory => self.memory = None,
            Field::Vcpus => self.vcpus = None,
            Field::DiskSize => self.disk_size = None,
            Field::Pnode => self.pnode = None,
            Field::Snode => self.snode = None,
            Field::IallocatorHostname => self.iallocator_hostname = None,
            Field::NicMode => self.nic_mode = None,
            Field::NicLink => self.nic_link = None,
            other => self.hvparams.clear(other),
        }
    }

    /// The VM as it will be recorded once the creation job runs
    pub fn to_virtual_machine(&self) -> Option<VirtualMachine> {
        Some(VirtualMachine {
            cluster: self.cluster?,
            hostname: self.hostname.clone()?,
            owner: self.owner,
            hypervisor: self.hypervisor?,
            disk_template: self.disk_template?,
            primary_node: self.pnode.clone(),
            secondary_node: self.snode.clone(),
            os: self.os.clone(),
            ram: self.memory?,
            virtual_cpus: self.vcpus?,
            disk_size: self.disk_size.unwrap_or(0),
            is_running: self.start,
            pending_delete: false,
            template: None,
            hvparams: self.hvparams.clone(),
            nics: self
                .nic_link
                .iter()
                .map(|link| NicSpec {
                    mac: String::new(),
                    link: link.clone(),
                })
                .collect(),
        })
    }
}

/// Cleaned instance modification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModifyRequest {
    pub vcpus: Option<u32>,
    pub memory: Option<u64>,
    pub os: Option<String>,
    pub hvparams: HvParams,
    pub nics: Vec<NicSpec>,
    pub reboot: bool,
}

impl ModifyRequest {
    pub fn drop_field(&mut self, field: Field) {
        match field {
            Field::Vcpus => self.vcpus = None,
            Field::Memory => self.memory = None,
            Field::Os => self.os = None,
            other => self.hvparams.clear(other),
        }
    }

    /// `vm` with this change applied
    pub fn apply_to(&self, vm: &VirtualMachine) -> VirtualMachine {
        let mut updated = vm.clone();
        if let Some(vcpus) = self.vcpus {
            updated.virtual_cpus = vcpus;
        }
        if let Some(memory) = self.memory {
            updated.ram = memory;
        }
        if self.os.is_some() {
            updated.os = self.os.clone();
        }
        updated.hvparams = self.hvparams.clone().or(&vm.hvparams);
        if !self.nics.is_empty() {
            updated.nics = self.nics.clone();
        }
        updated.is_running = vm.is_running || self.reboot;
        updated
    }
}

impl From<ModifyRequest> for VmModifyInput {
    fn from(change: ModifyRequest) -> Self {
        Self {
            vcpus: change.vcpus.map(i64::from),
            memory: change
                .memory
                .map(|memory| i64::try_from(memory).unwrap_or(i64::MAX)),
            os: change.os,
            hvparams: change.hvparams,
            nics: change
                .nics
                .into_iter()
                .map(|nic| NicInput {
                    mac: Some(nic.mac),
                    link: Some(nic.link),
                })
                .collect(),
            reboot: change.reboot,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenameRequest {
    pub hostname: Option<String>,
    pub ip_check: bool,
    pub name_check: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceMigrateRequest {
    pub mode: Option<MigrationMode>,
    pub cleanup: bool,
}

/// Where an evacuated node's instances go
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum EvacuationTarget {
    /// Move everything to this node
    ExplicitNode(String),
    /// Let the allocator plugin on this host pick
    AutoAllocate(String),
}

/// A validated node operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum NodeOperationRequest {
    RoleChange { new_role: NodeRole, force: bool },
    Migrate { mode: MigrationMode, cleanup: bool },
    Evacuate { target: EvacuationTarget },
}
