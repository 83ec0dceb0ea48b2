use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::capability::FieldSet;
use crate::quota::Quota;
use crate::validation::Field;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Primary key of a managed cluster
    ClusterId
);
id_type!(
    /// Primary key of a login account
    UserId
);
id_type!(
    /// Primary key of a permission group
    GroupId
);
id_type!(
    /// Primary key shared by every kind of VM owner (profiles and organizations)
    ClusterUserId
);

/// Hypervisor a cluster (and its VMs) runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Hypervisor {
    #[serde(rename = "kvm")]
    Kvm,
    #[serde(rename = "xen-pvm")]
    XenPvm,
    #[serde(rename = "xen-hvm")]
    XenHvm,
}

impl Hypervisor {
    pub const ALL: [Hypervisor; 3] = [Hypervisor::Kvm, Hypervisor::XenPvm, Hypervisor::XenHvm];

    pub fn as_str(&self) -> &'static str {
        match self {
            Hypervisor::Kvm => "kvm",
            Hypervisor::XenPvm => "xen-pvm",
            Hypervisor::XenHvm => "xen-hvm",
        }
    }
}

/// Disk layout of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskTemplate {
    Plain,
    Drbd,
    File,
    Diskless,
}

impl DiskTemplate {
    pub const ALL: [DiskTemplate; 4] = [
        DiskTemplate::Plain,
        DiskTemplate::Drbd,
        DiskTemplate::File,
        DiskTemplate::Diskless,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DiskTemplate::Plain => "plain",
            DiskTemplate::Drbd => "drbd",
            DiskTemplate::File => "file",
            DiskTemplate::Diskless => "diskless",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NicMode {
    Bridged,
    Routed,
}

impl NicMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NicMode::Bridged => "bridged",
            NicMode::Routed => "routed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationMode {
    Live,
    NonLive,
}

impl MigrationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationMode::Live => "live",
            MigrationMode::NonLive => "non-live",
        }
    }
}

/// Role of a node inside its cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    Master,
    MasterCandidate,
    Regular,
    Drained,
    Offline,
}

impl NodeRole {
    /// Roles a node can be moved into. The master role is only ever observed.
    pub const ASSIGNABLE: [NodeRole; 4] = [
        NodeRole::MasterCandidate,
        NodeRole::Regular,
        NodeRole::Drained,
        NodeRole::Offline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Master => "master",
            NodeRole::MasterCandidate => "master-candidate",
            NodeRole::Regular => "regular",
            NodeRole::Drained => "drained",
            NodeRole::Offline => "offline",
        }
    }

    pub fn is_assignable(&self) -> bool {
        !matches!(self, NodeRole::Master)
    }
}

macro_rules! impl_str_enum {
    ($ty:ident, $($variant:expr),+) => {
        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                [$($variant),+]
                    .into_iter()
                    .find(|v| v.as_str() == s)
                    .ok_or_else(|| s.to_string())
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

impl_str_enum!(Hypervisor, Hypervisor::Kvm, Hypervisor::XenPvm, Hypervisor::XenHvm);
impl_str_enum!(
    DiskTemplate,
    DiskTemplate::Plain,
    DiskTemplate::Drbd,
    DiskTemplate::File,
    DiskTemplate::Diskless
);
impl_str_enum!(NicMode, NicMode::Bridged, NicMode::Routed);
impl_str_enum!(MigrationMode, MigrationMode::Live, MigrationMode::NonLive);
impl_str_enum!(
    NodeRole,
    NodeRole::Master,
    NodeRole::MasterCandidate,
    NodeRole::Regular,
    NodeRole::Drained,
    NodeRole::Offline
);

/// Login account acting on the console
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub is_superuser: bool,
    /// Permission groups the account belongs to
    #[serde(default)]
    pub groups: Vec<GroupId>,
    /// Owner record of the account itself, if one exists
    #[serde(default)]
    pub profile: Option<ClusterUserId>,
}

impl User {
    pub fn is_member_of(&self, group: GroupId) -> bool {
        self.groups.contains(&group)
    }

    pub fn grantee(&self) -> Grantee {
        Grantee::User(self.id)
    }
}

/// Owner record of an individual account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ClusterUserId,
    pub name: String,
    pub user: UserId,
}

/// Owner record of a group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: ClusterUserId,
    pub name: String,
    pub group: GroupId,
}

/// Whoever a VM is billed to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Owner {
    Individual(Profile),
    Group(Organization),
}

impl Owner {
    pub fn id(&self) -> ClusterUserId {
        match self {
            Owner::Individual(profile) => profile.id,
            Owner::Group(org) => org.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Owner::Individual(profile) => &profile.name,
            Owner::Group(org) => &org.name,
        }
    }

    /// Principal permissions are granted to on behalf of this owner
    pub fn grantee(&self) -> Grantee {
        match self {
            Owner::Individual(profile) => Grantee::User(profile.user),
            Owner::Group(org) => Grantee::Group(org.group),
        }
    }
}

/// Principal the authorization oracle reasons about
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Grantee {
    User(UserId),
    Group(GroupId),
}

impl fmt::Display for Grantee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grantee::User(id) => write!(f, "user:{}", id),
            Grantee::Group(id) => write!(f, "group:{}", id),
        }
    }
}

/// Permission types checked against clusters and VMs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Admin,
    CreateVm,
    Migrate,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Admin => "admin",
            Permission::CreateVm => "create_vm",
            Permission::Migrate => "migrate",
        }
    }
}

/// Resource types that can be controlled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Cluster,
    VirtualMachine,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceRef {
    Cluster { id: ClusterId },
    VirtualMachine { cluster: ClusterId, hostname: String },
}

impl ResourceRef {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceRef::Cluster { .. } => ResourceKind::Cluster,
            ResourceRef::VirtualMachine { .. } => ResourceKind::VirtualMachine,
        }
    }

    pub fn cluster(id: ClusterId) -> Self {
        ResourceRef::Cluster { id }
    }

    pub fn virtual_machine(cluster: ClusterId, hostname: impl Into<String>) -> Self {
        ResourceRef::VirtualMachine {
            cluster,
            hostname: hostname.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceRef::Cluster { id } => write!(f, "cluster:{}", id),
            ResourceRef::VirtualMachine { cluster, hostname } => {
                write!(f, "vm:{}/{}", cluster, hostname)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub hostname: String,
    pub role: NodeRole,
}

/// Per-owner quota override on a cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnerQuota {
    pub owner: ClusterUserId,
    pub quota: Quota,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub hostname: String,
    pub slug: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub operating_systems: Vec<String>,
    /// Quota applied to owners without an override
    #[serde(default)]
    pub default_quota: Quota,
    #[serde(default)]
    pub quotas: Vec<OwnerQuota>,
}

impl Cluster {
    /// Quota in effect for `owner` on this cluster
    pub fn quota_for(&self, owner: ClusterUserId) -> Quota {
        self.quotas
            .iter()
            .find(|q| q.owner == owner)
            .map(|q| q.quota.clone())
            .unwrap_or_else(|| self.default_quota.clone())
    }

    pub fn node(&self, hostname: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.hostname == hostname)
    }

    pub fn node_names(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.hostname.clone()).collect()
    }
}

/// Hypervisor parameters of a VM or request. Every field is optional so the
/// same shape carries raw input, cleaned data and a VM's current settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HvParams {
    pub disk_type: Option<String>,
    pub nic_type: Option<String>,
    pub boot_order: Option<String>,
    pub kernel_path: Option<String>,
    pub kernel_args: Option<String>,
    pub initrd_path: Option<String>,
    pub root_path: Option<String>,
    pub serial_console: Option<bool>,
    pub cdrom_image_path: Option<String>,
    pub disk_cache: Option<String>,
    pub security_model: Option<String>,
    pub security_domain: Option<String>,
    pub kvm_flag: Option<String>,
    pub use_chroot: Option<bool>,
    pub migration_downtime: Option<i64>,
    pub usb_mouse: Option<String>,
    pub mem_path: Option<String>,
    pub acpi: Option<bool>,
    pub use_localtime: Option<bool>,
    pub vnc_bind_address: Option<String>,
    pub vnc_tls: Option<bool>,
    pub vnc_x509_path: Option<String>,
    pub vnc_x509_verify: Option<bool>,
}

macro_rules! hv_param_fields {
    (strings: [$($s:ident => $sf:ident),*], flags: [$($b:ident => $bf:ident),*], numbers: [$($n:ident => $nf:ident),*]) => {
        impl HvParams {
            /// Whether the parameter backing `field` carries a value. Empty
            /// strings count as unset.
            pub fn is_set(&self, field: Field) -> bool {
                match field {
                    $(Field::$sf => self.$s.as_deref().is_some_and(|v| !v.is_empty()),)*
                    $(Field::$bf => self.$b.is_some(),)*
                    $(Field::$nf => self.$n.is_some(),)*
                    _ => false,
                }
            }

            /// String value of a text parameter
            pub fn text(&self, field: Field) -> Option<&str> {
                match field {
                    $(Field::$sf => self.$s.as_deref().filter(|v| !v.is_empty()),)*
                    _ => None,
                }
            }

            /// Drop the value backing `field`
            pub fn clear(&mut self, field: Field) {
                match field {
                    $(Field::$sf => self.$s = None,)*
                    $(Field::$bf => self.$b = None,)*
                    $(Field::$nf => self.$n = None,)*
                    _ => {}
                }
            }

            /// Turn empty strings into `None`
            pub fn normalize(&mut self) {
                $(
                    if self.$s.as_deref().is_some_and(|v| v.trim().is_empty()) {
                        self.$s = None;
                    }
                )*
            }
        }
    };
}

hv_param_fields!(
    strings: [
        disk_type => DiskType,
        nic_type => NicType,
        boot_order => BootOrder,
        kernel_path => KernelPath,
        kernel_args => KernelArgs,
        initrd_path => InitrdPath,
        root_path => RootPath,
        cdrom_image_path => CdromImagePath,
        disk_cache => DiskCache,
        security_model => SecurityModel,
        security_domain => SecurityDomain,
        kvm_flag => KvmFlag,
        usb_mouse => UsbMouse,
        mem_path => MemPath,
        vnc_bind_address => VncBindAddress,
        vnc_x509_path => VncX509Path
    ],
    flags: [
        serial_console => SerialConsole,
        use_chroot => UseChroot,
        acpi => Acpi,
        use_localtime => UseLocaltime,
        vnc_tls => VncTls,
        vnc_x509_verify => VncX509Verify
    ],
    numbers: [migration_downtime => MigrationDowntime]
);

impl HvParams {
    /// Clear every parameter `schema` excludes
    pub fn prune(&mut self, schema: &FieldSet) {
        for field in Field::HV_PARAMS {
            if !schema.is_allowed(field) {
                self.clear(field);
            }
        }
    }

    /// Fill parameters that are unset here from `other`
    pub fn or(mut self, other: &HvParams) -> HvParams {
        self.normalize();
        let other = other.clone();
        HvParams {
            disk_type: self.disk_type.or(other.disk_type),
            nic_type: self.nic_type.or(other.nic_type),
            boot_order: self.boot_order.or(other.boot_order),
            kernel_path: self.kernel_path.or(other.kernel_path),
            kernel_args: self.kernel_args.or(other.kernel_args),
            initrd_path: self.initrd_path.or(other.initrd_path),
            root_path: self.root_path.or(other.root_path),
            serial_console: self.serial_console.or(other.serial_console),
            cdrom_image_path: self.cdrom_image_path.or(other.cdrom_image_path),
            disk_cache: self.disk_cache.or(other.disk_cache),
            security_model: self.security_model.or(other.security_model),
            security_domain: self.security_domain.or(other.security_domain),
            kvm_flag: self.kvm_flag.or(other.kvm_flag),
            use_chroot: self.use_chroot.or(other.use_chroot),
            migration_downtime: self.migration_downtime.or(other.migration_downtime),
            usb_mouse: self.usb_mouse.or(other.usb_mouse),
            mem_path: self.mem_path.or(other.mem_path),
            acpi: self.acpi.or(other.acpi),
            use_localtime: self.use_localtime.or(other.use_localtime),
            vnc_bind_address: self.vnc_bind_address.or(other.vnc_bind_address),
            vnc_tls: self.vnc_tls.or(other.vnc_tls),
            vnc_x509_path: self.vnc_x509_path.or(other.vnc_x509_path),
            vnc_x509_verify: self.vnc_x509_verify.or(other.vnc_x509_verify),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NicSpec {
    pub mac: String,
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualMachine {
    pub cluster: ClusterId,
    pub hostname: String,
    #[serde(default)]
    pub owner: Option<ClusterUserId>,
    pub hypervisor: Hypervisor,
    pub disk_template: DiskTemplate,
    #[serde(default)]
    pub primary_node: Option<String>,
    #[serde(default)]
    pub secondary_node: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
    /// Memory in MB
    pub ram: u64,
    pub virtual_cpus: u32,
    /// Disk size in MB
    #[serde(default)]
    pub disk_size: u64,
    #[serde(default)]
    pub is_running: bool,
    #[serde(default)]
    pub pending_delete: bool,
    /// Template a deployment was started from; cleared once deployment
    /// bookkeeping is finished
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub hvparams: HvParams,
    #[serde(default)]
    pub nics: Vec<NicSpec>,
}
