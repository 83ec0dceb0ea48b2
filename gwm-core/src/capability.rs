//! Hypervisor capability matrix
//!
//! Which request fields are legal for a hypervisor and disk template, and
//! which values the hypervisor-specific choice fields accept. Everything in
//! here is a pure function of its arguments; schemas are built fresh and
//! never mutated once handed out.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::types::{DiskTemplate, Hypervisor};
use crate::validation::Field;

/// Legal values of hypervisor parameters
pub mod constants {
    pub const KVM_DISK_TYPES: &[&str] = &["scsi", "sd", "mtd", "pflash", "ide"];
    pub const HV_DISK_TYPES: &[&str] = &["paravirtual", "ioemu"];
    pub const HVM_DISK_TYPES: &[&str] = &["ioemu"];

    pub const KVM_NIC_TYPES: &[&str] = &["i82551", "i82557b", "i82559er", "pcnet"];
    pub const HV_NIC_TYPES: &[&str] = &["e1000", "rtl8139", "ne2k_isa", "ne2k_pci", "paravirtual"];

    pub const KVM_BOOT_ORDER: &[&str] = &["disk", "cdrom", "network"];
    pub const HVM_BOOT_ORDER: &[&str] = &["cd", "dc", "n"];

    pub const HV_DISK_CACHES: &[&str] = &["default", "none", "writethrough", "writeback"];
    pub const HV_SECURITY_MODELS: &[&str] = &["none", "user", "pool"];
    pub const KVM_FLAGS: &[&str] = &["enabled", "disabled"];
    pub const HV_USB_MICE: &[&str] = &["mouse", "tablet"];

    /// Boot device that needs an image path
    pub const BOOT_CDROM: &str = "cdrom";
    /// Placeholder accepted by initrd_path in place of an absolute path
    pub const NO_INITRD_PATH: &str = "no_initrd_path";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    Required,
    Optional,
    Excluded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Modify,
}

/// Requirement of every field a request may carry. Fields that are not
/// listed are excluded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldSet {
    fields: BTreeMap<Field, Requirement>,
}

impl FieldSet {
    fn from_pairs(pairs: impl IntoIterator<Item = (Field, Requirement)>) -> Self {
        Self {
            fields: pairs
                .into_iter()
                .filter(|(_, requirement)| *requirement != Requirement::Excluded)
                .collect(),
        }
    }

    pub fn requirement(&self, field: Field) -> Requirement {
        self.fields
            .get(&field)
            .copied()
            .unwrap_or(Requirement::Excluded)
    }

    pub fn is_allowed(&self, field: Field) -> bool {
        self.requirement(field) != Requirement::Excluded
    }

    pub fn is_required(&self, field: Field) -> bool {
        self.requirement(field) == Requirement::Required
    }

    /// Allowed fields in display order
    pub fn allowed(&self) -> impl Iterator<Item = Field> + '_ {
        self.fields.keys().copied()
    }

    pub fn required(&self) -> impl Iterator<Item = Field> + '_ {
        self.fields
            .iter()
            .filter(|(_, r)| **r == Requirement::Required)
            .map(|(f, _)| *f)
    }

    /// A copy of this set with `fields` removed
    pub fn without(&self, fields: &[Field]) -> Self {
        Self {
            fields: self
                .fields
                .iter()
                .filter(|(f, _)| !fields.contains(f))
                .map(|(f, r)| (*f, *r))
                .collect(),
        }
    }

    /// A copy of this set with `fields` marked required, where allowed
    pub fn requiring(&self, fields: &[Field]) -> Self {
        let mut copy = self.clone();
        for field in fields {
            if let Some(requirement) = copy.fields.get_mut(field) {
                *requirement = Requirement::Required;
            }
        }
        copy
    }
}

impl Serialize for FieldSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (field, requirement) in &self.fields {
            map.serialize_entry(field, requirement)?;
        }
        map.end()
    }
}

/// Requirement of a hypervisor parameter under `hypervisor`
fn hv_param_requirement(hypervisor: Hypervisor, field: Field) -> Requirement {
    use Requirement::*;

    match (hypervisor, field) {
        (_, Field::DiskType | Field::NicType | Field::BootOrder) => match hypervisor {
            Hypervisor::XenPvm => Excluded,
            _ => Required,
        },
        (Hypervisor::Kvm, _) => Optional,
        (
            Hypervisor::XenHvm,
            Field::CdromImagePath | Field::Acpi | Field::UseLocaltime | Field::VncBindAddress,
        ) => Optional,
        (Hypervisor::XenHvm, _) => Excluded,
        (
            Hypervisor::XenPvm,
            Field::KernelPath | Field::KernelArgs | Field::InitrdPath | Field::RootPath,
        ) => Optional,
        (Hypervisor::XenPvm, _) => Excluded,
    }
}

/// Request fields that are not hypervisor parameters
pub const GENERAL_FIELDS: [Field; 18] = [
    Field::Owner,
    Field::Cluster,
    Field::Hostname,
    Field::Hypervisor,
    Field::DiskTemplate,
    Field::Os,
    Field::Memory,
    Field::Vcpus,
    Field::DiskSize,
    Field::Pnode,
    Field::Snode,
    Field::Iallocator,
    Field::IallocatorHostname,
    Field::NicMode,
    Field::NicLink,
    Field::Start,
    Field::NameCheck,
    Field::IpCheck,
];

fn general_requirement(field: Field, disk_template: Option<DiskTemplate>) -> Requirement {
    use Requirement::*;

    match field {
        Field::DiskSize => match disk_template {
            Some(DiskTemplate::Diskless) => Excluded,
            _ => Required,
        },
        Field::Snode => match disk_template {
            Some(DiskTemplate::Drbd) => Required,
            _ => Excluded,
        },
        Field::Hypervisor
        | Field::Iallocator
        | Field::IallocatorHostname
        | Field::NicLink
        | Field::Start
        | Field::NameCheck
        | Field::IpCheck => Optional,
        _ => Required,
    }
}

/// Fields that are legal for a VM on `hypervisor` using `disk_template`.
///
/// Without a template the disk-dependent fields are treated as for a
/// plain template.
pub fn allowed_fields(hypervisor: Hypervisor, disk_template: Option<DiskTemplate>) -> FieldSet {
    let general = GENERAL_FIELDS
        .iter()
        .map(|field| (*field, general_requirement(*field, disk_template)));
    let hv_params = Field::HV_PARAMS
        .iter()
        .map(|field| (*field, hv_param_requirement(hypervisor, *field)));

    FieldSet::from_pairs(general.chain(hv_params))
}

/// Fields that cannot change once a VM exists
pub const IMMUTABLE_FIELDS: [Field; 15] = [
    Field::Start,
    Field::Owner,
    Field::Cluster,
    Field::Hostname,
    Field::DiskTemplate,
    Field::Pnode,
    Field::Snode,
    Field::DiskSize,
    Field::NicMode,
    Field::NicLink,
    Field::Hypervisor,
    Field::Iallocator,
    Field::IallocatorHostname,
    Field::NameCheck,
    Field::IpCheck,
];

/// Schema of a request of `kind` against `hypervisor`.
///
/// For modification `hypervisor` is the VM's current one, NICs are edited
/// as a list outside of this schema, and vcpus, memory and os must be given.
pub fn schema_for(
    hypervisor: Hypervisor,
    disk_template: Option<DiskTemplate>,
    kind: OperationKind,
) -> FieldSet {
    let fields = allowed_fields(hypervisor, disk_template);
    match kind {
        OperationKind::Create => fields,
        OperationKind::Modify => fields
            .without(&IMMUTABLE_FIELDS)
            .requiring(&[Field::Vcpus, Field::Memory, Field::Os]),
    }
}

/// Disk types `hypervisor` accepts; `None` means it is not checked
pub fn legal_disk_types(hypervisor: Hypervisor) -> Option<Vec<&'static str>> {
    match hypervisor {
        Hypervisor::Kvm => Some(union(constants::KVM_DISK_TYPES, constants::HV_DISK_TYPES)),
        Hypervisor::XenHvm => Some(union(constants::HVM_DISK_TYPES, constants::HV_DISK_TYPES)),
        Hypervisor::XenPvm => None,
    }
}

pub fn legal_nic_types(hypervisor: Hypervisor) -> Option<Vec<&'static str>> {
    match hypervisor {
        Hypervisor::Kvm => Some(union(constants::KVM_NIC_TYPES, constants::HV_NIC_TYPES)),
        Hypervisor::XenHvm => Some(constants::HV_NIC_TYPES.to_vec()),
        Hypervisor::XenPvm => None,
    }
}

pub fn legal_boot_devices(hypervisor: Hypervisor) -> Option<Vec<&'static str>> {
    match hypervisor {
        Hypervisor::Kvm => Some(constants::KVM_BOOT_ORDER.to_vec()),
        Hypervisor::XenHvm => Some(constants::HVM_BOOT_ORDER.to_vec()),
        Hypervisor::XenPvm => None,
    }
}

fn union(first: &[&'static str], second: &[&'static str]) -> Vec<&'static str> {
    let mut values = first.to_vec();
    values.extend(second.iter().filter(|v| !first.contains(v)));
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use Requirement::*;

    #[test]
    fn test_hv_param_matrix() {
        // (field, kvm, xen-pvm, xen-hvm)
        let test_cases = vec![
            (Field::DiskType, Required, Excluded, Required),
            (Field::NicType, Required, Excluded, Required),
            (Field::BootOrder, Required, Excluded, Required),
            (Field::KernelPath, Optional, Optional, Excluded),
            (Field::KernelArgs, Optional, Optional, Excluded),
            (Field::InitrdPath, Optional, Optional, Excluded),
            (Field::RootPath, Optional, Optional, Excluded),
            (Field::SerialConsole, Optional, Excluded, Excluded),
            (Field::CdromImagePath, Optional, Excluded, Optional),
            (Field::DiskCache, Optional, Excluded, Excluded),
            (Field::SecurityModel, Optional, Excluded, Excluded),
            (Field::SecurityDomain, Optional, Excluded, Excluded),
            (Field::KvmFlag, Optional, Excluded, Excluded),
            (Field::UseChroot, Optional, Excluded, Excluded),
            (Field::MigrationDowntime, Optional, Excluded, Excluded),
            (Field::UsbMouse, Optional, Excluded, Excluded),
            (Field::MemPath, Optional, Excluded, Excluded),
            (Field::Acpi, Optional, Excluded, Optional),
            (Field::UseLocaltime, Optional, Excluded, Optional),
            (Field::VncBindAddress, Optional, Excluded, Optional),
            (Field::VncTls, Optional, Excluded, Excluded),
            (Field::VncX509Path, Optional, Excluded, Excluded),
            (Field::VncX509Verify, Optional, Excluded, Excluded),
        ];
        assert_eq!(test_cases.len(), Field::HV_PARAMS.len());

        for template in DiskTemplate::ALL {
            let kvm = allowed_fields(Hypervisor::Kvm, Some(template));
            let pvm = allowed_fields(Hypervisor::XenPvm, Some(template));
            let hvm = allowed_fields(Hypervisor::XenHvm, Some(template));

            for (field, on_kvm, on_pvm, on_hvm) in &test_cases {
                assert_eq!(kvm.requirement(*field), *on_kvm, "kvm {}", field);
                assert_eq!(pvm.requirement(*field), *on_pvm, "xen-pvm {}", field);
                assert_eq!(hvm.requirement(*field), *on_hvm, "xen-hvm {}", field);
            }
        }
    }

    #[test]
    fn test_disk_template_fields() {
        // (template, disk_size, snode)
        let test_cases = vec![
            (Some(DiskTemplate::Plain), Required, Excluded),
            (Some(DiskTemplate::Drbd), Required, Required),
            (Some(DiskTemplate::File), Required, Excluded),
            (Some(DiskTemplate::Diskless), Excluded, Excluded),
            (None, Required, Excluded),
        ];

        for hv in Hypervisor::ALL {
            for (template, disk_size, snode) in &test_cases {
                let fields = allowed_fields(hv, *template);
                assert_eq!(fields.requirement(Field::DiskSize), *disk_size);
                assert_eq!(fields.requirement(Field::Snode), *snode);
                assert!(fields.is_required(Field::Hostname));
            }
        }
    }

    #[test]
    fn test_modify_schema_drops_immutable_fields() {
        for hv in Hypervisor::ALL {
            let schema = schema_for(hv, Some(DiskTemplate::Drbd), OperationKind::Modify);
            for field in IMMUTABLE_FIELDS {
                assert!(!schema.is_allowed(field), "{} allowed on {}", field, hv);
            }
            assert!(schema.is_required(Field::Vcpus));
            assert!(schema.is_required(Field::Memory));
            assert!(schema.is_required(Field::Os));
        }

        let pvm = schema_for(Hypervisor::XenPvm, None, OperationKind::Modify);
        assert!(!pvm.is_allowed(Field::BootOrder));
        let hvm = schema_for(Hypervisor::XenHvm, None, OperationKind::Modify);
        assert!(hvm.is_required(Field::BootOrder));
    }

    #[test]
    fn test_schemas_are_independent_values() {
        let create = schema_for(Hypervisor::Kvm, None, OperationKind::Create);
        let modify = schema_for(Hypervisor::Kvm, None, OperationKind::Modify);
        assert!(create.is_allowed(Field::Owner));
        assert!(!modify.is_allowed(Field::Owner));
        assert_eq!(create, schema_for(Hypervisor::Kvm, None, OperationKind::Create));
    }

    #[test]
    fn test_legal_value_sets() {
        let kvm_disks = legal_disk_types(Hypervisor::Kvm).unwrap();
        assert!(kvm_disks.contains(&"scsi"));
        assert!(kvm_disks.contains(&"paravirtual"));
        assert!(!kvm_disks.contains(&"floppy"));

        let hvm_disks = legal_disk_types(Hypervisor::XenHvm).unwrap();
        assert_eq!(hvm_disks, vec!["ioemu", "paravirtual"]);

        let hvm_nics = legal_nic_types(Hypervisor::XenHvm).unwrap();
        assert!(!hvm_nics.contains(&"pcnet"));
        assert!(legal_nic_types(Hypervisor::Kvm).unwrap().contains(&"pcnet"));

        assert_eq!(legal_boot_devices(Hypervisor::XenHvm).unwrap(), vec!["cd", "dc", "n"]);
        assert!(legal_disk_types(Hypervisor::XenPvm).is_none());
        assert!(legal_boot_devices(Hypervisor::XenPvm).is_none());
    }
}
