//! Field names and the per-field error accumulator

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Every input field the engine knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Owner,
    Cluster,
    Hostname,
    Hypervisor,
    DiskTemplate,
    Os,
    Memory,
    Vcpus,
    DiskSize,
    Pnode,
    Snode,
    Iallocator,
    IallocatorHostname,
    NicMode,
    NicLink,
    Start,
    NameCheck,
    IpCheck,
    DiskType,
    NicType,
    BootOrder,
    KernelPath,
    KernelArgs,
    InitrdPath,
    RootPath,
    SerialConsole,
    CdromImagePath,
    DiskCache,
    SecurityModel,
    SecurityDomain,
    KvmFlag,
    UseChroot,
    MigrationDowntime,
    UsbMouse,
    MemPath,
    Acpi,
    UseLocaltime,
    VncBindAddress,
    VncTls,
    VncX509Path,
    VncX509Verify,
    /// MAC address of the NIC at this index
    NicMac(usize),
    /// Link of the NIC at this index
    NicLinkAt(usize),
    Mode,
    Cleanup,
    Role,
    Force,
    Node,
    /// Errors that concern the request as a whole
    NonField,
}

impl Field {
    /// Hypervisor parameter fields, in display order
    pub const HV_PARAMS: [Field; 23] = [
        Field::DiskType,
        Field::NicType,
        Field::BootOrder,
        Field::KernelPath,
        Field::KernelArgs,
        Field::InitrdPath,
        Field::RootPath,
        Field::SerialConsole,
        Field::CdromImagePath,
        Field::DiskCache,
        Field::SecurityModel,
        Field::SecurityDomain,
        Field::KvmFlag,
        Field::UseChroot,
        Field::MigrationDowntime,
        Field::UsbMouse,
        Field::MemPath,
        Field::Acpi,
        Field::UseLocaltime,
        Field::VncBindAddress,
        Field::VncTls,
        Field::VncX509Path,
        Field::VncX509Verify,
    ];

    pub fn name(&self) -> String {
        let name = match self {
            Field::Owner => "owner",
            Field::Cluster => "cluster",
            Field::Hostname => "hostname",
            Field::Hypervisor => "hypervisor",
            Field::DiskTemplate => "disk_template",
            Field::Os => "os",
            Field::Memory => "memory",
            Field::Vcpus => "vcpus",
            Field::DiskSize => "disk_size",
            Field::Pnode => "pnode",
            Field::Snode => "snode",
            Field::Iallocator => "iallocator",
            Field::IallocatorHostname => "iallocator_hostname",
            Field::NicMode => "nic_mode",
            Field::NicLink => "nic_link",
            Field::Start => "start",
            Field::NameCheck => "name_check",
            Field::IpCheck => "ip_check",
            Field::DiskType => "disk_type",
            Field::NicType => "nic_type",
            Field::BootOrder => "boot_order",
            Field::KernelPath => "kernel_path",
            Field::KernelArgs => "kernel_args",
            Field::InitrdPath => "initrd_path",
            Field::RootPath => "root_path",
            Field::SerialConsole => "serial_console",
            Field::CdromImagePath => "cdrom_image_path",
            Field::DiskCache => "disk_cache",
            Field::SecurityModel => "security_model",
            Field::SecurityDomain => "security_domain",
            Field::KvmFlag => "kvm_flag",
            Field::UseChroot => "use_chroot",
            Field::MigrationDowntime => "migration_downtime",
            Field::UsbMouse => "usb_mouse",
            Field::MemPath => "mem_path",
            Field::Acpi => "acpi",
            Field::UseLocaltime => "use_localtime",
            Field::VncBindAddress => "vnc_bind_address",
            Field::VncTls => "vnc_tls",
            Field::VncX509Path => "vnc_x509_path",
            Field::VncX509Verify => "vnc_x509_verify",
            Field::NicMac(index) => return format!("nic_mac_{}", index),
            Field::NicLinkAt(index) => return format!("nic_link_{}", index),
            Field::Mode => "mode",
            Field::Cleanup => "cleanup",
            Field::Role => "role",
            Field::Force => "force",
            Field::Node => "node",
            Field::NonField => "__all__",
        };
        name.to_string()
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name())
    }
}

/// What kind of problem a field error reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed, missing or out-of-range value
    Invalid,
    /// Acting user or owner lacks the right to do this
    Authorization,
    /// Granting the value would push the owner over quota
    QuotaExceeded,
    /// Value collides with an existing object
    Conflict,
    /// Value references an object that does not exist
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Field name → list of error messages. Empty means success.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors {
    errors: BTreeMap<Field, Vec<FieldError>>,
}

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single error that is not tied to any field
    pub fn non_field(message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.set(Field::NonField, ErrorKind::Invalid, message);
        errors
    }

    /// Append a message to the field's list
    pub fn add(&mut self, field: Field, kind: ErrorKind, message: impl Into<String>) {
        self.errors.entry(field).or_default().push(FieldError {
            kind,
            message: message.into(),
        });
    }

    /// Replace whatever the field had with a single message
    pub fn set(&mut self, field: Field, kind: ErrorKind, message: impl Into<String>) {
        self.errors.insert(
            field,
            vec![FieldError {
                kind,
                message: message.into(),
            }],
        );
    }

    pub fn clear(&mut self, field: Field) {
        self.errors.remove(&field);
    }

    pub fn contains(&self, field: Field) -> bool {
        self.errors.contains_key(&field)
    }

    pub fn get(&self, field: Field) -> &[FieldError] {
        self.errors.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn messages(&self, field: Field) -> Vec<&str> {
        self.get(field).iter().map(|e| e.message.as_str()).collect()
    }

    pub fn has_kind(&self, field: Field, kind: ErrorKind) -> bool {
        self.get(field).iter().any(|e| e.kind == kind)
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of fields carrying errors
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.errors.keys().copied()
    }

    pub fn merge(mut self, other: FieldErrors) -> Self {
        for (field, errors) in other.errors {
            self.errors.entry(field).or_default().extend(errors);
        }
        self
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .errors
            .iter()
            .map(|(field, errors)| {
                let messages = errors
                    .iter()
                    .map(|e| e.message.as_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                format!("{}: {}", field, messages)
            })
            .collect::<Vec<_>>()
            .join("; ");
        f.write_str(&rendered)
    }
}

impl Serialize for FieldErrors {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.errors.len()))?;
        for (field, errors) in &self.errors {
            map.serialize_entry(field, errors)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_replaces_and_add_appends() {
        let mut errors = FieldErrors::new();
        errors.add(Field::Vcpus, ErrorKind::Invalid, "This field is required.");
        errors.add(Field::Vcpus, ErrorKind::Invalid, "second");
        assert_eq!(errors.get(Field::Vcpus).len(), 2);

        errors.set(Field::Vcpus, ErrorKind::Invalid, "At least one CPU must be present");
        assert_eq!(errors.messages(Field::Vcpus), vec!["At least one CPU must be present"]);
    }

    #[test]
    fn test_field_names() {
        assert_eq!(Field::DiskSize.to_string(), "disk_size");
        assert_eq!(Field::NicMac(1).to_string(), "nic_mac_1");
        assert_eq!(Field::NonField.to_string(), "__all__");
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let mut errors = FieldErrors::new();
        errors.set(Field::Memory, ErrorKind::QuotaExceeded, "not enough ram");
        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(json["memory"][0]["kind"], "quota_exceeded");
        assert_eq!(json["memory"][0]["message"], "not enough ram");
    }
}
