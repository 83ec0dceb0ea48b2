//! Field-level checks shared by every pipeline

use once_cell::sync::Lazy;
use regex::Regex;
use std::net::Ipv4Addr;

use crate::capability::{self, constants, FieldSet};
use crate::types::{HvParams, Hypervisor};
use crate::validation::{ErrorKind, Field, FieldErrors};

/// User-facing messages
pub mod messages {
    pub const REQUIRED: &str = "This field is required.";
    pub const HOSTNAME_INVALID: &str = "Instance name must be resolvable";
    pub const HOSTNAME_TOO_LONG: &str = "Ensure this value has at most 255 characters.";
    pub const HOSTNAME_IN_USE: &str = "Hostname is already in use for this cluster";
    pub const HOSTNAME_UNCHANGED: &str =
        "The new hostname must be different than the current hostname";
    pub const RECOVERY_OWNER: &str = "Owner cannot be changed when recovering a failed deployment";
    pub const VCPUS: &str = "At least one CPU must be present";
    pub const MEMORY_MIN: &str = "Ensure this value is greater than or equal to 100.";
    pub const DISK_SIZE: &str = "Disk size must be set and greater than zero";
    pub const NODES_MATCH: &str = "Primary and Secondary Nodes must not match.";
    pub const CDROM_IMAGE: &str = "Image path required if boot device is CD-ROM.";
    pub const NO_IALLOCATOR: &str =
        "Automatic Allocation was selected, but there is no IAllocator available.";
    pub const ABSOLUTE_PATH: &str = "This field must start with a \"/\".";
    pub const SECURITY_DOMAIN_MODEL: &str =
        "This field can not be set if Security Mode is not set to User.";
    pub const SECURITY_DOMAIN_REQUIRED: &str = "This field is required.";
    pub const SECURITY_DOMAIN_ALPHA: &str = "This field must being with an alpha character.";
    pub const X509_WITHOUT_TLS: &str = "This field can not be set without VNC TLS enabled.";
    pub const X509_REQUIRED: &str = "This field is required.";
    pub const KERNEL_FOR_INITRD: &str = "Kernel Path must be specified along with Initrd Path.";
    pub const IPV4: &str = "Enter a valid IPv4 address.";
    pub const MAC: &str = "Enter a valid MAC address.";
    pub const NOT_MEMBER: &str = "User is not a member of the specified group.";
    pub const NOT_SELF: &str = "You are not allowed to act on behalf of this user.";
    pub const NO_CLUSTER_PERMS: &str = "Owner does not have permissions for this cluster.";
    pub const INVALID_CHOICE: &str =
        "Select a valid choice. That choice is not one of the available choices.";
    pub const EVACUATE_NEITHER: &str = "Must choose automatic allocation or a specific node";
    pub const EVACUATE_BOTH: &str =
        "Choose either automatic allocation or a specific node, not both";

    pub fn not_a_choice(value: &str) -> String {
        format!(
            "Select a valid choice. {} is not one of the available choices.",
            value
        )
    }

    pub fn bad_disk_type(value: &str) -> String {
        format!(
            "{} is not a valid option for Disk Template on this cluster.",
            value
        )
    }

    pub fn bad_nic_type(value: &str) -> String {
        format!("{} is not a valid option for Nic Type on this cluster.", value)
    }

    pub fn bad_boot_order(value: &str) -> String {
        format!(
            "{} is not a valid option for Boot Device on this cluster.",
            value
        )
    }
}

static LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,63}$").expect("label pattern is valid"));

static MAC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9a-fA-F]{2}:){5}[0-9a-fA-F]{2}$").expect("mac pattern is valid")
});

/// Whether `hostname` looks like a resolvable fully qualified name.
///
/// At most 254 characters of dot separated labels. A label is 1 to 63 of
/// `[A-Za-z0-9_-]` and does not start or end with a hyphen; only the last
/// label may be all digits, and it must end in at least two letters.
pub fn is_fqdn(hostname: &str) -> bool {
    if hostname.is_empty() || hostname.len() > 254 {
        return false;
    }

    let labels: Vec<&str> = hostname.split('.').collect();
    if labels.iter().any(|label| label.is_empty()) {
        return false;
    }

    let valid_labels = labels.iter().all(|label| {
        LABEL_RE.is_match(label) && !label.starts_with('-') && !label.ends_with('-')
    });
    if !valid_labels {
        return false;
    }

    let (last, leading) = match labels.split_last() {
        Some(split) => split,
        None => return false,
    };
    if leading
        .iter()
        .any(|label| label.chars().all(|c| c.is_ascii_digit()))
    {
        return false;
    }

    last.chars()
        .rev()
        .take_while(|c| c.is_ascii_alphabetic())
        .count()
        >= 2
}

pub fn is_mac(value: &str) -> bool {
    MAC_RE.is_match(value)
}

/// Check a new instance name; returns the error message, if any
pub fn hostname_error(hostname: &str) -> Option<&'static str> {
    if hostname.len() > 255 {
        Some(messages::HOSTNAME_TOO_LONG)
    } else if !is_fqdn(hostname) {
        Some(messages::HOSTNAME_INVALID)
    } else {
        None
    }
}

/// Checks on hypervisor parameters that need nothing but the values
/// themselves. Failing values are removed from `params`.
pub fn check_hv_params(schema: &FieldSet, params: &mut HvParams, errors: &mut FieldErrors) {
    let choices: [(Field, &[&str]); 4] = [
        (Field::DiskCache, constants::HV_DISK_CACHES),
        (Field::SecurityModel, constants::HV_SECURITY_MODELS),
        (Field::KvmFlag, constants::KVM_FLAGS),
        (Field::UsbMouse, constants::HV_USB_MICE),
    ];
    for (field, legal) in choices {
        if let Some(value) = params.text(field) {
            if schema.is_allowed(field) && !legal.contains(&value) {
                errors.set(field, ErrorKind::Invalid, messages::not_a_choice(value));
                params.clear(field);
            }
        }
    }

    for field in [Field::KernelPath, Field::InitrdPath, Field::MemPath, Field::VncX509Path] {
        let Some(value) = params.text(field) else {
            continue;
        };
        let exempt = field == Field::InitrdPath && value == constants::NO_INITRD_PATH;
        if !value.starts_with('/') && !exempt {
            errors.set(field, ErrorKind::Invalid, messages::ABSOLUTE_PATH);
            params.clear(field);
        }
    }

    if let Some(address) = params.text(Field::VncBindAddress) {
        if address.parse::<Ipv4Addr>().is_err() {
            errors.set(Field::VncBindAddress, ErrorKind::Invalid, messages::IPV4);
            params.clear(Field::VncBindAddress);
        }
    }

    let domain = params.text(Field::SecurityDomain).map(str::to_owned);
    let model_is_user = params.text(Field::SecurityModel) == Some("user");
    let domain_error = match (&domain, model_is_user) {
        (Some(_), false) => Some(messages::SECURITY_DOMAIN_MODEL),
        (None, true) => Some(messages::SECURITY_DOMAIN_REQUIRED),
        (Some(domain), true) if !domain.starts_with(|c: char| c.is_alphabetic()) => {
            Some(messages::SECURITY_DOMAIN_ALPHA)
        }
        _ => None,
    };
    if let Some(message) = domain_error {
        errors.set(Field::SecurityDomain, ErrorKind::Invalid, message);
        params.clear(Field::SecurityDomain);
    }

    let tls = params.vnc_tls.unwrap_or(false);
    let verify = params.vnc_x509_verify.unwrap_or(false);
    if params.is_set(Field::VncX509Path) && !tls {
        errors.set(Field::VncX509Path, ErrorKind::Invalid, messages::X509_WITHOUT_TLS);
        params.clear(Field::VncX509Path);
    }
    if verify && !params.is_set(Field::VncX509Path) && !errors.contains(Field::VncX509Path) {
        errors.set(Field::VncX509Path, ErrorKind::Invalid, messages::X509_REQUIRED);
    }
}

/// Check disk type, NIC type and boot device against what `hypervisor`
/// supports. Values already rejected are skipped.
pub fn check_capabilities(hypervisor: Hypervisor, params: &mut HvParams, errors: &mut FieldErrors) {
    let checks: [(Field, Option<Vec<&str>>, fn(&str) -> String); 3] = [
        (
            Field::DiskType,
            capability::legal_disk_types(hypervisor),
            messages::bad_disk_type,
        ),
        (
            Field::NicType,
            capability::legal_nic_types(hypervisor),
            messages::bad_nic_type,
        ),
        (
            Field::BootOrder,
            capability::legal_boot_devices(hypervisor),
            messages::bad_boot_order,
        ),
    ];

    for (field, legal, message) in checks {
        let (Some(legal), Some(value)) = (legal, params.text(field)) else {
            continue;
        };
        if errors.contains(field) {
            continue;
        }
        if !legal.contains(&value) {
            errors.set(field, ErrorKind::Invalid, message(value));
            params.clear(field);
        }
    }
}
