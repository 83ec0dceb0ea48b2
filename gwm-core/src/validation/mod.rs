//! Validation engine
//!
//! Every request goes through one ordered pipeline. Each stage works on the
//! running [`ValidationResult`]: it adds errors and drops the cleaned values
//! they concern. No stage fails fast on a field
//! error; only collaborator failures (a repository or oracle that cannot be
//! reached) abort validation.
//!
//! For instance creation the stages are:
//!
//! 1. field checks (required, choices, hostname, ranges, hypervisor params)
//! 2. cross-field structure (disk size, node pairing, boot device, allocator)
//! 3. hypervisor capabilities (disk type, NIC type, boot device)
//! 4. authorization and quota, only when 1 to 3 found nothing

mod checks;
mod create;
mod errors;
mod modify;
mod node;
mod requests;

pub use checks::{hostname_error, is_fqdn, is_mac, messages};
pub use errors::{ErrorKind, Field, FieldError, FieldErrors};
pub use node::NodeValidation;
pub use requests::{
    EvacuateInput, EvacuationTarget, InstanceMigrateRequest, MigrateInput, ModifyRequest,
    NicInput, NodeOperationRequest, RenameInput, RenameRequest, RoleChangeInput,
    VirtualMachineRequest, VmCreateInput, VmModifyInput,
};

use serde::Serialize;
use std::sync::Arc;

use crate::abstractions::{AuthorizationOracle, Repository, ServiceContainer};
use crate::capability::OperationKind;
use crate::error::{GwmError, GwmResult};
use crate::quota::{QuotaResource, QuotaViolation};

/// Cleaned data plus every error found while producing it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult<T> {
    pub cleaned: T,
    pub errors: FieldErrors,
}

impl<T> ValidationResult<T> {
    pub fn new(cleaned: T) -> Self {
        Self {
            cleaned,
            errors: FieldErrors::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// The cleaned data, or the errors as an invalid request
    pub fn into_result(self) -> GwmResult<T> {
        if self.errors.is_empty() {
            Ok(self.cleaned)
        } else {
            Err(GwmError::invalid_request(self.errors))
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ValidationResult<U> {
        ValidationResult {
            cleaned: f(self.cleaned),
            errors: self.errors,
        }
    }
}

/// Message for a quota violation on a create or modify request
pub(crate) fn quota_message(violation: &QuotaViolation, kind: OperationKind) -> &'static str {
    match (violation.resource, kind) {
        (QuotaResource::Memory, OperationKind::Create) => {
            "Owner does not have enough ram remaining on this cluster. You may choose to not automatically start the instance or reduce the amount of ram."
        }
        (QuotaResource::Memory, OperationKind::Modify) => {
            "Owner does not have enough ram remaining on this cluster. You must reduce the amount of ram."
        }
        (QuotaResource::Vcpus, OperationKind::Create) => {
            "Owner does not have enough virtual cpus remaining on this cluster. You may choose to not automatically start the instance or reduce the amount of virtual cpus."
        }
        (QuotaResource::Vcpus, OperationKind::Modify) => {
            "Owner does not have enough virtual cpus remaining on this cluster. You must reduce the amount of virtual cpus."
        }
        (QuotaResource::DiskSize, _) => {
            "Owner does not have enough diskspace remaining on this cluster."
        }
    }
}

/// Runs the validation pipelines against the repository and the
/// authorization oracle
#[derive(Clone)]
pub struct ValidationEngine {
    repository: Arc<dyn Repository>,
    authz: Arc<dyn AuthorizationOracle>,
}

impl ValidationEngine {
    pub fn new(repository: Arc<dyn Repository>, authz: Arc<dyn AuthorizationOracle>) -> Self {
        Self { repository, authz }
    }

    pub fn from_services(services: &ServiceContainer) -> Self {
        Self::new(services.repository.clone(), services.authz.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_result() {
        let ok = ValidationResult::new(3u32);
        assert_eq!(ok.into_result().unwrap(), 3);

        let mut bad = ValidationResult::new(3u32);
        bad.errors
            .set(Field::Vcpus, ErrorKind::Invalid, messages::VCPUS);
        match bad.into_result() {
            Err(GwmError::InvalidRequest { errors }) => {
                assert_eq!(errors.messages(Field::Vcpus), vec![messages::VCPUS])
            }
            other => panic!("Expected InvalidRequest, got {:?}", other),
        }
    }

    #[test]
    fn test_quota_messages_differ_by_operation() {
        let violation = QuotaViolation {
            resource: QuotaResource::Memory,
            limit: 4096,
            used: 3000,
            requested: 2000,
            previous: 0,
        };
        assert!(quota_message(&violation, OperationKind::Create).contains("not automatically start"));
        assert!(quota_message(&violation, OperationKind::Modify).contains("You must reduce"));
    }
}
