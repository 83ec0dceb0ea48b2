//! Node operation inputs

use crate::abstractions::ClusterDefaults;
use crate::types::{Cluster, NodeRole};
use crate::validation::checks::messages;
use crate::validation::modify::migration_mode;
use crate::validation::{
    ErrorKind, EvacuateInput, EvacuationTarget, Field, FieldErrors, MigrateInput,
    NodeOperationRequest, RoleChangeInput, ValidationEngine, ValidationResult,
};

pub type NodeValidation = ValidationResult<Option<NodeOperationRequest>>;

fn outcome(request: Option<NodeOperationRequest>, errors: FieldErrors) -> NodeValidation {
    ValidationResult {
        cleaned: if errors.is_empty() { request } else { None },
        errors,
    }
}

impl ValidationEngine {
    /// Validate a new role for a node. Master can never be assigned.
    pub fn validate_role_change(&self, input: &RoleChangeInput) -> NodeValidation {
        let mut errors = FieldErrors::new();
        let role = match input.role.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
            None => {
                errors.add(Field::Role, ErrorKind::Invalid, messages::REQUIRED);
                None
            }
            Some(value) => match value.parse::<NodeRole>() {
                Ok(role) if role.is_assignable() => Some(role),
                _ => {
                    errors.add(Field::Role, ErrorKind::Invalid, messages::not_a_choice(value));
                    None
                }
            },
        };

        let request = role.map(|new_role| NodeOperationRequest::RoleChange {
            new_role,
            force: input.force,
        });
        outcome(request, errors)
    }

    /// Validate migrating every primary instance off a node
    pub fn validate_node_migrate(&self, input: &MigrateInput) -> NodeValidation {
        let (mode, errors) = migration_mode(input);
        let request = mode.map(|mode| NodeOperationRequest::Migrate {
            mode,
            cleanup: input.cleanup,
        });
        outcome(request, errors)
    }

    /// Validate an evacuation of `node` on `cluster`.
    ///
    /// Exactly one of automatic allocation and an explicit target node must
    /// be chosen. Automatic allocation falls back to the cluster's default
    /// allocator when the request names none.
    pub fn validate_evacuate(
        &self,
        cluster: &Cluster,
        node: &str,
        defaults: Option<&ClusterDefaults>,
        input: &EvacuateInput,
    ) -> NodeValidation {
        let mut errors = FieldErrors::new();
        let target_node = input
            .node
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());

        let target = match (input.iallocator, target_node) {
            (true, Some(_)) => {
                errors.add(Field::NonField, ErrorKind::Invalid, messages::EVACUATE_BOTH);
                None
            }
            (false, None) => {
                errors.add(Field::NonField, ErrorKind::Invalid, messages::EVACUATE_NEITHER);
                None
            }
            (true, None) => {
                let hostname = input
                    .iallocator_hostname
                    .as_deref()
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .or_else(|| defaults.and_then(ClusterDefaults::iallocator_hostname));
                match hostname {
                    Some(hostname) => Some(EvacuationTarget::AutoAllocate(hostname.to_owned())),
                    None => {
                        errors.add(Field::Iallocator, ErrorKind::Invalid, messages::NO_IALLOCATOR);
                        None
                    }
                }
            }
            (false, Some(target)) => {
                if target != node && cluster.node(target).is_some() {
                    Some(EvacuationTarget::ExplicitNode(target.to_owned()))
                } else {
                    errors.add(Field::Node, ErrorKind::Invalid, messages::not_a_choice(target));
                    None
                }
            }
        };

        let request = target.map(|target| NodeOperationRequest::Evacuate { target });
        outcome(request, errors)
    }
}
