//! Validation and job dispatch core of the gwm cluster console
//!
//! Requests to create, change, rename or migrate instances and to operate
//! on nodes are built from raw input by the [`request_builder`], checked by
//! the [`validation`] engine against hypervisor capabilities, permissions
//! and quotas, and handed to the cluster as jobs by the coordinators in
//! [`vm_ops`] and [`node_ops`].

pub mod abstractions;
pub mod audit;
pub mod capability;
pub mod config;
pub mod dry_run;
pub mod error;
pub mod jobs;
pub mod node_ops;
pub mod quota;
pub mod request_builder;
pub mod state;
pub mod types;
pub mod validation;
pub mod vm_ops;
