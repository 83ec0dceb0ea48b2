//! Trait abstractions for the collaborators gwm talks to
//!
//! The engine never owns persistence, permission resolution or the cluster
//! RPC client. It depends on these interfaces instead so the same pipeline
//! runs against a live deployment, a state snapshot or test doubles.

pub mod authorization;
pub mod container;
pub mod defaults;
pub mod job_service;
pub mod storage;

pub use authorization::*;
pub use container::*;
pub use defaults::*;
pub use job_service::*;
pub use storage::*;
