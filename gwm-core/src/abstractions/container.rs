//! Collaborator container
//!
//! Bundles the external services the coordinators depend on so they can be
//! swapped between a live deployment, a snapshot and test doubles.

use crate::{
    abstractions::{AuthorizationOracle, ClusterDefaultsProvider, JobService, Repository},
    audit::{AuditSink, TracingAuditSink},
    error::{GwmError, GwmResult},
};
use std::sync::Arc;

/// Service container for dependency injection
#[derive(Clone)]
pub struct ServiceContainer {
    /// Object store
    pub repository: Arc<dyn Repository>,
    /// Permission resolution
    pub authz: Arc<dyn AuthorizationOracle>,
    /// Cluster job queue
    pub jobs: Arc<dyn JobService>,
    /// Cluster default settings
    pub defaults: Arc<dyn ClusterDefaultsProvider>,
    /// Where accepted operations are logged
    pub audit: Arc<dyn AuditSink>,
}

impl ServiceContainer {
    pub fn builder() -> ServiceContainerBuilder {
        ServiceContainerBuilder::new()
    }
}

/// Builder for a service container
#[derive(Default)]
pub struct ServiceContainerBuilder {
    repository: Option<Arc<dyn Repository>>,
    authz: Option<Arc<dyn AuthorizationOracle>>,
    jobs: Option<Arc<dyn JobService>>,
    defaults: Option<Arc<dyn ClusterDefaultsProvider>>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl ServiceContainerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repository(mut self, repository: Arc<dyn Repository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn with_authz(mut self, authz: Arc<dyn AuthorizationOracle>) -> Self {
        self.authz = Some(authz);
        self
    }

    pub fn with_jobs(mut self, jobs: Arc<dyn JobService>) -> Self {
        self.jobs = Some(jobs);
        self
    }

    pub fn with_defaults(mut self, defaults: Arc<dyn ClusterDefaultsProvider>) -> Self {
        self.defaults = Some(defaults);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Build the container. The audit sink defaults to tracing output.
    pub fn build(self) -> GwmResult<ServiceContainer> {
        let missing = |name: &str| {
            GwmError::configuration("service container", format!("no {} configured", name))
        };

        Ok(ServiceContainer {
            repository: self.repository.ok_or_else(|| missing("repository"))?,
            authz: self.authz.ok_or_else(|| missing("authorization oracle"))?,
            jobs: self.jobs.ok_or_else(|| missing("job service"))?,
            defaults: self.defaults.ok_or_else(|| missing("cluster defaults provider"))?,
            audit: self
                .audit
                .unwrap_or_else(|| Arc::new(TracingAuditSink) as Arc<dyn AuditSink>),
        })
    }
}
