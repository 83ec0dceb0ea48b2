// Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use gwm_core::{
    abstractions::{Repository, ServiceContainer},
    audit::MemoryAuditSink,
    config::GwmConfig,
    dry_run::{DryRunJobService, RefreshBehavior},
    error::{GwmError, GwmResult},
    node_ops::NodeOperationCoordinator,
    quota::UsedResources,
    request_builder::RequestBuilder,
    state::{Snapshot, SnapshotState},
    types::{
        Cluster, ClusterId, ClusterUserId, GroupId, HvParams, Node, Organization, Owner, User,
        VirtualMachine,
    },
    validation::{ValidationEngine, VmCreateInput},
    vm_ops::VmJobDispatcher,
};

pub const CLUSTER: ClusterId = ClusterId(1);
pub const PVM_CLUSTER: ClusterId = ClusterId(2);
pub const OPS: ClusterUserId = ClusterUserId(200);
pub const ALICE_PROFILE: ClusterUserId = ClusterUserId(100);

/// Users, owners, two clusters and a few VMs.
///
/// - `root` is a superuser
/// - `alice` is in group 10 (organization `ops`, id 200), which may create
///   VMs on both clusters
/// - `mallory` is in no group and holds no permission
/// - `migrator` holds `migrate` on cluster 1
/// - `clusteradmin` holds `admin` on cluster 1
///
/// `ops` has a 4096 MB memory quota on cluster 1 and 3000 MB of it in use.
pub const WORLD: &str = r#"
users:
  - {id: 1, username: root, is_superuser: true, profile: 101}
  - {id: 2, username: alice, groups: [10], profile: 100}
  - {id: 3, username: migrator, profile: 102}
  - {id: 4, username: clusteradmin, profile: 103}
  - {id: 5, username: mallory, profile: 104}
profiles:
  - {id: 100, name: alice, user: 2}
  - {id: 101, name: root, user: 1}
  - {id: 102, name: migrator, user: 3}
  - {id: 103, name: clusteradmin, user: 4}
  - {id: 104, name: mallory, user: 5}
organizations:
  - {id: 200, name: ops, group: 10}
clusters:
  - id: 1
    hostname: ganeti.example.com
    slug: ganeti
    nodes:
      - {hostname: node1.example.com, role: master}
      - {hostname: node2.example.com, role: regular}
      - {hostname: node3.example.com, role: regular}
    operating_systems: [image+debian, image+ubuntu]
    quotas:
      - owner: 200
        quota: {ram: 4096}
    defaults:
      hypervisor: kvm
      hypervisors: [kvm, xen-hvm]
      memory: 512
      vcpus: 1
      nic_link: br0
      iallocator: hail
  - id: 2
    hostname: xen.example.com
    slug: xen
    nodes:
      - {hostname: xen1.example.com, role: master}
      - {hostname: xen2.example.com, role: regular}
    operating_systems: [image+debian]
    defaults:
      hypervisor: xen-pvm
      hypervisors: [xen-pvm]
      memory: 256
      vcpus: 1
grants:
  - {grantee: {kind: group, id: 10}, permission: create_vm, resource: {kind: cluster, id: 1}}
  - {grantee: {kind: group, id: 10}, permission: create_vm, resource: {kind: cluster, id: 2}}
  - {grantee: {kind: user, id: 3}, permission: migrate, resource: {kind: cluster, id: 1}}
  - {grantee: {kind: user, id: 4}, permission: admin, resource: {kind: cluster, id: 1}}
virtual_machines:
  - cluster: 1
    hostname: running.example.com
    owner: 200
    hypervisor: kvm
    disk_template: plain
    primary_node: node2.example.com
    os: image+debian
    ram: 3000
    virtual_cpus: 2
    disk_size: 10000
    is_running: true
    hvparams: {disk_type: paravirtual, nic_type: paravirtual, boot_order: disk}
    nics:
      - {mac: "aa:00:00:00:00:01", link: br0}
  - cluster: 1
    hostname: failed.example.com
    owner: 200
    hypervisor: kvm
    disk_template: plain
    ram: 512
    virtual_cpus: 1
    disk_size: 1000
  - cluster: 1
    hostname: templated.example.com
    owner: 200
    hypervisor: kvm
    disk_template: plain
    ram: 512
    virtual_cpus: 1
    template: basic
  - cluster: 1
    hostname: deleting.example.com
    owner: 200
    hypervisor: kvm
    disk_template: plain
    ram: 8192
    virtual_cpus: 8
    is_running: true
    pending_delete: true
"#;

/// Collaborators wired to the test world
pub struct TestWorld {
    pub state: Arc<SnapshotState>,
    pub jobs: Arc<DryRunJobService>,
    pub audit: Arc<MemoryAuditSink>,
    pub services: ServiceContainer,
}

impl TestWorld {
    pub fn new() -> Self {
        Self::with_jobs(RefreshBehavior::Immediate)
    }

    pub fn with_jobs(behavior: RefreshBehavior) -> Self {
        Self::build(behavior, false)
    }

    /// A world whose store answers reads but rejects every write
    pub fn with_read_only_store() -> Self {
        Self::build(RefreshBehavior::Immediate, true)
    }

    fn build(behavior: RefreshBehavior, read_only: bool) -> Self {
        let snapshot = Snapshot::from_yaml(WORLD).expect("test world parses");
        let state = Arc::new(SnapshotState::new(snapshot));
        let jobs = Arc::new(DryRunJobService::with_behavior(behavior));
        let audit = Arc::new(MemoryAuditSink::new());
        let repository: Arc<dyn Repository> = if read_only {
            Arc::new(ReadOnlyStore(state.clone()))
        } else {
            state.clone()
        };
        let services = ServiceContainer::builder()
            .with_repository(repository)
            .with_authz(state.clone())
            .with_defaults(state.clone())
            .with_jobs(jobs.clone())
            .with_audit(audit.clone())
            .build()
            .expect("all collaborators set");

        Self {
            state,
            jobs,
            audit,
            services,
        }
    }

    pub async fn user(&self, username: &str) -> User {
        self.state.user(username).await.expect("user exists")
    }

    pub fn engine(&self) -> ValidationEngine {
        ValidationEngine::from_services(&self.services)
    }

    pub fn builder(&self) -> RequestBuilder {
        RequestBuilder::from_services(&self.services)
    }

    pub fn vm_dispatcher(&self, config: &GwmConfig) -> VmJobDispatcher {
        VmJobDispatcher::new(self.services.clone(), config)
    }

    pub fn node_coordinator(&self, config: &GwmConfig) -> NodeOperationCoordinator {
        NodeOperationCoordinator::new(self.services.clone(), config)
    }
}

/// Reads from the snapshot, fails on writes
struct ReadOnlyStore(Arc<SnapshotState>);

#[async_trait]
impl Repository for ReadOnlyStore {
    async fn cluster(&self, id: ClusterId) -> GwmResult<Cluster> {
        self.0.cluster(id).await
    }

    async fn owner(&self, id: ClusterUserId) -> GwmResult<Owner> {
        self.0.owner(id).await
    }

    async fn organization_for_group(&self, group: GroupId) -> GwmResult<Organization> {
        self.0.organization_for_group(group).await
    }

    async fn virtual_machine(
        &self,
        cluster: ClusterId,
        hostname: &str,
    ) -> GwmResult<VirtualMachine> {
        self.0.virtual_machine(cluster, hostname).await
    }

    async fn node(&self, cluster: ClusterId, hostname: &str) -> GwmResult<Node> {
        self.0.node(cluster, hostname).await
    }

    async fn used_resources(
        &self,
        cluster: ClusterId,
        owner: ClusterUserId,
    ) -> GwmResult<UsedResources> {
        self.0.used_resources(cluster, owner).await
    }

    async fn record_virtual_machine(&self, vm: VirtualMachine) -> GwmResult<()> {
        Err(GwmError::transport("record", format!("store is read-only: {}", vm.hostname)))
    }
}

/// A valid kvm/plain creation request by `ops` on cluster 1
pub fn create_input() -> VmCreateInput {
    VmCreateInput {
        owner: Some(OPS),
        cluster: Some(CLUSTER),
        hostname: Some("new.example.com".into()),
        disk_template: Some("plain".into()),
        os: Some("image+debian".into()),
        memory: Some(512),
        vcpus: Some(1),
        disk_size: Some(1000),
        pnode: Some("node2.example.com".into()),
        nic_mode: Some("bridged".into()),
        hvparams: HvParams {
            disk_type: Some("paravirtual".into()),
            nic_type: Some("paravirtual".into()),
            boot_order: Some("disk".into()),
            ..Default::default()
        },
        ..Default::default()
    }
}
