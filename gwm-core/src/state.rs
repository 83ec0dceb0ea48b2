//! In-memory state loaded from a YAML snapshot
//!
//! [`SnapshotState`] answers every lookup the engine makes: it is the
//! repository, the authorization oracle and the cluster defaults provider
//! at once. The CLI runs requests against it, and the tests build their
//! fixtures with it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::debug;

use crate::abstractions::{
    AuthorizationOracle, ClusterDefaults, ClusterDefaultsProvider, Repository,
};
use crate::error::{GwmError, GwmResult};
use crate::quota::UsedResources;
use crate::types::{
    Cluster, ClusterId, ClusterUserId, GroupId, Grantee, Hypervisor, Node, Organization, Owner,
    Permission, Profile, ResourceKind, ResourceRef, User, VirtualMachine,
};

/// A cluster and the defaults it applies to new instances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterEntry {
    #[serde(flatten)]
    pub cluster: Cluster,
    #[serde(default)]
    pub defaults: Option<ClusterDefaults>,
}

/// One object permission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grant {
    pub grantee: Grantee,
    pub permission: Permission,
    pub resource: ResourceRef,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub users: Vec<User>,
    pub profiles: Vec<Profile>,
    pub organizations: Vec<Organization>,
    pub clusters: Vec<ClusterEntry>,
    pub virtual_machines: Vec<VirtualMachine>,
    pub grants: Vec<Grant>,
}

impl Snapshot {
    pub fn from_yaml(yaml: &str) -> GwmResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> GwmResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&contents)
    }

    fn groups_of(&self, grantee: Grantee) -> Vec<GroupId> {
        match grantee {
            Grantee::Group(group) => vec![group],
            Grantee::User(id) => self
                .users
                .iter()
                .find(|u| u.id == id)
                .map(|u| u.groups.clone())
                .unwrap_or_default(),
        }
    }

    /// Whether `grant` applies to `grantee`, directly or through a group
    fn covers(&self, grant: &Grant, grantee: Grantee) -> bool {
        grant.grantee == grantee
            || match grant.grantee {
                Grantee::Group(group) => {
                    matches!(grantee, Grantee::User(_)) && self.groups_of(grantee).contains(&group)
                }
                Grantee::User(_) => false,
            }
    }
}

/// Shared, mutable view of a [`Snapshot`]
#[derive(Debug, Default)]
pub struct SnapshotState {
    snapshot: RwLock<Snapshot>,
}

impl SnapshotState {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> GwmResult<Self> {
        Ok(Self::new(Snapshot::from_file(path)?))
    }

    /// Current contents
    pub async fn snapshot(&self) -> Snapshot {
        self.snapshot.read().await.clone()
    }

    pub async fn user(&self, username: &str) -> GwmResult<User> {
        self.snapshot
            .read()
            .await
            .users
            .iter()
            .find(|u| u.username == username)
            .cloned()
            .ok_or_else(|| GwmError::not_found(format!("user {}", username)))
    }

    pub async fn add_grant(&self, grant: Grant) {
        self.snapshot.write().await.grants.push(grant);
    }
}

#[async_trait]
impl Repository for SnapshotState {
    async fn cluster(&self, id: ClusterId) -> GwmResult<Cluster> {
        self.snapshot
            .read()
            .await
            .clusters
            .iter()
            .find(|entry| entry.cluster.id == id)
            .map(|entry| entry.cluster.clone())
            .ok_or_else(|| GwmError::not_found(format!("cluster {}", id)))
    }

    async fn owner(&self, id: ClusterUserId) -> GwmResult<Owner> {
        let snapshot = self.snapshot.read().await;
        if let Some(profile) = snapshot.profiles.iter().find(|p| p.id == id) {
            return Ok(Owner::Individual(profile.clone()));
        }
        snapshot
            .organizations
            .iter()
            .find(|o| o.id == id)
            .map(|org| Owner::Group(org.clone()))
            .ok_or_else(|| GwmError::not_found(format!("owner {}", id)))
    }

    async fn organization_for_group(&self, group: GroupId) -> GwmResult<Organization> {
        self.snapshot
            .read()
            .await
            .organizations
            .iter()
            .find(|o| o.group == group)
            .cloned()
            .ok_or_else(|| GwmError::not_found(format!("organization for group {}", group)))
    }

    async fn virtual_machine(&self, cluster: ClusterId, hostname: &str) -> GwmResult<VirtualMachine> {
        self.snapshot
            .read()
            .await
            .virtual_machines
            .iter()
            .find(|vm| vm.cluster == cluster && vm.hostname == hostname)
            .cloned()
            .ok_or_else(|| GwmError::not_found(format!("virtual machine {}", hostname)))
    }

    async fn node(&self, cluster: ClusterId, hostname: &str) -> GwmResult<Node> {
        self.cluster(cluster)
            .await?
            .node(hostname)
            .cloned()
            .ok_or_else(|| GwmError::not_found(format!("node {}", hostname)))
    }

    async fn used_resources(
        &self,
        cluster: ClusterId,
        owner: ClusterUserId,
    ) -> GwmResult<UsedResources> {
        let snapshot = self.snapshot.read().await;
        Ok(UsedResources::tally(snapshot.virtual_machines.iter().filter(
            |vm| vm.cluster == cluster && vm.owner == Some(owner),
        )))
    }

    async fn record_virtual_machine(&self, vm: VirtualMachine) -> GwmResult<()> {
        let mut snapshot = self.snapshot.write().await;
        debug!(cluster = %vm.cluster, hostname = %vm.hostname, "Recording virtual machine");
        match snapshot
            .virtual_machines
            .iter_mut()
            .find(|existing| existing.cluster == vm.cluster && existing.hostname == vm.hostname)
        {
            Some(existing) => *existing = vm,
            None => snapshot.virtual_machines.push(vm),
        }
        Ok(())
    }
}

#[async_trait]
impl AuthorizationOracle for SnapshotState {
    async fn has_permission(
        &self,
        grantee: Grantee,
        permission: Permission,
        resource: &ResourceRef,
    ) -> GwmResult<bool> {
        let snapshot = self.snapshot.read().await;
        Ok(snapshot.grants.iter().any(|grant| {
            grant.permission == permission
                && &grant.resource == resource
                && snapshot.covers(grant, grantee)
        }))
    }

    async fn objects_with_any_permission(
        &self,
        grantee: Grantee,
        kind: ResourceKind,
        permissions: &[Permission],
    ) -> GwmResult<Vec<ResourceRef>> {
        let snapshot = self.snapshot.read().await;
        let resources: BTreeSet<ResourceRef> = snapshot
            .grants
            .iter()
            .filter(|grant| {
                grant.resource.kind() == kind
                    && permissions.contains(&grant.permission)
                    && snapshot.covers(grant, grantee)
            })
            .map(|grant| grant.resource.clone())
            .collect();
        Ok(resources.into_iter().collect())
    }
}

#[async_trait]
impl ClusterDefaultsProvider for SnapshotState {
    async fn defaults(&self, cluster: &Cluster) -> GwmResult<ClusterDefaults> {
        let snapshot = self.snapshot.read().await;
        Ok(snapshot
            .clusters
            .iter()
            .find(|entry| entry.cluster.id == cluster.id)
            .and_then(|entry| entry.defaults.clone())
            .unwrap_or_else(|| ClusterDefaults::minimal(Hypervisor::Kvm)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserId;

    const SNAPSHOT: &str = r#"
users:
  - id: 1
    username: alice
    groups: [10]
    profile: 100
organizations:
  - id: 200
    name: ops
    group: 10
profiles:
  - id: 100
    name: alice
    user: 1
clusters:
  - id: 1
    hostname: ganeti.example.com
    slug: ganeti
    nodes:
      - hostname: node1.example.com
        role: master
    defaults:
      hypervisor: xen-pvm
      memory: 1024
      vcpus: 2
grants:
  - grantee: {kind: group, id: 10}
    permission: create_vm
    resource: {kind: cluster, id: 1}
virtual_machines:
  - cluster: 1
    hostname: vm1.example.com
    owner: 200
    hypervisor: kvm
    disk_template: plain
    ram: 512
    virtual_cpus: 1
    disk_size: 1000
    is_running: true
"#;

    #[tokio::test]
    async fn test_snapshot_lookups() {
        let state = SnapshotState::new(Snapshot::from_yaml(SNAPSHOT).unwrap());

        let cluster = state.cluster(ClusterId(1)).await.unwrap();
        assert_eq!(cluster.slug, "ganeti");
        assert!(state.cluster(ClusterId(9)).await.unwrap_err().is_not_found());

        assert!(matches!(
            state.owner(ClusterUserId(200)).await.unwrap(),
            Owner::Group(_)
        ));
        assert!(matches!(
            state.owner(ClusterUserId(100)).await.unwrap(),
            Owner::Individual(_)
        ));

        let defaults = state.defaults(&cluster).await.unwrap();
        assert_eq!(defaults.hypervisor, Hypervisor::XenPvm);
        assert_eq!(defaults.memory, 1024);

        let used = state
            .used_resources(ClusterId(1), ClusterUserId(200))
            .await
            .unwrap();
        assert_eq!(used.ram, 512);
        assert_eq!(used.disk, 1000);
    }

    #[tokio::test]
    async fn test_user_inherits_group_grants() {
        let state = SnapshotState::new(Snapshot::from_yaml(SNAPSHOT).unwrap());
        let cluster = ResourceRef::cluster(ClusterId(1));

        assert!(state
            .has_permission(Grantee::User(UserId(1)), Permission::CreateVm, &cluster)
            .await
            .unwrap());
        assert!(!state
            .has_permission(Grantee::User(UserId(1)), Permission::Admin, &cluster)
            .await
            .unwrap());
        assert!(!state
            .has_permission(Grantee::User(UserId(2)), Permission::CreateVm, &cluster)
            .await
            .unwrap());

        let clusters = state
            .objects_with_any_permission(
                Grantee::Group(GroupId(10)),
                ResourceKind::Cluster,
                &[Permission::Admin, Permission::CreateVm],
            )
            .await
            .unwrap();
        assert_eq!(clusters, vec![cluster]);
    }

    #[tokio::test]
    async fn test_record_replaces_existing() {
        let state = SnapshotState::new(Snapshot::from_yaml(SNAPSHOT).unwrap());
        let mut vm = state
            .virtual_machine(ClusterId(1), "vm1.example.com")
            .await
            .unwrap();
        vm.ram = 2048;
        state.record_virtual_machine(vm).await.unwrap();

        let snapshot = state.snapshot().await;
        assert_eq!(snapshot.virtual_machines.len(), 1);
        assert_eq!(snapshot.virtual_machines[0].ram, 2048);
    }
}
