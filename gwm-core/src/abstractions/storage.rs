//! Repository abstraction over the persistent object store

use crate::{
    error::GwmResult,
    quota::UsedResources,
    types::{
        Cluster, ClusterId, ClusterUserId, GroupId, Node, Organization, Owner, VirtualMachine,
    },
};
use async_trait::async_trait;

/// Read access to clusters, owners and VMs plus the one write the
/// dispatcher needs.
///
/// Lookups return [`GwmError::NotFound`](crate::error::GwmError::NotFound)
/// for missing objects so callers can tell them apart from a failing
/// store; see [`optional`](crate::error::optional).
#[async_trait]
pub trait Repository: Send + Sync {
    /// Get a cluster by id
    async fn cluster(&self, id: ClusterId) -> GwmResult<Cluster>;

    /// Get a VM owner by id
    async fn owner(&self, id: ClusterUserId) -> GwmResult<Owner>;

    /// Get the organization backing a permission group
    async fn organization_for_group(&self, group: GroupId) -> GwmResult<Organization>;

    /// Get a VM by cluster and hostname
    async fn virtual_machine(&self, cluster: ClusterId, hostname: &str)
        -> GwmResult<VirtualMachine>;

    /// Get a node by cluster and hostname
    async fn node(&self, cluster: ClusterId, hostname: &str) -> GwmResult<Node>;

    /// Resources `owner` consumes on `cluster`
    async fn used_resources(
        &self,
        cluster: ClusterId,
        owner: ClusterUserId,
    ) -> GwmResult<UsedResources>;

    /// Store a VM the way it will look once its job completes
    async fn record_virtual_machine(&self, vm: VirtualMachine) -> GwmResult<()>;
}
