//! Authorization oracle abstraction

use crate::{
    error::GwmResult,
    types::{Grantee, Permission, ResourceKind, ResourceRef},
};
use async_trait::async_trait;

/// Answers permission questions about users and groups.
///
/// A user grantee holds everything granted to the user directly or to any
/// group the user belongs to.
#[async_trait]
pub trait AuthorizationOracle: Send + Sync {
    /// Check a single permission on a resource
    async fn has_permission(
        &self,
        grantee: Grantee,
        permission: Permission,
        resource: &ResourceRef,
    ) -> GwmResult<bool>;

    /// Every resource of `kind` on which `grantee` holds at least one of
    /// `permissions`
    async fn objects_with_any_permission(
        &self,
        grantee: Grantee,
        kind: ResourceKind,
        permissions: &[Permission],
    ) -> GwmResult<Vec<ResourceRef>>;

    /// Check whether `grantee` holds any of `permissions` on a resource
    async fn has_any_permission(
        &self,
        grantee: Grantee,
        permissions: &[Permission],
        resource: &ResourceRef,
    ) -> GwmResult<bool> {
        for permission in permissions {
            if self.has_permission(grantee, *permission, resource).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Check whether `grantee` holds any of `permissions` on any resource
    /// of `kind`
    async fn has_any_permission_anywhere(
        &self,
        grantee: Grantee,
        kind: ResourceKind,
        permissions: &[Permission],
    ) -> GwmResult<bool> {
        Ok(!self
            .objects_with_any_permission(grantee, kind, permissions)
            .await?
            .is_empty())
    }
}
