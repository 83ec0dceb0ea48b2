//! Quota ledger
//!
//! Quotas are set per owner and cluster. A limit that is `None` is
//! unlimited. The arithmetic lives in [`check_quota`], which is pure; the
//! [`QuotaGate`] serializes the read-check-submit window for one owner on
//! one cluster so two concurrent requests cannot both pass against the
//! same usage snapshot.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::types::{ClusterId, ClusterUserId, VirtualMachine};
use crate::validation::Field;

/// Resource limits for one owner on one cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Quota {
    /// Memory in MB
    pub ram: Option<u64>,
    pub vcpus: Option<u32>,
    /// Disk in MB
    pub disk: Option<u64>,
}

impl Quota {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn is_unlimited(&self) -> bool {
        self.ram.is_none() && self.vcpus.is_none() && self.disk.is_none()
    }
}

/// What an owner currently consumes on a cluster
///
/// RAM and vCPUs count running VMs only, disk counts every VM.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsedResources {
    pub ram: u64,
    pub vcpus: u32,
    pub disk: u64,
}

impl UsedResources {
    /// Sum the usage of `vms`, skipping ones that are being deleted
    pub fn tally<'a>(vms: impl IntoIterator<Item = &'a VirtualMachine>) -> Self {
        vms.into_iter()
            .filter(|vm| !vm.pending_delete)
            .fold(Self::default(), |mut used, vm| {
                used.disk += vm.disk_size;
                if vm.is_running {
                    used.ram += vm.ram;
                    used.vcpus += vm.virtual_cpus;
                }
                used
            })
    }
}

/// Resources an existing VM already holds and will give back when changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub ram: u64,
    pub vcpus: u32,
    pub disk: u64,
}

impl Reservation {
    /// What `vm` counts against its owner's usage right now
    pub fn of(vm: &VirtualMachine) -> Self {
        if vm.is_running {
            Self {
                ram: vm.ram,
                vcpus: vm.virtual_cpus,
                disk: vm.disk_size,
            }
        } else {
            Self {
                ram: 0,
                vcpus: 0,
                disk: vm.disk_size,
            }
        }
    }
}

/// Resources a request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDemand {
    pub memory: u64,
    pub vcpus: u32,
    /// `None` when the request does not touch disk (diskless, modify)
    pub disk_size: Option<u64>,
    /// Whether the VM will be running once the job completes
    pub start: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaResource {
    Memory,
    Vcpus,
    DiskSize,
}

impl QuotaResource {
    /// Request field the violation is reported on
    pub fn field(&self) -> Field {
        match self {
            QuotaResource::Memory => Field::Memory,
            QuotaResource::Vcpus => Field::Vcpus,
            QuotaResource::DiskSize => Field::DiskSize,
        }
    }
}

/// One limit a demand would break
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaViolation {
    pub resource: QuotaResource,
    pub limit: u64,
    pub used: u64,
    pub requested: u64,
    pub previous: u64,
}

impl fmt::Display for QuotaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} limit exceeded: limit={}, used={}, requested={}, released={}",
            self.resource, self.limit, self.used, self.requested, self.previous
        )
    }
}

fn exceeds(
    resource: QuotaResource,
    limit: Option<u64>,
    used: u64,
    requested: u64,
    previous: u64,
) -> Option<QuotaViolation> {
    let limit = limit?;
    let total = used.saturating_add(requested).saturating_sub(previous);
    (total > limit).then_some(QuotaViolation {
        resource,
        limit,
        used,
        requested,
        previous,
    })
}

/// Check `demand` against `quota` given the owner's current usage.
///
/// `previous` is the reservation a modified VM already holds; it is
/// subtracted before comparing. RAM and vCPUs are only checked when the VM
/// will run, disk always. The result is ordered memory, vcpus, disk.
pub fn check_quota(
    quota: &Quota,
    used: &UsedResources,
    demand: &ResourceDemand,
    previous: Option<&Reservation>,
) -> Vec<QuotaViolation> {
    if quota.is_unlimited() {
        return Vec::new();
    }

    let previous = previous.copied().unwrap_or_default();
    let mut violations = Vec::new();

    if demand.start {
        violations.extend(exceeds(
            QuotaResource::Memory,
            quota.ram,
            used.ram,
            demand.memory,
            previous.ram,
        ));
        violations.extend(exceeds(
            QuotaResource::Vcpus,
            quota.vcpus.map(u64::from),
            u64::from(used.vcpus),
            u64::from(demand.vcpus),
            u64::from(previous.vcpus),
        ));
    }

    if let Some(disk_size) = demand.disk_size {
        violations.extend(exceeds(
            QuotaResource::DiskSize,
            quota.disk,
            used.disk,
            disk_size,
            previous.disk,
        ));
    }

    violations
}

/// Serializes quota-checked requests per (cluster, owner)
#[derive(Debug, Default)]
pub struct QuotaGate {
    enabled: bool,
    locks: DashMap<(ClusterId, ClusterUserId), Arc<Mutex<()>>>,
}

/// Held for as long as a request's usage read must stay current
#[derive(Debug)]
pub struct QuotaPermit {
    guard: Option<OwnedMutexGuard<()>>,
}

impl QuotaPermit {
    /// A permit that does not hold anything
    pub fn unheld() -> Self {
        Self { guard: None }
    }

    pub fn is_held(&self) -> bool {
        self.guard.is_some()
    }
}

impl QuotaGate {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            locks: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Wait until no other request for this owner on this cluster is in flight
    pub async fn acquire(&self, cluster: ClusterId, owner: ClusterUserId) -> QuotaPermit {
        if !self.enabled {
            return QuotaPermit::unheld();
        }

        // Entries only the map still references have no holder or waiter
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        let lock = self
            .locks
            .entry((cluster, owner))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        debug!(%cluster, %owner, "Waiting for quota gate");
        QuotaPermit {
            guard: Some(lock.lock_owned().await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn limited(ram: Option<u64>, vcpus: Option<u32>, disk: Option<u64>) -> Quota {
        Quota { ram, vcpus, disk }
    }

    #[test]
    fn test_memory_over_quota_when_starting() {
        let quota = limited(Some(4096), None, None);
        let used = UsedResources {
            ram: 3000,
            vcpus: 0,
            disk: 0,
        };
        let demand = ResourceDemand {
            memory: 2000,
            vcpus: 1,
            disk_size: Some(1000),
            start: true,
        };

        let violations = check_quota(&quota, &used, &demand, None);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].resource, QuotaResource::Memory);
        assert_eq!(violations[0].resource.field(), Field::Memory);
    }

    #[test]
    fn test_ram_and_cpu_only_count_when_started() {
        let quota = limited(Some(1), Some(1), Some(10_000));
        let used = UsedResources::default();
        let demand = ResourceDemand {
            memory: 512,
            vcpus: 4,
            disk_size: Some(20_000),
            start: false,
        };

        let violations = check_quota(&quota, &used, &demand, None);
        let resources: Vec<_> = violations.iter().map(|v| v.resource).collect();
        assert_eq!(resources, vec![QuotaResource::DiskSize]);
    }

    #[test]
    fn test_previous_reservation_is_released() {
        let quota = limited(Some(4096), Some(4), None);
        let used = UsedResources {
            ram: 4096,
            vcpus: 4,
            disk: 0,
        };
        let previous = Reservation {
            ram: 2048,
            vcpus: 2,
            disk: 0,
        };

        let test_cases = vec![
            (2048, 2, true),
            (2049, 2, false),
            (2048, 3, false),
        ];

        for (memory, vcpus, fits) in test_cases {
            let demand = ResourceDemand {
                memory,
                vcpus,
                disk_size: None,
                start: true,
            };
            let violations = check_quota(&quota, &used, &demand, Some(&previous));
            assert_eq!(violations.is_empty(), fits, "memory={} vcpus={}", memory, vcpus);
        }
    }

    #[test]
    fn test_tally_skips_deleted_and_stopped() {
        let base = VirtualMachine {
            cluster: ClusterId(1),
            hostname: "a.example.com".into(),
            owner: Some(ClusterUserId(1)),
            hypervisor: crate::types::Hypervisor::Kvm,
            disk_template: crate::types::DiskTemplate::Plain,
            primary_node: None,
            secondary_node: None,
            os: None,
            ram: 512,
            virtual_cpus: 2,
            disk_size: 1000,
            is_running: true,
            pending_delete: false,
            template: None,
            hvparams: Default::default(),
            nics: vec![],
        };
        let stopped = VirtualMachine {
            hostname: "b.example.com".into(),
            is_running: false,
            ..base.clone()
        };
        let deleting = VirtualMachine {
            hostname: "c.example.com".into(),
            pending_delete: true,
            ..base.clone()
        };

        let used = UsedResources::tally([&base, &stopped, &deleting]);
        assert_eq!(
            used,
            UsedResources {
                ram: 512,
                vcpus: 2,
                disk: 2000,
            }
        );
    }

    #[tokio::test]
    async fn test_gate_serializes_same_owner() {
        let gate = QuotaGate::new(true);
        let permit = gate.acquire(ClusterId(1), ClusterUserId(1)).await;
        assert!(permit.is_held());

        let blocked = tokio::time::timeout(
            Duration::from_millis(20),
            gate.acquire(ClusterId(1), ClusterUserId(1)),
        )
        .await;
        assert!(blocked.is_err());

        let other_owner = tokio::time::timeout(
            Duration::from_millis(20),
            gate.acquire(ClusterId(1), ClusterUserId(2)),
        )
        .await;
        assert!(other_owner.is_ok());

        drop(permit);
        let reacquired = tokio::time::timeout(
            Duration::from_millis(20),
            gate.acquire(ClusterId(1), ClusterUserId(1)),
        )
        .await;
        assert!(reacquired.is_ok());
    }

    #[tokio::test]
    async fn test_gate_forgets_idle_owners() {
        let gate = QuotaGate::new(true);
        let held = gate.acquire(ClusterId(1), ClusterUserId(1)).await;
        for owner in 2..10 {
            drop(gate.acquire(ClusterId(1), ClusterUserId(owner)).await);
        }

        let latest = gate.acquire(ClusterId(2), ClusterUserId(1)).await;
        let mut keys: Vec<_> = gate.locks.iter().map(|entry| *entry.key()).collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                (ClusterId(1), ClusterUserId(1)),
                (ClusterId(2), ClusterUserId(1)),
            ]
        );

        // The held permit still excludes its owner
        let blocked = tokio::time::timeout(
            Duration::from_millis(20),
            gate.acquire(ClusterId(1), ClusterUserId(1)),
        )
        .await;
        assert!(blocked.is_err());
        drop((held, latest));
    }

    #[tokio::test]
    async fn test_disabled_gate_never_blocks() {
        let gate = QuotaGate::new(false);
        let first = gate.acquire(ClusterId(1), ClusterUserId(1)).await;
        let second = gate.acquire(ClusterId(1), ClusterUserId(1)).await;
        assert!(!first.is_held());
        assert!(!second.is_held());
    }

    fn quota_strategy() -> impl Strategy<Value = Quota> {
        (
            proptest::option::of(0u64..100_000),
            proptest::option::of(0u32..64),
            proptest::option::of(0u64..1_000_000),
        )
            .prop_map(|(ram, vcpus, disk)| Quota { ram, vcpus, disk })
    }

    proptest! {
        #[test]
        fn prop_check_quota_is_idempotent(
            quota in quota_strategy(),
            used_ram in 0u64..100_000,
            used_vcpus in 0u32..64,
            used_disk in 0u64..1_000_000,
            memory in 0u64..50_000,
            vcpus in 0u32..32,
            disk_size in proptest::option::of(0u64..500_000),
            start in any::<bool>(),
        ) {
            let used = UsedResources { ram: used_ram, vcpus: used_vcpus, disk: used_disk };
            let demand = ResourceDemand { memory, vcpus, disk_size, start };

            let first = check_quota(&quota, &used, &demand, None);
            let second = check_quota(&quota, &used, &demand, None);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_unlimited_never_violates(
            memory in 0u64..u64::MAX / 2,
            vcpus in any::<u32>(),
            start in any::<bool>(),
        ) {
            let demand = ResourceDemand { memory, vcpus, disk_size: Some(memory), start };
            let violations = check_quota(&Quota::unlimited(), &UsedResources::default(), &demand, None);
            prop_assert!(violations.is_empty());
        }
    }
}
