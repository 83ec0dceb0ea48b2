//! Cluster default settings abstraction

use crate::{
    error::GwmResult,
    types::{Cluster, Hypervisor},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Settings a cluster applies to new instances unless told otherwise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterDefaults {
    pub hypervisor: Hypervisor,
    /// Hypervisors enabled on the cluster
    #[serde(default)]
    pub hypervisors: Vec<Hypervisor>,
    /// Memory in MB
    pub memory: u64,
    pub vcpus: u32,
    #[serde(default)]
    pub nic_link: Option<String>,
    #[serde(default)]
    pub nic_type: Option<String>,
    #[serde(default)]
    pub disk_type: Option<String>,
    #[serde(default)]
    pub boot_order: Option<String>,
    #[serde(default)]
    pub nic_types: Vec<String>,
    #[serde(default)]
    pub disk_types: Vec<String>,
    #[serde(default)]
    pub boot_devices: Vec<String>,
    #[serde(default)]
    pub serial_console: Option<bool>,
    #[serde(default)]
    pub root_path: Option<String>,
    #[serde(default)]
    pub kernel_path: Option<String>,
    /// Hostname of the allocator plugin, if automatic allocation is set up
    #[serde(default)]
    pub iallocator: Option<String>,
}

impl ClusterDefaults {
    /// Defaults for a cluster that reports nothing beyond its hypervisor
    pub fn minimal(hypervisor: Hypervisor) -> Self {
        Self {
            hypervisor,
            hypervisors: vec![hypervisor],
            memory: 512,
            vcpus: 1,
            nic_link: None,
            nic_type: None,
            disk_type: None,
            boot_order: None,
            nic_types: Vec::new(),
            disk_types: Vec::new(),
            boot_devices: Vec::new(),
            serial_console: None,
            root_path: None,
            kernel_path: None,
            iallocator: None,
        }
    }

    /// Allocator hostname, treating an empty string as unset
    pub fn iallocator_hostname(&self) -> Option<&str> {
        self.iallocator.as_deref().filter(|h| !h.is_empty())
    }
}

/// Reads the default instance settings of a cluster
#[async_trait]
pub trait ClusterDefaultsProvider: Send + Sync {
    async fn defaults(&self, cluster: &Cluster) -> GwmResult<ClusterDefaults>;
}
