//! Hub-side aggregate of device inventories reported by nodes

use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::delta::{DeviceDelta, RemovalKey};
use crate::device::Device;

/// Counts of what a delta changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InventoryChange {
    pub upserted: usize,
    pub removed: usize,
}

/// Devices from every node, deduplicated by `(identifier, host_address)`
#[derive(Debug, Default)]
pub struct HubInventory {
    devices: RwLock<HashMap<RemovalKey, Device>>,
}

impl HubInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a node's delta; removing unknown keys is a no-op
    pub async fn apply(&self, delta: DeviceDelta) -> InventoryChange {
        let mut change = InventoryChange::default();
        let mut devices = self.devices.write().await;
        match delta {
            DeviceDelta::Add(add) => {
                for device in add.devices {
                    devices.insert(device.removal_key(), device);
                    change.upserted += 1;
                }
            }
            DeviceDelta::Remove(remove) => {
                for key in remove.devices {
                    if devices.remove(&key).is_some() {
                        change.removed += 1;
                    }
                }
            }
        }
        debug!(
            upserted = change.upserted,
            removed = change.removed,
            total = devices.len(),
            "Applied inventory delta"
        );
        change
    }

    /// All devices, ordered by host then identifier
    pub async fn list(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.read().await.values().cloned().collect();
        devices.sort_by(|a, b| {
            a.host_address
                .cmp(&b.host_address)
                .then_with(|| a.identifier.cmp(&b.identifier))
        });
        devices
    }

    /// Devices served by one node
    pub async fn for_host(&self, host_address: &str) -> Vec<Device> {
        self.list()
            .await
            .into_iter()
            .filter(|d| d.host_address == host_address)
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }
}
