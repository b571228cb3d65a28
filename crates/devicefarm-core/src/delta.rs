//! Inventory deltas exchanged between a node and the hub

use serde::{Deserialize, Serialize};

use crate::device::{Device, DeviceId};

/// Hub-side dedupe key: a device is unique per identifier and serving node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovalKey {
    pub identifier: DeviceId,
    pub host_address: String,
}

/// Devices to upsert into the hub inventory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddDelta {
    pub devices: Vec<Device>,
}

/// Devices to delete from the hub inventory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveDelta {
    pub devices: Vec<RemovalKey>,
}

/// Which way a delta changes the hub inventory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaAction {
    #[default]
    Add,
    Remove,
}

impl DeltaAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
        }
    }
}

/// A single batched inventory change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceDelta {
    Add(AddDelta),
    Remove(RemoveDelta),
}

impl DeviceDelta {
    pub fn add(devices: Vec<Device>) -> Self {
        Self::Add(AddDelta { devices })
    }

    pub fn remove(keys: Vec<RemovalKey>) -> Self {
        Self::Remove(RemoveDelta { devices: keys })
    }

    pub fn action(&self) -> DeltaAction {
        match self {
            Self::Add(_) => DeltaAction::Add,
            Self::Remove(_) => DeltaAction::Remove,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Add(d) => d.devices.len(),
            Self::Remove(d) => d.devices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identifiers touched by this delta, in payload order
    pub fn identifiers(&self) -> Vec<DeviceId> {
        match self {
            Self::Add(d) => d.devices.iter().map(|dev| dev.identifier.clone()).collect(),
            Self::Remove(d) => d.devices.iter().map(|k| k.identifier.clone()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceClass, Platform};

    #[test]
    fn test_remove_payload_shape() {
        let delta = RemoveDelta {
            devices: vec![RemovalKey {
                identifier: "C".into(),
                host_address: "http://10.0.0.5:4723".to_string(),
            }],
        };
        let json = serde_json::to_value(&delta).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "devices": [{ "identifier": "C", "hostAddress": "http://10.0.0.5:4723" }]
            })
        );
    }

    #[test]
    fn test_delta_action_and_ids() {
        let device = Device::new("A".into(), "Pixel", "14", Platform::Android, DeviceClass::Real);
        let add = DeviceDelta::add(vec![device.clone()]);
        assert_eq!(add.action(), DeltaAction::Add);
        assert_eq!(add.identifiers(), vec![DeviceId::from("A")]);

        let remove = DeviceDelta::remove(vec![device.removal_key()]);
        assert_eq!(remove.action(), DeltaAction::Remove);
        assert_eq!(remove.len(), 1);
        assert!(DeviceDelta::remove(Vec::new()).is_empty());
    }
}
