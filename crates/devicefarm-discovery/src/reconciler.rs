//! Merges freshly enumerated devices against previously known state
//!
//! Devices are processed one at a time. Building a new device allocates
//! ports, and allocation for device N must see the ports already given to
//! devices 1..N-1 of the same pass.

use devicefarm_core::{Device, DeviceId};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use tracing::{debug, warn};

use crate::builder::BuildError;
use crate::enumerator::RawDevice;

/// Reconcile the present devices against `known`
///
/// Known devices are re-emitted with their ports, workspace and session
/// timestamp untouched; `busy` and `user_blocked` are cleared. Unknown ones
/// are built with `build`, and a device whose build fails is left out.
/// Known devices that are not present are dropped.
pub async fn reconcile<F, Fut>(present: &[RawDevice], known: &[Device], mut build: F) -> Vec<Device>
where
    F: FnMut(RawDevice) -> Fut,
    Fut: Future<Output = Result<Device, BuildError>>,
{
    let known: HashMap<&DeviceId, &Device> = known.iter().map(|d| (&d.identifier, d)).collect();
    let mut seen: HashSet<&DeviceId> = HashSet::new();
    let mut devices = Vec::with_capacity(present.len());

    for raw in present {
        if !seen.insert(&raw.identifier) {
            continue;
        }
        match known.get(&raw.identifier) {
            Some(existing) => devices.push(rediscovered(existing, raw)),
            None => match build(raw.clone()).await {
                Ok(device) => {
                    debug!(device = %device.identifier, "Discovered new device");
                    devices.push(device);
                }
                Err(e) => {
                    warn!(device = %raw.identifier, error = %e, "Skipping device that could not be built");
                }
            },
        }
    }

    devices
}

/// Copy of a known device for a new pass, with transient holds cleared
fn rediscovered(existing: &Device, raw: &RawDevice) -> Device {
    let mut device = existing.clone();
    device.busy = false;
    device.user_blocked = false;
    if !raw.state.is_empty() {
        device.state = raw.state.clone();
    }
    if let Some(name) = &raw.name {
        device.display_name = name.clone();
    }
    if let Some(os_version) = &raw.os_version {
        device.os_version = os_version.clone();
    }
    device
}

/// Stable sort by state label, so ties keep enumeration order
pub fn sort_by_state(devices: &mut [Device]) {
    devices.sort_by(|a, b| a.state.cmp(&b.state));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::tests::{builder, CountingPorts, FakeEnumerator};
    use devicefarm_core::{DeviceClass, Platform};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn raw(id: &str) -> RawDevice {
        RawDevice::new(id, Platform::Android, DeviceClass::Real).with_state("device")
    }

    fn known_busy(id: &str, port: u16) -> Device {
        let mut device = Device::new(id.into(), "Pixel", "14", Platform::Android, DeviceClass::Real);
        device.busy = true;
        device.user_blocked = true;
        device.control_port = port;
        device.stream_port = port + 100;
        device.session_start_timestamp = Some(42);
        device.workspace_path = "/ws/A".into();
        device
    }

    #[tokio::test]
    async fn test_known_device_keeps_state_but_clears_holds() {
        let temp = TempDir::new().unwrap();
        let builder = builder(&temp, Arc::new(CountingPorts::default()));
        let enumerator = FakeEnumerator::default();

        let (b, e) = (&builder, &enumerator);

        let devices = reconcile(&[raw("A"), raw("B")], &[known_busy("A", 5001)], move |r| {
            b.build(r, e)
        })
        .await;

        assert_eq!(devices.len(), 2);
        let a = &devices[0];
        assert_eq!(a.id(), "A");
        assert!(!a.busy);
        assert!(!a.user_blocked);
        assert_eq!(a.control_port, 5001);
        assert_eq!(a.stream_port, 5101);
        assert_eq!(a.session_start_timestamp, Some(42));
        assert_eq!(a.workspace_path, std::path::PathBuf::from("/ws/A"));

        let b = &devices[1];
        assert_eq!(b.id(), "B");
        assert_ne!(b.control_port, 0);
        assert!(b.workspace_path.is_dir());
    }

    #[tokio::test]
    async fn test_absent_devices_are_dropped() {
        let temp = TempDir::new().unwrap();
        let builder = builder(&temp, Arc::new(CountingPorts::default()));
        let enumerator = FakeEnumerator::default();

        let (b, e) = (&builder, &enumerator);

        let devices = reconcile(&[raw("B")], &[known_busy("A", 5001)], move |r| b.build(r, e)).await;

        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id(), "B");
    }

    #[tokio::test]
    async fn test_new_devices_get_distinct_ports() {
        let temp = TempDir::new().unwrap();
        let builder = builder(&temp, Arc::new(CountingPorts::default()));
        let enumerator = FakeEnumerator::default();
        let present: Vec<RawDevice> = (0..8).map(|i| raw(&format!("D{}", i))).collect();

        let (b, e) = (&builder, &enumerator);

        let devices = reconcile(&present, &[], move |r| b.build(r, e)).await;

        let ports: HashSet<u16> = devices.iter().map(|d| d.control_port).collect();
        assert_eq!(devices.len(), 8);
        assert_eq!(ports.len(), 8);
    }

    #[tokio::test]
    async fn test_build_failure_skips_only_that_device() {
        let temp = TempDir::new().unwrap();
        let builder = builder(&temp, Arc::new(CountingPorts::default()));
        let enumerator = FakeEnumerator {
            broken: vec!["B".to_string()],
            ..Default::default()
        };

        let (b, e) = (&builder, &enumerator);

        let devices = reconcile(&[raw("A"), raw("B"), raw("C")], &[], move |r| b.build(r, e)).await;

        let ids: Vec<&str> = devices.iter().map(|d| d.id()).collect();
        assert_eq!(ids, vec!["A", "C"]);
    }

    #[tokio::test]
    async fn test_duplicate_identifiers_build_once() {
        let temp = TempDir::new().unwrap();
        let ports = Arc::new(CountingPorts::default());
        let builder = builder(&temp, ports.clone());
        let enumerator = FakeEnumerator::default();

        let (b, e) = (&builder, &enumerator);

        let devices = reconcile(&[raw("A"), raw("A")], &[], move |r| b.build(r, e)).await;
        assert_eq!(devices.len(), 1);
        assert_eq!(ports.reserved.lock().await.len(), 2);
    }

    #[test]
    fn test_sort_by_state_is_stable() {
        let mut devices: Vec<Device> = [("S1", "Booted"), ("S2", "Shutdown"), ("S3", "Booted")]
            .into_iter()
            .map(|(id, state)| {
                let mut d = Device::new(id.into(), "iPhone 14", "16.0", Platform::Ios, DeviceClass::Simulator);
                d.state = state.to_string();
                d
            })
            .collect();

        sort_by_state(&mut devices);

        let order: Vec<(&str, &str)> = devices.iter().map(|d| (d.id(), d.state.as_str())).collect();
        assert_eq!(
            order,
            vec![("S1", "Booted"), ("S3", "Booted"), ("S2", "Shutdown")]
        );
    }
}
