//! Periodic reconciliation of the registry and the hub inventory

use devicefarm_core::{DeviceDelta, DeviceRegistry, PassScope};
use devicefarm_hub::InventorySink;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::builder::DeviceInfoBuilder;
use crate::manager::{DeviceManager, DeviceTypeFilter};

/// Summary of one sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Devices reported by the sources that answered
    pub found: usize,
    pub added: usize,
    pub removed: usize,
    /// Sources whose enumeration failed; their registry entries were kept
    pub failed_sources: Vec<String>,
    pub hub_pushed: bool,
}

/// Drives discovery passes and keeps the hub's view in step
pub struct NodeSync {
    managers: Vec<Arc<dyn DeviceManager>>,
    filter: DeviceTypeFilter,
    registry: Arc<DeviceRegistry>,
    builder: Arc<DeviceInfoBuilder>,
    hub: Option<Arc<dyn InventorySink>>,
    interval: Duration,
    // One pass at a time, so a pass never sees another's half-applied result
    pass_lock: Mutex<()>,
}

impl NodeSync {
    pub fn new(
        managers: Vec<Arc<dyn DeviceManager>>,
        filter: DeviceTypeFilter,
        registry: Arc<DeviceRegistry>,
        builder: Arc<DeviceInfoBuilder>,
        hub: Option<Arc<dyn InventorySink>>,
        interval: Duration,
    ) -> Self {
        Self {
            managers,
            filter,
            registry,
            builder,
            hub,
            interval,
            pass_lock: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn has_hub(&self) -> bool {
        self.hub.is_some()
    }

    /// Run one discovery pass for every manager and branch
    pub async fn sync_once(&self) -> SyncReport {
        let _pass = self.pass_lock.lock().await;
        let mut report = SyncReport::default();
        let mut removed_keys = Vec::new();

        for manager in &self.managers {
            for &class in self.filter.classes() {
                let scope = PassScope::new(manager.group(), class);
                let known = self.registry.list_scope(scope).await;

                let devices = match manager.discover(class, &known).await {
                    Ok(devices) => devices,
                    Err(e) => {
                        warn!(group = %scope.group, class = ?class, error = %e, "Keeping previous devices for failed source");
                        report.failed_sources.push(format!("{}/{:?}", scope.group, class).to_lowercase());
                        continue;
                    }
                };

                report.found += devices.len();
                let diff = self.registry.apply_pass(scope, &known, devices).await;
                report.added += diff.added.len();
                report.removed += diff.removed.len();

                for device in diff.removed.iter().chain(diff.discarded.iter()) {
                    self.builder.release(device).await;
                }
                removed_keys.extend(diff.removed.iter().map(|d| d.removal_key()));
            }
        }

        if let Some(hub) = &self.hub {
            let inventory = DeviceDelta::add(self.registry.list().await);
            let removals = DeviceDelta::remove(removed_keys);
            let (added, removed) = tokio::join!(hub.post_delta(&inventory), hub.post_delta(&removals));
            report.hub_pushed = true;
            for result in [added, removed] {
                if let Err(e) = result {
                    warn!(error = %e, "Hub sync failed");
                    report.hub_pushed = false;
                }
            }
        }

        info!(
            found = report.found,
            added = report.added,
            removed = report.removed,
            failed = report.failed_sources.len(),
            "Sync pass complete"
        );
        report
    }

    /// Sync now and then on every interval tick, forever
    pub async fn run(&self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = self.sync_once().await;
            if !report.failed_sources.is_empty() && report.found == 0 {
                error!(sources = ?report.failed_sources, "No device source answered");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::tests::{builder, CountingPorts, FakeEnumerator};
    use crate::enumerator::{EnumerationError, RawDevice};
    use crate::manager::{AndroidDeviceManager, LocalDiscovery};
    use crate::tracker::tests::RecordingSink;
    use crate::tracker::{AttachDetachTracker, PollingWatcher};
    use async_trait::async_trait;
    use devicefarm_core::{Device, DeviceClass, DeviceId, Platform, PlatformGroup};
    use tempfile::TempDir;
    use tokio::sync::Notify;

    /// Manager that waits between enumeration and returning its result
    struct PausingManager {
        inner: AndroidDeviceManager,
        entered: Notify,
        resume: Notify,
    }

    #[async_trait]
    impl DeviceManager for PausingManager {
        fn group(&self) -> PlatformGroup {
            self.inner.group()
        }

        async fn discover(&self, class: DeviceClass, known: &[Device]) -> Result<Vec<Device>, EnumerationError> {
            let devices = self.inner.discover(class, known).await;
            self.entered.notify_one();
            self.resume.notified().await;
            devices
        }
    }

    fn raw(id: &str, class: DeviceClass) -> RawDevice {
        RawDevice::new(id, Platform::Android, class).with_state("device")
    }

    struct Fixture {
        _temp: TempDir,
        ports: Arc<CountingPorts>,
        registry: Arc<DeviceRegistry>,
        sink: Arc<RecordingSink>,
        sync: NodeSync,
    }

    fn fixture(adb: FakeEnumerator) -> Fixture {
        let temp = TempDir::new().unwrap();
        let ports = Arc::new(CountingPorts::default());
        let builder = Arc::new(builder(&temp, ports.clone()));
        let registry = Arc::new(DeviceRegistry::new());
        let sink = Arc::new(RecordingSink::default());
        let manager = AndroidDeviceManager::new(Arc::new(adb), LocalDiscovery::new(builder.clone()));
        let sync = NodeSync::new(
            vec![Arc::new(manager)],
            DeviceTypeFilter::Both,
            registry.clone(),
            builder,
            Some(sink.clone() as Arc<dyn InventorySink>),
            Duration::from_secs(30),
        );
        Fixture {
            _temp: temp,
            ports,
            registry,
            sink,
            sync,
        }
    }

    #[tokio::test]
    async fn test_sync_registers_and_pushes_inventory() {
        let f = fixture(FakeEnumerator {
            devices: vec![
                raw("R1", DeviceClass::Real),
                raw("emulator-5554", DeviceClass::Simulator),
            ],
            ..Default::default()
        });

        let report = f.sync.sync_once().await;

        assert_eq!(report.found, 2);
        assert_eq!(report.added, 2);
        assert!(report.hub_pushed);
        assert_eq!(f.registry.len().await, 2);

        let deltas = f.sink.deltas.lock().await;
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].len(), 2);
    }

    #[tokio::test]
    async fn test_second_pass_keeps_ports() {
        let f = fixture(FakeEnumerator {
            devices: vec![raw("R1", DeviceClass::Real)],
            ..Default::default()
        });

        f.sync.sync_once().await;
        let first = f.registry.get(&DeviceId::from("R1")).await.unwrap();
        let report = f.sync.sync_once().await;
        let second = f.registry.get(&DeviceId::from("R1")).await.unwrap();

        assert_eq!(report.added, 0);
        assert_eq!(first.control_port, second.control_port);
        assert_eq!(f.ports.reserved.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_absent_device_is_removed_and_withdrawn() {
        let f = fixture(FakeEnumerator::default());
        let mut gone = devicefarm_core::Device::new(
            "R9".into(),
            "Pixel",
            "14",
            Platform::Android,
            DeviceClass::Real,
        );
        gone.host_address = "http://10.0.0.5:4723".to_string();
        f.registry.upsert(gone.clone()).await;

        let report = f.sync.sync_once().await;

        assert_eq!(report.removed, 1);
        assert!(f.registry.is_empty().await);
        let deltas = f.sink.deltas.lock().await;
        assert_eq!(deltas.as_slice(), &[DeviceDelta::remove(vec![gone.removal_key()])]);
    }

    #[tokio::test]
    async fn test_failed_source_keeps_previous_devices() {
        let f = fixture(FakeEnumerator {
            unreachable: true,
            ..Default::default()
        });
        f.registry
            .upsert(devicefarm_core::Device::new(
                "R1".into(),
                "Pixel",
                "14",
                Platform::Android,
                DeviceClass::Real,
            ))
            .await;

        let report = f.sync.sync_once().await;

        assert_eq!(report.failed_sources, vec!["android/real", "android/simulator"]);
        assert!(f.registry.contains(&"R1".into()).await);
    }

    #[tokio::test]
    async fn test_detach_during_pass_leaves_no_unreserved_ports() {
        let temp = TempDir::new().unwrap();
        let ports = Arc::new(CountingPorts::default());
        let builder = Arc::new(builder(&temp, ports.clone()));
        let registry = Arc::new(DeviceRegistry::new());
        let adb = Arc::new(FakeEnumerator {
            devices: vec![raw("A", DeviceClass::Real)],
            ..Default::default()
        });

        let tracker = AttachDetachTracker::new(
            PlatformGroup::Android,
            Arc::new(PollingWatcher::new(adb.clone(), DeviceClass::Real, Duration::from_secs(2))),
            adb.clone(),
            builder.clone(),
            registry.clone(),
            None,
        );
        let manager = Arc::new(PausingManager {
            inner: AndroidDeviceManager::new(adb, LocalDiscovery::new(builder.clone())),
            entered: Notify::new(),
            resume: Notify::new(),
        });
        let sync = NodeSync::new(
            vec![manager.clone() as Arc<dyn DeviceManager>],
            DeviceTypeFilter::Real,
            registry.clone(),
            builder,
            None,
            Duration::from_secs(30),
        );

        let attached = tracker.handle_attached(raw("A", DeviceClass::Real)).await.unwrap();
        assert!(ports.reserved.lock().await.contains(&attached.control_port));

        let (report, ()) = tokio::join!(sync.sync_once(), async {
            manager.entered.notified().await;
            tracker.handle_detached(&DeviceId::from("A")).await;
            manager.resume.notify_one();
        });

        assert_eq!(report.added, 0);
        assert!(!registry.contains(&"A".into()).await);
        let reserved = ports.reserved.lock().await;
        for device in registry.list().await {
            assert!(reserved.contains(&device.control_port));
            assert!(reserved.contains(&device.stream_port));
        }
        assert!(reserved.is_empty());
    }
}
