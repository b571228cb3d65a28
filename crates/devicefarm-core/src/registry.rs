//! Process-wide registry of devices served by this node
//!
//! The registry is the only shared mutable device state. Every mutation is a
//! single upsert or delete keyed by identifier, applied under one write lock,
//! so attach/detach events and reconciliation passes may arrive in any order
//! and still converge.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use crate::device::{Device, DeviceClass, DeviceId, PlatformGroup};
use crate::utilization::UtilizationLedger;

/// Registry change notification
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// Device inserted for the first time
    Added(Device),
    /// Existing device replaced or mutated
    Updated(Device),
    /// Device removed from the registry
    Removed(DeviceId),
}

/// The set of registry entries owned by one enumeration source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassScope {
    pub group: PlatformGroup,
    pub class: DeviceClass,
}

impl PassScope {
    pub fn new(group: PlatformGroup, class: DeviceClass) -> Self {
        Self { group, class }
    }

    pub fn contains(&self, device: &Device) -> bool {
        device.platform_family.group() == self.group && device.device_class == self.class
    }
}

/// Outcome of applying one reconciliation pass
#[derive(Debug, Clone, Default)]
pub struct RegistryDiff {
    /// Devices not previously in the registry
    pub added: Vec<Device>,
    /// Devices dropped because the pass no longer reports them
    pub removed: Vec<Device>,
    /// Devices that were already known and were refreshed
    pub retained: Vec<Device>,
    /// Freshly built records that lost to an entry registered during the
    /// pass; their ports were never handed to the registry
    pub discarded: Vec<Device>,
    /// Identifiers the pass carried over but that left the registry while
    /// the pass was running
    pub vanished: Vec<DeviceId>,
}

impl RegistryDiff {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Authoritative local list of devices
#[derive(Debug)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<DeviceId, Device>>,
    ledger: Arc<UtilizationLedger>,
    event_tx: broadcast::Sender<RegistryEvent>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::with_ledger(Arc::new(UtilizationLedger::new()))
    }

    /// Create a registry that records finished sessions into `ledger`
    pub fn with_ledger(ledger: Arc<UtilizationLedger>) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            devices: RwLock::new(HashMap::new()),
            ledger,
            event_tx,
        }
    }

    pub fn ledger(&self) -> Arc<UtilizationLedger> {
        self.ledger.clone()
    }

    /// Subscribe to registry changes
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_tx.subscribe()
    }

    /// Insert or replace a device, returns true if it was not present before
    pub async fn upsert(&self, device: Device) -> bool {
        let mut devices = self.devices.write().await;
        let is_new = devices
            .insert(device.identifier.clone(), device.clone())
            .is_none();
        drop(devices);

        if is_new {
            debug!(device = %device.identifier, "Device added to registry");
            let _ = self.event_tx.send(RegistryEvent::Added(device));
        } else {
            let _ = self.event_tx.send(RegistryEvent::Updated(device));
        }
        is_new
    }

    /// Insert a device only if its identifier is not registered yet
    pub async fn insert_if_absent(&self, device: Device) -> bool {
        let mut devices = self.devices.write().await;
        if devices.contains_key(&device.identifier) {
            return false;
        }
        devices.insert(device.identifier.clone(), device.clone());
        drop(devices);

        debug!(device = %device.identifier, "Device added to registry");
        let _ = self.event_tx.send(RegistryEvent::Added(device));
        true
    }

    /// Remove a device; removing an unknown identifier is a no-op
    pub async fn remove(&self, id: &DeviceId) -> Option<Device> {
        let removed = self.devices.write().await.remove(id);
        if removed.is_some() {
            info!(device = %id, "Device removed from registry");
            let _ = self.event_tx.send(RegistryEvent::Removed(id.clone()));
        }
        removed
    }

    pub async fn get(&self, id: &DeviceId) -> Option<Device> {
        self.devices.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &DeviceId) -> bool {
        self.devices.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }

    /// All devices, ordered by identifier
    pub async fn list(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.read().await.values().cloned().collect();
        devices.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        devices
    }

    /// Devices owned by one enumeration source, ordered by identifier
    pub async fn list_scope(&self, scope: PassScope) -> Vec<Device> {
        let mut devices: Vec<Device> = self
            .devices
            .read()
            .await
            .values()
            .filter(|d| scope.contains(d))
            .cloned()
            .collect();
        devices.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        devices
    }

    /// Mutate a device in place, returns the updated copy
    pub async fn update<F>(&self, id: &DeviceId, f: F) -> Option<Device>
    where
        F: FnOnce(&mut Device),
    {
        let mut devices = self.devices.write().await;
        let device = devices.get_mut(id)?;
        f(device);
        let updated = device.clone();
        drop(devices);

        let _ = self.event_tx.send(RegistryEvent::Updated(updated.clone()));
        Some(updated)
    }

    /// Apply a reconciliation pass for one source
    ///
    /// `known` is the scope snapshot the pass was reconciled against. Devices
    /// in `devices` are upserted and entries of that snapshot that the pass
    /// does not mention are removed. Entries registered or removed while the
    /// pass was running win over the pass:
    /// - a carried-over device that is gone from the registry stays gone
    /// - a device already registered keeps its ports, workspace and session
    ///   state, and the pass's own build of it is reported as discarded
    /// - an entry not in `known` is never removed as stale
    pub async fn apply_pass(
        &self,
        scope: PassScope,
        known: &[Device],
        devices: Vec<Device>,
    ) -> RegistryDiff {
        let mut diff = RegistryDiff::default();
        let mut events = Vec::new();
        let known: HashSet<&DeviceId> = known.iter().map(|d| &d.identifier).collect();
        let present: HashSet<DeviceId> = devices.iter().map(|d| d.identifier.clone()).collect();

        let mut registry = self.devices.write().await;

        let stale: Vec<DeviceId> = registry
            .values()
            .filter(|d| {
                scope.contains(d) && known.contains(&d.identifier) && !present.contains(&d.identifier)
            })
            .map(|d| d.identifier.clone())
            .collect();
        for id in stale {
            if let Some(device) = registry.remove(&id) {
                events.push(RegistryEvent::Removed(id));
                diff.removed.push(device);
            }
        }

        for mut device in devices {
            let carried_over = known.contains(&device.identifier);
            match registry.remove(&device.identifier) {
                None if carried_over => {
                    debug!(device = %device.identifier, "Device left the registry during the pass");
                    diff.vanished.push(device.identifier);
                }
                None => {
                    registry.insert(device.identifier.clone(), device.clone());
                    events.push(RegistryEvent::Added(device.clone()));
                    diff.added.push(device);
                }
                Some(current) => {
                    let same_ports = (current.control_port, current.stream_port)
                        == (device.control_port, device.stream_port);
                    if !carried_over && !same_ports {
                        diff.discarded.push(device.clone());
                    }
                    keep_registered_state(&current, &mut device);
                    registry.insert(device.identifier.clone(), device.clone());
                    events.push(RegistryEvent::Updated(device.clone()));
                    diff.retained.push(device);
                }
            }
        }
        drop(registry);

        for event in events {
            let _ = self.event_tx.send(event);
        }

        debug!(
            group = %scope.group,
            class = ?scope.class,
            added = diff.added.len(),
            removed = diff.removed.len(),
            retained = diff.retained.len(),
            discarded = diff.discarded.len(),
            vanished = diff.vanished.len(),
            "Applied discovery pass"
        );
        diff
    }

    /// Hand the device to a session; `None` if missing, busy or blocked
    pub async fn begin_session(&self, id: &DeviceId) -> Option<Device> {
        let now = Utc::now().timestamp_millis();
        let mut devices = self.devices.write().await;
        let device = devices.get_mut(id)?;
        if !device.is_available() {
            return None;
        }
        device.begin_session(now);
        let updated = device.clone();
        drop(devices);

        info!(device = %id, "Session started");
        let _ = self.event_tx.send(RegistryEvent::Updated(updated.clone()));
        Some(updated)
    }

    /// Release the device from its session, returns the session length
    pub async fn end_session(&self, id: &DeviceId) -> Option<u64> {
        let now = Utc::now().timestamp_millis();
        let mut devices = self.devices.write().await;
        let device = devices.get_mut(id)?;
        let elapsed = device.end_session(now);
        let updated = device.clone();
        drop(devices);

        let total = self.ledger.record(id, elapsed).await;
        info!(device = %id, elapsed_ms = elapsed, total_ms = total, "Session ended");
        let _ = self.event_tx.send(RegistryEvent::Updated(updated));
        Some(elapsed)
    }

    /// Place an administrative hold on a device
    pub async fn block(&self, id: &DeviceId) -> Option<Device> {
        self.update(id, |d| d.user_blocked = true).await
    }

    pub async fn unblock(&self, id: &DeviceId) -> Option<Device> {
        self.update(id, |d| d.user_blocked = false).await
    }
}

/// Resources and session ownership live in the registry, not in discovery
/// results
fn keep_registered_state(current: &Device, device: &mut Device) {
    device.control_port = current.control_port;
    device.stream_port = current.stream_port;
    device.workspace_path = current.workspace_path.clone();
    device.busy = current.busy;
    device.user_blocked = current.user_blocked;
    device.session_start_timestamp = current.session_start_timestamp;
    device.cumulative_busy_millis = device
        .cumulative_busy_millis
        .max(current.cumulative_busy_millis);
}
