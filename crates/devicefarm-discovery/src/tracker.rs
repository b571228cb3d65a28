//! Attach/detach tracking outside the polling cycle
//!
//! A [`TopologyWatcher`] reports devices appearing and disappearing. The
//! [`AttachDetachTracker`] turns each report into one registry mutation and,
//! when a hub is configured, one inventory delta. Events are not ordered
//! against a concurrent reconciliation pass; both paths only ever upsert or
//! delete by identifier.

use async_trait::async_trait;
use devicefarm_core::{Device, DeviceClass, DeviceDelta, DeviceId, DeviceRegistry, PlatformGroup};
use devicefarm_hub::InventorySink;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::builder::DeviceInfoBuilder;
use crate::enumerator::{EnumerationError, PlatformEnumerator, RawDevice};

/// Topology change reported by the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyEvent {
    Attached(RawDevice),
    Detached(DeviceId),
}

/// Source of topology changes
#[async_trait]
pub trait TopologyWatcher: Send + Sync {
    /// Wait for the next batch of events, in the order the platform reported them
    async fn next_events(&self) -> Result<Vec<TopologyEvent>, EnumerationError>;
}

#[derive(Default)]
struct PollState {
    previous: Vec<DeviceId>,
    polled: bool,
}

/// Watcher that diffs successive enumerations of one device class
pub struct PollingWatcher {
    enumerator: Arc<dyn PlatformEnumerator>,
    class: DeviceClass,
    period: Duration,
    state: Mutex<PollState>,
}

impl PollingWatcher {
    pub fn new(enumerator: Arc<dyn PlatformEnumerator>, class: DeviceClass, period: Duration) -> Self {
        Self {
            enumerator,
            class,
            period,
            state: Mutex::new(PollState::default()),
        }
    }
}

#[async_trait]
impl TopologyWatcher for PollingWatcher {
    async fn next_events(&self) -> Result<Vec<TopologyEvent>, EnumerationError> {
        let mut state = self.state.lock().await;
        if state.polled {
            tokio::time::sleep(self.period).await;
        }
        state.polled = true;

        let mut seen = HashSet::new();
        let current: Vec<RawDevice> = self
            .enumerator
            .enumerate()
            .await?
            .into_iter()
            .filter(|raw| raw.class == self.class && seen.insert(raw.identifier.clone()))
            .collect();

        let previous: HashSet<&DeviceId> = state.previous.iter().collect();
        let mut events: Vec<TopologyEvent> = current
            .iter()
            .filter(|raw| !previous.contains(&raw.identifier))
            .cloned()
            .map(TopologyEvent::Attached)
            .collect();
        events.extend(
            state
                .previous
                .iter()
                .filter(|id| !seen.contains(*id))
                .cloned()
                .map(TopologyEvent::Detached),
        );

        state.previous = current.into_iter().map(|raw| raw.identifier).collect();
        Ok(events)
    }
}

/// Applies attach/detach events to the registry and the hub
pub struct AttachDetachTracker {
    group: PlatformGroup,
    watcher: Arc<dyn TopologyWatcher>,
    enumerator: Arc<dyn PlatformEnumerator>,
    builder: Arc<DeviceInfoBuilder>,
    registry: Arc<DeviceRegistry>,
    hub: Option<Arc<dyn InventorySink>>,
    event_tx: broadcast::Sender<TopologyEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AttachDetachTracker {
    pub fn new(
        group: PlatformGroup,
        watcher: Arc<dyn TopologyWatcher>,
        enumerator: Arc<dyn PlatformEnumerator>,
        builder: Arc<DeviceInfoBuilder>,
        registry: Arc<DeviceRegistry>,
        hub: Option<Arc<dyn InventorySink>>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            group,
            watcher,
            enumerator,
            builder,
            registry,
            hub,
            event_tx,
            task: Mutex::new(None),
        }
    }

    pub fn group(&self) -> PlatformGroup {
        self.group
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TopologyEvent> {
        self.event_tx.subscribe()
    }

    /// Start the event loop; a running tracker is left alone
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let tracker = Arc::clone(self);
        *task = Some(tokio::spawn(async move { tracker.event_loop().await }));
        info!(group = %self.group, "Attach/detach tracker started");
    }

    pub async fn stop(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
            info!(group = %self.group, "Attach/detach tracker stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.task.lock().await.as_ref().is_some_and(|t| !t.is_finished())
    }

    async fn event_loop(&self) {
        loop {
            let events = match self.watcher.next_events().await {
                Ok(events) => events,
                Err(e) => {
                    warn!(group = %self.group, error = %e, "Topology watch failed");
                    continue;
                }
            };

            for event in events {
                let _ = self.event_tx.send(event.clone());
                match event {
                    TopologyEvent::Attached(raw) => {
                        self.handle_attached(raw).await;
                    }
                    TopologyEvent::Detached(id) => {
                        self.handle_detached(&id).await;
                    }
                }
            }
        }
    }

    /// Register a newly attached device and announce it to the hub
    ///
    /// An identifier already in the registry is left untouched.
    pub async fn handle_attached(&self, raw: RawDevice) -> Option<Device> {
        if self.registry.contains(&raw.identifier).await {
            debug!(device = %raw.identifier, "Attached device already registered");
            return None;
        }

        let id = raw.identifier.clone();
        let device = match self.builder.build(raw, self.enumerator.as_ref()).await {
            Ok(device) => device,
            Err(e) => {
                warn!(device = %id, error = %e, "Could not build attached device");
                return None;
            }
        };

        let delta = DeviceDelta::add(vec![device.clone()]);
        let ((), inserted) = tokio::join!(
            self.push(&delta),
            self.registry.insert_if_absent(device.clone())
        );

        if !inserted {
            // A reconciliation pass registered it while we were building; the
            // hub already got our record, so correct it with the registered one
            self.builder.release(&device).await;
            if let Some(current) = self.registry.get(&id).await {
                self.push(&DeviceDelta::add(vec![current])).await;
            }
            return None;
        }
        info!(device = %id, group = %self.group, "Device attached");
        Some(device)
    }

    /// Drop a detached device and withdraw it from the hub
    ///
    /// Unknown identifiers are ignored.
    pub async fn handle_detached(&self, id: &DeviceId) -> Option<Device> {
        let Some(device) = self.registry.get(id).await else {
            debug!(device = %id, "Detached device not registered");
            return None;
        };

        let delta = DeviceDelta::remove(vec![device.removal_key()]);
        let ((), removed) = tokio::join!(self.push(&delta), self.registry.remove(id));

        let removed = removed?;
        self.builder.release(&removed).await;
        info!(device = %id, group = %self.group, "Device detached");
        Some(removed)
    }

    async fn push(&self, delta: &DeviceDelta) {
        let Some(hub) = &self.hub else {
            return;
        };
        if let Err(e) = hub.post_delta(delta).await {
            warn!(
                action = delta.action().as_str(),
                error = %e,
                "Hub push failed, next sync will repair it"
            );
        }
    }
}
