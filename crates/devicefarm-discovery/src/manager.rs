//! Device manager façades, one per platform family
//!
//! A manager answers "which devices of my platform are usable right now",
//! given the devices the caller already knows about. Failures never escape
//! the façade methods; they degrade to an empty list for the failing branch.

use async_trait::async_trait;
use devicefarm_core::{Device, DeviceClass, PlatformGroup};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::builder::DeviceInfoBuilder;
use crate::cloud::CloudEnumerator;
use crate::enumerator::{EnumerationError, PlatformEnumerator, RawDevice};
use crate::reconciler::{reconcile, sort_by_state};

/// Which device classes a discovery call covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceTypeFilter {
    Real,
    Simulated,
    #[default]
    Both,
}

impl DeviceTypeFilter {
    pub fn classes(self) -> &'static [DeviceClass] {
        match self {
            Self::Real => &[DeviceClass::Real],
            Self::Simulated => &[DeviceClass::Simulator],
            Self::Both => &[DeviceClass::Real, DeviceClass::Simulator],
        }
    }
}

/// Allow-list entry for simulators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatorSelector {
    pub name: String,
    pub os_version: String,
}

impl SimulatorSelector {
    fn matches(&self, raw: &RawDevice) -> bool {
        raw.name.as_deref() == Some(self.name.as_str())
            && raw.os_version.as_deref() == Some(self.os_version.as_str())
    }
}

/// Keep simulators on the allow-list; an empty list or no match keeps all
pub fn filter_simulators(simulators: Vec<RawDevice>, allow: &[SimulatorSelector]) -> Vec<RawDevice> {
    if allow.is_empty() {
        return simulators;
    }
    let selected: Vec<RawDevice> = simulators
        .iter()
        .filter(|raw| allow.iter().any(|sel| sel.matches(raw)))
        .cloned()
        .collect();
    if selected.is_empty() {
        warn!(
            configured = allow.len(),
            available = simulators.len(),
            "No simulator matches the allow-list, using all simulators"
        );
        simulators
    } else {
        selected
    }
}

#[async_trait]
pub trait DeviceManager: Send + Sync {
    fn group(&self) -> PlatformGroup;

    /// Run one discovery branch, reporting enumeration failure to the caller
    async fn discover(&self, class: DeviceClass, known: &[Device]) -> Result<Vec<Device>, EnumerationError>;

    /// Physical devices: from the cloud provider when configured, else local
    async fn get_real_devices(&self, known: &[Device]) -> Vec<Device> {
        match self.discover(DeviceClass::Real, known).await {
            Ok(devices) => devices,
            Err(e) => {
                warn!(group = %self.group(), error = %e, "Real device discovery failed");
                Vec::new()
            }
        }
    }

    /// Simulators, allow-list filtered and sorted by state
    async fn get_simulators(&self, known: &[Device]) -> Vec<Device> {
        match self.discover(DeviceClass::Simulator, known).await {
            Ok(devices) => devices,
            Err(e) => {
                warn!(group = %self.group(), error = %e, "Simulator discovery failed");
                Vec::new()
            }
        }
    }

    /// Devices matching `filter`; branches run independently
    async fn get_devices(&self, filter: DeviceTypeFilter, known: &[Device]) -> Vec<Device> {
        match filter {
            DeviceTypeFilter::Real => self.get_real_devices(known).await,
            DeviceTypeFilter::Simulated => self.get_simulators(known).await,
            DeviceTypeFilter::Both => {
                let (mut real, simulators) =
                    tokio::join!(self.get_real_devices(known), self.get_simulators(known));
                real.extend(simulators);
                real
            }
        }
    }
}

/// Discovery shared by every platform manager
pub struct LocalDiscovery {
    builder: Arc<DeviceInfoBuilder>,
    allow_list: Vec<SimulatorSelector>,
    cloud: Option<Arc<CloudEnumerator>>,
}

impl LocalDiscovery {
    pub fn new(builder: Arc<DeviceInfoBuilder>) -> Self {
        Self {
            builder,
            allow_list: Vec::new(),
            cloud: None,
        }
    }

    pub fn with_allow_list(mut self, allow_list: Vec<SimulatorSelector>) -> Self {
        self.allow_list = allow_list;
        self
    }

    pub fn with_cloud(mut self, cloud: Option<Arc<CloudEnumerator>>) -> Self {
        self.cloud = cloud;
        self
    }

    /// Physical devices of `group` from `enumerator`, or from the cloud
    async fn real(
        &self,
        group: PlatformGroup,
        enumerator: &dyn PlatformEnumerator,
        known: &[Device],
    ) -> Result<Vec<Device>, EnumerationError> {
        if let Some(cloud) = &self.cloud {
            let devices = cloud.describe(group).await?;
            debug!(provider = cloud.provider(), count = devices.len(), "Using cloud devices");
            return Ok(devices);
        }

        let present: Vec<RawDevice> = enumerator
            .enumerate()
            .await?
            .into_iter()
            .filter(|raw| raw.class == DeviceClass::Real)
            .collect();
        let mut devices = self.reconcile(&present, known, enumerator).await;
        devices.retain(|d| d.device_class == DeviceClass::Real);
        Ok(devices)
    }

    async fn simulators(
        &self,
        enumerator: &dyn PlatformEnumerator,
        known: &[Device],
    ) -> Result<Vec<Device>, EnumerationError> {
        let simulators: Vec<RawDevice> = enumerator
            .enumerate()
            .await?
            .into_iter()
            .filter(|raw| raw.class == DeviceClass::Simulator)
            .collect();
        let present = filter_simulators(simulators, &self.allow_list);
        let mut devices = self.reconcile(&present, known, enumerator).await;
        sort_by_state(&mut devices);
        Ok(devices)
    }

    async fn reconcile(
        &self,
        present: &[RawDevice],
        known: &[Device],
        enumerator: &dyn PlatformEnumerator,
    ) -> Vec<Device> {
        let builder = self.builder.as_ref();
        let mut devices = reconcile(present, known, move |raw| builder.build(raw, enumerator)).await;

        // Busy time only grows; refresh it for devices carried over
        let probe = self.builder.utilization();
        for device in devices.iter_mut() {
            let total = probe.busy_millis(&device.identifier).await;
            device.cumulative_busy_millis = device.cumulative_busy_millis.max(total);
        }
        devices
    }
}

/// Android devices and emulators, both enumerated through adb
pub struct AndroidDeviceManager {
    adb: Arc<dyn PlatformEnumerator>,
    discovery: LocalDiscovery,
}

impl AndroidDeviceManager {
    pub fn new(adb: Arc<dyn PlatformEnumerator>, discovery: LocalDiscovery) -> Self {
        Self { adb, discovery }
    }
}

#[async_trait]
impl DeviceManager for AndroidDeviceManager {
    fn group(&self) -> PlatformGroup {
        PlatformGroup::Android
    }

    async fn discover(&self, class: DeviceClass, known: &[Device]) -> Result<Vec<Device>, EnumerationError> {
        let devices = match class {
            DeviceClass::Real => self.discovery.real(self.group(), self.adb.as_ref(), known).await?,
            DeviceClass::Simulator => self.discovery.simulators(self.adb.as_ref(), known).await?,
        };
        info!(group = "android", class = ?class, count = devices.len(), "Discovery pass complete");
        Ok(devices)
    }
}

/// iOS and tvOS devices (libimobiledevice) and simulators (simctl)
pub struct AppleDeviceManager {
    real: Arc<dyn PlatformEnumerator>,
    simulators: Arc<dyn PlatformEnumerator>,
    discovery: LocalDiscovery,
}

impl AppleDeviceManager {
    pub fn new(
        real: Arc<dyn PlatformEnumerator>,
        simulators: Arc<dyn PlatformEnumerator>,
        discovery: LocalDiscovery,
    ) -> Self {
        Self {
            real,
            simulators,
            discovery,
        }
    }
}

#[async_trait]
impl DeviceManager for AppleDeviceManager {
    fn group(&self) -> PlatformGroup {
        PlatformGroup::Apple
    }

    async fn discover(&self, class: DeviceClass, known: &[Device]) -> Result<Vec<Device>, EnumerationError> {
        let devices = match class {
            DeviceClass::Real => self.discovery.real(self.group(), self.real.as_ref(), known).await?,
            DeviceClass::Simulator => {
                self.discovery
                    .simulators(self.simulators.as_ref(), known)
                    .await?
            }
        };
        info!(group = "apple", class = ?class, count = devices.len(), "Discovery pass complete");
        Ok(devices)
    }
}
