//! Devicefarm Discovery - finding devices and keeping the registry current
//!
//! This crate provides:
//! - Platform enumerators (adb, libimobiledevice, simctl, cloud)
//! - Per-device record building with port and workspace allocation
//! - Reconciliation of enumeration results against known devices
//! - Android and Apple device managers
//! - Attach/detach tracking and periodic sync with the hub

pub mod adb;
pub mod builder;
pub mod cloud;
pub mod enumerator;
pub mod idevice;
pub mod manager;
pub mod ports;
pub mod reconciler;
pub mod simctl;
pub mod sync;
pub mod tracker;

pub use adb::AdbEnumerator;
pub use builder::{BuildError, DeviceInfoBuilder};
pub use cloud::{CloudDeviceSpec, CloudEnumerator};
pub use enumerator::{DeviceMetadata, EnumerationError, PlatformEnumerator, RawDevice};
pub use idevice::IdeviceEnumerator;
pub use manager::{
    filter_simulators, AndroidDeviceManager, AppleDeviceManager, DeviceManager, DeviceTypeFilter,
    LocalDiscovery, SimulatorSelector,
};
pub use ports::{PortAllocator, PortError, TcpPortAllocator};
pub use reconciler::{reconcile, sort_by_state};
pub use simctl::SimctlEnumerator;
pub use sync::{NodeSync, SyncReport};
pub use tracker::{AttachDetachTracker, PollingWatcher, TopologyEvent, TopologyWatcher};
