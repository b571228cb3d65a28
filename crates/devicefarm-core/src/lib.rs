//! Devicefarm Core - Device model, registry, and workspace provisioning
//!
//! This crate provides the foundational types for the Devicefarm system:
//! - Device records shared by nodes and the hub
//! - The node-local device registry
//! - Inventory deltas and the hub-side aggregate inventory
//! - Per-device workspace provisioning and utilization accounting

pub mod delta;
pub mod device;
pub mod inventory;
pub mod registry;
pub mod utilization;
pub mod workspace;

pub use delta::{AddDelta, DeltaAction, DeviceDelta, RemovalKey, RemoveDelta};
pub use device::{Device, DeviceClass, DeviceId, Platform, PlatformGroup};
pub use inventory::{HubInventory, InventoryChange};
pub use registry::{DeviceRegistry, PassScope, RegistryDiff, RegistryEvent};
pub use utilization::{UtilizationLedger, UtilizationProbe};
pub use workspace::{WorkspaceError, WorkspaceLayout, WorkspaceProvisioner};
