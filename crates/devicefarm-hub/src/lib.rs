//! Devicefarm Hub - Pushes node inventory deltas to the hub
//!
//! Pushes are best effort: a failed push is reported to the caller, which
//! logs it and relies on the next full reconciliation to repair the hub.

pub mod client;

pub use client::{HubError, HubSyncClient, InventorySink, DEVICES_ENDPOINT};
