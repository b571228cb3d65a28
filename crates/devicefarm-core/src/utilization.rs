//! Accumulated busy time per device

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::device::DeviceId;

/// Source of accumulated busy time for a device identifier
#[async_trait]
pub trait UtilizationProbe: Send + Sync {
    /// Total milliseconds the device has spent in sessions
    async fn busy_millis(&self, id: &DeviceId) -> u64;
}

/// In-memory utilization totals, kept across device detach/re-attach
#[derive(Debug, Default)]
pub struct UtilizationLedger {
    totals: RwLock<HashMap<DeviceId, u64>>,
}

impl UtilizationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a finished session's duration and return the new total
    pub async fn record(&self, id: &DeviceId, millis: u64) -> u64 {
        let mut totals = self.totals.write().await;
        let total = totals.entry(id.clone()).or_insert(0);
        *total = total.saturating_add(millis);
        *total
    }

    pub async fn total(&self, id: &DeviceId) -> u64 {
        self.totals.read().await.get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl UtilizationProbe for UtilizationLedger {
    async fn busy_millis(&self, id: &DeviceId) -> u64 {
        self.total(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ledger_is_monotonic() {
        let ledger = UtilizationLedger::new();
        let id = DeviceId::from("A");
        assert_eq!(ledger.busy_millis(&id).await, 0);
        assert_eq!(ledger.record(&id, 250).await, 250);
        assert_eq!(ledger.record(&id, 0).await, 250);
        assert_eq!(ledger.record(&id, 750).await, 1_000);
        assert_eq!(ledger.busy_millis(&id).await, 1_000);
    }
}
