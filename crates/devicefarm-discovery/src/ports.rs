//! Host port allocation for per-device control and stream endpoints

use async_trait::async_trait;
use std::collections::HashSet;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::trace;

/// How many OS-assigned ports to try before giving up
const MAX_ATTEMPTS: usize = 32;

#[derive(Error, Debug)]
pub enum PortError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("No free port after {0} attempts")]
    Exhausted(usize),
}

/// Hands out TCP ports that are unused at allocation time
///
/// A port stays reserved until released, so two devices alive at the same
/// time never share one even when allocations run concurrently.
#[async_trait]
pub trait PortAllocator: Send + Sync {
    async fn allocate(&self) -> Result<u16, PortError>;

    /// Return a port to the pool; unknown ports are ignored
    async fn release(&self, port: u16);
}

/// Allocates ports by asking the OS for an ephemeral port on loopback
#[derive(Debug, Default)]
pub struct TcpPortAllocator {
    reserved: Mutex<HashSet<u16>>,
}

impl TcpPortAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn reserved_count(&self) -> usize {
        self.reserved.lock().await.len()
    }
}

#[async_trait]
impl PortAllocator for TcpPortAllocator {
    async fn allocate(&self) -> Result<u16, PortError> {
        // Held across the probe so concurrent callers see one in-use view
        let mut reserved = self.reserved.lock().await;
        for _ in 0..MAX_ATTEMPTS {
            let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
            let port = listener.local_addr()?.port();
            drop(listener);
            if reserved.insert(port) {
                trace!(port, "Allocated port");
                return Ok(port);
            }
        }
        Err(PortError::Exhausted(MAX_ATTEMPTS))
    }

    async fn release(&self, port: u16) {
        if self.reserved.lock().await.remove(&port) {
            trace!(port, "Released port");
        }
    }
}
