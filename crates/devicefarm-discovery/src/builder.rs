//! Turns a raw enumerated device into a fully populated device record

use devicefarm_core::{Device, DeviceClass, UtilizationProbe, WorkspaceError, WorkspaceProvisioner};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::enumerator::{EnumerationError, PlatformEnumerator, RawDevice};
use crate::ports::{PortAllocator, PortError};

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Metadata lookup failed: {0}")]
    Metadata(#[from] EnumerationError),
    #[error("Port allocation failed: {0}")]
    Port(#[from] PortError),
    #[error("Workspace provisioning failed: {0}")]
    Workspace(#[from] WorkspaceError),
}

/// Builds device records, allocating ports and workspaces for new devices
pub struct DeviceInfoBuilder {
    ports: Arc<dyn PortAllocator>,
    utilization: Arc<dyn UtilizationProbe>,
    workspaces: WorkspaceProvisioner,
    host_address: String,
    remote_proxy: Option<String>,
}

impl DeviceInfoBuilder {
    pub fn new(
        ports: Arc<dyn PortAllocator>,
        utilization: Arc<dyn UtilizationProbe>,
        workspaces: WorkspaceProvisioner,
        host_address: impl Into<String>,
    ) -> Self {
        Self {
            ports,
            utilization,
            workspaces,
            host_address: host_address.into(),
            remote_proxy: None,
        }
    }

    /// Advertise physical devices through a proxy instead of this node
    pub fn with_remote_proxy(mut self, remote_proxy: Option<String>) -> Self {
        self.remote_proxy = remote_proxy;
        self
    }

    pub fn utilization(&self) -> &Arc<dyn UtilizationProbe> {
        &self.utilization
    }

    /// Host address advertised for devices of `class`
    pub fn host_for(&self, class: DeviceClass) -> &str {
        match (class, &self.remote_proxy) {
            (DeviceClass::Real, Some(proxy)) => proxy,
            _ => &self.host_address,
        }
    }

    /// Build a new device record
    ///
    /// Metadata, both ports, utilization and the workspace are resolved
    /// concurrently. On failure nothing stays reserved for the device.
    pub async fn build(
        &self,
        raw: RawDevice,
        enumerator: &dyn PlatformEnumerator,
    ) -> Result<Device, BuildError> {
        let (metadata, control_port, stream_port, busy_millis, workspace) = tokio::join!(
            enumerator.metadata(&raw),
            self.ports.allocate(),
            self.ports.allocate(),
            self.utilization.busy_millis(&raw.identifier),
            self.workspaces.provision(raw.identifier.as_str(), raw.class.is_physical()),
        );

        let control_port = match control_port {
            Ok(port) => port,
            Err(e) => {
                if let Ok(stream) = stream_port {
                    self.ports.release(stream).await;
                }
                return Err(e.into());
            }
        };
        let stream_port = match stream_port {
            Ok(port) => port,
            Err(e) => {
                self.ports.release(control_port).await;
                return Err(e.into());
            }
        };
        let metadata = match metadata {
            Ok(metadata) => metadata,
            Err(e) => {
                self.release_ports(control_port, stream_port).await;
                return Err(e.into());
            }
        };
        let workspace = match workspace {
            Ok(path) => path,
            Err(e) => {
                self.release_ports(control_port, stream_port).await;
                return Err(e.into());
            }
        };

        let platform = metadata.platform.unwrap_or(raw.platform);
        let mut device = Device::new(
            raw.identifier,
            metadata.name,
            metadata.os_version,
            platform,
            raw.class,
        );
        device.state = raw.state;
        device.control_port = control_port;
        device.stream_port = stream_port;
        device.host_address = self.host_for(raw.class).to_string();
        device.cumulative_busy_millis = busy_millis;
        device.workspace_path = workspace;

        debug!(
            device = %device.identifier,
            platform = %device.platform_family,
            control_port,
            stream_port,
            "Built device record"
        );
        Ok(device)
    }

    /// Release the local resources held by a device leaving the registry
    pub async fn release(&self, device: &Device) {
        if device.is_cloud() {
            return;
        }
        self.release_ports(device.control_port, device.stream_port).await;
    }

    async fn release_ports(&self, control: u16, stream: u16) {
        self.ports.release(control).await;
        self.ports.release(stream).await;
    }
}
