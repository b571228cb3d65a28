//! Application state management

use anyhow::{Context, Result};
use devicefarm_core::{
    DeviceClass, DeviceRegistry, HubInventory, PlatformGroup, UtilizationLedger, WorkspaceProvisioner,
};
use devicefarm_discovery::{
    AdbEnumerator, AndroidDeviceManager, AppleDeviceManager, AttachDetachTracker, DeviceInfoBuilder,
    DeviceManager, IdeviceEnumerator, LocalDiscovery, NodeSync, PlatformEnumerator, PollingWatcher,
    SimctlEnumerator, TcpPortAllocator,
};
use devicefarm_hub::{HubSyncClient, InventorySink};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Config;

/// Shared state of a node process
pub struct NodeState {
    pub config: Config,
    /// URI advertised for devices served by this node
    pub host_address: String,
    pub registry: Arc<DeviceRegistry>,
    pub sync: Arc<NodeSync>,
    /// One tracker per platform group with local physical devices
    pub trackers: Vec<Arc<AttachDetachTracker>>,
}

impl NodeState {
    /// Wire up enumerators, managers and trackers from configuration
    pub async fn new(config: Config) -> Result<Arc<Self>> {
        let host_address = resolve_host_address(&config);

        let ledger = Arc::new(UtilizationLedger::new());
        let registry = Arc::new(DeviceRegistry::with_ledger(ledger.clone()));
        let workspaces = WorkspaceProvisioner::new(config.to_workspace_layout())
            .context("Invalid workspace configuration")?;
        let builder = Arc::new(
            DeviceInfoBuilder::new(
                Arc::new(TcpPortAllocator::new()),
                ledger,
                workspaces,
                host_address.clone(),
            )
            .with_remote_proxy(config.node.remote_proxy.clone()),
        );

        let hub: Option<Arc<dyn InventorySink>> = match &config.hub.url {
            Some(url) => {
                let client = HubSyncClient::new(url, config.hub.timeout())?;
                info!(hub = %client.base_url(), "Pushing inventory to hub");
                Some(Arc::new(client) as Arc<dyn InventorySink>)
            }
            None => None,
        };

        let cloud = config.to_cloud_enumerator().map(Arc::new);
        let watch_real = cloud.is_none() && config.node.device_types.classes().contains(&DeviceClass::Real);

        let mut managers: Vec<Arc<dyn DeviceManager>> = Vec::new();
        let mut trackers = Vec::new();
        for &group in config.node.platform.groups() {
            let discovery = LocalDiscovery::new(builder.clone())
                .with_allow_list(config.simulators.clone())
                .with_cloud(cloud.clone());

            let (manager, real): (Arc<dyn DeviceManager>, Arc<dyn PlatformEnumerator>) = match group {
                PlatformGroup::Android => {
                    let adb: Arc<dyn PlatformEnumerator> = Arc::new(AdbEnumerator::default());
                    let manager: Arc<dyn DeviceManager> =
                        Arc::new(AndroidDeviceManager::new(adb.clone(), discovery));
                    (manager, adb)
                }
                PlatformGroup::Apple => {
                    let idevice: Arc<dyn PlatformEnumerator> = Arc::new(IdeviceEnumerator::new());
                    let manager: Arc<dyn DeviceManager> = Arc::new(AppleDeviceManager::new(
                        idevice.clone(),
                        Arc::new(SimctlEnumerator::new()),
                        discovery,
                    ));
                    (manager, idevice)
                }
            };
            managers.push(manager);

            if watch_real {
                let watcher = PollingWatcher::new(real.clone(), DeviceClass::Real, config.tracker_interval());
                trackers.push(Arc::new(AttachDetachTracker::new(
                    group,
                    Arc::new(watcher),
                    real,
                    builder.clone(),
                    registry.clone(),
                    hub.clone(),
                )));
            }
        }

        let sync = Arc::new(NodeSync::new(
            managers,
            config.node.device_types,
            registry.clone(),
            builder,
            hub,
            config.poll_interval(),
        ));

        info!(
            host = %host_address,
            groups = ?config.node.platform.groups(),
            device_types = ?config.node.device_types,
            cloud = cloud.as_ref().map(|c| c.provider().to_string()),
            "Node configured"
        );

        Ok(Arc::new(Self {
            config,
            host_address,
            registry,
            sync,
            trackers,
        }))
    }
}

/// Shared state of a hub process
pub struct HubState {
    pub config: Config,
    pub inventory: Arc<HubInventory>,
}

impl HubState {
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            config,
            inventory: Arc::new(HubInventory::new()),
        })
    }
}

/// The URI other processes use to reach this node
fn resolve_host_address(config: &Config) -> String {
    if let Some(host) = &config.node.host_address {
        return host.trim_end_matches('/').to_string();
    }

    let bind: Option<SocketAddr> = config.daemon.bind.parse().ok();
    let port = bind.map(|b| b.port()).unwrap_or(4723);
    let ip = match bind.map(|b| b.ip()) {
        Some(ip) if !ip.is_unspecified() => ip,
        _ => first_lan_address().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)),
    };
    let host = format!("http://{}", SocketAddr::new(ip, port));
    debug!(host = %host, "Derived node host address");
    host
}

/// First IPv4 address on a non-loopback, non-virtual interface
fn first_lan_address() -> Option<IpAddr> {
    use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};

    NetworkInterface::show()
        .ok()?
        .into_iter()
        .filter(|iface| {
            !iface.name.starts_with("lo")
                && !iface.name.starts_with("docker")
                && !iface.name.starts_with("br-")
                && !iface.name.starts_with("veth")
        })
        .find_map(|iface| {
            iface.addr.iter().find_map(|addr| match addr {
                Addr::V4(v4) if !v4.ip.is_loopback() => Some(IpAddr::V4(v4.ip)),
                _ => None,
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_host_address_wins() {
        let mut config = Config::default();
        config.node.host_address = Some("http://node-7.lab:4723/".to_string());
        assert_eq!(resolve_host_address(&config), "http://node-7.lab:4723");
    }

    #[test]
    fn test_host_address_from_bind() {
        let mut config = Config::default();
        config.daemon.bind = "10.1.2.3:5000".to_string();
        assert_eq!(resolve_host_address(&config), "http://10.1.2.3:5000");
    }

    #[test]
    fn test_wildcard_bind_keeps_port() {
        let config = Config::default();
        assert!(resolve_host_address(&config).ends_with(":4723"));
    }
}
