//! Configuration loading and validation

use anyhow::Result;
use devicefarm_core::{PlatformGroup, WorkspaceLayout};
use devicefarm_discovery::{CloudDeviceSpec, CloudEnumerator, DeviceTypeFilter, SimulatorSelector};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub simulators: Vec<SimulatorSelector>,
    #[serde(default)]
    pub cloud: Option<CloudConfig>,
}

/// What this process serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Node,
    Hub,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bind address for the REST server
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub role: Role,
    /// Full reconciliation interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Attach/detach polling interval in seconds
    #[serde(default = "default_tracker_interval")]
    pub tracker_interval_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            role: Role::default(),
            poll_interval_secs: default_poll_interval(),
            tracker_interval_secs: default_tracker_interval(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:4723".to_string()
}

fn default_poll_interval() -> u64 {
    30
}

fn default_tracker_interval() -> u64 {
    2
}

/// Which platform families a node serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformSelection {
    Android,
    Ios,
    #[default]
    Both,
}

impl PlatformSelection {
    pub fn groups(self) -> &'static [PlatformGroup] {
        match self {
            Self::Android => &[PlatformGroup::Android],
            Self::Ios => &[PlatformGroup::Apple],
            Self::Both => &[PlatformGroup::Android, PlatformGroup::Apple],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub platform: PlatformSelection,
    #[serde(default)]
    pub device_types: DeviceTypeFilter,
    /// Host address advertised for physical devices instead of this node
    #[serde(default)]
    pub remote_proxy: Option<String>,
    /// Host address advertised for this node; derived from the bind address
    /// and local interfaces when unset
    #[serde(default)]
    pub host_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Hub base URL; a node without one runs standalone
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_hub_timeout")]
    pub timeout_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_hub_timeout(),
        }
    }
}

impl HubConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_hub_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default = "default_workspace_root")]
    pub root: PathBuf,
    #[serde(default)]
    pub physical_template: Option<PathBuf>,
    #[serde(default)]
    pub simulator_template: Option<PathBuf>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
            physical_template: None,
            simulator_template: None,
        }
    }
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("./workspaces")
}

/// Cloud device provider replacing local physical devices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    pub provider: String,
    pub url: String,
    #[serde(default)]
    pub devices: Vec<CloudDeviceSpec>,
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.daemon.poll_interval_secs.max(1))
    }

    pub fn tracker_interval(&self) -> Duration {
        Duration::from_secs(self.daemon.tracker_interval_secs.max(1))
    }

    /// Convert to WorkspaceLayout
    pub fn to_workspace_layout(&self) -> WorkspaceLayout {
        WorkspaceLayout {
            root: self.workspace.root.clone(),
            physical_template: self.workspace.physical_template.clone(),
            simulator_template: self.workspace.simulator_template.clone(),
        }
    }

    pub fn to_cloud_enumerator(&self) -> Option<CloudEnumerator> {
        self.cloud
            .as_ref()
            .map(|c| CloudEnumerator::new(c.provider.clone(), c.url.clone(), c.devices.clone()))
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}
