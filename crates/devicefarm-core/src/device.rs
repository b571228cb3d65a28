//! Device types for tracking attached and simulated test targets

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Unique identifier for a device (adb serial, UDID, or cloud name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Platform family of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Tvos,
    Android,
}

impl Platform {
    /// The tooling group that enumerates this platform
    pub fn group(self) -> PlatformGroup {
        match self {
            Self::Ios | Self::Tvos => PlatformGroup::Apple,
            Self::Android => PlatformGroup::Android,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ios => "ios",
            Self::Tvos => "tvos",
            Self::Android => "android",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Groups of platforms sharing one enumeration toolchain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformGroup {
    Android,
    Apple,
}

impl std::fmt::Display for PlatformGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Android => f.write_str("android"),
            Self::Apple => f.write_str("apple"),
        }
    }
}

/// Whether a device is physical hardware or a simulator/emulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Real,
    Simulator,
}

impl DeviceClass {
    pub fn is_physical(self) -> bool {
        matches!(self, Self::Real)
    }
}

/// A test device known to this node
///
/// All fields are always present. Cloud devices use sentinel values for the
/// local-only fields: both ports are `0` and `workspace_path` is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Primary key within the registry
    pub identifier: DeviceId,
    /// Human-readable name reported by the device or simulator runtime
    pub display_name: String,
    pub os_version: String,
    pub platform_family: Platform,
    /// Always equal to `device_class == DeviceClass::Real`
    pub is_physical: bool,
    pub device_class: DeviceClass,
    /// State label reported by the enumerator (e.g. `Booted`, `device`)
    #[serde(default)]
    pub state: String,
    /// A session currently owns the device
    pub busy: bool,
    /// Administrative hold, independent of `busy`
    pub user_blocked: bool,
    pub control_port: u16,
    pub stream_port: u16,
    /// URI of the node (or cloud provider) serving this device
    pub host_address: String,
    pub cumulative_busy_millis: u64,
    /// Unix milliseconds when the current session started; `None` when idle
    #[serde(default)]
    pub session_start_timestamp: Option<i64>,
    pub workspace_path: PathBuf,
    /// Cloud provider name for devices not hosted by this node
    #[serde(default)]
    pub cloud_provider: Option<String>,
}

impl Device {
    /// Create a device with idle state and unallocated resources
    pub fn new(
        identifier: DeviceId,
        display_name: impl Into<String>,
        os_version: impl Into<String>,
        platform_family: Platform,
        device_class: DeviceClass,
    ) -> Self {
        Self {
            identifier,
            display_name: display_name.into(),
            os_version: os_version.into(),
            platform_family,
            is_physical: device_class.is_physical(),
            device_class,
            state: String::new(),
            busy: false,
            user_blocked: false,
            control_port: 0,
            stream_port: 0,
            host_address: String::new(),
            cumulative_busy_millis: 0,
            session_start_timestamp: None,
            workspace_path: PathBuf::new(),
            cloud_provider: None,
        }
    }

    pub fn id(&self) -> &str {
        self.identifier.as_str()
    }

    pub fn is_cloud(&self) -> bool {
        self.cloud_provider.is_some()
    }

    /// Free for a new session
    pub fn is_available(&self) -> bool {
        !self.busy && !self.user_blocked
    }

    /// Mark the device as owned by a session starting at `now_ms`
    pub fn begin_session(&mut self, now_ms: i64) {
        self.busy = true;
        self.session_start_timestamp = Some(now_ms);
    }

    /// Release the device and return how long the session held it
    pub fn end_session(&mut self, now_ms: i64) -> u64 {
        let elapsed = self
            .session_start_timestamp
            .take()
            .map(|start| now_ms.saturating_sub(start).max(0) as u64)
            .unwrap_or(0);
        self.busy = false;
        self.cumulative_busy_millis = self.cumulative_busy_millis.saturating_add(elapsed);
        elapsed
    }

    /// The key the hub uses to identify this device
    pub fn removal_key(&self) -> crate::delta::RemovalKey {
        crate::delta::RemovalKey {
            identifier: self.identifier.clone(),
            host_address: self.host_address.clone(),
        }
    }
}
