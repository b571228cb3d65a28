//! Android device and emulator enumeration through `adb`

use async_trait::async_trait;
use devicefarm_core::{DeviceClass, Platform};
use tracing::debug;

use crate::enumerator::{run_tool, DeviceMetadata, EnumerationError, PlatformEnumerator, RawDevice};

/// adb state for a device that accepts commands
const READY_STATE: &str = "device";

/// Enumerates Android devices and emulators known to the adb server
#[derive(Debug, Clone)]
pub struct AdbEnumerator {
    adb: String,
}

impl Default for AdbEnumerator {
    fn default() -> Self {
        Self::new("adb")
    }
}

impl AdbEnumerator {
    /// Use the adb binary at `adb` (a name on PATH or an absolute path)
    pub fn new(adb: impl Into<String>) -> Self {
        Self { adb: adb.into() }
    }

    async fn getprop(&self, serial: &str, prop: &str) -> Result<String, EnumerationError> {
        let out = run_tool(&self.adb, &["-s", serial, "shell", "getprop", prop]).await?;
        Ok(out.trim().to_string())
    }
}

#[async_trait]
impl PlatformEnumerator for AdbEnumerator {
    fn name(&self) -> &'static str {
        "adb"
    }

    async fn enumerate(&self) -> Result<Vec<RawDevice>, EnumerationError> {
        let output = run_tool(&self.adb, &["devices"]).await?;
        let devices = parse_adb_devices(&output);
        debug!(count = devices.len(), "adb reported devices");
        Ok(devices)
    }

    async fn metadata(&self, raw: &RawDevice) -> Result<DeviceMetadata, EnumerationError> {
        let serial = raw.identifier.as_str();
        let (os_version, model) = tokio::try_join!(
            self.getprop(serial, "ro.build.version.release"),
            self.getprop(serial, "ro.product.model"),
        )?;

        if os_version.is_empty() {
            return Err(EnumerationError::Metadata(
                raw.identifier.clone(),
                "empty ro.build.version.release".to_string(),
            ));
        }

        Ok(DeviceMetadata {
            name: if model.is_empty() { serial.to_string() } else { model },
            os_version,
            platform: None,
        })
    }
}

/// Parse `adb devices` output, keeping only devices ready for commands
fn parse_adb_devices(output: &str) -> Vec<RawDevice> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("List of devices") && !line.starts_with('*'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?;
            let state = parts.next()?;
            if state != READY_STATE {
                debug!(serial, state, "Skipping adb device that is not ready");
                return None;
            }
            let class = if serial.starts_with("emulator-") {
                DeviceClass::Simulator
            } else {
                DeviceClass::Real
            };
            Some(RawDevice::new(serial, Platform::Android, class).with_state(state))
        })
        .collect()
}
