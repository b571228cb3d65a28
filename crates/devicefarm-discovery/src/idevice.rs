//! Physical iOS/tvOS device enumeration through libimobiledevice tools

use async_trait::async_trait;
use devicefarm_core::{DeviceClass, Platform};
use tracing::debug;

use crate::enumerator::{run_tool, DeviceMetadata, EnumerationError, PlatformEnumerator, RawDevice};

/// Enumerates USB-attached Apple devices with `idevice_id` / `ideviceinfo`
#[derive(Debug, Clone, Default)]
pub struct IdeviceEnumerator;

impl IdeviceEnumerator {
    pub fn new() -> Self {
        Self
    }

    async fn info(&self, udid: &str, key: &str) -> Result<String, EnumerationError> {
        let out = run_tool("ideviceinfo", &["-u", udid, "-k", key]).await?;
        Ok(out.trim().to_string())
    }
}

#[async_trait]
impl PlatformEnumerator for IdeviceEnumerator {
    fn name(&self) -> &'static str {
        "idevice"
    }

    async fn enumerate(&self) -> Result<Vec<RawDevice>, EnumerationError> {
        let output = run_tool("idevice_id", &["-l"]).await?;
        let devices = parse_udids(&output);
        debug!(count = devices.len(), "idevice_id reported devices");
        Ok(devices)
    }

    async fn metadata(&self, raw: &RawDevice) -> Result<DeviceMetadata, EnumerationError> {
        let udid = raw.identifier.as_str();
        let (os_version, name, device_class) = tokio::try_join!(
            self.info(udid, "ProductVersion"),
            self.info(udid, "DeviceName"),
            self.info(udid, "DeviceClass"),
        )?;

        if os_version.is_empty() {
            return Err(EnumerationError::Metadata(
                raw.identifier.clone(),
                "empty ProductVersion".to_string(),
            ));
        }

        Ok(DeviceMetadata {
            name,
            os_version,
            platform: Some(platform_for_class(&device_class)),
        })
    }
}

/// `idevice_id -l` prints one UDID per line, sometimes with a connection suffix
fn parse_udids(output: &str) -> Vec<RawDevice> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(|udid| RawDevice::new(udid, Platform::Ios, DeviceClass::Real).with_state("connected"))
        .collect()
}

fn platform_for_class(device_class: &str) -> Platform {
    if device_class.eq_ignore_ascii_case("AppleTV") {
        Platform::Tvos
    } else {
        Platform::Ios
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_udids() {
        let output = "00008030-001A2C3E0E91802E\n00008101-000A1D2E3F45001E (Network)\n\n";
        let devices = parse_udids(output);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[1].identifier.as_str(), "00008101-000A1D2E3F45001E");
        assert!(devices.iter().all(|d| d.class == DeviceClass::Real));
    }

    #[test]
    fn test_platform_for_class() {
        assert_eq!(platform_for_class("AppleTV"), Platform::Tvos);
        assert_eq!(platform_for_class("iPhone"), Platform::Ios);
        assert_eq!(platform_for_class("iPad"), Platform::Ios);
    }
}
