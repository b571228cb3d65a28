//! Devices provided by a cloud device farm
//!
//! Cloud devices are described entirely by configuration. They are never
//! given local ports or workspaces; their host address is the provider URL.

use async_trait::async_trait;
use devicefarm_core::{Device, DeviceClass, Platform, PlatformGroup};
use serde::{Deserialize, Serialize};

use crate::enumerator::{EnumerationError, PlatformEnumerator, RawDevice};

/// One cloud device as configured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudDeviceSpec {
    /// Defaults to `name:os_version`
    #[serde(default)]
    pub identifier: Option<String>,
    pub name: String,
    pub os_version: String,
    pub platform: Platform,
}

impl CloudDeviceSpec {
    pub fn identifier(&self) -> String {
        self.identifier
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.name, self.os_version))
    }
}

/// Enumerates the devices offered by one cloud provider
#[derive(Debug, Clone)]
pub struct CloudEnumerator {
    provider: String,
    url: String,
    devices: Vec<CloudDeviceSpec>,
}

impl CloudEnumerator {
    pub fn new(provider: impl Into<String>, url: impl Into<String>, devices: Vec<CloudDeviceSpec>) -> Self {
        Self {
            provider: provider.into(),
            url: url.into(),
            devices,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Full device records for one platform group, in cloud format
    pub async fn describe(&self, group: PlatformGroup) -> Result<Vec<Device>, EnumerationError> {
        let raw = self.enumerate().await?;
        let mut devices = Vec::with_capacity(raw.len());
        for raw in raw.into_iter().filter(|r| r.platform.group() == group) {
            let meta = self.metadata(&raw).await?;
            let mut device = Device::new(
                raw.identifier,
                meta.name,
                meta.os_version,
                raw.platform,
                DeviceClass::Real,
            );
            device.state = raw.state;
            device.host_address = self.url.clone();
            device.cloud_provider = Some(self.provider.clone());
            devices.push(device);
        }
        Ok(devices)
    }
}

#[async_trait]
impl PlatformEnumerator for CloudEnumerator {
    fn name(&self) -> &'static str {
        "cloud"
    }

    async fn enumerate(&self) -> Result<Vec<RawDevice>, EnumerationError> {
        Ok(self
            .devices
            .iter()
            .map(|spec| {
                RawDevice::new(spec.identifier(), spec.platform, DeviceClass::Real)
                    .with_metadata(spec.name.clone(), spec.os_version.clone())
                    .with_state("available")
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, os: &str, platform: Platform) -> CloudDeviceSpec {
        CloudDeviceSpec {
            identifier: None,
            name: name.to_string(),
            os_version: os.to_string(),
            platform,
        }
    }

    #[tokio::test]
    async fn test_describe_uses_cloud_format() {
        let cloud = CloudEnumerator::new(
            "browserstack",
            "https://hub.browserstack.com/wd/hub",
            vec![
                spec("iPhone 15", "17", Platform::Ios),
                spec("Galaxy S23", "13.0", Platform::Android),
            ],
        );

        let apple = cloud.describe(PlatformGroup::Apple).await.unwrap();
        assert_eq!(apple.len(), 1);
        let device = &apple[0];
        assert_eq!(device.id(), "iPhone 15:17");
        assert!(device.is_physical);
        assert!(device.is_cloud());
        assert_eq!(device.host_address, "https://hub.browserstack.com/wd/hub");
        assert_eq!(device.control_port, 0);
        assert!(device.workspace_path.as_os_str().is_empty());
    }
}
