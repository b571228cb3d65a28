//! iOS/tvOS simulator enumeration through `xcrun simctl`

use async_trait::async_trait;
use devicefarm_core::{DeviceClass, Platform};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::enumerator::{run_tool, EnumerationError, PlatformEnumerator, RawDevice};

const RUNTIME_PREFIX: &str = "com.apple.CoreSimulator.SimRuntime.";

#[derive(Deserialize)]
struct SimctlList {
    // Iterates in runtime-key order, not the order simctl printed
    devices: BTreeMap<String, Vec<SimctlDevice>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimctlDevice {
    udid: String,
    name: String,
    state: String,
    #[serde(default = "default_available")]
    is_available: bool,
}

fn default_available() -> bool {
    true
}

/// Enumerates available simulators; name, OS version and state come inline
#[derive(Debug, Clone, Default)]
pub struct SimctlEnumerator;

impl SimctlEnumerator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PlatformEnumerator for SimctlEnumerator {
    fn name(&self) -> &'static str {
        "simctl"
    }

    async fn enumerate(&self) -> Result<Vec<RawDevice>, EnumerationError> {
        let output = run_tool("xcrun", &["simctl", "list", "devices", "available", "--json"]).await?;
        let devices = parse_simctl_json(&output)?;
        debug!(count = devices.len(), "simctl reported simulators");
        Ok(devices)
    }
}

fn parse_simctl_json(output: &str) -> Result<Vec<RawDevice>, EnumerationError> {
    let list: SimctlList = serde_json::from_str(output).map_err(|e| EnumerationError::Parse {
        tool: "simctl".to_string(),
        reason: e.to_string(),
    })?;

    let mut devices = Vec::new();
    for (runtime, sims) in list.devices {
        let Some((platform, os_version)) = parse_runtime(&runtime) else {
            continue;
        };
        for sim in sims.into_iter().filter(|s| s.is_available) {
            devices.push(
                RawDevice::new(sim.udid, platform, DeviceClass::Simulator)
                    .with_metadata(sim.name, os_version.clone())
                    .with_state(sim.state),
            );
        }
    }
    Ok(devices)
}

/// `com.apple.CoreSimulator.SimRuntime.iOS-16-0` -> (ios, "16.0")
fn parse_runtime(runtime: &str) -> Option<(Platform, String)> {
    let name = runtime.strip_prefix(RUNTIME_PREFIX).unwrap_or(runtime);
    let (family, version) = name.split_once('-')?;
    let platform = match family {
        "iOS" => Platform::Ios,
        "tvOS" => Platform::Tvos,
        _ => return None,
    };
    Some((platform, version.replace('-', ".")))
}
