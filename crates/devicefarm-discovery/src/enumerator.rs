//! Platform enumerators: the raw sources of device presence

use async_trait::async_trait;
use devicefarm_core::{DeviceClass, DeviceId, Platform};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::trace;

/// Upper bound for a single enumeration tool invocation
const TOOL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum EnumerationError {
    #[error("Failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },
    #[error("{tool} failed ({status}): {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },
    #[error("Failed to parse {tool} output: {reason}")]
    Parse { tool: String, reason: String },
    #[error("Metadata unavailable for {0}: {1}")]
    Metadata(DeviceId, String),
}

/// A device as reported by its enumeration source, before resources are
/// allocated for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDevice {
    pub identifier: DeviceId,
    pub platform: Platform,
    pub class: DeviceClass,
    /// Display name, when the source reports it inline
    pub name: Option<String>,
    /// OS version, when the source reports it inline
    pub os_version: Option<String>,
    /// State label reported by the source
    pub state: String,
}

impl RawDevice {
    pub fn new(identifier: impl Into<String>, platform: Platform, class: DeviceClass) -> Self {
        Self {
            identifier: DeviceId::new(identifier),
            platform,
            class,
            name: None,
            os_version: None,
            state: String::new(),
        }
    }

    pub fn with_metadata(mut self, name: impl Into<String>, os_version: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self.os_version = Some(os_version.into());
        self
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = state.into();
        self
    }
}

/// Static metadata looked up for one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMetadata {
    pub name: String,
    pub os_version: String,
    /// Set when the lookup refines the enumerated platform (e.g. Apple TV)
    pub platform: Option<Platform>,
}

/// A source of attached or simulated devices
#[async_trait]
pub trait PlatformEnumerator: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// List the devices currently present
    async fn enumerate(&self) -> Result<Vec<RawDevice>, EnumerationError>;

    /// Look up display name and OS version for one device
    ///
    /// The default uses whatever the enumeration reported inline.
    async fn metadata(&self, raw: &RawDevice) -> Result<DeviceMetadata, EnumerationError> {
        match (&raw.name, &raw.os_version) {
            (Some(name), Some(os_version)) => Ok(DeviceMetadata {
                name: name.clone(),
                os_version: os_version.clone(),
                platform: None,
            }),
            _ => Err(EnumerationError::Metadata(
                raw.identifier.clone(),
                format!("{} reported no name or OS version", self.name()),
            )),
        }
    }
}

/// Run an external tool and return its stdout
pub(crate) async fn run_tool(program: &str, args: &[&str]) -> Result<String, EnumerationError> {
    trace!(program, ?args, "Running enumeration tool");

    let output = tokio::time::timeout(TOOL_TIMEOUT, Command::new(program).args(args).output())
        .await
        .map_err(|_| EnumerationError::Timeout {
            tool: program.to_string(),
            secs: TOOL_TIMEOUT.as_secs(),
        })?
        .map_err(|source| EnumerationError::Spawn {
            tool: program.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(EnumerationError::ToolFailed {
            tool: program.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Inline;

    #[async_trait]
    impl PlatformEnumerator for Inline {
        fn name(&self) -> &'static str {
            "inline"
        }

        async fn enumerate(&self) -> Result<Vec<RawDevice>, EnumerationError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_default_metadata_uses_inline_fields() {
        let raw = RawDevice::new("S1", Platform::Ios, DeviceClass::Simulator)
            .with_metadata("iPhone 14", "16.0");
        let meta = Inline.metadata(&raw).await.unwrap();
        assert_eq!(meta.name, "iPhone 14");
        assert_eq!(meta.os_version, "16.0");

        let bare = RawDevice::new("S2", Platform::Ios, DeviceClass::Simulator);
        assert!(matches!(
            Inline.metadata(&bare).await,
            Err(EnumerationError::Metadata(id, _)) if id.as_str() == "S2"
        ));
    }

    #[tokio::test]
    async fn test_missing_tool_is_spawn_error() {
        let err = run_tool("devicefarm-no-such-tool", &[]).await.unwrap_err();
        assert!(matches!(err, EnumerationError::Spawn { .. }));
    }
}
