//! Per-device working directories
//!
//! Each device gets one directory under the workspace root, named after its
//! identifier. When a template is configured for the device class, the
//! template is copied over the directory on every provisioning; otherwise the
//! directory is created once and then reused untouched across runs.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid workspace template {path}: {reason}")]
    InvalidTemplate { path: PathBuf, reason: String },
    #[error("Workspace task failed: {0}")]
    TaskFailed(String),
}

/// Where workspaces live and which templates seed them
#[derive(Debug, Clone, Default)]
pub struct WorkspaceLayout {
    pub root: PathBuf,
    pub physical_template: Option<PathBuf>,
    pub simulator_template: Option<PathBuf>,
}

/// Creates and seeds per-device working directories
#[derive(Debug, Clone)]
pub struct WorkspaceProvisioner {
    layout: WorkspaceLayout,
}

impl WorkspaceProvisioner {
    /// Validate the layout; a template that is not a directory is rejected
    /// here so no device is processed with a broken configuration.
    pub fn new(layout: WorkspaceLayout) -> Result<Self, WorkspaceError> {
        for template in [&layout.physical_template, &layout.simulator_template]
            .into_iter()
            .flatten()
        {
            validate_template(template)?;
        }
        Ok(Self { layout })
    }

    pub fn root(&self) -> &Path {
        &self.layout.root
    }

    /// Deterministic workspace path for an identifier
    pub fn path_for(&self, identifier: &str) -> PathBuf {
        self.layout.root.join(sanitize(identifier))
    }

    /// Ensure the workspace for a device exists and return its path
    pub async fn provision(
        &self,
        identifier: &str,
        is_physical: bool,
    ) -> Result<PathBuf, WorkspaceError> {
        let path = self.path_for(identifier);
        let template = if is_physical {
            self.layout.physical_template.clone()
        } else {
            self.layout.simulator_template.clone()
        };

        let target = path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), WorkspaceError> {
            match template {
                Some(template) => {
                    debug!(template = %template.display(), path = %target.display(), "Copying workspace template");
                    copy_dir(&template, &target)?;
                }
                None if !target.exists() => {
                    debug!(path = %target.display(), "Creating workspace");
                    std::fs::create_dir_all(&target)?;
                }
                None => {}
            }
            Ok(())
        })
        .await
        .map_err(|e| WorkspaceError::TaskFailed(e.to_string()))??;

        Ok(path)
    }
}

fn validate_template(template: &Path) -> Result<(), WorkspaceError> {
    if !template.exists() {
        return Err(WorkspaceError::InvalidTemplate {
            path: template.to_path_buf(),
            reason: "does not exist".to_string(),
        });
    }
    if !template.is_dir() {
        return Err(WorkspaceError::InvalidTemplate {
            path: template.to_path_buf(),
            reason: "is not a directory".to_string(),
        });
    }
    Ok(())
}

/// Map an identifier onto a single safe path component
///
/// Bytes outside `[A-Za-z0-9.-]`, `_` included, become `_XX`, so two
/// identifiers never share a directory.
fn sanitize(identifier: &str) -> String {
    match identifier {
        "" => return "_".to_string(),
        "." | ".." => return identifier.bytes().map(escape).collect(),
        _ => {}
    }
    let mut name = String::with_capacity(identifier.len());
    for c in identifier.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '-' | '.') {
            name.push(c);
        } else {
            let mut buf = [0u8; 4];
            name.extend(c.encode_utf8(&mut buf).bytes().map(escape));
        }
    }
    name
}

fn escape(byte: u8) -> String {
    format!("_{:02X}", byte)
}

/// Recursively copy `src` into `dst`, overwriting existing files
fn copy_dir(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
