//! Discovery of the per-VM VNC socket on disk.
//!
//! The hypervisor places each VM's private runtime files in a directory
//! named after the VM's UUID, below a fixed base directory. The VNC socket
//! is always called `virt-vnc` inside that directory.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::bytes::Regex;

use crate::error::SidecarError;

/// Base directory holding the VM private directories.
pub const DEFAULT_BASE_DIR: &str = "/var/run/kubevirt-private";

/// File name of the VNC socket inside a VM directory.
pub const SOCKET_FILE_NAME: &str = "virt-vnc";

// Word characters only, not hex digits; unanchored. Matched against the raw
// name bytes so directories with non-UTF-8 names are still considered.
#[allow(clippy::expect_used)]
static UUID_DIR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?-u:\w{8}-\w{4}-\w{4}-\w{4}-\w{12})").expect("UUID directory pattern is valid")
});

/// Returns `true` if `name` contains an 8-4-4-4-12 grouping of word characters.
#[must_use]
pub fn is_uuid_shaped(name: impl AsRef<OsStr>) -> bool {
    UUID_DIR_PATTERN.is_match(name.as_ref().as_encoded_bytes())
}

/// Resolved location of a VM's VNC socket: `{base}/{id}/virt-vnc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketLocation {
    base_dir: PathBuf,
    id: OsString,
}

impl SocketLocation {
    /// Creates a location from a base directory and a VM directory name.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>, id: impl Into<OsString>) -> Self {
        Self {
            base_dir: base_dir.into(),
            id: id.into(),
        }
    }

    /// Name of the discovered VM directory.
    #[must_use]
    pub fn id(&self) -> &OsStr {
        &self.id
    }

    /// Full path of the VNC socket.
    #[must_use]
    pub fn socket_path(&self) -> PathBuf {
        self.base_dir.join(&self.id).join(SOCKET_FILE_NAME)
    }
}

/// Finds the VM directory below a base directory.
#[derive(Debug, Clone)]
pub struct SocketLocator {
    base_dir: PathBuf,
}

impl Default for SocketLocator {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DIR)
    }
}

impl SocketLocator {
    /// Creates a locator scanning `base_dir`.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Directory this locator scans.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Returns the name of the first UUID-shaped subdirectory.
    ///
    /// Entries are considered in file name order, so the choice is stable
    /// when several candidates exist. Plain files and symlinks are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`SidecarError::SocketResolution`] if the base directory cannot
    /// be listed or holds no matching subdirectory.
    pub async fn resolve_id(&self) -> Result<OsString, SidecarError> {
        let unreadable = |e: std::io::Error| {
            SidecarError::SocketResolution(format!(
                "error reading base directory {}: {e}",
                self.base_dir.display()
            ))
        };

        let mut entries = tokio::fs::read_dir(&self.base_dir)
            .await
            .map_err(unreadable)?;
        let mut candidates = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(unreadable)? {
            let file_type = entry.file_type().await.map_err(unreadable)?;
            if !file_type.is_dir() {
                continue;
            }
            let name = entry.file_name();
            if is_uuid_shaped(&name) {
                candidates.push(name);
            }
        }

        candidates.sort_unstable();
        let id = candidates.into_iter().next().ok_or_else(|| {
            SidecarError::SocketResolution("could not find UUID directory".to_string())
        })?;
        tracing::debug!(
            base_dir = %self.base_dir.display(),
            id = %id.to_string_lossy(),
            "resolved VM directory"
        );
        Ok(id)
    }

    /// Resolves the full socket location.
    ///
    /// # Errors
    ///
    /// See [`SocketLocator::resolve_id`].
    pub async fn resolve(&self) -> Result<SocketLocation, SidecarError> {
        let id = self.resolve_id().await?;
        Ok(SocketLocation::new(self.base_dir.clone(), id))
    }
}
