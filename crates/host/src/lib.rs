// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Privileged operations needed to build, mount and tear down virtual disks.
//!
//! [`Host`] is the seam between the lifecycle logic and the operating system:
//! [`SystemHost`] drives the usual Linux tools, [`mock::MockHost`] records calls
//! for tests.

use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use thiserror::Error;

pub mod command;
pub mod mock;
mod system;

pub use system::SystemHost;

/// Phrases `umount` prints when the target is in use, across the locales we
/// have seen in the wild. Compared against the lowercased diagnostic.
const BUSY_PHRASES: &[&str] = &[
    "target is busy",
    "device is busy",
    "device or resource busy",
    "alvo está ocupado",
    "dispositivo está ocupado",
    "recurso está ocupado",
    "objetivo está ocupado",
    "destino está ocupado",
    "dispositivo o recurso ocupado",
    "ziel ist belegt",
    "gerät oder ressource belegt",
    "la cible est active",
    "périphérique ou ressource occupé",
];

/// Errors that can occur while running host operations
#[derive(Error, Debug)]
pub enum Error {
    /// The tool ran and reported failure
    #[error("`{command}` exited with {}: {stderr}", describe_status(.status))]
    Failed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    /// The tool did not finish in time and was killed
    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    /// The tool is not installed
    #[error("`{program}` was not found in PATH")]
    MissingTool { program: String },

    /// The tool could not be started
    #[error("`{command}` could not be started: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// The tool succeeded but printed something we could not use
    #[error("`{command}` returned unexpected output: {output:?}")]
    UnexpectedOutput { command: String, output: String },

    /// IO operation error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

fn describe_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("status {code}"),
        None => "a signal".to_owned(),
    }
}

impl Error {
    /// The raw diagnostic text, as printed by the tool where available
    pub fn diagnostic(&self) -> String {
        match self {
            Error::Failed { stderr, .. } => stderr.clone(),
            other => other.to_string(),
        }
    }

    /// Whether this failure means the mount target is still in use
    pub fn is_target_busy(&self) -> bool {
        let Error::Failed { stderr, .. } = self else {
            return false;
        };
        let text = stderr.to_lowercase();
        BUSY_PHRASES.iter().any(|phrase| text.contains(phrase))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Operations that change host state.
///
/// Every method is a single step; ordering, validation and failure policy
/// belong to the caller.
pub trait Host {
    /// Create `path` and any missing parents
    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Remove the empty directory `path`
    fn remove_dir(&self, path: &Path) -> Result<()>;

    /// Remove `path`, succeeding if it is already gone
    fn remove_file(&self, path: &Path) -> Result<()>;

    /// Make `path` readable, writable and searchable by everybody (0777)
    fn set_world_writable(&self, path: &Path) -> Result<()>;

    /// Create `path` filled with `size_mb` MiB of zeroes
    fn allocate_zeroed(&self, path: &Path, size_mb: u64) -> Result<()>;

    /// Grow `path` to `size_mb` MiB without writing the new range
    fn extend_sparse(&self, path: &Path, size_mb: u64) -> Result<()>;

    /// Attach `backing` to the first free loop device and return that device
    fn attach_loop(&self, backing: &Path) -> Result<PathBuf>;

    /// Make loop device `device` pick up a new size of its backing file
    fn refresh_loop(&self, device: &Path) -> Result<()>;

    /// Detach the loop device `device`
    fn detach_loop(&self, device: &Path) -> Result<()>;

    /// Initialise a LUKS container in `backing`
    fn luks_format(&self, backing: &Path, passphrase: &str) -> Result<()>;

    /// Unlock `backing` as `/dev/mapper/<mapper>`
    fn luks_open(&self, backing: &Path, mapper: &str, passphrase: &str) -> Result<()>;

    /// Lock `/dev/mapper/<mapper>`
    fn luks_close(&self, mapper: &str) -> Result<()>;

    /// Create an ext4 filesystem on `device`
    fn make_ext4(&self, device: &Path) -> Result<()>;

    /// Force a filesystem check of `device`, repairing what can be repaired
    fn check_filesystem(&self, device: &Path) -> Result<()>;

    /// Grow the ext4 filesystem on `device` to fill it
    fn grow_filesystem(&self, device: &Path) -> Result<()>;

    /// Mount `device` at `target`
    fn mount(&self, device: &Path, target: &Path) -> Result<()>;

    /// Mount a new tmpfs at `target` with the `size=` option set to `size`
    fn mount_tmpfs(&self, target: &Path, size: &str) -> Result<()>;

    /// Change the size of the tmpfs at `target` in place
    fn remount_tmpfs(&self, target: &Path, size_mb: u64) -> Result<()>;

    /// Unmount whatever is mounted at `target`
    fn unmount(&self, target: &Path) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn failed(stderr: &str) -> Error {
        Error::Failed {
            command: "umount /mnt/disk1".into(),
            status: Some(32),
            stderr: stderr.into(),
        }
    }

    #[test]
    fn test_busy_detection_locales() {
        assert!(failed("umount: /mnt/disk1: target is busy.").is_target_busy());
        assert!(failed("umount: /mnt/disk1: o alvo está ocupado.").is_target_busy());
        assert!(failed("umount: /mnt/disk1: Device or resource busy").is_target_busy());
        assert!(!failed("umount: /mnt/disk1: not mounted.").is_target_busy());
        assert!(!Error::MissingTool { program: "umount".into() }.is_target_busy());
    }

    #[test]
    fn test_display_keeps_diagnostic_verbatim() {
        let err = failed("umount: /mnt/disk1: not mounted.");
        assert_eq!(
            err.to_string(),
            "`umount /mnt/disk1` exited with status 32: umount: /mnt/disk1: not mounted."
        );
        assert_eq!(err.diagnostic(), "umount: /mnt/disk1: not mounted.");
    }
}
