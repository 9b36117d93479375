// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::{
    fmt,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

/// Suffix appended to the backing file name to form the LUKS mapper name
pub const MAPPER_SUFFIX: &str = "_luks";

/// Kinds of disk that can be persisted. RAM disks never are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiskKind {
    #[serde(rename = "File")]
    File,
}

/// Last reconciled state of a disk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Mounted,
    #[default]
    Unmounted,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Mounted => f.write_str("Mounted"),
            Status::Unmounted => f.write_str("Unmounted"),
        }
    }
}

/// A persisted file-backed disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskRecord {
    #[serde(rename = "type")]
    pub kind: DiskKind,

    /// Absolute path of the backing image
    #[serde(rename = "device_or_file")]
    pub backing_path: PathBuf,

    /// Where the filesystem is, or was last, mounted
    #[serde(rename = "mountpoint", default)]
    pub mount_point: PathBuf,

    /// Nominal size as entered, e.g. `1G`
    #[serde(rename = "size")]
    pub size_label: String,

    /// Cached result of the last status sync
    #[serde(default)]
    pub status: Status,

    #[serde(default)]
    pub encrypted: bool,
}

impl DiskRecord {
    pub fn new(
        backing_path: impl Into<PathBuf>,
        mount_point: impl Into<PathBuf>,
        size_label: impl Into<String>,
        encrypted: bool,
    ) -> Self {
        Self {
            kind: DiskKind::File,
            backing_path: backing_path.into(),
            mount_point: mount_point.into(),
            size_label: size_label.into(),
            status: Status::Unmounted,
            encrypted,
        }
    }

    /// LUKS mapper name for this disk: the backing file name plus `_luks`
    pub fn mapper_name(&self) -> String {
        mapper_name(&self.backing_path)
    }

    /// The mount point, unless it is unset or the `-` placeholder
    pub fn mount_point(&self) -> Option<&Path> {
        let mp = self.mount_point.as_os_str();
        if mp.is_empty() || mp == "-" {
            None
        } else {
            Some(&self.mount_point)
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.status == Status::Mounted
    }
}

/// LUKS mapper name for the backing file at `backing_path`
pub fn mapper_name(backing_path: &Path) -> String {
    let base = backing_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{base}{MAPPER_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_mapper_name() {
        let record = DiskRecord::new("/home/user/secret.img", "/mnt/secret", "1G", true);
        assert_eq!(record.mapper_name(), "secret.img_luks");
    }

    #[test]
    fn test_placeholder_mount_point() {
        let mut record = DiskRecord::new("/tmp/disk1.img", "-", "256M", false);
        assert_eq!(record.mount_point(), None);
        record.mount_point = PathBuf::new();
        assert_eq!(record.mount_point(), None);
        record.mount_point = PathBuf::from("/mnt/disk1");
        assert_eq!(record.mount_point(), Some(Path::new("/mnt/disk1")));
    }

    #[test]
    fn test_json_field_names() {
        let mut record = DiskRecord::new("/tmp/disk1.img", "/mnt/disk1", "256M", false);
        record.status = Status::Mounted;
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "type": "File",
                "device_or_file": "/tmp/disk1.img",
                "mountpoint": "/mnt/disk1",
                "size": "256M",
                "status": "Mounted",
                "encrypted": false,
            })
        );
    }

    #[test]
    fn test_missing_encrypted_defaults_to_false() {
        let record: DiskRecord = serde_json::from_str(
            r#"{
                "type": "File",
                "device_or_file": "/tmp/a.img",
                "mountpoint": "/mnt/a",
                "size": "1G",
                "status": "Unmounted"
            }"#,
        )
        .unwrap();
        assert!(!record.encrypted);
        assert_eq!(record.status, Status::Unmounted);
    }
}
