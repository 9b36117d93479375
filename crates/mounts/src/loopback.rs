// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Loopback device enumeration through sysfs.
//!
//! Loopback devices in Linux are block devices that map files to block devices.
//! The kernel publishes the backing file of every attached loop device under
//! `/sys/class/block/loopN/loop/backing_file`, which lets us recover loop
//! associations when `losetup` itself is unavailable.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use crate::{sysfs, DEVFS_DIR, SYSFS_DIR};

/// Represents an attached loop device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// The device name (e.g. "loop0", "loop1")
    name: String,

    /// Path to the device in /dev
    device: PathBuf,

    /// Backing file path as reported by the kernel
    file: PathBuf,
}

impl Device {
    /// Creates a new Device from a sysfs directory if the name matches the loop pattern
    /// and a backing file is attached.
    ///
    /// # Arguments
    ///
    /// * `sysfs_dir` - The block class directory (normally `/sys/class/block`)
    /// * `name` - The device name to check (e.g. "loop0", "loop1")
    ///
    /// # Returns
    ///
    /// * `Some(Device)` for an attached loop device
    /// * `None` if the name doesn't match or nothing is attached
    pub fn from_sysfs_path(sysfs_dir: &Path, name: &str) -> Option<Self> {
        let suffix = name.strip_prefix("loop")?;
        if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }

        let file = sysfs::read::<PathBuf>(&sysfs_dir.join(name), "loop/backing_file")?;
        Some(Self {
            name: name.to_owned(),
            device: PathBuf::from(DEVFS_DIR).join(name),
            file,
        })
    }

    /// Returns the device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the device path.
    pub fn device_path(&self) -> &Path {
        &self.device
    }

    /// Returns the backing file path.
    pub fn file_path(&self) -> &Path {
        &self.file
    }
}

/// Enumerates every attached loop device below `sysroot`.
pub fn enumerate(sysroot: &Path) -> io::Result<Vec<Device>> {
    let sysfs_dir = sysroot.join(SYSFS_DIR.trim_start_matches('/'));

    let mut devices = fs::read_dir(&sysfs_dir)?
        .filter_map(Result::ok)
        .filter_map(|e| Some(e.file_name().to_str()?.to_owned()))
        .filter_map(|name| Device::from_sysfs_path(&sysfs_dir, &name))
        .collect::<Vec<_>>();

    devices.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(devices)
}
