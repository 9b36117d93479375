// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Live mount and loop-device state as typed snapshots.
//!
//! Every query here is an observation: failures (missing binaries, non-zero
//! exits, unreadable sysfs) are logged and degrade to empty results, so callers
//! always get a usable "nothing mounted" answer instead of an error.

use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
    process::Command,
};

use log::debug;

pub mod loop_table;
pub mod loopback;
pub mod mock;
pub mod mount_table;
mod sysfs;
pub mod usage;

pub use loop_table::{LoopEntry, LoopTable};
pub use mount_table::{is_system_mount_point, MountTable, TmpfsMount, UNKNOWN_SIZE};
pub use usage::Usage;

const SYSFS_DIR: &str = "/sys/class/block";
const DEVFS_DIR: &str = "/dev";
/// Where device-mapper nodes appear
pub const MAPPER_DIR: &str = "/dev/mapper";

/// Path of the device-mapper node `name`, whether or not it exists
pub fn mapper_path(name: &str) -> PathBuf {
    PathBuf::from(MAPPER_DIR).join(name)
}

/// A consistent read of everything needed to reconcile disk state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub mounts: MountTable,
    pub loops: LoopTable,
    /// Names of the device-mapper nodes present under `/dev/mapper`
    pub mappers: BTreeSet<String>,
}

impl Snapshot {
    /// Path of the device-mapper node `name`, if it currently exists
    pub fn mapper_device(&self, name: &str) -> Option<PathBuf> {
        self.mappers
            .contains(name)
            .then(|| mapper_path(name))
    }
}

/// Source of live mount-table facts
pub trait MountTableReader {
    /// The current mount table; empty if it could not be read
    fn mount_table(&self) -> MountTable;

    /// The current loop associations; empty if they could not be read
    fn loop_table(&self) -> LoopTable;

    /// Names of active device-mapper nodes
    fn active_mappers(&self) -> BTreeSet<String>;

    /// Used/total bytes of the filesystem at `mount_point`
    fn usage(&self, mount_point: &Path) -> Option<Usage>;

    /// Read mounts, loops and mappers together
    fn snapshot(&self) -> Snapshot {
        Snapshot {
            mounts: self.mount_table(),
            loops: self.loop_table(),
            mappers: self.active_mappers(),
        }
    }

    /// Every tmpfs mount, optionally hiding the reserved system mount points
    fn list_tmpfs_mounts(&self, show_system: bool) -> Vec<TmpfsMount> {
        self.mount_table()
            .tmpfs_mounts()
            .into_iter()
            .filter(|m| show_system || !m.is_system())
            .collect()
    }

    /// The loop device currently backed by `backing_file`
    fn find_loop_device(&self, backing_file: &Path) -> Option<PathBuf> {
        self.loop_table().find(backing_file)
    }
}

/// Reader that queries the running system
#[derive(Debug, Clone, Default)]
pub struct SystemReader {
    /// Optional argv prefix (e.g. `sudo`) for `losetup -a`
    privilege: Vec<String>,
}

impl SystemReader {
    /// Create a reader, running `losetup` through `privilege` when non-empty
    pub fn new(privilege: Vec<String>) -> Self {
        Self { privilege }
    }

    fn capture(&self, privileged: bool, program: &str, args: &[&str]) -> Option<String> {
        let mut argv = if privileged { self.privilege.clone() } else { vec![] };
        argv.push(program.to_owned());
        argv.extend(args.iter().map(|a| a.to_string()));

        let output = match Command::new(&argv[0]).args(&argv[1..]).output() {
            Ok(output) => output,
            Err(e) => {
                debug!("{} could not be started: {e}", argv.join(" "));
                return None;
            }
        };
        if !output.status.success() {
            debug!(
                "{} exited with {}: {}",
                argv.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl MountTableReader for SystemReader {
    fn mount_table(&self) -> MountTable {
        self.capture(false, "mount", &[])
            .map(|text| MountTable::parse(&text))
            .unwrap_or_default()
    }

    fn loop_table(&self) -> LoopTable {
        if let Some(text) = self.capture(true, "losetup", &["-a"]) {
            return LoopTable::parse(&text);
        }

        debug!("falling back to sysfs for loop associations");
        match loopback::enumerate(Path::new("/")) {
            Ok(devices) => LoopTable::from_devices(&devices),
            Err(e) => {
                debug!("sysfs loop enumeration failed: {e}");
                LoopTable::default()
            }
        }
    }

    fn active_mappers(&self) -> BTreeSet<String> {
        let Ok(entries) = fs::read_dir(MAPPER_DIR) else {
            return BTreeSet::new();
        };
        entries
            .filter_map(Result::ok)
            .filter_map(|e| e.file_name().to_str().map(str::to_owned))
            .filter(|name| name != "control")
            .collect()
    }

    fn usage(&self, mount_point: &Path) -> Option<Usage> {
        usage::query(mount_point)
    }
}
