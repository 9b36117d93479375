// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Loop device associations, as listed by `losetup -a`.
//!
//! A typical line is `/dev/loop3: []: (/tmp/disk1.img)`, though the exact
//! bracketed fields vary between util-linux releases. Lookups therefore only
//! rely on the leading `/dev/loopN:` token and on the backing path appearing
//! somewhere on the same line.

use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
};

use regex::Regex;

use crate::loopback;

static LOOP_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(/dev/loop\d+):").expect("valid loop prefix regex"));

/// One attached loop device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopEntry {
    /// The loop block device, e.g. `/dev/loop3`
    pub device: PathBuf,
    /// The full listing line, searched when resolving a backing file
    pub line: String,
}

/// Snapshot of all loop device associations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopTable {
    entries: Vec<LoopEntry>,
}

impl LoopTable {
    /// Build a table from raw `losetup -a` output. Lines without a leading
    /// `/dev/loopN:` token are ignored.
    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .filter_map(|line| {
                let caps = LOOP_PREFIX.captures(line)?;
                Some(LoopEntry {
                    device: PathBuf::from(&caps[1]),
                    line: line.to_owned(),
                })
            })
            .collect();
        Self { entries }
    }

    /// Build a table from sysfs loop devices
    pub fn from_devices(devices: &[loopback::Device]) -> Self {
        let entries = devices
            .iter()
            .map(|d| LoopEntry {
                device: d.device_path().to_owned(),
                line: format!("{}: []: ({})", d.device_path().display(), d.file_path().display()),
            })
            .collect();
        Self { entries }
    }

    /// All entries in listing order
    pub fn entries(&self) -> &[LoopEntry] {
        &self.entries
    }

    /// True if nothing is attached (or nothing could be read)
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the loop device whose listing line mentions `backing_file`
    pub fn find(&self, backing_file: &Path) -> Option<PathBuf> {
        let needle = backing_file.to_string_lossy();
        if needle.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .find(|e| e.line.contains(needle.as_ref()))
            .map(|e| e.device.clone())
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    const LISTING: &str = "\
/dev/loop0: []: (/var/lib/snapd/snaps/core_1.snap)
/dev/loop3: [2049]:131075 (/tmp/disk1.img)
/dev/loop12: []: (/home/user/images/disk2.img), offset 0
bogus line mentioning /tmp/disk9.img
";

    #[test]
    fn test_find_by_backing_file() {
        let table = LoopTable::parse(LISTING);
        assert_eq!(table.entries().len(), 3);
        assert_eq!(table.find(Path::new("/tmp/disk1.img")), Some(PathBuf::from("/dev/loop3")));
        assert_eq!(
            table.find(Path::new("/home/user/images/disk2.img")),
            Some(PathBuf::from("/dev/loop12"))
        );
    }

    #[test]
    fn test_missing_or_unparsable() {
        let table = LoopTable::parse(LISTING);
        assert_eq!(table.find(Path::new("/tmp/disk9.img")), None);
        assert_eq!(table.find(Path::new("/tmp/nothere.img")), None);
        assert_eq!(LoopTable::default().find(Path::new("/tmp/disk1.img")), None);
    }

    #[test]
    fn test_first_match_wins() {
        let table = LoopTable::parse("/dev/loop1: []: (/tmp/a.img)\n/dev/loop2: []: (/tmp/a.img)\n");
        assert_eq!(table.find(Path::new("/tmp/a.img")), Some(PathBuf::from("/dev/loop1")));
    }
}
