// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Parsing of `mount` output.
//!
//! Lines look like `tmpfs on /mnt/ramdisk1 type tmpfs (rw,relatime,size=524288k)`.
//! Only tmpfs lines are turned into structured entries; everything else is kept
//! as raw text so that device lookups can do loose substring matching.

use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
};

use regex::Regex;

/// Size reported for tmpfs mounts that carry no `size=` option
pub const UNKNOWN_SIZE: &str = "-";

/// Mount points (and their descendants) owned by the system and never offered
/// for management unless the caller opts in.
static SYSTEM_MOUNT_POINTS: phf::Set<&'static str> = phf::phf_set! {
    "/run",
    "/dev/shm",
    "/run/credentials/systemd-journald.service",
    "/tmp",
    "/run/user/1000",
    "/run/user",
    "/var/tmp",
    "/var/run",
    "/var/lock",
};

static TMPFS_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+) on (.+) type tmpfs .+size=([^, )]+)").expect("valid tmpfs regex"));

/// A tmpfs mount found in the live mount table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmpfsMount {
    /// Source device as listed by `mount`, normally `tmpfs`
    pub device: String,
    /// Where the filesystem is mounted
    pub mount_point: PathBuf,
    /// Value of the `size=` option, or [`UNKNOWN_SIZE`]
    pub size: String,
}

impl TmpfsMount {
    /// Whether this mount lives at or below one of the reserved system mount points
    pub fn is_system(&self) -> bool {
        is_system_mount_point(&self.mount_point)
    }
}

/// Returns true if `path` equals or is nested under a reserved system mount point
pub fn is_system_mount_point(path: &Path) -> bool {
    SYSTEM_MOUNT_POINTS.iter().any(|prefix| path.starts_with(prefix))
}

/// Snapshot of the textual mount table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountTable {
    lines: Vec<String>,
}

impl MountTable {
    /// Build a table from raw `mount` output
    pub fn parse(text: &str) -> Self {
        Self {
            lines: text
                .lines()
                .map(str::trim_end)
                .filter(|l| !l.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }

    /// True if nothing could be read
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The raw lines of the table
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// True if any line mentions `device`.
    ///
    /// This is a plain substring test: `/dev/loop1` also matches a line for
    /// `/dev/loop10`.
    pub fn is_mounted(&self, device: &str) -> bool {
        !device.is_empty() && self.lines.iter().any(|line| line.contains(device))
    }

    /// All tmpfs mounts, including system ones
    pub fn tmpfs_mounts(&self) -> Vec<TmpfsMount> {
        self.lines.iter().filter_map(|l| parse_tmpfs_line(l)).collect()
    }

    /// True if a tmpfs filesystem is mounted exactly at `mount_point`
    pub fn has_tmpfs_at(&self, mount_point: &Path) -> bool {
        self.tmpfs_mounts().iter().any(|m| m.mount_point == mount_point)
    }
}

/// Parse a single `mount` line, returning `None` for anything that isn't tmpfs
pub fn parse_tmpfs_line(line: &str) -> Option<TmpfsMount> {
    if !line.contains("type tmpfs") {
        return None;
    }

    if let Some(caps) = TMPFS_LINE.captures(line) {
        return Some(TmpfsMount {
            device: caps[1].to_owned(),
            mount_point: PathBuf::from(&caps[2]),
            size: caps[3].to_owned(),
        });
    }

    // No size option; fall back to plain field splitting
    let fields = line.split_whitespace().collect::<Vec<_>>();
    if fields.len() < 3 {
        return None;
    }
    Some(TmpfsMount {
        device: fields[0].to_owned(),
        mount_point: PathBuf::from(fields[2]),
        size: UNKNOWN_SIZE.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    const FIXTURE: &str = "\
proc on /proc type proc (rw,nosuid,nodev,noexec,relatime)
tmpfs on /run type tmpfs (rw,nosuid,nodev,size=3264824k,nr_inodes=819200,mode=755)
/dev/nvme0n1p2 on / type ext4 (rw,relatime)
tmpfs on /dev/shm type tmpfs (rw,nosuid,nodev)
tmpfs on /run/user/1000 type tmpfs (rw,nosuid,nodev,relatime,size=1632408k,mode=700,uid=1000)
tmpfs on /mnt/ramdisk1 type tmpfs (rw,relatime,size=524288k)
ramfs on /mnt/scratch type tmpfs (rw,relatime)
/dev/loop3 on /mnt/disk1 type ext4 (rw,relatime)
garbage
";

    #[test]
    fn test_tmpfs_with_size() {
        let m = parse_tmpfs_line("tmpfs on /mnt/ramdisk1 type tmpfs (rw,relatime,size=524288k)").unwrap();
        assert_eq!(m.device, "tmpfs");
        assert_eq!(m.mount_point, PathBuf::from("/mnt/ramdisk1"));
        assert_eq!(m.size, "524288k");
    }

    #[test]
    fn test_tmpfs_size_in_middle_of_options() {
        let m = parse_tmpfs_line("tmpfs on /run type tmpfs (rw,nosuid,size=3264824k,mode=755)").unwrap();
        assert_eq!(m.size, "3264824k");
    }

    #[test]
    fn test_tmpfs_without_size_falls_back() {
        let m = parse_tmpfs_line("tmpfs on /dev/shm type tmpfs (rw,nosuid,nodev)").unwrap();
        assert_eq!(m.device, "tmpfs");
        assert_eq!(m.mount_point, PathBuf::from("/dev/shm"));
        assert_eq!(m.size, UNKNOWN_SIZE);
    }

    #[test]
    fn test_unrelated_and_short_lines_are_skipped() {
        assert!(parse_tmpfs_line("proc on /proc type proc (rw)").is_none());
        assert!(parse_tmpfs_line("type tmpfs").is_none());
        assert!(parse_tmpfs_line("").is_none());
    }

    #[test]
    fn test_table_lists_all_tmpfs() {
        let table = MountTable::parse(FIXTURE);
        let mounts = table.tmpfs_mounts();
        let points = mounts.iter().map(|m| m.mount_point.clone()).collect::<Vec<_>>();
        assert_eq!(
            points,
            vec![
                PathBuf::from("/run"),
                PathBuf::from("/dev/shm"),
                PathBuf::from("/run/user/1000"),
                PathBuf::from("/mnt/ramdisk1"),
                PathBuf::from("/mnt/scratch"),
            ]
        );
        assert!(table.has_tmpfs_at(Path::new("/mnt/ramdisk1")));
        assert!(!table.has_tmpfs_at(Path::new("/mnt/ramdisk2")));
    }

    #[test]
    fn test_system_filter() {
        assert!(is_system_mount_point(Path::new("/run")));
        assert!(is_system_mount_point(Path::new("/run/user/1000")));
        assert!(is_system_mount_point(Path::new("/tmp/foo")));
        assert!(is_system_mount_point(Path::new("/run/credentials/systemd-journald.service")));
        assert!(!is_system_mount_point(Path::new("/runner")));
        assert!(!is_system_mount_point(Path::new("/tmpdata")));
        assert!(!is_system_mount_point(Path::new("/mnt/ramdisk1")));
    }

    #[test]
    fn test_is_mounted_substring() {
        let table = MountTable::parse(FIXTURE);
        assert!(table.is_mounted("/dev/loop3"));
        assert!(!table.is_mounted("/dev/loop4"));
        assert!(!table.is_mounted(""));
        assert!(!MountTable::default().is_mounted("/dev/loop3"));
    }
}
