// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Deriving a disk's live device and status from a [`Snapshot`].
//!
//! Nothing here touches the system, so the same snapshot always yields the
//! same answer.

use std::path::PathBuf;

use mounts::Snapshot;

use crate::{DiskRecord, Status};

/// The block device that currently carries `record`'s filesystem.
///
/// Encrypted disks resolve to their mapper node while it exists; plain disks
/// to the loop device attached to the backing file.
pub fn resolve_device(record: &DiskRecord, snapshot: &Snapshot) -> Option<PathBuf> {
    if record.encrypted {
        snapshot.mapper_device(&record.mapper_name())
    } else {
        snapshot.loops.find(&record.backing_path)
    }
}

/// `Mounted` iff the resolved device appears in the mount table
pub fn derive_status(record: &DiskRecord, snapshot: &Snapshot) -> Status {
    match resolve_device(record, snapshot) {
        Some(device) if snapshot.mounts.is_mounted(&device.to_string_lossy()) => Status::Mounted,
        _ => Status::Unmounted,
    }
}

#[cfg(test)]
mod tests {
    use mounts::{mock::FixtureReader, MountTableReader};
    use test_log::test;

    use super::*;

    const MOUNTS: &str = "\
/dev/loop3 on /mnt/disk1 type ext4 (rw,relatime)
/dev/mapper/secret.img_luks on /mnt/secret type ext4 (rw,relatime)
";
    const LOOPS: &str = "\
/dev/loop3: []: (/tmp/disk1.img)
/dev/loop4: []: (/tmp/disk2.img)
/dev/loop5: []: (/home/user/secret.img)
";

    #[test]
    fn test_plain_disk_resolves_through_loop_listing() {
        let snapshot = FixtureReader::new(MOUNTS, LOOPS).snapshot();
        let mounted = DiskRecord::new("/tmp/disk1.img", "/mnt/disk1", "256M", false);
        let attached = DiskRecord::new("/tmp/disk2.img", "/mnt/disk2", "256M", false);
        let detached = DiskRecord::new("/tmp/disk3.img", "/mnt/disk3", "256M", false);

        assert_eq!(resolve_device(&mounted, &snapshot), Some(PathBuf::from("/dev/loop3")));
        assert_eq!(derive_status(&mounted, &snapshot), Status::Mounted);
        assert_eq!(derive_status(&attached, &snapshot), Status::Unmounted);
        assert_eq!(resolve_device(&detached, &snapshot), None);
        assert_eq!(derive_status(&detached, &snapshot), Status::Unmounted);
    }

    #[test]
    fn test_encrypted_disk_resolves_through_mapper() {
        let reader = FixtureReader::new(MOUNTS, LOOPS);
        let record = DiskRecord::new("/home/user/secret.img", "/mnt/secret", "1G", true);

        // Locked: the loop association alone does not count
        assert_eq!(derive_status(&record, &reader.snapshot()), Status::Unmounted);

        reader.add_mapper("secret.img_luks");
        let snapshot = reader.snapshot();
        assert_eq!(
            resolve_device(&record, &snapshot),
            Some(PathBuf::from("/dev/mapper/secret.img_luks"))
        );
        assert_eq!(derive_status(&record, &snapshot), Status::Mounted);

        // Closed again: the stale mount line no longer resolves
        reader.remove_mapper("secret.img_luks");
        let snapshot = reader.snapshot();
        assert_eq!(resolve_device(&record, &snapshot), None);
        assert_eq!(derive_status(&record, &snapshot), Status::Unmounted);
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let snapshot = FixtureReader::new(MOUNTS, LOOPS).snapshot();
        let records = [
            DiskRecord::new("/tmp/disk1.img", "/mnt/disk1", "256M", false),
            DiskRecord::new("/tmp/disk2.img", "/mnt/disk2", "256M", false),
            DiskRecord::new("/home/user/secret.img", "/mnt/secret", "1G", true),
        ];
        let first = records.iter().map(|r| derive_status(r, &snapshot)).collect::<Vec<_>>();
        let second = records.iter().map(|r| derive_status(r, &snapshot)).collect::<Vec<_>>();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_snapshot_means_unmounted() {
        let record = DiskRecord::new("/tmp/disk1.img", "/mnt/disk1", "256M", false);
        assert_eq!(derive_status(&record, &Snapshot::default()), Status::Unmounted);
    }
}
