// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! "Almost full" tracking for mounted disks.

use std::{
    collections::BTreeSet,
    io,
    path::{Path, PathBuf},
};

use log::debug;
use mounts::Usage;

use crate::size::format_size;

/// Usage ratio at which a disk counts as almost full
pub const DEFAULT_THRESHOLD: f64 = 0.9;

/// Icon name sent with capacity notifications
pub const ALERT_ICON: &str = "drive-harddisk";

/// Destination for user-facing notifications
pub trait Notifier {
    fn notify(&self, title: &str, message: &str, icon: Option<&str>) -> io::Result<()>;
}

/// A disk that just crossed the threshold
#[derive(Debug, Clone, PartialEq)]
pub struct CapacityAlert {
    /// Backing file, or the tmpfs device for RAM disks
    pub backing: String,
    pub mount_point: PathBuf,
    pub usage: Usage,
}

impl CapacityAlert {
    pub fn title(&self) -> String {
        "Disk almost full".to_owned()
    }

    pub fn message(&self) -> String {
        format!(
            "{} is {:.0}% full ({} of {})",
            self.mount_point.display(),
            self.usage.ratio() * 100.0,
            format_size(self.usage.used),
            format_size(self.usage.total)
        )
    }

    /// Deliver through `notifier`, ignoring failures
    pub fn send(&self, notifier: &dyn Notifier) {
        if let Err(e) = notifier.notify(&self.title(), &self.message(), Some(ALERT_ICON)) {
            debug!("notification for {:?} not delivered: {e}", self.mount_point);
        }
    }
}

/// Remembers which disks were already reported so each crossing alerts once
#[derive(Debug, Clone)]
pub struct CapacityMonitor {
    threshold: f64,
    flagged: BTreeSet<(String, PathBuf)>,
}

impl Default for CapacityMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl CapacityMonitor {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            flagged: BTreeSet::new(),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Record a usage sample. Returns an alert the first time the disk is at
    /// or over the threshold; dropping below re-arms it.
    pub fn observe(&mut self, backing: &str, mount_point: &Path, usage: Usage) -> Option<CapacityAlert> {
        let key = (backing.to_owned(), mount_point.to_owned());
        if usage.total > 0 && usage.ratio() >= self.threshold {
            self.flagged.insert(key).then(|| CapacityAlert {
                backing: backing.to_owned(),
                mount_point: mount_point.to_owned(),
                usage,
            })
        } else {
            self.flagged.remove(&key);
            None
        }
    }

    pub fn is_flagged(&self, backing: &str, mount_point: &Path) -> bool {
        self.flagged.contains(&(backing.to_owned(), mount_point.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use test_log::test;

    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn usage(used_mb: u64, total_mb: u64) -> Usage {
        Usage {
            used: used_mb * MIB,
            total: total_mb * MIB,
        }
    }

    #[test]
    fn test_alerts_once_and_rearms() {
        let mut monitor = CapacityMonitor::default();
        let mp = Path::new("/mnt/disk1");
        assert_eq!(monitor.threshold(), DEFAULT_THRESHOLD);

        assert!(monitor.observe("/tmp/disk1.img", mp, usage(500, 1000)).is_none());
        let alert = monitor.observe("/tmp/disk1.img", mp, usage(950, 1000)).unwrap();
        assert_eq!(alert.message(), "/mnt/disk1 is 95% full (950 MB of 1000 MB)");
        assert!(monitor.observe("/tmp/disk1.img", mp, usage(990, 1000)).is_none());
        assert!(monitor.is_flagged("/tmp/disk1.img", mp));

        assert!(monitor.observe("/tmp/disk1.img", mp, usage(100, 1000)).is_none());
        assert!(!monitor.is_flagged("/tmp/disk1.img", mp));
        assert!(monitor.observe("/tmp/disk1.img", mp, usage(900, 1000)).is_some());
    }

    #[test]
    fn test_keys_are_independent() {
        let mut monitor = CapacityMonitor::new(0.5);
        assert!(monitor.observe("tmpfs", Path::new("/mnt/ramdisk1"), usage(60, 100)).is_some());
        assert!(monitor.observe("tmpfs", Path::new("/mnt/ramdisk2"), usage(60, 100)).is_some());
        assert!(monitor.observe("tmpfs", Path::new("/mnt/ramdisk1"), usage(0, 0)).is_none());
        assert!(!monitor.is_flagged("tmpfs", Path::new("/mnt/ramdisk1")));
    }

    struct Failing(RefCell<usize>);

    impl Notifier for Failing {
        fn notify(&self, _: &str, _: &str, _: Option<&str>) -> io::Result<()> {
            *self.0.borrow_mut() += 1;
            Err(io::Error::other("no notification daemon"))
        }
    }

    #[test]
    fn test_notifier_failure_is_swallowed() {
        let notifier = Failing(RefCell::new(0));
        let alert = CapacityAlert {
            backing: "tmpfs".into(),
            mount_point: PathBuf::from("/mnt/ramdisk1"),
            usage: usage(95, 100),
        };
        alert.send(&notifier);
        assert_eq!(*notifier.0.borrow(), 1);
    }
}
