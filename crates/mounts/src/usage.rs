// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Filesystem capacity queries

use std::path::Path;

use log::debug;
use nix::sys::statvfs::statvfs;

const MIB: u64 = 1024 * 1024;

/// Used and total bytes of a mounted filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    pub used: u64,
    pub total: u64,
}

impl Usage {
    /// Used space in whole MiB, rounded down
    pub fn used_mb(&self) -> u64 {
        self.used / MIB
    }

    /// Total space in whole MiB, rounded down
    pub fn total_mb(&self) -> u64 {
        self.total / MIB
    }

    /// Fraction of the filesystem in use, 0.0 for an empty filesystem
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.used as f64 / self.total as f64
        }
    }
}

/// Query the filesystem mounted at `mount_point`
pub fn query(mount_point: &Path) -> Option<Usage> {
    match statvfs(mount_point) {
        Ok(st) => {
            let frsize = st.fragment_size() as u64;
            let total = frsize * st.blocks() as u64;
            let free = frsize * st.blocks_available() as u64;
            Some(Usage {
                used: total.saturating_sub(free),
                total,
            })
        }
        Err(e) => {
            debug!("statvfs {mount_point:?} failed: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_ratio_and_mb() {
        let usage = Usage {
            used: 900 * MIB + 12,
            total: 1000 * MIB,
        };
        assert_eq!(usage.used_mb(), 900);
        assert_eq!(usage.total_mb(), 1000);
        assert!((usage.ratio() - 0.9).abs() < 0.001);
        assert_eq!(Usage { used: 0, total: 0 }.ratio(), 0.0);
    }

    #[test]
    fn test_query_root() {
        let usage = query(Path::new("/")).expect("statvfs on / should work");
        assert!(usage.total >= usage.used);
    }
}
