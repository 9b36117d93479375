// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::path::{Path, PathBuf};

const CANDIDATES: usize = 5;

/// Which default path to propose
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suggestion {
    /// `/mnt/ramdiskN`
    RamMountPoint,
    /// `/tmp/diskN.img`
    BackingFile,
    /// `/mnt/diskN`
    FileMountPoint,
}

impl Suggestion {
    fn candidate(self, n: usize) -> PathBuf {
        match self {
            Suggestion::RamMountPoint => PathBuf::from(format!("/mnt/ramdisk{n}")),
            Suggestion::BackingFile => PathBuf::from(format!("/tmp/disk{n}.img")),
            Suggestion::FileMountPoint => PathBuf::from(format!("/mnt/disk{n}")),
        }
    }

    /// All candidates in preference order
    pub fn candidates(self) -> impl Iterator<Item = PathBuf> {
        (1..=CANDIDATES).map(move |n| self.candidate(n))
    }
}

/// The first candidate for which `taken` is false
pub fn suggest_path(kind: Suggestion, taken: impl Fn(&Path) -> bool) -> Option<PathBuf> {
    kind.candidates().find(|p| !taken(p))
}
