// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Fixture-backed reader for testing.
//!
//! This module provides a [`MountTableReader`] that answers from literal
//! `mount` / `losetup -a` text instead of querying the running system.

use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use crate::{LoopTable, MountTable, MountTableReader, Usage};

/// Reader whose answers are set by the test
#[derive(Debug, Default)]
pub struct FixtureReader {
    mounts: RefCell<String>,
    loops: RefCell<String>,
    mappers: RefCell<BTreeSet<String>>,
    usage: RefCell<BTreeMap<PathBuf, Usage>>,
}

impl FixtureReader {
    /// Creates a reader with the given mount table and loop listing text
    pub fn new(mounts: &str, loops: &str) -> Self {
        let reader = Self::default();
        reader.set_mounts(mounts);
        reader.set_loops(loops);
        reader
    }

    /// Replace the mount table text
    pub fn set_mounts(&self, text: &str) {
        *self.mounts.borrow_mut() = text.to_owned();
    }

    /// Replace the loop listing text
    pub fn set_loops(&self, text: &str) {
        *self.loops.borrow_mut() = text.to_owned();
    }

    /// Mark `/dev/mapper/<name>` as present
    pub fn add_mapper(&self, name: &str) {
        self.mappers.borrow_mut().insert(name.to_owned());
    }

    /// Remove `/dev/mapper/<name>`
    pub fn remove_mapper(&self, name: &str) {
        self.mappers.borrow_mut().remove(name);
    }

    /// Report `used`/`total` bytes for `mount_point`
    pub fn set_usage(&self, mount_point: impl Into<PathBuf>, used: u64, total: u64) {
        self.usage.borrow_mut().insert(mount_point.into(), Usage { used, total });
    }
}

impl MountTableReader for FixtureReader {
    fn mount_table(&self) -> MountTable {
        MountTable::parse(&self.mounts.borrow())
    }

    fn loop_table(&self) -> LoopTable {
        LoopTable::parse(&self.loops.borrow())
    }

    fn active_mappers(&self) -> BTreeSet<String> {
        self.mappers.borrow().clone()
    }

    fn usage(&self, mount_point: &Path) -> Option<Usage> {
        self.usage.borrow().get(mount_point).copied()
    }
}
