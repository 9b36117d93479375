// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Recording host for testing.
//!
//! [`MockHost`] performs nothing. It records each call in order and fails the
//! operations a test asks it to, so the lifecycle logic can be checked without
//! root or real devices.

use std::{
    cell::RefCell,
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use crate::{Error, Host, Result};

const DEFAULT_LOOP_DEVICE: &str = "/dev/loop7";

/// A recorded host call. Passphrases are never kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateDirAll(PathBuf),
    RemoveDir(PathBuf),
    RemoveFile(PathBuf),
    SetWorldWritable(PathBuf),
    AllocateZeroed { path: PathBuf, size_mb: u64 },
    ExtendSparse { path: PathBuf, size_mb: u64 },
    AttachLoop(PathBuf),
    RefreshLoop(PathBuf),
    DetachLoop(PathBuf),
    LuksFormat(PathBuf),
    LuksOpen { backing: PathBuf, mapper: String },
    LuksClose(String),
    MakeExt4(PathBuf),
    CheckFilesystem(PathBuf),
    GrowFilesystem(PathBuf),
    Mount { device: PathBuf, target: PathBuf },
    MountTmpfs { target: PathBuf, size: String },
    RemountTmpfs { target: PathBuf, size_mb: u64 },
    Unmount(PathBuf),
}

impl Call {
    /// Operation name, as used by [`MockHost::fail_on`]
    pub fn name(&self) -> &'static str {
        match self {
            Call::CreateDirAll(_) => "create_dir_all",
            Call::RemoveDir(_) => "remove_dir",
            Call::RemoveFile(_) => "remove_file",
            Call::SetWorldWritable(_) => "set_world_writable",
            Call::AllocateZeroed { .. } => "allocate_zeroed",
            Call::ExtendSparse { .. } => "extend_sparse",
            Call::AttachLoop(_) => "attach_loop",
            Call::RefreshLoop(_) => "refresh_loop",
            Call::DetachLoop(_) => "detach_loop",
            Call::LuksFormat(_) => "luks_format",
            Call::LuksOpen { .. } => "luks_open",
            Call::LuksClose(_) => "luks_close",
            Call::MakeExt4(_) => "make_ext4",
            Call::CheckFilesystem(_) => "check_filesystem",
            Call::GrowFilesystem(_) => "grow_filesystem",
            Call::Mount { .. } => "mount",
            Call::MountTmpfs { .. } => "mount_tmpfs",
            Call::RemountTmpfs { .. } => "remount_tmpfs",
            Call::Unmount(_) => "unmount",
        }
    }
}

/// Host that records calls instead of running them
#[derive(Debug)]
pub struct MockHost {
    calls: RefCell<Vec<Call>>,
    failures: RefCell<BTreeMap<&'static str, String>>,
    loop_device: PathBuf,
}

impl Default for MockHost {
    fn default() -> Self {
        Self {
            calls: RefCell::default(),
            failures: RefCell::default(),
            loop_device: PathBuf::from(DEFAULT_LOOP_DEVICE),
        }
    }
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out `device` from [`Host::attach_loop`]
    pub fn with_loop_device(mut self, device: impl Into<PathBuf>) -> Self {
        self.loop_device = device.into();
        self
    }

    /// Make every later call to `operation` fail with `stderr` as its diagnostic
    pub fn fail_on(&self, operation: &'static str, stderr: &str) {
        self.failures.borrow_mut().insert(operation, stderr.to_owned());
    }

    /// Stop failing `operation`
    pub fn succeed_on(&self, operation: &'static str) {
        self.failures.borrow_mut().remove(operation);
    }

    /// Calls recorded so far, in order
    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    /// Names of the calls recorded so far, in order
    pub fn call_names(&self) -> Vec<&'static str> {
        self.calls.borrow().iter().map(Call::name).collect()
    }

    /// Forget the recorded calls
    pub fn clear(&self) {
        self.calls.borrow_mut().clear();
    }

    fn record(&self, call: Call) -> Result<()> {
        let name = call.name();
        self.calls.borrow_mut().push(call);
        match self.failures.borrow().get(name) {
            Some(stderr) => Err(Error::Failed {
                command: name.to_owned(),
                status: Some(1),
                stderr: stderr.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl Host for MockHost {
    fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.record(Call::CreateDirAll(path.to_owned()))
    }

    fn remove_dir(&self, path: &Path) -> Result<()> {
        self.record(Call::RemoveDir(path.to_owned()))
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        self.record(Call::RemoveFile(path.to_owned()))
    }

    fn set_world_writable(&self, path: &Path) -> Result<()> {
        self.record(Call::SetWorldWritable(path.to_owned()))
    }

    fn allocate_zeroed(&self, path: &Path, size_mb: u64) -> Result<()> {
        self.record(Call::AllocateZeroed {
            path: path.to_owned(),
            size_mb,
        })
    }

    fn extend_sparse(&self, path: &Path, size_mb: u64) -> Result<()> {
        self.record(Call::ExtendSparse {
            path: path.to_owned(),
            size_mb,
        })
    }

    fn attach_loop(&self, backing: &Path) -> Result<PathBuf> {
        self.record(Call::AttachLoop(backing.to_owned()))?;
        Ok(self.loop_device.clone())
    }

    fn refresh_loop(&self, device: &Path) -> Result<()> {
        self.record(Call::RefreshLoop(device.to_owned()))
    }

    fn detach_loop(&self, device: &Path) -> Result<()> {
        self.record(Call::DetachLoop(device.to_owned()))
    }

    fn luks_format(&self, backing: &Path, _passphrase: &str) -> Result<()> {
        self.record(Call::LuksFormat(backing.to_owned()))
    }

    fn luks_open(&self, backing: &Path, mapper: &str, _passphrase: &str) -> Result<()> {
        self.record(Call::LuksOpen {
            backing: backing.to_owned(),
            mapper: mapper.to_owned(),
        })
    }

    fn luks_close(&self, mapper: &str) -> Result<()> {
        self.record(Call::LuksClose(mapper.to_owned()))
    }

    fn make_ext4(&self, device: &Path) -> Result<()> {
        self.record(Call::MakeExt4(device.to_owned()))
    }

    fn check_filesystem(&self, device: &Path) -> Result<()> {
        self.record(Call::CheckFilesystem(device.to_owned()))
    }

    fn grow_filesystem(&self, device: &Path) -> Result<()> {
        self.record(Call::GrowFilesystem(device.to_owned()))
    }

    fn mount(&self, device: &Path, target: &Path) -> Result<()> {
        self.record(Call::Mount {
            device: device.to_owned(),
            target: target.to_owned(),
        })
    }

    fn mount_tmpfs(&self, target: &Path, size: &str) -> Result<()> {
        self.record(Call::MountTmpfs {
            target: target.to_owned(),
            size: size.to_owned(),
        })
    }

    fn remount_tmpfs(&self, target: &Path, size_mb: u64) -> Result<()> {
        self.record(Call::RemountTmpfs {
            target: target.to_owned(),
            size_mb,
        })
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        self.record(Call::Unmount(target.to_owned()))
    }
}
