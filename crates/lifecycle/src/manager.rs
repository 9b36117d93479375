// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::path::{Path, PathBuf};

use host::Host;
use log::{debug, info, warn};
use mounts::{is_system_mount_point, MountTableReader, Snapshot, TmpfsMount};

use crate::{
    errors::Progress,
    monitor::{CapacityAlert, CapacityMonitor, Notifier},
    reconcile::{derive_status, resolve_device},
    record::mapper_name,
    registry::{LoadPolicy, Registry, RegistryStore},
    size::{resized_label, size_to_mb},
    suggest::{suggest_path, Suggestion},
    DiskRecord, Error, Operation, Status, Step,
};

/// Shortest accepted LUKS passphrase, in characters
pub const MIN_PASSPHRASE_LEN: usize = 3;

/// A disk the manager can act on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskRef {
    /// A registered file disk, by backing path
    File(PathBuf),
    /// A live RAM disk, by mount point
    Ram(PathBuf),
}

/// Result of [`Manager::mount`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountOutcome {
    /// Mounted `device` at `mount_point`
    Mounted { device: PathBuf, mount_point: PathBuf },
    /// Nothing to do
    AlreadyMounted,
}

/// Result of [`Manager::unmount`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmountOutcome {
    Unmounted,
    /// Nothing to do
    AlreadyUnmounted,
}

/// Non-fatal problems hit while deleting a disk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    pub warnings: Vec<String>,
}

/// Owner of the disk registry and driver of every lifecycle operation.
///
/// One operation runs at a time: every mutating call takes `&mut self`.
pub struct Manager<H, R, S> {
    host: H,
    reader: R,
    registry: Registry<S>,
    monitor: CapacityMonitor,
}

impl<H, R, S> Manager<H, R, S>
where
    H: Host,
    R: MountTableReader,
    S: RegistryStore,
{
    /// Load the registry from `store` and reconcile it against the system
    pub fn load(host: H, reader: R, store: S, policy: LoadPolicy) -> Result<Self, Error> {
        let registry = Registry::load(store, policy)?;
        let mut manager = Self::new(host, reader, registry);
        manager.sync_status()?;
        Ok(manager)
    }

    /// Wrap an already loaded registry, without syncing
    pub fn new(host: H, reader: R, registry: Registry<S>) -> Self {
        Self {
            host,
            reader,
            registry,
            monitor: CapacityMonitor::default(),
        }
    }

    /// Use `monitor` for capacity alerts
    pub fn with_monitor(self, monitor: CapacityMonitor) -> Self {
        Self { monitor, ..self }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn registry(&self) -> &Registry<S> {
        &self.registry
    }

    /// File disks with their last synced status
    pub fn records(&self) -> &[DiskRecord] {
        self.registry.records()
    }

    /// Live RAM disks
    pub fn ram_disks(&self, show_system: bool) -> Vec<TmpfsMount> {
        self.reader.list_tmpfs_mounts(show_system)
    }

    /// Recompute every record's status from one snapshot and save
    pub fn sync_status(&mut self) -> Result<&[DiskRecord], Error> {
        let snapshot = self.reader.snapshot();
        for record in self.registry.records_mut() {
            let status = derive_status(record, &snapshot);
            if status != record.status {
                debug!("{:?}: {} -> {}", record.backing_path, record.status, status);
            }
            record.status = status;
        }
        self.registry.save()?;
        Ok(self.registry.records())
    }

    /// Find the disk `target` names: a registered backing file, a registered
    /// mount point, or a user tmpfs mount point, in that order
    pub fn resolve_target(&self, target: &Path) -> Option<DiskRef> {
        if let Some(record) = self.registry.get(target) {
            return Some(DiskRef::File(record.backing_path.clone()));
        }
        if let Some(record) = self.records().iter().find(|r| r.mount_point() == Some(target)) {
            return Some(DiskRef::File(record.backing_path.clone()));
        }
        self.ram_disks(false)
            .into_iter()
            .find(|m| m.mount_point == target)
            .map(|m| DiskRef::Ram(m.mount_point))
    }

    /// First free default path of the given kind
    pub fn suggest(&self, kind: Suggestion) -> Option<PathBuf> {
        match kind {
            Suggestion::RamMountPoint => {
                let mounts = self.reader.mount_table();
                suggest_path(kind, |p| mounts.has_tmpfs_at(p))
            }
            Suggestion::BackingFile => suggest_path(kind, |p| self.registry.contains(p) || p.exists()),
            Suggestion::FileMountPoint => {
                let mounts = self.reader.mount_table();
                suggest_path(kind, |p| {
                    self.records().iter().any(|r| r.mount_point() == Some(p)) || mounts.has_tmpfs_at(p)
                })
            }
        }
    }

    /// Allocate, format and mount a new file disk, then register it.
    ///
    /// A `passphrase` makes it a LUKS container. Nothing is registered unless
    /// every step succeeds.
    pub fn create_file_disk(
        &mut self,
        backing_path: &Path,
        size_label: &str,
        mount_point: &Path,
        passphrase: Option<&str>,
    ) -> Result<&DiskRecord, Error> {
        require_path(backing_path, "backing file")?;
        require_path(mount_point, "mount point")?;
        let size_mb = size_to_mb(size_label)?;
        if let Some(passphrase) = passphrase {
            if passphrase.chars().count() < MIN_PASSPHRASE_LEN {
                return Err(Error::Validation(format!(
                    "passphrase must be at least {MIN_PASSPHRASE_LEN} characters"
                )));
            }
        }
        if self.registry.contains(backing_path) {
            return Err(Error::Validation(format!(
                "{} is already registered",
                backing_path.display()
            )));
        }

        info!("Creating file disk {backing_path:?} ({size_label}) at {mount_point:?}");
        let host = &self.host;
        let mut progress = Progress::new(Operation::CreateFileDisk);

        progress.run(Step::Allocate, || host.allocate_zeroed(backing_path, size_mb))?;
        let device = match passphrase {
            Some(passphrase) => {
                let mapper = mapper_name(backing_path);
                progress.run(Step::Format, || host.luks_format(backing_path, passphrase))?;
                progress.run(Step::Open, || host.luks_open(backing_path, &mapper, passphrase))?;
                mounts::mapper_path(&mapper)
            }
            None => progress.run(Step::AttachLoop, || host.attach_loop(backing_path))?,
        };
        progress.run(Step::MakeFilesystem, || host.make_ext4(&device))?;
        progress.run(Step::CreateMountPoint, || host.create_dir_all(mount_point))?;
        progress.run(Step::Mount, || host.mount(&device, mount_point))?;
        progress.run(Step::Permissions, || host.set_world_writable(mount_point))?;

        let mut record = DiskRecord::new(backing_path, mount_point, size_label.trim(), passphrase.is_some());
        record.status = Status::Mounted;
        self.registry.insert(record)?;

        info!("File disk {backing_path:?} mounted at {mount_point:?} on {device:?}");
        self.registry
            .get(backing_path)
            .ok_or_else(|| Error::NotFound(format!("{} vanished from the registry", backing_path.display())))
    }

    /// Mount a new tmpfs of `size_label` at `mount_point`. Nothing is registered.
    pub fn create_ram_disk(&mut self, size_label: &str, mount_point: &Path) -> Result<(), Error> {
        require_path(mount_point, "mount point")?;
        let size_label = size_label.trim();
        size_to_mb(size_label)?;

        info!("Creating RAM disk ({size_label}) at {mount_point:?}");
        let host = &self.host;
        let mut progress = Progress::new(Operation::CreateRamDisk);
        progress.run(Step::CreateMountPoint, || host.create_dir_all(mount_point))?;
        progress.run(Step::Mount, || host.mount_tmpfs(mount_point, size_label))?;
        Ok(())
    }

    /// Mount a registered file disk.
    ///
    /// `mount_point` overrides (and replaces) the recorded one. Encrypted disks
    /// need `passphrase` unless their mapper is already open.
    pub fn mount(
        &mut self,
        backing_path: &Path,
        mount_point: Option<&Path>,
        passphrase: Option<&str>,
    ) -> Result<MountOutcome, Error> {
        let record = self
            .registry
            .get(backing_path)
            .ok_or_else(|| not_registered(backing_path))?
            .clone();

        let snapshot = self.reader.snapshot();
        if derive_status(&record, &snapshot) == Status::Mounted {
            debug!("{backing_path:?} is already mounted");
            self.set_status(backing_path, Status::Mounted);
            return Ok(MountOutcome::AlreadyMounted);
        }

        let mount_point = match mount_point.or(record.mount_point()) {
            Some(mp) if !mp.as_os_str().is_empty() => mp.to_owned(),
            _ => {
                return Err(Error::Validation(format!(
                    "{} has no mount point, supply one",
                    backing_path.display()
                )))
            }
        };

        let host = &self.host;
        let mut progress = Progress::new(Operation::Mount);
        let device = if record.encrypted {
            match snapshot.mapper_device(&record.mapper_name()) {
                Some(device) => device,
                None => {
                    let passphrase = passphrase.ok_or_else(|| {
                        Error::Validation(format!("{} is encrypted, a passphrase is required", backing_path.display()))
                    })?;
                    let mapper = record.mapper_name();
                    progress.run(Step::Open, || host.luks_open(backing_path, &mapper, passphrase))?;
                    mounts::mapper_path(&mapper)
                }
            }
        } else {
            match snapshot.loops.find(backing_path) {
                Some(device) => device,
                None => progress.run(Step::AttachLoop, || host.attach_loop(backing_path))?,
            }
        };

        progress.run(Step::CreateMountPoint, || host.create_dir_all(&mount_point))?;
        progress.run(Step::Mount, || host.mount(&device, &mount_point))?;
        info!("Mounted {backing_path:?} at {mount_point:?}");

        if let Some(record) = self.registry.get_mut(backing_path) {
            record.status = Status::Mounted;
            record.mount_point = mount_point.clone();
        }
        self.registry.save()?;
        Ok(MountOutcome::Mounted { device, mount_point })
    }

    /// Unmount a file disk. RAM disks can only be deleted.
    pub fn unmount(&mut self, target: &DiskRef) -> Result<UnmountOutcome, Error> {
        let backing_path = match target {
            DiskRef::Ram(mount_point) => {
                return Err(Error::InvalidTransition(format!(
                    "RAM disk {} cannot be unmounted, delete it instead",
                    mount_point.display()
                )))
            }
            DiskRef::File(backing_path) => backing_path,
        };
        let record = self
            .registry
            .get(backing_path)
            .ok_or_else(|| not_registered(backing_path))?
            .clone();
        let Some(mount_point) = record.mount_point() else {
            return Err(Error::InvalidTransition(format!(
                "{} has no mount point",
                backing_path.display()
            )));
        };

        let snapshot = self.reader.snapshot();
        if derive_status(&record, &snapshot) == Status::Unmounted {
            debug!("{backing_path:?} is already unmounted");
            self.set_status(backing_path, Status::Unmounted);
            return Ok(UnmountOutcome::AlreadyUnmounted);
        }

        let host = &self.host;
        let mut progress = Progress::new(Operation::Unmount);
        progress.unmount(mount_point, || host.unmount(mount_point))?;
        info!("Unmounted {mount_point:?}");

        if record.encrypted {
            self.release_encrypted(&record, &snapshot);
        }

        self.set_status(backing_path, Status::Unmounted);
        self.registry.save()?;
        Ok(UnmountOutcome::Unmounted)
    }

    /// Unmount (if needed) and remove a disk.
    ///
    /// The caller is responsible for confirming with the user first.
    pub fn delete(&mut self, target: &DiskRef) -> Result<DeleteReport, Error> {
        match target {
            DiskRef::Ram(mount_point) => self.delete_ram_disk(mount_point),
            DiskRef::File(backing_path) => self.delete_file_disk(backing_path),
        }
    }

    fn delete_ram_disk(&mut self, mount_point: &Path) -> Result<DeleteReport, Error> {
        reject_system_mount(mount_point)?;
        let mut report = DeleteReport::default();
        let host = &self.host;
        let mut progress = Progress::new(Operation::Delete);

        if self.reader.mount_table().has_tmpfs_at(mount_point) {
            progress.unmount(mount_point, || host.unmount(mount_point))?;
        }

        if let Err(e) = host.remove_dir(mount_point) {
            warn!("Could not remove {mount_point:?}: {e}");
            report.warnings.push(format!(
                "Could not remove directory {}; make sure it is empty and not mounted: {}",
                mount_point.display(),
                e.diagnostic()
            ));
        }
        info!("Deleted RAM disk at {mount_point:?}");
        Ok(report)
    }

    fn delete_file_disk(&mut self, backing_path: &Path) -> Result<DeleteReport, Error> {
        let record = self
            .registry
            .get(backing_path)
            .ok_or_else(|| not_registered(backing_path))?
            .clone();
        let mut report = DeleteReport::default();
        let snapshot = self.reader.snapshot();
        let host = &self.host;
        let mut progress = Progress::new(Operation::Delete);

        if derive_status(&record, &snapshot) == Status::Mounted {
            let Some(mount_point) = record.mount_point() else {
                return Err(Error::InvalidTransition(format!(
                    "{} is mounted but has no recorded mount point; unmount it first",
                    backing_path.display()
                )));
            };
            progress.unmount(mount_point, || host.unmount(mount_point))?;
        }

        if record.encrypted {
            self.release_encrypted(&record, &snapshot);
        }
        // Again for plain disks, and harmless when already detached
        if let Some(device) = snapshot.loops.find(backing_path) {
            if let Err(e) = host.detach_loop(&device) {
                debug!("detach of {device:?} ignored: {e}");
            }
        }

        if let Err(e) = host.remove_file(backing_path) {
            warn!("Could not remove {backing_path:?}: {e}");
            report.warnings.push(format!(
                "Could not remove {}: {}",
                backing_path.display(),
                e.diagnostic()
            ));
        }
        if let Some(mount_point) = record.mount_point() {
            if let Err(e) = host.remove_dir(mount_point) {
                warn!("Could not remove {mount_point:?}: {e}");
                report.warnings.push(format!(
                    "Could not remove directory {}; make sure it is empty and not mounted: {}",
                    mount_point.display(),
                    e.diagnostic()
                ));
            }
        }

        self.registry.remove(backing_path)?;
        info!("Deleted file disk {backing_path:?}");
        Ok(report)
    }

    /// Resize a RAM disk or an unencrypted, mounted file disk.
    ///
    /// Requests below the space currently in use are raised to it. Returns the
    /// size applied, in MiB.
    pub fn resize(&mut self, target: &DiskRef, new_size_mb: u64) -> Result<u64, Error> {
        match target {
            DiskRef::Ram(mount_point) => self.resize_ram_disk(mount_point, new_size_mb),
            DiskRef::File(backing_path) => self.resize_file_disk(backing_path, new_size_mb),
        }
    }

    /// `requested`, raised to the MiB in use at `mount_point`
    pub fn effective_size(&self, mount_point: &Path, requested: u64) -> Result<u64, Error> {
        let used_mb = self.reader.usage(mount_point).map(|u| u.used_mb()).unwrap_or(0);
        let size = requested.max(used_mb);
        if size != requested {
            info!("Raising requested size {requested}M to {size}M, the space in use at {mount_point:?}");
        }
        if size == 0 {
            return Err(Error::Validation("new size must be at least 1 MB".into()));
        }
        Ok(size)
    }

    fn resize_ram_disk(&mut self, mount_point: &Path, new_size_mb: u64) -> Result<u64, Error> {
        reject_system_mount(mount_point)?;
        if !self.reader.mount_table().has_tmpfs_at(mount_point) {
            return Err(Error::NotFound(format!(
                "no RAM disk is mounted at {}",
                mount_point.display()
            )));
        }
        let size = self.effective_size(mount_point, new_size_mb)?;
        let host = &self.host;
        let mut progress = Progress::new(Operation::Resize);
        progress.run(Step::Remount, || host.remount_tmpfs(mount_point, size))?;
        info!("RAM disk at {mount_point:?} resized to {size}M");
        Ok(size)
    }

    fn resize_file_disk(&mut self, backing_path: &Path, new_size_mb: u64) -> Result<u64, Error> {
        let record = self
            .registry
            .get(backing_path)
            .ok_or_else(|| not_registered(backing_path))?
            .clone();
        if record.encrypted {
            return Err(Error::Unsupported(format!(
                "{} is encrypted; resizing LUKS containers is not supported",
                backing_path.display()
            )));
        }
        let Some(mount_point) = record.mount_point() else {
            return Err(Error::InvalidTransition(format!(
                "{} has no mount point",
                backing_path.display()
            )));
        };

        let snapshot = self.reader.snapshot();
        let Some(device) = resolve_device(&record, &snapshot) else {
            return Err(Error::NotFound(format!(
                "no loop device found for {}; is the disk mounted?",
                backing_path.display()
            )));
        };
        // Usage of an unmounted directory is the host filesystem's
        if !snapshot.mounts.is_mounted(&device.to_string_lossy()) {
            return Err(Error::InvalidTransition(format!(
                "{} is not mounted; mount it before resizing",
                backing_path.display()
            )));
        }
        let size = self.effective_size(mount_point, new_size_mb)?;

        info!("Resizing {backing_path:?} to {size}M");
        let host = &self.host;
        let mut progress = Progress::new(Operation::Resize);
        progress.unmount(mount_point, || host.unmount(mount_point))?;
        progress.run(Step::Extend, || host.extend_sparse(backing_path, size))?;
        progress.run(Step::RefreshLoop, || host.refresh_loop(&device))?;
        progress.run(Step::Check, || host.check_filesystem(&device))?;
        progress.run(Step::Grow, || host.grow_filesystem(&device))?;
        progress.run(Step::Mount, || host.mount(&device, mount_point))?;
        progress.run(Step::Permissions, || host.set_world_writable(mount_point))?;

        if let Some(record) = self.registry.get_mut(backing_path) {
            record.size_label = resized_label(size);
            record.status = Status::Mounted;
        }
        self.registry.save()?;
        info!("File disk {backing_path:?} resized to {}", resized_label(size));
        Ok(size)
    }

    /// Sync status, then raise capacity alerts for every mounted disk
    pub fn poll(&mut self, notifier: &dyn Notifier) -> Result<Vec<CapacityAlert>, Error> {
        self.sync_status()?;

        let mut samples = self
            .records()
            .iter()
            .filter(|r| r.is_mounted())
            .filter_map(|r| {
                let mount_point = r.mount_point()?;
                Some((r.backing_path.to_string_lossy().into_owned(), mount_point.to_owned()))
            })
            .collect::<Vec<_>>();
        samples.extend(self.ram_disks(false).into_iter().map(|m| (m.device, m.mount_point)));

        let mut alerts = vec![];
        for (backing, mount_point) in samples {
            let Some(usage) = self.reader.usage(&mount_point) else {
                continue;
            };
            if let Some(alert) = self.monitor.observe(&backing, &mount_point, usage) {
                warn!("{}", alert.message());
                alert.send(notifier);
                alerts.push(alert);
            }
        }
        Ok(alerts)
    }

    /// Close the mapper, then detach the loop device. Failures are only logged.
    fn release_encrypted(&self, record: &DiskRecord, snapshot: &Snapshot) {
        let mapper = record.mapper_name();
        if let Err(e) = self.host.luks_close(&mapper) {
            warn!("Could not close {mapper}: {e}");
        }
        if let Some(device) = snapshot.loops.find(&record.backing_path) {
            if let Err(e) = self.host.detach_loop(&device) {
                warn!("Could not detach {device:?}: {e}");
            }
        }
    }

    fn set_status(&mut self, backing_path: &Path, status: Status) {
        if let Some(record) = self.registry.get_mut(backing_path) {
            record.status = status;
        }
    }
}

fn require_path(path: &Path, what: &str) -> Result<(), Error> {
    if path.as_os_str().is_empty() || path == Path::new("-") {
        Err(Error::Validation(format!("a {what} is required")))
    } else {
        Ok(())
    }
}

fn reject_system_mount(mount_point: &Path) -> Result<(), Error> {
    if is_system_mount_point(mount_point) {
        Err(Error::InvalidTransition(format!(
            "{} is a system mount and cannot be managed",
            mount_point.display()
        )))
    } else {
        Ok(())
    }
}

fn not_registered(backing_path: &Path) -> Error {
    Error::NotFound(format!("{} is not a registered disk", backing_path.display()))
}
