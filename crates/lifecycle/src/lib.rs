// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Lifecycle management for RAM disks and loopback file disks.
//!
//! [`Manager`] owns the [`Registry`] of file disks and runs every create,
//! mount, unmount, resize and delete as an ordered series of [`host::Host`]
//! steps, reading live state through a [`mounts::MountTableReader`].

mod errors;
pub use errors::{Error, Operation, Step};

mod manager;
pub use manager::{DeleteReport, DiskRef, Manager, MountOutcome, UnmountOutcome, MIN_PASSPHRASE_LEN};

pub mod monitor;
pub use monitor::{CapacityAlert, CapacityMonitor, Notifier};

pub mod reconcile;

mod record;
pub use record::{mapper_name, DiskKind, DiskRecord, Status, MAPPER_SUFFIX};

pub mod registry;
pub use registry::{JsonFileStore, LoadPolicy, MemoryStore, Registry, RegistryStore, DEFAULT_REGISTRY};

pub mod size;
pub use size::{format_size, format_size_label, size_to_mb};

pub mod suggest;
pub use suggest::{suggest_path, Suggestion};
