// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The set of persisted file disks and where it is stored.

use std::{
    cell::{Cell, RefCell},
    collections::BTreeSet,
    fs, io,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};

use crate::{DiskRecord, Error};

/// Default registry file name, relative to the working directory
pub const DEFAULT_REGISTRY: &str = "discos.json";

/// Persistence for the full record list
pub trait RegistryStore {
    /// Read every record; an absent store reads as empty
    fn load(&self) -> Result<Vec<DiskRecord>, Error>;

    /// Replace the stored records with `records`
    fn save(&self, records: &[DiskRecord]) -> Result<(), Error>;
}

impl<T: RegistryStore + ?Sized> RegistryStore for &T {
    fn load(&self) -> Result<Vec<DiskRecord>, Error> {
        (**self).load()
    }

    fn save(&self, records: &[DiskRecord]) -> Result<(), Error> {
        (**self).save(records)
    }
}

/// Store backed by a pretty-printed JSON array on disk
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RegistryStore for JsonFileStore {
    fn load(&self) -> Result<Vec<DiskRecord>, Error> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("registry {:?} does not exist yet", self.path);
                return Ok(vec![]);
            }
            Err(source) => {
                return Err(Error::RegistryIo {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if text.trim().is_empty() {
            return Ok(vec![]);
        }

        serde_json::from_str(&text).map_err(|source| Error::RegistryFormat {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, records: &[DiskRecord]) -> Result<(), Error> {
        let json = serde_json::to_string_pretty(records).map_err(|source| Error::RegistryFormat {
            path: self.path.clone(),
            source,
        })?;
        fs::write(&self.path, json).map_err(|source| Error::RegistryIo {
            path: self.path.clone(),
            source,
        })?;
        debug!("saved {} records to {:?}", records.len(), self.path);
        Ok(())
    }
}

/// In-memory store, counting saves
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RefCell<Vec<DiskRecord>>,
    saves: Cell<usize>,
}

impl MemoryStore {
    pub fn new(records: Vec<DiskRecord>) -> Self {
        Self {
            records: RefCell::new(records),
            saves: Cell::new(0),
        }
    }

    /// The records as last saved
    pub fn records(&self) -> Vec<DiskRecord> {
        self.records.borrow().clone()
    }

    /// How many times [`RegistryStore::save`] was called
    pub fn saves(&self) -> usize {
        self.saves.get()
    }
}

impl RegistryStore for MemoryStore {
    fn load(&self) -> Result<Vec<DiskRecord>, Error> {
        Ok(self.records.borrow().clone())
    }

    fn save(&self, records: &[DiskRecord]) -> Result<(), Error> {
        *self.records.borrow_mut() = records.to_vec();
        self.saves.set(self.saves.get() + 1);
        Ok(())
    }
}

/// How [`Registry::load`] treats records whose mount point has vanished
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadPolicy {
    /// Keep every record
    #[default]
    Keep,
    /// Drop records whose mount point directory no longer exists and save
    /// the result straight away
    PruneMissingMountPoints,
}

/// Ordered set of file disks, unique by backing path
#[derive(Debug)]
pub struct Registry<S> {
    store: S,
    records: Vec<DiskRecord>,
}

impl<S: RegistryStore> Registry<S> {
    /// Load the registry from `store`
    pub fn load(store: S, policy: LoadPolicy) -> Result<Self, Error> {
        let loaded = store.load()?;
        let count = loaded.len();

        let mut seen = BTreeSet::new();
        let mut records = Vec::with_capacity(count);
        for record in loaded {
            if !seen.insert(record.backing_path.clone()) {
                warn!("Ignoring duplicate registry entry for {:?}", record.backing_path);
                continue;
            }
            if policy == LoadPolicy::PruneMissingMountPoints && !record.mount_point().is_some_and(Path::exists) {
                info!(
                    "Dropping {:?}: mount point {:?} no longer exists",
                    record.backing_path, record.mount_point
                );
                continue;
            }
            records.push(record);
        }

        let registry = Self { store, records };
        if policy == LoadPolicy::PruneMissingMountPoints && registry.records.len() != count {
            registry.save()?;
        }
        Ok(registry)
    }

    /// Write every record back to the store
    pub fn save(&self) -> Result<(), Error> {
        self.store.save(&self.records)
    }

    pub fn records(&self) -> &[DiskRecord] {
        &self.records
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn get(&self, backing_path: &Path) -> Option<&DiskRecord> {
        self.records.iter().find(|r| r.backing_path == backing_path)
    }

    pub fn contains(&self, backing_path: &Path) -> bool {
        self.get(backing_path).is_some()
    }

    pub(crate) fn records_mut(&mut self) -> &mut [DiskRecord] {
        &mut self.records
    }

    pub(crate) fn get_mut(&mut self, backing_path: &Path) -> Option<&mut DiskRecord> {
        self.records.iter_mut().find(|r| r.backing_path == backing_path)
    }

    /// Append `record` and save. Fails if its backing path is already known.
    pub fn insert(&mut self, record: DiskRecord) -> Result<(), Error> {
        if self.contains(&record.backing_path) {
            return Err(Error::Validation(format!(
                "{} is already registered",
                record.backing_path.display()
            )));
        }
        self.records.push(record);
        self.save()
    }

    /// Remove the record for `backing_path` and save
    pub fn remove(&mut self, backing_path: &Path) -> Result<Option<DiskRecord>, Error> {
        let Some(index) = self.records.iter().position(|r| r.backing_path == backing_path) else {
            return Ok(None);
        };
        let record = self.records.remove(index);
        self.save()?;
        Ok(Some(record))
    }
}
