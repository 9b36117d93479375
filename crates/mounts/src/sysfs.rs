// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Helper functions for interacting with Linux sysfs interfaces

use std::{fs, path::Path, str::FromStr};

/// Reads a value from a sysfs node and attempts to parse it to type T
///
/// # Arguments
///
/// * `node` - Path to the sysfs node (e.g. `/sys/class/block/loop0`)
/// * `key` - Name of the sysfs attribute to read, relative to `node`
///
/// # Returns
///
/// * `Some(T)` if the value was successfully read and parsed
/// * `None` if the file could not be read, was empty or failed to parse
pub(crate) fn read<T>(node: &Path, key: &str) -> Option<T>
where
    T: FromStr,
{
    let raw = fs::read_to_string(node.join(key)).ok()?;
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }
    value.parse().ok()
}
