// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Size labels such as `512M` or `1.5G`, and their human readable rendering.

use std::{fmt, str::FromStr};

use crate::Error;

const KIB: f64 = 1024.0;
const MIB: f64 = 1024.0 * 1024.0;

/// Unit suffix accepted in a size label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum SizeUnit {
    /// Mebibytes, `M`
    Megabytes = 1,
    /// Gibibytes, `G`
    Gigabytes = 1024,
}

impl SizeUnit {
    /// Number of MiB in one of this unit
    pub fn megabytes(self) -> u64 {
        self as u64
    }
}

impl fmt::Display for SizeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeUnit::Megabytes => f.write_str("M"),
            SizeUnit::Gigabytes => f.write_str("G"),
        }
    }
}

impl FromStr for SizeUnit {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "m" | "M" => Ok(Self::Megabytes),
            "g" | "G" => Ok(Self::Gigabytes),
            other => Err(Error::Validation(format!(
                "unsupported size unit {other:?}, use M or G"
            ))),
        }
    }
}

/// Convert a `<number>(M|G)` label to whole MiB, rounding to the nearest.
///
/// The unit is case-insensitive and the number may be fractional.
pub fn size_to_mb(label: &str) -> Result<u64, Error> {
    let label = label.trim();
    let Some(split) = label.char_indices().last().map(|(i, _)| i) else {
        return Err(Error::Validation("size is required, e.g. 512M or 1G".into()));
    };
    let (number, unit) = label.split_at(split);
    let unit = unit.parse::<SizeUnit>()?;

    let value = number
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v > 0.0)
        .ok_or_else(|| {
            Error::Validation(format!(
                "invalid size {label:?}, expected a positive number followed by M or G"
            ))
        })?;

    let mb = (value * unit.megabytes() as f64).round() as u64;
    if mb == 0 {
        return Err(Error::Validation(format!("size {label:?} is smaller than 1M")));
    }
    Ok(mb)
}

/// The label stored for a file disk after a resize to `mb`
pub fn resized_label(mb: u64) -> String {
    format!("{:.2}G", mb as f64 / 1024.0)
}

/// Render a byte count as `"<n> MB"` below 1 GiB and `"<x.xx> GB"` from there
pub fn format_size(bytes: u64) -> String {
    format_mb(bytes as f64 / MIB)
}

/// Render a mount option size (`624123k`, `1024m`, `2g`, or bare KiB digits)
/// like [`format_size`]. Anything else is returned unchanged.
pub fn format_size_label(label: &str) -> String {
    let normalized = label.trim().to_lowercase();
    let parse = |s: &str| s.parse::<f64>().ok();

    let mb = if let Some(n) = normalized.strip_suffix('g') {
        parse(n).map(|v| v * KIB)
    } else if let Some(n) = normalized.strip_suffix('m') {
        parse(n)
    } else if let Some(n) = normalized.strip_suffix('k') {
        parse(n).map(|v| v / KIB)
    } else if !normalized.is_empty() && normalized.chars().all(|c| c.is_ascii_digit()) {
        parse(&normalized).map(|v| v / KIB)
    } else {
        None
    };

    match mb {
        Some(mb) => format_mb(mb),
        None => label.to_owned(),
    }
}

fn format_mb(mb: f64) -> String {
    if mb >= KIB {
        format!("{:.2} GB", mb / KIB)
    } else {
        format!("{mb:.0} MB")
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_size_to_mb() {
        assert_eq!(size_to_mb("1G").unwrap(), 1024);
        assert_eq!(size_to_mb("512M").unwrap(), 512);
        assert_eq!(size_to_mb("128m").unwrap(), 128);
        assert_eq!(size_to_mb("1.5g").unwrap(), 1536);
        assert_eq!(size_to_mb(" 256M ").unwrap(), 256);
        assert_eq!(size_to_mb("0.4M").unwrap_err().to_string(), "size \"0.4M\" is smaller than 1M");
    }

    #[test]
    fn test_size_to_mb_rejects() {
        for bad in ["1T", "", "M", "G1", "-5M", "abcM", "512", "infM", "0G"] {
            assert!(
                matches!(size_to_mb(bad), Err(Error::Validation(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_resized_label() {
        assert_eq!(resized_label(1024), "1.00G");
        assert_eq!(resized_label(1536), "1.50G");
        assert_eq!(resized_label(300), "0.29G");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512 * 1024 * 1024), "512 MB");
        assert_eq!(format_size(1024 * 1024 * 1024), "1.00 GB");
        assert_eq!(format_size(3 * 512 * 1024 * 1024), "1.50 GB");
        assert_eq!(format_size(0), "0 MB");
    }

    #[test]
    fn test_format_size_label() {
        assert_eq!(format_size_label("524288k"), "512 MB");
        assert_eq!(format_size_label("1024m"), "1.00 GB");
        assert_eq!(format_size_label("2g"), "2.00 GB");
        assert_eq!(format_size_label("2G"), "2.00 GB");
        assert_eq!(format_size_label("262144"), "256 MB");
        assert_eq!(format_size_label("-"), "-");
        assert_eq!(format_size_label("50%"), "50%");
    }
}
