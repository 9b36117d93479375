// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use lifecycle::{monitor::DEFAULT_THRESHOLD, LoadPolicy, DEFAULT_REGISTRY};
use miette::Diagnostic;
use serde::Deserialize;
use thiserror::Error;

/// Errors reading the configuration file
#[derive(Debug, Diagnostic, Error)]
pub enum Error {
    #[error("could not read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not parse {}", path.display())]
    #[diagnostic(help("see the configuration keys in the vdm documentation"))]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Settings for the `vdm` front-end
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Registry file, relative to the working directory
    pub registry: PathBuf,
    pub poll_interval_secs: u64,
    pub capacity_threshold: f64,
    pub prune_missing_mount_points: bool,
    pub show_system: bool,
    /// argv prefix for privileged tools, e.g. `["sudo"]`
    pub privilege_command: Vec<String>,
    pub command_timeout_secs: Option<u64>,
    pub notifications: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry: PathBuf::from(DEFAULT_REGISTRY),
            poll_interval_secs: 15,
            capacity_threshold: DEFAULT_THRESHOLD,
            prune_missing_mount_points: false,
            show_system: false,
            privilege_command: vec![],
            command_timeout_secs: None,
            notifications: true,
        }
    }
}

impl Config {
    /// Read `path`, or use the defaults when there is none
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_owned(),
            source,
        })?;
        let config = Self::parse(&text).map_err(|source| Error::Parse {
            path: path.to_owned(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.poll_interval_secs == 0 {
            return Err(Error::Invalid("poll_interval_secs must be at least 1".into()));
        }
        if !(self.capacity_threshold > 0.0 && self.capacity_threshold <= 1.0) {
            return Err(Error::Invalid("capacity_threshold must be within (0, 1]".into()));
        }
        if self.command_timeout_secs == Some(0) {
            return Err(Error::Invalid("command_timeout_secs must be at least 1".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }

    pub fn load_policy(&self) -> LoadPolicy {
        if self.prune_missing_mount_points {
            LoadPolicy::PruneMissingMountPoints
        } else {
            LoadPolicy::Keep
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{env, process};

    use test_log::test;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.registry, PathBuf::from("discos.json"));
        assert_eq!(config.poll_interval(), Duration::from_secs(15));
        assert_eq!(config.capacity_threshold, 0.9);
        assert_eq!(config.load_policy(), LoadPolicy::Keep);
        assert_eq!(config.command_timeout(), None);
        assert!(config.notifications);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config = Config::parse(
            r#"
privilege_command = ["sudo", "-n"]
command_timeout_secs = 120
prune_missing_mount_points = true
"#,
        )
        .unwrap();
        assert_eq!(config.privilege_command, vec!["sudo", "-n"]);
        assert_eq!(config.command_timeout(), Some(Duration::from_secs(120)));
        assert_eq!(config.load_policy(), LoadPolicy::PruneMissingMountPoints);
        assert_eq!(config.poll_interval_secs, 15);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(Config::parse("polling = 3\n").is_err());
    }

    #[test]
    fn test_load_validates() {
        let path = env::temp_dir().join(format!("vdm-config-{}.toml", process::id()));
        fs::write(&path, "capacity_threshold = 1.5\n").unwrap();
        let err = Config::load(Some(&path)).unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));

        fs::write(&path, "capacity_threshold = [\n").unwrap();
        assert!(matches!(Config::load(Some(&path)).unwrap_err(), Error::Parse { .. }));
        fs::remove_file(&path).unwrap();

        assert!(matches!(Config::load(Some(&path)).unwrap_err(), Error::Read { .. }));
    }
}
