// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::{
    fmt, io,
    path::{Path, PathBuf},
};

use itertools::Itertools;
use miette::Diagnostic;
use thiserror::Error;

/// Error type for the lifecycle crate
#[derive(Diagnostic, Debug, Error)]
pub enum Error {
    /// Bad input; nothing was attempted
    #[error("{0}")]
    #[diagnostic(code(vdm::validation))]
    Validation(String),

    /// The first step of an operation failed
    #[error("{operation}: {step} failed")]
    #[diagnostic(code(vdm::command))]
    Command {
        operation: Operation,
        step: Step,
        #[source]
        source: host::Error,
    },

    /// The unmount step reported that the mount point is still in use
    #[error("Could not unmount {}: target is busy", mount_point.display())]
    #[diagnostic(
        code(vdm::target_busy),
        help("close programs or terminals using this directory and try again")
    )]
    TargetBusy {
        mount_point: PathBuf,
        #[source]
        source: host::Error,
    },

    /// A resource that had to exist could not be found
    #[error("{0}")]
    #[diagnostic(code(vdm::not_found))]
    NotFound(String),

    /// The disk is not in a state that allows the operation
    #[error("{0}")]
    #[diagnostic(code(vdm::invalid_transition))]
    InvalidTransition(String),

    /// The operation is not available for this kind of disk
    #[error("{0}")]
    #[diagnostic(code(vdm::unsupported))]
    Unsupported(String),

    /// Some steps completed before a later one failed. Completed steps are
    /// left in place.
    #[error("{operation}: {step} failed after {}", completed.iter().join(", "))]
    #[diagnostic(
        code(vdm::partial_failure),
        help("the completed steps were not undone and may need manual cleanup")
    )]
    PartialFailure {
        operation: Operation,
        step: Step,
        completed: Vec<Step>,
        #[source]
        source: host::Error,
    },

    #[error("could not access registry {}", path.display())]
    RegistryIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("registry {} is not valid", path.display())]
    #[diagnostic(help("fix or remove the file; it is rewritten on the next change"))]
    RegistryFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    /// Whether this is the busy mount point failure
    pub fn is_target_busy(&self) -> bool {
        matches!(self, Error::TargetBusy { .. })
    }

    /// Raw diagnostic text of the failing tool, if a tool failed
    pub fn diagnostic(&self) -> Option<String> {
        match self {
            Error::Command { source, .. } | Error::TargetBusy { source, .. } | Error::PartialFailure { source, .. } => {
                Some(source.diagnostic())
            }
            _ => None,
        }
    }
}

/// The user-facing operation an error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CreateRamDisk,
    CreateFileDisk,
    Mount,
    Unmount,
    Delete,
    Resize,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::CreateRamDisk => f.write_str("Failed to create RAM Disk"),
            Operation::CreateFileDisk => f.write_str("Failed to create file disk"),
            Operation::Mount => f.write_str("Failed to mount disk"),
            Operation::Unmount => f.write_str("Failed to unmount disk"),
            Operation::Delete => f.write_str("Failed to delete disk"),
            Operation::Resize => f.write_str("Failed to resize disk"),
        }
    }
}

/// One OS-level step of a lifecycle operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Allocate,
    Format,
    Open,
    AttachLoop,
    MakeFilesystem,
    CreateMountPoint,
    Mount,
    Permissions,
    Unmount,
    RemoveMountPoint,
    Extend,
    RefreshLoop,
    Check,
    Grow,
    Remount,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::Allocate => "allocate",
            Step::Format => "format",
            Step::Open => "open",
            Step::AttachLoop => "loop attach",
            Step::MakeFilesystem => "mkfs",
            Step::CreateMountPoint => "mount point creation",
            Step::Mount => "mount",
            Step::Permissions => "chmod",
            Step::Unmount => "unmount",
            Step::RemoveMountPoint => "mount point removal",
            Step::Extend => "extend",
            Step::RefreshLoop => "loop refresh",
            Step::Check => "filesystem check",
            Step::Grow => "grow",
            Step::Remount => "remount",
        })
    }
}

/// Tracks the steps an operation has completed so a failure can say how far
/// it got
#[derive(Debug)]
pub(crate) struct Progress {
    operation: Operation,
    completed: Vec<Step>,
}

impl Progress {
    pub(crate) fn new(operation: Operation) -> Self {
        Self {
            operation,
            completed: vec![],
        }
    }

    /// Run `step`, recording it on success
    pub(crate) fn run<T>(&mut self, step: Step, f: impl FnOnce() -> host::Result<T>) -> Result<T, Error> {
        match f() {
            Ok(value) => {
                self.completed.push(step);
                Ok(value)
            }
            Err(source) => Err(self.fail(step, source)),
        }
    }

    /// Like [`Progress::run`] for an unmount, classifying busy targets
    pub(crate) fn unmount(
        &mut self,
        mount_point: &Path,
        f: impl FnOnce() -> host::Result<()>,
    ) -> Result<(), Error> {
        match f() {
            Ok(()) => {
                self.completed.push(Step::Unmount);
                Ok(())
            }
            Err(source) if source.is_target_busy() => Err(Error::TargetBusy {
                mount_point: mount_point.to_owned(),
                source,
            }),
            Err(source) => Err(self.fail(Step::Unmount, source)),
        }
    }

    fn fail(&self, step: Step, source: host::Error) -> Error {
        if self.completed.is_empty() {
            Error::Command {
                operation: self.operation,
                step,
                source,
            }
        } else {
            Error::PartialFailure {
                operation: self.operation,
                step,
                completed: self.completed.clone(),
                source,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn failure(stderr: &str) -> host::Error {
        host::Error::Failed {
            command: "cryptsetup open".into(),
            status: Some(2),
            stderr: stderr.into(),
        }
    }

    #[test]
    fn test_first_step_failure_is_command_error() {
        let mut progress = Progress::new(Operation::CreateRamDisk);
        let err = progress
            .run(Step::CreateMountPoint, || Err::<(), _>(failure("mkdir: permission denied")))
            .unwrap_err();
        assert!(matches!(err, Error::Command { step: Step::CreateMountPoint, .. }));
        assert_eq!(err.to_string(), "Failed to create RAM Disk: mount point creation failed");
        assert_eq!(err.diagnostic().as_deref(), Some("mkdir: permission denied"));
    }

    #[test]
    fn test_later_failure_reports_completed_steps() {
        let mut progress = Progress::new(Operation::CreateFileDisk);
        progress.run(Step::Allocate, || Ok(())).unwrap();
        progress.run(Step::Format, || Ok(())).unwrap();
        let err = progress
            .run(Step::Open, || Err::<(), _>(failure("No key available with this passphrase.")))
            .unwrap_err();
        match &err {
            Error::PartialFailure { step, completed, .. } => {
                assert_eq!(*step, Step::Open);
                assert_eq!(completed, &vec![Step::Allocate, Step::Format]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            err.to_string(),
            "Failed to create file disk: open failed after allocate, format"
        );
    }

    #[test]
    fn test_busy_unmount_is_classified() {
        let mut progress = Progress::new(Operation::Unmount);
        let err = progress
            .unmount(Path::new("/mnt/disk1"), || Err(failure("umount: /mnt/disk1: target is busy.")))
            .unwrap_err();
        assert!(err.is_target_busy());
        assert_eq!(err.to_string(), "Could not unmount /mnt/disk1: target is busy");
    }
}
