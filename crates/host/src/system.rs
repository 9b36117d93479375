// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use log::info;

use crate::{
    command::{Invocation, Runner},
    Error, Host, Result,
};

/// [`Host`] backed by coreutils, util-linux, cryptsetup and e2fsprogs
#[derive(Debug, Clone, Default)]
pub struct SystemHost {
    runner: Runner,
}

impl SystemHost {
    /// Create a host that prefixes every tool with `privilege` (e.g. `["sudo"]`)
    /// and kills tools that run longer than `timeout`
    pub fn new(privilege: Vec<String>, timeout: Option<Duration>) -> Self {
        Self {
            runner: Runner::new(privilege, timeout),
        }
    }

    fn run(&self, invocation: Invocation) -> Result<String> {
        self.runner.run(&invocation)
    }
}

impl Host for SystemHost {
    fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.run(Invocation::new("mkdir").arg("-p").arg(path))?;
        Ok(())
    }

    fn remove_dir(&self, path: &Path) -> Result<()> {
        self.run(Invocation::new("rmdir").arg(path))?;
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        self.run(Invocation::new("rm").arg("-f").arg(path))?;
        Ok(())
    }

    fn set_world_writable(&self, path: &Path) -> Result<()> {
        self.run(Invocation::new("chmod").arg("777").arg(path))?;
        Ok(())
    }

    fn allocate_zeroed(&self, path: &Path, size_mb: u64) -> Result<()> {
        info!("Allocating {size_mb} MiB at {path:?}");
        let mut of = std::ffi::OsString::from("of=");
        of.push(path);
        self.run(
            Invocation::new("dd")
                .arg("if=/dev/zero")
                .arg(of)
                .arg("bs=1M")
                .arg(format!("count={size_mb}")),
        )?;
        Ok(())
    }

    fn extend_sparse(&self, path: &Path, size_mb: u64) -> Result<()> {
        info!("Extending {path:?} to {size_mb} MiB");
        let mut of = std::ffi::OsString::from("of=");
        of.push(path);
        self.run(
            Invocation::new("dd")
                .arg("if=/dev/zero")
                .arg(of)
                .arg("bs=1M")
                .arg("count=0")
                .arg(format!("seek={size_mb}")),
        )?;
        Ok(())
    }

    fn attach_loop(&self, backing: &Path) -> Result<PathBuf> {
        let invocation = Invocation::new("losetup").arg("--find").arg("--show").arg(backing);
        let output = self.run(invocation.clone())?;
        let device = output.trim();
        if !device.starts_with("/dev/") {
            return Err(Error::UnexpectedOutput {
                command: invocation.render(),
                output: output.clone(),
            });
        }
        info!("Attached {backing:?} to {device}");
        Ok(PathBuf::from(device))
    }

    fn refresh_loop(&self, device: &Path) -> Result<()> {
        self.run(Invocation::new("losetup").arg("-c").arg(device))?;
        Ok(())
    }

    fn detach_loop(&self, device: &Path) -> Result<()> {
        self.run(Invocation::new("losetup").arg("-d").arg(device))?;
        Ok(())
    }

    fn luks_format(&self, backing: &Path, passphrase: &str) -> Result<()> {
        info!("Formatting LUKS container in {backing:?}");
        self.run(
            Invocation::new("cryptsetup")
                .arg("luksFormat")
                .arg("--batch-mode")
                .arg("--key-file=-")
                .arg(backing)
                .input(passphrase),
        )?;
        Ok(())
    }

    fn luks_open(&self, backing: &Path, mapper: &str, passphrase: &str) -> Result<()> {
        info!("Unlocking {backing:?} as {mapper}");
        self.run(
            Invocation::new("cryptsetup")
                .arg("open")
                .arg("--type")
                .arg("luks")
                .arg("--key-file=-")
                .arg(backing)
                .arg(mapper)
                .input(passphrase),
        )?;
        Ok(())
    }

    fn luks_close(&self, mapper: &str) -> Result<()> {
        self.run(Invocation::new("cryptsetup").arg("close").arg(mapper))?;
        Ok(())
    }

    fn make_ext4(&self, device: &Path) -> Result<()> {
        info!("Creating ext4 filesystem on {device:?}");
        self.run(Invocation::new("mkfs.ext4").arg("-F").arg(device))?;
        Ok(())
    }

    fn check_filesystem(&self, device: &Path) -> Result<()> {
        // 1: errors were found and corrected
        self.run(Invocation::new("e2fsck").arg("-f").arg("-y").arg(device).accept(1))?;
        Ok(())
    }

    fn grow_filesystem(&self, device: &Path) -> Result<()> {
        self.run(Invocation::new("resize2fs").arg(device))?;
        Ok(())
    }

    fn mount(&self, device: &Path, target: &Path) -> Result<()> {
        info!("Mounting {device:?} at {target:?}");
        self.run(Invocation::new("mount").arg(device).arg(target))?;
        Ok(())
    }

    fn mount_tmpfs(&self, target: &Path, size: &str) -> Result<()> {
        info!("Mounting tmpfs ({size}) at {target:?}");
        self.run(
            Invocation::new("mount")
                .arg("-t")
                .arg("tmpfs")
                .arg("-o")
                .arg(format!("size={size}"))
                .arg("tmpfs")
                .arg(target),
        )?;
        Ok(())
    }

    fn remount_tmpfs(&self, target: &Path, size_mb: u64) -> Result<()> {
        info!("Resizing tmpfs at {target:?} to {size_mb}M");
        self.run(
            Invocation::new("mount")
                .arg("-o")
                .arg(format!("remount,size={size_mb}M"))
                .arg(target),
        )?;
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        info!("Unmounting {target:?}");
        self.run(Invocation::new("umount").arg(target))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{env, fs};

    use test_log::test;

    use super::*;

    // Only exercises the unprivileged tools.
    #[test]
    fn test_file_and_directory_steps() {
        let host = SystemHost::default();
        let root = env::temp_dir().join(format!("host-system-{}", std::process::id()));
        let dir = root.join("mnt/disk1");
        let image = root.join("disk1.img");

        host.create_dir_all(&dir).unwrap();
        assert!(dir.is_dir());

        host.allocate_zeroed(&image, 2).unwrap();
        assert_eq!(fs::metadata(&image).unwrap().len(), 2 * 1024 * 1024);

        host.extend_sparse(&image, 5).unwrap();
        assert_eq!(fs::metadata(&image).unwrap().len(), 5 * 1024 * 1024);

        host.remove_file(&image).unwrap();
        host.remove_file(&image).unwrap();
        assert!(!image.exists());

        host.remove_dir(&dir).unwrap();
        assert!(host.remove_dir(&dir).is_err());
        fs::remove_dir_all(&root).unwrap();
    }
}
