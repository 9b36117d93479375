// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::io;

use host::command::{Invocation, Runner};
use lifecycle::Notifier;
use log::info;

/// Desktop notifications through `notify-send`
#[derive(Debug, Default)]
pub struct DesktopNotifier {
    runner: Runner,
}

impl Notifier for DesktopNotifier {
    fn notify(&self, title: &str, message: &str, icon: Option<&str>) -> io::Result<()> {
        let mut invocation = Invocation::new("notify-send").arg("--app-name=vdm");
        if let Some(icon) = icon {
            invocation = invocation.arg(format!("--icon={icon}"));
        }
        self.runner
            .run(&invocation.arg(title).arg(message))
            .map(drop)
            .map_err(io::Error::other)
    }
}

/// Notifications as log lines, when desktop notifications are off
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, message: &str, _icon: Option<&str>) -> io::Result<()> {
        info!("{title}: {message}");
        Ok(())
    }
}
