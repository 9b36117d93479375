// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::{
    env,
    io::{self, BufRead, IsTerminal, Write},
    path::{Path, PathBuf},
    thread,
};

use clap::{Parser, Subcommand};
use host::SystemHost;
use lifecycle::{
    format_size_label, CapacityMonitor, DiskRef, JsonFileStore, Manager, MountOutcome, Notifier, Suggestion,
    UnmountOutcome,
};
use log::{error, info, warn, LevelFilter};
use miette::{bail, miette, IntoDiagnostic, Result};
use mounts::{MountTableReader, SystemReader};

mod config;
mod notify;

use config::Config;
use notify::{DesktopNotifier, LogNotifier};

type SystemManager = Manager<SystemHost, SystemReader, JsonFileStore>;

/// Environment variable holding the LUKS passphrase
const PASSPHRASE_ENV: &str = "VDM_PASSPHRASE";

/// Environment variable naming the configuration file
const CONFIG_ENV: &str = "VDM_CONFIG";

/// Create, mount and manage RAM disks and loopback file disks
#[derive(Parser)]
#[command(name = "vdm", version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to $VDM_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Registry file, overriding the configuration
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    /// Run privileged tools through this command, e.g. `sudo`
    #[arg(long, global = true)]
    privilege: Option<String>,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show RAM disks and file disks with their live status
    List {
        /// Include system tmpfs mounts
        #[arg(long)]
        system: bool,
    },
    /// Reconcile the registry with the system and save it
    Sync,
    /// Mount a new tmpfs RAM disk
    CreateRam {
        #[arg(long, default_value = "512M")]
        size: String,
        #[arg(long)]
        mount_point: Option<PathBuf>,
    },
    /// Create, format and mount a new file disk
    CreateFile {
        /// Backing image to create
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long, default_value = "1G")]
        size: String,
        #[arg(long)]
        mount_point: Option<PathBuf>,
        /// Make the disk a LUKS container
        #[arg(long)]
        encrypt: bool,
    },
    /// Mount a registered file disk
    Mount {
        /// Backing image of the disk
        file: PathBuf,
        /// Mount here instead of the recorded mount point
        #[arg(long)]
        mount_point: Option<PathBuf>,
    },
    /// Unmount a file disk
    Unmount {
        /// Backing image or mount point
        target: PathBuf,
    },
    /// Unmount and remove a disk, including its backing image
    Delete {
        /// Backing image or mount point
        target: PathBuf,
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
    /// Change the size of a RAM disk or an unencrypted file disk
    Resize {
        /// Backing image or mount point
        target: PathBuf,
        /// New size in MB; raised to the space in use if smaller
        size_mb: u64,
    },
    /// Keep the registry in sync and warn about disks that are almost full
    Watch,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli.config.clone().or_else(|| env::var_os(CONFIG_ENV).map(PathBuf::from));
    let mut config = Config::load(config_path.as_deref())?;
    if let Some(registry) = &cli.registry {
        config.registry = registry.clone();
    }
    if let Some(privilege) = &cli.privilege {
        config.privilege_command = privilege.split_whitespace().map(str::to_owned).collect();
    }

    let mut manager = open_manager(&config)?;

    match cli.command {
        Commands::List { system } => list(&manager, system || config.show_system),
        Commands::Sync => {
            let records = manager.sync_status()?;
            info!("Synchronised {} file disks", records.len());
        }
        Commands::CreateRam { size, mount_point } => {
            let mount_point = or_suggested(&manager, mount_point, Suggestion::RamMountPoint)?;
            manager.create_ram_disk(&size, &mount_point)?;
            println!("RAM disk ({size}) mounted at {}", mount_point.display());
        }
        Commands::CreateFile {
            file,
            size,
            mount_point,
            encrypt,
        } => {
            let file = or_suggested(&manager, file, Suggestion::BackingFile)?;
            let mount_point = or_suggested(&manager, mount_point, Suggestion::FileMountPoint)?;
            let passphrase = if encrypt { Some(read_passphrase()?) } else { None };
            let record = manager.create_file_disk(&file, &size, &mount_point, passphrase.as_deref())?;
            println!(
                "File disk {} created, formatted and mounted at {}",
                record.backing_path.display(),
                mount_point.display()
            );
        }
        Commands::Mount { file, mount_point } => {
            let needs_passphrase = manager
                .registry()
                .get(&file)
                .is_some_and(|r| r.encrypted && !r.is_mounted())
                && manager.reader().snapshot().mapper_device(&lifecycle::mapper_name(&file)).is_none();
            let passphrase = if needs_passphrase { Some(read_passphrase()?) } else { None };
            match manager.mount(&file, mount_point.as_deref(), passphrase.as_deref())? {
                MountOutcome::Mounted { device, mount_point } => {
                    println!("Mounted {} at {}", device.display(), mount_point.display())
                }
                MountOutcome::AlreadyMounted => println!("{} is already mounted", file.display()),
            }
        }
        Commands::Unmount { target } => {
            let disk = resolve(&manager, &target)?;
            match manager.unmount(&disk)? {
                UnmountOutcome::Unmounted => println!("Unmounted {}", target.display()),
                UnmountOutcome::AlreadyUnmounted => println!("{} is already unmounted", target.display()),
            }
        }
        Commands::Delete { target, yes } => {
            if !yes {
                bail!(
                    help = "pass --yes to confirm",
                    "refusing to delete {} without confirmation",
                    target.display()
                );
            }
            let disk = resolve(&manager, &target)?;
            let report = manager.delete(&disk)?;
            for warning in &report.warnings {
                warn!("{warning}");
            }
            println!("Deleted {}", target.display());
        }
        Commands::Resize { target, size_mb } => {
            let disk = resolve(&manager, &target)?;
            let applied = manager.resize(&disk, size_mb)?;
            println!("Resized {} to {applied} MB", target.display());
        }
        Commands::Watch => watch(&mut manager, &config)?,
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let mut builder = pretty_env_logger::formatted_timed_builder();
    builder.filter_level(if verbose { LevelFilter::Debug } else { LevelFilter::Info });
    if let Ok(filters) = env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
}

fn open_manager(config: &Config) -> Result<SystemManager> {
    let host = SystemHost::new(config.privilege_command.clone(), config.command_timeout());
    let reader = SystemReader::new(config.privilege_command.clone());
    let store = JsonFileStore::new(&config.registry);
    let manager = Manager::load(host, reader, store, config.load_policy())?
        .with_monitor(CapacityMonitor::new(config.capacity_threshold));
    Ok(manager)
}

fn list(manager: &SystemManager, show_system: bool) {
    println!(
        "{:<6} {:<32} {:<28} {:>10}  STATUS",
        "TYPE", "DEVICE/FILE", "MOUNT POINT", "SIZE"
    );
    for ram in manager.ram_disks(show_system) {
        println!(
            "{:<6} {:<32} {:<28} {:>10}  Mounted",
            "RAM",
            ram.device,
            ram.mount_point.display(),
            format_size_label(&ram.size)
        );
    }
    for record in manager.records() {
        let mount_point = record
            .mount_point()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_owned());
        println!(
            "{:<6} {:<32} {:<28} {:>10}  {}{}",
            "File",
            record.backing_path.display(),
            mount_point,
            format_size_label(&record.size_label),
            record.status,
            if record.encrypted { " (encrypted)" } else { "" }
        );
    }
}

fn watch(manager: &mut SystemManager, config: &Config) -> Result<()> {
    let notifier: Box<dyn Notifier> = if config.notifications {
        Box::new(DesktopNotifier::default())
    } else {
        Box::new(LogNotifier)
    };
    info!("Polling every {:?}", config.poll_interval());
    loop {
        if let Err(e) = manager.poll(notifier.as_ref()) {
            error!("Poll failed: {e}");
        }
        thread::sleep(config.poll_interval());
    }
}

fn resolve(manager: &SystemManager, target: &Path) -> Result<DiskRef> {
    manager
        .resolve_target(target)
        .ok_or_else(|| miette!("{} is neither a registered file disk nor a RAM disk", target.display()))
}

fn or_suggested(manager: &SystemManager, given: Option<PathBuf>, kind: Suggestion) -> Result<PathBuf> {
    match given {
        Some(path) => Ok(path),
        None => manager.suggest(kind).ok_or_else(|| {
            miette!(
                help = "pass the path explicitly",
                "all default {} paths are in use",
                match kind {
                    Suggestion::RamMountPoint | Suggestion::FileMountPoint => "mount point",
                    Suggestion::BackingFile => "backing file",
                }
            )
        }),
    }
}

/// `$VDM_PASSPHRASE`, or one line from stdin
fn read_passphrase() -> Result<String> {
    if let Ok(passphrase) = env::var(PASSPHRASE_ENV) {
        return Ok(passphrase);
    }

    let stdin = io::stdin();
    if stdin.is_terminal() {
        eprint!("Passphrase: ");
        io::stderr().flush().into_diagnostic()?;
    }
    let mut line = String::new();
    stdin.lock().read_line(&mut line).into_diagnostic()?;
    let passphrase = line.trim_end_matches(['\r', '\n']).to_owned();
    if passphrase.is_empty() {
        bail!(help = format!("set {PASSPHRASE_ENV} or pipe it on stdin"), "no passphrase given");
    }
    Ok(passphrase)
}
