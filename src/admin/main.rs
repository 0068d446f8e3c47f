// SPDX-FileCopyrightText: 2026 the homeshare-tools contributors
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};

use homeshare_tools::ftp::FtpManager;
use homeshare_tools::reconciler::ApplyReport;
use homeshare_tools::registry::ShareEntry;
use homeshare_tools::samba::SambaManager;
use homeshare_tools::settings::Settings;
use homeshare_tools::util::init_logger;

#[derive(Parser)]
#[command(name = "homeshare-admin")]
#[command(about = "Administer per-user Samba and FTP shares via bind mounts")]
struct Cli {
    /// Settings file overriding the default host paths
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, ValueEnum)]
enum Protocol {
    Ftp,
    Samba,
}

#[derive(Parser)]
enum Commands {
    /// List mounted shares, optionally for one user
    List {
        #[arg(value_enum)]
        protocol: Protocol,
        #[arg(short, long)]
        user: Option<String>,
        /// Emit JSON instead of tab-separated lines
        #[arg(long)]
        json: bool,
    },
    /// Share a directory for a user and apply immediately
    Add {
        #[arg(value_enum)]
        protocol: Protocol,
        #[arg(short, long)]
        user: String,
        #[arg(short, long)]
        name: String,
        /// Directory to expose
        #[arg(short, long)]
        path: PathBuf,
    },
    /// Withdraw a user's share and apply immediately
    Remove {
        #[arg(value_enum)]
        protocol: Protocol,
        #[arg(short, long)]
        user: String,
        #[arg(short, long)]
        name: String,
    },
    /// Print the daemon configuration as currently understood
    ShowConfig {
        #[arg(value_enum)]
        protocol: Protocol,
    },
    /// Parse the daemon configuration and report what was found
    Verify {
        #[arg(value_enum)]
        protocol: Protocol,
    },
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => Settings::load(path),
        None => Ok(Settings::default()),
    }
}

fn print_entries(entries: &[&ShareEntry], json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(entries).context("Failed to serialize share list")?
        );
    } else {
        for entry in entries {
            println!("{}\t{}\t{}", entry.owner, entry.name, entry.source.display());
        }
    }
    Ok(())
}

/// Per-entry failures are not fatal inside the reconciler; surface them as
/// a command failure here so scripts see a non-zero exit.
fn check_report(report: &ApplyReport) -> Result<()> {
    for outcome in report.failures() {
        log::error!(
            "share '{}' of {}: {}",
            outcome.entry.name,
            outcome.entry.owner,
            outcome
                .error
                .as_ref()
                .map_or_else(|| "unknown failure".to_string(), ToString::to_string)
        );
    }
    if let Some(err) = &report.convergence {
        log::error!("{err}");
        bail!("mount table did not converge");
    }
    if !report.ok() {
        bail!("one or more shares failed to apply");
    }
    Ok(())
}

fn find_entry(entries: &[&ShareEntry], user: &str, name: &str) -> Result<ShareEntry> {
    entries
        .iter()
        .find(|e| e.name == name)
        .map(|e| (*e).clone())
        .with_context(|| format!("no mounted share named '{name}' for user '{user}'"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(cli.debug)?;
    let settings = load_settings(cli.settings.as_deref())?;

    match cli.command {
        Commands::List {
            protocol,
            user,
            json,
        } => match protocol {
            Protocol::Ftp => {
                let manager = FtpManager::new(&settings)?;
                let entries: Vec<&ShareEntry> = match &user {
                    Some(user) => manager.list_shares(user),
                    None => manager.shares().iter().collect(),
                };
                print_entries(&entries, json)
            }
            Protocol::Samba => {
                let manager = SambaManager::new(&settings)?;
                let entries: Vec<&ShareEntry> = match &user {
                    Some(user) => manager.list_shares(user),
                    None => manager.shares().iter().collect(),
                };
                print_entries(&entries, json)
            }
        },
        Commands::Add {
            protocol,
            user,
            name,
            path,
        } => match protocol {
            Protocol::Ftp => {
                let mut manager = FtpManager::new(&settings)?;
                manager.add_share(&user, &name, &path)?;
                let report = manager.save_shares_on_disk()?;
                check_report(&report)
            }
            Protocol::Samba => {
                let mut manager = SambaManager::new(&settings)?;
                manager.add_share(&user, &name, &path)?;
                let report = manager.update_config()?;
                check_report(&report)
            }
        },
        Commands::Remove {
            protocol,
            user,
            name,
        } => match protocol {
            Protocol::Ftp => {
                let mut manager = FtpManager::new(&settings)?;
                let entry = find_entry(&manager.list_shares(&user), &user, &name)?;
                manager.remove_share(&entry);
                let report = manager.save_shares_on_disk()?;
                check_report(&report)
            }
            Protocol::Samba => {
                let mut manager = SambaManager::new(&settings)?;
                let entry = find_entry(&manager.list_shares(&user), &user, &name)?;
                manager.remove_share(&entry)?;
                let report = manager.update_config()?;
                check_report(&report)
            }
        },
        Commands::ShowConfig { protocol } => {
            let text = match protocol {
                Protocol::Ftp => FtpManager::new(&settings)?.formatted_config(),
                Protocol::Samba => SambaManager::new(&settings)?.formatted_config(),
            };
            print!("{text}");
            Ok(())
        }
        Commands::Verify { protocol } => {
            match protocol {
                Protocol::Ftp => {
                    let manager = FtpManager::new(&settings)?;
                    println!(
                        "vsftpd config ok: {} users, {} mounted shares",
                        manager.ftp_users().len(),
                        manager.shares().len()
                    );
                }
                Protocol::Samba => {
                    let manager = SambaManager::new(&settings)?;
                    println!("smb.conf ok: {} share sections", manager.all_shares().len());
                }
            }
            Ok(())
        }
    }
}
