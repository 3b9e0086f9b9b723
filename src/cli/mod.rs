//! CLI commands for Flick.
//!
//! Without a subcommand `flick` runs the daemon. Every other subcommand runs
//! one command: through the running daemon when one is listening, otherwise
//! directly against the local data directory.

pub mod pack;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use serde::de::DeserializeOwned;
use tokio::runtime::Runtime;
use tracing::debug;

use crate::bridge::{socket_path, BridgeClient};
use crate::commands::{App, Request};
use crate::config::{Config, Settings};
use crate::extensions::{AvailableExtension, InstalledExtension, UpdateReport};
use crate::platform::{system_autostart, AppUpdateStatus};
use crate::shortcut::{keys, DetachedBinder};

#[derive(Parser)]
#[command(name = "flick", version)]
#[command(about = "Quick actions behind a global shortcut", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the daemon: global shortcut and command bridge (default)
    Daemon,

    /// List installed extensions in their configured order
    List,

    /// List extensions available in the registry
    Available,

    /// Install (or reinstall) an extension from the registry
    Install {
        /// Extension id
        id: String,
    },

    /// Remove an installed extension
    Remove { id: String },

    /// Enable an installed extension
    Enable { id: String },

    /// Disable an installed extension
    Disable { id: String },

    /// Run an installed extension once
    Run { id: String },

    /// Update installed extensions to the registry's versions
    Update,

    /// Download and stage a newer Flick release
    UpdateApp,

    /// Show the configuration, or change the shortcut / autolaunch flag
    Config {
        /// New shortcut in registration form, e.g. "Control+Shift+Space"; "" unsets it
        #[arg(long)]
        shortcut: Option<String>,

        /// Start Flick with the operating system
        #[arg(long)]
        autolaunch: Option<bool>,
    },

    /// Pack a native module (and icon) into a release artifact
    Pack {
        /// Path to the compiled module (lib.so / lib.dylib / lib.dll)
        module: PathBuf,

        /// Optional SVG icon
        #[arg(long)]
        icon: Option<PathBuf>,

        /// Output archive
        #[arg(short, long, default_value = "extension.tar.gz")]
        output: PathBuf,
    },

    /// Run one module and report the outcome (used by the daemon)
    #[command(name = "__run-module", hide = true)]
    RunModule { path: PathBuf },
}

enum Backend {
    Daemon(BridgeClient),
    Local(App),
}

/// Where CLI commands are executed.
struct Session<'a> {
    runtime: &'a Runtime,
    backend: Backend,
}

impl<'a> Session<'a> {
    fn open(runtime: &'a Runtime) -> Result<Self> {
        let backend = match BridgeClient::connect(&socket_path()) {
            Ok(client) => {
                debug!("using running daemon");
                Backend::Daemon(client)
            }
            Err(e) => {
                debug!(%e, "no daemon, running locally");
                let settings = Settings::load().context("Failed to load settings")?;
                let app = App::from_settings(&settings, Arc::new(DetachedBinder), system_autostart())?;
                Backend::Local(app)
            }
        };

        Ok(Self { runtime, backend })
    }

    fn call<T: DeserializeOwned>(&mut self, request: Request) -> Result<T> {
        let response = match &mut self.backend {
            Backend::Daemon(client) => client.send(&request)?,
            Backend::Local(app) => self.runtime.block_on(app.handle(request)),
        };

        let value = response.into_result()?;
        Ok(serde_json::from_value(value)?)
    }
}

fn check() -> console::StyledObject<&'static str> {
    style("✓").green().bold()
}

fn print_installed(installed: &[InstalledExtension], config: &Config) {
    if installed.is_empty() {
        println!("{}", style("No extensions installed.").dim());
        return;
    }

    for id in &config.ordered {
        if let Some(ext) = installed.iter().find(|e| e.id() == id.as_str()) {
            let marker = if ext.enabled {
                style("●").green()
            } else {
                style("○").dim()
            };
            println!(
                "{} {} {} {}",
                marker,
                style(ext.id()).bold(),
                style(&ext.manifest.version).cyan(),
                ext.manifest.name
            );
        }
    }
}

fn print_config(config: &Config) {
    let shortcut = if config.shortcut.is_empty() {
        style("(unset)".to_string()).dim()
    } else {
        style(format!(
            "{}  [{}]",
            keys::binding_to_display(&config.shortcut),
            config.shortcut
        ))
    };

    println!("{} {}", style("shortcut:").cyan(), shortcut);
    println!("{} {}", style("autolaunch:").cyan(), config.autolaunch);
    println!("{} {}", style("order:").cyan(), config.ordered.join(", "));
    println!("{} {}", style("enabled:").cyan(), config.enabled.join(", "));
}

/// Execute one non-daemon subcommand.
pub fn execute(runtime: &Runtime, command: Commands) -> Result<()> {
    if let Commands::Pack {
        module,
        icon,
        output,
    } = &command
    {
        return pack::run_pack(module, icon.as_deref(), output);
    }

    let mut session = Session::open(runtime)?;

    match command {
        Commands::List => {
            let installed: Vec<InstalledExtension> =
                session.call(Request::GetInstalledExtensions)?;
            let config: Config = session.call(Request::GetConfig)?;
            print_installed(&installed, &config);
        }
        Commands::Available => {
            let catalog: Vec<AvailableExtension> = session.call(Request::FetchOnlineExtensions)?;
            for ext in catalog {
                println!(
                    "{} {} {}",
                    style(&ext.id).bold(),
                    style(&ext.version).cyan(),
                    ext.description
                );
            }
        }
        Commands::Install { id } => {
            let catalog: Vec<AvailableExtension> = session.call(Request::FetchOnlineExtensions)?;
            let manifest = catalog
                .into_iter()
                .find(|m| m.id == id)
                .with_context(|| format!("'{}' is not in the registry", id))?;

            println!("{} Installing {}...", style("→").cyan(), style(&id).bold());
            let installed: InstalledExtension =
                session.call(Request::DownloadAndInstallExtension { manifest })?;
            println!(
                "{} Installed {} {}",
                check(),
                style(installed.id()).bold(),
                style(&installed.manifest.version).cyan()
            );
        }
        Commands::Remove { id } => {
            session.call::<()>(Request::DeleteExtension { id: id.clone() })?;
            println!("{} Removed {}", check(), style(id).bold());
        }
        Commands::Enable { id } => {
            session.call::<Config>(Request::SetEnabled {
                id: id.clone(),
                enabled: true,
            })?;
            println!("{} Enabled {}", check(), style(id).bold());
        }
        Commands::Disable { id } => {
            session.call::<Config>(Request::SetEnabled {
                id: id.clone(),
                enabled: false,
            })?;
            println!("{} Disabled {}", check(), style(id).bold());
        }
        Commands::Run { id } => {
            session.call::<()>(Request::RunExtension { id: id.clone() })?;
            println!("{} Ran {}", check(), style(id).bold());
        }
        Commands::Update => {
            let report: UpdateReport = session.call(Request::UpdateExtensions)?;
            for id in &report.updated {
                println!("{} Updated {}", check(), style(id).bold());
            }
            for id in &report.up_to_date {
                println!("{} {} is up to date", style("·").dim(), id);
            }
            for failure in &report.failed {
                println!(
                    "{} {}: {}",
                    style("✗").red().bold(),
                    style(&failure.id).bold(),
                    failure.error
                );
            }
            if !report.failed.is_empty() {
                bail!("{} extension(s) failed to update", report.failed.len());
            }
        }
        Commands::UpdateApp => match session.call::<AppUpdateStatus>(Request::UpdateApp)? {
            AppUpdateStatus::UpToDate { version } => {
                println!("{} Flick {} is up to date", check(), version);
            }
            AppUpdateStatus::Staged { version, path } => {
                println!(
                    "{} Flick {} downloaded to {}",
                    check(),
                    style(version).cyan(),
                    path.display()
                );
            }
        },
        Commands::Config {
            shortcut,
            autolaunch,
        } => {
            let mut config: Config = session.call(Request::GetConfig)?;
            if shortcut.is_none() && autolaunch.is_none() {
                print_config(&config);
                return Ok(());
            }

            if let Some(shortcut) = shortcut {
                config.shortcut = shortcut;
            }
            if let Some(autolaunch) = autolaunch {
                config.autolaunch = autolaunch;
            }

            let stored: Config = session.call(Request::ChangeConfig { config })?;
            println!("{} Configuration saved", check());
            print_config(&stored);
        }
        Commands::Daemon | Commands::RunModule { .. } | Commands::Pack { .. } => {
            bail!("command is handled by the binary entry point")
        }
    }

    Ok(())
}
