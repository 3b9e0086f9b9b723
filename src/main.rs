//! Flick daemon and command-line entry point.

use std::process::ExitCode;
use std::sync::{mpsc, Arc};

use anyhow::{bail, Result};
use clap::Parser;
use console::style;
use tokio::runtime::Runtime;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use flick::bridge::{socket_path, BridgeClient, BridgeServer};
use flick::cli::{self, Cli, Commands};
use flick::commands::App;
use flick::config::Settings;
use flick::extensions::loader::worker_main;
use flick::platform::system_autostart;
use flick::shortcut::{DetachedBinder, HotkeyService, ShortcutBinder};

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Workers report on stdout, so they skip logging setup entirely.
    if let Some(Commands::RunModule { path }) = &cli.command {
        return worker_main(path);
    }

    init_tracing(cli.verbose);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{} failed to start runtime: {}", style("error:").red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command.unwrap_or(Commands::Daemon) {
        Commands::Daemon => run_daemon(&runtime),
        command => cli::execute(&runtime, command),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", style("error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn run_daemon(runtime: &Runtime) -> Result<()> {
    let path = socket_path();
    if BridgeClient::connect(&path).is_ok() {
        bail!("flick is already running ({})", path);
    }

    let settings = Settings::load()?;

    // Presses are queued here; the listener thread never waits on an extension.
    let (trigger_tx, mut trigger_rx) = tokio::sync::mpsc::unbounded_channel::<()>();
    let binder: Arc<dyn ShortcutBinder> = match HotkeyService::start(Arc::new(move || {
        let _ = trigger_tx.send(());
    })) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            warn!(%e, "global shortcut unavailable, serving the bridge only");
            Arc::new(DetachedBinder)
        }
    };

    let app = Arc::new(App::from_settings(&settings, binder, system_autostart())?);
    runtime.block_on(app.startup());

    let dispatcher = app.clone();
    runtime.spawn(async move {
        while trigger_rx.recv().await.is_some() {
            let app = dispatcher.clone();
            tokio::spawn(async move { app.trigger().await });
        }
    });

    let bridge = BridgeServer::start(app, runtime.handle().clone(), &path)?;

    let (stop_tx, stop_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        socket = %bridge.path(),
        "flick daemon running"
    );
    let _ = stop_rx.recv();

    info!("shutting down");
    drop(bridge);
    Ok(())
}
