//! padbridge - run the HID → virtual pad bridge until told to stop.
//!
//! Stops when stdin reaches EOF or a line reading `q` is entered.

#![deny(clippy::unwrap_used)]

use clap::Parser;
use padbridge::{Config, Notification};
use std::io::BufRead;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "padbridge")]
#[command(about = "Bridge fixed-layout HID gamepads to a virtual Xbox 360 controller")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Hardware filter, overrides the config file (e.g. "vid_2717&pid_3144")
    #[arg(short, long)]
    filter: Option<String>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> padbridge::Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("padbridge={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_thread_names(true))
        .init();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(filter) = cli.filter {
        config.hardware_filter = filter;
    }

    run(&config)
}

#[cfg(target_os = "windows")]
fn run(config: &Config) -> padbridge::Result<()> {
    use padbridge::backends::{platform_backend, windows::VirtualBus};
    use padbridge::{BridgeService, NoVisibility};
    use std::sync::Arc;

    // lives until the end of main; every pad holds a clone
    let bus = VirtualBus::connect()?;
    let backend = platform_backend()?;

    let (mut service, notifications) = BridgeService::spawn(
        config,
        backend.enumerator,
        backend.opener,
        Arc::new(bus.clone()),
        Arc::new(NoVisibility),
    )?;

    let logger = std::thread::Builder::new()
        .name("notifications".into())
        .spawn(move || {
            for n in notifications {
                log_notification(&n);
            }
        })?;

    wait_for_quit();
    service.shutdown();
    drop(service);
    let _ = logger.join();
    drop(bus);
    Ok(())
}

#[cfg(not(target_os = "windows"))]
fn run(_config: &Config) -> padbridge::Result<()> {
    Err(padbridge::SinkError::Bus("no virtual pad backend on this platform".into()).into())
}

#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn log_notification(n: &Notification) {
    match n {
        Notification::Attached(d) => tracing::info!(path = %d.path, "attached"),
        Notification::Detached(d) => tracing::info!(path = %d.path, "detached"),
        Notification::Started(path) => tracing::info!(%path, "bridging"),
        Notification::Removed(path) => tracing::info!(%path, "removed"),
    }
}

#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn wait_for_quit() {
    tracing::info!("running, enter `q` or close stdin to stop");
    for line in std::io::stdin().lock().lines() {
        match line {
            Ok(l) if l.trim().eq_ignore_ascii_case("q") => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }
}
