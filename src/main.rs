//! Binary entrypoint: parses CLI flags, builds a [`Config`] (file, then env
//! overrides, then CLI overrides for the handful of flags operators reach
//! for most), wires up `tracing`, and runs the [`Server`] until SIGINT/SIGTERM.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use wayfind_dns::config::Config;
use wayfind_dns::error::Result;
use wayfind_dns::Server;

/// A caching, forwarding DNS resolver.
#[derive(Debug, Parser)]
#[command(name = "wayfind-dns", version, about)]
struct Cli {
    /// Path to a TOML configuration file. Missing fields fall back to
    /// built-in defaults; env vars (`WAYFIND_*`) still apply on top.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Watch the config file and hot-reload on change.
    #[arg(long, requires = "config")]
    watch_config: bool,

    /// Override the DNS bind address.
    #[arg(long)]
    bind_address: Option<IpAddr>,

    /// Override the DNS port (UDP and TCP).
    #[arg(long)]
    dns_port: Option<u16>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    if let Some(bind_address) = cli.bind_address {
        config.server.bind_address = bind_address;
    }
    if let Some(dns_port) = cli.dns_port {
        config.server.dns_port = dns_port;
    }
    config.validate()?;

    let runtime = build_runtime(&config)?;
    runtime.block_on(run(config, cli))
}

fn build_runtime(config: &Config) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if config.server.workers > 0 {
        builder.worker_threads(config.server.workers);
    }
    Ok(builder.build()?)
}

async fn run(config: Config, cli: Cli) -> Result<()> {
    let server = Server::new(config)?;

    let _watcher = match (&cli.config, cli.watch_config) {
        (Some(path), true) => {
            Some(wayfind_dns::config::ConfigWatcher::spawn(path, server.resolver().clone())?)
        }
        _ => None,
    };

    server.run(shutdown_signal()).await
}

/// Resolves once either Ctrl-C or, on Unix, SIGTERM is observed, so the
/// graceful-shutdown sequence in [`Server::run`] triggers on either signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
