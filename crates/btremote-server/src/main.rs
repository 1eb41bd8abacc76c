//! btremote-server entry point.
//!
//! Runs on a machine that owns Bluetooth devices and exposes them to
//! btremote clients on the LAN.
//!
//! # Usage
//!
//! ```text
//! btremote-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>           Config file [default: <platform config dir>/config.toml]
//!   --port <PORT>             RPC port, 0 = OS-assigned
//!   --bind <IP>               Bind address for both sockets
//!   --broadcast-port <PORT>   UDP discovery port
//!   --secret <SECRET>         Shared secret for RPC calls
//!   --write-config            Write the effective config to --config and exit
//! ```
//!
//! Precedence is CLI > `BTREMOTE_*` environment variables (legacy
//! `REMOTE_BLUETOOTH_*` names are read as fallbacks) > config file >
//! built-in defaults.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  ├─ RpcServer          (TCP accept loop, one task per connection)
//!  │    └─ AuthenticatedHandler → DeviceService → InMemoryAdapter
//!  └─ DiscoveryResponder (UDP receive loop, advertises the RPC port)
//! ```
//!
//! The RPC listener is bound first so that an OS-assigned port is known
//! before the responder starts advertising it.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use btremote_core::Credential;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use btremote_server::application::{AuthenticatedHandler, DeviceService};
use btremote_server::infrastructure::adapter::InMemoryAdapter;
use btremote_server::infrastructure::network::{DiscoveryResponder, RpcServer};
use btremote_server::infrastructure::storage::{self, AppConfig};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Exposes this machine's Bluetooth devices to btremote clients.
#[derive(Debug, Parser)]
#[command(name = "btremote-server", version)]
struct Cli {
    /// Path of the TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// TCP port for RPC calls.  `0` lets the OS pick a free port.
    #[arg(long)]
    port: Option<u16>,

    /// IP address to bind the RPC and discovery sockets to.
    #[arg(long)]
    bind: Option<IpAddr>,

    /// UDP port to answer discovery queries on.
    #[arg(long)]
    broadcast_port: Option<u16>,

    /// Shared secret every RPC call must carry.
    #[arg(long)]
    secret: Option<String>,

    /// Write the effective configuration to the config path and exit.
    #[arg(long)]
    write_config: bool,
}

impl Cli {
    fn apply_to(&self, config: &mut AppConfig) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(bind) = self.bind {
            config.server.bind_address = bind.to_string();
        }
        if let Some(port) = self.broadcast_port {
            config.discovery.broadcast_port = port;
        }
        if let Some(secret) = &self.secret {
            config.server.secret = secret.clone();
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => storage::config_file_path().context("no --config given")?,
    };
    let mut config = storage::load_config_from(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    config
        .apply_env_overrides(|key| std::env::var(key).ok())
        .context("reading environment overrides")?;
    cli.apply_to(&mut config);

    if cli.write_config {
        storage::save_config_to(&config_path, &config)
            .with_context(|| format!("writing {}", config_path.display()))?;
        println!("{}", config_path.display());
        return Ok(());
    }

    // Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .init();

    info!("btremote-server starting (config {})", config_path.display());
    if config.server.secret.is_empty() {
        warn!("no secret configured; only calls carrying an empty credential will be accepted");
    }

    let bind_ip: IpAddr = config
        .server
        .bind_address
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.server.bind_address))?;

    // ── RPC listener ──────────────────────────────────────────────────────────
    let adapter = InMemoryAdapter::new(config.devices.clone());
    let handler = AuthenticatedHandler::new(
        Credential::new(config.server.secret.clone()),
        DeviceService::new(adapter),
    );
    let rpc = RpcServer::bind(SocketAddr::new(bind_ip, config.server.port), Arc::new(handler))
        .await
        .context("starting RPC server")?;
    let service_port = rpc.local_addr().port();

    // ── Discovery responder ───────────────────────────────────────────────────
    let responder = DiscoveryResponder::start(&config.discovery, bind_ip, service_port)
        .await
        .context("starting discovery responder")?;

    info!("btremote-server ready on port {service_port}.  Press Ctrl-C to exit.");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("shutdown signal received");

    responder.shutdown().await;
    rpc.shutdown().await;

    info!("btremote-server stopped");
    Ok(())
}
