//! btremote-client entry point.
//!
//! Discovers btremote servers on the local subnets, lists their trusted
//! Bluetooth devices, and connects or disconnects them.
//!
//! # Usage
//!
//! ```text
//! btremote-client [OPTIONS] [COMMAND]
//!
//! Commands:
//!   watch                     Print device events until Ctrl-C (default)
//!   list                      Discover for a few seconds, print devices, exit
//!   connect <PEER> <DEVICE>   Connect DEVICE on the discovered PEER
//!   disconnect <PEER> <DEVICE>
//!
//! Options:
//!   --config <PATH>           Config file [default: <platform config dir>/client.toml]
//!   --secret <SECRET>         Shared secret for RPC calls
//!   --broadcast-port <PORT>   UDP port servers listen on
//!   --broadcast <IP>          Extra broadcast address (repeatable)
//!   --timeout <SECS>          Stop listening for discovery responses after SECS
//!   --json                    Print one JSON object per device event
//! ```
//!
//! # Architecture
//!
//! ```text
//! main()
//!  ├─ scan_interfaces()      -- broadcast targets + own addresses
//!  ├─ DiscoveryRequester     (UDP receive loop)  ──PeerAddress──┐
//!  └─ SessionRegistry.run_discovery()  ◄────────────────────────┘
//!       └─ one lookup task per peer ──DeviceEvent──► print_events()
//! ```

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use btremote_core::{Credential, DeviceEvent, PeerAddress};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use btremote_client::application::{DeviceEvents, RegistryConfig, SessionRegistry};
use btremote_client::infrastructure::network::{scan_interfaces, DiscoveryRequester, LocalInterfaces, TcpSessionFactory};
use btremote_client::infrastructure::storage::{self, AppConfig};

/// Discovery window for the one-shot commands when none is configured.
const DEFAULT_ONE_SHOT_TIMEOUT: Duration = Duration::from_secs(3);

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Controls Bluetooth devices attached to btremote servers on the LAN.
#[derive(Debug, Parser)]
#[command(name = "btremote-client", version)]
struct Cli {
    /// Path of the TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Shared secret attached to every RPC call.
    #[arg(long, global = true)]
    secret: Option<String>,

    /// UDP port the servers answer discovery queries on.
    #[arg(long, global = true)]
    broadcast_port: Option<u16>,

    /// Extra broadcast address to query.  May be given more than once.
    #[arg(long = "broadcast", global = true)]
    broadcast: Vec<Ipv4Addr>,

    /// Stop listening for discovery responses after this many seconds.
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Print device events as JSON lines.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Discover peers and print device events until Ctrl-C.
    Watch,
    /// Discover peers, print their devices, and exit.
    List,
    /// Connect a device on a discovered peer.
    Connect { peer: PeerAddress, device: String },
    /// Disconnect a device on a discovered peer.
    Disconnect { peer: PeerAddress, device: String },
}

impl Cli {
    fn apply_to(&self, config: &mut AppConfig) {
        if let Some(secret) = &self.secret {
            config.client.secret = secret.clone();
        }
        if let Some(port) = self.broadcast_port {
            config.discovery.broadcast_port = port;
        }
        config
            .client
            .broadcast_addresses
            .extend(self.broadcast.iter().copied());
        if let Some(secs) = self.timeout {
            config.client.discovery_timeout_secs = Some(secs);
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

    // Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.client.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if config.client.secret.is_empty() {
        warn!("no secret configured; peers with a non-empty secret will reject every call");
    }

    let command = cli.command.unwrap_or(Command::Watch);
    let one_shot = !matches!(command, Command::Watch);

    // ── Interfaces and targets ────────────────────────────────────────────────
    let interfaces = scan_interfaces().unwrap_or_else(|e| {
        warn!("could not enumerate network interfaces: {e}");
        LocalInterfaces::default()
    });
    let targets = broadcast_targets(&interfaces, &config.client.broadcast_addresses);
    if targets.is_empty() {
        warn!("no broadcast targets; pass --broadcast <IP> to query a subnet");
    }

    // ── Registry and discovery ────────────────────────────────────────────────
    let registry = Arc::new(SessionRegistry::new(
        RegistryConfig {
            suppress_self_discovery: config.client.suppress_self_discovery,
            local_ips: interfaces.local_ips.clone(),
            event_queue_capacity: config.client.event_queue_capacity,
        },
        Arc::new(TcpSessionFactory::new(Credential::new(config.client.secret.clone()))),
    ));

    let timeout = match config.client.discovery_timeout() {
        Some(limit) => Some(limit),
        None if one_shot => Some(DEFAULT_ONE_SHOT_TIMEOUT),
        None => None,
    };
    let requester = DiscoveryRequester::new(config.discovery.clone())
        .with_queue_capacity(config.client.discovery_queue_capacity)
        .with_timeout(timeout);
    let (peers, discovery) = requester
        .discover(&targets)
        .await
        .context("starting discovery")?
        .into_parts();
    let pump = registry.run_discovery(peers);

    // Events are always consumed so lookups never stall on a full queue.
    let print = !matches!(command, Command::Connect { .. } | Command::Disconnect { .. });
    let printer = tokio::spawn(consume_events(registry.events(), print, cli.json));

    let outcome = match command {
        Command::Watch => {
            info!("watching for devices.  Press Ctrl-C to exit.");
            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
            Ok(())
        }
        Command::List => pump_finished(pump).await,
        Command::Connect { peer, device } => {
            pump_finished(pump).await?;
            registry
                .connect_device(&peer, &device)
                .await
                .with_context(|| format!("connecting {device} on {peer}"))
                .map(|()| println!("connected {device} on {peer}"))
        }
        Command::Disconnect { peer, device } => {
            pump_finished(pump).await?;
            registry
                .disconnect_device(&peer, &device)
                .await
                .with_context(|| format!("disconnecting {device} on {peer}"))
                .map(|()| println!("disconnected {device} on {peer}"))
        }
    };

    discovery.shutdown().await;
    registry.shutdown().await;
    printer.await.context("event printer panicked")??;

    outcome
}

/// Interface broadcast addresses followed by the configured extras, without
/// duplicates.
fn broadcast_targets(interfaces: &LocalInterfaces, extra: &[Ipv4Addr]) -> Vec<Ipv4Addr> {
    let mut seen = HashSet::new();
    interfaces
        .broadcast_addrs()
        .into_iter()
        .chain(extra.iter().copied())
        .filter(|addr| seen.insert(*addr))
        .collect()
}

async fn pump_finished(pump: tokio::task::JoinHandle<()>) -> anyhow::Result<()> {
    pump.await.context("discovery pipeline panicked")
}

/// Reads the event queue until it closes, printing each event if `print`.
async fn consume_events(events: DeviceEvents, print: bool, json: bool) -> anyhow::Result<()> {
    while let Some(event) = events.recv().await {
        if !print {
            continue;
        }
        if json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            println!("{}", format_event(&event));
        }
    }
    Ok(())
}

fn format_event(event: &DeviceEvent) -> String {
    let device = &event.device;
    let state = if device.connected { "connected" } else { "disconnected" };
    let battery = device
        .battery
        .map(|pct| format!(" {pct}%"))
        .unwrap_or_default();
    format!(
        "{}\t{}\t{}\t{state}{battery}",
        event.peer, device.address, device.name
    )
}
