//! CLI command definitions and handlers.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use peerdrop_core::config::Config;
use peerdrop_core::store::JsonSessionStore;
use peerdrop_core::{MonotonicIds, ShareService, ShareTarget, TaskHandle};

pub mod clip;
pub mod config;
pub mod devices;
pub mod hotspot;
pub mod probe;
pub mod send;
pub mod serve;

/// PeerDrop - offer files or clipboard text to a peer on the local network
#[derive(Parser)]
#[command(name = "peerdrop")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Detailed logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Offer files and folders to a peer
    Send(SendArgs),

    /// Offer clipboard text to a peer
    Clip(ClipArgs),

    /// Join a peer's hotspot and offer files or text to it
    Hotspot(HotspotArgs),

    /// Ask a peer who it is and remember it
    Probe(ProbeArgs),

    /// List known devices
    Devices(DevicesArgs),

    /// Answer incoming requests from peers
    Serve(ServeArgs),

    /// Show configuration
    Config(ConfigArgs),
}

/// Arguments for the send command
#[derive(Parser)]
pub struct SendArgs {
    /// Files and folders to send
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Peer address or stored device id
    #[arg(short, long)]
    pub to: String,

    /// Display names for the paths, in order
    #[arg(short, long)]
    pub name: Vec<String>,

    /// Interface to prefer when the device is known on several
    #[arg(short, long)]
    pub interface: Option<String>,

    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Arguments for the clip command
#[derive(Parser)]
pub struct ClipArgs {
    /// Text to offer
    pub text: String,

    /// Peer address or stored device id
    #[arg(short, long)]
    pub to: String,

    /// Interface to prefer when the device is known on several
    #[arg(short, long)]
    pub interface: Option<String>,

    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Arguments for the hotspot command
#[derive(Parser)]
pub struct HotspotArgs {
    /// Network name of the peer's hotspot
    pub ssid: String,

    /// Files and folders to send
    #[arg(required_unless_present = "text", conflicts_with = "text")]
    pub paths: Vec<PathBuf>,

    /// Offer clipboard text instead of files
    #[arg(long)]
    pub text: Option<String>,

    /// Hotspot password
    #[arg(short, long, env = "PEERDROP_HOTSPOT_PASSWORD")]
    pub password: Option<String>,

    /// Wireless device to join with
    #[arg(short, long)]
    pub interface: Option<String>,

    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Arguments for the probe command
#[derive(Parser)]
pub struct ProbeArgs {
    /// Peer address
    pub address: IpAddr,

    /// Remember the peer as trusted
    #[arg(long)]
    pub trusted: bool,
}

/// Arguments for the devices command
#[derive(Parser)]
pub struct DevicesArgs {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Forget a device and its connections
    #[arg(long, value_name = "DEVICE_ID")]
    pub forget: Option<String>,
}

/// Arguments for the serve command
#[derive(Parser)]
pub struct ServeArgs {
    /// Reject every proposal as not allowed
    #[arg(long, conflicts_with = "allow")]
    pub deny_all: bool,

    /// Only accept proposals from these device ids
    #[arg(long)]
    pub allow: Vec<String>,

    /// Port to listen on (defaults to the communication port)
    #[arg(short, long)]
    pub port: Option<u16>,
}

/// Arguments for the config command
#[derive(Parser)]
pub struct ConfigArgs {
    /// Only print the configuration file path
    #[arg(long)]
    pub path: bool,
}

/// Load configuration, creating it on first run so the device id stays stable.
pub fn load_config() -> Result<Config> {
    Config::load_or_init().context("Failed to load configuration")
}

/// Open the session store named by the configuration.
pub fn open_store(config: &Config) -> Result<Arc<JsonSessionStore>> {
    let path = config.storage_path();
    let store = JsonSessionStore::open_at(path.clone())
        .with_context(|| format!("Failed to open session store at {}", path.display()))?;
    Ok(Arc::new(store))
}

/// Build the share service for `config`.
pub fn share_service(config: &Config) -> Result<ShareService> {
    let store = open_store(config)?;
    let ids = MonotonicIds::seeded_above(store.highest_id()?);
    Ok(ShareService::new(
        store,
        Arc::new(ids),
        config,
    ))
}

/// Interpret `--to`: an IP address, otherwise a stored device id.
pub fn parse_target(to: &str, interface: Option<String>) -> ShareTarget {
    to.parse::<IpAddr>().map_or_else(
        |_| ShareTarget::Device {
            device_id: to.to_string(),
            preferred_interface: interface,
        },
        ShareTarget::Address,
    )
}

/// Wait for `handle`, cancelling it on Ctrl-C.
pub async fn wait_cancellable<T>(handle: TaskHandle<T>) -> Result<T> {
    let token = handle.token().clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!();
            eprintln!("  Cancelling...");
            token.request_cancel();
        }
    });

    let result = handle.join().await;
    ctrl_c.abort();
    Ok(result?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target_address() {
        assert_eq!(
            parse_target("192.168.1.20", Some("wlan0".to_string())),
            ShareTarget::Address("192.168.1.20".parse().unwrap())
        );
    }

    #[test]
    fn test_parse_target_device() {
        assert_eq!(
            parse_target("a1b2", Some("wlan0".to_string())),
            ShareTarget::Device {
                device_id: "a1b2".to_string(),
                preferred_interface: Some("wlan0".to_string()),
            }
        );
    }

    #[test]
    fn test_cli_parses_send() {
        let cli = Cli::try_parse_from([
            "peerdrop", "send", "a.txt", "docs", "--to", "10.0.0.2", "-n", "A",
        ])
        .unwrap();
        let Command::Send(args) = cli.command else {
            panic!("expected send");
        };
        assert_eq!(args.paths.len(), 2);
        assert_eq!(args.name, vec!["A".to_string()]);
    }

    #[test]
    fn test_cli_hotspot_needs_payload() {
        assert!(Cli::try_parse_from(["peerdrop", "hotspot", "Pixel"]).is_err());
        assert!(Cli::try_parse_from(["peerdrop", "hotspot", "Pixel", "--text", "hi"]).is_ok());
    }
}
