//! PeerDrop CLI - offer files or clipboard text to a peer on the local network
//!
//! PeerDrop reaches a peer directly or through the peer's own hotspot and
//! negotiates a transfer session with it.
//!
//! ## Quick Start
//!
//! ```bash
//! # Answer requests (on the receiving device)
//! peerdrop serve
//!
//! # Offer files to it
//! peerdrop send ./document.pdf --to 192.168.1.20
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::unused_async)]

use anyhow::Result;
use clap::Parser;

mod commands;
pub mod ui;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Command::Send(args) => commands::send::run(args).await,
        Command::Clip(args) => commands::clip::run(args).await,
        Command::Hotspot(args) => commands::hotspot::run(args).await,
        Command::Probe(args) => commands::probe::run(args).await,
        Command::Devices(args) => commands::devices::run(args).await,
        Command::Serve(args) => commands::serve::run(args).await,
        Command::Config(args) => commands::config::run(args).await,
    };

    if let Some(hint) = result.as_ref().err().and_then(|e| {
        e.downcast_ref::<peerdrop_core::Error>()
            .and_then(peerdrop_core::Error::suggestion)
    }) {
        eprintln!();
        eprintln!("  {hint}");
        eprintln!();
    }

    result
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default = if verbose {
        "warn,peerdrop=debug,peerdrop_core=debug"
    } else {
        "warn,peerdrop=info,peerdrop_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();

    tracing::debug!("PeerDrop v{}", peerdrop_core::VERSION);
}
