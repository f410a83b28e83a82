//! Hotspot command implementation.
//!
//! Joins the peer's own hotspot, waits for its gateway, then offers files
//! or text to the peer behind it.

use std::sync::Arc;

use anyhow::{bail, Result};

use peerdrop_core::file::SourceRef;
use peerdrop_core::hotspot::{
    HotspotJoiner, HotspotNetwork, JoinSettings, NmcliWifi, TcpReachability,
};
use peerdrop_core::negotiate::Proposal;
use peerdrop_core::{MonotonicIds, ShareService, ShareTarget};

use super::HotspotArgs;
use crate::ui::{self, ConsoleObserver};

/// Run the hotspot command.
pub async fn run(args: HotspotArgs) -> Result<()> {
    let config = super::load_config()?;
    let store = super::open_store(&config)?;
    let joiner = HotspotJoiner::new(
        NmcliWifi {
            interface: args.interface,
        },
        TcpReachability,
        JoinSettings::from_config(&config),
    );
    let ids = MonotonicIds::seeded_above(store.highest_id()?);
    let service = ShareService::with_joiner(
        store,
        Arc::new(ids),
        &config,
        joiner,
    );
    let observer = Arc::new(ConsoleObserver::new(args.quiet));

    let proposal = if let Some(text) = args.text {
        Proposal::Clipboard(text)
    } else {
        let sources = args.paths.into_iter().map(SourceRef::new).collect();
        let enumeration = service.spawn_enumeration(sources, observer.clone());
        let token = enumeration.token().clone();
        let items = super::wait_cancellable(enumeration).await?;
        if token.is_cancelled() {
            println!("  Cancelled.");
            return Ok(());
        }
        if items.is_empty() {
            bail!("None of the given paths could be read");
        }
        if !args.quiet {
            ui::display_items(&items);
        }
        Proposal::Files(items)
    };

    let network = match args.password {
        Some(password) => HotspotNetwork::protected(args.ssid, password),
        None => HotspotNetwork::open(args.ssid),
    };

    if !args.quiet {
        println!("  Joining {}...", network.ssid);
    }

    let handle = service.spawn_share(ShareTarget::Hotspot(network), proposal, observer);
    let outcome = super::wait_cancellable(handle).await??;

    super::send::report(&outcome);
    Ok(())
}
