//! Send command implementation.
//!
//! Enumerates the given paths, then reaches the peer and offers the batch.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};

use peerdrop_core::file::SourceRef;
use peerdrop_core::negotiate::{NegotiationOutcome, Proposal};

use super::SendArgs;
use crate::ui::{self, ConsoleObserver};

/// Run the send command.
pub async fn run(args: SendArgs) -> Result<()> {
    let config = super::load_config()?;
    let service = super::share_service(&config)?;
    let observer = Arc::new(ConsoleObserver::new(args.quiet));

    if !args.quiet {
        println!();
        println!("PeerDrop v{}", peerdrop_core::VERSION);
        println!("{}", "-".repeat(37));
    }

    let sources = sources(args.paths, args.name);
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

    let target = super::parse_target(&args.to, args.interface);
    let share = service.spawn_share(target, Proposal::Files(items), observer.clone());
    let outcome = super::wait_cancellable(share).await??;

    report(&outcome);
    Ok(())
}

/// Pair each path with its display name override, if one was given.
fn sources(paths: Vec<PathBuf>, names: Vec<String>) -> Vec<SourceRef> {
    let mut names = names.into_iter();
    paths
        .into_iter()
        .map(|path| match names.next() {
            Some(name) => SourceRef::named(path, name),
            None => SourceRef::new(path),
        })
        .collect()
}

/// Print the outcome; rejections were already reported through the observer.
pub fn report(outcome: &NegotiationOutcome) {
    if !matches!(outcome, NegotiationOutcome::Rejected { .. }) {
        println!();
        println!("  {}", ui::describe_outcome(outcome));
    }
}
