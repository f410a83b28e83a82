//! Clip command implementation.

use std::sync::Arc;

use anyhow::Result;

use peerdrop_core::negotiate::Proposal;

use super::ClipArgs;
use crate::ui::ConsoleObserver;

/// Run the clip command.
pub async fn run(args: ClipArgs) -> Result<()> {
    let config = super::load_config()?;
    let service = super::share_service(&config)?;
    let observer = Arc::new(ConsoleObserver::new(args.quiet));

    let target = super::parse_target(&args.to, args.interface);
    let handle = service.spawn_share(target, Proposal::Clipboard(args.text), observer);
    let outcome = super::wait_cancellable(handle).await??;

    super::send::report(&outcome);
    Ok(())
}
