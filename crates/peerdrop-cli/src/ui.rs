//! UI utilities for PeerDrop CLI.

use std::io::{self, Write};

use peerdrop_core::file::{format_size, TransferItem};
use peerdrop_core::negotiate::NegotiationOutcome;
use peerdrop_core::{ErrorKind, Progress, ShareObserver};

/// Prints observer callbacks to the terminal.
#[derive(Debug, Default)]
pub struct ConsoleObserver {
    quiet: bool,
}

impl ConsoleObserver {
    /// Create an observer; `quiet` suppresses everything but errors.
    #[must_use]
    pub const fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl ShareObserver for ConsoleObserver {
    fn on_progress(&self, progress: Progress) {
        if self.quiet {
            return;
        }
        let mut stderr = io::stderr();
        let _ = write!(stderr, "\r  {}", format_progress(progress));
        let _ = stderr.flush();
    }

    fn on_reachable(&self) {
        if !self.quiet {
            eprintln!();
            eprintln!("  Hotspot reachable");
        }
    }

    fn on_session_ready(&self, group_id: i64) {
        if !self.quiet {
            eprintln!();
            eprintln!("  Session {group_id} ready");
        }
    }

    fn on_error(&self, kind: ErrorKind, message: &str) {
        eprintln!();
        eprintln!("  {kind}: {message}");
    }
}

/// Format a progress reading as `[current/max]`.
pub fn format_progress(progress: Progress) -> String {
    format!("[{}/{}]", progress.current, progress.max)
}

/// Print the items about to be offered.
pub fn display_items(items: &[TransferItem]) {
    let total: u64 = items.iter().map(|item| item.size_bytes).sum();
    println!();
    println!("  Offering {} items ({})", items.len(), format_size(total));
    println!();
    for item in items {
        match &item.relative_directory {
            Some(dir) => println!("    {}/{}", dir, item.friendly_name),
            None => println!("    {}", item.friendly_name),
        }
    }
    println!();
}

/// One-line summary of how a negotiation ended.
pub fn describe_outcome(outcome: &NegotiationOutcome) -> String {
    match outcome {
        NegotiationOutcome::SessionReady {
            group_id,
            transactions,
        } => format!("Accepted: session {group_id} with {transactions} files"),
        NegotiationOutcome::ClipboardDelivered => "Clipboard text delivered".to_string(),
        NegotiationOutcome::Rejected { message, .. } => message.clone(),
        NegotiationOutcome::Cancelled => "Cancelled".to_string(),
    }
}
