//! Serve command implementation.
//!
//! Answers acquaintance requests and proposals on the communication port
//! until interrupted.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};

use peerdrop_core::protocol::RequestBody;
use peerdrop_core::responder::{
    AcceptAll, AllowList, Decision, DenyAll, Incoming, RequestPolicy, Responder,
};
use peerdrop_core::CancellationToken;

use super::ServeArgs;

/// Run the serve command.
pub async fn run(args: ServeArgs) -> Result<()> {
    let config = super::load_config()?;
    let port = args.port.unwrap_or(config.network.communication_port);
    let addr = SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), port);

    let mut responder = Responder::bind(
        addr,
        config.local_device(),
        policy(&args),
        config.network.response_timeout,
    )
    .await
    .with_context(|| format!("Failed to listen on {addr}"))?;
    let mut incoming = responder.subscribe();

    println!();
    println!(
        "  {} ({}) listening on {}",
        config.general.device_name,
        config.general.device_id,
        responder.local_addr()?
    );
    println!("  Press Ctrl-C to stop.");
    println!();

    let token = CancellationToken::new();
    let server = tokio::spawn(responder.serve(token.clone()));

    loop {
        tokio::select! {
            Some(event) = incoming.recv() => display_incoming(&event),
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    token.request_cancel();
    server.await.context("Responder task failed")??;
    Ok(())
}

fn policy(args: &ServeArgs) -> Arc<dyn RequestPolicy> {
    if args.deny_all {
        Arc::new(DenyAll)
    } else if args.allow.is_empty() {
        Arc::new(AcceptAll)
    } else {
        Arc::new(AllowList::new(args.allow.iter().cloned()))
    }
}

fn display_incoming(event: &Incoming) {
    let verdict = match &event.decision {
        Decision::Accept => "accepted".to_string(),
        Decision::Reject(code) => format!("rejected ({code})"),
    };

    match &event.request.body {
        RequestBody::Acquaintance => {
            println!("  {} asked who we are", event.from.ip());
        }
        RequestBody::Transfer { group_id, files } => {
            println!(
                "  {} offered {} files as group {}: {}",
                event.request.serial,
                files.len(),
                group_id,
                verdict
            );
            for file in files {
                println!("    {} ({} bytes, {})", file.name, file.size, file.mime);
            }
        }
        RequestBody::Clipboard { text } => {
            println!("  {} offered clipboard text: {}", event.request.serial, verdict);
            if matches!(event.decision, Decision::Accept) {
                println!("    {text}");
            }
        }
    }
}
