//! Devices command implementation.

use anyhow::{Context, Result};

use peerdrop_core::store::{PeerConnection, PeerDevice, RecordKey};
use peerdrop_core::SessionStore;

use super::DevicesArgs;

/// Run the devices command.
pub async fn run(args: DevicesArgs) -> Result<()> {
    let config = super::load_config()?;
    let store = super::open_store(&config)?;

    if let Some(device_id) = args.forget {
        store
            .remove(&RecordKey::Device(device_id.clone()))
            .with_context(|| format!("Failed to forget {device_id}"))?;
        println!("  Forgot {device_id}");
        return Ok(());
    }

    let devices = store.devices().context("Failed to read devices")?;
    let mut listing = Vec::with_capacity(devices.len());
    for device in devices {
        let connections = store
            .connections(&device.device_id)
            .context("Failed to read connections")?;
        listing.push((device, connections));
    }

    if args.json {
        let entries: Vec<_> = listing
            .iter()
            .map(|(device, connections)| {
                serde_json::json!({
                    "device": device,
                    "connections": connections,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if listing.is_empty() {
        println!("  No known devices.");
        return Ok(());
    }

    println!();
    for (device, connections) in &listing {
        display_device(device, connections);
    }
    Ok(())
}

fn display_device(device: &PeerDevice, connections: &[PeerConnection]) {
    let mut flags = Vec::new();
    if device.is_trusted {
        flags.push("trusted");
    }
    if device.is_restricted {
        flags.push("restricted");
    }

    println!("  {} ({})", device.nickname, device.device_id);
    if !flags.is_empty() {
        println!("    {}", flags.join(", "));
    }
    println!(
        "    Last used {}",
        device
            .last_usage
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M")
    );
    for connection in connections {
        println!(
            "    {} via {}",
            connection.ip_address, connection.network_interface_name
        );
    }
    println!();
}
