//! Probe command implementation.

use anyhow::Result;

use super::ProbeArgs;

/// Run the probe command.
pub async fn run(args: ProbeArgs) -> Result<()> {
    let config = super::load_config()?;
    let service = super::share_service(&config)?;

    let handle = service.spawn_probe(args.address, args.trusted);
    let Some((device, connection)) = super::wait_cancellable(handle).await?? else {
        println!("  Cancelled.");
        return Ok(());
    };

    println!();
    println!("  {} ({})", device.nickname, device.device_id);
    println!(
        "  Reachable at {} via {}",
        connection.ip_address, connection.network_interface_name
    );
    if device.is_trusted {
        println!("  Trusted");
    }
    Ok(())
}
