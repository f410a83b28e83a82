//! Joining a peer's wireless hotspot.
//!
//! A peer that hosts its own hotspot always sits on the same gateway
//! address. [`HotspotJoiner`] associates with the network and polls the
//! gateway once per interval until it answers, the ceiling is reached, or
//! the operation is cancelled.
//!
//! Association itself is abstracted behind [`WifiControl`] so the poll loop
//! can be driven without a radio; [`NmcliWifi`] is the NetworkManager
//! implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::{Instant, MissedTickBehavior};

use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::observer::{Progress, ShareObserver};

/// A wireless network hosted by a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotspotNetwork {
    /// Network name
    pub ssid: String,
    /// Passphrase, if the network is protected
    pub password: Option<String>,
}

impl HotspotNetwork {
    /// An open network.
    pub fn open(ssid: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: None,
        }
    }

    /// A protected network.
    pub fn protected(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: Some(password.into()),
        }
    }
}

/// Controls the wireless interface.
pub trait WifiControl: Send + Sync {
    /// Whether the device is currently associated with `network`.
    fn is_associated(&self, network: &HotspotNetwork) -> impl Future<Output = bool> + Send;

    /// Start associating with `network`.
    fn associate(&self, network: &HotspotNetwork) -> impl Future<Output = Result<()>> + Send;
}

/// Checks whether an address answers.
pub trait Reachability: Send + Sync {
    /// `true` if `addr` answered within `timeout`.
    fn ping(&self, addr: SocketAddr, timeout: Duration) -> impl Future<Output = bool> + Send;
}

/// Reachability by TCP connect.
///
/// An active refusal still proves the host is up, so it counts as
/// reachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpReachability;

impl Reachability for TcpReachability {
    async fn ping(&self, addr: SocketAddr, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => e.kind() == std::io::ErrorKind::ConnectionRefused,
            Err(_) => false,
        }
    }
}

/// [`WifiControl`] through NetworkManager's `nmcli`.
#[derive(Debug, Clone, Default)]
pub struct NmcliWifi {
    /// Restrict to one wireless device (`ifname`)
    pub interface: Option<String>,
}

impl NmcliWifi {
    /// Use whichever wireless device NetworkManager picks.
    #[must_use]
    pub const fn new() -> Self {
        Self { interface: None }
    }
}

impl WifiControl for NmcliWifi {
    async fn is_associated(&self, network: &HotspotNetwork) -> bool {
        let output = Command::new("nmcli")
            .args(["-t", "-f", "ACTIVE,SSID", "dev", "wifi"])
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                active_ssids(&String::from_utf8_lossy(&output.stdout))
                    .any(|ssid| ssid == network.ssid)
            }
            Ok(output) => {
                tracing::debug!(
                    "nmcli exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                false
            }
            Err(e) => {
                tracing::debug!("Failed to run nmcli: {}", e);
                false
            }
        }
    }

    async fn associate(&self, network: &HotspotNetwork) -> Result<()> {
        let mut command = Command::new("nmcli");
        command.args(["dev", "wifi", "connect", &network.ssid]);
        if let Some(password) = &network.password {
            command.args(["password", password]);
        }
        if let Some(interface) = &self.interface {
            command.args(["ifname", interface]);
        }

        let output = command
            .output()
            .await
            .map_err(|e| Error::AssociationFailed(format!("failed to run nmcli: {e}")))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(Error::AssociationFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}

/// SSIDs marked active in `nmcli -t -f ACTIVE,SSID` output.
fn active_ssids(output: &str) -> impl Iterator<Item = String> + '_ {
    output.lines().filter_map(|line| {
        line.strip_prefix("yes:")
            .map(|ssid| ssid.replace("\\:", ":").replace("\\\\", "\\"))
    })
}

/// Timing of the join loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinSettings {
    /// Address polled for reachability
    pub gateway: SocketAddr,
    /// Delay between polls
    pub poll_interval: Duration,
    /// Upper bound for one poll
    pub ping_timeout: Duration,
    /// Give up after this long
    pub ceiling: Duration,
}

impl JoinSettings {
    /// Settings from configuration.
    #[must_use]
    pub const fn from_config(config: &Config) -> Self {
        Self {
            gateway: config.peer_addr(config.hotspot.gateway),
            poll_interval: config.hotspot.poll_interval,
            ping_timeout: config.hotspot.ping_timeout,
            ceiling: config.hotspot.ceiling,
        }
    }
}

/// Drives the device onto a peer's hotspot.
#[derive(Debug, Clone)]
pub struct HotspotJoiner<W = NmcliWifi, R = TcpReachability> {
    wifi: W,
    reachability: R,
    settings: JoinSettings,
}

impl<W: WifiControl, R: Reachability> HotspotJoiner<W, R> {
    /// Create a joiner.
    pub const fn new(wifi: W, reachability: R, settings: JoinSettings) -> Self {
        Self {
            wifi,
            reachability,
            settings,
        }
    }

    /// The wireless control in use.
    pub const fn wifi(&self) -> &W {
        &self.wifi
    }

    /// The gateway handed to the probe once the join succeeds.
    pub const fn gateway(&self) -> SocketAddr {
        self.settings.gateway
    }

    /// Join `network` and wait for its gateway.
    ///
    /// Returns `Ok(true)` as soon as the device is associated and the
    /// gateway answers, `Ok(false)` on cancellation or once the ceiling is
    /// reached. Progress is reported once per poll as elapsed whole seconds
    /// against the ceiling.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AssociationFailed`] if association cannot be started.
    pub async fn join(
        &self,
        network: &HotspotNetwork,
        token: &CancellationToken,
        observer: &dyn ShareObserver,
    ) -> Result<bool> {
        let JoinSettings {
            gateway,
            poll_interval,
            ping_timeout,
            ceiling,
        } = self.settings;
        let start = Instant::now();

        if !self.wifi.is_associated(network).await {
            tracing::info!("Associating with hotspot '{}'", network.ssid);
            self.wifi.associate(network).await?;
        }

        let mut ticks = tokio::time::interval_at(start + poll_interval, poll_interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticks.tick() => {}
                () = token.cancelled() => {
                    tracing::debug!("Hotspot join cancelled");
                    return Ok(false);
                }
            }

            let elapsed = start.elapsed().min(ceiling);
            observer.on_progress(Progress::new(elapsed.as_secs(), ceiling.as_secs()));

            let reachable = self.wifi.is_associated(network).await
                && self.reachability.ping(gateway, ping_timeout).await;

            if token.is_cancelled() {
                tracing::debug!("Hotspot join cancelled");
                return Ok(false);
            }

            if reachable {
                tracing::info!(
                    "Hotspot '{}' reachable after {}s",
                    network.ssid,
                    elapsed.as_secs()
                );
                observer.on_reachable();
                return Ok(true);
            }

            if elapsed >= ceiling {
                tracing::warn!(
                    "Hotspot '{}' not reachable within {}s",
                    network.ssid,
                    ceiling.as_secs()
                );
                return Ok(false);
            }
        }
    }
}
