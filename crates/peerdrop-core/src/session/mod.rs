//! Share orchestration.
//!
//! Each user-initiated operation runs as its own background task and is
//! represented by a [`TaskHandle`], which owns the operation's
//! [`CancellationToken`]. Stages run strictly in order:
//!
//! ```text
//! enumerate ─→ [join hotspot] ─→ probe ─→ negotiate
//! ```
//!
//! A hotspot join must succeed before the gateway is probed, and the probe
//! must succeed before a negotiation connects. Results reach the front end
//! only through its [`ShareObserver`].

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::file::{FileEnumerator, SourceRef, TransferItem};
use crate::hotspot::{
    HotspotJoiner, HotspotNetwork, JoinSettings, NmcliWifi, Reachability, TcpReachability,
    WifiControl,
};
use crate::ids::UniqueNumberSource;
use crate::negotiate::{NegotiationOutcome, Negotiator, Proposal};
use crate::observer::{ErrorKind, ShareObserver};
use crate::probe::PeerProbe;
use crate::store::{self, PeerConnection, PeerDevice, SessionStore, StoreRecord};

/// A running background operation.
#[derive(Debug)]
pub struct TaskHandle<T> {
    token: CancellationToken,
    handle: JoinHandle<T>,
}

impl<T> TaskHandle<T> {
    /// Request cancellation of the operation.
    ///
    /// Returns `true` the first time.
    pub fn cancel(&self) -> bool {
        self.token.request_cancel()
    }

    /// The operation's token.
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether the task has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the operation's result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the task panicked or was aborted.
    pub async fn join(self) -> Result<T> {
        self.handle
            .await
            .map_err(|e| Error::Internal(format!("background task failed: {e}")))
    }
}

/// Who to share with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareTarget {
    /// A peer at a known address
    Address(IpAddr),
    /// A stored device, reached through one of its known connections
    Device {
        /// Stored device id
        device_id: String,
        /// Interface to prefer when the device has several connections
        preferred_interface: Option<String>,
    },
    /// A peer hosting its own hotspot
    Hotspot(HotspotNetwork),
}

/// Entry point for sharing: owns the collaborators and spawns operations.
pub struct ShareService<W = NmcliWifi, R = TcpReachability> {
    store: Arc<dyn SessionStore>,
    probe: PeerProbe,
    negotiator: Negotiator,
    joiner: Arc<HotspotJoiner<W, R>>,
    port: u16,
}

impl<W, R> std::fmt::Debug for ShareService<W, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareService")
            .field("negotiator", &self.negotiator)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

impl ShareService {
    /// Service using NetworkManager and TCP reachability checks.
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        ids: Arc<dyn UniqueNumberSource>,
        config: &Config,
    ) -> Self {
        let joiner = HotspotJoiner::new(
            NmcliWifi::new(),
            TcpReachability,
            JoinSettings::from_config(config),
        );
        Self::with_joiner(store, ids, config, joiner)
    }
}

impl<W, R> ShareService<W, R>
where
    W: WifiControl + 'static,
    R: Reachability + 'static,
{
    /// Service using a custom hotspot joiner.
    #[must_use]
    pub fn with_joiner(
        store: Arc<dyn SessionStore>,
        ids: Arc<dyn UniqueNumberSource>,
        config: &Config,
        joiner: HotspotJoiner<W, R>,
    ) -> Self {
        Self {
            probe: PeerProbe::new(Arc::clone(&store), config),
            negotiator: Negotiator::new(Arc::clone(&store), ids, config),
            store,
            joiner: Arc::new(joiner),
            port: config.network.communication_port,
        }
    }

    /// Enumerate `sources` on the blocking pool.
    ///
    /// The result is empty if the operation is cancelled.
    pub fn spawn_enumeration(
        &self,
        sources: Vec<SourceRef>,
        observer: Arc<dyn ShareObserver>,
    ) -> TaskHandle<Vec<TransferItem>> {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let handle = tokio::task::spawn_blocking(move || {
            FileEnumerator::new().enumerate(&sources, &task_token, observer.as_ref())
        });
        TaskHandle { token, handle }
    }

    /// Reach `target` and negotiate `proposal` with it.
    pub fn spawn_share(
        &self,
        target: ShareTarget,
        proposal: Proposal,
        observer: Arc<dyn ShareObserver>,
    ) -> TaskHandle<Result<NegotiationOutcome>> {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let flow = self.flow();
        let handle = tokio::spawn(async move {
            flow.share(target, proposal, &task_token, observer.as_ref())
                .await
        });
        TaskHandle { token, handle }
    }

    /// Negotiate with an already resolved peer.
    pub fn spawn_negotiation(
        &self,
        mut device: PeerDevice,
        connection: PeerConnection,
        proposal: Proposal,
        observer: Arc<dyn ShareObserver>,
    ) -> TaskHandle<Result<NegotiationOutcome>> {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let negotiator = self.negotiator.clone();
        let handle = tokio::spawn(async move {
            negotiator
                .negotiate(
                    &mut device,
                    &connection,
                    proposal,
                    &task_token,
                    observer.as_ref(),
                )
                .await
        });
        TaskHandle { token, handle }
    }

    /// Probe `ip` and register the peer.
    ///
    /// Resolves to `None` if cancelled before the peer answered.
    pub fn spawn_probe(
        &self,
        ip: IpAddr,
        trusted: bool,
    ) -> TaskHandle<Result<Option<(PeerDevice, PeerConnection)>>> {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let probe = self.probe.clone();
        let addr = SocketAddr::new(ip, self.port);
        let handle = tokio::spawn(async move {
            tokio::select! {
                result = probe.probe(addr, trusted) => result.map(Some),
                () = task_token.cancelled() => Ok(None),
            }
        });
        TaskHandle { token, handle }
    }

    /// The store shared by all operations.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    fn flow(&self) -> ShareFlow<W, R> {
        ShareFlow {
            store: Arc::clone(&self.store),
            probe: self.probe.clone(),
            negotiator: self.negotiator.clone(),
            joiner: Arc::clone(&self.joiner),
            port: self.port,
        }
    }
}

/// Everything one share operation needs, owned by its task.
struct ShareFlow<W, R> {
    store: Arc<dyn SessionStore>,
    probe: PeerProbe,
    negotiator: Negotiator,
    joiner: Arc<HotspotJoiner<W, R>>,
    port: u16,
}

impl<W: WifiControl, R: Reachability> ShareFlow<W, R> {
    async fn share(
        &self,
        target: ShareTarget,
        proposal: Proposal,
        token: &CancellationToken,
        observer: &dyn ShareObserver,
    ) -> Result<NegotiationOutcome> {
        if proposal.is_empty() {
            observer.on_error(ErrorKind::Rejected, "Nothing to send.");
            return Err(Error::NothingToSend);
        }

        let resolved = match self.resolve(target, token, observer).await {
            Ok(resolved) => resolved,
            Err(e) => {
                observer.on_error(ErrorKind::from(&e), &e.to_string());
                return Err(e);
            }
        };

        let Some((mut device, connection)) = resolved else {
            return Ok(NegotiationOutcome::Cancelled);
        };

        if token.is_cancelled() {
            return Ok(NegotiationOutcome::Cancelled);
        }

        if let Err(e) = store::prepare_device(self.store.as_ref(), &mut device) {
            observer.on_error(ErrorKind::Storage, &e.to_string());
            return Err(e);
        }

        self.negotiator
            .negotiate(&mut device, &connection, proposal, token, observer)
            .await
    }

    /// Find the peer. `None` means the operation was cancelled on the way.
    async fn resolve(
        &self,
        target: ShareTarget,
        token: &CancellationToken,
        observer: &dyn ShareObserver,
    ) -> Result<Option<(PeerDevice, PeerConnection)>> {
        match target {
            ShareTarget::Address(ip) => {
                self.probe_until_cancelled(SocketAddr::new(ip, self.port), false, token)
                    .await
            }
            ShareTarget::Device {
                device_id,
                preferred_interface,
            } => {
                let mut device = self.store.device(&device_id)?;
                let connections = self.store.connections(&device_id)?;
                let connection =
                    store::select_connection(&connections, preferred_interface.as_deref())
                        .ok_or_else(|| {
                            Error::InvalidInput(format!(
                                "no known address for {}",
                                device.nickname
                            ))
                        })?;
                let addr = SocketAddr::new(connection.ip_address, self.port);
                let probed = self
                    .probe_until_cancelled(addr, device.is_trusted, token)
                    .await;
                if probed.is_err() {
                    device.touch();
                    if let Err(e) = self.store.publish(StoreRecord::Device(device)) {
                        tracing::warn!("Failed to record usage of {}: {}", device_id, e);
                    }
                }
                probed
            }
            ShareTarget::Hotspot(network) => {
                if !self.joiner.join(&network, token, observer).await? {
                    if token.is_cancelled() {
                        return Ok(None);
                    }
                    return Err(Error::HotspotUnreachable(network.ssid));
                }
                if token.is_cancelled() {
                    return Ok(None);
                }
                self.probe_until_cancelled(self.joiner.gateway(), true, token)
                    .await
            }
        }
    }

    async fn probe_until_cancelled(
        &self,
        addr: SocketAddr,
        trusted: bool,
        token: &CancellationToken,
    ) -> Result<Option<(PeerDevice, PeerConnection)>> {
        tokio::select! {
            result = self.probe.probe(addr, trusted) => result.map(Some),
            () = token.cancelled() => {
                tracing::debug!("Probe of {} abandoned on cancellation", addr);
                Ok(None)
            }
        }
    }
}
