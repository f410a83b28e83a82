//! Asking a peer who it is.
//!
//! The probe sends an acquaintance request to an address and records the
//! answer: the peer's [`PeerDevice`] and the [`PeerConnection`] it was
//! reached through.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, LocalDevice};
use crate::error::{Error, Result};
use crate::protocol::{self, MessageType, Request, RequestBody, Response};
use crate::store::{PeerConnection, PeerDevice, SessionStore, StoreRecord};

/// Queries peers for their identity and registers them.
#[derive(Clone)]
pub struct PeerProbe {
    store: Arc<dyn SessionStore>,
    local: LocalDevice,
    connect_timeout: Duration,
    response_timeout: Duration,
}

impl std::fmt::Debug for PeerProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerProbe")
            .field("local", &self.local)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl PeerProbe {
    /// Create a probe.
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, config: &Config) -> Self {
        Self {
            store,
            local: config.local_device(),
            connect_timeout: config.network.connect_timeout,
            response_timeout: config.network.response_timeout,
        }
    }

    /// Probe `addr` and persist what it says about itself.
    ///
    /// `trusted` marks peers met in a higher-trust setting, such as a
    /// freshly joined hotspot. An existing record keeps its restriction and
    /// only ever gains trust here.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer cannot be reached, refuses to identify
    /// itself, answers with something malformed, or the store fails.
    pub async fn probe(
        &self,
        addr: SocketAddr,
        trusted: bool,
    ) -> Result<(PeerDevice, PeerConnection)> {
        let mut stream = protocol::connect(addr, self.connect_timeout).await?;
        let local_ip = stream.local_addr()?.ip();

        let request = Request::new(&self.local.serial, RequestBody::Acquaintance);
        protocol::write_message(
            &mut stream,
            MessageType::Request,
            &request,
            self.connect_timeout,
        )
        .await?;

        let response: Response =
            protocol::read_message(&mut stream, MessageType::Response, self.response_timeout)
                .await?;
        drop(stream);

        if !response.result {
            return Err(Error::AcquaintanceRefused(addr));
        }

        let (Some(serial), Some(nickname)) = (response.serial, response.nickname) else {
            return Err(Error::ProtocolError(
                "acquaintance response without serial or nickname".to_string(),
            ));
        };

        let device = match self.store.device(&serial) {
            Ok(mut known) => {
                known.nickname = nickname;
                known.is_trusted |= trusted;
                known.touch();
                known
            }
            Err(Error::RecordNotFound { .. }) => PeerDevice::new(&serial, nickname).trusted(trusted),
            Err(e) => return Err(e),
        };

        let connection = PeerConnection::new(&serial, addr.ip(), interface_name(local_ip));

        self.store.publish(StoreRecord::Device(device.clone()))?;
        self.store
            .publish(StoreRecord::Connection(connection.clone()))?;

        tracing::info!(
            "Peer {} ({}) reachable at {} via {}",
            device.nickname,
            device.device_id,
            addr,
            connection.network_interface_name
        );

        Ok((device, connection))
    }
}

/// Name of the local interface holding `ip`, or the address itself.
#[must_use]
pub fn interface_name(ip: IpAddr) -> String {
    match local_ip_address::list_afinet_netifas() {
        Ok(interfaces) => interfaces
            .into_iter()
            .find(|(_, addr)| *addr == ip)
            .map_or_else(|| ip.to_string(), |(name, _)| name),
        Err(e) => {
            tracing::debug!("Failed to list network interfaces: {}", e);
            ip.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;
    use crate::store::JsonSessionStore;

    async fn answer_once(listener: TcpListener, response: Response) {
        let (mut stream, _) = listener.accept().await.unwrap();
        let request: Request =
            protocol::read_message(&mut stream, MessageType::Request, Duration::from_secs(5))
                .await
                .unwrap();
        assert_eq!(request.body, RequestBody::Acquaintance);
        protocol::write_message(
            &mut stream,
            MessageType::Response,
            &response,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    }

    fn create_probe() -> (PeerProbe, Arc<JsonSessionStore>) {
        let store = Arc::new(JsonSessionStore::in_memory());
        let probe = PeerProbe::new(store.clone(), &Config::default());
        (probe, store)
    }

    #[tokio::test]
    async fn test_probe_registers_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(answer_once(listener, Response::identity("peer-1", "Pixel")));

        let (probe, store) = create_probe();
        let (device, connection) = probe.probe(addr, true).await.unwrap();
        server.await.unwrap();

        assert_eq!(device.device_id, "peer-1");
        assert_eq!(device.nickname, "Pixel");
        assert!(device.is_trusted);
        assert_eq!(connection.ip_address, addr.ip());
        assert!(!connection.network_interface_name.is_empty());

        assert_eq!(store.device("peer-1").unwrap().nickname, "Pixel");
        assert_eq!(store.connections("peer-1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_probe_keeps_restriction() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(answer_once(listener, Response::identity("peer-1", "Renamed")));

        let (probe, store) = create_probe();
        let mut known = PeerDevice::new("peer-1", "Old").trusted(true);
        known.is_restricted = true;
        store.publish(known.into()).unwrap();

        let (device, _) = probe.probe(addr, false).await.unwrap();
        server.await.unwrap();

        assert_eq!(device.nickname, "Renamed");
        assert!(device.is_restricted);
        assert!(device.is_trusted);
    }

    #[tokio::test]
    async fn test_probe_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(answer_once(
            listener,
            Response::rejected(&protocol::ErrorCode::NotAllowed),
        ));

        let (probe, store) = create_probe();
        let err = probe.probe(addr, false).await.unwrap_err();
        server.await.unwrap();

        assert!(matches!(err, Error::AcquaintanceRefused(a) if a == addr));
        assert!(store.devices().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_probe_nobody_listening() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (probe, _) = create_probe();
        assert!(matches!(
            probe.probe(addr, false).await,
            Err(Error::ConnectionFailed { .. })
        ));
    }

    #[test]
    fn test_interface_name_fallback() {
        let ip: IpAddr = "203.0.113.77".parse().unwrap();
        assert_eq!(interface_name(ip), "203.0.113.77");
    }
}
