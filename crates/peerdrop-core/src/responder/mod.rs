//! The answering side of the control protocol.
//!
//! A [`Responder`] listens on the communication port, identifies itself to
//! acquaintance requests and lets a [`RequestPolicy`] decide on transfer
//! and clipboard proposals. Every connection carries exactly one request.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::cancel::CancellationToken;
use crate::config::LocalDevice;
use crate::error::Result;
use crate::protocol::{self, ErrorCode, MessageType, Request, RequestBody, Response};

/// What to answer to a proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Answer `result: true`
    Accept,
    /// Answer `result: false` with a code
    Reject(ErrorCode),
}

/// Decides on incoming proposals.
pub trait RequestPolicy: Send + Sync {
    /// Decide on a transfer or clipboard request.
    fn decide(&self, request: &Request) -> Decision;
}

/// Accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl RequestPolicy for AcceptAll {
    fn decide(&self, _request: &Request) -> Decision {
        Decision::Accept
    }
}

/// Rejects everything as not allowed.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

impl RequestPolicy for DenyAll {
    fn decide(&self, _request: &Request) -> Decision {
        Decision::Reject(ErrorCode::NotAllowed)
    }
}

/// Accepts only the listed senders.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    serials: HashSet<String>,
}

impl AllowList {
    /// Allow the given serials.
    pub fn new<I, S>(serials: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            serials: serials.into_iter().map(Into::into).collect(),
        }
    }
}

impl RequestPolicy for AllowList {
    fn decide(&self, request: &Request) -> Decision {
        if self.serials.contains(&request.serial) {
            Decision::Accept
        } else {
            Decision::Reject(ErrorCode::NotAllowed)
        }
    }
}

/// A request the responder answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incoming {
    /// Where it came from
    pub from: SocketAddr,
    /// What was asked
    pub request: Request,
    /// What was answered
    pub decision: Decision,
}

/// Control-protocol server.
pub struct Responder {
    listener: TcpListener,
    local: LocalDevice,
    policy: Arc<dyn RequestPolicy>,
    timeout: Duration,
    events: Option<mpsc::UnboundedSender<Incoming>>,
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("local", &self.local)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Responder {
    /// Bind a responder to `addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(
        addr: SocketAddr,
        local: LocalDevice,
        policy: Arc<dyn RequestPolicy>,
        timeout: Duration,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        tracing::debug!("Responder listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            local,
            policy,
            timeout,
            events: None,
        })
    }

    /// The bound address.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Receive every answered request.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Incoming> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    /// Answer connections until `token` is cancelled.
    ///
    /// Each connection is handled on its own task; a misbehaving client
    /// only ends its own connection.
    ///
    /// # Errors
    ///
    /// Returns an error if accepting fails.
    pub async fn serve(self, token: CancellationToken) -> Result<()> {
        let shared = Arc::new(Handler {
            local: self.local,
            policy: self.policy,
            timeout: self.timeout,
            events: self.events,
        });

        loop {
            let (stream, from) = tokio::select! {
                accepted = self.listener.accept() => accepted?,
                () = token.cancelled() => {
                    tracing::debug!("Responder stopped");
                    return Ok(());
                }
            };

            let handler = Arc::clone(&shared);
            tokio::spawn(async move {
                if let Err(e) = handler.handle(stream, from).await {
                    tracing::warn!("Request from {} failed: {}", from, e);
                }
            });
        }
    }
}

struct Handler {
    local: LocalDevice,
    policy: Arc<dyn RequestPolicy>,
    timeout: Duration,
    events: Option<mpsc::UnboundedSender<Incoming>>,
}

impl Handler {
    async fn handle(&self, mut stream: TcpStream, from: SocketAddr) -> Result<()> {
        protocol::configure_tcp_keepalive(&stream)?;

        let request: Request =
            protocol::read_message(&mut stream, MessageType::Request, self.timeout).await?;

        let (response, decision) = match &request.body {
            RequestBody::Acquaintance => (
                Response::identity(&self.local.serial, &self.local.nickname),
                Decision::Accept,
            ),
            RequestBody::Transfer { .. } | RequestBody::Clipboard { .. } => {
                let decision = self.policy.decide(&request);
                let response = match &decision {
                    Decision::Accept => Response::accepted(),
                    Decision::Reject(code) => Response::rejected(code),
                };
                (response, decision)
            }
        };

        tracing::info!(
            "{} request from {} ({}): {:?}",
            request.body.kind(),
            request.serial,
            from,
            decision
        );

        protocol::write_message(&mut stream, MessageType::Response, &response, self.timeout)
            .await?;

        if let Some(events) = &self.events {
            let _ = events.send(Incoming {
                from,
                request,
                decision,
            });
        }

        Ok(())
    }
}
