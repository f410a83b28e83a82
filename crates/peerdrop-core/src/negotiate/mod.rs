//! Transfer negotiation.
//!
//! A negotiation opens one control connection to a peer, proposes either a
//! batch of files or a piece of clipboard text, and reads the answer.
//!
//! ```text
//! Idle → Connecting → SendingProposal → AwaitingResponse ─┬→ Committing ─→ Done
//!                                                         ├→ Rejected ───→ Done
//!                                                         └→ Failed ─────→ Done
//! ```
//!
//! An accepted file batch becomes one [`TransferGroup`] plus one
//! [`TransferTransaction`] per file. The group is written first. If the
//! operation is cancelled while the transactions are being written, the
//! group is removed again, taking the already written transactions with it.
//!
//! Whatever the outcome, the peer's `last_usage` is refreshed and persisted.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::cancel::CancellationToken;
use crate::config::{Config, LocalDevice};
use crate::error::{Error, Result};
use crate::file::TransferItem;
use crate::ids::UniqueNumberSource;
use crate::observer::{ErrorKind, ShareObserver};
use crate::protocol::{self, ErrorCode, FileEntry, MessageType, Request, RequestBody, Response};
use crate::store::{
    PeerConnection, PeerDevice, RecordKey, SessionStore, StoreRecord, TransferDirection,
    TransferGroup, TransferTransaction,
};

/// Message shown for any rejection other than "not allowed".
pub const GENERIC_REJECTION: &str = "Something went wrong. Please try again.";

/// What is offered to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Proposal {
    /// A batch of files, in order
    Files(Vec<TransferItem>),
    /// Clipboard text
    Clipboard(String),
}

impl Proposal {
    /// Whether there is anything to offer.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Files(items) => items.is_empty(),
            Self::Clipboard(_) => false,
        }
    }
}

/// States a negotiation passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// Not started
    Idle,
    /// Opening the control connection
    Connecting,
    /// Writing the proposal
    SendingProposal,
    /// Waiting for the peer's answer
    AwaitingResponse,
    /// Registering an accepted file batch
    Committing,
    /// The peer said no
    Rejected,
    /// Something went wrong
    Failed,
    /// Finished
    Done,
}

impl std::fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::SendingProposal => write!(f, "sending proposal"),
            Self::AwaitingResponse => write!(f, "awaiting response"),
            Self::Committing => write!(f, "committing"),
            Self::Rejected => write!(f, "rejected"),
            Self::Failed => write!(f, "failed"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// How a negotiation ended, short of an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationOutcome {
    /// The file batch was accepted and fully registered
    SessionReady {
        /// The registered group
        group_id: i64,
        /// Number of transactions registered under it
        transactions: usize,
    },
    /// The clipboard text was accepted
    ClipboardDelivered,
    /// The peer rejected the proposal
    Rejected {
        /// The peer's reason
        code: ErrorCode,
        /// What to tell the user
        message: String,
    },
    /// The operation was cancelled; nothing was registered
    Cancelled,
}

/// User-facing explanation for a rejection.
#[must_use]
pub fn rejection_message(code: &ErrorCode, peer: &str, local: &str) -> String {
    match code {
        ErrorCode::NotAllowed => format!(
            "{peer} does not allow {local} to send it anything. \
             Allow this device on {peer} and try again."
        ),
        ErrorCode::Other(_) => GENERIC_REJECTION.to_string(),
    }
}

/// Runs negotiations against peers.
#[derive(Clone)]
pub struct Negotiator {
    store: Arc<dyn SessionStore>,
    ids: Arc<dyn UniqueNumberSource>,
    local: LocalDevice,
    port: u16,
    connect_timeout: Duration,
    response_timeout: Duration,
}

impl std::fmt::Debug for Negotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Negotiator")
            .field("local", &self.local)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

/// A proposal turned into its wire form, with the ids it was given.
struct Prepared {
    body: RequestBody,
    group: Option<(i64, Vec<(i64, TransferItem)>)>,
}

impl Negotiator {
    /// Create a negotiator.
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        ids: Arc<dyn UniqueNumberSource>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            ids,
            local: config.local_device(),
            port: config.network.communication_port,
            connect_timeout: config.network.connect_timeout,
            response_timeout: config.network.response_timeout,
        }
    }

    /// Negotiate `proposal` with `device` through `connection`.
    ///
    /// Rejections and cancellation are outcomes, not errors. On every path
    /// past the empty-proposal check `device.last_usage` is refreshed and
    /// the device republished.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NothingToSend`] for an empty file batch without
    /// connecting. Otherwise returns an error if the peer cannot be
    /// reached, answers with something malformed, or the store fails.
    pub async fn negotiate(
        &self,
        device: &mut PeerDevice,
        connection: &PeerConnection,
        proposal: Proposal,
        token: &CancellationToken,
        observer: &dyn ShareObserver,
    ) -> Result<NegotiationOutcome> {
        if proposal.is_empty() {
            return Err(Error::NothingToSend);
        }

        let result = self
            .run(device, connection, proposal, token, observer)
            .await;

        device.touch();
        let touched = self.store.publish(StoreRecord::Device(device.clone()));

        match (result, touched) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Ok(_), Err(e)) => {
                observer.on_error(ErrorKind::Storage, &e.to_string());
                Err(e)
            }
            (Err(e), touched) => {
                if let Err(store_err) = touched {
                    tracing::warn!("Failed to update {}: {}", device.device_id, store_err);
                }
                observer.on_error(ErrorKind::from(&e), &e.to_string());
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        device: &PeerDevice,
        connection: &PeerConnection,
        proposal: Proposal,
        token: &CancellationToken,
        observer: &dyn ShareObserver,
    ) -> Result<NegotiationOutcome> {
        let mut state = NegotiationState::Idle;
        let addr = SocketAddr::new(connection.ip_address, self.port);

        if token.is_cancelled() {
            return Ok(NegotiationOutcome::Cancelled);
        }

        transition(&mut state, NegotiationState::Connecting);
        let connected = tokio::select! {
            result = protocol::connect(addr, self.connect_timeout) => result,
            () = token.cancelled() => return Ok(cancelled(&mut state)),
        };
        let mut stream = connected.inspect_err(|_| transition(&mut state, NegotiationState::Failed))?;

        transition(&mut state, NegotiationState::SendingProposal);
        let prepared = self.prepare(proposal);
        let request = Request::new(&self.local.serial, prepared.body);
        protocol::write_message(
            &mut stream,
            MessageType::Request,
            &request,
            self.connect_timeout,
        )
        .await
        .inspect_err(|_| transition(&mut state, NegotiationState::Failed))?;

        transition(&mut state, NegotiationState::AwaitingResponse);
        let response: Response = tokio::select! {
            result = protocol::read_message(&mut stream, MessageType::Response, self.response_timeout) => {
                result.inspect_err(|_| transition(&mut state, NegotiationState::Failed))?
            }
            () = token.cancelled() => return Ok(cancelled(&mut state)),
        };
        drop(stream);

        if let Some(code) = response.error_code() {
            transition(&mut state, NegotiationState::Rejected);
            let message = rejection_message(&code, &device.nickname, &self.local.nickname);
            let kind = match code {
                ErrorCode::NotAllowed => ErrorKind::NotAllowed,
                ErrorCode::Other(_) => ErrorKind::Rejected,
            };
            tracing::info!("{} rejected the proposal ({})", device.nickname, code);
            observer.on_error(kind, &message);
            transition(&mut state, NegotiationState::Done);
            return Ok(NegotiationOutcome::Rejected { code, message });
        }

        let Some((group_id, files)) = prepared.group else {
            tracing::info!("Clipboard text delivered to {}", device.nickname);
            transition(&mut state, NegotiationState::Done);
            return Ok(NegotiationOutcome::ClipboardDelivered);
        };

        transition(&mut state, NegotiationState::Committing);
        let outcome = self
            .commit(group_id, files, device, connection, token)
            .inspect_err(|_| transition(&mut state, NegotiationState::Failed))?;

        if let NegotiationOutcome::SessionReady { transactions, .. } = outcome {
            tracing::info!(
                "Session {} ready with {} transactions for {}",
                group_id,
                transactions,
                device.nickname
            );
            observer.on_session_ready(group_id);
        }
        transition(&mut state, NegotiationState::Done);
        Ok(outcome)
    }

    /// Assign fresh ids and build the request body.
    fn prepare(&self, proposal: Proposal) -> Prepared {
        match proposal {
            Proposal::Clipboard(text) => Prepared {
                body: RequestBody::Clipboard { text },
                group: None,
            },
            Proposal::Files(items) => {
                let group_id = self.ids.next();
                let files: Vec<(i64, TransferItem)> =
                    items.into_iter().map(|item| (self.ids.next(), item)).collect();
                let entries = files
                    .iter()
                    .map(|(request_id, item)| FileEntry {
                        name: item.friendly_name.clone(),
                        size: item.size_bytes,
                        request_id: *request_id,
                        mime: item.mime_type.clone(),
                        directory: item.relative_directory.clone(),
                    })
                    .collect();
                Prepared {
                    body: RequestBody::Transfer {
                        group_id,
                        files: entries,
                    },
                    group: Some((group_id, files)),
                }
            }
        }
    }

    /// Register an accepted batch, rolling it back on cancellation.
    fn commit(
        &self,
        group_id: i64,
        files: Vec<(i64, TransferItem)>,
        device: &PeerDevice,
        connection: &PeerConnection,
        token: &CancellationToken,
    ) -> Result<NegotiationOutcome> {
        let group = TransferGroup::new(
            group_id,
            &device.device_id,
            &connection.network_interface_name,
        );
        self.store.publish(StoreRecord::Group(group))?;

        let total = files.len();
        for (request_id, item) in files {
            if token.is_cancelled() {
                tracing::warn!("Cancelled while registering session {}, rolling back", group_id);
                self.store.remove(&RecordKey::Group(group_id))?;
                return Ok(NegotiationOutcome::Cancelled);
            }

            let transaction = TransferTransaction {
                request_id,
                group_id,
                file_name: item.friendly_name,
                source_reference: item.source_reference.to_string_lossy().into_owned(),
                mime_type: item.mime_type,
                size_bytes: item.size_bytes,
                direction: TransferDirection::Outgoing,
                relative_directory: item.relative_directory,
            };

            if let Err(e) = self.store.publish(StoreRecord::Transaction(transaction)) {
                tracing::warn!("Failed to register session {}, rolling back", group_id);
                if let Err(rollback) = self.store.remove(&RecordKey::Group(group_id)) {
                    tracing::warn!("Rollback of session {} failed: {}", group_id, rollback);
                }
                return Err(e);
            }
        }

        Ok(NegotiationOutcome::SessionReady {
            group_id,
            transactions: total,
        })
    }
}

fn transition(state: &mut NegotiationState, next: NegotiationState) {
    tracing::debug!("Negotiation {} -> {}", state, next);
    *state = next;
}

fn cancelled(state: &mut NegotiationState) -> NegotiationOutcome {
    tracing::debug!("Negotiation cancelled while {}", state);
    transition(state, NegotiationState::Done);
    NegotiationOutcome::Cancelled
}
