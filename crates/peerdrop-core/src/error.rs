//! Failures of the connect, probe, negotiate and persist steps.
//!
//! A peer's rejection and a user's cancellation are not errors; they are
//! reported as a [`NegotiationOutcome`](crate::negotiate::NegotiationOutcome).

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// A specialized `Result` type for PeerDrop operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for PeerDrop.
#[derive(Error, Debug)]
pub enum Error {
    /// Source reference does not exist (E001)
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Source reference cannot be read (E002)
    #[error("cannot read '{0}': permission denied")]
    PermissionDenied(String),

    /// Source reference exists but its content cannot be inspected (E003)
    #[error("content of '{0}' is unreadable or corrupted")]
    Corrupted(String),

    /// Control connection could not be established (E004)
    #[error("could not connect to {addr}: {reason}")]
    ConnectionFailed {
        /// Address of the peer
        addr: SocketAddr,
        /// Underlying reason
        reason: String,
    },

    /// Hotspot gateway never became reachable (E005)
    #[error("hotspot '{0}' did not become reachable")]
    HotspotUnreachable(String),

    /// Associating with a wireless network failed
    #[error("wireless association failed: {0}")]
    AssociationFailed(String),

    /// A proposal without any items was about to be sent
    #[error("nothing to send")]
    NothingToSend,

    /// Frame or document did not follow PDCP
    #[error("invalid protocol message: {0}")]
    ProtocolError(String),

    /// Peer speaks an incompatible major version
    #[error("unsupported protocol version: {major}.{minor}")]
    UnsupportedVersion {
        /// Major version
        major: u8,
        /// Minor version
        minor: u8,
    },

    /// A request arrived where a response was expected, or vice versa
    #[error("unexpected message type: expected {expected}, got {actual}")]
    UnexpectedMessage {
        /// Type that was awaited
        expected: String,
        /// Type that arrived
        actual: String,
    },

    /// The peer refused to identify itself
    #[error("peer at {0} refused the acquaintance request")]
    AcquaintanceRefused(SocketAddr),

    /// A record could not be reconstructed from the session store
    #[error("{kind} '{key}' not found in session store")]
    RecordNotFound {
        /// Record kind ("device", "group", ...)
        kind: &'static str,
        /// Record key
        key: String,
    },

    /// Session store could not be read or written
    #[error("session store error: {0}")]
    StoreError(String),

    /// `config.toml` could not be read, parsed or written
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Invalid user input (addresses, names)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A bounded wait elapsed (seconds)
    #[error("operation timed out after {0} seconds")]
    Timeout(u64),

    /// Background task ended abnormally
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable `E0xx` code for failures a user can act on.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::FileNotFound(_) => Some("E001"),
            Self::PermissionDenied(_) => Some("E002"),
            Self::Corrupted(_) => Some("E003"),
            Self::ConnectionFailed { .. } => Some("E004"),
            Self::HotspotUnreachable(_) => Some("E005"),
            _ => None,
        }
    }

    /// Whether retrying the same operation may succeed.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::HotspotUnreachable(_) | Self::Timeout(_)
        )
    }

    /// Returns whether this error means a single source reference could not
    /// be turned into a transfer item.
    #[must_use]
    pub const fn is_resolution(&self) -> bool {
        matches!(
            self,
            Self::FileNotFound(_) | Self::PermissionDenied(_) | Self::Corrupted(_)
        )
    }

    /// A hint printed under the error message by the CLI.
    #[must_use]
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::ConnectionFailed { .. } => Some(
                "Make sure the other device is running 'peerdrop serve' and that\n\
                 both devices are on the same network.",
            ),
            Self::HotspotUnreachable(_) => Some(
                "Move closer to the device hosting the hotspot, or join the\n\
                 network manually and retry with 'peerdrop send --to <address>'.",
            ),
            Self::AssociationFailed(_) => Some(
                "Check that NetworkManager is running ('nmcli general status')\n\
                 and that the hotspot password is correct.",
            ),
            _ => None,
        }
    }
}
