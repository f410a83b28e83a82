//! Records kept by the session store.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A peer this device has talked to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDevice {
    /// Opaque, stable identifier announced by the peer
    pub device_id: String,
    /// Display name announced by the peer
    pub nickname: String,
    /// Whether the peer is currently blocked from this side
    pub is_restricted: bool,
    /// Whether the peer was met in a higher-trust setting (own hotspot)
    #[serde(default)]
    pub is_trusted: bool,
    /// Last negotiation attempt with this peer, successful or not
    pub last_usage: DateTime<Utc>,
}

impl PeerDevice {
    /// Create a device record stamped with the current time.
    #[must_use]
    pub fn new(device_id: impl Into<String>, nickname: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            nickname: nickname.into(),
            is_restricted: false,
            is_trusted: false,
            last_usage: Utc::now(),
        }
    }

    /// Mark the device as trusted.
    #[must_use]
    pub fn trusted(mut self, trusted: bool) -> Self {
        self.is_trusted = trusted;
        self
    }

    /// Record that the device was just used.
    pub fn touch(&mut self) {
        self.last_usage = Utc::now();
    }
}

/// One reachable endpoint of a [`PeerDevice`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConnection {
    /// Owning device
    pub device_id: String,
    /// Address the peer answered on
    pub ip_address: IpAddr,
    /// Local interface that reached it
    pub network_interface_name: String,
    /// When the endpoint last answered
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_checked_at: DateTime<Utc>,
}

impl PeerConnection {
    /// Create a connection record stamped with the current time.
    #[must_use]
    pub fn new(
        device_id: impl Into<String>,
        ip_address: IpAddr,
        network_interface_name: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            ip_address,
            network_interface_name: network_interface_name.into(),
            last_checked_at: Utc::now(),
        }
    }
}

/// One negotiated file batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferGroup {
    /// Session identifier, sent to the peer as `groupId`
    pub group_id: i64,
    /// Peer the batch was negotiated with
    pub peer_device_id: String,
    /// Interface the negotiation went through
    pub network_interface_name: String,
    /// When the group was registered
    pub created_at: DateTime<Utc>,
}

impl TransferGroup {
    /// Create a group record.
    #[must_use]
    pub fn new(
        group_id: i64,
        peer_device_id: impl Into<String>,
        network_interface_name: impl Into<String>,
    ) -> Self {
        Self {
            group_id,
            peer_device_id: peer_device_id.into(),
            network_interface_name: network_interface_name.into(),
            created_at: Utc::now(),
        }
    }
}

/// Which way a transaction's bytes will flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    /// This device sends
    Outgoing,
    /// This device receives
    Incoming,
}

impl std::fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Outgoing => write!(f, "Outgoing"),
            Self::Incoming => write!(f, "Incoming"),
        }
    }
}

/// One file's record within a [`TransferGroup`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTransaction {
    /// Identifier within the group, sent to the peer as `requestId`
    pub request_id: i64,
    /// Owning group
    pub group_id: i64,
    /// Name the peer will see
    pub file_name: String,
    /// Where the content comes from
    pub source_reference: String,
    /// MIME type
    pub mime_type: String,
    /// Size in bytes
    pub size_bytes: u64,
    /// Direction
    pub direction: TransferDirection,
    /// Path inside a shared folder, if the file came from one
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub relative_directory: Option<String>,
}

/// Any record the store can hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreRecord {
    /// A peer device
    Device(PeerDevice),
    /// A peer endpoint
    Connection(PeerConnection),
    /// A negotiated batch
    Group(TransferGroup),
    /// A file within a batch
    Transaction(TransferTransaction),
}

impl StoreRecord {
    /// The key identifying this record.
    #[must_use]
    pub fn key(&self) -> RecordKey {
        match self {
            Self::Device(d) => RecordKey::Device(d.device_id.clone()),
            Self::Connection(c) => RecordKey::Connection {
                device_id: c.device_id.clone(),
                ip_address: c.ip_address,
            },
            Self::Group(g) => RecordKey::Group(g.group_id),
            Self::Transaction(t) => RecordKey::Transaction {
                group_id: t.group_id,
                request_id: t.request_id,
            },
        }
    }
}

impl From<PeerDevice> for StoreRecord {
    fn from(device: PeerDevice) -> Self {
        Self::Device(device)
    }
}

impl From<PeerConnection> for StoreRecord {
    fn from(connection: PeerConnection) -> Self {
        Self::Connection(connection)
    }
}

impl From<TransferGroup> for StoreRecord {
    fn from(group: TransferGroup) -> Self {
        Self::Group(group)
    }
}

impl From<TransferTransaction> for StoreRecord {
    fn from(transaction: TransferTransaction) -> Self {
        Self::Transaction(transaction)
    }
}

/// The identifying part of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordKey {
    /// Device by id
    Device(String),
    /// Connection by device and address
    Connection {
        /// Owning device
        device_id: String,
        /// Endpoint address
        ip_address: IpAddr,
    },
    /// Group by id
    Group(i64),
    /// Transaction by group and request id
    Transaction {
        /// Owning group
        group_id: i64,
        /// Request id
        request_id: i64,
    },
}

impl RecordKey {
    /// Short name of the record kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Device(_) => "device",
            Self::Connection { .. } => "connection",
            Self::Group(_) => "group",
            Self::Transaction { .. } => "transaction",
        }
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Device(id) => write!(f, "{id}"),
            Self::Connection {
                device_id,
                ip_address,
            } => write!(f, "{device_id}@{ip_address}"),
            Self::Group(id) => write!(f, "{id}"),
            Self::Transaction {
                group_id,
                request_id,
            } => write!(f, "{group_id}/{request_id}"),
        }
    }
}
