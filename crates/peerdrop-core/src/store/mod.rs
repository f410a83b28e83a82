//! Session bookkeeping for PeerDrop.
//!
//! The negotiation core only talks to a [`SessionStore`]: `publish` inserts
//! or replaces a record, `remove` deletes one, and `reconstruct` turns a key
//! into the full stored record.
//!
//! ## Cascades
//!
//! | Removed | Also removed |
//! |---------|--------------|
//! | device | its connections |
//! | group | its transactions |
//!
//! [`JsonSessionStore`] keeps everything in one JSON document under the
//! platform data directory and rewrites it on every change.

mod records;

pub use records::{
    PeerConnection, PeerDevice, RecordKey, StoreRecord, TransferDirection, TransferGroup,
    TransferTransaction,
};

use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Persistence for devices, connections, groups and transactions.
///
/// Implementations are shared between concurrent operations and are
/// responsible for their own consistency.
pub trait SessionStore: Send + Sync {
    /// Insert or replace a record.
    fn publish(&self, record: StoreRecord) -> Result<()>;

    /// Delete a record (and whatever cascades from it).
    ///
    /// Removing something that is not stored is not an error.
    fn remove(&self, key: &RecordKey) -> Result<()>;

    /// Fetch the full record for a key.
    ///
    /// Returns [`Error::RecordNotFound`] if nothing is stored under it.
    fn reconstruct(&self, key: &RecordKey) -> Result<StoreRecord>;

    /// All known devices, most recently used first.
    fn devices(&self) -> Result<Vec<PeerDevice>>;

    /// Known endpoints of a device.
    fn connections(&self, device_id: &str) -> Result<Vec<PeerConnection>>;

    /// All registered groups, newest first.
    fn groups(&self) -> Result<Vec<TransferGroup>>;

    /// Transactions registered under a group.
    fn transactions(&self, group_id: i64) -> Result<Vec<TransferTransaction>>;

    /// Typed [`reconstruct`](Self::reconstruct) for devices.
    fn device(&self, device_id: &str) -> Result<PeerDevice> {
        match self.reconstruct(&RecordKey::Device(device_id.to_string()))? {
            StoreRecord::Device(device) => Ok(device),
            other => Err(mismatched(&other)),
        }
    }

    /// Typed [`reconstruct`](Self::reconstruct) for groups.
    fn group(&self, group_id: i64) -> Result<TransferGroup> {
        match self.reconstruct(&RecordKey::Group(group_id))? {
            StoreRecord::Group(group) => Ok(group),
            other => Err(mismatched(&other)),
        }
    }
}

fn mismatched(record: &StoreRecord) -> Error {
    Error::StoreError(format!(
        "store returned a {} for the wrong key kind",
        record.key().kind()
    ))
}

/// Serializable form of the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionDatabase {
    /// Format version
    version: u32,
    devices: Vec<PeerDevice>,
    connections: Vec<PeerConnection>,
    groups: Vec<TransferGroup>,
    transactions: Vec<TransferTransaction>,
}

impl Default for SessionDatabase {
    fn default() -> Self {
        Self {
            version: 1,
            devices: Vec::new(),
            connections: Vec::new(),
            groups: Vec::new(),
            transactions: Vec::new(),
        }
    }
}

impl SessionDatabase {
    fn publish(&mut self, record: StoreRecord) {
        match record {
            StoreRecord::Device(device) => {
                self.devices.retain(|d| d.device_id != device.device_id);
                self.devices.push(device);
            }
            StoreRecord::Connection(conn) => {
                self.connections.retain(|c| {
                    !(c.device_id == conn.device_id && c.ip_address == conn.ip_address)
                });
                self.connections.push(conn);
            }
            StoreRecord::Group(group) => {
                let before = self.groups.len();
                self.groups.retain(|g| g.group_id != group.group_id);
                if self.groups.len() != before {
                    tracing::warn!(
                        group_id = group.group_id,
                        "Replacing stored group with the same id; its old transactions are dropped"
                    );
                    self.transactions.retain(|t| t.group_id != group.group_id);
                }
                self.groups.push(group);
            }
            StoreRecord::Transaction(tx) => {
                self.transactions
                    .retain(|t| !(t.group_id == tx.group_id && t.request_id == tx.request_id));
                self.transactions.push(tx);
            }
        }
    }

    fn remove(&mut self, key: &RecordKey) -> bool {
        let before = self.len();
        match key {
            RecordKey::Device(id) => {
                self.devices.retain(|d| &d.device_id != id);
                self.connections.retain(|c| &c.device_id != id);
            }
            RecordKey::Connection {
                device_id,
                ip_address,
            } => {
                self.connections
                    .retain(|c| !(&c.device_id == device_id && &c.ip_address == ip_address));
            }
            RecordKey::Group(id) => {
                self.groups.retain(|g| g.group_id != *id);
                self.transactions.retain(|t| t.group_id != *id);
            }
            RecordKey::Transaction {
                group_id,
                request_id,
            } => {
                self.transactions
                    .retain(|t| !(t.group_id == *group_id && t.request_id == *request_id));
            }
        }
        self.len() != before
    }

    fn find(&self, key: &RecordKey) -> Option<StoreRecord> {
        match key {
            RecordKey::Device(id) => self
                .devices
                .iter()
                .find(|d| &d.device_id == id)
                .cloned()
                .map(StoreRecord::Device),
            RecordKey::Connection {
                device_id,
                ip_address,
            } => self
                .connections
                .iter()
                .find(|c| &c.device_id == device_id && &c.ip_address == ip_address)
                .cloned()
                .map(StoreRecord::Connection),
            RecordKey::Group(id) => self
                .groups
                .iter()
                .find(|g| g.group_id == *id)
                .cloned()
                .map(StoreRecord::Group),
            RecordKey::Transaction {
                group_id,
                request_id,
            } => self
                .transactions
                .iter()
                .find(|t| t.group_id == *group_id && t.request_id == *request_id)
                .cloned()
                .map(StoreRecord::Transaction),
        }
    }

    fn len(&self) -> usize {
        self.devices.len() + self.connections.len() + self.groups.len() + self.transactions.len()
    }
}

/// JSON file-backed [`SessionStore`].
#[derive(Debug)]
pub struct JsonSessionStore {
    /// Backing file (`None` keeps everything in memory)
    path: Option<PathBuf>,
    db: Mutex<SessionDatabase>,
}

impl JsonSessionStore {
    /// Open the store at the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing store cannot be read.
    pub fn open() -> Result<Self> {
        let path = Self::default_path().unwrap_or_else(|| PathBuf::from("sessions.json"));
        Self::open_at(path)
    }

    /// Open the store at a specific path. A missing file is an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open_at(path: PathBuf) -> Result<Self> {
        let db = if path.exists() {
            let file = fs::File::open(&path).map_err(|e| {
                Error::StoreError(format!(
                    "Failed to open session store at {}: {}",
                    path.display(),
                    e
                ))
            })?;
            serde_json::from_reader(BufReader::new(file)).map_err(|e| {
                Error::StoreError(format!(
                    "Failed to parse session store at {}: {}",
                    path.display(),
                    e
                ))
            })?
        } else {
            SessionDatabase::default()
        };

        Ok(Self {
            path: Some(path),
            db: Mutex::new(db),
        })
    }

    /// A store that never touches the disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            db: Mutex::new(SessionDatabase::default()),
        }
    }

    /// Get the default store path.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "peerdrop", "PeerDrop")
            .map(|dirs| dirs.data_dir().join("sessions.json"))
    }

    /// Path of the backing file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, SessionDatabase>> {
        self.db
            .lock()
            .map_err(|_| Error::StoreError("session store lock poisoned".to_string()))
    }

    fn save(&self, db: &SessionDatabase) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::StoreError(format!(
                    "Failed to create session store directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let file = fs::File::create(path).map_err(|e| {
            Error::StoreError(format!(
                "Failed to create session store at {}: {}",
                path.display(),
                e
            ))
        })?;

        serde_json::to_writer_pretty(BufWriter::new(file), db).map_err(|e| {
            Error::StoreError(format!(
                "Failed to write session store at {}: {}",
                path.display(),
                e
            ))
        })
    }
}

impl JsonSessionStore {
    /// Largest group or request id on record, `0` for an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn highest_id(&self) -> Result<i64> {
        let db = self.lock()?;
        let groups = db.groups.iter().map(|g| g.group_id);
        let requests = db.transactions.iter().map(|t| t.request_id);
        Ok(groups.chain(requests).max().unwrap_or(0))
    }
}

impl SessionStore for JsonSessionStore {
    fn publish(&self, record: StoreRecord) -> Result<()> {
        let mut db = self.lock()?;
        tracing::trace!(key = %record.key(), kind = record.key().kind(), "publish");
        db.publish(record);
        self.save(&db)
    }

    fn remove(&self, key: &RecordKey) -> Result<()> {
        let mut db = self.lock()?;
        if db.remove(key) {
            tracing::trace!(key = %key, kind = key.kind(), "remove");
            self.save(&db)?;
        }
        Ok(())
    }

    fn reconstruct(&self, key: &RecordKey) -> Result<StoreRecord> {
        self.lock()?.find(key).ok_or_else(|| Error::RecordNotFound {
            kind: key.kind(),
            key: key.to_string(),
        })
    }

    fn devices(&self) -> Result<Vec<PeerDevice>> {
        let mut devices = self.lock()?.devices.clone();
        devices.sort_by(|a, b| b.last_usage.cmp(&a.last_usage));
        Ok(devices)
    }

    fn connections(&self, device_id: &str) -> Result<Vec<PeerConnection>> {
        Ok(self
            .lock()?
            .connections
            .iter()
            .filter(|c| c.device_id == device_id)
            .cloned()
            .collect())
    }

    fn groups(&self) -> Result<Vec<TransferGroup>> {
        let mut groups = self.lock()?.groups.clone();
        groups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(groups)
    }

    fn transactions(&self, group_id: i64) -> Result<Vec<TransferTransaction>> {
        Ok(self
            .lock()?
            .transactions
            .iter()
            .filter(|t| t.group_id == group_id)
            .cloned()
            .collect())
    }
}

impl<S: SessionStore + ?Sized> SessionStore for std::sync::Arc<S> {
    fn publish(&self, record: StoreRecord) -> Result<()> {
        (**self).publish(record)
    }

    fn remove(&self, key: &RecordKey) -> Result<()> {
        (**self).remove(key)
    }

    fn reconstruct(&self, key: &RecordKey) -> Result<StoreRecord> {
        (**self).reconstruct(key)
    }

    fn devices(&self) -> Result<Vec<PeerDevice>> {
        (**self).devices()
    }

    fn connections(&self, device_id: &str) -> Result<Vec<PeerConnection>> {
        (**self).connections(device_id)
    }

    fn groups(&self) -> Result<Vec<TransferGroup>> {
        (**self).groups()
    }

    fn transactions(&self, group_id: i64) -> Result<Vec<TransferTransaction>> {
        (**self).transactions(group_id)
    }
}

/// Pick the endpoint to negotiate through.
///
/// Prefers a connection on `preferred_interface` when given, otherwise the
/// one that answered most recently.
#[must_use]
pub fn select_connection<'a>(
    connections: &'a [PeerConnection],
    preferred_interface: Option<&str>,
) -> Option<&'a PeerConnection> {
    if let Some(name) = preferred_interface {
        if let Some(conn) = connections
            .iter()
            .find(|c| c.network_interface_name == name)
        {
            return Some(conn);
        }
    }

    connections.iter().max_by_key(|c| c.last_checked_at)
}

/// Clear a device's restriction before a fresh negotiation and persist it.
///
/// # Errors
///
/// Returns an error if the store cannot be written.
pub fn prepare_device<S: SessionStore + ?Sized>(store: &S, device: &mut PeerDevice) -> Result<()> {
    device.is_restricted = false;
    store.publish(StoreRecord::Device(device.clone()))
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use chrono::Duration;
    use tempfile::TempDir;

    use super::*;

    fn create_test_transaction(group_id: i64, request_id: i64) -> TransferTransaction {
        TransferTransaction {
            request_id,
            group_id,
            file_name: format!("file-{request_id}.txt"),
            source_reference: format!("/tmp/file-{request_id}.txt"),
            mime_type: "text/plain".to_string(),
            size_bytes: 12,
            direction: TransferDirection::Outgoing,
            relative_directory: None,
        }
    }

    #[test]
    fn test_store_save_and_load() {
        let tmp_dir = TempDir::new().unwrap();
        let path = tmp_dir.path().join("sessions.json");

        let store = JsonSessionStore::open_at(path.clone()).unwrap();
        store
            .publish(PeerDevice::new("serial-1", "Pixel").into())
            .unwrap();

        let loaded = JsonSessionStore::open_at(path).unwrap();
        let device = loaded.device("serial-1").unwrap();
        assert_eq!(device.nickname, "Pixel");
    }

    #[test]
    fn test_publish_replaces_existing() {
        let store = JsonSessionStore::in_memory();
        store
            .publish(PeerDevice::new("serial-1", "Old").into())
            .unwrap();
        store
            .publish(PeerDevice::new("serial-1", "New").into())
            .unwrap();

        let devices = store.devices().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].nickname, "New");
    }

    #[test]
    fn test_republished_group_drops_stale_transactions() {
        let store = JsonSessionStore::in_memory();
        store
            .publish(TransferGroup::new(7, "serial-1", "wlan0").into())
            .unwrap();
        store.publish(create_test_transaction(7, 1).into()).unwrap();
        store.publish(create_test_transaction(7, 2).into()).unwrap();

        store
            .publish(TransferGroup::new(7, "serial-2", "eth0").into())
            .unwrap();
        store.publish(create_test_transaction(7, 9).into()).unwrap();

        assert_eq!(store.group(7).unwrap().peer_device_id, "serial-2");
        let requests: Vec<_> = store
            .transactions(7)
            .unwrap()
            .iter()
            .map(|t| t.request_id)
            .collect();
        assert_eq!(requests, vec![9]);
    }

    #[test]
    fn test_highest_id_spans_groups_and_requests() {
        let store = JsonSessionStore::in_memory();
        assert_eq!(store.highest_id().unwrap(), 0);

        store
            .publish(TransferGroup::new(40, "serial-1", "wlan0").into())
            .unwrap();
        store.publish(create_test_transaction(40, 41).into()).unwrap();
        assert_eq!(store.highest_id().unwrap(), 41);
    }

    #[test]
    fn test_reconstruct_missing_is_not_found() {
        let store = JsonSessionStore::in_memory();
        let err = store.device("ghost").unwrap_err();
        assert!(matches!(err, Error::RecordNotFound { kind: "device", .. }));
    }

    #[test]
    fn test_remove_group_cascades_transactions() {
        let store = JsonSessionStore::in_memory();
        store
            .publish(TransferGroup::new(7, "serial-1", "wlan0").into())
            .unwrap();
        store.publish(create_test_transaction(7, 1).into()).unwrap();
        store.publish(create_test_transaction(7, 2).into()).unwrap();
        store.publish(create_test_transaction(8, 3).into()).unwrap();

        store.remove(&RecordKey::Group(7)).unwrap();

        assert!(store.group(7).is_err());
        assert!(store.groups().unwrap().is_empty());
        assert!(store.transactions(7).unwrap().is_empty());
        assert_eq!(store.transactions(8).unwrap().len(), 1);
    }

    #[test]
    fn test_remove_device_cascades_connections() {
        let store = JsonSessionStore::in_memory();
        let ip: IpAddr = "192.168.43.1".parse().unwrap();
        store
            .publish(PeerDevice::new("serial-1", "Pixel").into())
            .unwrap();
        store
            .publish(PeerConnection::new("serial-1", ip, "wlan0").into())
            .unwrap();

        store
            .remove(&RecordKey::Device("serial-1".to_string()))
            .unwrap();
        assert!(store.connections("serial-1").unwrap().is_empty());
    }

    #[test]
    fn test_remove_missing_is_ok() {
        let store = JsonSessionStore::in_memory();
        assert!(store.remove(&RecordKey::Group(1)).is_ok());
    }

    #[test]
    fn test_load_nonexistent_file() {
        let tmp_dir = TempDir::new().unwrap();
        let store = JsonSessionStore::open_at(tmp_dir.path().join("none.json")).unwrap();
        assert!(store.devices().unwrap().is_empty());
    }

    #[test]
    fn test_load_corrupted_file() {
        let tmp_dir = TempDir::new().unwrap();
        let path = tmp_dir.path().join("sessions.json");
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(
            JsonSessionStore::open_at(path),
            Err(Error::StoreError(_))
        ));
    }

    #[test]
    fn test_select_connection_prefers_interface() {
        let ip_a: IpAddr = "192.168.1.10".parse().unwrap();
        let ip_b: IpAddr = "192.168.43.1".parse().unwrap();
        let mut older = PeerConnection::new("d", ip_a, "eth0");
        older.last_checked_at -= Duration::seconds(60);
        let newer = PeerConnection::new("d", ip_b, "wlan0");
        let conns = vec![older, newer];

        assert_eq!(
            select_connection(&conns, Some("eth0")).unwrap().ip_address,
            ip_a
        );
        assert_eq!(select_connection(&conns, None).unwrap().ip_address, ip_b);
        assert_eq!(
            select_connection(&conns, Some("usb0")).unwrap().ip_address,
            ip_b
        );
        assert!(select_connection(&[], None).is_none());
    }

    #[test]
    fn test_prepare_device_clears_restriction() {
        let store = JsonSessionStore::in_memory();
        let mut device = PeerDevice::new("serial-1", "Pixel");
        device.is_restricted = true;
        store.publish(device.clone().into()).unwrap();

        prepare_device(&store, &mut device).unwrap();

        assert!(!device.is_restricted);
        assert!(!store.device("serial-1").unwrap().is_restricted);
    }
}
