//! # PeerDrop Core Library
//!
//! `peerdrop-core` reaches a peer device on the local network and
//! negotiates a transfer of files or clipboard text with it.
//!
//! ## Features
//!
//! - **Hotspot joining**: Associate with a peer's hotspot and wait for its gateway
//! - **Peer probing**: Learn a peer's identity with an acquaintance request
//! - **Transfer negotiation**: Offer a batch of files or a clipboard snippet
//! - **Session persistence**: Accepted batches are recorded as transfer groups
//!
//! ## Modules
//!
//! - [`cancel`] - Cooperative cancellation tokens
//! - [`config`] - Configuration management
//! - [`error`] - Error types
//! - [`mod@file`] - Turning selected paths into transfer items
//! - [`hotspot`] - Joining a peer-hosted hotspot
//! - [`ids`] - Unique number sources for groups and transactions
//! - [`negotiate`] - The sender side of the negotiation
//! - [`observer`] - Progress and error callbacks to the front end
//! - [`probe`] - Acquaintance requests
//! - [`protocol`] - PDCP wire protocol implementation
//! - [`responder`] - The answering side of the protocol
//! - [`session`] - Background share operations
//! - [`store`] - Persisted devices, connections and transfer groups
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use peerdrop_core::{Config, JsonSessionStore, MonotonicIds, ShareService, ShareTarget};
//! use peerdrop_core::negotiate::Proposal;
//!
//! let config = Config::load_or_init()?;
//! let store = Arc::new(JsonSessionStore::open_at(config.storage_path())?);
//! let service = ShareService::new(store, Arc::new(MonotonicIds::new()), &config);
//!
//! let handle = service.spawn_share(
//!     ShareTarget::Address("192.168.1.20".parse()?),
//!     Proposal::Clipboard("hello".into()),
//!     Arc::new(()),
//! );
//! let outcome = handle.join().await??;
//! ```

#![warn(missing_docs)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

pub mod cancel;
pub mod config;
pub mod error;
pub mod file;
pub mod hotspot;
pub mod ids;
pub mod negotiate;
pub mod observer;
pub mod probe;
pub mod protocol;
pub mod responder;
pub mod session;
pub mod store;

pub use cancel::CancellationToken;
pub use config::Config;
pub use error::{Error, Result};
pub use ids::{MonotonicIds, UniqueNumberSource};
pub use observer::{ErrorKind, Progress, ShareObserver};
pub use session::{ShareService, ShareTarget, TaskHandle};
pub use store::{JsonSessionStore, SessionStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default TCP port of the control protocol
pub const DEFAULT_COMMUNICATION_PORT: u16 = 1128;

/// Address a hotspot host answers on
pub const DEFAULT_HOTSPOT_GATEWAY: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 43, 1));

/// Time between hotspot reachability checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Timeout of a single gateway ping
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_millis(500);

/// How long to wait for a hotspot before giving up
pub const DEFAULT_HOTSPOT_CEILING: Duration = Duration::from_secs(20);

/// TCP connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a peer may take to answer a request
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(40);
