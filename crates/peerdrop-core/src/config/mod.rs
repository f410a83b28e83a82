//! Persistent settings: device identity, ports, timeouts and the hotspot
//! gateway. Every field has a default, so a partial file is valid.
//!
//! ## Location
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/peerdrop/config.toml` |
//! | macOS | `~/Library/Application Support/com.peerdrop.PeerDrop/config.toml` |
//! | Windows | `%APPDATA%\PeerDrop\PeerDrop\config\config.toml` |
//!
//! ## Example
//!
//! ```toml
//! [general]
//! device_name = "workstation"
//!
//! [network]
//! communication_port = 1128
//! connect_timeout = "5s"
//!
//! [hotspot]
//! gateway = "192.168.43.1"
//! ping_timeout = "500ms"
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration struct for PeerDrop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// Network settings
    pub network: NetworkConfig,
    /// Hotspot settings
    pub hotspot: HotspotConfig,
    /// Storage settings
    pub storage: StorageConfig,
}

/// Identity announced to peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Display name announced to peers
    pub device_name: String,
    /// Stable identifier announced to peers as `serial`
    pub device_id: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            device_name: hostname::get().map_or_else(
                |_| "PeerDrop Device".to_string(),
                |h| h.to_string_lossy().to_string(),
            ),
            device_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// Control connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Control-plane port (TCP)
    pub communication_port: u16,
    /// Upper bound for establishing a control connection
    #[serde(with = "duration_str")]
    pub connect_timeout: Duration,
    /// Upper bound for the peer's answer to a proposal
    #[serde(with = "duration_str")]
    pub response_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            communication_port: crate::DEFAULT_COMMUNICATION_PORT,
            connect_timeout: crate::DEFAULT_CONNECT_TIMEOUT,
            response_timeout: crate::DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

/// Hotspot joining options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HotspotConfig {
    /// Address a peer's hotspot assigns to itself
    pub gateway: IpAddr,
    /// Delay between reachability checks
    #[serde(with = "duration_str")]
    pub poll_interval: Duration,
    /// Upper bound for one reachability check
    #[serde(with = "duration_str")]
    pub ping_timeout: Duration,
    /// Give up after this long
    #[serde(with = "duration_str")]
    pub ceiling: Duration,
}

impl Default for HotspotConfig {
    fn default() -> Self {
        Self {
            gateway: crate::DEFAULT_HOTSPOT_GATEWAY,
            poll_interval: crate::DEFAULT_POLL_INTERVAL,
            ping_timeout: crate::DEFAULT_PING_TIMEOUT,
            ceiling: crate::DEFAULT_HOTSPOT_CEILING,
        }
    }
}

/// How this device introduces itself to peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDevice {
    /// Sent as `serial`
    pub serial: String,
    /// Shown to peers and used in messages
    pub nickname: String,
}

impl LocalDevice {
    /// Create an identity.
    pub fn new(serial: impl Into<String>, nickname: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            nickname: nickname.into(),
        }
    }
}

/// Storage configuration options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Session store file (defaults to the platform data directory)
    pub path: Option<PathBuf>,
}

impl Config {
    /// Read `path`, falling back to defaults when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the file is unreadable or not valid TOML.
    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => toml::from_str(&text)
                .map_err(|e| Error::ConfigError(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(Error::ConfigError(format!(
                "cannot read {}: {e}",
                path.display()
            ))),
        }
    }

    /// Load the configuration file, writing it out on first run so the
    /// generated `device_id` survives restarts.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or created.
    pub fn load_or_init() -> Result<Self> {
        Self::load_or_init_at(&Self::config_path())
    }

    /// [`Config::load_or_init`] for an explicit file.
    ///
    /// The file is rewritten whenever it lacks a `device_id`, including a
    /// hand-written file that only sets other keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or written.
    pub fn load_or_init_at(path: &Path) -> Result<Self> {
        let config = Self::load_from(path)?;
        if !stores_device_id(path) {
            tracing::debug!(path = %path.display(), "persisting generated device id");
            config.save_to(path)?;
        }
        Ok(config)
    }

    /// Write the configuration as TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if any step fails.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let fail = |what: &str, e: &dyn std::fmt::Display| {
            Error::ConfigError(format!("cannot {what} {}: {e}", path.display()))
        };

        let text = toml::to_string_pretty(self).map_err(|e| fail("serialize", &e))?;
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| fail("create directory for", &e))?;
        }
        std::fs::write(path, text).map_err(|e| fail("write", &e))
    }

    /// Where the configuration file lives on this platform.
    #[must_use]
    pub fn config_path() -> PathBuf {
        directories::ProjectDirs::from("com", "peerdrop", "PeerDrop")
            .map_or_else(|| PathBuf::from("."), |dirs| dirs.config_dir().to_path_buf())
            .join("config.toml")
    }

    /// Session store file, honoring the `[storage]` override.
    #[must_use]
    pub fn storage_path(&self) -> PathBuf {
        self.storage
            .path
            .clone()
            .or_else(crate::store::JsonSessionStore::default_path)
            .unwrap_or_else(|| PathBuf::from("sessions.json"))
    }

    /// This device's identity.
    #[must_use]
    pub fn local_device(&self) -> LocalDevice {
        LocalDevice::new(&self.general.device_id, &self.general.device_name)
    }

    /// Control-plane address of a peer.
    #[must_use]
    pub const fn peer_addr(&self, ip: IpAddr) -> SocketAddr {
        SocketAddr::new(ip, self.network.communication_port)
    }
}

fn stores_device_id(path: &Path) -> bool {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|text| text.parse::<toml::Table>().ok())
        .and_then(|table| table.get("general")?.get("device_id").cloned())
        .is_some()
}

/// Durations written as `"500ms"`, `"5s"` or `"2m"`.
mod duration_str {
    use std::time::Duration;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let text = if value.subsec_millis() == 0 {
            format!("{}s", value.as_secs())
        } else {
            format!("{}ms", value.as_millis())
        };
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        let split = text
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(text.len());
        let (digits, unit) = text.split_at(split);
        let amount: u64 = digits
            .parse()
            .map_err(|_| D::Error::custom(format!("invalid duration `{text}`")))?;

        match unit.trim() {
            "ms" => Ok(Duration::from_millis(amount)),
            "s" => Ok(Duration::from_secs(amount)),
            "m" => Ok(Duration::from_secs(amount.saturating_mul(60))),
            other => Err(D::Error::custom(format!(
                "unknown duration unit `{other}` (use ms, s or m)"
            ))),
        }
    }
}
