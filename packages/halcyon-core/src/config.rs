//! Core configuration types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for the FTP backend.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FtpConfig {
    /// Timeout for control-channel exchanges (seconds).
    pub control_timeout_secs: u64,

    /// Timeout for opening data connections (seconds).
    pub data_timeout_secs: u64,

    /// Password sent for anonymous logins.
    pub anonymous_password: String,
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            control_timeout_secs: 10,
            data_timeout_secs: 30,
            anonymous_password: "halcyon@".to_string(),
        }
    }
}

/// Configuration for the add-on subsystem.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AddonsConfig {
    /// Directories scanned for installed add-ons (`<dir>/<id>/addon.xml`).
    pub addon_dirs: Vec<PathBuf>,

    /// Path of the add-on catalog database. None keeps it in memory,
    /// which only makes sense for tests.
    pub database_path: Option<PathBuf>,

    /// Interval between repository index refreshes (seconds).
    pub repo_refresh_interval_secs: u64,
}

impl Default for AddonsConfig {
    fn default() -> Self {
        Self {
            addon_dirs: Vec::new(),
            database_path: None,
            repo_refresh_interval_secs: 86_400,
        }
    }
}

/// Configuration for the Halcyon hub.
///
/// All fields have sensible defaults.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    // Server
    /// Preferred port for the HTTP/WS server (0 = auto-allocate).
    pub preferred_port: u16,

    // Discovery
    /// Enable SSDP multicast discovery.
    pub discovery_ssdp_multicast: bool,

    /// Enable SSDP broadcast discovery.
    pub discovery_ssdp_broadcast: bool,

    /// Number of M-SEARCH packets to send during discovery.
    pub ssdp_send_count: u64,

    /// Delay between M-SEARCH packet retries (milliseconds).
    pub ssdp_retry_delay_ms: u64,

    /// Enable mDNS/Bonjour browsing for the zeroconf backend.
    pub discovery_mdns: bool,

    /// mDNS browse timeout (milliseconds).
    pub mdns_browse_timeout_ms: u64,

    /// Interval between media server and tuner registry sweeps (seconds).
    pub server_sweep_interval_secs: u64,

    /// Devices unseen for this long are dropped from registries (seconds).
    pub server_prune_secs: u64,

    // Backends
    /// FTP backend configuration.
    #[serde(default)]
    pub ftp: FtpConfig,

    /// Add-on subsystem configuration.
    #[serde(default)]
    pub addons: AddonsConfig,

    // Events
    /// Capacity of the event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            preferred_port: 0,
            discovery_ssdp_multicast: true,
            discovery_ssdp_broadcast: true,
            ssdp_send_count: 3,
            ssdp_retry_delay_ms: 800,
            discovery_mdns: true,
            mdns_browse_timeout_ms: 2000,
            server_sweep_interval_secs: 30,
            server_prune_secs: 180,
            ftp: FtpConfig::default(),
            addons: AddonsConfig::default(),
            event_channel_capacity: 100,
        }
    }
}

impl Config {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.ssdp_send_count == 0 {
            return Err("ssdp_send_count must be >= 1".to_string());
        }
        if self.server_sweep_interval_secs < 5 {
            return Err("server_sweep_interval_secs must be >= 5".to_string());
        }
        if self.server_prune_secs <= self.server_sweep_interval_secs {
            return Err(
                "server_prune_secs must exceed server_sweep_interval_secs".to_string(),
            );
        }
        if self.addons.repo_refresh_interval_secs < 60 {
            return Err("repo_refresh_interval_secs must be >= 60".to_string());
        }
        if self.event_channel_capacity == 0 {
            return Err(
                "event_channel_capacity must be >= 1 (broadcast::channel panics on 0)".to_string(),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_send_count_is_rejected() {
        let config = Config {
            ssdp_send_count: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn prune_must_exceed_sweep() {
        let config = Config {
            server_sweep_interval_secs: 30,
            server_prune_secs: 30,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
