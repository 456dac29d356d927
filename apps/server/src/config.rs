//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP server to (0 scans the default range).
    /// Override: `HALCYON_PORT`
    pub port: u16,

    /// Interval in seconds between discovery sweeps.
    /// Override: `HALCYON_SWEEP_INTERVAL`
    pub sweep_interval: u64,

    /// Enable SSDP multicast discovery.
    pub discovery_ssdp_multicast: bool,

    /// Enable SSDP broadcast discovery.
    pub discovery_ssdp_broadcast: bool,

    /// Enable mDNS/Bonjour discovery and advertisement.
    pub discovery_mdns: bool,

    /// Directories scanned for installed add-ons (`<dir>/<id>/addon.xml`).
    pub addon_dirs: Vec<PathBuf>,

    /// Interval in seconds between repository index refreshes.
    /// Override: `HALCYON_REPO_REFRESH_INTERVAL`
    pub repo_refresh_interval: u64,

    /// Directory for persistent data (add-on catalog database).
    /// Override: `HALCYON_DATA_DIR`
    pub data_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            sweep_interval: 30,
            discovery_ssdp_multicast: true,
            discovery_ssdp_broadcast: true,
            discovery_mdns: true,
            addon_dirs: Vec::new(),
            repo_refresh_interval: 86_400,
            data_dir: None,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("HALCYON_PORT") {
            if let Ok(port) = val.parse() {
                self.port = port;
            }
        }

        if let Ok(val) = std::env::var("HALCYON_SWEEP_INTERVAL") {
            if let Ok(interval) = val.parse() {
                self.sweep_interval = interval;
            }
        }

        if let Ok(val) = std::env::var("HALCYON_REPO_REFRESH_INTERVAL") {
            if let Ok(interval) = val.parse() {
                self.repo_refresh_interval = interval;
            }
        }

        // Note: HALCYON_DATA_DIR is handled by clap via #[arg(env = ...)] in main.rs
    }

    /// Converts to halcyon-core's Config type.
    pub fn to_core_config(&self) -> halcyon_core::Config {
        let mut config = halcyon_core::Config {
            preferred_port: self.port,
            discovery_ssdp_multicast: self.discovery_ssdp_multicast,
            discovery_ssdp_broadcast: self.discovery_ssdp_broadcast,
            discovery_mdns: self.discovery_mdns,
            server_sweep_interval_secs: self.sweep_interval,
            // Devices survive missing a few sweeps before they are pruned
            server_prune_secs: self.sweep_interval * 6,
            ..Default::default()
        };
        config.addons.addon_dirs = self.addon_dirs.clone();
        config.addons.repo_refresh_interval_secs = self.repo_refresh_interval;
        config.addons.database_path = self.data_dir.as_ref().map(|dir| dir.join("addons.db"));
        config
    }
}
