//! Event system for real-time client communication.
//!
//! This module provides:
//! - [`EventEmitter`] trait for domain services to emit events
//! - [`BroadcastEventBridge`] for WebSocket transport
//! - Event types for the add-on and discovery domains

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

/// Events broadcast to clients.
///
/// This enum categorizes all real-time events that can be sent to connected
/// clients. Each category has its own inner event type with specific variants.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum BroadcastEvent {
    /// Add-on lifecycle events.
    Addon(AddonEvent),

    /// Add-on repository refresh events.
    Repository(RepositoryEvent),

    /// Media server and tuner registry events.
    Server(ServerEvent),
}

/// Events related to add-on lifecycle changes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AddonEvent {
    /// An add-on was installed.
    Installed {
        /// The add-on identifier.
        id: String,
        /// The installed version string.
        version: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// An add-on was uninstalled.
    Uninstalled {
        /// The add-on identifier.
        id: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// An add-on was enabled.
    Enabled {
        /// The add-on identifier.
        id: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// An add-on was disabled.
    Disabled {
        /// The add-on identifier.
        id: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

/// Events from repository index refreshes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RepositoryEvent {
    /// A repository index was fetched and its entries stored.
    Updated {
        /// The repository add-on identifier.
        #[serde(rename = "repoId")]
        repo_id: String,
        /// Number of add-on entries in the fetched index.
        #[serde(rename = "addonCount")]
        addon_count: usize,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A repository refresh failed; previous entries are kept.
    Failed {
        /// The repository add-on identifier.
        #[serde(rename = "repoId")]
        repo_id: String,
        /// Error message describing the failure.
        error: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

/// Events from the media server and tuner registries.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    /// A device appeared on the network.
    Appeared {
        /// Stable device identifier (UDN for media servers, device id for tuners).
        id: String,
        /// Human-readable device name.
        name: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A device has not answered discovery for a while and was dropped.
    Lost {
        /// Stable device identifier.
        id: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

// From implementations for converting inner events to BroadcastEvent
impl From<AddonEvent> for BroadcastEvent {
    fn from(event: AddonEvent) -> Self {
        BroadcastEvent::Addon(event)
    }
}

impl From<RepositoryEvent> for BroadcastEvent {
    fn from(event: RepositoryEvent) -> Self {
        BroadcastEvent::Repository(event)
    }
}

impl From<ServerEvent> for BroadcastEvent {
    fn from(event: ServerEvent) -> Self {
        BroadcastEvent::Server(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_category_and_type_tags() {
        let event = BroadcastEvent::Addon(AddonEvent::Enabled {
            id: "visualization.waveform".to_string(),
            timestamp: 1,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["category"], "addon");
        assert_eq!(json["type"], "enabled");
        assert_eq!(json["id"], "visualization.waveform");
    }

    #[test]
    fn server_lost_serializes_id() {
        let event = BroadcastEvent::Server(ServerEvent::Lost {
            id: "uuid:abc".to_string(),
            timestamp: 2,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["category"], "server");
        assert_eq!(json["id"], "uuid:abc");
    }
}
