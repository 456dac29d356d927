//! Media server registry with background discovery sweeps.
//!
//! Keeps the set of ContentDirectory-capable servers currently visible on
//! the network. A background task re-runs SSDP on an interval (or when a
//! manual refresh is triggered), fetches device descriptions for newcomers,
//! and prunes servers that have stopped answering.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::description::{fetch_description, DeviceDescription};
use super::ssdp::{self, SsdpConfig, SsdpResponse};
use crate::config::Config;
use crate::events::{EventEmitter, ServerEvent};
use crate::runtime::TaskSpawner;
use crate::utils::now_millis;

/// SSDP search target answered by UPnP AV media servers.
pub const MEDIA_SERVER_TARGET: &str = "urn:schemas-upnp-org:device:MediaServer:1";

/// Maximum concurrent device description fetches.
const MAX_CONCURRENT_FETCHES: usize = 8;

/// A media server currently visible on the network.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaServer {
    /// Canonical device UUID.
    pub udn: String,
    /// Friendly name from the device description.
    pub friendly_name: String,
    /// Model name, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    /// Manufacturer, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    /// Device description URL the server was resolved from.
    pub location: String,
    /// Absolute ContentDirectory control URL.
    pub content_directory_url: String,
    /// Address the discovery response came from.
    pub source_ip: String,
    /// When the server last answered a sweep (Unix millis).
    pub last_seen_ms: u64,
}

/// Registry of discovered media servers.
pub struct MediaServerRegistry {
    servers: DashMap<String, MediaServer>,
    http_client: Client,
    ssdp_config: SsdpConfig,
    multicast_enabled: bool,
    broadcast_enabled: bool,
    sweep_interval: Duration,
    prune_after: Duration,
    emitter: Arc<dyn EventEmitter>,
    refresh_notify: Arc<Notify>,
    cancel_token: CancellationToken,
}

impl MediaServerRegistry {
    /// Creates a registry from the hub configuration.
    pub fn new(config: &Config, http_client: Client, emitter: Arc<dyn EventEmitter>) -> Self {
        let ssdp_config = SsdpConfig {
            send_count: config.ssdp_send_count,
            retry_delay: Duration::from_millis(config.ssdp_retry_delay_ms),
            ..SsdpConfig::default()
        };

        Self {
            servers: DashMap::new(),
            http_client,
            ssdp_config,
            multicast_enabled: config.discovery_ssdp_multicast,
            broadcast_enabled: config.discovery_ssdp_broadcast,
            sweep_interval: Duration::from_secs(config.server_sweep_interval_secs),
            prune_after: Duration::from_secs(config.server_prune_secs),
            emitter,
            refresh_notify: Arc::new(Notify::new()),
            cancel_token: CancellationToken::new(),
        }
    }

    /// Returns a snapshot of all known servers, sorted by friendly name.
    pub fn servers(&self) -> Vec<MediaServer> {
        let mut servers: Vec<MediaServer> =
            self.servers.iter().map(|entry| entry.value().clone()).collect();
        servers.sort_by(|a, b| {
            a.friendly_name
                .cmp(&b.friendly_name)
                .then_with(|| a.udn.cmp(&b.udn))
        });
        servers
    }

    /// Looks up a server by its canonical UDN.
    pub fn get(&self, udn: &str) -> Option<MediaServer> {
        self.servers.get(udn).map(|entry| entry.value().clone())
    }

    /// Returns the HTTP client used for SOAP and description requests.
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// Requests an immediate sweep from the background task.
    pub fn trigger_refresh(&self) {
        self.refresh_notify.notify_one();
    }

    /// Starts the background sweep loop.
    ///
    /// The first interval tick fires immediately, so the initial sweep
    /// happens right after startup.
    pub fn start_sweeping<S: TaskSpawner>(self: &Arc<Self>, spawner: &S) {
        let registry = Arc::clone(self);
        spawner.spawn("media server sweep", async move {
            let cancel_token = registry.cancel_token.clone();
            let mut interval = tokio::time::interval(registry.sweep_interval);

            loop {
                let is_manual_refresh = tokio::select! {
                    _ = cancel_token.cancelled() => {
                        log::info!("[Servers] Shutting down sweep loop");
                        break;
                    }
                    _ = interval.tick() => false,
                    _ = registry.refresh_notify.notified() => {
                        log::info!("[Servers] Manual refresh triggered");
                        true
                    }
                };

                // Reset interval after manual refresh to push back the automatic sweep
                if is_manual_refresh {
                    interval.reset();
                }

                registry.sweep_once().await;
            }
        });
    }

    /// Stops the background sweep loop.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }

    /// Runs one discovery sweep: SSDP searches, description fetches for
    /// newcomers, last-seen bumps for known servers, then pruning.
    pub async fn sweep_once(&self) {
        let (multicast, broadcast) = tokio::join!(
            async {
                if self.multicast_enabled {
                    Some(ssdp::search_multicast(MEDIA_SERVER_TARGET, &self.ssdp_config).await)
                } else {
                    None
                }
            },
            async {
                if self.broadcast_enabled {
                    Some(ssdp::search_broadcast(MEDIA_SERVER_TARGET, &self.ssdp_config).await)
                } else {
                    None
                }
            },
        );

        let mut responses: Vec<SsdpResponse> = Vec::new();
        for (method, result) in [("multicast", multicast), ("broadcast", broadcast)] {
            match result {
                Some(Ok(found)) => responses.extend(found),
                Some(Err(e)) => log::warn!("[Servers] SSDP {} search failed: {}", method, e),
                None => {}
            }
        }

        // The same device usually answers both methods
        let mut seen = HashSet::new();
        responses.retain(|r| seen.insert(r.udn.clone()));

        let now = now_millis();

        // Known servers with an unchanged location just get their last-seen
        // bumped; everything else needs a description fetch
        let mut to_fetch = Vec::new();
        for response in responses {
            let known_location = self.servers.get(&response.udn).map(|s| s.location.clone());
            match known_location {
                Some(location) if location == response.location => {
                    if let Some(mut entry) = self.servers.get_mut(&response.udn) {
                        entry.last_seen_ms = now;
                    }
                }
                _ => to_fetch.push(response),
            }
        }

        let described: Vec<(SsdpResponse, Option<DeviceDescription>)> = stream::iter(to_fetch)
            .map(|response| {
                let client = &self.http_client;
                async move {
                    let description = fetch_description(client, &response.location).await;
                    (response, description)
                }
            })
            .buffer_unordered(MAX_CONCURRENT_FETCHES)
            .collect()
            .await;

        for (response, description) in described {
            match description {
                Some(description) => self.record(&response, description, now),
                None => log::debug!(
                    "[Servers] No description from {} ({})",
                    response.location,
                    response.udn
                ),
            }
        }

        self.prune_stale(now);
    }

    /// Records a described server, emitting an event when it is new.
    pub(crate) fn record(
        &self,
        response: &SsdpResponse,
        description: DeviceDescription,
        now_ms: u64,
    ) {
        let Some(content_directory_url) = description.content_directory_url else {
            log::debug!(
                "[Servers] {} has no ContentDirectory service, ignoring",
                description.friendly_name
            );
            return;
        };

        // The description's UDN is authoritative; fall back to the SSDP one
        let udn = if description.udn.is_empty() {
            response.udn.clone()
        } else {
            description.udn
        };

        let server = MediaServer {
            udn: udn.clone(),
            friendly_name: description.friendly_name.clone(),
            model_name: description.model_name,
            manufacturer: description.manufacturer,
            location: response.location.clone(),
            content_directory_url,
            source_ip: response.source_ip.to_string(),
            last_seen_ms: now_ms,
        };

        let is_new = self.servers.insert(udn.clone(), server).is_none();
        if is_new {
            log::info!(
                "[Servers] Media server appeared: {} ({})",
                description.friendly_name,
                udn
            );
            self.emitter.emit_server(ServerEvent::Appeared {
                id: udn,
                name: description.friendly_name,
                timestamp: now_ms,
            });
        }
    }

    /// Drops servers that have not answered a sweep for too long.
    fn prune_stale(&self, now_ms: u64) {
        let prune_ms = self.prune_after.as_millis() as u64;

        let mut lost = Vec::new();
        self.servers.retain(|udn, server| {
            let fresh = now_ms.saturating_sub(server.last_seen_ms) < prune_ms;
            if !fresh {
                lost.push((udn.clone(), server.friendly_name.clone()));
            }
            fresh
        });

        for (udn, name) in lost {
            log::info!("[Servers] Media server lost: {} ({})", name, udn);
            self.emitter.emit_server(ServerEvent::Lost {
                id: udn,
                timestamp: now_ms,
            });
        }
    }
}
