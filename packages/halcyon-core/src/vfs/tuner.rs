//! hdhomerun:// network tuner provider.
//!
//! HDHomeRun devices answer the same SSDP search as media servers and
//! identify themselves in the SERVER header. Device metadata and the
//! channel lineup come from their HTTP API (`/discover.json` and
//! `/lineup.json`). Channel items point straight at the tuner's own
//! stream URLs, so playback bypasses this provider entirely.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::events::{EventEmitter, ServerEvent};
use crate::runtime::TaskSpawner;
use crate::upnp::registry::MEDIA_SERVER_TARGET;
use crate::upnp::ssdp::{self, contains_ignore_ascii_case, SsdpConfig, SsdpResponse};
use crate::url::VfsUrl;
use crate::utils::now_millis;
use crate::vfs::{FileItem, FileItemList, VfsError, VfsProvider, VfsResult};

/// A tuner device currently visible on the network.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tuner {
    /// Address the tuner's HTTP API answers on.
    pub ip: String,
    /// Hardware device id, e.g. "1234ABCD".
    pub device_id: String,
    /// Friendly name from discover.json.
    pub friendly_name: String,
    /// Model number, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Number of hardware tuners, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tuner_count: Option<u32>,
    /// Channel lineup endpoint.
    pub lineup_url: String,
    /// When the tuner last answered a sweep (Unix millis).
    pub last_seen_ms: u64,
}

#[derive(Debug, Deserialize)]
struct DiscoverJson {
    #[serde(rename = "FriendlyName")]
    friendly_name: Option<String>,
    #[serde(rename = "ModelNumber")]
    model_number: Option<String>,
    #[serde(rename = "DeviceID")]
    device_id: Option<String>,
    #[serde(rename = "TunerCount")]
    tuner_count: Option<u32>,
    #[serde(rename = "LineupURL")]
    lineup_url: Option<String>,
    #[serde(rename = "BaseURL")]
    base_url: Option<String>,
}

/// One channel from lineup.json.
#[derive(Debug, Deserialize)]
pub(crate) struct LineupEntry {
    #[serde(rename = "GuideNumber")]
    pub(crate) guide_number: String,
    #[serde(rename = "GuideName")]
    pub(crate) guide_name: String,
    #[serde(rename = "URL")]
    pub(crate) url: String,
    /// 1 when the channel is DRM-protected.
    #[serde(rename = "DRM", default)]
    pub(crate) drm: u8,
    /// 1 when the channel broadcasts in HD.
    #[serde(rename = "HD", default)]
    pub(crate) hd: u8,
}

/// Registry of discovered tuners, keyed by IP.
pub struct TunerRegistry {
    tuners: DashMap<String, Tuner>,
    http_client: Client,
    ssdp_config: SsdpConfig,
    multicast_enabled: bool,
    broadcast_enabled: bool,
    sweep_interval: Duration,
    prune_after: Duration,
    refresh_notify: Arc<Notify>,
    cancel_token: CancellationToken,
    emitter: Arc<dyn EventEmitter>,
}

impl TunerRegistry {
    pub fn new(config: &Config, http_client: Client, emitter: Arc<dyn EventEmitter>) -> Self {
        let ssdp_config = SsdpConfig {
            send_count: config.ssdp_send_count,
            retry_delay: Duration::from_millis(config.ssdp_retry_delay_ms),
            ..SsdpConfig::default()
        };

        Self {
            tuners: DashMap::new(),
            http_client,
            ssdp_config,
            multicast_enabled: config.discovery_ssdp_multicast,
            broadcast_enabled: config.discovery_ssdp_broadcast,
            sweep_interval: Duration::from_secs(config.server_sweep_interval_secs),
            prune_after: Duration::from_secs(config.server_prune_secs),
            refresh_notify: Arc::new(Notify::new()),
            cancel_token: CancellationToken::new(),
            emitter,
        }
    }

    /// Returns a snapshot of all known tuners, sorted by name.
    pub fn tuners(&self) -> Vec<Tuner> {
        let mut tuners: Vec<Tuner> = self.tuners.iter().map(|e| e.value().clone()).collect();
        tuners.sort_by(|a, b| {
            a.friendly_name
                .cmp(&b.friendly_name)
                .then_with(|| a.device_id.cmp(&b.device_id))
        });
        tuners
    }

    pub fn get(&self, ip: &str) -> Option<Tuner> {
        self.tuners.get(ip).map(|e| e.value().clone())
    }

    /// Requests an immediate sweep from the background task.
    pub fn trigger_refresh(&self) {
        self.refresh_notify.notify_one();
    }

    /// Starts the background sweep loop.
    pub fn start_sweeping<S: TaskSpawner>(self: &Arc<Self>, spawner: &S) {
        let registry = Arc::clone(self);
        spawner.spawn("tuner sweep", async move {
            let cancel_token = registry.cancel_token.clone();
            let mut interval = tokio::time::interval(registry.sweep_interval);

            loop {
                let is_manual_refresh = tokio::select! {
                    _ = cancel_token.cancelled() => {
                        log::info!("[Tuners] Shutting down sweep loop");
                        break;
                    }
                    _ = interval.tick() => false,
                    _ = registry.refresh_notify.notified() => {
                        log::info!("[Tuners] Manual refresh triggered");
                        true
                    }
                };

                if is_manual_refresh {
                    interval.reset();
                }

                registry.sweep_once().await;
            }
        });
    }

    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }

    /// Runs one discovery sweep. Tuner counts are small, so discover.json
    /// fetches just run one after another.
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
        for result in [multicast, broadcast].into_iter().flatten() {
            match result {
                Ok(found) => responses.extend(found),
                Err(e) => log::warn!("[Tuners] SSDP search failed: {}", e),
            }
        }

        let now = now_millis();

        for response in responses {
            if !is_hdhomerun(&response) {
                continue;
            }
            let ip = response.source_ip.to_string();

            if let Some(mut entry) = self.tuners.get_mut(&ip) {
                entry.last_seen_ms = now;
                continue;
            }

            match fetch_tuner(&self.http_client, &ip, now).await {
                Some(tuner) => {
                    log::info!(
                        "[Tuners] Found {} ({}) at {}",
                        tuner.friendly_name,
                        tuner.device_id,
                        ip
                    );
                    self.emitter.emit_server(ServerEvent::Appeared {
                        id: tuner.device_id.clone(),
                        name: tuner.friendly_name.clone(),
                        timestamp: now,
                    });
                    self.tuners.insert(ip, tuner);
                }
                None => log::debug!("[Tuners] {} did not answer discover.json", ip),
            }
        }

        self.prune_stale(now);
    }

    fn prune_stale(&self, now_ms: u64) {
        let prune_ms = self.prune_after.as_millis() as u64;

        let mut lost = Vec::new();
        self.tuners.retain(|ip, tuner| {
            let fresh = now_ms.saturating_sub(tuner.last_seen_ms) < prune_ms;
            if !fresh {
                log::info!("[Tuners] Tuner lost: {} ({})", tuner.friendly_name, ip);
                lost.push(tuner.device_id.clone());
            }
            fresh
        });

        for device_id in lost {
            self.emitter.emit_server(ServerEvent::Lost {
                id: device_id,
                timestamp: now_ms,
            });
        }
    }
}

/// Whether an SSDP response came from an HDHomeRun-class device.
fn is_hdhomerun(response: &SsdpResponse) -> bool {
    let in_server = response
        .server
        .as_deref()
        .is_some_and(|s| contains_ignore_ascii_case(s, "hdhomerun"));
    in_server || contains_ignore_ascii_case(&response.location, "hdhomerun")
}

async fn fetch_tuner(client: &Client, ip: &str, now_ms: u64) -> Option<Tuner> {
    let url = format!("http://{}/discover.json", ip);
    let discover: DiscoverJson = client
        .get(&url)
        .send()
        .await
        .ok()?
        .error_for_status()
        .ok()?
        .json()
        .await
        .ok()?;

    let device_id = discover.device_id?;
    let lineup_url = resolve_lineup_url(discover.lineup_url, discover.base_url, ip);

    Some(Tuner {
        ip: ip.to_string(),
        device_id,
        friendly_name: discover
            .friendly_name
            .unwrap_or_else(|| "HDHomeRun".to_string()),
        model: discover.model_number,
        tuner_count: discover.tuner_count,
        lineup_url,
        last_seen_ms: now_ms,
    })
}

/// Picks the lineup endpoint: LineupURL when given, else derived from
/// BaseURL, else the well-known path on the device IP.
pub(crate) fn resolve_lineup_url(
    lineup_url: Option<String>,
    base_url: Option<String>,
    ip: &str,
) -> String {
    if let Some(url) = lineup_url {
        return url;
    }
    if let Some(base) = base_url {
        return format!("{}/lineup.json", base.trim_end_matches('/'));
    }
    format!("http://{}/lineup.json", ip)
}

/// Converts a lineup into listing items, skipping DRM channels.
pub(crate) fn lineup_items(entries: &[LineupEntry]) -> Vec<FileItem> {
    let mut items = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.drm != 0 {
            log::debug!(
                "[Tuners] Skipping DRM channel {} {}",
                entry.guide_number,
                entry.guide_name
            );
            continue;
        }
        let mut item = FileItem::file(
            format!("{} {}", entry.guide_number, entry.guide_name),
            entry.url.clone(),
        )
        .with_content_type("video/mp2t")
        .with_property("channel", entry.guide_number.clone());
        if entry.hd != 0 {
            item = item.with_property("hd", "1");
        }
        items.push(item);
    }
    items
}

/// Provider for the `hdhomerun` scheme.
pub struct TunerProvider {
    registry: Arc<TunerRegistry>,
}

impl TunerProvider {
    pub fn new(registry: Arc<TunerRegistry>) -> Self {
        Self { registry }
    }

    fn tuner_index(&self) -> FileItemList {
        let mut list = FileItemList::new("hdhomerun://");
        for tuner in self.registry.tuners() {
            let mut item = FileItem::folder(
                format!("{} ({})", tuner.friendly_name, tuner.device_id),
                format!("hdhomerun://{}/", tuner.ip),
            );
            if let Some(model) = &tuner.model {
                item = item.with_property("model", model);
            }
            if let Some(count) = tuner.tuner_count {
                item = item.with_property("tunerCount", count.to_string());
            }
            list.push(item);
        }
        list
    }
}

#[async_trait]
impl VfsProvider for TunerProvider {
    async fn list(&self, url: &VfsUrl) -> VfsResult<FileItemList> {
        if url.host().is_empty() {
            return Ok(self.tuner_index());
        }

        let ip = url.host();
        let tuner = self
            .registry
            .get(ip)
            .ok_or_else(|| VfsError::NotFound(format!("unknown tuner: {}", ip)))?;

        log::debug!("[Tuners] Fetching lineup from {}", tuner.lineup_url);
        let entries: Vec<LineupEntry> = self
            .registry
            .http_client
            .get(&tuner.lineup_url)
            .send()
            .await
            .map_err(|e| VfsError::Unavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| VfsError::Unavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| VfsError::Unavailable(e.to_string()))?;

        let mut list = FileItemList::new(url.to_string());
        for item in lineup_items(&entries) {
            list.push(item);
        }
        Ok(list)
    }

    async fn exists(&self, url: &VfsUrl) -> VfsResult<bool> {
        if url.host().is_empty() {
            return Ok(true);
        }
        Ok(self.registry.get(url.host()).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hdhomerun_is_recognized_by_server_header() {
        let mut response = SsdpResponse {
            udn: "abc".to_string(),
            location: "http://192.168.1.100:80/dri/device.xml".to_string(),
            server: Some("HDHomeRun/1.0 UPnP/1.0".to_string()),
            source_ip: "192.168.1.100".parse().unwrap(),
        };
        assert!(is_hdhomerun(&response));

        response.server = Some("MiniDLNA/1.3".to_string());
        assert!(!is_hdhomerun(&response));

        response.server = None;
        response.location = "http://192.168.1.100/HDHomeRun.xml".to_string();
        assert!(is_hdhomerun(&response));
    }

    #[test]
    fn discover_json_parses_device_fields() {
        let json = r#"{
            "FriendlyName": "HDHomeRun CONNECT",
            "ModelNumber": "HDHR4-2US",
            "FirmwareName": "hdhomerun4_atsc",
            "DeviceID": "1234ABCD",
            "TunerCount": 2,
            "BaseURL": "http://192.168.1.100:80",
            "LineupURL": "http://192.168.1.100:80/lineup.json"
        }"#;

        let discover: DiscoverJson = serde_json::from_str(json).unwrap();
        assert_eq!(discover.device_id.as_deref(), Some("1234ABCD"));
        assert_eq!(
            discover.lineup_url.as_deref(),
            Some("http://192.168.1.100:80/lineup.json")
        );
        assert_eq!(discover.tuner_count, Some(2));
    }

    #[test]
    fn lineup_url_falls_back_to_base_then_ip() {
        assert_eq!(
            resolve_lineup_url(Some("http://t/lineup.json".into()), None, "1.2.3.4"),
            "http://t/lineup.json"
        );
        assert_eq!(
            resolve_lineup_url(None, Some("http://192.168.1.100:80/".into()), "1.2.3.4"),
            "http://192.168.1.100:80/lineup.json"
        );
        assert_eq!(
            resolve_lineup_url(None, None, "1.2.3.4"),
            "http://1.2.3.4/lineup.json"
        );
    }

    #[test]
    fn drm_channels_are_skipped() {
        let json = r#"[
            {"GuideNumber": "5.1", "GuideName": "KTVU-HD", "HD": 1,
             "URL": "http://192.168.1.100:5004/auto/v5.1"},
            {"GuideNumber": "7.1", "GuideName": "SCRAMBLED", "DRM": 1,
             "URL": "http://192.168.1.100:5004/auto/v7.1"},
            {"GuideNumber": "9.1", "GuideName": "KQED",
             "URL": "http://192.168.1.100:5004/auto/v9.1"}
        ]"#;

        let entries: Vec<LineupEntry> = serde_json::from_str(json).unwrap();
        let items = lineup_items(&entries);

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].label, "5.1 KTVU-HD");
        assert_eq!(items[0].url, "http://192.168.1.100:5004/auto/v5.1");
        assert_eq!(items[0].properties.get("hd").map(String::as_str), Some("1"));
        assert_eq!(items[0].content_type.as_deref(), Some("video/mp2t"));
        assert_eq!(items[1].label, "9.1 KQED");
    }
}
