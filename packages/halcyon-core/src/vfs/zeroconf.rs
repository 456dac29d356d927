//! zeroconf:// directory provider.
//!
//! Browses DNS-SD for file-serving services and presents each one as a
//! folder whose URL points at the service's native scheme, so selecting an
//! entry hands off to the real provider. Service types whose scheme has no
//! registered provider are not browsed at all.

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use mdns_sd::{ResolvedService, ScopedIp, ServiceDaemon, ServiceEvent};
use tokio::time::timeout;

use crate::config::Config;
use crate::upnp::ssdp::{DiscoveryError, DiscoveryResult};
use crate::url::VfsUrl;
use crate::vfs::{FileItem, FileItemList, Vfs, VfsError, VfsProvider, VfsResult};

/// DNS-SD service types worth showing, with the VFS scheme each maps to.
/// Note: the trailing dot is required by mdns-sd.
const SERVICE_TYPES: &[(&str, &str)] = &[
    ("_ftp._tcp.local.", "ftp"),
    ("_sftp-ssh._tcp.local.", "sftp"),
    ("_smb._tcp.local.", "smb"),
    ("_nfs._tcp.local.", "nfs"),
    ("_webdav._tcp.local.", "dav"),
];

/// Creates a new mDNS service daemon.
///
/// Called once at bootstrap; the daemon spawns a background thread and is
/// shared between browsing and service advertisement.
pub fn create_daemon() -> DiscoveryResult<ServiceDaemon> {
    ServiceDaemon::new().map_err(|e| DiscoveryError::MdnsDaemon(e.to_string()))
}

/// Provider for the `zeroconf` scheme.
pub struct ZeroconfProvider {
    daemon: Arc<ServiceDaemon>,
    vfs: Weak<Vfs>,
    browse_timeout: Duration,
}

impl ZeroconfProvider {
    pub fn new(daemon: Arc<ServiceDaemon>, vfs: Weak<Vfs>, config: &Config) -> Self {
        Self {
            daemon,
            vfs,
            browse_timeout: Duration::from_millis(config.mdns_browse_timeout_ms),
        }
    }
}

#[async_trait]
impl VfsProvider for ZeroconfProvider {
    async fn list(&self, url: &VfsUrl) -> VfsResult<FileItemList> {
        if !url.host().is_empty() || !url.path().trim_matches('/').is_empty() {
            return Err(VfsError::NotFound(
                "zeroconf URLs have no subdirectories".to_string(),
            ));
        }

        let vfs = self
            .vfs
            .upgrade()
            .ok_or_else(|| VfsError::Unavailable("VFS router has shut down".to_string()))?;

        let enabled = enabled_types(&vfs);
        let mut list = FileItemList::new(url.to_string());
        if enabled.is_empty() {
            return Ok(list);
        }

        let mut browses = Vec::new();
        for (service_type, scheme) in enabled {
            match self.daemon.browse(service_type) {
                Ok(receiver) => browses.push((service_type, scheme, receiver)),
                Err(e) => log::warn!("[Zeroconf] Failed to browse {}: {}", service_type, e),
            }
        }
        if browses.is_empty() {
            return Err(VfsError::Unavailable("mDNS browse failed".to_string()));
        }

        // One deadline shared across all service types. Once it passes,
        // already-queued events still drain because timeout polls the
        // receiver before checking the clock.
        let start = Instant::now();
        let mut seen = HashSet::new();
        for (service_type, scheme, receiver) in &browses {
            loop {
                let remaining = self.browse_timeout.saturating_sub(start.elapsed());
                match timeout(remaining, receiver.recv_async()).await {
                    Ok(Ok(ServiceEvent::ServiceResolved(info))) => {
                        if !seen.insert(info.fullname.clone()) {
                            continue;
                        }
                        match service_item(scheme, service_type, &info) {
                            Some(item) => {
                                log::debug!(
                                    "[Zeroconf] Found {} at {}",
                                    item.label,
                                    item.url
                                );
                                list.push(item);
                            }
                            None => log::trace!(
                                "[Zeroconf] {} resolved without an IPv4 address",
                                info.fullname
                            ),
                        }
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        log::debug!("[Zeroconf] Receiver channel closed: {:?}", e);
                        break;
                    }
                    Err(_) => break,
                }
            }
        }

        for (service_type, _, _) in &browses {
            if let Err(e) = self.daemon.stop_browse(service_type) {
                log::warn!("[Zeroconf] Failed to stop browse {}: {:?}", service_type, e);
            }
        }

        log::debug!("[Zeroconf] Browse complete: {} service(s)", list.len());
        list.sort_folders_first();
        Ok(list)
    }

    async fn exists(&self, url: &VfsUrl) -> VfsResult<bool> {
        Ok(url.host().is_empty() && url.path().trim_matches('/').is_empty())
    }
}

/// Service types whose mapped scheme has a registered provider.
pub(crate) fn enabled_types(vfs: &Vfs) -> Vec<(&'static str, &'static str)> {
    SERVICE_TYPES
        .iter()
        .copied()
        .filter(|(_, scheme)| vfs.supports(scheme))
        .collect()
}

/// Converts a resolved service into a listing entry.
///
/// Prefers IPv4 from the resolved records; services that only advertised
/// IPv6 are skipped.
fn service_item(scheme: &str, service_type: &str, info: &ResolvedService) -> Option<FileItem> {
    let ip = info.addresses.iter().find_map(|addr| match addr {
        ScopedIp::V4(v4) => Some(v4.addr().to_string()),
        _ => None,
    })?;

    let label = instance_label(&info.fullname, service_type);
    let path = info
        .txt_properties
        .get_property_val_str("path")
        .filter(|p| !p.is_empty())
        .unwrap_or("/");
    let url = service_url(scheme, &ip, info.port, path);

    Some(
        FileItem::folder(label, url)
            .with_property("serviceType", service_type)
            .with_property("host", info.host.trim_end_matches('.')),
    )
}

/// Extracts the human-readable instance name from a DNS-SD fullname.
pub(crate) fn instance_label(fullname: &str, service_type: &str) -> String {
    fullname
        .strip_suffix(service_type)
        .unwrap_or(fullname)
        .trim_end_matches('.')
        .to_string()
}

/// Builds the native-scheme URL for a resolved service.
///
/// Some services advertise a share path in their TXT record; it is appended
/// with a leading and trailing slash regardless of how it was spelled.
pub(crate) fn service_url(scheme: &str, ip: &str, port: u16, path: &str) -> String {
    let mut url = if port == 0 {
        format!("{}://{}", scheme, ip)
    } else {
        format!("{}://{}:{}", scheme, ip, port)
    };
    if !path.starts_with('/') {
        url.push('/');
    }
    url.push_str(path);
    if !url.ends_with('/') {
        url.push('/');
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubProvider;

    #[async_trait]
    impl VfsProvider for StubProvider {
        async fn list(&self, url: &VfsUrl) -> VfsResult<FileItemList> {
            Ok(FileItemList::new(url.to_string()))
        }
    }

    #[test]
    fn label_strips_service_type_suffix() {
        assert_eq!(
            instance_label("My NAS._ftp._tcp.local.", "_ftp._tcp.local."),
            "My NAS"
        );
        assert_eq!(
            instance_label("bare-name.local.", "_ftp._tcp.local."),
            "bare-name.local"
        );
    }

    #[test]
    fn url_includes_port_when_advertised() {
        assert_eq!(
            service_url("ftp", "192.168.1.9", 2121, "/"),
            "ftp://192.168.1.9:2121/"
        );
        assert_eq!(service_url("smb", "192.168.1.9", 0, "/"), "smb://192.168.1.9/");
    }

    #[test]
    fn url_appends_advertised_txt_path() {
        assert_eq!(
            service_url("ftp", "192.168.1.9", 21, "music"),
            "ftp://192.168.1.9:21/music/"
        );
        assert_eq!(
            service_url("ftp", "192.168.1.9", 21, "/shares/media"),
            "ftp://192.168.1.9:21/shares/media/"
        );
    }

    #[test]
    fn only_registered_schemes_are_browsed() {
        let vfs = Vfs::new();
        vfs.register("ftp", Arc::new(StubProvider));

        let enabled = enabled_types(&vfs);
        assert_eq!(enabled, vec![("_ftp._tcp.local.", "ftp")]);
    }

    #[test]
    fn nothing_is_browsed_without_providers() {
        let vfs = Vfs::new();
        assert!(enabled_types(&vfs).is_empty());
    }
}
