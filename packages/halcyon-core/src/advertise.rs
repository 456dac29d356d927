//! mDNS advertisement of the hub's HTTP API.
//!
//! Best-effort: a failure is logged and the hub keeps running without
//! the advertisement. The daemon is shared with the zeroconf browse
//! backend, so registering here adds no extra responder.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mdns_sd::{ServiceDaemon, ServiceInfo};

/// Service type other Halcyon clients browse for.
const SERVICE_TYPE: &str = "_halcyon-hub._tcp.local.";

/// Advertises the hub via mDNS/DNS-SD.
///
/// Registers on creation and unregisters when dropped.
pub struct MdnsAdvertiser {
    daemon: Arc<ServiceDaemon>,
    service_fullname: String,
    /// Tracks whether shutdown has run to prevent double unregister.
    shutdown_called: AtomicBool,
}

impl MdnsAdvertiser {
    /// Registers the hub service on the shared mDNS daemon.
    ///
    /// `advertise_ip` should be the LAN-reachable address clients will
    /// connect to; `port` is the bound HTTP server port.
    pub fn new(
        daemon: Arc<ServiceDaemon>,
        advertise_ip: IpAddr,
        port: u16,
    ) -> Result<Self, mdns_sd::Error> {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let instance_name = format!("Halcyon Hub {}", hostname);
        let dns_hostname = dns_safe(&hostname);

        let mut txt = HashMap::new();
        txt.insert("api_path".to_string(), "/api".to_string());
        txt.insert("events_path".to_string(), "/api/events".to_string());
        txt.insert("version".to_string(), env!("CARGO_PKG_VERSION").to_string());

        let service = ServiceInfo::new(
            SERVICE_TYPE,
            &instance_name,
            &format!("{}.local.", dns_hostname),
            advertise_ip,
            port,
            Some(txt),
        )?;

        let fullname = service.get_fullname().to_string();
        daemon.register(service)?;

        log::info!(
            "[mDNS] Advertising '{}' at {}:{}",
            instance_name,
            advertise_ip,
            port
        );

        Ok(Self {
            daemon,
            service_fullname: fullname,
            shutdown_called: AtomicBool::new(false),
        })
    }

    /// Unregisters the service.
    ///
    /// Runs automatically on drop; extra calls are no-ops.
    pub fn shutdown(&self) {
        if self.shutdown_called.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.daemon.unregister(&self.service_fullname) {
            log::warn!("[mDNS] Failed to unregister service: {}", e);
        }
    }
}

impl Drop for MdnsAdvertiser {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Lowercases and strips a hostname down to DNS label characters.
fn dns_safe(hostname: &str) -> String {
    hostname
        .to_lowercase()
        .replace(' ', "-")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostnames_are_sanitized_for_dns() {
        assert_eq!(dns_safe("Living Room PC"), "living-room-pc");
        assert_eq!(dns_safe("nas_01.local"), "nas01local");
        assert_eq!(dns_safe("plain"), "plain");
    }
}
