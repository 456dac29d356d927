//! SSDP device discovery.
//!
//! Supports both multicast (239.255.255.250) and broadcast discovery methods
//! for networks with different multicast configurations.
//!
//! # Discovery Methods
//!
//! - **Multicast**: Standard SSDP M-SEARCH to 239.255.255.250:1900
//! - **Broadcast**: Directed broadcast per interface + limited broadcast fallback
//!
//! Both methods use the same socket for send AND receive since devices reply
//! unicast back to the sending socket/port. The search target is a parameter,
//! so the media server registry and the tuner backend share this module.

use local_ip_address::list_afinet_netifas;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::timeout;

// ─────────────────────────────────────────────────────────────────────────────
// ASCII Case-Insensitive Helpers
// ─────────────────────────────────────────────────────────────────────────────
//
// These avoid allocations from to_lowercase() during SSDP response parsing.
// HTTP headers are ASCII, so byte-level comparison is safe and efficient.

/// Checks if `haystack` contains `needle` (ASCII case-insensitive, no allocation).
///
/// Complexity: O(n*m) where n=haystack.len(), m=needle.len().
/// Acceptable for small needles in HTTP response parsing.
#[inline]
pub(crate) fn contains_ignore_ascii_case(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    if needle.len() > haystack.len() {
        return false;
    }
    haystack
        .as_bytes()
        .windows(needle.len())
        .any(|window| window.eq_ignore_ascii_case(needle.as_bytes()))
}

/// Checks if `s` starts with `prefix` (ASCII case-insensitive, no allocation).
#[inline]
fn starts_with_ignore_ascii_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len() && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

/// Finds the byte index of `needle` in `haystack` (ASCII case-insensitive, no allocation).
/// Returns the index of the first match, or None if not found.
#[inline]
fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    if needle.len() > haystack.len() {
        return None;
    }
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle.as_bytes()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Error Types
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur during network discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Failed to bind UDP socket for discovery.
    #[error("failed to bind UDP socket: {0}")]
    SocketBind(#[source] std::io::Error),

    /// Failed to send SSDP search.
    #[allow(dead_code)]
    #[error("failed to send SSDP search: {0}")]
    SendSearch(#[source] std::io::Error),

    /// No usable network interfaces found.
    #[error("no usable network interfaces found")]
    NoInterfaces,

    /// mDNS daemon error.
    #[error("mDNS daemon error: {0}")]
    MdnsDaemon(String),
}

/// Convenient Result alias for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

// ─────────────────────────────────────────────────────────────────────────────

/// Standard SSDP multicast address and port (protocol specification).
const MULTICAST_ADDR: &str = "239.255.255.250:1900";

/// Limited broadcast address for fallback.
const LIMITED_BROADCAST_ADDR: &str = "255.255.255.255:1900";

/// Discovery method identifier, used for log tagging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscoveryMethod {
    /// SSDP multicast to 239.255.255.250:1900
    Multicast,
    /// SSDP broadcast (directed per-interface + limited 255.255.255.255)
    Broadcast,
}

impl std::fmt::Display for DiscoveryMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Multicast => write!(f, "SSDP multicast"),
            Self::Broadcast => write!(f, "SSDP broadcast"),
        }
    }
}

/// Build the M-SEARCH message.
///
/// Note: HOST header always uses the multicast address per SSDP spec,
/// even when sending via broadcast.
fn build_msearch_message(search_target: &str, mx: u64) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: 239.255.255.250:1900\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {}\r\n\
         ST: {}\r\n\r\n",
        mx, search_target
    )
}

/// A raw SSDP search response.
///
/// One device may answer several times (once per send, per interface); responses
/// are deduplicated by UDN before being returned.
#[derive(Debug, Clone)]
pub struct SsdpResponse {
    /// Canonical device UUID extracted from the USN header.
    pub udn: String,
    /// Device description URL from the LOCATION header.
    pub location: String,
    /// SERVER header, when present (useful for vendor filtering).
    pub server: Option<String>,
    /// Address the response arrived from.
    pub source_ip: IpAddr,
}

/// Normalizes a UPnP device UUID to canonical form for deduplication.
///
/// Handles the shapes seen in the wild:
/// - `uuid:` prefix (from UPnP UDN)
/// - `::urn:schemas-upnp-org:device:...` suffix (from USN)
pub fn normalize_udn(raw: &str) -> String {
    let mut udn = raw.trim().to_string();

    if let Some(stripped) = udn.strip_prefix("uuid:") {
        udn = stripped.to_string();
    }

    if let Some(idx) = udn.find("::") {
        udn.truncate(idx);
    }

    udn
}

/// Parses an SSDP response into its interesting headers.
///
/// Returns None when the response carries no usable USN or LOCATION; without
/// a description URL the device cannot be resolved further.
/// Uses ASCII case-insensitive comparison to avoid allocations during discovery burst.
fn parse_ssdp_response(response: &str, source_ip: IpAddr) -> Option<SsdpResponse> {
    // Extract LOCATION header (find colon index to preserve URL colons)
    let location = response
        .lines()
        .find(|l| starts_with_ignore_ascii_case(l, "location:"))
        .and_then(|l| l.find(':').map(|idx| l[idx + 1..].trim().to_string()))?;

    // Extract UUID from USN (e.g. uuid:4d696e69-444c-...::urn:...)
    // Use case-insensitive search for "uuid:" prefix (no allocation)
    let udn = response
        .lines()
        .find(|l| starts_with_ignore_ascii_case(l, "usn:"))
        .and_then(|l| find_ignore_ascii_case(l, "uuid:").map(|idx| &l[idx + 5..]))
        .map(normalize_udn)
        .unwrap_or_default();

    if udn.is_empty() {
        return None;
    }

    let server = response
        .lines()
        .find(|l| starts_with_ignore_ascii_case(l, "server:"))
        .and_then(|l| l.find(':').map(|idx| l[idx + 1..].trim().to_string()));

    Some(SsdpResponse {
        udn,
        location,
        server,
        source_ip,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Network Interfaces
// ─────────────────────────────────────────────────────────────────────────────

/// Virtual interface prefixes to filter out during discovery.
pub const VIRTUAL_INTERFACE_PREFIXES: &[&str] = &[
    "lo", "docker", "veth", "br-", "virbr", "vmnet", "vbox", "tun", "tap",
];

/// Checks if an interface name belongs to a virtual/container interface.
pub fn is_virtual_interface(name: &str) -> bool {
    let name_lower = name.to_lowercase();
    VIRTUAL_INTERFACE_PREFIXES
        .iter()
        .any(|prefix| name_lower.starts_with(prefix))
}

/// Network interface information for discovery.
#[derive(Debug, Clone)]
pub struct InterfaceInfo {
    /// Interface name (e.g., "en0", "eth0").
    pub name: String,
    /// IPv4 address bound to this interface.
    pub ip: Ipv4Addr,
    /// Broadcast address for this interface (if available).
    pub broadcast: Option<Ipv4Addr>,
}

/// Gets all usable network interfaces for discovery.
///
/// Filters out virtual/container interfaces and loopback.
pub fn get_interfaces() -> Vec<InterfaceInfo> {
    list_afinet_netifas()
        .unwrap_or_else(|e| {
            log::warn!("Failed to list network interfaces: {}", e);
            Vec::new()
        })
        .into_iter()
        .filter_map(|(name, addr)| {
            if is_virtual_interface(&name) {
                log::debug!("Skipping virtual interface: {}", name);
                return None;
            }
            match addr {
                IpAddr::V4(ipv4) if !ipv4.is_loopback() => {
                    log::debug!("Using interface {} ({})", name, ipv4);
                    // Compute broadcast address (assume /24 if we can't determine)
                    // This is a simplification - ideally we'd get the actual netmask
                    let octets = ipv4.octets();
                    let broadcast = Ipv4Addr::new(octets[0], octets[1], octets[2], 255);
                    Some(InterfaceInfo {
                        name,
                        ip: ipv4,
                        broadcast: Some(broadcast),
                    })
                }
                _ => None,
            }
        })
        .collect()
}

/// Creates a UDP socket bound to a specific interface.
///
/// Sets up socket options for SSDP discovery:
/// - SO_REUSEADDR for rapid restarts
/// - SO_REUSEPORT on Unix
/// - Multicast TTL of 4 per UPnP spec
/// - SO_BROADCAST for broadcast mode
fn create_socket(iface_ip: Ipv4Addr, enable_broadcast: bool) -> DiscoveryResult<UdpSocket> {
    let bind_addr = SocketAddr::new(IpAddr::V4(iface_ip), 0);

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(DiscoveryError::SocketBind)?;

    // SO_REUSEADDR - allows bind on rapid restarts
    if let Err(e) = socket.set_reuse_address(true) {
        log::warn!("Failed to set SO_REUSEADDR on {}: {}", iface_ip, e);
    }

    // SO_REUSEPORT - allows multiple sockets on same port (Unix only)
    #[cfg(unix)]
    if let Err(e) = socket.set_reuse_port(true) {
        log::warn!("Failed to set SO_REUSEPORT on {}: {}", iface_ip, e);
    }

    // UPnP 1.0 spec recommends TTL of 4 for SSDP multicast
    if let Err(e) = socket.set_multicast_ttl_v4(4) {
        log::warn!("Failed to set multicast TTL on {}: {}", iface_ip, e);
    }

    // Enable broadcast if requested
    if enable_broadcast {
        if let Err(e) = socket.set_broadcast(true) {
            log::warn!("Failed to set SO_BROADCAST on {}: {}", iface_ip, e);
        }
    }

    // Set non-blocking before converting to tokio socket
    socket
        .set_nonblocking(true)
        .map_err(DiscoveryError::SocketBind)?;

    // Bind the socket
    socket
        .bind(&bind_addr.into())
        .map_err(DiscoveryError::SocketBind)?;

    // Convert to tokio UdpSocket
    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(DiscoveryError::SocketBind)
}

// ─────────────────────────────────────────────────────────────────────────────
// Discovery
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for SSDP discovery.
#[derive(Debug, Clone)]
pub struct SsdpConfig {
    /// Number of M-SEARCH packets to send.
    pub send_count: u64,
    /// Delay between M-SEARCH retries.
    pub retry_delay: Duration,
    /// Total discovery timeout.
    pub discovery_timeout: Duration,
    /// MX value (max response delay in seconds).
    pub mx_value: u64,
}

impl Default for SsdpConfig {
    fn default() -> Self {
        Self {
            send_count: 3,
            retry_delay: Duration::from_millis(800),
            discovery_timeout: Duration::from_secs(5),
            mx_value: 1,
        }
    }
}

/// Searches for devices matching `search_target` using SSDP multicast.
///
/// Sends M-SEARCH queries to 239.255.255.250:1900 on all non-virtual interfaces.
pub async fn search_multicast(
    search_target: &str,
    config: &SsdpConfig,
) -> DiscoveryResult<Vec<SsdpResponse>> {
    search_ssdp(search_target, config, DiscoveryMethod::Multicast, false).await
}

/// Searches for devices matching `search_target` using SSDP broadcast.
///
/// Uses two layers:
/// 1. Directed broadcast per interface (e.g., 192.168.1.255)
/// 2. Limited broadcast fallback (255.255.255.255)
pub async fn search_broadcast(
    search_target: &str,
    config: &SsdpConfig,
) -> DiscoveryResult<Vec<SsdpResponse>> {
    search_ssdp(search_target, config, DiscoveryMethod::Broadcast, true).await
}

/// Internal SSDP search implementation.
///
/// Uses the same socket for send AND receive since devices reply unicast
/// back to the sending socket/port.
async fn search_ssdp(
    search_target: &str,
    config: &SsdpConfig,
    method: DiscoveryMethod,
    use_broadcast: bool,
) -> DiscoveryResult<Vec<SsdpResponse>> {
    let interfaces = get_interfaces();

    if interfaces.is_empty() {
        return Err(DiscoveryError::NoInterfaces);
    }

    let msg = build_msearch_message(search_target, config.mx_value);

    // Create sockets for each interface
    let mut sockets: Vec<(InterfaceInfo, UdpSocket)> = Vec::new();
    for iface in &interfaces {
        match create_socket(iface.ip, use_broadcast) {
            Ok(socket) => {
                sockets.push((iface.clone(), socket));
            }
            Err(e) => {
                log::warn!(
                    "Failed to create socket for {} ({}): {}",
                    iface.name,
                    iface.ip,
                    e
                );
            }
        }
    }

    if sockets.is_empty() {
        return Err(DiscoveryError::NoInterfaces);
    }

    let interface_names: Vec<_> = sockets
        .iter()
        .map(|(i, _)| format!("{} ({})", i.name, i.ip))
        .collect();
    log::debug!(
        "[{}] Searching for {} on {} interface(s): {:?} ({} sends with {}ms spacing)",
        method,
        search_target,
        sockets.len(),
        interface_names,
        config.send_count,
        config.retry_delay.as_millis()
    );

    // Wrap sockets in Arc for sharing between send and receive tasks
    let sockets: Vec<(InterfaceInfo, Arc<UdpSocket>)> = sockets
        .into_iter()
        .map(|(iface, sock)| (iface, Arc::new(sock)))
        .collect();

    // Collect responses from all sockets concurrently
    let responses: Arc<Mutex<Vec<SsdpResponse>>> = Arc::new(Mutex::new(Vec::new()));

    // Determine target addresses based on mode
    let get_target_addrs = |iface: &InterfaceInfo| -> Vec<String> {
        if use_broadcast {
            let mut addrs = Vec::new();
            // Directed broadcast for this interface
            if let Some(broadcast) = iface.broadcast {
                addrs.push(format!("{}:1900", broadcast));
            }
            // Limited broadcast as fallback
            addrs.push(LIMITED_BROADCAST_ADDR.to_string());
            addrs
        } else {
            vec![MULTICAST_ADDR.to_string()]
        }
    };

    // Spawn send tasks (send M-SEARCH multiple times with delays)
    let send_futures: Vec<_> = sockets
        .iter()
        .map(|(iface, socket)| {
            let socket = Arc::clone(socket);
            let iface = iface.clone();
            let msg = msg.as_bytes().to_vec();
            let send_count = config.send_count;
            let retry_delay = config.retry_delay;
            let target_addrs = get_target_addrs(&iface);

            async move {
                for i in 0..send_count {
                    if i > 0 {
                        tokio::time::sleep(retry_delay).await;
                    }
                    for target in &target_addrs {
                        if let Err(e) = socket.send_to(&msg, target).await {
                            log::warn!(
                                "[{}] Failed to send M-SEARCH on {} to {} (attempt {}): {}",
                                method,
                                iface.name,
                                target,
                                i + 1,
                                e
                            );
                        } else {
                            log::trace!(
                                "[{}] Sent M-SEARCH from {} to {}",
                                method,
                                iface.ip,
                                target
                            );
                        }
                    }
                }
            }
        })
        .collect();

    // Spawn receive tasks (collect responses during entire discovery window)
    let recv_futures: Vec<_> = sockets
        .iter()
        .map(|(iface, socket)| {
            let socket = Arc::clone(socket);
            let iface_name = iface.name.clone();
            let iface_ip = iface.ip;
            let responses = Arc::clone(&responses);
            let discovery_timeout = config.discovery_timeout;

            async move {
                let mut buf = [0u8; 2048];
                let start = std::time::Instant::now();

                log::trace!(
                    "[{}] Recv loop starting on {} ({})",
                    method,
                    iface_name,
                    iface_ip
                );

                while start.elapsed() < discovery_timeout {
                    let remaining = discovery_timeout.saturating_sub(start.elapsed());
                    match timeout(remaining, socket.recv_from(&mut buf)).await {
                        Ok(Ok((amt, src))) => {
                            let response = String::from_utf8_lossy(&buf[..amt]);
                            if let Some(parsed) = parse_ssdp_response(&response, src.ip()) {
                                log::debug!(
                                    "[{}] Response: udn={}, location={}, via {}",
                                    method,
                                    parsed.udn,
                                    parsed.location,
                                    iface_name
                                );
                                responses.lock().await.push(parsed);
                            }
                        }
                        Ok(Err(e)) => {
                            log::warn!(
                                "[{}] Socket recv error on {} ({}): {}",
                                method,
                                iface_name,
                                iface_ip,
                                e
                            );
                        }
                        Err(_) => break, // Timeout
                    }
                }

                log::trace!(
                    "[{}] Recv loop finished on {} ({}) after {}ms",
                    method,
                    iface_name,
                    iface_ip,
                    start.elapsed().as_millis()
                );
            }
        })
        .collect();

    // Run sends and receives concurrently
    let (_, _) = tokio::join!(
        futures::future::join_all(send_futures),
        futures::future::join_all(recv_futures)
    );

    // Extract collected responses
    let mut responses = std::mem::take(&mut *responses.lock().await);

    // Deduplicate by UDN using HashSet for O(1) lookup
    let mut seen = HashSet::new();
    responses.retain(|r| seen.insert(r.udn.clone()));

    // Sort by UDN for consistent ordering
    responses.sort_by(|a, b| a.udn.cmp(&b.udn));

    log::debug!(
        "[{}] Search complete: {} unique device(s) answered",
        method,
        responses.len()
    );

    Ok(responses)
}
