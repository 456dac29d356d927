//! HTTP/WebSocket API layer.
//!
//! This module contains thin handlers that delegate to the VFS router,
//! the discovery registries and the add-on subsystem. It provides the
//! router construction and server startup functionality.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use mdns_sd::ServiceDaemon;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::addons::{AddonManager, RepositoryUpdater};
use crate::advertise::MdnsAdvertiser;
use crate::config::Config;
use crate::events::BroadcastEvent;
use crate::upnp::MediaServerRegistry;
use crate::vfs::{TunerRegistry, Vfs};

pub mod http;
pub mod response;
pub mod ws;

/// Port range scanned when no preferred port is configured.
const PORT_RANGE_START: u16 = 8780;
const PORT_RANGE_END: u16 = 8790;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),

    /// No available ports in the specified range.
    #[error("No available ports in range {start}-{end}")]
    NoAvailablePort { start: u16, end: u16 },
}

/// Shared application state for the API layer.
///
/// This is a thin wrapper that holds references to services.
/// All business logic lives in the services themselves.
#[derive(Clone)]
pub struct AppState {
    /// Virtual file system router.
    pub vfs: Arc<Vfs>,
    /// Registry of discovered media servers.
    pub servers: Arc<MediaServerRegistry>,
    /// Registry of discovered tuner devices.
    pub tuners: Arc<TunerRegistry>,
    /// Installed add-on manager.
    pub addons: Arc<AddonManager>,
    /// Repository index updater.
    pub repositories: Arc<RepositoryUpdater>,
    /// Broadcast channel sender for real-time events.
    pub broadcast_tx: broadcast::Sender<BroadcastEvent>,
    /// Application configuration.
    pub config: Arc<Config>,
    /// Actual port the server bound to (0 until bound).
    port: Arc<AtomicU16>,
    /// Shared mDNS daemon, present when mDNS is enabled.
    mdns_daemon: Option<Arc<ServiceDaemon>>,
    /// mDNS advertiser for network discovery (optional, may fail on some systems).
    /// Kept alive so the service can be unregistered on shutdown.
    /// Created after the server binds to get the actual port.
    mdns_advertiser: Arc<RwLock<Option<MdnsAdvertiser>>>,
}

/// Builder for constructing an `AppState`.
#[derive(Default)]
pub struct AppStateBuilder {
    vfs: Option<Arc<Vfs>>,
    servers: Option<Arc<MediaServerRegistry>>,
    tuners: Option<Arc<TunerRegistry>>,
    addons: Option<Arc<AddonManager>>,
    repositories: Option<Arc<RepositoryUpdater>>,
    broadcast_tx: Option<broadcast::Sender<BroadcastEvent>>,
    config: Option<Arc<Config>>,
    mdns_daemon: Option<Arc<ServiceDaemon>>,
}

impl AppStateBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the VFS router.
    pub fn vfs(mut self, vfs: Arc<Vfs>) -> Self {
        self.vfs = Some(vfs);
        self
    }

    /// Sets the media server registry.
    pub fn servers(mut self, servers: Arc<MediaServerRegistry>) -> Self {
        self.servers = Some(servers);
        self
    }

    /// Sets the tuner registry.
    pub fn tuners(mut self, tuners: Arc<TunerRegistry>) -> Self {
        self.tuners = Some(tuners);
        self
    }

    /// Sets the add-on manager.
    pub fn addons(mut self, addons: Arc<AddonManager>) -> Self {
        self.addons = Some(addons);
        self
    }

    /// Sets the repository updater.
    pub fn repositories(mut self, repositories: Arc<RepositoryUpdater>) -> Self {
        self.repositories = Some(repositories);
        self
    }

    /// Sets the broadcast sender.
    pub fn broadcast_tx(mut self, tx: broadcast::Sender<BroadcastEvent>) -> Self {
        self.broadcast_tx = Some(tx);
        self
    }

    /// Sets the configuration.
    pub fn config(mut self, config: Arc<Config>) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the shared mDNS daemon used for advertising.
    pub fn mdns_daemon(mut self, daemon: Arc<ServiceDaemon>) -> Self {
        self.mdns_daemon = Some(daemon);
        self
    }

    /// Builds the `AppState`, panicking if required fields are missing.
    pub fn build(self) -> AppState {
        AppState {
            vfs: self.vfs.expect("vfs is required"),
            servers: self.servers.expect("servers is required"),
            tuners: self.tuners.expect("tuners is required"),
            addons: self.addons.expect("addons is required"),
            repositories: self.repositories.expect("repositories is required"),
            broadcast_tx: self.broadcast_tx.expect("broadcast_tx is required"),
            config: self.config.expect("config is required"),
            port: Arc::new(AtomicU16::new(0)),
            mdns_daemon: self.mdns_daemon,
            mdns_advertiser: Arc::new(RwLock::new(None)),
        }
    }
}

impl AppState {
    /// Creates a new builder for constructing an `AppState`.
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::new()
    }

    /// Returns the port the server bound to, or 0 before startup.
    pub fn port(&self) -> u16 {
        self.port.load(Ordering::SeqCst)
    }

    fn set_port(&self, port: u16) {
        self.port.store(port, Ordering::SeqCst);
    }

    /// Unregisters the mDNS advertisement, if one was created.
    pub fn stop_advertising(&self) {
        if let Some(advertiser) = self.mdns_advertiser.write().take() {
            advertiser.shutdown();
        }
    }
}

async fn find_available_port(
    start: u16,
    end: u16,
) -> Result<(u16, tokio::net::TcpListener), ServerError> {
    for port in start..=end {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => return Ok((port, listener)),
            Err(_) => continue,
        }
    }
    Err(ServerError::NoAvailablePort { start, end })
}

/// Starts the HTTP server on the configured or auto-discovered port.
///
/// Runs until `shutdown` is cancelled, then drains in-flight requests
/// and unregisters the mDNS advertisement.
pub async fn start_server(state: AppState, shutdown: CancellationToken) -> Result<(), ServerError> {
    let preferred_port = state.config.preferred_port;
    let (port, listener) = if preferred_port > 0 {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], preferred_port));
        (preferred_port, tokio::net::TcpListener::bind(&addr).await?)
    } else {
        find_available_port(PORT_RANGE_START, PORT_RANGE_END).await?
    };

    state.set_port(port);

    // Start mDNS advertisement now that we know the actual port (best-effort, non-fatal)
    if let Some(ref daemon) = state.mdns_daemon {
        match local_ip_address::local_ip() {
            Ok(ip) => match MdnsAdvertiser::new(Arc::clone(daemon), ip, port) {
                Ok(advertiser) => {
                    *state.mdns_advertiser.write() = Some(advertiser);
                }
                Err(e) => {
                    log::debug!("[Server] mDNS advertisement unavailable: {}", e);
                }
            },
            Err(e) => {
                log::debug!("[Server] No local IP for mDNS advertisement: {}", e);
            }
        }
    }

    log::info!("Server listening on http://0.0.0.0:{}", port);
    let advertiser_slot = Arc::clone(&state.mdns_advertiser);
    let app = http::create_router(state);

    // Use into_make_service_with_connect_info to enable ConnectInfo<SocketAddr> extraction
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await?;

    // Unregister while the shared daemon is still alive
    if let Some(advertiser) = advertiser_slot.write().take() {
        advertiser.shutdown();
    }
    Ok(())
}
