//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together. This pattern provides:
//!
//! - **Clarity**: All dependency relationships are visible in one place
//! - **Testability**: Easy to swap implementations for testing
//! - **Maintainability**: Service creation logic is isolated from usage

use std::sync::Arc;
use std::time::Duration;

use mdns_sd::ServiceDaemon;
use reqwest::Client;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::addons::{AddonDatabase, AddonManager, RepositoryUpdater};
use crate::api::AppState;
use crate::config::Config;
use crate::error::{HubError, HubResult};
use crate::events::{BroadcastEvent, BroadcastEventBridge, EventEmitter};
use crate::runtime::TokioSpawner;
use crate::upnp::MediaServerRegistry;
use crate::vfs::addons_dir::AddonsProvider;
use crate::vfs::ftp::FtpProvider;
use crate::vfs::iso9660::IsoProvider;
use crate::vfs::local::LocalProvider;
use crate::vfs::tuner::TunerProvider;
use crate::vfs::upnp_dir::UpnpProvider;
use crate::vfs::zeroconf::{self, ZeroconfProvider};
use crate::vfs::{TunerRegistry, Vfs};

/// Timeout for outbound HTTP requests. Sized for repository index
/// downloads, which can run to a few megabytes; device probes finish
/// well inside it.
const HTTP_TIMEOUT_SECS: u64 = 30;

/// Container for all bootstrapped services.
///
/// This struct holds all the wired services created during bootstrap.
/// It's consumed by `AppState` to build the final application state.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// Virtual file system router with every backend registered.
    pub vfs: Arc<Vfs>,
    /// Registry of discovered UPnP media servers.
    pub servers: Arc<MediaServerRegistry>,
    /// Registry of discovered HDHomeRun tuners.
    pub tuners: Arc<TunerRegistry>,
    /// Add-on catalog database.
    pub database: Arc<AddonDatabase>,
    /// Installed add-on manager.
    pub addons: Arc<AddonManager>,
    /// Repository index updater.
    pub repositories: Arc<RepositoryUpdater>,
    /// Broadcast channel sender for real-time events.
    pub broadcast_tx: broadcast::Sender<BroadcastEvent>,
    /// Event bridge for emitting events to WebSocket and optional external consumers.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Shared mDNS daemon, present when mDNS is enabled and the socket came up.
    pub mdns_daemon: Option<Arc<ServiceDaemon>>,
    /// Application configuration.
    pub config: Arc<Config>,
    /// Shared HTTP client for connection pooling.
    http_client: Client,
    /// Task spawner for background operations.
    pub spawner: TokioSpawner,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
}

impl BootstrappedServices {
    /// Returns the shared HTTP client.
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// Builds the application state consumed by the API layer.
    pub fn app_state(&self) -> AppState {
        let mut builder = AppState::builder()
            .vfs(Arc::clone(&self.vfs))
            .servers(Arc::clone(&self.servers))
            .tuners(Arc::clone(&self.tuners))
            .addons(Arc::clone(&self.addons))
            .repositories(Arc::clone(&self.repositories))
            .broadcast_tx(self.broadcast_tx.clone())
            .config(Arc::clone(&self.config));
        if let Some(daemon) = &self.mdns_daemon {
            builder = builder.mdns_daemon(Arc::clone(daemon));
        }
        builder.build()
    }

    /// Starts the periodic background tasks: media server sweeps, tuner
    /// sweeps and repository index refreshes.
    pub fn start_background_tasks(&self) {
        self.servers.start_sweeping(&self.spawner);
        self.tuners.start_sweeping(&self.spawner);
        self.repositories.start_refreshing(&self.spawner);
    }

    /// Initiates graceful shutdown of all services.
    pub fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");

        // Signal cancellation to all background tasks
        self.cancel_token.cancel();

        self.servers.shutdown();
        self.tuners.shutdown();
        self.repositories.shutdown();

        if let Some(daemon) = &self.mdns_daemon {
            if let Err(e) = daemon.shutdown() {
                log::warn!("[Bootstrap] mDNS daemon shutdown failed: {}", e);
            }
        }

        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Creates the shared HTTP client used for discovery probes, SOAP
/// requests and repository downloads.
///
/// Using a shared client enables connection pooling for better performance.
/// This is created once during bootstrap and injected into services that need it.
fn create_http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()
        .expect("Failed to create HTTP client")
}

/// Bootstraps all application services with their dependencies.
///
/// This is the composition root where all services are instantiated and
/// wired together. The wiring order matters - services are created in
/// dependency order:
///
/// 1. Shared infrastructure (HTTP client, broadcast channel, cancellation token)
/// 2. mDNS daemon (shared by the zeroconf backend and the advertiser)
/// 3. Add-on database and manager (installed add-ons load here)
/// 4. Discovery registries and the repository updater
/// 5. VFS router with every backend registered
///
/// # Errors
///
/// Returns an error when the configuration is invalid or the add-on
/// database cannot be opened.
pub fn bootstrap_services(config: Config) -> HubResult<BootstrappedServices> {
    config.validate().map_err(HubError::Configuration)?;
    let config = Arc::new(config);

    // Create task spawner from current runtime
    let spawner = TokioSpawner::current();

    // Create shared HTTP client for connection pooling
    let http_client = create_http_client();

    // Create broadcast channel for real-time events to WebSocket clients
    let (broadcast_tx, _) = broadcast::channel::<BroadcastEvent>(config.event_channel_capacity);

    // Create the event bridge that maps domain events to broadcast transport
    let event_bridge = Arc::new(BroadcastEventBridge::with_sender(broadcast_tx.clone()));

    // Create cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();

    // The daemon is shared by the zeroconf backend and the service
    // advertiser. Losing it degrades discovery but the hub still works,
    // so a failed socket is non-fatal.
    let mdns_daemon = if config.discovery_mdns {
        match zeroconf::create_daemon() {
            Ok(daemon) => Some(Arc::new(daemon)),
            Err(e) => {
                log::warn!("[Bootstrap] mDNS unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    let database = match &config.addons.database_path {
        Some(path) => Arc::new(AddonDatabase::open(path)?),
        None => {
            log::info!("[Bootstrap] No database path configured, add-on catalog is in-memory");
            Arc::new(AddonDatabase::open_in_memory()?)
        }
    };

    let addons = Arc::new(AddonManager::new(
        Arc::clone(&database),
        &config.addons,
        Arc::clone(&event_bridge) as Arc<dyn EventEmitter>,
    ));
    let installed = addons.load_installed()?;
    log::info!("[Bootstrap] {} add-on(s) installed", installed);

    let servers = Arc::new(MediaServerRegistry::new(
        &config,
        http_client.clone(),
        Arc::clone(&event_bridge) as Arc<dyn EventEmitter>,
    ));

    let tuners = Arc::new(TunerRegistry::new(
        &config,
        http_client.clone(),
        Arc::clone(&event_bridge) as Arc<dyn EventEmitter>,
    ));

    let repositories = Arc::new(RepositoryUpdater::new(
        Arc::clone(&database),
        Arc::clone(&addons),
        &config,
        http_client.clone(),
        Arc::clone(&event_bridge) as Arc<dyn EventEmitter>,
    ));

    let vfs = build_vfs(&config, &servers, &tuners, &addons, mdns_daemon.as_ref());

    Ok(BootstrappedServices {
        vfs,
        servers,
        tuners,
        database,
        addons,
        repositories,
        broadcast_tx,
        event_bridge,
        mdns_daemon,
        config,
        http_client,
        spawner,
        cancel_token,
    })
}

/// Builds the VFS router and registers every backend.
///
/// The ISO 9660 and zeroconf backends hold `Weak` references back to the
/// router for re-dispatching nested URLs, so the router `Arc` has to exist
/// before those providers are constructed.
fn build_vfs(
    config: &Config,
    servers: &Arc<MediaServerRegistry>,
    tuners: &Arc<TunerRegistry>,
    addons: &Arc<AddonManager>,
    mdns_daemon: Option<&Arc<ServiceDaemon>>,
) -> Arc<Vfs> {
    let vfs = Arc::new(Vfs::new());

    vfs.register("file", Arc::new(LocalProvider));
    vfs.register("ftp", Arc::new(FtpProvider::new(config.ftp.clone())));
    vfs.register("iso9660", Arc::new(IsoProvider::new(Arc::downgrade(&vfs))));
    vfs.register("upnp", Arc::new(UpnpProvider::new(Arc::clone(servers))));
    vfs.register("hdhomerun", Arc::new(TunerProvider::new(Arc::clone(tuners))));
    vfs.register("addons", Arc::new(AddonsProvider::new(Arc::clone(addons))));

    if let Some(daemon) = mdns_daemon {
        vfs.register(
            "zeroconf",
            Arc::new(ZeroconfProvider::new(
                Arc::clone(daemon),
                Arc::downgrade(&vfs),
                config,
            )),
        );
    }

    vfs
}
