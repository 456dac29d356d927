//! Halcyon Core - shared library for the Halcyon media hub.
//!
//! This crate provides the core functionality for Halcyon, a headless media
//! hub that unifies local and network file sources behind one virtual file
//! system and manages a catalog of add-ons. It is designed to be used by the
//! standalone server binary and by embedders that want the services without
//! the HTTP surface.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`runtime`]: Task spawning abstraction for async runtime independence
//! - [`events`]: Event system for real-time client communication
//! - [`url`]: VFS URL parsing and manipulation
//! - [`vfs`]: Virtual file system router and its backends
//! - [`upnp`]: UPnP media server discovery and browsing (SSDP/SOAP)
//! - [`addons`]: Add-on metadata, catalog database and repositories
//! - [`api`]: HTTP/WebSocket surface
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! The crate defines several traits to decouple core logic from
//! platform-specific implementations:
//!
//! - [`TaskSpawner`](runtime::TaskSpawner): Spawning background tasks
//! - [`EventEmitter`](events::EventEmitter): Emitting domain events
//! - [`VfsProvider`](vfs::VfsProvider): Serving one URL scheme in the VFS
//!
//! Each trait has default implementations suitable for the standalone server.

#![warn(clippy::all)]

pub mod addons;
mod advertise;
pub mod api;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod events;
pub mod runtime;
pub mod upnp;
pub mod url;
pub mod utils;
pub mod vfs;

// Re-export commonly used types at the crate root
pub use config::{AddonsConfig, Config, FtpConfig};
pub use error::{DiscoveryResult, HubError, HubResult, SoapResult, VfsResult};
pub use events::{
    AddonEvent, BroadcastEvent, BroadcastEventBridge, EventEmitter, RepositoryEvent, ServerEvent,
};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use url::{UrlError, VfsUrl};
pub use utils::now_millis;

// Re-export VFS types
pub use vfs::{FileItem, FileItemList, Tuner, TunerRegistry, Vfs, VfsError, VfsProvider};

// Re-export UPnP types
pub use upnp::{MediaServer, MediaServerRegistry};

// Re-export add-on types
pub use addons::{
    AddonDatabase, AddonInfo, AddonManager, AddonType, AddonVersion, RepositoryUpdater,
};

// Re-export bootstrap types
pub use bootstrap::{bootstrap_services, BootstrappedServices};

// Re-export API types
pub use api::{start_server, AppState, AppStateBuilder, ServerError};
