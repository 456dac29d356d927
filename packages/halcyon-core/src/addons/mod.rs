//! The add-on subsystem.
//!
//! Add-ons are directories holding an `addon.xml` manifest and, for
//! binary types, a platform shared object. This module covers the whole
//! pipeline: manifest parsing, the SQLite-backed catalog, installed
//! add-on lifecycle, repository index polling, and the C ABI used to
//! drive binary add-ons.

pub mod binary;
pub mod database;
pub mod info;
pub mod manager;
pub mod repository;
pub mod version;
pub mod xml;

pub use binary::{AddonProps, BinaryAddon, BinaryAddonError, Screensaver, Visualization};
pub use database::{AddonDatabase, DbError, InstalledRow};
pub use info::{AddonDependency, AddonInfo, AddonType, METADATA_EXTENSION_POINT};
pub use manager::{AddonError, AddonManager, AddonUpdate};
pub use repository::{RefreshSummary, RepositoryUpdater};
pub use version::{AddonVersion, VersionError};
pub use xml::{parse_addon_xml, parse_repository_xml, AddonXmlError};
