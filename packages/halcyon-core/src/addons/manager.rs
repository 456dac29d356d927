//! Installed add-on bookkeeping.
//!
//! The manager owns the in-memory view of installed add-ons and keeps it
//! reconciled with the on-disk trees and the database ledger. Lifecycle
//! changes (install, uninstall, enable, disable) go through here so that
//! dependency rules hold and events reach clients.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use super::database::{AddonDatabase, DbError};
use super::info::{AddonInfo, AddonType};
use super::xml::{parse_addon_xml, AddonXmlError};
use crate::config::AddonsConfig;
use crate::events::{AddonEvent, EventEmitter};
use crate::utils::now_millis;

/// Errors from add-on lifecycle operations.
#[derive(Debug, Error)]
pub enum AddonError {
    #[error("add-on not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("invalid addon.xml: {0}")]
    Xml(#[from] AddonXmlError),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{addon_id} requires {dependency}, which is not installed")]
    MissingDependency {
        addon_id: String,
        dependency: String,
    },

    #[error("{addon_id} is required by {required_by}")]
    RequiredBy {
        addon_id: String,
        required_by: String,
    },

    #[error("{0} does not support this platform")]
    UnsupportedPlatform(String),
}

/// An installed add-on with a newer version available in a repository.
#[derive(Debug, Clone)]
pub struct AddonUpdate {
    pub installed: Arc<AddonInfo>,
    pub available: AddonInfo,
}

/// Registry of installed add-ons.
pub struct AddonManager {
    db: Arc<AddonDatabase>,
    addon_dirs: Vec<PathBuf>,
    installed: RwLock<HashMap<String, Arc<AddonInfo>>>,
    emitter: Arc<dyn EventEmitter>,
}

impl AddonManager {
    pub fn new(
        db: Arc<AddonDatabase>,
        config: &AddonsConfig,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            db,
            addon_dirs: config.addon_dirs.clone(),
            installed: RwLock::new(HashMap::new()),
            emitter,
        }
    }

    /// Scans the add-on directories and reconciles them with the ledger.
    ///
    /// Add-ons found on disk but unknown to the ledger are registered
    /// disabled, except repositories, which start enabled so that shipped
    /// indexes get fetched without manual setup. Ledger rows whose tree
    /// has disappeared are dropped. No events are emitted during load;
    /// this runs before any client can be connected.
    pub fn load_installed(&self) -> Result<usize, AddonError> {
        let found = self.scan_addon_dirs();
        let rows = self.db.installed()?;
        let known: HashSet<&str> = rows.iter().map(|row| row.addon_id.as_str()).collect();

        for info in found.values() {
            if !known.contains(info.id.as_str()) {
                let enabled = info.addon_type == AddonType::Repository;
                self.db
                    .add_installed(&info.id, info.origin.as_deref(), enabled)?;
                log::info!("[Addons] Registered {} {} from disk", info.id, info.version);
            }
        }
        for row in &rows {
            if !found.contains_key(&row.addon_id) {
                log::warn!(
                    "[Addons] {} is in the ledger but missing on disk, dropping",
                    row.addon_id
                );
                self.db.remove_installed(&row.addon_id)?;
            }
        }

        let count = found.len();
        *self.installed.write() = found;
        log::info!("[Addons] Loaded {} installed add-on(s)", count);
        Ok(count)
    }

    fn scan_addon_dirs(&self) -> HashMap<String, Arc<AddonInfo>> {
        let mut found: HashMap<String, Arc<AddonInfo>> = HashMap::new();
        for dir in &self.addon_dirs {
            let entries = match std::fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) => {
                    log::debug!("[Addons] Skipping directory {}: {}", dir.display(), e);
                    continue;
                }
            };
            for entry in entries.flatten() {
                let xml_path = entry.path().join("addon.xml");
                if !xml_path.is_file() {
                    continue;
                }
                let text = match std::fs::read_to_string(&xml_path) {
                    Ok(text) => text,
                    Err(e) => {
                        log::warn!("[Addons] Cannot read {}: {}", xml_path.display(), e);
                        continue;
                    }
                };
                let info = match parse_addon_xml(&text) {
                    Ok(info) => info,
                    Err(e) => {
                        log::warn!("[Addons] Invalid {}: {}", xml_path.display(), e);
                        continue;
                    }
                };
                if !info.supports_current_platform() {
                    log::debug!("[Addons] {} does not support this platform", info.id);
                    continue;
                }
                let dir_name = entry.file_name();
                if dir_name.to_string_lossy() != info.id {
                    log::warn!(
                        "[Addons] Directory {} holds add-on id {}",
                        dir_name.to_string_lossy(),
                        info.id
                    );
                }
                // Earlier directories take precedence over later ones
                found.entry(info.id.clone()).or_insert_with(|| Arc::new(info));
            }
        }
        found
    }

    pub fn get(&self, addon_id: &str) -> Option<Arc<AddonInfo>> {
        self.installed.read().get(addon_id).cloned()
    }

    /// Installed add-ons, optionally narrowed by type or enabled state.
    pub fn list(
        &self,
        addon_type: Option<&AddonType>,
        enabled_only: bool,
    ) -> Result<Vec<Arc<AddonInfo>>, AddonError> {
        let installed = self.installed.read();
        let mut result = Vec::new();
        for info in installed.values() {
            if let Some(wanted) = addon_type {
                if info.addon_type != *wanted {
                    continue;
                }
            }
            if enabled_only && !self.db.is_enabled(&info.id)? {
                continue;
            }
            result.push(Arc::clone(info));
        }
        result.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(result)
    }

    pub fn is_enabled(&self, addon_id: &str) -> Result<bool, AddonError> {
        Ok(self.db.is_enabled(addon_id)?)
    }

    /// Enables or disables an installed add-on.
    ///
    /// Disabling fails while another enabled add-on lists this one as a
    /// required dependency. Setting the state it already has is a no-op
    /// and emits nothing.
    pub fn set_enabled(&self, addon_id: &str, enabled: bool) -> Result<(), AddonError> {
        if self.get(addon_id).is_none() {
            return Err(AddonError::NotFound(addon_id.to_string()));
        }
        if self.db.is_enabled(addon_id)? == enabled {
            return Ok(());
        }
        if !enabled {
            self.ensure_not_required(addon_id, true)?;
        }
        self.db.set_enabled(addon_id, enabled)?;

        let timestamp = now_millis();
        let id = addon_id.to_string();
        if enabled {
            log::info!("[Addons] Enabled {}", addon_id);
            self.emitter.emit_addon(AddonEvent::Enabled { id, timestamp });
        } else {
            log::info!("[Addons] Disabled {}", addon_id);
            self.emitter.emit_addon(AddonEvent::Disabled { id, timestamp });
        }
        Ok(())
    }

    /// Installs the add-on whose tree is unpacked at `path`.
    ///
    /// The tree must already hold an addon.xml. Platform support and
    /// required dependencies are checked before the ledger row is
    /// written. Fresh installs come up enabled; reinstalls keep their
    /// previous enabled state.
    pub fn install_from_dir(
        &self,
        path: &Path,
        origin: Option<&str>,
    ) -> Result<Arc<AddonInfo>, AddonError> {
        let xml_path = path.join("addon.xml");
        let text = std::fs::read_to_string(&xml_path).map_err(|source| AddonError::Io {
            path: xml_path.clone(),
            source,
        })?;
        let mut info = parse_addon_xml(&text)?;
        if !info.supports_current_platform() {
            return Err(AddonError::UnsupportedPlatform(info.id));
        }
        info.origin = origin.map(str::to_string);
        self.check_dependencies(&info)?;

        self.db.add_installed(&info.id, origin, true)?;
        let info = Arc::new(info);
        self.installed
            .write()
            .insert(info.id.clone(), Arc::clone(&info));

        log::info!("[Addons] Installed {} {}", info.id, info.version);
        self.emitter.emit_addon(AddonEvent::Installed {
            id: info.id.clone(),
            version: info.version.to_string(),
            timestamp: now_millis(),
        });
        Ok(info)
    }

    /// Removes an add-on from the ledger and the in-memory view.
    ///
    /// Fails while any other installed add-on, enabled or not, lists
    /// this one as a required dependency. The caller owns deleting the
    /// on-disk tree.
    pub fn uninstall(&self, addon_id: &str) -> Result<Arc<AddonInfo>, AddonError> {
        let info = self
            .get(addon_id)
            .ok_or_else(|| AddonError::NotFound(addon_id.to_string()))?;
        self.ensure_not_required(addon_id, false)?;

        self.db.remove_installed(addon_id)?;
        self.installed.write().remove(addon_id);

        log::info!("[Addons] Uninstalled {}", addon_id);
        self.emitter.emit_addon(AddonEvent::Uninstalled {
            id: addon_id.to_string(),
            timestamp: now_millis(),
        });
        Ok(info)
    }

    /// Installed add-ons with a newer repository version, skipping those
    /// whose auto-update is blocked.
    pub fn outdated(&self) -> Result<Vec<AddonUpdate>, AddonError> {
        let installed: Vec<Arc<AddonInfo>> = self.installed.read().values().cloned().collect();
        let mut updates = Vec::new();
        for info in installed {
            if self.db.updates_blocked(&info.id)? {
                continue;
            }
            let Some(available) = self.db.latest_entry(&info.id)? else {
                continue;
            };
            if available.version > info.version {
                updates.push(AddonUpdate {
                    installed: info,
                    available,
                });
            }
        }
        updates.sort_by(|a, b| a.installed.id.cmp(&b.installed.id));
        Ok(updates)
    }

    pub fn set_update_blocked(&self, addon_id: &str, blocked: bool) -> Result<(), AddonError> {
        if self.get(addon_id).is_none() {
            return Err(AddonError::NotFound(addon_id.to_string()));
        }
        if blocked {
            self.db.block_updates(addon_id)?;
        } else {
            self.db.unblock_updates(addon_id)?;
        }
        Ok(())
    }

    /// Returns whether automatic updates are blocked for an add-on.
    pub fn updates_blocked(&self, addon_id: &str) -> Result<bool, AddonError> {
        Ok(self.db.updates_blocked(addon_id)?)
    }

    /// Searches repository entries by name or summary.
    pub fn search(&self, query: &str) -> Result<Vec<AddonInfo>, AddonError> {
        Ok(self.db.search(query)?)
    }

    /// Records the moment an add-on was last launched.
    pub fn record_use(&self, addon_id: &str) -> Result<(), AddonError> {
        if self.get(addon_id).is_none() {
            return Err(AddonError::NotFound(addon_id.to_string()));
        }
        self.db.set_last_used(addon_id)?;
        Ok(())
    }

    fn check_dependencies(&self, info: &AddonInfo) -> Result<(), AddonError> {
        let installed = self.installed.read();
        for dep in &info.dependencies {
            if dep.optional {
                continue;
            }
            let Some(present) = installed.get(&dep.id) else {
                return Err(AddonError::MissingDependency {
                    addon_id: info.id.clone(),
                    dependency: dep.id.clone(),
                });
            };
            if let Some(min) = &dep.min_version {
                if present.version < *min {
                    return Err(AddonError::MissingDependency {
                        addon_id: info.id.clone(),
                        dependency: format!("{} >= {}", dep.id, min),
                    });
                }
            }
        }
        Ok(())
    }

    /// Fails if another add-on lists `addon_id` as a required dependency.
    /// With `enabled_only`, disabled dependents do not count.
    fn ensure_not_required(&self, addon_id: &str, enabled_only: bool) -> Result<(), AddonError> {
        let installed = self.installed.read();
        for other in installed.values() {
            if other.id == addon_id {
                continue;
            }
            let depends = other
                .dependencies
                .iter()
                .any(|dep| !dep.optional && dep.id == addon_id);
            if !depends {
                continue;
            }
            if enabled_only && !self.db.is_enabled(&other.id)? {
                continue;
            }
            return Err(AddonError::RequiredBy {
                addon_id: addon_id.to_string(),
                required_by: other.id.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tempfile::TempDir;

    use super::*;
    use crate::events::{RepositoryEvent, ServerEvent};

    struct RecordingEmitter {
        addon_events: AtomicUsize,
    }

    impl RecordingEmitter {
        fn new() -> Self {
            Self {
                addon_events: AtomicUsize::new(0),
            }
        }
    }

    impl EventEmitter for RecordingEmitter {
        fn emit_addon(&self, _event: AddonEvent) {
            self.addon_events.fetch_add(1, Ordering::SeqCst);
        }

        fn emit_repository(&self, _event: RepositoryEvent) {}

        fn emit_server(&self, _event: ServerEvent) {}
    }

    fn addon_xml(id: &str, version: &str, point: &str, requires: &[(&str, bool)]) -> String {
        let mut imports = String::new();
        for (dep, optional) in requires {
            imports.push_str(&format!(
                r#"<import addon="{}" optional="{}"/>"#,
                dep, optional
            ));
        }
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<addon id="{id}" name="{id}" version="{version}" provider-name="tests">
  <requires>{imports}</requires>
  <extension point="{point}" library_linux="lib.so" library_osx="lib.dylib" library_windx="lib.dll"/>
  <extension point="halcyon.addon.metadata">
    <summary>{id} test fixture</summary>
  </extension>
</addon>"#
        )
    }

    fn write_addon(root: &Path, id: &str, version: &str, point: &str, requires: &[(&str, bool)]) {
        let dir = root.join(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("addon.xml"), addon_xml(id, version, point, requires)).unwrap();
    }

    fn manager_with(root: &TempDir) -> (AddonManager, Arc<RecordingEmitter>) {
        let emitter = Arc::new(RecordingEmitter::new());
        let config = AddonsConfig {
            addon_dirs: vec![root.path().to_path_buf()],
            ..AddonsConfig::default()
        };
        let db = Arc::new(AddonDatabase::open_in_memory().unwrap());
        let manager = AddonManager::new(db, &config, emitter.clone());
        (manager, emitter)
    }

    #[test]
    fn load_registers_disk_addons_and_emits_nothing() {
        let root = TempDir::new().unwrap();
        write_addon(root.path(), "saver.matrix", "1.0", "halcyon.ui.screensaver", &[]);
        write_addon(
            root.path(),
            "repository.main",
            "2.0",
            "halcyon.addon.repository",
            &[],
        );
        let (manager, emitter) = manager_with(&root);

        assert_eq!(manager.load_installed().unwrap(), 2);
        assert_eq!(emitter.addon_events.load(Ordering::SeqCst), 0);

        // Regular add-ons start disabled; repositories start enabled
        assert!(!manager.is_enabled("saver.matrix").unwrap());
        assert!(manager.is_enabled("repository.main").unwrap());
        assert!(manager.get("saver.matrix").is_some());
    }

    #[test]
    fn load_drops_ledger_rows_without_a_tree() {
        let root = TempDir::new().unwrap();
        let (manager, _) = manager_with(&root);
        manager.db.add_installed("ghost.addon", None, true).unwrap();

        manager.load_installed().unwrap();

        assert!(!manager.db.is_installed("ghost.addon").unwrap());
    }

    #[test]
    fn disable_is_blocked_while_an_enabled_dependent_exists() {
        let root = TempDir::new().unwrap();
        write_addon(root.path(), "lib.core", "1.0", "halcyon.ui.screensaver", &[]);
        write_addon(
            root.path(),
            "saver.fancy",
            "1.0",
            "halcyon.ui.screensaver",
            &[("lib.core", false)],
        );
        let (manager, emitter) = manager_with(&root);
        manager.load_installed().unwrap();

        manager.set_enabled("lib.core", true).unwrap();
        manager.set_enabled("saver.fancy", true).unwrap();
        assert_eq!(emitter.addon_events.load(Ordering::SeqCst), 2);

        let err = manager.set_enabled("lib.core", false).unwrap_err();
        assert!(matches!(err, AddonError::RequiredBy { .. }));

        // Once the dependent is off, disabling goes through
        manager.set_enabled("saver.fancy", false).unwrap();
        manager.set_enabled("lib.core", false).unwrap();
    }

    #[test]
    fn set_enabled_to_current_state_is_a_silent_no_op() {
        let root = TempDir::new().unwrap();
        write_addon(root.path(), "saver.matrix", "1.0", "halcyon.ui.screensaver", &[]);
        let (manager, emitter) = manager_with(&root);
        manager.load_installed().unwrap();

        manager.set_enabled("saver.matrix", false).unwrap();
        assert_eq!(emitter.addon_events.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn install_checks_required_dependencies() {
        let root = TempDir::new().unwrap();
        let (manager, _) = manager_with(&root);
        manager.load_installed().unwrap();

        let staging = TempDir::new().unwrap();
        write_addon(
            staging.path(),
            "saver.fancy",
            "1.0",
            "halcyon.ui.screensaver",
            &[("lib.missing", false)],
        );
        let err = manager
            .install_from_dir(&staging.path().join("saver.fancy"), Some("repo.main"))
            .unwrap_err();
        assert!(matches!(err, AddonError::MissingDependency { .. }));

        // Optional dependencies never block
        write_addon(
            staging.path(),
            "saver.plain",
            "1.0",
            "halcyon.ui.screensaver",
            &[("lib.missing", true)],
        );
        let info = manager
            .install_from_dir(&staging.path().join("saver.plain"), Some("repo.main"))
            .unwrap();
        assert_eq!(info.origin.as_deref(), Some("repo.main"));
        assert!(manager.is_enabled("saver.plain").unwrap());
    }

    #[test]
    fn uninstall_is_blocked_by_any_installed_dependent() {
        let root = TempDir::new().unwrap();
        write_addon(root.path(), "lib.core", "1.0", "halcyon.ui.screensaver", &[]);
        write_addon(
            root.path(),
            "saver.fancy",
            "1.0",
            "halcyon.ui.screensaver",
            &[("lib.core", false)],
        );
        let (manager, _) = manager_with(&root);
        manager.load_installed().unwrap();

        // The dependent is disabled, but it still blocks removal
        let err = manager.uninstall("lib.core").unwrap_err();
        assert!(matches!(err, AddonError::RequiredBy { .. }));

        manager.uninstall("saver.fancy").unwrap();
        manager.uninstall("lib.core").unwrap();
        assert!(manager.get("lib.core").is_none());
    }

    #[test]
    fn outdated_respects_the_update_blocklist() {
        let root = TempDir::new().unwrap();
        write_addon(root.path(), "saver.matrix", "1.0", "halcyon.ui.screensaver", &[]);
        let (manager, _) = manager_with(&root);
        manager.load_installed().unwrap();

        let mut newer = (*manager.get("saver.matrix").unwrap()).clone();
        newer.version = "1.2".parse().unwrap();
        manager
            .db
            .set_repo_content("repo.main", &[newer], "abc")
            .unwrap();

        let updates = manager.outdated().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].available.version.to_string(), "1.2");

        manager.set_update_blocked("saver.matrix", true).unwrap();
        assert!(manager.outdated().unwrap().is_empty());
    }

    #[test]
    fn list_filters_by_type_and_enabled_state() {
        let root = TempDir::new().unwrap();
        write_addon(root.path(), "saver.matrix", "1.0", "halcyon.ui.screensaver", &[]);
        write_addon(
            root.path(),
            "repository.main",
            "1.0",
            "halcyon.addon.repository",
            &[],
        );
        let (manager, _) = manager_with(&root);
        manager.load_installed().unwrap();

        let all = manager.list(None, false).unwrap();
        assert_eq!(all.len(), 2);

        let savers = manager
            .list(Some(&AddonType::Screensaver), false)
            .unwrap();
        assert_eq!(savers.len(), 1);
        assert_eq!(savers[0].id, "saver.matrix");

        // Only the repository is enabled after load
        let enabled = manager.list(None, true).unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, "repository.main");
    }

    #[test]
    fn record_use_stamps_the_install_ledger() {
        let root = TempDir::new().unwrap();
        write_addon(root.path(), "saver.matrix", "1.0", "halcyon.ui.screensaver", &[]);
        let (manager, _) = manager_with(&root);
        manager.load_installed().unwrap();

        let before = manager.db.installed().unwrap();
        assert_eq!(before[0].last_used_ms, None);

        manager.record_use("saver.matrix").unwrap();

        let after = manager.db.installed().unwrap();
        assert!(after[0].last_used_ms.is_some());
    }

    #[test]
    fn unknown_addon_operations_return_not_found() {
        let root = TempDir::new().unwrap();
        let (manager, _) = manager_with(&root);
        manager.load_installed().unwrap();

        assert!(matches!(
            manager.set_enabled("nope", true),
            Err(AddonError::NotFound(_))
        ));
        assert!(matches!(
            manager.uninstall("nope"),
            Err(AddonError::NotFound(_))
        ));
        assert!(matches!(
            manager.record_use("nope"),
            Err(AddonError::NotFound(_))
        ));
    }
}
