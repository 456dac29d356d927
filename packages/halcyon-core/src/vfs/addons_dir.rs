//! The `addons://` virtual view over the add-on manager.
//!
//! The root lists fixed categories (installed, enabled, outdated) plus
//! one folder per add-on type that currently has an install. Category
//! listings return the add-ons themselves as leaf entries whose
//! properties carry version, type, and enabled state.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use super::{FileItem, FileItemList, VfsError, VfsProvider, VfsResult};
use crate::addons::info::{AddonInfo, AddonType};
use crate::addons::manager::{AddonError, AddonManager};
use crate::url::VfsUrl;

const CATEGORY_INSTALLED: &str = "installed";
const CATEGORY_ENABLED: &str = "enabled";
const CATEGORY_OUTDATED: &str = "outdated";

/// Serves the `addons://` scheme.
pub struct AddonsProvider {
    manager: Arc<AddonManager>,
}

impl AddonsProvider {
    pub fn new(manager: Arc<AddonManager>) -> Self {
        Self { manager }
    }

    fn category_index(&self, url: &VfsUrl) -> VfsResult<FileItemList> {
        let mut list = FileItemList::new(url.to_string());
        list.push(FileItem::folder("Installed", "addons://installed/"));
        list.push(FileItem::folder("Enabled", "addons://enabled/"));
        list.push(FileItem::folder("Outdated", "addons://outdated/"));

        let mut points = BTreeSet::new();
        for info in self.manager.list(None, false).map_err(map_addon_error)? {
            points.insert(info.addon_type.extension_point().to_string());
        }
        for point in points {
            let addon_type = AddonType::from_extension_point(&point);
            list.push(FileItem::folder(
                type_label(&addon_type),
                format!("addons://{}/", point),
            ));
        }
        Ok(list)
    }

    fn addon_items(
        &self,
        category: &str,
        enabled_only: bool,
        addon_type: Option<&AddonType>,
    ) -> VfsResult<Vec<FileItem>> {
        let infos = self
            .manager
            .list(addon_type, enabled_only)
            .map_err(map_addon_error)?;
        let mut items = Vec::new();
        for info in infos {
            let enabled = self.manager.is_enabled(&info.id).map_err(map_addon_error)?;
            items.push(addon_item(&info, category, enabled));
        }
        Ok(items)
    }
}

#[async_trait]
impl VfsProvider for AddonsProvider {
    async fn list(&self, url: &VfsUrl) -> VfsResult<FileItemList> {
        let category = url.host();
        if category.is_empty() {
            return self.category_index(url);
        }
        if !url.path().trim_matches('/').is_empty() {
            // Add-on entries are leaves
            return Err(VfsError::NotFound(url.to_string()));
        }

        let mut list = FileItemList::new(url.to_string());
        match category {
            CATEGORY_INSTALLED => {
                for item in self.addon_items(category, false, None)? {
                    list.push(item);
                }
            }
            CATEGORY_ENABLED => {
                for item in self.addon_items(category, true, None)? {
                    list.push(item);
                }
            }
            CATEGORY_OUTDATED => {
                for update in self.manager.outdated().map_err(map_addon_error)? {
                    let enabled = self
                        .manager
                        .is_enabled(&update.installed.id)
                        .map_err(map_addon_error)?;
                    list.push(
                        addon_item(&update.installed, category, enabled).with_property(
                            "availableVersion",
                            update.available.version.to_string(),
                        ),
                    );
                }
            }
            point => {
                let addon_type = AddonType::from_extension_point(point);
                let known = !matches!(addon_type, AddonType::Unknown(_));
                let items = self.addon_items(point, false, Some(&addon_type))?;
                if !known && items.is_empty() {
                    return Err(VfsError::NotFound(url.to_string()));
                }
                for item in items {
                    list.push(item);
                }
            }
        }
        list.sort_folders_first();
        Ok(list)
    }

    async fn exists(&self, url: &VfsUrl) -> VfsResult<bool> {
        let category = url.host();
        if category.is_empty() {
            return Ok(true);
        }
        let addon_type = AddonType::from_extension_point(category);
        let known_category = matches!(
            category,
            CATEGORY_INSTALLED | CATEGORY_ENABLED | CATEGORY_OUTDATED
        ) || !matches!(addon_type, AddonType::Unknown(_));

        let id = url.path().trim_matches('/');
        if id.is_empty() {
            if known_category {
                return Ok(true);
            }
            return Ok(!self.addon_items(category, false, Some(&addon_type))?.is_empty());
        }

        let Some(info) = self.manager.get(id) else {
            return Ok(false);
        };
        Ok(match category {
            CATEGORY_INSTALLED => true,
            CATEGORY_ENABLED => self.manager.is_enabled(id).map_err(map_addon_error)?,
            CATEGORY_OUTDATED => self
                .manager
                .outdated()
                .map_err(map_addon_error)?
                .iter()
                .any(|update| update.installed.id == id),
            point => info.addon_type.extension_point() == point,
        })
    }
}

fn addon_item(info: &AddonInfo, category: &str, enabled: bool) -> FileItem {
    let mut item = FileItem::file(&info.name, format!("addons://{}/{}", category, info.id))
        .with_property("addonId", info.id.clone())
        .with_property("version", info.version.to_string())
        .with_property("type", info.addon_type.to_string())
        .with_property("enabled", enabled.to_string());
    if !info.summary.is_empty() {
        item = item.with_property("summary", info.summary.clone());
    }
    item
}

fn type_label(addon_type: &AddonType) -> String {
    match addon_type {
        AddonType::Visualization => "Visualizations".to_string(),
        AddonType::Screensaver => "Screensavers".to_string(),
        AddonType::PvrClient => "PVR clients".to_string(),
        AddonType::Repository => "Repositories".to_string(),
        AddonType::VfsProvider => "VFS providers".to_string(),
        AddonType::Unknown(point) => point.clone(),
    }
}

fn map_addon_error(err: AddonError) -> VfsError {
    match err {
        AddonError::NotFound(id) => VfsError::NotFound(id),
        other => VfsError::Unavailable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use tempfile::TempDir;

    use super::*;
    use crate::addons::database::AddonDatabase;
    use crate::config::AddonsConfig;
    use crate::events::NoopEventEmitter;

    fn write_addon(root: &Path, id: &str, version: &str, point: &str) {
        let dir = root.join(id);
        std::fs::create_dir_all(&dir).unwrap();
        let xml = format!(
            r#"<addon id="{id}" name="{id}" version="{version}" provider-name="tests">
  <extension point="{point}"/>
  <extension point="halcyon.addon.metadata">
    <summary>{id} fixture</summary>
  </extension>
</addon>"#
        );
        std::fs::write(dir.join("addon.xml"), xml).unwrap();
    }

    fn provider_with(root: &TempDir) -> (AddonsProvider, Arc<AddonManager>, Arc<AddonDatabase>) {
        let config = AddonsConfig {
            addon_dirs: vec![root.path().to_path_buf()],
            ..AddonsConfig::default()
        };
        let db = Arc::new(AddonDatabase::open_in_memory().unwrap());
        let manager = Arc::new(AddonManager::new(
            Arc::clone(&db),
            &config,
            Arc::new(NoopEventEmitter),
        ));
        manager.load_installed().unwrap();
        (AddonsProvider::new(Arc::clone(&manager)), manager, db)
    }

    fn url(s: &str) -> VfsUrl {
        VfsUrl::parse(s).unwrap()
    }

    #[tokio::test]
    async fn root_lists_categories_and_present_types() {
        let root = TempDir::new().unwrap();
        write_addon(root.path(), "saver.matrix", "1.0", "halcyon.ui.screensaver");
        write_addon(
            root.path(),
            "repository.main",
            "1.0",
            "halcyon.addon.repository",
        );
        let (provider, _, _) = provider_with(&root);

        let list = provider.list(&url("addons://")).await.unwrap();
        let labels: Vec<&str> = list.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(
            labels,
            vec![
                "Installed",
                "Enabled",
                "Outdated",
                "Repositories",
                "Screensavers"
            ]
        );
        assert!(list.items.iter().all(|i| i.is_folder));
    }

    #[tokio::test]
    async fn installed_category_carries_addon_metadata() {
        let root = TempDir::new().unwrap();
        write_addon(root.path(), "saver.matrix", "1.2", "halcyon.ui.screensaver");
        let (provider, _, _) = provider_with(&root);

        let list = provider.list(&url("addons://installed/")).await.unwrap();
        assert_eq!(list.len(), 1);
        let item = &list.items[0];
        assert_eq!(item.url, "addons://installed/saver.matrix");
        assert!(!item.is_folder);
        assert_eq!(item.properties.get("version").unwrap(), "1.2");
        assert_eq!(
            item.properties.get("type").unwrap(),
            "halcyon.ui.screensaver"
        );
        assert_eq!(item.properties.get("enabled").unwrap(), "false");
        assert_eq!(item.properties.get("summary").unwrap(), "saver.matrix fixture");
    }

    #[tokio::test]
    async fn enabled_category_filters_disabled_addons() {
        let root = TempDir::new().unwrap();
        write_addon(root.path(), "saver.matrix", "1.0", "halcyon.ui.screensaver");
        write_addon(
            root.path(),
            "repository.main",
            "1.0",
            "halcyon.addon.repository",
        );
        let (provider, _, _) = provider_with(&root);

        let list = provider.list(&url("addons://enabled/")).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list.items[0].url, "addons://enabled/repository.main");
    }

    #[tokio::test]
    async fn type_category_lists_matching_addons_only() {
        let root = TempDir::new().unwrap();
        write_addon(root.path(), "saver.matrix", "1.0", "halcyon.ui.screensaver");
        write_addon(
            root.path(),
            "repository.main",
            "1.0",
            "halcyon.addon.repository",
        );
        let (provider, _, _) = provider_with(&root);

        let list = provider
            .list(&url("addons://halcyon.ui.screensaver/"))
            .await
            .unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(
            list.items[0].url,
            "addons://halcyon.ui.screensaver/saver.matrix"
        );

        let err = provider.list(&url("addons://bogus.point/")).await.unwrap_err();
        assert!(matches!(err, VfsError::NotFound(_)));
    }

    #[tokio::test]
    async fn outdated_category_reports_available_versions() {
        let root = TempDir::new().unwrap();
        write_addon(root.path(), "saver.matrix", "1.0", "halcyon.ui.screensaver");
        let (provider, manager, db) = provider_with(&root);

        let mut newer = (*manager.get("saver.matrix").unwrap()).clone();
        newer.version = "2.0".parse().unwrap();
        db.set_repo_content("repo.main", &[newer], "abc").unwrap();

        let list = provider.list(&url("addons://outdated/")).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list.items[0].url, "addons://outdated/saver.matrix");
        assert_eq!(
            list.items[0].properties.get("availableVersion").unwrap(),
            "2.0"
        );

        assert!(provider
            .exists(&url("addons://outdated/saver.matrix"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn entries_exist_but_do_not_list() {
        let root = TempDir::new().unwrap();
        write_addon(root.path(), "saver.matrix", "1.0", "halcyon.ui.screensaver");
        let (provider, _, _) = provider_with(&root);

        assert!(provider.exists(&url("addons://")).await.unwrap());
        assert!(provider.exists(&url("addons://installed/")).await.unwrap());
        assert!(provider
            .exists(&url("addons://installed/saver.matrix"))
            .await
            .unwrap());
        // Disabled, so absent from the enabled category
        assert!(!provider
            .exists(&url("addons://enabled/saver.matrix"))
            .await
            .unwrap());
        assert!(!provider
            .exists(&url("addons://installed/never.installed"))
            .await
            .unwrap());

        let err = provider
            .list(&url("addons://installed/saver.matrix"))
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::NotFound(_)));
    }
}
