//! Repository index refreshes.
//!
//! Every installed and enabled repository add-on advertises a datadir
//! holding an `addons.xml` index next to an `addons.xml.md5` digest. The
//! updater polls the digest first and only downloads and re-parses the
//! index when it changed. A background task re-runs the poll on an
//! interval or when a manual refresh is triggered.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::database::{AddonDatabase, DbError};
use super::info::{AddonInfo, AddonType};
use super::manager::AddonManager;
use super::xml::{parse_repository_xml, AddonXmlError};
use crate::config::Config;
use crate::events::{EventEmitter, RepositoryEvent};
use crate::runtime::TaskSpawner;
use crate::utils::now_millis;

#[derive(Debug, Error)]
enum RepoError {
    #[error("fetch failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("invalid repository index: {0}")]
    Xml(#[from] AddonXmlError),

    #[error("checksum file is empty")]
    EmptyChecksum,

    #[error("index hashes to {computed} but {advertised} was advertised")]
    ChecksumMismatch {
        computed: String,
        advertised: String,
    },

    #[error("repository {0} advertises no datadir")]
    NoDataDir(String),
}

enum RepoOutcome {
    Updated(usize),
    Unchanged,
}

/// Counts from one full refresh pass.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSummary {
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
}

/// Polls repository add-ons and keeps the entry catalog current.
pub struct RepositoryUpdater {
    db: Arc<AddonDatabase>,
    manager: Arc<AddonManager>,
    http_client: Client,
    refresh_interval: Duration,
    emitter: Arc<dyn EventEmitter>,
    refresh_notify: Arc<Notify>,
    cancel_token: CancellationToken,
}

impl RepositoryUpdater {
    pub fn new(
        db: Arc<AddonDatabase>,
        manager: Arc<AddonManager>,
        config: &Config,
        http_client: Client,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            db,
            manager,
            http_client,
            refresh_interval: Duration::from_secs(config.addons.repo_refresh_interval_secs),
            emitter,
            refresh_notify: Arc::new(Notify::new()),
            cancel_token: CancellationToken::new(),
        }
    }

    /// Requests an immediate refresh from the background task.
    pub fn trigger_refresh(&self) {
        self.refresh_notify.notify_one();
    }

    /// Starts the background refresh loop.
    ///
    /// The first interval tick fires immediately, so shipped repositories
    /// get their index right after startup.
    pub fn start_refreshing<S: TaskSpawner>(self: &Arc<Self>, spawner: &S) {
        let updater = Arc::clone(self);
        spawner.spawn("repository refresh", async move {
            let cancel_token = updater.cancel_token.clone();
            let mut interval = tokio::time::interval(updater.refresh_interval);

            loop {
                let is_manual_refresh = tokio::select! {
                    _ = cancel_token.cancelled() => {
                        log::info!("[Repos] Shutting down refresh loop");
                        break;
                    }
                    _ = interval.tick() => false,
                    _ = updater.refresh_notify.notified() => {
                        log::info!("[Repos] Manual refresh triggered");
                        true
                    }
                };

                // Reset interval after manual refresh to push back the automatic pass
                if is_manual_refresh {
                    interval.reset();
                }

                updater.refresh_all().await;
            }
        });
    }

    /// Stops the background refresh loop.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }

    /// Refreshes every installed and enabled repository add-on.
    ///
    /// A failing repository is skipped with its previous entries intact;
    /// the pass continues with the remaining ones.
    pub async fn refresh_all(&self) -> RefreshSummary {
        let repos = match self.manager.list(Some(&AddonType::Repository), true) {
            Ok(repos) => repos,
            Err(e) => {
                log::error!("[Repos] Cannot list repository add-ons: {}", e);
                return RefreshSummary::default();
            }
        };

        let mut summary = RefreshSummary::default();
        for repo in repos {
            match self.refresh_repo(&repo).await {
                Ok(RepoOutcome::Updated(addon_count)) => {
                    summary.updated += 1;
                    self.emitter.emit_repository(RepositoryEvent::Updated {
                        repo_id: repo.id.clone(),
                        addon_count,
                        timestamp: now_millis(),
                    });
                }
                Ok(RepoOutcome::Unchanged) => summary.unchanged += 1,
                Err(e) => {
                    summary.failed += 1;
                    log::warn!("[Repos] Refresh of {} failed: {}", repo.id, e);
                    self.emitter.emit_repository(RepositoryEvent::Failed {
                        repo_id: repo.id.clone(),
                        error: e.to_string(),
                        timestamp: now_millis(),
                    });
                }
            }
        }

        log::info!(
            "[Repos] Refresh pass done: {} updated, {} unchanged, {} failed",
            summary.updated,
            summary.unchanged,
            summary.failed
        );
        summary
    }

    async fn refresh_repo(&self, repo: &AddonInfo) -> Result<RepoOutcome, RepoError> {
        let datadir = repo
            .extra
            .get("datadir")
            .map(|s| s.trim_end_matches('/'))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| RepoError::NoDataDir(repo.id.clone()))?;

        let md5_url = format!("{}/addons.xml.md5", datadir);
        let body = self
            .http_client
            .get(&md5_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let advertised = advertised_checksum(&body).ok_or(RepoError::EmptyChecksum)?;

        if self.db.repo_checksum(&repo.id)?.as_deref() == Some(advertised.as_str()) {
            log::debug!("[Repos] {} unchanged ({})", repo.id, advertised);
            self.db.touch_repo(&repo.id, &repo.version.to_string())?;
            return Ok(RepoOutcome::Unchanged);
        }

        let xml_url = format!("{}/addons.xml", datadir);
        let bytes = self
            .http_client
            .get(&xml_url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        let computed = format!("{:x}", md5::compute(&bytes));
        if computed != advertised {
            return Err(RepoError::ChecksumMismatch {
                computed,
                advertised,
            });
        }

        let text = String::from_utf8_lossy(&bytes);
        let addons = parse_repository_xml(&text)?;
        self.db.set_repo_content(&repo.id, &addons, &computed)?;
        self.db.touch_repo(&repo.id, &repo.version.to_string())?;
        log::info!("[Repos] Updated {} with {} entries", repo.id, addons.len());
        Ok(RepoOutcome::Updated(addons.len()))
    }
}

/// First whitespace-delimited token of an `addons.xml.md5` body, which
/// tolerates the `<hash>  addons.xml` format md5sum writes.
fn advertised_checksum(body: &str) -> Option<String> {
    body.split_whitespace()
        .next()
        .map(|token| token.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_takes_the_first_token() {
        assert_eq!(
            advertised_checksum("D41D8CD98F00B204E9800998ECF8427E  addons.xml\n").as_deref(),
            Some("d41d8cd98f00b204e9800998ecf8427e")
        );
        assert_eq!(
            advertised_checksum("abc123").as_deref(),
            Some("abc123")
        );
        assert_eq!(advertised_checksum("   \n"), None);
    }

    #[test]
    fn computed_digest_matches_md5sum_format() {
        // Digest of the empty input, as written by `md5sum /dev/null`
        let computed = format!("{:x}", md5::compute(b""));
        assert_eq!(computed, "d41d8cd98f00b204e9800998ecf8427e");
    }
}
