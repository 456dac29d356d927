//! SQLite persistence for the add-on subsystem.
//!
//! One database holds three concerns: the install ledger (which add-ons
//! are on disk and whether they are enabled), repository content (every
//! add-on a repository offers, metadata stored as a JSON blob), and the
//! auto-update blocklist. All methods are synchronous and cheap; callers
//! on async tasks use them directly.
//!
//! The schema is versioned through a single-row `schema_version` table.
//! `open` walks an older database forward one version at a time, each
//! step inside its own transaction.

use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use thiserror::Error;

use super::info::AddonInfo;
use crate::utils::now_millis;

/// Latest schema version this build writes.
pub const SCHEMA_VERSION: u32 = 2;

/// Errors from add-on database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("metadata serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("unknown schema migration v{0}")]
    UnknownMigration(u32),
}

/// Convenient Result alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// One row of the install ledger.
#[derive(Debug, Clone)]
pub struct InstalledRow {
    pub addon_id: String,
    pub enabled: bool,
    pub origin: Option<String>,
    pub install_date_ms: u64,
    pub last_updated_ms: Option<u64>,
    pub last_used_ms: Option<u64>,
}

/// The add-on database handle.
pub struct AddonDatabase {
    conn: Mutex<Connection>,
}

impl AddonDatabase {
    /// Opens (creating or migrating as needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let mut conn = Connection::open(path)?;
        migrate_connection(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens a fresh in-memory database at the latest schema.
    pub fn open_in_memory() -> DbResult<Self> {
        let mut conn = Connection::open_in_memory()?;
        migrate_connection(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Current schema version of the opened database.
    pub fn schema_version(&self) -> DbResult<u32> {
        let conn = self.conn.lock();
        schema_version(&conn)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Repository content
    // ─────────────────────────────────────────────────────────────────────

    /// Replaces a repository's entries with freshly fetched content.
    ///
    /// Runs in one transaction: a failure anywhere leaves the previous
    /// content intact. Every stored blob gets its `origin` stamped with
    /// the repository id.
    pub fn set_repo_content(
        &self,
        repo_id: &str,
        addons: &[AddonInfo],
        checksum: &str,
    ) -> DbResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM entries WHERE repo_id = ?1", params![repo_id])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO entries (addon_id, version, name, summary, metadata, repo_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for addon in addons {
                let mut stored = addon.clone();
                stored.origin = Some(repo_id.to_string());
                let metadata = serde_json::to_string(&stored)?;
                stmt.execute(params![
                    stored.id,
                    stored.version.to_string(),
                    stored.name,
                    stored.summary,
                    metadata,
                    repo_id,
                ])?;
            }
        }
        tx.execute(
            "INSERT INTO repos (addon_id, checksum, last_checked_ms, version)
             VALUES (?1, ?2, ?3, '')
             ON CONFLICT(addon_id) DO UPDATE SET checksum = ?2, last_checked_ms = ?3",
            params![repo_id, checksum, now_millis() as i64],
        )?;
        tx.commit()?;

        log::debug!(
            "[AddonDb] Stored {} entries for repository {}",
            addons.len(),
            repo_id
        );
        Ok(())
    }

    /// The checksum stored at the repository's last successful update.
    pub fn repo_checksum(&self, repo_id: &str) -> DbResult<Option<String>> {
        let conn = self.conn.lock();
        let checksum = conn
            .query_row(
                "SELECT checksum FROM repos WHERE addon_id = ?1",
                params![repo_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(checksum)
    }

    /// Records that the repository was checked, and at which add-on version.
    pub fn touch_repo(&self, repo_id: &str, version: &str) -> DbResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO repos (addon_id, checksum, last_checked_ms, version)
             VALUES (?1, '', ?2, ?3)
             ON CONFLICT(addon_id) DO UPDATE SET last_checked_ms = ?2, version = ?3",
            params![repo_id, now_millis() as i64, version],
        )?;
        Ok(())
    }

    /// Highest version of an add-on offered by any repository.
    ///
    /// Version comparison happens here rather than in SQL because the
    /// ordering is not lexicographic.
    pub fn latest_entry(&self, addon_id: &str) -> DbResult<Option<AddonInfo>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT metadata FROM entries WHERE addon_id = ?1")?;
        let rows = stmt.query_map(params![addon_id], |row| row.get::<_, String>(0))?;

        let mut best: Option<AddonInfo> = None;
        for metadata in rows {
            let info: AddonInfo = match serde_json::from_str(&metadata?) {
                Ok(info) => info,
                Err(e) => {
                    log::warn!("[AddonDb] Corrupt metadata for {}: {}", addon_id, e);
                    continue;
                }
            };
            if best.as_ref().map_or(true, |b| info.version > b.version) {
                best = Some(info);
            }
        }
        Ok(best)
    }

    /// Case-insensitive substring search over entry names and summaries,
    /// keeping the highest version per add-on id.
    pub fn search(&self, query: &str) -> DbResult<Vec<AddonInfo>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT metadata FROM entries
             WHERE name LIKE '%' || ?1 || '%' OR summary LIKE '%' || ?1 || '%'",
        )?;
        let rows = stmt.query_map(params![query], |row| row.get::<_, String>(0))?;

        let mut by_id: BTreeMap<String, AddonInfo> = BTreeMap::new();
        for metadata in rows {
            let info: AddonInfo = match serde_json::from_str(&metadata?) {
                Ok(info) => info,
                Err(e) => {
                    log::warn!("[AddonDb] Corrupt metadata in search: {}", e);
                    continue;
                }
            };
            match by_id.get(&info.id) {
                Some(existing) if existing.version >= info.version => {}
                _ => {
                    by_id.insert(info.id.clone(), info);
                }
            }
        }
        Ok(by_id.into_values().collect())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Install ledger
    // ─────────────────────────────────────────────────────────────────────

    /// Adds (or refreshes) an install-ledger row.
    ///
    /// A reinstall keeps the original install date and enabled state and
    /// only bumps the update timestamp.
    pub fn add_installed(
        &self,
        addon_id: &str,
        origin: Option<&str>,
        enabled: bool,
    ) -> DbResult<()> {
        let conn = self.conn.lock();
        let now = now_millis() as i64;
        conn.execute(
            "INSERT INTO installed (addon_id, enabled, origin, install_date_ms, last_updated_ms, last_used_ms)
             VALUES (?1, ?2, ?3, ?4, ?4, NULL)
             ON CONFLICT(addon_id) DO UPDATE SET last_updated_ms = ?4, origin = ?3",
            params![addon_id, enabled, origin, now],
        )?;
        Ok(())
    }

    pub fn remove_installed(&self, addon_id: &str) -> DbResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM installed WHERE addon_id = ?1",
            params![addon_id],
        )?;
        Ok(())
    }

    /// All install-ledger rows.
    pub fn installed(&self) -> DbResult<Vec<InstalledRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT addon_id, enabled, origin, install_date_ms, last_updated_ms, last_used_ms
             FROM installed ORDER BY addon_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(InstalledRow {
                addon_id: row.get(0)?,
                enabled: row.get(1)?,
                origin: row.get(2)?,
                install_date_ms: row.get::<_, i64>(3)? as u64,
                last_updated_ms: row.get::<_, Option<i64>>(4)?.map(|v| v as u64),
                last_used_ms: row.get::<_, Option<i64>>(5)?.map(|v| v as u64),
            })
        })?;
        let mut installed = Vec::new();
        for row in rows {
            installed.push(row?);
        }
        Ok(installed)
    }

    pub fn is_installed(&self, addon_id: &str) -> DbResult<bool> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM installed WHERE addon_id = ?1",
            params![addon_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn set_enabled(&self, addon_id: &str, enabled: bool) -> DbResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE installed SET enabled = ?2 WHERE addon_id = ?1",
            params![addon_id, enabled],
        )?;
        Ok(())
    }

    /// An add-on the ledger does not know reads as disabled.
    pub fn is_enabled(&self, addon_id: &str) -> DbResult<bool> {
        let conn = self.conn.lock();
        let enabled = conn
            .query_row(
                "SELECT enabled FROM installed WHERE addon_id = ?1",
                params![addon_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(enabled.unwrap_or(false))
    }

    pub fn set_last_used(&self, addon_id: &str) -> DbResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE installed SET last_used_ms = ?2 WHERE addon_id = ?1",
            params![addon_id, now_millis() as i64],
        )?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Auto-update blocklist
    // ─────────────────────────────────────────────────────────────────────

    pub fn block_updates(&self, addon_id: &str) -> DbResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO update_blocks (addon_id) VALUES (?1)",
            params![addon_id],
        )?;
        Ok(())
    }

    pub fn unblock_updates(&self, addon_id: &str) -> DbResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM update_blocks WHERE addon_id = ?1",
            params![addon_id],
        )?;
        Ok(())
    }

    pub fn updates_blocked(&self, addon_id: &str) -> DbResult<bool> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM update_blocks WHERE addon_id = ?1",
            params![addon_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn blocked_ids(&self) -> DbResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT addon_id FROM update_blocks ORDER BY addon_id")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut ids = Vec::new();
        for id in rows {
            ids.push(id?);
        }
        Ok(ids)
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Schema migrations
// ─────────────────────────────────────────────────────────────────────────

fn schema_version(conn: &Connection) -> DbResult<u32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;
    let version: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get(0)
        })?;
    Ok(version.unwrap_or(0) as u32)
}

fn migrate_connection(conn: &mut Connection) -> DbResult<()> {
    let current = schema_version(conn)?;
    for version in current + 1..=SCHEMA_VERSION {
        let tx = conn.transaction()?;
        apply_migration(&tx, version)?;
        tx.execute("DELETE FROM schema_version", [])?;
        tx.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            params![version],
        )?;
        tx.commit()?;
        log::info!("[AddonDb] Migrated schema to v{}", version);
    }
    Ok(())
}

/// One migration step. Statements use IF NOT EXISTS so a partially
/// applied step can be re-run safely.
fn apply_migration(tx: &Transaction<'_>, version: u32) -> DbResult<()> {
    match version {
        1 => {
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS installed (
                     addon_id TEXT PRIMARY KEY,
                     enabled INTEGER NOT NULL DEFAULT 0,
                     origin TEXT,
                     install_date_ms INTEGER NOT NULL,
                     last_updated_ms INTEGER,
                     last_used_ms INTEGER
                 );
                 CREATE TABLE IF NOT EXISTS entries (
                     id INTEGER PRIMARY KEY AUTOINCREMENT,
                     addon_id TEXT NOT NULL,
                     version TEXT NOT NULL,
                     name TEXT NOT NULL,
                     summary TEXT,
                     metadata TEXT NOT NULL,
                     repo_id TEXT
                 );
                 CREATE INDEX IF NOT EXISTS idx_entries_addon_id ON entries (addon_id);
                 CREATE TABLE IF NOT EXISTS repos (
                     addon_id TEXT PRIMARY KEY,
                     checksum TEXT,
                     last_checked_ms INTEGER,
                     version TEXT
                 );",
            )?;
        }
        2 => {
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS update_blocks (
                     addon_id TEXT PRIMARY KEY
                 );",
            )?;
        }
        other => return Err(DbError::UnknownMigration(other)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::addons::info::AddonType;

    fn info(id: &str, version: &str) -> AddonInfo {
        AddonInfo {
            id: id.to_string(),
            name: id.to_string(),
            version: version.parse().unwrap(),
            addon_type: AddonType::Screensaver,
            provider: String::new(),
            summary: format!("{} screensaver", id),
            description: String::new(),
            license: String::new(),
            platforms: vec![],
            library: None,
            origin: None,
            dependencies: vec![],
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn fresh_database_opens_at_latest_version() {
        let db = AddonDatabase::open_in_memory().unwrap();
        assert_eq!(db.schema_version().unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn migrations_step_one_version_at_a_time() {
        let mut conn = Connection::open_in_memory().unwrap();

        // Build a v1 database by hand
        let tx = conn.transaction().unwrap();
        apply_migration(&tx, 1).unwrap();
        tx.execute_batch(
            "CREATE TABLE schema_version (version INTEGER NOT NULL);
             INSERT INTO schema_version (version) VALUES (1);",
        )
        .unwrap();
        tx.commit().unwrap();

        migrate_connection(&mut conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);

        // v2's table must exist now
        conn.execute("INSERT INTO update_blocks (addon_id) VALUES ('x')", [])
            .unwrap();
    }

    #[test]
    fn repo_content_replaces_only_that_repo() {
        let db = AddonDatabase::open_in_memory().unwrap();

        db.set_repo_content("repo.a", &[info("saver.one", "1.0")], "aaa")
            .unwrap();
        db.set_repo_content("repo.b", &[info("saver.two", "1.0")], "bbb")
            .unwrap();
        db.set_repo_content("repo.a", &[info("saver.three", "1.0")], "ccc")
            .unwrap();

        assert!(db.latest_entry("saver.one").unwrap().is_none());
        assert!(db.latest_entry("saver.two").unwrap().is_some());
        assert!(db.latest_entry("saver.three").unwrap().is_some());
        assert_eq!(db.repo_checksum("repo.a").unwrap().as_deref(), Some("ccc"));
        assert_eq!(db.repo_checksum("repo.b").unwrap().as_deref(), Some("bbb"));
    }

    #[test]
    fn latest_entry_picks_the_highest_version_across_repos() {
        let db = AddonDatabase::open_in_memory().unwrap();

        db.set_repo_content("repo.a", &[info("saver.x", "1.0")], "a")
            .unwrap();
        db.set_repo_content("repo.b", &[info("saver.x", "1.2")], "b")
            .unwrap();

        let latest = db.latest_entry("saver.x").unwrap().unwrap();
        assert_eq!(latest.version.to_string(), "1.2");
        assert_eq!(latest.origin.as_deref(), Some("repo.b"));
    }

    #[test]
    fn search_matches_name_and_summary() {
        let db = AddonDatabase::open_in_memory().unwrap();
        db.set_repo_content(
            "repo.a",
            &[info("saver.matrix", "1.0"), info("visual.wave", "1.0")],
            "a",
        )
        .unwrap();

        let hits = db.search("MATRIX").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "saver.matrix");

        // Summary text matches too
        let hits = db.search("screensaver").unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn unknown_addon_reads_as_disabled() {
        let db = AddonDatabase::open_in_memory().unwrap();
        assert!(!db.is_enabled("never.heard.of.it").unwrap());
    }

    #[test]
    fn install_ledger_round_trips() {
        let db = AddonDatabase::open_in_memory().unwrap();

        db.add_installed("saver.matrix", Some("repo.a"), false)
            .unwrap();
        assert!(db.is_installed("saver.matrix").unwrap());
        assert!(!db.is_enabled("saver.matrix").unwrap());

        db.set_enabled("saver.matrix", true).unwrap();
        assert!(db.is_enabled("saver.matrix").unwrap());

        let rows = db.installed().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].addon_id, "saver.matrix");
        assert_eq!(rows[0].origin.as_deref(), Some("repo.a"));
        assert!(rows[0].install_date_ms > 0);

        db.remove_installed("saver.matrix").unwrap();
        assert!(!db.is_installed("saver.matrix").unwrap());
    }

    #[test]
    fn reinstall_keeps_enabled_state_and_install_date() {
        let db = AddonDatabase::open_in_memory().unwrap();

        db.add_installed("saver.matrix", None, false).unwrap();
        db.set_enabled("saver.matrix", true).unwrap();
        let first = db.installed().unwrap()[0].install_date_ms;

        db.add_installed("saver.matrix", Some("repo.a"), false)
            .unwrap();

        let rows = db.installed().unwrap();
        assert!(rows[0].enabled);
        assert_eq!(rows[0].install_date_ms, first);
        assert_eq!(rows[0].origin.as_deref(), Some("repo.a"));
    }

    #[test]
    fn update_blocklist_round_trips() {
        let db = AddonDatabase::open_in_memory().unwrap();

        assert!(!db.updates_blocked("pvr.tuner").unwrap());
        db.block_updates("pvr.tuner").unwrap();
        db.block_updates("pvr.tuner").unwrap();
        assert!(db.updates_blocked("pvr.tuner").unwrap());
        assert_eq!(db.blocked_ids().unwrap(), vec!["pvr.tuner".to_string()]);

        db.unblock_updates("pvr.tuner").unwrap();
        assert!(!db.updates_blocked("pvr.tuner").unwrap());
    }

    #[test]
    fn touch_repo_records_version_without_touching_checksum() {
        let db = AddonDatabase::open_in_memory().unwrap();

        db.set_repo_content("repo.a", &[], "abc").unwrap();
        db.touch_repo("repo.a", "2.1.0").unwrap();

        assert_eq!(db.repo_checksum("repo.a").unwrap().as_deref(), Some("abc"));
    }
}
