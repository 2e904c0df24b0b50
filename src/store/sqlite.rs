//! SQLite-backed store (feature `sqlite`), using JSON columns in place of
//! the reference implementation's native document nesting.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use super::{
    CatalogRow, CatalogStore, CategoryStore, IssueStore, SeqStore, StateRow, StateStore,
    StoreError, UpsertOutcome,
};
use crate::aggregate::{ChartEntry, GroupDocument};

/// A `rusqlite`-backed store. One connection, guarded by a mutex: the
/// pipeline is single-threaded per scan pass (§5), so this never
/// contends in practice.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (creating if absent) a database file at `path` and ensures
    /// its schema exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the connection or schema setup
    /// fails.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::Backend(e.to_string()))?;
        Self::from_connection(conn)
    }

    /// Opens an in-memory database, useful for tests that want the real
    /// SQL paths without a temp file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if schema setup fails.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Backend(e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS songs (
                group_key TEXT NOT NULL UNIQUE,
                id INTEGER,
                enabled INTEGER NOT NULL,
                document TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS song_scanner_state (
                tja_path TEXT NOT NULL UNIQUE,
                row TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS import_issues (
                reason TEXT NOT NULL,
                path TEXT NOT NULL,
                course_raw TEXT NOT NULL,
                UNIQUE(reason, path, course_raw)
            );
            CREATE TABLE IF NOT EXISTS seq (
                name TEXT NOT NULL UNIQUE,
                value INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER NOT NULL UNIQUE,
                title TEXT NOT NULL
            );",
        )
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("sqlite connection mutex poisoned".to_string()))
    }
}

fn row_from_columns(id: Option<i64>, enabled: i64, document_json: &str) -> Result<CatalogRow, StoreError> {
    let document: GroupDocument = serde_json::from_str(document_json)?;
    Ok(CatalogRow {
        id: id.map(|v| v as u64),
        document,
        enabled: enabled != 0,
    })
}

impl CatalogStore for SqliteStore {
    fn upsert_base(&self, group_key: &str, base: &GroupDocument) -> Result<UpsertOutcome, StoreError> {
        let conn = self.lock()?;
        let document_json = serde_json::to_string(base)?;
        conn.execute(
            "INSERT OR IGNORE INTO songs (group_key, id, enabled, document) VALUES (?1, NULL, ?2, ?3)",
            params![group_key, i64::from(base.enabled), document_json],
        )
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        let mut stmt = conn
            .prepare("SELECT id, enabled, document FROM songs WHERE group_key = ?1")
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let row = stmt
            .query_row(params![group_key], |r| {
                let id: Option<i64> = r.get(0)?;
                let enabled: i64 = r.get(1)?;
                let document: String = r.get(2)?;
                Ok((id, enabled, document))
            })
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let catalog_row = row_from_columns(row.0, row.1, &row.2)?;
        if catalog_row.id.is_none() && catalog_row.document.charts.is_empty() {
            Ok(UpsertOutcome::Inserted(catalog_row))
        } else {
            Ok(UpsertOutcome::AlreadyPresent(catalog_row))
        }
    }

    fn refresh(&self, group_key: &str, base: &GroupDocument) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT document FROM songs WHERE group_key = ?1")
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let existing_json: Option<String> = stmt
            .query_row(params![group_key], |r| r.get(0))
            .optional()
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let Some(existing_json) = existing_json else {
            return Ok(());
        };
        let existing: GroupDocument = serde_json::from_str(&existing_json)?;
        let mut merged = base.clone();
        merged.charts = existing.charts;

        let document_json = serde_json::to_string(&merged)?;
        conn.execute(
            "UPDATE songs SET document = ?2, enabled = ?3 WHERE group_key = ?1",
            params![group_key, document_json, i64::from(merged.enabled)],
        )
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    fn assign_id_if_absent(&self, group_key: &str, id: u64) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE songs SET id = ?2 WHERE group_key = ?1 AND id IS NULL",
            params![group_key, id as i64],
        )
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    fn set_charts(&self, group_key: &str, charts: &[ChartEntry]) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT document FROM songs WHERE group_key = ?1")
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let existing_json: Option<String> = stmt
            .query_row(params![group_key], |r| r.get(0))
            .optional()
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let Some(existing_json) = existing_json else {
            return Ok(());
        };
        let mut document: GroupDocument = serde_json::from_str(&existing_json)?;
        document.charts = charts.to_vec();
        let document_json = serde_json::to_string(&document)?;
        conn.execute(
            "UPDATE songs SET document = ?2 WHERE group_key = ?1",
            params![group_key, document_json],
        )
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    fn max_id(&self) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let max: Option<i64> = conn
            .query_row("SELECT MAX(id) FROM songs", [], |r| r.get(0))
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(max.unwrap_or(0).max(0) as u64)
    }

    fn mark_disabled_except(&self, seen: &BTreeSet<String>) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT group_key, enabled, document FROM songs")
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let rows: Vec<(String, i64, String)> = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .collect::<Result<_, _>>()
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let mut transitioned = 0;
        for (group_key, enabled, document_json) in rows {
            if seen.contains(&group_key) || enabled == 0 {
                continue;
            }
            let mut document: GroupDocument = serde_json::from_str(&document_json)?;
            document.enabled = false;
            let updated_json = serde_json::to_string(&document)?;
            conn.execute(
                "UPDATE songs SET enabled = 0, document = ?2 WHERE group_key = ?1",
                params![group_key, updated_json],
            )
            .map_err(|e| StoreError::Backend(e.to_string()))?;
            transitioned += 1;
        }
        Ok(transitioned)
    }

    fn delete_invalid_group_keys(&self) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let deleted = conn
            .execute(
                "DELETE FROM songs WHERE group_key IS NULL OR TRIM(group_key) = ''",
                [],
            )
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(deleted as u64)
    }
}

impl StateStore for SqliteStore {
    fn get(&self, tja_path: &str) -> Result<Option<StateRow>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT row FROM song_scanner_state WHERE tja_path = ?1")
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let json: Option<String> = stmt
            .query_row(params![tja_path], |r| r.get(0))
            .optional()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        json.map(|j| serde_json::from_str(&j).map_err(StoreError::from))
            .transpose()
    }

    fn put(&self, row: StateRow) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let json = serde_json::to_string(&row)?;
        conn.execute(
            "INSERT INTO song_scanner_state (tja_path, row) VALUES (?1, ?2)
             ON CONFLICT(tja_path) DO UPDATE SET row = excluded.row",
            params![row.tja_path, json],
        )
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    fn delete_missing(&self, seen: &BTreeSet<String>) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT tja_path FROM song_scanner_state")
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let paths: Vec<String> = stmt
            .query_map([], |r| r.get(0))
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .collect::<Result<_, _>>()
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let mut deleted = 0;
        for path in paths {
            if seen.contains(&path) {
                continue;
            }
            conn.execute(
                "DELETE FROM song_scanner_state WHERE tja_path = ?1",
                params![path],
            )
            .map_err(|e| StoreError::Backend(e.to_string()))?;
            deleted += 1;
        }
        Ok(deleted)
    }
}

impl IssueStore for SqliteStore {
    fn record(&self, reason: &str, path: &str, course_raw: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO import_issues (reason, path, course_raw) VALUES (?1, ?2, ?3)",
            params![reason, path, course_raw],
        )
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }
}

impl SeqStore for SqliteStore {
    fn get(&self, name: &str) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let value: Option<i64> = conn
            .query_row("SELECT value FROM seq WHERE name = ?1", params![name], |r| {
                r.get(0)
            })
            .optional()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(value.unwrap_or(0).max(0) as u64)
    }

    fn set(&self, name: &str, value: u64) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO seq (name, value) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET value = excluded.value",
            params![name, value as i64],
        )
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }
}

impl CategoryStore for SqliteStore {
    fn upsert(&self, id: u32, title: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO categories (id, title) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET title = excluded.title",
            params![id, title],
        )
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    fn title_for(&self, id: u32) -> Result<Option<String>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT title FROM categories WHERE id = ?1",
            params![id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::LegacyCourses;
    use std::collections::BTreeSet as Set;

    fn doc(group_key: &str) -> GroupDocument {
        GroupDocument {
            group_key: group_key.to_string(),
            title: None,
            title_ja: None,
            subtitle: None,
            subtitle_ja: None,
            legacy: LegacyCourses::default(),
            charts: Vec::new(),
            hash: String::new(),
            fingerprint: String::new(),
            paths: Vec::new(),
            audio_hash: None,
            enabled: true,
            managed_by_scanner: true,
            valid_chart_count: 0,
            import_issues: Set::new(),
            diagnostics: Set::new(),
            genre: "Unsorted".to_string(),
        }
    }

    #[test]
    fn upsert_then_assign_id_round_trips() {
        let store = SqliteStore::open_in_memory().unwrap();
        let outcome = store.upsert_base("k", &doc("k")).unwrap();
        assert!(matches!(outcome, UpsertOutcome::Inserted(_)));
        store.assign_id_if_absent("k", 7).unwrap();
        let again = store.upsert_base("k", &doc("k")).unwrap();
        match again {
            UpsertOutcome::AlreadyPresent(row) => assert_eq!(row.id, Some(7)),
            UpsertOutcome::Inserted(_) | UpsertOutcome::TransientConflict => panic!("expected present"),
        }
    }

    #[test]
    fn seq_store_persists_values() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.get("songs").unwrap(), 0);
        store.set("songs", 42).unwrap();
        assert_eq!(store.get("songs").unwrap(), 42);
    }

    #[test]
    fn category_upsert_refreshes_title_in_place() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert(3, "Pop").unwrap();
        assert_eq!(store.title_for(3).unwrap(), Some("Pop".to_string()));
        store.upsert(3, "J-Pop").unwrap();
        assert_eq!(store.title_for(3).unwrap(), Some("J-Pop".to_string()));
        assert_eq!(store.title_for(9).unwrap(), None);
    }
}
