//! Favorites persistence.
//!
//! A plain `(user_id, content_id)` table without a uniqueness constraint:
//! `add_favorite` checks membership first and `remove_favorite` deletes every
//! matching row.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{Connection, params};

/// Cloneable handle that opens a short-lived connection per call, usable
/// from any blocking task.
#[derive(Debug, Clone)]
pub struct FavoriteStore {
    db_path: PathBuf,
}

impl FavoriteStore {
    /// Opens (and if necessary creates) the SQLite DB and its table.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating favorites directory {}", parent.display()))?;
        }

        let store = Self {
            db_path: path.to_path_buf(),
        };
        store.with_connection(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")
                .context("enabling WAL mode for favorites DB")?;
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS favorites (
                    user_id TEXT,
                    content_id TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_favorites_user ON favorites(user_id);
                "#,
            )?;
            Ok(())
        })?;
        Ok(store)
    }

    fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = Connection::open(&self.db_path)
            .with_context(|| format!("opening favorites DB {}", self.db_path.display()))?;
        f(&conn)
    }

    pub fn is_favorite(&self, user_id: &str, content_id: &str) -> Result<bool> {
        self.with_connection(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM favorites WHERE user_id = ?1 AND content_id = ?2",
                params![user_id, content_id],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    pub fn add_favorite(&self, user_id: &str, content_id: &str) -> Result<()> {
        if self.is_favorite(user_id, content_id)? {
            return Ok(());
        }
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO favorites (user_id, content_id) VALUES (?1, ?2)",
                params![user_id, content_id],
            )?;
            Ok(())
        })
    }

    pub fn remove_favorite(&self, user_id: &str, content_id: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "DELETE FROM favorites WHERE user_id = ?1 AND content_id = ?2",
                params![user_id, content_id],
            )?;
            Ok(())
        })
    }

    /// Content ids in insertion order, without duplicates.
    pub fn list_favorites(&self, user_id: &str) -> Result<Vec<String>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT content_id
                FROM favorites
                WHERE user_id = ?1
                GROUP BY content_id
                ORDER BY MIN(rowid) ASC
                "#,
            )?;
            let mut rows = stmt.query([user_id])?;
            let mut ids = Vec::new();
            while let Some(row) = rows.next()? {
                ids.push(row.get(0)?);
            }
            Ok(ids)
        })
    }
}
