//! SQLite persistence for host configuration and plugin settings

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Result as SqliteResult};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::application::errors::StorageError;
use crate::domain::traits::Store;

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(path: impl AsRef<Path>) -> SqliteResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn: Mutex::new(conn) };
        db.init_tables()?;
        Ok(db)
    }

    pub fn open_in_memory() -> SqliteResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn: Mutex::new(conn) };
        db.init_tables()?;
        Ok(db)
    }

    fn init_tables(&self) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());

        conn.execute(
            "CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS plugin_settings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                plugin TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE (plugin, key)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_plugin_settings_plugin ON plugin_settings(plugin)",
            [],
        )?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }
}

#[async_trait]
impl Store for Database {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.lock()?;
        let value = conn
            .query_row("SELECT value FROM config WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM config WHERE key = ?1", [key])?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(String, String)>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT key, value FROM config ORDER BY key")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut entries = Vec::new();
        for entry in rows {
            entries.push(entry?);
        }
        Ok(entries)
    }

    async fn plugin_settings(&self, plugin: &str) -> Result<Vec<(String, String)>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT key, value FROM plugin_settings WHERE plugin = ?1 ORDER BY key",
        )?;
        let rows = stmt.query_map([plugin], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut settings = Vec::new();
        for setting in rows {
            settings.push(setting?);
        }
        Ok(settings)
    }

    async fn set_plugin_setting(&self, plugin: &str, key: &str, value: &str) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO plugin_settings (plugin, key, value, updated_at)
             VALUES (?1, ?2, ?3, datetime('now'))
             ON CONFLICT(plugin, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            rusqlite::params![plugin, key, value],
        )?;
        Ok(())
    }

    async fn delete_plugin_settings(&self, plugin: &str) -> Result<(), StorageError> {
        let conn = self.lock()?;
        let rows = conn.execute("DELETE FROM plugin_settings WHERE plugin = ?1", [plugin])?;
        tracing::debug!("Deleted {} setting rows of {}", rows, plugin);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_config_values() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.get("INACTIVE_PLUGINS").await.unwrap(), None);

        db.set("INACTIVE_PLUGINS", "[\"kibe\"]").await.unwrap();
        db.set("INACTIVE_PLUGINS", "[]").await.unwrap();
        assert_eq!(db.get("INACTIVE_PLUGINS").await.unwrap().as_deref(), Some("[]"));
        assert_eq!(db.list().await.unwrap().len(), 1);

        db.delete("INACTIVE_PLUGINS").await.unwrap();
        assert!(db.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_plugin_settings_are_scoped() {
        let db = Database::open_in_memory().unwrap();
        db.set_plugin_setting("kibe", "nsfw", "true").await.unwrap();
        db.set_plugin_setting("kibe", "nsfw", "false").await.unwrap();
        db.set_plugin_setting("kibe", "pack", "\"cats\"").await.unwrap();
        db.set_plugin_setting("other", "nsfw", "true").await.unwrap();

        let rows = db.plugin_settings("kibe").await.unwrap();
        assert_eq!(
            rows,
            vec![
                ("nsfw".to_string(), "false".to_string()),
                ("pack".to_string(), "\"cats\"".to_string()),
            ]
        );

        db.delete_plugin_settings("kibe").await.unwrap();
        assert!(db.plugin_settings("kibe").await.unwrap().is_empty());
        assert_eq!(db.plugin_settings("other").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugbot.db");

        Database::new(&path).unwrap().set("k", "v").await.unwrap();
        let reopened = Database::new(&path).unwrap();
        assert_eq!(reopened.get("k").await.unwrap().as_deref(), Some("v"));
    }
}
