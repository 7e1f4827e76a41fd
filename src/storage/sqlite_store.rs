use anyhow::Result;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::rusqlite::{params, OpenFlags, OptionalExtension};
use r2d2_sqlite::SqliteConnectionManager;

use crate::storage::area::StorageArea;

/// Namespace used when none is given. One namespace corresponds to one site origin.
pub const DEFAULT_NAMESPACE: &str = "krim.ai";

/// SQLite-based persistent storage.
///
/// All namespaces share one table; each [`SqliteArea`] only sees the rows of
/// its own namespace. Areas created from the same file observe each other's
/// writes, which is how a reloaded consent store finds the previous record.
pub struct SqliteArea {
    pool: Pool<SqliteConnectionManager>,
    namespace: String,
}

impl SqliteArea {
    /// Opens (or creates) a SQLite database at `path` using [`DEFAULT_NAMESPACE`].
    pub fn new(path: &str) -> Result<Self> {
        Self::with_namespace(path, DEFAULT_NAMESPACE)
    }

    /// Opens (or creates) a SQLite database at `path`, scoped to `namespace`.
    pub fn with_namespace(path: &str, namespace: &str) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path)
            .with_flags(
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_URI,
            )
            .with_init(|c| {
                c.busy_timeout(std::time::Duration::from_millis(500))?;
                c.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
                c.execute_batch(
                    "CREATE TABLE IF NOT EXISTS consent_storage (
                        namespace TEXT NOT NULL,
                        key TEXT NOT NULL,
                        value TEXT NOT NULL,
                        updated_at INTEGER NOT NULL DEFAULT (strftime('%s','now')),
                        PRIMARY KEY(namespace, key)
                    );",
                )?;
                Ok(())
            });

        let pool = Pool::builder()
            .max_size(4)
            .connection_timeout(std::time::Duration::from_secs(5))
            .build(manager)?;

        log::debug!("sqlite storage opened at {path} (namespace {namespace})");

        Ok(Self {
            pool,
            namespace: namespace.to_string(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn try_get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM consent_storage WHERE namespace=?1 AND key=?2",
                params![self.namespace, key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }
}

impl StorageArea for SqliteArea {
    fn get_item(&self, key: &str) -> Option<String> {
        match self.try_get(key) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("sqlite storage: cannot read {key}: {e}");
                None
            }
        }
    }

    fn try_get_item(&self, key: &str) -> Result<Option<String>> {
        self.try_get(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO consent_storage(namespace,key,value) VALUES (?1,?2,?3)
             ON CONFLICT(namespace,key) DO UPDATE
             SET value=excluded.value, updated_at=strftime('%s','now')",
            params![self.namespace, key, value],
        )?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM consent_storage WHERE namespace=?1 AND key=?2",
            params![self.namespace, key],
        )?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM consent_storage WHERE namespace=?1",
            params![self.namespace],
        )?;
        Ok(())
    }

    fn len(&self) -> usize {
        let conn = match self.conn() {
            Ok(c) => c,
            Err(_) => return 0,
        };
        conn.query_row::<u32, _, _>(
            "SELECT COUNT(*) FROM consent_storage WHERE namespace=?1",
            params![self.namespace],
            |row| row.get(0),
        )
        .unwrap_or(0) as usize
    }

    fn keys(&self) -> Vec<String> {
        let conn = match self.conn() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let mut stmt = match conn
            .prepare("SELECT key FROM consent_storage WHERE namespace=?1 ORDER BY key")
        {
            Ok(s) => s,
            Err(_) => return vec![],
        };

        let rows = match stmt.query_map(params![self.namespace], |row| row.get::<_, String>(0)) {
            Ok(r) => r,
            Err(_) => return vec![],
        };

        rows.filter_map(|r| r.ok()).collect()
    }
}
