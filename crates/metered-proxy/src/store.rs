//! Embedded key-value store with named namespaces, backed by SQLite.
//!
//! Every namespace must be created once (at startup) before it is read or
//! written. Values are opaque bytes; callers own their encoding.

use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Namespace reserved for session records. Sessions currently live only in memory.
pub const SESSIONS_NAMESPACE: &str = "Sessions";
/// Namespace holding endpoint records keyed by endpoint id.
pub const APIS_NAMESPACE: &str = "APIS";

/// How long a writer waits on a locked database file before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("namespace does not exist: {0}")]
    NamespaceMissing(String),

    #[error("store lock poisoned")]
    Poisoned,
}

/// SQLite-backed namespaced byte store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the store at `path`. `":memory:"` gives a private in-memory store.
    ///
    /// On Unix the database file is restricted to 0600.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS namespaces (
                name TEXT PRIMARY KEY
            );
            CREATE TABLE IF NOT EXISTS entries (
                namespace TEXT NOT NULL REFERENCES namespaces(name),
                key TEXT NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY (namespace, key)
            );",
        )?;

        #[cfg(unix)]
        if path != ":memory:" {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            {
                tracing::warn!(path = %path, error = %e, "failed to set store file permissions to 0600");
            }
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Create `namespace` if it does not exist yet. Idempotent.
    pub fn create_namespace(&self, namespace: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO namespaces (name) VALUES (?1)",
            params![namespace],
        )?;
        Ok(())
    }

    fn ensure_namespace(conn: &Connection, namespace: &str) -> Result<(), StoreError> {
        let exists: bool = conn
            .query_row(
                "SELECT 1 FROM namespaces WHERE name = ?1",
                params![namespace],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        if exists {
            Ok(())
        } else {
            Err(StoreError::NamespaceMissing(namespace.to_string()))
        }
    }

    /// Read the value stored under `key`, if any.
    pub fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let conn = self.lock()?;
        Self::ensure_namespace(&conn, namespace)?;
        let value = conn
            .query_row(
                "SELECT value FROM entries WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Write `value` under `key`, replacing any previous value.
    pub fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let conn = self.lock()?;
        Self::ensure_namespace(&conn, namespace)?;
        conn.execute(
            "INSERT INTO entries (namespace, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value",
            params![namespace, key, value],
        )?;
        Ok(())
    }

    /// All `(key, value)` pairs in `namespace`, ordered by key.
    pub fn scan(&self, namespace: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let conn = self.lock()?;
        Self::ensure_namespace(&conn, namespace)?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM entries WHERE namespace = ?1 ORDER BY key")?;
        let rows = stmt
            .query_map(params![namespace], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_get() {
        let store = Store::open(":memory:").unwrap();
        store.create_namespace(APIS_NAMESPACE).unwrap();

        store.put(APIS_NAMESPACE, "a", b"first").unwrap();
        assert_eq!(store.get(APIS_NAMESPACE, "a").unwrap().unwrap(), b"first");

        store.put(APIS_NAMESPACE, "a", b"second").unwrap();
        assert_eq!(store.get(APIS_NAMESPACE, "a").unwrap().unwrap(), b"second");

        assert!(store.get(APIS_NAMESPACE, "missing").unwrap().is_none());
    }

    #[test]
    fn test_missing_namespace_is_an_error() {
        let store = Store::open(":memory:").unwrap();
        let err = store.get("nope", "a").unwrap_err();
        assert!(matches!(err, StoreError::NamespaceMissing(ns) if ns == "nope"));
        assert!(store.put("nope", "a", b"x").is_err());
    }

    #[test]
    fn test_create_namespace_is_idempotent() {
        let store = Store::open(":memory:").unwrap();
        store.create_namespace(SESSIONS_NAMESPACE).unwrap();
        store.create_namespace(SESSIONS_NAMESPACE).unwrap();
        assert!(store.scan(SESSIONS_NAMESPACE).unwrap().is_empty());
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let store = Store::open(":memory:").unwrap();
        store.create_namespace(APIS_NAMESPACE).unwrap();
        store.create_namespace(SESSIONS_NAMESPACE).unwrap();

        store.put(APIS_NAMESPACE, "k", b"api").unwrap();
        assert!(store.get(SESSIONS_NAMESPACE, "k").unwrap().is_none());
    }

    #[test]
    fn test_scan_orders_by_key() {
        let store = Store::open(":memory:").unwrap();
        store.create_namespace(APIS_NAMESPACE).unwrap();
        store.put(APIS_NAMESPACE, "b", b"2").unwrap();
        store.put(APIS_NAMESPACE, "a", b"1").unwrap();

        let keys: Vec<String> = store
            .scan(APIS_NAMESPACE)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let path = path.to_str().unwrap();

        {
            let store = Store::open(path).unwrap();
            store.create_namespace(APIS_NAMESPACE).unwrap();
            store.put(APIS_NAMESPACE, "a", b"kept").unwrap();
        }

        let store = Store::open(path).unwrap();
        assert_eq!(store.get(APIS_NAMESPACE, "a").unwrap().unwrap(), b"kept");
    }
}
