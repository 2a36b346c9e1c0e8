//! Replica persistence: origin, last timestamp, version vectors and the op
//! log.
//!
//! Everything is stored in wire form; the replica parses on load so that a
//! corrupt row surfaces as a [`ReplicaError::Corrupt`].

use crate::replica::ReplicaError;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use swarmsync_core::{Base64x64, Op, Specifier, Stamp, VersionVector};

/// Durable state a replica needs across restarts.
pub trait ReplicaStore: Send {
    /// Origin this store was last opened with, in wire form.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    fn load_origin(&self) -> Result<Option<String>, ReplicaError>;

    /// Remember the origin of the replica owning this store.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    fn save_origin(&mut self, origin: &Base64x64) -> Result<(), ReplicaError>;

    /// Last timestamp issued or seen by `origin`, in wire form.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    fn load_last_stamp(&self, origin: &Base64x64) -> Result<Option<String>, ReplicaError>;

    /// Remember the last timestamp issued or seen by `origin`.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    fn save_last_stamp(&mut self, origin: &Base64x64, stamp: &Stamp) -> Result<(), ReplicaError>;

    /// Version vector of `stream`, in wire form.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    fn load_vv(&self, stream: &Specifier) -> Result<Option<String>, ReplicaError>;

    /// Replace the version vector of `stream`.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    fn save_vv(&mut self, stream: &Specifier, vv: &VersionVector) -> Result<(), ReplicaError>;

    /// Append an operation to the log of its object.
    ///
    /// Returns `false` if the same operation is already logged.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    fn append_op(&mut self, op: &Op) -> Result<bool, ReplicaError>;

    /// Logged operations of `stream` in append order, in line form.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    fn ops(&self, stream: &Specifier) -> Result<Vec<String>, ReplicaError>;
}

/// Volatile store, lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    origin: Option<String>,
    stamps: HashMap<String, String>,
    vvs: HashMap<String, String>,
    logs: HashMap<String, Vec<String>>,
    logged: HashSet<String>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReplicaStore for MemoryStore {
    fn load_origin(&self) -> Result<Option<String>, ReplicaError> {
        Ok(self.origin.clone())
    }

    fn save_origin(&mut self, origin: &Base64x64) -> Result<(), ReplicaError> {
        self.origin = Some(origin.to_string());
        Ok(())
    }

    fn load_last_stamp(&self, origin: &Base64x64) -> Result<Option<String>, ReplicaError> {
        Ok(self.stamps.get(origin.as_str()).cloned())
    }

    fn save_last_stamp(&mut self, origin: &Base64x64, stamp: &Stamp) -> Result<(), ReplicaError> {
        self.stamps.insert(origin.to_string(), stamp.to_string());
        Ok(())
    }

    fn load_vv(&self, stream: &Specifier) -> Result<Option<String>, ReplicaError> {
        Ok(self.vvs.get(&stream.to_string()).cloned())
    }

    fn save_vv(&mut self, stream: &Specifier, vv: &VersionVector) -> Result<(), ReplicaError> {
        self.vvs.insert(stream.to_string(), vv.to_string());
        Ok(())
    }

    fn append_op(&mut self, op: &Op) -> Result<bool, ReplicaError> {
        if !self.logged.insert(op.spec().to_string()) {
            return Ok(false);
        }
        self.logs
            .entry(op.object().to_string())
            .or_default()
            .push(op.to_string());
        Ok(true)
    }

    fn ops(&self, stream: &Specifier) -> Result<Vec<String>, ReplicaError> {
        Ok(self.logs.get(&stream.to_string()).cloned().unwrap_or_default())
    }
}

/// `SQLite`-backed persistence store.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open or create a `SQLite` database.
    ///
    /// # Errors
    ///
    /// Returns error if database cannot be opened or initialized.
    pub fn open(path: &Path) -> Result<Self, ReplicaError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        tracing::debug!(path = %path.display(), "Opened replica database");
        Ok(store)
    }

    /// Create an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns error if database cannot be created.
    pub fn in_memory() -> Result<Self, ReplicaError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), ReplicaError> {
        self.conn.execute_batch(
            r"
            -- Origin of the owning replica, a single row
            CREATE TABLE IF NOT EXISTS replica_identity (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                origin TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            -- Last timestamp issued or seen, per local origin
            CREATE TABLE IF NOT EXISTS clock_state (
                origin TEXT PRIMARY KEY,
                last_stamp TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            -- Version vector per stream
            CREATE TABLE IF NOT EXISTS version_vectors (
                stream TEXT PRIMARY KEY,
                vv TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            -- Operation log
            CREATE TABLE IF NOT EXISTS op_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                stream TEXT NOT NULL,
                spec TEXT NOT NULL UNIQUE,
                origin TEXT NOT NULL,
                value TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_op_log_stream ON op_log(stream);
            ",
        )?;

        Ok(())
    }
}

impl ReplicaStore for SqliteStore {
    fn load_origin(&self) -> Result<Option<String>, ReplicaError> {
        let origin = self
            .conn
            .query_row(
                "SELECT origin FROM replica_identity WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(origin)
    }

    fn save_origin(&mut self, origin: &Base64x64) -> Result<(), ReplicaError> {
        self.conn.execute(
            r"
            INSERT OR REPLACE INTO replica_identity (id, origin, updated_at)
            VALUES (1, ?1, ?2)
            ",
            (origin.as_str(), Utc::now().timestamp()),
        )?;
        Ok(())
    }

    fn load_last_stamp(&self, origin: &Base64x64) -> Result<Option<String>, ReplicaError> {
        let stamp = self
            .conn
            .query_row(
                "SELECT last_stamp FROM clock_state WHERE origin = ?1",
                [origin.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(stamp)
    }

    fn save_last_stamp(&mut self, origin: &Base64x64, stamp: &Stamp) -> Result<(), ReplicaError> {
        self.conn.execute(
            r"
            INSERT OR REPLACE INTO clock_state (origin, last_stamp, updated_at)
            VALUES (?1, ?2, ?3)
            ",
            (origin.as_str(), stamp.to_string(), Utc::now().timestamp()),
        )?;
        Ok(())
    }

    fn load_vv(&self, stream: &Specifier) -> Result<Option<String>, ReplicaError> {
        let vv = self
            .conn
            .query_row(
                "SELECT vv FROM version_vectors WHERE stream = ?1",
                [stream.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(vv)
    }

    fn save_vv(&mut self, stream: &Specifier, vv: &VersionVector) -> Result<(), ReplicaError> {
        self.conn.execute(
            r"
            INSERT OR REPLACE INTO version_vectors (stream, vv, updated_at)
            VALUES (?1, ?2, ?3)
            ",
            (stream.to_string(), vv.to_string(), Utc::now().timestamp()),
        )?;
        Ok(())
    }

    fn append_op(&mut self, op: &Op) -> Result<bool, ReplicaError> {
        let inserted = self.conn.execute(
            r"
            INSERT OR IGNORE INTO op_log (stream, spec, origin, value, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            (
                op.object().to_string(),
                op.spec().to_string(),
                op.origin().as_str(),
                op.value(),
                Utc::now().timestamp(),
            ),
        )?;
        Ok(inserted > 0)
    }

    fn ops(&self, stream: &Specifier) -> Result<Vec<String>, ReplicaError> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT spec, value FROM op_log
            WHERE stream = ?1
            ORDER BY id ASC
            ",
        )?;

        let lines = stmt
            .query_map([stream.to_string()], |row| {
                let spec: String = row.get(0)?;
                let value: String = row.get(1)?;
                Ok(if value.is_empty() {
                    spec
                } else {
                    format!("{spec}\t{value}")
                })
            })?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(line: &str) -> Op {
        Op::parse(line).unwrap()
    }

    fn exercise(store: &mut dyn ReplicaStore) {
        let origin = Base64x64::parse("alice").unwrap();
        let stream = Specifier::parse("/Model#1A-alice").unwrap();

        assert_eq!(store.load_origin().unwrap(), None);
        store.save_origin(&Base64x64::parse("bob").unwrap()).unwrap();
        store.save_origin(&origin).unwrap();
        assert_eq!(store.load_origin().unwrap().as_deref(), Some("alice"));

        assert_eq!(store.load_last_stamp(&origin).unwrap(), None);
        store
            .save_last_stamp(&origin, &Stamp::parse("1B-alice").unwrap())
            .unwrap();
        store
            .save_last_stamp(&origin, &Stamp::parse("1C-alice").unwrap())
            .unwrap();
        assert_eq!(
            store.load_last_stamp(&origin).unwrap().as_deref(),
            Some("1C-alice")
        );

        assert_eq!(store.load_vv(&stream).unwrap(), None);
        let vv = VersionVector::parse("alice:1C,bob:1B").unwrap();
        store.save_vv(&stream, &vv).unwrap();
        assert_eq!(
            store.load_vv(&stream).unwrap().as_deref(),
            Some("alice:1C,bob:1B")
        );

        assert!(store.append_op(&op("/Model#1A-alice.set!1C-alice\tx=1")).unwrap());
        assert!(store.append_op(&op("/Model#1A-alice!1B-bob")).unwrap());
        assert!(!store.append_op(&op("/Model#1A-alice.set!1C-alice\tx=1")).unwrap());
        assert!(store.append_op(&op("/Other#1A-alice!1D-bob\ty")).unwrap());

        assert_eq!(
            store.ops(&stream).unwrap(),
            ["/Model#1A-alice.set!1C-alice\tx=1", "/Model#1A-alice!1B-bob"]
        );
        assert!(store
            .ops(&Specifier::parse("/Missing#1A").unwrap())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn memory_store() {
        exercise(&mut MemoryStore::new());
    }

    #[test]
    fn sqlite_store() {
        exercise(&mut SqliteStore::in_memory().unwrap());
    }

    #[test]
    fn sqlite_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replica.db");
        let origin = Base64x64::parse("node").unwrap();

        {
            let mut store = SqliteStore::open(&path).unwrap();
            store.save_origin(&origin).unwrap();
            store
                .save_last_stamp(&origin, &Stamp::parse("1ABCDE-node").unwrap())
                .unwrap();
            store.append_op(&op("/Model#1!1ABCDE-node\tv")).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.load_origin().unwrap().as_deref(), Some("node"));
        assert_eq!(
            store.load_last_stamp(&origin).unwrap().as_deref(),
            Some("1ABCDE-node")
        );
        assert_eq!(
            store.ops(&Specifier::parse("/Model#1").unwrap()).unwrap(),
            ["/Model#1!1ABCDE-node\tv"]
        );
    }
}
