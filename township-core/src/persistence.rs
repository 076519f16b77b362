//! Snapshot persistence for memories and affinities.
//!
//! The world only talks to the [`SnapshotStore`] trait. Two backends ship:
//! [`SqliteSnapshotStore`], which keeps one JSON blob per agent log plus one
//! for the affinity table, and [`InMemorySnapshotStore`] for tests and
//! throwaway runs.
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS agent_memories (
//!     agent_id    TEXT PRIMARY KEY,
//!     data        BLOB NOT NULL,
//!     entry_count INTEGER NOT NULL,
//!     updated_at  TEXT NOT NULL
//! );
//! CREATE TABLE IF NOT EXISTS affinities (
//!     slot       INTEGER PRIMARY KEY CHECK (slot = 0),
//!     data       BLOB NOT NULL,
//!     updated_at TEXT NOT NULL
//! );
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::{debug, info};

use crate::affinity::AffinityRecord;
use crate::config::PersistenceConfig;
use crate::error::Result;
use crate::memory::MemoryEntry;
use crate::types::AgentId;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS agent_memories (
        agent_id    TEXT PRIMARY KEY,
        data        BLOB NOT NULL,
        entry_count INTEGER NOT NULL,
        updated_at  TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS affinities (
        slot       INTEGER PRIMARY KEY CHECK (slot = 0),
        data       BLOB NOT NULL,
        updated_at TEXT NOT NULL
    );";

/// Where world state goes at teardown and comes back from at start.
pub trait SnapshotStore: Send + Sync {
    /// Replace the stored log for `agent`.
    ///
    /// # Errors
    /// Backend failures.
    fn save_memories(&self, agent: &AgentId, entries: &[MemoryEntry]) -> Result<()>;

    /// The stored log for `agent`, or `None` if nothing was saved.
    ///
    /// # Errors
    /// Backend failures.
    fn load_memories(&self, agent: &AgentId) -> Result<Option<Vec<MemoryEntry>>>;

    /// Replace the stored affinity table.
    ///
    /// # Errors
    /// Backend failures.
    fn save_affinities(&self, records: &[AffinityRecord]) -> Result<()>;

    /// The stored affinity table; empty if nothing was saved.
    ///
    /// # Errors
    /// Backend failures.
    fn load_affinities(&self) -> Result<Vec<AffinityRecord>>;

    /// Agents with a saved log, in id order.
    ///
    /// # Errors
    /// Backend failures.
    fn saved_agents(&self) -> Result<Vec<AgentId>>;
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

/// SQLite-backed [`SnapshotStore`].
pub struct SqliteSnapshotStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl std::fmt::Debug for SqliteSnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSnapshotStore")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl SqliteSnapshotStore {
    /// Open (or create) the database at `path`, creating the schema.
    ///
    /// # Errors
    /// [`TownError::Database`](crate::error::TownError::Database) on SQLite failures.
    pub fn open<P: AsRef<Path>>(path: P, config: &PersistenceConfig) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&db_path, flags)?;
        if config.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL; PRAGMA busy_timeout = 5000;")?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %db_path.display(), wal = config.wal_mode, "snapshot store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    /// Open the database named by `config.path`.
    ///
    /// # Errors
    /// SQLite failures.
    pub fn from_config(config: &PersistenceConfig) -> Result<Self> {
        Self::open(&config.path, config)
    }

    /// An in-memory database, mostly for tests.
    ///
    /// # Errors
    /// SQLite failures.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        })
    }

    /// Path of the backing file (`:memory:` for in-memory stores).
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.db_path
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    fn save_memories(&self, agent: &AgentId, entries: &[MemoryEntry]) -> Result<()> {
        let start = Instant::now();
        let json = serde_json::to_vec(entries)?;
        let count = i64::try_from(entries.len()).unwrap_or(i64::MAX);
        self.conn.lock().execute(
            "INSERT INTO agent_memories (agent_id, data, entry_count, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(agent_id) DO UPDATE SET
                data = excluded.data,
                entry_count = excluded.entry_count,
                updated_at = excluded.updated_at",
            params![agent.as_str(), json, count, Utc::now().to_rfc3339()],
        )?;
        debug!(
            %agent,
            memories = entries.len(),
            bytes = json.len(),
            elapsed_us = start.elapsed().as_micros(),
            "saved agent memories"
        );
        Ok(())
    }

    fn load_memories(&self, agent: &AgentId) -> Result<Option<Vec<MemoryEntry>>> {
        let conn = self.conn.lock();
        let data: Option<Vec<u8>> = conn
            .prepare_cached("SELECT data FROM agent_memories WHERE agent_id = ?1")?
            .query_row(params![agent.as_str()], |row| row.get(0))
            .optional()?;
        let Some(data) = data else {
            return Ok(None);
        };
        let entries: Vec<MemoryEntry> = serde_json::from_slice(&data)?;
        debug!(%agent, memories = entries.len(), "loaded agent memories");
        Ok(Some(entries))
    }

    fn save_affinities(&self, records: &[AffinityRecord]) -> Result<()> {
        let json = serde_json::to_vec(records)?;
        self.conn.lock().execute(
            "INSERT INTO affinities (slot, data, updated_at) VALUES (0, ?1, ?2)
             ON CONFLICT(slot) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at",
            params![json, Utc::now().to_rfc3339()],
        )?;
        debug!(cells = records.len(), "saved affinity table");
        Ok(())
    }

    fn load_affinities(&self) -> Result<Vec<AffinityRecord>> {
        let conn = self.conn.lock();
        let data: Option<Vec<u8>> = conn
            .query_row("SELECT data FROM affinities WHERE slot = 0", [], |row| row.get(0))
            .optional()?;
        match data {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    fn saved_agents(&self) -> Result<Vec<AgentId>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT agent_id FROM agent_memories ORDER BY agent_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut agents = Vec::new();
        for row in rows {
            agents.push(AgentId::new(row?));
        }
        Ok(agents)
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// [`SnapshotStore`] that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    memories: Mutex<BTreeMap<AgentId, Vec<MemoryEntry>>>,
    affinities: Mutex<Vec<AffinityRecord>>,
}

impl InMemorySnapshotStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn save_memories(&self, agent: &AgentId, entries: &[MemoryEntry]) -> Result<()> {
        self.memories.lock().insert(agent.clone(), entries.to_vec());
        Ok(())
    }

    fn load_memories(&self, agent: &AgentId) -> Result<Option<Vec<MemoryEntry>>> {
        Ok(self.memories.lock().get(agent).cloned())
    }

    fn save_affinities(&self, records: &[AffinityRecord]) -> Result<()> {
        *self.affinities.lock() = records.to_vec();
        Ok(())
    }

    fn load_affinities(&self) -> Result<Vec<AffinityRecord>> {
        Ok(self.affinities.lock().clone())
    }

    fn saved_agents(&self) -> Result<Vec<AgentId>> {
        Ok(self.memories.lock().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryKind, Metadata, MetadataValue, metadata};
    use crate::types::{MemoryId, SimTime};

    fn entries() -> Vec<MemoryEntry> {
        let mut meta = Metadata::new();
        meta.insert(metadata::LOCATION.to_string(), MetadataValue::from("cafe"));
        vec![
            MemoryEntry {
                id: MemoryId(1),
                agent_id: "A1".into(),
                content: "met Ben at the cafe".to_string(),
                created_at: SimTime(10),
                last_accessed_at: SimTime(20),
                importance: 4.0,
                kind: MemoryKind::Interaction,
                metadata: meta,
                decayed_through: None,
            },
            MemoryEntry {
                id: MemoryId(2),
                agent_id: "A1".into(),
                content: "Ben seems kind".to_string(),
                created_at: SimTime(30),
                last_accessed_at: SimTime(30),
                importance: 7.0,
                kind: MemoryKind::Reflection,
                metadata: Metadata::new(),
                decayed_through: Some(SimTime(30)),
            },
        ]
    }

    fn affinities() -> Vec<AffinityRecord> {
        vec![AffinityRecord {
            from: "A1".into(),
            to: "A2".into(),
            score: 0.3,
        }]
    }

    fn exercise(store: &dyn SnapshotStore) {
        let agent = AgentId::from("A1");
        assert!(store.load_memories(&agent).expect("backend").is_none());
        assert!(store.load_affinities().expect("backend").is_empty());

        store.save_memories(&agent, &entries()).expect("backend");
        store.save_affinities(&affinities()).expect("backend");
        assert_eq!(store.load_memories(&agent).expect("backend"), Some(entries()));
        assert_eq!(store.load_affinities().expect("backend"), affinities());

        // saving again replaces rather than appends
        store.save_memories(&agent, &entries()[..1]).expect("backend");
        assert_eq!(store.load_memories(&agent).expect("backend").map(|e| e.len()), Some(1));
        assert_eq!(store.saved_agents().expect("backend"), vec![agent]);
    }

    #[test]
    fn in_memory_store_round_trips() {
        exercise(&InMemorySnapshotStore::new());
    }

    #[test]
    fn sqlite_in_memory_round_trips() {
        exercise(&SqliteSnapshotStore::open_in_memory().expect("sqlite"));
    }

    #[test]
    fn sqlite_file_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("town.db");
        let config = PersistenceConfig::default();
        {
            let store = SqliteSnapshotStore::open(&path, &config).expect("sqlite");
            store.save_memories(&"A1".into(), &entries()).expect("save");
        }
        let store = SqliteSnapshotStore::open(&path, &config).expect("sqlite");
        assert_eq!(store.path(), path.as_path());
        assert_eq!(store.load_memories(&"A1".into()).expect("load"), Some(entries()));
    }
}
