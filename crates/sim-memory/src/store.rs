use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use rusqlite::Connection;
use sim_core::{ActionLog, Result, SimError};
use tracing::{info, warn};
use uuid::Uuid;

use crate::ranker::MemoryRanker;
use crate::record::{MemoryKind, MemoryRecord};
use crate::stream::MemoryStream;

const ACTION_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

fn db_err(e: rusqlite::Error) -> SimError {
    SimError::Memory(e.to_string())
}

/// SQLite repository for memories and actions, scoped to one run.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
    run_id: Uuid,
}

impl SqliteStore {
    /// Open or create the database at `path` for a new run.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_for_run(path, Uuid::new_v4())
    }

    /// Open the database and scope reads and writes to `run_id`.
    pub fn open_for_run(path: &Path, run_id: Uuid) -> Result<Self> {
        info!(?path, %run_id, "opening memory store");

        let conn = Connection::open(path).map_err(db_err)?;

        // Enable WAL mode for concurrent reads
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS memories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                agent TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                last_access INTEGER NOT NULL,
                importance INTEGER NOT NULL,
                kind INTEGER NOT NULL,
                text TEXT NOT NULL,
                embedding BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS actions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                agent TEXT NOT NULL,
                action_time TEXT NOT NULL,
                action TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_memories_agent ON memories(run_id, agent);
            CREATE INDEX IF NOT EXISTS idx_actions_agent ON actions(run_id, agent);
            ",
        )
        .map_err(db_err)?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            run_id,
        })
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Every action recorded for `agent` in this run, oldest first.
    pub fn actions_for(&self, agent: &str) -> Result<Vec<(NaiveDateTime, String)>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare(
                "SELECT id, action_time, action FROM actions
                 WHERE run_id = ?1 AND agent = ?2 ORDER BY id ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(rusqlite::params![self.run_id.to_string(), agent], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(db_err)?;

        let mut actions = Vec::new();
        for row in rows {
            match row {
                Ok((id, at, action)) => match NaiveDateTime::parse_from_str(&at, ACTION_TIME_FORMAT) {
                    Ok(at) => actions.push((at, action)),
                    Err(e) => warn!(agent, id, error = %e, "skipping action with unreadable time"),
                },
                Err(e) => warn!(agent, error = %e, "skipping unreadable action row"),
            }
        }
        Ok(actions)
    }

    fn insert(db: &Connection, run_id: &str, record: &MemoryRecord) -> Result<()> {
        let embedding_blob: Vec<u8> = record
            .embedding
            .iter()
            .flat_map(|f| f.to_le_bytes())
            .collect();
        db.execute(
            "INSERT INTO memories (run_id, agent, created_at, last_access, importance, kind, text, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                run_id,
                &record.agent,
                record.created_at,
                record.last_access,
                i64::from(record.importance),
                i64::from(record.kind.as_u8()),
                &record.text,
                embedding_blob,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Load `agent`'s memories with their row ids, in insertion order.
    fn load(
        &self,
        db: &Connection,
        agent: &str,
        newest_first: bool,
        limit: Option<usize>,
    ) -> Result<Vec<(i64, MemoryRecord)>> {
        let order = if newest_first { "DESC" } else { "ASC" };
        let limit = limit.map_or(-1, |l| l as i64);
        let mut stmt = db
            .prepare(&format!(
                "SELECT id, created_at, last_access, importance, kind, text, embedding FROM memories
                 WHERE run_id = ?1 AND agent = ?2 ORDER BY id {order} LIMIT ?3"
            ))
            .map_err(db_err)?;

        let rows = stmt
            .query_map(rusqlite::params![self.run_id.to_string(), agent, limit], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    RawMemory {
                        created_at: row.get(1)?,
                        last_access: row.get(2)?,
                        importance: row.get(3)?,
                        kind: row.get(4)?,
                        text: row.get(5)?,
                        embedding: row.get(6)?,
                    },
                ))
            })
            .map_err(db_err)?;

        let mut records = Vec::new();
        for row in rows {
            match row {
                Ok((id, raw)) => match raw.decode(agent) {
                    Ok(record) => records.push((id, record)),
                    Err(reason) => warn!(agent, id, %reason, "skipping undecodable memory row"),
                },
                Err(e) => warn!(agent, error = %e, "skipping unreadable memory row"),
            }
        }
        Ok(records)
    }
}

/// A memory row as stored, before its kind and embedding are decoded.
struct RawMemory {
    created_at: i64,
    last_access: i64,
    importance: i64,
    kind: i64,
    text: String,
    embedding: Vec<u8>,
}

impl RawMemory {
    fn decode(self, agent: &str) -> std::result::Result<MemoryRecord, String> {
        if self.embedding.len() % 4 != 0 {
            return Err(format!(
                "embedding blob of {} bytes is not a whole number of f32s",
                self.embedding.len()
            ));
        }
        let kind = u8::try_from(self.kind)
            .ok()
            .and_then(MemoryKind::from_u8)
            .ok_or_else(|| format!("unknown memory kind tag {}", self.kind))?;
        let embedding = self
            .embedding
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Ok(MemoryRecord {
            agent: agent.to_string(),
            created_at: self.created_at,
            last_access: self.last_access,
            importance: u8::try_from(self.importance)
                .unwrap_or(MemoryRecord::MAX_IMPORTANCE)
                .min(MemoryRecord::MAX_IMPORTANCE),
            kind,
            text: self.text,
            embedding,
        })
    }
}

#[async_trait]
impl MemoryStream for SqliteStore {
    async fn save(&self, record: MemoryRecord) -> Result<()> {
        let db = self.db.lock();
        Self::insert(&db, &self.run_id.to_string(), &record)
    }

    async fn save_all(&self, agent: &str, records: Vec<MemoryRecord>) -> Result<()> {
        let mut db = self.db.lock();
        let tx = db.transaction().map_err(db_err)?;
        let run_id = self.run_id.to_string();
        for record in records.iter().filter(|r| r.agent == agent) {
            Self::insert(&tx, &run_id, record)?;
        }
        tx.commit().map_err(db_err)?;
        Ok(())
    }

    async fn most_relevant(
        &self,
        agent: &str,
        queries: &[Vec<f32>],
        limit: usize,
        now: i64,
    ) -> Result<Vec<Vec<MemoryRecord>>> {
        let mut db = self.db.lock();
        let rows = self.load(&db, agent, false, None)?;
        let (ids, records): (Vec<i64>, Vec<MemoryRecord>) = rows.into_iter().unzip();

        let ranked = MemoryRanker::new(now).rank(&records, queries, limit);
        let touched: Vec<i64> = ranked.iter().flatten().map(|r| ids[r.index]).collect();
        let results: Vec<Vec<MemoryRecord>> = ranked
            .into_iter()
            .map(|per_query| per_query.into_iter().map(|r| r.record.clone()).collect())
            .collect();

        let tx = db.transaction().map_err(db_err)?;
        for id in touched {
            tx.execute(
                "UPDATE memories SET last_access = MAX(last_access, ?1) WHERE id = ?2",
                rusqlite::params![now, id],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;
        Ok(results)
    }

    async fn most_recent(&self, agent: &str, limit: usize) -> Result<Vec<MemoryRecord>> {
        let db = self.db.lock();
        Ok(self
            .load(&db, agent, true, Some(limit))?
            .into_iter()
            .map(|(_, record)| record)
            .collect())
    }

    async fn count(&self, agent: &str) -> Result<usize> {
        let db = self.db.lock();
        let count: i64 = db
            .query_row(
                "SELECT COUNT(*) FROM memories WHERE run_id = ?1 AND agent = ?2",
                rusqlite::params![self.run_id.to_string(), agent],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(count as usize)
    }
}

#[async_trait]
impl ActionLog for SqliteStore {
    async fn record(&self, agent: &str, at: NaiveDateTime, action: &str) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "INSERT INTO actions (run_id, agent, action_time, action) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                self.run_id.to_string(),
                agent,
                at.format(ACTION_TIME_FORMAT).to_string(),
                action
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }
}
