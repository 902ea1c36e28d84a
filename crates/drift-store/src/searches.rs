//! The searches database.
//!
//! Operator searches and the per-peer responses that stream back from the
//! overlay. Responses are written from the search-response callback path as
//! they arrive; a search row is closed when the search ends.

use crate::error::{StoreError, StoreResult};
use drift_proto::{PeerSearchResponse, RemoteFile};
use parking_lot::Mutex;
use rusqlite::{Connection, params};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

const SCHEMA_VERSION: i64 = 1;

/// Lifecycle of a recorded search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    /// Responses are still arriving.
    InProgress,
    /// Ended normally.
    Completed,
    /// Cancelled by the operator.
    Cancelled,
}

impl SearchState {
    fn as_token(&self) -> &'static str {
        match self {
            SearchState::InProgress => "in_progress",
            SearchState::Completed => "completed",
            SearchState::Cancelled => "cancelled",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "in_progress" => Some(SearchState::InProgress),
            "completed" => Some(SearchState::Completed),
            "cancelled" => Some(SearchState::Cancelled),
            _ => None,
        }
    }
}

/// One recorded search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRecord {
    /// Search identifier.
    pub id: Uuid,
    /// Query text.
    pub text: String,
    /// Overlay correlation token.
    pub token: u32,
    /// Lifecycle state.
    pub state: SearchState,
    /// When the search started.
    pub started_at: SystemTime,
    /// When the search ended, if it has.
    pub ended_at: Option<SystemTime>,
    /// Number of peer responses recorded so far.
    pub response_count: u64,
}

/// `search.db`.
pub struct SqliteSearchStore {
    conn: Mutex<Connection>,
}

impl SqliteSearchStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// An in-memory database; used by tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value INTEGER NOT NULL);
             CREATE TABLE IF NOT EXISTS searches (
                 id TEXT PRIMARY KEY,
                 text TEXT NOT NULL,
                 token INTEGER NOT NULL,
                 state TEXT NOT NULL,
                 started_at INTEGER NOT NULL,
                 ended_at INTEGER
             );
             CREATE TABLE IF NOT EXISTS responses (
                 rowid INTEGER PRIMARY KEY AUTOINCREMENT,
                 search_id TEXT NOT NULL REFERENCES searches(id) ON DELETE CASCADE,
                 username TEXT NOT NULL,
                 token INTEGER NOT NULL,
                 has_free_slot INTEGER NOT NULL,
                 upload_speed INTEGER NOT NULL,
                 queue_length INTEGER NOT NULL
             );
             CREATE TABLE IF NOT EXISTS response_files (
                 response_id INTEGER NOT NULL REFERENCES responses(rowid) ON DELETE CASCADE,
                 name TEXT NOT NULL,
                 size INTEGER NOT NULL,
                 extension TEXT NOT NULL,
                 bitrate INTEGER,
                 duration INTEGER,
                 is_vbr INTEGER NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_responses_search ON responses(search_id);",
        )?;

        let found: Option<i64> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        match found {
            None => {
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)",
                    [SCHEMA_VERSION],
                )?;
            }
            Some(version) if version != SCHEMA_VERSION => {
                return Err(StoreError::VersionMismatch {
                    database: "search.db",
                    found: version,
                    expected: SCHEMA_VERSION,
                });
            }
            Some(_) => {}
        }

        Ok(SqliteSearchStore {
            conn: Mutex::new(conn),
        })
    }

    /// Record a newly-started search.
    pub fn create(&self, text: &str, token: u32) -> StoreResult<Uuid> {
        let id = Uuid::new_v4();
        self.conn.lock().execute(
            "INSERT INTO searches (id, text, token, state, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id.to_string(),
                text,
                token as i64,
                SearchState::InProgress.as_token(),
                to_millis(SystemTime::now()),
            ],
        )?;
        Ok(id)
    }

    /// Close a search with its final state.
    pub fn finish(&self, id: Uuid, state: SearchState) -> StoreResult<()> {
        self.conn.lock().execute(
            "UPDATE searches SET state = ?2, ended_at = ?3 WHERE id = ?1",
            params![
                id.to_string(),
                state.as_token(),
                to_millis(SystemTime::now())
            ],
        )?;
        Ok(())
    }

    /// Append one peer response to a search.
    pub fn record_response(&self, id: Uuid, response: &PeerSearchResponse) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO responses (search_id, username, token, has_free_slot, upload_speed, queue_length)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id.to_string(),
                response.username,
                response.token as i64,
                response.has_free_slot as i64,
                response.upload_speed as i64,
                response.queue_length as i64,
            ],
        )?;
        let response_id = conn.last_insert_rowid();

        let mut insert = conn.prepare(
            "INSERT INTO response_files (response_id, name, size, extension, bitrate, duration, is_vbr)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for file in &response.files {
            insert.execute(params![
                response_id,
                file.name,
                file.size as i64,
                file.extension,
                file.bitrate.map(|b| b as i64),
                file.duration.map(|d| d as i64),
                file.is_vbr as i64,
            ])?;
        }
        Ok(())
    }

    /// All recorded searches, newest first.
    pub fn list(&self) -> StoreResult<Vec<SearchRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT s.id, s.text, s.token, s.state, s.started_at, s.ended_at,
                    (SELECT COUNT(*) FROM responses r WHERE r.search_id = s.id)
             FROM searches s ORDER BY s.started_at DESC",
        )?;
        let records = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let state: String = row.get(3)?;
                Ok((
                    id,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    state,
                    row.get::<_, i64>(4)?,
                    row.get::<_, Option<i64>>(5)?,
                    row.get::<_, i64>(6)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        records
            .into_iter()
            .map(|(id, text, token, state, started, ended, responses)| {
                Ok(SearchRecord {
                    id: Uuid::parse_str(&id)
                        .map_err(|_| StoreError::Corrupt(format!("search id '{id}'")))?,
                    text,
                    token: token as u32,
                    state: SearchState::from_token(&state)
                        .ok_or_else(|| StoreError::Corrupt(format!("search state '{state}'")))?,
                    started_at: from_millis(started),
                    ended_at: ended.map(from_millis),
                    response_count: responses as u64,
                })
            })
            .collect()
    }

    /// The responses recorded for one search, in arrival order.
    pub fn responses(&self, id: Uuid) -> StoreResult<Vec<PeerSearchResponse>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT rowid, username, token, has_free_slot, upload_speed, queue_length
             FROM responses WHERE search_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map([id.to_string()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    PeerSearchResponse {
                        username: row.get(1)?,
                        token: row.get::<_, i64>(2)? as u32,
                        files: Vec::new(),
                        has_free_slot: row.get::<_, i64>(3)? != 0,
                        upload_speed: row.get::<_, i64>(4)? as u64,
                        queue_length: row.get::<_, i64>(5)? as u64,
                    },
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut files_stmt = conn.prepare(
            "SELECT name, size, extension, bitrate, duration, is_vbr
             FROM response_files WHERE response_id = ?1",
        )?;
        let mut out = Vec::with_capacity(rows.len());
        for (response_id, mut response) in rows {
            response.files = files_stmt
                .query_map([response_id], |row| {
                    Ok(RemoteFile {
                        name: row.get(0)?,
                        size: row.get::<_, i64>(1)? as u64,
                        extension: row.get(2)?,
                        bitrate: row.get::<_, Option<i64>>(3)?.map(|b| b as u32),
                        duration: row.get::<_, Option<i64>>(4)?.map(|d| d as u32),
                        is_vbr: row.get::<_, i64>(5)? != 0,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            out.push(response);
        }
        Ok(out)
    }

    /// Delete a search and everything recorded under it.
    pub fn remove(&self, id: Uuid) -> StoreResult<()> {
        let conn = self.conn.lock();
        // Cascades are not on by default; delete children explicitly.
        conn.execute(
            "DELETE FROM response_files WHERE response_id IN
             (SELECT rowid FROM responses WHERE search_id = ?1)",
            [id.to_string()],
        )?;
        conn.execute(
            "DELETE FROM responses WHERE search_id = ?1",
            [id.to_string()],
        )?;
        conn.execute("DELETE FROM searches WHERE id = ?1", [id.to_string()])?;
        Ok(())
    }
}

fn to_millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn from_millis(millis: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis.max(0) as u64)
}
