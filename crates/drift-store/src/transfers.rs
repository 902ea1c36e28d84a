//! The transfers table.

use crate::error::{StoreError, StoreResult};
use drift_core::{
    CoreError, Transfer, TransferDirection, TransferFailure, TransferState, TransferStore,
};
use parking_lot::Mutex;
use rusqlite::{Connection, Row, params};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

const SCHEMA_VERSION: i64 = 1;

/// `transfers.db`: one row per transfer, keyed by identifier, with a JSON
/// blob for failure details.
pub struct SqliteTransferStore {
    conn: Mutex<Connection>,
}

impl SqliteTransferStore {
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
             CREATE TABLE IF NOT EXISTS transfers (
                 id TEXT PRIMARY KEY,
                 direction TEXT NOT NULL,
                 username TEXT NOT NULL,
                 remote_name TEXT NOT NULL,
                 local_path TEXT NOT NULL,
                 size INTEGER NOT NULL,
                 start_offset INTEGER NOT NULL,
                 enqueued_at INTEGER NOT NULL,
                 started_at INTEGER,
                 ended_at INTEGER,
                 bytes_transferred INTEGER NOT NULL,
                 average_speed REAL NOT NULL,
                 state TEXT NOT NULL,
                 failure TEXT,
                 place_in_queue INTEGER
             );
             CREATE INDEX IF NOT EXISTS idx_transfers_state ON transfers(state);
             CREATE INDEX IF NOT EXISTS idx_transfers_user ON transfers(direction, username);",
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
                    database: "transfers.db",
                    found: version,
                    expected: SCHEMA_VERSION,
                });
            }
            Some(_) => {}
        }

        Ok(SqliteTransferStore {
            conn: Mutex::new(conn),
        })
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

fn row_to_transfer(row: &Row<'_>) -> rusqlite::Result<Transfer> {
    let id: String = row.get("id")?;
    let direction: String = row.get("direction")?;
    let state: String = row.get("state")?;
    let failure: Option<String> = row.get("failure")?;

    let invalid = |what: &str| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("invalid {what}").into(),
        )
    };

    Ok(Transfer {
        id: Uuid::parse_str(&id).map_err(|_| invalid("transfer id"))?,
        direction: TransferDirection::from_str_token(&direction)
            .ok_or_else(|| invalid("direction"))?,
        username: row.get("username")?,
        remote_name: row.get("remote_name")?,
        local_path: PathBuf::from(row.get::<_, String>("local_path")?),
        size: row.get::<_, i64>("size")? as u64,
        start_offset: row.get::<_, i64>("start_offset")? as u64,
        enqueued_at: from_millis(row.get("enqueued_at")?),
        started_at: row.get::<_, Option<i64>>("started_at")?.map(from_millis),
        ended_at: row.get::<_, Option<i64>>("ended_at")?.map(from_millis),
        bytes_transferred: row.get::<_, i64>("bytes_transferred")? as u64,
        average_speed: row.get("average_speed")?,
        state: TransferState::from_token(&state).ok_or_else(|| invalid("state"))?,
        failure: match failure {
            Some(json) => Some(
                serde_json::from_str::<TransferFailure>(&json)
                    .map_err(|_| invalid("failure blob"))?,
            ),
            None => None,
        },
        place_in_queue: row
            .get::<_, Option<i64>>("place_in_queue")?
            .map(|p| p as u32),
    })
}

impl TransferStore for SqliteTransferStore {
    fn upsert(&self, transfer: &Transfer) -> drift_core::Result<()> {
        let failure = transfer
            .failure
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|err| CoreError::LocalIo(err.to_string()))?;

        self.conn
            .lock()
            .execute(
                "INSERT INTO transfers (
                     id, direction, username, remote_name, local_path, size,
                     start_offset, enqueued_at, started_at, ended_at,
                     bytes_transferred, average_speed, state, failure, place_in_queue
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                 ON CONFLICT(id) DO UPDATE SET
                     started_at = excluded.started_at,
                     ended_at = excluded.ended_at,
                     start_offset = excluded.start_offset,
                     bytes_transferred = excluded.bytes_transferred,
                     average_speed = excluded.average_speed,
                     state = excluded.state,
                     failure = excluded.failure,
                     place_in_queue = excluded.place_in_queue",
                params![
                    transfer.id.to_string(),
                    transfer.direction.as_str(),
                    transfer.username,
                    transfer.remote_name,
                    transfer.local_path.to_string_lossy(),
                    transfer.size as i64,
                    transfer.start_offset as i64,
                    to_millis(transfer.enqueued_at),
                    transfer.started_at.map(to_millis),
                    transfer.ended_at.map(to_millis),
                    transfer.bytes_transferred as i64,
                    transfer.average_speed,
                    transfer.state.as_token(),
                    failure,
                    transfer.place_in_queue.map(|p| p as i64),
                ],
            )
            .map_err(|err| CoreError::LocalIo(err.to_string()))?;
        Ok(())
    }

    fn remove(&self, id: Uuid) -> drift_core::Result<()> {
        self.conn
            .lock()
            .execute("DELETE FROM transfers WHERE id = ?1", [id.to_string()])
            .map_err(|err| CoreError::LocalIo(err.to_string()))?;
        Ok(())
    }

    fn load_unfinished(&self) -> drift_core::Result<Vec<Transfer>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM transfers WHERE state NOT LIKE 'completed_%'")
            .map_err(|err| CoreError::LocalIo(err.to_string()))?;
        let transfers = stmt
            .query_map([], row_to_transfer)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|err| CoreError::LocalIo(err.to_string()))?;
        Ok(transfers)
    }

    fn load_all(&self) -> drift_core::Result<Vec<Transfer>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM transfers ORDER BY enqueued_at, id")
            .map_err(|err| CoreError::LocalIo(err.to_string()))?;
        let transfers = stmt
            .query_map([], row_to_transfer)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|err| CoreError::LocalIo(err.to_string()))?;
        Ok(transfers)
    }
}
