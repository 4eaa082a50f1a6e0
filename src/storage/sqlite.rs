//! SQLite `SyncStore` backed by rusqlite.
//!
//! One connection behind a `parking_lot::Mutex`; compound rewrites run in a
//! transaction (`unchecked_transaction`, since the guard only derefs to
//! `&Connection`). Timestamps are stored as RFC 3339 text, payloads as JSON
//! blobs.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::StoreError;
use crate::queue::op::{ErrorKind, Operation, OperationKind, OperationStatus};
use crate::types::{EntityKind, Folder, IdMapping, Note, SyncStatus, Timestamp};

use super::traits::SyncStore;

const SCHEMA: &str = r#"
PRAGMA journal_mode=WAL;

CREATE TABLE IF NOT EXISTS notes (
    id          TEXT PRIMARY KEY,
    folder_id   TEXT NOT NULL,
    title       TEXT NOT NULL,
    content     TEXT NOT NULL,
    server_tag  TEXT,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS folders (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    server_tag  TEXT,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS operations (
    id            TEXT PRIMARY KEY,
    kind          TEXT NOT NULL,
    target_id     TEXT NOT NULL,
    payload       BLOB NOT NULL,
    created_at    TEXT NOT NULL,
    local_save_at TEXT,
    status        TEXT NOT NULL,
    priority      INTEGER NOT NULL,
    retry_count   INTEGER NOT NULL DEFAULT 0,
    next_retry_at TEXT,
    last_error    TEXT,
    error_kind    TEXT,
    is_local_id   INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_operations_target
    ON operations(target_id);

CREATE TABLE IF NOT EXISTS id_mappings (
    local_id    TEXT PRIMARY KEY,
    server_id   TEXT NOT NULL,
    entity_kind TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    completed   INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS sync_status (
    id             INTEGER PRIMARY KEY CHECK (id = 1),
    last_sync_time TEXT,
    sync_tag       TEXT
);
"#;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn ts_to_text(ts: Timestamp) -> String {
    ts.to_rfc3339()
}

fn text_to_ts(text: &str) -> Result<Timestamp, StoreError> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(format!("bad timestamp {text:?}: {e}")))
}

fn opt_ts(text: Option<String>) -> Result<Option<Timestamp>, StoreError> {
    text.as_deref().map(text_to_ts).transpose()
}

type RawNote = (
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    String,
);

fn note_from_row(row: &Row<'_>) -> rusqlite::Result<RawNote> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn operation_from_row(row: &Row<'_>) -> rusqlite::Result<RawOperation> {
    Ok(RawOperation {
        id: row.get(0)?,
        kind: row.get(1)?,
        target_id: row.get(2)?,
        payload: row.get(3)?,
        created_at: row.get(4)?,
        local_save_at: row.get(5)?,
        status: row.get(6)?,
        priority: row.get(7)?,
        retry_count: row.get(8)?,
        next_retry_at: row.get(9)?,
        last_error: row.get(10)?,
        error_kind: row.get(11)?,
        is_local_id: row.get(12)?,
    })
}

/// Column values before enum/timestamp decoding. Decoding happens outside
/// the rusqlite row callback so the errors stay `StoreError`s.
struct RawOperation {
    id: String,
    kind: String,
    target_id: String,
    payload: Vec<u8>,
    created_at: String,
    local_save_at: Option<String>,
    status: String,
    priority: i32,
    retry_count: i64,
    next_retry_at: Option<String>,
    last_error: Option<String>,
    error_kind: Option<String>,
    is_local_id: bool,
}

impl RawOperation {
    fn decode(self) -> Result<Operation, StoreError> {
        let kind = OperationKind::parse(&self.kind)
            .ok_or_else(|| StoreError::Backend(format!("unknown operation kind {:?}", self.kind)))?;
        let status = OperationStatus::parse(&self.status).ok_or_else(|| {
            StoreError::Backend(format!("unknown operation status {:?}", self.status))
        })?;
        let error_kind = match self.error_kind.as_deref() {
            Some(s) => Some(
                ErrorKind::parse(s)
                    .ok_or_else(|| StoreError::Backend(format!("unknown error kind {s:?}")))?,
            ),
            None => None,
        };
        Ok(Operation {
            id: self.id,
            kind,
            target_id: self.target_id,
            payload: serde_json::from_slice(&self.payload)?,
            created_at: text_to_ts(&self.created_at)?,
            local_save_at: opt_ts(self.local_save_at)?,
            status,
            priority: self.priority,
            retry_count: self.retry_count.max(0) as u32,
            next_retry_at: opt_ts(self.next_retry_at)?,
            last_error: self.last_error,
            error_kind,
            is_local_id: self.is_local_id,
        })
    }
}

fn entity_kind_from_text(s: &str) -> Result<EntityKind, StoreError> {
    match s {
        "note" => Ok(EntityKind::Note),
        "folder" => Ok(EntityKind::Folder),
        other => Err(StoreError::Backend(format!("unknown entity kind {other:?}"))),
    }
}

// ============================================================================
// SyncStore impl
// ============================================================================

impl SyncStore for SqliteStore {
    fn get_note(&self, id: &str) -> Result<Option<Note>, StoreError> {
        let conn = self.conn.lock();
        let found = conn
            .query_row(
                "SELECT id, folder_id, title, content, server_tag, created_at, updated_at
                 FROM notes WHERE id = ?1",
                params![id],
                note_from_row,
            )
            .optional()?;
        match found {
            Some((id, folder_id, title, content, server_tag, created, updated)) => {
                Ok(Some(Note {
                    id,
                    folder_id,
                    title,
                    content,
                    server_tag,
                    created_at: text_to_ts(&created)?,
                    updated_at: text_to_ts(&updated)?,
                }))
            }
            None => Ok(None),
        }
    }

    fn put_note(&self, note: &Note) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO notes (id, folder_id, title, content, server_tag, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                folder_id = excluded.folder_id,
                title = excluded.title,
                content = excluded.content,
                server_tag = excluded.server_tag,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at",
            params![
                note.id,
                note.folder_id,
                note.title,
                note.content,
                note.server_tag,
                ts_to_text(note.created_at),
                ts_to_text(note.updated_at),
            ],
        )?;
        Ok(())
    }

    fn delete_note(&self, id: &str) -> Result<(), StoreError> {
        self.conn
            .lock()
            .execute("DELETE FROM notes WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn note_ids_in_folder(&self, folder_id: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id FROM notes WHERE folder_id = ?1")?;
        let ids = stmt
            .query_map(params![folder_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    fn get_folder(&self, id: &str) -> Result<Option<Folder>, StoreError> {
        let conn = self.conn.lock();
        let found = conn
            .query_row(
                "SELECT id, name, server_tag, created_at FROM folders WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        match found {
            Some((id, name, server_tag, created)) => Ok(Some(Folder {
                id,
                name,
                server_tag,
                created_at: text_to_ts(&created)?,
            })),
            None => Ok(None),
        }
    }

    fn put_folder(&self, folder: &Folder) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO folders (id, name, server_tag, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                server_tag = excluded.server_tag,
                created_at = excluded.created_at",
            params![
                folder.id,
                folder.name,
                folder.server_tag,
                ts_to_text(folder.created_at),
            ],
        )?;
        Ok(())
    }

    fn delete_folder(&self, id: &str) -> Result<(), StoreError> {
        self.conn
            .lock()
            .execute("DELETE FROM folders WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn put_operation(&self, op: &Operation) -> Result<(), StoreError> {
        let payload = serde_json::to_vec(&op.payload)?;
        self.conn.lock().execute(
            "INSERT INTO operations (id, kind, target_id, payload, created_at, local_save_at,
                                     status, priority, retry_count, next_retry_at, last_error,
                                     error_kind, is_local_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                target_id = excluded.target_id,
                payload = excluded.payload,
                created_at = excluded.created_at,
                local_save_at = excluded.local_save_at,
                status = excluded.status,
                priority = excluded.priority,
                retry_count = excluded.retry_count,
                next_retry_at = excluded.next_retry_at,
                last_error = excluded.last_error,
                error_kind = excluded.error_kind,
                is_local_id = excluded.is_local_id",
            params![
                op.id,
                op.kind.as_str(),
                op.target_id,
                payload,
                ts_to_text(op.created_at),
                op.local_save_at.map(ts_to_text),
                op.status.as_str(),
                op.priority,
                op.retry_count as i64,
                op.next_retry_at.map(ts_to_text),
                op.last_error,
                op.error_kind.map(ErrorKind::as_str),
                op.is_local_id,
            ],
        )?;
        Ok(())
    }

    fn delete_operation(&self, id: &str) -> Result<(), StoreError> {
        self.conn
            .lock()
            .execute("DELETE FROM operations WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn load_operations(&self) -> Result<Vec<Operation>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, kind, target_id, payload, created_at, local_save_at, status, priority,
                    retry_count, next_retry_at, last_error, error_kind, is_local_id
             FROM operations",
        )?;
        let raw = stmt
            .query_map([], operation_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter().map(RawOperation::decode).collect()
    }

    fn put_mapping(&self, mapping: &IdMapping) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO id_mappings (local_id, server_id, entity_kind, created_at, completed)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(local_id) DO UPDATE SET
                server_id = excluded.server_id,
                entity_kind = excluded.entity_kind,
                created_at = excluded.created_at,
                completed = excluded.completed",
            params![
                mapping.local_id,
                mapping.server_id,
                mapping.entity_kind.as_str(),
                ts_to_text(mapping.created_at),
                mapping.completed,
            ],
        )?;
        Ok(())
    }

    fn get_mapping(&self, local_id: &str) -> Result<Option<IdMapping>, StoreError> {
        let conn = self.conn.lock();
        let found = conn
            .query_row(
                "SELECT local_id, server_id, entity_kind, created_at, completed
                 FROM id_mappings WHERE local_id = ?1",
                params![local_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, bool>(4)?,
                    ))
                },
            )
            .optional()?;
        match found {
            Some((local_id, server_id, kind, created, completed)) => Ok(Some(IdMapping {
                local_id,
                server_id,
                entity_kind: entity_kind_from_text(&kind)?,
                created_at: text_to_ts(&created)?,
                completed,
            })),
            None => Ok(None),
        }
    }

    fn load_mappings(&self) -> Result<Vec<IdMapping>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT local_id, server_id, entity_kind, created_at, completed FROM id_mappings",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, bool>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(local_id, server_id, kind, created, completed)| {
                Ok(IdMapping {
                    local_id,
                    server_id,
                    entity_kind: entity_kind_from_text(&kind)?,
                    created_at: text_to_ts(&created)?,
                    completed,
                })
            })
            .collect()
    }

    fn delete_mapping(&self, local_id: &str) -> Result<(), StoreError> {
        self.conn
            .lock()
            .execute("DELETE FROM id_mappings WHERE local_id = ?1", params![local_id])?;
        Ok(())
    }

    fn delete_completed_mappings(&self) -> Result<usize, StoreError> {
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM id_mappings WHERE completed = 1", [])?;
        Ok(removed)
    }

    fn get_sync_status(&self) -> Result<SyncStatus, StoreError> {
        let conn = self.conn.lock();
        let found = conn
            .query_row(
                "SELECT last_sync_time, sync_tag FROM sync_status WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                    ))
                },
            )
            .optional()?;
        match found {
            Some((last_sync, sync_tag)) => Ok(SyncStatus {
                last_sync_time: opt_ts(last_sync)?,
                sync_tag,
            }),
            None => Ok(SyncStatus::default()),
        }
    }

    fn put_sync_status(&self, status: &SyncStatus) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO sync_status (id, last_sync_time, sync_tag)
             VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET
                last_sync_time = excluded.last_sync_time,
                sync_tag = excluded.sync_tag",
            params![status.last_sync_time.map(ts_to_text), status.sync_tag],
        )?;
        Ok(())
    }

    fn rewrite_note_id(&self, old_id: &str, new_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        // OR IGNORE keeps an already-renamed row; the stale source row is
        // then dropped either way.
        tx.execute(
            "UPDATE OR IGNORE notes SET id = ?2 WHERE id = ?1",
            params![old_id, new_id],
        )?;
        tx.execute("DELETE FROM notes WHERE id = ?1", params![old_id])?;
        tx.commit()?;
        Ok(())
    }

    fn rewrite_folder_id(&self, old_id: &str, new_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE OR IGNORE folders SET id = ?2 WHERE id = ?1",
            params![old_id, new_id],
        )?;
        tx.execute("DELETE FROM folders WHERE id = ?1", params![old_id])?;
        tx.execute(
            "UPDATE notes SET folder_id = ?2 WHERE folder_id = ?1",
            params![old_id, new_id],
        )?;
        tx.commit()?;
        Ok(())
    }
}
