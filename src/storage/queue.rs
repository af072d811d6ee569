//! Append-only sync outbox
//!
//! Items are never deleted or rewritten; `synced` only moves from 0 to 1.

use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueEntity {
    User,
    Sample,
}

impl QueueEntity {
    fn as_str(&self) -> &'static str {
        match self {
            QueueEntity::User => "user",
            QueueEntity::Sample => "sample",
        }
    }

    fn parse(s: &str) -> rusqlite::Result<Self> {
        match s {
            "user" => Ok(QueueEntity::User),
            "sample" => Ok(QueueEntity::Sample),
            other => Err(rusqlite::Error::InvalidColumnType(
                1,
                format!("entity '{}'", other),
                rusqlite::types::Type::Text,
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueItem {
    pub sync_id: i64,
    pub entity: QueueEntity,
    pub payload_ref: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub synced: bool,
    pub synced_at: Option<DateTime<Utc>>,
}

pub(super) fn enqueue(
    conn: &Connection,
    entity: QueueEntity,
    payload_ref: &str,
    payload: &serde_json::Value,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO sync_queue (entity, payload_ref, payload, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![entity.as_str(), payload_ref, payload.to_string(), Utc::now()],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Unsynced items in creation order
pub(super) fn pending(conn: &Connection, limit: Option<usize>) -> Result<Vec<QueueItem>> {
    let limit = limit.map(|l| l as i64).unwrap_or(-1);
    let mut stmt = conn.prepare_cached(
        "SELECT sync_id, entity, payload_ref, payload, created_at, synced, synced_at
         FROM sync_queue WHERE synced = 0 ORDER BY sync_id LIMIT ?1",
    )?;

    let rows = stmt.query_map([limit], |row| {
        let entity: String = row.get(1)?;
        let payload: String = row.get(3)?;
        Ok(QueueItem {
            sync_id: row.get(0)?,
            entity: QueueEntity::parse(&entity)?,
            payload_ref: row.get(2)?,
            payload: serde_json::from_str(&payload).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
            })?,
            created_at: row.get(4)?,
            synced: row.get(5)?,
            synced_at: row.get(6)?,
        })
    })?;

    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub(super) fn count(conn: &Connection, synced: bool) -> Result<u64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sync_queue WHERE synced = ?1",
        [synced],
        |row| row.get(0),
    )?;
    Ok(n as u64)
}

/// Mark one item pushed. Returns false if it was already marked.
pub(super) fn mark_synced(conn: &Connection, sync_id: i64) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE sync_queue SET synced = 1, synced_at = ?2 WHERE sync_id = ?1 AND synced = 0",
        params![sync_id, Utc::now()],
    )?;
    if changed == 1 {
        return Ok(true);
    }

    let exists = conn
        .query_row(
            "SELECT 1 FROM sync_queue WHERE sync_id = ?1",
            [sync_id],
            |_| Ok(()),
        )
        .optional()?;
    match exists {
        Some(()) => Ok(false),
        None => Err(EngineError::NotFound(format!("sync item {}", sync_id))),
    }
}
