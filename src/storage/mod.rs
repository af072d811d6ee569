//! Local relational store (SQLite)
//!
//! Holds users, challenge phrases, raw biometric samples, the sync outbox and
//! a small key/value table for device metadata. Templates and the model live
//! in the artifact store, not here.

mod queue;

pub use queue::{QueueEntity, QueueItem};

use crate::error::{EngineError, Result};
use crate::model::Modality;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    user_id     INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id TEXT NOT NULL UNIQUE,
    remote_id   INTEGER,
    status      TEXT NOT NULL DEFAULT 'active',
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS phrases (
    phrase_id  INTEGER PRIMARY KEY AUTOINCREMENT,
    remote_id  INTEGER UNIQUE,
    text       TEXT NOT NULL,
    category   TEXT NOT NULL DEFAULT 'general',
    active     INTEGER NOT NULL DEFAULT 1,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS samples (
    sample_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     INTEGER NOT NULL REFERENCES users(user_id),
    modality    TEXT NOT NULL,
    features    BLOB NOT NULL,
    phrase_id   INTEGER,
    captured_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS sync_queue (
    sync_id     INTEGER PRIMARY KEY AUTOINCREMENT,
    entity      TEXT NOT NULL,
    payload_ref TEXT NOT NULL,
    payload     TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    synced      INTEGER NOT NULL DEFAULT 0,
    synced_at   TEXT
);
CREATE INDEX IF NOT EXISTS idx_sync_queue_pending ON sync_queue(synced, sync_id);
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

pub const META_DEVICE_ID: &str = "device_id";
pub const META_LAST_PUSH: &str = "last_push_at";
pub const META_LAST_PULL: &str = "last_pull_at";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: i64,
    pub external_id: String,
    pub remote_id: Option<i64>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phrase {
    pub phrase_id: i64,
    pub remote_id: Option<i64>,
    pub text: String,
    pub category: String,
    pub active: bool,
}

/// Phrase supplied by the host application
#[derive(Debug, Clone, Deserialize)]
pub struct NewPhrase {
    pub text: String,
    #[serde(default = "default_category")]
    pub category: String,
}

fn default_category() -> String {
    "general".to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    pub sample_id: i64,
    pub user_id: i64,
    pub modality: Modality,
    pub features: Vec<f64>,
    pub phrase_id: Option<i64>,
    pub captured_at: DateTime<Utc>,
}

/// Row counts reported through engine statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreCounts {
    pub users: u64,
    pub active_phrases: u64,
    pub voice_samples: u64,
    pub ear_samples: u64,
    pub pending_sync: u64,
    pub synced: u64,
}

fn features_to_blob(features: &[f64]) -> Vec<u8> {
    features.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn blob_to_features(blob: &[u8]) -> Vec<f64> {
    blob.chunks_exact(8)
        .map(|c| {
            let mut b = [0u8; 8];
            b.copy_from_slice(c);
            f64::from_le_bytes(b)
        })
        .collect()
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        user_id: row.get(0)?,
        external_id: row.get(1)?,
        remote_id: row.get(2)?,
        status: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn phrase_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Phrase> {
    Ok(Phrase {
        phrase_id: row.get(0)?,
        remote_id: row.get(1)?,
        text: row.get(2)?,
        category: row.get(3)?,
        active: row.get(4)?,
    })
}

const PHRASE_COLUMNS: &str = "phrase_id, remote_id, text, category, active";

const USER_COLUMNS: &str = "user_id, external_id, remote_id, status, created_at, updated_at";

pub struct LocalStore {
    conn: Connection,
}

impl LocalStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Self::with_connection(conn)?;
        log::info!("Local store opened at {}", path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        let store = Self { conn };
        store.ensure_device_id()?;
        Ok(store)
    }

    fn ensure_device_id(&self) -> Result<String> {
        if let Some(id) = self.meta(META_DEVICE_ID)? {
            return Ok(id);
        }
        let bytes: [u8; 8] = rand::thread_rng().gen();
        let id: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        self.set_meta(META_DEVICE_ID, &id)?;
        log::info!("Generated device id {}", id);
        Ok(id)
    }

    pub fn device_id(&self) -> Result<String> {
        self.ensure_device_id()
    }

    pub fn meta(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = ?2",
            params![key, value],
        )?;
        Ok(())
    }

    // ---- users ----

    pub fn user(&self, external_id: &str) -> Result<Option<UserRecord>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {} FROM users WHERE external_id = ?1", USER_COLUMNS),
                [external_id],
                user_from_row,
            )
            .optional()?)
    }

    pub fn user_id(&self, external_id: &str) -> Result<Option<i64>> {
        Ok(self.user(external_id)?.map(|u| u.user_id))
    }

    /// Get-or-create by external id. A newly created user is queued for push
    /// in the same transaction. Returns the row and whether it was created.
    pub fn ensure_user(&mut self, external_id: &str) -> Result<(UserRecord, bool)> {
        if let Some(existing) = self.user(external_id)? {
            return Ok((existing, false));
        }

        let now = Utc::now();
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO users (external_id, status, created_at, updated_at)
             VALUES (?1, 'active', ?2, ?2)",
            params![external_id, now],
        )?;
        let user_id = tx.last_insert_rowid();
        let payload = json!({
            "external_id": external_id,
            "user_id": user_id,
            "status": "active",
            "created_at": now,
        });
        queue::enqueue(&tx, QueueEntity::User, external_id, &payload)?;
        tx.commit()?;

        log::info!("Created user '{}' (id {})", external_id, user_id);
        let user = self
            .user(external_id)?
            .ok_or_else(|| EngineError::Storage("user vanished after insert".to_string()))?;
        Ok((user, true))
    }

    pub fn set_remote_id(&self, external_id: &str, remote_id: i64) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE users SET remote_id = ?2 WHERE external_id = ?1",
            params![external_id, remote_id],
        )?;
        if changed == 0 {
            return Err(EngineError::NotFound(format!("user '{}'", external_id)));
        }
        Ok(())
    }

    /// Merge a user row from the server. Inserts unknown users; updates a
    /// known one only when the remote copy is strictly newer.
    pub fn merge_remote_user(
        &self,
        external_id: &str,
        remote_id: Option<i64>,
        status: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        match self.user(external_id)? {
            None => {
                self.conn.execute(
                    "INSERT INTO users (external_id, remote_id, status, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?4)",
                    params![external_id, remote_id, status, updated_at],
                )?;
                Ok(true)
            }
            Some(local) if updated_at > local.updated_at => {
                self.conn.execute(
                    "UPDATE users SET remote_id = COALESCE(?2, remote_id), status = ?3, updated_at = ?4
                     WHERE user_id = ?1",
                    params![local.user_id, remote_id, status, updated_at],
                )?;
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }

    // ---- phrases ----

    pub fn insert_phrases(&mut self, phrases: &[NewPhrase]) -> Result<usize> {
        let now = Utc::now();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO phrases (text, category, active, updated_at) VALUES (?1, ?2, 1, ?3)",
            )?;
            for p in phrases {
                crate::validation::validate_phrase(&p.text, &p.category)?;
                stmt.execute(params![p.text.trim(), p.category, now])?;
            }
        }
        tx.commit()?;
        log::info!("Inserted {} phrases", phrases.len());
        Ok(phrases.len())
    }

    pub fn phrase(&self, phrase_id: i64) -> Result<Option<Phrase>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {} FROM phrases WHERE phrase_id = ?1", PHRASE_COLUMNS),
                [phrase_id],
                phrase_from_row,
            )
            .optional()?)
    }

    /// Phrase pulled from the server, looked up by the server's id
    pub fn phrase_by_remote_id(&self, remote_id: i64) -> Result<Option<Phrase>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {} FROM phrases WHERE remote_id = ?1", PHRASE_COLUMNS),
                [remote_id],
                phrase_from_row,
            )
            .optional()?)
    }

    /// Uniform choice among active phrases
    pub fn random_phrase(&self) -> Result<Option<Phrase>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {} FROM phrases WHERE active = 1",
            PHRASE_COLUMNS
        ))?;
        let phrases = stmt
            .query_map([], phrase_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(phrases.choose(&mut rand::thread_rng()).cloned())
    }

    /// Merge a phrase from the server, keyed by the server's id. A pulled
    /// phrase gets its own local id; later merges only touch `active`.
    pub fn merge_remote_phrase(
        &self,
        remote_id: i64,
        text: &str,
        active: bool,
        updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        let local: Option<(i64, DateTime<Utc>)> = self
            .conn
            .query_row(
                "SELECT phrase_id, updated_at FROM phrases WHERE remote_id = ?1",
                [remote_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match local {
            None => {
                self.conn.execute(
                    "INSERT INTO phrases (remote_id, text, category, active, updated_at)
                     VALUES (?1, ?2, 'general', ?3, ?4)",
                    params![remote_id, text.trim(), active, updated_at],
                )?;
                Ok(true)
            }
            Some((phrase_id, local)) if updated_at > local => {
                self.conn.execute(
                    "UPDATE phrases SET active = ?2, updated_at = ?3 WHERE phrase_id = ?1",
                    params![phrase_id, active, updated_at],
                )?;
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }

    // ---- samples ----

    /// Store a sample and queue it for push, atomically
    pub fn insert_sample(
        &mut self,
        user: &UserRecord,
        modality: Modality,
        features: &[f64],
        phrase_id: Option<i64>,
    ) -> Result<i64> {
        let now = Utc::now();
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO samples (user_id, modality, features, phrase_id, captured_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.user_id,
                modality.as_str(),
                features_to_blob(features),
                phrase_id,
                now
            ],
        )?;
        let sample_id = tx.last_insert_rowid();
        let payload = json!({
            "external_id": user.external_id,
            "user_id": user.user_id,
            "sample_id": sample_id,
            "modality": modality,
            "features": features,
            "phrase_id": phrase_id,
            "captured_at": now,
        });
        queue::enqueue(
            &tx,
            QueueEntity::Sample,
            &format!("sample:{}", sample_id),
            &payload,
        )?;
        tx.commit()?;
        Ok(sample_id)
    }

    pub fn samples_for(&self, user_id: i64, modality: Modality) -> Result<Vec<SampleRecord>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT sample_id, user_id, features, phrase_id, captured_at
             FROM samples WHERE user_id = ?1 AND modality = ?2 ORDER BY sample_id",
        )?;
        let rows = stmt.query_map(params![user_id, modality.as_str()], |row| {
            let blob: Vec<u8> = row.get(2)?;
            Ok(SampleRecord {
                sample_id: row.get(0)?,
                user_id: row.get(1)?,
                modality,
                features: blob_to_features(&blob),
                phrase_id: row.get(3)?,
                captured_at: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ---- outbox ----

    pub fn pending(&self, limit: Option<usize>) -> Result<Vec<QueueItem>> {
        queue::pending(&self.conn, limit)
    }

    pub fn pending_count(&self) -> Result<u64> {
        queue::count(&self.conn, false)
    }

    pub fn mark_synced(&self, sync_id: i64) -> Result<bool> {
        queue::mark_synced(&self.conn, sync_id)
    }

    pub fn counts(&self) -> Result<StoreCounts> {
        let count = |sql: &str| -> Result<u64> {
            Ok(self.conn.query_row(sql, [], |row| row.get::<_, i64>(0))? as u64)
        };
        Ok(StoreCounts {
            users: count("SELECT COUNT(*) FROM users")?,
            active_phrases: count("SELECT COUNT(*) FROM phrases WHERE active = 1")?,
            voice_samples: count("SELECT COUNT(*) FROM samples WHERE modality = 'voice'")?,
            ear_samples: count("SELECT COUNT(*) FROM samples WHERE modality = 'ear'")?,
            pending_sync: queue::count(&self.conn, false)?,
            synced: queue::count(&self.conn, true)?,
        })
    }
}
