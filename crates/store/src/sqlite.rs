//! SQLite-backed store.
//!
//! One connection guarded by a mutex; each call runs on the blocking pool and
//! returns once its statement has committed. Foreign keys are enforced, so a
//! profile delete cascades to its sessions and messages.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use shared::{
    Message, MessageId, NewProfile, Profile, ProfileId, Role, Session, SessionId, StoreError,
};

use crate::{ChatStore, StoreResult};

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    db_path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) the database file at `db_path`
    pub fn open(db_path: &Path) -> StoreResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(StoreError::backend)?;
        }
        let conn = Connection::open(db_path).map_err(StoreError::backend)?;
        Self::init_schema(&conn).map_err(StoreError::backend)?;
        tracing::debug!(path = %db_path.display(), "Opened chat store");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: Some(db_path.to_path_buf()),
        })
    }

    /// Private database that disappears with the store
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::backend)?;
        Self::init_schema(&conn).map_err(StoreError::backend)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        // AUTOINCREMENT keeps ids monotonic even after deletes
        conn.execute(
            "CREATE TABLE IF NOT EXISTS profiles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                birth_date_time INTEGER NOT NULL,
                birth_place TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                remote_session_token TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                profile_id INTEGER NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
                content TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_sessions_profile ON sessions(profile_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id)",
            [],
        )?;

        Ok(())
    }

    async fn run_blocking<F, R>(&self, f: F) -> StoreResult<R>
    where
        F: FnOnce(&Connection) -> StoreResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StoreError::Backend("connection lock poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(StoreError::backend)?
    }
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

/// Current time at the precision the table keeps
fn now_millis() -> StoreResult<DateTime<Utc>> {
    from_millis(to_millis(Utc::now()))
}

fn from_millis(ms: i64) -> StoreResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp {} out of range", ms)))
}

// Row mappers return raw columns; conversion errors are surfaced afterwards
// so that they become `StoreError::Corrupt` rather than SQL errors.

type ProfileRow = (i64, String, i64, String, f64, f64, Option<String>);
type SessionRow = (i64, i64, i64);
type MessageRow = (i64, i64, String, String, i64);

const PROFILE_COLUMNS: &str =
    "id, name, birth_date_time, birth_place, latitude, longitude, remote_session_token";

fn profile_row(row: &Row<'_>) -> rusqlite::Result<ProfileRow> {
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

fn into_profile(raw: ProfileRow) -> StoreResult<Profile> {
    let (id, name, born, birth_place, latitude, longitude, remote_session_token) = raw;
    Ok(Profile {
        id: ProfileId(id),
        name,
        birth_date_time: from_millis(born)?,
        birth_place,
        latitude,
        longitude,
        remote_session_token,
    })
}

fn session_row(row: &Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn into_session(raw: SessionRow) -> StoreResult<Session> {
    let (id, profile_id, created_at) = raw;
    Ok(Session {
        id: SessionId(id),
        profile_id: ProfileId(profile_id),
        created_at: from_millis(created_at)?,
    })
}

fn message_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn into_message(raw: MessageRow) -> StoreResult<Message> {
    let (id, session_id, role, content, timestamp) = raw;
    Ok(Message {
        id: MessageId(id),
        session_id: SessionId(session_id),
        role: role.parse::<Role>()?,
        content,
        timestamp: from_millis(timestamp)?,
    })
}

fn exists(conn: &Connection, table: &str, id: i64) -> StoreResult<bool> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?1", table);
    conn.query_row(&sql, params![id], |_| Ok(()))
        .optional()
        .map(|found| found.is_some())
        .map_err(StoreError::backend)
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn create_profile(&self, data: NewProfile) -> StoreResult<Profile> {
        self.run_blocking(move |conn| {
            conn.execute(
                "INSERT INTO profiles
                    (name, birth_date_time, birth_place, latitude, longitude, remote_session_token)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    data.name,
                    to_millis(data.birth_date_time),
                    data.birth_place,
                    data.latitude,
                    data.longitude,
                    data.remote_session_token,
                ],
            )
            .map_err(StoreError::backend)?;
            let id = ProfileId(conn.last_insert_rowid());
            tracing::debug!(profile_id = %id, "Created profile");
            Ok(data.into_profile(id))
        })
        .await
    }

    async fn get_profile(&self, id: ProfileId) -> StoreResult<Option<Profile>> {
        self.run_blocking(move |conn| {
            let sql = format!("SELECT {} FROM profiles WHERE id = ?1", PROFILE_COLUMNS);
            conn.query_row(&sql, params![id.0], profile_row)
                .optional()
                .map_err(StoreError::backend)?
                .map(into_profile)
                .transpose()
        })
        .await
    }

    async fn list_profiles(&self) -> StoreResult<Vec<Profile>> {
        self.run_blocking(|conn| {
            let sql = format!("SELECT {} FROM profiles ORDER BY id", PROFILE_COLUMNS);
            let mut stmt = conn.prepare(&sql).map_err(StoreError::backend)?;
            let rows = stmt
                .query_map([], profile_row)
                .map_err(StoreError::backend)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(StoreError::backend)?;
            rows.into_iter().map(into_profile).collect()
        })
        .await
    }

    async fn delete_profile(&self, id: ProfileId) -> StoreResult<()> {
        self.run_blocking(move |conn| {
            let removed = conn
                .execute("DELETE FROM profiles WHERE id = ?1", params![id.0])
                .map_err(StoreError::backend)?;
            if removed == 0 {
                tracing::debug!(profile_id = %id, "Delete of unknown profile ignored");
            } else {
                tracing::info!(profile_id = %id, "Deleted profile and its chats");
            }
            Ok(())
        })
        .await
    }

    async fn create_session(&self, profile_id: ProfileId) -> StoreResult<Session> {
        self.run_blocking(move |conn| {
            if !exists(conn, "profiles", profile_id.0)? {
                return Err(StoreError::ProfileNotFound(profile_id));
            }
            let created_at = now_millis()?;
            conn.execute(
                "INSERT INTO sessions (profile_id, created_at) VALUES (?1, ?2)",
                params![profile_id.0, to_millis(created_at)],
            )
            .map_err(StoreError::backend)?;
            let session = Session {
                id: SessionId(conn.last_insert_rowid()),
                profile_id,
                created_at,
            };
            tracing::debug!(profile_id = %profile_id, session_id = %session.id, "Created session");
            Ok(session)
        })
        .await
    }

    async fn get_session(&self, id: SessionId) -> StoreResult<Option<Session>> {
        self.run_blocking(move |conn| {
            conn.query_row(
                "SELECT id, profile_id, created_at FROM sessions WHERE id = ?1",
                params![id.0],
                session_row,
            )
            .optional()
            .map_err(StoreError::backend)?
            .map(into_session)
            .transpose()
        })
        .await
    }

    async fn list_sessions_for_profile(&self, profile_id: ProfileId) -> StoreResult<Vec<Session>> {
        self.run_blocking(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, profile_id, created_at FROM sessions
                     WHERE profile_id = ?1 ORDER BY id",
                )
                .map_err(StoreError::backend)?;
            let rows = stmt
                .query_map(params![profile_id.0], session_row)
                .map_err(StoreError::backend)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(StoreError::backend)?;
            rows.into_iter().map(into_session).collect()
        })
        .await
    }

    async fn append_message(
        &self,
        session_id: SessionId,
        role: Role,
        content: String,
    ) -> StoreResult<Message> {
        self.run_blocking(move |conn| {
            if !exists(conn, "sessions", session_id.0)? {
                return Err(StoreError::SessionNotFound(session_id));
            }
            let timestamp = now_millis()?;
            conn.execute(
                "INSERT INTO messages (session_id, role, content, timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                params![session_id.0, role.as_str(), content, to_millis(timestamp)],
            )
            .map_err(StoreError::backend)?;
            Ok(Message {
                id: MessageId(conn.last_insert_rowid()),
                session_id,
                role,
                content,
                timestamp,
            })
        })
        .await
    }

    async fn list_messages(&self, session_id: SessionId) -> StoreResult<Vec<Message>> {
        self.run_blocking(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, session_id, role, content, timestamp FROM messages
                     WHERE session_id = ?1 ORDER BY id ASC",
                )
                .map_err(StoreError::backend)?;
            let rows = stmt
                .query_map(params![session_id.0], message_row)
                .map_err(StoreError::backend)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(StoreError::backend)?;
            rows.into_iter().map(into_message).collect()
        })
        .await
    }
}
