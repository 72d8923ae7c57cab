use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use tracing::debug;

use beacon_core::{
    HealthStatus, RegistryRepository, ServiceRecord, Session, SessionRepository, StorageError,
};

/// SQLite-backed store. One connection, serialized behind a mutex.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path).map_err(|e| StorageError::backend("open database", e))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        let conn =
            Connection::open_in_memory().map_err(|e| StorageError::backend("open database", e))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_tables()?;
        Ok(db)
    }

    fn init_tables(&self) -> Result<(), StorageError> {
        let conn = self.lock("create tables")?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                service_id TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS sessions_expires_at ON sessions(expires_at);
            CREATE TABLE IF NOT EXISTS services (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                version TEXT NOT NULL,
                endpoints TEXT NOT NULL,
                capabilities TEXT NOT NULL,
                metadata TEXT NOT NULL,
                status TEXT NOT NULL,
                registered_at INTEGER NOT NULL,
                last_heartbeat INTEGER NOT NULL,
                health_check_url TEXT
            );
            ",
        )
        .map_err(|e| StorageError::backend("create tables", e))
    }

    fn lock(&self, operation: &'static str) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::backend(operation, "connection lock poisoned"))
    }
}

fn to_json<T: serde::Serialize>(operation: &'static str, value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|e| StorageError::backend(operation, e))
}

fn from_json<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    let data: String = row.get(3)?;
    Ok(Session {
        id: row.get(0)?,
        user_id: row.get(1)?,
        service_id: row.get(2)?,
        data: from_json(3, &data)?,
        created_at: row.get::<_, i64>(4)? as u64,
        updated_at: row.get::<_, i64>(5)? as u64,
        expires_at: row.get::<_, i64>(6)? as u64,
    })
}

fn service_from_row(row: &Row<'_>) -> rusqlite::Result<ServiceRecord> {
    let endpoints: String = row.get(3)?;
    let capabilities: String = row.get(4)?;
    let metadata: String = row.get(5)?;
    let status: String = row.get(6)?;
    Ok(ServiceRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        version: row.get(2)?,
        endpoints: from_json::<Vec<String>>(3, &endpoints)?,
        capabilities: from_json::<BTreeSet<String>>(4, &capabilities)?,
        metadata: from_json::<HashMap<String, String>>(5, &metadata)?,
        status: HealthStatus::parse(&status),
        registered_at: row.get::<_, i64>(7)? as u64,
        last_heartbeat: row.get::<_, i64>(8)? as u64,
        health_check_url: row.get(9)?,
    })
}

/// Timestamps are stored as signed integers; larger values are refused
/// rather than wrapped.
fn timestamp(operation: &'static str, value: u64) -> Result<i64, StorageError> {
    i64::try_from(value)
        .map_err(|_| StorageError::backend(operation, format!("timestamp {value} out of range")))
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

const SESSION_COLUMNS: &str =
    "id, user_id, service_id, data, created_at, updated_at, expires_at";
const SERVICE_COLUMNS: &str = "id, name, version, endpoints, capabilities, metadata, status, registered_at, last_heartbeat, health_check_url";

#[async_trait]
impl SessionRepository for SqliteStore {
    async fn create(&self, session: &Session) -> Result<(), StorageError> {
        let data = to_json("create session", &session.data)?;
        let created_at = timestamp("create session", session.created_at)?;
        let updated_at = timestamp("create session", session.updated_at)?;
        let expires_at = timestamp("create session", session.expires_at)?;
        let conn = self.lock("create session")?;
        conn.execute(
            &format!("INSERT INTO sessions ({SESSION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
            params![
                session.id,
                session.user_id,
                session.service_id,
                data,
                created_at,
                updated_at,
                expires_at,
            ],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                StorageError::AlreadyExists(session.id.clone())
            } else {
                StorageError::backend("create session", e)
            }
        })?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Session, StorageError> {
        let conn = self.lock("get session")?;
        conn.query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
            [id],
            session_from_row,
        )
        .optional()
        .map_err(|e| StorageError::backend("get session", e))?
        .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    async fn update(&self, session: &Session) -> Result<(), StorageError> {
        let data = to_json("update session", &session.data)?;
        let created_at = timestamp("update session", session.created_at)?;
        let updated_at = timestamp("update session", session.updated_at)?;
        let expires_at = timestamp("update session", session.expires_at)?;
        let conn = self.lock("update session")?;
        let changed = conn
            .execute(
                "UPDATE sessions SET user_id = ?2, service_id = ?3, data = ?4, created_at = ?5, updated_at = ?6, expires_at = ?7 WHERE id = ?1",
                params![
                    session.id,
                    session.user_id,
                    session.service_id,
                    data,
                    created_at,
                    updated_at,
                    expires_at,
                ],
            )
            .map_err(|e| StorageError::backend("update session", e))?;
        if changed == 0 {
            return Err(StorageError::NotFound(session.id.clone()));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        let conn = self.lock("delete session")?;
        conn.execute("DELETE FROM sessions WHERE id = ?1", [id])
            .map_err(|e| StorageError::backend("delete session", e))?;
        Ok(())
    }

    async fn delete_expired(&self, now: u64) -> Result<usize, StorageError> {
        let now = i64::try_from(now).unwrap_or(i64::MAX);
        let conn = self.lock("delete expired sessions")?;
        let removed = conn
            .execute("DELETE FROM sessions WHERE expires_at < ?1", [now])
            .map_err(|e| StorageError::backend("delete expired sessions", e))?;
        if removed > 0 {
            debug!(removed, "dropped expired session rows");
        }
        Ok(removed)
    }
}

#[async_trait]
impl RegistryRepository for SqliteStore {
    async fn register(&self, record: &ServiceRecord) -> Result<(), StorageError> {
        let endpoints = to_json("register service", &record.endpoints)?;
        let capabilities = to_json("register service", &record.capabilities)?;
        let metadata = to_json("register service", &record.metadata)?;
        let registered_at = timestamp("register service", record.registered_at)?;
        let last_heartbeat = timestamp("register service", record.last_heartbeat)?;
        let conn = self.lock("register service")?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO services ({SERVICE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            params![
                record.id,
                record.name,
                record.version,
                endpoints,
                capabilities,
                metadata,
                record.status.as_str(),
                registered_at,
                last_heartbeat,
                record.health_check_url,
            ],
        )
        .map_err(|e| StorageError::backend("register service", e))?;
        Ok(())
    }

    async fn deregister(&self, id: &str) -> Result<(), StorageError> {
        let conn = self.lock("deregister service")?;
        conn.execute("DELETE FROM services WHERE id = ?1", [id])
            .map_err(|e| StorageError::backend("deregister service", e))?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<ServiceRecord, StorageError> {
        let conn = self.lock("get service")?;
        conn.query_row(
            &format!("SELECT {SERVICE_COLUMNS} FROM services WHERE id = ?1"),
            [id],
            service_from_row,
        )
        .optional()
        .map_err(|e| StorageError::backend("get service", e))?
        .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<ServiceRecord>, StorageError> {
        let conn = self.lock("list services")?;
        let mut stmt = conn
            .prepare(&format!("SELECT {SERVICE_COLUMNS} FROM services"))
            .map_err(|e| StorageError::backend("list services", e))?;
        let rows = stmt
            .query_map([], service_from_row)
            .map_err(|e| StorageError::backend("list services", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| StorageError::backend("list services", e))
    }

    async fn update(&self, record: &ServiceRecord) -> Result<(), StorageError> {
        let endpoints = to_json("update service", &record.endpoints)?;
        let capabilities = to_json("update service", &record.capabilities)?;
        let metadata = to_json("update service", &record.metadata)?;
        let registered_at = timestamp("update service", record.registered_at)?;
        let last_heartbeat = timestamp("update service", record.last_heartbeat)?;
        let conn = self.lock("update service")?;
        let changed = conn
            .execute(
                "UPDATE services SET name = ?2, version = ?3, endpoints = ?4, capabilities = ?5, metadata = ?6, status = ?7, registered_at = ?8, last_heartbeat = ?9, health_check_url = ?10 WHERE id = ?1",
                params![
                    record.id,
                    record.name,
                    record.version,
                    endpoints,
                    capabilities,
                    metadata,
                    record.status.as_str(),
                    registered_at,
                    last_heartbeat,
                    record.health_check_url,
                ],
            )
            .map_err(|e| StorageError::backend("update service", e))?;
        if changed == 0 {
            return Err(StorageError::NotFound(record.id.clone()));
        }
        Ok(())
    }
}
