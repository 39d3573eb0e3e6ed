use crate::error::StoreError;
use chrono::Utc;
use rusqlite::{Connection, params, params_from_iter};
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;

/// One persisted exchange: the user's message and the response produced for
/// it, whichever path produced it. Never mutated after creation.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub id: i64,
    pub user_name: String,
    pub message: String,
    pub response: String,
    pub timestamp: String,
}

pub trait TranscriptStore: Send + Sync {
    /// Append an exchange, timestamped with the server clock (client clocks
    /// are not trusted for ordering). Returns the assigned id.
    fn append(&self, user_name: &str, message: &str, response: &str) -> Result<i64, StoreError>;

    /// Page through the log, newest first. `page` is 1-based.
    fn list(&self, page: u32, page_size: u32) -> Result<Vec<LogEntry>, StoreError>;

    /// Bulk delete by id set; the only way entries ever leave the log.
    fn delete(&self, ids: &[i64]) -> Result<usize, StoreError>;
}

pub struct SqliteTranscriptStore {
    conn: Mutex<Connection>,
}

impl SqliteTranscriptStore {
    pub fn new(db_path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS chat_logs (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 user_name TEXT NOT NULL,
                 message TEXT NOT NULL,
                 response TEXT NOT NULL,
                 timestamp TEXT NOT NULL
             );",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_connection(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|error| StoreError::Lock(error.to_string()))
    }
}

impl TranscriptStore for SqliteTranscriptStore {
    fn append(&self, user_name: &str, message: &str, response: &str) -> Result<i64, StoreError> {
        let conn = self.lock_connection()?;
        conn.execute(
            "INSERT INTO chat_logs (user_name, message, response, timestamp)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_name, message, response, Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn list(&self, page: u32, page_size: u32) -> Result<Vec<LogEntry>, StoreError> {
        let conn = self.lock_connection()?;
        let page = page.max(1);
        let offset = i64::from(page - 1) * i64::from(page_size);

        let mut stmt = conn.prepare(
            "SELECT id, user_name, message, response, timestamp
             FROM chat_logs
             ORDER BY id DESC
             LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(params![i64::from(page_size), offset], |row| {
            Ok(LogEntry {
                id: row.get(0)?,
                user_name: row.get(1)?,
                message: row.get(2)?,
                response: row.get(3)?,
                timestamp: row.get(4)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    fn delete(&self, ids: &[i64]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let conn = self.lock_connection()?;
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("DELETE FROM chat_logs WHERE id IN ({placeholders})");
        let deleted = conn.execute(&sql, params_from_iter(ids.iter()))?;
        Ok(deleted)
    }
}
