use crate::error::StoreError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

/// An operator reply waiting for its session's next poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingResponse {
    pub relay_message_id: i64,
    pub session_id: String,
    pub text: String,
    pub created_at: String,
}

/// Shared state bridging the webhook/polling ingest path and the widget's
/// poll loop. Backed by an external store because the two run as unrelated
/// request lifetimes.
pub trait PendingStore: Send + Sync {
    /// Queue a reply for a session. Idempotent per relay message id:
    /// duplicate webhook deliveries collapse into one entry. Returns whether
    /// a new entry was inserted.
    fn enqueue(&self, relay_message_id: i64, session_id: &str, text: &str)
    -> Result<bool, StoreError>;

    /// Atomically remove and return every live entry for a session. Entries
    /// past their TTL are purged without being returned.
    fn take_for_session(&self, session_id: &str) -> Result<Vec<PendingResponse>, StoreError>;

    fn load_cursor(&self) -> Result<i64, StoreError>;
    fn store_cursor(&self, cursor: i64) -> Result<(), StoreError>;

    /// Remember which session a notification was sent for (correlation
    /// fallback when the operator's reply does not echo the session token).
    fn record_notify(&self, session_id: &str, message_id: i64) -> Result<(), StoreError>;
    fn last_notified_session(&self) -> Result<Option<String>, StoreError>;
}

pub struct SqlitePendingStore {
    conn: Mutex<Connection>,
    ttl: ChronoDuration,
}

impl SqlitePendingStore {
    pub fn new(db_path: &Path, ttl: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn, ttl)
    }

    fn with_connection(conn: Connection, ttl: Duration) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS pending_responses (
                 relay_message_id INTEGER PRIMARY KEY,
                 session_id TEXT NOT NULL,
                 text TEXT NOT NULL,
                 created_at TEXT NOT NULL
             );

             CREATE INDEX IF NOT EXISTS idx_pending_session
                 ON pending_responses(session_id, created_at);

             CREATE TABLE IF NOT EXISTS relay_cursor (
                 id INTEGER PRIMARY KEY CHECK (id = 1),
                 next_offset INTEGER NOT NULL
             );

             CREATE TABLE IF NOT EXISTS notify_records (
                 session_id TEXT PRIMARY KEY,
                 message_id INTEGER NOT NULL,
                 sent_at TEXT NOT NULL
             );",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            ttl: ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::hours(1)),
        })
    }

    fn lock_connection(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|error| StoreError::Lock(error.to_string()))
    }

    fn expiry_cutoff(&self) -> DateTime<Utc> {
        Utc::now() - self.ttl
    }
}

impl PendingStore for SqlitePendingStore {
    fn enqueue(
        &self,
        relay_message_id: i64,
        session_id: &str,
        text: &str,
    ) -> Result<bool, StoreError> {
        let conn = self.lock_connection()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO pending_responses (relay_message_id, session_id, text, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![relay_message_id, session_id, text, Utc::now().to_rfc3339()],
        )?;
        Ok(inserted > 0)
    }

    fn take_for_session(&self, session_id: &str) -> Result<Vec<PendingResponse>, StoreError> {
        let conn = self.lock_connection()?;
        let cutoff = self.expiry_cutoff().to_rfc3339();

        // Expiry is silent loss by design.
        conn.execute(
            "DELETE FROM pending_responses WHERE created_at < ?1",
            params![cutoff],
        )?;

        // Single read-and-delete statement: concurrent polls for the same
        // session cannot both observe an entry.
        let mut stmt = conn.prepare(
            "DELETE FROM pending_responses
             WHERE session_id = ?1
             RETURNING relay_message_id, session_id, text, created_at",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok(PendingResponse {
                relay_message_id: row.get(0)?,
                session_id: row.get(1)?,
                text: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;

        let mut responses = Vec::new();
        for row in rows {
            responses.push(row?);
        }
        responses.sort_by_key(|response| response.relay_message_id);
        Ok(responses)
    }

    fn load_cursor(&self) -> Result<i64, StoreError> {
        let conn = self.lock_connection()?;
        let cursor = conn
            .query_row(
                "SELECT next_offset FROM relay_cursor WHERE id = 1",
                [],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(cursor.unwrap_or(0))
    }

    fn store_cursor(&self, cursor: i64) -> Result<(), StoreError> {
        let conn = self.lock_connection()?;
        conn.execute(
            "INSERT INTO relay_cursor (id, next_offset) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET next_offset = MAX(next_offset, excluded.next_offset)",
            params![cursor],
        )?;
        Ok(())
    }

    fn record_notify(&self, session_id: &str, message_id: i64) -> Result<(), StoreError> {
        let conn = self.lock_connection()?;
        conn.execute(
            "INSERT INTO notify_records (session_id, message_id, sent_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(session_id) DO UPDATE
                 SET message_id = excluded.message_id, sent_at = excluded.sent_at",
            params![session_id, message_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn last_notified_session(&self) -> Result<Option<String>, StoreError> {
        let conn = self.lock_connection()?;
        let cutoff = self.expiry_cutoff().to_rfc3339();
        let session = conn
            .query_row(
                "SELECT session_id FROM notify_records
                 WHERE sent_at >= ?1
                 ORDER BY sent_at DESC, message_id DESC
                 LIMIT 1",
                params![cutoff],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn store_with_ttl(ttl: Duration) -> (NamedTempFile, SqlitePendingStore) {
        let db_file = NamedTempFile::new().unwrap();
        let store = SqlitePendingStore::new(db_file.path(), ttl).unwrap();
        (db_file, store)
    }

    fn store() -> (NamedTempFile, SqlitePendingStore) {
        store_with_ttl(Duration::from_secs(3600))
    }

    #[test]
    fn take_drains_and_second_take_is_empty() {
        let (_db_file, store) = store();
        store.enqueue(1, "sess-1", "on it").unwrap();
        store.enqueue(2, "sess-1", "checking now").unwrap();

        let first = store.take_for_session("sess-1").unwrap();
        let second = store.take_for_session("sess-1").unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(first[0].text, "on it");
        assert_eq!(first[1].text, "checking now");
        assert!(second.is_empty());
    }

    #[test]
    fn enqueue_is_idempotent_per_relay_message_id() {
        let (_db_file, store) = store();
        assert!(store.enqueue(7, "sess-1", "on it").unwrap());
        assert!(!store.enqueue(7, "sess-1", "on it").unwrap());

        let taken = store.take_for_session("sess-1").unwrap();
        assert_eq!(taken.len(), 1);
    }

    #[test]
    fn take_is_scoped_to_the_session() {
        let (_db_file, store) = store();
        store.enqueue(1, "sess-1", "for one").unwrap();
        store.enqueue(2, "sess-2", "for two").unwrap();

        let taken = store.take_for_session("sess-1").unwrap();
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].session_id, "sess-1");

        let other = store.take_for_session("sess-2").unwrap();
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn expired_entries_are_purged_not_delivered() {
        let (_db_file, store) = store_with_ttl(Duration::ZERO);
        store.enqueue(1, "sess-1", "too late").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));

        assert!(store.take_for_session("sess-1").unwrap().is_empty());
    }

    #[test]
    fn cursor_starts_at_zero_and_is_monotonic() {
        let (_db_file, store) = store();
        assert_eq!(store.load_cursor().unwrap(), 0);

        store.store_cursor(12).unwrap();
        assert_eq!(store.load_cursor().unwrap(), 12);

        // A stale writer cannot move the cursor backwards.
        store.store_cursor(5).unwrap();
        assert_eq!(store.load_cursor().unwrap(), 12);
    }

    #[test]
    fn last_notified_session_tracks_the_most_recent() {
        let (_db_file, store) = store();
        assert!(store.last_notified_session().unwrap().is_none());

        store.record_notify("sess-1", 100).unwrap();
        store.record_notify("sess-2", 101).unwrap();
        assert_eq!(
            store.last_notified_session().unwrap().as_deref(),
            Some("sess-2")
        );
    }

    #[test]
    fn stale_notify_records_do_not_correlate() {
        let (_db_file, store) = store_with_ttl(Duration::ZERO);
        store.record_notify("sess-1", 100).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));

        assert!(store.last_notified_session().unwrap().is_none());
    }
}
