use chrono::{DateTime, Utc};
use tracing::instrument;

use chatrelay_core::messages::{MESSAGE_MAX_LEN, NAME_MAX_LEN};
use chatrelay_core::ChatMessage;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Narrow persistence interface used by the session loop and the history
/// query. Implementations must tolerate concurrent callers.
pub trait MessageStore: Send + Sync {
    /// Persist one accepted record.
    fn append(&self, name: &str, message: &str, created_at: DateTime<Utc>)
        -> Result<(), StoreError>;

    /// Up to `limit` most recent records, oldest first.
    fn recent(&self, limit: usize) -> Result<Vec<ChatMessage>, StoreError>;
}

/// `MessageStore` over the `message` table.
#[derive(Clone)]
pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn count(&self) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM message", [], |row| row.get(0))
                .map_err(StoreError::from)
        })
    }
}

fn check_field(field: &str, value: &str, max: usize) -> Result<(), StoreError> {
    let len = value.chars().count();
    if len == 0 {
        return Err(StoreError::Validation(format!("{field} must not be empty")));
    }
    if len > max {
        return Err(StoreError::Validation(format!(
            "{field} is {len} characters, max {max}"
        )));
    }
    Ok(())
}

impl MessageStore for MessageRepo {
    #[instrument(skip(self, message))]
    fn append(
        &self,
        name: &str,
        message: &str,
        created_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        check_field("name", name, NAME_MAX_LEN)?;
        check_field("message", message, MESSAGE_MAX_LEN)?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO message (name, message, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![name, message, row_helpers::format_time(created_at)],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self))]
    fn recent(&self, limit: usize) -> Result<Vec<ChatMessage>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name, message, created_at FROM message
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?1",
            )?;
            let mut rows = stmt.query([limit])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_message(row)?);
            }
            Ok(results)
        })?;
        rows.reverse();
        Ok(rows)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<ChatMessage, StoreError> {
    let created_at: String = row_helpers::get(row, 2, "message", "created_at")?;
    Ok(ChatMessage {
        name: row_helpers::get(row, 0, "message", "name")?,
        message: row_helpers::get(row, 1, "message", "message")?,
        time: row_helpers::parse_time(&created_at, "message", "created_at")?,
    })
}
