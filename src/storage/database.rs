//! SQLite Database
//!
//! Embedded database for message storage using rusqlite with r2d2 connection pooling.

use std::path::Path;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};

use crate::models::message::{parse_role, Feedback, Message, MessageExt, MessageStatus};
use crate::utils::error::{AppError, AppResult};

/// Type alias for the connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

const MESSAGE_COLUMNS: &str = "id, conversation_id, section_id, user_id, reply_id, msg_index, role,
     content, content_type, ext, feedback, status, created_at, updated_at";

/// Database service for managing SQLite operations
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create an in-memory database.
    ///
    /// The pool holds a single connection so every caller sees the same
    /// in-memory database.
    pub fn new_in_memory() -> AppResult<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| AppError::database(format!("Failed to create connection pool: {}", e)))?;

        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    /// Open (or create) a database file with connection pooling
    pub fn open(path: impl AsRef<Path>, pool_size: u32) -> AppResult<Self> {
        let db_path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.busy_timeout(Duration::from_secs(5))?;
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))
        });
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)
            .map_err(|e| AppError::database(format!("Failed to create connection pool: {}", e)))?;

        let db = Self { pool };
        db.init_schema()?;

        Ok(db)
    }

    /// Initialize the database schema
    fn init_schema(&self) -> AppResult<()> {
        let conn = self.get_connection()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                section_id TEXT NOT NULL DEFAULT '',
                user_id TEXT NOT NULL,
                reply_id INTEGER NOT NULL DEFAULT 0,
                msg_index INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL DEFAULT '',
                content_type TEXT NOT NULL DEFAULT 'text',
                ext TEXT NOT NULL DEFAULT '{}',
                feedback TEXT NOT NULL DEFAULT 'none',
                status TEXT NOT NULL DEFAULT 'active',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation
             ON messages(conversation_id, msg_index)",
            [],
        )?;

        // Identifier allocation happens before insertion, so ids come from
        // a counter rather than AUTOINCREMENT.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS id_sequence (
                name TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO id_sequence (name, value) VALUES ('message', 0)",
            [],
        )?;

        Ok(())
    }

    /// Get a connection from the pool
    pub fn get_connection(&self) -> AppResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| AppError::database(format!("Failed to get connection: {}", e)))
    }

    /// Check if the database is healthy
    pub fn is_healthy(&self) -> bool {
        if let Ok(conn) = self.pool.get() {
            conn.query_row("SELECT 1", [], |_| Ok(())).is_ok()
        } else {
            false
        }
    }

    /// Allocate the next message id
    pub fn next_message_id(&self) -> AppResult<i64> {
        let conn = self.get_connection()?;
        let id = conn.query_row(
            "UPDATE id_sequence SET value = value + 1 WHERE name = 'message' RETURNING value",
            [],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Insert a new message
    pub fn insert_message(&self, message: &Message) -> AppResult<()> {
        let conn = self.get_connection()?;
        let ext = serde_json::to_string(&message.ext)?;
        conn.execute(
            &format!(
                "INSERT INTO messages ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                MESSAGE_COLUMNS
            ),
            params![
                message.id,
                message.conversation_id,
                message.section_id,
                message.user_id,
                message.reply_id,
                message.index,
                message.role.as_str(),
                message.content,
                message.content_type,
                ext,
                message.feedback.as_str(),
                message.status.as_str(),
                message.created_at,
                message.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Insert or update a batch of messages in one transaction
    pub fn upsert_messages(&self, messages: &[Message]) -> AppResult<()> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO messages ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(id) DO UPDATE SET
                    reply_id = excluded.reply_id,
                    content = excluded.content,
                    content_type = excluded.content_type,
                    ext = excluded.ext,
                    feedback = excluded.feedback,
                    status = excluded.status,
                    updated_at = excluded.updated_at",
                MESSAGE_COLUMNS
            ))?;
            for message in messages {
                let ext = serde_json::to_string(&message.ext)?;
                stmt.execute(params![
                    message.id,
                    message.conversation_id,
                    message.section_id,
                    message.user_id,
                    message.reply_id,
                    message.index,
                    message.role.as_str(),
                    message.content,
                    message.content_type,
                    ext,
                    message.feedback.as_str(),
                    message.status.as_str(),
                    message.created_at,
                    message.updated_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// All active messages of a conversation, newest first
    pub fn find_messages(&self, conversation_id: &str) -> AppResult<Vec<Message>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages
             WHERE conversation_id = ?1 AND status = 'active'
             ORDER BY msg_index DESC, id DESC",
            MESSAGE_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![conversation_id], Self::row_to_message)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// One page of active messages, newest first, strictly older than `before`.
    /// Returns the page and whether older messages remain.
    pub fn page_messages(
        &self,
        conversation_id: &str,
        before: Option<i64>,
        size: usize,
    ) -> AppResult<(Vec<Message>, bool)> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages
             WHERE conversation_id = ?1 AND status = 'active'
               AND (?2 IS NULL OR msg_index < ?2)
             ORDER BY msg_index DESC, id DESC
             LIMIT ?3",
            MESSAGE_COLUMNS
        ))?;
        let mut rows = stmt
            .query_map(
                params![conversation_id, before, (size + 1) as i64],
                Self::row_to_message,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        let has_more = rows.len() > size;
        rows.truncate(size);
        Ok((rows, has_more))
    }

    /// Get a single message by id, including soft-deleted ones
    pub fn get_message(&self, id: i64) -> AppResult<Option<Message>> {
        let conn = self.get_connection()?;
        let message = conn
            .query_row(
                &format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS),
                params![id],
                Self::row_to_message,
            )
            .optional()?;
        Ok(message)
    }

    /// Overwrite the feedback of one message
    pub fn update_feedback(&self, id: i64, feedback: Feedback, updated_at: i64) -> AppResult<()> {
        let conn = self.get_connection()?;
        let changed = conn.execute(
            "UPDATE messages SET feedback = ?1, updated_at = ?2 WHERE id = ?3",
            params![feedback.as_str(), updated_at, id],
        )?;
        if changed == 0 {
            return Err(AppError::not_found(format!("message {}", id)));
        }
        Ok(())
    }

    fn row_to_message(row: &Row) -> rusqlite::Result<Message> {
        let role: String = row.get(6)?;
        let ext: String = row.get(9)?;
        let feedback: String = row.get(10)?;
        let status: String = row.get(11)?;

        let role = parse_role(&role).ok_or_else(|| invalid_column(6, "role", &role))?;
        let ext: MessageExt = serde_json::from_str(&ext)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e)))?;
        let feedback =
            Feedback::parse(&feedback).ok_or_else(|| invalid_column(10, "feedback", &feedback))?;
        let status =
            MessageStatus::parse(&status).ok_or_else(|| invalid_column(11, "status", &status))?;

        Ok(Message {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            section_id: row.get(2)?,
            user_id: row.get(3)?,
            reply_id: row.get(4)?,
            index: row.get(5)?,
            role,
            content: row.get(7)?,
            content_type: row.get(8)?,
            ext,
            feedback,
            status,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }
}

fn invalid_column(index: usize, column: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        Type::Text,
        format!("unknown {} '{}'", column, value).into(),
    )
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("pool_size", &self.pool.state().connections)
            .finish()
    }
}
