//! SQLite conversation store implementation.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use crate::{Conversation, ConversationDetail, ConversationId, Error, Result, Role, StoredMessage};

/// SQLite-backed conversation store.
pub struct ConversationStore {
    conn: Connection,
}

impl ConversationStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL
                    REFERENCES conversations(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_conversation
                ON messages(conversation_id, created_at);
            "#,
        )?;
        Ok(())
    }

    /// All conversations, most recently updated first.
    pub fn list(&self) -> Result<Vec<Conversation>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, created_at, updated_at FROM conversations
             ORDER BY updated_at DESC, rowid DESC",
        )?;
        let rows = stmt.query_map([], conversation_from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn create(&self, title: &str) -> Result<Conversation> {
        let created = now();
        let conversation = Conversation {
            id: ConversationId::new(),
            title: title.to_string(),
            created_at: created,
            updated_at: created,
        };
        self.conn.execute(
            "INSERT INTO conversations (id, title, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            params![conversation.id.to_string(), title, timestamp(created)],
        )?;
        Ok(conversation)
    }

    pub fn get(&self, id: ConversationId) -> Result<Conversation> {
        self.conn
            .query_row(
                "SELECT id, title, created_at, updated_at FROM conversations WHERE id = ?1",
                [id.to_string()],
                conversation_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("conversation {id}")))
    }

    /// A conversation with its messages, oldest first.
    pub fn load(&self, id: ConversationId) -> Result<ConversationDetail> {
        let conversation = self.get(id)?;
        let mut stmt = self.conn.prepare(
            "SELECT id, role, content, created_at FROM messages
             WHERE conversation_id = ?1 ORDER BY created_at, rowid",
        )?;
        let messages = stmt
            .query_map([id.to_string()], |row| {
                let content: String = row.get(2)?;
                Ok((
                    parse_column::<Uuid>(row, 0)?,
                    parse_column::<Role>(row, 1)?,
                    content,
                    parse_column::<DateTime<Utc>>(row, 3)?,
                ))
            })?
            .map(|row| -> Result<StoredMessage> {
                let (id, role, content, created_at) = row?;
                Ok(StoredMessage {
                    id,
                    role,
                    content: serde_json::from_str(&content)?,
                    created_at,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ConversationDetail {
            conversation,
            messages,
        })
    }

    pub fn rename(&self, id: ConversationId, title: &str) -> Result<Conversation> {
        let changed = self.conn.execute(
            "UPDATE conversations SET title = ?1, updated_at = ?2 WHERE id = ?3",
            params![title, timestamp(now()), id.to_string()],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("conversation {id}")));
        }
        self.get(id)
    }

    /// Delete a conversation and, by cascade, its messages.
    pub fn delete(&self, id: ConversationId) -> Result<()> {
        let changed = self
            .conn
            .execute("DELETE FROM conversations WHERE id = ?1", [id.to_string()])?;
        if changed == 0 {
            return Err(Error::NotFound(format!("conversation {id}")));
        }
        Ok(())
    }

    /// Append a message and bump the conversation's `updated_at`.
    pub fn append_message(
        &self,
        id: ConversationId,
        role: Role,
        content: &serde_json::Value,
    ) -> Result<StoredMessage> {
        // Existence check first so a missing conversation is NotFound, not
        // a foreign-key failure.
        self.get(id)?;
        let message = StoredMessage {
            id: Uuid::new_v4(),
            role,
            content: content.clone(),
            created_at: now(),
        };
        self.conn.execute(
            "INSERT INTO messages (id, conversation_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message.id.to_string(),
                id.to_string(),
                role.as_str(),
                serde_json::to_string(content)?,
                timestamp(message.created_at),
            ],
        )?;
        self.touch(id)?;
        Ok(message)
    }

    pub fn touch(&self, id: ConversationId) -> Result<()> {
        self.conn.execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            params![timestamp(now()), id.to_string()],
        )?;
        Ok(())
    }
}

/// Current time at the precision the database keeps.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: ConversationId(parse_column(row, 0)?),
        title: row.get(1)?,
        created_at: parse_column(row, 2)?,
        updated_at: parse_column(row, 3)?,
    })
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
