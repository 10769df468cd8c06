use std::str::FromStr;

use futures_util::future::{BoxFuture, FutureExt};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use uuid::Uuid;

use crate::rooms::msg::{Message, MessageKind};

use super::{HistoryStore, StoreError};

const SCHEMA: [&str; 2] = [
    r#"CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        room TEXT NOT NULL,
        seq INTEGER NOT NULL,
        nickname TEXT NOT NULL,
        kind TEXT NOT NULL,
        body TEXT NOT NULL,
        timestamp INTEGER NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS messages_room ON messages (room)",
];

type MessageRow = (String, String, i64, String, String, String, i64);

/// History kept in a sqlite database. Rows come back in insertion order,
/// which is the order the room accepted them in.
#[derive(Clone)]
pub struct SqliteHistory {
    db_pool: SqlitePool,
}

impl SqliteHistory {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let db_pool = SqlitePoolOptions::new()
            .max_connections(16)
            .connect_with(options)
            .await?;
        Self::from_pool(db_pool).await
    }

    pub async fn from_pool(db_pool: SqlitePool) -> Result<Self, StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&db_pool).await?;
        }
        Ok(Self { db_pool })
    }

    async fn insert(&self, message: &Message) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO messages (id,room,seq,nickname,kind,body,timestamp) VALUES (?,?,?,?,?,?,?)")
            .bind(message.id.to_string())
            .bind(&message.room)
            .bind(message.seq as i64)
            .bind(&message.nickname)
            .bind(message.kind.as_str())
            .bind(&message.body)
            .bind(message.timestamp)
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    async fn recent(&self, room: &str, limit: usize) -> Result<Vec<Message>, StoreError> {
        let mut rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id,room,seq,nickname,kind,body,timestamp FROM messages WHERE room=? ORDER BY rowid DESC LIMIT ?",
        )
        .bind(room)
        .bind(limit as i64)
        .fetch_all(&self.db_pool)
        .await?;
        rows.reverse();

        rows.into_iter().map(row_to_message).collect()
    }
}

fn row_to_message((id, room, seq, nickname, kind, body, timestamp): MessageRow) -> Result<Message, StoreError> {
    let id = Uuid::parse_str(&id).map_err(|e| StoreError::Corrupt(format!("id {id}: {e}")))?;
    let kind = kind
        .parse::<MessageKind>()
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
    Ok(Message {
        id,
        room,
        seq: seq as u64,
        nickname,
        body,
        kind,
        timestamp,
    })
}

impl HistoryStore for SqliteHistory {
    fn append<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, Result<(), StoreError>> {
        self.insert(message).boxed()
    }

    fn load_recent<'a>(
        &'a self,
        room: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<Message>, StoreError>> {
        self.recent(room, limit).boxed()
    }
}
