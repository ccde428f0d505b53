//! SQLite-backed collaborators.
//!
//! [`SqliteStore`] implements the room directory, user directory and message
//! store over one `sqlx` pool. Ids are stored as hyphenated UUID text and
//! timestamps as milliseconds since the Unix epoch.

use async_trait::async_trait;
use huddle_protocol::{MessageId, RoomId, UserId};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tenvis_huddle_core::message::now_millis;
use tenvis_huddle_core::{
    Message, MessageStore, NewMessage, NewRoom, Room, RoomDirectory, StoreError, UserDirectory,
    UserProfile,
};
use tracing::{debug, info};

use crate::config::DatabaseConfig;

const SCHEMA: [&str; 5] = [
    "CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        user_name TEXT NOT NULL UNIQUE,
        display_name TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS rooms (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        is_private INTEGER NOT NULL,
        user_a_id TEXT,
        user_b_id TEXT,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS room_participants (
        room_id TEXT NOT NULL REFERENCES rooms(id),
        user_id TEXT NOT NULL,
        PRIMARY KEY (room_id, user_id)
    )",
    "CREATE TABLE IF NOT EXISTS messages (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        room_id TEXT NOT NULL REFERENCES rooms(id),
        sender_id TEXT NOT NULL,
        content TEXT NOT NULL,
        sent_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS messages_room_sent ON messages (room_id, sent_at, seq)",
];

type MessageRow = (String, String, String, String, i64);

/// Room, user and message storage over SQLite.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open a pool and create the schema if it is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(StoreError::backend)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(StoreError::backend)?;

        let store = Self { pool };
        store.migrate().await?;

        info!("Connected to database {}", config.url);
        Ok(store)
    }

    /// Create any missing tables.
    ///
    /// # Errors
    ///
    /// Returns an error if a statement fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(StoreError::backend)?;
        }
        debug!("Database schema ready");
        Ok(())
    }

    /// Create a user.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if the user name is taken.
    pub async fn create_user(
        &self,
        user_name: &str,
        display_name: &str,
    ) -> Result<UserProfile, StoreError> {
        let profile = UserProfile {
            id: UserId::generate(),
            user_name: user_name.to_string(),
            display_name: display_name.to_string(),
        };

        sqlx::query("INSERT INTO users (id,user_name,display_name,created_at) VALUES (?,?,?,?)")
            .bind(profile.id.to_string())
            .bind(&profile.user_name)
            .bind(&profile.display_name)
            .bind(now_millis() as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    StoreError::Conflict(format!("user name '{user_name}' is taken"))
                }
                other => StoreError::backend(other),
            })?;

        debug!(user = %profile.id, "Created user");
        Ok(profile)
    }

    /// Create a room and its participant list.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] for a malformed request.
    pub async fn create_room(&self, request: NewRoom) -> Result<Room, StoreError> {
        let room = request.into_room(RoomId::generate())?;
        let (user_a, user_b) = match room.direct_pair {
            Some([a, b]) => (Some(a.to_string()), Some(b.to_string())),
            None => (None, None),
        };

        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;

        sqlx::query(
            "INSERT INTO rooms (id,name,is_private,user_a_id,user_b_id,created_at) VALUES (?,?,?,?,?,?)",
        )
        .bind(room.id.to_string())
        .bind(&room.name)
        .bind(room.is_private)
        .bind(user_a)
        .bind(user_b)
        .bind(now_millis() as i64)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::backend)?;

        for participant in &room.participant_ids {
            sqlx::query("INSERT INTO room_participants (room_id,user_id) VALUES (?,?)")
                .bind(room.id.to_string())
                .bind(participant.to_string())
                .execute(&mut *tx)
                .await
                .map_err(StoreError::backend)?;
        }

        tx.commit().await.map_err(StoreError::backend)?;

        debug!(room = %room.id, "Created room");
        Ok(room)
    }
}

fn parse_id<T>(value: &str) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value.parse().map_err(StoreError::backend)
}

fn message_from_row(row: MessageRow) -> Result<Message, StoreError> {
    let (id, room_id, sender_id, content, sent_at) = row;
    Ok(Message {
        id: parse_id::<MessageId>(&id)?,
        room_id: parse_id(&room_id)?,
        sender_id: parse_id(&sender_id)?,
        content,
        sent_at: sent_at as u64,
    })
}

#[async_trait]
impl RoomDirectory for SqliteStore {
    async fn room_exists(&self, room_id: RoomId) -> Result<bool, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM rooms WHERE id=?")
            .bind(room_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl UserDirectory for SqliteStore {
    async fn get_user(&self, user_id: UserId) -> Result<Option<UserProfile>, StoreError> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT user_name,display_name FROM users WHERE id=?")
                .bind(user_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(StoreError::backend)?;

        Ok(row.map(|(user_name, display_name)| UserProfile {
            id: user_id,
            user_name,
            display_name,
        }))
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn persist(&self, message: NewMessage) -> Result<Message, StoreError> {
        let id = MessageId::generate();

        // Never assign a timestamp older than the room's newest message.
        let (sent_at,): (i64,) = sqlx::query_as(
            "INSERT INTO messages (id,room_id,sender_id,content,sent_at)
             VALUES (?,?,?,?,MAX(?,COALESCE((SELECT MAX(sent_at) FROM messages WHERE room_id=?),0)))
             RETURNING sent_at",
        )
        .bind(id.to_string())
        .bind(message.room_id.to_string())
        .bind(message.sender_id.to_string())
        .bind(&message.content)
        .bind(now_millis() as i64)
        .bind(message.room_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        Ok(message.into_persisted(id, sent_at as u64))
    }

    async fn fetch_history(
        &self,
        room_id: RoomId,
        skip: usize,
        take: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id,room_id,sender_id,content,sent_at FROM messages
             WHERE room_id=? ORDER BY sent_at DESC, seq DESC LIMIT ? OFFSET ?",
        )
        .bind(room_id.to_string())
        .bind(take as i64)
        .bind(skip as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        let mut messages = rows
            .into_iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteStore {
        SqliteStore::connect(&DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_users() {
        let store = store().await;
        let alice = store.create_user("alice", "Alice").await.unwrap();

        let found = store.get_user(alice.id).await.unwrap().unwrap();
        assert_eq!(found, alice);
        assert!(store.get_user(UserId::generate()).await.unwrap().is_none());

        assert!(matches!(
            store.create_user("alice", "Other").await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_rooms() {
        let store = store().await;
        let a = store.create_user("a", "A").await.unwrap();
        let b = store.create_user("b", "B").await.unwrap();

        let room = store
            .create_room(NewRoom {
                name: "dm".into(),
                is_private: true,
                participant_ids: vec![a.id, b.id],
                direct: true,
            })
            .await
            .unwrap();

        assert!(room.direct_pair.is_some());
        assert!(store.room_exists(room.id).await.unwrap());
        assert!(!store.room_exists(RoomId::generate()).await.unwrap());

        assert!(matches!(
            store.create_room(NewRoom::default()).await,
            Err(StoreError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_history_order_and_paging() {
        let store = store().await;
        let user = store.create_user("u", "U").await.unwrap();
        let room = store
            .create_room(NewRoom {
                name: "r".into(),
                ..NewRoom::default()
            })
            .await
            .unwrap();

        let mut sent = Vec::new();
        for i in 0..5 {
            let message = store
                .persist(NewMessage::new(room.id, user.id, format!("m{i}")))
                .await
                .unwrap();
            sent.push(message);
        }
        assert!(sent.windows(2).all(|w| w[0].sent_at <= w[1].sent_at));

        let all = store.fetch_history(room.id, 0, 50).await.unwrap();
        assert_eq!(all, sent);

        let page: Vec<_> = store
            .fetch_history(room.id, 1, 2)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(page, vec!["m2", "m3"]);

        assert!(store
            .fetch_history(RoomId::generate(), 0, 50)
            .await
            .unwrap()
            .is_empty());
    }
}
