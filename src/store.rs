use crate::{
    chat::{Message, Role, Thread},
    storage::{ClientStorage, StorageScope},
    widget::ui::Interface,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{sqlite::SqliteConnectOptions, ConnectOptions, Row, SqlitePool};
use std::{collections::BTreeMap, path::Path, str::FromStr};
use tracing::warn;

/// SQLite-backed client storage and transcript cache.
#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Create a new Store instance.
    /// This will automatically create the database file if it doesn't exist.
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let db_url = format!("sqlite://{}", db_path.to_string_lossy());

        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .log_statements(tracing::log::LevelFilter::Trace);

        let pool = SqlitePool::connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        Ok(Self { pool })
    }

    /// Initialize the database schema.
    /// Session-scoped entries are dropped: a fresh process is a fresh tab.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS client_storage (
                scope TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (scope, key)
            );

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                thread_id TEXT,
                interface TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at DATETIME NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_thread_created ON messages(thread_id, created_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize database schema")?;

        sqlx::query("DELETE FROM client_storage WHERE scope = ?")
            .bind(StorageScope::Session.as_str())
            .execute(&self.pool)
            .await
            .context("Failed to clear session storage")?;

        Ok(())
    }

    /// Save a transcript message. Messages without a thread id are kept
    /// locally but never resumed.
    pub async fn save_message(&self, interface: Interface, msg: &Message) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO messages (id, thread_id, interface, role, content, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&msg.id)
        .bind(&msg.thread_id)
        .bind(interface.as_str())
        .bind(msg.role.as_str())
        .bind(&msg.content)
        .bind(msg.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to save message")?;

        Ok(())
    }

    /// Rebuild threads from cached messages, oldest message first in each.
    pub async fn load_threads(&self) -> Result<Vec<Thread>> {
        let rows = sqlx::query(
            r#"
            SELECT id, thread_id, role, content, created_at
            FROM messages
            WHERE thread_id IS NOT NULL
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch cached messages")?;

        let mut threads: BTreeMap<String, Thread> = BTreeMap::new();
        for row in rows {
            let thread_id: String = row.try_get("thread_id")?;
            let role: String = row.try_get("role")?;
            let role = if role == "user" { Role::User } else { Role::Assistant };
            let message = Message {
                id: row.try_get("id")?,
                role,
                content: row.try_get("content")?,
                created_at: row.try_get("created_at")?,
                thread_id: Some(thread_id.clone()),
            };

            let thread = threads.entry(thread_id.clone()).or_insert_with(|| Thread {
                thread_id,
                messages: Vec::new(),
                created_at: message.created_at,
                last_message_at: None,
            });
            thread.last_message_at = Some(message.created_at);
            thread.messages.push(message);
        }

        Ok(threads.into_values().collect())
    }

    async fn try_get(&self, scope: StorageScope, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM client_storage WHERE scope = ? AND key = ?")
            .bind(scope.as_str())
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to read client storage")?;
        Ok(match row {
            Some(row) => Some(row.try_get("value")?),
            None => None,
        })
    }

    async fn try_set(&self, scope: StorageScope, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO client_storage (scope, key, value, updated_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(scope, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(scope.as_str())
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .context("Failed to write client storage")?;
        Ok(())
    }

    async fn try_remove(&self, scope: StorageScope, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM client_storage WHERE scope = ? AND key = ?")
            .bind(scope.as_str())
            .bind(key)
            .execute(&self.pool)
            .await
            .context("Failed to delete from client storage")?;
        Ok(())
    }
}

#[async_trait]
impl ClientStorage for Store {
    async fn get(&self, scope: StorageScope, key: &str) -> Option<String> {
        match self.try_get(scope, key).await {
            Ok(value) => value,
            Err(e) => {
                warn!("storage read {}:{} failed: {:#}", scope.as_str(), key, e);
                None
            }
        }
    }

    async fn set(&self, scope: StorageScope, key: &str, value: &str) {
        if let Err(e) = self.try_set(scope, key, value).await {
            warn!("storage write {}:{} failed: {:#}", scope.as_str(), key, e);
        }
    }

    async fn remove(&self, scope: StorageScope, key: &str) {
        if let Err(e) = self.try_remove(scope, key).await {
            warn!("storage delete {}:{} failed: {:#}", scope.as_str(), key, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{PENDING_ACTION_KEY, REACTIVATE_VOICE_KEY};

    async fn temp_store() -> Store {
        let path = std::env::temp_dir()
            .join("voicero-store-tests")
            .join(format!("{}.db", uuid::Uuid::new_v4()));
        let store = Store::new(&path).await.unwrap();
        store.init().await.unwrap();
        store
    }

    #[tokio::test]
    async fn session_scope_is_cleared_on_init() {
        let store = temp_store().await;
        store.set(StorageScope::Session, PENDING_ACTION_KEY, "logout").await;
        store.set(StorageScope::Local, REACTIVATE_VOICE_KEY, "true").await;

        store.init().await.unwrap();

        assert!(store.get(StorageScope::Session, PENDING_ACTION_KEY).await.is_none());
        assert_eq!(
            store.get(StorageScope::Local, REACTIVATE_VOICE_KEY).await.as_deref(),
            Some("true")
        );
    }

    #[tokio::test]
    async fn set_overwrites_and_remove_deletes() {
        let store = temp_store().await;
        store.set(StorageScope::Local, "k", "1").await;
        store.set(StorageScope::Local, "k", "2").await;
        assert_eq!(store.get(StorageScope::Local, "k").await.as_deref(), Some("2"));
        store.remove(StorageScope::Local, "k").await;
        assert!(store.get(StorageScope::Local, "k").await.is_none());
    }

    #[tokio::test]
    async fn cached_messages_group_into_threads() {
        let store = temp_store().await;
        let mut first = Message::user("hello", Some("t1".into()));
        first.created_at = first.created_at - chrono::Duration::seconds(5);
        let reply = Message::assistant("hi there", Some("t1".into()));
        let other = Message::user("second", Some("t2".into()));
        let loose = Message::user("no thread", None);
        for msg in [&first, &reply, &other, &loose] {
            store.save_message(Interface::Text, msg).await.unwrap();
        }

        let threads = store.load_threads().await.unwrap();
        assert_eq!(threads.len(), 2);
        let t1 = threads.iter().find(|t| t.thread_id == "t1").unwrap();
        assert_eq!(t1.messages.len(), 2);
        assert_eq!(t1.messages[0].content, "hello");
        assert_eq!(t1.messages[1].role, Role::Assistant);
        assert!(t1.last_message_at.unwrap() > first.created_at);
    }
}
