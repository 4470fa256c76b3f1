use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub thread_id: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>, thread_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            created_at: Utc::now(),
            thread_id,
        }
    }

    pub fn user(content: impl Into<String>, thread_id: Option<String>) -> Self {
        Self::new(Role::User, content, thread_id)
    }

    pub fn assistant(content: impl Into<String>, thread_id: Option<String>) -> Self {
        Self::new(Role::Assistant, content, thread_id)
    }
}

/// A server-tracked conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub thread_id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
}

impl Thread {
    pub fn activity(&self) -> DateTime<Utc> {
        self.last_message_at.unwrap_or(self.created_at)
    }

    /// Messages in `created_at` order.
    pub fn ordered_messages(&self) -> Vec<Message> {
        let mut messages = self.messages.clone();
        messages.sort_by_key(|m| m.created_at);
        messages
    }
}

/// Picks the single most recently active thread. Threads are never merged.
pub fn most_recent_thread(threads: &[Thread]) -> Option<&Thread> {
    threads.iter().max_by_key(|t| t.activity())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn thread(id: &str, created: DateTime<Utc>, last: Option<DateTime<Utc>>) -> Thread {
        Thread {
            thread_id: id.to_string(),
            messages: Vec::new(),
            created_at: created,
            last_message_at: last,
        }
    }

    #[test]
    fn resumes_the_thread_with_latest_activity() {
        let t1 = Utc::now() - Duration::minutes(10);
        let t2 = Utc::now();
        let threads = vec![thread("A", t1, Some(t1)), thread("B", t1, Some(t2))];
        assert_eq!(most_recent_thread(&threads).map(|t| t.thread_id.as_str()), Some("B"));
    }

    #[test]
    fn falls_back_to_created_at() {
        let old = Utc::now() - Duration::hours(2);
        let newer = Utc::now() - Duration::hours(1);
        let threads = vec![thread("A", old, None), thread("B", newer, None)];
        assert_eq!(most_recent_thread(&threads).map(|t| t.thread_id.as_str()), Some("B"));
    }

    #[test]
    fn deserializes_backend_thread_shape() {
        let raw = serde_json::json!({
            "threadId": "t1",
            "createdAt": "2024-05-01T10:00:00Z",
            "messages": [
                {"id": "m2", "role": "assistant", "content": "Hi", "createdAt": "2024-05-01T10:00:05Z"},
                {"id": "m1", "role": "user", "content": "Hello", "createdAt": "2024-05-01T10:00:01Z"}
            ]
        });
        let thread: Thread = serde_json::from_value(raw).unwrap();
        let ordered = thread.ordered_messages();
        assert_eq!(ordered[0].content, "Hello");
        assert_eq!(thread.activity(), thread.created_at);
    }
}
