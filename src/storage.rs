//! Client-side storage, mirroring the browser's `localStorage` and
//! `sessionStorage`. Storage is best-effort: implementations log their own
//! failures and never surface them to the widget.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

pub const USER_CREDENTIALS_KEY: &str = "voiceroUserCredentials";
pub const USER_DATA_KEY: &str = "voiceroUserData";
pub const PENDING_ACTION_KEY: &str = "pendingAction";
pub const REACTIVATE_VOICE_KEY: &str = "voicero_reactivate_voice";
pub const AUTO_MIC_KEY: &str = "voicero_auto_mic";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageScope {
    /// Survives navigations and restarts
    Local,
    /// Survives navigations within one tab
    Session,
}

impl StorageScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageScope::Local => "local",
            StorageScope::Session => "session",
        }
    }
}

#[async_trait]
pub trait ClientStorage: Send + Sync {
    async fn get(&self, scope: StorageScope, key: &str) -> Option<String>;
    async fn set(&self, scope: StorageScope, key: &str, value: &str);
    async fn remove(&self, scope: StorageScope, key: &str);
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<(StorageScope, String), String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClientStorage for MemoryStorage {
    async fn get(&self, scope: StorageScope, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(&(scope, key.to_string())).cloned()
    }

    async fn set(&self, scope: StorageScope, key: &str, value: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert((scope, key.to_string()), value.to_string());
    }

    async fn remove(&self, scope: StorageScope, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(&(scope, key.to_string()));
    }
}
