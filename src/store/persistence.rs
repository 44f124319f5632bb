//! History persistence behind a key-scoped blob port.
//!
//! The store owns a single namespaced key holding the serialized history.
//! Backends only need get/set/delete of string blobs; the TTL, size cap,
//! and corruption handling all live here.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::Message;

/// The one key the widget persists under. Nothing outside the store may
/// write to it.
pub const HISTORY_KEY: &str = "folio.chat.history";

/// Persisted history older than this is discarded entirely on load.
pub const HISTORY_TTL_HOURS: i64 = 24;

/// Only the most recent messages are written back, to bound growth.
pub const MAX_PERSISTED_MESSAGES: usize = 50;

/// Key-scoped blob storage port.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// In-memory backend. Not persistent; used in tests and as a fallback when
/// no data directory is available.
#[derive(Default)]
pub struct MemoryStorage {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.data.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.data.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.data.lock().remove(key);
        Ok(())
    }
}

/// File-backed backend: one JSON file per key under a data directory.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are dotted namespaces, not paths; flatten anything unexpected.
        let name: String = key
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{name}.json"))
    }
}

#[async_trait]
impl StorageBackend for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.path_for(key), value).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// On-disk shape of the persisted history.
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedHistory {
    pub messages: Vec<Message>,
    pub saved_at: DateTime<Utc>,
}

impl PersistedHistory {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.saved_at > Duration::hours(HISTORY_TTL_HOURS)
    }
}

/// Load previously persisted messages.
///
/// Storage failures are swallowed; corrupt or expired blobs are deleted
/// rather than left in place. Returns `None` unless a valid, non-expired,
/// non-empty history was found.
pub async fn load_history(storage: &dyn StorageBackend, key: &str) -> Option<Vec<Message>> {
    let blob = match storage.get(key).await {
        Ok(Some(blob)) => blob,
        Ok(None) => return None,
        Err(e) => {
            debug!("history load failed: {e}");
            return None;
        }
    };

    let parsed: PersistedHistory = match serde_json::from_str(&blob) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("discarding corrupt persisted history: {e}");
            let _ = storage.delete(key).await;
            return None;
        }
    };

    if parsed.is_expired(Utc::now()) {
        debug!("discarding persisted history past its TTL");
        let _ = storage.delete(key).await;
        return None;
    }

    if parsed.messages.is_empty() {
        return None;
    }
    Some(parsed.messages)
}

/// Persist the given messages, keeping only the most recent
/// [`MAX_PERSISTED_MESSAGES`] with a fresh `saved_at`. Failures (quota,
/// unavailable backend) are swallowed.
pub async fn save_history(storage: &dyn StorageBackend, key: &str, messages: &[Message]) {
    let start = messages.len().saturating_sub(MAX_PERSISTED_MESSAGES);
    let snapshot = PersistedHistory {
        messages: messages[start..].to_vec(),
        saved_at: Utc::now(),
    };

    let blob = match serde_json::to_string(&snapshot) {
        Ok(blob) => blob,
        Err(e) => {
            warn!("history serialization failed: {e}");
            return;
        }
    };

    if let Err(e) = storage.set(key, &blob).await {
        debug!("history save failed: {e}");
    }
}
