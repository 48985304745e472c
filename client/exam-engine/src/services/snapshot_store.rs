use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::StoreError;
use crate::metrics::{track_store_operation, AUTOSAVE_WRITES_TOTAL};
use crate::models::{AttemptId, ExamId, PersistedSnapshot, SNAPSHOT_VERSION};
use crate::utils::storage_key::{active_attempt_key, is_engine_key, snapshot_key};

/// Raw key/value persistence underneath the snapshot store.
#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Process-local backend. TTLs are not enforced here; staleness is checked on read anyway.
#[derive(Default, Clone)]
pub struct MemoryBackend {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    pub fn insert_raw(&self, key: &str, value: String) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value);
    }
}

#[async_trait]
impl SnapshotBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.raw(key))
    }

    async fn set_with_ttl(&self, key: &str, value: String, _ttl: Duration) -> Result<(), StoreError> {
        self.insert_raw(key, value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}

/// Redis backend; `SETEX` lets the server drop snapshots after the staleness window.
#[derive(Clone)]
pub struct RedisBackend {
    redis: ConnectionManager,
}

impl RedisBackend {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    pub async fn connect(redis_uri: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_uri)?;

        let redis = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            ConnectionManager::new(client),
        )
        .await
        .map_err(|_| StoreError::Backend("Redis connection timeout after 10s".to_string()))??;

        let mut conn = redis.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        tracing::info!("Redis snapshot backend connected");

        Ok(Self::new(redis))
    }
}

#[async_trait]
impl SnapshotBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.redis.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        redis::cmd("SETEX")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .arg(value)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        redis::cmd("DEL").arg(key).query_async::<()>(&mut conn).await?;
        Ok(())
    }
}

/// What the store holds for an attempt, before staleness filtering is collapsed away.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotProbe {
    NoSnapshot,
    StaleSnapshot,
    ValidSnapshot(PersistedSnapshot),
}

/// Durable local store for exam snapshots.
///
/// Never fails toward the caller: write errors are logged and counted, read errors
/// read as "no snapshot". Losing one autosave is recoverable, a crashed exam is not.
#[derive(Clone)]
pub struct DurableStore {
    backend: Arc<dyn SnapshotBackend>,
    max_age: Duration,
}

impl DurableStore {
    pub fn new(backend: Arc<dyn SnapshotBackend>, max_age: Duration) -> Self {
        Self { backend, max_age }
    }

    pub fn in_memory(max_age: Duration) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), max_age)
    }

    /// Writes the snapshot and points the exam at this attempt. Returns whether the write landed.
    pub async fn save(&self, attempt_id: &AttemptId, snapshot: &PersistedSnapshot) -> bool {
        let value = match serde_json::to_string(snapshot) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(attempt_id = %attempt_id, "Failed to encode snapshot: {}", e);
                return false;
            }
        };

        let key = snapshot_key(attempt_id);
        let written = track_store_operation(
            "save",
            self.backend.set_with_ttl(&key, value, self.max_age),
        )
        .await;

        if let Err(e) = written {
            AUTOSAVE_WRITES_TOTAL
                .with_label_values(&["error"])
                .inc();
            tracing::warn!(
                attempt_id = %attempt_id,
                "Snapshot write failed, continuing in memory only: {}",
                e
            );
            return false;
        }

        let pointer = active_attempt_key(&snapshot.exam_id);
        if let Err(e) = self
            .backend
            .set_with_ttl(&pointer, attempt_id.to_string(), self.max_age)
            .await
        {
            tracing::warn!(
                exam_id = %snapshot.exam_id,
                "Failed to record active attempt pointer: {}",
                e
            );
        }

        AUTOSAVE_WRITES_TOTAL
            .with_label_values(&["ok"])
            .inc();
        tracing::debug!(
            attempt_id = %attempt_id,
            remaining_seconds = snapshot.remaining_seconds,
            answers = snapshot.answers.len(),
            "Snapshot saved"
        );
        true
    }

    pub async fn load(&self, attempt_id: &AttemptId) -> Option<PersistedSnapshot> {
        match self.probe(attempt_id).await {
            SnapshotProbe::ValidSnapshot(snapshot) => Some(snapshot),
            SnapshotProbe::NoSnapshot | SnapshotProbe::StaleSnapshot => None,
        }
    }

    /// Reads the snapshot and classifies it. Stale or undecodable snapshots are deleted.
    pub async fn probe(&self, attempt_id: &AttemptId) -> SnapshotProbe {
        let key = snapshot_key(attempt_id);
        let raw = match track_store_operation("load", self.backend.get(&key)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return SnapshotProbe::NoSnapshot,
            Err(e) => {
                tracing::warn!(attempt_id = %attempt_id, "Snapshot read failed: {}", e);
                return SnapshotProbe::NoSnapshot;
            }
        };

        let snapshot: PersistedSnapshot = match serde_json::from_str(&raw) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(attempt_id = %attempt_id, "Discarding undecodable snapshot: {}", e);
                self.delete_key(&key).await;
                return SnapshotProbe::NoSnapshot;
            }
        };

        if snapshot.version != SNAPSHOT_VERSION || &snapshot.attempt_id != attempt_id {
            tracing::warn!(
                attempt_id = %attempt_id,
                version = snapshot.version,
                "Discarding snapshot with unexpected version or owner"
            );
            self.delete_key(&key).await;
            return SnapshotProbe::NoSnapshot;
        }

        let max_age = ChronoDuration::from_std(self.max_age).unwrap_or_else(|_| ChronoDuration::days(36_500));
        if snapshot.is_stale(Utc::now(), max_age) {
            tracing::info!(
                attempt_id = %attempt_id,
                saved_at = %snapshot.saved_at,
                "Discarding stale snapshot"
            );
            self.clear(attempt_id, &snapshot.exam_id).await;
            return SnapshotProbe::StaleSnapshot;
        }

        SnapshotProbe::ValidSnapshot(snapshot)
    }

    /// Attempt most recently saved for this exam, if any.
    pub async fn active_attempt(&self, exam_id: &ExamId) -> Option<AttemptId> {
        match self.backend.get(&active_attempt_key(exam_id)).await {
            Ok(value) => value.map(AttemptId::new),
            Err(e) => {
                tracing::warn!(exam_id = %exam_id, "Active attempt lookup failed: {}", e);
                None
            }
        }
    }

    /// Removes the snapshot, and the exam pointer if it still names this attempt.
    pub async fn clear(&self, attempt_id: &AttemptId, exam_id: &ExamId) {
        self.delete_key(&snapshot_key(attempt_id)).await;

        if self.active_attempt(exam_id).await.as_ref() == Some(attempt_id) {
            self.delete_key(&active_attempt_key(exam_id)).await;
        }
        tracing::debug!(attempt_id = %attempt_id, "Snapshot cleared");
    }

    async fn delete_key(&self, key: &str) {
        if !is_engine_key(key) {
            tracing::error!(key, "Refusing to delete a key outside the engine namespace");
            return;
        }
        if let Err(e) = track_store_operation("clear", self.backend.delete(key)).await {
            tracing::warn!(key, "Snapshot delete failed: {}", e);
        }
    }
}
