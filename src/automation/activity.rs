//! Bounded, append-only log of automation outcomes.

use std::collections::VecDeque;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{AutomationError, RemoteApiError, StoreError};
use crate::store::write_json_atomic;

/// Records kept before the oldest are evicted.
pub const ACTIVITY_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    PostCreated,
    PostFailed,
    ReviewReplied,
    ReviewReplyFailed,
    ReviewCheckFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub id: Uuid,
    pub location_id: String,
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}

/// In-memory ring of activity records, mirrored to a JSON file when a path is set.
pub struct ActivityLog {
    path: Option<PathBuf>,
    capacity: usize,
    records: Mutex<VecDeque<ActivityRecord>>,
}

impl ActivityLog {
    pub fn in_memory() -> Self {
        Self::with_capacity(None, ACTIVITY_CAPACITY)
    }

    fn with_capacity(path: Option<PathBuf>, capacity: usize) -> Self {
        Self {
            path,
            capacity,
            records: Mutex::new(VecDeque::new()),
        }
    }

    /// Load an existing log file, or start empty if it does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let mut records: VecDeque<ActivityRecord> = match tokio::fs::read_to_string(&path).await {
            Ok(raw) if raw.trim().is_empty() => VecDeque::new(),
            Ok(raw) => serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
                path: path.display().to_string(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => VecDeque::new(),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.display().to_string(),
                    source,
                });
            }
        };

        while records.len() > ACTIVITY_CAPACITY {
            records.pop_front();
        }

        let log = Self::with_capacity(Some(path), ACTIVITY_CAPACITY);
        *log.records.lock().await = records;
        Ok(log)
    }

    /// Append a record, evicting the oldest beyond capacity.
    ///
    /// A failed file write is logged and does not fail the caller.
    pub async fn record(
        &self,
        location_id: &str,
        activity_type: ActivityType,
        details: Value,
    ) -> ActivityRecord {
        let record = ActivityRecord {
            id: Uuid::new_v4(),
            location_id: location_id.to_string(),
            activity_type,
            details,
            timestamp: Utc::now(),
        };

        let mut records = self.records.lock().await;
        records.push_back(record.clone());
        while records.len() > self.capacity {
            records.pop_front();
        }

        if let Some(path) = &self.path
            && let Err(e) = write_json_atomic(path, &*records).await
        {
            tracing::warn!(error = %e, "Failed to persist activity log");
        }

        tracing::debug!(location_id, activity = ?activity_type, "Recorded activity");
        record
    }

    /// All records, oldest first.
    pub async fn read_all(&self) -> Vec<ActivityRecord> {
        self.records.lock().await.iter().cloned().collect()
    }

    /// The newest `limit` records, oldest first.
    pub async fn recent(&self, limit: usize) -> Vec<ActivityRecord> {
        let records = self.records.lock().await;
        let skip = records.len().saturating_sub(limit);
        records.iter().skip(skip).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

/// Diagnostic fields for a failed run: reason, message and, when the remote
/// API answered, its status and body. Never includes tokens.
pub fn failure_details(err: &AutomationError) -> Map<String, Value> {
    let mut details = Map::new();
    details.insert("reason".into(), json!(err.reason()));
    details.insert("error".into(), json!(err.to_string()));

    match err {
        AutomationError::AuthenticationRequired {
            user_id,
            fallback_attempted,
        } => {
            details.insert("userId".into(), json!(user_id));
            details.insert("fallbackAttempted".into(), json!(fallback_attempted));
            details.insert("requiresAuth".into(), json!(true));
        }
        AutomationError::RemoteApi(RemoteApiError::Status { status, body }) => {
            details.insert("status".into(), json!(status));
            details.insert("body".into(), json!(body));
        }
        _ => {}
    }
    details
}
