//! Post tracking for analytics
//!
//! The dispatcher forwards every aggregate to a [`PostTracker`] after the
//! response is computed. Tracking is best-effort: failures are logged by the
//! caller and never change a dispatch result.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::types::AggregateResult;

/// What the tracker receives for one dispatch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackedPost {
    pub dispatch_id: String,
    pub content: String,
    pub media_count: usize,
    pub created_at: i64,
    pub result: AggregateResult,
}

impl TrackedPost {
    pub fn new(content: impl Into<String>, media_count: usize, result: AggregateResult) -> Self {
        Self {
            dispatch_id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            media_count,
            created_at: chrono::Utc::now().timestamp(),
            result,
        }
    }
}

#[async_trait]
pub trait PostTracker: Send + Sync {
    /// Record one dispatch
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be stored. Callers log and
    /// discard it.
    async fn record(&self, user_id: &str, post: &TrackedPost) -> Result<()>;
}

/// Tracker that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracker;

#[async_trait]
impl PostTracker for NoopTracker {
    async fn record(&self, _user_id: &str, _post: &TrackedPost) -> Result<()> {
        Ok(())
    }
}

/// Tracker that keeps records in memory, newest last
#[derive(Debug, Default)]
pub struct MemoryTracker {
    records: Mutex<Vec<(String, TrackedPost)>>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<(String, TrackedPost)> {
        self.records.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl PostTracker for MemoryTracker {
    async fn record(&self, user_id: &str, post: &TrackedPost) -> Result<()> {
        self.records
            .lock()
            .await
            .push((user_id.to_string(), post.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_tracker_keeps_order() {
        let tracker = MemoryTracker::new();
        let empty = AggregateResult::from_outcomes(vec![]);

        tracker
            .record("u1", &TrackedPost::new("first", 0, empty.clone()))
            .await
            .unwrap();
        tracker
            .record("u2", &TrackedPost::new("second", 2, empty))
            .await
            .unwrap();

        let records = tracker.records().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].0, "u1");
        assert_eq!(records[1].1.content, "second");
        assert_eq!(records[1].1.media_count, 2);
    }

    #[tokio::test]
    async fn test_tracked_post_ids_are_unique() {
        let empty = AggregateResult::from_outcomes(vec![]);
        let a = TrackedPost::new("x", 0, empty.clone());
        let b = TrackedPost::new("x", 0, empty);
        assert_ne!(a.dispatch_id, b.dispatch_id);
    }

    #[tokio::test]
    async fn test_noop_tracker_accepts_everything() {
        let post = TrackedPost::new("x", 0, AggregateResult::from_outcomes(vec![]));
        assert!(NoopTracker.record("u", &post).await.is_ok());
    }
}
