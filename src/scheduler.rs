// src/scheduler.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Callback fired when an attempt's deadline passes.
#[async_trait]
pub trait ExpiryHandler: Send + Sync {
    /// Must re-read the attempt and no-op unless it is still in progress.
    async fn expire(&self, attempt_id: Uuid);
}

/// Registers one deferred task per active attempt, firing at the persisted
/// deadline.
///
/// Timers live in process memory only; restart resilience comes from the
/// boot sweep in `AttemptEngine::recover`, which finalizes overdue attempts
/// and re-registers every pending deadline from the store.
#[derive(Default)]
pub struct ExpiryScheduler {
    tasks: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl ExpiryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules (or reschedules) the timeout task for an attempt. The fire
    /// time is always derived from the persisted `ends_at`, never recomputed
    /// from elapsed time, so a resume cannot introduce drift.
    pub async fn schedule(
        &self,
        attempt_id: Uuid,
        ends_at: DateTime<Utc>,
        handler: Weak<dyn ExpiryHandler>,
    ) {
        let delay = (ends_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tracing::debug!(
            "Scheduling expiry for attempt {} in {}s",
            attempt_id,
            delay.as_secs()
        );

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(handler) = handler.upgrade() {
                handler.expire(attempt_id).await;
            }
        });

        let mut tasks = self.tasks.lock().await;
        if let Some(previous) = tasks.insert(attempt_id, handle) {
            previous.abort();
        }
    }

    /// Drops the deferred task once the attempt reached a terminal state.
    /// Safe to call for attempts that were never scheduled.
    pub async fn cancel(&self, attempt_id: Uuid) {
        if let Some(handle) = self.tasks.lock().await.remove(&attempt_id) {
            handle.abort();
        }
    }

    /// Removes a task entry without aborting it. The expiry path calls
    /// this for its own handle once it has fired; aborting here would
    /// cancel the very task doing the finalization.
    pub async fn forget(&self, attempt_id: Uuid) {
        self.tasks.lock().await.remove(&attempt_id);
    }
}
