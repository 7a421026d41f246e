// src/notify.rs

use async_trait::async_trait;

use crate::models::attempt::ExamResult;

pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Fire-and-forget notification sink. Delivery failures are logged and
/// retried best-effort; they never block or roll back a grading transition.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, candidate_id: i64, message: &str) -> Result<(), SinkError>;
}

/// Receives the outcome of every terminal transition so the surrounding
/// training-progress bookkeeping can update attempt counters and cooldown
/// timestamps outside this engine's own records.
#[async_trait]
pub trait TrainingProgressSink: Send + Sync {
    async fn record_result(&self, result: ExamResult) -> Result<(), SinkError>;
}

/// Sink that only logs. Default wiring for embeddings that handle
/// messaging elsewhere.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify(&self, candidate_id: i64, message: &str) -> Result<(), SinkError> {
        tracing::info!("Notify candidate {}: {}", candidate_id, message);
        Ok(())
    }
}

#[async_trait]
impl TrainingProgressSink for LogSink {
    async fn record_result(&self, result: ExamResult) -> Result<(), SinkError> {
        tracing::info!(
            "Exam {} result for candidate {}: score {:.2}, passed {}",
            result.exam_id,
            result.candidate_id,
            result.score,
            result.passed
        );
        Ok(())
    }
}
