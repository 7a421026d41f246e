// src/store.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::attempt::{Attempt, AttemptStatus, ResponseEntry};

/// Whether a conditional attempt creation applied, or found the pair
/// already occupied.
#[derive(Debug)]
pub enum CreateOutcome {
    /// The attempt was persisted.
    Created,

    /// A non-terminal attempt for the (exam, candidate) pair already
    /// exists; it is returned so the caller can resume or deny instead of
    /// breaking single-attempt exclusivity.
    ActiveExists(Attempt),
}

/// Whether a conditional terminal transition applied, or lost the race.
#[derive(Debug)]
pub enum FinalizeOutcome {
    /// This caller performed the transition.
    Applied(Attempt),

    /// Another path already finalized the attempt; its record is returned
    /// so the loser can report the persisted result without re-grading.
    AlreadyTerminal(Attempt),
}

/// Fields written atomically with the terminal status transition.
#[derive(Debug, Clone)]
pub struct Finalization {
    /// `Completed` or `TimedOut`.
    pub status: AttemptStatus,
    pub ended_at: DateTime<Utc>,
    pub score: f64,
    pub passed: bool,

    /// Full response map with per-question correctness filled in.
    pub graded: HashMap<i64, ResponseEntry>,
}

/// Durable store for attempt records.
///
/// Every mutation is a single conditional update keyed on the current
/// status, so concurrent save / submit / timeout paths cannot lose writes.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Persists a new attempt only if no non-terminal attempt exists for
    /// its (exam, candidate) pair. Check and insert are one atomic
    /// operation, so two concurrent creations cannot both apply; the
    /// loser receives the existing record.
    async fn create_if_no_active(&self, attempt: Attempt) -> Result<CreateOutcome, EngineError>;

    async fn get(&self, attempt_id: Uuid) -> Result<Option<Attempt>, EngineError>;

    /// The non-terminal attempt for the pair, if any. The engine maintains
    /// at most one.
    async fn find_active(
        &self,
        exam_id: i64,
        candidate_id: i64,
    ) -> Result<Option<Attempt>, EngineError>;

    /// Every attempt ever recorded for the pair, ordered by attempt number.
    async fn history(&self, exam_id: i64, candidate_id: i64) -> Result<Vec<Attempt>, EngineError>;

    /// All in-progress attempts, for the boot sweep.
    async fn list_in_progress(&self) -> Result<Vec<Attempt>, EngineError>;

    /// Merges response entries, last write wins per question. Fails with a
    /// conflict once the attempt is no longer in progress.
    async fn merge_responses(
        &self,
        attempt_id: Uuid,
        entries: HashMap<i64, ResponseEntry>,
    ) -> Result<Attempt, EngineError>;

    /// Flips a `NotStarted` (assigned) attempt to `InProgress`, fixing its
    /// time window.
    async fn activate(
        &self,
        attempt_id: Uuid,
        started_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Result<Attempt, EngineError>;

    /// The exactly-once terminal transition: applies only if the attempt is
    /// currently `InProgress`; otherwise reports the persisted record.
    async fn finalize_if_in_progress(
        &self,
        attempt_id: Uuid,
        finalization: Finalization,
    ) -> Result<FinalizeOutcome, EngineError>;
}

/// Reference store backed by a mutex-guarded map.
///
/// Serves as the test harness backend and documents the conditional-update
/// contract a durable implementation has to honor.
#[derive(Default)]
pub struct MemoryStore {
    attempts: Mutex<HashMap<Uuid, Attempt>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttemptStore for MemoryStore {
    async fn create_if_no_active(&self, attempt: Attempt) -> Result<CreateOutcome, EngineError> {
        let mut attempts = self.attempts.lock().await;

        if let Some(active) = attempts.values().find(|a| {
            a.exam_id == attempt.exam_id
                && a.candidate_id == attempt.candidate_id
                && !a.status.is_terminal()
        }) {
            return Ok(CreateOutcome::ActiveExists(active.clone()));
        }
        if attempts.contains_key(&attempt.id) {
            return Err(EngineError::Conflict(format!(
                "Attempt {} already exists",
                attempt.id
            )));
        }

        attempts.insert(attempt.id, attempt);
        Ok(CreateOutcome::Created)
    }

    async fn get(&self, attempt_id: Uuid) -> Result<Option<Attempt>, EngineError> {
        Ok(self.attempts.lock().await.get(&attempt_id).cloned())
    }

    async fn find_active(
        &self,
        exam_id: i64,
        candidate_id: i64,
    ) -> Result<Option<Attempt>, EngineError> {
        Ok(self
            .attempts
            .lock()
            .await
            .values()
            .find(|a| {
                a.exam_id == exam_id
                    && a.candidate_id == candidate_id
                    && !a.status.is_terminal()
            })
            .cloned())
    }

    async fn history(&self, exam_id: i64, candidate_id: i64) -> Result<Vec<Attempt>, EngineError> {
        let mut history: Vec<Attempt> = self
            .attempts
            .lock()
            .await
            .values()
            .filter(|a| a.exam_id == exam_id && a.candidate_id == candidate_id)
            .cloned()
            .collect();
        history.sort_by_key(|a| a.attempt_number);
        Ok(history)
    }

    async fn list_in_progress(&self) -> Result<Vec<Attempt>, EngineError> {
        Ok(self
            .attempts
            .lock()
            .await
            .values()
            .filter(|a| a.status == AttemptStatus::InProgress)
            .cloned()
            .collect())
    }

    async fn merge_responses(
        &self,
        attempt_id: Uuid,
        entries: HashMap<i64, ResponseEntry>,
    ) -> Result<Attempt, EngineError> {
        let mut attempts = self.attempts.lock().await;
        let attempt = attempts
            .get_mut(&attempt_id)
            .ok_or_else(|| EngineError::NotFound(format!("Attempt {} not found", attempt_id)))?;

        if attempt.status != AttemptStatus::InProgress {
            return Err(EngineError::Conflict(format!(
                "Attempt {} is not in progress",
                attempt_id
            )));
        }

        attempt.responses.extend(entries);
        Ok(attempt.clone())
    }

    async fn activate(
        &self,
        attempt_id: Uuid,
        started_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Result<Attempt, EngineError> {
        let mut attempts = self.attempts.lock().await;
        let attempt = attempts
            .get_mut(&attempt_id)
            .ok_or_else(|| EngineError::NotFound(format!("Attempt {} not found", attempt_id)))?;

        if attempt.status != AttemptStatus::NotStarted {
            return Err(EngineError::Conflict(format!(
                "Attempt {} has already been started",
                attempt_id
            )));
        }

        attempt.status = AttemptStatus::InProgress;
        attempt.started_at = Some(started_at);
        attempt.ends_at = Some(ends_at);
        Ok(attempt.clone())
    }

    async fn finalize_if_in_progress(
        &self,
        attempt_id: Uuid,
        finalization: Finalization,
    ) -> Result<FinalizeOutcome, EngineError> {
        let mut attempts = self.attempts.lock().await;
        let attempt = attempts
            .get_mut(&attempt_id)
            .ok_or_else(|| EngineError::NotFound(format!("Attempt {} not found", attempt_id)))?;

        match attempt.status {
            AttemptStatus::Completed | AttemptStatus::TimedOut => {
                Ok(FinalizeOutcome::AlreadyTerminal(attempt.clone()))
            }
            AttemptStatus::NotStarted => Err(EngineError::Conflict(format!(
                "Attempt {} was never started",
                attempt_id
            ))),
            AttemptStatus::InProgress => {
                attempt.status = finalization.status;
                attempt.ends_at = Some(finalization.ended_at);
                attempt.score = Some(finalization.score);
                attempt.passed = Some(finalization.passed);
                attempt.responses = finalization.graded;
                Ok(FinalizeOutcome::Applied(attempt.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn in_progress_attempt() -> Attempt {
        let now = Utc::now();
        Attempt {
            id: Uuid::new_v4(),
            exam_id: 1,
            candidate_id: 100,
            attempt_number: 1,
            question_order: vec![],
            responses: HashMap::new(),
            status: AttemptStatus::InProgress,
            started_at: Some(now),
            ends_at: Some(now + chrono::Duration::minutes(30)),
            score: None,
            passed: None,
        }
    }

    fn finalization(status: AttemptStatus, score: f64) -> Finalization {
        Finalization {
            status,
            ended_at: Utc::now(),
            score,
            passed: score >= 80.0,
            graded: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn creation_does_not_apply_while_the_pair_has_an_active_attempt() {
        let store = MemoryStore::new();
        let first = in_progress_attempt();
        let first_id = first.id;
        assert!(matches!(
            store.create_if_no_active(first).await.unwrap(),
            CreateOutcome::Created
        ));

        let mut rival = in_progress_attempt();
        rival.attempt_number = 2;
        match store.create_if_no_active(rival).await.unwrap() {
            CreateOutcome::ActiveExists(existing) => assert_eq!(existing.id, first_id),
            CreateOutcome::Created => panic!("second creation must not apply"),
        }

        // Once the active attempt is terminal, creation applies again
        store
            .finalize_if_in_progress(first_id, finalization(AttemptStatus::Completed, 90.0))
            .await
            .unwrap();
        let mut next = in_progress_attempt();
        next.attempt_number = 2;
        assert!(matches!(
            store.create_if_no_active(next).await.unwrap(),
            CreateOutcome::Created
        ));
    }

    #[tokio::test]
    async fn second_finalize_loses_the_race() {
        let store = MemoryStore::new();
        let attempt = in_progress_attempt();
        let id = attempt.id;
        store.create_if_no_active(attempt).await.unwrap();

        let first = store
            .finalize_if_in_progress(id, finalization(AttemptStatus::Completed, 90.0))
            .await
            .unwrap();
        assert!(matches!(first, FinalizeOutcome::Applied(_)));

        let second = store
            .finalize_if_in_progress(id, finalization(AttemptStatus::TimedOut, 10.0))
            .await
            .unwrap();
        match second {
            FinalizeOutcome::AlreadyTerminal(persisted) => {
                assert_eq!(persisted.status, AttemptStatus::Completed);
                assert_eq!(persisted.score, Some(90.0));
            }
            FinalizeOutcome::Applied(_) => panic!("second transition must not apply"),
        }
    }

    #[tokio::test]
    async fn merge_is_rejected_after_finalize() {
        let store = MemoryStore::new();
        let attempt = in_progress_attempt();
        let id = attempt.id;
        store.create_if_no_active(attempt).await.unwrap();

        store
            .finalize_if_in_progress(id, finalization(AttemptStatus::TimedOut, 0.0))
            .await
            .unwrap();

        let entry = ResponseEntry {
            selected: BTreeSet::from([1]),
            correct: None,
            time_spent_secs: 5,
        };
        let result = store
            .merge_responses(id, HashMap::from([(1, entry)]))
            .await;
        assert!(matches!(result, Err(EngineError::Conflict(_))));
    }

    #[tokio::test]
    async fn merge_is_last_write_wins_per_question() {
        let store = MemoryStore::new();
        let attempt = in_progress_attempt();
        let id = attempt.id;
        store.create_if_no_active(attempt).await.unwrap();

        let first = ResponseEntry {
            selected: BTreeSet::from([1]),
            correct: None,
            time_spent_secs: 5,
        };
        let second = ResponseEntry {
            selected: BTreeSet::from([2]),
            correct: None,
            time_spent_secs: 9,
        };
        store
            .merge_responses(id, HashMap::from([(7, first)]))
            .await
            .unwrap();
        let merged = store
            .merge_responses(id, HashMap::from([(7, second)]))
            .await
            .unwrap();

        assert_eq!(merged.responses[&7].selected, BTreeSet::from([2]));
        assert_eq!(merged.responses[&7].time_spent_secs, 9);
    }
}
