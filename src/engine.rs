// src/engine.rs

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use uuid::Uuid;
use validator::Validate;

use crate::catalog::QuestionCatalog;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::grader;
use crate::models::attempt::{
    Attempt, AttemptStatus, AttemptStatusReport, AttemptSummary, ExamResult, GradedResponse,
    ResponseEntry, ResponseInput, SaveResponsesRequest, StartOutcome, SubmitOutcome,
};
use crate::models::exam::{CandidateQuestion, Exam, Question};
use crate::notify::{NotificationSink, SinkError, TrainingProgressSink};
use crate::policy::{self, DenialReason, StartEligibility};
use crate::scheduler::{ExpiryHandler, ExpiryScheduler};
use crate::selector;
use crate::store::{AttemptStore, CreateOutcome, Finalization, FinalizeOutcome};

/// What a conditional attempt creation produced: a fresh record, or the
/// active attempt a concurrent creation persisted first.
enum Creation {
    Fresh(Attempt),
    Raced(Attempt),
}

/// The attempt engine: issues randomized question sets, enforces the time
/// box, merges mid-attempt saves, grades on submit or timeout, and applies
/// the cooldown/ceiling rules for retests.
///
/// Every terminal transition goes through the store's conditional update,
/// so a candidate submit racing the expiry task yields exactly one scored
/// outcome; the loser observes the persisted record.
pub struct AttemptEngine {
    config: EngineConfig,
    store: Arc<dyn AttemptStore>,
    catalog: Arc<dyn QuestionCatalog>,
    notifier: Arc<dyn NotificationSink>,
    progress: Arc<dyn TrainingProgressSink>,
    scheduler: ExpiryScheduler,
    rng: Mutex<StdRng>,
    handle: Weak<AttemptEngine>,
}

impl AttemptEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn AttemptStore>,
        catalog: Arc<dyn QuestionCatalog>,
        notifier: Arc<dyn NotificationSink>,
        progress: Arc<dyn TrainingProgressSink>,
    ) -> Arc<Self> {
        Self::with_rng(
            config,
            store,
            catalog,
            notifier,
            progress,
            StdRng::from_entropy(),
        )
    }

    /// Seeded constructor, for deterministic draws in tests.
    pub fn with_rng(
        config: EngineConfig,
        store: Arc<dyn AttemptStore>,
        catalog: Arc<dyn QuestionCatalog>,
        notifier: Arc<dyn NotificationSink>,
        progress: Arc<dyn TrainingProgressSink>,
        rng: StdRng,
    ) -> Arc<Self> {
        Arc::new_cyclic(|handle| Self {
            config,
            store,
            catalog,
            notifier,
            progress,
            scheduler: ExpiryScheduler::new(),
            rng: Mutex::new(rng),
            handle: handle.clone(),
        })
    }

    /// Starts a new attempt, or resumes the unexpired in-progress one.
    ///
    /// Resume is idempotent: the same attempt id and remaining time come
    /// back, with previously saved responses. An assigned (`NotStarted`)
    /// attempt is activated in place. A stale in-progress attempt whose
    /// deadline already passed is finalized first, then the usual
    /// eligibility rules decide whether a fresh attempt may begin.
    pub async fn start_attempt(
        &self,
        exam_id: i64,
        candidate_id: i64,
    ) -> Result<StartOutcome, EngineError> {
        let exam = self.catalog.exam(exam_id).await?;
        let now = Utc::now();

        if let Some(active) = self.store.find_active(exam_id, candidate_id).await? {
            match active.status {
                AttemptStatus::InProgress if !active.is_overdue(now) => {
                    tracing::debug!(
                        "Resuming attempt {} for candidate {}",
                        active.id,
                        candidate_id
                    );
                    let summary = self.summarize(&active, now).await?;
                    return Ok(StartOutcome::Resumed(summary));
                }
                AttemptStatus::InProgress => {
                    // Deadline passed with no expiry task alive
                    self.finalize_timeout(active.id).await?;
                }
                AttemptStatus::NotStarted => {
                    let ends_at = now + self.time_limit(&exam);
                    let attempt = self.store.activate(active.id, now, ends_at).await?;
                    self.schedule_expiry(&attempt).await;
                    tracing::info!(
                        "Candidate {} started assigned attempt {}",
                        candidate_id,
                        attempt.id
                    );
                    let summary = self.summarize(&attempt, now).await?;
                    return Ok(StartOutcome::Started(summary));
                }
                _ => {}
            }
        }

        let history = self.store.history(exam_id, candidate_id).await?;
        let eligibility = policy::can_start(&history, now, &self.config);
        if !eligibility.allowed {
            return Err(self.deny(eligibility, history.len() as u32));
        }

        let attempt = match self
            .create_attempt(&exam, candidate_id, &history, AttemptStatus::InProgress, Some(now))
            .await?
        {
            Creation::Fresh(attempt) => attempt,
            // A concurrent start won the insert; hand back its attempt
            Creation::Raced(existing)
                if existing.status == AttemptStatus::InProgress && !existing.is_overdue(now) =>
            {
                tracing::debug!(
                    "Concurrent start for candidate {} resumed attempt {}",
                    candidate_id,
                    existing.id
                );
                let summary = self.summarize(&existing, now).await?;
                return Ok(StartOutcome::Resumed(summary));
            }
            Creation::Raced(_) => {
                return Err(EngineError::Conflict(
                    "Candidate already has an open attempt".to_string(),
                ));
            }
        };
        self.schedule_expiry(&attempt).await;
        tracing::info!(
            "Created attempt {} (#{}) on exam {} for candidate {}",
            attempt.id,
            attempt.attempt_number,
            exam_id,
            candidate_id
        );
        let summary = self.summarize(&attempt, now).await?;
        Ok(StartOutcome::Started(summary))
    }

    /// Merges a batch of responses into an in-progress attempt,
    /// last write wins per question.
    pub async fn save_responses(
        &self,
        attempt_id: Uuid,
        candidate_id: i64,
        request: SaveResponsesRequest,
    ) -> Result<(), EngineError> {
        request
            .validate()
            .map_err(|e| EngineError::Validation(e.to_string()))?;

        let attempt = self.require_owned(attempt_id, candidate_id).await?;
        if attempt.status != AttemptStatus::InProgress {
            return Err(EngineError::Conflict(format!(
                "Attempt {} is not in progress",
                attempt_id
            )));
        }

        let entries = entries_for(&attempt, &request.responses)?;
        self.store.merge_responses(attempt_id, entries).await?;
        tracing::debug!(
            "Saved {} response(s) for attempt {}",
            request.responses.len(),
            attempt_id
        );
        Ok(())
    }

    /// Submits an attempt for grading.
    ///
    /// A submit that arrives after the attempt was already finalized (by
    /// the expiry task or an earlier submit) is not an error: the caller
    /// receives the persisted terminal outcome without re-grading.
    pub async fn submit_attempt(
        &self,
        attempt_id: Uuid,
        candidate_id: i64,
        responses: Vec<ResponseInput>,
    ) -> Result<SubmitOutcome, EngineError> {
        for input in &responses {
            input
                .validate()
                .map_err(|e| EngineError::Validation(e.to_string()))?;
        }

        let attempt = self.require_owned(attempt_id, candidate_id).await?;
        match attempt.status {
            AttemptStatus::NotStarted => {
                return Err(EngineError::Conflict(format!(
                    "Attempt {} was never started",
                    attempt_id
                )));
            }
            AttemptStatus::Completed | AttemptStatus::TimedOut => {
                tracing::debug!("Submit for already finalized attempt {}", attempt_id);
                return Ok(outcome_of(&attempt));
            }
            AttemptStatus::InProgress => {}
        }

        // Merge the final batch first so the grade reflects it. A timeout
        // firing in between surfaces as a conflict; the persisted terminal
        // result is returned in that case.
        let merged = if responses.is_empty() {
            attempt
        } else {
            let entries = entries_for(&attempt, &responses)?;
            match self.store.merge_responses(attempt_id, entries).await {
                Ok(merged) => merged,
                Err(EngineError::Conflict(_)) => {
                    let persisted = self.require_owned(attempt_id, candidate_id).await?;
                    return Ok(outcome_of(&persisted));
                }
                Err(e) => return Err(e),
            }
        };

        let exam = self.catalog.exam(merged.exam_id).await?;
        let bank = self.catalog.active_questions(merged.exam_id).await?;
        let result = grader::grade(&merged, &bank, exam.pass_threshold);

        let finalization = Finalization {
            status: AttemptStatus::Completed,
            ended_at: Utc::now(),
            score: result.score,
            passed: result.passed,
            graded: result.graded,
        };
        match self
            .store
            .finalize_if_in_progress(attempt_id, finalization)
            .await?
        {
            FinalizeOutcome::Applied(final_attempt) => {
                self.scheduler.cancel(attempt_id).await;
                tracing::info!(
                    "Attempt {} completed with score {:.2} (passed: {})",
                    attempt_id,
                    result.score,
                    result.passed
                );
                self.after_finalize(&final_attempt).await;
                Ok(outcome_of(&final_attempt))
            }
            FinalizeOutcome::AlreadyTerminal(persisted) => {
                tracing::warn!(
                    "Submit for attempt {} lost the race against the expiry task",
                    attempt_id
                );
                Ok(outcome_of(&persisted))
            }
        }
    }

    /// Status view for an (exam, candidate) pair: latest attempt, remaining
    /// time if one is running, and the cooldown end if a retest is blocked.
    pub async fn attempt_status(
        &self,
        exam_id: i64,
        candidate_id: i64,
    ) -> Result<AttemptStatusReport, EngineError> {
        self.catalog.exam(exam_id).await?;

        let history = self.store.history(exam_id, candidate_id).await?;
        let now = Utc::now();
        let latest = history.iter().max_by_key(|a| a.attempt_number);

        let eligibility = policy::can_start(&history, now, &self.config);
        let cooldown_ends_at = match eligibility.reason {
            Some(DenialReason::CooldownActive) => eligibility.next_eligible_at,
            _ => None,
        };

        Ok(AttemptStatusReport {
            status: latest.map(|a| a.status),
            attempt_id: latest.map(|a| a.id),
            time_remaining_secs: latest
                .filter(|a| a.status == AttemptStatus::InProgress)
                .map(|a| a.remaining_secs(now)),
            cooldown_ends_at,
        })
    }

    /// Instructor-driven creation path. Bypasses the candidate cooldown but
    /// enforces the ceiling, in-progress exclusivity, and the assignment
    /// guard window. The attempt stays `NotStarted` until the candidate's
    /// first start request activates it.
    pub async fn assign_attempt(
        &self,
        exam_id: i64,
        instructor_id: i64,
        candidate_id: i64,
    ) -> Result<Uuid, EngineError> {
        let exam = self.catalog.exam(exam_id).await?;
        let now = Utc::now();

        let history = self.store.history(exam_id, candidate_id).await?;
        let eligibility = policy::can_assign(&history, now, &self.config);
        if !eligibility.allowed {
            return Err(self.deny(eligibility, history.len() as u32));
        }

        let attempt = match self
            .create_attempt(&exam, candidate_id, &history, AttemptStatus::NotStarted, None)
            .await?
        {
            Creation::Fresh(attempt) => attempt,
            Creation::Raced(_) => {
                return Err(EngineError::Conflict(
                    "Candidate already has an open attempt".to_string(),
                ));
            }
        };
        tracing::info!(
            "Instructor {} assigned attempt {} on exam {} to candidate {}",
            instructor_id,
            attempt.id,
            exam_id,
            candidate_id
        );
        Ok(attempt.id)
    }

    /// Boot-time sweep: finalizes every persisted in-progress attempt whose
    /// deadline already passed, and re-registers a deferred task for the
    /// rest. Must run on process startup; an in-memory timer alone does not
    /// survive a restart.
    pub async fn recover(&self) -> Result<(), EngineError> {
        let pending = self.store.list_in_progress().await?;
        let now = Utc::now();
        let mut finalized = 0usize;
        let mut re_registered = 0usize;

        for attempt in pending {
            if attempt.is_overdue(now) {
                match self.finalize_timeout(attempt.id).await {
                    Ok(()) => finalized += 1,
                    Err(e) => tracing::error!(
                        "Sweep failed to finalize attempt {}: {}; will retry next cycle",
                        attempt.id,
                        e
                    ),
                }
            } else {
                self.schedule_expiry(&attempt).await;
                re_registered += 1;
            }
        }

        tracing::info!(
            "Expiry sweep finished: {} finalized, {} re-registered",
            finalized,
            re_registered
        );
        Ok(())
    }

    /// Timeout entry point, idempotent: an attempt that is no longer in
    /// progress is left alone.
    pub async fn expire_attempt(&self, attempt_id: Uuid) -> Result<(), EngineError> {
        self.finalize_timeout(attempt_id).await
    }

    async fn finalize_timeout(&self, attempt_id: Uuid) -> Result<(), EngineError> {
        let Some(attempt) = self.store.get(attempt_id).await? else {
            tracing::warn!("Expiry fired for unknown attempt {}", attempt_id);
            return Ok(());
        };
        if attempt.status != AttemptStatus::InProgress {
            tracing::debug!(
                "Expiry for attempt {} is a no-op (status {:?})",
                attempt_id,
                attempt.status
            );
            return Ok(());
        }

        let exam = self.catalog.exam(attempt.exam_id).await?;
        let bank = self.catalog.active_questions(attempt.exam_id).await?;
        let result = grader::grade(&attempt, &bank, exam.pass_threshold);

        // A timed-out attempt ends at its deadline, not at sweep time
        let ended_at = attempt.ends_at.unwrap_or_else(Utc::now);
        let finalization = Finalization {
            status: AttemptStatus::TimedOut,
            ended_at,
            score: result.score,
            passed: result.passed,
            graded: result.graded,
        };
        match self
            .store
            .finalize_if_in_progress(attempt_id, finalization)
            .await?
        {
            FinalizeOutcome::Applied(final_attempt) => {
                self.scheduler.forget(attempt_id).await;
                tracing::info!(
                    "Attempt {} timed out with score {:.2}",
                    attempt_id,
                    result.score
                );
                self.after_finalize(&final_attempt).await;
            }
            FinalizeOutcome::AlreadyTerminal(_) => {
                tracing::debug!("Timeout for attempt {} lost the race; no-op", attempt_id);
            }
        }
        Ok(())
    }

    async fn create_attempt(
        &self,
        exam: &Exam,
        candidate_id: i64,
        history: &[Attempt],
        status: AttemptStatus,
        started_at: Option<DateTime<Utc>>,
    ) -> Result<Creation, EngineError> {
        let bank = self.catalog.active_questions(exam.id).await?;
        if bank.is_empty() {
            return Err(EngineError::Conflict(format!(
                "Exam {} has no active questions",
                exam.id
            )));
        }

        let question_order = {
            let mut rng = self.rng.lock().await;
            selector::draw(exam, &bank, &mut *rng)
        };
        let attempt_number = history.iter().map(|a| a.attempt_number).max().unwrap_or(0) + 1;
        let ends_at = started_at.map(|t| t + self.time_limit(exam));

        let attempt = Attempt {
            id: Uuid::new_v4(),
            exam_id: exam.id,
            candidate_id,
            attempt_number,
            question_order,
            responses: HashMap::new(),
            status,
            started_at,
            ends_at,
            score: None,
            passed: None,
        };
        match self.store.create_if_no_active(attempt.clone()).await? {
            CreateOutcome::Created => Ok(Creation::Fresh(attempt)),
            CreateOutcome::ActiveExists(existing) => Ok(Creation::Raced(existing)),
        }
    }

    async fn summarize(
        &self,
        attempt: &Attempt,
        now: DateTime<Utc>,
    ) -> Result<AttemptSummary, EngineError> {
        let bank = self.catalog.active_questions(attempt.exam_id).await?;
        let by_id: HashMap<i64, &Question> = bank.iter().map(|q| (q.id, q)).collect();

        let questions = attempt
            .question_order
            .iter()
            .filter_map(|d| {
                by_id
                    .get(&d.question_id)
                    .map(|q| CandidateQuestion::from_drawn(q, &d.option_order))
            })
            .collect();
        let saved_responses = attempt
            .responses
            .iter()
            .map(|(id, entry)| (*id, entry.selected.clone()))
            .collect();

        Ok(AttemptSummary {
            attempt_id: attempt.id,
            attempt_number: attempt.attempt_number,
            questions,
            ends_at: attempt.ends_at.unwrap_or(now),
            time_remaining_secs: attempt.remaining_secs(now),
            saved_responses,
        })
    }

    async fn require_owned(
        &self,
        attempt_id: Uuid,
        candidate_id: i64,
    ) -> Result<Attempt, EngineError> {
        let attempt = self
            .store
            .get(attempt_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Attempt {} not found", attempt_id)))?;

        if attempt.candidate_id != candidate_id {
            return Err(EngineError::Validation(format!(
                "Attempt {} does not belong to candidate {}",
                attempt_id, candidate_id
            )));
        }
        Ok(attempt)
    }

    async fn schedule_expiry(&self, attempt: &Attempt) {
        if let Some(ends_at) = attempt.ends_at {
            let handler: Weak<dyn ExpiryHandler> = self.handle.clone();
            self.scheduler.schedule(attempt.id, ends_at, handler).await;
        }
    }

    /// Best-effort side effects after a terminal transition. Spawned so a
    /// slow or failing collaborator cannot delay the caller; the grading
    /// transition is already persisted at this point.
    async fn after_finalize(&self, attempt: &Attempt) {
        let score = attempt.score.unwrap_or(0.0);
        let passed = attempt.passed.unwrap_or(false);
        let result = ExamResult {
            exam_id: attempt.exam_id,
            candidate_id: attempt.candidate_id,
            passed,
            score,
            ended_at: attempt.ends_at.unwrap_or_else(Utc::now),
        };
        let message = if passed {
            format!("You passed the exam with a score of {:.2}%.", score)
        } else {
            format!(
                "You scored {:.2}%. The passing score is {:.2}%.",
                score, self.config.pass_threshold
            )
        };

        let retries = self.config.notify_retries;
        let notifier = Arc::clone(&self.notifier);
        let candidate_id = attempt.candidate_id;
        tokio::spawn(async move {
            deliver(retries, "candidate notification", move || {
                let notifier = Arc::clone(&notifier);
                let message = message.clone();
                async move { notifier.notify(candidate_id, &message).await }
            })
            .await;
        });

        let progress = Arc::clone(&self.progress);
        tokio::spawn(async move {
            deliver(retries, "training progress update", move || {
                let progress = Arc::clone(&progress);
                let result = result.clone();
                async move { progress.record_result(result).await }
            })
            .await;
        });
    }

    fn deny(&self, eligibility: StartEligibility, attempts: u32) -> EngineError {
        match eligibility.reason {
            Some(DenialReason::CeilingReached) => EngineError::CeilingReached {
                attempts,
                ceiling: self.config.attempt_ceiling,
            },
            Some(DenialReason::CooldownActive) => EngineError::CooldownActive {
                next_eligible_at: eligibility.next_eligible_at.unwrap_or_else(Utc::now),
            },
            Some(DenialReason::AttemptOpen) => {
                EngineError::Conflict("Candidate already has an open attempt".to_string())
            }
            None => EngineError::Conflict("Start denied".to_string()),
        }
    }

    fn time_limit(&self, exam: &Exam) -> Duration {
        Duration::seconds(
            exam.time_limit_secs
                .unwrap_or(self.config.default_time_limit_secs),
        )
    }
}

#[async_trait]
impl ExpiryHandler for AttemptEngine {
    async fn expire(&self, attempt_id: Uuid) {
        if let Err(e) = self.finalize_timeout(attempt_id).await {
            tracing::error!("Failed to finalize timed out attempt {}: {}", attempt_id, e);
        }
    }
}

/// Builds the store-side response entries for a request batch, rejecting
/// question ids that are not part of the attempt's drawn set.
fn entries_for(
    attempt: &Attempt,
    responses: &[ResponseInput],
) -> Result<HashMap<i64, ResponseEntry>, EngineError> {
    let mut entries = HashMap::with_capacity(responses.len());
    for input in responses {
        if !attempt.has_question(input.question_id) {
            return Err(EngineError::Validation(format!(
                "Question {} is not part of attempt {}",
                input.question_id, attempt.id
            )));
        }
        entries.insert(
            input.question_id,
            ResponseEntry {
                selected: input.selected.clone(),
                correct: None,
                time_spent_secs: input.time_spent_secs,
            },
        );
    }
    Ok(entries)
}

/// Projects a terminal attempt record into the submit response shape.
fn outcome_of(attempt: &Attempt) -> SubmitOutcome {
    let graded_responses = attempt
        .question_order
        .iter()
        .map(|d| {
            let entry = attempt.responses.get(&d.question_id);
            GradedResponse {
                question_id: d.question_id,
                selected: entry.map(|e| e.selected.clone()).unwrap_or_default(),
                correct: entry.and_then(|e| e.correct).unwrap_or(false),
            }
        })
        .collect();

    SubmitOutcome {
        attempt_id: attempt.id,
        status: attempt.status,
        score: attempt.score.unwrap_or(0.0),
        passed: attempt.passed.unwrap_or(false),
        graded_responses,
    }
}

async fn deliver<F, Fut>(retries: u32, what: &str, mut call: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), SinkError>>,
{
    let tries = retries.max(1);
    for try_no in 1..=tries {
        match call().await {
            Ok(()) => return,
            Err(e) => {
                tracing::error!("Failed to deliver {} (try {}): {}", what, try_no, e);
                if try_no < tries {
                    tokio::time::sleep(std::time::Duration::from_millis(200 * try_no as u64))
                        .await;
                }
            }
        }
    }
    tracing::warn!("Giving up on {} after {} tries", what, tries);
}
