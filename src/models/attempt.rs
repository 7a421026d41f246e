// src/models/attempt.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;
use validator::Validate;

use crate::models::exam::CandidateQuestion;

/// Attempt lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    NotStarted,
    InProgress,
    Completed,
    TimedOut,
}

impl AttemptStatus {
    /// Terminal records are immutable except for read access.
    pub fn is_terminal(self) -> bool {
        matches!(self, AttemptStatus::Completed | AttemptStatus::TimedOut)
    }
}

/// One question slot drawn for an attempt: the question id plus the option
/// order fixed at draw time. Never changes once the attempt exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawnQuestion {
    pub question_id: i64,
    pub option_order: Vec<i64>,
}

/// A candidate's answer to one question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEntry {
    /// Selected option ids. Uniformly a set, covering single- and
    /// multi-select questions alike.
    pub selected: BTreeSet<i64>,

    /// Set once by the grader, atomically with the terminal transition.
    pub correct: Option<bool>,

    pub time_spent_secs: u32,
}

/// The central mutable record: one per (exam, candidate, attempt number).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub id: Uuid,
    pub exam_id: i64,
    pub candidate_id: i64,

    /// Strictly increasing per (exam, candidate) pair.
    pub attempt_number: u32,

    pub question_order: Vec<DrawnQuestion>,
    pub responses: HashMap<i64, ResponseEntry>,
    pub status: AttemptStatus,

    pub started_at: Option<DateTime<Utc>>,

    /// Deadline while in progress; actual completion timestamp once terminal.
    pub ends_at: Option<DateTime<Utc>>,

    pub score: Option<f64>,
    pub passed: Option<bool>,
}

impl Attempt {
    pub fn has_question(&self, question_id: i64) -> bool {
        self.question_order
            .iter()
            .any(|d| d.question_id == question_id)
    }

    /// Seconds left on the clock, clamped at zero.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        self.ends_at
            .map(|ends_at| (ends_at - now).num_seconds().max(0))
            .unwrap_or(0)
    }

    /// An in-progress attempt whose deadline has already passed.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == AttemptStatus::InProgress
            && self.ends_at.map(|ends_at| ends_at <= now).unwrap_or(false)
    }
}

/// DTO: one response tuple in a save or submit request.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ResponseInput {
    pub question_id: i64,
    pub selected: BTreeSet<i64>,
    #[validate(range(max = 86_400))]
    pub time_spent_secs: u32,
}

/// DTO: batch of responses saved mid-attempt.
#[derive(Debug, Deserialize, Validate)]
pub struct SaveResponsesRequest {
    #[validate(length(min = 1), nested)]
    pub responses: Vec<ResponseInput>,
}

/// Candidate-facing view returned by start and resume.
#[derive(Debug, Serialize)]
pub struct AttemptSummary {
    pub attempt_id: Uuid,
    pub attempt_number: u32,

    /// Questions in drawn order, correctness stripped.
    pub questions: Vec<CandidateQuestion>,

    pub ends_at: DateTime<Utc>,
    pub time_remaining_secs: i64,

    /// Previously saved selections, present on resume.
    pub saved_responses: HashMap<i64, BTreeSet<i64>>,
}

/// A start request either creates a fresh attempt or resumes the
/// unexpired in-progress one.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StartOutcome {
    Started(AttemptSummary),
    Resumed(AttemptSummary),
}

impl StartOutcome {
    pub fn summary(&self) -> &AttemptSummary {
        match self {
            StartOutcome::Started(s) | StartOutcome::Resumed(s) => s,
        }
    }
}

/// Per-question correctness as exposed after grading.
#[derive(Debug, Clone, Serialize)]
pub struct GradedResponse {
    pub question_id: i64,
    pub selected: BTreeSet<i64>,
    pub correct: bool,
}

/// The terminal result as observed by the submit caller. A caller that
/// lost the race against the expiry task receives the already-persisted
/// outcome in this same shape.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    pub attempt_id: Uuid,
    pub status: AttemptStatus,
    pub score: f64,
    pub passed: bool,
    pub graded_responses: Vec<GradedResponse>,
}

/// Answer to a status query for an (exam, candidate) pair.
#[derive(Debug, Serialize)]
pub struct AttemptStatusReport {
    pub status: Option<AttemptStatus>,
    pub attempt_id: Option<Uuid>,
    pub time_remaining_secs: Option<i64>,
    pub cooldown_ends_at: Option<DateTime<Utc>>,
}

/// Payload handed to the training-progress collaborator after every
/// terminal transition.
#[derive(Debug, Clone, Serialize)]
pub struct ExamResult {
    pub exam_id: i64,
    pub candidate_id: i64,
    pub passed: bool,
    pub score: f64,
    pub ended_at: DateTime<Utc>,
}
