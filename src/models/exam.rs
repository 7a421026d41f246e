// src/models/exam.rs

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Read-only view of an exam, owned by the authoring subsystem.
/// The engine treats it as immutable for the duration of an attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exam {
    pub id: i64,
    pub title: String,

    /// Passing percentage, inclusive.
    pub pass_threshold: f64,

    /// Size of the subset drawn per attempt. `None` draws the whole bank.
    pub question_count: Option<usize>,

    /// Per-attempt time box in seconds. `None` falls back to the
    /// engine-wide default.
    pub time_limit_secs: Option<i64>,
}

/// One question from the bank, including the server-side answer key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub prompt: String,

    /// Inactive questions are never included in a drawn set.
    pub active: bool,

    pub options: Vec<QuestionOption>,
}

impl Question {
    /// Ids of the correct options, as a set.
    pub fn correct_option_ids(&self) -> BTreeSet<i64> {
        self.options
            .iter()
            .filter(|o| o.correct)
            .map(|o| o.id)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: i64,
    pub text: String,

    /// Server-side only. Stripped by `CandidateQuestion` before transmission.
    pub correct: bool,
}

/// DTO for sending a drawn question to the candidate (excludes correctness).
#[derive(Debug, Clone, Serialize)]
pub struct CandidateQuestion {
    pub id: i64,
    pub prompt: String,
    pub options: Vec<CandidateOption>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateOption {
    pub id: i64,
    pub text: String,
}

impl CandidateQuestion {
    /// Projects a question into its candidate-facing shape, reordering the
    /// options to the attempt's fixed `option_order`.
    pub fn from_drawn(question: &Question, option_order: &[i64]) -> Self {
        let options = option_order
            .iter()
            .filter_map(|id| question.options.iter().find(|o| o.id == *id))
            .map(|o| CandidateOption {
                id: o.id,
                text: o.text.clone(),
            })
            .collect();

        Self {
            id: question.id,
            prompt: question.prompt.clone(),
            options,
        }
    }
}
