// src/error.rs

use chrono::{DateTime, Utc};
use std::fmt;

/// Global engine error enum.
/// Centralizes the failure taxonomy exposed to the embedding service.
#[derive(Debug)]
pub enum EngineError {
    // Malformed payload, or an id that is not part of the attempt
    Validation(String),

    // Unknown exam, attempt, or candidate. Never treated as "create new".
    NotFound(String),

    // The attempt is not in a state that permits the operation
    Conflict(String),

    // Every permitted attempt for the (exam, candidate) pair has been used
    CeilingReached { attempts: u32, ceiling: u32 },

    // The candidate is inside the retest cooldown window
    CooldownActive { next_eligible_at: DateTime<Utc> },

    // Persistence failure, propagated as a service error
    Storage(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for EngineError {}
