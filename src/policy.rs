// src/policy.rs

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::EngineConfig;
use crate::models::attempt::Attempt;

/// Outcome of an eligibility check.
#[derive(Debug, Clone, Serialize)]
pub struct StartEligibility {
    pub allowed: bool,
    pub reason: Option<DenialReason>,

    /// When the candidate becomes eligible again, for external countdown
    /// rendering. Absent for permanent denials (ceiling).
    pub next_eligible_at: Option<DateTime<Utc>>,
}

impl StartEligibility {
    fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
            next_eligible_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    CeilingReached,
    CooldownActive,
    AttemptOpen,
}

/// Whether a candidate may begin a fresh attempt.
///
/// Denies at the attempt ceiling, and while the most recent terminal
/// attempt failed inside the cooldown window. A passed attempt never
/// triggers a cooldown.
pub fn can_start(history: &[Attempt], now: DateTime<Utc>, config: &EngineConfig) -> StartEligibility {
    if history.len() as u32 >= config.attempt_ceiling {
        return StartEligibility {
            allowed: false,
            reason: Some(DenialReason::CeilingReached),
            next_eligible_at: None,
        };
    }

    let latest_terminal = history
        .iter()
        .filter(|a| a.status.is_terminal())
        .max_by_key(|a| a.attempt_number);

    if let Some(attempt) = latest_terminal {
        if attempt.passed != Some(true) {
            if let Some(ended_at) = attempt.ends_at {
                let eligible_at = ended_at + Duration::hours(config.cooldown_hours);
                if now < eligible_at {
                    return StartEligibility {
                        allowed: false,
                        reason: Some(DenialReason::CooldownActive),
                        next_eligible_at: Some(eligible_at),
                    };
                }
            }
        }
    }

    StartEligibility::allowed()
}

/// Instructor assignment guard.
///
/// Bypasses the candidate cooldown, but denies while any non-terminal
/// attempt exists or while any attempt finished within the assignment
/// guard window. The ceiling always applies.
pub fn can_assign(history: &[Attempt], now: DateTime<Utc>, config: &EngineConfig) -> StartEligibility {
    if history.len() as u32 >= config.attempt_ceiling {
        return StartEligibility {
            allowed: false,
            reason: Some(DenialReason::CeilingReached),
            next_eligible_at: None,
        };
    }

    if history.iter().any(|a| !a.status.is_terminal()) {
        return StartEligibility {
            allowed: false,
            reason: Some(DenialReason::AttemptOpen),
            next_eligible_at: None,
        };
    }

    let latest_end = history
        .iter()
        .filter(|a| a.status.is_terminal())
        .filter_map(|a| a.ends_at)
        .max();

    if let Some(ended_at) = latest_end {
        let eligible_at = ended_at + Duration::hours(config.assign_guard_hours);
        if now < eligible_at {
            return StartEligibility {
                allowed: false,
                reason: Some(DenialReason::CooldownActive),
                next_eligible_at: Some(eligible_at),
            };
        }
    }

    StartEligibility::allowed()
}
