// src/config.rs

use dotenvy::dotenv;
use std::env;
use std::str::FromStr;

/// Passing percentage, inclusive.
pub const DEFAULT_PASS_THRESHOLD: f64 = 80.0;
/// Maximum attempts per (exam, candidate) pair, ever.
pub const DEFAULT_ATTEMPT_CEILING: u32 = 3;
/// Retest cooldown after a failed attempt. Observed range is 22-25h
/// depending on deployment, hence configurable.
pub const DEFAULT_COOLDOWN_HOURS: i64 = 24;
/// Window during which an instructor cannot assign a fresh attempt
/// after the candidate finished one.
pub const DEFAULT_ASSIGN_GUARD_HOURS: i64 = 25;
/// Fallback time box for exams that carry no per-attempt limit.
pub const DEFAULT_TIME_LIMIT_SECS: i64 = 1800;
/// Best-effort delivery attempts for notification / progress sinks.
pub const DEFAULT_NOTIFY_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub pass_threshold: f64,
    pub attempt_ceiling: u32,
    pub cooldown_hours: i64,
    pub assign_guard_hours: i64,
    pub default_time_limit_secs: i64,
    pub notify_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pass_threshold: DEFAULT_PASS_THRESHOLD,
            attempt_ceiling: DEFAULT_ATTEMPT_CEILING,
            cooldown_hours: DEFAULT_COOLDOWN_HOURS,
            assign_guard_hours: DEFAULT_ASSIGN_GUARD_HOURS,
            default_time_limit_secs: DEFAULT_TIME_LIMIT_SECS,
            notify_retries: DEFAULT_NOTIFY_RETRIES,
        }
    }
}

impl EngineConfig {
    /// Loads the configuration from the environment.
    /// Every knob has a documented default, so nothing here panics.
    pub fn from_env() -> Self {
        dotenv().ok();

        Self {
            pass_threshold: env_or("EXAM_PASS_THRESHOLD", DEFAULT_PASS_THRESHOLD),
            attempt_ceiling: env_or("EXAM_ATTEMPT_CEILING", DEFAULT_ATTEMPT_CEILING),
            cooldown_hours: env_or("EXAM_COOLDOWN_HOURS", DEFAULT_COOLDOWN_HOURS),
            assign_guard_hours: env_or("EXAM_ASSIGN_GUARD_HOURS", DEFAULT_ASSIGN_GUARD_HOURS),
            default_time_limit_secs: env_or("EXAM_DEFAULT_TIME_LIMIT_SECS", DEFAULT_TIME_LIMIT_SECS),
            notify_retries: env_or("EXAM_NOTIFY_RETRIES", DEFAULT_NOTIFY_RETRIES),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
