// src/lib.rs

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod grader;
pub mod models;
pub mod notify;
pub mod policy;
pub mod scheduler;
pub mod selector;
pub mod store;

// Re-export specific items for convenience if needed
pub use config::EngineConfig;
pub use engine::AttemptEngine;
pub use error::EngineError;
