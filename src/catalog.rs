// src/catalog.rs

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::EngineError;
use crate::models::exam::{Exam, Question};

/// Read-only view of the question bank, owned by the authoring subsystem.
#[async_trait]
pub trait QuestionCatalog: Send + Sync {
    async fn exam(&self, exam_id: i64) -> Result<Exam, EngineError>;

    /// Questions flagged active at call time. Inactive questions are never
    /// part of a drawn set.
    async fn active_questions(&self, exam_id: i64) -> Result<Vec<Question>, EngineError>;
}

/// Fixed in-memory catalog, used in tests and single-process embeddings.
#[derive(Default)]
pub struct StaticCatalog {
    exams: HashMap<i64, (Exam, Vec<Question>)>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exam(mut self, exam: Exam, questions: Vec<Question>) -> Self {
        self.exams.insert(exam.id, (exam, questions));
        self
    }
}

#[async_trait]
impl QuestionCatalog for StaticCatalog {
    async fn exam(&self, exam_id: i64) -> Result<Exam, EngineError> {
        self.exams
            .get(&exam_id)
            .map(|(exam, _)| exam.clone())
            .ok_or_else(|| EngineError::NotFound(format!("Exam {} not found", exam_id)))
    }

    async fn active_questions(&self, exam_id: i64) -> Result<Vec<Question>, EngineError> {
        let (_, questions) = self
            .exams
            .get(&exam_id)
            .ok_or_else(|| EngineError::NotFound(format!("Exam {} not found", exam_id)))?;

        Ok(questions.iter().filter(|q| q.active).cloned().collect())
    }
}
