// src/grader.rs

use std::collections::{BTreeSet, HashMap};

use crate::models::attempt::{Attempt, ResponseEntry};
use crate::models::exam::Question;

/// Outcome of grading one attempt.
#[derive(Debug, Clone)]
pub struct GradeResult {
    /// Percentage, rounded to two decimal places.
    pub score: f64,
    pub passed: bool,

    /// One entry per drawn question, correctness filled in. Unanswered
    /// questions appear with an empty selection.
    pub graded: HashMap<i64, ResponseEntry>,
}

/// Grades an attempt against the question bank.
///
/// Pure and deterministic: a question is correct iff the selected option
/// set is set-equal to its correct option set (single- and multi-select
/// uniformly), unanswered questions count as incorrect, and the pass
/// decision is inclusive at the threshold.
pub fn grade(attempt: &Attempt, bank: &[Question], pass_threshold: f64) -> GradeResult {
    let answer_keys: HashMap<i64, BTreeSet<i64>> = bank
        .iter()
        .map(|q| (q.id, q.correct_option_ids()))
        .collect();

    let total = attempt.question_order.len();
    let mut correct_count = 0usize;
    let mut graded = HashMap::with_capacity(total);

    for drawn in &attempt.question_order {
        let entry = attempt.responses.get(&drawn.question_id);
        let correct = match (entry, answer_keys.get(&drawn.question_id)) {
            (Some(entry), Some(key)) => !key.is_empty() && entry.selected == *key,
            _ => false,
        };
        if correct {
            correct_count += 1;
        }

        let mut graded_entry = entry.cloned().unwrap_or(ResponseEntry {
            selected: BTreeSet::new(),
            correct: None,
            time_spent_secs: 0,
        });
        graded_entry.correct = Some(correct);
        graded.insert(drawn.question_id, graded_entry);
    }

    let score = if total == 0 {
        0.0
    } else {
        round2(100.0 * correct_count as f64 / total as f64)
    };

    GradeResult {
        score,
        passed: score >= pass_threshold,
        graded,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::attempt::{AttemptStatus, DrawnQuestion};
    use crate::models::exam::QuestionOption;
    use uuid::Uuid;

    fn question(id: i64, correct_ids: &[i64]) -> Question {
        let options = (0..4)
            .map(|i| {
                let option_id = id * 10 + i;
                QuestionOption {
                    id: option_id,
                    text: format!("Option {}", i),
                    correct: correct_ids.contains(&option_id),
                }
            })
            .collect();
        Question {
            id,
            prompt: format!("Question {}", id),
            active: true,
            options,
        }
    }

    fn attempt_over(bank: &[Question], answers: &[(i64, &[i64])]) -> Attempt {
        let question_order = bank
            .iter()
            .map(|q| DrawnQuestion {
                question_id: q.id,
                option_order: q.options.iter().map(|o| o.id).collect(),
            })
            .collect();
        let responses = answers
            .iter()
            .map(|(question_id, selected)| {
                (
                    *question_id,
                    ResponseEntry {
                        selected: selected.iter().copied().collect(),
                        correct: None,
                        time_spent_secs: 30,
                    },
                )
            })
            .collect();

        Attempt {
            id: Uuid::new_v4(),
            exam_id: 1,
            candidate_id: 100,
            attempt_number: 1,
            question_order,
            responses,
            status: AttemptStatus::InProgress,
            started_at: None,
            ends_at: None,
            score: None,
            passed: None,
        }
    }

    #[test]
    fn two_of_three_fails_at_eighty_percent() {
        let bank = vec![question(1, &[10]), question(2, &[20]), question(3, &[30])];
        let attempt = attempt_over(&bank, &[(1, &[10]), (2, &[20]), (3, &[31])]);

        let result = grade(&attempt, &bank, 80.0);

        assert_eq!(result.score, 66.67);
        assert!(!result.passed);
    }

    #[test]
    fn pass_threshold_is_inclusive() {
        let bank: Vec<Question> = (1..=5).map(|id| question(id, &[id * 10])).collect();
        let attempt = attempt_over(
            &bank,
            &[(1, &[10]), (2, &[20]), (3, &[30]), (4, &[40]), (5, &[51])],
        );

        let result = grade(&attempt, &bank, 80.0);

        assert_eq!(result.score, 80.00);
        assert!(result.passed);
    }

    #[test]
    fn unanswered_questions_count_as_incorrect() {
        let bank = vec![question(1, &[10]), question(2, &[20])];
        let attempt = attempt_over(&bank, &[(1, &[10])]);

        let result = grade(&attempt, &bank, 80.0);

        assert_eq!(result.score, 50.0);
        assert_eq!(result.graded[&2].correct, Some(false));
        assert!(result.graded[&2].selected.is_empty());
    }

    #[test]
    fn multi_select_requires_exact_set_equality() {
        let bank = vec![question(1, &[10, 12])];

        let partial = attempt_over(&bank, &[(1, &[10])]);
        assert!(!grade(&partial, &bank, 80.0).graded[&1].correct.unwrap());

        let superset = attempt_over(&bank, &[(1, &[10, 11, 12])]);
        assert!(!grade(&superset, &bank, 80.0).graded[&1].correct.unwrap());

        let exact = attempt_over(&bank, &[(1, &[10, 12])]);
        let result = grade(&exact, &bank, 80.0);
        assert_eq!(result.score, 100.0);
        assert!(result.passed);
    }

    #[test]
    fn grading_is_deterministic() {
        let bank = vec![question(1, &[10]), question(2, &[20]), question(3, &[30])];
        let attempt = attempt_over(&bank, &[(1, &[10]), (2, &[21])]);

        let first = grade(&attempt, &bank, 80.0);
        let second = grade(&attempt, &bank, 80.0);

        assert_eq!(first.score, second.score);
        assert_eq!(first.passed, second.passed);
    }

    #[test]
    fn empty_question_order_scores_zero() {
        let bank: Vec<Question> = vec![];
        let attempt = attempt_over(&bank, &[]);

        let result = grade(&attempt, &bank, 80.0);

        assert_eq!(result.score, 0.0);
        assert!(!result.passed);
    }
}
