// src/selector.rs

use rand::Rng;
use rand::seq::SliceRandom;

use crate::models::attempt::DrawnQuestion;
use crate::models::exam::{Exam, Question};

/// Draws a randomized question set for a new attempt.
///
/// * Filters the bank to active questions only.
/// * Samples `exam.question_count` questions uniformly without replacement;
///   if the active bank does not exceed the subset size, the whole bank is
///   used (defined edge case, not an error).
/// * Shuffles the drawn order and each question's option order
///   independently. A two-option question comes out unchanged or swapped,
///   which is all an unbiased shuffle of two elements can produce.
///
/// The caller supplies the `Rng` so tests can seed a `StdRng`.
pub fn draw<R: Rng + ?Sized>(exam: &Exam, bank: &[Question], rng: &mut R) -> Vec<DrawnQuestion> {
    let mut active: Vec<&Question> = bank.iter().filter(|q| q.active).collect();

    // Shuffle-then-truncate is a partial Fisher-Yates: a uniform sample
    // without replacement that also randomizes the drawn order.
    active.shuffle(rng);
    if let Some(count) = exam.question_count {
        active.truncate(count);
    }

    active
        .iter()
        .map(|q| {
            let mut option_order: Vec<i64> = q.options.iter().map(|o| o.id).collect();
            option_order.shuffle(rng);
            DrawnQuestion {
                question_id: q.id,
                option_order,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::exam::QuestionOption;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::BTreeSet;

    fn question(id: i64, active: bool, option_count: usize) -> Question {
        let options = (0..option_count)
            .map(|i| QuestionOption {
                id: id * 10 + i as i64,
                text: format!("Option {}", i),
                correct: i == 0,
            })
            .collect();
        Question {
            id,
            prompt: format!("Question {}", id),
            active,
            options,
        }
    }

    fn exam(question_count: Option<usize>) -> Exam {
        Exam {
            id: 1,
            title: "S1 Certification".to_string(),
            pass_threshold: 80.0,
            question_count,
            time_limit_secs: Some(1800),
        }
    }

    #[test]
    fn draws_exact_subset_without_duplicates() {
        let bank: Vec<Question> = (1..=10).map(|id| question(id, true, 4)).collect();
        let mut rng = StdRng::seed_from_u64(7);

        let drawn = draw(&exam(Some(5)), &bank, &mut rng);

        assert_eq!(drawn.len(), 5);
        let ids: BTreeSet<i64> = drawn.iter().map(|d| d.question_id).collect();
        assert_eq!(ids.len(), 5);
    }

    #[test]
    fn small_bank_returns_every_active_question() {
        let bank: Vec<Question> = (1..=3).map(|id| question(id, true, 4)).collect();
        let mut rng = StdRng::seed_from_u64(7);

        let drawn = draw(&exam(Some(10)), &bank, &mut rng);

        let ids: BTreeSet<i64> = drawn.iter().map(|d| d.question_id).collect();
        assert_eq!(ids, BTreeSet::from([1, 2, 3]));
    }

    #[test]
    fn inactive_questions_are_never_drawn() {
        let mut bank: Vec<Question> = (1..=6).map(|id| question(id, true, 4)).collect();
        bank.push(question(99, false, 4));
        let mut rng = StdRng::seed_from_u64(42);

        // Ask for more than the active bank holds
        let drawn = draw(&exam(Some(20)), &bank, &mut rng);

        assert_eq!(drawn.len(), 6);
        assert!(drawn.iter().all(|d| d.question_id != 99));
    }

    #[test]
    fn option_order_is_a_permutation_of_the_options() {
        let bank = vec![question(1, true, 4)];
        let mut rng = StdRng::seed_from_u64(3);

        let drawn = draw(&exam(None), &bank, &mut rng);

        let order: BTreeSet<i64> = drawn[0].option_order.iter().copied().collect();
        assert_eq!(order, BTreeSet::from([10, 11, 12, 13]));
    }

    #[test]
    fn seeded_draw_is_deterministic() {
        let bank: Vec<Question> = (1..=10).map(|id| question(id, true, 4)).collect();

        let mut rng_a = StdRng::seed_from_u64(99);
        let mut rng_b = StdRng::seed_from_u64(99);
        let drawn_a = draw(&exam(Some(5)), &bank, &mut rng_a);
        let drawn_b = draw(&exam(Some(5)), &bank, &mut rng_b);

        let ids_a: Vec<i64> = drawn_a.iter().map(|d| d.question_id).collect();
        let ids_b: Vec<i64> = drawn_b.iter().map(|d| d.question_id).collect();
        assert_eq!(ids_a, ids_b);
        assert_eq!(drawn_a[0].option_order, drawn_b[0].option_order);
    }

    #[test]
    fn no_subset_size_draws_the_whole_bank() {
        let bank: Vec<Question> = (1..=8).map(|id| question(id, true, 2)).collect();
        let mut rng = StdRng::seed_from_u64(1);

        let drawn = draw(&exam(None), &bank, &mut rng);

        assert_eq!(drawn.len(), 8);
    }
}
