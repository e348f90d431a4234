// src/engine/scoring.rs

//! Scoring Engine. Deterministic, side-effect free, re-runnable for audits.

use std::collections::HashMap;

use crate::models::{
    attempt::{AnswerRecord, ScoreSummary},
    question::Question,
};

/// Grading of a single answer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Unanswered,
    Correct,
    Wrong,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Grade {
    pub summary: ScoreSummary,
    /// Outcome per question id, in answer-record order.
    pub outcomes: Vec<(i64, Outcome)>,
}

/// Grades answer records against the current question bank.
///
/// * Unanswered: no change.
/// * Correct: `+marks` of the question.
/// * Wrong: `-negative_marking`.
///
/// The total is clamped at zero. Total time is the sum of per-question time,
/// not the wall-clock length of the attempt. An answered question that is no
/// longer in the bank cannot be checked and counts as unanswered.
pub fn grade(
    answers: &[AnswerRecord],
    bank: &HashMap<i64, Question>,
    negative_marking: f64,
) -> Grade {
    let mut score = 0.0_f64;
    let mut correct = 0;
    let mut wrong = 0;
    let mut unanswered = 0;
    let mut total_time: i64 = 0;
    let mut outcomes = Vec::with_capacity(answers.len());

    for record in answers {
        total_time = total_time.saturating_add(record.time_spent_seconds);

        let outcome = match (record.selected_option_id, bank.get(&record.question_id)) {
            (Some(selected), Some(question)) if selected == question.correct_option_id => {
                score += question.marks;
                correct += 1;
                Outcome::Correct
            }
            (Some(_), Some(_)) => {
                score -= negative_marking;
                wrong += 1;
                Outcome::Wrong
            }
            _ => {
                unanswered += 1;
                Outcome::Unanswered
            }
        };
        outcomes.push((record.question_id, outcome));
    }

    Grade {
        summary: ScoreSummary {
            total_score: score.max(0.0),
            total_correct: correct,
            total_wrong: wrong,
            total_unanswered: unanswered,
            total_time_seconds: total_time,
        },
        outcomes,
    }
}

/// Writes correctness flags back onto the records.
pub fn apply(answers: &mut [AnswerRecord], grade: &Grade) {
    let outcomes: HashMap<i64, Outcome> = grade.outcomes.iter().copied().collect();
    for record in answers {
        record.is_correct = outcomes.get(&record.question_id) == Some(&Outcome::Correct);
    }
}
