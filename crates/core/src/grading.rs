//! Scoring of submitted answer sheets.

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

use crate::model::{AnswerOption, AnswerSheet, OptionId, Question, QuestionId};
use crate::progress::rounded_percent;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GradingError {
    #[error("test has no questions worth any points")]
    NothingToGrade,

    #[error("answer references unknown question {0}")]
    UnknownQuestion(QuestionId),

    #[error("option {option} does not belong to question {question}")]
    ForeignOption {
        question: QuestionId,
        option: OptionId,
    },
}

/// Outcome of grading one answer sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grade {
    pub earned: u64,
    pub possible: u64,
    /// 0..=100, rounded half away from zero.
    pub score: u8,
}

/// Grade `answers` against the questions and options of a single test.
///
/// A question earns its full points only when the selected option set equals
/// the set of correct options. Unanswered questions earn nothing.
///
/// # Errors
///
/// Returns `GradingError::NothingToGrade` when the test is worth zero points,
/// and `UnknownQuestion`/`ForeignOption` when the sheet references ids outside
/// the test.
pub fn grade(
    questions: &[Question],
    options: &[AnswerOption],
    answers: &AnswerSheet,
) -> Result<Grade, GradingError> {
    let mut correct_by_question: HashMap<QuestionId, BTreeSet<OptionId>> = HashMap::new();
    let mut owner_by_option: HashMap<OptionId, QuestionId> = HashMap::new();
    for question in questions {
        correct_by_question.entry(question.id()).or_default();
    }
    for option in options {
        owner_by_option.insert(option.id(), option.question_id());
        if option.is_correct() {
            correct_by_question
                .entry(option.question_id())
                .or_default()
                .insert(option.id());
        }
    }

    for (question_id, selected) in answers {
        if !correct_by_question.contains_key(question_id) {
            return Err(GradingError::UnknownQuestion(*question_id));
        }
        for option_id in selected {
            if owner_by_option.get(option_id) != Some(question_id) {
                return Err(GradingError::ForeignOption {
                    question: *question_id,
                    option: *option_id,
                });
            }
        }
    }

    let possible: u64 = questions.iter().map(|q| u64::from(q.points())).sum();
    if possible == 0 {
        return Err(GradingError::NothingToGrade);
    }

    let earned: u64 = questions
        .iter()
        .filter(|q| {
            let correct = correct_by_question.get(&q.id());
            match (answers.get(&q.id()), correct) {
                (Some(selected), Some(correct)) => !selected.is_empty() && selected == correct,
                _ => false,
            }
        })
        .map(|q| u64::from(q.points()))
        .sum();

    Ok(Grade {
        earned,
        possible,
        score: rounded_percent(earned, possible).unwrap_or(0),
    })
}
