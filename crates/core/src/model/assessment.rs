use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::model::ids::{CourseId, OptionId, QuestionId, SectionId, TestId, TestResultId, UserId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AssessmentError {
    #[error("test title cannot be empty")]
    EmptyTitle,

    #[error("passing score must be between 0 and 100, got {0}")]
    InvalidPassingScore(u32),

    #[error("duration must be > 0 minutes")]
    InvalidDuration,

    #[error("question text cannot be empty")]
    EmptyQuestion,

    #[error("option text cannot be empty")]
    EmptyOption,

    #[error("question must have at least two options")]
    TooFewOptions,

    #[error("single-choice question needs exactly one correct option, found {0}")]
    SingleChoiceCorrectCount(usize),

    #[error("multiple-choice question needs at least one correct option")]
    NoCorrectOption,

    #[error("score must be between 0 and 100, got {0}")]
    InvalidScore(u32),

    #[error("unknown question kind: {0}")]
    UnknownKind(String),
}

//
// ─── TEST ──────────────────────────────────────────────────────────────────────
//

/// Who owns a test. Both owners count identically toward course completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum TestOwner {
    Course(CourseId),
    Section(SectionId),
}

/// A scored quiz attached to a course or a section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Test {
    id: TestId,
    owner: TestOwner,
    title: String,
    passing_score: u8,
    duration_minutes: u32,
    is_published: bool,
    created_at: DateTime<Utc>,
}

impl Test {
    /// # Errors
    ///
    /// Returns `AssessmentError` for a blank title, a passing score above 100,
    /// or a zero duration.
    pub fn new(
        id: TestId,
        owner: TestOwner,
        title: impl Into<String>,
        passing_score: u32,
        duration_minutes: u32,
        is_published: bool,
        created_at: DateTime<Utc>,
    ) -> Result<Self, AssessmentError> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(AssessmentError::EmptyTitle);
        }
        let passing_score = u8::try_from(passing_score)
            .ok()
            .filter(|s| *s <= 100)
            .ok_or(AssessmentError::InvalidPassingScore(passing_score))?;
        if duration_minutes == 0 {
            return Err(AssessmentError::InvalidDuration);
        }
        Ok(Self {
            id,
            owner,
            title: title.trim().to_owned(),
            passing_score,
            duration_minutes,
            is_published,
            created_at,
        })
    }

    #[must_use]
    pub fn id(&self) -> TestId {
        self.id
    }

    #[must_use]
    pub fn owner(&self) -> TestOwner {
        self.owner
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn passing_score(&self) -> u8 {
        self.passing_score
    }

    #[must_use]
    pub fn duration_minutes(&self) -> u32 {
        self.duration_minutes
    }

    #[must_use]
    pub fn is_published(&self) -> bool {
        self.is_published
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether a score clears this test's threshold.
    #[must_use]
    pub fn is_passing(&self, score: u8) -> bool {
        score >= self.passing_score
    }
}

//
// ─── QUESTIONS ─────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    SingleChoice,
    MultipleChoice,
}

impl QuestionKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            QuestionKind::SingleChoice => "single_choice",
            QuestionKind::MultipleChoice => "multiple_choice",
        }
    }

    /// # Errors
    ///
    /// Returns `AssessmentError::UnknownKind` for unrecognized strings.
    pub fn parse(raw: &str) -> Result<Self, AssessmentError> {
        match raw {
            "single_choice" => Ok(QuestionKind::SingleChoice),
            "multiple_choice" => Ok(QuestionKind::MultipleChoice),
            other => Err(AssessmentError::UnknownKind(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Question {
    id: QuestionId,
    test_id: TestId,
    text: String,
    kind: QuestionKind,
    points: u32,
    order_index: i64,
}

impl Question {
    /// # Errors
    ///
    /// Returns `AssessmentError::EmptyQuestion` for blank text.
    pub fn new(
        id: QuestionId,
        test_id: TestId,
        text: impl Into<String>,
        kind: QuestionKind,
        points: u32,
        order_index: i64,
    ) -> Result<Self, AssessmentError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(AssessmentError::EmptyQuestion);
        }
        Ok(Self {
            id,
            test_id,
            text: text.trim().to_owned(),
            kind,
            points,
            order_index,
        })
    }

    #[must_use]
    pub fn id(&self) -> QuestionId {
        self.id
    }

    #[must_use]
    pub fn test_id(&self) -> TestId {
        self.test_id
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn kind(&self) -> QuestionKind {
        self.kind
    }

    #[must_use]
    pub fn points(&self) -> u32 {
        self.points
    }

    #[must_use]
    pub fn order_index(&self) -> i64 {
        self.order_index
    }
}

/// An answer option. `is_correct` must never reach unprivileged readers;
/// use `OptionView` for those.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerOption {
    id: OptionId,
    question_id: QuestionId,
    text: String,
    is_correct: bool,
    order_index: i64,
}

impl AnswerOption {
    /// # Errors
    ///
    /// Returns `AssessmentError::EmptyOption` for blank text.
    pub fn new(
        id: OptionId,
        question_id: QuestionId,
        text: impl Into<String>,
        is_correct: bool,
        order_index: i64,
    ) -> Result<Self, AssessmentError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(AssessmentError::EmptyOption);
        }
        Ok(Self {
            id,
            question_id,
            text: text.trim().to_owned(),
            is_correct,
            order_index,
        })
    }

    #[must_use]
    pub fn id(&self) -> OptionId {
        self.id
    }

    #[must_use]
    pub fn question_id(&self) -> QuestionId {
        self.question_id
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn is_correct(&self) -> bool {
        self.is_correct
    }

    #[must_use]
    pub fn order_index(&self) -> i64 {
        self.order_index
    }

    /// Reader-safe projection without the correctness flag.
    #[must_use]
    pub fn view(&self) -> OptionView {
        OptionView {
            id: self.id,
            text: self.text.clone(),
            order_index: self.order_index,
        }
    }
}

/// Option as shown to learners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionView {
    pub id: OptionId,
    pub text: String,
    pub order_index: i64,
}

/// Draft option used when authoring a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionDraft {
    pub text: String,
    pub is_correct: bool,
}

impl OptionDraft {
    #[must_use]
    pub fn new(text: impl Into<String>, is_correct: bool) -> Self {
        Self {
            text: text.into(),
            is_correct,
        }
    }
}

/// Check that a set of drafts is consistent with the question kind.
///
/// # Errors
///
/// Returns `AssessmentError` if there are fewer than two options, any option is
/// blank, or the number of correct options does not fit `kind`.
pub fn validate_option_drafts(
    kind: QuestionKind,
    drafts: &[OptionDraft],
) -> Result<(), AssessmentError> {
    if drafts.len() < 2 {
        return Err(AssessmentError::TooFewOptions);
    }
    if drafts.iter().any(|d| d.text.trim().is_empty()) {
        return Err(AssessmentError::EmptyOption);
    }
    let correct = drafts.iter().filter(|d| d.is_correct).count();
    match kind {
        QuestionKind::SingleChoice if correct != 1 => {
            Err(AssessmentError::SingleChoiceCorrectCount(correct))
        }
        QuestionKind::MultipleChoice if correct == 0 => Err(AssessmentError::NoCorrectOption),
        _ => Ok(()),
    }
}

//
// ─── RESULTS ───────────────────────────────────────────────────────────────────
//

/// Submitted answers: question id to the selected option ids.
pub type AnswerSheet = BTreeMap<QuestionId, BTreeSet<OptionId>>;

/// An immutable record of one test attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestResult {
    id: TestResultId,
    user_id: UserId,
    test_id: TestId,
    score: u8,
    passed: bool,
    answers: AnswerSheet,
    created_at: DateTime<Utc>,
}

impl TestResult {
    /// # Errors
    ///
    /// Returns `AssessmentError::InvalidScore` if `score > 100`.
    pub fn from_persisted(
        id: TestResultId,
        user_id: UserId,
        test_id: TestId,
        score: u32,
        passed: bool,
        answers: AnswerSheet,
        created_at: DateTime<Utc>,
    ) -> Result<Self, AssessmentError> {
        let score = u8::try_from(score)
            .ok()
            .filter(|s| *s <= 100)
            .ok_or(AssessmentError::InvalidScore(score))?;
        Ok(Self {
            id,
            user_id,
            test_id,
            score,
            passed,
            answers,
            created_at,
        })
    }

    #[must_use]
    pub fn id(&self) -> TestResultId {
        self.id
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    #[must_use]
    pub fn test_id(&self) -> TestId {
        self.test_id
    }

    #[must_use]
    pub fn score(&self) -> u8 {
        self.score
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        self.passed
    }

    #[must_use]
    pub fn answers(&self) -> &AnswerSheet {
        &self.answers
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
