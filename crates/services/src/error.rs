//! Shared error types for the services crate.

use thiserror::Error;

use course_core::grading::GradingError;
use course_core::model::{
    AssessmentError, CourseError, CourseId, SectionError, SectionId, TestId, UserId,
};
use course_core::tree::TreeError;
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors emitted by `SectionService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SectionServiceError {
    #[error("course {0} not found")]
    CourseNotFound(CourseId),
    #[error("section {0} not found")]
    SectionNotFound(SectionId),
    /// The request would break the section forest (cycle, foreign section or parent).
    #[error(transparent)]
    InvariantViolation(#[from] TreeError),
    #[error(transparent)]
    Section(#[from] SectionError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SectionServiceError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::CourseNotFound(_) | Self::SectionNotFound(_) | Self::Storage(StorageError::NotFound)
        )
    }
}

/// Errors emitted by `ProgressService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressServiceError {
    #[error("course {0} not found")]
    CourseNotFound(CourseId),
    #[error("section {0} not found")]
    SectionNotFound(SectionId),
    /// Visits can only be recorded once the course has been opened.
    #[error("user {user_id} has no progress for course {course_id}")]
    ProgressNotStarted { user_id: UserId, course_id: CourseId },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ProgressServiceError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::CourseNotFound(_)
                | Self::SectionNotFound(_)
                | Self::ProgressNotStarted { .. }
                | Self::Storage(StorageError::NotFound)
        )
    }
}

/// Errors emitted by `CourseService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CourseServiceError {
    #[error("course {0} not found")]
    CourseNotFound(CourseId),
    #[error("section {0} not found")]
    SectionNotFound(SectionId),
    #[error("test {0} not found")]
    TestNotFound(TestId),
    #[error(transparent)]
    Invalid(#[from] course_core::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<CourseError> for CourseServiceError {
    fn from(err: CourseError) -> Self {
        Self::Invalid(err.into())
    }
}

impl From<AssessmentError> for CourseServiceError {
    fn from(err: AssessmentError) -> Self {
        Self::Invalid(err.into())
    }
}

impl CourseServiceError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::CourseNotFound(_)
                | Self::SectionNotFound(_)
                | Self::TestNotFound(_)
                | Self::Storage(StorageError::NotFound)
        )
    }
}

/// Errors emitted by `SubmissionService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SubmissionError {
    #[error("test {0} not found")]
    TestNotFound(TestId),
    #[error("section {0} owning the test not found")]
    SectionNotFound(SectionId),
    #[error(transparent)]
    Grading(#[from] GradingError),
    #[error(transparent)]
    Progress(#[from] ProgressServiceError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SubmissionError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::TestNotFound(_) | Self::SectionNotFound(_) => true,
            Self::Progress(inner) => inner.is_not_found(),
            Self::Storage(StorageError::NotFound) => true,
            _ => false,
        }
    }
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
}
