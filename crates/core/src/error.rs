use thiserror::Error;

use crate::grading::GradingError;
use crate::model::{AssessmentError, CourseError, ProgressError, SectionError};
use crate::tree::TreeError;

/// Any domain-level failure raised by this crate.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Course(#[from] CourseError),
    #[error(transparent)]
    Section(#[from] SectionError),
    #[error(transparent)]
    Assessment(#[from] AssessmentError),
    #[error(transparent)]
    Grading(#[from] GradingError),
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Tree(#[from] TreeError),
}
