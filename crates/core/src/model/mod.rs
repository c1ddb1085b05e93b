mod assessment;
mod course;
mod ids;
mod progress;
mod section;

pub use ids::{
    CourseId, OptionId, ParseIdError, QuestionId, SectionId, TestId, TestResultId, UserId,
};

pub use assessment::{
    AnswerOption, AnswerSheet, AssessmentError, OptionDraft, OptionView, Question, QuestionKind,
    Test, TestOwner, TestResult, validate_option_drafts,
};
pub use course::{Course, CourseError};
pub use progress::{CourseProgress, ProgressError, SectionProgress};
pub use section::{Section, SectionError};
