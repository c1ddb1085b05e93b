#![forbid(unsafe_code)]

pub mod app_services;
pub mod course_service;
pub mod error;
mod keyed_lock;
pub mod progress_service;
pub mod section_service;
pub mod section_view;
pub mod submission_service;

pub use course_core::Clock;

pub use app_services::AppServices;
pub use course_service::{CoursePatch, CourseService, NewCourse, NewQuestion, NewTest};
pub use error::{
    AppServicesError, CourseServiceError, ProgressServiceError, SectionServiceError,
    SubmissionError,
};
pub use progress_service::{CourseProgressItem, ProgressService, SectionVisit, VisitToggled};
pub use section_service::{NewSection, ReorderItem, SectionPatch, SectionService};
pub use section_view::{QuestionView, SectionDetail, SectionNode, TestView};
pub use submission_service::{Submission, SubmissionService};
