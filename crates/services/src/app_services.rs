use std::sync::Arc;

use storage::repository::Storage;

use crate::Clock;
use crate::course_service::CourseService;
use crate::error::AppServicesError;
use crate::progress_service::ProgressService;
use crate::section_service::SectionService;
use crate::submission_service::SubmissionService;

/// Assembles the app-facing services over one storage backend.
#[derive(Clone)]
pub struct AppServices {
    courses: Arc<CourseService>,
    sections: Arc<SectionService>,
    progress: Arc<ProgressService>,
    submissions: Arc<SubmissionService>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage, migrating the schema first.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if the database cannot be opened or migrated.
    pub async fn new_sqlite(db_url: &str, clock: Clock) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self::from_storage(&storage, clock))
    }

    /// Wire every service to the repositories in `storage`.
    #[must_use]
    pub fn from_storage(storage: &Storage, clock: Clock) -> Self {
        let progress = ProgressService::new(
            clock,
            Arc::clone(&storage.courses),
            Arc::clone(&storage.sections),
            Arc::clone(&storage.tests),
            Arc::clone(&storage.results),
            Arc::clone(&storage.progress),
        );
        let submissions = SubmissionService::new(
            clock,
            Arc::clone(&storage.sections),
            Arc::clone(&storage.tests),
            Arc::clone(&storage.results),
            progress.clone(),
        );
        let sections = SectionService::new(
            clock,
            Arc::clone(&storage.courses),
            Arc::clone(&storage.sections),
            Arc::clone(&storage.tests),
        );
        let courses = CourseService::new(
            clock,
            Arc::clone(&storage.courses),
            Arc::clone(&storage.sections),
            Arc::clone(&storage.tests),
        );

        Self {
            courses: Arc::new(courses),
            sections: Arc::new(sections),
            progress: Arc::new(progress),
            submissions: Arc::new(submissions),
        }
    }

    #[must_use]
    pub fn courses(&self) -> Arc<CourseService> {
        Arc::clone(&self.courses)
    }

    #[must_use]
    pub fn sections(&self) -> Arc<SectionService> {
        Arc::clone(&self.sections)
    }

    #[must_use]
    pub fn progress(&self) -> Arc<ProgressService> {
        Arc::clone(&self.progress)
    }

    #[must_use]
    pub fn submissions(&self) -> Arc<SubmissionService> {
        Arc::clone(&self.submissions)
    }
}
