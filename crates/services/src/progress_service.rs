use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use course_core::SectionTree;
use course_core::model::{
    CourseId, CourseProgress, Section, SectionId, SectionProgress, TestId, UserId,
};
use course_core::progress::{CompletionBasis, UserStats};
use storage::repository::{
    CourseRepository, ProgressRepository, SectionRepository, TestRepository,
    TestResultRepository,
};
use tracing::{debug, info};

use crate::Clock;
use crate::error::ProgressServiceError;
use crate::keyed_lock::KeyedLock;

/// A progress row joined with the course fields a dashboard needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourseProgressItem {
    pub progress: CourseProgress,
    pub course_title: String,
    pub course_category: String,
}

/// A section annotated with one user's visit state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionVisit {
    pub section: Section,
    pub progress: SectionProgress,
}

/// Result of toggling a section visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisitToggled {
    pub section: SectionProgress,
    pub course: CourseProgress,
}

/// Maintains per-user course progress and the derived completion percentage.
///
/// Read-modify-write sequences on one (user, course) pair are serialized
/// within the process.
#[derive(Clone)]
pub struct ProgressService {
    clock: Clock,
    courses: Arc<dyn CourseRepository>,
    sections: Arc<dyn SectionRepository>,
    tests: Arc<dyn TestRepository>,
    results: Arc<dyn TestResultRepository>,
    progress: Arc<dyn ProgressRepository>,
    locks: Arc<KeyedLock<(UserId, CourseId)>>,
}

impl ProgressService {
    #[must_use]
    pub fn new(
        clock: Clock,
        courses: Arc<dyn CourseRepository>,
        sections: Arc<dyn SectionRepository>,
        tests: Arc<dyn TestRepository>,
        results: Arc<dyn TestResultRepository>,
        progress: Arc<dyn ProgressRepository>,
    ) -> Self {
        Self {
            clock,
            courses,
            sections,
            tests,
            results,
            progress,
            locks: Arc::new(KeyedLock::new()),
        }
    }

    async fn ensure_course(&self, course_id: CourseId) -> Result<(), ProgressServiceError> {
        match self.courses.get_course(course_id).await? {
            Some(_) => Ok(()),
            None => Err(ProgressServiceError::CourseNotFound(course_id)),
        }
    }

    async fn started(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<CourseProgress, ProgressServiceError> {
        self.progress
            .get_course_progress(user_id, course_id)
            .await?
            .ok_or(ProgressServiceError::ProgressNotStarted { user_id, course_id })
    }

    /// Return the user's progress for a course, creating it at 0% on first access.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::CourseNotFound` for an unknown course.
    pub async fn get_or_create_course_progress(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<CourseProgress, ProgressServiceError> {
        self.ensure_course(course_id).await?;
        let fresh = CourseProgress::start(user_id, course_id, self.clock.now());
        let progress = self.progress.ensure_course_progress(&fresh).await?;
        debug!(
            user_id = user_id.value(),
            course_id = course_id.value(),
            completion = progress.completion_percent(),
            "loaded course progress"
        );
        Ok(progress)
    }

    /// All of a user's progress rows, most recently accessed first.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Storage` if repository access fails.
    pub async fn list_user_progress(
        &self,
        user_id: UserId,
    ) -> Result<Vec<CourseProgressItem>, ProgressServiceError> {
        let rows = self.progress.list_course_progress(user_id).await?;
        let courses: HashMap<CourseId, _> = self
            .courses
            .list_courses()
            .await?
            .into_iter()
            .map(|c| (c.id(), c))
            .collect();
        Ok(rows
            .into_iter()
            .filter_map(|progress| {
                let course = courses.get(&progress.course_id())?;
                Some(CourseProgressItem {
                    course_title: course.title().to_owned(),
                    course_category: course.category().to_owned(),
                    progress,
                })
            })
            .collect())
    }

    /// Mark a section visited or unvisited, then recompute the course's completion.
    ///
    /// The course progress row must already exist; it is created by
    /// [`ProgressService::get_or_create_course_progress`].
    ///
    /// # Errors
    ///
    /// Returns `SectionNotFound` for an unknown section and
    /// `ProgressNotStarted` when the user never opened the course.
    pub async fn toggle_section_visited(
        &self,
        user_id: UserId,
        section_id: SectionId,
        visited: bool,
    ) -> Result<VisitToggled, ProgressServiceError> {
        let section = self
            .sections
            .get_section(section_id)
            .await?
            .ok_or(ProgressServiceError::SectionNotFound(section_id))?;
        let course_id = section.course_id();
        let _guard = self.locks.acquire((user_id, course_id)).await;

        let mut course = self.started(user_id, course_id).await?;
        let now = self.clock.now();

        let visit = SectionProgress::toggled(user_id, section_id, visited, now);
        self.progress.upsert_section_progress(&visit).await?;

        course.record_visit(section_id, visited, now);
        if let Some(percent) = self.completion(user_id, course_id).await? {
            course.set_completion(percent);
        }
        self.progress.save_course_progress(&course).await?;

        info!(
            user_id = user_id.value(),
            course_id = course_id.value(),
            section_id = section_id.value(),
            visited,
            completion = course.completion_percent(),
            "toggled section visit"
        );
        Ok(VisitToggled {
            section: visit,
            course,
        })
    }

    /// Every section of the course in pre-order with the user's visit state;
    /// untouched sections read as unvisited.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::CourseNotFound` for an unknown course.
    pub async fn section_progress_for_course(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Vec<SectionVisit>, ProgressServiceError> {
        self.ensure_course(course_id).await?;
        let sections = self.sections.sections_for_course(course_id).await?;
        let mut stored: HashMap<SectionId, SectionProgress> = self
            .progress
            .section_progress_for_course(user_id, course_id)
            .await?
            .into_iter()
            .map(|p| (p.section_id, p))
            .collect();

        // Pre-order when the forest is sound, storage order otherwise.
        let ordered = match SectionTree::build(course_id, sections.clone()) {
            Ok(tree) => tree.into_sections(),
            Err(_) => sections,
        };
        Ok(ordered
            .into_iter()
            .map(|section| {
                let progress = stored
                    .remove(&section.id())
                    .unwrap_or_else(|| SectionProgress::unvisited(user_id, section.id()));
                SectionVisit { section, progress }
            })
            .collect())
    }

    /// Clear the user's visits for the course and zero its progress, atomically.
    ///
    /// Test results are kept; see [`ProgressService::recompute_course_completion`].
    ///
    /// # Errors
    ///
    /// Returns `ProgressNotStarted` when no progress row exists.
    pub async fn reset_course_progress(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<CourseProgress, ProgressServiceError> {
        let _guard = self.locks.acquire((user_id, course_id)).await;
        let mut progress = self.started(user_id, course_id).await?;
        progress.reset(self.clock.now());
        let cleared = self.progress.reset_course_progress(&progress).await?;
        info!(
            user_id = user_id.value(),
            course_id = course_id.value(),
            cleared_visits = cleared,
            "reset course progress"
        );
        Ok(progress)
    }

    /// Recompute completion from passed tests, or from visited sections when
    /// the course has no tests. A course with neither keeps its last value.
    ///
    /// The progress row is created on demand, so this can run straight after
    /// a test submission. Passing results recorded before a reset still count.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::CourseNotFound` for an unknown course.
    pub async fn recompute_course_completion(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<CourseProgress, ProgressServiceError> {
        self.ensure_course(course_id).await?;
        let _guard = self.locks.acquire((user_id, course_id)).await;

        let fresh = CourseProgress::start(user_id, course_id, self.clock.now());
        let mut progress = self.progress.ensure_course_progress(&fresh).await?;
        if let Some(percent) = self.completion(user_id, course_id).await? {
            if percent != progress.completion_percent() {
                progress.set_completion(percent);
                self.progress.save_course_progress(&progress).await?;
            }
        }
        Ok(progress)
    }

    async fn completion(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<u8>, ProgressServiceError> {
        let test_ids: Vec<TestId> = self
            .tests
            .tests_for_course(course_id)
            .await?
            .iter()
            .map(|t| t.id())
            .collect();

        let basis = if test_ids.is_empty() {
            let total = self.sections.sections_for_course(course_id).await?.len() as u64;
            let visited = self
                .progress
                .section_progress_for_course(user_id, course_id)
                .await?
                .iter()
                .filter(|p| p.visited)
                .count() as u64;
            CompletionBasis::select(0, 0, visited, total)
        } else {
            let passed = self.results.passed_tests(user_id, &test_ids).await?.len() as u64;
            CompletionBasis::select(passed, test_ids.len() as u64, 0, 0)
        };

        let percent = basis.percent();
        debug!(
            user_id = user_id.value(),
            course_id = course_id.value(),
            ?basis,
            ?percent,
            "computed completion"
        );
        Ok(percent)
    }

    /// Aggregate counts and mean completion over all of a user's courses.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Storage` if repository access fails.
    pub async fn user_stats(&self, user_id: UserId) -> Result<UserStats, ProgressServiceError> {
        let rows = self.progress.list_course_progress(user_id).await?;
        Ok(UserStats::from_progress(&rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;
    use course_core::model::{Section, SectionId};
    use course_core::time::fixed_clock;
    use storage::repository::{InMemoryRepository, NewCourseRecord, NewSectionRecord};

    struct Fixture {
        repo: InMemoryRepository,
        service: ProgressService,
        course_id: CourseId,
    }

    fn service_with(repo: &InMemoryRepository, clock: Clock) -> ProgressService {
        ProgressService::new(
            clock,
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
        )
    }

    async fn fixture(sections: usize) -> (Fixture, Vec<SectionId>) {
        let repo = InMemoryRepository::new();
        let course_id = repo
            .insert_course(NewCourseRecord {
                title: "Rust".into(),
                category: "programming".into(),
                is_published: true,
                order_index: 0,
                created_at: fixed_clock().now(),
            })
            .await
            .unwrap();
        let mut ids = Vec::new();
        for i in 0..sections {
            let draft = Section::new(
                SectionId::new(0),
                course_id,
                None,
                format!("S{i}"),
                None,
                i as i64,
                fixed_clock().now(),
            )
            .unwrap();
            ids.push(
                repo.insert_section(NewSectionRecord::from_section(&draft))
                    .await
                    .unwrap(),
            );
        }
        let service = service_with(&repo, fixed_clock());
        (
            Fixture {
                repo,
                service,
                course_id,
            },
            ids,
        )
    }

    #[tokio::test]
    async fn toggle_requires_started_progress() {
        let (f, ids) = fixture(2).await;
        let err = f
            .service
            .toggle_section_visited(UserId::new(1), ids[0], true)
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressServiceError::ProgressNotStarted { .. }));

        let err = f
            .service
            .toggle_section_visited(UserId::new(1), SectionId::new(999), true)
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressServiceError::SectionNotFound(_)));
    }

    #[tokio::test]
    async fn toggle_is_idempotent_and_clears_timestamp() {
        let (f, ids) = fixture(4).await;
        let user = UserId::new(1);
        f.service
            .get_or_create_course_progress(user, f.course_id)
            .await
            .unwrap();

        let once = f.service.toggle_section_visited(user, ids[0], true).await.unwrap();
        let twice = f.service.toggle_section_visited(user, ids[0], true).await.unwrap();
        assert_eq!(once.section, twice.section);
        assert_eq!(twice.section.visited_at, Some(fixed_clock().now()));
        assert_eq!(twice.course.completion_percent(), 25);
        assert_eq!(twice.course.last_section_id(), Some(ids[0]));

        let off = f.service.toggle_section_visited(user, ids[0], false).await.unwrap();
        assert!(!off.section.visited);
        assert_eq!(off.section.visited_at, None);
        assert_eq!(off.course.last_section_id(), None);
        assert_eq!(off.course.completion_percent(), 0);
    }

    #[tokio::test]
    async fn section_based_completion_reaches_100() {
        let (f, ids) = fixture(4).await;
        let user = UserId::new(2);
        f.service
            .get_or_create_course_progress(user, f.course_id)
            .await
            .unwrap();
        for id in &ids {
            f.service.toggle_section_visited(user, *id, true).await.unwrap();
        }
        let progress = f
            .service
            .get_or_create_course_progress(user, f.course_id)
            .await
            .unwrap();
        assert_eq!(progress.completion_percent(), 100);

        let visits = f
            .service
            .section_progress_for_course(user, f.course_id)
            .await
            .unwrap();
        assert_eq!(visits.len(), 4);
        assert!(visits.iter().all(|v| v.progress.visited));
    }

    #[tokio::test]
    async fn empty_course_keeps_last_completion() {
        let (f, _) = fixture(0).await;
        let user = UserId::new(3);
        let mut row = f
            .service
            .get_or_create_course_progress(user, f.course_id)
            .await
            .unwrap();
        row.set_completion(40);
        f.repo.save_course_progress(&row).await.unwrap();

        let recomputed = f
            .service
            .recompute_course_completion(user, f.course_id)
            .await
            .unwrap();
        assert_eq!(recomputed.completion_percent(), 40);
    }

    #[tokio::test]
    async fn reset_zeroes_progress_and_forgets_visits() {
        let (f, ids) = fixture(2).await;
        let user = UserId::new(4);
        f.service
            .get_or_create_course_progress(user, f.course_id)
            .await
            .unwrap();
        for id in &ids {
            f.service.toggle_section_visited(user, *id, true).await.unwrap();
        }

        let later = service_with(&f.repo, fixed_clock().advanced(Duration::hours(2)));
        let reset = later.reset_course_progress(user, f.course_id).await.unwrap();
        assert_eq!(reset.completion_percent(), 0);
        assert_eq!(reset.last_section_id(), None);
        assert_eq!(reset.last_accessed_at(), fixed_clock().now() + Duration::hours(2));

        let visits = later
            .section_progress_for_course(user, f.course_id)
            .await
            .unwrap();
        assert!(visits.iter().all(|v| !v.progress.visited && v.progress.visited_at.is_none()));

        assert!(
            later
                .reset_course_progress(UserId::new(99), f.course_id)
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn listing_and_stats_follow_access_order() {
        let (f, _) = fixture(1).await;
        let user = UserId::new(5);
        let second = f
            .repo
            .insert_course(NewCourseRecord {
                title: "Go".into(),
                category: "programming".into(),
                is_published: true,
                order_index: 1,
                created_at: fixed_clock().now(),
            })
            .await
            .unwrap();

        f.service
            .get_or_create_course_progress(user, f.course_id)
            .await
            .unwrap();
        let later = service_with(&f.repo, fixed_clock().advanced(Duration::minutes(5)));
        let mut row = later.get_or_create_course_progress(user, second).await.unwrap();
        row.set_completion(100);
        f.repo.save_course_progress(&row).await.unwrap();

        let items = f.service.list_user_progress(user).await.unwrap();
        let titles: Vec<&str> = items.iter().map(|i| i.course_title.as_str()).collect();
        assert_eq!(titles, vec!["Go", "Rust"]);

        let stats = f.service.user_stats(user).await.unwrap();
        assert_eq!(stats.total_courses, 2);
        assert_eq!(stats.completed_courses, 1);
        assert_eq!(stats.in_progress_courses, 0);
        assert_eq!(stats.average_completion, 50);
    }
}
