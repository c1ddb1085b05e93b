use std::sync::Arc;

use course_core::model::{
    Course, CourseId, OptionDraft, Question, QuestionId, QuestionKind, Test, TestId, TestOwner,
    validate_option_drafts,
};
use storage::repository::{
    CourseRepository, NewCourseRecord, NewQuestionRecord, NewTestRecord, SectionRepository,
    TestRepository,
};
use tracing::{debug, info};

use crate::Clock;
use crate::error::CourseServiceError;
use crate::section_view::{TestView, load_test_view, published_views};

/// Input for `CourseService::create_course`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCourse {
    pub title: String,
    pub category: String,
    pub is_published: bool,
    /// Placed after the last course when omitted.
    pub order_index: Option<i64>,
}

/// Partial course update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoursePatch {
    pub title: Option<String>,
    pub category: Option<String>,
    pub is_published: Option<bool>,
    pub order_index: Option<i64>,
}

/// Input for `CourseService::create_test`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTest {
    pub owner: TestOwner,
    pub title: String,
    pub passing_score: u32,
    pub duration_minutes: u32,
    pub is_published: bool,
}

/// Input for `CourseService::add_question`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQuestion {
    pub text: String,
    pub kind: QuestionKind,
    pub points: u32,
    /// Appended after the last question when omitted.
    pub order_index: Option<i64>,
    pub options: Vec<OptionDraft>,
}

/// Course catalogue and test authoring.
#[derive(Clone)]
pub struct CourseService {
    clock: Clock,
    courses: Arc<dyn CourseRepository>,
    sections: Arc<dyn SectionRepository>,
    tests: Arc<dyn TestRepository>,
}

impl CourseService {
    #[must_use]
    pub fn new(
        clock: Clock,
        courses: Arc<dyn CourseRepository>,
        sections: Arc<dyn SectionRepository>,
        tests: Arc<dyn TestRepository>,
    ) -> Self {
        Self {
            clock,
            courses,
            sections,
            tests,
        }
    }

    /// Create a course.
    ///
    /// # Errors
    ///
    /// Returns `CourseServiceError::Invalid` for a blank title or category.
    pub async fn create_course(&self, input: NewCourse) -> Result<Course, CourseServiceError> {
        let order_index = match input.order_index {
            Some(index) => index,
            None => self
                .courses
                .list_courses()
                .await?
                .iter()
                .map(Course::order_index)
                .max()
                .map_or(0, |max| max.saturating_add(1)),
        };
        let draft = Course::new(
            CourseId::new(0),
            input.title,
            input.category,
            input.is_published,
            order_index,
            self.clock.now(),
        )?;
        let id = self
            .courses
            .insert_course(NewCourseRecord::from_course(&draft))
            .await?;
        info!(course_id = id.value(), order_index, "created course");
        self.get_course(id).await
    }

    /// # Errors
    ///
    /// Returns `CourseServiceError::CourseNotFound` for an unknown course.
    pub async fn get_course(&self, id: CourseId) -> Result<Course, CourseServiceError> {
        self.courses
            .get_course(id)
            .await?
            .ok_or(CourseServiceError::CourseNotFound(id))
    }

    /// All courses ordered by `(order_index, id)`.
    ///
    /// # Errors
    ///
    /// Returns `CourseServiceError::Storage` if repository access fails.
    pub async fn list_courses(&self) -> Result<Vec<Course>, CourseServiceError> {
        let courses = self.courses.list_courses().await?;
        debug!(count = courses.len(), "listing courses");
        Ok(courses)
    }

    /// # Errors
    ///
    /// Returns `CourseNotFound` for an unknown course and `Invalid` when the
    /// patch blanks the title or category.
    pub async fn update_course(
        &self,
        id: CourseId,
        patch: CoursePatch,
    ) -> Result<Course, CourseServiceError> {
        let mut course = self.get_course(id).await?;
        if let Some(title) = patch.title {
            course.rename(title)?;
        }
        if let Some(category) = patch.category {
            course.recategorize(category)?;
        }
        if let Some(is_published) = patch.is_published {
            course.set_published(is_published);
        }
        if let Some(order_index) = patch.order_index {
            course.set_order_index(order_index);
        }
        self.courses.update_course(&course).await?;
        info!(course_id = id.value(), "updated course");
        Ok(course)
    }

    /// Delete a course with its sections, tests and progress rows.
    ///
    /// # Errors
    ///
    /// Returns `CourseServiceError::CourseNotFound` for an unknown course.
    pub async fn delete_course(&self, id: CourseId) -> Result<(), CourseServiceError> {
        self.get_course(id).await?;
        self.courses.delete_course(id).await?;
        info!(course_id = id.value(), "deleted course");
        Ok(())
    }

    /// Create a test owned by a course or a section.
    ///
    /// # Errors
    ///
    /// Returns `CourseNotFound`/`SectionNotFound` for a missing owner and
    /// `Invalid` for a blank title, a passing score above 100 or a zero duration.
    pub async fn create_test(&self, input: NewTest) -> Result<Test, CourseServiceError> {
        match input.owner {
            TestOwner::Course(course_id) => {
                self.get_course(course_id).await?;
            }
            TestOwner::Section(section_id) => {
                self.sections
                    .get_section(section_id)
                    .await?
                    .ok_or(CourseServiceError::SectionNotFound(section_id))?;
            }
        }
        let draft = Test::new(
            TestId::new(0),
            input.owner,
            input.title,
            input.passing_score,
            input.duration_minutes,
            input.is_published,
            self.clock.now(),
        )?;
        let id = self.tests.insert_test(NewTestRecord::from_test(&draft)).await?;
        info!(test_id = id.value(), owner = ?input.owner, "created test");
        self.tests
            .get_test(id)
            .await?
            .ok_or(CourseServiceError::TestNotFound(id))
    }

    /// Add a question with its options to a test.
    ///
    /// # Errors
    ///
    /// Returns `TestNotFound` for an unknown test and `Invalid` when the text
    /// is blank or the options do not fit the question kind.
    pub async fn add_question(
        &self,
        test_id: TestId,
        input: NewQuestion,
    ) -> Result<Question, CourseServiceError> {
        self.tests
            .get_test(test_id)
            .await?
            .ok_or(CourseServiceError::TestNotFound(test_id))?;
        validate_option_drafts(input.kind, &input.options)?;

        let order_index = match input.order_index {
            Some(index) => index,
            None => self
                .tests
                .questions_for_test(test_id)
                .await?
                .iter()
                .map(Question::order_index)
                .max()
                .map_or(0, |max| max.saturating_add(1)),
        };
        let draft = Question::new(
            QuestionId::new(0),
            test_id,
            input.text,
            input.kind,
            input.points,
            order_index,
        )?;
        let id = self
            .tests
            .insert_question(NewQuestionRecord {
                test_id,
                text: draft.text().to_owned(),
                kind: draft.kind(),
                points: draft.points(),
                order_index,
                options: input.options,
            })
            .await?;
        info!(test_id = test_id.value(), question_id = id.value(), "added question");
        Ok(Question::new(
            id,
            test_id,
            draft.text(),
            draft.kind(),
            draft.points(),
            order_index,
        )?)
    }

    /// One test, redacted for the reader.
    ///
    /// # Errors
    ///
    /// Returns `CourseServiceError::TestNotFound` for an unknown test.
    pub async fn get_test(&self, id: TestId) -> Result<TestView, CourseServiceError> {
        let test = self
            .tests
            .get_test(id)
            .await?
            .ok_or(CourseServiceError::TestNotFound(id))?;
        Ok(load_test_view(self.tests.as_ref(), test).await?)
    }

    /// Published tests attached directly to the course.
    ///
    /// # Errors
    ///
    /// Returns `CourseServiceError::CourseNotFound` for an unknown course.
    pub async fn published_tests(
        &self,
        course_id: CourseId,
    ) -> Result<Vec<TestView>, CourseServiceError> {
        self.get_course(course_id).await?;
        let tests = self.tests.tests_for_course(course_id).await?;
        let course_tests = tests
            .into_iter()
            .filter(|t| t.owner() == TestOwner::Course(course_id));
        Ok(published_views(self.tests.as_ref(), course_tests).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use course_core::model::{AssessmentError, CourseError, Section, SectionId};
    use course_core::time::fixed_clock;
    use storage::repository::{InMemoryRepository, NewSectionRecord};

    fn service(repo: &InMemoryRepository) -> CourseService {
        CourseService::new(
            fixed_clock(),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
        )
    }

    fn course(title: &str) -> NewCourse {
        NewCourse {
            title: title.into(),
            category: "programming".into(),
            is_published: true,
            order_index: None,
        }
    }

    fn test_input(owner: TestOwner, is_published: bool) -> NewTest {
        NewTest {
            owner,
            title: "Quiz".into(),
            passing_score: 70,
            duration_minutes: 10,
            is_published,
        }
    }

    fn single_choice(text: &str) -> NewQuestion {
        NewQuestion {
            text: text.into(),
            kind: QuestionKind::SingleChoice,
            points: 1,
            order_index: None,
            options: vec![OptionDraft::new("yes", true), OptionDraft::new("no", false)],
        }
    }

    #[tokio::test]
    async fn courses_are_appended_and_validated() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo);
        let a = svc.create_course(course("A")).await.unwrap();
        let b = svc.create_course(course("B")).await.unwrap();
        assert_eq!(a.order_index(), 0);
        assert_eq!(b.order_index(), 1);

        let err = svc.create_course(course("  ")).await.unwrap_err();
        assert!(matches!(
            err,
            CourseServiceError::Invalid(course_core::Error::Course(CourseError::EmptyTitle))
        ));

        let titles: Vec<String> = svc
            .list_courses()
            .await
            .unwrap()
            .iter()
            .map(|c| c.title().to_owned())
            .collect();
        assert_eq!(titles, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn appended_order_index_saturates_at_the_maximum() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo);
        let mut last = course("Last");
        last.order_index = Some(i64::MAX);
        svc.create_course(last).await.unwrap();
        let next = svc.create_course(course("Next")).await.unwrap();
        assert_eq!(next.order_index(), i64::MAX);

        let t = svc
            .create_test(test_input(TestOwner::Course(next.id()), true))
            .await
            .unwrap();
        let mut q = single_choice("Q1");
        q.order_index = Some(i64::MAX);
        svc.add_question(t.id(), q).await.unwrap();
        let appended = svc.add_question(t.id(), single_choice("Q2")).await.unwrap();
        assert_eq!(appended.order_index(), i64::MAX);
    }

    #[tokio::test]
    async fn update_and_delete_course() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo);
        let c = svc.create_course(course("A")).await.unwrap();

        let updated = svc
            .update_course(
                c.id(),
                CoursePatch {
                    title: Some("Advanced A".into()),
                    is_published: Some(false),
                    ..CoursePatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.title(), "Advanced A");
        assert!(!updated.is_published());
        assert_eq!(updated.category(), "programming");

        svc.delete_course(c.id()).await.unwrap();
        assert!(svc.get_course(c.id()).await.unwrap_err().is_not_found());
        assert!(svc.delete_course(c.id()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn tests_need_an_existing_owner_and_valid_fields() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo);
        let c = svc.create_course(course("A")).await.unwrap();

        let err = svc
            .create_test(test_input(TestOwner::Section(SectionId::new(42)), true))
            .await
            .unwrap_err();
        assert!(matches!(err, CourseServiceError::SectionNotFound(_)));

        let mut bad = test_input(TestOwner::Course(c.id()), true);
        bad.passing_score = 101;
        let err = svc.create_test(bad).await.unwrap_err();
        assert!(matches!(
            err,
            CourseServiceError::Invalid(course_core::Error::Assessment(
                AssessmentError::InvalidPassingScore(101)
            ))
        ));

        let ok = svc
            .create_test(test_input(TestOwner::Course(c.id()), true))
            .await
            .unwrap();
        assert_eq!(ok.passing_score(), 70);
    }

    #[tokio::test]
    async fn questions_are_validated_and_ordered() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo);
        let c = svc.create_course(course("A")).await.unwrap();
        let t = svc
            .create_test(test_input(TestOwner::Course(c.id()), true))
            .await
            .unwrap();

        let mut two_correct = single_choice("Q");
        two_correct.options[1].is_correct = true;
        assert!(svc.add_question(t.id(), two_correct).await.is_err());

        let q1 = svc.add_question(t.id(), single_choice("Q1")).await.unwrap();
        let q2 = svc.add_question(t.id(), single_choice("Q2")).await.unwrap();
        assert_eq!(q1.order_index(), 0);
        assert_eq!(q2.order_index(), 1);

        let view = svc.get_test(t.id()).await.unwrap();
        let texts: Vec<&str> = view.questions.iter().map(|q| q.question.text()).collect();
        assert_eq!(texts, vec!["Q1", "Q2"]);
        assert_eq!(view.questions[0].options.len(), 2);

        assert!(
            svc.add_question(TestId::new(999), single_choice("Q"))
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn published_tests_exclude_drafts_and_section_tests() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo);
        let c = svc.create_course(course("A")).await.unwrap();
        let section = Section::new(
            SectionId::new(0),
            c.id(),
            None,
            "Intro",
            None,
            0,
            fixed_clock().now(),
        )
        .unwrap();
        let section_id = repo
            .insert_section(NewSectionRecord::from_section(&section))
            .await
            .unwrap();

        let published = svc
            .create_test(test_input(TestOwner::Course(c.id()), true))
            .await
            .unwrap();
        svc.create_test(test_input(TestOwner::Course(c.id()), false))
            .await
            .unwrap();
        svc.create_test(test_input(TestOwner::Section(section_id), true))
            .await
            .unwrap();

        let views = svc.published_tests(c.id()).await.unwrap();
        let ids: Vec<TestId> = views.iter().map(|v| v.test.id()).collect();
        assert_eq!(ids, vec![published.id()]);
    }
}
