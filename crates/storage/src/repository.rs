use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use course_core::model::{
    AnswerOption, AnswerSheet, Course, CourseId, CourseProgress, OptionDraft, OptionId, Question,
    QuestionId, QuestionKind, Section, SectionId, SectionProgress, Test, TestId, TestOwner,
    TestResult, TestResultId, UserId,
};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

//
// ─── RECORDS ───────────────────────────────────────────────────────────────────
//

/// Insert shape for a course; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewCourseRecord {
    pub title: String,
    pub category: String,
    pub is_published: bool,
    pub order_index: i64,
    pub created_at: DateTime<Utc>,
}

impl NewCourseRecord {
    #[must_use]
    pub fn from_course(course: &Course) -> Self {
        Self {
            title: course.title().to_owned(),
            category: course.category().to_owned(),
            is_published: course.is_published(),
            order_index: course.order_index(),
            created_at: course.created_at(),
        }
    }
}

/// Insert shape for a section; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewSectionRecord {
    pub course_id: CourseId,
    pub parent_id: Option<SectionId>,
    pub title: String,
    pub content: Option<String>,
    pub order_index: i64,
    pub created_at: DateTime<Utc>,
}

impl NewSectionRecord {
    #[must_use]
    pub fn from_section(section: &Section) -> Self {
        Self {
            course_id: section.course_id(),
            parent_id: section.parent_id(),
            title: section.title().to_owned(),
            content: section.content().map(str::to_owned),
            order_index: section.order_index(),
            created_at: section.created_at(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewTestRecord {
    pub owner: TestOwner,
    pub title: String,
    pub passing_score: u8,
    pub duration_minutes: u32,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
}

impl NewTestRecord {
    #[must_use]
    pub fn from_test(test: &Test) -> Self {
        Self {
            owner: test.owner(),
            title: test.title().to_owned(),
            passing_score: test.passing_score(),
            duration_minutes: test.duration_minutes(),
            is_published: test.is_published(),
            created_at: test.created_at(),
        }
    }
}

/// A question together with its options, inserted as one unit.
///
/// Option order follows the order of `options`.
#[derive(Debug, Clone)]
pub struct NewQuestionRecord {
    pub test_id: TestId,
    pub text: String,
    pub kind: QuestionKind,
    pub points: u32,
    pub order_index: i64,
    pub options: Vec<OptionDraft>,
}

#[derive(Debug, Clone)]
pub struct NewTestResultRecord {
    pub user_id: UserId,
    pub test_id: TestId,
    pub score: u8,
    pub passed: bool,
    pub answers: AnswerSheet,
    pub created_at: DateTime<Utc>,
}

/// Target position of a section inside its course.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionPlacement {
    pub section_id: SectionId,
    pub parent_id: Option<SectionId>,
    pub order_index: i64,
}

//
// ─── CONTRACTS ─────────────────────────────────────────────────────────────────
//

#[async_trait]
pub trait CourseRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the course cannot be stored.
    async fn insert_course(&self, course: NewCourseRecord) -> Result<CourseId, StorageError>;

    /// Overwrite the mutable fields of an existing course.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the course does not exist.
    async fn update_course(&self, course: &Course) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_course(&self, id: CourseId) -> Result<Option<Course>, StorageError>;

    /// Courses ordered by `(order_index, id)`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_courses(&self) -> Result<Vec<Course>, StorageError>;

    /// Delete a course with everything it owns, atomically.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the course does not exist.
    async fn delete_course(&self, id: CourseId) -> Result<(), StorageError>;
}

#[async_trait]
pub trait SectionRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the section cannot be stored.
    async fn insert_section(&self, section: NewSectionRecord) -> Result<SectionId, StorageError>;

    /// Overwrite title, content and ordering index. The stored parent is
    /// kept; re-parenting goes through [`SectionRepository::apply_placements`].
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the section does not exist.
    async fn update_section(&self, section: &Section) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_section(&self, id: SectionId) -> Result<Option<Section>, StorageError>;

    /// Every section of a course, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn sections_for_course(&self, course_id: CourseId) -> Result<Vec<Section>, StorageError>;

    /// Apply all placements or none of them.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if any section is missing; nothing is
    /// written in that case.
    async fn apply_placements(&self, placements: &[SectionPlacement]) -> Result<(), StorageError>;

    /// Delete a section, its descendants, their tests and visit records in one
    /// transaction. Returns the number of sections removed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the section does not exist.
    async fn delete_section_cascade(&self, id: SectionId) -> Result<u64, StorageError>;
}

#[async_trait]
pub trait TestRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the test cannot be stored.
    async fn insert_test(&self, test: NewTestRecord) -> Result<TestId, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_test(&self, id: TestId) -> Result<Option<Test>, StorageError>;

    /// Course-level tests plus tests owned by any section of the course,
    /// published or not, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn tests_for_course(&self, course_id: CourseId) -> Result<Vec<Test>, StorageError>;

    /// Insert a question and its options atomically.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the test does not exist.
    async fn insert_question(&self, question: NewQuestionRecord)
    -> Result<QuestionId, StorageError>;

    /// Questions of a test ordered by `(order_index, id)`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn questions_for_test(&self, test_id: TestId) -> Result<Vec<Question>, StorageError>;

    /// Options of every question of a test ordered by `(order_index, id)`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn options_for_test(&self, test_id: TestId) -> Result<Vec<AnswerOption>, StorageError>;
}

#[async_trait]
pub trait TestResultRepository: Send + Sync {
    /// Append an immutable result.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the test does not exist.
    async fn append_result(&self, result: NewTestResultRecord)
    -> Result<TestResult, StorageError>;

    /// A user's results, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn results_for_user(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<TestResult>, StorageError>;

    /// The subset of `test_ids` with at least one passing result for the user.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn passed_tests(
        &self,
        user_id: UserId,
        test_ids: &[TestId],
    ) -> Result<HashSet<TestId>, StorageError>;
}

#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Insert `fresh` unless a row for its (user, course) already exists;
    /// returns the stored row either way.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn ensure_course_progress(
        &self,
        fresh: &CourseProgress,
    ) -> Result<CourseProgress, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_course_progress(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<CourseProgress>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if no row exists for (user, course).
    async fn save_course_progress(&self, progress: &CourseProgress) -> Result<(), StorageError>;

    /// A user's rows, most recently accessed first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_course_progress(&self, user_id: UserId)
    -> Result<Vec<CourseProgress>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the section does not exist.
    async fn upsert_section_progress(&self, progress: &SectionProgress)
    -> Result<(), StorageError>;

    /// Stored visit rows for the course's sections (untouched sections have none).
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn section_progress_for_course(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Vec<SectionProgress>, StorageError>;

    /// Delete the user's visit rows for the course and store `progress`, in one
    /// transaction. Returns the number of visit rows deleted.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if no progress row exists.
    async fn reset_course_progress(&self, progress: &CourseProgress) -> Result<u64, StorageError>;
}

//
// ─── IN-MEMORY ─────────────────────────────────────────────────────────────────
//

#[derive(Default)]
struct MemoryState {
    last_id: u64,
    courses: BTreeMap<CourseId, Course>,
    sections: BTreeMap<SectionId, Section>,
    tests: BTreeMap<TestId, Test>,
    questions: BTreeMap<QuestionId, Question>,
    options: BTreeMap<OptionId, AnswerOption>,
    results: Vec<TestResult>,
    course_progress: HashMap<(UserId, CourseId), CourseProgress>,
    section_progress: HashMap<(UserId, SectionId), SectionProgress>,
}

impl MemoryState {
    fn allocate(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }

    fn course_of_test(&self, test: &Test) -> Option<CourseId> {
        match test.owner() {
            TestOwner::Course(course_id) => Some(course_id),
            TestOwner::Section(section_id) => self.sections.get(&section_id).map(Section::course_id),
        }
    }

    /// `root` and everything below it. Revisits are skipped, so a corrupt
    /// cyclic forest still terminates.
    fn subtree(&self, root: SectionId) -> Vec<SectionId> {
        let mut out = vec![root];
        let mut seen = HashSet::from([root]);
        let mut cursor = 0;
        while cursor < out.len() {
            let current = out[cursor];
            for child in self.sections.values().filter(|s| s.parent_id() == Some(current)) {
                if seen.insert(child.id()) {
                    out.push(child.id());
                }
            }
            cursor += 1;
        }
        out
    }

    fn remove_tests(&mut self, doomed: &HashSet<TestId>) {
        self.tests.retain(|id, _| !doomed.contains(id));
        let questions: HashSet<QuestionId> = self
            .questions
            .values()
            .filter(|q| doomed.contains(&q.test_id()))
            .map(Question::id)
            .collect();
        self.questions.retain(|id, _| !questions.contains(id));
        self.options
            .retain(|_, o| !questions.contains(&o.question_id()));
        self.results.retain(|r| !doomed.contains(&r.test_id()));
    }

    fn remove_sections(&mut self, ids: &[SectionId]) {
        let doomed_sections: HashSet<SectionId> = ids.iter().copied().collect();
        let doomed_tests: HashSet<TestId> = self
            .tests
            .values()
            .filter(|t| matches!(t.owner(), TestOwner::Section(s) if doomed_sections.contains(&s)))
            .map(Test::id)
            .collect();
        self.remove_tests(&doomed_tests);
        self.sections.retain(|id, _| !doomed_sections.contains(id));
        self.section_progress
            .retain(|(_, section), _| !doomed_sections.contains(section));
        for progress in self.course_progress.values_mut() {
            for id in ids {
                progress.forget_section(*id);
            }
        }
    }
}

fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

/// Simple in-memory repository implementation for testing and prototyping.
///
/// All collections live behind one mutex, so every trait method is atomic.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StorageError> {
        self.state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

#[async_trait]
impl CourseRepository for InMemoryRepository {
    async fn insert_course(&self, course: NewCourseRecord) -> Result<CourseId, StorageError> {
        let mut guard = self.lock()?;
        let id = CourseId::new(guard.allocate());
        let stored = Course::new(
            id,
            course.title,
            course.category,
            course.is_published,
            course.order_index,
            course.created_at,
        )
        .map_err(ser)?;
        guard.courses.insert(id, stored);
        Ok(id)
    }

    async fn update_course(&self, course: &Course) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let slot = guard
            .courses
            .get_mut(&course.id())
            .ok_or(StorageError::NotFound)?;
        *slot = course.clone();
        Ok(())
    }

    async fn get_course(&self, id: CourseId) -> Result<Option<Course>, StorageError> {
        Ok(self.lock()?.courses.get(&id).cloned())
    }

    async fn list_courses(&self) -> Result<Vec<Course>, StorageError> {
        let guard = self.lock()?;
        let mut courses: Vec<Course> = guard.courses.values().cloned().collect();
        courses.sort_by_key(|c| (c.order_index(), c.id()));
        Ok(courses)
    }

    async fn delete_course(&self, id: CourseId) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        if guard.courses.remove(&id).is_none() {
            return Err(StorageError::NotFound);
        }
        let sections: Vec<SectionId> = guard
            .sections
            .values()
            .filter(|s| s.course_id() == id)
            .map(Section::id)
            .collect();
        guard.remove_sections(&sections);
        let course_tests: HashSet<TestId> = guard
            .tests
            .values()
            .filter(|t| t.owner() == TestOwner::Course(id))
            .map(Test::id)
            .collect();
        guard.remove_tests(&course_tests);
        guard.course_progress.retain(|(_, course), _| *course != id);
        Ok(())
    }
}

#[async_trait]
impl SectionRepository for InMemoryRepository {
    async fn insert_section(&self, section: NewSectionRecord) -> Result<SectionId, StorageError> {
        let mut guard = self.lock()?;
        if !guard.courses.contains_key(&section.course_id) {
            return Err(StorageError::NotFound);
        }
        if let Some(parent) = section.parent_id {
            if !guard.sections.contains_key(&parent) {
                return Err(StorageError::NotFound);
            }
        }
        let id = SectionId::new(guard.allocate());
        let stored = Section::new(
            id,
            section.course_id,
            section.parent_id,
            section.title,
            section.content,
            section.order_index,
            section.created_at,
        )
        .map_err(ser)?;
        guard.sections.insert(id, stored);
        Ok(id)
    }

    async fn update_section(&self, section: &Section) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let slot = guard
            .sections
            .get_mut(&section.id())
            .ok_or(StorageError::NotFound)?;
        // the parent only changes through `apply_placements`
        let mut updated = section.clone();
        updated
            .relocate(slot.parent_id(), section.order_index())
            .map_err(|_| StorageError::Conflict)?;
        *slot = updated;
        Ok(())
    }

    async fn get_section(&self, id: SectionId) -> Result<Option<Section>, StorageError> {
        Ok(self.lock()?.sections.get(&id).cloned())
    }

    async fn sections_for_course(&self, course_id: CourseId) -> Result<Vec<Section>, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .sections
            .values()
            .filter(|s| s.course_id() == course_id)
            .cloned()
            .collect())
    }

    async fn apply_placements(&self, placements: &[SectionPlacement]) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        // Stage every change before touching shared state.
        let mut staged = Vec::with_capacity(placements.len());
        for placement in placements {
            let mut section = guard
                .sections
                .get(&placement.section_id)
                .cloned()
                .ok_or(StorageError::NotFound)?;
            if let Some(parent) = placement.parent_id {
                if !guard.sections.contains_key(&parent) {
                    return Err(StorageError::NotFound);
                }
            }
            section
                .relocate(placement.parent_id, placement.order_index)
                .map_err(|_| StorageError::Conflict)?;
            staged.push(section);
        }
        for section in staged {
            guard.sections.insert(section.id(), section);
        }
        Ok(())
    }

    async fn delete_section_cascade(&self, id: SectionId) -> Result<u64, StorageError> {
        let mut guard = self.lock()?;
        if !guard.sections.contains_key(&id) {
            return Err(StorageError::NotFound);
        }
        let doomed = guard.subtree(id);
        guard.remove_sections(&doomed);
        Ok(doomed.len() as u64)
    }
}

#[async_trait]
impl TestRepository for InMemoryRepository {
    async fn insert_test(&self, test: NewTestRecord) -> Result<TestId, StorageError> {
        let mut guard = self.lock()?;
        let owner_exists = match test.owner {
            TestOwner::Course(id) => guard.courses.contains_key(&id),
            TestOwner::Section(id) => guard.sections.contains_key(&id),
        };
        if !owner_exists {
            return Err(StorageError::NotFound);
        }
        let id = TestId::new(guard.allocate());
        let stored = Test::new(
            id,
            test.owner,
            test.title,
            u32::from(test.passing_score),
            test.duration_minutes,
            test.is_published,
            test.created_at,
        )
        .map_err(ser)?;
        guard.tests.insert(id, stored);
        Ok(id)
    }

    async fn get_test(&self, id: TestId) -> Result<Option<Test>, StorageError> {
        Ok(self.lock()?.tests.get(&id).cloned())
    }

    async fn tests_for_course(&self, course_id: CourseId) -> Result<Vec<Test>, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .tests
            .values()
            .filter(|t| guard.course_of_test(t) == Some(course_id))
            .cloned()
            .collect())
    }

    async fn insert_question(
        &self,
        question: NewQuestionRecord,
    ) -> Result<QuestionId, StorageError> {
        let mut guard = self.lock()?;
        if !guard.tests.contains_key(&question.test_id) {
            return Err(StorageError::NotFound);
        }
        let id = QuestionId::new(guard.allocate());
        let stored = Question::new(
            id,
            question.test_id,
            question.text,
            question.kind,
            question.points,
            question.order_index,
        )
        .map_err(ser)?;
        let mut options = Vec::with_capacity(question.options.len());
        for (index, draft) in question.options.into_iter().enumerate() {
            let option_id = OptionId::new(guard.allocate());
            options.push(
                AnswerOption::new(option_id, id, draft.text, draft.is_correct, index as i64)
                    .map_err(ser)?,
            );
        }
        guard.questions.insert(id, stored);
        for option in options {
            guard.options.insert(option.id(), option);
        }
        Ok(id)
    }

    async fn questions_for_test(&self, test_id: TestId) -> Result<Vec<Question>, StorageError> {
        let guard = self.lock()?;
        let mut questions: Vec<Question> = guard
            .questions
            .values()
            .filter(|q| q.test_id() == test_id)
            .cloned()
            .collect();
        questions.sort_by_key(|q| (q.order_index(), q.id()));
        Ok(questions)
    }

    async fn options_for_test(&self, test_id: TestId) -> Result<Vec<AnswerOption>, StorageError> {
        let guard = self.lock()?;
        let mut options: Vec<AnswerOption> = guard
            .options
            .values()
            .filter(|o| {
                guard
                    .questions
                    .get(&o.question_id())
                    .is_some_and(|q| q.test_id() == test_id)
            })
            .cloned()
            .collect();
        options.sort_by_key(|o| (o.order_index(), o.id()));
        Ok(options)
    }
}

#[async_trait]
impl TestResultRepository for InMemoryRepository {
    async fn append_result(
        &self,
        result: NewTestResultRecord,
    ) -> Result<TestResult, StorageError> {
        let mut guard = self.lock()?;
        if !guard.tests.contains_key(&result.test_id) {
            return Err(StorageError::NotFound);
        }
        let id = TestResultId::new(guard.allocate());
        let stored = TestResult::from_persisted(
            id,
            result.user_id,
            result.test_id,
            u32::from(result.score),
            result.passed,
            result.answers,
            result.created_at,
        )
        .map_err(ser)?;
        guard.results.push(stored.clone());
        Ok(stored)
    }

    async fn results_for_user(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<TestResult>, StorageError> {
        let guard = self.lock()?;
        let mut results: Vec<TestResult> = guard
            .results
            .iter()
            .filter(|r| r.user_id() == user_id)
            .cloned()
            .collect();
        results.sort_by(|a, b| b.created_at().cmp(&a.created_at()).then(b.id().cmp(&a.id())));
        results.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(results)
    }

    async fn passed_tests(
        &self,
        user_id: UserId,
        test_ids: &[TestId],
    ) -> Result<HashSet<TestId>, StorageError> {
        let guard = self.lock()?;
        let wanted: HashSet<TestId> = test_ids.iter().copied().collect();
        Ok(guard
            .results
            .iter()
            .filter(|r| r.user_id() == user_id && r.passed() && wanted.contains(&r.test_id()))
            .map(TestResult::test_id)
            .collect())
    }
}

#[async_trait]
impl ProgressRepository for InMemoryRepository {
    async fn ensure_course_progress(
        &self,
        fresh: &CourseProgress,
    ) -> Result<CourseProgress, StorageError> {
        let mut guard = self.lock()?;
        if !guard.courses.contains_key(&fresh.course_id()) {
            return Err(StorageError::NotFound);
        }
        let stored = guard
            .course_progress
            .entry((fresh.user_id(), fresh.course_id()))
            .or_insert_with(|| fresh.clone());
        Ok(stored.clone())
    }

    async fn get_course_progress(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<CourseProgress>, StorageError> {
        Ok(self
            .lock()?
            .course_progress
            .get(&(user_id, course_id))
            .cloned())
    }

    async fn save_course_progress(&self, progress: &CourseProgress) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let slot = guard
            .course_progress
            .get_mut(&(progress.user_id(), progress.course_id()))
            .ok_or(StorageError::NotFound)?;
        *slot = progress.clone();
        Ok(())
    }

    async fn list_course_progress(
        &self,
        user_id: UserId,
    ) -> Result<Vec<CourseProgress>, StorageError> {
        let guard = self.lock()?;
        let mut rows: Vec<CourseProgress> = guard
            .course_progress
            .values()
            .filter(|p| p.user_id() == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.last_accessed_at()
                .cmp(&a.last_accessed_at())
                .then(a.course_id().cmp(&b.course_id()))
        });
        Ok(rows)
    }

    async fn upsert_section_progress(
        &self,
        progress: &SectionProgress,
    ) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        if !guard.sections.contains_key(&progress.section_id) {
            return Err(StorageError::NotFound);
        }
        guard
            .section_progress
            .insert((progress.user_id, progress.section_id), progress.clone());
        Ok(())
    }

    async fn section_progress_for_course(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Vec<SectionProgress>, StorageError> {
        let guard = self.lock()?;
        let mut rows: Vec<SectionProgress> = guard
            .section_progress
            .values()
            .filter(|p| {
                p.user_id == user_id
                    && guard
                        .sections
                        .get(&p.section_id)
                        .is_some_and(|s| s.course_id() == course_id)
            })
            .cloned()
            .collect();
        rows.sort_by_key(|p| p.section_id);
        Ok(rows)
    }

    async fn reset_course_progress(&self, progress: &CourseProgress) -> Result<u64, StorageError> {
        let mut guard = self.lock()?;
        let key = (progress.user_id(), progress.course_id());
        if !guard.course_progress.contains_key(&key) {
            return Err(StorageError::NotFound);
        }
        let course_sections: HashSet<SectionId> = guard
            .sections
            .values()
            .filter(|s| s.course_id() == progress.course_id())
            .map(Section::id)
            .collect();
        let before = guard.section_progress.len();
        guard.section_progress.retain(|(user, section), _| {
            *user != progress.user_id() || !course_sections.contains(section)
        });
        let removed = (before - guard.section_progress.len()) as u64;
        guard.course_progress.insert(key, progress.clone());
        Ok(removed)
    }
}

//
// ─── AGGREGATE ─────────────────────────────────────────────────────────────────
//

/// Aggregates the repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub courses: Arc<dyn CourseRepository>,
    pub sections: Arc<dyn SectionRepository>,
    pub tests: Arc<dyn TestRepository>,
    pub results: Arc<dyn TestResultRepository>,
    pub progress: Arc<dyn ProgressRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        Self {
            courses: Arc::new(repo.clone()),
            sections: Arc::new(repo.clone()),
            tests: Arc::new(repo.clone()),
            results: Arc::new(repo.clone()),
            progress: Arc::new(repo),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use course_core::time::fixed_now;

    async fn seed_course(repo: &InMemoryRepository) -> CourseId {
        repo.insert_course(NewCourseRecord {
            title: "Rust".into(),
            category: "programming".into(),
            is_published: true,
            order_index: 0,
            created_at: fixed_now(),
        })
        .await
        .unwrap()
    }

    async fn seed_section(
        repo: &InMemoryRepository,
        course_id: CourseId,
        parent_id: Option<SectionId>,
        order_index: i64,
    ) -> SectionId {
        repo.insert_section(NewSectionRecord {
            course_id,
            parent_id,
            title: format!("S{order_index}"),
            content: None,
            order_index,
            created_at: fixed_now(),
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn apply_placements_is_all_or_nothing() {
        let repo = InMemoryRepository::new();
        let course = seed_course(&repo).await;
        let a = seed_section(&repo, course, None, 0).await;
        let b = seed_section(&repo, course, None, 1).await;

        let err = repo
            .apply_placements(&[
                SectionPlacement {
                    section_id: a,
                    parent_id: None,
                    order_index: 5,
                },
                SectionPlacement {
                    section_id: SectionId::new(999),
                    parent_id: None,
                    order_index: 0,
                },
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound));
        assert_eq!(repo.get_section(a).await.unwrap().unwrap().order_index(), 0);

        repo.apply_placements(&[SectionPlacement {
            section_id: b,
            parent_id: Some(a),
            order_index: 3,
        }])
        .await
        .unwrap();
        let moved = repo.get_section(b).await.unwrap().unwrap();
        assert_eq!(moved.parent_id(), Some(a));
        assert_eq!(moved.order_index(), 3);
    }

    #[tokio::test]
    async fn delete_section_cascade_removes_subtree_and_tests() {
        let repo = InMemoryRepository::new();
        let course = seed_course(&repo).await;
        let root = seed_section(&repo, course, None, 0).await;
        let child = seed_section(&repo, course, Some(root), 0).await;
        let grandchild = seed_section(&repo, course, Some(child), 0).await;
        let sibling = seed_section(&repo, course, None, 1).await;
        let test = repo
            .insert_test(NewTestRecord {
                owner: TestOwner::Section(child),
                title: "Quiz".into(),
                passing_score: 50,
                duration_minutes: 5,
                is_published: true,
                created_at: fixed_now(),
            })
            .await
            .unwrap();

        let removed = repo.delete_section_cascade(root).await.unwrap();
        assert_eq!(removed, 3);
        for id in [root, child, grandchild] {
            assert!(repo.get_section(id).await.unwrap().is_none());
        }
        assert!(repo.get_section(sibling).await.unwrap().is_some());
        assert!(repo.get_test(test).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ensure_course_progress_keeps_existing_row() {
        let repo = InMemoryRepository::new();
        let course = seed_course(&repo).await;
        let user = UserId::new(7);

        let mut first = repo
            .ensure_course_progress(&CourseProgress::start(user, course, fixed_now()))
            .await
            .unwrap();
        first.set_completion(40);
        repo.save_course_progress(&first).await.unwrap();

        let again = repo
            .ensure_course_progress(&CourseProgress::start(user, course, fixed_now()))
            .await
            .unwrap();
        assert_eq!(again.completion_percent(), 40);
    }

    #[tokio::test]
    async fn update_section_never_moves_the_section() {
        let repo = InMemoryRepository::new();
        let course = seed_course(&repo).await;
        let a = seed_section(&repo, course, None, 0).await;
        let b = seed_section(&repo, course, Some(a), 0).await;

        // a copy read before `b` was promoted to a root
        let mut stale = repo.get_section(b).await.unwrap().unwrap();
        repo.apply_placements(&[SectionPlacement {
            section_id: b,
            parent_id: None,
            order_index: 1,
        }])
        .await
        .unwrap();

        stale.rename("Renamed").unwrap();
        repo.update_section(&stale).await.unwrap();
        let stored = repo.get_section(b).await.unwrap().unwrap();
        assert_eq!(stored.title(), "Renamed");
        assert_eq!(stored.parent_id(), None);
    }

    #[tokio::test]
    async fn delete_cascade_terminates_on_a_cyclic_pair() {
        let repo = InMemoryRepository::new();
        let course = seed_course(&repo).await;
        let a = seed_section(&repo, course, None, 0).await;
        let b = seed_section(&repo, course, Some(a), 0).await;
        repo.apply_placements(&[SectionPlacement {
            section_id: a,
            parent_id: Some(b),
            order_index: 0,
        }])
        .await
        .unwrap();

        assert_eq!(repo.delete_section_cascade(a).await.unwrap(), 2);
        assert!(repo.get_section(b).await.unwrap().is_none());
    }
}
