use std::sync::Arc;

use serde::Serialize;

use course_core::grading::grade;
use course_core::model::{
    AnswerSheet, CourseId, CourseProgress, TestId, TestOwner, TestResult, UserId,
};
use storage::repository::{
    NewTestResultRecord, SectionRepository, TestRepository, TestResultRepository,
};
use tracing::{debug, info};

use crate::Clock;
use crate::error::SubmissionError;
use crate::progress_service::ProgressService;

/// Outcome of a graded submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub result: TestResult,
    /// The owning course's progress after recomputation.
    pub course_progress: CourseProgress,
}

/// Grades answer sheets, records results and feeds completion.
#[derive(Clone)]
pub struct SubmissionService {
    clock: Clock,
    sections: Arc<dyn SectionRepository>,
    tests: Arc<dyn TestRepository>,
    results: Arc<dyn TestResultRepository>,
    progress: ProgressService,
}

impl SubmissionService {
    #[must_use]
    pub fn new(
        clock: Clock,
        sections: Arc<dyn SectionRepository>,
        tests: Arc<dyn TestRepository>,
        results: Arc<dyn TestResultRepository>,
        progress: ProgressService,
    ) -> Self {
        Self {
            clock,
            sections,
            tests,
            results,
            progress,
        }
    }

    async fn owning_course(&self, owner: TestOwner) -> Result<CourseId, SubmissionError> {
        match owner {
            TestOwner::Course(course_id) => Ok(course_id),
            TestOwner::Section(section_id) => self
                .sections
                .get_section(section_id)
                .await?
                .map(|s| s.course_id())
                .ok_or(SubmissionError::SectionNotFound(section_id)),
        }
    }

    /// Grade `answers`, append the result and recompute the course's completion.
    ///
    /// Every submission is recorded; retakes never overwrite earlier results.
    ///
    /// # Errors
    ///
    /// Returns `TestNotFound` for an unknown test and `Grading` when the sheet
    /// references foreign ids or the test is worth zero points.
    pub async fn submit_test(
        &self,
        user_id: UserId,
        test_id: TestId,
        answers: AnswerSheet,
    ) -> Result<Submission, SubmissionError> {
        let test = self
            .tests
            .get_test(test_id)
            .await?
            .ok_or(SubmissionError::TestNotFound(test_id))?;
        let course_id = self.owning_course(test.owner()).await?;

        let questions = self.tests.questions_for_test(test_id).await?;
        let options = self.tests.options_for_test(test_id).await?;
        let outcome = grade(&questions, &options, &answers)?;
        let passed = test.is_passing(outcome.score);
        debug!(
            user_id = user_id.value(),
            test_id = test_id.value(),
            earned = outcome.earned,
            possible = outcome.possible,
            "graded answers"
        );

        let result = self
            .results
            .append_result(NewTestResultRecord {
                user_id,
                test_id,
                score: outcome.score,
                passed,
                answers,
                created_at: self.clock.now(),
            })
            .await?;
        info!(
            user_id = user_id.value(),
            test_id = test_id.value(),
            course_id = course_id.value(),
            score = outcome.score,
            passed,
            "submitted test"
        );

        let course_progress = self
            .progress
            .recompute_course_completion(user_id, course_id)
            .await?;
        Ok(Submission {
            result,
            course_progress,
        })
    }

    /// A user's results, newest first.
    ///
    /// # Errors
    ///
    /// Returns `SubmissionError::Storage` if repository access fails.
    pub async fn results_for_user(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<TestResult>, SubmissionError> {
        Ok(self.results.results_for_user(user_id, limit).await?)
    }
}
