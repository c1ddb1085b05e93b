use course_core::model::{AnswerOption, CourseId, Question, QuestionId, Test, TestId, TestOwner};

use super::SqliteRepository;
use super::mapping::{
    db_err, id_i64, map_option_row, map_question_row, map_test_row, question_id_from_i64,
    test_id_from_i64,
};
use crate::repository::{NewQuestionRecord, NewTestRecord, StorageError, TestRepository};

#[async_trait::async_trait]
impl TestRepository for SqliteRepository {
    async fn insert_test(&self, test: NewTestRecord) -> Result<TestId, StorageError> {
        let (course_id, section_id) = match test.owner {
            TestOwner::Course(id) => (Some(id_i64("course_id", id.value())?), None),
            TestOwner::Section(id) => (None, Some(id_i64("section_id", id.value())?)),
        };

        let res = sqlx::query(
            r"
            INSERT INTO tests (
                course_id, section_id, title, passing_score, duration_minutes,
                is_published, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
        )
        .bind(course_id)
        .bind(section_id)
        .bind(test.title)
        .bind(i64::from(test.passing_score))
        .bind(i64::from(test.duration_minutes))
        .bind(i64::from(test.is_published))
        .bind(test.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        test_id_from_i64(res.last_insert_rowid())
    }

    async fn get_test(&self, id: TestId) -> Result<Option<Test>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, course_id, section_id, title, passing_score, duration_minutes,
                   is_published, created_at
            FROM tests WHERE id = ?1
            ",
        )
        .bind(id_i64("test_id", id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => map_test_row(&row).map(Some),
            None => Ok(None),
        }
    }

    async fn tests_for_course(&self, course_id: CourseId) -> Result<Vec<Test>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT t.id, t.course_id, t.section_id, t.title, t.passing_score,
                   t.duration_minutes, t.is_published, t.created_at
            FROM tests t
            LEFT JOIN sections s ON s.id = t.section_id
            WHERE t.course_id = ?1 OR s.course_id = ?1
            ORDER BY t.id ASC
            ",
        )
        .bind(id_i64("course_id", course_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut tests = Vec::with_capacity(rows.len());
        for row in rows {
            tests.push(map_test_row(&row)?);
        }
        Ok(tests)
    }

    async fn insert_question(
        &self,
        question: NewQuestionRecord,
    ) -> Result<QuestionId, StorageError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let res = sqlx::query(
            r"
            INSERT INTO questions (test_id, text, kind, points, order_index)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
        )
        .bind(id_i64("test_id", question.test_id.value())?)
        .bind(question.text)
        .bind(question.kind.as_str())
        .bind(i64::from(question.points))
        .bind(question.order_index)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let question_row = res.last_insert_rowid();

        for (index, option) in question.options.into_iter().enumerate() {
            let order_index = i64::try_from(index)
                .map_err(|_| StorageError::Serialization("option index overflow".into()))?;
            sqlx::query(
                r"
                INSERT INTO answer_options (question_id, text, is_correct, order_index)
                VALUES (?1, ?2, ?3, ?4)
                ",
            )
            .bind(question_row)
            .bind(option.text)
            .bind(i64::from(option.is_correct))
            .bind(order_index)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        question_id_from_i64(question_row)
    }

    async fn questions_for_test(&self, test_id: TestId) -> Result<Vec<Question>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, test_id, text, kind, points, order_index
            FROM questions
            WHERE test_id = ?1
            ORDER BY order_index ASC, id ASC
            ",
        )
        .bind(id_i64("test_id", test_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut questions = Vec::with_capacity(rows.len());
        for row in rows {
            questions.push(map_question_row(&row)?);
        }
        Ok(questions)
    }

    async fn options_for_test(&self, test_id: TestId) -> Result<Vec<AnswerOption>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT o.id, o.question_id, o.text, o.is_correct, o.order_index
            FROM answer_options o
            JOIN questions q ON q.id = o.question_id
            WHERE q.test_id = ?1
            ORDER BY o.order_index ASC, o.id ASC
            ",
        )
        .bind(id_i64("test_id", test_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut options = Vec::with_capacity(rows.len());
        for row in rows {
            options.push(map_option_row(&row)?);
        }
        Ok(options)
    }
}
