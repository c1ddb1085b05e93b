use std::collections::HashSet;

use course_core::model::{TestId, TestResult, UserId};

use super::SqliteRepository;
use super::mapping::{
    db_err, id_i64, map_result_row, result_id_from_i64, ser, test_id_from_i64,
};
use crate::repository::{NewTestResultRecord, StorageError, TestResultRepository};

#[async_trait::async_trait]
impl TestResultRepository for SqliteRepository {
    async fn append_result(
        &self,
        result: NewTestResultRecord,
    ) -> Result<TestResult, StorageError> {
        let answers = serde_json::to_string(&result.answers).map_err(ser)?;

        let res = sqlx::query(
            r"
            INSERT INTO test_results (user_id, test_id, score, passed, answers, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
        )
        .bind(id_i64("user_id", result.user_id.value())?)
        .bind(id_i64("test_id", result.test_id.value())?)
        .bind(i64::from(result.score))
        .bind(i64::from(result.passed))
        .bind(answers)
        .bind(result.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        TestResult::from_persisted(
            result_id_from_i64(res.last_insert_rowid())?,
            result.user_id,
            result.test_id,
            u32::from(result.score),
            result.passed,
            result.answers,
            result.created_at,
        )
        .map_err(ser)
    }

    async fn results_for_user(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<TestResult>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, user_id, test_id, score, passed, answers, created_at
            FROM test_results
            WHERE user_id = ?1
            ORDER BY created_at DESC, id DESC
            LIMIT ?2
            ",
        )
        .bind(id_i64("user_id", user_id.value())?)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_result_row(&row)?);
        }
        Ok(out)
    }

    async fn passed_tests(
        &self,
        user_id: UserId,
        test_ids: &[TestId],
    ) -> Result<HashSet<TestId>, StorageError> {
        if test_ids.is_empty() {
            return Ok(HashSet::new());
        }

        let mut sql = String::from(
            r"
            SELECT DISTINCT test_id
            FROM test_results
            WHERE user_id = ?1 AND passed = 1 AND test_id IN (
            ",
        );
        for i in 0..test_ids.len() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push('?');
            sql.push_str(&(i + 2).to_string());
        }
        sql.push_str(")\n");

        let mut q = sqlx::query_scalar::<_, i64>(&sql).bind(id_i64("user_id", user_id.value())?);
        for id in test_ids {
            q = q.bind(id_i64("test_id", id.value())?);
        }

        let rows = q.fetch_all(&self.pool).await.map_err(db_err)?;

        let mut passed = HashSet::with_capacity(rows.len());
        for raw in rows {
            passed.insert(test_id_from_i64(raw)?);
        }
        Ok(passed)
    }
}
