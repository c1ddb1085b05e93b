use course_core::model::{CourseId, CourseProgress, SectionProgress, UserId};

use super::SqliteRepository;
use super::mapping::{db_err, id_i64, map_course_progress_row, map_section_progress_row};
use crate::repository::{ProgressRepository, StorageError};

fn last_section_i64(progress: &CourseProgress) -> Result<Option<i64>, StorageError> {
    progress
        .last_section_id()
        .map(|s| id_i64("last_section_id", s.value()))
        .transpose()
}

#[async_trait::async_trait]
impl ProgressRepository for SqliteRepository {
    async fn ensure_course_progress(
        &self,
        fresh: &CourseProgress,
    ) -> Result<CourseProgress, StorageError> {
        let user = id_i64("user_id", fresh.user_id().value())?;
        let course = id_i64("course_id", fresh.course_id().value())?;

        sqlx::query(
            r"
            INSERT INTO course_progress (
                user_id, course_id, completion_percent, last_section_id, last_accessed_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(user_id, course_id) DO NOTHING
            ",
        )
        .bind(user)
        .bind(course)
        .bind(i64::from(fresh.completion_percent()))
        .bind(last_section_i64(fresh)?)
        .bind(fresh.last_accessed_at())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        let row = sqlx::query(
            r"
            SELECT user_id, course_id, completion_percent, last_section_id, last_accessed_at
            FROM course_progress
            WHERE user_id = ?1 AND course_id = ?2
            ",
        )
        .bind(user)
        .bind(course)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        map_course_progress_row(&row)
    }

    async fn get_course_progress(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<CourseProgress>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT user_id, course_id, completion_percent, last_section_id, last_accessed_at
            FROM course_progress
            WHERE user_id = ?1 AND course_id = ?2
            ",
        )
        .bind(id_i64("user_id", user_id.value())?)
        .bind(id_i64("course_id", course_id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => map_course_progress_row(&row).map(Some),
            None => Ok(None),
        }
    }

    async fn save_course_progress(&self, progress: &CourseProgress) -> Result<(), StorageError> {
        let res = sqlx::query(
            r"
            UPDATE course_progress
            SET completion_percent = ?3, last_section_id = ?4, last_accessed_at = ?5
            WHERE user_id = ?1 AND course_id = ?2
            ",
        )
        .bind(id_i64("user_id", progress.user_id().value())?)
        .bind(id_i64("course_id", progress.course_id().value())?)
        .bind(i64::from(progress.completion_percent()))
        .bind(last_section_i64(progress)?)
        .bind(progress.last_accessed_at())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn list_course_progress(
        &self,
        user_id: UserId,
    ) -> Result<Vec<CourseProgress>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT user_id, course_id, completion_percent, last_section_id, last_accessed_at
            FROM course_progress
            WHERE user_id = ?1
            ORDER BY last_accessed_at DESC, course_id ASC
            ",
        )
        .bind(id_i64("user_id", user_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_course_progress_row(&row)?);
        }
        Ok(out)
    }

    async fn upsert_section_progress(
        &self,
        progress: &SectionProgress,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO section_progress (user_id, section_id, visited, visited_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(user_id, section_id) DO UPDATE SET
                visited = excluded.visited,
                visited_at = excluded.visited_at
            ",
        )
        .bind(id_i64("user_id", progress.user_id.value())?)
        .bind(id_i64("section_id", progress.section_id.value())?)
        .bind(i64::from(progress.visited))
        .bind(progress.visited_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn section_progress_for_course(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Vec<SectionProgress>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT p.user_id, p.section_id, p.visited, p.visited_at
            FROM section_progress p
            JOIN sections s ON s.id = p.section_id
            WHERE p.user_id = ?1 AND s.course_id = ?2
            ORDER BY p.section_id ASC
            ",
        )
        .bind(id_i64("user_id", user_id.value())?)
        .bind(id_i64("course_id", course_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_section_progress_row(&row)?);
        }
        Ok(out)
    }

    async fn reset_course_progress(&self, progress: &CourseProgress) -> Result<u64, StorageError> {
        let user = id_i64("user_id", progress.user_id().value())?;
        let course = id_i64("course_id", progress.course_id().value())?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let updated = sqlx::query(
            r"
            UPDATE course_progress
            SET completion_percent = ?3, last_section_id = ?4, last_accessed_at = ?5
            WHERE user_id = ?1 AND course_id = ?2
            ",
        )
        .bind(user)
        .bind(course)
        .bind(i64::from(progress.completion_percent()))
        .bind(last_section_i64(progress)?)
        .bind(progress.last_accessed_at())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        if updated.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }

        let deleted = sqlx::query(
            r"
            DELETE FROM section_progress
            WHERE user_id = ?1
              AND section_id IN (SELECT id FROM sections WHERE course_id = ?2)
            ",
        )
        .bind(user)
        .bind(course)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(deleted.rows_affected())
    }
}
