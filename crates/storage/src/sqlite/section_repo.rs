use course_core::MAX_DEPTH;
use course_core::model::{CourseId, Section, SectionId};

use super::SqliteRepository;
use super::mapping::{db_err, id_i64, map_section_row, section_id_from_i64};
use crate::repository::{NewSectionRecord, SectionPlacement, SectionRepository, StorageError};

fn parent_i64(parent: Option<SectionId>) -> Result<Option<i64>, StorageError> {
    parent.map(|p| id_i64("parent_id", p.value())).transpose()
}

#[async_trait::async_trait]
impl SectionRepository for SqliteRepository {
    async fn insert_section(&self, section: NewSectionRecord) -> Result<SectionId, StorageError> {
        let res = sqlx::query(
            r"
            INSERT INTO sections (course_id, parent_id, title, content, order_index, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
        )
        .bind(id_i64("course_id", section.course_id.value())?)
        .bind(parent_i64(section.parent_id)?)
        .bind(section.title)
        .bind(section.content)
        .bind(section.order_index)
        .bind(section.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        section_id_from_i64(res.last_insert_rowid())
    }

    async fn update_section(&self, section: &Section) -> Result<(), StorageError> {
        let res = sqlx::query(
            r"
            UPDATE sections
            SET title = ?2, content = ?3, order_index = ?4
            WHERE id = ?1
            ",
        )
        .bind(id_i64("section_id", section.id().value())?)
        .bind(section.title().to_owned())
        .bind(section.content().map(str::to_owned))
        .bind(section.order_index())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn get_section(&self, id: SectionId) -> Result<Option<Section>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, course_id, parent_id, title, content, order_index, created_at
            FROM sections WHERE id = ?1
            ",
        )
        .bind(id_i64("section_id", id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => map_section_row(&row).map(Some),
            None => Ok(None),
        }
    }

    async fn sections_for_course(&self, course_id: CourseId) -> Result<Vec<Section>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, course_id, parent_id, title, content, order_index, created_at
            FROM sections
            WHERE course_id = ?1
            ORDER BY order_index ASC, id ASC
            ",
        )
        .bind(id_i64("course_id", course_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut sections = Vec::with_capacity(rows.len());
        for row in rows {
            sections.push(map_section_row(&row)?);
        }
        Ok(sections)
    }

    async fn apply_placements(&self, placements: &[SectionPlacement]) -> Result<(), StorageError> {
        if placements.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        for placement in placements {
            let res = sqlx::query(
                r"
                UPDATE sections SET parent_id = ?2, order_index = ?3
                WHERE id = ?1
                ",
            )
            .bind(id_i64("section_id", placement.section_id.value())?)
            .bind(parent_i64(placement.parent_id)?)
            .bind(placement.order_index)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

            // dropping `tx` rolls back everything applied so far
            if res.rows_affected() == 0 {
                return Err(StorageError::NotFound);
            }
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn delete_section_cascade(&self, id: SectionId) -> Result<u64, StorageError> {
        let section = id_i64("section_id", id.value())?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let removed: i64 = sqlx::query_scalar(
            r"
            WITH RECURSIVE subtree(id, depth) AS (
                SELECT id, 0 FROM sections WHERE id = ?1
                UNION
                SELECT s.id, t.depth + 1 FROM sections s JOIN subtree t ON s.parent_id = t.id
                WHERE t.depth < ?2
            )
            SELECT COUNT(DISTINCT id) FROM subtree
            ",
        )
        .bind(section)
        .bind(i64::try_from(MAX_DEPTH).unwrap_or(i64::MAX))
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        if removed == 0 {
            return Err(StorageError::NotFound);
        }

        // descendants, their tests and visit rows follow via ON DELETE CASCADE
        sqlx::query("DELETE FROM sections WHERE id = ?1")
            .bind(section)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        u64::try_from(removed).map_err(|_| StorageError::Serialization("count overflow".into()))
    }
}
