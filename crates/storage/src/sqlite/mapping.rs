use course_core::model::{
    AnswerOption, AnswerSheet, Course, CourseId, CourseProgress, OptionId, Question, QuestionId,
    QuestionKind, Section, SectionId, SectionProgress, Test, TestId, TestOwner, TestResult,
    TestResultId, UserId,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

/// Map a driver error, keeping constraint failures distinguishable.
pub(crate) fn db_err(e: sqlx::Error) -> StorageError {
    match e.as_database_error() {
        Some(db) if db.is_foreign_key_violation() => StorageError::NotFound,
        Some(db) if db.is_unique_violation() || db.is_check_violation() => StorageError::Conflict,
        _ => StorageError::Connection(e.to_string()),
    }
}

pub(crate) fn id_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

fn i64_to_u32(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn course_id_from_i64(v: i64) -> Result<CourseId, StorageError> {
    Ok(CourseId::new(i64_to_u64("course_id", v)?))
}

pub(crate) fn section_id_from_i64(v: i64) -> Result<SectionId, StorageError> {
    Ok(SectionId::new(i64_to_u64("section_id", v)?))
}

pub(crate) fn test_id_from_i64(v: i64) -> Result<TestId, StorageError> {
    Ok(TestId::new(i64_to_u64("test_id", v)?))
}

pub(crate) fn question_id_from_i64(v: i64) -> Result<QuestionId, StorageError> {
    Ok(QuestionId::new(i64_to_u64("question_id", v)?))
}

fn option_id_from_i64(v: i64) -> Result<OptionId, StorageError> {
    Ok(OptionId::new(i64_to_u64("option_id", v)?))
}

fn user_id_from_i64(v: i64) -> Result<UserId, StorageError> {
    Ok(UserId::new(i64_to_u64("user_id", v)?))
}

pub(crate) fn result_id_from_i64(v: i64) -> Result<TestResultId, StorageError> {
    Ok(TestResultId::new(i64_to_u64("result_id", v)?))
}

pub(crate) fn map_course_row(row: &SqliteRow) -> Result<Course, StorageError> {
    Course::new(
        course_id_from_i64(row.try_get("id").map_err(ser)?)?,
        row.try_get::<String, _>("title").map_err(ser)?,
        row.try_get::<String, _>("category").map_err(ser)?,
        row.try_get::<i64, _>("is_published").map_err(ser)? != 0,
        row.try_get("order_index").map_err(ser)?,
        row.try_get("created_at").map_err(ser)?,
    )
    .map_err(ser)
}

pub(crate) fn map_section_row(row: &SqliteRow) -> Result<Section, StorageError> {
    Section::new(
        section_id_from_i64(row.try_get("id").map_err(ser)?)?,
        course_id_from_i64(row.try_get("course_id").map_err(ser)?)?,
        row.try_get::<Option<i64>, _>("parent_id")
            .map_err(ser)?
            .map(section_id_from_i64)
            .transpose()?,
        row.try_get::<String, _>("title").map_err(ser)?,
        row.try_get::<Option<String>, _>("content").map_err(ser)?,
        row.try_get("order_index").map_err(ser)?,
        row.try_get("created_at").map_err(ser)?,
    )
    .map_err(ser)
}

pub(crate) fn map_test_row(row: &SqliteRow) -> Result<Test, StorageError> {
    let course_id: Option<i64> = row.try_get("course_id").map_err(ser)?;
    let section_id: Option<i64> = row.try_get("section_id").map_err(ser)?;
    let owner = match (course_id, section_id) {
        (Some(c), None) => TestOwner::Course(course_id_from_i64(c)?),
        (None, Some(s)) => TestOwner::Section(section_id_from_i64(s)?),
        _ => {
            return Err(StorageError::Serialization(
                "test must have exactly one owner".into(),
            ));
        }
    };
    Test::new(
        test_id_from_i64(row.try_get("id").map_err(ser)?)?,
        owner,
        row.try_get::<String, _>("title").map_err(ser)?,
        i64_to_u32("passing_score", row.try_get("passing_score").map_err(ser)?)?,
        i64_to_u32(
            "duration_minutes",
            row.try_get("duration_minutes").map_err(ser)?,
        )?,
        row.try_get::<i64, _>("is_published").map_err(ser)? != 0,
        row.try_get("created_at").map_err(ser)?,
    )
    .map_err(ser)
}

pub(crate) fn map_question_row(row: &SqliteRow) -> Result<Question, StorageError> {
    let kind: String = row.try_get("kind").map_err(ser)?;
    Question::new(
        question_id_from_i64(row.try_get("id").map_err(ser)?)?,
        test_id_from_i64(row.try_get("test_id").map_err(ser)?)?,
        row.try_get::<String, _>("text").map_err(ser)?,
        QuestionKind::parse(&kind).map_err(ser)?,
        i64_to_u32("points", row.try_get("points").map_err(ser)?)?,
        row.try_get("order_index").map_err(ser)?,
    )
    .map_err(ser)
}

pub(crate) fn map_option_row(row: &SqliteRow) -> Result<AnswerOption, StorageError> {
    AnswerOption::new(
        option_id_from_i64(row.try_get("id").map_err(ser)?)?,
        question_id_from_i64(row.try_get("question_id").map_err(ser)?)?,
        row.try_get::<String, _>("text").map_err(ser)?,
        row.try_get::<i64, _>("is_correct").map_err(ser)? != 0,
        row.try_get("order_index").map_err(ser)?,
    )
    .map_err(ser)
}

pub(crate) fn map_result_row(row: &SqliteRow) -> Result<TestResult, StorageError> {
    let answers_json: String = row.try_get("answers").map_err(ser)?;
    let answers: AnswerSheet = serde_json::from_str(&answers_json).map_err(ser)?;
    TestResult::from_persisted(
        result_id_from_i64(row.try_get("id").map_err(ser)?)?,
        user_id_from_i64(row.try_get("user_id").map_err(ser)?)?,
        test_id_from_i64(row.try_get("test_id").map_err(ser)?)?,
        i64_to_u32("score", row.try_get("score").map_err(ser)?)?,
        row.try_get::<i64, _>("passed").map_err(ser)? != 0,
        answers,
        row.try_get("created_at").map_err(ser)?,
    )
    .map_err(ser)
}

pub(crate) fn map_course_progress_row(row: &SqliteRow) -> Result<CourseProgress, StorageError> {
    CourseProgress::from_persisted(
        user_id_from_i64(row.try_get("user_id").map_err(ser)?)?,
        course_id_from_i64(row.try_get("course_id").map_err(ser)?)?,
        i64_to_u32(
            "completion_percent",
            row.try_get("completion_percent").map_err(ser)?,
        )?,
        row.try_get::<Option<i64>, _>("last_section_id")
            .map_err(ser)?
            .map(section_id_from_i64)
            .transpose()?,
        row.try_get("last_accessed_at").map_err(ser)?,
    )
    .map_err(ser)
}

pub(crate) fn map_section_progress_row(row: &SqliteRow) -> Result<SectionProgress, StorageError> {
    Ok(SectionProgress {
        user_id: user_id_from_i64(row.try_get("user_id").map_err(ser)?)?,
        section_id: section_id_from_i64(row.try_get("section_id").map_err(ser)?)?,
        visited: row.try_get::<i64, _>("visited").map_err(ser)? != 0,
        visited_at: row.try_get("visited_at").map_err(ser)?,
    })
}
