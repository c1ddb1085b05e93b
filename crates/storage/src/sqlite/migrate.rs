use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

const SCHEMA_V1: &[&str] = &[
    r"
        CREATE TABLE IF NOT EXISTS courses (
            id INTEGER PRIMARY KEY,
            title TEXT NOT NULL,
            category TEXT NOT NULL,
            is_published INTEGER NOT NULL CHECK (is_published IN (0, 1)),
            order_index INTEGER NOT NULL,
            created_at TEXT NOT NULL
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS sections (
            id INTEGER PRIMARY KEY,
            course_id INTEGER NOT NULL,
            parent_id INTEGER,
            title TEXT NOT NULL,
            content TEXT,
            order_index INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            CHECK (parent_id IS NULL OR parent_id <> id),
            FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE,
            FOREIGN KEY (parent_id) REFERENCES sections(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS tests (
            id INTEGER PRIMARY KEY,
            course_id INTEGER,
            section_id INTEGER,
            title TEXT NOT NULL,
            passing_score INTEGER NOT NULL CHECK (passing_score BETWEEN 0 AND 100),
            duration_minutes INTEGER NOT NULL CHECK (duration_minutes > 0),
            is_published INTEGER NOT NULL CHECK (is_published IN (0, 1)),
            created_at TEXT NOT NULL,
            CHECK ((course_id IS NULL) <> (section_id IS NULL)),
            FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE,
            FOREIGN KEY (section_id) REFERENCES sections(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS questions (
            id INTEGER PRIMARY KEY,
            test_id INTEGER NOT NULL,
            text TEXT NOT NULL,
            kind TEXT NOT NULL CHECK (kind IN ('single_choice', 'multiple_choice')),
            points INTEGER NOT NULL CHECK (points >= 0),
            order_index INTEGER NOT NULL,
            FOREIGN KEY (test_id) REFERENCES tests(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS answer_options (
            id INTEGER PRIMARY KEY,
            question_id INTEGER NOT NULL,
            text TEXT NOT NULL,
            is_correct INTEGER NOT NULL CHECK (is_correct IN (0, 1)),
            order_index INTEGER NOT NULL,
            FOREIGN KEY (question_id) REFERENCES questions(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS test_results (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            test_id INTEGER NOT NULL,
            score INTEGER NOT NULL CHECK (score BETWEEN 0 AND 100),
            passed INTEGER NOT NULL CHECK (passed IN (0, 1)),
            answers TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (test_id) REFERENCES tests(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS course_progress (
            user_id INTEGER NOT NULL,
            course_id INTEGER NOT NULL,
            completion_percent INTEGER NOT NULL CHECK (completion_percent BETWEEN 0 AND 100),
            last_section_id INTEGER,
            last_accessed_at TEXT NOT NULL,
            PRIMARY KEY (user_id, course_id),
            FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE,
            FOREIGN KEY (last_section_id) REFERENCES sections(id) ON DELETE SET NULL
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS section_progress (
            user_id INTEGER NOT NULL,
            section_id INTEGER NOT NULL,
            visited INTEGER NOT NULL CHECK (visited IN (0, 1)),
            visited_at TEXT,
            PRIMARY KEY (user_id, section_id),
            FOREIGN KEY (section_id) REFERENCES sections(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_sections_course_parent_order
            ON sections (course_id, parent_id, order_index, id);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_sections_parent
            ON sections (parent_id);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_tests_course ON tests (course_id);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_tests_section ON tests (section_id);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_questions_test_order
            ON questions (test_id, order_index, id);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_answer_options_question
            ON answer_options (question_id, order_index, id);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_test_results_user_created
            ON test_results (user_id, created_at);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_test_results_user_test_passed
            ON test_results (user_id, test_id, passed);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_course_progress_user_accessed
            ON course_progress (user_id, last_accessed_at);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_course_progress_last_section
            ON course_progress (last_section_id);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_section_progress_section
            ON section_progress (section_id);
    ",
];

/// Runs the versioned migrations for the current schema.
///
/// Version 1 creates courses, the section forest, tests with questions and
/// options, test results and both progress tables.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        for statement in SCHEMA_V1 {
            sqlx::query(statement).execute(&mut *tx).await?;
        }

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(version = 1, "applied schema migration");
    }

    Ok(())
}
