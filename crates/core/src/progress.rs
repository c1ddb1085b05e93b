//! Completion arithmetic shared by the progress aggregator and grading.

use serde::Serialize;

use crate::model::CourseProgress;

/// `part / total * 100`, rounded half away from zero.
///
/// Returns `None` when `total == 0`. `part` is clamped to `total`.
///
/// ```
/// # use course_core::progress::rounded_percent;
/// assert_eq!(rounded_percent(2, 3), Some(67));
/// assert_eq!(rounded_percent(1, 8), Some(13));
/// assert_eq!(rounded_percent(0, 0), None);
/// ```
#[must_use]
pub fn rounded_percent(part: u64, total: u64) -> Option<u8> {
    if total == 0 {
        return None;
    }
    let part = u128::from(part.min(total));
    let total = u128::from(total);
    let pct = (part * 200 + total) / (total * 2);
    u8::try_from(pct).ok()
}

/// Which signal a course's completion is derived from.
///
/// Chosen solely by whether the course has any tests; the two are never mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionBasis {
    Tests { passed: u64, total: u64 },
    Sections { visited: u64, total: u64 },
}

impl CompletionBasis {
    /// Pick the basis for a course. `tests_total > 0` always wins.
    #[must_use]
    pub fn select(
        tests_passed: u64,
        tests_total: u64,
        sections_visited: u64,
        sections_total: u64,
    ) -> Self {
        if tests_total > 0 {
            CompletionBasis::Tests {
                passed: tests_passed,
                total: tests_total,
            }
        } else {
            CompletionBasis::Sections {
                visited: sections_visited,
                total: sections_total,
            }
        }
    }

    /// Completion percentage, or `None` for a course with neither tests nor
    /// sections (completion is left untouched in that case).
    #[must_use]
    pub fn percent(self) -> Option<u8> {
        match self {
            CompletionBasis::Tests { passed, total } => rounded_percent(passed, total),
            CompletionBasis::Sections { visited, total } => rounded_percent(visited, total),
        }
    }
}

/// Aggregate across all of a user's course progress rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct UserStats {
    pub total_courses: u64,
    pub completed_courses: u64,
    pub in_progress_courses: u64,
    pub average_completion: u8,
}

impl UserStats {
    #[must_use]
    pub fn from_progress(rows: &[CourseProgress]) -> Self {
        let total = rows.len() as u64;
        let completed = rows.iter().filter(|p| p.completion_percent() == 100).count() as u64;
        let in_progress = rows
            .iter()
            .filter(|p| (1..100).contains(&p.completion_percent()))
            .count() as u64;
        let sum: u64 = rows.iter().map(|p| u64::from(p.completion_percent())).sum();
        // mean of values in 0..=100 is itself in 0..=100
        let average = if total == 0 {
            0
        } else {
            u8::try_from((sum * 2 + total) / (total * 2)).unwrap_or(100)
        };
        Self {
            total_courses: total,
            completed_courses: completed,
            in_progress_courses: in_progress,
            average_completion: average,
        }
    }
}
