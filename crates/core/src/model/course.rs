use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::model::ids::CourseId;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CourseError {
    #[error("course title cannot be empty")]
    EmptyTitle,

    #[error("course category cannot be empty")]
    EmptyCategory,
}

//
// ─── COURSE ────────────────────────────────────────────────────────────────────
//

/// A course owning a forest of sections and a set of top-level tests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Course {
    id: CourseId,
    title: String,
    category: String,
    is_published: bool,
    order_index: i64,
    created_at: DateTime<Utc>,
}

impl Course {
    /// Creates a new Course.
    ///
    /// # Errors
    ///
    /// Returns `CourseError::EmptyTitle` or `CourseError::EmptyCategory` when the
    /// respective field is empty or whitespace-only.
    pub fn new(
        id: CourseId,
        title: impl Into<String>,
        category: impl Into<String>,
        is_published: bool,
        order_index: i64,
        created_at: DateTime<Utc>,
    ) -> Result<Self, CourseError> {
        let title = normalize_title(title.into())?;
        let category = category.into();
        if category.trim().is_empty() {
            return Err(CourseError::EmptyCategory);
        }

        Ok(Self {
            id,
            title,
            category: category.trim().to_owned(),
            is_published,
            order_index,
            created_at,
        })
    }

    // Accessors
    #[must_use]
    pub fn id(&self) -> CourseId {
        self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn category(&self) -> &str {
        &self.category
    }

    #[must_use]
    pub fn is_published(&self) -> bool {
        self.is_published
    }

    #[must_use]
    pub fn order_index(&self) -> i64 {
        self.order_index
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Replace the title.
    ///
    /// # Errors
    ///
    /// Returns `CourseError::EmptyTitle` if the new title is blank.
    pub fn rename(&mut self, title: impl Into<String>) -> Result<(), CourseError> {
        self.title = normalize_title(title.into())?;
        Ok(())
    }

    /// Replace the category.
    ///
    /// # Errors
    ///
    /// Returns `CourseError::EmptyCategory` if the new category is blank.
    pub fn recategorize(&mut self, category: impl Into<String>) -> Result<(), CourseError> {
        let category = category.into();
        if category.trim().is_empty() {
            return Err(CourseError::EmptyCategory);
        }
        self.category = category.trim().to_owned();
        Ok(())
    }

    pub fn set_published(&mut self, is_published: bool) {
        self.is_published = is_published;
    }

    pub fn set_order_index(&mut self, order_index: i64) {
        self.order_index = order_index;
    }
}

fn normalize_title(title: String) -> Result<String, CourseError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(CourseError::EmptyTitle);
    }
    Ok(trimmed.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn course_new_trims_fields() {
        let course = Course::new(
            CourseId::new(1),
            "  Rust Basics ",
            " programming ",
            true,
            0,
            fixed_now(),
        )
        .unwrap();
        assert_eq!(course.title(), "Rust Basics");
        assert_eq!(course.category(), "programming");
        assert!(course.is_published());
    }

    #[test]
    fn course_new_rejects_blank_title_and_category() {
        let err = Course::new(CourseId::new(1), " ", "x", false, 0, fixed_now()).unwrap_err();
        assert_eq!(err, CourseError::EmptyTitle);

        let err = Course::new(CourseId::new(1), "x", "", false, 0, fixed_now()).unwrap_err();
        assert_eq!(err, CourseError::EmptyCategory);
    }

    #[test]
    fn rename_keeps_old_title_on_error() {
        let mut course =
            Course::new(CourseId::new(1), "Old", "misc", false, 0, fixed_now()).unwrap();
        assert!(course.rename("   ").is_err());
        assert_eq!(course.title(), "Old");
        course.rename("New").unwrap();
        assert_eq!(course.title(), "New");
    }
}
