use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::model::ids::{CourseId, SectionId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SectionError {
    #[error("section title cannot be empty")]
    EmptyTitle,

    #[error("section {0} cannot be its own parent")]
    SelfParent(SectionId),
}

/// A node in a course's section forest.
///
/// Sections only store their parent reference; children are derived by the
/// `SectionTree` index so that ownership stays in one place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    id: SectionId,
    course_id: CourseId,
    parent_id: Option<SectionId>,
    title: String,
    content: Option<String>,
    order_index: i64,
    created_at: DateTime<Utc>,
}

impl Section {
    /// Creates a new Section.
    ///
    /// Blank content is normalized to `None`.
    ///
    /// # Errors
    ///
    /// Returns `SectionError::EmptyTitle` for a blank title and
    /// `SectionError::SelfParent` if `parent_id == Some(id)`.
    pub fn new(
        id: SectionId,
        course_id: CourseId,
        parent_id: Option<SectionId>,
        title: impl Into<String>,
        content: Option<String>,
        order_index: i64,
        created_at: DateTime<Utc>,
    ) -> Result<Self, SectionError> {
        if parent_id == Some(id) {
            return Err(SectionError::SelfParent(id));
        }
        Ok(Self {
            id,
            course_id,
            parent_id,
            title: normalize_title(title.into())?,
            content: normalize_content(content),
            order_index,
            created_at,
        })
    }

    #[must_use]
    pub fn id(&self) -> SectionId {
        self.id
    }

    #[must_use]
    pub fn course_id(&self) -> CourseId {
        self.course_id
    }

    #[must_use]
    pub fn parent_id(&self) -> Option<SectionId> {
        self.parent_id
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    #[must_use]
    pub fn order_index(&self) -> i64 {
        self.order_index
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// # Errors
    ///
    /// Returns `SectionError::EmptyTitle` if the new title is blank.
    pub fn rename(&mut self, title: impl Into<String>) -> Result<(), SectionError> {
        self.title = normalize_title(title.into())?;
        Ok(())
    }

    pub fn set_content(&mut self, content: Option<String>) {
        self.content = normalize_content(content);
    }

    pub fn set_order_index(&mut self, order_index: i64) {
        self.order_index = order_index;
    }

    /// Re-parent the section. Cycle checks live in `SectionTree`.
    ///
    /// # Errors
    ///
    /// Returns `SectionError::SelfParent` if asked to parent itself.
    pub fn relocate(
        &mut self,
        parent_id: Option<SectionId>,
        order_index: i64,
    ) -> Result<(), SectionError> {
        if parent_id == Some(self.id) {
            return Err(SectionError::SelfParent(self.id));
        }
        self.parent_id = parent_id;
        self.order_index = order_index;
        Ok(())
    }
}

fn normalize_title(title: String) -> Result<String, SectionError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(SectionError::EmptyTitle);
    }
    Ok(trimmed.to_owned())
}

fn normalize_content(content: Option<String>) -> Option<String> {
    content.filter(|c| !c.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn section(id: u64, parent: Option<u64>) -> Result<Section, SectionError> {
        Section::new(
            SectionId::new(id),
            CourseId::new(1),
            parent.map(SectionId::new),
            "Intro",
            Some("body".into()),
            0,
            fixed_now(),
        )
    }

    #[test]
    fn rejects_self_parent() {
        let err = section(3, Some(3)).unwrap_err();
        assert_eq!(err, SectionError::SelfParent(SectionId::new(3)));
    }

    #[test]
    fn blank_content_becomes_none() {
        let mut s = section(1, None).unwrap();
        s.set_content(Some("  ".into()));
        assert_eq!(s.content(), None);
    }

    #[test]
    fn relocate_updates_parent_and_order() {
        let mut s = section(2, None).unwrap();
        s.relocate(Some(SectionId::new(1)), 5).unwrap();
        assert_eq!(s.parent_id(), Some(SectionId::new(1)));
        assert_eq!(s.order_index(), 5);
        assert!(!s.is_root());
        assert!(s.relocate(Some(SectionId::new(2)), 0).is_err());
    }
}
