use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::model::ids::{CourseId, SectionId, UserId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("completion must be between 0 and 100, got {0}")]
    InvalidCompletion(u32),
}

/// Per (user, course) progress. Created lazily, reset rather than deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourseProgress {
    user_id: UserId,
    course_id: CourseId,
    completion_percent: u8,
    last_section_id: Option<SectionId>,
    last_accessed_at: DateTime<Utc>,
}

impl CourseProgress {
    /// Fresh progress with zero completion.
    #[must_use]
    pub fn start(user_id: UserId, course_id: CourseId, at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            course_id,
            completion_percent: 0,
            last_section_id: None,
            last_accessed_at: at,
        }
    }

    /// # Errors
    ///
    /// Returns `ProgressError::InvalidCompletion` if `completion_percent > 100`.
    pub fn from_persisted(
        user_id: UserId,
        course_id: CourseId,
        completion_percent: u32,
        last_section_id: Option<SectionId>,
        last_accessed_at: DateTime<Utc>,
    ) -> Result<Self, ProgressError> {
        let completion_percent = u8::try_from(completion_percent)
            .ok()
            .filter(|c| *c <= 100)
            .ok_or(ProgressError::InvalidCompletion(completion_percent))?;
        Ok(Self {
            user_id,
            course_id,
            completion_percent,
            last_section_id,
            last_accessed_at,
        })
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    #[must_use]
    pub fn course_id(&self) -> CourseId {
        self.course_id
    }

    #[must_use]
    pub fn completion_percent(&self) -> u8 {
        self.completion_percent
    }

    #[must_use]
    pub fn last_section_id(&self) -> Option<SectionId> {
        self.last_section_id
    }

    #[must_use]
    pub fn last_accessed_at(&self) -> DateTime<Utc> {
        self.last_accessed_at
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completion_percent == 100
    }

    /// Record a visit toggle: remember the section when visited, forget it otherwise.
    pub fn record_visit(&mut self, section_id: SectionId, visited: bool, at: DateTime<Utc>) {
        self.last_section_id = visited.then_some(section_id);
        self.last_accessed_at = at;
    }

    /// Drop the last-visited pointer if it refers to a removed section.
    pub fn forget_section(&mut self, section_id: SectionId) {
        if self.last_section_id == Some(section_id) {
            self.last_section_id = None;
        }
    }

    /// Clamped to 100.
    pub fn set_completion(&mut self, percent: u8) {
        self.completion_percent = percent.min(100);
    }

    pub fn reset(&mut self, at: DateTime<Utc>) {
        self.completion_percent = 0;
        self.last_section_id = None;
        self.last_accessed_at = at;
    }
}

/// Per (user, section) visit state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionProgress {
    pub user_id: UserId,
    pub section_id: SectionId,
    pub visited: bool,
    pub visited_at: Option<DateTime<Utc>>,
}

impl SectionProgress {
    /// Visit state after toggling; the timestamp is only kept while visited.
    #[must_use]
    pub fn toggled(
        user_id: UserId,
        section_id: SectionId,
        visited: bool,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            section_id,
            visited,
            visited_at: visited.then_some(at),
        }
    }

    /// Placeholder for sections the user never touched.
    #[must_use]
    pub fn unvisited(user_id: UserId, section_id: SectionId) -> Self {
        Self {
            user_id,
            section_id,
            visited: false,
            visited_at: None,
        }
    }
}
