//! Arena view over a course's section forest.
//!
//! Sections are keyed by id and only carry a parent reference. The tree keeps
//! a secondary index (parent -> ordered children) and answers the structural
//! queries used by the section manager: breadcrumbs, pre-order navigation,
//! descendant collection and cycle checks for moves.
//!
//! Sibling order is `(order_index, id)`; indices need not be contiguous.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use thiserror::Error;

use crate::model::{CourseId, Section, SectionId};

/// Upper bound on ancestor/descendant walks.
pub const MAX_DEPTH: usize = 64;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

/// Structural invariant violations of a section forest.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TreeError {
    #[error("moving section {section} under {parent} would create a cycle")]
    Cycle {
        section: SectionId,
        parent: SectionId,
    },

    #[error("section {section} belongs to course {found}, expected course {expected}")]
    ForeignSection {
        section: SectionId,
        expected: CourseId,
        found: CourseId,
    },

    #[error("parent {parent} of section {section} is not part of course {course}")]
    ForeignParent {
        section: SectionId,
        parent: SectionId,
        course: CourseId,
    },

    #[error("section {0} is not reachable from any root section")]
    Unreachable(SectionId),

    #[error("section {0} is nested deeper than {max} levels", max = MAX_DEPTH)]
    DepthLimit(SectionId),

    #[error("section {0} is not part of this tree")]
    UnknownSection(SectionId),
}

/// One breadcrumb entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Crumb {
    pub id: SectionId,
    pub title: String,
}

//
// ─── TREE ──────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone)]
pub struct SectionTree {
    course_id: CourseId,
    nodes: HashMap<SectionId, Section>,
    roots: Vec<SectionId>,
    children: HashMap<SectionId, Vec<SectionId>>,
}

impl SectionTree {
    /// Build and validate the forest for `course_id`.
    ///
    /// # Errors
    ///
    /// - `ForeignSection` if a section belongs to another course.
    /// - `ForeignParent` if a parent id is not among the given sections.
    /// - `Unreachable` if some sections form a cycle detached from every root.
    /// - `DepthLimit` if nesting exceeds `MAX_DEPTH`.
    pub fn build(
        course_id: CourseId,
        sections: impl IntoIterator<Item = Section>,
    ) -> Result<Self, TreeError> {
        let mut nodes = HashMap::new();
        for section in sections {
            if section.course_id() != course_id {
                return Err(TreeError::ForeignSection {
                    section: section.id(),
                    expected: course_id,
                    found: section.course_id(),
                });
            }
            nodes.insert(section.id(), section);
        }

        let mut tree = Self {
            course_id,
            nodes,
            roots: Vec::new(),
            children: HashMap::new(),
        };
        tree.reindex()?;
        tree.validate()?;
        Ok(tree)
    }

    fn reindex(&mut self) -> Result<(), TreeError> {
        let mut roots = Vec::new();
        let mut children: HashMap<SectionId, Vec<SectionId>> = HashMap::new();
        for section in self.nodes.values() {
            match section.parent_id() {
                None => roots.push(section.id()),
                Some(parent) if self.nodes.contains_key(&parent) => {
                    children.entry(parent).or_default().push(section.id());
                }
                Some(parent) => {
                    return Err(TreeError::ForeignParent {
                        section: section.id(),
                        parent,
                        course: self.course_id,
                    });
                }
            }
        }
        self.sort_siblings(&mut roots);
        let mut sorted = HashMap::with_capacity(children.len());
        for (parent, mut ids) in children {
            self.sort_siblings(&mut ids);
            sorted.insert(parent, ids);
        }
        self.roots = roots;
        self.children = sorted;
        Ok(())
    }

    fn sort_siblings(&self, ids: &mut [SectionId]) {
        ids.sort_by_key(|id| (self.nodes.get(id).map_or(i64::MAX, Section::order_index), *id));
    }

    /// Every section must be reachable from a root within `MAX_DEPTH` levels.
    fn validate(&self) -> Result<(), TreeError> {
        let mut seen = HashSet::with_capacity(self.nodes.len());
        let mut stack: Vec<(SectionId, usize)> = self.roots.iter().map(|id| (*id, 0)).collect();
        while let Some((id, depth)) = stack.pop() {
            if depth > MAX_DEPTH {
                return Err(TreeError::DepthLimit(id));
            }
            if !seen.insert(id) {
                continue;
            }
            for child in self.children(id) {
                stack.push((*child, depth + 1));
            }
        }
        if seen.len() == self.nodes.len() {
            return Ok(());
        }
        let mut missing: Vec<SectionId> = self
            .nodes
            .keys()
            .filter(|id| !seen.contains(id))
            .copied()
            .collect();
        missing.sort();
        Err(TreeError::Unreachable(missing[0]))
    }

    #[must_use]
    pub fn course_id(&self) -> CourseId {
        self.course_id
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: SectionId) -> bool {
        self.nodes.contains_key(&id)
    }

    #[must_use]
    pub fn get(&self, id: SectionId) -> Option<&Section> {
        self.nodes.get(&id)
    }

    /// Root sections in sibling order.
    #[must_use]
    pub fn roots(&self) -> &[SectionId] {
        &self.roots
    }

    /// Direct children in sibling order (empty for leaves and unknown ids).
    #[must_use]
    pub fn children(&self, id: SectionId) -> &[SectionId] {
        self.children.get(&id).map_or(&[][..], Vec::as_slice)
    }

    /// The sibling list `id` lives in: the roots, or its parent's children.
    #[must_use]
    pub fn siblings(&self, id: SectionId) -> &[SectionId] {
        match self.get(id).and_then(Section::parent_id) {
            Some(parent) => self.children(parent),
            None => self.roots.as_slice(),
        }
    }

    fn sibling_offset(&self, id: SectionId, offset: isize) -> Option<SectionId> {
        let siblings = self.siblings(id);
        let pos = siblings.iter().position(|s| *s == id)?;
        let target = pos.checked_add_signed(offset)?;
        siblings.get(target).copied()
    }

    #[must_use]
    pub fn following_sibling(&self, id: SectionId) -> Option<SectionId> {
        self.sibling_offset(id, 1)
    }

    #[must_use]
    pub fn preceding_sibling(&self, id: SectionId) -> Option<SectionId> {
        self.sibling_offset(id, -1)
    }

    /// Ancestors from the direct parent up to the root.
    #[must_use]
    pub fn ancestors(&self, id: SectionId) -> Vec<SectionId> {
        let mut out = Vec::new();
        let mut current = self.get(id).and_then(Section::parent_id);
        while let Some(parent) = current {
            if out.len() > MAX_DEPTH {
                break;
            }
            out.push(parent);
            current = self.get(parent).and_then(Section::parent_id);
        }
        out
    }

    /// 0 for roots.
    #[must_use]
    pub fn depth(&self, id: SectionId) -> Option<usize> {
        self.get(id).map(|_| self.ancestors(id).len())
    }

    /// Path from the root down to `id`, inclusive.
    #[must_use]
    pub fn breadcrumb(&self, id: SectionId) -> Option<Vec<Crumb>> {
        let section = self.get(id)?;
        let mut path: Vec<Crumb> = self
            .ancestors(id)
            .into_iter()
            .rev()
            .filter_map(|a| self.get(a))
            .map(|s| Crumb {
                id: s.id(),
                title: s.title().to_owned(),
            })
            .collect();
        path.push(Crumb {
            id: section.id(),
            title: section.title().to_owned(),
        });
        Some(path)
    }

    /// Is `ancestor` a strict ancestor of `id`?
    #[must_use]
    pub fn is_ancestor(&self, ancestor: SectionId, id: SectionId) -> bool {
        self.ancestors(id).contains(&ancestor)
    }

    /// Deepest, right-most section of the subtree rooted at `id`.
    #[must_use]
    pub fn last_descendant(&self, id: SectionId) -> SectionId {
        let mut current = id;
        for _ in 0..=MAX_DEPTH {
            match self.children(current).last() {
                Some(child) => current = *child,
                None => break,
            }
        }
        current
    }

    /// Pre-order successor within the course.
    #[must_use]
    pub fn next(&self, id: SectionId) -> Option<SectionId> {
        if !self.contains(id) {
            return None;
        }
        if let Some(first) = self.children(id).first() {
            return Some(*first);
        }
        let mut current = id;
        for _ in 0..=MAX_DEPTH {
            if let Some(sibling) = self.following_sibling(current) {
                return Some(sibling);
            }
            current = self.get(current)?.parent_id()?;
        }
        None
    }

    /// Pre-order predecessor within the course.
    #[must_use]
    pub fn previous(&self, id: SectionId) -> Option<SectionId> {
        let section = self.get(id)?;
        match self.preceding_sibling(id) {
            Some(sibling) => Some(self.last_descendant(sibling)),
            None => section.parent_id(),
        }
    }

    /// All sections in pre-order.
    #[must_use]
    pub fn preorder(&self) -> Vec<SectionId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        for root in &self.roots {
            self.collect_subtree(*root, &mut out);
        }
        out
    }

    /// Strict descendants of `id` in pre-order.
    #[must_use]
    pub fn descendants(&self, id: SectionId) -> Vec<SectionId> {
        let mut out = Vec::new();
        for child in self.children(id) {
            self.collect_subtree(*child, &mut out);
        }
        out
    }

    fn collect_subtree(&self, id: SectionId, out: &mut Vec<SectionId>) {
        let mut stack = vec![(id, 0_usize)];
        while let Some((current, depth)) = stack.pop() {
            out.push(current);
            if depth >= MAX_DEPTH {
                continue;
            }
            for child in self.children(current).iter().rev() {
                stack.push((*child, depth + 1));
            }
        }
    }

    /// Ordering index for a section appended under `parent`:
    /// max sibling index + 1, or 0 without siblings.
    #[must_use]
    pub fn next_order_index(&self, parent: Option<SectionId>) -> i64 {
        let siblings = match parent {
            Some(p) => self.children(p),
            None => self.roots.as_slice(),
        };
        siblings
            .iter()
            .filter_map(|id| self.get(*id))
            .map(Section::order_index)
            .max()
            .map_or(0, |max| max.saturating_add(1))
    }

    /// Check that `section` may hang under `parent` without breaking the forest.
    ///
    /// # Errors
    ///
    /// - `UnknownSection` if `section` is not in the tree.
    /// - `ForeignParent` if `parent` is not in this course.
    /// - `Cycle` if `parent` is `section` itself or one of its descendants.
    pub fn check_parent(
        &self,
        section: SectionId,
        parent: Option<SectionId>,
    ) -> Result<(), TreeError> {
        if !self.contains(section) {
            return Err(TreeError::UnknownSection(section));
        }
        let Some(parent) = parent else {
            return Ok(());
        };
        if !self.contains(parent) {
            return Err(TreeError::ForeignParent {
                section,
                parent,
                course: self.course_id,
            });
        }
        if parent == section || self.is_ancestor(section, parent) {
            return Err(TreeError::Cycle { section, parent });
        }
        if self.depth(parent).unwrap_or(0) + 1 + self.subtree_height(section) > MAX_DEPTH {
            return Err(TreeError::DepthLimit(section));
        }
        Ok(())
    }

    fn subtree_height(&self, id: SectionId) -> usize {
        let base = self.depth(id).unwrap_or(0);
        self.descendants(id)
            .into_iter()
            .filter_map(|d| self.depth(d))
            .map(|d| d - base)
            .max()
            .unwrap_or(0)
    }

    /// Re-parent and/or re-order a section after validating the move.
    ///
    /// # Errors
    ///
    /// See [`SectionTree::check_parent`].
    pub fn place(
        &mut self,
        section: SectionId,
        parent: Option<SectionId>,
        order_index: i64,
    ) -> Result<(), TreeError> {
        self.check_parent(section, parent)?;
        let node = self
            .nodes
            .get_mut(&section)
            .ok_or(TreeError::UnknownSection(section))?;
        node.relocate(parent, order_index)
            .map_err(|_| TreeError::Cycle {
                section,
                parent: parent.unwrap_or(section),
            })?;
        self.reindex()
    }

    /// Consume the tree, yielding its sections in pre-order.
    #[must_use]
    pub fn into_sections(mut self) -> Vec<Section> {
        self.preorder()
            .into_iter()
            .filter_map(|id| self.nodes.remove(&id))
            .collect()
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
