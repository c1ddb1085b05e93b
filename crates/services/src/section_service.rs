use std::sync::Arc;

use course_core::model::{Course, CourseId, Section, SectionId, TestOwner};
use course_core::tree::{Crumb, MAX_DEPTH, SectionTree, TreeError};
use storage::repository::{
    CourseRepository, NewSectionRecord, SectionPlacement, SectionRepository, TestRepository,
};
use tracing::{debug, info};

use crate::Clock;
use crate::error::SectionServiceError;
use crate::keyed_lock::KeyedLock;
use crate::section_view::{
    SectionDetail, SectionNode, build_node, published_views, views_by_section,
};

/// Input for `SectionService::create_section`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSection {
    pub course_id: CourseId,
    pub parent_id: Option<SectionId>,
    pub title: String,
    pub content: Option<String>,
    /// Appended after the last sibling when omitted.
    pub order_index: Option<i64>,
}

/// Partial update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionPatch {
    pub title: Option<String>,
    /// `Some(None)` clears the content.
    pub content: Option<Option<String>>,
    pub order_index: Option<i64>,
}

/// One entry of an atomic reorder batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReorderItem {
    pub section_id: SectionId,
    pub order_index: i64,
    /// `None` keeps the parent, `Some(None)` promotes to root.
    pub parent_id: Option<Option<SectionId>>,
}

/// Owns the section forest of every course: CRUD, moves and navigation.
///
/// Writes to one course are serialized within the process, so each change is
/// checked against the tree it is applied to.
#[derive(Clone)]
pub struct SectionService {
    clock: Clock,
    courses: Arc<dyn CourseRepository>,
    sections: Arc<dyn SectionRepository>,
    tests: Arc<dyn TestRepository>,
    locks: Arc<KeyedLock<CourseId>>,
}

impl SectionService {
    #[must_use]
    pub fn new(
        clock: Clock,
        courses: Arc<dyn CourseRepository>,
        sections: Arc<dyn SectionRepository>,
        tests: Arc<dyn TestRepository>,
    ) -> Self {
        Self {
            clock,
            courses,
            sections,
            tests,
            locks: Arc::new(KeyedLock::new()),
        }
    }

    async fn course(&self, course_id: CourseId) -> Result<Course, SectionServiceError> {
        self.courses
            .get_course(course_id)
            .await?
            .ok_or(SectionServiceError::CourseNotFound(course_id))
    }

    async fn section(&self, id: SectionId) -> Result<Section, SectionServiceError> {
        self.sections
            .get_section(id)
            .await?
            .ok_or(SectionServiceError::SectionNotFound(id))
    }

    async fn tree(&self, course_id: CourseId) -> Result<SectionTree, SectionServiceError> {
        let sections = self.sections.sections_for_course(course_id).await?;
        Ok(SectionTree::build(course_id, sections)?)
    }

    /// Explain why `id` is missing from `tree`: absent entirely, or owned by
    /// another course.
    async fn outside_tree(
        &self,
        tree: &SectionTree,
        id: SectionId,
        parent_of: Option<SectionId>,
    ) -> SectionServiceError {
        match self.sections.get_section(id).await {
            Ok(None) => SectionServiceError::SectionNotFound(id),
            Ok(Some(found)) => match parent_of {
                Some(section) => TreeError::ForeignParent {
                    section,
                    parent: id,
                    course: tree.course_id(),
                }
                .into(),
                None => TreeError::ForeignSection {
                    section: id,
                    expected: tree.course_id(),
                    found: found.course_id(),
                }
                .into(),
            },
            Err(err) => err.into(),
        }
    }

    async fn nodes(
        &self,
        tree: &SectionTree,
        ids: Vec<SectionId>,
    ) -> Result<Vec<SectionNode>, SectionServiceError> {
        let tests = self.tests.tests_for_course(tree.course_id()).await?;
        let section_tests = tests
            .into_iter()
            .filter(|t| matches!(t.owner(), TestOwner::Section(_)));
        let views = views_by_section(published_views(self.tests.as_ref(), section_tests).await?);
        Ok(ids
            .into_iter()
            .filter_map(|id| build_node(tree, id, &views))
            .collect())
    }

    /// Every section of the course in pre-order, each with its subtree and
    /// published tests.
    ///
    /// # Errors
    ///
    /// Returns `SectionServiceError::CourseNotFound` for an unknown course.
    /// Returns `SectionServiceError::InvariantViolation` if the stored forest is corrupt.
    pub async fn list_sections(
        &self,
        course_id: CourseId,
    ) -> Result<Vec<SectionNode>, SectionServiceError> {
        self.course(course_id).await?;
        let tree = self.tree(course_id).await?;
        debug!(course_id = course_id.value(), sections = tree.len(), "listing sections");
        let ids = tree.preorder();
        self.nodes(&tree, ids).await
    }

    /// Root sections of the course with their subtrees.
    ///
    /// # Errors
    ///
    /// Returns `SectionServiceError::CourseNotFound` for an unknown course.
    pub async fn list_root_sections(
        &self,
        course_id: CourseId,
    ) -> Result<Vec<SectionNode>, SectionServiceError> {
        self.course(course_id).await?;
        let tree = self.tree(course_id).await?;
        debug!(course_id = course_id.value(), roots = tree.roots().len(), "listing root sections");
        let ids = tree.roots().to_vec();
        self.nodes(&tree, ids).await
    }

    /// # Errors
    ///
    /// Returns `SectionServiceError::SectionNotFound` if `id` does not resolve.
    pub async fn get_section(&self, id: SectionId) -> Result<SectionDetail, SectionServiceError> {
        let section = self.section(id).await?;
        debug!(section_id = id.value(), "loading section");
        self.detail(section).await
    }

    async fn detail(&self, section: Section) -> Result<SectionDetail, SectionServiceError> {
        let course = self.course(section.course_id()).await?;
        let tree = self.tree(section.course_id()).await?;
        let parent = section.parent_id().and_then(|p| tree.get(p)).cloned();
        let children = tree
            .children(section.id())
            .iter()
            .filter_map(|c| tree.get(*c))
            .cloned()
            .collect();
        let own_tests = self
            .tests
            .tests_for_course(section.course_id())
            .await?
            .into_iter()
            .filter(|t| t.owner() == TestOwner::Section(section.id()));
        let tests = published_views(self.tests.as_ref(), own_tests).await?;
        Ok(SectionDetail {
            section,
            course,
            parent,
            children,
            tests,
        })
    }

    /// Create a section; without an explicit index it is appended after its
    /// last sibling.
    ///
    /// # Errors
    ///
    /// Returns `CourseNotFound`/`SectionNotFound` for unknown course or parent,
    /// `InvariantViolation` if the parent belongs to another course or nesting
    /// would exceed the depth limit, and `Section` for an empty title.
    pub async fn create_section(
        &self,
        input: NewSection,
    ) -> Result<SectionDetail, SectionServiceError> {
        self.course(input.course_id).await?;
        let guard = self.locks.acquire(input.course_id).await;
        let tree = self.tree(input.course_id).await?;

        if let Some(parent) = input.parent_id {
            if !tree.contains(parent) {
                return Err(self.outside_tree(&tree, parent, None).await);
            }
            if tree.depth(parent).unwrap_or(0) + 1 > MAX_DEPTH {
                return Err(TreeError::DepthLimit(parent).into());
            }
        }

        let order_index = input
            .order_index
            .unwrap_or_else(|| tree.next_order_index(input.parent_id));
        // placeholder id, replaced by the store
        let draft = Section::new(
            SectionId::new(0),
            input.course_id,
            input.parent_id,
            input.title,
            input.content,
            order_index,
            self.clock.now(),
        )?;
        let id = self
            .sections
            .insert_section(NewSectionRecord::from_section(&draft))
            .await?;
        info!(
            course_id = input.course_id.value(),
            section_id = id.value(),
            order_index,
            "created section"
        );
        drop(guard);

        let created = self.section(id).await?;
        self.detail(created).await
    }

    /// # Errors
    ///
    /// Returns `SectionServiceError::SectionNotFound` if `id` does not resolve
    /// and `Section` for an empty title.
    pub async fn update_section(
        &self,
        id: SectionId,
        patch: SectionPatch,
    ) -> Result<Section, SectionServiceError> {
        let course_id = self.section(id).await?.course_id();
        let _guard = self.locks.acquire(course_id).await;
        let mut section = self.section(id).await?;
        if let Some(title) = patch.title {
            section.rename(title)?;
        }
        if let Some(content) = patch.content {
            section.set_content(content);
        }
        if let Some(order_index) = patch.order_index {
            section.set_order_index(order_index);
        }
        self.sections.update_section(&section).await?;
        info!(section_id = id.value(), "updated section");
        Ok(section)
    }

    /// Re-parent and/or re-order a section.
    ///
    /// `parent_id: None` keeps the current parent; `Some(None)` promotes the
    /// section to a root. Without an explicit index the section keeps its index
    /// when the parent is unchanged and is appended otherwise.
    ///
    /// # Errors
    ///
    /// Returns `SectionNotFound` for unknown ids and `InvariantViolation` when
    /// the new parent is the section itself, one of its descendants, or lives
    /// in another course.
    pub async fn move_section(
        &self,
        id: SectionId,
        parent_id: Option<Option<SectionId>>,
        order_index: Option<i64>,
    ) -> Result<Section, SectionServiceError> {
        let course_id = self.section(id).await?.course_id();
        let _guard = self.locks.acquire(course_id).await;
        let section = self.section(id).await?;
        let mut tree = self.tree(course_id).await?;

        let parent = parent_id.unwrap_or(section.parent_id());
        if let Some(p) = parent {
            if !tree.contains(p) {
                return Err(self.outside_tree(&tree, p, Some(id)).await);
            }
        }
        let order_index = match order_index {
            Some(index) => index,
            None if parent == section.parent_id() => section.order_index(),
            None => tree.next_order_index(parent),
        };

        tree.place(id, parent, order_index)?;
        let moved = tree
            .get(id)
            .cloned()
            .ok_or(SectionServiceError::SectionNotFound(id))?;
        self.sections
            .apply_placements(&[SectionPlacement {
                section_id: id,
                parent_id: parent,
                order_index,
            }])
            .await?;
        info!(
            section_id = id.value(),
            parent_id = parent.map(|p| p.value()),
            order_index,
            "moved section"
        );
        Ok(moved)
    }

    /// Apply a batch of placements atomically.
    ///
    /// The batch is validated against the course of its first item; all
    /// sections must belong to that course and the final shape must remain a
    /// forest. Nothing is written unless every item is valid.
    ///
    /// # Errors
    ///
    /// Returns `SectionNotFound` if any id does not resolve and
    /// `InvariantViolation` for foreign sections, foreign parents or cycles.
    pub async fn reorder_sections(&self, items: &[ReorderItem]) -> Result<(), SectionServiceError> {
        let Some(first) = items.first() else {
            return Ok(());
        };
        let course_id = self.section(first.section_id).await?.course_id();
        let _guard = self.locks.acquire(course_id).await;
        let mut tree = self.tree(course_id).await?;

        let mut placements = Vec::with_capacity(items.len());
        for item in items {
            let Some(current) = tree.get(item.section_id) else {
                return Err(self.outside_tree(&tree, item.section_id, None).await);
            };
            let parent = item.parent_id.unwrap_or(current.parent_id());
            if let Some(p) = parent {
                if !tree.contains(p) {
                    return Err(self.outside_tree(&tree, p, Some(item.section_id)).await);
                }
            }
            tree.place(item.section_id, parent, item.order_index)?;
            placements.push(SectionPlacement {
                section_id: item.section_id,
                parent_id: parent,
                order_index: item.order_index,
            });
        }

        self.sections.apply_placements(&placements).await?;
        info!(
            course_id = course_id.value(),
            items = placements.len(),
            "reordered sections"
        );
        Ok(())
    }

    /// Delete a section with its whole subtree and section-owned tests.
    /// Returns the number of sections removed.
    ///
    /// # Errors
    ///
    /// Returns `SectionServiceError::SectionNotFound` if `id` does not resolve.
    pub async fn delete_section(&self, id: SectionId) -> Result<u64, SectionServiceError> {
        let section = self.section(id).await?;
        let _guard = self.locks.acquire(section.course_id()).await;
        let removed = self.sections.delete_section_cascade(id).await?;
        info!(
            course_id = section.course_id().value(),
            section_id = id.value(),
            removed,
            "deleted section"
        );
        Ok(removed)
    }

    /// Path from the root down to `id`, inclusive.
    ///
    /// # Errors
    ///
    /// Returns `SectionServiceError::SectionNotFound` if `id` does not resolve.
    pub async fn breadcrumb(&self, id: SectionId) -> Result<Vec<Crumb>, SectionServiceError> {
        let section = self.section(id).await?;
        let tree = self.tree(section.course_id()).await?;
        tree.breadcrumb(id)
            .ok_or(SectionServiceError::SectionNotFound(id))
    }

    /// Pre-order successor within the course, `None` at the end.
    ///
    /// # Errors
    ///
    /// Returns `SectionServiceError::SectionNotFound` if `id` does not resolve.
    pub async fn next_section(&self, id: SectionId) -> Result<Option<Section>, SectionServiceError> {
        let section = self.section(id).await?;
        let tree = self.tree(section.course_id()).await?;
        Ok(tree.next(id).and_then(|n| tree.get(n)).cloned())
    }

    /// Pre-order predecessor within the course, `None` at the start.
    ///
    /// # Errors
    ///
    /// Returns `SectionServiceError::SectionNotFound` if `id` does not resolve.
    pub async fn previous_section(
        &self,
        id: SectionId,
    ) -> Result<Option<Section>, SectionServiceError> {
        let section = self.section(id).await?;
        let tree = self.tree(section.course_id()).await?;
        Ok(tree.previous(id).and_then(|p| tree.get(p)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use course_core::model::{Test, TestId};
    use course_core::time::fixed_clock;
    use storage::repository::{InMemoryRepository, NewCourseRecord, NewTestRecord};

    struct Fixture {
        repo: InMemoryRepository,
        service: SectionService,
        course_id: CourseId,
    }

    async fn fixture() -> Fixture {
        let repo = InMemoryRepository::new();
        let course_id = repo
            .insert_course(NewCourseRecord {
                title: "Rust".into(),
                category: "programming".into(),
                is_published: true,
                order_index: 0,
                created_at: fixed_clock().now(),
            })
            .await
            .unwrap();
        let service = SectionService::new(
            fixed_clock(),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
        );
        Fixture {
            repo,
            service,
            course_id,
        }
    }

    async fn add(f: &Fixture, parent: Option<SectionId>, title: &str) -> SectionId {
        f.service
            .create_section(NewSection {
                course_id: f.course_id,
                parent_id: parent,
                title: title.into(),
                content: None,
                order_index: None,
            })
            .await
            .unwrap()
            .section
            .id()
    }

    #[tokio::test]
    async fn create_appends_after_last_sibling() {
        let f = fixture().await;
        let a = add(&f, None, "A").await;
        let b = add(&f, None, "B").await;
        let a1 = add(&f, Some(a), "A1").await;

        assert_eq!(f.repo.get_section(a).await.unwrap().unwrap().order_index(), 0);
        assert_eq!(f.repo.get_section(b).await.unwrap().unwrap().order_index(), 1);
        assert_eq!(f.repo.get_section(a1).await.unwrap().unwrap().order_index(), 0);

        let detail = f.service.get_section(a).await.unwrap();
        assert_eq!(detail.course.id(), f.course_id);
        assert!(detail.parent.is_none());
        assert_eq!(
            detail.children.iter().map(Section::id).collect::<Vec<_>>(),
            vec![a1]
        );
    }

    #[tokio::test]
    async fn create_rejects_parent_from_other_course() {
        let f = fixture().await;
        let other = f
            .repo
            .insert_course(NewCourseRecord {
                title: "Other".into(),
                category: "misc".into(),
                is_published: true,
                order_index: 1,
                created_at: fixed_clock().now(),
            })
            .await
            .unwrap();
        let foreign = f
            .service
            .create_section(NewSection {
                course_id: other,
                parent_id: None,
                title: "X".into(),
                content: None,
                order_index: None,
            })
            .await
            .unwrap()
            .section
            .id();

        let err = f
            .service
            .create_section(NewSection {
                course_id: f.course_id,
                parent_id: Some(foreign),
                title: "Y".into(),
                content: None,
                order_index: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SectionServiceError::InvariantViolation(TreeError::ForeignSection { .. })
        ));

        let missing = f
            .service
            .create_section(NewSection {
                course_id: f.course_id,
                parent_id: Some(SectionId::new(4040)),
                title: "Z".into(),
                content: None,
                order_index: None,
            })
            .await
            .unwrap_err();
        assert!(missing.is_not_found());
    }

    #[tokio::test]
    async fn move_under_descendant_is_rejected() {
        let f = fixture().await;
        let a = add(&f, None, "A").await;
        let a1 = add(&f, Some(a), "A1").await;
        let a11 = add(&f, Some(a1), "A11").await;

        let err = f
            .service
            .move_section(a, Some(Some(a11)), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SectionServiceError::InvariantViolation(TreeError::Cycle { .. })
        ));
        assert_eq!(f.repo.get_section(a).await.unwrap().unwrap().parent_id(), None);

        let err = f.service.move_section(a, Some(Some(a)), None).await.unwrap_err();
        assert!(matches!(err, SectionServiceError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn move_promotes_and_appends() {
        let f = fixture().await;
        let a = add(&f, None, "A").await;
        let b = add(&f, None, "B").await;
        let a1 = add(&f, Some(a), "A1").await;

        let moved = f.service.move_section(a1, Some(None), None).await.unwrap();
        assert_eq!(moved.parent_id(), None);
        assert_eq!(moved.order_index(), 2);

        let kept = f.service.move_section(b, None, None).await.unwrap();
        assert_eq!(kept.order_index(), 1);
    }

    #[tokio::test]
    async fn reorder_with_missing_section_applies_nothing() {
        let f = fixture().await;
        let a = add(&f, None, "A").await;
        let b = add(&f, None, "B").await;
        let c = add(&f, None, "C").await;

        let err = f
            .service
            .reorder_sections(&[
                ReorderItem {
                    section_id: a,
                    order_index: 2,
                    parent_id: None,
                },
                ReorderItem {
                    section_id: b,
                    order_index: 1,
                    parent_id: None,
                },
                ReorderItem {
                    section_id: c,
                    order_index: 0,
                    parent_id: None,
                },
                ReorderItem {
                    section_id: SectionId::new(999),
                    order_index: 3,
                    parent_id: None,
                },
            ])
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let mut order = Vec::new();
        for id in [a, b, c] {
            order.push(f.repo.get_section(id).await.unwrap().unwrap().order_index());
        }
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn reorder_rejects_cycles_introduced_by_the_batch() {
        let f = fixture().await;
        let a = add(&f, None, "A").await;
        let b = add(&f, None, "B").await;

        let err = f
            .service
            .reorder_sections(&[
                ReorderItem {
                    section_id: a,
                    order_index: 0,
                    parent_id: Some(Some(b)),
                },
                ReorderItem {
                    section_id: b,
                    order_index: 0,
                    parent_id: Some(Some(a)),
                },
            ])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SectionServiceError::InvariantViolation(TreeError::Cycle { .. })
        ));
        assert_eq!(f.repo.get_section(a).await.unwrap().unwrap().parent_id(), None);
    }

    #[tokio::test]
    async fn navigation_walks_preorder() {
        let f = fixture().await;
        let a = add(&f, None, "A").await;
        let a1 = add(&f, Some(a), "A1").await;
        let a2 = add(&f, Some(a), "A2").await;
        let b = add(&f, None, "B").await;

        let next = f.service.next_section(a2).await.unwrap().map(|s| s.id());
        assert_eq!(next, Some(b));
        let prev = f.service.previous_section(b).await.unwrap().map(|s| s.id());
        assert_eq!(prev, Some(a2));
        let prev = f.service.previous_section(a1).await.unwrap().map(|s| s.id());
        assert_eq!(prev, Some(a));
        assert!(f.service.next_section(b).await.unwrap().is_none());
        assert!(f.service.previous_section(a).await.unwrap().is_none());

        let crumbs = f.service.breadcrumb(a2).await.unwrap();
        let ids: Vec<SectionId> = crumbs.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![a, a2]);
        assert_eq!(crumbs[0].title, "A");

        assert!(
            f.service
                .next_section(SectionId::new(777))
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn listings_include_only_published_section_tests() {
        let f = fixture().await;
        let a = add(&f, None, "A").await;
        let a1 = add(&f, Some(a), "A1").await;
        for (title, published) in [("Visible", true), ("Draft", false)] {
            let draft = Test::new(
                TestId::new(0),
                TestOwner::Section(a1),
                title,
                50,
                5,
                published,
                fixed_clock().now(),
            )
            .unwrap();
            f.repo
                .insert_test(NewTestRecord::from_test(&draft))
                .await
                .unwrap();
        }

        let roots = f.service.list_root_sections(f.course_id).await.unwrap();
        assert_eq!(roots.len(), 1);
        let child = &roots[0].children[0];
        assert_eq!(child.section.id(), a1);
        assert_eq!(child.tests.len(), 1);
        assert_eq!(child.tests[0].test.title(), "Visible");

        let all = f.service.list_sections(f.course_id).await.unwrap();
        let ids: Vec<SectionId> = all.iter().map(|n| n.section.id()).collect();
        assert_eq!(ids, vec![a, a1]);

        assert!(
            f.service
                .list_sections(CourseId::new(31337))
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn delete_reports_subtree_size() {
        let f = fixture().await;
        let a = add(&f, None, "A").await;
        add(&f, Some(a), "A1").await;
        add(&f, Some(a), "A2").await;

        assert_eq!(f.service.delete_section(a).await.unwrap(), 3);
        assert!(f.service.get_section(a).await.unwrap_err().is_not_found());
        assert!(f.service.delete_section(a).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn update_applies_partial_patch() {
        let f = fixture().await;
        let a = add(&f, None, "A").await;
        let updated = f
            .service
            .update_section(
                a,
                SectionPatch {
                    content: Some(Some("Body".into())),
                    ..SectionPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.title(), "A");
        assert_eq!(updated.content(), Some("Body"));

        let err = f
            .service
            .update_section(
                a,
                SectionPatch {
                    title: Some("  ".into()),
                    ..SectionPatch::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SectionServiceError::Section(_)));
    }
}
