use std::collections::BTreeSet;

use course_core::TreeError;
use course_core::model::{
    AnswerSheet, CourseId, OptionDraft, QuestionKind, SectionId, TestId, TestOwner, UserId,
};
use course_core::time::fixed_clock;
use services::{
    AppServices, NewCourse, NewQuestion, NewSection, NewTest, ReorderItem, SectionServiceError,
};
use storage::repository::Storage;

fn in_memory() -> AppServices {
    AppServices::from_storage(&Storage::in_memory(), fixed_clock())
}

async fn sqlite(name: &str) -> AppServices {
    AppServices::new_sqlite(
        &format!("sqlite:file:{name}?mode=memory&cache=shared"),
        fixed_clock(),
    )
    .await
    .expect("sqlite services")
}

async fn course(app: &AppServices, title: &str) -> CourseId {
    app.courses()
        .create_course(NewCourse {
            title: title.into(),
            category: "programming".into(),
            is_published: true,
            order_index: None,
        })
        .await
        .unwrap()
        .id()
}

async fn section(
    app: &AppServices,
    course_id: CourseId,
    parent_id: Option<SectionId>,
    title: &str,
) -> SectionId {
    app.sections()
        .create_section(NewSection {
            course_id,
            parent_id,
            title: title.into(),
            content: None,
            order_index: None,
        })
        .await
        .unwrap()
        .section
        .id()
}

/// A one-question test; the first option is the correct one.
async fn quiz(app: &AppServices, owner: TestOwner) -> TestId {
    let test = app
        .courses()
        .create_test(NewTest {
            owner,
            title: "Quiz".into(),
            passing_score: 100,
            duration_minutes: 5,
            is_published: true,
        })
        .await
        .unwrap();
    app.courses()
        .add_question(
            test.id(),
            NewQuestion {
                text: "Pick the first".into(),
                kind: QuestionKind::SingleChoice,
                points: 1,
                order_index: None,
                options: vec![OptionDraft::new("first", true), OptionDraft::new("second", false)],
            },
        )
        .await
        .unwrap();
    test.id()
}

async fn answer(app: &AppServices, test_id: TestId, correct: bool) -> AnswerSheet {
    let view = app.courses().get_test(test_id).await.unwrap();
    view.questions
        .iter()
        .map(|q| {
            let pick = if correct { &q.options[0] } else { &q.options[1] };
            (q.question.id(), BTreeSet::from([pick.id]))
        })
        .collect()
}

async fn pass(app: &AppServices, user: UserId, test_id: TestId) -> u8 {
    let sheet = answer(app, test_id, true).await;
    app.submissions()
        .submit_test(user, test_id, sheet)
        .await
        .unwrap()
        .course_progress
        .completion_percent()
}

async fn test_based_completion(app: AppServices) {
    let user = UserId::new(1);
    let c = course(&app, "Tests only").await;
    let t1 = quiz(&app, TestOwner::Course(c)).await;
    let t2 = quiz(&app, TestOwner::Course(c)).await;

    let sheet = answer(&app, t1, false).await;
    let failed = app.submissions().submit_test(user, t1, sheet).await.unwrap();
    assert!(!failed.result.passed());
    assert_eq!(failed.course_progress.completion_percent(), 0);

    assert_eq!(pass(&app, user, t1).await, 50);
    // passing the same test twice does not count twice
    assert_eq!(pass(&app, user, t1).await, 50);
    assert_eq!(pass(&app, user, t2).await, 100);

    quiz(&app, TestOwner::Course(c)).await;
    let recomputed = app
        .progress()
        .recompute_course_completion(user, c)
        .await
        .unwrap();
    assert_eq!(recomputed.completion_percent(), 67);

    let history = app.submissions().results_for_user(user, 10).await.unwrap();
    assert_eq!(history.len(), 4);
}

async fn section_based_completion_and_reset(app: AppServices) {
    let user = UserId::new(2);
    let c = course(&app, "Reading only").await;
    let mut ids = Vec::new();
    for title in ["One", "Two", "Three", "Four"] {
        ids.push(section(&app, c, None, title).await);
    }

    let progress = app.progress();
    progress.get_or_create_course_progress(user, c).await.unwrap();
    let first = progress.toggle_section_visited(user, ids[0], true).await.unwrap();
    assert_eq!(first.course.completion_percent(), 25);
    for id in &ids[1..] {
        progress.toggle_section_visited(user, *id, true).await.unwrap();
    }
    let full = progress.get_or_create_course_progress(user, c).await.unwrap();
    assert_eq!(full.completion_percent(), 100);
    assert_eq!(full.last_section_id(), Some(ids[3]));

    let reset = progress.reset_course_progress(user, c).await.unwrap();
    assert_eq!(reset.completion_percent(), 0);
    assert_eq!(reset.last_section_id(), None);
    let visits = progress.section_progress_for_course(user, c).await.unwrap();
    assert_eq!(visits.len(), 4);
    assert!(visits.iter().all(|v| !v.progress.visited && v.progress.visited_at.is_none()));

    let stored = progress.get_or_create_course_progress(user, c).await.unwrap();
    assert_eq!(stored.completion_percent(), 0);
}

async fn reset_keeps_passed_tests(app: AppServices) {
    let user = UserId::new(3);
    let c = course(&app, "Retake").await;
    let s = section(&app, c, None, "Intro").await;
    let t = quiz(&app, TestOwner::Section(s)).await;
    assert_eq!(pass(&app, user, t).await, 100);

    let reset = app.progress().reset_course_progress(user, c).await.unwrap();
    assert_eq!(reset.completion_percent(), 0);

    let again = app
        .progress()
        .recompute_course_completion(user, c)
        .await
        .unwrap();
    assert_eq!(again.completion_percent(), 100);
}

async fn reorder_is_atomic(app: AppServices) {
    let c = course(&app, "Atomic").await;
    let a = section(&app, c, None, "A").await;
    let b = section(&app, c, None, "B").await;
    let d = section(&app, c, None, "C").await;

    let batch = [
        ReorderItem {
            section_id: a,
            order_index: 10,
            parent_id: None,
        },
        ReorderItem {
            section_id: b,
            order_index: 11,
            parent_id: None,
        },
        ReorderItem {
            section_id: d,
            order_index: 12,
            parent_id: None,
        },
        ReorderItem {
            section_id: SectionId::new(999_999),
            order_index: 13,
            parent_id: None,
        },
    ];
    let err = app.sections().reorder_sections(&batch).await.unwrap_err();
    assert!(err.is_not_found());

    let order: Vec<i64> = app
        .sections()
        .list_root_sections(c)
        .await
        .unwrap()
        .iter()
        .map(|n| n.section.order_index())
        .collect();
    assert_eq!(order, vec![0, 1, 2]);

    app.sections().reorder_sections(&batch[..3]).await.unwrap();
    let moved = app.sections().get_section(a).await.unwrap();
    assert_eq!(moved.section.order_index(), 10);
}

async fn delete_cascades_to_subtree_and_tests(app: AppServices) {
    let c = course(&app, "Cascade").await;
    let parent = section(&app, c, None, "Parent").await;
    let left = section(&app, c, Some(parent), "Left").await;
    let right = section(&app, c, Some(parent), "Right").await;
    let t = quiz(&app, TestOwner::Section(parent)).await;

    app.sections().delete_section(parent).await.unwrap();

    for id in [parent, left, right] {
        let err = app.sections().get_section(id).await.unwrap_err();
        assert!(matches!(err, SectionServiceError::SectionNotFound(_)));
    }
    assert!(app.courses().get_test(t).await.unwrap_err().is_not_found());
    assert!(app.sections().list_sections(c).await.unwrap().is_empty());
}

async fn navigation_covers_every_section(app: AppServices) {
    let c = course(&app, "Walk").await;
    let r1 = section(&app, c, None, "R1").await;
    let c1 = section(&app, c, Some(r1), "C1").await;
    let g1 = section(&app, c, Some(c1), "G1").await;
    let r2 = section(&app, c, None, "R2").await;

    let mut seen = vec![r1];
    let mut cursor = r1;
    while let Some(next) = app.sections().next_section(cursor).await.unwrap() {
        seen.push(next.id());
        cursor = next.id();
    }
    assert_eq!(seen, vec![r1, c1, g1, r2]);

    let back = app.sections().previous_section(r2).await.unwrap().unwrap();
    assert_eq!(back.id(), g1);

    let crumbs: Vec<SectionId> = app
        .sections()
        .breadcrumb(g1)
        .await
        .unwrap()
        .iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(crumbs, vec![r1, c1, g1]);
}

async fn crossing_moves_keep_the_forest(app: AppServices) {
    let c = course(&app, "Crossing").await;
    for round in 0..10 {
        let a = section(&app, c, None, &format!("A{round}")).await;
        let b = section(&app, c, None, &format!("B{round}")).await;

        let sections = app.sections();
        let (under_b, under_a) = tokio::join!(
            sections.move_section(a, Some(Some(b)), None),
            sections.move_section(b, Some(Some(a)), None),
        );
        assert_eq!(
            under_b.is_ok() as u8 + under_a.is_ok() as u8,
            1,
            "round {round}: exactly one crossing move may win"
        );
        let loser = under_b.err().or(under_a.err()).unwrap();
        assert!(matches!(
            loser,
            SectionServiceError::InvariantViolation(TreeError::Cycle { .. })
        ));
        app.sections().list_sections(c).await.unwrap();
    }
}

async fn title_edits_do_not_undo_moves(app: AppServices) {
    let c = course(&app, "Edits").await;
    let a = section(&app, c, None, "A").await;
    let b = section(&app, c, None, "B").await;

    let sections = app.sections();
    let patch = services::SectionPatch {
        title: Some("B renamed".into()),
        ..services::SectionPatch::default()
    };
    let (moved, renamed) = tokio::join!(
        sections.move_section(b, Some(Some(a)), None),
        sections.update_section(b, patch),
    );
    moved.unwrap();
    renamed.unwrap();

    let stored = app.sections().get_section(b).await.unwrap();
    assert_eq!(stored.section.parent_id(), Some(a));
    assert_eq!(stored.section.title(), "B renamed");
}

#[tokio::test]
async fn in_memory_test_based_completion() {
    test_based_completion(in_memory()).await;
}

#[tokio::test]
async fn in_memory_section_based_completion_and_reset() {
    section_based_completion_and_reset(in_memory()).await;
}

#[tokio::test]
async fn in_memory_reset_keeps_passed_tests() {
    reset_keeps_passed_tests(in_memory()).await;
}

#[tokio::test]
async fn in_memory_reorder_is_atomic() {
    reorder_is_atomic(in_memory()).await;
}

#[tokio::test]
async fn in_memory_delete_cascades() {
    delete_cascades_to_subtree_and_tests(in_memory()).await;
}

#[tokio::test]
async fn in_memory_navigation() {
    navigation_covers_every_section(in_memory()).await;
}

#[tokio::test]
async fn sqlite_test_based_completion() {
    test_based_completion(sqlite("flow_tests").await).await;
}

#[tokio::test]
async fn sqlite_section_based_completion_and_reset() {
    section_based_completion_and_reset(sqlite("flow_sections").await).await;
}

#[tokio::test]
async fn sqlite_reset_keeps_passed_tests() {
    reset_keeps_passed_tests(sqlite("flow_retake").await).await;
}

#[tokio::test]
async fn sqlite_reorder_is_atomic() {
    reorder_is_atomic(sqlite("flow_reorder").await).await;
}

#[tokio::test]
async fn sqlite_delete_cascades() {
    delete_cascades_to_subtree_and_tests(sqlite("flow_cascade").await).await;
}

#[tokio::test]
async fn sqlite_navigation() {
    navigation_covers_every_section(sqlite("flow_walk").await).await;
}

#[tokio::test]
async fn in_memory_crossing_moves() {
    crossing_moves_keep_the_forest(in_memory()).await;
}

#[tokio::test]
async fn in_memory_title_edits_do_not_undo_moves() {
    title_edits_do_not_undo_moves(in_memory()).await;
}

#[tokio::test]
async fn sqlite_crossing_moves() {
    crossing_moves_keep_the_forest(sqlite("flow_crossing").await).await;
}

#[tokio::test]
async fn sqlite_title_edits_do_not_undo_moves() {
    title_edits_do_not_undo_moves(sqlite("flow_edits").await).await;
}
