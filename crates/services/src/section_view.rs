//! Reader-facing aggregates returned by the section and course services.
//!
//! Tests are always redacted: options carry no correctness flag.

use std::collections::HashMap;

use serde::Serialize;

use course_core::SectionTree;
use course_core::model::{
    AnswerOption, Course, OptionView, Question, QuestionId, Section, SectionId, Test, TestOwner,
};
use storage::repository::{StorageError, TestRepository};

/// A question with its options in display order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionView {
    pub question: Question,
    pub options: Vec<OptionView>,
}

/// A published test with its questions in display order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestView {
    pub test: Test,
    pub questions: Vec<QuestionView>,
}

/// A section with its materialized subtree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionNode {
    pub section: Section,
    pub tests: Vec<TestView>,
    pub children: Vec<SectionNode>,
}

/// A single section with its immediate surroundings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionDetail {
    pub section: Section,
    pub course: Course,
    pub parent: Option<Section>,
    pub children: Vec<Section>,
    pub tests: Vec<TestView>,
}

/// Build the redacted view of one test.
pub(crate) async fn load_test_view(
    tests: &dyn TestRepository,
    test: Test,
) -> Result<TestView, StorageError> {
    let questions = tests.questions_for_test(test.id()).await?;
    let options = tests.options_for_test(test.id()).await?;
    Ok(TestView {
        test,
        questions: attach_options(questions, &options),
    })
}

/// Published tests among `candidates`, fully loaded, in id order.
pub(crate) async fn published_views(
    tests: &dyn TestRepository,
    candidates: impl IntoIterator<Item = Test>,
) -> Result<Vec<TestView>, StorageError> {
    let mut published: Vec<Test> = candidates.into_iter().filter(Test::is_published).collect();
    published.sort_by_key(Test::id);
    let mut views = Vec::with_capacity(published.len());
    for test in published {
        views.push(load_test_view(tests, test).await?);
    }
    Ok(views)
}

fn attach_options(questions: Vec<Question>, options: &[AnswerOption]) -> Vec<QuestionView> {
    let mut by_question: HashMap<QuestionId, Vec<OptionView>> = HashMap::new();
    // options arrive sorted by (order_index, id)
    for option in options {
        by_question
            .entry(option.question_id())
            .or_default()
            .push(option.view());
    }
    questions
        .into_iter()
        .map(|question| {
            let options = by_question.remove(&question.id()).unwrap_or_default();
            QuestionView { question, options }
        })
        .collect()
}

/// Group section-owned views by their section.
pub(crate) fn views_by_section(views: Vec<TestView>) -> HashMap<SectionId, Vec<TestView>> {
    let mut out: HashMap<SectionId, Vec<TestView>> = HashMap::new();
    for view in views {
        if let TestOwner::Section(section_id) = view.test.owner() {
            out.entry(section_id).or_default().push(view);
        }
    }
    out
}

/// Materialize the subtree rooted at `id`.
pub(crate) fn build_node(
    tree: &SectionTree,
    id: SectionId,
    tests: &HashMap<SectionId, Vec<TestView>>,
) -> Option<SectionNode> {
    let section = tree.get(id)?.clone();
    let children = tree
        .children(id)
        .iter()
        .filter_map(|child| build_node(tree, *child, tests))
        .collect();
    Some(SectionNode {
        section,
        tests: tests.get(&id).cloned().unwrap_or_default(),
        children,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use course_core::model::{OptionId, QuestionKind, TestId};

    #[test]
    fn attach_options_groups_by_question_and_redacts() {
        let q1 = Question::new(QuestionId::new(1), TestId::new(1), "Q1", QuestionKind::SingleChoice, 1, 0)
            .unwrap();
        let q2 = Question::new(QuestionId::new(2), TestId::new(1), "Q2", QuestionKind::SingleChoice, 1, 1)
            .unwrap();
        let options = vec![
            AnswerOption::new(OptionId::new(10), QuestionId::new(1), "a", true, 0).unwrap(),
            AnswerOption::new(OptionId::new(11), QuestionId::new(1), "b", false, 1).unwrap(),
            AnswerOption::new(OptionId::new(12), QuestionId::new(2), "c", true, 0).unwrap(),
        ];

        let views = attach_options(vec![q1, q2], &options);
        assert_eq!(views.len(), 2);
        let first: Vec<OptionId> = views[0].options.iter().map(|o| o.id).collect();
        assert_eq!(first, vec![OptionId::new(10), OptionId::new(11)]);
        assert_eq!(views[1].options.len(), 1);

        let json = serde_json::to_value(&views[0]).unwrap();
        assert!(json["options"][0].get("is_correct").is_none());
    }
}
