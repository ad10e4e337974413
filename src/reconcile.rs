use crate::error::{ServiceError, ServiceResult};
use crate::grading;
use crate::models::{total_points, Id, Question, QuestionSpec, Quiz, ValidationIssue};
use crate::participant;
use crate::store::QuizStore;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::info;

/// Position in the final question order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Existing(Id),
    /// Index into [`Plan::creates`].
    Created(usize),
}

#[derive(Debug, Default)]
pub struct Plan {
    pub creates: Vec<QuestionSpec>,
    pub updates: Vec<Question>,
    pub deletes: Vec<Id>,
    pub order: Vec<Slot>,
}

/// Diffs a quiz's stored questions against the desired ordered list.
pub fn reconcile(existing: &[Question], desired: &[QuestionSpec]) -> ServiceResult<Plan> {
    let by_id: HashMap<Id, &Question> = existing.iter().map(|q| (q.id, q)).collect();
    let mut kept = HashSet::new();
    let mut plan = Plan::default();

    for (index, spec) in desired.iter().enumerate() {
        match spec.id {
            Some(id) => {
                let current = by_id
                    .get(&id)
                    .ok_or_else(|| ServiceError::NotFound(format!("Question {id} not found in this quiz")))?;
                if !kept.insert(id) {
                    return Err(ServiceError::validation(
                        "question ids must be unique",
                        vec![ValidationIssue::new(format!("questions[{index}].id"), "must be unique")],
                    ));
                }
                plan.updates.push(Question {
                    id,
                    quiz_id: current.quiz_id,
                    question_type: spec.question_type,
                    text: spec.text.trim().to_string(),
                    answer_options: spec.answer_options.clone(),
                    correct_answers: spec.correct_answers.iter().map(|c| c.trim().to_string()).collect(),
                    points: spec.points,
                });
                plan.order.push(Slot::Existing(id));
            }
            None => {
                plan.order.push(Slot::Created(plan.creates.len()));
                plan.creates.push(spec.clone());
            }
        }
    }

    plan.deletes = existing.iter().map(|q| q.id).filter(|id| !kept.contains(id)).collect();
    plan.deletes.sort_unstable();
    Ok(plan)
}

/// Executes a plan and rewrites the quiz's order and total points.
///
/// Answers to edited questions are re-graded, and every participant whose
/// answers were removed or re-graded gets its grading state recomputed.
/// Returns the updated quiz and its questions in display order.
pub async fn apply(store: &dyn QuizStore, mut quiz: Quiz, plan: Plan) -> ServiceResult<(Quiz, Vec<Question>)> {
    let mut affected = BTreeSet::new();
    for id in &plan.deletes {
        for answer in store.find_answers_by_question(*id).await? {
            affected.insert(answer.participant_id);
        }
        let answers = store.delete_answers_for_question(*id).await?;
        store.delete_question(*id).await?;
        info!(quiz_id = quiz.id, question_id = id, answers_removed = answers, "question removed");
    }

    let mut updated: HashMap<Id, Question> = HashMap::with_capacity(plan.updates.len());
    for question in plan.updates {
        store.update_question(&question).await?;
        for mut answer in store.find_answers_by_question(question.id).await? {
            if grading::regrade(&question, &mut answer) {
                answer.updated_at = Utc::now();
                store.update_answer(&answer).await?;
                affected.insert(answer.participant_id);
            }
        }
        updated.insert(question.id, question);
    }

    let mut created = Vec::with_capacity(plan.creates.len());
    for spec in &plan.creates {
        created.push(Some(store.create_question(quiz.id, spec).await?));
    }

    let mut ordered = Vec::with_capacity(plan.order.len());
    for slot in plan.order {
        let question = match slot {
            Slot::Existing(id) => updated.remove(&id),
            Slot::Created(index) => created.get_mut(index).and_then(Option::take),
        };
        if let Some(question) = question {
            ordered.push(question);
        }
    }

    quiz.question_ids = ordered.iter().map(|q| q.id).collect();
    quiz.total_points = total_points(&ordered);
    store.update_quiz(&quiz).await?;

    for participant_id in affected {
        if let Some(found) = store.find_participant(participant_id).await? {
            participant::recompute_grading(store, found).await?;
        }
    }
    Ok((quiz, ordered))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Correctness, NewAnswer, NewQuiz, QuestionType};
    use crate::participant::{find_participant, join, review_answer, submit_answer, Review};
    use crate::store::InMemoryStore;

    fn stored(id: Id, text: &str) -> Question {
        Question {
            id,
            quiz_id: 1,
            question_type: QuestionType::Choice,
            text: text.into(),
            answer_options: vec!["a".into(), "b".into()],
            correct_answers: vec!["a".into()],
            points: 1.0,
        }
    }

    fn spec(id: Option<Id>, text: &str, points: f64) -> QuestionSpec {
        QuestionSpec {
            id,
            question_type: QuestionType::Choice,
            text: text.into(),
            answer_options: vec!["a".into(), "b".into()],
            correct_answers: vec!["b".into()],
            points,
        }
    }

    #[test]
    fn mixed_list_is_split_into_operations() {
        let existing = vec![stored(1, "one"), stored(2, "two"), stored(3, "three")];
        let desired = vec![spec(Some(3), "three!", 2.0), spec(None, "new", 1.0), spec(Some(1), "one", 1.0)];
        let plan = reconcile(&existing, &desired).unwrap();

        assert_eq!(plan.order, vec![Slot::Existing(3), Slot::Created(0), Slot::Existing(1)]);
        assert_eq!(plan.deletes, vec![2]);
        assert_eq!(plan.creates.len(), 1);
        assert_eq!(plan.updates.len(), 2);
        assert_eq!(plan.updates[0].text, "three!");
        assert_eq!(plan.updates[0].correct_answers, vec!["b".to_string()]);
    }

    #[test]
    fn empty_desired_list_deletes_everything() {
        let existing = vec![stored(4, "x"), stored(2, "y")];
        let plan = reconcile(&existing, &[]).unwrap();
        assert_eq!(plan.deletes, vec![2, 4]);
        assert!(plan.order.is_empty());
    }

    #[test]
    fn foreign_question_id_is_not_found() {
        let existing = vec![stored(1, "one")];
        let err = reconcile(&existing, &[spec(Some(42), "stolen", 1.0)]).unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[test]
    fn repeated_question_id_is_rejected() {
        let existing = vec![stored(1, "one")];
        let err = reconcile(&existing, &[spec(Some(1), "a", 1.0), spec(Some(1), "b", 1.0)]).unwrap_err();
        assert!(matches!(err, ServiceError::Validation { .. }));
    }

    #[tokio::test]
    async fn apply_rewrites_order_and_removes_answers_of_deleted_questions() {
        let store = InMemoryStore::default();
        let quiz = store
            .create_quiz(NewQuiz {
                title: "t".into(),
                description: String::new(),
                creator_id: 1,
                duration: 45,
                is_active: true,
            })
            .await
            .unwrap();
        let initial = reconcile(&[], &[spec(None, "first", 1.0), spec(None, "second", 2.0)]).unwrap();
        let (quiz, questions) = apply(&store, quiz, initial).await.unwrap();
        assert_eq!(quiz.total_points, 3.0);

        let doomed = questions[0].id;
        store
            .create_answer(NewAnswer {
                participant_id: 1,
                quiz_id: quiz.id,
                question_id: doomed,
                answer_text: "a".into(),
                correctness: Correctness::Ungraded,
                points: 0.0,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let desired = vec![spec(None, "third", 4.0), spec(Some(questions[1].id), "second", 2.0)];
        let plan = reconcile(&questions, &desired).unwrap();
        let (quiz, ordered) = apply(&store, quiz, plan).await.unwrap();

        assert_eq!(ordered.len(), 2);
        assert_eq!(ordered[0].text, "third");
        assert_eq!(quiz.question_ids, vec![ordered[0].id, questions[1].id]);
        assert_eq!(quiz.total_points, 6.0);
        assert!(store.find_question(doomed).await.unwrap().is_none());
        assert!(store.find_answers(1, quiz.id).await.unwrap().is_empty());
    }

    fn essay(id: Option<Id>, points: f64) -> QuestionSpec {
        QuestionSpec {
            id,
            question_type: QuestionType::Answer,
            text: "Explain".into(),
            answer_options: vec![],
            correct_answers: vec![],
            points,
        }
    }

    async fn live_quiz(store: &InMemoryStore, specs: Vec<QuestionSpec>) -> (Quiz, Vec<Question>) {
        let quiz = store
            .create_quiz(NewQuiz {
                title: "t".into(),
                description: String::new(),
                creator_id: 1,
                duration: 45,
                is_active: true,
            })
            .await
            .unwrap();
        let plan = reconcile(&[], &specs).unwrap();
        apply(store, quiz, plan).await.unwrap()
    }

    fn keep(question: &Question) -> QuestionSpec {
        QuestionSpec {
            id: Some(question.id),
            question_type: question.question_type,
            text: question.text.clone(),
            answer_options: question.answer_options.clone(),
            correct_answers: question.correct_answers.clone(),
            points: question.points,
        }
    }

    #[tokio::test]
    async fn dropping_a_reviewed_question_recomputes_participant_points() {
        let store = InMemoryStore::default();
        let (quiz, questions) = live_quiz(&store, vec![essay(None, 5.0), essay(None, 5.0)]).await;
        let now = Utc::now();
        let (alice, _) = join(&store, quiz.id, "Alice", "S1", now).await.unwrap();
        for (question, points) in questions.iter().zip([5.0, 4.0]) {
            let answer = submit_answer(&store, quiz.id, question.id, alice.id, "text", now).await.unwrap();
            let review = Review { is_correct: true, points: Some(points) };
            review_answer(&store, 1, quiz.id, alice.id, answer.id, review, now).await.unwrap();
        }
        assert_eq!(find_participant(&store, alice.id).await.unwrap().points, Some(9.0));

        let plan = reconcile(&questions, &[keep(&questions[1])]).unwrap();
        apply(&store, quiz, plan).await.unwrap();

        let reloaded = find_participant(&store, alice.id).await.unwrap();
        assert!(reloaded.is_graded);
        assert_eq!(reloaded.points, Some(4.0));
    }

    #[tokio::test]
    async fn dropping_the_last_ungraded_answer_completes_grading() {
        let store = InMemoryStore::default();
        let (quiz, questions) = live_quiz(&store, vec![spec(None, "pick", 2.0), essay(None, 5.0)]).await;
        let now = Utc::now();
        let (alice, _) = join(&store, quiz.id, "Alice", "S1", now).await.unwrap();
        submit_answer(&store, quiz.id, questions[0].id, alice.id, "b", now).await.unwrap();
        submit_answer(&store, quiz.id, questions[1].id, alice.id, "pending", now).await.unwrap();
        assert!(!find_participant(&store, alice.id).await.unwrap().is_graded);

        let plan = reconcile(&questions, &[keep(&questions[0])]).unwrap();
        apply(&store, quiz, plan).await.unwrap();

        let reloaded = find_participant(&store, alice.id).await.unwrap();
        assert!(reloaded.is_graded);
        assert_eq!(reloaded.points, Some(2.0));
    }

    #[tokio::test]
    async fn editing_a_choice_question_regrades_its_answers() {
        let store = InMemoryStore::default();
        let (quiz, questions) = live_quiz(&store, vec![spec(None, "pick", 2.0)]).await;
        let now = Utc::now();
        let (alice, _) = join(&store, quiz.id, "Alice", "S1", now).await.unwrap();
        let (bob, _) = join(&store, quiz.id, "Bob", "S2", now).await.unwrap();
        let a = submit_answer(&store, quiz.id, questions[0].id, alice.id, "a", now).await.unwrap();
        let b = submit_answer(&store, quiz.id, questions[0].id, bob.id, "b", now).await.unwrap();
        assert_eq!(a.correctness, Correctness::Incorrect);
        assert_eq!(b.points, 2.0);
        review_answer(&store, 1, quiz.id, bob.id, b.id, Review { is_correct: true, points: None }, now)
            .await
            .unwrap();

        let mut edited = keep(&questions[0]);
        edited.correct_answers = vec!["a".into()];
        edited.points = 3.0;
        let plan = reconcile(&questions, &[edited]).unwrap();
        let (quiz, _) = apply(&store, quiz, plan).await.unwrap();
        assert_eq!(quiz.total_points, 3.0);

        let a = store.find_answer(a.id).await.unwrap().unwrap();
        assert_eq!(a.correctness, Correctness::Correct);
        assert_eq!(a.points, 3.0);
        let b = store.find_answer(b.id).await.unwrap().unwrap();
        assert_eq!(b.correctness, Correctness::Incorrect);
        assert_eq!(b.points, 0.0);
        let bob = find_participant(&store, bob.id).await.unwrap();
        assert!(bob.is_graded);
        assert_eq!(bob.points, Some(0.0));
    }
}
