use crate::error::ServiceResult;
use crate::models::{Correctness, Id, Participant, ParticipantAnswer, PublicQuestion, Question, Quiz};
use crate::store::QuizStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// One question of the quiz and the participant's answer to it, if any.
#[derive(Debug, Clone, Serialize)]
pub struct ResultRow {
    pub question: Question,
    pub answer: Option<ParticipantAnswer>,
}

/// Quiz owner view of a row. `correct` compares the stored text with the
/// question's correct answers, which is only advisory for free-text questions.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewRow {
    pub question: Question,
    pub answer: Option<ParticipantAnswer>,
    pub correct: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAnswer {
    pub id: Id,
    pub answer_text: String,
    /// Hidden until the participant is graded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<Correctness>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentRow {
    pub question: PublicQuestion,
    pub answer: Option<StudentAnswer>,
}

/// Pairs questions with answers following `question_ids`.
///
/// Every id that resolves to a question yields exactly one row; answers
/// are matched by question id, so their insertion order does not matter.
pub fn pair_in_order(
    question_ids: &[Id],
    questions: Vec<Question>,
    answers: Vec<ParticipantAnswer>,
) -> Vec<ResultRow> {
    let mut by_id: HashMap<Id, Question> = questions.into_iter().map(|q| (q.id, q)).collect();
    let mut answer_by_question: HashMap<Id, ParticipantAnswer> = HashMap::new();
    for answer in answers {
        answer_by_question.entry(answer.question_id).or_insert(answer);
    }

    question_ids
        .iter()
        .filter_map(|id| by_id.remove(id))
        .map(|question| {
            let answer = answer_by_question.remove(&question.id);
            ResultRow { question, answer }
        })
        .collect()
}

/// The quiz's questions in display order.
pub async fn ordered_questions(store: &dyn QuizStore, quiz: &Quiz) -> ServiceResult<Vec<Question>> {
    let mut by_id: HashMap<Id, Question> = store
        .find_questions_by_quiz(quiz.id)
        .await?
        .into_iter()
        .map(|q| (q.id, q))
        .collect();
    Ok(quiz.question_ids.iter().filter_map(|id| by_id.remove(id)).collect())
}

pub async fn build_results(store: &dyn QuizStore, quiz: &Quiz, participant: &Participant) -> ServiceResult<Vec<ResultRow>> {
    let questions = store.find_questions_by_quiz(quiz.id).await?;
    let answers = store.find_answers(participant.id, quiz.id).await?;
    Ok(pair_in_order(&quiz.question_ids, questions, answers))
}

pub fn review_rows(rows: Vec<ResultRow>) -> Vec<ReviewRow> {
    rows.into_iter()
        .map(|row| {
            let correct = row
                .answer
                .as_ref()
                .map(|a| row.question.accepts(&a.answer_text))
                .unwrap_or(false);
            ReviewRow {
                question: row.question,
                answer: row.answer,
                correct,
            }
        })
        .collect()
}

pub fn student_rows(rows: &[ResultRow], graded: bool) -> Vec<StudentRow> {
    rows.iter()
        .map(|row| StudentRow {
            question: PublicQuestion::from(&row.question),
            answer: row.answer.as_ref().map(|a| StudentAnswer {
                id: a.id,
                answer_text: a.answer_text.clone(),
                is_correct: graded.then_some(a.correctness),
                points: graded.then_some(a.points),
                updated_at: a.updated_at,
            }),
        })
        .collect()
}
