use crate::error::{ServiceError, ServiceResult, StoreError};
use crate::grading;
use crate::models::{Id, NewAnswer, NewParticipant, Participant, ParticipantAnswer, Question, Quiz, ValidationIssue};
use crate::store::QuizStore;
use chrono::{DateTime, Utc};
use tracing::info;

/// Loads a quiz that has not been soft-deleted.
pub async fn live_quiz(store: &dyn QuizStore, quiz_id: Id) -> ServiceResult<Quiz> {
    match store.find_quiz(quiz_id).await? {
        Some(quiz) if !quiz.is_deleted => Ok(quiz),
        _ => Err(ServiceError::not_found("Quiz")),
    }
}

/// Trims a participant field and rejects it if nothing is left.
fn required<'a>(field: &str, value: &'a str) -> ServiceResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::validation(
            "invalid participant data",
            vec![ValidationIssue::new(field, "must not be blank")],
        ));
    }
    Ok(trimmed)
}

pub async fn find_participant(store: &dyn QuizStore, participant_id: Id) -> ServiceResult<Participant> {
    store
        .find_participant(participant_id)
        .await?
        .ok_or_else(|| ServiceError::not_found("Participant"))
}

/// Joins a quiz, or returns the existing attempt for the same student.
///
/// The flag is `true` only when a new participant was created.
pub async fn join(
    store: &dyn QuizStore,
    quiz_id: Id,
    name: &str,
    student_id: &str,
    now: DateTime<Utc>,
) -> ServiceResult<(Participant, bool)> {
    let name = required("name", name)?;
    let student_id = required("studentId", student_id)?;
    let quiz = live_quiz(store, quiz_id).await?;
    if !quiz.is_active {
        return Err(ServiceError::Forbidden("Quiz is not active".into()));
    }

    if let Some(existing) = store.find_participant_by_student(quiz.id, student_id).await? {
        return Ok((existing, false));
    }

    let created = store
        .create_participant(NewParticipant {
            quiz_id: quiz.id,
            name: name.to_string(),
            student_id: student_id.to_string(),
            created_at: now,
        })
        .await;

    match created {
        Ok(participant) => {
            info!(quiz_id = quiz.id, participant_id = participant.id, "participant joined");
            Ok((participant, true))
        }
        Err(StoreError::Duplicate(_)) => {
            // Lost a race with a concurrent join of the same student.
            let existing = store
                .find_participant_by_student(quiz.id, student_id)
                .await?
                .ok_or_else(|| ServiceError::not_found("Participant"))?;
            Ok((existing, false))
        }
        Err(err) => Err(err.into()),
    }
}

async fn question_of(store: &dyn QuizStore, quiz: &Quiz, question_id: Id) -> ServiceResult<Question> {
    match store.find_question(question_id).await? {
        Some(question) if question.quiz_id == quiz.id => Ok(question),
        _ => Err(ServiceError::not_found("Question")),
    }
}

pub async fn participant_of(store: &dyn QuizStore, quiz: &Quiz, participant_id: Id) -> ServiceResult<Participant> {
    match store.find_participant(participant_id).await? {
        Some(participant) if participant.quiz_id == quiz.id => Ok(participant),
        _ => Err(ServiceError::not_found("Participant")),
    }
}

/// Stores (or replaces) a participant's answer to one question and auto-grades it.
pub async fn submit_answer(
    store: &dyn QuizStore,
    quiz_id: Id,
    question_id: Id,
    participant_id: Id,
    answer_text: &str,
    now: DateTime<Utc>,
) -> ServiceResult<ParticipantAnswer> {
    let quiz = live_quiz(store, quiz_id).await?;
    let question = question_of(store, &quiz, question_id).await?;
    let participant = participant_of(store, &quiz, participant_id).await?;

    if !quiz.is_active {
        return Err(ServiceError::Forbidden("Quiz is not active".into()));
    }
    if now > quiz.deadline_for(participant.created_at) {
        return Err(ServiceError::Forbidden("Time for this quiz is over".into()));
    }

    let score = grading::score(&question, answer_text);
    let existing = store.find_answer_by_question(participant.id, question.id).await?;
    let answer = match existing {
        Some(answer) => overwrite_answer(store, answer, answer_text, score, now).await?,
        None => {
            let created = store
                .create_answer(NewAnswer {
                    participant_id: participant.id,
                    quiz_id: quiz.id,
                    question_id: question.id,
                    answer_text: answer_text.to_string(),
                    correctness: score.correctness,
                    points: score.points,
                    created_at: now,
                })
                .await;
            match created {
                Ok(answer) => answer,
                Err(StoreError::Duplicate(_)) => {
                    let answer = store
                        .find_answer_by_question(participant.id, question.id)
                        .await?
                        .ok_or_else(|| ServiceError::not_found("Answer"))?;
                    overwrite_answer(store, answer, answer_text, score, now).await?
                }
                Err(err) => return Err(err.into()),
            }
        }
    };

    info!(
        quiz_id = quiz.id,
        participant_id = participant.id,
        question_id = question.id,
        is_correct = ?answer.correctness.as_flag(),
        "answer submitted"
    );

    if participant.is_graded {
        recompute_grading(store, participant).await?;
    }
    Ok(answer)
}

async fn overwrite_answer(
    store: &dyn QuizStore,
    mut answer: ParticipantAnswer,
    answer_text: &str,
    score: grading::Score,
    now: DateTime<Utc>,
) -> ServiceResult<ParticipantAnswer> {
    answer.answer_text = answer_text.to_string();
    answer.correctness = score.correctness;
    answer.points = score.points;
    answer.updated_at = now;
    store.update_answer(&answer).await?;
    Ok(answer)
}

pub async fn mark_completed(store: &dyn QuizStore, participant_id: Id) -> ServiceResult<Participant> {
    let mut participant = find_participant(store, participant_id).await?;
    if !participant.has_completed {
        participant.has_completed = true;
        store.update_participant(&participant).await?;
        info!(quiz_id = participant.quiz_id, participant_id = participant.id, "participant finished");
    }
    Ok(participant)
}

pub async fn update_participant(
    store: &dyn QuizStore,
    participant_id: Id,
    name: Option<&str>,
    student_id: Option<&str>,
) -> ServiceResult<Participant> {
    let name = name.map(|n| required("name", n)).transpose()?;
    let student_id = student_id.map(|s| required("studentId", s)).transpose()?;
    let mut participant = find_participant(store, participant_id).await?;
    if let Some(name) = name {
        participant.name = name.to_string();
    }
    if let Some(student_id) = student_id {
        participant.student_id = student_id.to_string();
    }

    match store.update_participant(&participant).await {
        Ok(()) => Ok(participant),
        Err(StoreError::Duplicate(_)) => Err(ServiceError::Conflict(
            "Another participant with this student id already joined the quiz".into(),
        )),
        Err(StoreError::Missing(_)) => Err(ServiceError::not_found("Participant")),
        Err(err) => Err(err.into()),
    }
}

/// Recomputes the participant-level grading state from its answers.
///
/// A participant without answers has nothing to grade and stays ungraded.
pub async fn recompute_grading(store: &dyn QuizStore, mut participant: Participant) -> ServiceResult<Participant> {
    let answers = store.find_answers(participant.id, participant.quiz_id).await?;
    let graded = !answers.is_empty() && answers.iter().all(|a| a.correctness.is_defined());
    let points = graded.then(|| answers.iter().map(|a| a.points).sum::<f64>());

    if participant.is_graded != graded || participant.points != points {
        if graded != participant.is_graded {
            info!(participant_id = participant.id, graded, "participant grading changed");
        }
        participant.is_graded = graded;
        participant.points = points;
        store.update_participant(&participant).await?;
    }
    Ok(participant)
}

pub struct Review {
    pub is_correct: bool,
    pub points: Option<f64>,
}

/// Manual review of one answer by the quiz owner.
pub async fn review_answer(
    store: &dyn QuizStore,
    reviewer_id: Id,
    quiz_id: Id,
    participant_id: Id,
    answer_id: Id,
    review: Review,
    now: DateTime<Utc>,
) -> ServiceResult<(ParticipantAnswer, Participant)> {
    let quiz = live_quiz(store, quiz_id).await?;
    if !quiz.is_owned_by(reviewer_id) {
        return Err(ServiceError::Forbidden("You are not the owner of this quiz".into()));
    }
    let participant = participant_of(store, &quiz, participant_id).await?;
    let mut answer = match store.find_answer(answer_id).await? {
        Some(answer) if answer.participant_id == participant.id && answer.quiz_id == quiz.id => answer,
        _ => return Err(ServiceError::not_found("Answer")),
    };
    let question = store
        .find_question(answer.question_id)
        .await?
        .ok_or_else(|| ServiceError::not_found("Question"))?;

    grading::apply_review(&question, &mut answer, review.is_correct, review.points)?;
    answer.updated_at = now;
    store.update_answer(&answer).await?;
    info!(
        quiz_id = quiz.id,
        participant_id = participant.id,
        answer_id = answer.id,
        points = answer.points,
        "answer reviewed"
    );

    let participant = recompute_grading(store, participant).await?;
    Ok((answer, participant))
}
