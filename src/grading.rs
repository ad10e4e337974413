use crate::error::{ServiceError, ServiceResult};
use crate::models::{Correctness, ParticipantAnswer, Question, QuestionType, ValidationIssue};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    pub correctness: Correctness,
    pub points: f64,
}

impl Score {
    fn ungraded() -> Self {
        Score {
            correctness: Correctness::Ungraded,
            points: 0.0,
        }
    }
}

/// Auto-grades a submission.
///
/// Only CHOICE questions with at least one correct answer can be decided
/// here; everything else stays ungraded with zero points until reviewed.
pub fn score(question: &Question, submitted: &str) -> Score {
    match question.question_type {
        QuestionType::Choice if !question.correct_answers.is_empty() => {
            if question.accepts(submitted) {
                Score {
                    correctness: Correctness::Correct,
                    points: question.points,
                }
            } else {
                Score {
                    correctness: Correctness::Incorrect,
                    points: 0.0,
                }
            }
        }
        _ => Score::ungraded(),
    }
}

/// Points awarded by a manual review.
///
/// CHOICE ignores `requested` and awards all or nothing. Free-text answers
/// get `requested` clamped to the question's points, or all/nothing when no
/// amount is given.
pub fn review_points(question: &Question, is_correct: bool, requested: Option<f64>) -> ServiceResult<f64> {
    if let Some(points) = requested {
        if !points.is_finite() || points < 0.0 {
            return Err(ServiceError::validation(
                "points must be a finite non-negative number",
                vec![ValidationIssue::new("points", "must be a finite non-negative number")],
            ));
        }
    }

    let full = if is_correct { question.points } else { 0.0 };
    let points = match (question.question_type, requested) {
        (QuestionType::Choice, _) | (_, None) => full,
        (_, Some(points)) => points.min(question.points),
    };
    Ok(points)
}

/// Applies a review to a stored answer in place and returns the awarded points.
pub fn apply_review(
    question: &Question,
    answer: &mut ParticipantAnswer,
    is_correct: bool,
    requested: Option<f64>,
) -> ServiceResult<f64> {
    let points = review_points(question, is_correct, requested)?;
    answer.correctness = Correctness::from_flag(Some(is_correct));
    answer.points = points;
    Ok(points)
}

/// Re-grades a stored answer after its question was edited and reports
/// whether anything changed.
///
/// Auto-gradable answers are scored from scratch. Otherwise a reviewed
/// answer keeps its verdict and only its points follow the new maximum.
pub fn regrade(question: &Question, answer: &mut ParticipantAnswer) -> bool {
    let before = (answer.correctness, answer.points);
    let auto = score(question, &answer.answer_text);
    if auto.correctness.is_defined() {
        answer.correctness = auto.correctness;
        answer.points = auto.points;
    } else {
        match (question.question_type, answer.correctness) {
            (_, Correctness::Ungraded) => {}
            (QuestionType::Choice, Correctness::Correct) => answer.points = question.points,
            (QuestionType::Choice, Correctness::Incorrect) => answer.points = 0.0,
            (QuestionType::Answer, _) => answer.points = answer.points.min(question.points),
        }
    }
    before != (answer.correctness, answer.points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn choice(points: f64, correct: &[&str]) -> Question {
        Question {
            id: 1,
            quiz_id: 1,
            question_type: QuestionType::Choice,
            text: "Capital of France".into(),
            answer_options: vec!["Paris".into(), "Rome".into(), "Lyon".into()],
            correct_answers: correct.iter().map(|c| c.to_string()).collect(),
            points,
        }
    }

    fn free_text(points: f64) -> Question {
        Question {
            id: 2,
            quiz_id: 1,
            question_type: QuestionType::Answer,
            text: "Why is Paris the capital?".into(),
            answer_options: vec![],
            correct_answers: vec!["history".into()],
            points,
        }
    }

    #[test]
    fn choice_member_scores_full_points() {
        let q = choice(10.0, &["Paris"]);
        assert_eq!(
            score(&q, "Paris"),
            Score {
                correctness: Correctness::Correct,
                points: 10.0
            }
        );
    }

    #[test]
    fn choice_non_member_scores_zero() {
        let q = choice(10.0, &["Paris", "Lyon"]);
        let s = score(&q, "Rome");
        assert_eq!(s.correctness, Correctness::Incorrect);
        assert_eq!(s.points, 0.0);
        assert_eq!(score(&q, "Lyon").correctness, Correctness::Correct);
    }

    #[test]
    fn choice_without_correct_answers_is_ungraded() {
        let q = choice(10.0, &[]);
        assert_eq!(score(&q, "Paris").correctness, Correctness::Ungraded);
    }

    #[test]
    fn free_text_is_never_auto_graded() {
        // "history" is in correct_answers but only as a hint for the reviewer.
        let s = score(&free_text(5.0), "history");
        assert_eq!(s.correctness, Correctness::Ungraded);
        assert_eq!(s.points, 0.0);
    }

    #[test]
    fn review_of_choice_ignores_requested_points() {
        let q = choice(10.0, &["Paris"]);
        assert_eq!(review_points(&q, true, Some(3.0)).unwrap(), 10.0);
        assert_eq!(review_points(&q, false, Some(3.0)).unwrap(), 0.0);
    }

    #[test]
    fn review_of_free_text_clamps_to_question_points() {
        let q = free_text(5.0);
        assert_eq!(review_points(&q, true, Some(3.5)).unwrap(), 3.5);
        assert_eq!(review_points(&q, true, Some(50.0)).unwrap(), 5.0);
        assert_eq!(review_points(&q, true, None).unwrap(), 5.0);
        assert_eq!(review_points(&q, false, None).unwrap(), 0.0);
    }

    #[test]
    fn review_rejects_negative_or_non_finite_points() {
        let q = free_text(5.0);
        for bad in [-1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                review_points(&q, true, Some(bad)),
                Err(ServiceError::Validation { .. })
            ));
        }
    }

    #[test]
    fn apply_review_updates_the_answer() {
        let q = free_text(5.0);
        let now = Utc::now();
        let mut answer = ParticipantAnswer {
            id: 1,
            participant_id: 1,
            quiz_id: 1,
            question_id: q.id,
            answer_text: "because".into(),
            correctness: Correctness::Ungraded,
            points: 0.0,
            created_at: now,
            updated_at: now,
        };
        apply_review(&q, &mut answer, false, Some(1.0)).unwrap();
        assert_eq!(answer.correctness, Correctness::Incorrect);
        assert_eq!(answer.points, 1.0);
    }

    #[test]
    fn regrade_follows_edited_question() {
        let now = Utc::now();
        let mut answer = ParticipantAnswer {
            id: 1,
            participant_id: 1,
            quiz_id: 1,
            question_id: 1,
            answer_text: "Rome".into(),
            correctness: Correctness::Incorrect,
            points: 0.0,
            created_at: now,
            updated_at: now,
        };
        assert!(regrade(&choice(4.0, &["Rome"]), &mut answer));
        assert_eq!(answer.correctness, Correctness::Correct);
        assert_eq!(answer.points, 4.0);
        assert!(!regrade(&choice(4.0, &["Rome"]), &mut answer));

        let mut essay = ParticipantAnswer {
            question_id: 2,
            answer_text: "long text".into(),
            correctness: Correctness::Correct,
            points: 5.0,
            ..answer.clone()
        };
        assert!(regrade(&free_text(3.0), &mut essay));
        assert_eq!(essay.correctness, Correctness::Correct);
        assert_eq!(essay.points, 3.0);

        let mut pending = ParticipantAnswer {
            correctness: Correctness::Ungraded,
            points: 0.0,
            ..essay
        };
        assert!(!regrade(&free_text(3.0), &mut pending));
        assert_eq!(pending.correctness, Correctness::Ungraded);
    }
}
