use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use validator::Validate;

pub type Id = i64;

pub const DEFAULT_DURATION_MINUTES: u32 = 45;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    /// Auto-gradable: the answer must be one of the correct answers.
    Choice,
    /// Free text, reviewed by the quiz owner.
    Answer,
}

/// Outcome of grading a single answer.
///
/// On the wire this is the nullable `isCorrect` flag: `true`, `false`, or
/// `null` while nobody has decided yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correctness {
    Correct,
    Incorrect,
    Ungraded,
}

impl Correctness {
    pub fn from_flag(flag: Option<bool>) -> Self {
        match flag {
            Some(true) => Correctness::Correct,
            Some(false) => Correctness::Incorrect,
            None => Correctness::Ungraded,
        }
    }

    pub fn as_flag(self) -> Option<bool> {
        match self {
            Correctness::Correct => Some(true),
            Correctness::Incorrect => Some(false),
            Correctness::Ungraded => None,
        }
    }

    pub fn is_defined(self) -> bool {
        self != Correctness::Ungraded
    }
}

impl Serialize for Correctness {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_flag().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Correctness {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<bool>::deserialize(deserializer).map(Correctness::from_flag)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Id,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOut {
    pub id: Id,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserOut {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    pub id: Id,
    pub title: String,
    pub description: String,
    pub creator_id: Id,
    /// Authoritative display and grading order.
    pub question_ids: Vec<Id>,
    /// Minutes a participant has to answer, counted from joining.
    pub duration: u32,
    pub is_active: bool,
    pub total_points: f64,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Quiz {
    pub fn is_owned_by(&self, user_id: Id) -> bool {
        self.creator_id == user_id
    }

    /// Last instant at which a participant who joined at `joined_at` may answer.
    pub fn deadline_for(&self, joined_at: DateTime<Utc>) -> DateTime<Utc> {
        joined_at + Duration::milliseconds(i64::from(self.duration) * 60_000)
    }
}

#[derive(Debug, Clone)]
pub struct NewQuiz {
    pub title: String,
    pub description: String,
    pub creator_id: Id,
    pub duration: u32,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: Id,
    pub quiz_id: Id,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub text: String,
    pub answer_options: Vec<String>,
    pub correct_answers: Vec<String>,
    pub points: f64,
}

impl Question {
    pub fn accepts(&self, answer: &str) -> bool {
        self.correct_answers.iter().any(|c| c == answer)
    }
}

/// Question as shown to students: no correct answers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicQuestion {
    pub id: Id,
    pub quiz_id: Id,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub text: String,
    pub answer_options: Vec<String>,
    pub points: f64,
}

impl From<&Question> for PublicQuestion {
    fn from(q: &Question) -> Self {
        Self {
            id: q.id,
            quiz_id: q.quiz_id,
            question_type: q.question_type,
            text: q.text.clone(),
            answer_options: q.answer_options.clone(),
            points: q.points,
        }
    }
}

pub fn total_points(questions: &[Question]) -> f64 {
    questions.iter().map(|q| q.points).sum()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: Id,
    pub quiz_id: Id,
    pub name: String,
    pub student_id: String,
    pub created_at: DateTime<Utc>,
    pub has_completed: bool,
    pub is_graded: bool,
    pub points: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct NewParticipant {
    pub quiz_id: Id,
    pub name: String,
    pub student_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantAnswer {
    pub id: Id,
    pub participant_id: Id,
    pub quiz_id: Id,
    pub question_id: Id,
    pub answer_text: String,
    #[serde(rename = "isCorrect")]
    pub correctness: Correctness,
    pub points: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAnswer {
    pub participant_id: Id,
    pub quiz_id: Id,
    pub question_id: Id,
    pub answer_text: String,
    pub correctness: Correctness,
    pub points: f64,
    pub created_at: DateTime<Utc>,
}

fn default_points() -> f64 {
    1.0
}

/// One entry of a quiz create/update body. `id` refers to an existing
/// question of the same quiz; without it a new question is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionSpec {
    #[serde(default)]
    pub id: Option<Id>,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub text: String,
    #[serde(default)]
    pub answer_options: Vec<String>,
    #[serde(default)]
    pub correct_answers: Vec<String>,
    #[serde(default = "default_points")]
    pub points: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizPayload {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub duration: Option<u32>,
    pub is_active: Option<bool>,
    #[serde(default)]
    pub questions: Vec<QuestionSpec>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterPayload {
    #[validate(length(min = 1, max = 100, message = "name must not be empty"))]
    pub name: String,
    #[validate(email(message = "email is invalid"))]
    pub email: String,
    #[validate(length(min = 6, message = "password must be at least 6 characters"))]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginPayload {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangePasswordPayload {
    #[validate(length(min = 6, message = "password must be at least 6 characters"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    pub quiz_id: Id,
    #[validate(length(min = 1, max = 100, message = "name must not be empty"), custom(function = not_blank))]
    pub name: String,
    #[validate(length(min = 1, max = 64, message = "studentId must not be empty"), custom(function = not_blank))]
    pub student_id: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateParticipantPayload {
    #[validate(length(min = 1, max = 100, message = "name must not be empty"), custom(function = not_blank))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 64, message = "studentId must not be empty"), custom(function = not_blank))]
    pub student_id: Option<String>,
}

/// Rejects values that are empty once trimmed; names and student ids are stored trimmed.
fn not_blank(value: &str) -> Result<(), validator::ValidationError> {
    if value.trim().is_empty() {
        return Err(validator::ValidationError::new("blank").with_message("must not be blank".into()));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswerPayload {
    pub answer: String,
    pub participant_id: Id,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewPayload {
    pub is_correct: bool,
    #[serde(default)]
    pub points: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub issue: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, issue: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            issue: issue.into(),
        }
    }
}

/// Converts `validator` output into the flat field/issue list used in error bodies.
pub fn issues_from(errors: &validator::ValidationErrors) -> Vec<ValidationIssue> {
    errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| {
                let issue = e
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| e.code.to_string());
                ValidationIssue::new(field.to_string(), issue)
            })
        })
        .collect()
}

pub fn validate_quiz_payload(payload: &QuizPayload) -> Result<(), Vec<ValidationIssue>> {
    let mut issues = Vec::new();
    if payload.title.trim().is_empty() {
        issues.push(ValidationIssue::new("title", "must not be empty"));
    }
    if payload.duration == Some(0) {
        issues.push(ValidationIssue::new("duration", "must be at least 1 minute"));
    }

    let mut seen_ids = HashSet::new();
    for (i, q) in payload.questions.iter().enumerate() {
        if let Some(id) = q.id {
            if !seen_ids.insert(id) {
                issues.push(ValidationIssue::new(format!("questions[{i}].id"), "must be unique"));
            }
        }
        if q.text.trim().is_empty() {
            issues.push(ValidationIssue::new(format!("questions[{i}].text"), "must not be empty"));
        }
        if !q.points.is_finite() || q.points < 0.0 {
            issues.push(ValidationIssue::new(
                format!("questions[{i}].points"),
                "must be a finite non-negative number",
            ));
        }
        if q.question_type == QuestionType::Choice && !q.answer_options.is_empty() {
            for (k, correct) in q.correct_answers.iter().enumerate() {
                if !q.answer_options.contains(correct) {
                    issues.push(ValidationIssue::new(
                        format!("questions[{i}].correctAnswers[{k}]"),
                        "must be one of answerOptions",
                    ));
                }
            }
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> QuizPayload {
        QuizPayload {
            title: "Geography".into(),
            description: "Capitals".into(),
            duration: Some(45),
            is_active: None,
            questions: vec![
                QuestionSpec {
                    id: None,
                    question_type: QuestionType::Choice,
                    text: "Capital of France".into(),
                    answer_options: vec!["Paris".into(), "Rome".into()],
                    correct_answers: vec!["Paris".into()],
                    points: 10.0,
                },
                QuestionSpec {
                    id: None,
                    question_type: QuestionType::Answer,
                    text: "Describe the Seine".into(),
                    answer_options: vec![],
                    correct_answers: vec![],
                    points: 5.0,
                },
            ],
        }
    }

    #[test]
    fn validate_payload_ok() {
        assert!(validate_quiz_payload(&sample_payload()).is_ok());
    }

    #[test]
    fn validate_payload_negative() {
        let mut payload = sample_payload();
        payload.title = "  ".into();
        payload.duration = Some(0);
        payload.questions[0].correct_answers = vec!["Berlin".into()];
        payload.questions[1].points = -1.0;
        let issues = validate_quiz_payload(&payload).err().unwrap();
        assert!(issues.iter().any(|i| i.field == "title"));
        assert!(issues.iter().any(|i| i.field == "duration"));
        assert!(issues.iter().any(|i| i.field == "questions[0].correctAnswers[0]"));
        assert!(issues.iter().any(|i| i.field == "questions[1].points"));
    }

    #[test]
    fn duplicate_question_ids_rejected() {
        let mut payload = sample_payload();
        payload.questions[0].id = Some(7);
        payload.questions[1].id = Some(7);
        let issues = validate_quiz_payload(&payload).err().unwrap();
        assert!(issues.iter().any(|i| i.issue.contains("unique")));
    }

    #[test]
    fn correctness_is_a_nullable_flag_on_the_wire() {
        assert_eq!(serde_json::to_value(Correctness::Correct).unwrap(), serde_json::json!(true));
        assert_eq!(serde_json::to_value(Correctness::Incorrect).unwrap(), serde_json::json!(false));
        assert!(serde_json::to_value(Correctness::Ungraded).unwrap().is_null());
        let parsed: Correctness = serde_json::from_str("null").unwrap();
        assert_eq!(parsed, Correctness::Ungraded);
    }

    #[test]
    fn public_question_hides_correct_answers() {
        let q = Question {
            id: 1,
            quiz_id: 2,
            question_type: QuestionType::Choice,
            text: "Capital of France".into(),
            answer_options: vec!["Paris".into(), "Rome".into()],
            correct_answers: vec!["Paris".into()],
            points: 10.0,
        };
        let value = serde_json::to_value(PublicQuestion::from(&q)).unwrap();
        assert!(value.get("correctAnswers").is_none());
        assert_eq!(value["type"], "choice");
    }

    #[test]
    fn deadline_is_duration_in_minutes() {
        let now = Utc::now();
        let quiz = Quiz {
            id: 1,
            title: "t".into(),
            description: String::new(),
            creator_id: 1,
            question_ids: vec![],
            duration: 45,
            is_active: true,
            total_points: 0.0,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(quiz.deadline_for(now) - now, Duration::milliseconds(45 * 60_000));
    }

    #[test]
    fn whitespace_only_join_fields_are_rejected() {
        let payload = JoinPayload {
            quiz_id: 1,
            name: "  ".into(),
            student_id: " \t ".into(),
        };
        let errors = payload.validate().unwrap_err();
        let fields: HashSet<String> = issues_from(&errors).into_iter().map(|i| i.field).collect();
        assert!(fields.contains("name"));
        assert!(fields.contains("student_id"));

        let rename = UpdateParticipantPayload {
            name: None,
            student_id: Some("   ".into()),
        };
        assert!(rename.validate().is_err());
        let untouched = UpdateParticipantPayload { name: None, student_id: None };
        assert!(untouched.validate().is_ok());
    }
}
