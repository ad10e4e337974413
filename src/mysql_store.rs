use crate::error::{StoreError, StoreResult};
use crate::models::{
    Correctness, Id, NewAnswer, NewParticipant, NewQuiz, NewUser, Participant, ParticipantAnswer, Question,
    QuestionSpec, QuestionType, Quiz, User,
};
use crate::store::QuizStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::mysql::MySqlPool;
use sqlx::types::Json;
use sqlx::FromRow;

/// [`QuizStore`] over MySQL. Uniqueness is backed by the unique indexes
/// created in `migrations/`.
#[derive(Clone)]
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

fn duplicate_or(err: sqlx::Error, what: &'static str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate(what),
        _ => StoreError::Database(err),
    }
}

fn type_to_db(t: QuestionType) -> &'static str {
    match t {
        QuestionType::Choice => "choice",
        QuestionType::Answer => "answer",
    }
}

fn type_from_db(raw: &str) -> StoreResult<QuestionType> {
    match raw {
        "choice" => Ok(QuestionType::Choice),
        "answer" => Ok(QuestionType::Answer),
        other => Err(StoreError::Other(anyhow::anyhow!("unknown question type {}", other))),
    }
}

#[derive(FromRow)]
struct UserRow {
    id: Id,
    name: String,
    email: String,
    password_hash: String,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(r: UserRow) -> Self {
        User {
            id: r.id,
            name: r.name,
            email: r.email,
            password_hash: r.password_hash,
            created_at: r.created_at,
        }
    }
}

#[derive(FromRow)]
struct QuizRow {
    id: Id,
    title: String,
    description: String,
    creator_id: Id,
    question_ids: Json<Vec<Id>>,
    duration: u32,
    is_active: bool,
    total_points: f64,
    is_deleted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<QuizRow> for Quiz {
    fn from(r: QuizRow) -> Self {
        Quiz {
            id: r.id,
            title: r.title,
            description: r.description,
            creator_id: r.creator_id,
            question_ids: r.question_ids.0,
            duration: r.duration,
            is_active: r.is_active,
            total_points: r.total_points,
            is_deleted: r.is_deleted,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(FromRow)]
struct QuestionRow {
    id: Id,
    quiz_id: Id,
    question_type: String,
    text: String,
    answer_options: Json<Vec<String>>,
    correct_answers: Json<Vec<String>>,
    points: f64,
}

impl TryFrom<QuestionRow> for Question {
    type Error = StoreError;

    fn try_from(r: QuestionRow) -> StoreResult<Self> {
        Ok(Question {
            id: r.id,
            quiz_id: r.quiz_id,
            question_type: type_from_db(&r.question_type)?,
            text: r.text,
            answer_options: r.answer_options.0,
            correct_answers: r.correct_answers.0,
            points: r.points,
        })
    }
}

#[derive(FromRow)]
struct ParticipantRow {
    id: Id,
    quiz_id: Id,
    name: String,
    student_id: String,
    created_at: DateTime<Utc>,
    has_completed: bool,
    is_graded: bool,
    points: Option<f64>,
}

impl From<ParticipantRow> for Participant {
    fn from(r: ParticipantRow) -> Self {
        Participant {
            id: r.id,
            quiz_id: r.quiz_id,
            name: r.name,
            student_id: r.student_id,
            created_at: r.created_at,
            has_completed: r.has_completed,
            is_graded: r.is_graded,
            points: r.points,
        }
    }
}

#[derive(FromRow)]
struct AnswerRow {
    id: Id,
    participant_id: Id,
    quiz_id: Id,
    question_id: Id,
    answer_text: String,
    is_correct: Option<bool>,
    points: f64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AnswerRow> for ParticipantAnswer {
    fn from(r: AnswerRow) -> Self {
        ParticipantAnswer {
            id: r.id,
            participant_id: r.participant_id,
            quiz_id: r.quiz_id,
            question_id: r.question_id,
            answer_text: r.answer_text,
            correctness: Correctness::from_flag(r.is_correct),
            points: r.points,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

const USER_COLUMNS: &str = "id, name, email, password_hash, created_at";
const QUIZ_COLUMNS: &str = "id, title, description, creator_id, question_ids, duration, is_active, total_points, is_deleted, created_at, updated_at";
const QUESTION_COLUMNS: &str = "id, quiz_id, question_type, text, answer_options, correct_answers, points";
const PARTICIPANT_COLUMNS: &str = "id, quiz_id, name, student_id, created_at, has_completed, is_graded, points";
const ANSWER_COLUMNS: &str =
    "id, participant_id, quiz_id, question_id, answer_text, is_correct, points, created_at, updated_at";

#[async_trait]
impl QuizStore for MySqlStore {
    async fn find_user(&self, id: Id) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }

    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let now = Utc::now();
        let result = sqlx::query("INSERT INTO users (name, email, password_hash, created_at) VALUES (?, ?, ?, ?)")
            .bind(&user.name)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| duplicate_or(e, "user"))?;
        Ok(User {
            id: result.last_insert_id() as Id,
            name: user.name,
            email: user.email,
            password_hash: user.password_hash,
            created_at: now,
        })
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        let result = sqlx::query("UPDATE users SET name = ?, email = ?, password_hash = ? WHERE id = ?")
            .bind(&user.name)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.id)
            .execute(&self.pool)
            .await
            .map_err(|e| duplicate_or(e, "user"))?;
        if result.rows_affected() == 0 && self.find_user(user.id).await?.is_none() {
            return Err(StoreError::Missing("user"));
        }
        Ok(())
    }

    async fn find_quiz(&self, id: Id) -> StoreResult<Option<Quiz>> {
        let sql = format!("SELECT {QUIZ_COLUMNS} FROM quizzes WHERE id = ?");
        let row = sqlx::query_as::<_, QuizRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Quiz::from))
    }

    async fn find_quizzes_by_creator(&self, creator_id: Id) -> StoreResult<Vec<Quiz>> {
        let sql = format!(
            "SELECT {QUIZ_COLUMNS} FROM quizzes WHERE creator_id = ? AND is_deleted = FALSE ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query_as::<_, QuizRow>(&sql)
            .bind(creator_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Quiz::from).collect())
    }

    async fn create_quiz(&self, quiz: NewQuiz) -> StoreResult<Quiz> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO quizzes (title, description, creator_id, question_ids, duration, is_active, total_points, is_deleted, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, 0, FALSE, ?, ?)",
        )
        .bind(&quiz.title)
        .bind(&quiz.description)
        .bind(quiz.creator_id)
        .bind(Json(Vec::<Id>::new()))
        .bind(quiz.duration)
        .bind(quiz.is_active)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(Quiz {
            id: result.last_insert_id() as Id,
            title: quiz.title,
            description: quiz.description,
            creator_id: quiz.creator_id,
            question_ids: Vec::new(),
            duration: quiz.duration,
            is_active: quiz.is_active,
            total_points: 0.0,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        })
    }

    async fn update_quiz(&self, quiz: &Quiz) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE quizzes SET title = ?, description = ?, question_ids = ?, duration = ?, is_active = ?, \
             total_points = ?, is_deleted = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&quiz.title)
        .bind(&quiz.description)
        .bind(Json(&quiz.question_ids))
        .bind(quiz.duration)
        .bind(quiz.is_active)
        .bind(quiz.total_points)
        .bind(quiz.is_deleted)
        .bind(Utc::now())
        .bind(quiz.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 && self.find_quiz(quiz.id).await?.is_none() {
            return Err(StoreError::Missing("quiz"));
        }
        Ok(())
    }

    async fn find_question(&self, id: Id) -> StoreResult<Option<Question>> {
        let sql = format!("SELECT {QUESTION_COLUMNS} FROM questions WHERE id = ?");
        let row = sqlx::query_as::<_, QuestionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Question::try_from).transpose()
    }

    async fn find_questions_by_quiz(&self, quiz_id: Id) -> StoreResult<Vec<Question>> {
        let sql = format!("SELECT {QUESTION_COLUMNS} FROM questions WHERE quiz_id = ?");
        let rows = sqlx::query_as::<_, QuestionRow>(&sql)
            .bind(quiz_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Question::try_from).collect()
    }

    async fn create_question(&self, quiz_id: Id, spec: &QuestionSpec) -> StoreResult<Question> {
        let text = spec.text.trim().to_string();
        let correct: Vec<String> = spec.correct_answers.iter().map(|c| c.trim().to_string()).collect();
        let result = sqlx::query(
            "INSERT INTO questions (quiz_id, question_type, text, answer_options, correct_answers, points) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(quiz_id)
        .bind(type_to_db(spec.question_type))
        .bind(&text)
        .bind(Json(&spec.answer_options))
        .bind(Json(&correct))
        .bind(spec.points)
        .execute(&self.pool)
        .await?;
        Ok(Question {
            id: result.last_insert_id() as Id,
            quiz_id,
            question_type: spec.question_type,
            text,
            answer_options: spec.answer_options.clone(),
            correct_answers: correct,
            points: spec.points,
        })
    }

    async fn update_question(&self, question: &Question) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE questions SET question_type = ?, text = ?, answer_options = ?, correct_answers = ?, points = ? WHERE id = ?",
        )
        .bind(type_to_db(question.question_type))
        .bind(&question.text)
        .bind(Json(&question.answer_options))
        .bind(Json(&question.correct_answers))
        .bind(question.points)
        .bind(question.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 && self.find_question(question.id).await?.is_none() {
            return Err(StoreError::Missing("question"));
        }
        Ok(())
    }

    async fn delete_question(&self, id: Id) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM questions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_participant(&self, id: Id) -> StoreResult<Option<Participant>> {
        let sql = format!("SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE id = ?");
        let row = sqlx::query_as::<_, ParticipantRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Participant::from))
    }

    async fn find_participant_by_student(&self, quiz_id: Id, student_id: &str) -> StoreResult<Option<Participant>> {
        let sql = format!("SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE quiz_id = ? AND student_id = ?");
        let row = sqlx::query_as::<_, ParticipantRow>(&sql)
            .bind(quiz_id)
            .bind(student_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Participant::from))
    }

    async fn find_participants_by_quiz(&self, quiz_id: Id) -> StoreResult<Vec<Participant>> {
        let sql = format!("SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE quiz_id = ? ORDER BY id");
        let rows = sqlx::query_as::<_, ParticipantRow>(&sql)
            .bind(quiz_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Participant::from).collect())
    }

    async fn create_participant(&self, participant: NewParticipant) -> StoreResult<Participant> {
        let result = sqlx::query(
            "INSERT INTO participants (quiz_id, name, student_id, created_at, has_completed, is_graded, points) \
             VALUES (?, ?, ?, ?, FALSE, FALSE, NULL)",
        )
        .bind(participant.quiz_id)
        .bind(&participant.name)
        .bind(&participant.student_id)
        .bind(participant.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| duplicate_or(e, "participant"))?;
        Ok(Participant {
            id: result.last_insert_id() as Id,
            quiz_id: participant.quiz_id,
            name: participant.name,
            student_id: participant.student_id,
            created_at: participant.created_at,
            has_completed: false,
            is_graded: false,
            points: None,
        })
    }

    async fn update_participant(&self, participant: &Participant) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE participants SET name = ?, student_id = ?, has_completed = ?, is_graded = ?, points = ? WHERE id = ?",
        )
        .bind(&participant.name)
        .bind(&participant.student_id)
        .bind(participant.has_completed)
        .bind(participant.is_graded)
        .bind(participant.points)
        .bind(participant.id)
        .execute(&self.pool)
        .await
        .map_err(|e| duplicate_or(e, "participant"))?;
        // MySQL reports zero affected rows when nothing changed.
        if result.rows_affected() == 0 && self.find_participant(participant.id).await?.is_none() {
            return Err(StoreError::Missing("participant"));
        }
        Ok(())
    }

    async fn find_answer(&self, id: Id) -> StoreResult<Option<ParticipantAnswer>> {
        let sql = format!("SELECT {ANSWER_COLUMNS} FROM participant_answers WHERE id = ?");
        let row = sqlx::query_as::<_, AnswerRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(ParticipantAnswer::from))
    }

    async fn find_answer_by_question(
        &self,
        participant_id: Id,
        question_id: Id,
    ) -> StoreResult<Option<ParticipantAnswer>> {
        let sql = format!("SELECT {ANSWER_COLUMNS} FROM participant_answers WHERE participant_id = ? AND question_id = ?");
        let row = sqlx::query_as::<_, AnswerRow>(&sql)
            .bind(participant_id)
            .bind(question_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(ParticipantAnswer::from))
    }

    async fn find_answers(&self, participant_id: Id, quiz_id: Id) -> StoreResult<Vec<ParticipantAnswer>> {
        let sql = format!(
            "SELECT {ANSWER_COLUMNS} FROM participant_answers WHERE participant_id = ? AND quiz_id = ? ORDER BY id"
        );
        let rows = sqlx::query_as::<_, AnswerRow>(&sql)
            .bind(participant_id)
            .bind(quiz_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(ParticipantAnswer::from).collect())
    }

    async fn find_answers_by_question(&self, question_id: Id) -> StoreResult<Vec<ParticipantAnswer>> {
        let sql = format!("SELECT {ANSWER_COLUMNS} FROM participant_answers WHERE question_id = ? ORDER BY id");
        let rows = sqlx::query_as::<_, AnswerRow>(&sql)
            .bind(question_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(ParticipantAnswer::from).collect())
    }

    async fn create_answer(&self, answer: NewAnswer) -> StoreResult<ParticipantAnswer> {
        let result = sqlx::query(
            "INSERT INTO participant_answers (participant_id, quiz_id, question_id, answer_text, is_correct, points, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(answer.participant_id)
        .bind(answer.quiz_id)
        .bind(answer.question_id)
        .bind(&answer.answer_text)
        .bind(answer.correctness.as_flag())
        .bind(answer.points)
        .bind(answer.created_at)
        .bind(answer.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| duplicate_or(e, "answer"))?;
        Ok(ParticipantAnswer {
            id: result.last_insert_id() as Id,
            participant_id: answer.participant_id,
            quiz_id: answer.quiz_id,
            question_id: answer.question_id,
            answer_text: answer.answer_text,
            correctness: answer.correctness,
            points: answer.points,
            created_at: answer.created_at,
            updated_at: answer.created_at,
        })
    }

    async fn update_answer(&self, answer: &ParticipantAnswer) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE participant_answers SET answer_text = ?, is_correct = ?, points = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&answer.answer_text)
        .bind(answer.correctness.as_flag())
        .bind(answer.points)
        .bind(answer.updated_at)
        .bind(answer.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 && self.find_answer(answer.id).await?.is_none() {
            return Err(StoreError::Missing("answer"));
        }
        Ok(())
    }

    async fn delete_answers_for_question(&self, question_id: Id) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM participant_answers WHERE question_id = ?")
            .bind(question_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
