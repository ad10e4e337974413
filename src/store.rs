use crate::error::{StoreError, StoreResult};
use crate::models::{
    Id, NewAnswer, NewParticipant, NewQuiz, NewUser, Participant, ParticipantAnswer, Question,
    QuestionSpec, Quiz, User,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;
use tracing::warn;

/// Document-store style persistence used by the services.
///
/// Single-record operations are atomic. Uniqueness of `(quiz, studentId)`
/// participants and `(participant, question)` answers is enforced here and
/// reported as [`StoreError::Duplicate`]; there are no multi-record
/// transactions.
#[async_trait]
pub trait QuizStore: Send + Sync {
    async fn find_user(&self, id: Id) -> StoreResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn create_user(&self, user: NewUser) -> StoreResult<User>;
    async fn update_user(&self, user: &User) -> StoreResult<()>;

    async fn find_quiz(&self, id: Id) -> StoreResult<Option<Quiz>>;
    /// Quizzes of one creator, newest first.
    async fn find_quizzes_by_creator(&self, creator_id: Id) -> StoreResult<Vec<Quiz>>;
    async fn create_quiz(&self, quiz: NewQuiz) -> StoreResult<Quiz>;
    async fn update_quiz(&self, quiz: &Quiz) -> StoreResult<()>;

    async fn find_question(&self, id: Id) -> StoreResult<Option<Question>>;
    /// Every question stored for a quiz, in no particular order.
    async fn find_questions_by_quiz(&self, quiz_id: Id) -> StoreResult<Vec<Question>>;
    async fn create_question(&self, quiz_id: Id, spec: &QuestionSpec) -> StoreResult<Question>;
    async fn update_question(&self, question: &Question) -> StoreResult<()>;
    async fn delete_question(&self, id: Id) -> StoreResult<bool>;

    async fn find_participant(&self, id: Id) -> StoreResult<Option<Participant>>;
    async fn find_participant_by_student(&self, quiz_id: Id, student_id: &str) -> StoreResult<Option<Participant>>;
    async fn find_participants_by_quiz(&self, quiz_id: Id) -> StoreResult<Vec<Participant>>;
    async fn create_participant(&self, participant: NewParticipant) -> StoreResult<Participant>;
    async fn update_participant(&self, participant: &Participant) -> StoreResult<()>;

    async fn find_answer(&self, id: Id) -> StoreResult<Option<ParticipantAnswer>>;
    async fn find_answer_by_question(&self, participant_id: Id, question_id: Id)
        -> StoreResult<Option<ParticipantAnswer>>;
    async fn find_answers(&self, participant_id: Id, quiz_id: Id) -> StoreResult<Vec<ParticipantAnswer>>;
    /// Every participant's answer to one question, ordered by id.
    async fn find_answers_by_question(&self, question_id: Id) -> StoreResult<Vec<ParticipantAnswer>>;
    async fn create_answer(&self, answer: NewAnswer) -> StoreResult<ParticipantAnswer>;
    async fn update_answer(&self, answer: &ParticipantAnswer) -> StoreResult<()>;
    async fn delete_answers_for_question(&self, question_id: Id) -> StoreResult<u64>;
}

pub struct InMemoryStore {
    users: RwLock<HashMap<Id, User>>,
    quizzes: RwLock<HashMap<Id, Quiz>>,
    questions: RwLock<HashMap<Id, Question>>,
    participants: RwLock<HashMap<Id, Participant>>,
    answers: RwLock<HashMap<Id, ParticipantAnswer>>,
    next_user_id: AtomicI64,
    next_quiz_id: AtomicI64,
    next_question_id: AtomicI64,
    next_participant_id: AtomicI64,
    next_answer_id: AtomicI64,
    snapshot_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistentSnapshot {
    users: HashMap<Id, User>,
    quizzes: HashMap<Id, Quiz>,
    questions: HashMap<Id, Question>,
    participants: HashMap<Id, Participant>,
    answers: HashMap<Id, ParticipantAnswer>,
    next_user_id: Id,
    next_quiz_id: Id,
    next_question_id: Id,
    next_participant_id: Id,
    next_answer_id: Id,
}

fn next_id<T>(stored: Id, map: &HashMap<Id, T>) -> Id {
    stored.max(1).max(map.keys().max().copied().unwrap_or(0) + 1)
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(None)
    }
}

impl InMemoryStore {
    /// Builds an empty store, or one restored from the JSON snapshot at
    /// `snapshot_path` when it exists. With a path, every write is persisted.
    pub fn new(snapshot_path: Option<&str>) -> Self {
        let snapshot = snapshot_path
            .and_then(|path| {
                let raw = std::fs::read_to_string(path).ok()?;
                match serde_json::from_str::<PersistentSnapshot>(&raw) {
                    Ok(s) => Some(s),
                    Err(err) => {
                        warn!("failed to read local snapshot {}: {}", path, err);
                        None
                    }
                }
            })
            .unwrap_or_default();

        Self {
            next_user_id: AtomicI64::new(next_id(snapshot.next_user_id, &snapshot.users)),
            next_quiz_id: AtomicI64::new(next_id(snapshot.next_quiz_id, &snapshot.quizzes)),
            next_question_id: AtomicI64::new(next_id(snapshot.next_question_id, &snapshot.questions)),
            next_participant_id: AtomicI64::new(next_id(snapshot.next_participant_id, &snapshot.participants)),
            next_answer_id: AtomicI64::new(next_id(snapshot.next_answer_id, &snapshot.answers)),
            users: RwLock::new(snapshot.users),
            quizzes: RwLock::new(snapshot.quizzes),
            questions: RwLock::new(snapshot.questions),
            participants: RwLock::new(snapshot.participants),
            answers: RwLock::new(snapshot.answers),
            snapshot_path: snapshot_path.map(str::to_string),
        }
    }

    async fn snapshot(&self) -> PersistentSnapshot {
        PersistentSnapshot {
            users: self.users.read().await.clone(),
            quizzes: self.quizzes.read().await.clone(),
            questions: self.questions.read().await.clone(),
            participants: self.participants.read().await.clone(),
            answers: self.answers.read().await.clone(),
            next_user_id: self.next_user_id.load(Ordering::SeqCst),
            next_quiz_id: self.next_quiz_id.load(Ordering::SeqCst),
            next_question_id: self.next_question_id.load(Ordering::SeqCst),
            next_participant_id: self.next_participant_id.load(Ordering::SeqCst),
            next_answer_id: self.next_answer_id.load(Ordering::SeqCst),
        }
    }

    pub async fn persist(&self) -> anyhow::Result<()> {
        let Some(path) = self.snapshot_path.as_ref() else {
            return Ok(());
        };
        let snapshot = self.snapshot().await;
        let serialized = serde_json::to_vec_pretty(&snapshot)?;
        if let Some(parent) = Path::new(path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serialized).await?;
        Ok(())
    }

    async fn persist_after(&self, op: &str) {
        if let Err(err) = self.persist().await {
            warn!("failed to persist local state after {}: {}", op, err);
        }
    }
}

#[async_trait]
impl QuizStore for InMemoryStore {
    async fn find_user(&self, id: Id) -> StoreResult<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self.users.read().await.values().find(|u| u.email == email).cloned())
    }

    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let created = {
            let mut users = self.users.write().await;
            if users.values().any(|u| u.email == user.email) {
                return Err(StoreError::Duplicate("user"));
            }
            let created = User {
                id: self.next_user_id.fetch_add(1, Ordering::SeqCst),
                name: user.name,
                email: user.email,
                password_hash: user.password_hash,
                created_at: Utc::now(),
            };
            users.insert(created.id, created.clone());
            created
        };
        self.persist_after("create_user").await;
        Ok(created)
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        {
            let mut users = self.users.write().await;
            let slot = users.get_mut(&user.id).ok_or(StoreError::Missing("user"))?;
            *slot = user.clone();
        }
        self.persist_after("update_user").await;
        Ok(())
    }

    async fn find_quiz(&self, id: Id) -> StoreResult<Option<Quiz>> {
        Ok(self.quizzes.read().await.get(&id).cloned())
    }

    async fn find_quizzes_by_creator(&self, creator_id: Id) -> StoreResult<Vec<Quiz>> {
        let mut items: Vec<Quiz> = self
            .quizzes
            .read()
            .await
            .values()
            .filter(|q| q.creator_id == creator_id && !q.is_deleted)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(items)
    }

    async fn create_quiz(&self, quiz: NewQuiz) -> StoreResult<Quiz> {
        let now = Utc::now();
        let created = Quiz {
            id: self.next_quiz_id.fetch_add(1, Ordering::SeqCst),
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
        };
        self.quizzes.write().await.insert(created.id, created.clone());
        self.persist_after("create_quiz").await;
        Ok(created)
    }

    async fn update_quiz(&self, quiz: &Quiz) -> StoreResult<()> {
        {
            let mut quizzes = self.quizzes.write().await;
            let slot = quizzes.get_mut(&quiz.id).ok_or(StoreError::Missing("quiz"))?;
            *slot = Quiz {
                updated_at: Utc::now(),
                ..quiz.clone()
            };
        }
        self.persist_after("update_quiz").await;
        Ok(())
    }

    async fn find_question(&self, id: Id) -> StoreResult<Option<Question>> {
        Ok(self.questions.read().await.get(&id).cloned())
    }

    async fn find_questions_by_quiz(&self, quiz_id: Id) -> StoreResult<Vec<Question>> {
        Ok(self
            .questions
            .read()
            .await
            .values()
            .filter(|q| q.quiz_id == quiz_id)
            .cloned()
            .collect())
    }

    async fn create_question(&self, quiz_id: Id, spec: &QuestionSpec) -> StoreResult<Question> {
        let created = Question {
            id: self.next_question_id.fetch_add(1, Ordering::SeqCst),
            quiz_id,
            question_type: spec.question_type,
            text: spec.text.trim().to_string(),
            answer_options: spec.answer_options.clone(),
            correct_answers: spec.correct_answers.iter().map(|c| c.trim().to_string()).collect(),
            points: spec.points,
        };
        self.questions.write().await.insert(created.id, created.clone());
        self.persist_after("create_question").await;
        Ok(created)
    }

    async fn update_question(&self, question: &Question) -> StoreResult<()> {
        {
            let mut questions = self.questions.write().await;
            let slot = questions.get_mut(&question.id).ok_or(StoreError::Missing("question"))?;
            *slot = question.clone();
        }
        self.persist_after("update_question").await;
        Ok(())
    }

    async fn delete_question(&self, id: Id) -> StoreResult<bool> {
        let removed = self.questions.write().await.remove(&id).is_some();
        if removed {
            self.persist_after("delete_question").await;
        }
        Ok(removed)
    }

    async fn find_participant(&self, id: Id) -> StoreResult<Option<Participant>> {
        Ok(self.participants.read().await.get(&id).cloned())
    }

    async fn find_participant_by_student(&self, quiz_id: Id, student_id: &str) -> StoreResult<Option<Participant>> {
        Ok(self
            .participants
            .read()
            .await
            .values()
            .find(|p| p.quiz_id == quiz_id && p.student_id == student_id)
            .cloned())
    }

    async fn find_participants_by_quiz(&self, quiz_id: Id) -> StoreResult<Vec<Participant>> {
        let mut items: Vec<Participant> = self
            .participants
            .read()
            .await
            .values()
            .filter(|p| p.quiz_id == quiz_id)
            .cloned()
            .collect();
        items.sort_by_key(|p| p.id);
        Ok(items)
    }

    async fn create_participant(&self, participant: NewParticipant) -> StoreResult<Participant> {
        let created = {
            let mut participants = self.participants.write().await;
            if participants
                .values()
                .any(|p| p.quiz_id == participant.quiz_id && p.student_id == participant.student_id)
            {
                return Err(StoreError::Duplicate("participant"));
            }
            let created = Participant {
                id: self.next_participant_id.fetch_add(1, Ordering::SeqCst),
                quiz_id: participant.quiz_id,
                name: participant.name,
                student_id: participant.student_id,
                created_at: participant.created_at,
                has_completed: false,
                is_graded: false,
                points: None,
            };
            participants.insert(created.id, created.clone());
            created
        };
        self.persist_after("create_participant").await;
        Ok(created)
    }

    async fn update_participant(&self, participant: &Participant) -> StoreResult<()> {
        {
            let mut participants = self.participants.write().await;
            if participants.values().any(|p| {
                p.id != participant.id && p.quiz_id == participant.quiz_id && p.student_id == participant.student_id
            }) {
                return Err(StoreError::Duplicate("participant"));
            }
            let slot = participants
                .get_mut(&participant.id)
                .ok_or(StoreError::Missing("participant"))?;
            *slot = participant.clone();
        }
        self.persist_after("update_participant").await;
        Ok(())
    }

    async fn find_answer(&self, id: Id) -> StoreResult<Option<ParticipantAnswer>> {
        Ok(self.answers.read().await.get(&id).cloned())
    }

    async fn find_answer_by_question(
        &self,
        participant_id: Id,
        question_id: Id,
    ) -> StoreResult<Option<ParticipantAnswer>> {
        Ok(self
            .answers
            .read()
            .await
            .values()
            .find(|a| a.participant_id == participant_id && a.question_id == question_id)
            .cloned())
    }

    async fn find_answers(&self, participant_id: Id, quiz_id: Id) -> StoreResult<Vec<ParticipantAnswer>> {
        let mut items: Vec<ParticipantAnswer> = self
            .answers
            .read()
            .await
            .values()
            .filter(|a| a.participant_id == participant_id && a.quiz_id == quiz_id)
            .cloned()
            .collect();
        items.sort_by_key(|a| a.id);
        Ok(items)
    }

    async fn find_answers_by_question(&self, question_id: Id) -> StoreResult<Vec<ParticipantAnswer>> {
        let mut items: Vec<ParticipantAnswer> = self
            .answers
            .read()
            .await
            .values()
            .filter(|a| a.question_id == question_id)
            .cloned()
            .collect();
        items.sort_by_key(|a| a.id);
        Ok(items)
    }

    async fn create_answer(&self, answer: NewAnswer) -> StoreResult<ParticipantAnswer> {
        let created = {
            let mut answers = self.answers.write().await;
            if answers
                .values()
                .any(|a| a.participant_id == answer.participant_id && a.question_id == answer.question_id)
            {
                return Err(StoreError::Duplicate("answer"));
            }
            let created = ParticipantAnswer {
                id: self.next_answer_id.fetch_add(1, Ordering::SeqCst),
                participant_id: answer.participant_id,
                quiz_id: answer.quiz_id,
                question_id: answer.question_id,
                answer_text: answer.answer_text,
                correctness: answer.correctness,
                points: answer.points,
                created_at: answer.created_at,
                updated_at: answer.created_at,
            };
            answers.insert(created.id, created.clone());
            created
        };
        self.persist_after("create_answer").await;
        Ok(created)
    }

    async fn update_answer(&self, answer: &ParticipantAnswer) -> StoreResult<()> {
        {
            let mut answers = self.answers.write().await;
            let slot = answers.get_mut(&answer.id).ok_or(StoreError::Missing("answer"))?;
            *slot = answer.clone();
        }
        self.persist_after("update_answer").await;
        Ok(())
    }

    async fn delete_answers_for_question(&self, question_id: Id) -> StoreResult<u64> {
        let removed = {
            let mut answers = self.answers.write().await;
            let before = answers.len();
            answers.retain(|_, a| a.question_id != question_id);
            (before - answers.len()) as u64
        };
        if removed > 0 {
            self.persist_after("delete_answers_for_question").await;
        }
        Ok(removed)
    }
}
