use crate::auth::{self, AuthUser, Claims, MaybeAuthUser};
use crate::error::{request_id_from_headers, AppError, ServiceError, ServiceResult, StoreError};
use crate::models::{
    issues_from, validate_quiz_payload, ChangePasswordPayload, Id, JoinPayload, LoginPayload, NewQuiz, NewUser,
    PublicQuestion, Question, Quiz, QuizPayload, RegisterPayload, ReviewPayload, SubmitAnswerPayload,
    UpdateParticipantPayload, User, UserOut, DEFAULT_DURATION_MINUTES,
};
use crate::participant::{self, Review};
use crate::reconcile;
use crate::results;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;
use validator::Validate;

type Reply = Result<Json<Value>, AppError>;

fn respond<T>(result: ServiceResult<T>, headers: &HeaderMap, resource: &'static str) -> Result<T, AppError> {
    result.map_err(|err| AppError::from_service(err, request_id_from_headers(headers)).with_resource(resource))
}

fn client_key(headers: &HeaderMap) -> &str {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("local")
}

fn rate_limited(state: &AppState, headers: &HeaderMap, scope: &str, limit_per_minute: u32) -> Result<(), AppError> {
    if state.rate_limiter.check(scope, client_key(headers), limit_per_minute) {
        Ok(())
    } else {
        Err(AppError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            "too many requests",
            request_id_from_headers(headers),
        ))
    }
}

fn check<T: Validate>(payload: &T, message: &str) -> ServiceResult<()> {
    payload
        .validate()
        .map_err(|errors| ServiceError::validation(message, issues_from(&errors)))
}

async fn current_user(state: &AppState, claims: &Claims) -> ServiceResult<User> {
    state
        .store
        .find_user(claims.id)
        .await?
        .ok_or_else(|| ServiceError::not_found("User"))
}

async fn owned_quiz(state: &AppState, owner_id: Id, quiz_id: Id) -> ServiceResult<Quiz> {
    let quiz = participant::live_quiz(state.store.as_ref(), quiz_id).await?;
    if !quiz.is_owned_by(owner_id) {
        return Err(ServiceError::Forbidden("You are not the owner of this quiz".into()));
    }
    Ok(quiz)
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub message: &'static str,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct QuizResponse<Q: Serialize> {
    pub message: &'static str,
    pub quiz: Quiz,
    pub questions: Vec<Q>,
}

pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RegisterPayload>,
) -> Result<(StatusCode, Json<TokenResponse>), AppError> {
    rate_limited(&state, &headers, "auth_register", 20)?;
    let result: ServiceResult<String> = async {
        check(&payload, "invalid registration data")?;
        let email = payload.email.trim().to_lowercase();
        if state.store.find_user_by_email(&email).await?.is_some() {
            return Err(ServiceError::Conflict("Email is already registered".into()));
        }
        let created = state
            .store
            .create_user(NewUser {
                name: payload.name.trim().to_string(),
                email,
                password_hash: auth::hash_password(&payload.password)?,
            })
            .await;
        let user = match created {
            Ok(user) => user,
            Err(StoreError::Duplicate(_)) => {
                return Err(ServiceError::Conflict("Email is already registered".into()))
            }
            Err(err) => return Err(err.into()),
        };
        info!(user_id = user.id, "user registered");
        auth::sign_token(&user, &state.config.jwt_secret, state.config.jwt_expiration_secs)
    }
    .await;
    let token = respond(result, &headers, "token")?;
    Ok((
        StatusCode::CREATED,
        Json(TokenResponse {
            message: "User registered",
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<LoginPayload>,
) -> Result<Json<TokenResponse>, AppError> {
    rate_limited(&state, &headers, "auth_login", 30)?;
    let result: ServiceResult<String> = async {
        let invalid = || ServiceError::Unauthorized("Invalid email or password".into());
        let email = payload.email.trim().to_lowercase();
        let user = state.store.find_user_by_email(&email).await?.ok_or_else(invalid)?;
        if !auth::verify_password(&payload.password, &user.password_hash) {
            return Err(invalid());
        }
        auth::sign_token(&user, &state.config.jwt_secret, state.config.jwt_expiration_secs)
    }
    .await;
    let token = respond(result, &headers, "token")?;
    Ok(Json(TokenResponse {
        message: "Logged in",
        token,
    }))
}

pub async fn profile(State(state): State<AppState>, headers: HeaderMap, AuthUser(claims): AuthUser) -> Reply {
    let user = respond(current_user(&state, &claims).await, &headers, "user")?;
    Ok(Json(json!({ "message": "User found", "user": UserOut::from(&user) })))
}

pub async fn change_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    AuthUser(claims): AuthUser,
    Json(payload): Json<ChangePasswordPayload>,
) -> Reply {
    let result: ServiceResult<()> = async {
        check(&payload, "invalid password")?;
        let mut user = current_user(&state, &claims).await?;
        user.password_hash = auth::hash_password(&payload.password)?;
        state.store.update_user(&user).await?;
        Ok(())
    }
    .await;
    respond(result, &headers, "user")?;
    Ok(Json(json!({ "message": "Password changed" })))
}

pub async fn refresh_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    AuthUser(claims): AuthUser,
) -> Result<Json<TokenResponse>, AppError> {
    let result: ServiceResult<String> = async {
        let user = current_user(&state, &claims).await?;
        auth::sign_token(&user, &state.config.jwt_secret, state.config.jwt_expiration_secs)
    }
    .await;
    let token = respond(result, &headers, "token")?;
    Ok(Json(TokenResponse {
        message: "Token refreshed",
        token,
    }))
}

pub async fn logout(State(state): State<AppState>, AuthUser(claims): AuthUser) -> Json<Value> {
    state.revocations.revoke(claims.revocation_key(), claims.exp);
    info!(user_id = claims.id, "user logged out");
    Json(json!({ "message": "Logged out" }))
}

pub async fn list_quizzes(State(state): State<AppState>, headers: HeaderMap, AuthUser(claims): AuthUser) -> Reply {
    let quizzes = respond(
        state.store.find_quizzes_by_creator(claims.id).await.map_err(ServiceError::from),
        &headers,
        "quizzes",
    )?;
    Ok(Json(json!({ "message": "Quizzes found", "quizzes": quizzes })))
}

fn quiz_validation(payload: &QuizPayload) -> ServiceResult<()> {
    validate_quiz_payload(payload).map_err(|issues| ServiceError::validation("quiz validation failed", issues))
}

pub async fn create_quiz(
    State(state): State<AppState>,
    headers: HeaderMap,
    AuthUser(claims): AuthUser,
    Json(payload): Json<QuizPayload>,
) -> Result<(StatusCode, Json<QuizResponse<Question>>), AppError> {
    let result: ServiceResult<(Quiz, Vec<Question>)> = async {
        quiz_validation(&payload)?;
        let plan = reconcile::reconcile(&[], &payload.questions)?;
        let quiz = state
            .store
            .create_quiz(NewQuiz {
                title: payload.title.trim().to_string(),
                description: payload.description.trim().to_string(),
                creator_id: claims.id,
                duration: payload.duration.unwrap_or(DEFAULT_DURATION_MINUTES),
                is_active: payload.is_active.unwrap_or(true),
            })
            .await?;
        let (quiz, questions) = reconcile::apply(state.store.as_ref(), quiz, plan).await?;
        info!(quiz_id = quiz.id, questions = questions.len(), "quiz created");
        Ok((quiz, questions))
    }
    .await;
    let (quiz, questions) = respond(result, &headers, "quiz")?;
    Ok((
        StatusCode::CREATED,
        Json(QuizResponse {
            message: "Quiz created",
            quiz,
            questions,
        }),
    ))
}

pub async fn get_quiz(
    State(state): State<AppState>,
    headers: HeaderMap,
    MaybeAuthUser(caller): MaybeAuthUser,
    Path(id): Path<Id>,
) -> Reply {
    let result: ServiceResult<Value> = async {
        let store = state.store.as_ref();
        let quiz = participant::live_quiz(store, id).await?;
        let questions = results::ordered_questions(store, &quiz).await?;
        let body = match caller {
            Some(claims) if quiz.is_owned_by(claims.id) => serde_json::to_value(QuizResponse {
                message: "Quiz found",
                quiz,
                questions,
            }),
            Some(_) => return Err(ServiceError::Forbidden("You are not the owner of this quiz".into())),
            None => serde_json::to_value(QuizResponse {
                message: "Quiz found",
                quiz,
                questions: questions.iter().map(PublicQuestion::from).collect(),
            }),
        };
        body.map_err(|e| ServiceError::Internal(e.to_string()))
    }
    .await;
    respond(result, &headers, "quiz").map(Json)
}

pub async fn update_quiz(
    State(state): State<AppState>,
    headers: HeaderMap,
    AuthUser(claims): AuthUser,
    Path(id): Path<Id>,
    Json(payload): Json<QuizPayload>,
) -> Result<Json<QuizResponse<Question>>, AppError> {
    let result: ServiceResult<(Quiz, Vec<Question>)> = async {
        quiz_validation(&payload)?;
        let mut quiz = owned_quiz(&state, claims.id, id).await?;
        let existing = state.store.find_questions_by_quiz(quiz.id).await?;
        let plan = reconcile::reconcile(&existing, &payload.questions)?;

        quiz.title = payload.title.trim().to_string();
        quiz.description = payload.description.trim().to_string();
        if let Some(duration) = payload.duration {
            quiz.duration = duration;
        }
        if let Some(is_active) = payload.is_active {
            quiz.is_active = is_active;
        }
        let (quiz, questions) = reconcile::apply(state.store.as_ref(), quiz, plan).await?;
        info!(quiz_id = quiz.id, questions = questions.len(), "quiz updated");
        Ok((quiz, questions))
    }
    .await;
    let (quiz, questions) = respond(result, &headers, "quiz")?;
    Ok(Json(QuizResponse {
        message: "Quiz updated",
        quiz,
        questions,
    }))
}

pub async fn delete_quiz(
    State(state): State<AppState>,
    headers: HeaderMap,
    AuthUser(claims): AuthUser,
    Path(id): Path<Id>,
) -> Reply {
    let result: ServiceResult<()> = async {
        let mut quiz = owned_quiz(&state, claims.id, id).await?;
        quiz.is_deleted = true;
        state.store.update_quiz(&quiz).await?;
        info!(quiz_id = quiz.id, "quiz deleted");
        Ok(())
    }
    .await;
    respond(result, &headers, "quiz")?;
    Ok(Json(json!({ "message": "Quiz deleted" })))
}

pub async fn get_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    MaybeAuthUser(caller): MaybeAuthUser,
    Path((quiz_id, question_id)): Path<(Id, Id)>,
) -> Reply {
    let result: ServiceResult<Value> = async {
        let store = state.store.as_ref();
        let quiz = participant::live_quiz(store, quiz_id).await?;
        let question = match store.find_question(question_id).await? {
            Some(q) if q.quiz_id == quiz.id => q,
            _ => return Err(ServiceError::not_found("Question")),
        };
        let is_owner = caller.is_some_and(|claims| quiz.is_owned_by(claims.id));
        let value = if is_owner {
            serde_json::to_value(&question)
        } else {
            serde_json::to_value(PublicQuestion::from(&question))
        };
        value.map_err(|e| ServiceError::Internal(e.to_string()))
    }
    .await;
    let question = respond(result, &headers, "question")?;
    Ok(Json(json!({ "message": "Question found", "question": question })))
}

pub async fn submit_answer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((quiz_id, question_id)): Path<(Id, Id)>,
    Json(payload): Json<SubmitAnswerPayload>,
) -> Reply {
    let answer = respond(
        participant::submit_answer(
            state.store.as_ref(),
            quiz_id,
            question_id,
            payload.participant_id,
            &payload.answer,
            Utc::now(),
        )
        .await,
        &headers,
        "answer",
    )?;
    Ok(Json(json!({ "message": "Answer saved", "answer": answer })))
}

pub async fn list_participants(
    State(state): State<AppState>,
    headers: HeaderMap,
    AuthUser(claims): AuthUser,
    Path(quiz_id): Path<Id>,
) -> Reply {
    let result: ServiceResult<_> = async {
        let quiz = owned_quiz(&state, claims.id, quiz_id).await?;
        Ok(state.store.find_participants_by_quiz(quiz.id).await?)
    }
    .await;
    let participants = respond(result, &headers, "participants")?;
    Ok(Json(json!({ "message": "Participants found", "participants": participants })))
}

pub async fn participant_review(
    State(state): State<AppState>,
    headers: HeaderMap,
    AuthUser(claims): AuthUser,
    Path((quiz_id, participant_id)): Path<(Id, Id)>,
) -> Reply {
    let result: ServiceResult<Value> = async {
        let store = state.store.as_ref();
        let quiz = owned_quiz(&state, claims.id, quiz_id).await?;
        let participant = participant::participant_of(store, &quiz, participant_id).await?;
        let questions = results::ordered_questions(store, &quiz).await?;
        let rows = results::review_rows(results::build_results(store, &quiz, &participant).await?);
        Ok(json!({
            "message": "Participant results",
            "quiz": quiz,
            "questions": questions,
            "participant": participant,
            "results": rows,
        }))
    }
    .await;
    respond(result, &headers, "participant").map(Json)
}

pub async fn review_answer(
    State(state): State<AppState>,
    headers: HeaderMap,
    AuthUser(claims): AuthUser,
    Path((quiz_id, participant_id, answer_id)): Path<(Id, Id, Id)>,
    Json(payload): Json<ReviewPayload>,
) -> Reply {
    let (answer, participant) = respond(
        participant::review_answer(
            state.store.as_ref(),
            claims.id,
            quiz_id,
            participant_id,
            answer_id,
            Review {
                is_correct: payload.is_correct,
                points: payload.points,
            },
            Utc::now(),
        )
        .await,
        &headers,
        "answer",
    )?;
    Ok(Json(json!({ "message": "Answer reviewed", "answer": answer, "participant": participant })))
}

pub async fn join_quiz(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<JoinPayload>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let result: ServiceResult<_> = async {
        check(&payload, "invalid participant data")?;
        participant::join(
            state.store.as_ref(),
            payload.quiz_id,
            &payload.name,
            &payload.student_id,
            Utc::now(),
        )
        .await
    }
    .await;
    let (participant, created) = respond(result, &headers, "participant")?;
    let (status, message) = if created {
        (StatusCode::CREATED, "Participant created")
    } else {
        (StatusCode::OK, "Participant already joined")
    };
    Ok((status, Json(json!({ "message": message, "participant": participant }))))
}

pub async fn get_participant(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<Id>) -> Reply {
    let participant = respond(
        participant::find_participant(state.store.as_ref(), id).await,
        &headers,
        "participant",
    )?;
    Ok(Json(json!({ "message": "Participant found", "participant": participant })))
}

pub async fn update_participant(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Id>,
    Json(payload): Json<UpdateParticipantPayload>,
) -> Reply {
    let result: ServiceResult<_> = async {
        check(&payload, "invalid participant data")?;
        participant::update_participant(
            state.store.as_ref(),
            id,
            payload.name.as_deref(),
            payload.student_id.as_deref(),
        )
        .await
    }
    .await;
    let participant = respond(result, &headers, "participant")?;
    Ok(Json(json!({ "message": "Participant updated", "participant": participant })))
}

pub async fn participant_answers(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<Id>) -> Reply {
    let result: ServiceResult<Value> = async {
        let store = state.store.as_ref();
        let participant = participant::find_participant(store, id).await?;
        let quiz = participant::live_quiz(store, participant.quiz_id).await?;
        let rows = results::build_results(store, &quiz, &participant).await?;
        let results = results::student_rows(&rows, participant.is_graded);
        Ok(json!({ "message": "Answers found", "participant": participant, "results": results }))
    }
    .await;
    respond(result, &headers, "participant").map(Json)
}

pub async fn finish(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<Id>) -> Reply {
    let participant = respond(
        participant::mark_completed(state.store.as_ref(), id).await,
        &headers,
        "participant",
    )?;
    Ok(Json(json!({ "message": "Quiz finished", "participant": participant })))
}
