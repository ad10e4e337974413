use crate::handlers;
use crate::state::AppState;
use axum::http::{HeaderName, Method};
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::header::AUTHORIZATION,
            HeaderName::from_static("x-request-id"),
            HeaderName::from_static("x-forwarded-for"),
        ]);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route(
            "/user",
            post(handlers::register).get(handlers::profile).put(handlers::change_password),
        )
        .route("/user/auth", post(handlers::login))
        .route("/user/refresh-token", get(handlers::refresh_token))
        .route("/user/logout", post(handlers::logout))
        .route("/quiz", get(handlers::list_quizzes).post(handlers::create_quiz))
        .route(
            "/quiz/:id",
            get(handlers::get_quiz).put(handlers::update_quiz).delete(handlers::delete_quiz),
        )
        .route(
            "/quiz/:quiz_id/question/:question_id",
            get(handlers::get_question).post(handlers::submit_answer),
        )
        .route("/quiz/:quiz_id/participant", get(handlers::list_participants))
        .route(
            "/quiz/:quiz_id/participant/:participant_id",
            get(handlers::participant_review),
        )
        .route(
            "/quiz/:quiz_id/participant/:participant_id/answer/:answer_id",
            put(handlers::review_answer),
        )
        .route("/participant", post(handlers::join_quiz))
        .route(
            "/participant/:id",
            get(handlers::get_participant).put(handlers::update_participant),
        )
        .route("/participant/:id/answers", get(handlers::participant_answers))
        .route("/participant/:id/finished", post(handlers::finish))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
