use crate::models::ValidationIssue;
use axum::{response::{IntoResponse, Response}, Json};
use http::{HeaderMap, StatusCode};
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("duplicate {0}")]
    Duplicate(&'static str),

    #[error("{0} not found")]
    Missing(&'static str),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Failures of the grading and participant workflows.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{message}")]
    Validation {
        message: String,
        issues: Vec<ValidationIssue>,
    },

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Internal(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ServiceError {
    pub fn not_found(what: &str) -> Self {
        ServiceError::NotFound(format!("{what} not found"))
    }

    pub fn validation(message: impl Into<String>, issues: Vec<ValidationIssue>) -> Self {
        ServiceError::Validation {
            message: message.into(),
            issues,
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

pub fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub field: String,
    pub issue: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<ErrorDetail>,
    pub request_id: String,
}

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Vec<ErrorDetail>,
    pub request_id: String,
    /// Name of the primary resource field, rendered as `null` in the body.
    pub resource: Option<&'static str>,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: Vec::new(),
            request_id: request_id.into(),
            resource: None,
        }
    }

    pub fn with_details(mut self, details: Vec<ErrorDetail>) -> Self {
        self.details = details;
        self
    }

    pub fn with_resource(mut self, resource: &'static str) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn from_service(err: ServiceError, request_id: impl Into<String>) -> Self {
        let request_id = request_id.into();
        match err {
            ServiceError::NotFound(msg) => AppError::new(StatusCode::NOT_FOUND, "NOT_FOUND", msg, request_id),
            ServiceError::Forbidden(msg) => AppError::new(StatusCode::FORBIDDEN, "FORBIDDEN", msg, request_id),
            ServiceError::Conflict(msg) => AppError::new(StatusCode::CONFLICT, "CONFLICT", msg, request_id),
            ServiceError::Unauthorized(msg) => {
                AppError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg, request_id)
            }
            ServiceError::Validation { message, issues } => {
                AppError::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message, request_id).with_details(
                    issues
                        .into_iter()
                        .map(|i| ErrorDetail {
                            field: i.field,
                            issue: i.issue,
                        })
                        .collect(),
                )
            }
            ServiceError::Internal(msg) => {
                tracing::error!(request_id = %request_id, "internal failure: {}", msg);
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg, request_id)
            }
            ServiceError::Store(err) => {
                tracing::error!(request_id = %request_id, "store failure: {}", err);
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", err.to_string(), request_id)
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = Map::new();
        body.insert("message".into(), Value::String(self.message.clone()));
        if let Some(resource) = self.resource {
            body.insert(resource.into(), Value::Null);
        }
        let payload = ErrorPayload {
            code: self.code,
            message: self.message,
            details: self.details,
            request_id: self.request_id,
        };
        body.insert(
            "error".into(),
            serde_json::to_value(payload).unwrap_or(Value::Null),
        );
        (self.status, Json(Value::Object(body))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_errors_map_to_statuses() {
        let cases = [
            (ServiceError::not_found("Quiz"), StatusCode::NOT_FOUND),
            (ServiceError::Forbidden("quiz is not active".into()), StatusCode::FORBIDDEN),
            (ServiceError::Conflict("taken".into()), StatusCode::CONFLICT),
            (ServiceError::validation("bad", vec![]), StatusCode::BAD_REQUEST),
            (ServiceError::Store(StoreError::Duplicate("participant")), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from_service(err, "req").status, status);
        }
    }

    #[test]
    fn validation_issues_become_details() {
        let err = ServiceError::validation("quiz validation failed", vec![ValidationIssue::new("title", "must not be empty")]);
        let app = AppError::from_service(err, "req");
        assert_eq!(app.code, "VALIDATION_ERROR");
        assert_eq!(app.details.len(), 1);
        assert_eq!(app.details[0].field, "title");
    }
}
