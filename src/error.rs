use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Application-level errors
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("External API error: {0}")]
    ExternalApi(String),

    #[error("No candidates available for ranking")]
    NoCandidates,

    #[error("Model response rejected: {0}")]
    Parse(#[from] ParseError),

    #[error("Text completion error: {0}")]
    Completion(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Failures decoding a model response against its expected schema
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("response is empty")]
    EmptyResponse,

    #[error("no balanced JSON object found in response")]
    NoJsonObject,

    #[error("JSON object does not match schema: {0}")]
    Schema(String),

    #[error("recommendation id {0:?} is not a numeric content id")]
    InvalidId(String),

    #[error("confidence score {0} is outside [0, 1]")]
    ScoreOutOfRange(f64),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Database(_) | AppError::Cache(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::ExternalApi(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::HttpClient(_) | AppError::Completion(_) | AppError::Parse(_) => {
                (StatusCode::BAD_GATEWAY, self.to_string())
            }
            AppError::NoCandidates => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
