use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::{make_span_with_request_id, request_id_middleware},
    services::{FeedbackIngester, RecommendationStore},
};

pub mod feedback;
pub mod recommendations;

/// Header carrying the authenticated user's id, set by the upstream gateway
pub const USER_ID_HEADER: &str = "x-user-id";

/// Services shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub recommendations: RecommendationStore,
    pub feedback: FeedbackIngester,
    /// Upper bound for the `limit` query parameter
    pub max_recommendations: usize,
}

/// Caller identity taken from [`USER_ID_HEADER`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserId(pub Uuid);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| AppError::InvalidInput(format!("missing {} header", USER_ID_HEADER)))?;

        raw.to_str()
            .ok()
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .map(UserId)
            .ok_or_else(|| AppError::InvalidInput(format!("{} must be a UUID", USER_ID_HEADER)))
    }
}

/// Creates the application router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_routes())
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id)),
        )
}

/// API routes under /api/v1
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/recommendations", get(recommendations::list))
        .route("/feedback", post(feedback::submit))
}

async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}
