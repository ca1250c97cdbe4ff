use axum::{extract::State, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{ContentLookup, ContentType, FeedbackAction, FeedbackOutcome, Rating},
    routes::{AppState, UserId},
};

/// Feedback body; content is named by our id or by TMDB id and type
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRequest {
    pub content_id: Option<Uuid>,
    pub tmdb_id: Option<i64>,
    #[serde(rename = "type")]
    pub content_type: Option<String>,
    /// Display title; informational only
    pub title: Option<String>,
    pub action: FeedbackAction,
    pub rating: Option<Rating>,
}

impl FeedbackRequest {
    pub fn lookup(&self) -> AppResult<ContentLookup> {
        if let Some(id) = self.content_id {
            return Ok(ContentLookup::Id(id));
        }

        match (self.tmdb_id, self.content_type.as_deref()) {
            (Some(external_id), Some(kind)) => {
                let content_type = ContentType::parse(kind).ok_or_else(|| {
                    AppError::InvalidInput(format!("unknown content type {:?}", kind))
                })?;
                Ok(ContentLookup::External {
                    external_id,
                    content_type,
                })
            }
            _ => Err(AppError::InvalidInput(
                "either contentId or tmdbId and type are required".to_string(),
            )),
        }
    }
}

/// Handler for the feedback endpoint
pub async fn submit(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(request): Json<FeedbackRequest>,
) -> AppResult<Json<FeedbackOutcome>> {
    let lookup = request.lookup()?;
    tracing::debug!(
        user_id = %user_id,
        content = %lookup,
        title = request.title.as_deref().unwrap_or(""),
        action = %request.action,
        "Feedback received"
    );

    let outcome = state
        .feedback
        .submit(user_id, &lookup, request.action, request.rating)
        .await?;
    Ok(Json(outcome))
}
