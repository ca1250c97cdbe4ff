use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, AppResult},
    models::RankedRecommendation,
    routes::{AppState, UserId},
};

#[derive(Debug, Default, Deserialize)]
pub struct RecommendationQuery {
    /// Recompute even when a live set exists
    #[serde(default)]
    pub refresh: bool,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub recommendations: Vec<RankedRecommendation>,
    /// Size of the set before `limit` was applied
    pub total: usize,
    pub cached: bool,
}

/// Handler for the recommendations endpoint
pub async fn list(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Query(params): Query<RecommendationQuery>,
) -> AppResult<Json<RecommendationResponse>> {
    if params.limit == Some(0) {
        return Err(AppError::InvalidInput("limit must be at least 1".to_string()));
    }

    let set = state
        .recommendations
        .generate(user_id, params.refresh)
        .await?;

    let total = set.items.len();
    let limit = params
        .limit
        .unwrap_or(state.max_recommendations)
        .clamp(1, state.max_recommendations.max(1));

    let mut recommendations = set.items;
    recommendations.truncate(limit);

    Ok(Json(RecommendationResponse {
        recommendations,
        total,
        cached: set.cached,
    }))
}
