use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ContentKey, ContentType};

/// Algorithm tag stamped on every model-ranked row
pub const RANKING_ALGORITHM: &str = "llm_ranked_v1";

/// A scored, explained recommendation persisted for one user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedRecommendation {
    pub user_id: Uuid,
    pub content_id: Uuid,
    pub external_id: i64,
    pub content_type: ContentType,
    pub title: String,
    /// Model confidence in [0, 1], passed through as returned
    pub score: f64,
    pub reason: String,
    pub algorithm: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RankedRecommendation {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    pub fn key(&self) -> ContentKey {
        ContentKey::new(self.external_id, self.content_type)
    }
}

/// Result of one generate call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendationSet {
    pub items: Vec<RankedRecommendation>,
    /// Whether the items were served without recomputation
    pub cached: bool,
}

impl RecommendationSet {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            cached: false,
        }
    }
}
