use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{
    ContentKey, ContentLookup, ContentRecord, LearnedInsight, PreferenceProfile,
    RankedRecommendation, Rating, UserContext,
};

/// Persistence capability used by the personalization pipeline
///
/// Every operation is keyed by user, and by content where it applies.
/// Implementations must make [`replace_recommendations`] atomic: readers see
/// either the previous set or the new one, never a mix.
///
/// [`replace_recommendations`]: PersonalizationStore::replace_recommendations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PersonalizationStore: Send + Sync {
    async fn find_content(&self, lookup: &ContentLookup) -> AppResult<Option<ContentRecord>>;

    /// Returns the locally known records among `external_ids`, in no particular order
    async fn find_content_by_external_ids(
        &self,
        external_ids: &[i64],
    ) -> AppResult<Vec<ContentRecord>>;

    async fn load_user_context(&self, user_id: Uuid) -> AppResult<UserContext>;

    /// Non-expired rows for the user, highest score first
    async fn active_recommendations(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<RankedRecommendation>>;

    /// Deletes all of the user's rows and inserts `rows` as one unit
    async fn replace_recommendations(
        &self,
        user_id: Uuid,
        rows: &[RankedRecommendation],
    ) -> AppResult<()>;

    /// Updates the existing rating for this user and content, or inserts one
    async fn upsert_rating(&self, user_id: Uuid, content_id: Uuid, rating: Rating)
        -> AppResult<()>;

    /// Returns `false` when the content was already on the watchlist
    async fn add_to_watchlist(&self, user_id: Uuid, content_id: Uuid) -> AppResult<bool>;

    /// Idempotent union into the user's exclusion set
    async fn add_exclusion(&self, user_id: Uuid, key: ContentKey) -> AppResult<()>;

    async fn exclusions(&self, user_id: Uuid) -> AppResult<HashSet<ContentKey>>;

    async fn load_profile(&self, user_id: Uuid) -> AppResult<PreferenceProfile>;

    /// Replaces the free-text preference field
    async fn save_viewing_preferences(&self, user_id: Uuid, text: &str) -> AppResult<()>;

    /// Unions the insight into the stored learned preferences
    async fn merge_learned_preferences(
        &self,
        user_id: Uuid,
        insight: LearnedInsight,
    ) -> AppResult<()>;
}
