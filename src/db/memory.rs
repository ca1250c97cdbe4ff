use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::PersonalizationStore;
use crate::error::AppResult;
use crate::models::{
    ContentKey, ContentLookup, ContentRecord, LearnedInsight, PreferenceProfile, RankedRecommendation, Rating,
    UserContext, WatchedTitle,
};

#[derive(Default)]
struct StoreState {
    content: HashMap<Uuid, ContentRecord>,
    /// Explicit settings and social signal per user
    settings: HashMap<Uuid, UserContext>,
    recommendations: HashMap<Uuid, Vec<RankedRecommendation>>,
    /// Insertion-ordered per user
    ratings: HashMap<Uuid, Vec<(Uuid, Rating)>>,
    watchlist: HashMap<Uuid, Vec<Uuid>>,
    exclusions: HashMap<Uuid, HashSet<ContentKey>>,
    profiles: HashMap<Uuid, PreferenceProfile>,
}

/// Process-local store for development runs and tests
///
/// A single lock guards all state, so every operation is atomic with respect
/// to every other.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_content(&self, record: ContentRecord) {
        self.state.write().await.content.insert(record.id, record);
    }

    /// Seeds explicit settings (genres, actors, friends' favorites, ...)
    pub async fn set_user_settings(&self, context: UserContext) {
        self.state
            .write()
            .await
            .settings
            .insert(context.user_id, context);
    }

    pub async fn rating(&self, user_id: Uuid, content_id: Uuid) -> Option<Rating> {
        self.state
            .read()
            .await
            .ratings
            .get(&user_id)
            .and_then(|rows| rows.iter().find(|(id, _)| *id == content_id))
            .map(|(_, rating)| *rating)
    }

    pub async fn watchlist(&self, user_id: Uuid) -> Vec<Uuid> {
        self.state
            .read()
            .await
            .watchlist
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// All persisted rows for the user, expired ones included
    pub async fn stored_recommendations(&self, user_id: Uuid) -> Vec<RankedRecommendation> {
        self.state
            .read()
            .await
            .recommendations
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl PersonalizationStore for InMemoryStore {
    async fn find_content(&self, lookup: &ContentLookup) -> AppResult<Option<ContentRecord>> {
        let state = self.state.read().await;
        let found = match lookup {
            ContentLookup::Id(id) => state.content.get(id).cloned(),
            ContentLookup::External {
                external_id,
                content_type,
            } => state
                .content
                .values()
                .find(|c| c.external_id == *external_id && c.content_type == *content_type)
                .cloned(),
        };
        Ok(found)
    }

    async fn find_content_by_external_ids(
        &self,
        external_ids: &[i64],
    ) -> AppResult<Vec<ContentRecord>> {
        let wanted: HashSet<i64> = external_ids.iter().copied().collect();
        let state = self.state.read().await;
        Ok(state
            .content
            .values()
            .filter(|c| wanted.contains(&c.external_id))
            .cloned()
            .collect())
    }

    async fn load_user_context(&self, user_id: Uuid) -> AppResult<UserContext> {
        let state = self.state.read().await;
        let mut context = state
            .settings
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| UserContext::new(user_id));
        context.user_id = user_id;

        if let Some(ratings) = state.ratings.get(&user_id) {
            context.recently_watched = ratings
                .iter()
                .rev()
                .filter_map(|(content_id, rating)| {
                    state.content.get(content_id).map(|c| WatchedTitle {
                        external_id: c.external_id,
                        content_type: c.content_type,
                        title: c.title.clone(),
                        rating: Some(rating.value()),
                        review: None,
                    })
                })
                .collect();
        }

        if let Some(watchlist) = state.watchlist.get(&user_id) {
            context.watchlist_titles = watchlist
                .iter()
                .filter_map(|id| state.content.get(id).map(|c| c.title.clone()))
                .collect();
        }

        if let Some(exclusions) = state.exclusions.get(&user_id) {
            context.excluded.extend(exclusions.iter().copied());
        }

        if let Some(profile) = state.profiles.get(&user_id) {
            context.viewing_preferences = profile.viewing_preferences_text.clone();
            context.learned = profile.learned_preferences.clone();
        }

        Ok(context)
    }

    async fn active_recommendations(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<RankedRecommendation>> {
        let state = self.state.read().await;
        let mut rows: Vec<RankedRecommendation> = state
            .recommendations
            .get(&user_id)
            .map(|rows| rows.iter().filter(|r| r.is_live(now)).cloned().collect())
            .unwrap_or_default();
        rows.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(rows)
    }

    async fn replace_recommendations(
        &self,
        user_id: Uuid,
        rows: &[RankedRecommendation],
    ) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.recommendations.insert(user_id, rows.to_vec());
        Ok(())
    }

    async fn upsert_rating(
        &self,
        user_id: Uuid,
        content_id: Uuid,
        rating: Rating,
    ) -> AppResult<()> {
        let mut state = self.state.write().await;
        let rows = state.ratings.entry(user_id).or_default();
        match rows.iter_mut().find(|(id, _)| *id == content_id) {
            Some(existing) => existing.1 = rating,
            None => rows.push((content_id, rating)),
        }
        Ok(())
    }

    async fn add_to_watchlist(&self, user_id: Uuid, content_id: Uuid) -> AppResult<bool> {
        let mut state = self.state.write().await;
        let list = state.watchlist.entry(user_id).or_default();
        if list.contains(&content_id) {
            return Ok(false);
        }
        list.push(content_id);
        Ok(true)
    }

    async fn add_exclusion(&self, user_id: Uuid, key: ContentKey) -> AppResult<()> {
        self.state
            .write()
            .await
            .exclusions
            .entry(user_id)
            .or_default()
            .insert(key);
        Ok(())
    }

    async fn exclusions(&self, user_id: Uuid) -> AppResult<HashSet<ContentKey>> {
        Ok(self
            .state
            .read()
            .await
            .exclusions
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn load_profile(&self, user_id: Uuid) -> AppResult<PreferenceProfile> {
        Ok(self
            .state
            .read()
            .await
            .profiles
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_viewing_preferences(&self, user_id: Uuid, text: &str) -> AppResult<()> {
        self.state
            .write()
            .await
            .profiles
            .entry(user_id)
            .or_default()
            .viewing_preferences_text = Some(text.to_string());
        Ok(())
    }

    async fn merge_learned_preferences(
        &self,
        user_id: Uuid,
        insight: LearnedInsight,
    ) -> AppResult<()> {
        self.state
            .write()
            .await
            .profiles
            .entry(user_id)
            .or_default()
            .learned_preferences
            .merge(insight);
        Ok(())
    }
}
