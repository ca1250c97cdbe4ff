use crate::{
    clock::Clock,
    db::{CacheKey, CacheLayer, PersonalizationStore},
    error::{AppError, AppResult},
    models::{ContentKey, RankedRecommendation, RecommendationSet},
    services::{candidates::CandidateAggregator, ranking::RankingEngine},
};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Serves a user's recommendations, recomputing only when nothing valid exists
#[derive(Clone)]
pub struct RecommendationStore {
    aggregator: CandidateAggregator,
    engine: RankingEngine,
    store: Arc<dyn PersonalizationStore>,
    cache: CacheLayer,
    clock: Arc<dyn Clock>,
    ttl_secs: u64,
    /// One refresh at a time per user
    refresh_locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl RecommendationStore {
    pub fn new(
        aggregator: CandidateAggregator,
        engine: RankingEngine,
        store: Arc<dyn PersonalizationStore>,
        cache: CacheLayer,
        clock: Arc<dyn Clock>,
        ttl_secs: u64,
    ) -> Self {
        Self {
            aggregator,
            engine,
            store,
            cache,
            clock,
            ttl_secs,
            refresh_locks: Arc::new(DashMap::new()),
        }
    }

    /// Returns the user's recommendations.
    ///
    /// Unless `force_refresh` is set, cached or persisted rows that are
    /// still live are served as-is. Excluded content is filtered out of
    /// every result.
    pub async fn generate(&self, user_id: Uuid, force_refresh: bool) -> AppResult<RecommendationSet> {
        if !force_refresh {
            if let Some(items) = self.read_existing(user_id).await? {
                return Ok(RecommendationSet {
                    items,
                    cached: true,
                });
            }
        }

        let lock = self
            .refresh_locks
            .entry(user_id)
            .or_default()
            .value()
            .clone();
        let result = {
            let _guard = lock.lock().await;

            // A refresh that finished while we waited is as good as our own
            let existing = if force_refresh {
                None
            } else {
                self.read_existing(user_id).await?
            };

            match existing {
                Some(items) => Ok(RecommendationSet {
                    items,
                    cached: true,
                }),
                None => self.refresh(user_id).await,
            }
        };

        drop(lock);
        self.refresh_locks
            .remove_if(&user_id, |_, lock| Arc::strong_count(lock) == 1);

        result
    }

    /// Drops the user's cached set so the next read goes to storage
    pub async fn invalidate(&self, user_id: Uuid) {
        self.cache.delete(&CacheKey::Recommendations(user_id)).await;
    }

    /// Live rows still visible to the user, or `None` when a refresh is due.
    ///
    /// A set whose every row has since been excluded counts as absent.
    async fn read_existing(&self, user_id: Uuid) -> AppResult<Option<Vec<RankedRecommendation>>> {
        let now = self.clock.now();
        let key = CacheKey::Recommendations(user_id);

        if let Some(cached) = self.cache.get_as::<Vec<RankedRecommendation>>(&key).await {
            let live: Vec<_> = cached.into_iter().filter(|r| r.is_live(now)).collect();
            if !live.is_empty() {
                tracing::debug!(user_id = %user_id, count = live.len(), "Recommendations served from cache");
                return self.visible(user_id, live).await;
            }
        }

        let persisted = self.store.active_recommendations(user_id, now).await?;
        if persisted.is_empty() {
            return Ok(None);
        }

        tracing::debug!(user_id = %user_id, count = persisted.len(), "Recommendations served from storage");
        self.cache.set(&key, &persisted, self.remaining_ttl(&persisted)).await;
        self.visible(user_id, persisted).await
    }

    async fn visible(
        &self,
        user_id: Uuid,
        rows: Vec<RankedRecommendation>,
    ) -> AppResult<Option<Vec<RankedRecommendation>>> {
        let rows = self.without_excluded(user_id, rows).await?;
        if rows.is_empty() {
            tracing::debug!(user_id = %user_id, "Every stored recommendation is excluded");
            return Ok(None);
        }
        Ok(Some(rows))
    }

    async fn refresh(&self, user_id: Uuid) -> AppResult<RecommendationSet> {
        let ctx = self.store.load_user_context(user_id).await?;

        let candidates = match self.aggregator.build_pool(&ctx).await {
            Ok(candidates) => candidates,
            Err(AppError::NoCandidates) => return Ok(RecommendationSet::empty()),
            Err(e) => return Err(e),
        };

        let ranked = match self.engine.rank(&ctx, &candidates).await {
            Ok(ranked) => ranked,
            Err(AppError::NoCandidates) => return Ok(RecommendationSet::empty()),
            Err(AppError::Parse(e)) => {
                tracing::warn!(user_id = %user_id, error = %e, "Ranking produced no usable output");
                return Ok(RecommendationSet::empty());
            }
            Err(e) => return Err(e),
        };

        self.store.replace_recommendations(user_id, &ranked).await?;

        let key = CacheKey::Recommendations(user_id);
        if ranked.is_empty() {
            self.cache.delete(&key).await;
        } else {
            self.cache.set(&key, &ranked, self.ttl_secs).await;
        }

        tracing::info!(user_id = %user_id, count = ranked.len(), "Recommendations refreshed");

        let items = self.without_excluded(user_id, ranked).await?;
        Ok(RecommendationSet {
            items,
            cached: false,
        })
    }

    async fn without_excluded(
        &self,
        user_id: Uuid,
        items: Vec<RankedRecommendation>,
    ) -> AppResult<Vec<RankedRecommendation>> {
        let excluded: HashSet<ContentKey> = self.store.exclusions(user_id).await?;
        if excluded.is_empty() {
            return Ok(items);
        }
        Ok(items
            .into_iter()
            .filter(|r| !excluded.contains(&r.key()))
            .collect())
    }

    /// Seconds until the earliest row in `rows` expires
    fn remaining_ttl(&self, rows: &[RankedRecommendation]) -> u64 {
        let now = self.clock.now();
        rows.iter()
            .map(|r| (r.expires_at - now).num_seconds().max(1) as u64)
            .min()
            .unwrap_or(self.ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::db::{CachePolicy, InMemoryStore, MemoryTier};
    use crate::models::{Candidate, ContentRecord, ContentType};
    use crate::services::llm::MockTextCompletion;
    use crate::services::providers::MockContentProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const POOL: [i64; 4] = [101, 102, 103, 104];

    fn provider() -> MockContentProvider {
        let mut provider = MockContentProvider::new();
        provider.expect_get_trending().returning(|_| {
            Ok(POOL
                .iter()
                .map(|&id| {
                    Candidate::new(id, ContentType::Movie, format!("Film {}", id), vec![], 7.0, 1.0, "")
                })
                .collect())
        });
        provider.expect_discover().returning(|_| Ok(Vec::new()));
        provider.expect_get_top_rated().returning(|_| Ok(Vec::new()));
        provider.expect_name().return_const("mock");
        provider
    }

    fn ranking_response(ids: &[i64]) -> String {
        let items: Vec<String> = ids
            .iter()
            .map(|id| format!(r#"{{"id": {}, "score": 0.8, "reason": "Because."}}"#, id))
            .collect();
        format!(r#"{{"recommendations": [{}]}}"#, items.join(","))
    }

    /// Model answering each call with the next id list in `rounds`
    fn llm(rounds: Vec<Vec<i64>>, calls: Arc<AtomicUsize>) -> MockTextCompletion {
        let mut llm = MockTextCompletion::new();
        llm.expect_complete().returning(move |_, _| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            let ids = rounds.get(n).or(rounds.last()).cloned().unwrap_or_default();
            Ok(ranking_response(&ids))
        });
        llm.expect_name().return_const("mock");
        llm
    }

    async fn setup(
        provider: MockContentProvider,
        llm: MockTextCompletion,
    ) -> (RecommendationStore, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        for id in POOL {
            store
                .insert_content(ContentRecord {
                    id: Uuid::new_v4(),
                    external_id: id,
                    content_type: ContentType::Movie,
                    title: format!("Film {}", id),
                    release_year: Some(2020),
                    genres: vec![],
                })
                .await;
        }

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let cache = CacheLayer::new(
            Arc::new(MemoryTier::default()),
            Arc::new(MemoryTier::default()),
            CachePolicy::default(),
        );
        let aggregator = CandidateAggregator::new(Arc::new(provider), clock.clone(), 20);
        let engine = RankingEngine::new(
            Arc::new(llm),
            store.clone(),
            clock.clone(),
            10,
            chrono::Duration::hours(24),
        );
        let recommendations =
            RecommendationStore::new(aggregator, engine, store.clone(), cache, clock, 86_400);
        (recommendations, store)
    }

    fn ids(items: &[RankedRecommendation]) -> Vec<i64> {
        items.iter().map(|r| r.external_id).collect()
    }

    #[tokio::test]
    async fn test_forced_refresh_replaces_every_row() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (recs, store) = setup(
            provider(),
            llm(vec![vec![101, 102], vec![103]], calls.clone()),
        )
        .await;
        let user_id = Uuid::new_v4();

        let first = recs.generate(user_id, false).await.unwrap();
        assert_eq!(ids(&first.items), vec![101, 102]);
        assert!(!first.cached);

        let second = recs.generate(user_id, true).await.unwrap();
        assert_eq!(ids(&second.items), vec![103]);
        assert_eq!(ids(&store.stored_recommendations(user_id).await), vec![103]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unforced_read_uses_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (recs, _) = setup(provider(), llm(vec![vec![101, 104]], calls.clone())).await;
        let user_id = Uuid::new_v4();

        recs.generate(user_id, false).await.unwrap();
        let again = recs.generate(user_id, false).await.unwrap();

        assert!(again.cached);
        assert_eq!(ids(&again.items), vec![101, 104]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_persisted_rows_served_after_cache_loss() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (recs, _) = setup(provider(), llm(vec![vec![102]], calls.clone())).await;
        let user_id = Uuid::new_v4();

        recs.generate(user_id, false).await.unwrap();
        recs.invalidate(user_id).await;
        let again = recs.generate(user_id, false).await.unwrap();

        assert!(again.cached);
        assert_eq!(ids(&again.items), vec![102]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_excluded_content_disappears_without_refresh() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (recs, store) = setup(provider(), llm(vec![vec![101, 102]], calls.clone())).await;
        let user_id = Uuid::new_v4();

        recs.generate(user_id, false).await.unwrap();
        store
            .add_exclusion(user_id, ContentKey::new(101, ContentType::Movie))
            .await
            .unwrap();
        let again = recs.generate(user_id, false).await.unwrap();

        assert_eq!(ids(&again.items), vec![102]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_show_exclusion_keeps_movie_with_same_id() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (recs, store) = setup(provider(), llm(vec![vec![101, 102]], calls.clone())).await;
        let user_id = Uuid::new_v4();

        recs.generate(user_id, false).await.unwrap();
        store
            .add_exclusion(user_id, ContentKey::new(101, ContentType::Tv))
            .await
            .unwrap();
        let again = recs.generate(user_id, false).await.unwrap();

        assert!(again.cached);
        assert_eq!(ids(&again.items), vec![101, 102]);
    }

    #[tokio::test]
    async fn test_fully_excluded_set_is_recomputed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (recs, store) = setup(
            provider(),
            llm(vec![vec![101, 102], vec![103]], calls.clone()),
        )
        .await;
        let user_id = Uuid::new_v4();

        recs.generate(user_id, false).await.unwrap();
        for id in [101, 102] {
            store
                .add_exclusion(user_id, ContentKey::new(id, ContentType::Movie))
                .await
                .unwrap();
        }
        let again = recs.generate(user_id, false).await.unwrap();

        assert!(!again.cached);
        assert_eq!(ids(&again.items), vec![103]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_rank_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (recs, _) = setup(provider(), llm(vec![vec![101]], calls.clone())).await;
        let user_id = Uuid::new_v4();

        let (a, b) = tokio::join!(recs.generate(user_id, false), recs.generate(user_id, false));

        assert_eq!(ids(&a.unwrap().items), vec![101]);
        assert_eq!(ids(&b.unwrap().items), vec![101]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_candidates_yields_empty_set() {
        let mut provider = MockContentProvider::new();
        provider.expect_get_trending().returning(|_| Ok(Vec::new()));
        provider.expect_discover().returning(|_| Ok(Vec::new()));
        provider.expect_get_top_rated().returning(|_| Ok(Vec::new()));
        provider.expect_name().return_const("mock");
        let mut llm = MockTextCompletion::new();
        llm.expect_complete().never();

        let (recs, _) = setup(provider, llm).await;
        let set = recs.generate(Uuid::new_v4(), true).await.unwrap();

        assert!(set.items.is_empty());
        assert!(!set.cached);
    }

    #[tokio::test]
    async fn test_unparseable_ranking_keeps_previous_rows() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut llm = MockTextCompletion::new();
        let counter = calls.clone();
        llm.expect_complete().returning(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(ranking_response(&[104]))
            } else {
                Ok("Sorry, I can't rank these.".to_string())
            }
        });
        llm.expect_name().return_const("mock");

        let (recs, store) = setup(provider(), llm).await;
        let user_id = Uuid::new_v4();

        recs.generate(user_id, false).await.unwrap();
        let set = recs.generate(user_id, true).await.unwrap();

        assert!(set.items.is_empty());
        assert_eq!(ids(&store.stored_recommendations(user_id).await), vec![104]);
    }
}
