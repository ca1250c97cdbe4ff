use crate::{
    clock::Clock,
    db::PersonalizationStore,
    error::{AppError, AppResult},
    models::{ContentLookup, FeedbackAction, FeedbackEvent, FeedbackOutcome, Rating},
    services::{preferences::PreferenceLearner, sessions::SessionAggregator},
};
use std::sync::Arc;
use uuid::Uuid;

/// Applies a feedback interaction and hands it on to the learning paths
#[derive(Clone)]
pub struct FeedbackIngester {
    store: Arc<dyn PersonalizationStore>,
    learner: PreferenceLearner,
    sessions: SessionAggregator,
    clock: Arc<dyn Clock>,
}

impl FeedbackIngester {
    pub fn new(
        store: Arc<dyn PersonalizationStore>,
        learner: PreferenceLearner,
        sessions: SessionAggregator,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            learner,
            sessions,
            clock,
        }
    }

    /// Resolves the content reference, then records the event
    pub async fn submit(
        &self,
        user_id: Uuid,
        lookup: &ContentLookup,
        action: FeedbackAction,
        rating: Option<Rating>,
    ) -> AppResult<FeedbackOutcome> {
        let content = self
            .store
            .find_content(lookup)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("content {}", lookup)))?;

        let event = FeedbackEvent::new(user_id, &content, action, rating, self.clock.now());
        self.record(event).await
    }

    /// Records one feedback event.
    ///
    /// Rating and watchlist writes must succeed. The exclusion write and the
    /// immediate insight update are best effort. Returns once the event is
    /// buffered for the batch learner, without waiting for its flush.
    pub async fn record(&self, event: FeedbackEvent) -> AppResult<FeedbackOutcome> {
        let user_id = event.user_id;

        if let (FeedbackAction::Watched, Some(rating)) = (event.action, event.rating) {
            self.store
                .upsert_rating(user_id, event.content_id, rating)
                .await?;
        }

        if event.action == FeedbackAction::Watchlist {
            let inserted = self
                .store
                .add_to_watchlist(user_id, event.content_id)
                .await?;
            if !inserted {
                tracing::debug!(user_id = %user_id, content_id = %event.content_id, "Already on watchlist");
            }
        }

        if event.action.excludes_content() {
            if let Err(e) = self.store.add_exclusion(user_id, event.key()).await {
                tracing::warn!(
                    user_id = %user_id,
                    content = %event.key(),
                    error = %e,
                    "Failed to record exclusion"
                );
            }
        }

        let mut learned_insights_updated = false;
        if event.rating.is_some() {
            match self.learner.record_insight(&event).await {
                Ok(_) => learned_insights_updated = true,
                Err(e) => tracing::warn!(
                    user_id = %user_id,
                    title = %event.title,
                    error = %e,
                    "Learned insight update failed"
                ),
            }
        }

        let action = event.action;
        tracing::info!(
            user_id = %user_id,
            action = %action,
            title = %event.title,
            rating = event.rating.map(|r| r.value()),
            "Feedback recorded"
        );
        self.sessions.track(event).await;

        Ok(FeedbackOutcome {
            success: true,
            preferences_updated: true,
            learned_insights_updated,
            should_remove_from_ui: action.excludes_content(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::db::{InMemoryStore, MockPersonalizationStore};
    use crate::models::{ContentKey, ContentRecord, ContentType};
    use crate::services::llm::MockTextCompletion;
    use crate::services::sessions::FlushedBatch;
    use chrono::Utc;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const WINDOW: Duration = Duration::from_secs(300);

    fn content(external_id: i64, title: &str) -> ContentRecord {
        ContentRecord {
            id: Uuid::new_v4(),
            external_id,
            content_type: ContentType::Movie,
            title: title.to_string(),
            release_year: Some(2021),
            genres: vec!["Drama".to_string()],
        }
    }

    fn insight_llm() -> MockTextCompletion {
        let mut llm = MockTextCompletion::new();
        llm.expect_complete().returning(|_, _| {
            Ok(r#"{"insight": "Dislikes slow pacing.", "dislikes": ["slow pacing"]}"#.to_string())
        });
        llm
    }

    fn ingester(
        store: Arc<dyn PersonalizationStore>,
        llm: MockTextCompletion,
    ) -> (FeedbackIngester, mpsc::Receiver<FlushedBatch>) {
        let (sessions, rx) = SessionAggregator::channel(WINDOW, 8);
        let learner = PreferenceLearner::new(Arc::new(llm), store.clone());
        (
            FeedbackIngester::new(store, learner, sessions, Arc::new(SystemClock)),
            rx,
        )
    }

    fn titles(batch: &FlushedBatch) -> Vec<&str> {
        batch.events.iter().map(|e| e.title.as_str()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_exclusions_apply_before_flush() {
        let store = Arc::new(InMemoryStore::new());
        let movie_x = content(1, "Movie X");
        let movie_y = content(2, "Movie Y");
        store.insert_content(movie_x.clone()).await;
        store.insert_content(movie_y.clone()).await;
        let (ingester, mut rx) = ingester(store.clone(), insight_llm());
        let user_id = Uuid::new_v4();

        let first = ingester
            .submit(
                user_id,
                &ContentLookup::Id(movie_x.id),
                FeedbackAction::Watched,
                Some(Rating::try_from(1).unwrap()),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(40)).await;
        let second = ingester
            .submit(
                user_id,
                &ContentLookup::External {
                    external_id: 2,
                    content_type: ContentType::Movie,
                },
                FeedbackAction::NotRelevant,
                None,
            )
            .await
            .unwrap();

        assert!(first.learned_insights_updated);
        assert!(first.should_remove_from_ui && second.should_remove_from_ui);
        assert!(!second.learned_insights_updated);
        assert_eq!(
            store.exclusions(user_id).await.unwrap(),
            HashSet::from([
                ContentKey::new(1, ContentType::Movie),
                ContentKey::new(2, ContentType::Movie),
            ])
        );
        assert_eq!(store.rating(user_id, movie_x.id).await.map(|r| r.value()), Some(1));
        assert_eq!(rx.try_recv(), Err(mpsc::error::TryRecvError::Empty));

        let batch = rx.recv().await.unwrap();
        assert_eq!(titles(&batch), vec!["Movie X", "Movie Y"]);
        assert_eq!(batch.events[0].rating.map(|r| r.value()), Some(1));
    }

    #[tokio::test]
    async fn test_watchlist_is_inserted_once() {
        let store = Arc::new(InMemoryStore::new());
        let film = content(5, "Past Lives");
        store.insert_content(film.clone()).await;
        let mut llm = MockTextCompletion::new();
        llm.expect_complete().never();
        let (ingester, _rx) = ingester(store.clone(), llm);
        let user_id = Uuid::new_v4();

        for _ in 0..2 {
            let outcome = ingester
                .submit(user_id, &ContentLookup::Id(film.id), FeedbackAction::Watchlist, None)
                .await
                .unwrap();
            assert!(outcome.success && outcome.preferences_updated);
        }

        assert_eq!(store.watchlist(user_id).await, vec![film.id]);
    }

    #[tokio::test]
    async fn test_keep_does_not_exclude() {
        let store = Arc::new(InMemoryStore::new());
        let film = content(6, "Aftersun");
        store.insert_content(film.clone()).await;
        let mut llm = MockTextCompletion::new();
        llm.expect_complete().never();
        let (ingester, _rx) = ingester(store.clone(), llm);
        let user_id = Uuid::new_v4();

        let outcome = ingester
            .submit(user_id, &ContentLookup::Id(film.id), FeedbackAction::Keep, None)
            .await
            .unwrap();

        assert!(!outcome.should_remove_from_ui);
        assert!(store.exclusions(user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_content_is_not_found() {
        let (ingester, _rx) = ingester(Arc::new(InMemoryStore::new()), MockTextCompletion::new());

        let result = ingester
            .submit(
                Uuid::new_v4(),
                &ContentLookup::Id(Uuid::new_v4()),
                FeedbackAction::Keep,
                None,
            )
            .await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_insight_failure_is_swallowed() {
        let store = Arc::new(InMemoryStore::new());
        let mut llm = MockTextCompletion::new();
        llm.expect_complete()
            .returning(|_, _| Err(AppError::Completion("overloaded".to_string())));
        let (ingester, _rx) = ingester(store.clone(), llm);
        let user_id = Uuid::new_v4();
        let film = content(7, "Tár");

        let outcome = ingester
            .record(FeedbackEvent::new(
                user_id,
                &film,
                FeedbackAction::Keep,
                Some(Rating::try_from(4).unwrap()),
                Utc::now(),
            ))
            .await
            .unwrap();

        assert!(outcome.success);
        assert!(!outcome.learned_insights_updated);
        assert!(outcome.preferences_updated);
    }

    #[tokio::test]
    async fn test_exclusion_failure_is_swallowed() {
        let mut store = MockPersonalizationStore::new();
        store
            .expect_add_exclusion()
            .times(1)
            .returning(|_, _| Err(AppError::Internal("exclusions unavailable".to_string())));
        let mut llm = MockTextCompletion::new();
        llm.expect_complete().never();
        let (ingester, _rx) = ingester(Arc::new(store), llm);

        let outcome = tokio_test::assert_ok!(
            ingester
                .record(FeedbackEvent::new(
                    Uuid::new_v4(),
                    &content(8, "Cats"),
                    FeedbackAction::NotRelevant,
                    None,
                    Utc::now(),
                ))
                .await
        );

        assert!(outcome.success && outcome.should_remove_from_ui);
    }

    #[tokio::test]
    async fn test_rating_failure_propagates() {
        let mut store = MockPersonalizationStore::new();
        store
            .expect_upsert_rating()
            .returning(|_, _, _| Err(AppError::Internal("ratings unavailable".to_string())));
        store.expect_add_exclusion().never();
        let mut llm = MockTextCompletion::new();
        llm.expect_complete().never();
        let (ingester, _rx) = ingester(Arc::new(store), llm);
        let user_id = Uuid::new_v4();

        let result = ingester
            .record(FeedbackEvent::new(
                user_id,
                &content(9, "Heat"),
                FeedbackAction::Watched,
                Some(Rating::try_from(5).unwrap()),
                Utc::now(),
            ))
            .await;

        let err = tokio_test::assert_err!(result);
        assert!(matches!(err, AppError::Internal(_)));
        assert_eq!(ingester.sessions.pending(user_id).await, 0);
    }
}
