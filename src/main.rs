use std::sync::Arc;

use anyhow::Context;
use cinematch_api::{
    clock::{Clock, SystemClock},
    config::Config,
    db::{
        create_pool, create_redis_client, CacheLayer, CachePolicy, MemoryTier, PersonalizationStore,
        PgStore, RedisTier,
    },
    routes::{create_router, AppState},
    services::{
        AnthropicClient, CandidateAggregator, FeedbackIngester, PreferenceLearner,
        RankingEngine, RateLimitedClient, RecommendationStore, SessionAggregator, TmdbProvider,
    },
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Flushed sessions allowed to queue ahead of the learner
const FLUSH_QUEUE_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let pool = create_pool(&config.database_url)
        .await
        .context("Failed to connect to Postgres")?;
    let pg_store = PgStore::new(pool);
    pg_store.migrate().await.context("Failed to run migrations")?;
    let store: Arc<dyn PersonalizationStore> = Arc::new(pg_store);

    let redis_client = create_redis_client(&config.redis_url)?;
    let cache = CacheLayer::new(
        Arc::new(MemoryTier::new(clock.clone())),
        Arc::new(RedisTier::new(redis_client)),
        CachePolicy {
            fast_ttl: config.fast_cache_ttl_secs,
            durable_ttl: config.durable_cache_ttl_secs,
            backfill: true,
        },
    );

    let provider = Arc::new(TmdbProvider::new(
        cache.clone(),
        RateLimitedClient::new("tmdb", config.tmdb_rate_limit()),
        config.tmdb_api_key.clone(),
        config.tmdb_api_url.clone(),
    ));
    let llm = Arc::new(AnthropicClient::new(
        config.anthropic_api_key.clone(),
        config.anthropic_model.clone(),
        RateLimitedClient::new("anthropic", config.llm_rate_limit()),
    )?);

    let recommendation_ttl = chrono::Duration::seconds(
        i64::try_from(config.recommendation_ttl_secs).context("RECOMMENDATION_TTL_SECS is too large")?,
    );
    let aggregator = CandidateAggregator::new(provider, clock.clone(), config.candidate_pool_size);
    let engine = RankingEngine::new(
        llm.clone(),
        store.clone(),
        clock.clone(),
        config.max_recommendations,
        recommendation_ttl,
    );
    let recommendations = RecommendationStore::new(
        aggregator,
        engine,
        store.clone(),
        cache,
        clock.clone(),
        config.recommendation_ttl_secs,
    );

    let learner = PreferenceLearner::new(llm, store.clone());
    let (sessions, flushed) = SessionAggregator::channel(config.debounce_window(), FLUSH_QUEUE_CAPACITY);
    tokio::spawn(learner.clone().run(flushed));
    let feedback = FeedbackIngester::new(store, learner, sessions, clock);

    let app = create_router(AppState {
        recommendations,
        feedback,
        max_recommendations: config.max_recommendations,
    });

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(address = %addr, "Server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
