use async_trait::async_trait;
use redis::AsyncCommands;
use redis::Client;
use std::fmt::Display;
use uuid::Uuid;

use crate::db::cache::CacheTier;
use crate::error::AppResult;
use crate::models::ContentType;

/// Prefix shared by every provider response key
pub const PROVIDER_PREFIX: &str = "tmdb:";

/// Prefix shared by every per-user recommendation key
pub const RECOMMENDATIONS_PREFIX: &str = "recs:";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Search(String),
    Details(ContentType, i64),
    Trending(ContentType),
    TopRated(ContentType),
    /// Discovery query, keyed by its normalized query signature
    Discover(ContentType, String),
    Similar(ContentType, i64),
    Recommendations(Uuid),
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::Search(query) => write!(f, "tmdb:search:{}", query.to_lowercase()),
            CacheKey::Details(kind, id) => write!(f, "tmdb:details:{}:{}", kind, id),
            CacheKey::Trending(kind) => write!(f, "tmdb:trending:{}", kind),
            CacheKey::TopRated(kind) => write!(f, "tmdb:top_rated:{}", kind),
            CacheKey::Discover(kind, signature) => {
                write!(f, "tmdb:discover:{}:{}", kind, signature)
            }
            CacheKey::Similar(kind, id) => write!(f, "tmdb:similar:{}:{}", kind, id),
            CacheKey::Recommendations(user_id) => write!(f, "recs:{}", user_id),
        }
    }
}

/// Creates a Redis client for caching
///
/// Establishes a connection to Redis for fast data caching.
/// Uses connection pooling via the connection-manager feature.
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

/// Durable cache tier backed by Redis
#[derive(Clone)]
pub struct RedisTier {
    redis_client: Client,
}

impl RedisTier {
    pub fn new(redis_client: Client) -> Self {
        Self { redis_client }
    }
}

#[async_trait]
impl CacheTier for RedisTier {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let cached: Option<String> = conn.get(key).await?;
        Ok(cached)
    }

    async fn set(&self, key: &str, value: String, ttl: u64) -> AppResult<()> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let _: () = conn.set_ex(key, value, ttl).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> AppResult<u64> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let keys: Vec<String> = conn.keys(format!("{}*", prefix)).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let removed: u64 = conn.del(keys).await?;
        tracing::debug!(prefix = %prefix, removed, "Deleted cache keys by prefix");
        Ok(removed)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_display_search_lowercase() {
        let key = CacheKey::Search("THE MATRIX".to_string());
        assert_eq!(format!("{}", key), "tmdb:search:the matrix");
    }

    #[test]
    fn test_cache_key_display_details() {
        let key = CacheKey::Details(ContentType::Movie, 27205);
        assert_eq!(format!("{}", key), "tmdb:details:movie:27205");
    }

    #[test]
    fn test_cache_key_display_discover() {
        let key = CacheKey::Discover(ContentType::Tv, "sort=popularity.desc&genres=18".to_string());
        assert_eq!(
            format!("{}", key),
            "tmdb:discover:tv:sort=popularity.desc&genres=18"
        );
    }

    #[test]
    fn test_provider_keys_share_prefix() {
        let keys = vec![
            CacheKey::Search("x".to_string()),
            CacheKey::Trending(ContentType::Movie),
            CacheKey::TopRated(ContentType::Tv),
            CacheKey::Similar(ContentType::Movie, 1),
        ];
        for key in keys {
            assert!(key.to_string().starts_with(PROVIDER_PREFIX));
        }
    }

    #[test]
    fn test_recommendation_key() {
        let user_id = Uuid::nil();
        let key = CacheKey::Recommendations(user_id);
        assert_eq!(
            format!("{}", key),
            format!("{}{}", RECOMMENDATIONS_PREFIX, user_id)
        );
    }

    #[tokio::test]
    #[ignore = "requires a running Redis at REDIS_URL"]
    async fn test_redis_tier_round_trip() {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let tier = RedisTier::new(create_redis_client(&redis_url).unwrap());

        tier.set("test:redis_tier", "[1]".to_string(), 60)
            .await
            .unwrap();
        assert_eq!(
            tier.get("test:redis_tier").await.unwrap(),
            Some("[1]".to_string())
        );
        assert_eq!(tier.delete_prefix("test:redis_").await.unwrap(), 1);
        assert_eq!(tier.get("test:redis_tier").await.unwrap(), None);
    }
}
