pub mod cache;
pub mod memory;
pub mod postgres;
pub mod redis;
pub mod store;

pub use cache::{CacheLayer, CachePolicy, CacheTier, CachedValue, MemoryTier};
pub use memory::InMemoryStore;
pub use postgres::{create_pool, PgStore};
pub use redis::create_redis_client;
pub use redis::{CacheKey, RedisTier};
pub use store::PersonalizationStore;

#[cfg(test)]
pub use store::MockPersonalizationStore;
