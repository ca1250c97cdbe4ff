pub mod cache;

mod macros;

pub use cache::create_redis_client;
pub use cache::CacheKey;
pub use cache::RedisTier;
pub use cache::{PROVIDER_PREFIX, RECOMMENDATIONS_PREFIX};
