use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::db::CacheKey;
use crate::error::AppResult;

/// One storage tier of the cache
#[async_trait]
pub trait CacheTier: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    /// Stores `value` for `ttl` seconds
    async fn set(&self, key: &str, value: String, ttl: u64) -> AppResult<()>;

    async fn delete(&self, key: &str) -> AppResult<()>;

    /// Removes every key starting with `prefix`, returning how many were removed
    async fn delete_prefix(&self, prefix: &str) -> AppResult<u64>;

    fn name(&self) -> &'static str;
}

/// In-process tier with per-entry expiry
pub struct MemoryTier {
    entries: DashMap<String, (String, DateTime<Utc>)>,
    clock: Arc<dyn Clock>,
}

impl MemoryTier {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl CacheTier for MemoryTier {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let now = self.clock.now();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.1 > now => return Ok(Some(entry.0.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: u64) -> AppResult<()> {
        let expires_at = self.clock.now() + Duration::seconds(ttl as i64);
        self.entries.insert(key.to_string(), (value, expires_at));
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> AppResult<u64> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        Ok((before - self.entries.len()) as u64)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Value read back from the cache
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    Json(serde_json::Value),
    /// Stored bytes that did not parse as JSON
    Raw(String),
}

/// TTL ceilings per tier
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    pub fast_ttl: u64,
    pub durable_ttl: u64,
    /// Copy durable hits into the fast tier
    pub backfill: bool,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            fast_ttl: 3_600,
            durable_ttl: 604_800,
            backfill: true,
        }
    }
}

/// Two-tier read-through/write-through cache
///
/// Reads check the fast tier, then the durable tier. Writes go to both, each
/// capped at its own TTL ceiling. Tier failures are logged and treated as
/// misses so an unavailable tier degrades to recomputation rather than errors.
#[derive(Clone)]
pub struct CacheLayer {
    fast: Arc<dyn CacheTier>,
    durable: Arc<dyn CacheTier>,
    policy: CachePolicy,
}

impl CacheLayer {
    pub fn new(fast: Arc<dyn CacheTier>, durable: Arc<dyn CacheTier>, policy: CachePolicy) -> Self {
        Self {
            fast,
            durable,
            policy,
        }
    }

    /// Retrieves a value, falling back to the raw stored text when it is not JSON
    pub async fn get(&self, key: &CacheKey) -> Option<CachedValue> {
        let key = key.to_string();

        if let Some(raw) = Self::read_tier(self.fast.as_ref(), &key).await {
            tracing::debug!(key = %key, tier = self.fast.name(), "Cache hit");
            return Some(decode(raw));
        }

        let raw = Self::read_tier(self.durable.as_ref(), &key).await?;
        tracing::debug!(key = %key, tier = self.durable.name(), "Cache hit");

        if self.policy.backfill {
            if let Err(e) = self
                .fast
                .set(&key, raw.clone(), self.policy.fast_ttl)
                .await
            {
                tracing::warn!(error = %e, key = %key, "Fast tier backfill failed");
            }
        }

        Some(decode(raw))
    }

    /// Retrieves and deserializes a value; a shape mismatch counts as a miss
    pub async fn get_as<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        match self.get(key).await? {
            CachedValue::Json(value) => match serde_json::from_value(value) {
                Ok(data) => Some(data),
                Err(e) => {
                    tracing::warn!(error = %e, key = %key, "Cached value has unexpected shape");
                    None
                }
            },
            CachedValue::Raw(_) => {
                tracing::warn!(key = %key, "Cached value is not JSON");
                None
            }
        }
    }

    /// Writes a value through both tiers
    pub async fn set<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: u64) {
        let json = match serde_json::to_string(value) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Cache serialization error");
                return;
            }
        };
        let key = key.to_string();

        let fast_ttl = ttl.min(self.policy.fast_ttl);
        let durable_ttl = ttl.min(self.policy.durable_ttl);

        if let Err(e) = self.fast.set(&key, json.clone(), fast_ttl).await {
            tracing::warn!(error = %e, key = %key, tier = self.fast.name(), "Cache write failed");
        }
        if let Err(e) = self.durable.set(&key, json, durable_ttl).await {
            tracing::warn!(error = %e, key = %key, tier = self.durable.name(), "Cache write failed");
        }
    }

    pub async fn delete(&self, key: &CacheKey) {
        let key = key.to_string();
        for tier in [&self.fast, &self.durable] {
            if let Err(e) = tier.delete(&key).await {
                tracing::warn!(error = %e, key = %key, tier = tier.name(), "Cache delete failed");
            }
        }
    }

    /// Removes every key under `prefix` from both tiers
    pub async fn delete_pattern(&self, prefix: &str) -> u64 {
        let mut removed = 0;
        for tier in [&self.fast, &self.durable] {
            match tier.delete_prefix(prefix).await {
                Ok(n) => removed += n,
                Err(e) => {
                    tracing::warn!(error = %e, prefix = %prefix, tier = tier.name(), "Cache pattern delete failed")
                }
            }
        }
        removed
    }

    async fn read_tier(tier: &dyn CacheTier, key: &str) -> Option<String> {
        match tier.get(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, key = %key, tier = tier.name(), "Cache read failed");
                None
            }
        }
    }
}

fn decode(raw: String) -> CachedValue {
    match serde_json::from_str(&raw) {
        Ok(value) => CachedValue::Json(value),
        Err(_) => CachedValue::Raw(raw),
    }
}
