/// Read-through caching over a [`CacheLayer`](crate::db::CacheLayer).
///
/// Returns the cached value when present. Otherwise awaits the block,
/// writes its result through both tiers and returns it.
///
/// # Arguments
/// * `$cache`: The cache layer to read from and write to.
/// * `$key`: The [`CacheKey`](crate::db::CacheKey) for the value.
/// * `$ttl`: Time-to-live in seconds (each tier caps it at its own ceiling).
/// * `$block`: Future computing the value on a miss.
///
/// # Example
/// ```rust,ignore
/// let trending: Vec<Candidate> = cached!(self.cache, CacheKey::Trending(kind), 3600, async move {
///     fetch_trending(kind).await
/// })?;
/// ```
#[macro_export]
macro_rules! cached {
    ($cache:expr, $key:expr, $ttl:expr, $block:expr) => {{
        if let Some(cached) = $cache.get_as(&$key).await {
            Ok(cached)
        } else {
            let value = $block.await?;
            $cache.set(&$key, &value, $ttl).await;
            Ok(value)
        }
    }};
}
