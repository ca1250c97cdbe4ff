use crate::{
    clock::Clock,
    error::{AppError, AppResult},
    models::{Candidate, ContentType, UserContext},
    services::providers::{ContentProvider, DiscoverQuery, DiscoverSort},
};
use std::collections::HashSet;
use std::fmt::Display;
use std::sync::Arc;

/// Votes a title needs before it can show up as a new release
const NEW_RELEASE_MIN_VOTES: u32 = 20;

/// Fetch phases in aggregation priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Trending,
    GenreDiscovery,
    TopRated,
    NewReleases,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::Trending,
        Phase::GenreDiscovery,
        Phase::TopRated,
        Phase::NewReleases,
    ];

    /// Share of the pool this phase may fill, in percent
    fn share(&self) -> usize {
        match self {
            Phase::Trending | Phase::GenreDiscovery => 30,
            Phase::TopRated | Phase::NewReleases => 20,
        }
    }

    pub fn quota(&self, pool_size: usize) -> usize {
        (pool_size * self.share() / 100).max(1)
    }

    fn as_str(&self) -> &'static str {
        match self {
            Phase::Trending => "trending",
            Phase::GenreDiscovery => "genre_discovery",
            Phase::TopRated => "top_rated",
            Phase::NewReleases => "new_releases",
        }
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Insertion-ordered, deduplicated, capped candidate set
struct Pool {
    items: Vec<Candidate>,
    seen: HashSet<i64>,
    cap: usize,
}

impl Pool {
    fn new(cap: usize) -> Self {
        Self {
            items: Vec::with_capacity(cap),
            seen: HashSet::with_capacity(cap),
            cap,
        }
    }

    fn is_full(&self) -> bool {
        self.items.len() >= self.cap
    }

    /// First writer wins: an id already present is never replaced
    fn offer(&mut self, candidate: Candidate) -> bool {
        if self.is_full() || !self.seen.insert(candidate.external_id) {
            return false;
        }
        self.items.push(candidate);
        true
    }
}

/// Assembles the candidate pool a ranking run works from
#[derive(Clone)]
pub struct CandidateAggregator {
    provider: Arc<dyn ContentProvider>,
    clock: Arc<dyn Clock>,
    pool_size: usize,
}

impl CandidateAggregator {
    pub fn new(provider: Arc<dyn ContentProvider>, clock: Arc<dyn Clock>, pool_size: usize) -> Self {
        Self {
            provider,
            clock,
            pool_size: pool_size.max(1),
        }
    }

    /// Runs every phase in order until the pool is full.
    ///
    /// A failing phase is logged and skipped. Returns
    /// [`AppError::NoCandidates`] when nothing survives.
    pub async fn build_pool(&self, ctx: &UserContext) -> AppResult<Vec<Candidate>> {
        let mut pool = Pool::new(self.pool_size);

        'phases: for phase in Phase::ALL {
            let quota = phase.quota(self.pool_size);
            // Shared by every content type the phase fetches
            let mut added = 0;

            for content_type in ctx.content_types() {
                if pool.is_full() {
                    break 'phases;
                }
                if added >= quota {
                    break;
                }

                let fetched = match self.fetch(phase, content_type, ctx).await {
                    Ok(fetched) => fetched,
                    Err(e) => {
                        tracing::warn!(
                            user_id = %ctx.user_id,
                            phase = %phase,
                            content_type = %content_type,
                            provider = self.provider.name(),
                            error = %e,
                            "Candidate phase failed, skipping"
                        );
                        continue;
                    }
                };

                let before = added;
                for candidate in fetched {
                    if added >= quota || pool.is_full() {
                        break;
                    }
                    if ctx.is_excluded(candidate.key()) {
                        continue;
                    }
                    if pool.offer(candidate) {
                        added += 1;
                    }
                }

                tracing::debug!(
                    user_id = %ctx.user_id,
                    phase = %phase,
                    content_type = %content_type,
                    added = added - before,
                    pool_size = pool.items.len(),
                    "Candidate phase complete"
                );
            }
        }

        if pool.items.is_empty() {
            tracing::warn!(user_id = %ctx.user_id, "Candidate pool is empty");
            return Err(AppError::NoCandidates);
        }

        tracing::info!(
            user_id = %ctx.user_id,
            candidates = pool.items.len(),
            "Candidate pool built"
        );

        Ok(pool.items)
    }

    async fn fetch(
        &self,
        phase: Phase,
        content_type: ContentType,
        ctx: &UserContext,
    ) -> AppResult<Vec<Candidate>> {
        match phase {
            Phase::Trending => self.provider.get_trending(content_type).await,
            Phase::GenreDiscovery => {
                let mut query = DiscoverQuery::new(content_type, DiscoverSort::Popularity);
                query.genre_ids = ctx.genre_ids();
                self.provider.discover(&query).await
            }
            Phase::TopRated => self.provider.get_top_rated(content_type).await,
            Phase::NewReleases => {
                let mut query = DiscoverQuery::new(content_type, DiscoverSort::ReleaseDate);
                query.genre_ids = ctx.genre_ids();
                query.min_vote_count = NEW_RELEASE_MIN_VOTES;
                query.released_before =
                    Some(self.clock.now().date_naive().format("%Y-%m-%d").to_string());
                self.provider.discover(&query).await
            }
        }
    }
}
