//! Content data provider abstraction
//!
//! The pipeline only depends on this capability surface. A provider
//! implementation owns its own throttling and caching, so callers can issue
//! requests from several phases at once without coordinating.
use crate::{
    error::AppResult,
    models::{Candidate, ContentDetails, ContentType},
};

pub mod tmdb;

pub use tmdb::TmdbProvider;

/// Sort orders supported by discovery queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscoverSort {
    Popularity,
    ReleaseDate,
    VoteAverage,
}

impl DiscoverSort {
    pub fn as_param(&self, content_type: ContentType) -> &'static str {
        match (self, content_type) {
            (DiscoverSort::Popularity, _) => "popularity.desc",
            (DiscoverSort::ReleaseDate, ContentType::Movie) => "primary_release_date.desc",
            (DiscoverSort::ReleaseDate, ContentType::Tv) => "first_air_date.desc",
            (DiscoverSort::VoteAverage, _) => "vote_average.desc",
        }
    }
}

/// Filtered discovery request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiscoverQuery {
    pub content_type: ContentType,
    pub genre_ids: Vec<i32>,
    pub sort: DiscoverSort,
    /// Ignore titles with fewer votes than this
    pub min_vote_count: u32,
    /// Only titles released on or before this date (YYYY-MM-DD)
    pub released_before: Option<String>,
}

impl DiscoverQuery {
    pub fn new(content_type: ContentType, sort: DiscoverSort) -> Self {
        Self {
            content_type,
            genre_ids: Vec::new(),
            sort,
            min_vote_count: 0,
            released_before: None,
        }
    }

    /// Stable rendering used as the cache key
    pub fn signature(&self) -> String {
        let mut genres = self.genre_ids.clone();
        genres.sort_unstable();
        genres.dedup();
        let genres: Vec<String> = genres.iter().map(|g| g.to_string()).collect();
        format!(
            "sort={}&genres={}&min_votes={}&before={}",
            self.sort.as_param(self.content_type),
            genres.join(","),
            self.min_vote_count,
            self.released_before.as_deref().unwrap_or("")
        )
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ContentProvider: Send + Sync {
    async fn search(&self, query: &str) -> AppResult<Vec<Candidate>>;

    async fn get_details(&self, content_type: ContentType, external_id: i64)
        -> AppResult<ContentDetails>;

    async fn discover(&self, query: &DiscoverQuery) -> AppResult<Vec<Candidate>>;

    /// Titles trending this week
    async fn get_trending(&self, content_type: ContentType) -> AppResult<Vec<Candidate>>;

    async fn get_top_rated(&self, content_type: ContentType) -> AppResult<Vec<Candidate>>;

    async fn get_similar(
        &self,
        content_type: ContentType,
        external_id: i64,
    ) -> AppResult<Vec<Candidate>>;

    /// Provider name for logging and debugging
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_is_order_independent() {
        let mut a = DiscoverQuery::new(ContentType::Movie, DiscoverSort::Popularity);
        a.genre_ids = vec![18, 28, 18];
        let mut b = a.clone();
        b.genre_ids = vec![28, 18];

        assert_eq!(a.signature(), b.signature());
        assert_eq!(
            a.signature(),
            "sort=popularity.desc&genres=18,28&min_votes=0&before="
        );
    }

    #[test]
    fn test_release_sort_depends_on_type() {
        assert_eq!(
            DiscoverSort::ReleaseDate.as_param(ContentType::Movie),
            "primary_release_date.desc"
        );
        assert_eq!(
            DiscoverSort::ReleaseDate.as_param(ContentType::Tv),
            "first_air_date.desc"
        );
    }
}
