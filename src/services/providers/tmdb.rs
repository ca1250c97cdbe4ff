//! TMDB API provider
//!
//! Every request goes through one shared [`RateLimitedClient`], so TMDB's
//! request ceiling holds no matter how many aggregation phases run at once.
//! List and detail responses are fronted by the two-tier cache.
use crate::{
    cached,
    db::{CacheKey, CacheLayer},
    error::{AppError, AppResult},
    models::{Candidate, ContentDetails, ContentType},
    services::providers::{ContentProvider, DiscoverQuery},
    services::rate_limit::RateLimitedClient,
};
use reqwest::Client as HttpClient;
use serde::{de::DeserializeOwned, Deserialize};

const SEARCH_CACHE_TTL: u64 = 3600; // 1 hour
const LIST_CACHE_TTL: u64 = 21_600; // 6 hours
const DETAILS_CACHE_TTL: u64 = 604_800; // 1 week

/// Cast members kept on details
const MAX_CAST: usize = 10;

#[derive(Debug, Deserialize)]
struct TmdbPage {
    #[serde(default)]
    results: Vec<TmdbListItem>,
}

#[derive(Debug, Deserialize)]
struct TmdbListItem {
    id: i64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    genre_ids: Vec<i32>,
    #[serde(default)]
    vote_average: f64,
    #[serde(default)]
    popularity: f64,
    #[serde(default)]
    overview: Option<String>,
}

impl TmdbListItem {
    /// Converts to a candidate; `None` for people and untitled entries
    fn into_candidate(self, fallback_type: ContentType) -> Option<Candidate> {
        let content_type = match self.media_type.as_deref() {
            None => fallback_type,
            Some(kind) => ContentType::parse(kind)?,
        };
        let title = self.title.or(self.name)?;

        Some(Candidate::new(
            self.id,
            content_type,
            title,
            self.genre_ids,
            self.vote_average,
            self.popularity,
            self.overview.as_deref().unwrap_or_default(),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct TmdbGenre {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TmdbCastMember {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct TmdbCredits {
    #[serde(default)]
    cast: Vec<TmdbCastMember>,
}

#[derive(Debug, Deserialize)]
struct TmdbDetails {
    id: i64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    overview: Option<String>,
    #[serde(default)]
    genres: Vec<TmdbGenre>,
    #[serde(default)]
    release_date: Option<String>,
    #[serde(default)]
    first_air_date: Option<String>,
    #[serde(default)]
    runtime: Option<u32>,
    #[serde(default)]
    episode_run_time: Vec<u32>,
    #[serde(default)]
    vote_average: f64,
    #[serde(default)]
    credits: Option<TmdbCredits>,
}

impl TmdbDetails {
    fn into_details(self, content_type: ContentType) -> ContentDetails {
        let release_year = self
            .release_date
            .or(self.first_air_date)
            .and_then(|date| date.get(..4).and_then(|y| y.parse().ok()));

        ContentDetails {
            external_id: self.id,
            content_type,
            title: self.title.or(self.name).unwrap_or_default(),
            overview: self.overview.unwrap_or_default(),
            genres: self.genres.into_iter().map(|g| g.name).collect(),
            release_year,
            runtime_minutes: self.runtime.or(self.episode_run_time.first().copied()),
            vote_average: self.vote_average,
            cast: self
                .credits
                .unwrap_or_default()
                .cast
                .into_iter()
                .take(MAX_CAST)
                .map(|c| c.name)
                .collect(),
        }
    }
}

#[derive(Clone)]
pub struct TmdbProvider {
    http_client: HttpClient,
    api_key: String,
    api_url: String,
    cache: CacheLayer,
    limiter: RateLimitedClient,
}

impl TmdbProvider {
    pub fn new(
        cache: CacheLayer,
        limiter: RateLimitedClient,
        api_key: String,
        api_url: String,
    ) -> Self {
        Self {
            http_client: HttpClient::new(),
            api_key,
            api_url,
            cache,
            limiter,
        }
    }

    /// Issues one rate-limited GET and decodes the body
    async fn fetch<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> AppResult<T> {
        let url = format!("{}{}", self.api_url, path);

        self.limiter
            .schedule(|| async {
                let response = self
                    .http_client
                    .get(&url)
                    .query(&[("api_key", self.api_key.as_str())])
                    .query(params)
                    .send()
                    .await?;

                if !response.status().is_success() {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    return Err(AppError::ExternalApi(format!(
                        "TMDB API returned status {}: {}",
                        status, body
                    )));
                }

                let response_text = response.text().await?;
                serde_json::from_str(&response_text).map_err(|e| {
                    tracing::debug!(response = %response_text, "Raw TMDB response");
                    AppError::ExternalApi(format!("Failed to parse TMDB response: {}", e))
                })
            })
            .await
    }

    async fn fetch_list(
        &self,
        path: &str,
        params: &[(&str, String)],
        content_type: ContentType,
    ) -> AppResult<Vec<Candidate>> {
        let page: TmdbPage = self.fetch(path, params).await?;
        let candidates: Vec<Candidate> = page
            .results
            .into_iter()
            .filter_map(|item| item.into_candidate(content_type))
            .collect();

        tracing::info!(
            path = %path,
            results = candidates.len(),
            provider = "tmdb",
            "List fetched"
        );

        Ok(candidates)
    }
}

#[async_trait::async_trait]
impl ContentProvider for TmdbProvider {
    async fn search(&self, query: &str) -> AppResult<Vec<Candidate>> {
        if query.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "Search query cannot be empty".to_string(),
            ));
        }

        cached!(
            self.cache,
            CacheKey::Search(query.to_string()),
            SEARCH_CACHE_TTL,
            async move {
                self.fetch_list(
                    "/search/multi",
                    &[("query", query.to_string())],
                    ContentType::Movie,
                )
                .await
            }
        )
    }

    async fn get_details(
        &self,
        content_type: ContentType,
        external_id: i64,
    ) -> AppResult<ContentDetails> {
        cached!(
            self.cache,
            CacheKey::Details(content_type, external_id),
            DETAILS_CACHE_TTL,
            async move {
                let path = format!("/{}/{}", content_type, external_id);
                let details: TmdbDetails = self
                    .fetch(&path, &[("append_to_response", "credits".to_string())])
                    .await?;
                Ok::<_, AppError>(details.into_details(content_type))
            }
        )
    }

    async fn discover(&self, query: &DiscoverQuery) -> AppResult<Vec<Candidate>> {
        cached!(
            self.cache,
            CacheKey::Discover(query.content_type, query.signature()),
            LIST_CACHE_TTL,
            async move {
                let mut params = vec![("sort_by", query.sort.as_param(query.content_type).to_string())];
                if !query.genre_ids.is_empty() {
                    let genres: Vec<String> =
                        query.genre_ids.iter().map(|g| g.to_string()).collect();
                    // TMDB treats "|" as OR
                    params.push(("with_genres", genres.join("|")));
                }
                if query.min_vote_count > 0 {
                    params.push(("vote_count.gte", query.min_vote_count.to_string()));
                }
                if let Some(before) = &query.released_before {
                    let key = match query.content_type {
                        ContentType::Movie => "primary_release_date.lte",
                        ContentType::Tv => "first_air_date.lte",
                    };
                    params.push((key, before.clone()));
                }

                let path = format!("/discover/{}", query.content_type);
                self.fetch_list(&path, &params, query.content_type).await
            }
        )
    }

    async fn get_trending(&self, content_type: ContentType) -> AppResult<Vec<Candidate>> {
        cached!(
            self.cache,
            CacheKey::Trending(content_type),
            LIST_CACHE_TTL,
            async move {
                let path = format!("/trending/{}/week", content_type);
                self.fetch_list(&path, &[], content_type).await
            }
        )
    }

    async fn get_top_rated(&self, content_type: ContentType) -> AppResult<Vec<Candidate>> {
        cached!(
            self.cache,
            CacheKey::TopRated(content_type),
            LIST_CACHE_TTL,
            async move {
                let path = format!("/{}/top_rated", content_type);
                self.fetch_list(&path, &[], content_type).await
            }
        )
    }

    async fn get_similar(
        &self,
        content_type: ContentType,
        external_id: i64,
    ) -> AppResult<Vec<Candidate>> {
        cached!(
            self.cache,
            CacheKey::Similar(content_type, external_id),
            LIST_CACHE_TTL,
            async move {
                let path = format!("/{}/{}/similar", content_type, external_id);
                self.fetch_list(&path, &[], content_type).await
            }
        )
    }

    fn name(&self) -> &'static str {
        "tmdb"
    }
}
