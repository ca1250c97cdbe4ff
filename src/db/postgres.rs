use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, types::Json, FromRow, PgPool};
use std::collections::HashSet;
use uuid::Uuid;

use crate::db::PersonalizationStore;
use crate::error::{AppError, AppResult};
use crate::models::{
    ContentKey, ContentLookup, ContentRecord, ContentType, Genre, LearnedInsight, LearnedPreferences,
    PreferenceProfile, RankedRecommendation, Rating, UserContext, WatchedTitle,
};

const RECENT_WATCHED_LIMIT: i64 = 20;
const WATCHLIST_LIMIT: i64 = 20;
const FRIENDS_FAVORITES_LIMIT: i64 = 15;
/// Minimum friend rating that counts as a social signal
const FRIEND_FAVORITE_MIN_RATING: i16 = 4;

/// Creates a PostgreSQL connection pool
///
/// Establishes a pool of database connections for efficient reuse.
/// The pool automatically manages connection lifecycle and limits.
pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    Ok(pool)
}

fn parse_content_type(value: &str) -> AppResult<ContentType> {
    ContentType::parse(value)
        .ok_or_else(|| AppError::Internal(format!("Unknown content type {:?}", value)))
}

#[derive(FromRow)]
struct ContentRow {
    id: Uuid,
    tmdb_id: i64,
    content_type: String,
    title: String,
    release_year: Option<i32>,
    genres: Vec<String>,
}

impl TryFrom<ContentRow> for ContentRecord {
    type Error = AppError;

    fn try_from(row: ContentRow) -> Result<Self, Self::Error> {
        Ok(ContentRecord {
            id: row.id,
            external_id: row.tmdb_id,
            content_type: parse_content_type(&row.content_type)?,
            title: row.title,
            release_year: row.release_year,
            genres: row.genres,
        })
    }
}

#[derive(FromRow)]
struct SettingsRow {
    preferred_genres: Json<Vec<Genre>>,
    preferred_actors: Vec<String>,
    preferred_languages: Vec<String>,
    preferred_content_types: Vec<String>,
    viewing_preferences: Option<String>,
    learned_preferences: Json<LearnedPreferences>,
}

#[derive(FromRow)]
struct WatchedRow {
    tmdb_id: i64,
    content_type: String,
    title: String,
    rating: i16,
    review: Option<String>,
}

#[derive(FromRow)]
struct RecommendationRow {
    user_id: Uuid,
    content_id: Uuid,
    tmdb_id: i64,
    content_type: String,
    title: String,
    score: f64,
    reason: String,
    algorithm: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl TryFrom<RecommendationRow> for RankedRecommendation {
    type Error = AppError;

    fn try_from(row: RecommendationRow) -> Result<Self, Self::Error> {
        Ok(RankedRecommendation {
            user_id: row.user_id,
            content_id: row.content_id,
            external_id: row.tmdb_id,
            content_type: parse_content_type(&row.content_type)?,
            title: row.title,
            score: row.score,
            reason: row.reason,
            algorithm: row.algorithm,
            created_at: row.created_at,
            expires_at: row.expires_at,
        })
    }
}

/// Postgres-backed persistence, see `migrations/` for the schema
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies pending migrations
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn ensure_settings_row(&self, user_id: Uuid) -> AppResult<()> {
        sqlx::query("INSERT INTO user_settings (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PersonalizationStore for PgStore {
    async fn find_content(&self, lookup: &ContentLookup) -> AppResult<Option<ContentRecord>> {
        let row: Option<ContentRow> = match lookup {
            ContentLookup::Id(id) => {
                sqlx::query_as(
                    "SELECT id, tmdb_id, content_type, title, release_year, genres \
                     FROM content WHERE id = $1",
                )
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
            }
            ContentLookup::External {
                external_id,
                content_type,
            } => {
                sqlx::query_as(
                    "SELECT id, tmdb_id, content_type, title, release_year, genres \
                     FROM content WHERE tmdb_id = $1 AND content_type = $2",
                )
                .bind(external_id)
                .bind(content_type.as_str())
                .fetch_optional(&self.pool)
                .await?
            }
        };

        row.map(ContentRecord::try_from).transpose()
    }

    async fn find_content_by_external_ids(
        &self,
        external_ids: &[i64],
    ) -> AppResult<Vec<ContentRecord>> {
        let rows: Vec<ContentRow> = sqlx::query_as(
            "SELECT id, tmdb_id, content_type, title, release_year, genres \
             FROM content WHERE tmdb_id = ANY($1)",
        )
        .bind(external_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ContentRecord::try_from).collect()
    }

    async fn load_user_context(&self, user_id: Uuid) -> AppResult<UserContext> {
        let mut context = UserContext::new(user_id);

        let settings: Option<SettingsRow> = sqlx::query_as(
            "SELECT preferred_genres, preferred_actors, preferred_languages, \
                    preferred_content_types, viewing_preferences, learned_preferences \
             FROM user_settings WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(settings) = settings {
            context.preferred_genres = settings.preferred_genres.0;
            context.preferred_actors = settings.preferred_actors;
            context.preferred_languages = settings.preferred_languages;
            context.preferred_content_types = settings
                .preferred_content_types
                .iter()
                .filter_map(|t| ContentType::parse(t))
                .collect();
            context.viewing_preferences = settings.viewing_preferences;
            context.learned = settings.learned_preferences.0;
        }

        let watched: Vec<WatchedRow> = sqlx::query_as(
            "SELECT c.tmdb_id, c.content_type, c.title, r.rating, r.review \
             FROM ratings r JOIN content c ON c.id = r.content_id \
             WHERE r.user_id = $1 ORDER BY r.updated_at DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(RECENT_WATCHED_LIMIT)
        .fetch_all(&self.pool)
        .await?;
        context.recently_watched = watched
            .into_iter()
            .map(|row| -> AppResult<WatchedTitle> {
                Ok(WatchedTitle {
                    external_id: row.tmdb_id,
                    content_type: parse_content_type(&row.content_type)?,
                    title: row.title,
                    rating: u8::try_from(row.rating).ok(),
                    review: row.review,
                })
            })
            .collect::<AppResult<_>>()?;

        context.watchlist_titles = sqlx::query_scalar(
            "SELECT c.title FROM watchlist w JOIN content c ON c.id = w.content_id \
             WHERE w.user_id = $1 ORDER BY w.added_at DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(WATCHLIST_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        context.friends_favorites = sqlx::query_scalar(
            "SELECT DISTINCT c.title FROM friendships f \
             JOIN ratings r ON r.user_id = f.friend_id \
             JOIN content c ON c.id = r.content_id \
             WHERE f.user_id = $1 AND r.rating >= $2 LIMIT $3",
        )
        .bind(user_id)
        .bind(FRIEND_FAVORITE_MIN_RATING)
        .bind(FRIENDS_FAVORITES_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        context.excluded = self.exclusions(user_id).await?;

        Ok(context)
    }

    async fn active_recommendations(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<RankedRecommendation>> {
        let rows: Vec<RecommendationRow> = sqlx::query_as(
            "SELECT r.user_id, r.content_id, c.tmdb_id, c.content_type, c.title, r.score, r.reason, \
                    r.algorithm, r.created_at, r.expires_at \
             FROM recommendations r JOIN content c ON c.id = r.content_id \
             WHERE r.user_id = $1 AND r.expires_at > $2 \
             ORDER BY r.score DESC",
        )
        .bind(user_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RankedRecommendation::try_from).collect()
    }

    async fn replace_recommendations(
        &self,
        user_id: Uuid,
        rows: &[RankedRecommendation],
    ) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM recommendations WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        for row in rows {
            sqlx::query(
                "INSERT INTO recommendations \
                 (user_id, content_id, score, reason, algorithm, created_at, expires_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(user_id)
            .bind(row.content_id)
            .bind(row.score)
            .bind(&row.reason)
            .bind(&row.algorithm)
            .bind(row.created_at)
            .bind(row.expires_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!(user_id = %user_id, rows = rows.len(), "Replaced recommendations");
        Ok(())
    }

    async fn upsert_rating(
        &self,
        user_id: Uuid,
        content_id: Uuid,
        rating: Rating,
    ) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO ratings (user_id, content_id, rating) VALUES ($1, $2, $3) \
             ON CONFLICT (user_id, content_id) \
             DO UPDATE SET rating = EXCLUDED.rating, updated_at = now()",
        )
        .bind(user_id)
        .bind(content_id)
        .bind(i16::from(rating.value()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn add_to_watchlist(&self, user_id: Uuid, content_id: Uuid) -> AppResult<bool> {
        let result = sqlx::query(
            "INSERT INTO watchlist (user_id, content_id) VALUES ($1, $2) \
             ON CONFLICT (user_id, content_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(content_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_exclusion(&self, user_id: Uuid, key: ContentKey) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO exclusions (user_id, tmdb_id, content_type) VALUES ($1, $2, $3) \
             ON CONFLICT (user_id, tmdb_id, content_type) DO NOTHING",
        )
        .bind(user_id)
        .bind(key.external_id)
        .bind(key.content_type.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn exclusions(&self, user_id: Uuid) -> AppResult<HashSet<ContentKey>> {
        let rows: Vec<(i64, String)> =
            sqlx::query_as("SELECT tmdb_id, content_type FROM exclusions WHERE user_id = $1")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|(tmdb_id, content_type)| -> AppResult<ContentKey> {
                Ok(ContentKey::new(tmdb_id, parse_content_type(&content_type)?))
            })
            .collect()
    }

    async fn load_profile(&self, user_id: Uuid) -> AppResult<PreferenceProfile> {
        let row: Option<(Option<String>, Json<LearnedPreferences>)> = sqlx::query_as(
            "SELECT viewing_preferences, learned_preferences FROM user_settings WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(|(text, learned)| PreferenceProfile {
                viewing_preferences_text: text,
                learned_preferences: learned.0,
            })
            .unwrap_or_default())
    }

    async fn save_viewing_preferences(&self, user_id: Uuid, text: &str) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO user_settings (user_id, viewing_preferences) VALUES ($1, $2) \
             ON CONFLICT (user_id) DO UPDATE SET viewing_preferences = EXCLUDED.viewing_preferences",
        )
        .bind(user_id)
        .bind(text)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn merge_learned_preferences(
        &self,
        user_id: Uuid,
        insight: LearnedInsight,
    ) -> AppResult<()> {
        self.ensure_settings_row(user_id).await?;

        let mut tx = self.pool.begin().await?;
        let Json(mut learned): Json<LearnedPreferences> = sqlx::query_scalar(
            "SELECT learned_preferences FROM user_settings WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        learned.merge(insight);

        sqlx::query("UPDATE user_settings SET learned_preferences = $2 WHERE user_id = $1")
            .bind(user_id)
            .bind(Json(&learned))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
