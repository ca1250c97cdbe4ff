use crate::{
    clock::Clock,
    db::PersonalizationStore,
    error::{AppError, AppResult, ParseError},
    models::{
        truncate_chars, Candidate, ContentKey, ContentType, RankedRecommendation,
        UserContext, RANKING_ALGORITHM,
    },
    services::llm::TextCompletion,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt::Write;
use std::sync::Arc;

const RANKING_MAX_TOKENS: u32 = 2048;

/// Characters of free-text preferences carried into the prompt
const PREFERENCE_TEXT_CHARS: usize = 1000;

/// Recently watched titles listed in the prompt
const MAX_WATCHED_IN_PROMPT: usize = 15;

/// Returns the first balanced `{...}` span in `text`.
///
/// Braces inside JSON strings are ignored. A `{` that never closes is
/// skipped and the search resumes at the next one.
pub fn extract_json_object(text: &str) -> Result<&str, ParseError> {
    if text.trim().is_empty() {
        return Err(ParseError::EmptyResponse);
    }

    let bytes = text.as_bytes();
    let mut search_from = 0;

    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        for (i, &byte) in bytes.iter().enumerate().skip(start) {
            if in_string {
                match byte {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {}
                }
                continue;
            }

            match byte {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(&text[start..=i]);
                    }
                }
                _ => {}
            }
        }

        search_from = start + 1;
    }

    Err(ParseError::NoJsonObject)
}

/// One validated entry of the model's ranking
#[derive(Debug, Clone, PartialEq)]
pub struct RankedPick {
    pub external_id: i64,
    pub score: f64,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
struct RankingPayload {
    recommendations: Vec<RawPick>,
}

#[derive(Debug, Deserialize)]
struct RawPick {
    id: Value,
    #[serde(alias = "confidence")]
    score: f64,
    reason: String,
}

impl TryFrom<RawPick> for RankedPick {
    type Error = ParseError;

    fn try_from(raw: RawPick) -> Result<Self, Self::Error> {
        let external_id = match &raw.id {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .ok_or_else(|| ParseError::InvalidId(raw.id.to_string()))?;

        if !(0.0..=1.0).contains(&raw.score) {
            return Err(ParseError::ScoreOutOfRange(raw.score));
        }

        let reason = raw.reason.trim();
        if reason.is_empty() {
            return Err(ParseError::Schema(format!(
                "recommendation {} has an empty reason",
                external_id
            )));
        }

        Ok(Self {
            external_id,
            score: raw.score,
            reason: reason.to_string(),
        })
    }
}

/// Decodes a ranking response, keeping the first occurrence of each id
pub fn parse_ranking(text: &str) -> Result<Vec<RankedPick>, ParseError> {
    let json = extract_json_object(text)?;
    let payload: RankingPayload =
        serde_json::from_str(json).map_err(|e| ParseError::Schema(e.to_string()))?;

    let mut seen = HashSet::new();
    let mut picks = Vec::with_capacity(payload.recommendations.len());
    for raw in payload.recommendations {
        let pick = RankedPick::try_from(raw)?;
        if seen.insert(pick.external_id) {
            picks.push(pick);
        }
    }

    Ok(picks)
}

/// Scores a candidate pool for one user with a single model call
#[derive(Clone)]
pub struct RankingEngine {
    llm: Arc<dyn TextCompletion>,
    store: Arc<dyn PersonalizationStore>,
    clock: Arc<dyn Clock>,
    max_recommendations: usize,
    ttl: chrono::Duration,
}

impl RankingEngine {
    pub fn new(
        llm: Arc<dyn TextCompletion>,
        store: Arc<dyn PersonalizationStore>,
        clock: Arc<dyn Clock>,
        max_recommendations: usize,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            llm,
            store,
            clock,
            max_recommendations: max_recommendations.max(1),
            ttl,
        }
    }

    /// Ranks `candidates`, returning rows ready to persist.
    ///
    /// Ids the model invents or that have no local content record are
    /// dropped. Scores are kept exactly as the model returned them.
    pub async fn rank(
        &self,
        ctx: &UserContext,
        candidates: &[Candidate],
    ) -> AppResult<Vec<RankedRecommendation>> {
        if candidates.is_empty() {
            return Err(AppError::NoCandidates);
        }

        let prompt = build_prompt(ctx, candidates, self.max_recommendations);
        let response = self.llm.complete(&prompt, RANKING_MAX_TOKENS).await?;
        tracing::debug!(user_id = %ctx.user_id, response = %response, "Raw ranking response");

        let picks = parse_ranking(&response).map_err(|e| {
            tracing::warn!(user_id = %ctx.user_id, error = %e, "Ranking response rejected");
            e
        })?;

        let pool: HashMap<i64, &Candidate> =
            candidates.iter().map(|c| (c.external_id, c)).collect();
        let picks: Vec<(RankedPick, ContentType)> = picks
            .into_iter()
            .filter_map(|pick| {
                let content_type = pool.get(&pick.external_id)?.content_type;
                Some((pick, content_type))
            })
            .take(self.max_recommendations)
            .collect();

        let ids: Vec<i64> = picks.iter().map(|(p, _)| p.external_id).collect();
        let records: HashMap<ContentKey, _> = self
            .store
            .find_content_by_external_ids(&ids)
            .await?
            .into_iter()
            .map(|r| (r.key(), r))
            .collect();

        let now = self.clock.now();
        let expires_at = now + self.ttl;
        let returned = picks.len();

        let ranked: Vec<RankedRecommendation> = picks
            .into_iter()
            .filter_map(|(pick, content_type)| {
                let key = ContentKey::new(pick.external_id, content_type);
                let Some(record) = records.get(&key) else {
                    tracing::debug!(
                        user_id = %ctx.user_id,
                        external_id = pick.external_id,
                        "Dropping recommendation without a content record"
                    );
                    return None;
                };

                Some(RankedRecommendation {
                    user_id: ctx.user_id,
                    content_id: record.id,
                    external_id: pick.external_id,
                    content_type,
                    title: record.title.clone(),
                    score: pick.score,
                    reason: pick.reason,
                    algorithm: RANKING_ALGORITHM.to_string(),
                    created_at: now,
                    expires_at,
                })
            })
            .collect();

        tracing::info!(
            user_id = %ctx.user_id,
            candidates = candidates.len(),
            returned,
            resolved = ranked.len(),
            model = self.llm.name(),
            "Candidates ranked"
        );

        Ok(ranked)
    }
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none stated".to_string()
    } else {
        items.join(", ")
    }
}

/// Renders the user context and pool into one ranking prompt
pub fn build_prompt(ctx: &UserContext, candidates: &[Candidate], count: usize) -> String {
    let genres: Vec<String> = ctx.preferred_genres.iter().map(|g| g.name.clone()).collect();
    let types: Vec<String> = ctx
        .content_types()
        .iter()
        .map(|t| t.to_string())
        .collect();

    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "You are a film and television recommendation engine. Pick the {} titles from the \
         candidate list that this viewer is most likely to enjoy.\n",
        count
    );

    let _ = writeln!(prompt, "VIEWER PROFILE");
    let _ = writeln!(prompt, "Favorite genres: {}", join_or_none(&genres));
    let _ = writeln!(prompt, "Favorite actors: {}", join_or_none(&ctx.preferred_actors));
    let _ = writeln!(prompt, "Languages: {}", join_or_none(&ctx.preferred_languages));
    let _ = writeln!(prompt, "Content types: {}", types.join(", "));

    if let Some(text) = ctx.viewing_preferences.as_deref().filter(|t| !t.trim().is_empty()) {
        let _ = writeln!(
            prompt,
            "In their own words: {}",
            truncate_chars(text, PREFERENCE_TEXT_CHARS)
        );
    }

    let learned = &ctx.learned;
    if !learned.is_empty() {
        let _ = writeln!(prompt, "Learned from feedback:");
        let _ = writeln!(prompt, "- enjoys genres: {}", join_or_none(&learned.favorite_genres));
        let _ = writeln!(prompt, "- enjoys actors: {}", join_or_none(&learned.favorite_actors));
        let _ = writeln!(prompt, "- loved titles: {}", join_or_none(&learned.favorite_movies));
        let _ = writeln!(prompt, "- dislikes: {}", join_or_none(&learned.dislikes));
        let _ = writeln!(prompt, "- moods: {}", join_or_none(&learned.mood_preferences));
        for insight in &learned.insights {
            let _ = writeln!(prompt, "- {}", insight);
        }
    }

    if !ctx.recently_watched.is_empty() {
        let _ = writeln!(prompt, "Recently watched:");
        for watched in ctx.recently_watched.iter().take(MAX_WATCHED_IN_PROMPT) {
            let rating = watched
                .rating
                .map(|r| format!(" (rated {}/5)", r))
                .unwrap_or_default();
            let review = watched
                .review
                .as_deref()
                .map(|r| format!(": \"{}\"", truncate_chars(r, 120)))
                .unwrap_or_default();
            let _ = writeln!(prompt, "- {}{}{}", watched.title, rating, review);
        }
    }

    if !ctx.watchlist_titles.is_empty() {
        let _ = writeln!(prompt, "On their watchlist: {}", ctx.watchlist_titles.join(", "));
    }
    if !ctx.friends_favorites.is_empty() {
        let _ = writeln!(
            prompt,
            "Friends rated highly: {}",
            ctx.friends_favorites.join(", ")
        );
    }

    let _ = writeln!(prompt, "\nCANDIDATES (id | type | title | rating | overview)");
    for c in candidates {
        let _ = writeln!(
            prompt,
            "{} | {} | {} | {:.1} | {}",
            c.external_id, c.content_type, c.title, c.vote_average, c.overview_snippet
        );
    }

    let _ = write!(
        prompt,
        "\nRespond with ONLY a JSON object in exactly this format:\n\
         {{\"recommendations\": [{{\"id\": <candidate id>, \"score\": <confidence between 0 and 1>, \
         \"reason\": \"<one sentence addressed to the viewer>\"}}]}}\n\
         Use only ids from the candidate list and return at most {} entries, best first.",
        count
    );

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::InMemoryStore;
    use crate::models::{ContentRecord, Genre};
    use crate::services::llm::MockTextCompletion;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    #[test]
    fn test_extract_json_from_prose() {
        let text = "Sure! Here are my picks:\n{\"recommendations\": []}\nEnjoy.";
        assert_eq!(extract_json_object(text).unwrap(), "{\"recommendations\": []}");
    }

    #[test]
    fn test_extract_ignores_braces_in_strings() {
        let text = r#"{"reason": "a } tricky \" {string"} trailing }"#;
        assert_eq!(
            extract_json_object(text).unwrap(),
            r#"{"reason": "a } tricky \" {string"}"#
        );
    }

    #[test]
    fn test_extract_skips_unclosed_brace() {
        let text = r#"Note { unfinished thought. {"a": {"b": 1}}"#;
        // The first "{" never closes, so the nested object is the first balanced span
        assert_eq!(extract_json_object(text).unwrap(), r#"{"a": {"b": 1}}"#);
    }

    #[test]
    fn test_extract_errors() {
        assert_eq!(extract_json_object("  \n"), Err(ParseError::EmptyResponse));
        assert_eq!(
            extract_json_object("I cannot help with that."),
            Err(ParseError::NoJsonObject)
        );
        assert_eq!(extract_json_object("{ never closed"), Err(ParseError::NoJsonObject));
    }

    #[test]
    fn test_parse_ranking_accepts_numeric_string_ids_and_dedups() {
        let text = r#"```json
        {"recommendations": [
            {"id": 27205, "score": 0.91, "reason": "Mind-bending heist."},
            {"id": "603", "confidence": 0.8, "reason": "Classic sci-fi."},
            {"id": 27205, "score": 0.5, "reason": "Duplicate."}
        ]}
        ```"#;

        let picks = parse_ranking(text).unwrap();
        assert_eq!(picks.len(), 2);
        assert_eq!(picks[0].external_id, 27205);
        assert_eq!(picks[0].score, 0.91);
        assert_eq!(picks[1].external_id, 603);
    }

    #[test]
    fn test_parse_ranking_rejects_malformed_entries() {
        let bad_id = r#"{"recommendations": [{"id": "inception", "score": 0.9, "reason": "x"}]}"#;
        assert_eq!(
            parse_ranking(bad_id),
            Err(ParseError::InvalidId("\"inception\"".to_string()))
        );

        let bad_score = r#"{"recommendations": [{"id": 1, "score": 1.3, "reason": "x"}]}"#;
        assert_eq!(parse_ranking(bad_score), Err(ParseError::ScoreOutOfRange(1.3)));

        let missing_reason = r#"{"recommendations": [{"id": 1, "score": 0.3}]}"#;
        assert!(matches!(
            parse_ranking(missing_reason),
            Err(ParseError::Schema(_))
        ));

        let wrong_shape = r#"{"picks": [1, 2, 3]}"#;
        assert!(matches!(parse_ranking(wrong_shape), Err(ParseError::Schema(_))));
    }

    #[test]
    fn test_prompt_bounds_and_lists_candidates() {
        let mut ctx = UserContext::new(Uuid::new_v4());
        ctx.preferred_genres.push(Genre {
            id: 878,
            name: "Science Fiction".to_string(),
        });
        ctx.viewing_preferences = Some("x".repeat(5000));
        let long_overview = "y".repeat(2000);
        let candidates = vec![Candidate::new(
            27205,
            ContentType::Movie,
            "Inception",
            vec![878],
            8.4,
            90.0,
            &long_overview,
        )];

        let prompt = build_prompt(&ctx, &candidates, 10);
        assert!(prompt.contains("Science Fiction"));
        assert!(prompt.contains("27205 | movie | Inception | 8.4 |"));
        assert!(!prompt.contains(&"y".repeat(201)));
        assert!(!prompt.contains(&"x".repeat(1001)));
        assert!(prompt.contains("at most 10 entries"));
    }

    fn record(external_id: i64, title: &str) -> ContentRecord {
        ContentRecord {
            id: Uuid::new_v4(),
            external_id,
            content_type: ContentType::Movie,
            title: title.to_string(),
            release_year: None,
            genres: vec![],
        }
    }

    fn candidates(ids: &[i64]) -> Vec<Candidate> {
        ids.iter()
            .map(|&id| Candidate::new(id, ContentType::Movie, format!("C{}", id), vec![], 7.0, 1.0, ""))
            .collect()
    }

    #[tokio::test]
    async fn test_rank_resolves_records_and_stamps_expiry() {
        let store = Arc::new(InMemoryStore::new());
        let inception = record(27205, "Inception");
        store.insert_content(inception.clone()).await;
        store.insert_content(record(603, "The Matrix")).await;

        let mut llm = MockTextCompletion::new();
        llm.expect_complete().times(1).returning(|_, _| {
            Ok(r#"Here you go {"recommendations": [
                {"id": 27205, "score": 0.42, "reason": "Layered dream heist."},
                {"id": 99999, "score": 0.9, "reason": "Not in the pool."},
                {"id": 550, "score": 0.7, "reason": "In the pool but not stored."}
            ]}"#
            .to_string())
        });
        llm.expect_name().return_const("mock");

        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let engine = RankingEngine::new(
            Arc::new(llm),
            store,
            Arc::new(ManualClock::new(start)),
            10,
            chrono::Duration::hours(24),
        );

        let ctx = UserContext::new(Uuid::new_v4());
        let ranked = engine
            .rank(&ctx, &candidates(&[27205, 603, 550]))
            .await
            .unwrap();

        assert_eq!(ranked.len(), 1);
        let top = &ranked[0];
        assert_eq!(top.content_id, inception.id);
        assert_eq!(top.title, "Inception");
        assert_eq!(top.score, 0.42);
        assert_eq!(top.algorithm, RANKING_ALGORITHM);
        assert_eq!(top.expires_at, start + chrono::Duration::hours(24));
        assert_eq!(top.user_id, ctx.user_id);
    }

    #[tokio::test]
    async fn test_rank_unparseable_response_is_parse_error() {
        let mut llm = MockTextCompletion::new();
        llm.expect_complete()
            .returning(|_, _| Ok("I'd recommend Inception!".to_string()));
        llm.expect_name().return_const("mock");

        let engine = RankingEngine::new(
            Arc::new(llm),
            Arc::new(InMemoryStore::new()),
            Arc::new(ManualClock::default()),
            10,
            chrono::Duration::hours(24),
        );

        let result = engine
            .rank(&UserContext::new(Uuid::new_v4()), &candidates(&[1]))
            .await;
        assert!(matches!(
            result,
            Err(AppError::Parse(ParseError::NoJsonObject))
        ));
    }

    #[tokio::test]
    async fn test_rank_empty_pool_skips_model() {
        let mut llm = MockTextCompletion::new();
        llm.expect_complete().never();

        let engine = RankingEngine::new(
            Arc::new(llm),
            Arc::new(InMemoryStore::new()),
            Arc::new(ManualClock::default()),
            10,
            chrono::Duration::hours(24),
        );

        let result = engine.rank(&UserContext::new(Uuid::new_v4()), &[]).await;
        assert!(matches!(result, Err(AppError::NoCandidates)));
    }
}
