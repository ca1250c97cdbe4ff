use crate::{
    db::PersonalizationStore,
    error::{AppError, AppResult, ParseError},
    models::{FeedbackAction, FeedbackEvent, LearnedInsight},
    services::{llm::TextCompletion, ranking::extract_json_object, sessions::FlushedBatch},
};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

const BATCH_MAX_TOKENS: u32 = 600;
const INSIGHT_MAX_TOKENS: u32 = 400;

/// Rewrites a user's preference profile from their feedback
#[derive(Clone)]
pub struct PreferenceLearner {
    llm: Arc<dyn TextCompletion>,
    store: Arc<dyn PersonalizationStore>,
}

impl PreferenceLearner {
    pub fn new(llm: Arc<dyn TextCompletion>, store: Arc<dyn PersonalizationStore>) -> Self {
        Self { llm, store }
    }

    /// Folds a flushed session into the free-text preference description.
    ///
    /// The model integrates the new signal with the current text and the
    /// result replaces the stored field wholesale.
    pub async fn update_from_batch(&self, user_id: Uuid, events: &[FeedbackEvent]) -> AppResult<()> {
        if events.is_empty() {
            return Ok(());
        }

        let profile = self.store.load_profile(user_id).await?;
        let prompt = batch_prompt(profile.viewing_preferences_text.as_deref(), events);

        let response = self.llm.complete(&prompt, BATCH_MAX_TOKENS).await?;
        let updated = response.trim();
        if updated.is_empty() {
            return Err(AppError::Completion(
                "model returned an empty preference description".to_string(),
            ));
        }

        self.store.save_viewing_preferences(user_id, updated).await?;

        tracing::info!(
            user_id = %user_id,
            events = events.len(),
            chars = updated.len(),
            "Viewing preferences rewritten"
        );

        Ok(())
    }

    /// Immediate single-event update of the structured learned preferences
    pub async fn record_insight(&self, event: &FeedbackEvent) -> AppResult<LearnedInsight> {
        let prompt = insight_prompt(event);
        let response = self.llm.complete(&prompt, INSIGHT_MAX_TOKENS).await?;
        tracing::debug!(user_id = %event.user_id, response = %response, "Raw insight response");

        let json = extract_json_object(&response)?;
        let insight: LearnedInsight =
            serde_json::from_str(json).map_err(|e| ParseError::Schema(e.to_string()))?;

        self.store
            .merge_learned_preferences(event.user_id, insight.clone())
            .await?;

        tracing::info!(user_id = %event.user_id, title = %event.title, "Learned insight merged");
        Ok(insight)
    }

    /// Consumes flushed sessions until every sender is gone.
    ///
    /// Failures are logged; a flushed batch is never retried.
    pub async fn run(self, mut batches: mpsc::Receiver<FlushedBatch>) {
        while let Some(batch) = batches.recv().await {
            if let Err(e) = self.update_from_batch(batch.user_id, &batch.events).await {
                tracing::error!(
                    user_id = %batch.user_id,
                    events = batch.events.len(),
                    error = %e,
                    "Batch preference update failed"
                );
            }
        }

        tracing::info!("Preference learner stopped");
    }
}

/// One human-readable line describing a feedback event
pub fn render_event(event: &FeedbackEvent) -> String {
    let title = match event.year {
        Some(year) => format!("\"{}\" ({})", event.title, year),
        None => format!("\"{}\"", event.title),
    };

    let mut line = match (event.action, event.rating) {
        (FeedbackAction::Watched, Some(rating)) => format!(
            "Watched {} and {} it ({}/5)",
            title,
            rating.sentiment(),
            rating.value()
        ),
        (FeedbackAction::Watched, None) => format!("Watched {}", title),
        (FeedbackAction::Watchlist, _) => format!("Added {} to their watchlist", title),
        (FeedbackAction::NotRelevant, _) => format!("Marked {} as not relevant to them", title),
        (FeedbackAction::Keep, _) => format!("Kept {} in their recommendations", title),
    };

    if let (Some(rating), false) = (event.rating, event.action == FeedbackAction::Watched) {
        line.push_str(&format!(
            " and {} it ({}/5)",
            rating.sentiment(),
            rating.value()
        ));
    }

    if !event.genres.is_empty() {
        line.push_str(&format!(" [{}]", event.genres.join(", ")));
    }

    line
}

fn batch_prompt(current: Option<&str>, events: &[FeedbackEvent]) -> String {
    let current = current
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or("No preferences recorded yet.");
    let activity: Vec<String> = events.iter().map(|e| format!("- {}", render_event(e))).collect();

    format!(
        "You maintain a short description of a viewer's film and television taste.\n\n\
         CURRENT DESCRIPTION:\n{}\n\n\
         RECENT ACTIVITY:\n{}\n\n\
         Rewrite the description so it integrates what the recent activity reveals. \
         Do not simply append to it: merge, refine and drop anything the new signal contradicts. \
         Keep it under 120 words, written in the third person. \
         Respond with only the updated description.",
        current,
        activity.join("\n")
    )
}

fn insight_prompt(event: &FeedbackEvent) -> String {
    format!(
        "A viewer just gave this feedback:\n- {}\n\n\
         Respond with ONLY a JSON object in this format, leaving arrays empty when the \
         feedback says nothing about them:\n\
         {{\"insight\": \"<one sentence about their taste>\", \"favoriteGenres\": [], \
         \"favoriteActors\": [], \"favoriteMovies\": [], \"dislikes\": [], \"moodPreferences\": []}}",
        render_event(event)
    )
}
