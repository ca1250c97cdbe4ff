use serde::{Deserialize, Serialize};

/// Current layout of [`LearnedPreferences`]
pub const LEARNED_PREFERENCES_VERSION: u32 = 1;

/// How many single-event insights a profile keeps
pub const MAX_INSIGHTS: usize = 20;

/// Structured preferences derived from feedback rather than explicit settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LearnedPreferences {
    #[serde(default = "current_version")]
    pub version: u32,
    #[serde(default)]
    pub favorite_genres: Vec<String>,
    #[serde(default)]
    pub favorite_actors: Vec<String>,
    #[serde(default)]
    pub favorite_movies: Vec<String>,
    #[serde(default)]
    pub dislikes: Vec<String>,
    #[serde(default)]
    pub mood_preferences: Vec<String>,
    /// Most recent last
    #[serde(default)]
    pub insights: Vec<String>,
}

impl Default for LearnedPreferences {
    fn default() -> Self {
        Self {
            version: LEARNED_PREFERENCES_VERSION,
            favorite_genres: Vec::new(),
            favorite_actors: Vec::new(),
            favorite_movies: Vec::new(),
            dislikes: Vec::new(),
            mood_preferences: Vec::new(),
            insights: Vec::new(),
        }
    }
}

impl LearnedPreferences {
    /// Folds a single-event insight into the profile.
    ///
    /// Array fields are unioned case-insensitively, keeping the first spelling
    /// seen. The insight sentence moves to the end, replacing any earlier
    /// copy, and the list is trimmed to [`MAX_INSIGHTS`].
    pub fn merge(&mut self, insight: LearnedInsight) {
        merge_unique(&mut self.favorite_genres, insight.favorite_genres);
        merge_unique(&mut self.favorite_actors, insight.favorite_actors);
        merge_unique(&mut self.favorite_movies, insight.favorite_movies);
        merge_unique(&mut self.dislikes, insight.dislikes);
        merge_unique(&mut self.mood_preferences, insight.mood_preferences);

        if let Some(text) = insight.insight.as_deref().map(str::trim) {
            if !text.is_empty() {
                self.insights.retain(|t| !t.eq_ignore_ascii_case(text));
                self.insights.push(text.to_string());
            }
            if self.insights.len() > MAX_INSIGHTS {
                let overflow = self.insights.len() - MAX_INSIGHTS;
                self.insights.drain(..overflow);
            }
        }

        self.version = LEARNED_PREFERENCES_VERSION;
    }

    pub fn is_empty(&self) -> bool {
        self.favorite_genres.is_empty()
            && self.favorite_actors.is_empty()
            && self.favorite_movies.is_empty()
            && self.dislikes.is_empty()
            && self.mood_preferences.is_empty()
            && self.insights.is_empty()
    }
}

/// Model output for one rated event
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LearnedInsight {
    #[serde(default)]
    pub insight: Option<String>,
    #[serde(default)]
    pub favorite_genres: Vec<String>,
    #[serde(default)]
    pub favorite_actors: Vec<String>,
    #[serde(default)]
    pub favorite_movies: Vec<String>,
    #[serde(default)]
    pub dislikes: Vec<String>,
    #[serde(default)]
    pub mood_preferences: Vec<String>,
}

/// A user's persisted preference profile
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceProfile {
    /// Free-text summary, replaced wholesale by the batch learner
    pub viewing_preferences_text: Option<String>,
    pub learned_preferences: LearnedPreferences,
}

fn current_version() -> u32 {
    LEARNED_PREFERENCES_VERSION
}

fn merge_unique(target: &mut Vec<String>, additions: Vec<String>) {
    for item in additions {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        if !target.iter().any(|t| t.eq_ignore_ascii_case(item)) {
            target.push(item.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_unions_without_duplicates() {
        let mut prefs = LearnedPreferences {
            favorite_genres: vec!["Sci-Fi".to_string()],
            ..Default::default()
        };

        prefs.merge(LearnedInsight {
            favorite_genres: vec!["sci-fi".to_string(), "Noir".to_string(), " ".to_string()],
            dislikes: vec!["Jump scares".to_string()],
            ..Default::default()
        });

        assert_eq!(prefs.favorite_genres, vec!["Sci-Fi", "Noir"]);
        assert_eq!(prefs.dislikes, vec!["Jump scares"]);
    }

    #[test]
    fn test_merge_caps_insights() {
        let mut prefs = LearnedPreferences::default();
        for i in 0..(MAX_INSIGHTS + 5) {
            prefs.merge(LearnedInsight {
                insight: Some(format!("insight {}", i)),
                ..Default::default()
            });
        }

        assert_eq!(prefs.insights.len(), MAX_INSIGHTS);
        assert_eq!(prefs.insights.first().unwrap(), "insight 5");
        assert_eq!(
            prefs.insights.last().unwrap(),
            &format!("insight {}", MAX_INSIGHTS + 4)
        );
    }

    #[test]
    fn test_repeated_insight_moves_to_the_end() {
        let mut prefs = LearnedPreferences::default();
        for text in ["Likes heists.", "Avoids gore.", "likes heists."] {
            prefs.merge(LearnedInsight {
                insight: Some(text.to_string()),
                ..Default::default()
            });
        }

        assert_eq!(prefs.insights, vec!["Avoids gore.", "likes heists."]);
    }

    #[test]
    fn test_learned_insight_rejects_unknown_fields() {
        let result: Result<LearnedInsight, _> =
            serde_json::from_str(r#"{"insight": "x", "favouriteColour": ["red"]}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_object_decodes_to_current_version() {
        let prefs: LearnedPreferences = serde_json::from_str("{}").unwrap();
        assert_eq!(prefs, LearnedPreferences::default());
    }

    #[test]
    fn test_profile_defaults_to_current_version() {
        let profile = PreferenceProfile::default();
        assert_eq!(profile.learned_preferences.version, LEARNED_PREFERENCES_VERSION);
        assert!(profile.learned_preferences.is_empty());
    }
}
