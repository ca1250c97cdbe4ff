use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use uuid::Uuid;

use super::{ContentKey, ContentRecord, ContentType};

/// What the user did with a recommended item
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackAction {
    NotRelevant,
    Keep,
    Watchlist,
    Watched,
}

impl FeedbackAction {
    /// Actions after which the item must never be recommended again
    pub fn excludes_content(&self) -> bool {
        matches!(
            self,
            FeedbackAction::NotRelevant | FeedbackAction::Watchlist | FeedbackAction::Watched
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackAction::NotRelevant => "not_relevant",
            FeedbackAction::Keep => "keep",
            FeedbackAction::Watchlist => "watchlist",
            FeedbackAction::Watched => "watched",
        }
    }
}

impl Display for FeedbackAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Star rating, 1 through 5 inclusive
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "u8", into = "u8")]
pub struct Rating(u8);

impl Rating {
    pub fn value(&self) -> u8 {
        self.0
    }

    /// Sentiment phrase used when rendering a rating for the model
    pub fn sentiment(&self) -> &'static str {
        match self.0 {
            1 => "strongly disliked",
            2 => "disliked",
            3 => "felt neutral about",
            4 => "liked",
            _ => "loved",
        }
    }
}

impl TryFrom<u8> for Rating {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (1..=5).contains(&value) {
            Ok(Self(value))
        } else {
            Err(format!("rating must be between 1 and 5, got {}", value))
        }
    }
}

impl From<Rating> for u8 {
    fn from(rating: Rating) -> Self {
        rating.0
    }
}

/// One feedback interaction, held in memory until its session flushes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackEvent {
    pub user_id: Uuid,
    pub content_id: Uuid,
    pub external_id: i64,
    pub content_type: ContentType,
    pub title: String,
    pub action: FeedbackAction,
    pub rating: Option<Rating>,
    pub genres: Vec<String>,
    pub year: Option<i32>,
    pub timestamp: DateTime<Utc>,
}

impl FeedbackEvent {
    pub fn new(
        user_id: Uuid,
        content: &ContentRecord,
        action: FeedbackAction,
        rating: Option<Rating>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            content_id: content.id,
            external_id: content.external_id,
            content_type: content.content_type,
            title: content.title.clone(),
            action,
            rating,
            genres: content.genres.clone(),
            year: content.release_year,
            timestamp,
        }
    }

    pub fn key(&self) -> ContentKey {
        ContentKey::new(self.external_id, self.content_type)
    }
}

/// What the feedback endpoint reports back to the client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackOutcome {
    pub success: bool,
    pub preferences_updated: bool,
    pub learned_insights_updated: bool,
    #[serde(rename = "shouldRemoveFromUI")]
    pub should_remove_from_ui: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excluding_actions() {
        assert!(FeedbackAction::NotRelevant.excludes_content());
        assert!(FeedbackAction::Watchlist.excludes_content());
        assert!(FeedbackAction::Watched.excludes_content());
        assert!(!FeedbackAction::Keep.excludes_content());
    }

    #[test]
    fn test_action_serialization() {
        let json = serde_json::to_string(&FeedbackAction::NotRelevant).unwrap();
        assert_eq!(json, r#""not_relevant""#);
    }

    #[test]
    fn test_rating_bounds() {
        assert!(Rating::try_from(0).is_err());
        assert!(Rating::try_from(6).is_err());
        assert_eq!(Rating::try_from(5).unwrap().value(), 5);
    }

    #[test]
    fn test_rating_rejects_out_of_range_json() {
        let result: Result<Rating, _> = serde_json::from_str("9");
        assert!(result.is_err());
    }

    #[test]
    fn test_rating_sentiment_buckets() {
        let labels: Vec<&str> = (1..=5)
            .map(|v| Rating::try_from(v).unwrap().sentiment())
            .collect();
        assert_eq!(
            labels,
            vec![
                "strongly disliked",
                "disliked",
                "felt neutral about",
                "liked",
                "loved"
            ]
        );
    }

    #[test]
    fn test_outcome_field_names() {
        let outcome = FeedbackOutcome {
            success: true,
            preferences_updated: true,
            learned_insights_updated: false,
            should_remove_from_ui: true,
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["shouldRemoveFromUI"], true);
        assert_eq!(value["learnedInsightsUpdated"], false);
    }
}
