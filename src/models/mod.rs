use serde::{Deserialize, Serialize};
use std::fmt::Display;
use uuid::Uuid;

pub mod candidate;
pub mod context;
pub mod feedback;
pub mod profile;
pub mod recommendation;

pub use candidate::{truncate_chars, Candidate, ContentDetails, OVERVIEW_SNIPPET_CHARS};
pub use context::{Genre, UserContext, WatchedTitle};
pub use feedback::{FeedbackAction, FeedbackEvent, FeedbackOutcome, Rating};
pub use profile::{LearnedInsight, LearnedPreferences, PreferenceProfile};
pub use recommendation::{RankedRecommendation, RecommendationSet, RANKING_ALGORITHM};

/// Kind of content as the provider distinguishes it
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Movie,
    Tv,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Movie => "movie",
            ContentType::Tv => "tv",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "movie" | "film" => Some(ContentType::Movie),
            "tv" | "series" | "tv_show" | "show" => Some(ContentType::Tv),
            _ => None,
        }
    }
}

impl Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider identity of a title
///
/// Movie and tv ids are separate numbering schemes at the provider, so an
/// id is only unique together with its content type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ContentKey {
    pub external_id: i64,
    pub content_type: ContentType,
}

impl ContentKey {
    pub fn new(external_id: i64, content_type: ContentType) -> Self {
        Self {
            external_id,
            content_type,
        }
    }
}

impl Display for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.content_type, self.external_id)
    }
}

/// Content row as it is cached locally, keyed by our id and the provider's
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentRecord {
    pub id: Uuid,
    pub external_id: i64,
    pub content_type: ContentType,
    pub title: String,
    pub release_year: Option<i32>,
    #[serde(default)]
    pub genres: Vec<String>,
}

impl ContentRecord {
    pub fn key(&self) -> ContentKey {
        ContentKey::new(self.external_id, self.content_type)
    }
}

/// Ways a caller can point at a content record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentLookup {
    Id(Uuid),
    External {
        external_id: i64,
        content_type: ContentType,
    },
}

impl Display for ContentLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentLookup::Id(id) => write!(f, "{}", id),
            ContentLookup::External {
                external_id,
                content_type,
            } => write!(f, "{}", ContentKey::new(*external_id, *content_type)),
        }
    }
}
