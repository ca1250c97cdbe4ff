use serde::{Deserialize, Serialize};

use super::{ContentKey, ContentType};

/// Maximum characters of overview carried by a candidate into the ranking prompt
pub const OVERVIEW_SNIPPET_CHARS: usize = 200;

/// A content item under consideration during one aggregation run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub external_id: i64,
    pub content_type: ContentType,
    pub title: String,
    pub genre_ids: Vec<i32>,
    pub vote_average: f64,
    pub popularity: f64,
    pub overview_snippet: String,
}

impl Candidate {
    /// Builds a candidate, truncating the overview to the snippet budget
    pub fn new(
        external_id: i64,
        content_type: ContentType,
        title: impl Into<String>,
        genre_ids: Vec<i32>,
        vote_average: f64,
        popularity: f64,
        overview: &str,
    ) -> Self {
        Self {
            external_id,
            content_type,
            title: title.into(),
            genre_ids,
            vote_average,
            popularity,
            overview_snippet: truncate_chars(overview, OVERVIEW_SNIPPET_CHARS),
        }
    }

    pub fn key(&self) -> ContentKey {
        ContentKey::new(self.external_id, self.content_type)
    }
}

/// Full details for a single title
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentDetails {
    pub external_id: i64,
    pub content_type: ContentType,
    pub title: String,
    pub overview: String,
    pub genres: Vec<String>,
    pub release_year: Option<i32>,
    pub runtime_minutes: Option<u32>,
    pub vote_average: f64,
    #[serde(default)]
    pub cast: Vec<String>,
}

/// Truncates on a character boundary, marking the cut with an ellipsis
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}…", text[..byte_idx].trim_end()),
        None => text.to_string(),
    }
}
