use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use super::{ContentKey, ContentType, LearnedPreferences};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Genre {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchedTitle {
    pub external_id: i64,
    pub content_type: ContentType,
    pub title: String,
    pub rating: Option<u8>,
    pub review: Option<String>,
}

/// Everything the pipeline knows about a user at ranking time
///
/// Built fresh for every ranking call; never cached.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserContext {
    pub user_id: Uuid,
    pub preferred_genres: Vec<Genre>,
    pub preferred_actors: Vec<String>,
    pub preferred_languages: Vec<String>,
    pub preferred_content_types: Vec<ContentType>,
    pub recently_watched: Vec<WatchedTitle>,
    pub watchlist_titles: Vec<String>,
    /// Titles the user's friends rated highly
    pub friends_favorites: Vec<String>,
    pub viewing_preferences: Option<String>,
    pub learned: LearnedPreferences,
    /// Titles never to surface again
    pub excluded: HashSet<ContentKey>,
}

impl UserContext {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }

    pub fn genre_ids(&self) -> Vec<i32> {
        self.preferred_genres.iter().map(|g| g.id).collect()
    }

    /// Content types to pull candidates for, movies when nothing is stated
    pub fn content_types(&self) -> Vec<ContentType> {
        if self.preferred_content_types.is_empty() {
            vec![ContentType::Movie]
        } else {
            self.preferred_content_types.clone()
        }
    }

    /// Whether a title must be kept out of the pool
    pub fn is_excluded(&self, key: ContentKey) -> bool {
        self.excluded.contains(&key)
            || self
                .recently_watched
                .iter()
                .any(|w| w.external_id == key.external_id && w.content_type == key.content_type)
    }
}
