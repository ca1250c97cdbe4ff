pub mod candidates;
pub mod feedback;
pub mod llm;
pub mod preferences;
pub mod providers;
pub mod ranking;
pub mod rate_limit;
pub mod recommendations;
pub mod sessions;

pub use candidates::CandidateAggregator;
pub use feedback::FeedbackIngester;
pub use llm::{AnthropicClient, TextCompletion};
pub use preferences::PreferenceLearner;
pub use providers::{ContentProvider, TmdbProvider};
pub use ranking::RankingEngine;
pub use rate_limit::{RateLimitPolicy, RateLimitedClient};
pub use recommendations::RecommendationStore;
pub use sessions::{FlushedBatch, SessionAggregator};
