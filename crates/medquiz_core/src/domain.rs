//! crates/medquiz_core/src/domain.rs
//!
//! Defines the pure, core data structures for the study-question engine.
//! These structs are independent of the database schema and of any wire
//! format; serde derives exist because question payloads cross the JSONB
//! buffer column and the HTTP boundary unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Question difficulty. Controls the generation prompt and token budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Simple,
    Media,
    Elaborada,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Simple => "simple",
            Difficulty::Media => "media",
            Difficulty::Elaborada => "elaborada",
        }
    }

    /// Parses the lowercase storage representation back into the enum.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "simple" => Some(Difficulty::Simple),
            "media" => Some(Difficulty::Media),
            "elaborada" => Some(Difficulty::Elaborada),
            _ => None,
        }
    }
}

/// The context a question was served in. Seen-tracking is partitioned by
/// context so a question answered in study mode can still appear in review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeenContext {
    Study,
    Review,
}

impl SeenContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeenContext::Study => "study",
            SeenContext::Review => "review",
        }
    }
}

/// The renderable body of a multiple-choice question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionPayload {
    pub question_text: String,
    pub options: Vec<String>,
    pub correct_index: usize,
    pub explanation: String,
    /// Page of the source infographic the question was drawn from, if known.
    pub page_reference: Option<i32>,
}

/// A question persisted in the shared cache. Immutable after insertion;
/// ids are assigned monotonically by the store.
#[derive(Debug, Clone)]
pub struct CachedQuestion {
    pub id: i64,
    pub topic_id: Uuid,
    pub difficulty: Difficulty,
    pub payload: QuestionPayload,
    pub created_at: DateTime<Utc>,
}

/// A question popped from a user's prefetch buffer, ready to serve.
/// `cache_id` links back to the shared cache when the entry originated
/// there; freshly generated entries were already tracked at insertion time.
#[derive(Debug, Clone)]
pub struct BufferedQuestion {
    pub payload: QuestionPayload,
    pub difficulty: Difficulty,
    pub cache_id: Option<i64>,
}

/// Where a served question came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionSource {
    Buffer,
    Generated,
}

/// The result of a study-question request.
#[derive(Debug, Clone)]
pub struct ServedQuestion {
    pub question: QuestionPayload,
    pub source: QuestionSource,
    pub buffer_size_after: usize,
}

/// A previously failed question re-served in review mode.
#[derive(Debug, Clone)]
pub struct ReviewQuestion {
    pub question_id: i64,
    pub question: QuestionPayload,
}

/// Per-(user, topic) aggregate answer counters.
#[derive(Debug, Clone)]
pub struct TopicStats {
    pub user_id: Uuid,
    pub topic_id: Uuid,
    pub total_answered: i64,
    pub total_correct: i64,
    pub total_wrong: i64,
    pub updated_at: DateTime<Utc>,
}
