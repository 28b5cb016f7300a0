//! crates/medquiz_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the engine's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the
//! core to be independent of specific external implementations like databases
//! or LLM APIs, and letting tests substitute in-memory doubles.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    BufferedQuestion, CachedQuestion, Difficulty, QuestionPayload, SeenContext, TopicStats,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (database,
/// LLM API) while preserving the distinctions the engine acts on.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),

    /// No source content exists for a topic. Fatal for an entire batch.
    #[error("No source content available: {0}")]
    ContentUnavailable(String),

    /// The generation backend is rate-limited or overloaded. The caller may
    /// retry after the suggested wait.
    #[error("Generation backend overloaded, retry after {retry_after_ms} ms")]
    RateLimited { retry_after_ms: u64 },

    /// The generation response failed structural parsing. Within a batch this
    /// only costs the single item.
    #[error("Generation response failed to parse: {0}")]
    Malformed(String),

    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

impl PortError {
    /// Whether the same request may be retried after a short wait.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PortError::RateLimited { .. })
    }

    /// Suggested wait before retrying, for transient errors.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            PortError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Store Ports (Traits)
//=========================================================================================

/// The shared question cache with per-user seen-tracking.
#[async_trait]
pub trait QuestionStore: Send + Sync {
    /// Selects one cached question matching topic and difficulty that the
    /// user has not been served in `context`. Returns `None` when the store
    /// is exhausted for this user; the caller must then generate fresh.
    async fn get_cached_question(
        &self,
        user_id: Uuid,
        topic_ids: &[Uuid],
        difficulty: Difficulty,
        context: SeenContext,
    ) -> PortResult<Option<CachedQuestion>>;

    /// Inserts a new immutable cached question and records it as seen by
    /// `user_id` in `context`, so later lookups never hand it back to them.
    async fn save_to_cache_and_track(
        &self,
        user_id: Uuid,
        topic_id: Uuid,
        difficulty: Difficulty,
        payload: QuestionPayload,
        context: SeenContext,
    ) -> PortResult<CachedQuestion>;

    /// Idempotent: marking an already-seen question again must not error or
    /// duplicate the record.
    async fn mark_question_as_seen(
        &self,
        user_id: Uuid,
        cache_id: i64,
        context: SeenContext,
    ) -> PortResult<()>;

    /// Fetches a cached question by id. Used by review mode, which bypasses
    /// the buffer entirely.
    async fn get_question_by_id(&self, cache_id: i64) -> PortResult<CachedQuestion>;
}

/// Tracks which content chunks have been used as generation input per
/// (user, topic). A soft diversity hint, not a hard exclusion.
#[async_trait]
pub trait ChunkUsageStore: Send + Sync {
    async fn used_chunk_indices(&self, user_id: Uuid, topic_id: Uuid) -> PortResult<Vec<usize>>;

    /// Idempotent insert.
    async fn mark_chunk_used(&self, user_id: Uuid, topic_id: Uuid, index: usize)
        -> PortResult<()>;
}

/// The per-(user, topic) FIFO prefetch buffer. The partition key is the
/// (user, topic) pair; entries are never visible across partitions.
#[async_trait]
pub trait BufferStore: Send + Sync {
    /// Counts all entries in the partition. Expired entries count until they
    /// are discarded by a read or a sweep.
    async fn buffer_len(&self, user_id: Uuid, topic_id: Uuid) -> PortResult<usize>;

    /// Appends to the tail of the partition with the given expiry.
    async fn push_back(
        &self,
        user_id: Uuid,
        topic_id: Uuid,
        question: QuestionPayload,
        difficulty: Difficulty,
        cache_id: Option<i64>,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    /// Pops the oldest entry. Strict FIFO; entries expired as of `now` are
    /// discarded silently and never returned. `None` once the partition is
    /// empty after discards. An entry is removed exactly once even under
    /// concurrent readers.
    async fn pop_front(
        &self,
        user_id: Uuid,
        topic_id: Uuid,
        now: DateTime<Utc>,
    ) -> PortResult<Option<BufferedQuestion>>;

    /// Purges every entry expired as of `now`, across all partitions.
    /// Returns the number of entries removed.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> PortResult<u64>;
}

/// Downstream answer bookkeeping: the answer log, aggregate counters, and
/// the failed-question set that feeds review mode.
#[async_trait]
pub trait StatsStore: Send + Sync {
    /// Appends an answer record and updates the per-(user, topic) counters,
    /// returning the updated counters.
    async fn record_answer(
        &self,
        user_id: Uuid,
        topic_id: Uuid,
        question_id: Option<i64>,
        is_correct: bool,
        is_review: bool,
    ) -> PortResult<TopicStats>;

    /// Idempotent: files a question for later review.
    async fn add_failed_question(
        &self,
        user_id: Uuid,
        topic_id: Uuid,
        question_id: i64,
    ) -> PortResult<()>;

    async fn remove_failed_question(&self, user_id: Uuid, question_id: i64) -> PortResult<()>;

    /// The oldest still-failed question for this (user, topic), if any.
    async fn next_failed_question(
        &self,
        user_id: Uuid,
        topic_id: Uuid,
    ) -> PortResult<Option<i64>>;
}

//=========================================================================================
// Collaborator Ports (Traits)
//=========================================================================================

/// Source of the raw study material questions are generated from.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Returns the combined raw text for the given topics. Missing or empty
    /// content is `ContentUnavailable`, which is fatal for a whole batch.
    async fn get_documents_by_topics(&self, topic_ids: &[Uuid]) -> PortResult<String>;
}

/// The external LLM-backed question generator. The adapter owns prompt
/// construction, token budgets, response parsing, and retry/backoff.
#[async_trait]
pub trait QuestionGenerationService: Send + Sync {
    async fn generate_question(
        &self,
        excerpt: &str,
        difficulty: Difficulty,
    ) -> PortResult<QuestionPayload>;
}

/// Seedable randomness. The engine never calls a global RNG directly, so
/// difficulty draws and the cache-vs-generate branch are deterministic in
/// tests.
pub trait RandomSource: Send + Sync {
    /// Returns true with probability `p` (clamped to `[0, 1]`).
    fn chance(&self, p: f64) -> bool;

    /// Uniform index in `[0, n)`. `n` must be non-zero.
    fn pick(&self, n: usize) -> usize;
}
