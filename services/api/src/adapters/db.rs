//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete
//! implementation of the store ports from the `core` crate. It handles all
//! interactions with the PostgreSQL database using `sqlx`.
//!
//! Every mutating statement is individually atomic; no operation spans
//! multiple entities in one transaction. Idempotent inserts use
//! `ON CONFLICT DO NOTHING`, and the FIFO dequeue is a single
//! `DELETE ... RETURNING` over an ordered subselect so an entry is removed
//! exactly once even under concurrent readers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use medquiz_core::domain::{
    BufferedQuestion, CachedQuestion, Difficulty, QuestionPayload, SeenContext, TopicStats,
};
use medquiz_core::ports::{
    BufferStore, ChunkUsageStore, ContentSource, PortError, PortResult, QuestionStore, StatsStore,
};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the store ports.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct CachedQuestionRecord {
    id: i64,
    topic_id: Uuid,
    difficulty: String,
    question_text: String,
    options: Json<Vec<String>>,
    correct_index: i32,
    explanation: String,
    page_reference: Option<i32>,
    created_at: DateTime<Utc>,
}

impl CachedQuestionRecord {
    fn to_domain(self) -> PortResult<CachedQuestion> {
        let difficulty = Difficulty::parse(&self.difficulty).ok_or_else(|| {
            PortError::Unexpected(format!(
                "Unknown difficulty '{}' in cached question {}",
                self.difficulty, self.id
            ))
        })?;
        Ok(CachedQuestion {
            id: self.id,
            topic_id: self.topic_id,
            difficulty,
            payload: QuestionPayload {
                question_text: self.question_text,
                options: self.options.0,
                correct_index: self.correct_index as usize,
                explanation: self.explanation,
                page_reference: self.page_reference,
            },
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct BufferEntryRecord {
    difficulty: String,
    question: Json<QuestionPayload>,
    cache_id: Option<i64>,
    expires_at: DateTime<Utc>,
}

impl BufferEntryRecord {
    fn to_domain(self) -> PortResult<BufferedQuestion> {
        let difficulty = Difficulty::parse(&self.difficulty).ok_or_else(|| {
            PortError::Unexpected(format!(
                "Unknown difficulty '{}' in buffer entry",
                self.difficulty
            ))
        })?;
        Ok(BufferedQuestion {
            payload: self.question.0,
            difficulty,
            cache_id: self.cache_id,
        })
    }
}

#[derive(FromRow)]
struct TopicStatsRecord {
    user_id: Uuid,
    topic_id: Uuid,
    total_answered: i64,
    total_correct: i64,
    total_wrong: i64,
    updated_at: DateTime<Utc>,
}

impl TopicStatsRecord {
    fn to_domain(self) -> TopicStats {
        TopicStats {
            user_id: self.user_id,
            topic_id: self.topic_id,
            total_answered: self.total_answered,
            total_correct: self.total_correct,
            total_wrong: self.total_wrong,
            updated_at: self.updated_at,
        }
    }
}

//=========================================================================================
// `QuestionStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl QuestionStore for DbAdapter {
    async fn get_cached_question(
        &self,
        user_id: Uuid,
        topic_ids: &[Uuid],
        difficulty: Difficulty,
        context: SeenContext,
    ) -> PortResult<Option<CachedQuestion>> {
        // Oldest-first among the not-yet-seen matches. Seen-marking is a
        // separate idempotent insert; a rare overlapping call may serve the
        // same question twice, which is tolerated soft degradation.
        let record = sqlx::query_as::<_, CachedQuestionRecord>(
            r#"
            SELECT q.id, q.topic_id, q.difficulty, q.question_text, q.options,
                   q.correct_index, q.explanation, q.page_reference, q.created_at
            FROM cached_questions q
            WHERE q.topic_id = ANY($1)
              AND q.difficulty = $2
              AND NOT EXISTS (
                  SELECT 1 FROM seen_questions s
                  WHERE s.question_id = q.id
                    AND s.user_id = $3
                    AND s.context = $4
              )
            ORDER BY q.id
            LIMIT 1
            "#,
        )
        .bind(topic_ids)
        .bind(difficulty.as_str())
        .bind(user_id)
        .bind(context.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        record.map(CachedQuestionRecord::to_domain).transpose()
    }

    async fn save_to_cache_and_track(
        &self,
        user_id: Uuid,
        topic_id: Uuid,
        difficulty: Difficulty,
        payload: QuestionPayload,
        context: SeenContext,
    ) -> PortResult<CachedQuestion> {
        let record = sqlx::query_as::<_, CachedQuestionRecord>(
            r#"
            INSERT INTO cached_questions
                (topic_id, difficulty, question_text, options, correct_index,
                 explanation, page_reference)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, topic_id, difficulty, question_text, options,
                      correct_index, explanation, page_reference, created_at
            "#,
        )
        .bind(topic_id)
        .bind(difficulty.as_str())
        .bind(&payload.question_text)
        .bind(Json(&payload.options))
        .bind(payload.correct_index as i32)
        .bind(&payload.explanation)
        .bind(payload.page_reference)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        let question = record.to_domain()?;
        self.mark_question_as_seen(user_id, question.id, context)
            .await?;
        Ok(question)
    }

    async fn mark_question_as_seen(
        &self,
        user_id: Uuid,
        cache_id: i64,
        context: SeenContext,
    ) -> PortResult<()> {
        sqlx::query(
            r#"
            INSERT INTO seen_questions (user_id, question_id, context)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, question_id, context) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(cache_id)
        .bind(context.as_str())
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn get_question_by_id(&self, cache_id: i64) -> PortResult<CachedQuestion> {
        let record = sqlx::query_as::<_, CachedQuestionRecord>(
            r#"
            SELECT id, topic_id, difficulty, question_text, options,
                   correct_index, explanation, page_reference, created_at
            FROM cached_questions
            WHERE id = $1
            "#,
        )
        .bind(cache_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("Cached question {} not found", cache_id)))?;

        record.to_domain()
    }
}

//=========================================================================================
// `ChunkUsageStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl ChunkUsageStore for DbAdapter {
    async fn used_chunk_indices(&self, user_id: Uuid, topic_id: Uuid) -> PortResult<Vec<usize>> {
        let indices = sqlx::query_scalar::<_, i32>(
            "SELECT chunk_index FROM chunk_usage WHERE user_id = $1 AND topic_id = $2",
        )
        .bind(user_id)
        .bind(topic_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(indices.into_iter().map(|i| i as usize).collect())
    }

    async fn mark_chunk_used(
        &self,
        user_id: Uuid,
        topic_id: Uuid,
        index: usize,
    ) -> PortResult<()> {
        sqlx::query(
            r#"
            INSERT INTO chunk_usage (user_id, topic_id, chunk_index)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, topic_id, chunk_index) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(topic_id)
        .bind(index as i32)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }
}

//=========================================================================================
// `BufferStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl BufferStore for DbAdapter {
    async fn buffer_len(&self, user_id: Uuid, topic_id: Uuid) -> PortResult<usize> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM buffer_entries WHERE user_id = $1 AND topic_id = $2",
        )
        .bind(user_id)
        .bind(topic_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(count as usize)
    }

    async fn push_back(
        &self,
        user_id: Uuid,
        topic_id: Uuid,
        question: QuestionPayload,
        difficulty: Difficulty,
        cache_id: Option<i64>,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query(
            r#"
            INSERT INTO buffer_entries
                (user_id, topic_id, difficulty, question, cache_id, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(user_id)
        .bind(topic_id)
        .bind(difficulty.as_str())
        .bind(Json(&question))
        .bind(cache_id)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn pop_front(
        &self,
        user_id: Uuid,
        topic_id: Uuid,
        now: DateTime<Utc>,
    ) -> PortResult<Option<BufferedQuestion>> {
        // FIFO by id (BIGSERIAL, strictly monotonic within a partition).
        // Expired heads are deleted by the same statement and skipped here.
        loop {
            let record = sqlx::query_as::<_, BufferEntryRecord>(
                r#"
                DELETE FROM buffer_entries
                WHERE id = (
                    SELECT id FROM buffer_entries
                    WHERE user_id = $1 AND topic_id = $2
                    ORDER BY id
                    LIMIT 1
                    FOR UPDATE SKIP LOCKED
                )
                RETURNING difficulty, question, cache_id, expires_at
                "#,
            )
            .bind(user_id)
            .bind(topic_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?;

            match record {
                None => return Ok(None),
                Some(record) if record.expires_at <= now => continue,
                Some(record) => return record.to_domain().map(Some),
            }
        }
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> PortResult<u64> {
        let result = sqlx::query("DELETE FROM buffer_entries WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;

        Ok(result.rows_affected())
    }
}

//=========================================================================================
// `StatsStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl StatsStore for DbAdapter {
    async fn record_answer(
        &self,
        user_id: Uuid,
        topic_id: Uuid,
        question_id: Option<i64>,
        is_correct: bool,
        is_review: bool,
    ) -> PortResult<TopicStats> {
        sqlx::query(
            r#"
            INSERT INTO user_answers (user_id, topic_id, question_id, is_correct, is_review)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(user_id)
        .bind(topic_id)
        .bind(question_id)
        .bind(is_correct)
        .bind(is_review)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        let record = sqlx::query_as::<_, TopicStatsRecord>(
            r#"
            INSERT INTO user_topic_stats
                (user_id, topic_id, total_answered, total_correct, total_wrong, updated_at)
            VALUES ($1, $2, 1,
                    CASE WHEN $3 THEN 1 ELSE 0 END,
                    CASE WHEN $3 THEN 0 ELSE 1 END,
                    now())
            ON CONFLICT (user_id, topic_id) DO UPDATE SET
                total_answered = user_topic_stats.total_answered + 1,
                total_correct  = user_topic_stats.total_correct
                                 + CASE WHEN $3 THEN 1 ELSE 0 END,
                total_wrong    = user_topic_stats.total_wrong
                                 + CASE WHEN $3 THEN 0 ELSE 1 END,
                updated_at     = now()
            RETURNING user_id, topic_id, total_answered, total_correct, total_wrong, updated_at
            "#,
        )
        .bind(user_id)
        .bind(topic_id)
        .bind(is_correct)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(record.to_domain())
    }

    async fn add_failed_question(
        &self,
        user_id: Uuid,
        topic_id: Uuid,
        question_id: i64,
    ) -> PortResult<()> {
        sqlx::query(
            r#"
            INSERT INTO failed_questions (user_id, topic_id, question_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, question_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(topic_id)
        .bind(question_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn remove_failed_question(&self, user_id: Uuid, question_id: i64) -> PortResult<()> {
        sqlx::query("DELETE FROM failed_questions WHERE user_id = $1 AND question_id = $2")
            .bind(user_id)
            .bind(question_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn next_failed_question(
        &self,
        user_id: Uuid,
        topic_id: Uuid,
    ) -> PortResult<Option<i64>> {
        let question_id = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT question_id FROM failed_questions
            WHERE user_id = $1 AND topic_id = $2
            ORDER BY failed_at, question_id
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(topic_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(question_id)
    }
}

//=========================================================================================
// `ContentSource` Trait Implementation
//=========================================================================================

#[async_trait]
impl ContentSource for DbAdapter {
    async fn get_documents_by_topics(&self, topic_ids: &[Uuid]) -> PortResult<String> {
        let contents = sqlx::query_scalar::<_, String>(
            "SELECT content FROM documents WHERE topic_id = ANY($1) ORDER BY id",
        )
        .bind(topic_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        let combined = contents.join("\n\n");
        if combined.trim().is_empty() {
            return Err(PortError::ContentUnavailable(format!(
                "No documents found for topics {:?}",
                topic_ids
            )));
        }
        Ok(combined)
    }
}
