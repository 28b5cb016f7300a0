//! services/api/src/study/service.rs
//!
//! The surface the route layer calls: buffer-first question serving with a
//! cold-start batch, answer recording with failed-question bookkeeping, and
//! review mode that re-serves failed questions straight from the cache.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use medquiz_core::domain::{
    QuestionPayload, QuestionSource, ReviewQuestion, SeenContext, ServedQuestion, TopicStats,
};
use medquiz_core::ports::{
    BufferStore, PortError, PortResult, QuestionStore, RandomSource, StatsStore,
};

use crate::study::batch::BatchGenerator;
use crate::study::refill::RefillScheduler;

#[derive(Debug, Clone)]
pub struct StudySettings {
    /// Batch size generated on a cold start (1 served + rest buffered).
    pub initial_batch_size: usize,
    /// How long a buffered entry stays servable.
    pub buffer_ttl: chrono::Duration,
}

pub struct StudyService {
    questions: Arc<dyn QuestionStore>,
    buffer: Arc<dyn BufferStore>,
    stats: Arc<dyn StatsStore>,
    rng: Arc<dyn RandomSource>,
    generator: Arc<BatchGenerator>,
    refill: RefillScheduler,
    settings: StudySettings,
}

impl StudyService {
    pub fn new(
        questions: Arc<dyn QuestionStore>,
        buffer: Arc<dyn BufferStore>,
        stats: Arc<dyn StatsStore>,
        rng: Arc<dyn RandomSource>,
        generator: Arc<BatchGenerator>,
        refill: RefillScheduler,
        settings: StudySettings,
    ) -> Self {
        Self {
            questions,
            buffer,
            stats,
            rng,
            generator,
            refill,
            settings,
        }
    }

    /// Serves the next study question for a (user, topic).
    ///
    /// Buffer hit: the entry is served as-is with no external call, and a
    /// background refill is scheduled if the read left the buffer below
    /// target. Buffer miss: a full batch is generated, the first item is
    /// served and the rest are buffered.
    pub async fn request_study_question(
        &self,
        user_id: Uuid,
        topic_id: Uuid,
    ) -> PortResult<ServedQuestion> {
        if let Some(entry) = self.buffer.pop_front(user_id, topic_id, Utc::now()).await? {
            if let Some(cache_id) = entry.cache_id {
                // Idempotent re-mark; the entry was tracked when buffered.
                self.questions
                    .mark_question_as_seen(user_id, cache_id, SeenContext::Study)
                    .await?;
            }
            let size = self.buffer.buffer_len(user_id, topic_id).await?;
            self.refill.schedule_refill(user_id, topic_id, size);

            return Ok(ServedQuestion {
                question: entry.payload,
                source: QuestionSource::Buffer,
                buffer_size_after: size,
            });
        }

        info!(user = %user_id, topic = %topic_id, "buffer empty, generating initial batch");
        let count = self.settings.initial_batch_size.max(1);
        let mut items = self
            .generator
            .generate_batch(user_id, topic_id, count, SeenContext::Study)
            .await?;
        if items.is_empty() {
            return Err(PortError::Unexpected(
                "Question generation produced no items".to_string(),
            ));
        }

        let first = items.remove(0);
        for item in items {
            self.buffer
                .push_back(
                    user_id,
                    topic_id,
                    item.payload,
                    item.difficulty,
                    item.cache_id,
                    Utc::now() + self.settings.buffer_ttl,
                )
                .await?;
        }
        let size = self.buffer.buffer_len(user_id, topic_id).await?;

        Ok(ServedQuestion {
            question: first.payload,
            source: QuestionSource::Generated,
            buffer_size_after: size,
        })
    }

    /// Records an answer and keeps the failed-question set current: a wrong
    /// study answer files the question for review; a correct review answer
    /// clears it; a wrong review answer leaves it filed.
    pub async fn record_answer(
        &self,
        user_id: Uuid,
        topic_id: Uuid,
        question_id: Option<i64>,
        is_correct: bool,
        is_review: bool,
    ) -> PortResult<TopicStats> {
        let stats = self
            .stats
            .record_answer(user_id, topic_id, question_id, is_correct, is_review)
            .await?;

        if let Some(question_id) = question_id {
            if is_review {
                if is_correct {
                    self.stats
                        .remove_failed_question(user_id, question_id)
                        .await?;
                }
            } else if !is_correct {
                self.stats
                    .add_failed_question(user_id, topic_id, question_id)
                    .await?;
            }
        }

        Ok(stats)
    }

    /// Serves the oldest failed question for review, bypassing the buffer.
    /// Options are re-shuffled so the answer position gives nothing away on
    /// a second viewing.
    pub async fn request_review_question(
        &self,
        user_id: Uuid,
        topic_id: Uuid,
    ) -> PortResult<Option<ReviewQuestion>> {
        let Some(question_id) = self.stats.next_failed_question(user_id, topic_id).await? else {
            return Ok(None);
        };

        let cached = self.questions.get_question_by_id(question_id).await?;
        self.questions
            .mark_question_as_seen(user_id, question_id, SeenContext::Review)
            .await?;

        Ok(Some(ReviewQuestion {
            question_id,
            question: randomize_options(cached.payload, self.rng.as_ref()),
        }))
    }

    /// Purges expired buffer entries across all partitions.
    pub async fn sweep_buffers(&self) -> PortResult<u64> {
        self.buffer.sweep_expired(Utc::now()).await
    }
}

/// Re-shuffles answer options and fixes up the correct index. Used only for
/// review-mode re-presentation; fresh questions keep their generated order.
pub fn randomize_options(
    mut payload: QuestionPayload,
    rng: &dyn RandomSource,
) -> QuestionPayload {
    let n = payload.options.len();
    if n < 2 {
        return payload;
    }

    // Fisher-Yates, tracking where the correct option lands.
    let mut correct = payload.correct_index.min(n - 1);
    for i in (1..n).rev() {
        let j = rng.pick(i + 1);
        payload.options.swap(i, j);
        if correct == i {
            correct = j;
        } else if correct == j {
            correct = i;
        }
    }
    payload.correct_index = correct;
    payload
}
