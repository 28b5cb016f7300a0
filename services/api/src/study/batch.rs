//! services/api/src/study/batch.rs
//!
//! Produces a batch of ready-to-serve questions for one (user, topic) by
//! mixing shared-cache hits with fresh LLM-backed generation. A single
//! failed item never aborts the rest of the batch.

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use medquiz_core::domain::{Difficulty, QuestionPayload, SeenContext};
use medquiz_core::ports::{
    ContentSource, PortError, PortResult, QuestionGenerationService, QuestionStore, RandomSource,
};

use crate::study::chunks::{split_into_chunks, ChunkRotator};

/// One produced question. `cache_id` is set when the item came from the
/// shared cache; freshly generated items were already tracked at insertion.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub payload: QuestionPayload,
    pub difficulty: Difficulty,
    pub cache_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct GenerationSettings {
    /// Probability of trying the shared cache before generating fresh.
    pub cache_hit_probability: f64,
    /// Size, in characters, of the content chunks fed to generation.
    pub chunk_size: usize,
}

pub struct BatchGenerator {
    questions: Arc<dyn QuestionStore>,
    content: Arc<dyn ContentSource>,
    generator: Arc<dyn QuestionGenerationService>,
    rotator: ChunkRotator,
    rng: Arc<dyn RandomSource>,
    settings: GenerationSettings,
}

impl BatchGenerator {
    pub fn new(
        questions: Arc<dyn QuestionStore>,
        content: Arc<dyn ContentSource>,
        generator: Arc<dyn QuestionGenerationService>,
        rotator: ChunkRotator,
        rng: Arc<dyn RandomSource>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            questions,
            content,
            generator,
            rotator,
            rng,
            settings,
        }
    }

    /// Draws a difficulty for one item: 20% simple, 60% media, 20% elaborada.
    /// Independent draw per item.
    fn draw_difficulty(&self) -> Difficulty {
        match self.rng.pick(10) {
            0 | 1 => Difficulty::Simple,
            2..=7 => Difficulty::Media,
            _ => Difficulty::Elaborada,
        }
    }

    /// Produces up to `count` questions in generation order. Missing topic
    /// content fails the whole batch; a per-item generation failure is
    /// logged and skipped. If nothing at all could be produced, the first
    /// item error propagates.
    pub async fn generate_batch(
        &self,
        user_id: Uuid,
        topic_id: Uuid,
        count: usize,
        context: SeenContext,
    ) -> PortResult<Vec<BatchItem>> {
        // Content is a fatal precondition for the batch, checked up front.
        let text = self.content.get_documents_by_topics(&[topic_id]).await?;
        let chunks = split_into_chunks(&text, self.settings.chunk_size);
        if chunks.is_empty() {
            return Err(PortError::ContentUnavailable(format!(
                "No content chunks for topic {}",
                topic_id
            )));
        }

        let mut items = Vec::with_capacity(count);
        let mut first_error: Option<PortError> = None;

        for item_index in 0..count {
            let difficulty = self.draw_difficulty();

            if self.rng.chance(self.settings.cache_hit_probability) {
                match self
                    .questions
                    .get_cached_question(user_id, &[topic_id], difficulty, context)
                    .await
                {
                    Ok(Some(cached)) => {
                        self.questions
                            .mark_question_as_seen(user_id, cached.id, context)
                            .await?;
                        items.push(BatchItem {
                            payload: cached.payload,
                            difficulty: cached.difficulty,
                            cache_id: Some(cached.id),
                        });
                        continue;
                    }
                    // Store exhausted for this user: fall through to generation.
                    Ok(None) => {}
                    // A failed lookup only costs the shortcut.
                    Err(e) => {
                        warn!(topic = %topic_id, error = %e, "cache lookup failed, generating fresh");
                    }
                }
            }

            match self
                .generate_fresh(user_id, topic_id, difficulty, &chunks, context)
                .await
            {
                Ok(item) => items.push(item),
                Err(e) => {
                    warn!(
                        item = item_index,
                        topic = %topic_id,
                        error = %e,
                        "question generation failed, skipping item"
                    );
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if items.is_empty() {
            if let Some(e) = first_error {
                return Err(e);
            }
        }
        Ok(items)
    }

    async fn generate_fresh(
        &self,
        user_id: Uuid,
        topic_id: Uuid,
        difficulty: Difficulty,
        chunks: &[String],
        context: SeenContext,
    ) -> PortResult<BatchItem> {
        let index = self
            .rotator
            .select_chunk_index(user_id, topic_id, chunks.len())
            .await?;

        let payload = self
            .generator
            .generate_question(&chunks[index], difficulty)
            .await?;

        let cached = self
            .questions
            .save_to_cache_and_track(user_id, topic_id, difficulty, payload, context)
            .await?;
        self.rotator.mark_chunk_used(user_id, topic_id, index).await?;

        Ok(BatchItem {
            payload: cached.payload,
            difficulty,
            cache_id: None,
        })
    }
}
