//! services/api/src/study/refill.rs
//!
//! The "fire-and-forget" background task that tops a prefetch buffer back up
//! after a read draws it down. The triggering request never awaits the
//! refill, and refill errors never reach a foreground caller.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{error, info};
use uuid::Uuid;

use medquiz_core::domain::SeenContext;
use medquiz_core::ports::{BufferStore, PortResult};

use crate::study::batch::BatchGenerator;

pub struct RefillScheduler {
    generator: Arc<BatchGenerator>,
    buffer: Arc<dyn BufferStore>,
    target_size: usize,
    buffer_ttl: Duration,
}

impl RefillScheduler {
    pub fn new(
        generator: Arc<BatchGenerator>,
        buffer: Arc<dyn BufferStore>,
        target_size: usize,
        buffer_ttl: Duration,
    ) -> Self {
        Self {
            generator,
            buffer,
            target_size,
            buffer_ttl,
        }
    }

    /// Schedules a background top-up when `current_size` is below the target,
    /// and returns immediately. Two near-simultaneous triggers for the same
    /// partition may both run and overshoot the target; the buffer favors
    /// overshoot over under-fill.
    pub fn schedule_refill(&self, user_id: Uuid, topic_id: Uuid, current_size: usize) {
        if current_size >= self.target_size {
            return;
        }
        let missing = self.target_size - current_size;
        let generator = self.generator.clone();
        let buffer = self.buffer.clone();
        let ttl = self.buffer_ttl;

        tokio::spawn(async move {
            if let Err(e) = refill(generator, buffer, user_id, topic_id, missing, ttl).await {
                error!(
                    user = %user_id,
                    topic = %topic_id,
                    error = %e,
                    "background buffer refill failed"
                );
            }
        });
    }
}

async fn refill(
    generator: Arc<BatchGenerator>,
    buffer: Arc<dyn BufferStore>,
    user_id: Uuid,
    topic_id: Uuid,
    missing: usize,
    ttl: Duration,
) -> PortResult<()> {
    info!(user = %user_id, topic = %topic_id, missing, "topping up question buffer");

    let items = generator
        .generate_batch(user_id, topic_id, missing, SeenContext::Study)
        .await?;
    let produced = items.len();

    for item in items {
        buffer
            .push_back(
                user_id,
                topic_id,
                item.payload,
                item.difficulty,
                item.cache_id,
                Utc::now() + ttl,
            )
            .await?;
    }

    info!(user = %user_id, topic = %topic_id, produced, "buffer refill complete");
    Ok(())
}
