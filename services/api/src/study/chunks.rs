//! services/api/src/study/chunks.rs
//!
//! Splitting topic content into generation-sized excerpts, and rotating
//! which excerpt a user is questioned on next.

use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use medquiz_core::ports::{ChunkUsageStore, PortResult, RandomSource};

/// Splits raw topic content into chunks of roughly `chunk_size` characters,
/// never cutting a word in half. Whitespace runs collapse to single spaces.
pub fn split_into_chunks(text: &str, chunk_size: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if !current.is_empty() && current.len() + 1 + word.len() > chunk_size {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Picks which content chunk to generate the next question from, preferring
/// chunks the user has not been asked about yet. A soft diversity hint: once
/// every chunk is used, selection wraps around and reuse is allowed.
pub struct ChunkRotator {
    usage: Arc<dyn ChunkUsageStore>,
    rng: Arc<dyn RandomSource>,
}

impl ChunkRotator {
    pub fn new(usage: Arc<dyn ChunkUsageStore>, rng: Arc<dyn RandomSource>) -> Self {
        Self { usage, rng }
    }

    /// Returns an index in `[0, chunk_count)`. Never fails on exhaustion.
    pub async fn select_chunk_index(
        &self,
        user_id: Uuid,
        topic_id: Uuid,
        chunk_count: usize,
    ) -> PortResult<usize> {
        if chunk_count <= 1 {
            return Ok(0);
        }

        let used: HashSet<usize> = self
            .usage
            .used_chunk_indices(user_id, topic_id)
            .await?
            .into_iter()
            .collect();

        let unused: Vec<usize> = (0..chunk_count).filter(|i| !used.contains(i)).collect();
        if unused.is_empty() {
            // Everything used: wrap around.
            Ok(self.rng.pick(chunk_count))
        } else {
            Ok(unused[self.rng.pick(unused.len())])
        }
    }

    pub async fn mark_chunk_used(
        &self,
        user_id: Uuid,
        topic_id: Uuid,
        index: usize,
    ) -> PortResult<()> {
        self.usage.mark_chunk_used(user_id, topic_id, index).await
    }
}
