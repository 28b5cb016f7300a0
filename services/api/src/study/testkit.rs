//! services/api/src/study/testkit.rs
//!
//! In-memory doubles for the store and collaborator ports, plus a scripted
//! random source. The doubles honor the same contracts the Postgres adapter
//! does (FIFO order, partition isolation, expiry, idempotent inserts), and
//! the tests at the bottom pin those contracts down.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use medquiz_core::domain::{
    BufferedQuestion, CachedQuestion, Difficulty, QuestionPayload, SeenContext, TopicStats,
};
use medquiz_core::ports::{
    BufferStore, ChunkUsageStore, ContentSource, PortError, PortResult, QuestionGenerationService,
    QuestionStore, RandomSource, StatsStore,
};

pub fn sample_payload(text: &str) -> QuestionPayload {
    QuestionPayload {
        question_text: text.to_string(),
        options: vec![
            "option a".to_string(),
            "option b".to_string(),
            "option c".to_string(),
            "option d".to_string(),
        ],
        correct_index: 1,
        explanation: format!("explanation for: {text}"),
        page_reference: None,
    }
}

//=========================================================================================
// MemoryStore: one double for every store port
//=========================================================================================

struct StoredBufferEntry {
    id: i64,
    user_id: Uuid,
    topic_id: Uuid,
    question: QuestionPayload,
    difficulty: Difficulty,
    cache_id: Option<i64>,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    next_question_id: i64,
    next_buffer_id: i64,
    questions: Vec<CachedQuestion>,
    seen: HashSet<(Uuid, i64, SeenContext)>,
    chunk_usage: HashSet<(Uuid, Uuid, usize)>,
    buffer: Vec<StoredBufferEntry>,
    failed: Vec<(Uuid, Uuid, i64)>,
    stats: HashMap<(Uuid, Uuid), TopicStats>,
    content: HashMap<Uuid, String>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_content(&self, topic_id: Uuid, text: &str) {
        self.lock().content.insert(topic_id, text.to_string());
    }

    pub fn is_seen(&self, user_id: Uuid, cache_id: i64, context: SeenContext) -> bool {
        self.lock().seen.contains(&(user_id, cache_id, context))
    }

    pub fn seen_record_count(&self, user_id: Uuid, cache_id: i64) -> usize {
        let inner = self.lock();
        inner
            .seen
            .iter()
            .filter(|(u, q, _)| *u == user_id && *q == cache_id)
            .count()
    }

    pub fn cached_question_count(&self) -> usize {
        self.lock().questions.len()
    }

    pub fn failed_questions(&self, user_id: Uuid, topic_id: Uuid) -> Vec<i64> {
        self.lock()
            .failed
            .iter()
            .filter(|(u, t, _)| *u == user_id && *t == topic_id)
            .map(|(_, _, q)| *q)
            .collect()
    }
}

#[async_trait]
impl QuestionStore for MemoryStore {
    async fn get_cached_question(
        &self,
        user_id: Uuid,
        topic_ids: &[Uuid],
        difficulty: Difficulty,
        context: SeenContext,
    ) -> PortResult<Option<CachedQuestion>> {
        let inner = self.lock();
        // Oldest-first among the unseen matches, as the Postgres adapter does.
        Ok(inner
            .questions
            .iter()
            .find(|q| {
                topic_ids.contains(&q.topic_id)
                    && q.difficulty == difficulty
                    && !inner.seen.contains(&(user_id, q.id, context))
            })
            .cloned())
    }

    async fn save_to_cache_and_track(
        &self,
        user_id: Uuid,
        topic_id: Uuid,
        difficulty: Difficulty,
        payload: QuestionPayload,
        context: SeenContext,
    ) -> PortResult<CachedQuestion> {
        let mut inner = self.lock();
        inner.next_question_id += 1;
        let question = CachedQuestion {
            id: inner.next_question_id,
            topic_id,
            difficulty,
            payload,
            created_at: Utc::now(),
        };
        inner.questions.push(question.clone());
        inner.seen.insert((user_id, question.id, context));
        Ok(question)
    }

    async fn mark_question_as_seen(
        &self,
        user_id: Uuid,
        cache_id: i64,
        context: SeenContext,
    ) -> PortResult<()> {
        self.lock().seen.insert((user_id, cache_id, context));
        Ok(())
    }

    async fn get_question_by_id(&self, cache_id: i64) -> PortResult<CachedQuestion> {
        self.lock()
            .questions
            .iter()
            .find(|q| q.id == cache_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Cached question {} not found", cache_id)))
    }
}

#[async_trait]
impl ChunkUsageStore for MemoryStore {
    async fn used_chunk_indices(&self, user_id: Uuid, topic_id: Uuid) -> PortResult<Vec<usize>> {
        Ok(self
            .lock()
            .chunk_usage
            .iter()
            .filter(|(u, t, _)| *u == user_id && *t == topic_id)
            .map(|(_, _, i)| *i)
            .collect())
    }

    async fn mark_chunk_used(
        &self,
        user_id: Uuid,
        topic_id: Uuid,
        index: usize,
    ) -> PortResult<()> {
        self.lock().chunk_usage.insert((user_id, topic_id, index));
        Ok(())
    }
}

#[async_trait]
impl BufferStore for MemoryStore {
    async fn buffer_len(&self, user_id: Uuid, topic_id: Uuid) -> PortResult<usize> {
        Ok(self
            .lock()
            .buffer
            .iter()
            .filter(|e| e.user_id == user_id && e.topic_id == topic_id)
            .count())
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
        let mut inner = self.lock();
        inner.next_buffer_id += 1;
        let id = inner.next_buffer_id;
        inner.buffer.push(StoredBufferEntry {
            id,
            user_id,
            topic_id,
            question,
            difficulty,
            cache_id,
            expires_at,
        });
        Ok(())
    }

    async fn pop_front(
        &self,
        user_id: Uuid,
        topic_id: Uuid,
        now: DateTime<Utc>,
    ) -> PortResult<Option<BufferedQuestion>> {
        let mut inner = self.lock();
        loop {
            let position = inner
                .buffer
                .iter()
                .enumerate()
                .filter(|(_, e)| e.user_id == user_id && e.topic_id == topic_id)
                .min_by_key(|(_, e)| e.id)
                .map(|(i, _)| i);
            let Some(position) = position else {
                return Ok(None);
            };
            let entry = inner.buffer.remove(position);
            if entry.expires_at <= now {
                // Expired head: discard silently and keep looking.
                continue;
            }
            return Ok(Some(BufferedQuestion {
                payload: entry.question,
                difficulty: entry.difficulty,
                cache_id: entry.cache_id,
            }));
        }
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> PortResult<u64> {
        let mut inner = self.lock();
        let before = inner.buffer.len();
        inner.buffer.retain(|e| e.expires_at > now);
        Ok((before - inner.buffer.len()) as u64)
    }
}

#[async_trait]
impl StatsStore for MemoryStore {
    async fn record_answer(
        &self,
        user_id: Uuid,
        topic_id: Uuid,
        _question_id: Option<i64>,
        is_correct: bool,
        _is_review: bool,
    ) -> PortResult<TopicStats> {
        let mut inner = self.lock();
        let stats = inner
            .stats
            .entry((user_id, topic_id))
            .or_insert_with(|| TopicStats {
                user_id,
                topic_id,
                total_answered: 0,
                total_correct: 0,
                total_wrong: 0,
                updated_at: Utc::now(),
            });
        stats.total_answered += 1;
        if is_correct {
            stats.total_correct += 1;
        } else {
            stats.total_wrong += 1;
        }
        stats.updated_at = Utc::now();
        Ok(stats.clone())
    }

    async fn add_failed_question(
        &self,
        user_id: Uuid,
        topic_id: Uuid,
        question_id: i64,
    ) -> PortResult<()> {
        let mut inner = self.lock();
        let exists = inner
            .failed
            .iter()
            .any(|(u, _, q)| *u == user_id && *q == question_id);
        if !exists {
            inner.failed.push((user_id, topic_id, question_id));
        }
        Ok(())
    }

    async fn remove_failed_question(&self, user_id: Uuid, question_id: i64) -> PortResult<()> {
        self.lock()
            .failed
            .retain(|(u, _, q)| !(*u == user_id && *q == question_id));
        Ok(())
    }

    async fn next_failed_question(
        &self,
        user_id: Uuid,
        topic_id: Uuid,
    ) -> PortResult<Option<i64>> {
        Ok(self
            .lock()
            .failed
            .iter()
            .find(|(u, t, _)| *u == user_id && *t == topic_id)
            .map(|(_, _, q)| *q))
    }
}

#[async_trait]
impl ContentSource for MemoryStore {
    async fn get_documents_by_topics(&self, topic_ids: &[Uuid]) -> PortResult<String> {
        let inner = self.lock();
        let combined: Vec<&str> = topic_ids
            .iter()
            .filter_map(|t| inner.content.get(t).map(String::as_str))
            .collect();
        let combined = combined.join("\n\n");
        if combined.trim().is_empty() {
            return Err(PortError::ContentUnavailable(format!(
                "No documents found for topics {:?}",
                topic_ids
            )));
        }
        Ok(combined)
    }
}

//=========================================================================================
// Scripted collaborators
//=========================================================================================

/// Replays scripted draws; once a script is exhausted, `chance` answers
/// false and `pick` answers 0.
pub struct ScriptedRandom {
    chances: Mutex<VecDeque<bool>>,
    picks: Mutex<VecDeque<usize>>,
}

impl ScriptedRandom {
    pub fn new(chances: Vec<bool>, picks: Vec<usize>) -> Self {
        Self {
            chances: Mutex::new(chances.into()),
            picks: Mutex::new(picks.into()),
        }
    }
}

impl RandomSource for ScriptedRandom {
    fn chance(&self, _p: f64) -> bool {
        self.chances
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(false)
    }

    fn pick(&self, n: usize) -> usize {
        let scripted = self
            .picks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(0);
        scripted.min(n.saturating_sub(1))
    }
}

/// Deterministic stand-in for the LLM adapter. Calls can be scripted to fail
/// by 0-based call index.
pub struct FakeGenerator {
    calls: AtomicUsize,
    failures: Mutex<HashSet<usize>>,
}

impl FakeGenerator {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failures: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_on_call(&self, call_index: usize) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(call_index);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuestionGenerationService for FakeGenerator {
    async fn generate_question(
        &self,
        excerpt: &str,
        difficulty: Difficulty,
    ) -> PortResult<QuestionPayload> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let fails = self
            .failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&call);
        if fails {
            return Err(PortError::Malformed(format!(
                "scripted failure on call {call}"
            )));
        }

        let preview: String = excerpt.chars().take(20).collect();
        Ok(QuestionPayload {
            question_text: format!("generated question #{call} ({})", difficulty.as_str()),
            options: vec![
                "option a".to_string(),
                "option b".to_string(),
                "option c".to_string(),
                "option d".to_string(),
            ],
            correct_index: 0,
            explanation: format!("drawn from: {preview}"),
            page_reference: None,
        })
    }
}

//=========================================================================================
// Store contract tests
//=========================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(n: usize) -> QuestionPayload {
        sample_payload(&format!("question {n}"))
    }

    fn far_future() -> DateTime<Utc> {
        Utc::now() + chrono::Duration::hours(1)
    }

    #[tokio::test]
    async fn buffer_is_strictly_fifo() {
        let store = MemoryStore::default();
        let user = Uuid::new_v4();
        let topic = Uuid::new_v4();

        for n in 0..3 {
            store
                .push_back(user, topic, payload(n), Difficulty::Media, None, far_future())
                .await
                .unwrap();
        }

        for n in 0..3 {
            let entry = store.pop_front(user, topic, Utc::now()).await.unwrap();
            assert_eq!(entry.unwrap().payload.question_text, format!("question {n}"));
        }
        assert!(store.pop_front(user, topic, Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn buffer_partitions_are_isolated() {
        let store = MemoryStore::default();
        let user1 = Uuid::new_v4();
        let user2 = Uuid::new_v4();
        let topic_x = Uuid::new_v4();
        let topic_y = Uuid::new_v4();

        store
            .push_back(user1, topic_x, payload(1), Difficulty::Media, None, far_future())
            .await
            .unwrap();

        assert!(store.pop_front(user2, topic_x, Utc::now()).await.unwrap().is_none());
        assert!(store.pop_front(user1, topic_y, Utc::now()).await.unwrap().is_none());
        assert_eq!(store.buffer_len(user2, topic_x).await.unwrap(), 0);
        assert_eq!(store.buffer_len(user1, topic_x).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn expired_entries_are_never_served() {
        let store = MemoryStore::default();
        let user = Uuid::new_v4();
        let topic = Uuid::new_v4();
        let past = Utc::now() - chrono::Duration::minutes(1);

        store
            .push_back(user, topic, payload(1), Difficulty::Media, None, past)
            .await
            .unwrap();
        store
            .push_back(user, topic, payload(2), Difficulty::Media, None, far_future())
            .await
            .unwrap();

        // The expired head is discarded on the read path; the live entry
        // behind it comes out.
        let entry = store.pop_front(user, topic, Utc::now()).await.unwrap().unwrap();
        assert_eq!(entry.payload.question_text, "question 2");
    }

    #[tokio::test]
    async fn sweep_reclaims_expired_entries_and_fixes_len() {
        let store = MemoryStore::default();
        let user = Uuid::new_v4();
        let topic = Uuid::new_v4();
        let past = Utc::now() - chrono::Duration::minutes(1);

        store
            .push_back(user, topic, payload(1), Difficulty::Media, None, past)
            .await
            .unwrap();
        store
            .push_back(user, topic, payload(2), Difficulty::Media, None, far_future())
            .await
            .unwrap();

        // Expired entries still count until swept.
        assert_eq!(store.buffer_len(user, topic).await.unwrap(), 2);
        assert_eq!(store.sweep_expired(Utc::now()).await.unwrap(), 1);
        assert_eq!(store.buffer_len(user, topic).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cached_questions_never_repeat_until_exhausted() {
        let store = MemoryStore::default();
        let user = Uuid::new_v4();
        let topic = Uuid::new_v4();

        for n in 0..3 {
            store
                .save_to_cache_and_track(
                    Uuid::new_v4(),
                    topic,
                    Difficulty::Media,
                    payload(n),
                    SeenContext::Study,
                )
                .await
                .unwrap();
        }

        let mut seen_ids = Vec::new();
        while let Some(q) = store
            .get_cached_question(user, &[topic], Difficulty::Media, SeenContext::Study)
            .await
            .unwrap()
        {
            assert!(!seen_ids.contains(&q.id), "question {} repeated", q.id);
            seen_ids.push(q.id);
            store
                .mark_question_as_seen(user, q.id, SeenContext::Study)
                .await
                .unwrap();
        }
        assert_eq!(seen_ids.len(), 3);
    }

    #[tokio::test]
    async fn seen_contexts_are_partitioned() {
        let store = MemoryStore::default();
        let user = Uuid::new_v4();
        let topic = Uuid::new_v4();

        let q = store
            .save_to_cache_and_track(user, topic, Difficulty::Media, payload(1), SeenContext::Study)
            .await
            .unwrap();

        // Seen in study mode, still available for a review-context draw.
        let review_hit = store
            .get_cached_question(user, &[topic], Difficulty::Media, SeenContext::Review)
            .await
            .unwrap();
        assert_eq!(review_hit.map(|q| q.id), Some(q.id));
    }

    #[tokio::test]
    async fn marking_seen_twice_keeps_one_record() {
        let store = MemoryStore::default();
        let user = Uuid::new_v4();
        let topic = Uuid::new_v4();

        let q = store
            .save_to_cache_and_track(user, topic, Difficulty::Media, payload(1), SeenContext::Study)
            .await
            .unwrap();
        store
            .mark_question_as_seen(user, q.id, SeenContext::Study)
            .await
            .unwrap();
        store
            .mark_question_as_seen(user, q.id, SeenContext::Study)
            .await
            .unwrap();

        assert_eq!(store.seen_record_count(user, q.id), 1);
    }

    #[tokio::test]
    async fn failed_question_inserts_are_idempotent() {
        let store = MemoryStore::default();
        let user = Uuid::new_v4();
        let topic = Uuid::new_v4();

        store.add_failed_question(user, topic, 7).await.unwrap();
        store.add_failed_question(user, topic, 7).await.unwrap();

        assert_eq!(store.failed_questions(user, topic), vec![7]);
    }
}
