use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, Weak};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::search::rank;
use super::{chunk_text, Embedder, IndexEntry, RankedResult};
use crate::error::{InferError, Result};

/// Payload delivered to corpus subscribers after a document was indexed
#[derive(Debug, Clone)]
pub struct CorpusEvent {
    pub source: String,
    pub category: String,
    /// Fragments indexed by this call
    pub added: usize,
    /// Fragments in the corpus after this call
    pub total: usize,
}

type Listener = Arc<dyn Fn(&CorpusEvent) + Send + Sync>;

#[derive(Default)]
struct ListenerRegistry {
    next_id: u64,
    listeners: Vec<(u64, Listener)>,
}

/// Handle returned by [`CorpusIndex::subscribe`]. Dropping it keeps the
/// listener registered; call [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<ListenerRegistry>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
            registry.listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusStats {
    pub total_fragments: usize,
    /// Distinct categories in first-seen order
    pub categories: Vec<String>,
}

/// Session-scoped, memory-resident index of embedded fragments.
///
/// Append-only apart from [`CorpusIndex::clear`]. Share it between the
/// components that need it with an `Arc`.
pub struct CorpusIndex {
    embedder: Arc<dyn Embedder>,
    chunk_size: usize,
    entries: RwLock<Vec<IndexEntry>>,
    sequence: AtomicU64,
    registry: Arc<Mutex<ListenerRegistry>>,
}

impl CorpusIndex {
    pub fn new(embedder: Arc<dyn Embedder>, chunk_size: usize) -> Self {
        Self {
            embedder,
            chunk_size,
            entries: RwLock::new(Vec::new()),
            sequence: AtomicU64::new(0),
            registry: Arc::new(Mutex::new(ListenerRegistry::default())),
        }
    }

    /// Chunk, embed and append a document. Returns the number of fragments
    /// that made it into the index; 0 means the document contributed nothing.
    ///
    /// Fragments are embedded one after another. A failed fragment is logged
    /// and skipped, the rest are still attempted.
    pub async fn add_document(&self, text: &str, source: &str, category: &str) -> usize {
        let fragments = chunk_text(text, self.chunk_size);
        let total = fragments.len();
        let mut added = 0;

        for (position, fragment) in fragments.into_iter().enumerate() {
            match self.embedder.embed(&fragment).await {
                Ok(embedding) if !embedding.is_empty() => {
                    match self.append(fragment, source, category, embedding) {
                        Ok(()) => added += 1,
                        Err(e) => warn!(source, position, error = %e, "fragment rejected"),
                    }
                }
                Ok(_) => warn!(source, position, "empty embedding, fragment skipped"),
                Err(e) => warn!(source, position, error = %e, "embedding failed, fragment skipped"),
            }
        }

        debug!(source, category, added, total, "document indexed");

        if added > 0 {
            let event = CorpusEvent {
                source: source.to_string(),
                category: category.to_string(),
                added,
                total: self.len(),
            };
            self.notify(&event);
        }

        added
    }

    /// Top `top_k` fragments for `query`, best first.
    ///
    /// An empty corpus or a failed query embedding gives an empty result.
    pub async fn similarity_search(&self, query: &str, top_k: usize) -> Result<Vec<RankedResult>> {
        if self.is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = match self.embedder.embed(query).await {
            Ok(embedding) if !embedding.is_empty() => embedding,
            Ok(_) => {
                warn!("empty query embedding, no retrieval");
                return Ok(Vec::new());
            }
            Err(e) => {
                warn!(error = %e, "query embedding failed, no retrieval");
                return Ok(Vec::new());
            }
        };

        let entries = self.read_entries();
        rank(&query_embedding, &entries, top_k)
    }

    pub fn stats(&self) -> CorpusStats {
        let entries = self.read_entries();
        let mut categories: Vec<String> = Vec::new();
        for entry in entries.iter() {
            if !categories.contains(&entry.category) {
                categories.push(entry.category.clone());
            }
        }

        CorpusStats {
            total_fragments: entries.len(),
            categories,
        }
    }

    /// Register a callback fired after every `add_document` that indexed at
    /// least one fragment. Callbacks run in registration order.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&CorpusEvent) + Send + Sync + 'static,
    {
        let mut registry = self.lock_registry();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.push((id, Arc::new(callback)));

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Drop every entry. Subscribers stay registered.
    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_entries().is_empty()
    }

    /// Snapshot of the corpus in insertion order
    pub fn entries(&self) -> Vec<IndexEntry> {
        self.read_entries().clone()
    }

    /// Embedding dimension fixed by the first stored entry
    pub fn dimension(&self) -> Option<usize> {
        self.read_entries().first().map(|e| e.embedding.len())
    }

    fn append(&self, text: String, source: &str, category: &str, embedding: Vec<f32>) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(first) = entries.first() {
            if first.embedding.len() != embedding.len() {
                return Err(InferError::DimensionMismatch {
                    expected: first.embedding.len(),
                    found: embedding.len(),
                });
            }
        }

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        entries.push(IndexEntry {
            id: generate_entry_id(sequence, source, &text),
            text,
            source: source.to_string(),
            category: category.to_string(),
            embedding,
            created_at: chrono::Utc::now(),
        });

        Ok(())
    }

    fn notify(&self, event: &CorpusEvent) {
        // Snapshot so callbacks may subscribe/unsubscribe without deadlocking
        let listeners: Vec<Listener> = self
            .lock_registry()
            .listeners
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in listeners {
            listener(event);
        }
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, Vec<IndexEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_registry(&self) -> MutexGuard<'_, ListenerRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn generate_entry_id(sequence: u64, source: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sequence.to_le_bytes());
    hasher.update(source.as_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Letter-frequency embedder; fails on the listed call numbers (0-based)
    struct LetterEmbedder {
        calls: AtomicUsize,
        fail_on: Vec<usize>,
    }

    impl LetterEmbedder {
        fn new(fail_on: Vec<usize>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_on,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Embedder for LetterEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on.contains(&n) {
                return Err(InferError::EmbeddingUnavailable("scripted failure".into()));
            }
            let mut v = vec![0.0f32; 26];
            for c in text.to_ascii_lowercase().chars() {
                if c.is_ascii_lowercase() {
                    v[(c as u8 - b'a') as usize] += 1.0;
                }
            }
            Ok(v)
        }
    }

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_partial_failure_accounting() {
        let embedder = LetterEmbedder::new(vec![1]);
        let index = CorpusIndex::new(embedder.clone(), 500);

        let added = index.add_document(&"abc".repeat(400), "doc.txt", "A").await;

        assert_eq!(embedder.calls(), 3);
        assert_eq!(added, 2);
        assert_eq!(index.len(), 2);
        let lens: Vec<usize> = index.entries().iter().map(|e| e.text.len()).collect();
        assert_eq!(lens, vec![500, 200]);
    }

    #[tokio::test]
    async fn test_all_fragments_failing_returns_zero_and_no_event() {
        let index = CorpusIndex::new(LetterEmbedder::new(vec![0, 1]), 10);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        index.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(index.add_document(&"z".repeat(20), "doc", "A").await, 0);
        assert!(index.is_empty());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_corpus_search_is_empty() {
        let embedder = LetterEmbedder::new(vec![]);
        let index = CorpusIndex::new(embedder.clone(), 500);
        assert!(index.similarity_search("anything", 3).await.unwrap().is_empty());
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_query_embedding_is_empty() {
        let index = CorpusIndex::new(LetterEmbedder::new(vec![1]), 500);
        index.add_document("some text", "doc", "A").await;
        assert!(index.similarity_search("query", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_returns_closest_first() {
        let index = CorpusIndex::new(LetterEmbedder::new(vec![]), 500);
        index.add_document("zzzz yyyy", "z.txt", "letters").await;
        index.add_document("aaaa bbbb", "a.txt", "letters").await;
        index.add_document("mmmm nnnn", "m.txt", "letters").await;

        let results = index.similarity_search("ab ab", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].entry.source, "a.txt");
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn test_search_is_deterministic() {
        let index = CorpusIndex::new(LetterEmbedder::new(vec![]), 8);
        index
            .add_document("the cat sat on the mat with another cat", "cats", "A")
            .await;
        let first: Vec<String> = index
            .similarity_search("cat", 3)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.entry.id)
            .collect();
        for _ in 0..3 {
            let again: Vec<String> = index
                .similarity_search("cat", 3)
                .await
                .unwrap()
                .into_iter()
                .map(|r| r.entry.id)
                .collect();
            assert_eq!(first, again);
        }
    }

    #[tokio::test]
    async fn test_stats_dedups_categories_in_first_seen_order() {
        let index = CorpusIndex::new(LetterEmbedder::new(vec![]), 500);
        index.add_document("one", "1", "A").await;
        index.add_document("two", "2", "B").await;
        index.add_document("three", "3", "A").await;

        let stats = index.stats();
        assert_eq!(stats.total_fragments, 3);
        assert_eq!(stats.categories, vec!["A".to_string(), "B".to_string()]);
    }

    #[tokio::test]
    async fn test_duplicate_text_gets_distinct_ids() {
        let index = CorpusIndex::new(LetterEmbedder::new(vec![]), 500);
        index.add_document("same", "doc", "A").await;
        index.add_document("same", "doc", "A").await;
        let entries = index.entries();
        assert_eq!(entries.len(), 2);
        assert_ne!(entries[0].id, entries[1].id);
    }

    #[tokio::test]
    async fn test_mismatched_dimension_is_rejected() {
        let index = CorpusIndex::new(Arc::new(FixedEmbedder(vec![1.0, 0.0])), 500);
        index.add_document("first", "doc", "A").await;

        let index_b = CorpusIndex::new(Arc::new(FixedEmbedder(vec![1.0, 0.0, 0.0])), 500);
        index_b.add_document("x", "doc", "A").await;
        let wrong = index_b.entries().remove(0);
        assert!(index
            .append(wrong.text, "doc", "A", wrong.embedding)
            .is_err());
        assert_eq!(index.len(), 1);
        assert_eq!(index.dimension(), Some(2));
    }

    #[tokio::test]
    async fn test_subscribers_fire_in_registration_order() {
        let index = CorpusIndex::new(LetterEmbedder::new(vec![]), 500);
        let log = Arc::new(Mutex::new(Vec::new()));

        let l1 = Arc::clone(&log);
        index.subscribe(move |e| l1.lock().unwrap().push(format!("first:{}", e.added)));
        let l2 = Arc::clone(&log);
        index.subscribe(move |e| l2.lock().unwrap().push(format!("second:{}", e.total)));

        index.add_document("hello", "doc", "A").await;
        assert_eq!(*log.lock().unwrap(), vec!["first:1", "second:1"]);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_notifications() {
        let index = CorpusIndex::new(LetterEmbedder::new(vec![]), 500);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let sub = index.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        index.add_document("one", "doc", "A").await;
        sub.unsubscribe();
        index.add_document("two", "doc", "A").await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_subscribe_during_notification_does_not_deadlock() {
        let index = Arc::new(CorpusIndex::new(LetterEmbedder::new(vec![]), 500));
        let inner = Arc::clone(&index);
        index.subscribe(move |_| {
            inner.subscribe(|_| {});
        });

        index.add_document("one", "doc", "A").await;
        index.add_document("two", "doc", "A").await;
        assert_eq!(index.lock_registry().listeners.len(), 3);
    }

    #[tokio::test]
    async fn test_unsubscribe_self_during_notification() {
        let index = CorpusIndex::new(LetterEmbedder::new(vec![]), 500);
        let calls = Arc::new(AtomicUsize::new(0));
        let handle: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let (seen, slot) = (Arc::clone(&calls), Arc::clone(&handle));
        let subscription = index.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            if let Some(me) = slot.lock().unwrap().take() {
                me.unsubscribe();
            }
        });
        *handle.lock().unwrap() = Some(subscription);

        index.add_document("one", "doc", "A").await;
        index.add_document("two", "doc", "A").await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(index.lock_registry().listeners.len(), 0);
    }

    #[tokio::test]
    async fn test_clear_empties_corpus() {
        let index = CorpusIndex::new(LetterEmbedder::new(vec![]), 500);
        index.add_document("one", "doc", "A").await;
        index.clear();
        assert!(index.is_empty());
        assert_eq!(index.stats().categories.len(), 0);
        assert_eq!(index.dimension(), None);
    }
}
