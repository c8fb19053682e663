use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};

type SharedResult<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;
type EntryMap<K, V, E> = Mutex<HashMap<K, Entry<V, E>>>;

struct Entry<V, E> {
    /// Distinguishes this entry from a later one stored under the same key.
    generation: u64,
    future: SharedResult<V, E>,
}

/// Concurrent memoizer keyed by `K`.
///
/// Every key maps to one shared future. The first caller for a key creates
/// it; later and concurrent callers await the same future and observe the
/// same result. A failed result is evicted so the next call retries, while
/// every caller that was already waiting still sees the error.
///
/// Inside a tokio runtime each new future is also driven by a spawned task,
/// so it completes (and a failure is evicted) even if every caller stops
/// waiting.
///
/// The map lock is only held to look up or insert an entry, never while a
/// future runs, so distinct keys never wait on each other.
pub struct MemoMap<K, V, E> {
    entries: Arc<EntryMap<K, V, E>>,
    next_generation: AtomicU64,
}

impl<K, V, E> Default for MemoMap<K, V, E> {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }
}

impl<K, V, E> MemoMap<K, V, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Entry<V, E>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wrap `future` so that a failure removes its own entry before any
    /// waiter observes the error.
    async fn evicting<Fut>(
        entries: Weak<EntryMap<K, V, E>>,
        key: K,
        generation: u64,
        future: Fut,
    ) -> Result<V, E>
    where
        Fut: Future<Output = Result<V, E>>,
    {
        let result = future.await;
        if result.is_err() {
            if let Some(entries) = entries.upgrade() {
                let mut entries = entries.lock().unwrap_or_else(PoisonError::into_inner);
                if entries
                    .get(&key)
                    .is_some_and(|entry| entry.generation == generation)
                {
                    entries.remove(&key);
                }
            }
        }
        result
    }

    /// Return the memoized value for `key`, running `init` only if no entry
    /// exists yet.
    pub async fn get_or_try_init<F, Fut>(&self, key: K, init: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let (future, created) = {
            let mut entries = self.lock();
            match entries.get(&key) {
                Some(entry) => (entry.future.clone(), false),
                None => {
                    let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                    let future = Self::evicting(
                        Arc::downgrade(&self.entries),
                        key.clone(),
                        generation,
                        init(),
                    )
                    .boxed()
                    .shared();
                    entries.insert(
                        key,
                        Entry {
                            generation,
                            future: future.clone(),
                        },
                    );
                    (future, true)
                }
            }
        };

        if created {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(future.clone());
            }
        }
        future.await
    }

    /// The completed value for `key`, without waiting or triggering work.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.lock()
            .get(key)
            .and_then(|entry| entry.future.peek().cloned())
            .and_then(Result::ok)
    }

    /// The earliest-created completed value whose key matches `pred`.
    pub fn find_ready(&self, pred: impl Fn(&K) -> bool) -> Option<V> {
        let entries = self.lock();
        entries
            .iter()
            .filter(|(key, _)| pred(key))
            .filter_map(|(_, entry)| {
                let value = entry.future.peek()?.clone().ok()?;
                Some((entry.generation, value))
            })
            .min_by_key(|(generation, _)| *generation)
            .map(|(_, value)| value)
    }

    /// Drop every entry. Futures already handed out keep running.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
