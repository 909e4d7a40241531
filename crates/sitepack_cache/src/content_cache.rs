use std::{
    fmt::Debug,
    future::Future,
    hash::Hash,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use dashmap::DashMap;
use futures::{future::BoxFuture, FutureExt};
use moka::notification::RemovalCause;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::ContentCacheError;

/// The default capacity of a [`ContentCache`], in bytes.
pub const DEFAULT_CAPACITY: u64 = 1_000_000_000;

type LoaderError = Arc<dyn std::error::Error + Send + Sync + 'static>;
type LoadFn<K> = Box<dyn Fn(K) -> BoxFuture<'static, Result<Loaded, LoaderError>> + Send + Sync>;

/// The result of a successful load: the content and what it costs to keep it
/// resident.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loaded {
    /// The loaded content.
    pub blob: Bytes,
    /// The cost of the content, counted against the capacity of the cache.
    ///
    /// Content costing more than the capacity, or more than `u32::MAX`, is
    /// returned to the caller but never kept resident.
    pub cost: u64,
}

impl From<Bytes> for Loaded {
    fn from(blob: Bytes) -> Self {
        let cost = blob.len() as u64;
        Self { blob, cost }
    }
}

impl From<Vec<u8>> for Loaded {
    fn from(data: Vec<u8>) -> Self {
        Bytes::from(data).into()
    }
}

/// Emitted by the store whenever an entry stops being resident.
#[derive(Debug, Clone)]
pub struct EvictionEvent<K> {
    /// The key of the removed entry.
    pub key: K,
    /// Why the entry was removed.
    pub cause: RemovalCause,
}

#[derive(Clone)]
struct Cell {
    blob: Bytes,
    cost: u64,
}

/// The largest cost the store can weigh without clamping.
const MAX_ENTRY_COST: u64 = u32::MAX as u64;

type Outcome = Result<Bytes, ContentCacheError>;

/// Serializes the loads of a single key.
#[derive(Default)]
struct KeySlot {
    /// Incremented every time a load for this key finishes.
    completed: AtomicU64,
    /// Guards the loader. Holds the outcome of the most recent load.
    last_outcome: tokio::sync::Mutex<Option<Outcome>>,
}

/// A concurrent cache of content blobs bounded by total cost.
///
/// If a key is not resident, the loader passed to [`ContentCache::new`] is
/// called to produce it. Concurrent calls to [`ContentCache::get`] for the same
/// key are coalesced: only one load is ever in flight per key and every waiting
/// caller observes its outcome. Failed loads are never cached.
///
/// Cloning a `ContentCache` is cheap; all clones share the same entries.
pub struct ContentCache<K> {
    inner: Arc<ContentCacheInner<K>>,
}

impl<K> Clone for ContentCache<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct ContentCacheInner<K> {
    capacity: u64,
    store: moka::future::Cache<K, Cell>,
    locks: DashMap<K, Arc<KeySlot>>,
    evictions: Mutex<mpsc::UnboundedReceiver<EvictionEvent<K>>>,
    load: LoadFn<K>,
}

impl<K> ContentCache<K>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
{
    /// Constructs a new cache that keeps at most `capacity` cost units
    /// resident and calls `load` for keys that are not.
    pub fn new<F, Fut, E>(capacity: u64, load: F) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Loaded, E>> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = moka::future::Cache::builder()
            .max_capacity(capacity)
            .weigher(|_key: &K, cell: &Cell| u32::try_from(cell.cost).unwrap_or(u32::MAX))
            .eviction_listener(move |key: Arc<K>, _cell: Cell, cause| {
                if cause == RemovalCause::Replaced {
                    return;
                }
                // The receiver lives as long as the cache itself.
                let _ = tx.send(EvictionEvent {
                    key: K::clone(&key),
                    cause,
                });
            })
            .build();

        let load: LoadFn<K> = Box::new(move |key| {
            let fut = load(key);
            async move { fut.await.map_err(|err| Arc::new(err) as LoaderError) }.boxed()
        });

        Self {
            inner: Arc::new(ContentCacheInner {
                capacity,
                store,
                locks: DashMap::default(),
                evictions: Mutex::new(rx),
                load,
            }),
        }
    }

    /// Returns the content for `key`, loading it if it is not resident.
    ///
    /// If another task is already loading the same key this call waits for
    /// that load instead of starting a second one.
    pub async fn get(&self, key: K) -> Result<Bytes, ContentCacheError> {
        self.reclaim_evicted_locks();

        if let Some(cell) = self.inner.store.get(&key).await {
            tracing::trace!("content cache hit for {key:?}");
            return Ok(cell.blob);
        }

        let slot = self.inner.locks.entry(key.clone()).or_default().clone();
        let result = self.get_or_load(&key, &slot).await;
        drop(slot);

        // Release the lock of keys that did not end up resident. Keys that did
        // are released when the store reports their eviction.
        if result.is_err() || !self.inner.store.contains_key(&key) {
            self.release_lock(&key);
        }
        self.reclaim_evicted_locks();

        result
    }

    async fn get_or_load(&self, key: &K, slot: &KeySlot) -> Result<Bytes, ContentCacheError> {
        let observed = slot.completed.load(Ordering::Acquire);
        let mut last_outcome = slot.last_outcome.lock().await;

        // A load finished while we were waiting. Its outcome is ours, whether
        // or not the store kept the content.
        if slot.completed.load(Ordering::Acquire) != observed {
            if let Some(outcome) = last_outcome.as_ref() {
                return outcome.clone();
            }
        }
        if let Some(cell) = self.inner.store.get(key).await {
            return Ok(cell.blob);
        }

        tracing::debug!("loading content for {key:?}");
        let outcome = (self.inner.load)(key.clone()).await;
        slot.completed.fetch_add(1, Ordering::Release);

        match outcome {
            Ok(loaded) => {
                let blob = loaded.blob.clone();
                *last_outcome = Some(Ok(blob.clone()));
                if loaded.cost > self.inner.capacity || loaded.cost > MAX_ENTRY_COST {
                    tracing::debug!(
                        "not keeping {key:?} resident, its cost of {} is too large",
                        loaded.cost
                    );
                    return Ok(blob);
                }
                self.inner
                    .store
                    .insert(
                        key.clone(),
                        Cell {
                            blob: loaded.blob,
                            cost: loaded.cost,
                        },
                    )
                    .await;
                // Apply evictions now so the capacity holds when we return.
                self.inner.store.run_pending_tasks().await;
                Ok(blob)
            }
            Err(source) => {
                let err = ContentCacheError::LoadFailure {
                    key: format!("{key:?}"),
                    source,
                };
                *last_outcome = Some(Err(err.clone()));
                Err(err)
            }
        }
    }

    /// Returns true if `key` is currently resident.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.store.contains_key(key)
    }

    /// The capacity of the cache in cost units.
    pub fn capacity(&self) -> u64 {
        self.inner.capacity
    }

    /// The total cost of all resident entries.
    pub async fn resident_cost(&self) -> u64 {
        self.inner.store.run_pending_tasks().await;
        self.inner.store.weighted_size()
    }

    /// The number of resident entries.
    pub async fn entry_count(&self) -> u64 {
        self.inner.store.run_pending_tasks().await;
        self.inner.store.entry_count()
    }

    /// Drops per-key locks of entries the store has removed.
    ///
    /// Skipped when another task is already draining the events.
    fn reclaim_evicted_locks(&self) {
        let Some(mut evictions) = self.inner.evictions.try_lock() else {
            return;
        };
        while let Ok(event) = evictions.try_recv() {
            tracing::trace!("{:?} was removed ({:?})", event.key, event.cause);
            self.release_lock(&event.key);
        }
    }

    /// Removes the lock of `key` unless a task is holding or waiting on it.
    ///
    /// Handles are only cloned while the map shard is locked, so the count
    /// observed here cannot grow before the entry is removed.
    fn release_lock(&self, key: &K) {
        self.inner
            .locks
            .remove_if(key, |_, slot| Arc::strong_count(slot) == 1);
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.reclaim_evicted_locks();
        self.inner.locks.len()
    }
}
