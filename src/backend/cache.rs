use std::{
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::DashMap;
use log::debug;
use lru::LruCache;
use parking_lot::Mutex;

use crate::error::QueryError;

use super::{Executor, PhysicalQuery, RawRow};

pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Memoizes row sets by statement text, holding at most `capacity`
/// statements and evicting the least recently used one beyond that.
pub struct CachingExecutor<E> {
    inner: E,
    entries: DashMap<String, Arc<Vec<RawRow>>>,
    recency: Mutex<LruCache<String, ()>>,
    hits: AtomicU64,
}

impl<E: Executor> CachingExecutor<E> {
    pub fn new(inner: E) -> Self {
        Self::with_capacity(inner, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(inner: E, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            entries: DashMap::new(),
            recency: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.recency.lock().cap().get()
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        let mut recency = self.recency.lock();
        recency.clear();
        self.entries.clear();
    }

    fn lookup(&self, key: &str) -> Option<Arc<Vec<RawRow>>> {
        let rows = self.entries.get(key).map(|entry| Arc::clone(entry.value()))?;
        self.recency.lock().promote(key);
        Some(rows)
    }

    fn store(&self, key: String, rows: Arc<Vec<RawRow>>) {
        let mut recency = self.recency.lock();
        if let Some((evicted, _)) = recency.push(key.clone(), ()) {
            if evicted != key {
                debug!("evicting cached statement: {evicted}");
                self.entries.remove(&evicted);
            }
        }
        self.entries.insert(key, rows);
    }
}

impl<E: Executor> Executor for CachingExecutor<E> {
    async fn execute(&self, queries: &[PhysicalQuery]) -> Result<Vec<Vec<RawRow>>, QueryError> {
        let keys: Vec<String> = queries.iter().map(PhysicalQuery::to_sql).collect();
        let mut slots: Vec<Option<Arc<Vec<RawRow>>>> = keys
            .iter()
            .map(|key| self.lookup(key))
            .collect();

        let misses: Vec<usize> = (0..slots.len()).filter(|i| slots[*i].is_none()).collect();
        let hits = (slots.len() - misses.len()) as u64;
        if hits > 0 {
            self.hits.fetch_add(hits, Ordering::Relaxed);
            debug!("cache hit for {hits} of {} statement(s)", slots.len());
        }
        if !misses.is_empty() {
            let pending: Vec<PhysicalQuery> =
                misses.iter().map(|i| queries[*i].clone()).collect();
            let fetched = self.inner.execute(&pending).await?;
            for (index, rows) in misses.into_iter().zip(fetched) {
                let rows = Arc::new(rows);
                self.store(keys[index].clone(), Arc::clone(&rows));
                slots[index] = Some(rows);
            }
        }

        slots
            .into_iter()
            .map(|slot| {
                slot.map(|rows| rows.as_ref().clone())
                    .ok_or_else(|| QueryError::Internal("executor dropped a statement".into()))
            })
            .collect()
    }
}
