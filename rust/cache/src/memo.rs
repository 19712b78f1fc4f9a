// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Single-flight memo tables.
//!
//! Tables store the in-flight future itself, not just its eventual value, so
//! two concurrent callers requesting the same not-yet-resolved key await one
//! shared fetch instead of issuing duplicates. Successful entries live for
//! the lifetime of the table (mappings are immutable within a session);
//! failed fetches are evicted so a later call can retry.

use crate::error::{MappingError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use rustc_hash::{FxHashMap, FxHashSet};
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::oneshot;

/// A clonable handle to a pending or resolved cache entry.
pub type SharedSlot<V> = Shared<BoxFuture<'static, Result<V>>>;

/// Concurrent map from key to shared fetch future.
pub struct MemoTable<K, V> {
    slots: DashMap<K, SharedSlot<V>>,
}

impl<K, V> MemoTable<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Handle to the entry for `key`, pending or resolved.
    pub fn get(&self, key: &K) -> Option<SharedSlot<V>> {
        self.slots.get(key).map(|slot| slot.clone())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Insert an already-resolved value unless the key is present.
    ///
    /// Used for cache warming and for memoizing explicit empty results.
    pub fn insert_value_if_absent(&self, key: K, value: V) {
        self.slots
            .entry(key)
            .or_insert_with(|| futures::future::ready(Ok(value)).boxed().shared());
    }

    /// Publish a fetch future under `key` unless one is present, returning
    /// the slot without awaiting it.
    ///
    /// The future does not run until first polled, so the caller decides if
    /// and when the fetch actually happens. Await through [`Self::await_slot`]
    /// to keep the failed-fetch eviction behavior.
    pub fn slot_or_insert_with<F>(&self, key: K, fetch: F) -> SharedSlot<V>
    where
        F: FnOnce() -> BoxFuture<'static, Result<V>>,
    {
        match self.slots.entry(key) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let slot = fetch().shared();
                entry.insert(slot.clone());
                slot
            }
        }
    }

    /// Await a slot obtained from this table, evicting `key` on failure so a
    /// later call can retry.
    ///
    /// Only the failed slot itself is evicted: a stale waiter of an old
    /// failure must not remove the fresh entry a retry has memoized since.
    pub async fn await_slot(&self, key: &K, slot: SharedSlot<V>) -> Result<V> {
        match slot.clone().await {
            Ok(value) => Ok(value),
            Err(err) => {
                self.slots.remove_if(key, |_, stored| stored.ptr_eq(&slot));
                Err(err)
            }
        }
    }

    /// Return the memoized value for `key`, running `fetch` if absent.
    ///
    /// The check-or-insert is atomic, so concurrent callers of the same key
    /// share one fetch. A failed fetch is evicted before the error is
    /// returned.
    pub async fn get_or_fetch<F>(&self, key: K, fetch: F) -> Result<V>
    where
        F: FnOnce() -> BoxFuture<'static, Result<V>>,
    {
        let slot = self.slot_or_insert_with(key.clone(), fetch);
        self.await_slot(&key, slot).await
    }

    /// Resolve `keys`, fetching the not-yet-cached remainder through `fetch`.
    ///
    /// Slots for missing keys are published before the fetch future exists,
    /// so a caller racing on the same key awaits this call's fetch instead of
    /// issuing its own; the oneshot closes the gap by handing the fetch the
    /// exact set of keys this call won. Keys the fetch does not report are
    /// memoized as `miss` (explicit empty result, never refetched).
    pub async fn resolve_many<F>(&self, keys: Vec<K>, miss: V, fetch: F) -> Result<Vec<(K, V)>>
    where
        F: FnOnce(Vec<K>) -> BoxFuture<'static, Result<FxHashMap<K, V>>> + Send + 'static,
    {
        let mut seen = FxHashSet::default();
        let keys: Vec<K> = keys.into_iter().filter(|k| seen.insert(k.clone())).collect();

        let (keys_tx, keys_rx) = oneshot::channel::<Vec<K>>();
        let batch: SharedSlot<Arc<FxHashMap<K, V>>> = async move {
            let owned: Vec<K> = keys_rx
                .await
                .map_err(|_| MappingError::Request("coalesced fetch cancelled".into()))?;
            if owned.is_empty() {
                return Ok(Arc::new(FxHashMap::default()));
            }
            Ok(Arc::new(fetch(owned).await?))
        }
        .boxed()
        .shared();

        let mut pairs: Vec<(K, SharedSlot<V>)> = Vec::with_capacity(keys.len());
        let mut claimed: Vec<K> = Vec::new();
        let mut claimed_slots: Vec<(K, SharedSlot<V>)> = Vec::new();
        for key in keys {
            match self.slots.entry(key.clone()) {
                Entry::Occupied(entry) => pairs.push((key, entry.get().clone())),
                Entry::Vacant(entry) => {
                    let slot = {
                        let batch = batch.clone();
                        let key = key.clone();
                        let miss = miss.clone();
                        async move {
                            let resolved = batch.await?;
                            Ok(resolved.get(&key).cloned().unwrap_or(miss))
                        }
                        .boxed()
                        .shared()
                    };
                    entry.insert(slot.clone());
                    claimed.push(key.clone());
                    claimed_slots.push((key.clone(), slot.clone()));
                    pairs.push((key, slot));
                }
            }
        }

        let _ = keys_tx.send(claimed);

        let mut resolved = Vec::with_capacity(pairs.len());
        for (key, slot) in pairs {
            match slot.await {
                Ok(value) => resolved.push((key, value)),
                Err(err) => {
                    // Evict only the slots this call published; entries a
                    // retry has replaced meanwhile stay memoized.
                    for (key, slot) in &claimed_slots {
                        self.slots.remove_if(key, |_, stored| stored.ptr_eq(slot));
                    }
                    return Err(err);
                }
            }
        }
        Ok(resolved)
    }
}

impl<K, V> Default for MemoTable<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fetch_counting(
        counter: Arc<AtomicUsize>,
    ) -> impl FnOnce(Vec<u64>) -> BoxFuture<'static, Result<FxHashMap<u64, u64>>> {
        move |keys| {
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(keys.into_iter().map(|k| (k, k * 10)).collect())
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let table = Arc::new(MemoTable::<u64, u64>::new());
        let fetches = Arc::new(AtomicUsize::new(0));

        let (first, second) = tokio::join!(
            table.resolve_many(vec![1, 2], 0, fetch_counting(fetches.clone())),
            table.resolve_many(vec![1, 2], 0, fetch_counting(fetches.clone())),
        );

        assert_eq!(first.unwrap(), vec![(1, 10), (2, 20)]);
        assert_eq!(second.unwrap(), vec![(1, 10), (2, 20)]);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreported_keys_memoize_as_miss() {
        let table = MemoTable::<u64, u64>::new();
        let fetches = Arc::new(AtomicUsize::new(0));

        let fetch_only_even = |keys: Vec<u64>| {
            async move {
                Ok(keys
                    .into_iter()
                    .filter(|k| k % 2 == 0)
                    .map(|k| (k, k))
                    .collect::<FxHashMap<_, _>>())
            }
            .boxed()
        };

        let resolved = table.resolve_many(vec![2, 3], 0, fetch_only_even).await.unwrap();
        assert_eq!(resolved, vec![(2, 2), (3, 0)]);

        // The miss for key 3 is memoized, no second fetch happens
        let resolved = table
            .resolve_many(vec![3], 0, fetch_counting(fetches.clone()))
            .await
            .unwrap();
        assert_eq!(resolved, vec![(3, 0)]);
        assert_eq!(fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_evicted_and_retried() {
        let table = MemoTable::<u64, u64>::new();

        let err = table
            .resolve_many(vec![1], 0, |_keys: Vec<u64>| {
                async { Err(MappingError::Request("boom".into())) }.boxed()
            })
            .await
            .unwrap_err();
        assert_eq!(err, MappingError::Request("boom".into()));
        assert!(!table.contains(&1));

        let fetches = Arc::new(AtomicUsize::new(0));
        let resolved = table
            .resolve_many(vec![1], 0, fetch_counting(fetches.clone()))
            .await
            .unwrap();
        assert_eq!(resolved, vec![(1, 10)]);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_failed_waiter_does_not_evict_fresh_entry() {
        let table = MemoTable::<u64, u64>::new();

        let failed = table.slot_or_insert_with(1, || {
            async { Err(MappingError::Request("boom".into())) }.boxed()
        });
        assert!(table.await_slot(&1, failed.clone()).await.is_err());
        assert!(!table.contains(&1));

        // A retry memoizes a fresh value under the same key
        table.insert_value_if_absent(1, 42);

        // A second waiter of the old failed fetch must not evict the retry
        assert!(table.await_slot(&1, failed).await.is_err());
        assert!(table.contains(&1));
        assert_eq!(table.get(&1).unwrap().await, Ok(42));
    }

    #[tokio::test]
    async fn test_get_or_fetch_memoizes() {
        let table = MemoTable::<&'static str, u64>::new();
        let fetches = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let fetches = fetches.clone();
            let value = table
                .get_or_fetch("model", move || {
                    async move {
                        fetches.fetch_add(1, Ordering::SeqCst);
                        Ok(99)
                    }
                    .boxed()
                })
                .await
                .unwrap();
            assert_eq!(value, 99);
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }
}
