//! The [DatasetCache] maps locations to [CacheEntry]s and keeps at most a configured number of them around, evicting
//! the least recently used entry to make room.
//!
//! There are two layers of locking:
//!
//! - One mutex over the table.  It covers lookups, insertions, evictions from the table, and access times.
//! - One demotable reader/writer lock per entry, covering the adaptor itself.
//!
//! Removing an entry from the table and tearing its adaptor down are separate steps.  The victim leaves the table
//! under the mutex, but [CacheEntry::delete] runs after the mutex is released: it waits for any readers still using
//! the adaptor, and only the thread which caused the eviction waits with it.
//!
//! Typical use looks like:
//!
//! ```ignore
//! let cache = DatasetCache::new(CacheConfig::default(), FilesystemResolver::new(root), registry);
//! let n_obs = cache.with_adaptor(&"pbmc3k.cxg".into(), &app_config, |adaptor| adaptor.n_obs())?;
//! ```
use std::collections::HashMap;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::*;

type CacheHashMap<V> = HashMap<Location, V, ahash::RandomState>;

struct CachedDataset<A> {
    entry: Arc<CacheEntry<A>>,
    /// Value of [CacheTable::clock] at the last access.
    last_accessed: u64,
}

/// Everything the table mutex protects.
struct CacheTable<A> {
    datasets: CacheHashMap<CachedDataset<A>>,
    capacity: usize,
    /// A logical clock ticked once per access, so access times are strictly ordered.
    clock: u64,
}

type Victim<A> = (Location, Arc<CacheEntry<A>>);

impl<A> CacheTable<A> {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Remove and return the least recently used entry.
    fn pop_oldest(&mut self) -> Option<Victim<A>> {
        let oldest = self
            .datasets
            .iter()
            .min_by_key(|(_, cached)| cached.last_accessed)
            .map(|(location, _)| location.clone())?;
        let cached = self.datasets.remove(&oldest)?;
        Some((oldest, cached.entry))
    }

    /// Pop entries until there are at most `max` left.
    fn evict_down_to(&mut self, max: usize) -> Vec<Victim<A>> {
        let mut victims = vec![];
        while self.datasets.len() > max {
            match self.pop_oldest() {
                Some(v) => victims.push(v),
                None => break,
            }
        }
        victims
    }

    /// Make room for one more entry as if `keep` were being inserted, without ever evicting `keep` itself.
    fn evict_keeping(&mut self, keep: &Location) -> Vec<Victim<A>> {
        let kept = self.datasets.remove(keep);
        let max = self.capacity - 1;
        let victims = self.evict_down_to(max);
        if let Some(cached) = kept {
            self.datasets.insert(keep.clone(), cached);
        }
        victims
    }
}

pub struct DatasetCache<A: DatasetAdaptor> {
    table: Mutex<CacheTable<A>>,
    resolver: Box<dyn LocationResolver>,
    registry: FormatRegistry<A>,
}

/// A loaded adaptor, read-locked for as long as the guard lives.
///
/// Dropping the guard releases the read lock.  The guard borrows the cache, so the cache can't be torn down under it.
pub struct AdaptorGuard<'a, A: DatasetAdaptor> {
    entry: Arc<CacheEntry<A>>,
    lease: Option<ReadLease<A>>,
    _cache: PhantomData<&'a DatasetCache<A>>,
}

impl<'a, A: DatasetAdaptor> Deref for AdaptorGuard<'a, A> {
    type Target = A;

    fn deref(&self) -> &A {
        self.lease
            .as_ref()
            .and_then(|x| x.adaptor())
            .expect("Guards are only built around loaded adaptors")
    }
}

impl<'a, A: DatasetAdaptor> Drop for AdaptorGuard<'a, A> {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            self.entry.release(lease);
        }
    }
}

impl<A: DatasetAdaptor> DatasetCache<A> {
    pub fn new(
        config: CacheConfig,
        resolver: impl LocationResolver,
        registry: FormatRegistry<A>,
    ) -> DatasetCache<A> {
        DatasetCache {
            table: Mutex::new(CacheTable {
                datasets: Default::default(),
                capacity: config.max_cached_datasets(),
                clock: 0,
            }),
            resolver: Box::new(resolver),
            registry,
        }
    }

    /// Get a read-locked adaptor for a location, opening it if needed.
    ///
    /// The read lock is held until the guard is dropped.  Don't request other locations while holding a guard: if
    /// that evicts the dataset the guard points at, the eviction waits on this very guard forever.
    pub fn acquire(
        &self,
        location: &Location,
        config: &AppConfig,
    ) -> Result<AdaptorGuard<'_, A>, CacheError> {
        let (entry, existing, victims) = self.lookup_or_insert(location, config)?;

        for (victim_location, victim) in victims {
            tracing::debug!(location = %victim_location, "deleting evicted dataset");
            victim.delete();
        }

        let lease = match existing {
            Some(lease) => lease,
            None => match entry.acquire_or_open(config) {
                Ok(lease) => lease,
                Err(failure) => {
                    let (lease, error) = failure.into_parts();
                    entry.release(lease);
                    return Err(error);
                }
            },
        };

        Ok(AdaptorGuard {
            entry,
            lease: Some(lease),
            _cache: PhantomData,
        })
    }

    /// Run a closure against the adaptor for a location.  The read lock is released however the closure exits,
    /// including by panicking.
    pub fn with_adaptor<R>(
        &self,
        location: &Location,
        config: &AppConfig,
        f: impl FnOnce(&A) -> R,
    ) -> Result<R, CacheError> {
        let guard = self.acquire(location, config)?;
        Ok(f(&guard))
    }

    /// The part of [DatasetCache::acquire] which runs under the table mutex.
    ///
    /// Returns the entry, a lease if the entry was already loaded, and anything evicted to make room.
    #[allow(clippy::type_complexity)]
    fn lookup_or_insert(
        &self,
        location: &Location,
        config: &AppConfig,
    ) -> Result<(Arc<CacheEntry<A>>, Option<ReadLease<A>>, Vec<Victim<A>>), CacheError> {
        let mut table = self.table.lock();
        let now = table.tick();

        if let Some(cached) = table.datasets.get_mut(location) {
            cached.last_accessed = now;
            let entry = cached.entry.clone();
            if let Some(lease) = entry.try_acquire_existing() {
                return Ok((entry, Some(lease), vec![]));
            }

            // Present but not loaded: make room just as for a new entry, but reuse this one so that racing first
            // accesses share it.
            let victims = table.evict_keeping(location);
            Self::log_evictions(&victims);
            return Ok((entry, None, victims));
        }

        // Build the loader first: bad locations must not evict anything.
        let loader = DatasetLoader::new(location, &*self.resolver, &self.registry, config)?;

        let capacity = table.capacity;
        let victims = table.evict_down_to(capacity - 1);
        Self::log_evictions(&victims);

        let entry = Arc::new(CacheEntry::new(loader));
        table.datasets.insert(
            location.clone(),
            CachedDataset {
                entry: entry.clone(),
                last_accessed: now,
            },
        );

        Ok((entry, None, victims))
    }

    fn log_evictions(victims: &[Victim<A>]) {
        for (victim_location, _) in victims.iter() {
            tracing::info!(location = %victim_location, "evicting least recently used dataset");
        }
    }

    /// Size of a dataset on disk, without opening or caching it.
    pub fn file_size(&self, location: &Location, config: &AppConfig) -> Result<u64, CacheError> {
        DatasetLoader::new(location, &*self.resolver, &self.registry, config)?.file_size()
    }

    pub fn capacity(&self) -> usize {
        self.table.lock().capacity
    }

    /// Change how many datasets may be cached, evicting the least recently used ones if the cache is now too full.
    ///
    /// Blocks until every evicted dataset has been cleaned up.
    pub fn set_capacity(&self, capacity: usize) -> Result<(), CacheError> {
        if capacity == 0 {
            return Err(CacheError::InvalidConfig(
                "the cache must hold at least one dataset".to_string(),
            ));
        }

        let victims = {
            let mut table = self.table.lock();
            table.capacity = capacity;
            table.evict_down_to(capacity)
        };
        tracing::info!(capacity, evicted = victims.len(), "dataset cache capacity changed");

        for (_, victim) in victims {
            victim.delete();
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.table.lock().datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, location: &Location) -> bool {
        self.table.lock().datasets.contains_key(location)
    }

    /// Whether the location is in the table with its adaptor open.  Doesn't count as an access.
    pub fn is_loaded(&self, location: &Location) -> bool {
        self.table
            .lock()
            .datasets
            .get(location)
            .map(|x| x.entry.is_loaded())
            .unwrap_or(false)
    }

    /// Every cached location, least recently used first.
    pub fn cached_locations(&self) -> Vec<Location> {
        let table = self.table.lock();
        let mut out = table
            .datasets
            .iter()
            .map(|(location, cached)| (cached.last_accessed, location.clone()))
            .collect::<Vec<_>>();
        out.sort();
        out.into_iter().map(|x| x.1).collect()
    }

    /// Remove everything from the cache, cleaning up each adaptor once its readers are done.
    pub fn clear(&self) {
        let victims = {
            let mut table = self.table.lock();
            table.datasets.drain().collect::<Vec<_>>()
        };

        for (location, cached) in victims {
            tracing::debug!(location = %location, "deleting dataset on clear");
            cached.entry.delete();
        }
    }
}

impl<A: DatasetAdaptor> Drop for DatasetCache<A> {
    fn drop(&mut self) {
        self.clear();
    }
}
