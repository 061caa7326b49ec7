//! A [CacheEntry] owns the adaptor for one dataset plus the lock that decides who may touch it.
//!
//! The adaptor is only ever written under the entry's write lock, and only read under a read lock.  Callers get at it
//! through a [ReadLease], which is a read hold on the entry.  Every lease must go back through [CacheEntry::release]
//! (or be dropped) exactly once, which the type system enforces by making leases move-only.
use std::time::Instant;

use crate::rwlock::{DemotableRwLock, ReadHold, WriteHold};
use crate::*;

/// What the entry's lock protects.
pub(crate) struct EntrySlot<A> {
    adaptor: Option<A>,
    /// Set once [CacheEntry::delete] has run.  The entry is out of the table by then, so whoever loads into it
    /// afterwards is also responsible for tearing that adaptor back down.
    retired: bool,
}

pub struct CacheEntry<A> {
    loader: DatasetLoader<A>,
    slot: DemotableRwLock<EntrySlot<A>>,
}

/// A read hold on a [CacheEntry].
pub struct ReadLease<A> {
    hold: ReadHold<EntrySlot<A>>,
}

impl<A> ReadLease<A> {
    /// The adaptor, or `None` if this lease came back from a failed load.
    pub fn adaptor(&self) -> Option<&A> {
        self.hold.adaptor.as_ref()
    }
}

impl<A> std::fmt::Debug for ReadLease<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadLease")
            .field("loaded", &self.hold.adaptor.is_some())
            .finish()
    }
}

/// A load that failed.
///
/// The entry's write lock was demoted before this was built, so the lease inside is a real read hold and has to be
/// released like any other.
pub struct LoadFailure<A> {
    lease: ReadLease<A>,
    error: CacheError,
}

impl<A> LoadFailure<A> {
    pub fn error(&self) -> &CacheError {
        &self.error
    }

    pub fn into_parts(self) -> (ReadLease<A>, CacheError) {
        (self.lease, self.error)
    }
}

impl<A> std::fmt::Debug for LoadFailure<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadFailure")
            .field("error", &self.error)
            .finish()
    }
}

impl<A: DatasetAdaptor> CacheEntry<A> {
    pub fn new(loader: DatasetLoader<A>) -> CacheEntry<A> {
        CacheEntry {
            loader,
            slot: DemotableRwLock::new(EntrySlot {
                adaptor: None,
                retired: false,
            }),
        }
    }

    pub fn loader(&self) -> &DatasetLoader<A> {
        &self.loader
    }

    /// Whether an adaptor is open right now.  Reports `false` while a load or delete is in progress.
    pub fn is_loaded(&self) -> bool {
        self.slot
            .try_acquire_read()
            .map(|x| x.adaptor.is_some())
            .unwrap_or(false)
    }

    /// If the adaptor is already open, take a read lock and return it.  Otherwise, hold nothing.
    pub fn try_acquire_existing(&self) -> Option<ReadLease<A>> {
        let hold = self.slot.acquire_read();
        if hold.adaptor.is_some() {
            return Some(ReadLease { hold });
        }

        None
    }

    /// Return a read lease on the adaptor, opening it first if nobody has.
    ///
    /// Only one thread loads at a time; the rest wait on the write lock and then find the adaptor already present.
    /// Failure still hands back a read lease, inside the [LoadFailure].  The entry stays empty so the next caller
    /// tries again.
    pub fn acquire_or_open(&self, config: &AppConfig) -> Result<ReadLease<A>, LoadFailure<A>> {
        if let Some(lease) = self.try_acquire_existing() {
            return Ok(lease);
        }

        let mut hold = self.slot.acquire_write();
        // Someone else may have loaded it while we waited.
        if hold.adaptor.is_none() {
            if let Err(error) = self.load_locked(&mut hold, config) {
                return Err(LoadFailure {
                    lease: ReadLease {
                        hold: hold.demote(),
                    },
                    error,
                });
            }
        }

        Ok(ReadLease {
            hold: hold.demote(),
        })
    }

    fn load_locked(
        &self,
        hold: &mut WriteHold<EntrySlot<A>>,
        config: &AppConfig,
    ) -> Result<(), CacheError> {
        let location = self.loader.location();
        if hold.retired {
            tracing::debug!(location = %location, "loading into an entry that was already evicted");
        }

        let started = Instant::now();
        let loaded = self
            .loader
            .pre_load_validation()
            .and_then(|_| self.loader.open(config));
        match loaded {
            Ok(adaptor) => {
                hold.adaptor = Some(adaptor);
                tracing::info!(
                    location = %location,
                    format = %self.loader.format(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "dataset opened"
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(location = %location, error = %e, "dataset failed to load");
                Err(e)
            }
        }
    }

    /// Give back a lease from [CacheEntry::try_acquire_existing] or [CacheEntry::acquire_or_open].
    pub fn release(&self, lease: ReadLease<A>) {
        let retired = lease.hold.retired;
        drop(lease);

        // The entry was deleted before this lease's load ran.  The last reader out cleans up; if the write lock isn't
        // free, another reader still holds it and will see `retired` as well.
        if retired {
            if let Some(mut hold) = self.slot.try_acquire_write() {
                self.cleanup_locked(&mut hold);
            }
        }
    }

    /// Tear down the adaptor, waiting for every reader to finish first.
    pub fn delete(&self) {
        let mut hold = self.slot.acquire_write();
        hold.retired = true;
        self.cleanup_locked(&mut hold);
    }

    fn cleanup_locked(&self, hold: &mut WriteHold<EntrySlot<A>>) {
        if let Some(mut adaptor) = hold.adaptor.take() {
            adaptor.cleanup();
            tracing::debug!(location = %self.loader.location(), "dataset cleaned up");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    fn entry_for(factory: &FakeFactory, location: &str) -> CacheEntry<FakeAdaptor> {
        let resolver = MemoryResolver::new(&[location]);
        let registry = counting_registry(factory);
        let loader = DatasetLoader::new(
            &location.into(),
            &resolver,
            &registry,
            &AppConfig::default(),
        )
        .expect("Should build a loader");
        CacheEntry::new(loader)
    }

    #[test]
    fn test_existing_miss_holds_nothing() {
        let factory = FakeFactory::new();
        let entry = entry_for(&factory, "a.h5ad");

        assert!(entry.try_acquire_existing().is_none());
        // If the miss had kept a read lock, this would never get the write lock.
        assert!(entry.slot.try_acquire_write().is_some());
        assert_eq!(factory.opens("a.h5ad"), 0);
    }

    #[test]
    fn test_open_then_reuse() {
        let factory = FakeFactory::new();
        let entry = entry_for(&factory, "a.h5ad");

        let lease = entry
            .acquire_or_open(&AppConfig::default())
            .expect("Should open");
        let id = lease.adaptor().unwrap().id;
        entry.release(lease);
        assert!(entry.is_loaded());

        let again = entry.try_acquire_existing().expect("Should be loaded");
        assert_eq!(again.adaptor().unwrap().id, id);
        let third = entry.acquire_or_open(&AppConfig::default()).unwrap();
        assert_eq!(third.adaptor().unwrap().id, id);
        entry.release(again);
        entry.release(third);

        assert_eq!(factory.validations("a.h5ad"), 1);
        assert_eq!(factory.opens("a.h5ad"), 1);
    }

    #[test]
    fn test_failed_load_still_holds_read_lock() {
        let factory = FakeFactory::new();
        factory.fail_open("a.h5ad");
        let entry = entry_for(&factory, "a.h5ad");

        let failure = entry
            .acquire_or_open(&AppConfig::default())
            .expect_err("Should fail");
        assert!(matches!(failure.error(), CacheError::Open { .. }));
        let (lease, _) = failure.into_parts();
        assert!(lease.adaptor().is_none());
        // The write lock was demoted, not leaked or dropped.
        assert!(entry.slot.try_acquire_write().is_none());
        assert!(entry.slot.try_acquire_read().is_some());

        entry.release(lease);
        assert!(entry.slot.try_acquire_write().is_some());
        assert!(!entry.is_loaded());

        // The next attempt goes through the whole sequence again.
        factory.succeed("a.h5ad");
        let lease = entry.acquire_or_open(&AppConfig::default()).unwrap();
        assert!(lease.adaptor().is_some());
        entry.release(lease);
        assert_eq!(factory.validations("a.h5ad"), 2);
        assert_eq!(factory.opens("a.h5ad"), 2);
    }

    #[test]
    fn test_failed_validation_skips_open() {
        let factory = FakeFactory::new();
        factory.fail_validation("a.h5ad");
        let entry = entry_for(&factory, "a.h5ad");

        let (lease, error) = entry
            .acquire_or_open(&AppConfig::default())
            .expect_err("Should fail")
            .into_parts();
        entry.release(lease);
        assert!(matches!(error, CacheError::Validation { .. }));
        assert_eq!(factory.opens("a.h5ad"), 0);
    }

    #[test]
    fn test_delete_cleans_up_once() {
        let factory = FakeFactory::new();
        let entry = entry_for(&factory, "a.h5ad");

        let lease = entry.acquire_or_open(&AppConfig::default()).unwrap();
        entry.release(lease);
        entry.delete();
        assert_eq!(factory.cleanups("a.h5ad"), 1);
        assert!(!entry.is_loaded());

        // Nothing left to clean up.
        entry.delete();
        assert_eq!(factory.cleanups("a.h5ad"), 1);
    }

    #[test]
    fn test_delete_waits_for_readers() {
        let factory = FakeFactory::new();
        let entry = Arc::new(entry_for(&factory, "a.h5ad"));
        let lease = entry.acquire_or_open(&AppConfig::default()).unwrap();

        let deleter = {
            let entry = entry.clone();
            thread::spawn(move || entry.delete())
        };

        thread::sleep(Duration::from_millis(50));
        // Still usable: delete can't have run yet.
        assert_eq!(factory.cleanups("a.h5ad"), 0);
        assert!(!lease.adaptor().unwrap().is_cleaned_up());
        entry.release(lease);

        deleter.join().unwrap();
        assert_eq!(factory.cleanups("a.h5ad"), 1);
    }

    #[test]
    fn test_load_after_delete_is_cleaned_on_release() {
        let factory = FakeFactory::new();
        let entry = entry_for(&factory, "a.h5ad");

        // Evicted before anyone loaded it, but a caller still had it in hand.
        entry.delete();
        let lease = entry.acquire_or_open(&AppConfig::default()).unwrap();
        let other = entry.try_acquire_existing().unwrap();
        entry.release(lease);
        assert_eq!(factory.cleanups("a.h5ad"), 0);
        entry.release(other);
        assert_eq!(factory.cleanups("a.h5ad"), 1);
        assert!(!entry.is_loaded());
    }

    #[test]
    fn test_concurrent_open_loads_once() {
        let factory = FakeFactory::new();
        factory.set_open_delay(Duration::from_millis(20));
        let entry = Arc::new(entry_for(&factory, "a.h5ad"));
        let barrier = Arc::new(Barrier::new(8));

        let handles = (0..8)
            .map(|_| {
                let entry = entry.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    let lease = entry.acquire_or_open(&AppConfig::default()).unwrap();
                    let id = lease.adaptor().unwrap().id;
                    entry.release(lease);
                    id
                })
            })
            .collect::<Vec<_>>();

        let ids = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Vec<_>>();
        assert!(ids.iter().all(|x| *x == ids[0]));
        assert_eq!(factory.opens("a.h5ad"), 1);
    }
}
