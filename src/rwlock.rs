//! A reader/writer lock whose write side can be demoted to a read hold without ever unlocking.
//!
//! Holds are owned objects rather than borrows: each one keeps the lock alive through an `Arc`, so a hold can be
//! handed back to the caller of a cache lookup and released whenever that caller is done.
//!
//! The contract the cache relies on:
//!
//! - Any number of [ReadHold]s may exist at once.  No read hold is granted while a writer holds the lock.
//! - A [WriteHold] is exclusive.  It is granted only once every reader and writer has released.
//! - [WriteHold::demote] turns the exclusive hold into a shared one atomically.  No other writer can get in between,
//!   so a thread that just loaded data can keep reading it knowing nobody tore it down in the meantime.
//!
//! Dropping a hold releases it.  Nothing here gives fairness guarantees beyond what `parking_lot` provides.
//!
//! ```
//! use dataset_cache::DemotableRwLock;
//!
//! let lock = DemotableRwLock::new(None);
//! let mut hold = lock.acquire_write();
//! *hold = Some("loaded");
//! let read = hold.demote();
//! assert_eq!(*read, Some("loaded"));
//! assert!(lock.try_acquire_write().is_none());
//! read.release();
//! assert!(lock.try_acquire_write().is_some());
//! ```
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, RawRwLock, RwLock};

pub struct DemotableRwLock<T> {
    inner: Arc<RwLock<T>>,
}

pub struct ReadHold<T>(ArcRwLockReadGuard<RawRwLock, T>);

pub struct WriteHold<T>(ArcRwLockWriteGuard<RawRwLock, T>);

impl<T> DemotableRwLock<T> {
    pub fn new(value: T) -> DemotableRwLock<T> {
        DemotableRwLock {
            inner: Arc::new(RwLock::new(value)),
        }
    }

    /// Block until a shared hold is granted.
    pub fn acquire_read(&self) -> ReadHold<T> {
        ReadHold(self.inner.read_arc())
    }

    /// Block until the exclusive hold is granted.
    pub fn acquire_write(&self) -> WriteHold<T> {
        WriteHold(self.inner.write_arc())
    }

    /// Take a shared hold only if no writer has the lock right now.
    pub fn try_acquire_read(&self) -> Option<ReadHold<T>> {
        self.inner.try_read_arc().map(ReadHold)
    }

    pub fn try_acquire_write(&self) -> Option<WriteHold<T>> {
        self.inner.try_write_arc().map(WriteHold)
    }
}

impl<T> ReadHold<T> {
    /// Give the shared hold back.  Equivalent to dropping it.
    pub fn release(self) {}
}

impl<T> WriteHold<T> {
    /// Atomically trade exclusive access for shared access.
    pub fn demote(self) -> ReadHold<T> {
        ReadHold(ArcRwLockWriteGuard::downgrade(self.0))
    }

    /// Give the exclusive hold back.  Equivalent to dropping it.
    pub fn release(self) {}
}

impl<T> Deref for ReadHold<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> Deref for WriteHold<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for WriteHold<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}
