//! A cache for dataset adaptors which are expensive to open but cheap to share.
//!
//! A server answering requests against many datasets doesn't want to reopen a dataset for every request, but it also
//! can't keep every dataset it has ever seen open: each one holds file handles, mapped memory, and indices.  This crate
//! keeps a bounded number of them open, lets any number of requests read an open one at the same time, and evicts the
//! least recently used one when something new needs the room.
//!
//! [DatasetCache] is the entry point.  Give it a [LocationResolver] that says where datasets live, and a
//! [FormatRegistry] with an [AdaptorFactory] per [MatrixFormat] you serve, then call [DatasetCache::with_adaptor] or
//! [DatasetCache::acquire] per request.
//!
//! The guarantees:
//!
//! - A dataset is opened at most once at a time, no matter how many requests race for it.
//! - An adaptor is never cleaned up while anyone is reading it.  Eviction takes the dataset out of the table at once,
//!   but cleanup waits for the readers.
//! - A failed open isn't remembered.  The dataset stays in the table unopened and the next request tries again.
//! - Locations which don't exist, or aren't a format we serve, are rejected before they touch the table.
mod cache_entry;
mod cache_manager;
mod config;
mod error;
mod filesystem_resolver;
mod loader;
mod location;
mod rwlock;
mod traits;

#[cfg(test)]
mod test_support;

pub use cache_entry::*;
pub use cache_manager::*;
pub use config::*;
pub use error::*;
pub use filesystem_resolver::*;
pub use loader::*;
pub use location::*;
pub use rwlock::*;
pub use traits::*;
