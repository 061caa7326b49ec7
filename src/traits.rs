//! The collaborators the cache drives.
//!
//! A [LocationResolver] decides where a [Location] lives and whether it exists.  An [AdaptorFactory] knows how to
//! validate, open, and size one dataset format, producing a [DatasetAdaptor].  The cache owns every adaptor it opens
//! and calls [DatasetAdaptor::cleanup] exactly once when the adaptor is torn down.
use crate::*;

/// The error type collaborators report; the cache wraps it in the matching [CacheError] variant.
pub type AdaptorError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// An opened dataset.
///
/// Any number of threads may read from an adaptor at once, so it must be `Sync`.
pub trait DatasetAdaptor: Send + Sync + 'static {
    /// Release whatever the adaptor holds open.
    ///
    /// Called at most once, while no reader holds the adaptor.
    fn cleanup(&mut self);
}

impl<T: DatasetAdaptor + ?Sized> DatasetAdaptor for Box<T> {
    fn cleanup(&mut self) {
        (**self).cleanup()
    }
}

/// Format-specific operations, registered per [MatrixFormat] in a [FormatRegistry].
pub trait AdaptorFactory<A>: Send + Sync + 'static {
    /// Cheap checks run before every [AdaptorFactory::open].
    fn pre_load_validation(&self, location: &ResolvedLocation) -> Result<(), AdaptorError>;

    fn open(&self, location: &ResolvedLocation, config: &AppConfig) -> Result<A, AdaptorError>;

    /// Size of the dataset on its backing storage, in bytes.
    fn file_size(&self, location: &ResolvedLocation) -> Result<u64, AdaptorError>;
}

/// Map a [Location] to concrete storage.
pub trait LocationResolver: Send + Sync + 'static {
    /// Return `None` if the location can't name anything this resolver serves.
    fn resolve(&self, location: &Location) -> Option<ResolvedLocation>;

    fn exists(&self, location: &ResolvedLocation) -> bool;
}
