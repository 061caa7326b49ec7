//! Work out which format a dataset is in, decide whether we may serve it, and hand the real work to the registered
//! [AdaptorFactory].
//!
//! All the checks that can reject a location happen in [DatasetLoader::new], before the cache table or any lock is
//! touched.
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use ahash::RandomState;

use crate::*;

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum MatrixFormat {
    H5ad,
    Cxg,
    Unknown,
}

impl MatrixFormat {
    pub fn tag(&self) -> &'static str {
        match self {
            MatrixFormat::H5ad => "h5ad",
            MatrixFormat::Cxg => "cxg",
            MatrixFormat::Unknown => "unknown",
        }
    }

    /// Sniff the format from the text of a path.
    ///
    /// `.h5ad` must be the suffix, but `.cxg` may appear anywhere since cxg datasets are directories that get
    /// addressed by paths inside them.
    pub fn from_path(path: &str) -> MatrixFormat {
        if path.ends_with(".h5ad") {
            MatrixFormat::H5ad
        } else if path.contains(".cxg") {
            MatrixFormat::Cxg
        } else {
            MatrixFormat::Unknown
        }
    }
}

impl fmt::Display for MatrixFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown dataset format tag `{0}`")]
pub struct UnknownFormatTag(String);

impl FromStr for MatrixFormat {
    type Err = UnknownFormatTag;

    fn from_str(s: &str) -> Result<MatrixFormat, UnknownFormatTag> {
        match s {
            "h5ad" => Ok(MatrixFormat::H5ad),
            "cxg" => Ok(MatrixFormat::Cxg),
            "unknown" => Ok(MatrixFormat::Unknown),
            _ => Err(UnknownFormatTag(s.to_string())),
        }
    }
}

/// Which [AdaptorFactory] handles which [MatrixFormat].
pub struct FormatRegistry<A> {
    factories: HashMap<MatrixFormat, Arc<dyn AdaptorFactory<A>>, RandomState>,
}

impl<A> Default for FormatRegistry<A> {
    fn default() -> Self {
        FormatRegistry {
            factories: Default::default(),
        }
    }
}

impl<A> FormatRegistry<A> {
    pub fn new() -> FormatRegistry<A> {
        Default::default()
    }

    /// Register a factory for a format, returning the one it replaces.
    ///
    /// Registering for [MatrixFormat::Unknown] is allowed but pointless: unknown datasets are always rejected.
    pub fn register(
        &mut self,
        format: MatrixFormat,
        factory: impl AdaptorFactory<A>,
    ) -> Option<Arc<dyn AdaptorFactory<A>>> {
        self.factories.insert(format, Arc::new(factory))
    }

    /// Builder-style [FormatRegistry::register].
    pub fn with(mut self, format: MatrixFormat, factory: impl AdaptorFactory<A>) -> Self {
        self.register(format, factory);
        self
    }

    pub fn get(&self, format: MatrixFormat) -> Option<Arc<dyn AdaptorFactory<A>>> {
        self.factories.get(&format).cloned()
    }
}

/// Check a format against the multi-dataset allow-list.
///
/// The list is only consulted when a dataroot is configured and the list is non-empty.  Entries are checked in order,
/// and an entry that isn't a format tag at all rejects the format if it comes before a match.
pub fn format_allowed(format: MatrixFormat, config: &AppConfig) -> bool {
    if format == MatrixFormat::Unknown {
        return false;
    }

    let multi = &config.multi_dataset;
    if multi.dataroot.is_none() || multi.allowed_matrix_types.is_empty() {
        return true;
    }

    for tag in multi.allowed_matrix_types.iter() {
        match tag.parse::<MatrixFormat>() {
            Ok(allowed) if allowed == format => return true,
            Ok(_) => {}
            Err(_) => return false,
        }
    }

    false
}

/// Everything needed to open one dataset.
pub struct DatasetLoader<A> {
    location: ResolvedLocation,
    format: MatrixFormat,
    factory: Arc<dyn AdaptorFactory<A>>,
}

impl<A: 'static> DatasetLoader<A> {
    /// Resolve a location and sniff its format from its path.
    pub fn new(
        location: &Location,
        resolver: &dyn LocationResolver,
        registry: &FormatRegistry<A>,
        config: &AppConfig,
    ) -> Result<DatasetLoader<A>, CacheError> {
        Self::build(location, None, resolver, registry, config)
    }

    /// Like [DatasetLoader::new], but the caller already knows the format.
    pub fn with_format(
        location: &Location,
        format: MatrixFormat,
        resolver: &dyn LocationResolver,
        registry: &FormatRegistry<A>,
        config: &AppConfig,
    ) -> Result<DatasetLoader<A>, CacheError> {
        Self::build(location, Some(format), resolver, registry, config)
    }

    fn build(
        location: &Location,
        format: Option<MatrixFormat>,
        resolver: &dyn LocationResolver,
        registry: &FormatRegistry<A>,
        config: &AppConfig,
    ) -> Result<DatasetLoader<A>, CacheError> {
        let resolved = match resolver.resolve(location) {
            Some(r) if resolver.exists(&r) => r,
            _ => {
                tracing::debug!(location = %location, "dataset does not exist");
                return Err(CacheError::NotFound(location.clone()));
            }
        };

        let format = format.unwrap_or_else(|| MatrixFormat::from_path(&resolved.path_text()));
        if format == MatrixFormat::Unknown {
            tracing::debug!(location = %location, "dataset type not recognized");
            return Err(CacheError::UnrecognizedType(location.clone()));
        }

        if !format_allowed(format, config) {
            tracing::debug!(location = %location, format = %format, "dataset type not allowed");
            return Err(CacheError::DisallowedType {
                location: location.clone(),
                format,
            });
        }

        let factory = registry.get(format).ok_or(CacheError::NoAdaptor(format))?;

        Ok(DatasetLoader {
            location: resolved,
            format,
            factory,
        })
    }

    pub fn location(&self) -> &ResolvedLocation {
        &self.location
    }

    pub fn format(&self) -> MatrixFormat {
        self.format
    }

    /// Must succeed before [DatasetLoader::open] is called.
    pub fn pre_load_validation(&self) -> Result<(), CacheError> {
        if self.format == MatrixFormat::Unknown {
            return Err(CacheError::UnrecognizedType(self.location.location().clone()));
        }
        self.factory
            .pre_load_validation(&self.location)
            .map_err(|source| CacheError::Validation {
                location: self.location.location().clone(),
                source,
            })
    }

    pub fn open(&self, config: &AppConfig) -> Result<A, CacheError> {
        self.factory
            .open(&self.location, config)
            .map_err(|source| CacheError::Open {
                location: self.location.location().clone(),
                source,
            })
    }

    pub fn file_size(&self) -> Result<u64, CacheError> {
        self.factory
            .file_size(&self.location)
            .map_err(|source| CacheError::FileSize {
                location: self.location.location().clone(),
                source,
            })
    }
}
