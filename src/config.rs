//! Configuration for the cache and for the adaptors it opens.
//!
//! Both structs come with builders:
//!
//! ```
//! use dataset_cache::*;
//!
//! let cache_config = CacheConfigBuilder::default()
//!     .max_cached_datasets(3)
//!     .build()
//!     .expect("Should build");
//! assert_eq!(cache_config.max_cached_datasets(), 3);
//!
//! let app_config = AppConfigBuilder::default()
//!     .multi_dataset(
//!         MultiDatasetConfigBuilder::default()
//!             .dataroot("/data")
//!             .allowed_matrix_types(vec!["cxg".to_string()])
//!             .build()
//!             .expect("Should build"),
//!     )
//!     .build()
//!     .expect("Should build");
//! assert!(app_config.multi_dataset.dataroot.is_some());
//! ```
use std::path::PathBuf;

pub const DEFAULT_MAX_CACHED_DATASETS: usize = 5;

#[derive(Clone, Debug, derive_builder::Builder)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct CacheConfig {
    /// How many datasets stay open before the least recently used one is evicted.
    ///
    /// Only settable through the builder, which refuses zero.
    #[builder(default = "DEFAULT_MAX_CACHED_DATASETS")]
    max_cached_datasets: usize,
}

impl CacheConfig {
    pub fn max_cached_datasets(&self) -> usize {
        self.max_cached_datasets
    }
}

impl CacheConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        match self.max_cached_datasets {
            Some(0) => Err("max_cached_datasets must be at least 1".to_string()),
            _ => Ok(()),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> CacheConfig {
        CacheConfig {
            max_cached_datasets: DEFAULT_MAX_CACHED_DATASETS,
        }
    }
}

/// Settings for serving many datasets out of one root.
#[derive(Clone, Debug, Default, derive_builder::Builder)]
#[builder(default)]
pub struct MultiDatasetConfig {
    /// The allow-list below is only enforced when this is set.
    #[builder(setter(into, strip_option))]
    pub dataroot: Option<PathBuf>,
    /// Format tags such as `h5ad` or `cxg`, checked in order.  Empty allows every format.
    pub allowed_matrix_types: Vec<String>,
}

/// The configuration handed to the loader and to [AdaptorFactory::open](crate::AdaptorFactory::open).
#[derive(Clone, Debug, Default, derive_builder::Builder)]
#[builder(default)]
pub struct AppConfig {
    pub multi_dataset: MultiDatasetConfig,
}
