use crate::*;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("dataset does not exist: {0}")]
    NotFound(Location),
    #[error("dataset does not have a recognized type (.h5ad or .cxg): {0}")]
    UnrecognizedType(Location),
    #[error("dataset type `{format}` is not allowed: {location}")]
    DisallowedType {
        location: Location,
        format: MatrixFormat,
    },
    /// The format is known but nothing was registered to open it.
    #[error("no adaptor is registered for dataset type `{0}`")]
    NoAdaptor(MatrixFormat),
    #[error("dataset failed validation: {location}")]
    Validation {
        location: Location,
        #[source]
        source: AdaptorError,
    },
    #[error("failed to open dataset: {location}")]
    Open {
        location: Location,
        #[source]
        source: AdaptorError,
    },
    #[error("failed to get the size of dataset: {location}")]
    FileSize {
        location: Location,
        #[source]
        source: AdaptorError,
    },
    #[error("invalid cache configuration: {0}")]
    InvalidConfig(String),
}

impl CacheError {
    /// True for the errors raised before a location ever reaches the cache table.
    pub fn is_rejected_location(&self) -> bool {
        matches!(
            self,
            CacheError::NotFound(_)
                | CacheError::UnrecognizedType(_)
                | CacheError::DisallowedType { .. }
                | CacheError::NoAdaptor(_)
        )
    }
}
