use std::path::{Path, PathBuf};

use crate::*;

/// A resolver which serves datasets from under one root directory.
///
/// Locations are relative paths such as `/pbmc3k.cxg` or `pbmc3k.h5ad`.  Going via `RelativePathBuf` cleans up `..`
/// segments, and anything that would still land outside the root is treated as not existing, primarily as a measure
/// to detect bugs.
#[derive(Debug)]
pub struct FilesystemResolver {
    root_path: PathBuf,
}

impl FilesystemResolver {
    pub fn new(root_path: impl Into<PathBuf>) -> FilesystemResolver {
        FilesystemResolver {
            root_path: root_path.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_path
    }
}

impl LocationResolver for FilesystemResolver {
    fn resolve(&self, location: &Location) -> Option<ResolvedLocation> {
        let relative = relative_path::RelativePath::new(location.as_str());
        let absolute = relative.to_logical_path(&self.root_path);
        if !absolute.starts_with(&self.root_path) {
            tracing::debug!(location = %location, "location is outside the data root");
            return None;
        }
        Some(ResolvedLocation::new(location.clone(), absolute))
    }

    fn exists(&self, location: &ResolvedLocation) -> bool {
        location.path().exists()
    }
}
