//! Keys for the cache.
//!
//! A [Location] is whatever the caller uses to name a dataset, and is the key of the cache table.  A
//! [LocationResolver](crate::LocationResolver) turns it into a [ResolvedLocation], which is what adaptors actually
//! open.
use std::fmt;
use std::path::{Path, PathBuf};

/// An opaque, comparable name for a dataset.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Location(String);

impl Location {
    pub fn new(location: impl Into<String>) -> Location {
        Location(location.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Location {
    fn from(location: &str) -> Location {
        Location::new(location)
    }
}

impl From<String> for Location {
    fn from(location: String) -> Location {
        Location(location)
    }
}

impl AsRef<str> for Location {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A [Location] bound to the concrete path the resolver found for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedLocation {
    location: Location,
    path: PathBuf,
}

impl ResolvedLocation {
    pub fn new(location: Location, path: impl Into<PathBuf>) -> ResolvedLocation {
        ResolvedLocation {
            location,
            path: path.into(),
        }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The path as text, which is what format detection looks at.
    pub fn path_text(&self) -> std::borrow::Cow<'_, str> {
        self.path.to_string_lossy()
    }
}

impl fmt::Display for ResolvedLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}
