//! Normalized cloud paths.
//!
//! Every lock, dependency node and task in this crate is keyed by a
//! [`CloudPath`]. Paths are always absolute and `/`-separated regardless of
//! the host OS; equality and hashing use the normalized form, so
//! `"/a//b/"`, `"a/b"` and `"/a/./b"` all name the same item. A `..` at
//! the root stays at the root.

use relative_path::{Component, RelativePath, RelativePathBuf};
use std::fmt;

/// Absolute, normalized path of an item in the cloud namespace.
///
/// # Examples
///
/// ```
/// use oxcrypt_sync::path::CloudPath;
///
/// let path = CloudPath::new("/Documents/report.txt");
/// assert_eq!(path.file_name(), Some("report.txt"));
/// assert_eq!(path.parent().unwrap(), CloudPath::new("/Documents"));
/// assert_eq!(path.to_string(), "/Documents/report.txt");
///
/// // Redundant separators and trailing slashes are normalized away
/// assert_eq!(path, CloudPath::new("Documents//report.txt/"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CloudPath(RelativePathBuf);

impl CloudPath {
    /// The root path (`/`).
    #[inline]
    pub fn root() -> Self {
        CloudPath(RelativePathBuf::new())
    }

    /// Create a new cloud path from a string.
    ///
    /// Leading slashes are optional; `.` and `..` components are resolved and
    /// empty components are dropped. `..` never climbs above the root.
    pub fn new(path: impl AsRef<str>) -> Self {
        let trimmed = path.as_ref().trim_start_matches('/');
        CloudPath(clamp_to_root(&RelativePath::new(trimmed).normalize()))
    }

    /// Check if this is the root path.
    #[inline]
    pub fn is_root(&self) -> bool {
        self.0.as_str().is_empty()
    }

    /// The normalized path relative to the root, without a leading slash.
    #[inline]
    pub fn as_relative_str(&self) -> &str {
        self.0.as_str()
    }

    /// Number of components below the root. The root has depth 0.
    pub fn depth(&self) -> usize {
        self.0.components().count()
    }

    /// Join this path with another component.
    pub fn join(&self, component: impl AsRef<str>) -> Self {
        let component = component.as_ref().trim_start_matches('/');
        CloudPath(clamp_to_root(&self.0.join_normalized(component)))
    }

    /// Get the parent path, if any.
    ///
    /// Returns `None` for the root path.
    pub fn parent(&self) -> Option<CloudPath> {
        if self.is_root() {
            return None;
        }
        self.0.parent().map(|p| CloudPath(p.to_relative_path_buf()))
    }

    /// Get the final component of this path.
    ///
    /// Returns `None` for the root path.
    pub fn file_name(&self) -> Option<&str> {
        self.0.file_name()
    }

    /// Replace the final component, producing a sibling path.
    ///
    /// For the root path this is equivalent to [`join`](Self::join).
    pub fn with_file_name(&self, name: impl AsRef<str>) -> Self {
        match self.parent() {
            Some(parent) => parent.join(name),
            None => self.join(name),
        }
    }

    /// All paths from the root down to and including this path.
    ///
    /// ```
    /// use oxcrypt_sync::path::CloudPath;
    ///
    /// let partial: Vec<String> = CloudPath::new("/a/b/c.txt")
    ///     .partial_paths()
    ///     .iter()
    ///     .map(ToString::to_string)
    ///     .collect();
    /// assert_eq!(partial, ["/", "/a", "/a/b", "/a/b/c.txt"]);
    /// ```
    pub fn partial_paths(&self) -> Vec<CloudPath> {
        let mut paths = Vec::with_capacity(self.depth() + 1);
        let mut current = CloudPath::root();
        paths.push(current.clone());
        for component in self.0.components() {
            current = current.join(component.as_str());
            paths.push(current.clone());
        }
        paths
    }

    /// Strict ancestors of this path, root first. Empty for the root.
    pub fn ancestors(&self) -> Vec<CloudPath> {
        let mut paths = self.partial_paths();
        paths.pop();
        paths
    }

    /// Whether `self` is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &CloudPath) -> bool {
        if self.depth() >= other.depth() {
            return false;
        }
        self.0
            .components()
            .zip(other.0.components())
            .all(|(a, b)| a == b)
    }
}

/// Drop the leading `..` components `normalize` leaves behind.
fn clamp_to_root(normalized: &RelativePath) -> RelativePathBuf {
    let mut clamped = RelativePathBuf::new();
    for component in normalized.components().skip_while(|c| *c == Component::ParentDir) {
        clamped.push(component.as_str());
    }
    clamped
}

impl Default for CloudPath {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Display for CloudPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

impl From<&str> for CloudPath {
    fn from(s: &str) -> Self {
        CloudPath::new(s)
    }
}

impl From<String> for CloudPath {
    fn from(s: String) -> Self {
        CloudPath::new(s)
    }
}
