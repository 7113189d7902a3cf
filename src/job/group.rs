//! Hierarchical job group paths and the occupancy registry deciding which
//! jobs may run concurrently.
//!
//! Two paths conflict iff one is a prefix of the other (equality included).
//! This is deliberately not set membership: `["a"]` conflicts with
//! `["a","b"]` even though neither contains the other verbatim.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered sequence of segments identifying a job's exclusion group, e.g.
/// `extension/install/wiki:demo`. Immutable value type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobGroupPath {
    segments: Vec<String>,
}

impl JobGroupPath {
    pub fn new(segments: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// A new path with one more trailing segment.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// True when `self` is a (possibly equal) leading prefix of `other`.
    pub fn is_prefix_of(&self, other: &JobGroupPath) -> bool {
        self.segments.len() <= other.segments.len()
            && self
                .segments
                .iter()
                .zip(other.segments.iter())
                .all(|(a, b)| a == b)
    }

    /// Prefix relationship in either direction.
    pub fn conflicts_with(&self, other: &JobGroupPath) -> bool {
        self.is_prefix_of(other) || other.is_prefix_of(self)
    }
}

impl fmt::Display for JobGroupPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

impl FromIterator<String> for JobGroupPath {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        Self {
            segments: iter.into_iter().collect(),
        }
    }
}

/// Tracks which group paths are currently occupied by running jobs. The
/// scheduler wraps this in its state mutex; the conflict scan is
/// O(paths x path length) and the only work done under that lock.
#[derive(Debug, Default)]
pub struct GroupPathRegistry {
    occupied: Vec<JobGroupPath>,
}

impl GroupPathRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `path` conflicts with any occupied path.
    pub fn conflicts(&self, path: &JobGroupPath) -> bool {
        self.occupied.iter().any(|p| p.conflicts_with(path))
    }

    /// Occupy `path` unless it conflicts. Returns whether it was taken.
    pub fn occupy(&mut self, path: &JobGroupPath) -> bool {
        if self.conflicts(path) {
            return false;
        }
        self.occupied.push(path.clone());
        true
    }

    /// Release a previously occupied path. Releasing a path that is not
    /// occupied is a no-op.
    pub fn release(&mut self, path: &JobGroupPath) {
        if let Some(position) = self.occupied.iter().position(|p| p == path) {
            self.occupied.swap_remove(position);
        }
    }

    pub fn occupied(&self) -> &[JobGroupPath] {
        &self.occupied
    }
}
