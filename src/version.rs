//! Extension version model: parsing, total ordering, stability classes, and
//! the constraint algebra used to detect irreconcilable requirements.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Stability class derived from a version's qualifier.
///
/// Used when two otherwise-equal versions must be ranked: a snapshot of `2.0`
/// precedes the `2.0` milestone, which precedes the `2.0` release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionKind {
    Snapshot,
    Milestone,
    Release,
}

/// An extension version.
///
/// Parsed from a dotted numeric string with an optional qualifier, e.g.
/// `1.2.3`, `2.0-milestone-1`, `3.1-SNAPSHOT`. Parsing never fails: segments
/// that are not numeric become part of the qualifier. Ordering is total and
/// consistent with equality; trailing zero segments are insignificant
/// (`1.0` == `1.0.0`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct Version {
    raw: String,
    segments: Vec<u64>,
    qualifier: Option<String>,
}

impl Version {
    pub fn new(value: impl Into<String>) -> Self {
        let raw = value.into();
        let (number_part, qualifier) = match raw.split_once('-') {
            Some((head, tail)) => (head, Some(tail.to_string())),
            None => (raw.as_str(), None),
        };

        let mut segments = Vec::new();
        let mut overflow_qualifier = None;
        for (index, piece) in number_part.split('.').enumerate() {
            match piece.parse::<u64>() {
                Ok(n) => segments.push(n),
                Err(_) => {
                    // Everything from the first non-numeric segment on is
                    // treated as qualifier text.
                    let rest = number_part.splitn(index + 1, '.').last().unwrap_or(piece);
                    overflow_qualifier = Some(rest.to_string());
                    break;
                }
            }
        }

        let qualifier = match (overflow_qualifier, qualifier) {
            (Some(a), Some(b)) => Some(format!("{a}-{b}")),
            (Some(a), None) => Some(a),
            (None, q) => q,
        };

        Self {
            raw,
            segments,
            qualifier: qualifier.filter(|q| !q.is_empty()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Stability class of this version, derived from its qualifier.
    pub fn kind(&self) -> VersionKind {
        let Some(qualifier) = &self.qualifier else {
            return VersionKind::Release;
        };
        let lower = qualifier.to_ascii_lowercase();
        if lower.contains("snapshot") {
            VersionKind::Snapshot
        } else if lower.starts_with("milestone")
            || lower.starts_with('m')
            || lower.starts_with("rc")
            || lower.starts_with("alpha")
            || lower.starts_with("beta")
        {
            VersionKind::Milestone
        } else {
            VersionKind::Release
        }
    }

    fn normalized_segments(&self) -> &[u64] {
        let mut end = self.segments.len();
        while end > 0 && self.segments[end - 1] == 0 {
            end -= 1;
        }
        &self.segments[..end]
    }

    fn normalized_qualifier(&self) -> Option<String> {
        self.qualifier.as_ref().map(|q| q.to_ascii_lowercase())
    }
}

impl From<String> for Version {
    fn from(value: String) -> Self {
        Version::new(value)
    }
}

impl From<Version> for String {
    fn from(value: Version) -> Self {
        value.raw
    }
}

impl From<&str> for Version {
    fn from(value: &str) -> Self {
        Version::new(value)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized_segments().hash(state);
        self.normalized_qualifier().hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let a = self.normalized_segments();
        let b = other.normalized_segments();
        let len = a.len().max(b.len());
        for i in 0..len {
            let left = a.get(i).copied().unwrap_or(0);
            let right = b.get(i).copied().unwrap_or(0);
            match left.cmp(&right) {
                Ordering::Equal => {}
                ordering => return ordering,
            }
        }

        // Same numeric value: an unqualified version outranks any qualified
        // one, otherwise rank by stability class then lexicographically.
        match (self.normalized_qualifier(), other.normalized_qualifier()) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(qa), Some(qb)) => self
                .kind()
                .cmp(&other.kind())
                .then_with(|| qa.cmp(&qb)),
        }
    }
}

/// A requirement placed on an extension's version by a target or a dependency
/// declaration. Constraints intersect; an empty intersection means the
/// requirements are irreconcilable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionConstraint {
    Any,
    Exact(Version),
    AtLeast(Version),
}

impl VersionConstraint {
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            VersionConstraint::Any => true,
            VersionConstraint::Exact(v) => v == version,
            VersionConstraint::AtLeast(v) => version >= v,
        }
    }

    /// Intersect two constraints. `None` means no version can satisfy both.
    pub fn merge(&self, other: &VersionConstraint) -> Option<VersionConstraint> {
        use VersionConstraint::*;
        match (self, other) {
            (Any, c) | (c, Any) => Some(c.clone()),
            (Exact(a), Exact(b)) => (a == b).then(|| Exact(a.clone())),
            (Exact(a), AtLeast(b)) | (AtLeast(b), Exact(a)) => {
                (a >= b).then(|| Exact(a.clone()))
            }
            (AtLeast(a), AtLeast(b)) => Some(AtLeast(a.max(b).clone())),
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionConstraint::Any => f.write_str("*"),
            VersionConstraint::Exact(v) => write!(f, "={v}"),
            VersionConstraint::AtLeast(v) => write!(f, ">={v}"),
        }
    }
}

/// Identity of a versioned extension. Value-equal by (id, version).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExtensionId {
    pub id: String,
    pub version: Version,
}

impl ExtensionId {
    pub fn new(id: impl Into<String>, version: impl Into<Version>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
        }
    }

    /// Parse the `id@version` notation used in requests and tests.
    pub fn parse(value: &str) -> Option<Self> {
        let (id, version) = value.split_once('@')?;
        if id.is_empty() || version.is_empty() {
            return None;
        }
        Some(Self::new(id, version))
    }
}

impl fmt::Display for ExtensionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.version)
    }
}
