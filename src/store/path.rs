use std::fmt;

use super::error::{StoreError, StoreResult};

/// Slash separated address of a node inside the replicated tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct StorePath(Vec<String>);

impl StorePath {
    /// Path of the tree root.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse `a/b/c` into a path. Leading and trailing slashes are tolerated.
    pub fn parse(raw: &str) -> StoreResult<Self> {
        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }

        let segments = trimmed.split('/').map(str::to_owned).collect::<Vec<_>>();
        if segments.iter().any(|segment| !is_valid_segment(segment)) {
            return Err(StoreError::InvalidPath(raw.to_owned()));
        }

        Ok(Self(segments))
    }

    /// Append a single segment.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// Borrow the individual segments.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Whether this path is `other` or one of its ancestors.
    pub fn contains(&self, other: &StorePath) -> bool {
        other.0.starts_with(&self.0)
    }

    /// Whether a write at one path can change the value observed at the other.
    pub fn overlaps(&self, other: &StorePath) -> bool {
        self.contains(other) || other.contains(self)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0.join("/"))
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && !segment
            .chars()
            .any(|c| matches!(c, '.' | '#' | '$' | '[' | ']') || c.is_control())
}
