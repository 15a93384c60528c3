//! Request and unit identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one logical generation request (UUID v4).
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Create a new random RequestId
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an existing identifier (for callers that mint their own ids)
    pub fn from_raw(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, used in log lines and file names
    pub fn short(&self) -> &str {
        let end = self.0.len().min(8);
        &self.0[..end]
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({})", self.0)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a unit, unique within its request.
///
/// Labels follow the unit's role: `scene-003`, `variation-01`, `upscale-0`.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    pub fn scene(index: usize) -> Self {
        Self(format!("scene-{:03}", index))
    }

    pub fn variation(index: usize) -> Self {
        Self(format!("variation-{:02}", index))
    }

    pub fn upscale(index: usize) -> Self {
        Self(format!("upscale-{}", index))
    }

    pub fn from_raw(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnitId({})", self.0)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_unique() {
        let a = RequestId::new();
        let b = RequestId::new();
        assert_ne!(a, b);
        assert_eq!(a.short().len(), 8);
    }

    #[test]
    fn test_unit_labels() {
        assert_eq!(UnitId::scene(3).as_str(), "scene-003");
        assert_eq!(UnitId::variation(1).as_str(), "variation-01");
        assert_eq!(UnitId::upscale(0).as_str(), "upscale-0");
    }

    #[test]
    fn test_short_on_raw_id() {
        let id = RequestId::from_raw("abc");
        assert_eq!(id.short(), "abc");
    }
}
