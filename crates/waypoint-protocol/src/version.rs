//! Protocol versioning for Waypoint.

use serde::{Deserialize, Serialize};

/// Current protocol version, announced in the `connected` event.
pub const PROTOCOL_VERSION: Version = Version { major: 1, minor: 0 };

/// Protocol version information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Incremented when event names or payload shapes change incompatibly.
    pub major: u8,
    /// Incremented for additive changes (new optional fields, new events).
    pub minor: u8,
}

impl Version {
    /// Create a new version.
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Versions are compatible if they share the same major version.
    #[must_use]
    pub fn is_compatible_with(&self, other: &Version) -> bool {
        self.major == other.major
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl Default for Version {
    fn default() -> Self {
        PROTOCOL_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_compatibility() {
        let current = PROTOCOL_VERSION;
        assert!(current.is_compatible_with(&Version::new(1, 3)));
        assert!(!current.is_compatible_with(&Version::new(2, 0)));
    }

    #[test]
    fn test_version_display() {
        assert_eq!(PROTOCOL_VERSION.to_string(), "1.0");
    }
}
