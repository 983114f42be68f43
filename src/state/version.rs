// State version counter
// Host-assigned, monotonically increasing; equality detects staleness

use std::fmt;

use serde::{Deserialize, Serialize};

/// Version stamped on replicated state after every accepted action.
///
/// Only the host assigns versions; clients adopt them from authoritative
/// broadcasts and claim `next()` when predicting optimistically. Two equal
/// versions from the same session always name the same state contents.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// Version of the initial, never-reduced state.
    pub const INITIAL: Version = Version(0);

    pub fn next(self) -> Version {
        Version(self.0 + 1)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}
