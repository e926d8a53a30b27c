//! Diagnostic verbosity levels.

use serde::{Deserialize, Serialize};

/// How much an operation reports through `tracing`.
///
/// | Level | Adds |
/// |-------|------|
/// | 0 | nothing |
/// | 1 | durations, failure messages |
/// | 2 | parameter dumps and bound checks on failure |
/// | 3 | per-sample vectors |
/// | 4 | backend diagnostics |
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Verbosity(u8);

impl Verbosity {
    /// Level 0.
    pub const SILENT: Self = Self(0);
    /// Level 4.
    pub const MAX: Self = Self(4);

    /// Creates a level, clamped to [`Verbosity::MAX`].
    pub fn new(level: u8) -> Self {
        Self(level.min(Self::MAX.0))
    }

    /// Numeric level.
    pub fn level(self) -> u8 {
        self.0
    }

    /// Whether the level is at least `level`.
    pub fn at_least(self, level: u8) -> bool {
        self.0 >= level
    }

    /// Whether nothing is reported.
    pub fn is_silent(self) -> bool {
        self.0 == 0
    }
}

impl From<u8> for Verbosity {
    fn from(level: u8) -> Self {
        Self::new(level)
    }
}

impl From<bool> for Verbosity {
    fn from(verbose: bool) -> Self {
        Self(u8::from(verbose))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_to_max() {
        assert_eq!(Verbosity::new(9), Verbosity::MAX);
        assert_eq!(Verbosity::new(2).level(), 2);
    }

    #[test]
    fn gating() {
        let v = Verbosity::new(2);
        assert!(v.at_least(1));
        assert!(v.at_least(2));
        assert!(!v.at_least(3));
        assert!(Verbosity::default().is_silent());
        assert_eq!(Verbosity::from(true), Verbosity::new(1));
    }
}
