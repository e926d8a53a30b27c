//! Filter kinds and their capability table.

use std::fmt;
use std::str::FromStr;

use crate::error::FilterError;

/// Default ensemble size for [`FilterKind::Ensemble`].
pub const DEFAULT_ENSEMBLE_MEMBERS: usize = 500;

/// Default particle count for the particle kinds.
pub const DEFAULT_PARTICLES: usize = 10_000;

/// Filter family; behaviour of the filter runner is selected per family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterFamily {
    /// Exact linear-Gaussian filter.
    Kalman,
    /// Ensemble (TEnKF-type) filter.
    Ensemble,
    /// Particle filter with resampling.
    Particle,
}

/// The filter variants a session can bind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FilterKind {
    /// Linear Kalman filter.
    Kalman,
    /// Transposed-ensemble Kalman filter.
    #[default]
    Ensemble,
    /// Particle filter, bootstrap proposal.
    ParticleBootstrap,
    /// Particle filter, auxiliary bootstrap proposal.
    ParticleAuxiliary,
}

/// Static properties of a [`FilterKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Whether the filter needs the linearized system.
    pub requires_linear: bool,
    /// Member count used when none is requested; `None` for Kalman.
    pub default_members: Option<usize>,
    /// Whether the auxiliary resampling scheme applies.
    pub supports_auxiliary: bool,
}

impl FilterKind {
    /// All kinds, in declaration order.
    pub const ALL: [FilterKind; 4] = [
        FilterKind::Kalman,
        FilterKind::Ensemble,
        FilterKind::ParticleBootstrap,
        FilterKind::ParticleAuxiliary,
    ];

    /// Capability table.
    ///
    /// | Kind | requires_linear | default_members | supports_auxiliary |
    /// |------|-----------------|-----------------|--------------------|
    /// | Kalman | true | none | false |
    /// | Ensemble | false | 500 | false |
    /// | ParticleBootstrap | false | 10000 | true |
    /// | ParticleAuxiliary | false | 10000 | true |
    pub const fn capabilities(&self) -> Capabilities {
        match self {
            Self::Kalman => Capabilities {
                requires_linear: true,
                default_members: None,
                supports_auxiliary: false,
            },
            Self::Ensemble => Capabilities {
                requires_linear: false,
                default_members: Some(DEFAULT_ENSEMBLE_MEMBERS),
                supports_auxiliary: false,
            },
            Self::ParticleBootstrap | Self::ParticleAuxiliary => Capabilities {
                requires_linear: false,
                default_members: Some(DEFAULT_PARTICLES),
                supports_auxiliary: true,
            },
        }
    }

    /// Family this kind belongs to.
    pub const fn family(&self) -> FilterFamily {
        match self {
            Self::Kalman => FilterFamily::Kalman,
            Self::Ensemble => FilterFamily::Ensemble,
            Self::ParticleBootstrap | Self::ParticleAuxiliary => FilterFamily::Particle,
        }
    }

    /// Shorthand for `capabilities().requires_linear`.
    pub const fn requires_linear(&self) -> bool {
        self.capabilities().requires_linear
    }

    /// Whether this kind uses the auxiliary resampling scheme.
    pub const fn is_auxiliary(&self) -> bool {
        matches!(self, Self::ParticleAuxiliary)
    }

    /// Member count to use: the request if given, else the kind's default.
    /// Kalman filters have no members and always yield `None`.
    pub fn resolve_members(&self, requested: Option<usize>) -> Option<usize> {
        let default = self.capabilities().default_members?;
        Some(requested.unwrap_or(default))
    }

    /// Tag stored alongside session configuration.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Kalman => "KalmanFilter",
            Self::Ensemble => "TEnKF",
            Self::ParticleBootstrap => "ParticleFilter",
            Self::ParticleAuxiliary => "AuxiliaryParticleFilter",
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FilterKind {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "KF" | "KalmanFilter" | "kalman" => Ok(Self::Kalman),
            "TEnKF" | "EnKF" | "Ensemble" | "ensemble" => Ok(Self::Ensemble),
            "PF" | "ParticleFilter" | "particle" => Ok(Self::ParticleBootstrap),
            "APF" | "AuxiliaryParticleFilter" | "auxiliary" => Ok(Self::ParticleAuxiliary),
            other => Err(FilterError::UnknownKind(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_ensemble() {
        assert_eq!(FilterKind::default(), FilterKind::Ensemble);
    }

    #[test]
    fn member_defaults() {
        assert_eq!(FilterKind::Kalman.resolve_members(None), None);
        assert_eq!(FilterKind::Kalman.resolve_members(Some(50)), None);
        assert_eq!(FilterKind::Ensemble.resolve_members(None), Some(500));
        assert_eq!(FilterKind::Ensemble.resolve_members(Some(300)), Some(300));
        assert_eq!(FilterKind::ParticleBootstrap.resolve_members(None), Some(10_000));
        assert_eq!(FilterKind::ParticleAuxiliary.resolve_members(None), Some(10_000));
    }

    #[test]
    fn only_kalman_requires_linear() {
        for kind in FilterKind::ALL {
            assert_eq!(kind.requires_linear(), kind == FilterKind::Kalman);
        }
    }

    #[test]
    fn families() {
        assert_eq!(FilterKind::Kalman.family(), FilterFamily::Kalman);
        assert_eq!(FilterKind::Ensemble.family(), FilterFamily::Ensemble);
        assert_eq!(FilterKind::ParticleBootstrap.family(), FilterFamily::Particle);
        assert_eq!(FilterKind::ParticleAuxiliary.family(), FilterFamily::Particle);
        assert!(FilterKind::ParticleAuxiliary.is_auxiliary());
        assert!(!FilterKind::ParticleBootstrap.is_auxiliary());
    }

    #[test]
    fn parse_tags() {
        assert_eq!("KF".parse::<FilterKind>().unwrap(), FilterKind::Kalman);
        assert_eq!("TEnKF".parse::<FilterKind>().unwrap(), FilterKind::Ensemble);
        assert_eq!("PF".parse::<FilterKind>().unwrap(), FilterKind::ParticleBootstrap);
        assert_eq!("APF".parse::<FilterKind>().unwrap(), FilterKind::ParticleAuxiliary);
        assert!(matches!(
            "UKF".parse::<FilterKind>(),
            Err(FilterError::UnknownKind(s)) if s == "UKF"
        ));
    }

    #[test]
    fn name_round_trips() {
        for kind in FilterKind::ALL {
            assert_eq!(kind.name().parse::<FilterKind>().unwrap(), kind);
        }
    }
}
