//! Distribution catalogue and the statrs bridge.
//!
//! Every family is parameterized by its mean and standard deviation and
//! converted to the native statrs parameterization by moment matching.

use std::fmt;
use std::str::FromStr;

use statrs::distribution::{Beta, Continuous, Gamma, InverseGamma, Normal, Uniform};

const SQRT_3: f64 = 1.732_050_807_568_877_2;

/// Distribution families available to priors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DistKind {
    /// Gaussian on the real line.
    Normal,
    /// Beta on the unit interval.
    Beta,
    /// Gamma on the positive half-line.
    Gamma,
    /// Inverse gamma on the positive half-line.
    InvGamma,
    /// Uniform on `mean ± √3·std`.
    Uniform,
}

impl DistKind {
    /// Canonical tag used when writing specs back out.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Beta => "beta",
            Self::Gamma => "gamma",
            Self::InvGamma => "inv_gamma",
            Self::Uniform => "uniform",
        }
    }
}

impl fmt::Display for DistKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for DistKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" | "gaussian" => Ok(Self::Normal),
            "beta" => Ok(Self::Beta),
            "gamma" => Ok(Self::Gamma),
            "inv_gamma" | "invgamma" | "inverse_gamma" => Ok(Self::InvGamma),
            "uniform" => Ok(Self::Uniform),
            other => Err(other.to_string()),
        }
    }
}

/// A frozen statrs distribution.
#[derive(Debug, Clone)]
pub enum PriorDist {
    /// Gaussian.
    Normal(Normal),
    /// Beta.
    Beta(Beta),
    /// Gamma (shape, rate).
    Gamma(Gamma),
    /// Inverse gamma (shape, rate).
    InvGamma(InverseGamma),
    /// Uniform (min, max).
    Uniform(Uniform),
}

impl PriorDist {
    /// Builds a distribution of the given family with the requested moments.
    ///
    /// Returns a human readable reason when the moments are not attainable.
    pub fn from_moments(kind: DistKind, mean: f64, std: f64) -> Result<Self, String> {
        if !mean.is_finite() {
            return Err(format!("mean must be finite, got {mean}"));
        }
        if !std.is_finite() || std <= 0.0 {
            return Err(format!("std must be finite and positive, got {std}"));
        }
        let var = std * std;

        match kind {
            DistKind::Normal => Normal::new(mean, std)
                .map(Self::Normal)
                .map_err(|e| e.to_string()),
            DistKind::Beta => {
                if mean <= 0.0 || mean >= 1.0 {
                    return Err(format!("beta mean must lie in (0, 1), got {mean}"));
                }
                let kappa = mean * (1.0 - mean) / var - 1.0;
                if kappa <= 0.0 {
                    return Err(format!(
                        "beta std {std} too large for mean {mean}"
                    ));
                }
                Beta::new(mean * kappa, (1.0 - mean) * kappa)
                    .map(Self::Beta)
                    .map_err(|e| e.to_string())
            }
            DistKind::Gamma => {
                if mean <= 0.0 {
                    return Err(format!("gamma mean must be positive, got {mean}"));
                }
                Gamma::new(mean * mean / var, mean / var)
                    .map(Self::Gamma)
                    .map_err(|e| e.to_string())
            }
            DistKind::InvGamma => {
                if mean <= 0.0 {
                    return Err(format!("inverse gamma mean must be positive, got {mean}"));
                }
                let shape = mean * mean / var + 2.0;
                InverseGamma::new(shape, mean * (shape - 1.0))
                    .map(Self::InvGamma)
                    .map_err(|e| e.to_string())
            }
            DistKind::Uniform => Uniform::new(mean - SQRT_3 * std, mean + SQRT_3 * std)
                .map(Self::Uniform)
                .map_err(|e| e.to_string()),
        }
    }

    /// Returns the family of this distribution.
    pub fn kind(&self) -> DistKind {
        match self {
            Self::Normal(_) => DistKind::Normal,
            Self::Beta(_) => DistKind::Beta,
            Self::Gamma(_) => DistKind::Gamma,
            Self::InvGamma(_) => DistKind::InvGamma,
            Self::Uniform(_) => DistKind::Uniform,
        }
    }

    /// Natural support `(lower, upper)` of the distribution.
    pub fn support(&self) -> (f64, f64) {
        match self {
            Self::Normal(_) => (f64::NEG_INFINITY, f64::INFINITY),
            Self::Beta(_) => (0.0, 1.0),
            Self::Gamma(_) | Self::InvGamma(_) => (0.0, f64::INFINITY),
            Self::Uniform(u) => {
                use statrs::statistics::{Max, Min};
                (u.min(), u.max())
            }
        }
    }

    /// Log-density at `x`. NaN results are reported as `-inf`.
    pub fn ln_pdf(&self, x: f64) -> f64 {
        let lp = match self {
            Self::Normal(d) => d.ln_pdf(x),
            Self::Beta(d) => d.ln_pdf(x),
            Self::Gamma(d) => d.ln_pdf(x),
            Self::InvGamma(d) => d.ln_pdf(x),
            Self::Uniform(d) => d.ln_pdf(x),
        };
        if lp.is_nan() { f64::NEG_INFINITY } else { lp }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use statrs::statistics::Distribution;

    #[test]
    fn kind_parses_aliases() {
        assert_eq!("Normal".parse::<DistKind>(), Ok(DistKind::Normal));
        assert_eq!("inverse_gamma".parse::<DistKind>(), Ok(DistKind::InvGamma));
        assert_eq!("invgamma".parse::<DistKind>(), Ok(DistKind::InvGamma));
        assert_eq!("cauchy".parse::<DistKind>(), Err("cauchy".to_string()));
    }

    #[test]
    fn beta_moments_match() {
        let d = PriorDist::from_moments(DistKind::Beta, 0.5, 0.2).unwrap();
        let PriorDist::Beta(beta) = d else {
            panic!("expected beta");
        };
        assert_abs_diff_eq!(beta.mean().unwrap(), 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(beta.std_dev().unwrap(), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn gamma_moments_match() {
        let d = PriorDist::from_moments(DistKind::Gamma, 2.0, 0.5).unwrap();
        let PriorDist::Gamma(gamma) = d else {
            panic!("expected gamma");
        };
        assert_abs_diff_eq!(gamma.mean().unwrap(), 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(gamma.std_dev().unwrap(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn inv_gamma_moments_match() {
        let d = PriorDist::from_moments(DistKind::InvGamma, 0.1, 0.25).unwrap();
        let PriorDist::InvGamma(ig) = d else {
            panic!("expected inverse gamma");
        };
        assert_abs_diff_eq!(ig.mean().unwrap(), 0.1, epsilon = 1e-12);
    }

    #[test]
    fn uniform_support_from_moments() {
        let d = PriorDist::from_moments(DistKind::Uniform, 0.0, 1.0).unwrap();
        let (lo, hi) = d.support();
        assert_abs_diff_eq!(lo, -SQRT_3, epsilon = 1e-12);
        assert_abs_diff_eq!(hi, SQRT_3, epsilon = 1e-12);
        assert_abs_diff_eq!(d.ln_pdf(0.0), -(2.0 * SQRT_3).ln(), epsilon = 1e-12);
    }

    #[test]
    fn beta_rejects_infeasible_moments() {
        assert!(PriorDist::from_moments(DistKind::Beta, 1.5, 0.1).is_err());
        assert!(PriorDist::from_moments(DistKind::Beta, 0.5, 0.6).is_err());
    }

    #[test]
    fn non_positive_std_rejected() {
        assert!(PriorDist::from_moments(DistKind::Normal, 0.0, 0.0).is_err());
        assert!(PriorDist::from_moments(DistKind::Normal, 0.0, f64::NAN).is_err());
    }

    #[test]
    fn normal_ln_pdf() {
        let d = PriorDist::from_moments(DistKind::Normal, 1.0, 2.0).unwrap();
        let expected = -0.5 * (2.0 * std::f64::consts::PI).ln() - 2.0_f64.ln();
        assert_abs_diff_eq!(d.ln_pdf(1.0), expected, epsilon = 1e-12);
    }
}
