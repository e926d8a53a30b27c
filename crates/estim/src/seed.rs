//! Seed policies for posterior evaluation.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::EstimError;

/// Seeds are folded into `[0, 2^32 - 1)`.
const SEED_MODULUS: u64 = (1 << 32) - 1;

/// Upper bound (exclusive) of the random offset added by [`SeedPolicy::Rand`].
const RAND_OFFSET_MAX: u64 = (1 << 32) - 2;

/// Number of leading significant digits each coordinate contributes.
const SEED_DIGITS: i32 = 10;

/// How `lprob` chooses the seed of a likelihood evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedPolicy {
    /// The session seed; repeated calls are bit-identical.
    #[default]
    Set,
    /// Derived from the parameter values; equal vectors share a seed.
    Vec,
    /// As `Vec` plus a random offset; repeated calls are decorrelated.
    Rand,
}

impl SeedPolicy {
    /// Seed for evaluating `par` under this policy.
    pub fn resolve(self, par: &[f64], session_seed: u64) -> u64 {
        match self {
            Self::Set => session_seed,
            Self::Vec => seed_from_parameters(par),
            Self::Rand => {
                let offset = rand::rng().random_range(0..RAND_OFFSET_MAX);
                (seed_from_parameters(par) + offset) % SEED_MODULUS
            }
        }
    }
}

impl fmt::Display for SeedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Set => "set",
            Self::Vec => "vec",
            Self::Rand => "rand",
        })
    }
}

impl FromStr for SeedPolicy {
    type Err = EstimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "set" => Ok(Self::Set),
            "vec" => Ok(Self::Vec),
            "rand" => Ok(Self::Rand),
            _ => Err(EstimError::UnknownSeedPolicy(s.to_string())),
        }
    }
}

/// Deterministic seed from the leading digits of each coordinate.
///
/// Every coordinate is scaled so that its ten leading significant digits
/// form an integer; the sum is folded into `[0, 2^32 - 1)`. Zero and
/// non-finite coordinates contribute nothing.
pub fn seed_from_parameters(par: &[f64]) -> u64 {
    let modulus = i128::from(SEED_MODULUS);
    let sum: i128 = par
        .iter()
        .map(|&p| leading_digits(p).rem_euclid(modulus))
        .sum();
    sum.rem_euclid(modulus) as u64
}

fn leading_digits(p: f64) -> i128 {
    if p == 0.0 || !p.is_finite() {
        return 0;
    }
    let shift = (SEED_DIGITS - 1) - p.abs().log10() as i32;
    // Two half steps keep 10^shift finite for subnormal coordinates.
    let half = shift / 2;
    let scaled = p * 10f64.powi(half) * 10f64.powi(shift - half);
    if scaled.is_finite() {
        scaled.floor() as i128
    } else {
        0
    }
}
