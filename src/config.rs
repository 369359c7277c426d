//! Per-deployment kernel configuration.
//!
//! Requantization constants are derived for one specific rounding regime, so the
//! regime travels with every call instead of being a global build switch.

use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub const ROUNDING_ENV: &str = "QCONV_ROUNDING";
pub const BACKEND_ENV: &str = "QCONV_BACKEND";

/// Fixed-point rounding regime used by the requantization primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum RoundingMode {
    /// Rounding doubling high multiply followed by a rounding right shift.
    #[default]
    Double,
    /// One fused round-half-up step on the widened product.
    Single,
}

/// Batch-arithmetic strategy for the inner dot products.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Backend {
    Scalar,
    #[default]
    Unrolled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseConfigError(String);

impl fmt::Display for ParseConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized config value '{}'", self.0)
    }
}

impl std::error::Error for ParseConfigError {}

impl FromStr for RoundingMode {
    type Err = ParseConfigError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "double" | "double-rounding" => Ok(RoundingMode::Double),
            "single" | "single-rounding" => Ok(RoundingMode::Single),
            other => Err(ParseConfigError(other.to_string())),
        }
    }
}

impl FromStr for Backend {
    type Err = ParseConfigError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scalar" => Ok(Backend::Scalar),
            "unrolled" | "lanes" => Ok(Backend::Unrolled),
            other => Err(ParseConfigError(other.to_string())),
        }
    }
}

impl fmt::Display for RoundingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundingMode::Double => f.write_str("double"),
            RoundingMode::Single => f.write_str("single"),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Scalar => f.write_str("scalar"),
            Backend::Unrolled => f.write_str("unrolled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct KernelConfig {
    pub rounding: RoundingMode,
    pub backend: Backend,
}

impl KernelConfig {
    pub fn new(rounding: RoundingMode, backend: Backend) -> Self {
        Self { rounding, backend }
    }

    pub fn with_rounding(mut self, rounding: RoundingMode) -> Self {
        self.rounding = rounding;
        self
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Reads `QCONV_ROUNDING` / `QCONV_BACKEND`, keeping defaults for unset or bad values.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let mut cfg = KernelConfig::default();
        if let Some(raw) = lookup(ROUNDING_ENV) {
            match raw.parse() {
                Ok(mode) => cfg.rounding = mode,
                Err(e) => log::warn!("{}: {}, using {}", ROUNDING_ENV, e, cfg.rounding),
            }
        }
        if let Some(raw) = lookup(BACKEND_ENV) {
            match raw.parse() {
                Ok(backend) => cfg.backend = backend,
                Err(e) => log::warn!("{}: {}, using {}", BACKEND_ENV, e, cfg.backend),
            }
        }
        cfg
    }
}
