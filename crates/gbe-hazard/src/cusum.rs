#![forbid(unsafe_code)]

//! Two-sided CUSUM change-point detector over a centered scalar stream.
//!
//! # Mathematical Model
//!
//! The caller subtracts the expected baseline before feeding an observation,
//! so `x > 0` reads as stress and `x < 0` as calm. Two accumulators are kept:
//!
//! ```text
//! g⁺_t = max(0, g⁺_{t-1} + x_t − k)   // stress
//! g⁻_t = max(0, g⁻_{t-1} − x_t − k)   // calm
//! ```
//!
//! where `k` is the slack. The stress side is checked first: if `g⁺ > h`
//! both accumulators are zeroed and [`Signal::Stress`] is returned; otherwise
//! if `g⁻ > h` both are zeroed and [`Signal::Calm`] is returned.
//!
//! # Invariants
//!
//! 1. `g⁺ >= 0` and `g⁻ >= 0` after every step.
//! 2. Both accumulators are exactly 0 right after a non-`NoChange` signal.
//! 3. For constant input `c > k`, `g⁺` strictly increases until it fires.
//!
//! Non-finite input is the caller's responsibility; no sanitation happens here.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Immutable detector parameters.
///
/// Copied into each detector at construction and never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CusumParams {
    /// Slack `k`. Smaller is more sensitive. Default: 0.15.
    pub slack: f64,
    /// Trigger level `h`. Default: 2.0.
    pub threshold: f64,
    /// Bias increase on stress. Default: 2.0.
    pub bump_up: f64,
    /// Bias decrease on calm. Default: 1.0.
    pub bump_down: f64,
    /// Lower clamp for the bias. Default: 5.0.
    pub min_bias: f64,
    /// Upper clamp for the bias. Default: 45.0.
    pub max_bias: f64,
}

impl Default for CusumParams {
    fn default() -> Self {
        Self {
            slack: 0.15,
            threshold: 2.0,
            bump_up: 2.0,
            bump_down: 1.0,
            min_bias: 5.0,
            max_bias: 45.0,
        }
    }
}

impl CusumParams {
    /// Reject non-finite values, non-positive `slack`/`threshold`, negative
    /// bumps and inverted clamp bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("slack", self.slack),
            ("threshold", self.threshold),
            ("bump_up", self.bump_up),
            ("bump_down", self.bump_down),
            ("min_bias", self.min_bias),
            ("max_bias", self.max_bias),
        ];
        for (field, value) in fields {
            if !value.is_finite() {
                return Err(ConfigError::NonFinite { field, value });
            }
        }
        for (field, value) in [("slack", self.slack), ("threshold", self.threshold)] {
            if value <= 0.0 {
                return Err(ConfigError::NonPositive { field, value });
            }
        }
        for (field, value) in [("bump_up", self.bump_up), ("bump_down", self.bump_down)] {
            if value < 0.0 {
                return Err(ConfigError::Negative { field, value });
            }
        }
        if self.min_bias > self.max_bias {
            return Err(ConfigError::InvertedBounds {
                min: self.min_bias,
                max: self.max_bias,
            });
        }
        Ok(())
    }

    /// Clamp a bias value into `[min_bias, max_bias]`.
    #[inline]
    pub fn clamp_bias(&self, bias: f64) -> f64 {
        bias.clamp(self.min_bias, self.max_bias)
    }
}

/// Outcome of one detector step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    /// The stress accumulator crossed the threshold.
    Stress,
    /// The calm accumulator crossed the threshold.
    Calm,
    /// Neither accumulator crossed.
    NoChange,
}

impl Signal {
    /// `+1` for stress, `-1` for calm, `0` otherwise.
    #[inline]
    pub fn as_i8(self) -> i8 {
        match self {
            Signal::Stress => 1,
            Signal::Calm => -1,
            Signal::NoChange => 0,
        }
    }

    /// True for `Stress` or `Calm`.
    #[inline]
    pub fn is_change(self) -> bool {
        self != Signal::NoChange
    }
}

/// Running counters for one detector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CusumStats {
    /// Observations processed.
    pub steps: u64,
    /// `Stress` signals emitted.
    pub stress_events: u64,
    /// `Calm` signals emitted.
    pub calm_events: u64,
}

/// Two-sided CUSUM detector.
#[derive(Debug, Clone)]
pub struct Cusum {
    params: CusumParams,
    gp: f64,
    gn: f64,
    stats: CusumStats,
}

impl Cusum {
    /// Build a detector with zeroed accumulators.
    pub fn new(params: CusumParams) -> Result<Self, ConfigError> {
        params.validate()?;
        Ok(Self::from_valid(params))
    }

    /// Caller guarantees `params` already passed validation.
    pub(crate) fn from_valid(params: CusumParams) -> Self {
        Self {
            params,
            gp: 0.0,
            gn: 0.0,
            stats: CusumStats::default(),
        }
    }

    /// Feed one centered observation.
    pub fn step(&mut self, x: f64) -> Signal {
        let k = self.params.slack;
        let h = self.params.threshold;
        self.stats.steps += 1;

        self.gp = (self.gp + x - k).max(0.0);
        self.gn = (self.gn - x - k).max(0.0);
        tracing::trace!(x, gp = self.gp, gn = self.gn, "cusum step");

        if self.gp > h {
            self.gp = 0.0;
            self.gn = 0.0;
            self.stats.stress_events += 1;
            return Signal::Stress;
        }
        if self.gn > h {
            self.gp = 0.0;
            self.gn = 0.0;
            self.stats.calm_events += 1;
            return Signal::Calm;
        }
        Signal::NoChange
    }

    /// Stress accumulator.
    #[inline]
    pub fn gp(&self) -> f64 {
        self.gp
    }

    /// Calm accumulator.
    #[inline]
    pub fn gn(&self) -> f64 {
        self.gn
    }

    #[inline]
    pub fn params(&self) -> &CusumParams {
        &self.params
    }

    #[inline]
    pub fn stats(&self) -> CusumStats {
        self.stats
    }

    /// Zero both accumulators and the counters.
    pub fn reset(&mut self) {
        self.gp = 0.0;
        self.gn = 0.0;
        self.stats = CusumStats::default();
    }
}

impl Default for Cusum {
    fn default() -> Self {
        Self::from_valid(CusumParams::default())
    }
}
