#![forbid(unsafe_code)]

//! Conformal quantile band around a raw hazard estimate.
//!
//! Two bounded windows of past hazard scores are kept, conditioned on the
//! realized outcome: one for hits (`y = 1`) and one for misses (`y = 0`).
//! A new raw hazard `h` gets an asymmetric band:
//!
//! ```text
//! miss_noise    = Q(neg, 1 − α)       // how high scores got on misses
//! hit_overshoot = Q(pos, 1 − α/2)     // how high scores got on hits
//!
//! lower = max(0, h − 0.5  × miss_noise)
//! upper = min(1, h + 0.25 × hit_overshoot)
//! ```
//!
//! `Q(w, p)` is the nearest-rank order statistic
//! `w[clamp(⌊p·(n−1)⌋, 0, n−1)]` of the ascending window, and `0` for an
//! empty window. Confirmation requires the *lower* edge to clear a decision
//! threshold, so outlier raw scores cannot confirm on their own.
//!
//! # Failure Modes
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | Both windows empty | `(0.8·h, min(1, 1.2·h))` fixed-ratio band |
//! | One window empty | Its quantile reads as 0 |
//! | Window over capacity | One element evicted per [`EvictionPolicy`] |
//!
//! # Eviction
//!
//! [`EvictionPolicy::Smallest`] (the default) drops the smallest score once a
//! window exceeds `window_size`. This is kept for compatibility with existing
//! calibrations, but it is not a rolling window: it drifts the retained
//! population upward over time. [`EvictionPolicy::Oldest`] drops the earliest
//! inserted score instead and is the one to pick for a true rolling window.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{ConfigError, OutcomeError};
use crate::evidence::BandEvidence;

/// Weight of the miss quantile on the lower edge.
const MISS_WEIGHT: f64 = 0.5;
/// Weight of the hit quantile on the upper edge.
const HIT_WEIGHT: f64 = 0.25;
/// Fixed-ratio band used before any outcome has been seen.
const FALLBACK_LOWER_RATIO: f64 = 0.8;
const FALLBACK_UPPER_RATIO: f64 = 1.2;

/// Which score leaves a full window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Drop the smallest-valued score.
    #[default]
    Smallest,
    /// Drop the earliest-inserted score.
    Oldest,
}

impl std::str::FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "smallest" => Ok(Self::Smallest),
            "oldest" | "fifo" => Ok(Self::Oldest),
            other => Err(format!("unknown eviction policy: {other}")),
        }
    }
}

/// Configuration for [`QuantileBand`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandConfig {
    /// Tail level. Default: 0.05 (95th percentile of misses).
    pub alpha: f64,
    /// Capacity of each outcome window. Default: 2000.
    pub window_size: usize,
    /// Default: [`EvictionPolicy::Smallest`].
    pub eviction: EvictionPolicy,
}

impl Default for BandConfig {
    fn default() -> Self {
        Self {
            alpha: 0.05,
            window_size: 2000,
            eviction: EvictionPolicy::Smallest,
        }
    }
}

impl BandConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(ConfigError::AlphaOutOfRange(self.alpha));
        }
        if self.window_size == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        Ok(())
    }
}

/// Realized outcome of a hazard prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The event happened (`y = 1`).
    Positive,
    /// The event did not happen (`y = 0`).
    Negative,
}

impl TryFrom<i64> for Outcome {
    type Error = OutcomeError;

    fn try_from(label: i64) -> Result<Self, Self::Error> {
        match label {
            1 => Ok(Outcome::Positive),
            0 => Ok(Outcome::Negative),
            other => Err(OutcomeError(other)),
        }
    }
}

impl From<bool> for Outcome {
    fn from(hit: bool) -> Self {
        if hit {
            Outcome::Positive
        } else {
            Outcome::Negative
        }
    }
}

/// Bounded, ascending-sorted window of hazard scores.
#[derive(Debug, Clone)]
pub struct HazardWindow {
    sorted: Vec<f64>,
    /// Insertion order; only maintained under [`EvictionPolicy::Oldest`].
    arrivals: VecDeque<f64>,
    capacity: usize,
    policy: EvictionPolicy,
}

impl HazardWindow {
    fn new(capacity: usize, policy: EvictionPolicy) -> Self {
        Self {
            sorted: Vec::new(),
            arrivals: VecDeque::new(),
            capacity,
            policy,
        }
    }

    /// Insert after any equal scores, then evict once if over capacity.
    /// Returns the evicted score.
    fn insert(&mut self, value: f64) -> Option<f64> {
        let idx = self.sorted.partition_point(|&x| x <= value);
        self.sorted.insert(idx, value);
        if self.policy == EvictionPolicy::Oldest {
            self.arrivals.push_back(value);
        }
        if self.sorted.len() <= self.capacity {
            return None;
        }
        match self.policy {
            EvictionPolicy::Smallest => Some(self.sorted.remove(0)),
            EvictionPolicy::Oldest => {
                let oldest = self.arrivals.pop_front()?;
                let pos = self.sorted.partition_point(|&x| x < oldest);
                (pos < self.sorted.len()).then(|| self.sorted.remove(pos))
            }
        }
    }

    /// Nearest-rank quantile; 0 when empty.
    pub fn quantile(&self, p: f64) -> f64 {
        let n = self.sorted.len();
        if n == 0 {
            return 0.0;
        }
        let rank = (p * (n - 1) as f64).floor().max(0.0) as usize;
        self.sorted[rank.min(n - 1)]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Scores in ascending order.
    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.sorted
    }

    fn clear(&mut self) {
        self.sorted.clear();
        self.arrivals.clear();
    }
}

/// Aggregate counters for a [`QuantileBand`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BandStats {
    pub updates: u64,
    pub evictions: u64,
    pub positive_len: usize,
    pub negative_len: usize,
}

/// Outcome-conditioned conformal band calibrator.
#[derive(Debug, Clone)]
pub struct QuantileBand {
    config: BandConfig,
    positive: HazardWindow,
    negative: HazardWindow,
    updates: u64,
    evictions: u64,
}

impl QuantileBand {
    pub fn new(config: BandConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_valid(config))
    }

    fn from_valid(config: BandConfig) -> Self {
        Self {
            positive: HazardWindow::new(config.window_size, config.eviction),
            negative: HazardWindow::new(config.window_size, config.eviction),
            config,
            updates: 0,
            evictions: 0,
        }
    }

    /// Record the hazard score that preceded `outcome`.
    pub fn update(&mut self, hazard: f64, outcome: Outcome) {
        self.updates += 1;
        let window = self.window_mut(outcome);
        if let Some(evicted) = window.insert(hazard) {
            self.evictions += 1;
            trace!(?outcome, evicted, hazard, "hazard window eviction");
        }
    }

    /// [`update`](Self::update) with an integer label (`1` hit, `0` miss).
    pub fn update_label(&mut self, hazard: f64, label: i64) -> Result<(), OutcomeError> {
        let outcome = Outcome::try_from(label)?;
        self.update(hazard, outcome);
        Ok(())
    }

    /// `(lower, upper)` band around `hazard_raw`.
    pub fn band(&self, hazard_raw: f64) -> (f64, f64) {
        let ev = self.band_evidence(hazard_raw);
        (ev.lower, ev.upper)
    }

    /// Band plus the quantities it was derived from.
    pub fn band_evidence(&self, hazard_raw: f64) -> BandEvidence {
        let positive_len = self.positive.len();
        let negative_len = self.negative.len();

        if self.positive.is_empty() && self.negative.is_empty() {
            return BandEvidence {
                hazard_raw,
                lower: hazard_raw * FALLBACK_LOWER_RATIO,
                upper: (hazard_raw * FALLBACK_UPPER_RATIO).min(1.0),
                miss_noise: 0.0,
                hit_overshoot: 0.0,
                positive_len,
                negative_len,
                fallback: true,
            };
        }

        let alpha = self.config.alpha;
        let miss_noise = self.negative.quantile(1.0 - alpha);
        let hit_overshoot = self.positive.quantile(1.0 - alpha / 2.0);
        BandEvidence {
            hazard_raw,
            lower: (hazard_raw - MISS_WEIGHT * miss_noise).max(0.0),
            upper: (hazard_raw + HIT_WEIGHT * hit_overshoot).min(1.0),
            miss_noise,
            hit_overshoot,
            positive_len,
            negative_len,
            fallback: false,
        }
    }

    /// True when the lower band edge reaches `threshold`.
    pub fn confirms(&self, hazard_raw: f64, threshold: f64) -> bool {
        self.band(hazard_raw).0 >= threshold
    }

    /// Nearest-rank quantile of one outcome window.
    pub fn quantile(&self, outcome: Outcome, p: f64) -> f64 {
        self.window(outcome).quantile(p)
    }

    pub fn window(&self, outcome: Outcome) -> &HazardWindow {
        match outcome {
            Outcome::Positive => &self.positive,
            Outcome::Negative => &self.negative,
        }
    }

    fn window_mut(&mut self, outcome: Outcome) -> &mut HazardWindow {
        match outcome {
            Outcome::Positive => &mut self.positive,
            Outcome::Negative => &mut self.negative,
        }
    }

    pub fn len(&self, outcome: Outcome) -> usize {
        self.window(outcome).len()
    }

    /// True when both windows are empty.
    pub fn is_empty(&self) -> bool {
        self.positive.is_empty() && self.negative.is_empty()
    }

    /// Drop all scores and counters.
    pub fn clear(&mut self) {
        self.positive.clear();
        self.negative.clear();
        self.updates = 0;
        self.evictions = 0;
    }

    pub fn stats(&self) -> BandStats {
        BandStats {
            updates: self.updates,
            evictions: self.evictions,
            positive_len: self.positive.len(),
            negative_len: self.negative.len(),
        }
    }

    #[inline]
    pub fn config(&self) -> &BandConfig {
        &self.config
    }

    #[inline]
    pub fn alpha(&self) -> f64 {
        self.config.alpha
    }
}

impl Default for QuantileBand {
    fn default() -> Self {
        Self::from_valid(BandConfig::default())
    }
}
