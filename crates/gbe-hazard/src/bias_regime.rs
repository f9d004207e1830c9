#![forbid(unsafe_code)]

//! Bias regime controller: two CUSUM detectors pushing on one shared bias.
//!
//! The controller owns a decision bias and one [`Cusum`] per input stream:
//!
//! - **Lambda stream**: z-scores of the event intensity, centered at
//!   [`LAMBDA_Z_CENTER`] before reaching the detector.
//! - **PPV stream**: `target_ppv − realized_ppv`, fed as-is. A positive error
//!   means the system is too loose and should tighten.
//!
//! On `Stress` the bias moves up by `bump_up`, on `Calm` it moves down by
//! `bump_down`, and every move is clamped to `[min_bias, max_bias]`.
//!
//! # Invariants
//!
//! 1. `min_bias <= bias <= max_bias` after construction and after every step.
//! 2. The detectors never touch the bias; only the controller does.
//! 3. Steps on the two streams do not commute: the most recent regime shift
//!    on either stream decides the latest adjustment direction.
//!
//! Instances are plain sequential state machines. Callers sharing one across
//! threads must serialize every `step_*` call behind a single lock.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cusum::{Cusum, CusumParams, CusumStats, Signal};
use crate::error::ConfigError;
use crate::evidence::{BiasEvidence, Ledger, Stream};

/// Reference point of the lambda z-score stream (stress/calm midpoint).
pub const LAMBDA_Z_CENTER: f64 = 2.0;

/// Default base bias.
pub const DEFAULT_BASE_BIAS: f64 = 20.0;

/// Default evidence ledger capacity.
const DEFAULT_LEDGER_CAPACITY: usize = 256;

/// Configuration for [`BiasRegimeController`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    /// Initial bias. Must lie within the clamp range. Default: 20.0.
    pub base_bias: f64,
    /// Detector parameters for the lambda stream.
    pub lambda: CusumParams,
    /// Detector parameters for the PPV stream. Must share the lambda
    /// stream's `min_bias`/`max_bias`.
    pub ppv: CusumParams,
    /// Record a [`BiasEvidence`] per step. Default: false.
    pub enable_logging: bool,
    /// Maximum evidence entries retained. Default: 256.
    pub ledger_capacity: usize,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            base_bias: DEFAULT_BASE_BIAS,
            lambda: CusumParams::default(),
            ppv: CusumParams::default(),
            enable_logging: false,
            ledger_capacity: DEFAULT_LEDGER_CAPACITY,
        }
    }
}

impl RegimeConfig {
    /// Same detector parameters on both streams.
    pub fn shared(base_bias: f64, params: CusumParams) -> Self {
        Self {
            base_bias,
            lambda: params,
            ppv: params,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.lambda.validate()?;
        self.ppv.validate()?;
        if self.lambda.min_bias != self.ppv.min_bias || self.lambda.max_bias != self.ppv.max_bias
        {
            return Err(ConfigError::MismatchedBounds);
        }
        if !self.base_bias.is_finite() {
            return Err(ConfigError::NonFinite {
                field: "base_bias",
                value: self.base_bias,
            });
        }
        let (min, max) = (self.lambda.min_bias, self.lambda.max_bias);
        if self.base_bias < min || self.base_bias > max {
            return Err(ConfigError::BaseOutOfBounds {
                base: self.base_bias,
                min,
                max,
            });
        }
        Ok(())
    }
}

/// Per-stream counters in a [`RegimeSummary`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamSummary {
    pub steps: u64,
    pub stress_events: u64,
    pub calm_events: u64,
}

impl From<CusumStats> for StreamSummary {
    fn from(stats: CusumStats) -> Self {
        Self {
            steps: stats.steps,
            stress_events: stats.stress_events,
            calm_events: stats.calm_events,
        }
    }
}

/// Snapshot of controller state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegimeSummary {
    pub bias: f64,
    pub base_bias: f64,
    pub lambda: StreamSummary,
    pub ppv: StreamSummary,
    /// Bumps that were cut short by a clamp bound.
    pub clamped_bumps: u64,
}

/// Shared decision bias driven by two regime detectors.
#[derive(Debug, Clone)]
pub struct BiasRegimeController {
    bias: f64,
    base_bias: f64,
    lambda: Cusum,
    ppv: Cusum,
    step_count: u64,
    clamped_bumps: u64,
    enable_logging: bool,
    ledger: Ledger<BiasEvidence>,
}

impl BiasRegimeController {
    /// Build a controller from a validated configuration.
    pub fn new(config: RegimeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        info!(
            base_bias = config.base_bias,
            min_bias = config.lambda.min_bias,
            max_bias = config.lambda.max_bias,
            "bias regime controller ready"
        );
        Ok(Self::from_valid(config))
    }

    /// Default detector parameters on both streams around `base_bias`.
    pub fn with_base(base_bias: f64) -> Result<Self, ConfigError> {
        Self::new(RegimeConfig::shared(base_bias, CusumParams::default()))
    }

    fn from_valid(config: RegimeConfig) -> Self {
        Self {
            bias: config.base_bias,
            base_bias: config.base_bias,
            lambda: Cusum::from_valid(config.lambda),
            ppv: Cusum::from_valid(config.ppv),
            step_count: 0,
            clamped_bumps: 0,
            enable_logging: config.enable_logging,
            ledger: Ledger::new(config.ledger_capacity),
        }
    }

    /// Feed a lambda z-score; returns the bias after the update.
    pub fn step_lambda(&mut self, lambda_z: f64) -> f64 {
        self.step(Stream::Lambda, lambda_z)
    }

    /// Feed a precision error (`target − realized`); returns the bias after
    /// the update.
    pub fn step_ppv(&mut self, ppv_error: f64) -> f64 {
        self.step(Stream::Ppv, ppv_error)
    }

    /// Feed one observation on `stream`; returns the bias after the update.
    pub fn step(&mut self, stream: Stream, input: f64) -> f64 {
        self.step_count += 1;
        let centered = match stream {
            Stream::Lambda => input - LAMBDA_Z_CENTER,
            Stream::Ppv => input,
        };
        let detector = match stream {
            Stream::Lambda => &mut self.lambda,
            Stream::Ppv => &mut self.ppv,
        };
        let signal = detector.step(centered);
        let (gp, gn) = (detector.gp(), detector.gn());
        let params = *detector.params();

        let bias_before = self.bias;
        let target = match signal {
            Signal::Stress => bias_before + params.bump_up,
            Signal::Calm => bias_before - params.bump_down,
            Signal::NoChange => bias_before,
        };
        self.bias = params.clamp_bias(target);
        let clamped = self.bias != target;
        if clamped {
            self.clamped_bumps += 1;
        }

        if signal.is_change() {
            debug!(
                stream = stream.as_str(),
                ?signal,
                bias_before,
                bias_after = self.bias,
                clamped,
                "bias regime shift"
            );
        }

        if self.enable_logging {
            self.ledger.push(BiasEvidence {
                step_idx: self.step_count,
                stream,
                input,
                centered,
                gp,
                gn,
                signal,
                bias_before,
                bias_after: self.bias,
                clamped,
            });
        }

        self.bias
    }

    /// Current bias.
    #[inline]
    pub fn bias(&self) -> f64 {
        self.bias
    }

    #[inline]
    pub fn base_bias(&self) -> f64 {
        self.base_bias
    }

    /// Detector for `stream`.
    pub fn detector(&self, stream: Stream) -> &Cusum {
        match stream {
            Stream::Lambda => &self.lambda,
            Stream::Ppv => &self.ppv,
        }
    }

    /// Restore the base bias and zero both detectors. The ledger is kept.
    pub fn reset(&mut self) {
        self.bias = self.base_bias;
        self.lambda.reset();
        self.ppv.reset();
        self.step_count = 0;
        self.clamped_bumps = 0;
    }

    pub fn summary(&self) -> RegimeSummary {
        RegimeSummary {
            bias: self.bias,
            base_bias: self.base_bias,
            lambda: self.lambda.stats().into(),
            ppv: self.ppv.stats().into(),
            clamped_bumps: self.clamped_bumps,
        }
    }

    /// Evidence recorded so far (empty unless logging is enabled).
    pub fn ledger(&self) -> &Ledger<BiasEvidence> {
        &self.ledger
    }

    pub fn clear_ledger(&mut self) {
        self.ledger.clear();
    }
}

impl Default for BiasRegimeController {
    fn default() -> Self {
        Self::from_valid(RegimeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn logging_config() -> RegimeConfig {
        RegimeConfig {
            enable_logging: true,
            ..RegimeConfig::default()
        }
    }

    // =========================================================================
    // Construction
    // =========================================================================

    #[test]
    fn starts_at_base_bias() {
        let ctl = BiasRegimeController::default();
        assert_eq!(ctl.bias(), 20.0);
        assert_eq!(ctl.base_bias(), 20.0);
    }

    #[test]
    fn rejects_base_outside_bounds() {
        let err = BiasRegimeController::with_base(50.0).unwrap_err();
        assert_eq!(
            err,
            ConfigError::BaseOutOfBounds {
                base: 50.0,
                min: 5.0,
                max: 45.0
            }
        );
    }

    #[test]
    fn rejects_mismatched_stream_bounds() {
        let config = RegimeConfig {
            ppv: CusumParams {
                max_bias: 30.0,
                ..CusumParams::default()
            },
            ..RegimeConfig::default()
        };
        assert_eq!(
            BiasRegimeController::new(config).unwrap_err(),
            ConfigError::MismatchedBounds
        );
    }

    #[test]
    fn rejects_invalid_stream_params() {
        let config = RegimeConfig::shared(
            20.0,
            CusumParams {
                slack: -0.1,
                ..CusumParams::default()
            },
        );
        assert!(BiasRegimeController::new(config).is_err());
    }

    // =========================================================================
    // Lambda stream
    // =========================================================================

    #[test]
    fn lambda_at_center_is_neutral() {
        let mut ctl = BiasRegimeController::default();
        for _ in 0..50 {
            assert_eq!(ctl.step_lambda(2.0), 20.0);
        }
        assert_eq!(ctl.detector(Stream::Lambda).gp(), 0.0);
    }

    #[test]
    fn lambda_stress_bumps_up() {
        let mut ctl = BiasRegimeController::default();
        let mut bias = ctl.bias();
        for _ in 0..6 {
            bias = ctl.step_lambda(2.5);
        }
        assert_eq!(bias, 22.0);
    }

    #[test]
    fn lambda_calm_eases_down() {
        let mut ctl = BiasRegimeController::default();
        // centered -1.0 → 0.85 per step, fires on step 3
        let mut bias = ctl.bias();
        for _ in 0..3 {
            bias = ctl.step_lambda(1.0);
        }
        assert_eq!(bias, 19.0);
    }

    // =========================================================================
    // PPV stream
    // =========================================================================

    #[test]
    fn ppv_positive_error_tightens() {
        let mut ctl = BiasRegimeController::default();
        // 1.0 - 0.15 = 0.85 per step, fires on step 3
        ctl.step_ppv(1.0);
        ctl.step_ppv(1.0);
        assert_eq!(ctl.step_ppv(1.0), 22.0);
    }

    #[test]
    fn ppv_is_not_centered() {
        let mut ctl = BiasRegimeController::default();
        // 2.0 on the ppv stream is a strong stress signal, unlike lambda.
        ctl.step_ppv(2.0);
        assert_eq!(ctl.step_ppv(2.0), 22.0);
    }

    #[test]
    fn ppv_negative_error_eases() {
        let mut ctl = BiasRegimeController::default();
        ctl.step_ppv(-1.0);
        ctl.step_ppv(-1.0);
        assert_eq!(ctl.step_ppv(-1.0), 19.0);
    }

    // =========================================================================
    // Shared bias and clamping
    // =========================================================================

    #[test]
    fn streams_have_independent_detectors() {
        let mut ctl = BiasRegimeController::default();
        ctl.step_lambda(3.0);
        assert!(ctl.detector(Stream::Lambda).gp() > 0.0);
        assert_eq!(ctl.detector(Stream::Ppv).gp(), 0.0);
    }

    #[test]
    fn streams_share_bias() {
        let mut ctl = BiasRegimeController::default();
        for _ in 0..3 {
            ctl.step_ppv(1.0);
        }
        assert_eq!(ctl.bias(), 22.0);
        for _ in 0..3 {
            ctl.step_lambda(1.0);
        }
        assert_eq!(ctl.bias(), 21.0);
    }

    #[test]
    fn bias_saturates_at_max() {
        let mut ctl = BiasRegimeController::default();
        for _ in 0..500 {
            let bias = ctl.step_ppv(5.0);
            assert!(bias <= 45.0);
        }
        assert_eq!(ctl.bias(), 45.0);
        assert!(ctl.summary().clamped_bumps > 0);
    }

    #[test]
    fn bias_saturates_at_min() {
        let mut ctl = BiasRegimeController::default();
        for _ in 0..500 {
            let bias = ctl.step_lambda(-5.0);
            assert!(bias >= 5.0);
        }
        assert_eq!(ctl.bias(), 5.0);
    }

    #[test]
    fn per_stream_bumps() {
        let config = RegimeConfig {
            ppv: CusumParams {
                bump_up: 5.0,
                ..CusumParams::default()
            },
            ..RegimeConfig::default()
        };
        let mut ctl = BiasRegimeController::new(config).unwrap();
        for _ in 0..3 {
            ctl.step_ppv(1.0);
        }
        assert_eq!(ctl.bias(), 25.0);
        for _ in 0..6 {
            ctl.step_lambda(2.5);
        }
        assert_eq!(ctl.bias(), 27.0);
    }

    // =========================================================================
    // Reset, summary, ledger
    // =========================================================================

    #[test]
    fn reset_restores_base() {
        let mut ctl = BiasRegimeController::default();
        for _ in 0..10 {
            ctl.step_ppv(3.0);
        }
        assert_ne!(ctl.bias(), 20.0);
        ctl.reset();
        assert_eq!(ctl.bias(), 20.0);
        assert_eq!(ctl.detector(Stream::Ppv).gp(), 0.0);
        assert_eq!(ctl.summary().ppv.steps, 0);
    }

    #[test]
    fn summary_counts_per_stream() {
        let mut ctl = BiasRegimeController::default();
        for _ in 0..3 {
            ctl.step_ppv(1.0);
        }
        ctl.step_lambda(2.0);
        let summary = ctl.summary();
        assert_eq!(summary.ppv.steps, 3);
        assert_eq!(summary.ppv.stress_events, 1);
        assert_eq!(summary.lambda.steps, 1);
        assert_eq!(summary.lambda.stress_events, 0);
        assert_eq!(summary.bias, 22.0);
    }

    #[test]
    fn ledger_disabled_by_default() {
        let mut ctl = BiasRegimeController::default();
        ctl.step_lambda(3.0);
        assert!(ctl.ledger().is_empty());
    }

    #[test]
    fn ledger_records_centered_input() {
        let mut ctl = BiasRegimeController::new(logging_config()).unwrap();
        ctl.step_lambda(2.5);
        ctl.step_ppv(0.25);
        let entries: Vec<_> = ctl.ledger().iter().collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].stream, Stream::Lambda);
        assert_eq!(entries[0].input, 2.5);
        assert_eq!(entries[0].centered, 0.5);
        assert_eq!(entries[1].stream, Stream::Ppv);
        assert_eq!(entries[1].centered, 0.25);
        assert_eq!(entries[1].step_idx, 2);
    }

    #[test]
    fn ledger_records_signal_and_bias() {
        let mut ctl = BiasRegimeController::new(logging_config()).unwrap();
        for _ in 0..3 {
            ctl.step_ppv(1.0);
        }
        let last = ctl.ledger().last().unwrap();
        assert_eq!(last.signal, Signal::Stress);
        assert_eq!(last.bias_before, 20.0);
        assert_eq!(last.bias_after, 22.0);
        assert_eq!(last.gp, 0.0);
        assert!(!last.clamped);
    }

    #[test]
    fn ledger_capacity_bounded() {
        let config = RegimeConfig {
            enable_logging: true,
            ledger_capacity: 4,
            ..RegimeConfig::default()
        };
        let mut ctl = BiasRegimeController::new(config).unwrap();
        for _ in 0..10 {
            ctl.step_lambda(2.0);
        }
        assert_eq!(ctl.ledger().len(), 4);
        ctl.clear_ledger();
        assert!(ctl.ledger().is_empty());
    }

    #[test]
    #[traced_test]
    fn regime_shift_is_logged() {
        let mut ctl = BiasRegimeController::default();
        for _ in 0..3 {
            ctl.step_ppv(1.0);
        }
        assert!(logs_contain("bias regime shift"));
    }
}
