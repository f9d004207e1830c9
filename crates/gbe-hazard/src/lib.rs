#![forbid(unsafe_code)]

//! Gamma Blast Engine hazard calibration core.
//!
//! Two independent component groups, composed by the caller:
//!
//! - [`BiasRegimeController`] - a shared decision bias nudged by two
//!   [`Cusum`] change-point detectors, one on the lambda z-score stream and
//!   one on the realized precision error stream.
//! - [`QuantileBand`] - outcome-conditioned windows of past hazard scores
//!   that turn a raw hazard estimate into an asymmetric confidence band.
//!
//! Everything here is a synchronous state machine with no I/O. A service
//! layer feeds scalars in and reads scalars back; if several threads feed one
//! instance, wrap it in a single `Mutex` or route updates through one task.
//!
//! # Example
//!
//! ```
//! use gbe_hazard::{BiasRegimeController, Outcome, QuantileBand};
//!
//! let mut controller = BiasRegimeController::default();
//! let bias = controller.step_lambda(2.4);
//! assert!((5.0..=45.0).contains(&bias));
//!
//! let mut band = QuantileBand::default();
//! band.update(0.9, Outcome::Positive);
//! band.update(0.1, Outcome::Negative);
//! let (lower, upper) = band.band(0.5);
//! assert!(lower <= 0.5 && 0.5 <= upper);
//! ```

pub mod bias_regime;
pub mod config;
pub mod cusum;
pub mod error;
pub mod evidence;
pub mod quantile_band;

pub use bias_regime::{
    BiasRegimeController, DEFAULT_BASE_BIAS, LAMBDA_Z_CENTER, RegimeConfig, RegimeSummary,
    StreamSummary,
};
pub use config::HazardConfig;
pub use cusum::{Cusum, CusumParams, CusumStats, Signal};
pub use error::{ConfigError, OutcomeError};
pub use evidence::{BandEvidence, BiasEvidence, Ledger, Stream};
pub use quantile_band::{
    BandConfig, BandStats, EvictionPolicy, HazardWindow, Outcome, QuantileBand,
};
