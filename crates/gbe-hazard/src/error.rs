#![forbid(unsafe_code)]

//! Error types for the hazard calibration core.
//!
//! The core itself never fails at runtime: empty windows and untriggered
//! detectors have defined fallbacks. Errors only surface at construction
//! (invalid parameters) and at the integer outcome boundary.

use std::fmt;

/// Invalid configuration, rejected when a detector, controller or
/// calibrator is built.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A parameter is NaN or infinite.
    NonFinite { field: &'static str, value: f64 },
    /// A parameter that must be strictly positive is not.
    NonPositive { field: &'static str, value: f64 },
    /// A bump magnitude is negative.
    Negative { field: &'static str, value: f64 },
    /// `min_bias > max_bias`.
    InvertedBounds { min: f64, max: f64 },
    /// The base bias lies outside `[min_bias, max_bias]`.
    BaseOutOfBounds { base: f64, min: f64, max: f64 },
    /// The two streams of one controller disagree on the clamp range.
    MismatchedBounds,
    /// `alpha` is not in the open interval (0, 1).
    AlphaOutOfRange(f64),
    /// `window_size` is zero.
    ZeroWindow,
    /// An environment variable could not be parsed.
    EnvParse { var: String, value: String },
    /// JSON configuration could not be decoded.
    Json(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonFinite { field, value } => write!(f, "{field} must be finite, got {value}"),
            Self::NonPositive { field, value } => write!(f, "{field} must be > 0, got {value}"),
            Self::Negative { field, value } => write!(f, "{field} must be >= 0, got {value}"),
            Self::InvertedBounds { min, max } => {
                write!(f, "min_bias ({min}) must not exceed max_bias ({max})")
            }
            Self::BaseOutOfBounds { base, min, max } => {
                write!(f, "base_bias {base} outside [{min}, {max}]")
            }
            Self::MismatchedBounds => {
                write!(f, "lambda and ppv streams must share the same bias bounds")
            }
            Self::AlphaOutOfRange(alpha) => write!(f, "alpha must be in (0, 1), got {alpha}"),
            Self::ZeroWindow => write!(f, "window_size must be at least 1"),
            Self::EnvParse { var, value } => write!(f, "cannot parse {var}={value:?}"),
            Self::Json(msg) => write!(f, "invalid JSON config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Json(e.to_string())
    }
}

/// An outcome label other than 0 or 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutcomeError(pub i64);

impl fmt::Display for OutcomeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "outcome label must be 0 or 1, got {}", self.0)
    }
}

impl std::error::Error for OutcomeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_field() {
        let err = ConfigError::NonPositive {
            field: "threshold",
            value: 0.0,
        };
        assert_eq!(err.to_string(), "threshold must be > 0, got 0");
    }

    #[test]
    fn json_errors_convert() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: ConfigError = parse.unwrap_err().into();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn outcome_error_display() {
        assert_eq!(
            OutcomeError(7).to_string(),
            "outcome label must be 0 or 1, got 7"
        );
    }
}
