#![forbid(unsafe_code)]

//! Top-level configuration: one bias controller plus one band calibrator.
//!
//! Sources, each ending in [`HazardConfig::validate`]:
//!
//! - defaults ([`HazardConfig::default`]),
//! - JSON text, missing fields falling back to defaults,
//! - environment variables layered over the defaults:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `GBE_CUSUM_SLACK` | `regime.{lambda,ppv}.slack` |
//! | `GBE_CUSUM_THRESHOLD` | `regime.{lambda,ppv}.threshold` |
//! | `GBE_CUSUM_BUMP_UP` | `regime.{lambda,ppv}.bump_up` |
//! | `GBE_CUSUM_BUMP_DOWN` | `regime.{lambda,ppv}.bump_down` |
//! | `GBE_MIN_BIAS` | `regime.{lambda,ppv}.min_bias` |
//! | `GBE_MAX_BIAS` | `regime.{lambda,ppv}.max_bias` |
//! | `GBE_BASE_BIAS` | `regime.base_bias` |
//! | `GBE_BAND_ALPHA` | `band.alpha` |
//! | `GBE_BAND_WINDOW` | `band.window_size` |
//! | `GBE_BAND_EVICTION` | `band.eviction` (`smallest` or `oldest`) |
//!
//! A set but unparseable variable is an error, not a silent default.

use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::bias_regime::{BiasRegimeController, RegimeConfig};
use crate::cusum::CusumParams;
use crate::error::ConfigError;
use crate::quantile_band::{BandConfig, QuantileBand};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HazardConfig {
    pub regime: RegimeConfig,
    pub band: BandConfig,
}

impl HazardConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.regime.validate()?;
        self.band.validate()
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `GBE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `GBE_*` name.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let mut shared = config.regime.lambda;

        override_with(&lookup, "GBE_CUSUM_SLACK", &mut shared.slack)?;
        override_with(&lookup, "GBE_CUSUM_THRESHOLD", &mut shared.threshold)?;
        override_with(&lookup, "GBE_CUSUM_BUMP_UP", &mut shared.bump_up)?;
        override_with(&lookup, "GBE_CUSUM_BUMP_DOWN", &mut shared.bump_down)?;
        override_with(&lookup, "GBE_MIN_BIAS", &mut shared.min_bias)?;
        override_with(&lookup, "GBE_MAX_BIAS", &mut shared.max_bias)?;
        config.regime.lambda = shared;
        config.regime.ppv = shared;

        override_with(&lookup, "GBE_BASE_BIAS", &mut config.regime.base_bias)?;
        override_with(&lookup, "GBE_BAND_ALPHA", &mut config.band.alpha)?;
        override_with(&lookup, "GBE_BAND_WINDOW", &mut config.band.window_size)?;
        override_with(&lookup, "GBE_BAND_EVICTION", &mut config.band.eviction)?;

        config.validate()?;
        Ok(config)
    }

    /// Detector parameters shared by both streams, if they are shared.
    pub fn shared_cusum(&self) -> Option<CusumParams> {
        (self.regime.lambda == self.regime.ppv).then_some(self.regime.lambda)
    }

    /// Build the controller and calibrator this configuration describes.
    pub fn build(&self) -> Result<(BiasRegimeController, QuantileBand), ConfigError> {
        let controller = BiasRegimeController::new(self.regime.clone())?;
        let band = QuantileBand::new(self.band)?;
        Ok((controller, band))
    }
}

fn override_with<F, T>(lookup: &F, var: &str, slot: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(var) else {
        return Ok(());
    };
    *slot = raw.trim().parse().map_err(|_| ConfigError::EnvParse {
        var: var.to_string(),
        value: raw.clone(),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::quantile_band::EvictionPolicy;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    // =========================================================================
    // Defaults
    // =========================================================================

    #[test]
    fn defaults_match_documented_values() {
        let config = HazardConfig::default();
        let params = config.shared_cusum().unwrap();
        assert_eq!(params.slack, 0.15);
        assert_eq!(params.threshold, 2.0);
        assert_eq!(params.bump_up, 2.0);
        assert_eq!(params.bump_down, 1.0);
        assert_eq!(params.min_bias, 5.0);
        assert_eq!(params.max_bias, 45.0);
        assert_eq!(config.regime.base_bias, 20.0);
        assert_eq!(config.band.alpha, 0.05);
        assert_eq!(config.band.window_size, 2000);
        assert_eq!(config.band.eviction, EvictionPolicy::Smallest);
        assert!(config.validate().is_ok());
    }

    // =========================================================================
    // JSON
    // =========================================================================

    #[test]
    fn empty_json_is_default() {
        let config = HazardConfig::from_json_str("{}").unwrap();
        assert_eq!(config, HazardConfig::default());
    }

    #[test]
    fn partial_json_overrides() {
        let config = HazardConfig::from_json_str(
            r#"{"regime":{"base_bias":10.0,"ppv":{"bump_up":4.0}},"band":{"eviction":"oldest"}}"#,
        )
        .unwrap();
        assert_eq!(config.regime.base_bias, 10.0);
        assert_eq!(config.regime.ppv.bump_up, 4.0);
        assert_eq!(config.regime.ppv.slack, 0.15);
        assert_eq!(config.band.eviction, EvictionPolicy::Oldest);
        assert!(config.shared_cusum().is_none());
    }

    #[test]
    fn invalid_json_values_rejected() {
        let err = HazardConfig::from_json_str(r#"{"band":{"alpha":1.5}}"#).unwrap_err();
        assert_eq!(err, ConfigError::AlphaOutOfRange(1.5));
    }

    #[test]
    fn malformed_json_rejected() {
        assert!(matches!(
            HazardConfig::from_json_str("not json"),
            Err(ConfigError::Json(_))
        ));
    }

    // =========================================================================
    // Environment
    // =========================================================================

    #[test]
    fn empty_env_is_default() {
        let config = HazardConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, HazardConfig::default());
    }

    #[test]
    fn env_overrides_both_streams() {
        let lookup = lookup_from(&[
            ("GBE_CUSUM_SLACK", "0.3"),
            ("GBE_MAX_BIAS", "60"),
            ("GBE_BASE_BIAS", " 25 "),
            ("GBE_BAND_WINDOW", "500"),
            ("GBE_BAND_EVICTION", "oldest"),
        ]);
        let config = HazardConfig::from_lookup(lookup).unwrap();
        let params = config.shared_cusum().unwrap();
        assert_eq!(params.slack, 0.3);
        assert_eq!(params.max_bias, 60.0);
        assert_eq!(config.regime.base_bias, 25.0);
        assert_eq!(config.band.window_size, 500);
        assert_eq!(config.band.eviction, EvictionPolicy::Oldest);
    }

    #[test]
    fn unparseable_env_is_error() {
        let lookup = lookup_from(&[("GBE_CUSUM_THRESHOLD", "high")]);
        assert_eq!(
            HazardConfig::from_lookup(lookup).unwrap_err(),
            ConfigError::EnvParse {
                var: "GBE_CUSUM_THRESHOLD".into(),
                value: "high".into()
            }
        );
    }

    #[test]
    fn env_validation_is_fail_fast() {
        let lookup = lookup_from(&[("GBE_MIN_BIAS", "50")]);
        assert!(matches!(
            HazardConfig::from_lookup(lookup),
            Err(ConfigError::InvertedBounds { .. })
        ));
    }

    // =========================================================================
    // Build
    // =========================================================================

    #[test]
    fn build_produces_components() {
        let (controller, band) = HazardConfig::default().build().unwrap();
        assert_eq!(controller.bias(), 20.0);
        assert!(band.is_empty());
        assert_eq!(band.alpha(), 0.05);
    }
}
