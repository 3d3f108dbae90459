use std::{str::FromStr, time::Duration};

use strum::{AsRefStr, EnumString};
use thiserror::Error;

use super::weights::{DEFAULT_WEIGHTS, MatchWeights};

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ProximityMode {
    /// Candidates inside the radius score higher; the rest stay eligible.
    Boost,
    /// Only candidates inside the radius are eligible.
    Filter,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Ranking knobs, built once and handed to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingConfig {
    /// Proximity cutoff / boost distance in metres.
    pub radius_meters: f64,
    pub proximity_mode: ProximityMode,
    /// Maximum candidates returned; `None` returns everything.
    pub top_k: Option<usize>,
    pub weights: MatchWeights,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            radius_meters: 5_000.0,
            proximity_mode: ProximityMode::Boost,
            top_k: Some(50),
            weights: DEFAULT_WEIGHTS,
        }
    }
}

pub(crate) fn env_parse<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
        _ => Ok(None),
    }
}

/// Positive millisecond duration; `0` is rejected.
pub(crate) fn env_millis(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match env_parse::<u64>(name)? {
        Some(0) => Err(ConfigError::Invalid {
            name,
            value: "0".into(),
        }),
        Some(ms) => Ok(Duration::from_millis(ms)),
        None => Ok(default),
    }
}

impl RankingConfig {
    /// Reads the `LF_MATCH_*` variables over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let top_k = match env_parse::<usize>("LF_MATCH_TOP_K")? {
            Some(0) => None,
            Some(k) => Some(k),
            None => defaults.top_k,
        };

        let config = Self {
            radius_meters: env_parse("LF_MATCH_RADIUS_METERS")?.unwrap_or(defaults.radius_meters),
            proximity_mode: env_parse("LF_MATCH_PROXIMITY_MODE")?.unwrap_or(defaults.proximity_mode),
            top_k,
            weights: MatchWeights {
                embedding: env_parse("LF_MATCH_WEIGHT_EMBEDDING")?
                    .unwrap_or(defaults.weights.embedding),
                location: env_parse("LF_MATCH_WEIGHT_LOCATION")?
                    .unwrap_or(defaults.weights.location),
                category: env_parse("LF_MATCH_WEIGHT_CATEGORY")?
                    .unwrap_or(defaults.weights.category),
                text: env_parse("LF_MATCH_WEIGHT_TEXT")?.unwrap_or(defaults.weights.text),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.radius_meters.is_finite() && self.radius_meters > 0.0) {
            return Err(ConfigError::Invalid {
                name: "LF_MATCH_RADIUS_METERS",
                value: self.radius_meters.to_string(),
            });
        }
        if !self.weights.is_valid() {
            return Err(ConfigError::Invalid {
                name: "LF_MATCH_WEIGHT_*",
                value: format!("{:?}", self.weights),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_env::with_envs;

    #[test]
    fn defaults_are_valid() {
        let config = RankingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.proximity_mode, ProximityMode::Boost);
        assert_eq!(config.top_k, Some(50));
    }

    #[test]
    fn proximity_mode_parses_from_config_strings() {
        assert_eq!("filter".parse::<ProximityMode>(), Ok(ProximityMode::Filter));
        assert_eq!("BOOST".parse::<ProximityMode>(), Ok(ProximityMode::Boost));
        assert!("nearby".parse::<ProximityMode>().is_err());
    }

    const MATCH_VARS: [&str; 7] = [
        "LF_MATCH_RADIUS_METERS",
        "LF_MATCH_TOP_K",
        "LF_MATCH_PROXIMITY_MODE",
        "LF_MATCH_WEIGHT_EMBEDDING",
        "LF_MATCH_WEIGHT_LOCATION",
        "LF_MATCH_WEIGHT_CATEGORY",
        "LF_MATCH_WEIGHT_TEXT",
    ];

    fn match_env<'a>(overrides: &[(&'a str, &'a str)]) -> Vec<(&'a str, Option<&'a str>)> {
        MATCH_VARS
            .iter()
            .map(|var| {
                let value = overrides.iter().find(|(name, _)| name == var).map(|(_, v)| *v);
                (*var, value)
            })
            .collect()
    }

    #[test]
    fn from_env_without_overrides_matches_defaults() {
        with_envs(&match_env(&[]), || {
            assert_eq!(RankingConfig::from_env(), Ok(RankingConfig::default()));
        });
    }

    #[test]
    fn from_env_applies_overrides_and_zero_top_k_is_unlimited() {
        let vars = match_env(&[
            ("LF_MATCH_TOP_K", "0"),
            ("LF_MATCH_PROXIMITY_MODE", "FILTER"),
            ("LF_MATCH_RADIUS_METERS", "1500"),
            ("LF_MATCH_WEIGHT_EMBEDDING", " 0.7 "),
        ]);

        with_envs(&vars, || {
            let config = RankingConfig::from_env().unwrap();

            assert_eq!(config.top_k, None);
            assert_eq!(config.proximity_mode, ProximityMode::Filter);
            assert_eq!(config.radius_meters, 1_500.0);
            assert_eq!(config.weights.embedding, 0.7);
            assert_eq!(config.weights.location, DEFAULT_WEIGHTS.location);
        });
    }

    #[test]
    fn from_env_rejects_negative_weight_and_unknown_mode() {
        with_envs(&match_env(&[("LF_MATCH_WEIGHT_LOCATION", "-0.2")]), || {
            assert!(matches!(
                RankingConfig::from_env(),
                Err(ConfigError::Invalid { name: "LF_MATCH_WEIGHT_*", .. })
            ));
        });

        with_envs(&match_env(&[("LF_MATCH_PROXIMITY_MODE", "nearby")]), || {
            assert_eq!(
                RankingConfig::from_env(),
                Err(ConfigError::Invalid {
                    name: "LF_MATCH_PROXIMITY_MODE",
                    value: "nearby".into(),
                })
            );
        });
    }

    #[test]
    fn rejects_non_positive_radius() {
        let config = RankingConfig {
            radius_meters: 0.0,
            ..RankingConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
