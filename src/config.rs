use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::dialogue::actions::ListenSettings;
use crate::dialogue::confirm::DEFAULT_MIN_CONFIDENCE;
use crate::dialogue::DEFAULT_MAX_STEPS;
use crate::error::ConfigError;

/// Kiosk settings, read from the environment with CLI overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct KioskConfig {
    pub decision_tree_path: PathBuf,
    pub data_dir: PathBuf,
    pub listen_duration: Duration,
    pub listen_timeout: Duration,
    pub max_steps: usize,
    pub fallback_intent: String,
    pub sentiment_min_confidence: f32,
    /// Path to a gguf model used for sentiment fallback (feature `llm`).
    pub sentiment_model: Option<PathBuf>,
    pub sentiment_gpu_layers: u32,
    pub sentiment_ctx: u32,
}

impl Default for KioskConfig {
    fn default() -> Self {
        Self {
            decision_tree_path: PathBuf::from("decision_tree.json"),
            data_dir: PathBuf::from("data"),
            listen_duration: Duration::from_secs(5),
            listen_timeout: Duration::from_secs(10),
            max_steps: DEFAULT_MAX_STEPS,
            fallback_intent: "fallback".into(),
            sentiment_min_confidence: DEFAULT_MIN_CONFIDENCE,
            sentiment_model: None,
            sentiment_gpu_layers: 0,
            sentiment_ctx: 2048,
        }
    }
}

impl KioskConfig {
    /// Build from the process environment; `args[1]` overrides the graph path.
    pub fn from_env(args: &[String]) -> Result<Self, ConfigError> {
        Self::from_lookup(args, |key| env::var(key).ok())
    }

    pub fn from_lookup<F>(args: &[String], lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let decision_tree_path = args
            .get(1)
            .cloned()
            .or_else(|| lookup("DECISION_TREE_PATH"))
            .map_or(defaults.decision_tree_path, PathBuf::from);
        let data_dir = lookup("DATA_DIR").map_or(defaults.data_dir, PathBuf::from);

        let listen_duration = parse_setting(&lookup, "LISTEN_DURATION_SECS")?
            .map_or(defaults.listen_duration, Duration::from_secs);
        let listen_timeout = parse_setting(&lookup, "LISTEN_TIMEOUT_SECS")?
            .map_or(defaults.listen_timeout, Duration::from_secs);
        let max_steps = parse_setting(&lookup, "MAX_STEPS")?.unwrap_or(defaults.max_steps);
        if max_steps == 0 {
            return Err(ConfigError::InvalidSetting {
                key: "MAX_STEPS",
                value: "0".into(),
            });
        }

        let sentiment_min_confidence: f32 = parse_setting(&lookup, "SENTIMENT_MIN_CONFIDENCE")?
            .unwrap_or(defaults.sentiment_min_confidence);
        if !(0.0..=1.0).contains(&sentiment_min_confidence) {
            return Err(ConfigError::InvalidSetting {
                key: "SENTIMENT_MIN_CONFIDENCE",
                value: sentiment_min_confidence.to_string(),
            });
        }

        Ok(Self {
            decision_tree_path,
            data_dir,
            listen_duration,
            listen_timeout,
            max_steps,
            fallback_intent: lookup("FALLBACK_INTENT").unwrap_or(defaults.fallback_intent),
            sentiment_min_confidence,
            sentiment_model: lookup("SENTIMENT_MODEL").map(PathBuf::from),
            sentiment_gpu_layers: parse_setting(&lookup, "SENTIMENT_GPU_LAYERS")?
                .unwrap_or(defaults.sentiment_gpu_layers),
            sentiment_ctx: parse_setting(&lookup, "SENTIMENT_CTX")?
                .unwrap_or(defaults.sentiment_ctx),
        })
    }

    pub fn listen_settings(&self) -> ListenSettings {
        ListenSettings {
            duration: self.listen_duration,
            timeout: self.listen_timeout,
        }
    }
}

fn parse_setting<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidSetting { key, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_set() {
        let config = KioskConfig::from_lookup(&[], lookup(&[])).unwrap();
        assert_eq!(config, KioskConfig::default());
    }

    #[test]
    fn env_and_args() {
        let args = vec!["gatekeeper".to_string(), "custom.json".to_string()];
        let config = KioskConfig::from_lookup(
            &args,
            lookup(&[
                ("DECISION_TREE_PATH", "ignored.json"),
                ("LISTEN_TIMEOUT_SECS", "3"),
                ("MAX_STEPS", "50"),
                ("FALLBACK_INTENT", "unknown"),
                ("SENTIMENT_MODEL", "models/sentiment.gguf"),
            ]),
        )
        .unwrap();
        assert_eq!(config.decision_tree_path, PathBuf::from("custom.json"));
        assert_eq!(config.listen_timeout, Duration::from_secs(3));
        assert_eq!(config.max_steps, 50);
        assert_eq!(config.fallback_intent, "unknown");
        assert_eq!(
            config.sentiment_model,
            Some(PathBuf::from("models/sentiment.gguf"))
        );
    }

    #[test]
    fn rejects_bad_numbers() {
        let err = KioskConfig::from_lookup(&[], lookup(&[("MAX_STEPS", "lots")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidSetting {
                key: "MAX_STEPS",
                ..
            }
        ));
        assert!(KioskConfig::from_lookup(&[], lookup(&[("MAX_STEPS", "0")])).is_err());
        assert!(
            KioskConfig::from_lookup(&[], lookup(&[("SENTIMENT_MIN_CONFIDENCE", "1.5")])).is_err()
        );
    }
}
