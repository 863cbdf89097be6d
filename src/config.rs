use std::path::PathBuf;
use std::time::Duration;

use crate::cache::SESSION_PLAN_TTL;
use crate::services::interleave::DEFAULT_MAX_SAME_TYPE_IN_ROW;
use crate::services::sequencing::DEFAULT_REVIEW_BATCH_FLOOR;
use crate::services::time_budget::{DEFAULT_BUFFER_RATIO, DEFAULT_ITEM_COUNT};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub log: LogSettings,
}

impl Config {
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|value| !value.trim().is_empty());

        Self {
            database_url,
            log: LogSettings::from_env(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogSettings {
    /// `EnvFilter` directives, e.g. `info,danci_session_engine=debug`.
    pub level: String,
    /// Daily log files are written here when set.
    pub file_dir: Option<PathBuf>,
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_values(
            std::env::var("RUST_LOG").ok(),
            std::env::var("SESSION_LOG_DIR").ok(),
        )
    }

    fn from_values(level: Option<String>, file_dir: Option<String>) -> Self {
        Self {
            level: level
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| "info".to_string()),
            file_dir: file_dir
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        }
    }
}

/// Tunables for plan composition.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub cache_ttl: Duration,
    pub buffer_ratio: f64,
    pub max_same_type_in_row: usize,
    pub low_mastery_threshold: f64,
    pub default_item_count: usize,
    pub review_batch_floor: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl: SESSION_PLAN_TTL,
            buffer_ratio: DEFAULT_BUFFER_RATIO,
            max_same_type_in_row: DEFAULT_MAX_SAME_TYPE_IN_ROW,
            low_mastery_threshold: 0.5,
            default_item_count: DEFAULT_ITEM_COUNT,
            review_batch_floor: DEFAULT_REVIEW_BATCH_FLOOR,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|value| value.trim().parse::<T>().ok())
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cache_ttl = env_parse::<u64>("PLAN_CACHE_TTL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.cache_ttl);
        let buffer_ratio = env_parse::<f64>("PLAN_BUFFER_RATIO")
            .filter(|v| (0.0..1.0).contains(v))
            .unwrap_or(defaults.buffer_ratio);
        let max_same_type_in_row = env_parse::<usize>("PLAN_MAX_SAME_TYPE_IN_ROW")
            .filter(|v| *v > 0)
            .unwrap_or(defaults.max_same_type_in_row);
        let low_mastery_threshold = env_parse::<f64>("PLAN_LOW_MASTERY_THRESHOLD")
            .filter(|v| (0.0..=1.0).contains(v))
            .unwrap_or(defaults.low_mastery_threshold);
        let default_item_count = env_parse::<usize>("PLAN_DEFAULT_ITEM_COUNT")
            .filter(|v| *v > 0)
            .unwrap_or(defaults.default_item_count);
        let review_batch_floor = env_parse::<usize>("PLAN_REVIEW_BATCH_FLOOR")
            .unwrap_or(defaults.review_batch_floor);

        Self {
            cache_ttl,
            buffer_ratio,
            max_same_type_in_row,
            low_mastery_threshold,
            default_item_count,
            review_batch_floor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.buffer_ratio, 0.2);
        assert_eq!(config.max_same_type_in_row, 2);
        assert_eq!(config.low_mastery_threshold, 0.5);
        assert_eq!(config.default_item_count, 10);
        assert_eq!(config.review_batch_floor, 10);
    }

    #[test]
    fn log_settings_enable_file_logs_only_with_a_directory() {
        let quiet = LogSettings::from_values(None, Some("  ".to_string()));
        assert_eq!(quiet.level, "info");
        assert_eq!(quiet.file_dir, None);

        let filed = LogSettings::from_values(Some("debug".to_string()), Some("/var/log/danci".to_string()));
        assert_eq!(filed.level, "debug");
        assert_eq!(filed.file_dir, Some(PathBuf::from("/var/log/danci")));
    }
}
