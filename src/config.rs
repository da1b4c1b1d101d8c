//! Runtime configuration for the local pipeline runner.

use std::path::PathBuf;
use std::time::Duration;

use crate::types::JobFrequency;

/// Default directory for snapshot blobs.
const DEFAULT_DATA_DIR: &str = "./data";

/// Default workers per subscription.
const DEFAULT_NUM_WORKERS: usize = 4;

/// Default ack deadline (1 minute).
const DEFAULT_ACK_DEADLINE_SECS: u64 = 60;

/// Default age of the oldest unacked message before alerting (10 minutes).
const DEFAULT_MAX_UNACKED_AGE_SECS: u64 = 600;

/// Default interval between health checks (1 minute).
const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 60;

/// Default interval between immediate refresh triggers (5 minutes).
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 300;

/// Default interval between weekly digest triggers.
const DEFAULT_WEEKLY_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;

/// Default interval between monthly digest triggers (30 days).
const DEFAULT_MONTHLY_INTERVAL_SECS: u64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Root of the filesystem blob store.
    ///
    /// Configure via `WEBSTATUS_DATA_DIR`.
    pub data_dir: PathBuf,

    /// Workers per subscription consumer.
    ///
    /// Configure via `WEBSTATUS_NUM_WORKERS`.
    pub num_workers: usize,

    /// How long a delivery may stay unsettled before it is redelivered.
    ///
    /// Configure via `WEBSTATUS_ACK_DEADLINE_SECS`.
    pub ack_deadline: Duration,

    /// Oldest unacked message age that raises a stale-subscription alert.
    ///
    /// Configure via `WEBSTATUS_MAX_UNACKED_AGE_SECS`.
    pub max_unacked_age: Duration,

    /// Configure via `WEBSTATUS_HEALTH_INTERVAL_SECS`.
    pub health_interval: Duration,

    /// Interval between `IMMEDIATE` batch refresh triggers.
    ///
    /// Configure via `WEBSTATUS_REFRESH_INTERVAL_SECS`.
    pub refresh_interval: Duration,

    /// Interval between `WEEKLY` batch refresh triggers.
    ///
    /// Configure via `WEBSTATUS_WEEKLY_INTERVAL_SECS`.
    pub weekly_interval: Duration,

    /// Configure via `WEBSTATUS_MONTHLY_INTERVAL_SECS`.
    pub monthly_interval: Duration,

    /// JSON file holding the upstream feature list served to every query.
    /// Without it the runner serves an empty list.
    ///
    /// Configure via `WEBSTATUS_FEATURES_FILE`.
    pub features_file: Option<PathBuf>,

    /// JSON file listing saved searches and their subscribers.
    ///
    /// Configure via `WEBSTATUS_SEARCHES_FILE`.
    pub searches_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Config {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            num_workers: DEFAULT_NUM_WORKERS,
            ack_deadline: Duration::from_secs(DEFAULT_ACK_DEADLINE_SECS),
            max_unacked_age: Duration::from_secs(DEFAULT_MAX_UNACKED_AGE_SECS),
            health_interval: Duration::from_secs(DEFAULT_HEALTH_INTERVAL_SECS),
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
            weekly_interval: Duration::from_secs(DEFAULT_WEEKLY_INTERVAL_SECS),
            monthly_interval: Duration::from_secs(DEFAULT_MONTHLY_INTERVAL_SECS),
            features_file: None,
            searches_file: None,
        }
    }

    /// Reads `WEBSTATUS_*` environment variables. Unset or unparseable
    /// values fall back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// How often each frequency's batch refresh fires.
    pub fn refresh_schedule(&self) -> [(JobFrequency, Duration); 3] {
        [
            (JobFrequency::Immediate, self.refresh_interval),
            (JobFrequency::Weekly, self.weekly_interval),
            (JobFrequency::Monthly, self.monthly_interval),
        ]
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let path = |key: &str| lookup(key).filter(|s| !s.is_empty()).map(PathBuf::from);
        let secs = |key: &str, default: u64| {
            Duration::from_secs(
                lookup(key)
                    .and_then(|s| s.parse::<u64>().ok())
                    .filter(|n| *n > 0)
                    .unwrap_or(default),
            )
        };

        Config {
            data_dir: path("WEBSTATUS_DATA_DIR").unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            num_workers: lookup("WEBSTATUS_NUM_WORKERS")
                .and_then(|s| s.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_NUM_WORKERS),
            ack_deadline: secs("WEBSTATUS_ACK_DEADLINE_SECS", DEFAULT_ACK_DEADLINE_SECS),
            max_unacked_age: secs("WEBSTATUS_MAX_UNACKED_AGE_SECS", DEFAULT_MAX_UNACKED_AGE_SECS),
            health_interval: secs("WEBSTATUS_HEALTH_INTERVAL_SECS", DEFAULT_HEALTH_INTERVAL_SECS),
            refresh_interval: secs("WEBSTATUS_REFRESH_INTERVAL_SECS", DEFAULT_REFRESH_INTERVAL_SECS),
            weekly_interval: secs("WEBSTATUS_WEEKLY_INTERVAL_SECS", DEFAULT_WEEKLY_INTERVAL_SECS),
            monthly_interval: secs("WEBSTATUS_MONTHLY_INTERVAL_SECS", DEFAULT_MONTHLY_INTERVAL_SECS),
            features_file: path("WEBSTATUS_FEATURES_FILE"),
            searches_file: path("WEBSTATUS_SEARCHES_FILE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::new();

        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.num_workers, 4);
        assert_eq!(config.ack_deadline, Duration::from_secs(60));
        assert_eq!(config.max_unacked_age, Duration::from_secs(600));
        assert_eq!(config.health_interval, Duration::from_secs(60));
        assert_eq!(config.refresh_interval, Duration::from_secs(300));
        assert_eq!(config.weekly_interval, Duration::from_secs(604_800));
        assert_eq!(config.monthly_interval, Duration::from_secs(2_592_000));
        assert_eq!(config.features_file, None);
        assert_eq!(config.searches_file, None);
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(Config::from_lookup(lookup(&[])), Config::new());
    }

    #[test]
    fn reads_every_variable() {
        let config = Config::from_lookup(lookup(&[
            ("WEBSTATUS_DATA_DIR", "/var/lib/webstatus"),
            ("WEBSTATUS_NUM_WORKERS", "16"),
            ("WEBSTATUS_ACK_DEADLINE_SECS", "30"),
            ("WEBSTATUS_MAX_UNACKED_AGE_SECS", "120"),
            ("WEBSTATUS_HEALTH_INTERVAL_SECS", "5"),
            ("WEBSTATUS_REFRESH_INTERVAL_SECS", "900"),
            ("WEBSTATUS_WEEKLY_INTERVAL_SECS", "3600"),
            ("WEBSTATUS_MONTHLY_INTERVAL_SECS", "7200"),
            ("WEBSTATUS_FEATURES_FILE", "features.json"),
            ("WEBSTATUS_SEARCHES_FILE", "searches.json"),
        ]));

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/webstatus"));
        assert_eq!(config.num_workers, 16);
        assert_eq!(config.ack_deadline, Duration::from_secs(30));
        assert_eq!(config.max_unacked_age, Duration::from_secs(120));
        assert_eq!(config.health_interval, Duration::from_secs(5));
        assert_eq!(config.refresh_interval, Duration::from_secs(900));
        assert_eq!(config.weekly_interval, Duration::from_secs(3600));
        assert_eq!(config.monthly_interval, Duration::from_secs(7200));
        assert_eq!(config.features_file, Some(PathBuf::from("features.json")));
        assert_eq!(config.searches_file, Some(PathBuf::from("searches.json")));
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("WEBSTATUS_NUM_WORKERS", "0"),
            ("WEBSTATUS_ACK_DEADLINE_SECS", "soon"),
            ("WEBSTATUS_HEALTH_INTERVAL_SECS", "0"),
            ("WEBSTATUS_DATA_DIR", ""),
        ]));

        assert_eq!(config.num_workers, 4);
        assert_eq!(config.ack_deadline, Duration::from_secs(60));
        assert_eq!(config.health_interval, Duration::from_secs(60));
        assert_eq!(config.data_dir, PathBuf::from("./data"));
    }

    #[test]
    fn schedule_covers_every_batch_frequency() {
        let config = Config::new();
        let frequencies: Vec<_> = config.refresh_schedule().iter().map(|(f, _)| *f).collect();
        assert_eq!(
            frequencies,
            vec![JobFrequency::Immediate, JobFrequency::Weekly, JobFrequency::Monthly]
        );
        assert!(config.refresh_schedule().iter().all(|(_, period)| !period.is_zero()));
    }
}
