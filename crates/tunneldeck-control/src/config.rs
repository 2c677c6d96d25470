//! Runtime configuration of the fleet manager

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Fleet manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Root directory of the partitioned file logs
    pub log_dir: PathBuf,

    /// Calendar days of file logs kept by retention cleanup
    pub log_retention_days: u32,

    /// Bound on opening an event stream
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Bound on a connectivity probe
    #[serde(with = "duration_secs")]
    pub probe_timeout: Duration,

    /// Keep a recycle-bin copy of tunnels removed by the event stream
    pub recycle_on_delete: bool,

    /// Largest accepted event-stream record
    pub max_frame_bytes: usize,

    /// Period of the background reconciliation of every endpoint
    #[serde(default, with = "opt_duration_secs")]
    pub reconcile_interval: Option<Duration>,
}

/// Helper module for serializing Duration as seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

mod opt_duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(duration) => serializer.serialize_some(&duration.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.filter(|s| *s > 0).map(Duration::from_secs))
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            log_retention_days: 7,
            connect_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
            recycle_on_delete: true,
            max_frame_bytes: tunneldeck_proto::DEFAULT_MAX_FRAME_BYTES,
            reconcile_interval: None,
        }
    }
}

impl FleetConfig {
    pub fn builder() -> FleetConfigBuilder {
        FleetConfigBuilder::default()
    }
}

/// Builder for FleetConfig
#[derive(Default)]
pub struct FleetConfigBuilder {
    config: FleetConfig,
}

impl FleetConfigBuilder {
    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.log_dir = dir.into();
        self
    }

    pub fn log_retention_days(mut self, days: u32) -> Self {
        self.config.log_retention_days = days;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.config.probe_timeout = timeout;
        self
    }

    pub fn recycle_on_delete(mut self, enabled: bool) -> Self {
        self.config.recycle_on_delete = enabled;
        self
    }

    pub fn max_frame_bytes(mut self, bytes: usize) -> Self {
        self.config.max_frame_bytes = bytes;
        self
    }

    pub fn reconcile_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.reconcile_interval = interval;
        self
    }

    pub fn build(self) -> Result<FleetConfig, String> {
        if self.config.log_retention_days == 0 {
            return Err("log_retention_days must be at least 1".to_string());
        }
        if self.config.connect_timeout.is_zero() || self.config.probe_timeout.is_zero() {
            return Err("timeouts must be greater than zero".to_string());
        }
        if self.config.max_frame_bytes == 0 {
            return Err("max_frame_bytes must be greater than zero".to_string());
        }
        if self.config.reconcile_interval.is_some_and(|i| i.is_zero()) {
            return Err("reconcile_interval must be greater than zero".to_string());
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FleetConfig::default();
        assert_eq!(config.log_dir, PathBuf::from("logs"));
        assert_eq!(config.log_retention_days, 7);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.probe_timeout, Duration::from_secs(5));
        assert!(config.recycle_on_delete);
        assert_eq!(config.reconcile_interval, None);
    }

    #[test]
    fn test_config_builder() {
        let config = FleetConfig::builder()
            .log_dir("/var/log/tunneldeck")
            .log_retention_days(30)
            .recycle_on_delete(false)
            .reconcile_interval(Some(Duration::from_secs(300)))
            .build()
            .unwrap();

        assert_eq!(config.log_retention_days, 30);
        assert!(!config.recycle_on_delete);
        assert_eq!(config.reconcile_interval, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_config_builder_rejects_zero_values() {
        assert!(FleetConfig::builder().log_retention_days(0).build().is_err());
        assert!(FleetConfig::builder()
            .connect_timeout(Duration::ZERO)
            .build()
            .is_err());
        assert!(FleetConfig::builder().max_frame_bytes(0).build().is_err());
    }

    #[test]
    fn test_durations_serialize_as_seconds() {
        let config = FleetConfig::builder()
            .reconcile_interval(Some(Duration::from_secs(60)))
            .build()
            .unwrap();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["connect_timeout"], 10);
        assert_eq!(json["reconcile_interval"], 60);

        let parsed: FleetConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, config);

        let mut json = serde_json::to_value(FleetConfig::default()).unwrap();
        json.as_object_mut().unwrap().remove("reconcile_interval");
        let parsed: FleetConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.reconcile_interval, None);
    }
}
