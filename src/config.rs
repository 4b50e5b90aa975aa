//! Configuration surface. One struct per option group, each
//! with `#[serde(default)]` field defaults so a TOML file only needs to
//! override what differs from the defaults below.

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub receiver: ReceiverConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub mqtt: Option<MqttConfig>,
    #[serde(default)]
    pub db: Option<DbConfig>,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub dashboard: Option<DashboardConfig>,
}

impl RelayConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: RelayConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.receiver.username.is_empty() {
            return Err(ConfigError::MissingRequired("receiver.username"));
        }
        if self.receiver.password.is_empty() {
            return Err(ConfigError::MissingRequired("receiver.password"));
        }
        if let Some(mqtt) = &self.mqtt {
            if mqtt.broker.is_empty() {
                return Err(ConfigError::MissingRequired("mqtt.broker"));
            }
            if mqtt.qos > 2 {
                return Err(ConfigError::Invalid {
                    field: "mqtt.qos",
                    detail: format!("{} is not a valid MQTT QoS level", mqtt.qos),
                });
            }
        }
        if let Some(db) = &self.db {
            if db.database_url.is_empty() {
                return Err(ConfigError::MissingRequired("db.database_url"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub username: String,
    pub password: String,
    pub server: String,
    pub port: u16,
    pub conference_room: String,

    pub auto_reconnect: bool,
    pub reconnect_delay_seconds: u64,
    pub max_reconnect_delay_seconds: u64,
    pub reconnect_backoff_factor: f64,
    pub max_reconnect_attempts: Option<u32>,
    pub max_auth_failures: u32,

    pub keepalive_interval_seconds: u64,
    pub message_timeout_seconds: u64,
    pub max_queue_size: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            server: "nwws-oi.weather.gov".to_string(),
            port: 5222,
            conference_room: "nwws@conference.nwws-oi.weather.gov".to_string(),
            auto_reconnect: true,
            reconnect_delay_seconds: 1,
            max_reconnect_delay_seconds: 300,
            reconnect_backoff_factor: 2.0,
            max_reconnect_attempts: None,
            max_auth_failures: 3,
            keepalive_interval_seconds: 60,
            message_timeout_seconds: 75,
            max_queue_size: 5_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorHandlingStrategy {
    FailFast,
    Continue,
    Retry,
    CircuitBreaker,
}

impl Default for ErrorHandlingStrategy {
    fn default() -> Self {
        Self::Continue
    }
}

/// Whether a full ingress queue blocks the submitter or sheds the oldest
/// pending event to make room for the newest one.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    Block,
    DropOldest,
}

impl Default for BackpressurePolicy {
    fn default() -> Self {
        Self::Block
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_queue_size: usize,
    pub processing_timeout_seconds: u64,
    pub backpressure_policy: BackpressurePolicy,

    pub error_handling_strategy: ErrorHandlingStrategy,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub backoff_multiplier: f64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_timeout_seconds: u64,

    pub sink_grace_period_seconds: u64,
    pub shutdown_deadline_seconds: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 5_000,
            processing_timeout_seconds: 30,
            backpressure_policy: BackpressurePolicy::Block,
            error_handling_strategy: ErrorHandlingStrategy::Continue,
            max_retries: 5,
            retry_delay_seconds: 1,
            backoff_multiplier: 2.0,
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout_seconds: 60,
            sink_grace_period_seconds: 30,
            shutdown_deadline_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub window_size: usize,
    pub window_seconds: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_size: 1_000,
            window_seconds: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub topic_prefix: String,
    pub qos: u8,
    pub retain: bool,
    pub message_expiry_minutes: Option<u32>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: String::new(),
            port: 1883,
            username: None,
            password: None,
            client_id: "nwws-relay".to_string(),
            topic_prefix: "nwws".to_string(),
            qos: 1,
            retain: false,
            message_expiry_minutes: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub database_url: String,
    pub pool_size: u32,
    pub pool_recycle_seconds: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            pool_size: 5,
            pool_recycle_seconds: 1800,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub cleanup_enabled: bool,
    pub cleanup_interval_hours: u64,
    pub dry_run_mode: bool,
    pub max_deletions_per_cycle: u32,

    pub respect_product_expiration: bool,
    pub respect_vtec_expiration: bool,
    pub respect_ugc_expiration: bool,
    pub use_product_specific_retention: bool,

    pub vtec_expiration_buffer_hours: i64,
    pub default_retention_days: i64,

    pub short_duration_retention_hours: i64,
    pub medium_duration_retention_hours: i64,
    pub long_duration_retention_hours: i64,
    pub routine_retention_hours: i64,
    pub administrative_retention_days: i64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            cleanup_enabled: true,
            cleanup_interval_hours: 6,
            dry_run_mode: false,
            max_deletions_per_cycle: 500,
            respect_product_expiration: true,
            respect_vtec_expiration: true,
            respect_ugc_expiration: true,
            use_product_specific_retention: true,
            vtec_expiration_buffer_hours: 2,
            default_retention_days: 7,
            short_duration_retention_hours: 1,
            medium_duration_retention_hours: 24,
            long_duration_retention_hours: 72,
            routine_retention_hours: 12,
            administrative_retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        Self::Text
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub file: Option<String>,
    pub max_file_size_mb: u64,
    pub backup_count: u32,
    pub structured: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file: None,
            max_file_size_mb: 100,
            backup_count: 5,
            structured: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub listen_addr: String,
    pub listen_port: u16,
    pub poll_interval_seconds: u64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1".to_string(),
            listen_port: 8080,
            poll_interval_seconds: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let toml_text = r#"
            [receiver]
            username = "nwws"
            password = "secret"
        "#;
        let cfg: RelayConfig = toml::from_str(toml_text).unwrap();
        assert_eq!(cfg.receiver.username, "nwws");
        assert_eq!(cfg.receiver.server, "nwws-oi.weather.gov");
        assert_eq!(cfg.dedup.window_size, 1_000);
        assert_eq!(cfg.pipeline.error_handling_strategy, ErrorHandlingStrategy::Continue);
    }

    #[test]
    fn rejects_missing_username() {
        let toml_text = r#"
            [receiver]
            password = "secret"
        "#;
        let cfg: RelayConfig = toml::from_str(toml_text).unwrap();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::MissingRequired("receiver.username"))
        ));
    }

    #[test]
    fn rejects_invalid_mqtt_qos() {
        let toml_text = r#"
            [receiver]
            username = "nwws"
            password = "secret"
            [mqtt]
            broker = "localhost"
            qos = 9
        "#;
        let cfg: RelayConfig = toml::from_str(toml_text).unwrap();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { field: "mqtt.qos", .. })
        ));
    }
}
