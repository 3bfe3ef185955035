//! Agent configuration
//!
//! Loaded from an optional TOML file and `CLASSROOM__SECTION__KEY`
//! environment overrides.

use std::path::{Path, PathBuf};

use attendance::AggregatorConfig;
use attentiveness::MonitorConfig;
use camera_capture::CaptureConfig;
use config::{Config, ConfigError, Environment, File};
use event_bus::{BusConfig, MqttConfig};
use lecture_api::ApiConfig;
use serde::Deserialize;
use session::ControllerConfig;

use crate::rate_limit::RateLimitConfig;

/// File read when no `--config` is given
pub const DEFAULT_CONFIG_FILE: &str = "classroom-agent.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub api: ApiConfig,
    pub bus: BusSettings,
    pub camera: CameraSettings,
    pub session: SessionSettings,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

impl AgentConfig {
    /// Load configuration. An explicit path must exist; the default file may not.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("CLASSROOM")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("bus.endpoints")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Self>()
            .and_then(|config| {
                config
                    .session
                    .controller_config()
                    .validate()
                    .map_err(|e| ConfigError::Message(e.to_string()))?;
                Ok(config)
            })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    /// Run without room events when false
    pub enabled: bool,
    #[serde(flatten)]
    pub mqtt: MqttConfig,
    #[serde(flatten)]
    pub events: BusConfig,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            mqtt: MqttConfig::default(),
            events: BusConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraProviderKind {
    /// Generated frames, no hardware
    #[default]
    Synthetic,
    /// Still images from `snapshot_dir`
    Snapshot,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub provider: CameraProviderKind,
    pub snapshot_dir: PathBuf,
    #[serde(flatten)]
    pub capture: CaptureConfig,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            provider: CameraProviderKind::default(),
            snapshot_dir: PathBuf::from("snapshots"),
            capture: CaptureConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub first_checkpoint_delay_ms: u64,
    pub attentiveness_interval_ms: u64,
    /// Minimum recognition confidence counted toward attendance
    pub confidence_threshold: f32,
    /// Label unidentified samples as the single subject
    pub single_subject: bool,
    pub assessment_timeout_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let controller = ControllerConfig::default();
        Self {
            first_checkpoint_delay_ms: controller.first_checkpoint_delay_ms,
            attentiveness_interval_ms: controller.monitor.interval_ms,
            confidence_threshold: controller.aggregator.confidence_threshold,
            single_subject: controller.monitor.single_subject,
            assessment_timeout_secs: controller.assessment_timeout_secs,
        }
    }
}

impl SessionSettings {
    pub fn controller_config(&self) -> ControllerConfig {
        let monitor = if self.single_subject {
            MonitorConfig::single_subject()
        } else {
            MonitorConfig::default()
        };
        ControllerConfig {
            first_checkpoint_delay_ms: self.first_checkpoint_delay_ms,
            aggregator: AggregatorConfig {
                confidence_threshold: self.confidence_threshold,
                ..AggregatorConfig::default()
            },
            monitor: MonitorConfig {
                interval_ms: self.attentiveness_interval_ms,
                ..monitor
            },
            assessment_timeout_secs: self.assessment_timeout_secs,
            ..ControllerConfig::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub rate_limit: RateLimitConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter; `RUST_LOG` takes precedence
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let config = AgentConfig::load(None).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert_eq!(config.camera.provider, CameraProviderKind::Synthetic);
        assert!(config.bus.enabled);
        assert_eq!(config.session.first_checkpoint_delay_ms, 3000);
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        assert!(AgentConfig::load(Some(Path::new("/nonexistent/agent.toml"))).is_err());
    }

    #[test]
    fn test_file_sections() {
        let dir = std::env::temp_dir().join(format!("classroom-agent-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("agent.toml");
        std::fs::write(
            &path,
            r#"
[api]
base_url = "http://backend:5000/api"

[bus]
endpoints = ["broker-a:1883", "broker-b:1883"]
recent_capacity = 20

[camera]
provider = "snapshot"
snapshot_dir = "/var/lib/classroom/frames"
jpeg_quality = 70

[session]
single_subject = true
confidence_threshold = 0.7
"#,
        )
        .unwrap();

        let config = AgentConfig::load(Some(&path)).unwrap();
        assert_eq!(config.api.base_url, "http://backend:5000/api");
        assert_eq!(config.bus.mqtt.endpoints.len(), 2);
        assert_eq!(config.bus.events.recent_capacity, 20);
        assert_eq!(config.camera.provider, CameraProviderKind::Snapshot);
        assert_eq!(config.camera.capture.jpeg_quality, 70);

        let controller = config.session.controller_config();
        assert!(controller.monitor.single_subject);
        assert_eq!(controller.aggregator.confidence_threshold, 0.7);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_zero_sampling_interval_fails() {
        let dir = std::env::temp_dir().join(format!("classroom-agent-zero-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("agent.toml");
        std::fs::write(&path, "[session]\nattentiveness_interval_ms = 0\n").unwrap();

        let result = AgentConfig::load(Some(&path));
        std::fs::remove_dir_all(&dir).ok();
        assert!(result.is_err());
    }
}
