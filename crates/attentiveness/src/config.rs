//! Monitor configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::MonitorError;

/// Attentiveness monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Sampling period (milliseconds)
    pub interval_ms: u64,

    /// One person in front of the camera (self-study deployments)
    pub single_subject: bool,

    /// Report key for unidentified samples in single-subject mode
    pub subject_label: String,

    /// Report key for unidentified samples otherwise
    pub unknown_label: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            single_subject: false,
            subject_label: "You".to_string(),
            unknown_label: lecture_api::UNKNOWN_LABEL.to_string(),
        }
    }
}

impl MonitorConfig {
    /// Config for a single person in front of the camera
    pub fn single_subject() -> Self {
        Self {
            single_subject: true,
            ..Default::default()
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.interval_ms == 0 {
            return Err(MonitorError::InvalidConfig(
                "sampling interval must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Report key for samples without an identity
    pub fn unidentified_label(&self) -> &str {
        if self.single_subject {
            &self.subject_label
        } else {
            &self.unknown_label
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_interval_rejected() {
        assert!(MonitorConfig::default().validate().is_ok());

        let config = MonitorConfig {
            interval_ms: 0,
            ..MonitorConfig::single_subject()
        };
        assert!(matches!(
            config.validate(),
            Err(MonitorError::InvalidConfig(_))
        ));
    }
}
