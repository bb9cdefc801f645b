//! Coordinator configuration, status, and event types

use crate::error::CameraError;
use crate::session::{RetryPolicy, SessionState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// One logical camera: a stable key ("front", "back", ...) bound to a
/// physical device id. Several keys may name the same physical device; the
/// coordinator deduplicates them at open time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraSpec {
    pub key: String,
    pub physical_id: String,
}

impl CameraSpec {
    pub fn new(key: impl Into<String>, physical_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            physical_id: physical_id.into(),
        }
    }
}

/// Configuration for the session coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoordinatorConfig {
    /// Hard cap on simultaneously open devices.
    pub max_open_devices: usize,

    /// Recording resolution.
    pub record_width: u32,
    pub record_height: u32,

    /// Directory recordings are written into.
    pub output_dir: String,

    /// How long a recording start waits for all sessions to reconfigure
    /// before proceeding with whatever subset is ready.
    pub barrier_timeout_ms: u64,

    /// Fixed delay between reconnect attempts.
    pub reconnect_delay_ms: u64,

    /// Reconnect attempts before a session gives up.
    pub max_reconnect_attempts: u32,

    /// Gap between consecutive still-capture requests.
    pub capture_stagger_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_open_devices: 4,
            record_width: 1280,
            record_height: 800,
            output_dir: "recordings".to_string(),
            barrier_timeout_ms: 3000,
            reconnect_delay_ms: 2000,
            max_reconnect_attempts: 30,
            capture_stagger_ms: 300,
        }
    }
}

impl CoordinatorConfig {
    pub fn barrier_timeout(&self) -> Duration {
        Duration::from_millis(self.barrier_timeout_ms)
    }

    pub fn capture_stagger(&self) -> Duration {
        Duration::from_millis(self.capture_stagger_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            delay: Duration::from_millis(self.reconnect_delay_ms),
            max_attempts: self.max_reconnect_attempts,
        }
    }

    /// Load a configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_open_devices == 0 {
            return Err(ConfigError::Invalid(
                "maxOpenDevices must be at least 1".to_string(),
            ));
        }
        if self.record_width == 0 || self.record_height == 0 {
            return Err(ConfigError::Invalid(
                "record resolution must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Human-facing per-camera status, surfaced through the event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CameraStatus {
    Opened,
    PreviewStarted,
    Recording,
    Reconnecting { attempt: u32 },
    GivenUp,
    Closed,
}

impl fmt::Display for CameraStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraStatus::Opened => write!(f, "opened"),
            CameraStatus::PreviewStarted => write!(f, "preview started"),
            CameraStatus::Recording => write!(f, "recording"),
            CameraStatus::Reconnecting { attempt } => {
                write!(f, "reconnecting (attempt {attempt})")
            }
            CameraStatus::GivenUp => write!(f, "gave up reconnecting"),
            CameraStatus::Closed => write!(f, "closed"),
        }
    }
}

/// Events emitted by the coordinator for the presentation layer.
#[derive(Debug, Clone)]
pub enum CameraEvent {
    /// A camera's human-facing status changed.
    Status { key: String, status: CameraStatus },

    /// A camera reported an error.
    Error { key: String, error: CameraError },

    /// A sink rotated to a new segment file.
    SegmentSwitch { key: String, segment_index: u32 },

    /// A still capture completed.
    StillCaptured { key: String },

    /// Synchronized recording is running.
    RecordingStarted,

    /// Synchronized recording has stopped.
    RecordingStopped,
}

/// Snapshot of coordinator state for cheap synchronous reads.
#[derive(Debug, Clone, Default)]
pub struct RecorderStatus {
    pub is_recording: bool,
    pub active_keys: Vec<String>,
    pub states: HashMap<String, SessionState>,
}

impl RecorderStatus {
    /// Keys whose device handle is currently open.
    pub fn connected_count(&self) -> usize {
        self.states
            .values()
            .filter(|state| state.is_connected())
            .count()
    }

    pub fn has_connected(&self) -> bool {
        self.connected_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.max_open_devices, 4);
        assert_eq!(config.record_width, 1280);
        assert_eq!(config.record_height, 800);
        assert_eq!(config.barrier_timeout(), Duration::from_millis(3000));
        assert_eq!(config.retry_policy().max_attempts, 30);
        assert_eq!(config.capture_stagger(), Duration::from_millis(300));
    }

    #[test]
    fn test_config_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("multicam.json");
        fs::write(
            &path,
            r#"{ "maxOpenDevices": 2, "outputDir": "/videos", "barrierTimeoutMs": 1000 }"#,
        )
        .unwrap();

        let config = CoordinatorConfig::from_file(&path).unwrap();
        assert_eq!(config.max_open_devices, 2);
        assert_eq!(config.output_dir, "/videos");
        assert_eq!(config.barrier_timeout(), Duration::from_millis(1000));
        // unspecified fields fall back to defaults
        assert_eq!(config.record_width, 1280);
    }

    #[test]
    fn test_config_rejects_zero_devices() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("multicam.json");
        fs::write(&path, r#"{ "maxOpenDevices": 0 }"#).unwrap();
        assert!(matches!(
            CoordinatorConfig::from_file(&path),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_status_human_strings() {
        assert_eq!(CameraStatus::PreviewStarted.to_string(), "preview started");
        assert_eq!(
            CameraStatus::Reconnecting { attempt: 3 }.to_string(),
            "reconnecting (attempt 3)"
        );
    }
}
