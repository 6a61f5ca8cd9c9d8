//! Agent-side sections: scheduling, spool, events, vision, snapshots, upload.

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// `[agent]`: identity and work intervals.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AgentConfig {
    /// Device identifier used in payloads and the default topic layout.
    /// Empty means the host name.
    #[validate(length(max = 64, message = "Device id must not exceed 64 characters"))]
    pub device_id: String,

    /// Seconds between telemetry publishes.
    #[validate(range(min = 1, max = 86400))]
    pub heartbeat_interval: u64,

    /// Seconds between captures.
    #[validate(range(min = 1, max = 3600))]
    pub capture_interval: u64,

    /// Scheduler resolution in milliseconds.
    #[validate(range(min = 10, max = 1000))]
    pub tick_interval_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            device_id: String::new(),
            heartbeat_interval: 30,
            capture_interval: 2,
            tick_interval_ms: 50,
        }
    }
}

impl AgentConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval)
    }

    pub fn capture(&self) -> Duration {
        Duration::from_secs(self.capture_interval)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// `[spool]`: the on-disk backlog of undelivered messages.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SpoolConfig {
    pub path: PathBuf,

    /// File size that triggers a trim after an append.
    #[validate(range(min = 1024))]
    pub max_bytes: u64,

    /// Records kept by a trim (the most recent ones).
    #[validate(range(min = 1))]
    pub keep_records: usize,

    /// Records attempted per flush; the rest wait for the next one.
    #[validate(range(min = 1))]
    pub flush_max_records: usize,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        SpoolConfig {
            path: PathBuf::from("/var/tmp/iot_spool/spool.jsonl"),
            max_bytes: 5_000_000,
            keep_records: 5000,
            flush_max_records: 500,
        }
    }
}

/// `[events]`: detection event emission.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct EventsConfig {
    /// Seconds before an unchanged detection is announced again.
    pub cooldown: u64,

    /// Detections below this confidence are discarded.
    #[validate(range(min = 0.0, max = 1.0))]
    pub confidence_threshold: f32,
}

impl Default for EventsConfig {
    fn default() -> Self {
        EventsConfig {
            cooldown: 8,
            confidence_threshold: 0.45,
        }
    }
}

impl EventsConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisionMode {
    /// Telemetry only.
    #[default]
    None,
    /// External capture and detect commands.
    Command,
}

/// `[vision]`: how frames are captured and analysed.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_vision_commands"))]
pub struct VisionConfig {
    pub mode: VisionMode,

    /// Command line that writes one JPEG frame to stdout.
    pub capture_command: Vec<String>,

    /// Command line that reads a JPEG on stdin and prints detections as JSON.
    pub detect_command: Vec<String>,

    /// Seconds either command may run.
    #[validate(range(min = 1, max = 300))]
    pub command_timeout: u64,
}

impl Default for VisionConfig {
    fn default() -> Self {
        VisionConfig {
            mode: VisionMode::None,
            capture_command: vec![
                "rpicam-still".into(),
                "-n".into(),
                "-t".into(),
                "1".into(),
                "-e".into(),
                "jpg".into(),
                "-o".into(),
                "-".into(),
            ],
            detect_command: Vec::new(),
            command_timeout: 10,
        }
    }
}

impl VisionConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout)
    }
}

fn validate_vision_commands(config: &VisionConfig) -> Result<(), ValidationError> {
    if config.mode == VisionMode::Command
        && (config.capture_command.is_empty() || config.detect_command.is_empty())
    {
        return Err(ValidationError::new("vision_commands").with_message(
            "mode = \"command\" needs both capture_command and detect_command".into(),
        ));
    }
    Ok(())
}

/// `[snapshots]`: where event frames are kept.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SnapshotConfig {
    pub dir: PathBuf,

    /// Inline the JPEG as base64 in the event when small enough.
    pub send_base64: bool,

    #[validate(range(min = 1, max = 10240))]
    pub base64_max_kb: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        SnapshotConfig {
            dir: PathBuf::from("/var/tmp/iot_snapshots"),
            send_base64: false,
            base64_max_kb: 200,
        }
    }
}

/// `[upload]`: optional HTTP upload of event snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct UploadConfig {
    /// Endpoint receiving the multipart upload. Empty disables uploading.
    #[validate(custom(function = "validate_upload_url"))]
    pub url: String,

    /// Sent as `Authorization: Bearer <token>` when set.
    pub token: Option<String>,

    #[validate(range(min = 1, max = 300))]
    pub timeout: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            url: String::new(),
            token: None,
            timeout: 10,
        }
    }
}

impl UploadConfig {
    pub fn is_enabled(&self) -> bool {
        !self.url.is_empty()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

fn validate_upload_url(url: &str) -> Result<(), ValidationError> {
    if url.is_empty() || url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ValidationError::new("upload_url")
            .with_message("Upload URL must start with http:// or https://".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(AgentConfig::default().validate().is_ok());
        assert!(SpoolConfig::default().validate().is_ok());
        assert!(EventsConfig::default().validate().is_ok());
        assert!(VisionConfig::default().validate().is_ok());
        assert!(SnapshotConfig::default().validate().is_ok());
        assert!(UploadConfig::default().validate().is_ok());
    }

    #[test]
    fn test_default_intervals() {
        let agent = AgentConfig::default();
        assert_eq!(agent.heartbeat(), Duration::from_secs(30));
        assert_eq!(agent.capture(), Duration::from_secs(2));
        assert_eq!(agent.tick(), Duration::from_millis(50));
        assert_eq!(EventsConfig::default().cooldown(), Duration::from_secs(8));
    }

    #[test]
    fn test_command_mode_requires_both_commands() {
        let vision = VisionConfig {
            mode: VisionMode::Command,
            ..Default::default()
        };
        assert!(vision.validate().is_err());

        let vision = VisionConfig {
            mode: VisionMode::Command,
            detect_command: vec!["/usr/local/bin/detect".into()],
            ..Default::default()
        };
        assert!(vision.validate().is_ok());
    }

    #[test]
    fn test_upload_url_scheme() {
        let upload = UploadConfig {
            url: "ftp://example.com".into(),
            ..Default::default()
        };
        assert!(upload.validate().is_err());
        assert!(!UploadConfig::default().is_enabled());
    }

    #[test]
    fn test_threshold_range() {
        let events = EventsConfig {
            confidence_threshold: 1.5,
            ..Default::default()
        };
        assert!(events.validate().is_err());
    }
}
