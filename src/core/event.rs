//! Payloads published on the telemetry and events topics.

use serde::Serialize;
use time::OffsetDateTime;

use super::{
    collectors::TelemetrySample,
    vision::{Detection, DetectionResult},
};

/// Heartbeat published on `<base>/telemetry`.
///
/// ```json
/// {"ts":"2026-03-01T10:00:00Z","device_id":"cam","ip":"192.168.1.20","uptime_s":60,
///  "cpu_temp_c":48.3,"disk":{"total_mb":29000,"used_mb":5000,"free_mb":24000,"used_pct":17.2}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryPayload {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub device_id: String,
    #[serde(flatten)]
    pub sample: TelemetrySample,
}

impl TelemetryPayload {
    pub fn new(device_id: impl Into<String>, sample: TelemetrySample) -> Self {
        TelemetryPayload {
            ts: OffsetDateTime::now_utc(),
            device_id: device_id.into(),
            sample,
        }
    }
}

/// Detection event published on `<base>/events`.
///
/// The snapshot fields are null when no snapshot was taken, when the image
/// is too large to inline, or when there is no uploader.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventPayload {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub device_id: String,
    pub faces: u32,
    pub labels: Vec<String>,
    pub detections: Vec<Detection>,
    pub snapshot_path: Option<String>,
    pub snapshot_b64: Option<String>,
    pub snapshot_url: Option<String>,
}

impl EventPayload {
    /// Event without snapshot fields; this form is also the upload metadata.
    pub fn new(device_id: impl Into<String>, result: &DetectionResult) -> Self {
        EventPayload {
            ts: OffsetDateTime::now_utc(),
            device_id: device_id.into(),
            faces: result.faces,
            labels: result.labels(),
            detections: result.detections.clone(),
            snapshot_path: None,
            snapshot_b64: None,
            snapshot_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::core::collectors::DiskUsage;

    #[test]
    fn test_telemetry_payload_is_flat() {
        let payload = TelemetryPayload {
            ts: datetime!(2026-03-01 10:00:00 UTC),
            device_id: "cam".into(),
            sample: TelemetrySample {
                ip: String::new(),
                uptime_s: 60,
                cpu_temp_c: Some(48.3),
                disk: Some(DiskUsage {
                    total_mb: 100,
                    used_mb: 25,
                    free_mb: 75,
                    used_pct: 25.0,
                }),
            },
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["ts"], "2026-03-01T10:00:00Z");
        assert_eq!(json["device_id"], "cam");
        assert_eq!(json["ip"], "");
        assert_eq!(json["uptime_s"], 60);
        assert_eq!(json["disk"]["used_pct"], 25.0);
        assert!(json.get("sample").is_none());
    }

    #[test]
    fn test_event_payload_fields() {
        let result = DetectionResult {
            detections: vec![Detection {
                label: "person".into(),
                conf: 0.9,
                bbox: [1, 2, 3, 4],
            }],
            faces: 1,
        };

        let payload = EventPayload::new("cam", &result);
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["faces"], 1);
        assert_eq!(json["labels"], serde_json::json!(["person"]));
        assert_eq!(json["detections"][0]["box"], serde_json::json!([1, 2, 3, 4]));
        assert!(json["snapshot_path"].is_null());
        assert!(json["snapshot_b64"].is_null());
        assert!(json["snapshot_url"].is_null());
    }
}
