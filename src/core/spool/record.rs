use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::error::RecordError;

fn default_qos() -> u8 {
    1
}

/// One undelivered message, stored as a single JSON line:
///
/// ```text
/// {"topic":"home/iot/cam/telemetry","payload":"{\"ts\":...}","qos":1,"retain":false,"ts":"2026-03-01T10:00:00Z"}
/// ```
///
/// The payload is always text; structured payloads are serialized before
/// they are queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRecord {
    pub topic: String,

    pub payload: String,

    #[serde(default = "default_qos")]
    pub qos: u8,

    #[serde(default)]
    pub retain: bool,

    #[serde(rename = "ts", with = "time::serde::rfc3339::option", default)]
    pub enqueued_at: Option<OffsetDateTime>,
}

impl QueueRecord {
    /// A record stamped with the current time.
    pub fn new(topic: impl Into<String>, payload: impl Into<String>, qos: u8, retain: bool) -> Self {
        QueueRecord {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
            enqueued_at: Some(OffsetDateTime::now_utc()),
        }
    }

    /// Parses one spool line. Rejects records that could never be published.
    pub fn parse(line: &str) -> Result<Self, RecordError> {
        let record: QueueRecord = serde_json::from_str(line)?;
        if record.qos > 2 {
            return Err(RecordError::QoS(record.qos));
        }
        if record.topic.is_empty() {
            return Err(RecordError::EmptyTopic);
        }
        Ok(record)
    }

    /// Compact JSON, without the trailing newline.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn test_wire_format() {
        let record = QueueRecord {
            topic: "home/iot/cam/events".into(),
            payload: r#"{"faces":1}"#.into(),
            qos: 1,
            retain: false,
            enqueued_at: Some(datetime!(2026-03-01 10:00:00 UTC)),
        };

        let line = record.to_line().unwrap();
        assert_eq!(
            line,
            r#"{"topic":"home/iot/cam/events","payload":"{\"faces\":1}","qos":1,"retain":false,"ts":"2026-03-01T10:00:00Z"}"#
        );
        assert!(!line.contains('\n'));
        assert_eq!(QueueRecord::parse(&line).unwrap(), record);
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let record = QueueRecord::parse(r#"{"topic":"t","payload":"p"}"#).unwrap();
        assert_eq!(record.qos, 1);
        assert!(!record.retain);
        assert!(record.enqueued_at.is_none());
    }

    #[test]
    fn test_offset_timestamps_are_accepted() {
        let record = QueueRecord::parse(
            r#"{"topic":"t","payload":"p","ts":"2026-03-01T10:00:00.123456+00:00"}"#,
        )
        .unwrap();
        assert!(record.enqueued_at.is_some());
    }

    #[test]
    fn test_unpublishable_records_rejected() {
        assert!(matches!(
            QueueRecord::parse(r#"{"topic":"t","payload":"p","qos":3}"#),
            Err(RecordError::QoS(3))
        ));
        assert!(matches!(
            QueueRecord::parse(r#"{"topic":"","payload":"p"}"#),
            Err(RecordError::EmptyTopic)
        ));
        assert!(matches!(
            QueueRecord::parse(r#"{"topic":"t"}"#),
            Err(RecordError::Json(_))
        ));
        assert!(matches!(
            QueueRecord::parse("not json"),
            Err(RecordError::Json(_))
        ));
    }

    #[test]
    fn test_new_stamps_current_time() {
        let before = OffsetDateTime::now_utc();
        let record = QueueRecord::new("t", "p", 0, true);
        let stamped = record.enqueued_at.unwrap();
        assert!(stamped >= before);
        assert!(record.retain);
    }
}
