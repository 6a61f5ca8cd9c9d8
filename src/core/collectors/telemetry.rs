use tracing::debug;

use super::{
    filesys::FilesystemCollector,
    network::NetworkCollector,
    thermal::ThermalCollector,
    traits::DataProducer,
    types::{CollectorResult, TelemetrySample},
    uptime::UptimeCollector,
};

/// Combines the per-metric producers into one heartbeat sample.
///
/// A failing producer leaves its field empty (`ip`) or null (`cpu_temp_c`,
/// `disk`); sampling itself never fails.
#[derive(Debug, Clone, Default)]
pub struct TelemetryCollector {
    network: NetworkCollector,
    uptime: UptimeCollector,
    thermal: ThermalCollector,
    filesystem: FilesystemCollector,
}

impl TelemetryCollector {
    pub fn new(
        network: NetworkCollector,
        uptime: UptimeCollector,
        thermal: ThermalCollector,
        filesystem: FilesystemCollector,
    ) -> Self {
        TelemetryCollector {
            network,
            uptime,
            thermal,
            filesystem,
        }
    }
}

#[async_trait::async_trait]
impl DataProducer for TelemetryCollector {
    type Output = TelemetrySample;

    async fn produce(&self) -> CollectorResult<Self::Output> {
        let (ip, uptime_s, cpu_temp_c, disk) = tokio::join!(
            self.network.produce(),
            self.uptime.produce(),
            self.thermal.produce(),
            self.filesystem.produce(),
        );

        Ok(TelemetrySample {
            ip: ip.unwrap_or_else(|e| {
                debug!("ip unavailable: {}", e);
                String::new()
            }),
            uptime_s: uptime_s.unwrap_or_default(),
            cpu_temp_c: cpu_temp_c
                .map_err(|e| debug!("cpu_temp_c unavailable: {}", e))
                .ok(),
            disk: disk.map_err(|e| debug!("disk unavailable: {}", e)).ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tracing_test::traced_test;

    use super::*;

    #[tokio::test]
    #[traced_test]
    async fn test_failing_producers_become_nulls() {
        let collector = TelemetryCollector::new(
            NetworkCollector::with_probe("not a host"),
            UptimeCollector::new(),
            ThermalCollector::with_paths(vec![PathBuf::from("/nonexistent/temp")]),
            FilesystemCollector::for_mount(PathBuf::from("/nonexistent/mount")),
        );

        let sample = collector.produce().await.unwrap();
        assert_eq!(sample.ip, "");
        assert_eq!(sample.uptime_s, 0);
        assert!(sample.cpu_temp_c.is_none());
        assert!(sample.disk.is_none());
        assert!(logs_contain("cpu_temp_c unavailable"));
    }

    #[tokio::test]
    async fn test_sample_serializes_with_nulls() {
        let sample = TelemetrySample {
            ip: "192.168.1.20".into(),
            uptime_s: 42,
            cpu_temp_c: None,
            disk: None,
        };
        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(json["ip"], "192.168.1.20");
        assert_eq!(json["uptime_s"], 42);
        assert!(json["cpu_temp_c"].is_null());
        assert!(json["disk"].is_null());
    }
}
