use std::time::Instant;

use super::{traits::DataProducer, types::CollectorResult};

/// Seconds since the agent process started.
///
/// Process uptime rather than `/proc/uptime`: consumers use it to spot agent
/// restarts, which a long-running kernel would hide.
#[derive(Debug, Clone)]
pub struct UptimeCollector {
    started: Instant,
}

impl UptimeCollector {
    pub fn new() -> Self {
        Self::since(Instant::now())
    }

    pub fn since(started: Instant) -> Self {
        UptimeCollector { started }
    }
}

impl Default for UptimeCollector {
    fn default() -> Self {
        UptimeCollector::new()
    }
}

#[async_trait::async_trait]
impl DataProducer for UptimeCollector {
    type Output = u64;

    async fn produce(&self) -> CollectorResult<Self::Output> {
        Ok(self.started.elapsed().as_secs())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_fresh_collector_reports_zero() {
        let collector = UptimeCollector::new();
        assert_eq!(collector.produce().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reports_whole_seconds_since_start() {
        let Some(started) = Instant::now().checked_sub(Duration::from_millis(90_500)) else {
            return;
        };
        let collector = UptimeCollector::since(started);
        assert_eq!(collector.produce().await.unwrap(), 90);
    }
}
