use std::path::PathBuf;

use tracing::trace;

use super::{error::CollectorError, traits::DataProducer, types::CollectorResult};

/// sysfs locations of the SoC temperature, tried in order.
const CPU_TEMP_PATHS: &[&str] = &[
    "/sys/class/thermal/thermal_zone0/temp",
    "/sys/devices/virtual/thermal/thermal_zone0/temp",
];

/// CPU temperature in degrees Celsius from the first thermal zone.
///
/// ```text
/// /sys/class/thermal/thermal_zone0/temp   <- "48312" (millidegrees)
/// ```
///
/// Most kernels report millidegrees; a few board drivers report degrees.
/// Values above 1000 are treated as millidegrees.
#[derive(Debug, Clone)]
pub struct ThermalCollector {
    candidates: Vec<PathBuf>,
}

impl ThermalCollector {
    pub fn new() -> Self {
        Self::with_paths(CPU_TEMP_PATHS.iter().map(PathBuf::from).collect())
    }

    pub fn with_paths(candidates: Vec<PathBuf>) -> Self {
        ThermalCollector { candidates }
    }
}

impl Default for ThermalCollector {
    fn default() -> Self {
        ThermalCollector::new()
    }
}

#[async_trait::async_trait]
impl DataProducer for ThermalCollector {
    type Output = f64;

    async fn produce(&self) -> CollectorResult<Self::Output> {
        for path in &self.candidates {
            let raw = match tokio::fs::read_to_string(path).await {
                Ok(raw) => raw,
                Err(e) => {
                    trace!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            match parse_temperature(&raw) {
                Ok(celsius) => return Ok(celsius),
                Err(e) => trace!("Skipping {}: {}", path.display(), e),
            }
        }

        Err(CollectorError::Unavailable {
            metric: "cpu_temp_c".to_string(),
        })
    }
}

/// Parses a sysfs temperature and rounds it to one decimal.
pub fn parse_temperature(raw: &str) -> CollectorResult<f64> {
    let value = raw
        .trim()
        .parse::<f64>()
        .map_err(|_| CollectorError::ParseError {
            metric: "cpu_temp_c".to_string(),
            location: "thermal zone".to_string(),
            reason: format!("invalid value: {:?}", raw.trim()),
        })?;

    let celsius = if value > 1000.0 { value / 1000.0 } else { value };
    Ok((celsius * 10.0).round() / 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_millidegrees() {
        assert_eq!(parse_temperature("48312\n").unwrap(), 48.3);
        assert_eq!(parse_temperature("45000").unwrap(), 45.0);
    }

    #[test]
    fn test_parse_plain_degrees() {
        assert_eq!(parse_temperature("52").unwrap(), 52.0);
        assert_eq!(parse_temperature("51.26").unwrap(), 51.3);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(
            parse_temperature("n/a"),
            Err(CollectorError::ParseError { .. })
        ));
    }

    #[tokio::test]
    async fn test_first_readable_candidate_wins() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("broken");
        let good = dir.path().join("good");
        std::fs::write(&broken, "garbage").unwrap();
        std::fs::write(&good, "61234").unwrap();

        let collector = ThermalCollector::with_paths(vec![
            dir.path().join("missing"),
            broken,
            good,
        ]);
        assert_eq!(collector.produce().await.unwrap(), 61.2);
    }

    #[tokio::test]
    async fn test_no_candidate_is_unavailable() {
        let collector = ThermalCollector::with_paths(vec![PathBuf::from("/nonexistent/temp")]);
        assert!(matches!(
            collector.produce().await,
            Err(CollectorError::Unavailable { .. })
        ));
    }
}
