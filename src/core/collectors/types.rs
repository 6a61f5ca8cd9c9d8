use serde::{Deserialize, Serialize};

use super::error::CollectorError;

pub type CollectorResult<T> = std::result::Result<T, CollectorError>;

/// Root filesystem usage in MiB.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiskUsage {
    pub total_mb: u64,
    pub used_mb: u64,
    pub free_mb: u64,
    /// Used share of the total, one decimal.
    pub used_pct: f64,
}

/// One telemetry sample. Fields that could not be read are empty or null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Primary outbound IPv4 address, empty when offline.
    pub ip: String,

    /// Seconds since the agent started.
    pub uptime_s: u64,

    pub cpu_temp_c: Option<f64>,

    pub disk: Option<DiskUsage>,
}
