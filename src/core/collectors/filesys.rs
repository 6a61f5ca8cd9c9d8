use std::{ffi::CString, path::PathBuf};

use tracing::trace;

use super::{
    error::CollectorError,
    traits::DataProducer,
    types::{CollectorResult, DiskUsage},
};

const MIB: u64 = 1024 * 1024;

/// Usage of the filesystem holding `mount_point` (root by default), via
/// `statvfs(3)`.
#[derive(Debug, Clone)]
pub struct FilesystemCollector {
    mount_point: PathBuf,
}

impl FilesystemCollector {
    pub fn new() -> Self {
        Self::for_mount(PathBuf::from("/"))
    }

    pub fn for_mount(mount_point: PathBuf) -> Self {
        FilesystemCollector { mount_point }
    }
}

impl Default for FilesystemCollector {
    fn default() -> Self {
        FilesystemCollector::new()
    }
}

#[async_trait::async_trait]
impl DataProducer for FilesystemCollector {
    type Output = DiskUsage;

    async fn produce(&self) -> CollectorResult<Self::Output> {
        let mount_point = self.mount_point.to_string_lossy().into_owned();
        let c_path = CString::new(mount_point.as_bytes()).map_err(|e| CollectorError::SystemCall {
            syscall: "statvfs".to_string(),
            reason: format!("invalid path '{}': {}", mount_point, e),
        })?;

        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        let result = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
        if result != 0 {
            let err = std::io::Error::last_os_error();
            trace!("statvfs failed for '{}': {}", mount_point, err);
            return Err(CollectorError::SystemCall {
                syscall: "statvfs".to_string(),
                reason: format!("{}: {}", mount_point, err),
            });
        }

        disk_usage(stat.f_frsize as u64, stat.f_blocks as u64, stat.f_bfree as u64).ok_or_else(
            || CollectorError::ParseError {
                metric: "disk".to_string(),
                location: mount_point,
                reason: "filesystem reports zero size".to_string(),
            },
        )
    }
}

/// Converts block counts into MiB figures.
///
/// Free space counts all free blocks, including those reserved for root, so
/// `used + free == total`. Returns `None` for a zero-sized filesystem.
pub fn disk_usage(block_size: u64, blocks: u64, free_blocks: u64) -> Option<DiskUsage> {
    let total = blocks.saturating_mul(block_size);
    if total == 0 {
        return None;
    }
    let free = free_blocks.saturating_mul(block_size).min(total);
    let used = total - free;

    Some(DiskUsage {
        total_mb: total / MIB,
        used_mb: used / MIB,
        free_mb: free / MIB,
        used_pct: ((used as f64 / total as f64) * 1000.0).round() / 10.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_usage_figures() {
        // 4 KiB blocks, 1 GiB total, 256 MiB free.
        let usage = disk_usage(4096, 262_144, 65_536).unwrap();
        assert_eq!(usage.total_mb, 1024);
        assert_eq!(usage.free_mb, 256);
        assert_eq!(usage.used_mb, 768);
        assert_eq!(usage.used_pct, 75.0);
    }

    #[test]
    fn test_disk_usage_rounds_percentage() {
        let usage = disk_usage(1, 3 * MIB, MIB).unwrap();
        assert_eq!(usage.used_pct, 66.7);
    }

    #[test]
    fn test_zero_sized_filesystem() {
        assert!(disk_usage(4096, 0, 0).is_none());
    }

    #[tokio::test]
    async fn test_root_filesystem_reports_usage() {
        let usage = FilesystemCollector::new().produce().await.unwrap();
        assert!(usage.total_mb >= usage.used_mb);
        assert!((0.0..=100.0).contains(&usage.used_pct));
    }

    #[tokio::test]
    async fn test_missing_mount_point() {
        let collector = FilesystemCollector::for_mount(PathBuf::from("/nonexistent/mount"));
        assert!(matches!(
            collector.produce().await,
            Err(CollectorError::SystemCall { .. })
        ));
    }
}
