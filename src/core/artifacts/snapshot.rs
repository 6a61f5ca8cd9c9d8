use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use time::{macros::format_description, OffsetDateTime};
use tracing::debug;

use super::error::SnapshotError;
use crate::{config::agent::SnapshotConfig, core::vision::Frame};

/// A saved frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub path: PathBuf,
    /// The JPEG inlined as base64, when enabled and small enough.
    pub b64: Option<String>,
}

/// Writes event frames to `<dir>/<device_id>_<YYYYmmddTHHMMSSZ>.jpg`.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
    send_base64: bool,
    base64_max_kb: u64,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>, send_base64: bool, base64_max_kb: u64) -> Self {
        SnapshotStore {
            dir: dir.into(),
            send_base64,
            base64_max_kb,
        }
    }

    pub fn from_config(config: &SnapshotConfig) -> Self {
        SnapshotStore::new(&config.dir, config.send_base64, config.base64_max_kb)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn save(&self, device_id: &str, frame: &Frame) -> Result<Snapshot, SnapshotError> {
        let path = self.dir.join(file_name(device_id, OffsetDateTime::now_utc())?);
        let write_err = |source| SnapshotError::Write {
            path: path.clone(),
            source,
        };

        tokio::fs::create_dir_all(&self.dir).await.map_err(write_err)?;
        tokio::fs::write(&path, &frame.jpeg).await.map_err(write_err)?;
        debug!("Snapshot saved: {} ({} bytes)", path.display(), frame.len());

        let b64 = self.inline(frame);
        Ok(Snapshot { path, b64 })
    }

    fn inline(&self, frame: &Frame) -> Option<String> {
        let kb = frame.len() as f64 / 1024.0;
        (self.send_base64 && kb <= self.base64_max_kb as f64).then(|| STANDARD.encode(&frame.jpeg))
    }
}

fn file_name(device_id: &str, at: OffsetDateTime) -> Result<String, SnapshotError> {
    let stamp = at.format(format_description!(
        "[year][month][day]T[hour][minute][second]Z"
    ))?;
    Ok(format!("{device_id}_{stamp}.jpg"))
}
