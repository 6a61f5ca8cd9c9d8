use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Failed to write snapshot {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to format snapshot timestamp: {0}")]
    Timestamp(#[from] time::error::Format),
}

/// Upload failures. The event is still published, without a URL.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Failed to read artifact {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode upload metadata: {0}")]
    Meta(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upload rejected with status {0}")]
    Status(u16),
}
