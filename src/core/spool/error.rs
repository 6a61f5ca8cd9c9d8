use std::path::PathBuf;

use thiserror::Error;

/// Spool file failures. None of them is fatal to the agent; the record at
/// hand is lost and the next operation starts from whatever is on disk.
#[derive(Error, Debug)]
pub enum SpoolError {
    /// The spool directory could not be created.
    #[error("Failed to prepare spool directory {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Appending a record failed (disk full, permissions).
    #[error("Failed to append to spool {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read spool {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Writing back the retained records (after a flush or trim) failed.
    #[error("Failed to rewrite spool {}: {source}", .path.display())]
    Rewrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode spool record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Why a spool line could not be turned back into a record.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid QoS {0}, expected 0, 1 or 2")]
    QoS(u8),

    #[error("Empty topic")]
    EmptyTopic,
}
