use thiserror::Error;

/// Failure of a single telemetry producer.
///
/// The telemetry collector turns any of these into a null field; none of
/// them stops a heartbeat.
#[derive(Error, Debug)]
pub enum CollectorError {
    /// Failed to read a file from disk.
    #[error("Failed to read file {path}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A value was read but could not be parsed.
    #[error("Failed to parse {metric} from {location}: {reason}")]
    ParseError {
        metric: String,
        location: String,
        reason: String,
    },

    /// None of the candidate sources exist on this system.
    #[error("No source available for {metric}")]
    Unavailable { metric: String },

    /// A low-level system call (statvfs) failed.
    #[error("System call failed: {syscall} - {reason}")]
    SystemCall { syscall: String, reason: String },

    /// A socket operation failed.
    #[error("Network probe '{probe}' failed: {source}")]
    Network {
        probe: String,
        #[source]
        source: std::io::Error,
    },
}
