use thiserror::Error;

/// Detector failures. At startup they downgrade the agent to telemetry-only;
/// during a capture tick they are logged and the tick moves on.
#[derive(Error, Debug)]
pub enum DetectorError {
    /// The configured program cannot be found or is not executable.
    #[error("Program '{program}' is not available")]
    Unavailable { program: String },

    /// An empty command line was configured.
    #[error("No {stage} command configured")]
    MissingCommand { stage: &'static str },

    #[error("Failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' did not finish within {secs}s")]
    Timeout { program: String, secs: u64 },

    #[error("'{program}' exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    /// The detect command printed something that is not a detection result.
    #[error("Invalid detector output: {0}")]
    Output(#[from] serde_json::Error),
}
