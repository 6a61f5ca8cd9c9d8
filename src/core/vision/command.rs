//! Detector backed by two external programs.
//!
//! The capture command writes one JPEG to stdout. The detect command reads
//! that JPEG on stdin and prints a detection result:
//!
//! ```text
//! {"detections":[{"label":"person","conf":0.91,"box":[10,20,110,220]}],"faces":1}
//! ```
//!
//! Both run under a timeout and are killed when it expires.

use std::{
    env,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use tokio::{io::AsyncWriteExt, process::Command};
use tracing::{debug, trace};

use super::{DetectionResult, Detector, DetectorError, Frame};
use crate::config::agent::{VisionConfig, VisionMode};

#[derive(Debug, Clone)]
pub struct CommandDetector {
    capture: Vec<String>,
    detect: Vec<String>,
    timeout: Duration,
}

impl CommandDetector {
    pub fn new(
        capture: Vec<String>,
        detect: Vec<String>,
        timeout: Duration,
    ) -> Result<Self, DetectorError> {
        if capture.is_empty() {
            return Err(DetectorError::MissingCommand { stage: "capture" });
        }
        if detect.is_empty() {
            return Err(DetectorError::MissingCommand { stage: "detect" });
        }
        Ok(CommandDetector {
            capture,
            detect,
            timeout,
        })
    }

    /// `Ok(None)` in `none` mode. In `command` mode the programs must exist.
    pub fn from_config(config: &VisionConfig) -> Result<Option<Self>, DetectorError> {
        match config.mode {
            VisionMode::None => Ok(None),
            VisionMode::Command => {
                let detector = CommandDetector::new(
                    config.capture_command.clone(),
                    config.detect_command.clone(),
                    config.command_timeout(),
                )?;
                detector.probe()?;
                Ok(Some(detector))
            }
        }
    }

    /// Checks that both programs resolve to files.
    pub fn probe(&self) -> Result<(), DetectorError> {
        for argv in [&self.capture, &self.detect] {
            let program = &argv[0];
            let resolved = resolve_program(program).ok_or_else(|| DetectorError::Unavailable {
                program: program.clone(),
            })?;
            debug!("Detector program '{}' -> {}", program, resolved.display());
        }
        Ok(())
    }

    async fn run(&self, argv: &[String], input: Option<&[u8]>) -> Result<Vec<u8>, DetectorError> {
        let program = argv[0].clone();
        let mut child = Command::new(&program)
            .args(&argv[1..])
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DetectorError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdin = child.stdin.take();
        let feed = async move {
            if let (Some(mut stdin), Some(data)) = (stdin, input) {
                // A detector that exits early closes the pipe; its exit
                // status tells the real story.
                if let Err(e) = stdin.write_all(data).await {
                    trace!("Detector stdin closed early: {}", e);
                }
            }
        };

        let output = tokio::time::timeout(self.timeout, async {
            let (_, output) = tokio::join!(feed, child.wait_with_output());
            output
        })
        .await
        .map_err(|_| DetectorError::Timeout {
            program: program.clone(),
            secs: self.timeout.as_secs(),
        })?
        .map_err(|source| DetectorError::Spawn {
            program: program.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(DetectorError::Failed {
                program,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

#[async_trait::async_trait]
impl Detector for CommandDetector {
    fn name(&self) -> &str {
        &self.detect[0]
    }

    async fn read_frame(&self) -> Result<Option<Frame>, DetectorError> {
        let jpeg = self.run(&self.capture, None).await?;
        if jpeg.is_empty() {
            return Ok(None);
        }
        trace!("Captured frame: {} bytes", jpeg.len());
        Ok(Some(Frame::new(jpeg)))
    }

    async fn detect(&self, frame: &Frame, threshold: f32) -> Result<DetectionResult, DetectorError> {
        let stdout = self.run(&self.detect, Some(&frame.jpeg)).await?;
        let result: DetectionResult = serde_json::from_slice(&stdout)?;
        Ok(result.filtered(threshold))
    }
}

/// Resolves a program the way a shell would: paths are taken as given,
/// bare names are looked up in `PATH`.
fn resolve_program(program: &str) -> Option<PathBuf> {
    if program.contains('/') {
        let path = Path::new(program);
        return path.is_file().then(|| path.to_path_buf());
    }
    env::var_os("PATH").and_then(|paths| {
        env::split_paths(&paths)
            .map(|dir| dir.join(program))
            .find(|candidate| candidate.is_file())
    })
}
