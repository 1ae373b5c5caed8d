use std::fmt;
use std::path::PathBuf;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the prober and the supervisor's synchronous operations
#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("A transcode is already running")]
    AlreadyRunning,
    #[error("No transcode is running")]
    NoActiveRun,
    #[error("ffprobe failed for {}: {reason}", path.display())]
    ProbeFailed { path: PathBuf, reason: String },
    #[error("Failed to spawn {}: {source}", binary.display())]
    ProcessSpawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Transcode failed: {0}")]
    TranscodeFailed(FailureReason),
    #[error("Failed to remove existing output {}: {source}", path.display())]
    OutputCleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TranscodeError {
    pub(crate) fn probe(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        TranscodeError::ProbeFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Why a spawned run ended in failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// ffmpeg exited non-zero (or was killed by a signal, `code` is then None)
    NonZeroExit {
        code: Option<i32>,
        stderr_tail: String,
    },
    /// Exit code was 0 but the output file is not there
    MissingOutput,
    /// Exit code was 0 but the output file is empty
    EmptyOutput,
    /// Waiting on the child process failed
    WaitFailed { message: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NonZeroExit { code: Some(code), stderr_tail } if !stderr_tail.is_empty() => {
                write!(f, "ffmpeg exited with code {}: {}", code, stderr_tail)
            }
            FailureReason::NonZeroExit { code: Some(code), .. } => {
                write!(f, "ffmpeg exited with code {}", code)
            }
            FailureReason::NonZeroExit { code: None, .. } => {
                write!(f, "ffmpeg was terminated by a signal")
            }
            FailureReason::MissingOutput => write!(f, "ffmpeg exited cleanly but produced no output file"),
            FailureReason::EmptyOutput => write!(f, "ffmpeg exited cleanly but the output file is empty"),
            FailureReason::WaitFailed { message } => write!(f, "failed to wait for ffmpeg: {}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_reasons_are_distinguishable() {
        let exit = FailureReason::NonZeroExit { code: Some(1), stderr_tail: "Conversion failed!".to_string() };
        assert_eq!(exit.to_string(), "ffmpeg exited with code 1: Conversion failed!");
        assert!(FailureReason::MissingOutput.to_string().contains("no output file"));
        assert!(FailureReason::EmptyOutput.to_string().contains("empty"));

        let err = TranscodeError::TranscodeFailed(FailureReason::EmptyOutput);
        assert_eq!(err.to_string(), "Transcode failed: ffmpeg exited cleanly but the output file is empty");
    }

    #[test]
    fn test_probe_error_names_path() {
        let err = TranscodeError::probe("/videos/a.mp4", "missing duration");
        assert_eq!(err.to_string(), "ffprobe failed for /videos/a.mp4: missing duration");
    }
}
