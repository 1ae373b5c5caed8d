use std::path::Path;
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use crate::command::CommandBuilder;
use crate::config::CompressorConfig;
use crate::error::TranscodeError;

/// Complete ffprobe output structure
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeData {
    #[serde(default)]
    pub streams: Vec<FFProbeStream>,
    pub format: FFProbeFormat,
}

/// Format-level metadata from ffprobe (numbers arrive as strings)
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeFormat {
    pub format_name: Option<String>,
    pub duration: Option<String>,
    pub size: Option<String>,
    pub bit_rate: Option<String>,
}

/// Stream-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeStream {
    pub index: i32,
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
}

/// What the supervisor needs to know about an input before transcoding it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Duration in seconds, 0 means ffprobe could not tell
    pub duration_secs: f64,
    pub size_bytes: u64,
    pub format_name: String,
}

impl FFProbeData {
    /// Reduce the probe report to `MediaInfo`
    ///
    /// `fallback_size` is used when ffprobe does not report a size.
    pub fn media_info(&self, input: &Path, fallback_size: u64) -> Result<MediaInfo, TranscodeError> {
        let raw = self
            .format
            .duration
            .as_deref()
            .ok_or_else(|| TranscodeError::probe(input, "report has no format duration"))?;

        let duration_secs: f64 = raw
            .trim()
            .parse()
            .map_err(|_| TranscodeError::probe(input, format!("unparsable duration '{}'", raw)))?;

        if !duration_secs.is_finite() || duration_secs < 0.0 {
            return Err(TranscodeError::probe(input, format!("invalid duration '{}'", raw)));
        }

        let size_bytes = self
            .format
            .size
            .as_deref()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(fallback_size);

        let format_name = self
            .format
            .format_name
            .clone()
            .unwrap_or_else(|| "unknown".to_string());

        Ok(MediaInfo {
            duration_secs,
            size_bytes,
            format_name,
        })
    }

    pub fn video_stream(&self) -> Option<&FFProbeStream> {
        self.streams.iter().find(|s| s.codec_type.as_deref() == Some("video"))
    }
}

/// Parse ffprobe's JSON report into `MediaInfo`
pub fn parse_probe_output(input: &Path, json_str: &str, fallback_size: u64) -> Result<MediaInfo, TranscodeError> {
    let data: FFProbeData = serde_json::from_str(json_str)
        .map_err(|e| TranscodeError::probe(input, format!("unparsable ffprobe JSON: {}", e)))?;

    debug!(
        "ffprobe: {} format={:?} duration={:?} size={:?} bit_rate={:?}",
        input.display(),
        data.format.format_name,
        data.format.duration,
        data.format.size,
        data.format.bit_rate
    );
    if let Some(video) = data.video_stream() {
        debug!(
            "ffprobe: {} video stream {:?} {:?}x{:?}",
            input.display(),
            video.codec_name,
            video.width,
            video.height
        );
    }

    data.media_info(input, fallback_size)
}

/// Run ffprobe against `file_path` and return its duration, size and format
pub async fn probe_file(cfg: &CompressorConfig, file_path: &Path) -> Result<MediaInfo, TranscodeError> {
    // Verify file exists before trying to probe
    let metadata = std::fs::metadata(file_path)
        .map_err(|e| TranscodeError::probe(file_path, format!("cannot read input: {}", e)))?;

    let args = CommandBuilder::default().build_probe_command(file_path);
    debug!("ffprobe command: {} {}", cfg.ffprobe_bin.display(), args.join(" "));

    // output() drains stdout and stderr before returning the status
    let output = Command::new(&cfg.ffprobe_bin)
        .args(&args)
        .output()
        .await
        .map_err(|e| TranscodeError::probe(
            file_path,
            format!("failed to execute {}: {}", cfg.ffprobe_bin.display(), e),
        ))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);
        return Err(TranscodeError::probe(
            file_path,
            format!("exit code {}: {}", exit_code, stderr.trim()),
        ));
    }

    let json_str = String::from_utf8(output.stdout)
        .map_err(|_| TranscodeError::probe(file_path, "output is not valid UTF-8"))?;

    let info = parse_probe_output(file_path, &json_str, metadata.len())?;
    Ok(info)
}
