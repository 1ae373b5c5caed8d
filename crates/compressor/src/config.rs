use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use crate::request::{AudioCodec, VideoCodec};

/// Configuration for the compressor core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressorConfig {
    /// Path to the ffmpeg binary (bare name means PATH lookup)
    pub ffmpeg_bin: PathBuf,
    /// Path to the ffprobe binary
    pub ffprobe_bin: PathBuf,
    /// Inserted between the input's stem and extension to name the output
    pub output_suffix: String,
    /// Encoding preset passed to ffmpeg for every run
    pub preset: String,
    /// Milliseconds to wait after a graceful stop before force-killing ffmpeg
    pub kill_grace_ms: u64,
    /// Video codec used when a request does not name one
    pub default_video_codec: VideoCodec,
    /// Audio codec used when a request does not name one
    pub default_audio_codec: AudioCodec,
    /// CRF used when a request does not name one
    pub default_crf: u8,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl CompressorConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            output_suffix: "_compressed".to_string(),
            preset: "medium".to_string(),
            kill_grace_ms: 1000,
            default_video_codec: VideoCodec::Libx264,
            default_audio_codec: AudioCodec::Aac,
            default_crf: 28,
        }
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                // TOML by extension, JSON otherwise
                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        if config.output_suffix.is_empty() {
            bail!("output_suffix must not be empty: the output would overwrite the input");
        }

        Ok(config)
    }
}
