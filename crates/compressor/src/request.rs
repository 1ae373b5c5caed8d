use std::fmt;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use crate::config::CompressorConfig;
use crate::error::TranscodeError;

/// Video stream handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoCodec {
    #[serde(rename = "libx264")]
    Libx264,
    #[serde(rename = "libx265")]
    Libx265,
    #[serde(rename = "libvpx-vp9")]
    LibvpxVp9,
    /// Pass the video stream through without re-encoding
    #[serde(rename = "copy")]
    Copy,
}

impl VideoCodec {
    /// Get the ffmpeg encoder name for this codec
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            VideoCodec::Libx264 => "libx264",
            VideoCodec::Libx265 => "libx265",
            VideoCodec::LibvpxVp9 => "libvpx-vp9",
            VideoCodec::Copy => "copy",
        }
    }

    /// Valid CRF values for this encoder, None when CRF does not apply
    pub fn crf_range(&self) -> Option<RangeInclusive<u8>> {
        match self {
            VideoCodec::Libx264 | VideoCodec::Libx265 => Some(0..=51),
            VideoCodec::LibvpxVp9 => Some(0..=63),
            VideoCodec::Copy => None,
        }
    }

    pub fn is_copy(&self) -> bool {
        matches!(self, VideoCodec::Copy)
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ffmpeg_name())
    }
}

impl FromStr for VideoCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "libx264" | "h264" | "x264" => Ok(VideoCodec::Libx264),
            "libx265" | "h265" | "hevc" | "x265" => Ok(VideoCodec::Libx265),
            "libvpx-vp9" | "vp9" => Ok(VideoCodec::LibvpxVp9),
            "copy" => Ok(VideoCodec::Copy),
            other => Err(format!("unknown video codec '{}' (expected libx264, libx265, libvpx-vp9 or copy)", other)),
        }
    }
}

/// Audio stream handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Aac,
    Mp3,
    Opus,
    /// Pass the audio stream through without re-encoding
    Copy,
}

impl AudioCodec {
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            AudioCodec::Aac => "aac",
            AudioCodec::Mp3 => "libmp3lame",
            AudioCodec::Opus => "libopus",
            AudioCodec::Copy => "copy",
        }
    }

    pub fn is_copy(&self) -> bool {
        matches!(self, AudioCodec::Copy)
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AudioCodec::Aac => "aac",
            AudioCodec::Mp3 => "mp3",
            AudioCodec::Opus => "opus",
            AudioCodec::Copy => "copy",
        };
        f.write_str(name)
    }
}

impl FromStr for AudioCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "aac" => Ok(AudioCodec::Aac),
            "mp3" | "libmp3lame" => Ok(AudioCodec::Mp3),
            "opus" | "libopus" => Ok(AudioCodec::Opus),
            "copy" => Ok(AudioCodec::Copy),
            other => Err(format!("unknown audio codec '{}' (expected aac, mp3, opus or copy)", other)),
        }
    }
}

/// Target resolution tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Resolution {
    #[default]
    #[serde(rename = "original")]
    Original,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "480p")]
    P480,
}

impl Resolution {
    /// Scale filter dimensions, None keeps the source resolution
    pub fn scale(&self) -> Option<(u32, u32)> {
        match self {
            Resolution::Original => None,
            Resolution::P1080 => Some((1920, 1080)),
            Resolution::P720 => Some((1280, 720)),
            Resolution::P480 => Some((854, 480)),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Resolution::Original => "original",
            Resolution::P1080 => "1080p",
            Resolution::P720 => "720p",
            Resolution::P480 => "480p",
        };
        f.write_str(tag)
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "original" => Ok(Resolution::Original),
            "1080p" | "1080" => Ok(Resolution::P1080),
            "720p" | "720" => Ok(Resolution::P720),
            "480p" | "480" => Ok(Resolution::P480),
            other => Err(format!("unknown resolution '{}' (expected original, 1080p, 720p or 480p)", other)),
        }
    }
}

/// Parameters of one transcode run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeRequest {
    pub input: PathBuf,
    pub video_codec: VideoCodec,
    pub audio_codec: AudioCodec,
    pub crf: u8,
    #[serde(default)]
    pub resolution: Resolution,
}

impl TranscodeRequest {
    /// Request for `input` using the configured default codecs and quality
    pub fn with_defaults(input: impl Into<PathBuf>, cfg: &CompressorConfig) -> Self {
        TranscodeRequest {
            input: input.into(),
            video_codec: cfg.default_video_codec,
            audio_codec: cfg.default_audio_codec,
            crf: cfg.default_crf,
            resolution: Resolution::Original,
        }
    }

    pub fn video_codec(mut self, codec: VideoCodec) -> Self {
        self.video_codec = codec;
        self
    }

    pub fn audio_codec(mut self, codec: AudioCodec) -> Self {
        self.audio_codec = codec;
        self
    }

    pub fn crf(mut self, crf: u8) -> Self {
        self.crf = crf;
        self
    }

    pub fn resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    /// Check the encoding parameters (the input file itself is checked at start)
    pub fn validate(&self) -> Result<(), TranscodeError> {
        if let Some(range) = self.video_codec.crf_range() {
            if !range.contains(&self.crf) {
                return Err(TranscodeError::InvalidInput(format!(
                    "CRF {} is out of range {}..={} for {}",
                    self.crf,
                    range.start(),
                    range.end(),
                    self.video_codec
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_defaults_come_from_config() {
        let cfg = CompressorConfig::default();
        let req = TranscodeRequest::with_defaults("/videos/a.mp4", &cfg);
        assert_eq!(req.video_codec, VideoCodec::Libx264);
        assert_eq!(req.audio_codec, AudioCodec::Aac);
        assert_eq!(req.crf, 28);
        assert_eq!(req.resolution, Resolution::Original);
    }

    #[test]
    fn test_parse_selectors() {
        assert_eq!("libvpx-vp9".parse::<VideoCodec>().unwrap(), VideoCodec::LibvpxVp9);
        assert_eq!("HEVC".parse::<VideoCodec>().unwrap(), VideoCodec::Libx265);
        assert_eq!("opus".parse::<AudioCodec>().unwrap(), AudioCodec::Opus);
        assert_eq!("720p".parse::<Resolution>().unwrap(), Resolution::P720);
        assert!("av1".parse::<VideoCodec>().is_err());
        assert!("4k".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_request_json_shape() {
        let json = r#"{"input":"/v/a.mkv","video_codec":"libvpx-vp9","audio_codec":"copy","crf":33,"resolution":"480p"}"#;
        let req: TranscodeRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.video_codec, VideoCodec::LibvpxVp9);
        assert_eq!(req.audio_codec, AudioCodec::Copy);
        assert_eq!(req.resolution, Resolution::P480);

        let no_res = r#"{"input":"/v/a.mkv","video_codec":"copy","audio_codec":"aac","crf":0}"#;
        let req: TranscodeRequest = serde_json::from_str(no_res).unwrap();
        assert_eq!(req.resolution, Resolution::Original);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// CRF is accepted exactly when it falls inside the encoder's range
        #[test]
        fn test_crf_validation_follows_codec_range(
            crf in 0u8..=100,
            codec in prop_oneof![
                Just(VideoCodec::Libx264),
                Just(VideoCodec::Libx265),
                Just(VideoCodec::LibvpxVp9),
            ],
        ) {
            let req = TranscodeRequest::with_defaults("/v/a.mp4", &CompressorConfig::default())
                .video_codec(codec)
                .crf(crf);
            let max = if codec == VideoCodec::LibvpxVp9 { 63 } else { 51 };

            prop_assert_eq!(req.validate().is_ok(), crf <= max);
        }

        /// Stream copy ignores the quality parameter entirely
        #[test]
        fn test_copy_accepts_any_crf(crf in any::<u8>()) {
            let req = TranscodeRequest::with_defaults("/v/a.mp4", &CompressorConfig::default())
                .video_codec(VideoCodec::Copy)
                .crf(crf);
            prop_assert!(req.validate().is_ok());
        }
    }
}
