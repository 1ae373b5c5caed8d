use std::ffi::OsString;
use std::path::{Path, PathBuf};
use crate::request::TranscodeRequest;

/// Derive the output path: `<stem><suffix><.ext>` next to the input
pub fn output_path_for(input: &Path, suffix: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| OsString::from("output"));

    let mut name = stem;
    name.push(suffix);
    if let Some(ext) = input.extension() {
        name.push(".");
        name.push(ext);
    }

    match input.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

/// Command builder for generating ffmpeg and ffprobe command lines
pub struct CommandBuilder {
    preset: String,
}

impl CommandBuilder {
    /// Create a new command builder using a fixed encoding preset
    pub fn new(preset: impl Into<String>) -> Self {
        CommandBuilder { preset: preset.into() }
    }

    /// Build the full transcode command
    ///
    /// Order: input, video handling, optional scale filter, audio handling,
    /// preset, faststart, overwrite, output.
    pub fn build_transcode_command(&self, request: &TranscodeRequest, output: &Path) -> Vec<String> {
        let mut args = Vec::new();

        // Input file
        args.push("-i".to_string());
        args.push(request.input.to_string_lossy().to_string());

        // Video stream
        args.push("-c:v".to_string());
        args.push(request.video_codec.ffmpeg_name().to_string());
        if !request.video_codec.is_copy() {
            args.push("-crf".to_string());
            args.push(request.crf.to_string());

            // Scaling needs a re-encode, so it is skipped for stream copy
            if let Some((width, height)) = request.resolution.scale() {
                args.push("-vf".to_string());
                args.push(format!("scale={}:{}", width, height));
            }
        }

        // Audio stream: stereo 44.1kHz when re-encoding
        args.push("-c:a".to_string());
        args.push(request.audio_codec.ffmpeg_name().to_string());
        if !request.audio_codec.is_copy() {
            args.push("-ac".to_string());
            args.push("2".to_string());
            args.push("-ar".to_string());
            args.push("44100".to_string());
        }

        args.push("-preset".to_string());
        args.push(self.preset.clone());
        args.push("-movflags".to_string());
        args.push("+faststart".to_string());

        // Overwrite without prompting
        args.push("-y".to_string());

        // Output file
        args.push(output.to_string_lossy().to_string());

        args
    }

    /// Build the ffprobe command for a quiet JSON report of format and streams
    pub fn build_probe_command(&self, input: &Path) -> Vec<String> {
        vec![
            "-v".to_string(),
            "quiet".to_string(),
            "-print_format".to_string(),
            "json".to_string(),
            "-show_format".to_string(),
            "-show_streams".to_string(),
            input.to_string_lossy().to_string(),
        ]
    }
}

impl Default for CommandBuilder {
    fn default() -> Self {
        CommandBuilder::new("medium")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompressorConfig;
    use crate::request::{AudioCodec, Resolution, VideoCodec};
    use proptest::prelude::*;

    fn request(video: VideoCodec, audio: AudioCodec, crf: u8, resolution: Resolution) -> TranscodeRequest {
        TranscodeRequest::with_defaults("/videos/holiday.mp4", &CompressorConfig::default())
            .video_codec(video)
            .audio_codec(audio)
            .crf(crf)
            .resolution(resolution)
    }

    fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
    }

    #[test]
    fn test_output_path_inserts_suffix_before_extension() {
        assert_eq!(
            output_path_for(Path::new("/videos/holiday.mp4"), "_compressed"),
            PathBuf::from("/videos/holiday_compressed.mp4")
        );
        assert_eq!(
            output_path_for(Path::new("/videos/my.trip.mkv"), "_compressed"),
            PathBuf::from("/videos/my.trip_compressed.mkv")
        );
        assert_eq!(
            output_path_for(Path::new("/videos/raw"), "_compressed"),
            PathBuf::from("/videos/raw_compressed")
        );
    }

    #[test]
    fn test_default_request_command() {
        let builder = CommandBuilder::default();
        let req = request(VideoCodec::Libx264, AudioCodec::Aac, 28, Resolution::Original);
        let args = builder.build_transcode_command(&req, Path::new("/videos/holiday_compressed.mp4"));

        let expected: Vec<String> = [
            "-i", "/videos/holiday.mp4",
            "-c:v", "libx264", "-crf", "28",
            "-c:a", "aac", "-ac", "2", "-ar", "44100",
            "-preset", "medium", "-movflags", "+faststart",
            "-y", "/videos/holiday_compressed.mp4",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(args, expected);
    }

    #[test]
    fn test_probe_command() {
        let args = CommandBuilder::default().build_probe_command(Path::new("/videos/holiday.mp4"));
        assert_eq!(flag_value(&args, "-print_format"), Some("json"));
        assert_eq!(flag_value(&args, "-v"), Some("quiet"));
        assert!(args.contains(&"-show_format".to_string()));
        assert!(args.contains(&"-show_streams".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("/videos/holiday.mp4"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Every command overwrites, ends with the output path and carries the fixed preset
        #[test]
        fn test_command_shape(
            crf in 0u8..52,
            video in prop_oneof![
                Just(VideoCodec::Libx264),
                Just(VideoCodec::Libx265),
                Just(VideoCodec::LibvpxVp9),
                Just(VideoCodec::Copy),
            ],
            audio in prop_oneof![
                Just(AudioCodec::Aac),
                Just(AudioCodec::Mp3),
                Just(AudioCodec::Opus),
                Just(AudioCodec::Copy),
            ],
            resolution in prop_oneof![
                Just(Resolution::Original),
                Just(Resolution::P1080),
                Just(Resolution::P720),
                Just(Resolution::P480),
            ],
        ) {
            let builder = CommandBuilder::new("slow");
            let output = Path::new("/videos/holiday_compressed.mp4");
            let args = builder.build_transcode_command(&request(video, audio, crf, resolution), output);

            prop_assert_eq!(args[0].as_str(), "-i");
            prop_assert_eq!(args[1].as_str(), "/videos/holiday.mp4");
            prop_assert!(args.contains(&"-y".to_string()));
            prop_assert_eq!(args.last().map(String::as_str), Some("/videos/holiday_compressed.mp4"));
            prop_assert_eq!(flag_value(&args, "-preset"), Some("slow"));
            prop_assert_eq!(flag_value(&args, "-c:v"), Some(video.ffmpeg_name()));
            prop_assert_eq!(flag_value(&args, "-c:a"), Some(audio.ffmpeg_name()));
        }

        /// Stream copy never carries a quality flag or a scale filter
        #[test]
        fn test_video_copy_skips_crf_and_scale(
            crf in 0u8..52,
            resolution in prop_oneof![
                Just(Resolution::Original),
                Just(Resolution::P1080),
                Just(Resolution::P720),
                Just(Resolution::P480),
            ],
        ) {
            let req = request(VideoCodec::Copy, AudioCodec::Aac, crf, resolution);
            let args = CommandBuilder::default().build_transcode_command(&req, Path::new("/o.mp4"));

            prop_assert!(!args.contains(&"-crf".to_string()));
            prop_assert!(!args.contains(&"-vf".to_string()));
        }

        /// The scale filter matches the resolution tag when re-encoding
        #[test]
        fn test_scale_filter_by_resolution(
            resolution in prop_oneof![
                Just(Resolution::Original),
                Just(Resolution::P1080),
                Just(Resolution::P720),
                Just(Resolution::P480),
            ],
        ) {
            let req = request(VideoCodec::Libx265, AudioCodec::Aac, 23, resolution);
            let args = CommandBuilder::default().build_transcode_command(&req, Path::new("/o.mp4"));

            let expected = match resolution {
                Resolution::Original => None,
                Resolution::P1080 => Some("scale=1920:1080"),
                Resolution::P720 => Some("scale=1280:720"),
                Resolution::P480 => Some("scale=854:480"),
            };
            prop_assert_eq!(flag_value(&args, "-vf"), expected);

            // Filter comes after the encoder selection and before audio handling
            if expected.is_some() {
                let vf = args.iter().position(|a| a == "-vf").unwrap();
                let cv = args.iter().position(|a| a == "-c:v").unwrap();
                let ca = args.iter().position(|a| a == "-c:a").unwrap();
                prop_assert!(cv < vf && vf < ca);
            }
        }

        /// Audio resampling flags appear only when re-encoding audio
        #[test]
        fn test_audio_resampling_only_when_encoding(
            audio in prop_oneof![
                Just(AudioCodec::Aac),
                Just(AudioCodec::Mp3),
                Just(AudioCodec::Opus),
                Just(AudioCodec::Copy),
            ],
        ) {
            let req = request(VideoCodec::Libx264, audio, 28, Resolution::Original);
            let args = CommandBuilder::default().build_transcode_command(&req, Path::new("/o.mp4"));

            if audio.is_copy() {
                prop_assert_eq!(flag_value(&args, "-ac"), None);
                prop_assert_eq!(flag_value(&args, "-ar"), None);
            } else {
                prop_assert_eq!(flag_value(&args, "-ac"), Some("2"));
                prop_assert_eq!(flag_value(&args, "-ar"), Some("44100"));
            }
        }
    }
}
