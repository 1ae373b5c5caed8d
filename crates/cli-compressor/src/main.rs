use std::path::{Path, PathBuf};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use compressor::{
    AudioCodec, CancelAck, CompressorConfig, Resolution, Supervisor, TranscodeError, TranscodeEvent,
    TranscodeOutcome, TranscodeRequest, VideoCodec,
};
use humansize::{format_size, DECIMAL};
use log::{debug, info, warn};
use tokio::sync::mpsc;

/// Compress videos with ffmpeg
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show duration, size and container format of a file
    Probe {
        input: PathBuf,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Transcode a file next to itself; Ctrl-C cancels
    Compress {
        input: PathBuf,

        /// libx264, libx265, libvpx-vp9 or copy
        #[arg(long)]
        vcodec: Option<VideoCodec>,

        /// aac, mp3, opus or copy
        #[arg(long)]
        acodec: Option<AudioCodec>,

        /// Constant rate factor, lower is better quality
        #[arg(long)]
        crf: Option<u8>,

        /// original, 1080p, 720p or 480p
        #[arg(long)]
        resolution: Option<Resolution>,

        /// Print each event as a JSON line instead of text
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins; otherwise info, or debug with --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    let cfg = CompressorConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    debug!("Configuration: {:?}", cfg);

    match args.command {
        Commands::Probe { input, json } => probe(cfg, &input, json).await,
        Commands::Compress {
            input,
            vcodec,
            acodec,
            crf,
            resolution,
            json,
        } => {
            let mut request = TranscodeRequest::with_defaults(&input, &cfg);
            if let Some(codec) = vcodec {
                request = request.video_codec(codec);
            }
            if let Some(codec) = acodec {
                request = request.audio_codec(codec);
            }
            if let Some(crf) = crf {
                request = request.crf(crf);
            }
            if let Some(resolution) = resolution {
                request = request.resolution(resolution);
            }
            compress(cfg, request, json).await
        }
    }
}

async fn probe(cfg: CompressorConfig, input: &Path, json: bool) -> Result<()> {
    let supervisor = Supervisor::new(cfg);
    let media = supervisor
        .probe(input)
        .await
        .with_context(|| format!("Failed to probe {}", input.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&media)?);
    } else {
        println!("File:     {}", input.display());
        println!("Duration: {:.2}s", media.duration_secs);
        println!("Size:     {}", format_size(media.size_bytes, DECIMAL));
        println!("Format:   {}", media.format_name);
    }
    Ok(())
}

async fn compress(cfg: CompressorConfig, request: TranscodeRequest, json: bool) -> Result<()> {
    let supervisor = Supervisor::new(cfg);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let input = request.input.clone();
    let ticket = supervisor
        .start(request, tx)
        .await
        .with_context(|| format!("Failed to start compressing {}", input.display()))?;

    info!(
        "Run {}: {} ({:.1}s, {})",
        ticket.run_id,
        input.display(),
        ticket.media.duration_secs,
        format_size(ticket.media.size_bytes, DECIMAL)
    );

    let mut interrupted = false;
    let outcome = loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else {
                    bail!("Run {} ended without reporting an outcome", ticket.run_id);
                };
                if json {
                    println!("{}", serde_json::to_string(&event)?);
                }
                match event {
                    TranscodeEvent::Progress(update) => {
                        if !json {
                            match update.estimate {
                                Some(estimate) => println!("{:>3}%  {}", update.percent, estimate),
                                None => println!("{:>3}%", update.percent),
                            }
                        }
                    }
                    TranscodeEvent::Done(outcome) => break outcome,
                }
            }
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                signal.context("Failed to listen for Ctrl-C")?;
                interrupted = true;
                match supervisor.cancel() {
                    Ok(CancelAck::Requested) => warn!("Interrupted, stopping ffmpeg..."),
                    Ok(CancelAck::AlreadyCancelling) => {}
                    Err(e) => debug!("Cancel ignored: {}", e),
                }
            }
        }
    };

    let took = Utc::now().signed_duration_since(ticket.started_at);
    match outcome {
        TranscodeOutcome::Succeeded { output_path } => {
            let original = ticket.media.size_bytes;
            let compressed = std::fs::metadata(&output_path)
                .with_context(|| format!("Failed to read output {}", output_path.display()))?
                .len();
            let ratio = if original > 0 {
                compressed as f64 / original as f64 * 100.0
            } else {
                0.0
            };

            info!("✅ Wrote {} in {}s", output_path.display(), took.num_seconds());
            if !json {
                println!(
                    "{} -> {} ({:.1}% of original)",
                    format_size(original, DECIMAL),
                    format_size(compressed, DECIMAL),
                    ratio
                );
            }
            Ok(())
        }
        TranscodeOutcome::Failed { reason } => {
            Err(TranscodeError::TranscodeFailed(reason)).with_context(|| format!("Compressing {} failed", input.display()))
        }
        TranscodeOutcome::Cancelled => bail!("Compressing {} was cancelled", input.display()),
    }
}
