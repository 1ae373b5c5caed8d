pub mod config;
pub mod error;
pub mod request;
pub mod command;
pub mod ffprobe;
pub mod progress;
pub mod signal;
pub mod supervisor;

pub use config::CompressorConfig;
pub use error::{FailureReason, TranscodeError};
pub use request::{AudioCodec, Resolution, TranscodeRequest, VideoCodec};
pub use ffprobe::{FFProbeData, FFProbeFormat, FFProbeStream, MediaInfo};
pub use progress::{ProgressParser, ProgressUpdate};
pub use supervisor::{
    CancelAck, EventReceiver, EventSender, RunTicket, Supervisor, SupervisorStatus, TranscodeEvent,
    TranscodeOutcome,
};
