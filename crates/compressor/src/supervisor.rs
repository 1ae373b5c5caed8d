use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use uuid::Uuid;
use crate::command::{output_path_for, CommandBuilder};
use crate::config::CompressorConfig;
use crate::error::{FailureReason, TranscodeError};
use crate::ffprobe::{self, MediaInfo};
use crate::progress::{ProgressParser, ProgressUpdate};
use crate::request::TranscodeRequest;
use crate::signal;

/// How long to keep reading stderr once ffmpeg has exited
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Terminal result of an accepted run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TranscodeOutcome {
    Succeeded { output_path: PathBuf },
    Failed { reason: FailureReason },
    Cancelled,
}

/// What a run reports to its caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum TranscodeEvent {
    Progress(ProgressUpdate),
    /// Sent exactly once per accepted `start`, always last
    Done(TranscodeOutcome),
}

pub type EventSender = mpsc::UnboundedSender<TranscodeEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<TranscodeEvent>;

/// Acknowledgement of a cancel request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelAck {
    /// This call set the cancellation flag
    Requested,
    /// An earlier call already did
    AlreadyCancelling,
}

/// Snapshot of the supervisor for collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SupervisorStatus {
    Idle,
    Starting { run_id: Uuid },
    Running {
        run_id: Uuid,
        pid: Option<u32>,
        started_at: DateTime<Utc>,
        percent: u8,
    },
    Cancelling { run_id: Uuid },
}

/// Returned by a successful `start`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunTicket {
    pub run_id: Uuid,
    pub output_path: PathBuf,
    pub media: MediaInfo,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunPhase {
    Starting,
    Running,
}

/// Live state of the in-flight run
struct RunHandle {
    id: Uuid,
    phase: RunPhase,
    /// Write-once: never goes back to false
    cancelled: bool,
    cancel_tx: watch::Sender<bool>,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    percent: u8,
}

/// Runs one ffmpeg transcode at a time
///
/// `start` reserves the slot, probes and spawns, then hands the child to a
/// monitor task that reads stderr, waits for exit and escalates cancellation.
/// Cancel and exit resolution both take the slot lock, so a set cancellation
/// flag is always seen before an outcome is chosen.
#[derive(Clone)]
pub struct Supervisor {
    config: Arc<CompressorConfig>,
    slot: Arc<Mutex<Option<RunHandle>>>,
}

impl Supervisor {
    pub fn new(config: CompressorConfig) -> Self {
        Supervisor {
            config: Arc::new(config),
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Probe a file with the configured ffprobe
    pub async fn probe(&self, path: &Path) -> Result<MediaInfo, TranscodeError> {
        ffprobe::probe_file(&self.config, path).await
    }

    /// Validate, probe and spawn ffmpeg for `request`
    ///
    /// Returns once the process is running. Progress and the single `Done`
    /// event arrive on `events`. Errors returned here mean nothing was spawned
    /// and no event will be sent.
    pub async fn start(&self, request: TranscodeRequest, events: EventSender) -> Result<RunTicket, TranscodeError> {
        let (run_id, started_at, cancel_rx) = self.reserve()?;
        let release = SlotRelease {
            supervisor: self.clone(),
            run_id,
        };

        let result = self.launch(release, started_at, request, events, cancel_rx).await;
        if let Err(e) = &result {
            warn!("Run {}: not started: {}", run_id, e);
        }
        result
    }

    /// Request cancellation of the current run
    ///
    /// Never blocks. The monitor sends the graceful stop and escalates to a
    /// kill after the grace window.
    pub fn cancel(&self) -> Result<CancelAck, TranscodeError> {
        let mut slot = self.lock_slot();
        let handle = slot.as_mut().ok_or(TranscodeError::NoActiveRun)?;

        if handle.cancelled {
            debug!("Run {}: cancel already requested", handle.id);
            return Ok(CancelAck::AlreadyCancelling);
        }

        handle.cancelled = true;
        // The receiver is gone only if the run is being resolved right now
        let _ = handle.cancel_tx.send(true);
        info!("Run {}: 🛑 cancellation requested", handle.id);
        Ok(CancelAck::Requested)
    }

    pub fn status(&self) -> SupervisorStatus {
        match self.lock_slot().as_ref() {
            None => SupervisorStatus::Idle,
            Some(h) if h.cancelled => SupervisorStatus::Cancelling { run_id: h.id },
            Some(h) => match h.phase {
                RunPhase::Starting => SupervisorStatus::Starting { run_id: h.id },
                RunPhase::Running => SupervisorStatus::Running {
                    run_id: h.id,
                    pid: h.pid,
                    started_at: h.started_at,
                    percent: h.percent,
                },
            },
        }
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<RunHandle>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reserve(&self) -> Result<(Uuid, DateTime<Utc>, watch::Receiver<bool>), TranscodeError> {
        let mut slot = self.lock_slot();
        if slot.is_some() {
            return Err(TranscodeError::AlreadyRunning);
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let id = Uuid::new_v4();
        let started_at = Utc::now();
        *slot = Some(RunHandle {
            id,
            phase: RunPhase::Starting,
            cancelled: false,
            cancel_tx,
            pid: None,
            started_at,
            percent: 0,
        });
        Ok((id, started_at, cancel_rx))
    }

    /// Clear the slot if it still belongs to `run_id`
    fn release(&self, run_id: Uuid) {
        let mut slot = self.lock_slot();
        if slot.as_ref().is_some_and(|h| h.id == run_id) {
            *slot = None;
        }
    }

    async fn launch(
        &self,
        release: SlotRelease,
        started_at: DateTime<Utc>,
        request: TranscodeRequest,
        events: EventSender,
        cancel_rx: watch::Receiver<bool>,
    ) -> Result<RunTicket, TranscodeError> {
        let run_id = release.run_id;

        request.validate()?;
        if !request.input.is_file() {
            return Err(TranscodeError::InvalidInput(format!(
                "input file does not exist: {}",
                request.input.display()
            )));
        }

        info!("Run {}: probing {}", run_id, request.input.display());
        let media = ffprobe::probe_file(&self.config, &request.input).await?;
        if media.duration_secs <= 0.0 {
            return Err(TranscodeError::InvalidInput(format!(
                "ffprobe reported no usable duration for {}",
                request.input.display()
            )));
        }

        let output_path = output_path_for(&request.input, &self.config.output_suffix);
        if output_path == request.input {
            return Err(TranscodeError::InvalidInput(format!(
                "output path would overwrite the input {} (output_suffix is empty)",
                request.input.display()
            )));
        }
        if output_path.exists() {
            info!("Run {}: replacing existing output {}", run_id, output_path.display());
            std::fs::remove_file(&output_path).map_err(|source| TranscodeError::OutputCleanup {
                path: output_path.clone(),
                source,
            })?;
        }

        let args = CommandBuilder::new(self.config.preset.as_str()).build_transcode_command(&request, &output_path);
        let ticket = RunTicket {
            run_id,
            output_path: output_path.clone(),
            media: media.clone(),
            started_at,
        };

        let cancelled_early = self
            .lock_slot()
            .as_ref()
            .filter(|h| h.id == run_id)
            .map_or(true, |h| h.cancelled);
        if cancelled_early {
            drop(release);
            info!("Run {}: cancelled before ffmpeg was started", run_id);
            let _ = events.send(TranscodeEvent::Done(TranscodeOutcome::Cancelled));
            return Ok(ticket);
        }

        info!(
            "Run {}: 🎬 compressing {} -> {} ({}, crf {}, audio {}, {})",
            run_id,
            request.input.display(),
            output_path.display(),
            request.video_codec,
            request.crf,
            request.audio_codec,
            request.resolution
        );
        debug!("Run {}: {} {}", run_id, self.config.ffmpeg_bin.display(), args.join(" "));

        let mut child = Command::new(&self.config.ffmpeg_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TranscodeError::ProcessSpawn {
                binary: self.config.ffmpeg_bin.clone(),
                source,
            })?;
        let stderr = child.stderr.take();

        if let Some(handle) = self.lock_slot().as_mut().filter(|h| h.id == run_id) {
            handle.phase = RunPhase::Running;
            handle.pid = child.id();
        }
        debug!("Run {}: ffmpeg running as pid {:?}", run_id, child.id());

        let monitor = RunMonitor {
            release,
            output_path,
            total_secs: media.duration_secs,
            grace: self.config.kill_grace(),
            events,
        };
        tokio::spawn(monitor.run(child, stderr, cancel_rx));

        Ok(ticket)
    }
}

/// Frees the slot when dropped, unless it has moved on to another run
struct SlotRelease {
    supervisor: Supervisor,
    run_id: Uuid,
}

impl Drop for SlotRelease {
    fn drop(&mut self) {
        self.supervisor.release(self.run_id);
    }
}

/// Owns the child process of one run until it has exited
struct RunMonitor {
    release: SlotRelease,
    output_path: PathBuf,
    total_secs: f64,
    grace: Duration,
    events: EventSender,
}

impl RunMonitor {
    fn run_id(&self) -> Uuid {
        self.release.run_id
    }

    async fn run(self, mut child: Child, stderr: Option<ChildStderr>, mut cancel_rx: watch::Receiver<bool>) {
        let pid = child.id();
        let mut parser = ProgressParser::new(self.total_secs);
        let mut stderr = stderr;
        let mut buf = vec![0u8; 8192];
        let mut kill_at: Option<Instant> = None;
        let mut force_killed = false;
        let mut cancel_open = true;

        if *cancel_rx.borrow_and_update() {
            kill_at = Some(self.begin_termination(pid).await);
        }

        let waited = loop {
            tokio::select! {
                status = child.wait() => break status,
                read = read_chunk(&mut stderr, &mut buf), if stderr.is_some() => {
                    match read {
                        Ok(0) => stderr = None,
                        Ok(n) => {
                            if !self.apply_chunk(&mut parser, Some(&buf[..n])) && kill_at.is_none() {
                                kill_at = Some(self.begin_termination(pid).await);
                            }
                        }
                        Err(e) => {
                            debug!("Run {}: stderr read failed: {}", self.run_id(), e);
                            stderr = None;
                        }
                    }
                }
                changed = cancel_rx.changed(), if cancel_open && kill_at.is_none() => {
                    match changed {
                        Ok(()) if *cancel_rx.borrow_and_update() => {
                            kill_at = Some(self.begin_termination(pid).await);
                        }
                        Ok(()) => {}
                        Err(_) => cancel_open = false,
                    }
                }
                _ = sleep_until(kill_at), if kill_at.is_some() && !force_killed => {
                    warn!(
                        "Run {}: ffmpeg still running {}ms after stop request, killing",
                        self.run_id(),
                        self.grace.as_millis()
                    );
                    if let Err(e) = child.start_kill() {
                        warn!("Run {}: kill failed: {}", self.run_id(), e);
                    }
                    force_killed = true;
                }
            }
        };

        let checked = match &waited {
            Ok(status) => self.check_exit(status, &mut stderr, &mut parser).await,
            Err(e) => {
                error!("Run {}: waiting for ffmpeg failed: {}", self.run_id(), e);
                let _ = child.start_kill();
                let _ = tokio::time::timeout(self.grace, child.wait()).await;
                Err(FailureReason::WaitFailed { message: e.to_string() })
            }
        };

        let outcome = self.resolve(checked);
        match &outcome {
            TranscodeOutcome::Succeeded { output_path } => {
                info!("Run {}: ✅ finished: {}", self.run_id(), output_path.display());
            }
            TranscodeOutcome::Failed { reason } => {
                error!("Run {}: ❌ failed: {}", self.run_id(), reason);
            }
            TranscodeOutcome::Cancelled => {
                info!("Run {}: cancelled", self.run_id());
            }
        }
        let _ = self.events.send(TranscodeEvent::Done(outcome));
    }

    /// Drain what is left on stderr, then judge the exit status and output file
    async fn check_exit(
        &self,
        status: &ExitStatus,
        stderr: &mut Option<ChildStderr>,
        parser: &mut ProgressParser,
    ) -> Result<(), FailureReason> {
        if let Some(mut pipe) = stderr.take() {
            let mut rest = Vec::new();
            if tokio::time::timeout(STDERR_DRAIN_TIMEOUT, pipe.read_to_end(&mut rest)).await.is_err() {
                debug!("Run {}: stderr still open after exit", self.run_id());
            }
            if !rest.is_empty() {
                self.apply_chunk(parser, Some(&rest));
            }
        }
        self.apply_chunk(parser, None);

        debug!("Run {}: ffmpeg exited with {}", self.run_id(), status);
        if !status.success() {
            return Err(FailureReason::NonZeroExit {
                code: status.code(),
                stderr_tail: parser.diagnostic_tail(),
            });
        }

        match std::fs::metadata(&self.output_path) {
            Ok(meta) if meta.len() > 0 => Ok(()),
            Ok(_) => Err(FailureReason::EmptyOutput),
            Err(_) => Err(FailureReason::MissingOutput),
        }
    }

    /// Parse a stderr chunk (or the end of stream when `chunk` is None) and
    /// publish its updates. Returns false without parsing once cancelled.
    fn apply_chunk(&self, parser: &mut ProgressParser, chunk: Option<&[u8]>) -> bool {
        let mut slot = self.release.supervisor.lock_slot();
        let Some(handle) = slot.as_mut().filter(|h| h.id == self.run_id()) else {
            return false;
        };
        if handle.cancelled {
            return false;
        }

        let updates = match chunk {
            Some(bytes) => parser.feed(bytes),
            None => parser.finish().into_iter().collect(),
        };
        for update in updates {
            debug!(
                "Run {}: {}% ({:.2}s){}",
                self.run_id(),
                update.percent,
                update.elapsed_secs,
                update.estimate.as_deref().map(|e| format!(", {}", e)).unwrap_or_default()
            );
            handle.percent = update.percent;
            let _ = self.events.send(TranscodeEvent::Progress(update));
        }
        true
    }

    /// Send the graceful stop and return when the forced kill is due
    async fn begin_termination(&self, pid: Option<u32>) -> Instant {
        let Some(pid) = pid else {
            return Instant::now();
        };

        match signal::request_graceful_stop(pid).await {
            Ok(()) => {
                debug!("Run {}: stop request sent to pid {}", self.run_id(), pid);
                Instant::now() + self.grace
            }
            Err(e) => {
                warn!("Run {}: graceful stop failed, killing now: {:#}", self.run_id(), e);
                Instant::now()
            }
        }
    }

    /// Decide the outcome and free the slot in one critical section
    fn resolve(&self, checked: Result<(), FailureReason>) -> TranscodeOutcome {
        let mut slot = self.release.supervisor.lock_slot();
        let ours = slot.as_ref().filter(|h| h.id == self.run_id());
        let cancelled = ours.map_or(false, |h| h.cancelled);

        let outcome = if cancelled {
            TranscodeOutcome::Cancelled
        } else {
            match checked {
                Ok(()) => TranscodeOutcome::Succeeded {
                    output_path: self.output_path.clone(),
                },
                Err(reason) => TranscodeOutcome::Failed { reason },
            }
        };

        // Removed before the slot opens up so a new run cannot lose its file
        if !matches!(outcome, TranscodeOutcome::Succeeded { .. }) && self.output_path.exists() {
            match std::fs::remove_file(&self.output_path) {
                Ok(()) => debug!("Run {}: removed partial output {}", self.run_id(), self.output_path.display()),
                Err(e) => warn!(
                    "Run {}: could not remove partial output {}: {}",
                    self.run_id(),
                    self.output_path.display(),
                    e
                ),
            }
        }

        if ours.is_some() {
            *slot = None;
        }
        outcome
    }
}

async fn read_chunk(stderr: &mut Option<ChildStderr>, buf: &mut [u8]) -> std::io::Result<usize> {
    match stderr {
        Some(pipe) => pipe.read(buf).await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
