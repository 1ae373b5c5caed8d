use std::collections::VecDeque;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"time=\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").unwrap());
static SPEED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"speed=\s*(\d+(?:\.\d+)?)x").unwrap());

/// A partial segment longer than this is scanned and dropped
const MAX_PENDING_BYTES: usize = 64 * 1024;
/// Non-progress lines kept for failure reports
const DIAGNOSTIC_TAIL_LINES: usize = 12;

/// One accepted progress step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// 0..=100, strictly greater than the previous update of the run
    pub percent: u8,
    /// Media timestamp ffmpeg has reached, in seconds
    pub elapsed_secs: f64,
    pub speed: Option<f64>,
    /// e.g. "1m 5s remaining (2.0x)"
    pub estimate: Option<String>,
}

/// Stateful parser for one run's stderr
///
/// ffmpeg rewrites its status line with `\r` and the pipe hands over arbitrary
/// fragments of it, so bytes are buffered until a `\r` or `\n` closes a segment.
#[derive(Debug)]
pub struct ProgressParser {
    total_secs: f64,
    pending: Vec<u8>,
    last_percent: u8,
    last_secs: f64,
    tail: VecDeque<String>,
}

impl ProgressParser {
    pub fn new(total_secs: f64) -> Self {
        ProgressParser {
            total_secs,
            pending: Vec::new(),
            last_percent: 0,
            last_secs: 0.0,
            tail: VecDeque::with_capacity(DIAGNOSTIC_TAIL_LINES),
        }
    }

    pub fn last_percent(&self) -> u8 {
        self.last_percent
    }

    /// Feed a chunk of stderr, returning the updates it completes
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ProgressUpdate> {
        self.pending.extend_from_slice(chunk);

        let mut updates = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\r' || *b == b'\n') {
            let segment: Vec<u8> = self.pending.drain(..=pos).collect();
            self.scan_segment(&segment[..segment.len() - 1], &mut updates);
        }

        if self.pending.len() > MAX_PENDING_BYTES {
            let segment = std::mem::take(&mut self.pending);
            self.scan_segment(&segment, &mut updates);
        }

        updates
    }

    /// Scan whatever is left once the stream has ended
    pub fn finish(&mut self) -> Option<ProgressUpdate> {
        let segment = std::mem::take(&mut self.pending);
        let mut updates = Vec::new();
        self.scan_segment(&segment, &mut updates);
        updates.pop()
    }

    /// Last non-progress lines, oldest first
    pub fn diagnostic_tail(&self) -> String {
        self.tail.iter().cloned().collect::<Vec<_>>().join("\n")
    }

    fn scan_segment(&mut self, segment: &[u8], updates: &mut Vec<ProgressUpdate>) {
        let text = String::from_utf8_lossy(segment);
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        match TIME_RE.captures(text) {
            Some(caps) => {
                let hours: f64 = caps[1].parse().unwrap_or(0.0);
                let minutes: f64 = caps[2].parse().unwrap_or(0.0);
                let seconds: f64 = caps[3].parse().unwrap_or(0.0);
                let elapsed = hours * 3600.0 + minutes * 60.0 + seconds;
                let speed = SPEED_RE
                    .captures(text)
                    .and_then(|c| c[1].parse::<f64>().ok());

                if let Some(update) = self.accept(elapsed, speed) {
                    updates.push(update);
                }
            }
            None => {
                if self.tail.len() == DIAGNOSTIC_TAIL_LINES {
                    self.tail.pop_front();
                }
                self.tail.push_back(text.to_string());
            }
        }
    }

    fn accept(&mut self, elapsed: f64, speed: Option<f64>) -> Option<ProgressUpdate> {
        if self.total_secs <= 0.0 {
            return None;
        }

        let percent = (100.0 * elapsed / self.total_secs).round().clamp(0.0, 100.0) as u8;

        // Backward or repeated timestamps (multi-pass output) are dropped
        if percent <= self.last_percent || elapsed < self.last_secs {
            return None;
        }
        self.last_percent = percent;
        self.last_secs = elapsed;

        let estimate = match speed {
            Some(speed) if speed > 0.0 && percent > 0 => {
                let remaining = (self.total_secs - elapsed).max(0.0) / speed;
                Some(format_remaining(remaining, speed))
            }
            _ => None,
        };

        Some(ProgressUpdate {
            percent,
            elapsed_secs: elapsed,
            speed,
            estimate,
        })
    }
}

/// Coarse remaining-time string: minutes and seconds, or seconds under a minute
pub fn format_remaining(remaining_secs: f64, speed: f64) -> String {
    let total = remaining_secs.max(0.0).floor() as u64;
    let minutes = total / 60;
    let seconds = total % 60;
    if minutes > 0 {
        format!("{}m {}s remaining ({:.1}x)", minutes, seconds, speed)
    } else {
        format!("{}s remaining ({:.1}x)", seconds, speed)
    }
}
