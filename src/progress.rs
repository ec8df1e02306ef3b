use std::sync::mpsc::Sender;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const BYTES_PER_MB: f64 = 1_000_000.0;
pub const ADAPTIVE_FLOOR: u8 = 40;
pub const ADAPTIVE_CEILING: u8 = 90;

/// Fixed checkpoints of a conversion. Everything between `Receiving` and
/// `Verifying` is estimated adaptively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Preparing,
    Sending,
    Connecting,
    Processing,
    Receiving,
    Verifying,
    Complete,
}

impl Stage {
    pub fn percent(self) -> u8 {
        match self {
            Self::Preparing => 5,
            Self::Sending => 10,
            Self::Connecting => 15,
            Self::Processing => 25,
            Self::Receiving => ADAPTIVE_FLOOR,
            Self::Verifying => 95,
            Self::Complete => 100,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::Preparing => "Preparing text-to-speech request...",
            Self::Sending => "Sending request...",
            Self::Connecting => "Connecting to TTS service...",
            Self::Processing => "Waiting for remote processing...",
            Self::Receiving => "Receiving audio stream...",
            Self::Verifying => "Verifying audio file...",
            Self::Complete => "Conversion complete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub percent: u8,
    pub message: String,
}

/// Anything that displays progress: a terminal bar, log lines, a GUI callback.
pub trait ProgressSink {
    fn report(&mut self, update: &ProgressUpdate);
}

impl<F: FnMut(&ProgressUpdate)> ProgressSink for F {
    fn report(&mut self, update: &ProgressUpdate) {
        self(update)
    }
}

/// Forwards updates to another thread. A dropped receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelSink(pub Sender<ProgressUpdate>);

impl ProgressSink for ChannelSink {
    fn report(&mut self, update: &ProgressUpdate) {
        let _ = self.0.send(update.clone());
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _update: &ProgressUpdate) {}
}

/// One size regime of the adaptive estimator.
///
/// `time_factor = min(time_weight, elapsed / time_horizon_secs * time_weight)`
/// `size_factor = min(size_cap, size_mb * size_multiplier)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizeRegime {
    pub time_horizon_secs: f64,
    pub time_weight: f64,
    pub size_multiplier: f64,
    pub size_cap: f64,
}

impl SizeRegime {
    fn factors(&self, size_mb: f64, elapsed_secs: f64) -> (f64, f64) {
        let time_factor = if self.time_horizon_secs > 0.0 {
            (elapsed_secs / self.time_horizon_secs * self.time_weight).min(self.time_weight)
        } else {
            self.time_weight
        };
        let size_factor = (size_mb * self.size_multiplier).min(self.size_cap);
        (time_factor, size_factor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressTuning {
    pub large_threshold_mb: f64,
    pub medium_threshold_mb: f64,
    pub large: SizeRegime,
    pub medium: SizeRegime,
    pub small: SizeRegime,
    pub min_update_interval_ms: u64,
    pub min_update_bytes: u64,
}

impl Default for ProgressTuning {
    fn default() -> Self {
        Self {
            large_threshold_mb: 2.0,
            medium_threshold_mb: 1.0,
            large: SizeRegime {
                time_horizon_secs: 8.0,
                time_weight: 40.0,
                size_multiplier: 2.0,
                size_cap: 10.0,
            },
            medium: SizeRegime {
                time_horizon_secs: 10.0,
                time_weight: 35.0,
                size_multiplier: 3.0,
                size_cap: 15.0,
            },
            small: SizeRegime {
                time_horizon_secs: 12.0,
                time_weight: 30.0,
                size_multiplier: 8.0,
                size_cap: 20.0,
            },
            min_update_interval_ms: 500,
            min_update_bytes: 64 * 1024,
        }
    }
}

impl ProgressTuning {
    fn regime(&self, size_mb: f64) -> &SizeRegime {
        if size_mb > self.large_threshold_mb {
            &self.large
        } else if size_mb > self.medium_threshold_mb {
            &self.medium
        } else {
            &self.small
        }
    }

    /// Percentage for a download of `bytes` after `elapsed`, inside the
    /// adaptive band. Not monotonic on its own; see [`ProgressState`].
    pub fn estimate_percent(&self, bytes: u64, elapsed: Duration) -> u8 {
        let size_mb = bytes as f64 / BYTES_PER_MB;
        let (time_factor, size_factor) = self.regime(size_mb).factors(size_mb, elapsed.as_secs_f64());
        let raw = f64::from(ADAPTIVE_FLOOR) + time_factor + size_factor;
        raw.round()
            .clamp(f64::from(ADAPTIVE_FLOOR), f64::from(ADAPTIVE_CEILING)) as u8
    }
}

pub fn format_megabytes(bytes: u64) -> String {
    format!("{:.1} MB", bytes as f64 / BYTES_PER_MB)
}

/// Progress of a single download. Reported percentages never decrease.
#[derive(Debug, Clone)]
pub struct ProgressState {
    tuning: ProgressTuning,
    bytes_received: u64,
    last_percent: u8,
    last_emit_at: Duration,
    last_emit_bytes: u64,
}

impl ProgressState {
    pub fn new(tuning: ProgressTuning) -> Self {
        Self {
            tuning,
            bytes_received: 0,
            last_percent: 0,
            last_emit_at: Duration::ZERO,
            last_emit_bytes: 0,
        }
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    fn advance(&mut self, percent: u8) -> u8 {
        self.last_percent = self.last_percent.max(percent);
        self.last_percent
    }

    pub fn stage(&mut self, stage: Stage) -> ProgressUpdate {
        ProgressUpdate {
            percent: self.advance(stage.percent()),
            message: stage.message().to_string(),
        }
    }

    /// Records `len` new bytes seen `elapsed` after the body started and
    /// returns an update when the throttle allows one.
    pub fn on_chunk(&mut self, len: usize, elapsed: Duration) -> Option<ProgressUpdate> {
        self.bytes_received += len as u64;

        let interval = Duration::from_millis(self.tuning.min_update_interval_ms);
        let due_by_time = elapsed.saturating_sub(self.last_emit_at) >= interval;
        let due_by_bytes =
            self.bytes_received - self.last_emit_bytes >= self.tuning.min_update_bytes;
        if !due_by_time && !due_by_bytes {
            return None;
        }

        self.last_emit_at = elapsed;
        self.last_emit_bytes = self.bytes_received;
        let estimate = self.tuning.estimate_percent(self.bytes_received, elapsed);
        Some(ProgressUpdate {
            percent: self.advance(estimate),
            message: format!(
                "Downloading and saving audio... ({})",
                format_megabytes(self.bytes_received)
            ),
        })
    }
}
