//! Metrics for answer cycles.
//!
//! Tracks timing, clip sizes, and error history for play/record/transcribe/
//! submit cycles. Used for diagnostics; nothing here is load-bearing.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Maximum number of completed cycles to retain in history
const MAX_CYCLE_HISTORY: usize = 50;

/// Maximum number of errors to retain in history
const MAX_ERROR_HISTORY: usize = 20;

/// Metrics for one completed answer cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleMetrics {
    pub cycle_id: String,
    pub question_index: usize,
    /// Unix timestamp when the cycle started (seconds)
    pub started_at: u64,
    pub recording_duration_ms: u64,
    pub clip_size_bytes: u64,
    pub transcription_duration_ms: u64,
    pub transcript_length_chars: u64,
    /// Total cycle time (question start to durable submit) in milliseconds
    pub total_cycle_ms: u64,
    pub success: bool,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total_cycles: u64,
    pub successful_cycles: u64,
    pub failed_cycles: u64,
    pub avg_recording_duration_ms: u64,
    pub avg_transcription_duration_ms: u64,
    pub avg_total_cycle_ms: u64,
    pub last_error: Option<ErrorRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: u64,
    /// Category of error (e.g. "audio", "playback", "transcription", "session")
    pub error_type: String,
    pub message: String,
    pub cycle_id: Option<String>,
}

struct CycleInProgress {
    cycle_id: Uuid,
    question_index: usize,
    started_at: Instant,
    started_at_unix: u64,
    recording_started: Option<Instant>,
    recording_duration: Option<Duration>,
    clip_size: Option<u64>,
    transcription_started: Option<Instant>,
    transcription_duration: Option<Duration>,
    transcript_length: Option<u64>,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Collector for answer-cycle metrics. One cycle is live at a time, matching
/// the sequencer's single-attempt invariant.
#[derive(Default)]
pub struct MetricsCollector {
    current: Option<CycleInProgress>,
    history: VecDeque<CycleMetrics>,
    errors: VecDeque<ErrorRecord>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_cycle(&mut self, cycle_id: Uuid, question_index: usize) {
        self.current = Some(CycleInProgress {
            cycle_id,
            question_index,
            started_at: Instant::now(),
            started_at_unix: unix_now(),
            recording_started: None,
            recording_duration: None,
            clip_size: None,
            transcription_started: None,
            transcription_duration: None,
            transcript_length: None,
        });
    }

    pub fn is_active_cycle(&self, cycle_id: Uuid) -> bool {
        self.current
            .as_ref()
            .map(|c| c.cycle_id == cycle_id)
            .unwrap_or(false)
    }

    pub fn recording_started(&mut self) {
        if let Some(c) = self.current.as_mut() {
            c.recording_started = Some(Instant::now());
        }
    }

    pub fn recording_stopped(&mut self, clip_size_bytes: u64) {
        if let Some(c) = self.current.as_mut() {
            c.recording_duration = c.recording_started.map(|t| t.elapsed());
            c.clip_size = Some(clip_size_bytes);
        }
    }

    pub fn transcription_started(&mut self) {
        if let Some(c) = self.current.as_mut() {
            c.transcription_started = Some(Instant::now());
        }
    }

    pub fn transcription_completed(&mut self, transcript_chars: usize) {
        if let Some(c) = self.current.as_mut() {
            c.transcription_duration = c.transcription_started.map(|t| t.elapsed());
            c.transcript_length = Some(transcript_chars as u64);
        }
    }

    /// Close the current cycle as successful (answer durably submitted).
    pub fn cycle_completed(&mut self) {
        if let Some(c) = self.current.take() {
            let metrics = Self::finish(c, true, None);
            self.push_history(metrics);
        }
    }

    /// Close the current cycle as failed and record the error.
    pub fn cycle_failed(&mut self, error_type: &str, message: String) {
        let cycle_id = self.current.as_ref().map(|c| c.cycle_id.to_string());
        self.push_error(ErrorRecord {
            timestamp: unix_now(),
            error_type: error_type.to_string(),
            message: message.clone(),
            cycle_id,
        });
        if let Some(c) = self.current.take() {
            let metrics = Self::finish(c, false, Some(message));
            self.push_history(metrics);
        }
    }

    /// Drop the current cycle without recording it (skip, redo, teardown).
    pub fn cycle_cancelled(&mut self) {
        self.current = None;
    }

    fn finish(c: CycleInProgress, success: bool, error_message: Option<String>) -> CycleMetrics {
        CycleMetrics {
            cycle_id: c.cycle_id.to_string(),
            question_index: c.question_index,
            started_at: c.started_at_unix,
            recording_duration_ms: c
                .recording_duration
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            clip_size_bytes: c.clip_size.unwrap_or(0),
            transcription_duration_ms: c
                .transcription_duration
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            transcript_length_chars: c.transcript_length.unwrap_or(0),
            total_cycle_ms: c.started_at.elapsed().as_millis() as u64,
            success,
            error_message,
        }
    }

    fn push_history(&mut self, metrics: CycleMetrics) {
        self.history.push_back(metrics);
        while self.history.len() > MAX_CYCLE_HISTORY {
            self.history.pop_front();
        }
    }

    fn push_error(&mut self, error: ErrorRecord) {
        self.errors.push_back(error);
        while self.errors.len() > MAX_ERROR_HISTORY {
            self.errors.pop_front();
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        let total = self.history.len() as u64;
        let successful: Vec<&CycleMetrics> =
            self.history.iter().filter(|c| c.success).collect();
        let success_count = successful.len() as u64;

        let avg = |f: fn(&CycleMetrics) -> u64| -> u64 {
            if successful.is_empty() {
                0
            } else {
                successful.iter().map(|c| f(c)).sum::<u64>() / successful.len() as u64
            }
        };

        MetricsSummary {
            total_cycles: total,
            successful_cycles: success_count,
            failed_cycles: total - success_count,
            avg_recording_duration_ms: avg(|c| c.recording_duration_ms),
            avg_transcription_duration_ms: avg(|c| c.transcription_duration_ms),
            avg_total_cycle_ms: avg(|c| c.total_cycle_ms),
            last_error: self.errors.back().cloned(),
        }
    }
}
