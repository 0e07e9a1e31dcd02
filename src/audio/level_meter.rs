//! Per-buffer loudness analysis and voice-activity detection.
//!
//! The meter consumes mono f32 sample buffers from the capture callback and
//! produces an RMS loudness scalar, a zero-crossing rate, and at most one
//! auto-stop verdict per recording. Silence-based stopping only arms after
//! speech has actually been detected, so a candidate who hasn't started
//! answering is never cut off.

use std::time::{Duration, Instant};

use crate::settings::VadSettings;

/// Why a recording stopped. `Silence` and `Noise` come from the meter;
/// the rest are decided upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Silence,
    Noise,
    Manual,
    Skip,
    MaxDuration,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Silence => "silence",
            StopReason::Noise => "noise",
            StopReason::Manual => "manual",
            StopReason::Skip => "skip",
            StopReason::MaxDuration => "max-duration",
        }
    }
}

/// Result of analyzing one capture buffer.
#[derive(Debug, Clone, Copy)]
pub struct Analysis {
    pub rms: f32,
    pub zcr: f32,
    /// RMS scaled for UI display, clamped to 1.0.
    pub level: f32,
    pub stop: Option<StopReason>,
}

#[derive(Debug, Clone, Copy)]
enum SpeechPhase {
    NotStarted,
    Speaking,
    SilentCounting { since: Instant },
}

pub struct LevelMeter {
    cfg: VadSettings,
    phase: SpeechPhase,
    noise_since: Option<Instant>,
    fired: bool,
}

impl LevelMeter {
    pub fn new(cfg: VadSettings) -> Self {
        Self {
            cfg,
            phase: SpeechPhase::NotStarted,
            noise_since: None,
            fired: false,
        }
    }

    pub fn has_spoken(&self) -> bool {
        !matches!(self.phase, SpeechPhase::NotStarted)
    }

    /// Analyze one buffer of mono samples captured at `now`.
    ///
    /// The stop verdict latches: once a reason has fired, subsequent buffers
    /// return `stop: None` even if the signal stays silent or noisy.
    pub fn process(&mut self, samples: &[f32], now: Instant) -> Analysis {
        if samples.is_empty() {
            return Analysis {
                rms: 0.0,
                zcr: 0.0,
                level: 0.0,
                stop: None,
            };
        }

        let rms = rms(samples);
        let zcr = zero_crossing_rate(samples);
        let level = (rms * self.cfg.level_scale).clamp(0.0, 1.0);

        let mut stop = None;
        if !self.fired {
            stop = self.update_silence(rms, now);
            if stop.is_none() {
                stop = self.update_noise(rms, zcr, now);
            }
            if stop.is_some() {
                self.fired = true;
            }
        }

        Analysis {
            rms,
            zcr,
            level,
            stop,
        }
    }

    fn update_silence(&mut self, rms: f32, now: Instant) -> Option<StopReason> {
        match self.phase {
            SpeechPhase::NotStarted => {
                if rms > self.cfg.speech_start_rms {
                    log::debug!("LevelMeter: speech started (rms={:.4})", rms);
                    self.phase = SpeechPhase::Speaking;
                }
                None
            }
            SpeechPhase::Speaking => {
                if rms < self.cfg.silence_rms {
                    self.phase = SpeechPhase::SilentCounting { since: now };
                }
                None
            }
            SpeechPhase::SilentCounting { since } => {
                if rms >= self.cfg.silence_rms {
                    // Candidate resumed; clear the silence timer.
                    self.phase = SpeechPhase::Speaking;
                    None
                } else if now.duration_since(since)
                    >= Duration::from_millis(self.cfg.silence_hangover_ms)
                {
                    log::info!(
                        "LevelMeter: {}ms of silence after speech, auto-stopping",
                        self.cfg.silence_hangover_ms
                    );
                    Some(StopReason::Silence)
                } else {
                    None
                }
            }
        }
    }

    fn update_noise(&mut self, rms: f32, zcr: f32, now: Instant) -> Option<StopReason> {
        if rms > self.cfg.noise_rms && zcr > self.cfg.noise_zcr {
            let since = *self.noise_since.get_or_insert(now);
            if now.duration_since(since) >= Duration::from_millis(self.cfg.noise_duration_ms) {
                log::info!(
                    "LevelMeter: sustained noise for {}ms (rms={:.3}, zcr={:.3}), auto-stopping",
                    self.cfg.noise_duration_ms,
                    rms,
                    zcr
                );
                return Some(StopReason::Noise);
            }
        } else {
            self.noise_since = None;
        }
        None
    }
}

fn rms(samples: &[f32]) -> f32 {
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    ((sum_squares / samples.len() as f64).sqrt()) as f32
}

fn zero_crossing_rate(samples: &[f32]) -> f32 {
    let crossings = samples
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f32 / samples.len() as f32
}
