//! Client settings: API endpoints, audio capture, VAD thresholds, and flow tuning.
//!
//! All thresholds the interview flow depends on (silence hangover, clip
//! validation, retry caps) live here rather than as hardcoded constants so
//! tests can force edge behavior deterministically.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const SETTINGS_FILE_NAME: &str = "settings.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub api: ApiSettings,
    pub audio: AudioSettings,
    pub vad: VadSettings,
    pub clip: ClipSettings,
    pub flow: FlowSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    /// Base URL of the interview server (synthesis, transcription, sessions).
    pub base_url: String,

    /// Voice name passed to the synthesis endpoint.
    pub voice: String,

    /// Timeout for ordinary API calls (session start/submit, synthesis).
    pub request_timeout_secs: u64,

    /// Timeout for transcription uploads. Whisper-class backends can take
    /// minutes on long answers, so this is deliberately generous.
    pub transcribe_timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            voice: "en_US-lessac-high".to_string(),
            request_timeout_secs: 15,
            transcribe_timeout_secs: 300,
        }
    }
}

/// Capture sample formats, probed in order against the input device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureFormat {
    I16,
    F32,
    U16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Ordered preference list of capture formats. The first one the device
    /// supports wins; an empty intersection is a hard NoSupportedFormat.
    pub capture_formats: Vec<CaptureFormat>,

    /// Preferred capture sample rate. Devices that can't do this rate fall
    /// back to their maximum supported rate.
    pub preferred_sample_rate: u32,

    /// Wall-clock cap on a single recording. Prevents runaway sessions when
    /// auto-stop never fires (e.g. constant background chatter).
    pub max_recording_secs: u64,

    /// How many finished temp WAVs to keep around for debugging.
    pub keep_recordings: usize,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            capture_formats: vec![CaptureFormat::I16, CaptureFormat::F32, CaptureFormat::U16],
            preferred_sample_rate: 48_000,
            max_recording_secs: 120,
            keep_recordings: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadSettings {
    /// RMS below this counts as silence once the candidate has spoken.
    pub silence_rms: f32,

    /// RMS must exceed this before the meter considers speech started.
    /// Higher than `silence_rms` so room noise can't arm the silence timer.
    pub speech_start_rms: f32,

    /// Continuous near-silence required after speech before auto-stop.
    pub silence_hangover_ms: u64,

    /// Sustained loud + noisy signal (static, feedback) thresholds.
    pub noise_rms: f32,
    pub noise_zcr: f32,
    pub noise_duration_ms: u64,

    /// Multiplier applied to RMS for the UI level meter.
    pub level_scale: f32,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            silence_rms: 0.012,
            speech_start_rms: 0.03,
            silence_hangover_ms: 3000,
            noise_rms: 0.3,
            noise_zcr: 0.5,
            noise_duration_ms: 5000,
            level_scale: 2.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipSettings {
    /// Clips shorter than this never reach the transcription service.
    pub min_duration_ms: u64,

    /// Clips smaller than this never reach the transcription service.
    pub min_size_bytes: u64,

    /// When enabled, clips shorter than `vad_check_max_ms` run a local
    /// speech check before upload.
    pub short_clip_vad_enabled: bool,
    pub vad_check_max_ms: u64,

    /// Ignore the first N ms when running the local speech check, to skip
    /// start-click transients.
    pub vad_ignore_start_ms: u64,
}

impl Default for ClipSettings {
    fn default() -> Self {
        Self {
            min_duration_ms: 700,
            min_size_bytes: 2048,
            short_clip_vad_enabled: true,
            vad_check_max_ms: 1500,
            vad_ignore_start_ms: 80,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowSettings {
    /// Play each question automatically when it becomes current.
    pub auto_play: bool,

    /// Pause between playback end and capture start, so the tail of the
    /// question audio never leaks into the recording.
    pub record_delay_ms: u64,

    /// Bounded automatic retries for too-short recordings, per question.
    pub max_auto_retries: u32,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            auto_play: true,
            record_delay_ms: 500,
            max_auto_retries: 2,
        }
    }
}

impl AppSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }

    pub fn transcribe_timeout(&self) -> Duration {
        Duration::from_secs(self.api.transcribe_timeout_secs)
    }

    pub fn max_recording_duration(&self) -> Duration {
        Duration::from_secs(self.audio.max_recording_secs)
    }
}

fn settings_path() -> Result<PathBuf, String> {
    let dir = dirs::config_dir()
        .ok_or_else(|| "Could not determine config directory".to_string())?
        .join("hirevox");
    Ok(dir.join(SETTINGS_FILE_NAME))
}

pub fn load_settings() -> AppSettings {
    let path = match settings_path() {
        Ok(p) => p,
        Err(e) => {
            log::warn!("Settings: {}", e);
            return AppSettings::default();
        }
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => match serde_json::from_str::<AppSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Settings: failed to parse {:?}: {}", path, e);
                AppSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppSettings::default(),
        Err(e) => {
            log::warn!("Settings: failed to read {:?}: {}", path, e);
            AppSettings::default()
        }
    }
}

pub fn save_settings(settings: &AppSettings) -> Result<(), String> {
    let path = settings_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory {:?}: {}", parent, e))?;
    }

    let contents =
        serde_json::to_string_pretty(settings).map_err(|e| format!("Serialize settings: {}", e))?;

    // Write atomically: temp file in the same directory, then rename, so a
    // crash mid-write never leaves a truncated settings.json behind.
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &contents)
        .map_err(|e| format!("Write temp settings {:?}: {}", tmp_path, e))?;

    // On Unix, rename atomically replaces the destination. On Windows, rename
    // fails if the destination exists, so remove it first (ignoring NotFound).
    if cfg!(windows) && path.exists() {
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(format!("Remove existing settings file {:?}: {}", path, e));
            }
        }
    }

    std::fs::rename(&tmp_path, &path)
        .map_err(|e| format!("Rename temp settings {:?} to {:?}: {}", tmp_path, path, e))?;
    Ok(())
}
