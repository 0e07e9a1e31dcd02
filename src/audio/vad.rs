//! Offline speech analysis for short clips.
//!
//! Before a short clip is uploaded, a WebRTC-VAD pass over the finished WAV
//! decides whether it plausibly contains speech at all. Clips that are pure
//! silence or a single transient (a cough, a bumped desk) are cheaper to
//! reject locally than to round-trip through the transcription service.

use std::path::Path;

use webrtc_vad::{SampleRate, Vad, VadMode};

const MIN_SPEECH_FRAMES: usize = 2;
const MAX_CREST_FACTOR: f32 = 15.0;

#[derive(Debug, Clone)]
pub struct SpeechStats {
    pub total_frames: usize,
    pub speech_frames: usize,
    pub total_samples: u64,
    pub peak_abs: i32,
    pub rms: f32,
    pub ignored_samples: u64,
}

impl SpeechStats {
    pub fn speech_ratio(&self) -> f32 {
        if self.total_frames == 0 {
            return 0.0;
        }
        self.speech_frames as f32 / self.total_frames as f32
    }

    /// Peak-to-RMS ratio. Transient noise (clicks, knocks) has a much higher
    /// crest factor than voiced speech.
    pub fn crest_factor(&self) -> f32 {
        if self.rms <= 0.0 {
            return f32::INFINITY;
        }
        self.peak_abs as f32 / self.rms
    }
}

/// Verdict on whether a short clip is worth uploading.
#[derive(Debug, Clone)]
pub struct SpeechVerdict {
    pub sounds_like_speech: bool,
    pub speech_frames: usize,
    pub total_frames: usize,
    pub crest_factor: f32,
}

pub fn judge(stats: &SpeechStats) -> SpeechVerdict {
    let speech_detected = stats.speech_frames >= MIN_SPEECH_FRAMES;
    let crest_factor = stats.crest_factor();
    SpeechVerdict {
        sounds_like_speech: speech_detected && crest_factor <= MAX_CREST_FACTOR,
        speech_frames: stats.speech_frames,
        total_frames: stats.total_frames,
        crest_factor,
    }
}

/// Scan a finished WAV for speech frames, skipping the first
/// `ignore_start_ms` to avoid counting start-click transients.
///
/// Multi-channel files are downmixed to mono by channel averaging; the VAD
/// only understands mono 16-bit PCM at 8/16/32/48 kHz.
pub fn speech_stats(path: &Path, ignore_start_ms: u64) -> Result<SpeechStats, String> {
    let mut reader =
        hound::WavReader::open(path).map_err(|e| format!("Open WAV {:?}: {}", path, e))?;
    let spec = reader.spec();

    log::debug!(
        "Speech check: {:?} channels={}, rate={}Hz, bits={}",
        path,
        spec.channels,
        spec.sample_rate,
        spec.bits_per_sample
    );

    if spec.channels == 0 {
        return Err("WAV reports zero channels".to_string());
    }
    if spec.bits_per_sample != 16 {
        return Err(format!(
            "Unsupported bits per sample {} (expected 16)",
            spec.bits_per_sample
        ));
    }

    let sample_rate = SampleRate::try_from(spec.sample_rate as i32)
        .map_err(|_| format!("Unsupported sample rate {}Hz", spec.sample_rate))?;

    // Aggressive mode minimizes false positives on non-speech noise.
    let mut vad = Vad::new_with_rate_and_mode(sample_rate, VadMode::VeryAggressive);

    // WebRTC VAD accepts only 10/20/30ms frames. 30ms keeps overhead down.
    let frame_ms = 30usize;
    let frame_len = (spec.sample_rate as usize * frame_ms) / 1000;
    if frame_len == 0 {
        return Err("Invalid WAV sample rate".to_string());
    }

    let channels = spec.channels as usize;
    let mut ignore_samples = (spec.sample_rate as u64)
        .saturating_mul(ignore_start_ms)
        .saturating_div(1000);

    let mut frame: Vec<i16> = Vec::with_capacity(frame_len);
    let mut total_frames = 0usize;
    let mut speech_frames = 0usize;

    let mut total_samples: u64 = 0;
    let mut ignored_samples: u64 = 0;
    let mut sum_squares: u128 = 0;
    let mut peak_abs: i32 = 0;

    let mut interleaved = reader.samples::<i16>();
    loop {
        // Downmix one frame's worth of interleaved channels.
        let mut acc: i32 = 0;
        let mut read = 0usize;
        for _ in 0..channels {
            match interleaved.next() {
                Some(s) => {
                    acc += i32::from(s.map_err(|e| format!("Read WAV sample: {}", e))?);
                    read += 1;
                }
                None => break,
            }
        }
        if read == 0 {
            break;
        }
        let mono = (acc / read as i32) as i16;

        if ignore_samples > 0 {
            ignore_samples -= 1;
            ignored_samples += 1;
            continue;
        }

        let mono_i32 = i32::from(mono);
        peak_abs = peak_abs.max(mono_i32.abs());
        sum_squares += (mono_i32 as i64 * mono_i32 as i64) as u128;
        total_samples += 1;

        frame.push(mono);
        if frame.len() == frame_len {
            total_frames += 1;
            if vad.is_voice_segment(&frame).unwrap_or(false) {
                speech_frames += 1;
            }
            frame.clear();
        }
    }

    let rms = if total_samples > 0 {
        ((sum_squares as f64 / total_samples as f64).sqrt()) as f32
    } else {
        0.0
    };

    let stats = SpeechStats {
        total_frames,
        speech_frames,
        total_samples,
        peak_abs,
        rms,
        ignored_samples,
    };

    log::debug!(
        "Speech check: ignored={}, samples={}, speech_frames={}/{} (ratio={:.2}), rms={:.0}, peak={}, crest={:.1}",
        stats.ignored_samples,
        stats.total_samples,
        stats.speech_frames,
        stats.total_frames,
        stats.speech_ratio(),
        stats.rms,
        stats.peak_abs,
        stats.crest_factor()
    );

    Ok(stats)
}
