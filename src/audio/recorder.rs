//! Microphone capture using CPAL, with hound WAV writing and live VAD.
//!
//! The `AudioRecorder` probes the default input device against an ordered
//! capture-format preference list at construction time. `start()` hands the
//! `cpal::Stream` to a dedicated capture thread (the stream is not `Send`,
//! so it must live and die on one thread); the input callback writes 16-bit
//! WAV samples and feeds the `LevelMeter`, whose auto-stop verdicts are
//! reported through a caller-supplied callback. `RecordingHandle::stop()`
//! finalizes the WAV and returns the measured `Clip`.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use hound::{WavSpec, WavWriter};
use uuid::Uuid;

use super::clip::Clip;
use super::level_meter::{LevelMeter, StopReason};
use super::paths::generate_wav_path;
use crate::settings::{AudioSettings, CaptureFormat};

type SharedWriter = Arc<Mutex<Option<WavWriter<BufWriter<File>>>>>;

/// Errors that can occur while acquiring or running the microphone.
/// Display strings carry the remediation hint shown to the candidate.
#[derive(Debug, Clone)]
pub enum AudioError {
    PermissionDenied(String),
    DeviceNotFound,
    DeviceBusy(String),
    Unsupported(String),
    NoSupportedFormat,
    StreamCreationFailed(String),
    FileCreationFailed(String),
    WriteFailed(String),
}

impl std::fmt::Display for AudioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioError::PermissionDenied(e) => write!(
                f,
                "Microphone access was denied ({}). Allow microphone access for this app in your system privacy settings and try again.",
                e
            ),
            AudioError::DeviceNotFound => write!(
                f,
                "No microphone was found. Connect a microphone and try again."
            ),
            AudioError::DeviceBusy(e) => write!(
                f,
                "The microphone is unavailable ({}). Close other applications using it and try again.",
                e
            ),
            AudioError::Unsupported(e) => {
                write!(f, "Audio capture is not supported on this system: {}", e)
            }
            AudioError::NoSupportedFormat => write!(
                f,
                "The microphone supports none of the configured capture formats."
            ),
            AudioError::StreamCreationFailed(e) => {
                write!(f, "Failed to open the audio stream: {}", e)
            }
            AudioError::FileCreationFailed(e) => write!(f, "Failed to create WAV file: {}", e),
            AudioError::WriteFailed(e) => write!(f, "Failed to write audio data: {}", e),
        }
    }
}

impl std::error::Error for AudioError {}

fn classify_backend(description: &str, fallback: AudioError) -> AudioError {
    let lower = description.to_lowercase();
    if lower.contains("denied") || lower.contains("permission") || lower.contains("authoriz") {
        AudioError::PermissionDenied(description.to_string())
    } else if lower.contains("busy") || lower.contains("in use") {
        AudioError::DeviceBusy(description.to_string())
    } else {
        fallback
    }
}

fn classify_probe_error(e: cpal::SupportedStreamConfigsError) -> AudioError {
    match e {
        cpal::SupportedStreamConfigsError::DeviceNotAvailable => {
            AudioError::DeviceBusy("device not available".to_string())
        }
        cpal::SupportedStreamConfigsError::InvalidArgument => {
            AudioError::Unsupported("invalid capture configuration".to_string())
        }
        cpal::SupportedStreamConfigsError::BackendSpecific { err } => classify_backend(
            &err.description,
            AudioError::StreamCreationFailed(err.description.clone()),
        ),
    }
}

fn classify_build_error(e: cpal::BuildStreamError) -> AudioError {
    match e {
        cpal::BuildStreamError::DeviceNotAvailable => {
            AudioError::DeviceBusy("device not available".to_string())
        }
        cpal::BuildStreamError::StreamConfigNotSupported => AudioError::NoSupportedFormat,
        cpal::BuildStreamError::InvalidArgument => {
            AudioError::Unsupported("invalid stream configuration".to_string())
        }
        cpal::BuildStreamError::StreamIdOverflow => {
            AudioError::StreamCreationFailed("stream ID overflow".to_string())
        }
        cpal::BuildStreamError::BackendSpecific { err } => classify_backend(
            &err.description,
            AudioError::StreamCreationFailed(err.description.clone()),
        ),
    }
}

fn to_cpal_format(format: CaptureFormat) -> SampleFormat {
    match format {
        CaptureFormat::I16 => SampleFormat::I16,
        CaptureFormat::F32 => SampleFormat::F32,
        CaptureFormat::U16 => SampleFormat::U16,
    }
}

/// Callbacks invoked from the capture path while a recording is live.
pub struct CaptureCallbacks {
    /// Fired at most once per recording when the meter decides to stop
    /// (silence/noise) or the wall-clock cap is hit.
    pub on_auto_stop: Arc<dyn Fn(StopReason) + Send + Sync>,
    /// Scaled RMS for a UI meter, fired per capture buffer.
    pub on_level: Option<Box<dyn Fn(f32) + Send>>,
}

/// Handle to an active recording. Stop it to finalize the WAV and obtain the
/// Clip; dropping it instead tears the capture thread down silently.
pub struct RecordingHandle {
    cmd_tx: mpsc::Sender<()>,
    done_rx: mpsc::Receiver<Result<Clip, AudioError>>,
    wav_path: PathBuf,
}

impl RecordingHandle {
    pub fn wav_path(&self) -> &Path {
        &self.wav_path
    }

    /// Stop recording and finalize the WAV file.
    pub fn stop(self) -> Result<Clip, AudioError> {
        let _ = self.cmd_tx.send(());
        match self.done_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(result) => result,
            Err(_) => Err(AudioError::WriteFailed(
                "capture thread did not finish in time".to_string(),
            )),
        }
    }
}

/// Audio recorder bound to the default input device.
#[derive(Clone)]
pub struct AudioRecorder {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
}

impl AudioRecorder {
    /// Probe the default input device against the capture-format preference
    /// list. This is also the permission checkpoint: denied or missing
    /// microphones surface here with an actionable error.
    pub fn new(settings: &AudioSettings) -> Result<Self, AudioError> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or(AudioError::DeviceNotFound)?;

        log::info!("Using audio input device: {:?}", device.name());

        let ranges: Vec<_> = device
            .supported_input_configs()
            .map_err(classify_probe_error)?
            .collect();

        let desired_rate = cpal::SampleRate(settings.preferred_sample_rate);
        let mut selected = None;
        'formats: for format in &settings.capture_formats {
            let want = to_cpal_format(*format);
            for range in &ranges {
                if range.sample_format() == want {
                    let range = range.clone();
                    let supported = if range.min_sample_rate() <= desired_rate
                        && desired_rate <= range.max_sample_rate()
                    {
                        range.with_sample_rate(desired_rate)
                    } else {
                        range.with_max_sample_rate()
                    };
                    selected = Some(supported);
                    break 'formats;
                }
            }
        }

        let supported = selected.ok_or(AudioError::NoSupportedFormat)?;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.into();

        log::info!(
            "Audio config: {} Hz, {} channels, {:?}",
            config.sample_rate.0,
            config.channels,
            sample_format
        );

        Ok(Self {
            device,
            config,
            sample_format,
        })
    }

    /// Start recording to a new WAV file. The capture thread owns the stream;
    /// the returned handle is the only way to stop it cleanly.
    pub fn start(
        &self,
        attempt_id: Uuid,
        meter: LevelMeter,
        callbacks: CaptureCallbacks,
        max_duration: Duration,
    ) -> Result<RecordingHandle, AudioError> {
        let wav_path = generate_wav_path(attempt_id)
            .map_err(|e| AudioError::FileCreationFailed(e.to_string()))?;

        let spec = WavSpec {
            channels: self.config.channels,
            sample_rate: self.config.sample_rate.0,
            bits_per_sample: 16, // Always write as 16-bit
            sample_format: hound::SampleFormat::Int,
        };

        let writer = WavWriter::create(&wav_path, spec)
            .map_err(|e| AudioError::FileCreationFailed(e.to_string()))?;
        let writer: SharedWriter = Arc::new(Mutex::new(Some(writer)));

        let is_recording = Arc::new(AtomicBool::new(true));
        let frames = Arc::new(AtomicU64::new(0));

        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), AudioError>>(1);
        let (cmd_tx, cmd_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::sync_channel::<Result<Clip, AudioError>>(1);

        let device = self.device.clone();
        let config = self.config.clone();
        let sample_format = self.sample_format;
        let sample_rate = self.config.sample_rate.0;
        let thread_writer = writer.clone();
        let thread_frames = frames.clone();
        let thread_recording = is_recording.clone();
        let on_auto_stop = callbacks.on_auto_stop.clone();
        let thread_path = wav_path.clone();

        std::thread::Builder::new()
            .name("hirevox-capture".to_string())
            .spawn(move || {
                let stream = match build_stream(
                    &device,
                    &config,
                    sample_format,
                    thread_writer.clone(),
                    thread_frames.clone(),
                    thread_recording.clone(),
                    meter,
                    callbacks.on_auto_stop,
                    callbacks.on_level,
                ) {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamCreationFailed(format!(
                        "Failed to start stream: {}",
                        e
                    ))));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                let started = Instant::now();
                let mut cap_fired = false;
                loop {
                    match cmd_rx.recv_timeout(Duration::from_millis(100)) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {
                            if !cap_fired && started.elapsed() >= max_duration {
                                cap_fired = true;
                                log::warn!(
                                    "Recording {} hit the {}s wall-clock cap",
                                    attempt_id,
                                    max_duration.as_secs()
                                );
                                (on_auto_stop)(StopReason::MaxDuration);
                            }
                        }
                    }
                }

                thread_recording.store(false, Ordering::SeqCst);
                drop(stream);

                let result =
                    finalize_clip(&thread_writer, &thread_frames, sample_rate, thread_path);
                let _ = done_tx.send(result);
            })
            .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))?;

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => {
                log::info!("Recording started: {:?}", wav_path);
                Ok(RecordingHandle {
                    cmd_tx,
                    done_rx,
                    wav_path,
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AudioError::StreamCreationFailed(
                "capture thread did not report readiness".to_string(),
            )),
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn build_stream(
    device: &Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    writer: SharedWriter,
    frames: Arc<AtomicU64>,
    is_recording: Arc<AtomicBool>,
    meter: LevelMeter,
    on_auto_stop: Arc<dyn Fn(StopReason) + Send + Sync>,
    on_level: Option<Box<dyn Fn(f32) + Send>>,
) -> Result<Stream, AudioError> {
    match sample_format {
        SampleFormat::I16 => build_stream_typed::<i16>(
            device,
            config,
            writer,
            frames,
            is_recording,
            meter,
            on_auto_stop,
            on_level,
        ),
        SampleFormat::U16 => build_stream_typed::<u16>(
            device,
            config,
            writer,
            frames,
            is_recording,
            meter,
            on_auto_stop,
            on_level,
        ),
        SampleFormat::F32 => build_stream_typed::<f32>(
            device,
            config,
            writer,
            frames,
            is_recording,
            meter,
            on_auto_stop,
            on_level,
        ),
        _ => Err(AudioError::NoSupportedFormat),
    }
}

#[allow(clippy::too_many_arguments)]
fn build_stream_typed<T>(
    device: &Device,
    config: &StreamConfig,
    writer: SharedWriter,
    frames: Arc<AtomicU64>,
    is_recording: Arc<AtomicBool>,
    mut meter: LevelMeter,
    on_auto_stop: Arc<dyn Fn(StopReason) + Send + Sync>,
    on_level: Option<Box<dyn Fn(f32) + Send>>,
) -> Result<Stream, AudioError>
where
    T: cpal::SizedSample + cpal::Sample<Float = f32> + Send + 'static,
{
    let err_fn = |err| log::error!("Audio stream error: {}", err);
    let channels = config.channels.max(1) as usize;
    let mut mono: Vec<f32> = Vec::new();

    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if !is_recording.load(Ordering::SeqCst) {
                    return;
                }

                mono.clear();
                {
                    let mut guard = writer.lock().unwrap();
                    if let Some(ref mut w) = *guard {
                        let mut acc = 0.0f32;
                        let mut lane = 0usize;
                        for &sample in data {
                            let f: f32 = sample.to_float_sample();
                            if w.write_sample(f32_to_i16(f)).is_err() {
                                log::error!("Failed to write sample");
                                break;
                            }
                            acc += f;
                            lane += 1;
                            if lane == channels {
                                mono.push(acc / channels as f32);
                                acc = 0.0;
                                lane = 0;
                            }
                        }
                    }
                }

                frames.fetch_add(mono.len() as u64, Ordering::Relaxed);

                let analysis = meter.process(&mono, Instant::now());
                if let Some(cb) = &on_level {
                    cb(analysis.level);
                }
                if let Some(reason) = analysis.stop {
                    (on_auto_stop)(reason);
                }
            },
            err_fn,
            None,
        )
        .map_err(classify_build_error)?;

    Ok(stream)
}

fn finalize_clip(
    writer: &SharedWriter,
    frames: &AtomicU64,
    sample_rate: u32,
    wav_path: PathBuf,
) -> Result<Clip, AudioError> {
    let taken = writer.lock().unwrap().take();
    if let Some(w) = taken {
        w.finalize()
            .map_err(|e| AudioError::WriteFailed(e.to_string()))?;
    }

    let frames = frames.load(Ordering::Relaxed);
    let duration_ms = if sample_rate > 0 {
        frames * 1000 / sample_rate as u64
    } else {
        0
    };
    let size_bytes = std::fs::metadata(&wav_path)
        .map_err(|e| AudioError::WriteFailed(e.to_string()))?
        .len();

    log::info!(
        "Recording finalized: {:?} ({}ms, {} bytes)",
        wav_path,
        duration_ms,
        size_bytes
    );

    Ok(Clip::new(wav_path, duration_ms, size_bytes))
}

/// Convert a float sample to i16 for WAV writing.
fn f32_to_i16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    (clamped * i16::MAX as f32) as i16
}
