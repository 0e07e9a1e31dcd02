//! Question playback on the default output device.
//!
//! Synthesized question audio arrives as WAV bytes. A dedicated playback
//! thread owns the `cpal::Stream` (streams are not `Send`) and reports
//! natural completion exactly once through the caller's callback, never on
//! fetch completion and never after `stop()`. The primary path plays at the
//! clip's native sample rate; if the device refuses that rate, playback
//! falls back to the device's default configuration with linear resampling
//! before giving up.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum PlaybackError {
    Decode(String),
    NoOutputDevice,
    StreamCreationFailed(String),
    ControllerGone,
}

impl std::fmt::Display for PlaybackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackError::Decode(e) => write!(f, "Failed to decode question audio: {}", e),
            PlaybackError::NoOutputDevice => write!(f, "No audio output device found"),
            PlaybackError::StreamCreationFailed(e) => {
                write!(f, "Failed to open playback stream: {}", e)
            }
            PlaybackError::ControllerGone => write!(f, "Playback controller is shut down"),
        }
    }
}

impl std::error::Error for PlaybackError {}

type DoneFn = Box<dyn FnOnce(Uuid) + Send>;
type ErrorFn = Box<dyn FnOnce(Uuid, PlaybackError) + Send>;

struct PlayRequest {
    id: Uuid,
    wav: Vec<u8>,
    on_done: DoneFn,
    on_error: ErrorFn,
}

enum Command {
    Play(PlayRequest),
    Stop,
    Shutdown,
}

/// Owns the playback thread. At most one question audio plays at a time;
/// a new `play` silently replaces whatever was still playing.
pub struct PlaybackController {
    cmd_tx: mpsc::Sender<Command>,
}

impl PlaybackController {
    pub fn spawn() -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        if let Err(e) = std::thread::Builder::new()
            .name("hirevox-playback".to_string())
            .spawn(move || run(cmd_rx))
        {
            log::error!("Failed to spawn playback thread: {}", e);
        }
        Self { cmd_tx }
    }

    /// Queue WAV bytes for playback. `on_done` fires once when the audio has
    /// fully played; `on_error` fires instead if decode or stream setup fail.
    pub fn play(&self, id: Uuid, wav: Vec<u8>, on_done: DoneFn, on_error: ErrorFn) {
        let request = PlayRequest {
            id,
            wav,
            on_done,
            on_error,
        };
        if let Err(mpsc::SendError(Command::Play(req))) = self.cmd_tx.send(Command::Play(request))
        {
            (req.on_error)(req.id, PlaybackError::ControllerGone);
        }
    }

    /// Halt any in-flight playback immediately. The suppressed completion
    /// callback never fires.
    pub fn stop(&self) {
        let _ = self.cmd_tx.send(Command::Stop);
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }
}

struct ActivePlayback {
    _stream: Stream,
    done: Arc<AtomicBool>,
    id: Uuid,
    on_done: Option<DoneFn>,
}

fn run(cmd_rx: mpsc::Receiver<Command>) {
    let mut current: Option<ActivePlayback> = None;

    loop {
        let timeout = if current.is_some() {
            Duration::from_millis(50)
        } else {
            Duration::from_millis(500)
        };

        match cmd_rx.recv_timeout(timeout) {
            Ok(Command::Play(req)) => {
                if current.take().is_some() {
                    log::debug!("Playback: replacing in-flight audio");
                }
                current = start_playback(req);
            }
            Ok(Command::Stop) => {
                if current.take().is_some() {
                    log::debug!("Playback: stopped");
                }
            }
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                let finished = current
                    .as_ref()
                    .map(|a| a.done.load(Ordering::Relaxed))
                    .unwrap_or(false);
                if finished {
                    if let Some(mut active) = current.take() {
                        log::debug!("Playback: finished id={}", active.id);
                        if let Some(cb) = active.on_done.take() {
                            cb(active.id);
                        }
                    }
                }
            }
        }
    }
}

fn start_playback(req: PlayRequest) -> Option<ActivePlayback> {
    let PlayRequest {
        id,
        wav,
        on_done,
        on_error,
    } = req;

    let decoded = match decode_wav(&wav) {
        Ok(d) => d,
        Err(e) => {
            on_error(id, e);
            return None;
        }
    };

    let host = cpal::default_host();
    let device = match host.default_output_device() {
        Some(d) => d,
        None => {
            on_error(id, PlaybackError::NoOutputDevice);
            return None;
        }
    };

    let default_config = match device.default_output_config() {
        Ok(c) => c,
        Err(e) => {
            on_error(id, PlaybackError::StreamCreationFailed(e.to_string()));
            return None;
        }
    };
    let channels = default_config.channels();
    let done = Arc::new(AtomicBool::new(false));

    // Primary path: play at the clip's native rate.
    let native = StreamConfig {
        channels,
        sample_rate: SampleRate(decoded.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let samples = Arc::new(decoded.samples);
    let stream = match build_output(&device, &native, samples.clone(), done.clone()) {
        Ok(s) => Ok(s),
        Err(e) => {
            // Fallback: device default rate with linear resampling.
            log::warn!(
                "Playback at native {}Hz failed ({}), falling back to device default {}Hz",
                decoded.sample_rate,
                e,
                default_config.sample_rate().0
            );
            let target_rate = default_config.sample_rate().0;
            let resampled = Arc::new(resample_linear(
                &samples,
                decoded.sample_rate,
                target_rate,
            ));
            let fallback = StreamConfig {
                channels,
                sample_rate: SampleRate(target_rate),
                buffer_size: cpal::BufferSize::Default,
            };
            done.store(false, Ordering::Relaxed);
            build_output(&device, &fallback, resampled, done.clone())
        }
    };

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            on_error(id, e);
            return None;
        }
    };

    if let Err(e) = stream.play() {
        on_error(id, PlaybackError::StreamCreationFailed(e.to_string()));
        return None;
    }

    log::info!("Playback: started id={}", id);
    Some(ActivePlayback {
        _stream: stream,
        done,
        id,
        on_done: Some(on_done),
    })
}

fn build_output(
    device: &cpal::Device,
    config: &StreamConfig,
    samples: Arc<Vec<f32>>,
    done: Arc<AtomicBool>,
) -> Result<Stream, PlaybackError> {
    let channels = config.channels.max(1) as usize;
    let mut pos = 0usize;
    let err_fn = |err| log::error!("Playback stream error: {}", err);

    device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let sample = samples.get(pos).copied().unwrap_or(0.0);
                    pos += 1;
                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                }
                if pos >= samples.len() {
                    done.store(true, Ordering::Relaxed);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| PlaybackError::StreamCreationFailed(e.to_string()))
}

struct DecodedAudio {
    samples: Vec<f32>,
    sample_rate: u32,
}

/// Decode WAV bytes to mono f32 samples. Handles 16/24/32-bit integer and
/// 32-bit float payloads; multi-channel audio is downmixed by averaging.
fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio, PlaybackError> {
    let reader =
        hound::WavReader::new(Cursor::new(bytes)).map_err(|e| PlaybackError::Decode(e.to_string()))?;
    let spec = reader.spec();
    if spec.channels == 0 || spec.sample_rate == 0 {
        return Err(PlaybackError::Decode("empty WAV header".to_string()));
    }
    let channels = spec.channels as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| PlaybackError::Decode(e.to_string()))?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(|e| PlaybackError::Decode(e.to_string()))?
        }
    };

    let samples: Vec<f32> = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    if samples.is_empty() {
        return Err(PlaybackError::Decode("WAV contains no samples".to_string()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}

fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).round() as usize;
    (0..out_len)
        .map(|i| {
            let src = i as f64 * ratio;
            let lo = src.floor() as usize;
            let hi = (lo + 1).min(samples.len() - 1);
            let frac = (src - lo as f64) as f32;
            let lo = lo.min(samples.len() - 1);
            samples[lo] * (1.0 - frac) + samples[hi] * frac
        })
        .collect()
}
