//! Effect runner for the interview sequencer.
//!
//! Executes effects produced by the state machine: synthesis + playback,
//! microphone capture, transcription uploads, and session calls. Each effect
//! runs as a spawned task and reports its completion back over the event
//! channel. The runner also enforces the one-active-recording invariant.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::audio::{
    cleanup_old_recordings, AudioRecorder, CaptureCallbacks, LevelMeter, RecordingHandle,
    StopReason,
};
use crate::metrics::MetricsCollector;
use crate::playback::PlaybackController;
use crate::session::{SessionClient, StartRequest};
use crate::settings::AppSettings;
use crate::state_machine::{Effect, Event, InterviewResultsView};
use crate::synthesis::SynthesisClient;
use crate::transcription::{TranscriptOutcome, TranscriptionGateway};

/// Trait for running effects asynchronously.
/// Completion events are sent back via the provided channel.
pub trait EffectRunner: Send + Sync + 'static {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>);
}

/// How the session is obtained at startup.
#[derive(Debug, Clone)]
pub enum SessionBootstrap {
    Start(StartRequest),
    Resume { session_id: String },
}

/// Real effect runner: CPAL capture, CPAL playback, HTTP gateways.
pub struct InterviewEffectRunner {
    settings: AppSettings,
    bootstrap: SessionBootstrap,
    recorder: Arc<Mutex<Option<AudioRecorder>>>,
    active: Arc<Mutex<Option<(Uuid, RecordingHandle)>>>,
    playback: Arc<PlaybackController>,
    synthesis: Arc<SynthesisClient>,
    transcription: Arc<TranscriptionGateway>,
    session: Arc<SessionClient>,
    metrics: Arc<Mutex<MetricsCollector>>,
    level_tx: Option<mpsc::Sender<f32>>,
}

impl InterviewEffectRunner {
    /// Create the runner. A failed microphone probe is not fatal here; the
    /// probe is retried at capture time so the attempt fails, not the app.
    pub fn new(
        settings: AppSettings,
        bootstrap: SessionBootstrap,
        level_tx: Option<mpsc::Sender<f32>>,
    ) -> Arc<Self> {
        let recorder = match AudioRecorder::new(&settings.audio) {
            Ok(r) => {
                log::info!("AudioRecorder initialized successfully");
                Some(r)
            }
            Err(e) => {
                log::warn!("AudioRecorder init failed (will retry on record): {}", e);
                None
            }
        };

        let synthesis = Arc::new(SynthesisClient::new(
            &settings.api.base_url,
            &settings.api.voice,
            settings.request_timeout(),
        ));
        let transcription = Arc::new(TranscriptionGateway::new(
            &settings.api.base_url,
            settings.clip.clone(),
            settings.transcribe_timeout(),
        ));
        let session = Arc::new(SessionClient::new(
            &settings.api.base_url,
            settings.request_timeout(),
        ));

        Arc::new(Self {
            settings,
            bootstrap,
            recorder: Arc::new(Mutex::new(recorder)),
            active: Arc::new(Mutex::new(None)),
            playback: Arc::new(PlaybackController::spawn()),
            synthesis,
            transcription,
            session,
            metrics: Arc::new(Mutex::new(MetricsCollector::new())),
            level_tx,
        })
    }

    pub fn metrics(&self) -> Arc<Mutex<MetricsCollector>> {
        self.metrics.clone()
    }
}

impl EffectRunner for InterviewEffectRunner {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>) {
        match effect {
            Effect::LoadSession => {
                let session = self.session.clone();
                let bootstrap = self.bootstrap.clone();

                tokio::spawn(async move {
                    let result = match &bootstrap {
                        SessionBootstrap::Start(request) => session.start_session(request).await,
                        SessionBootstrap::Resume { session_id } => {
                            session.fetch_session(session_id).await
                        }
                    };
                    let event = match result {
                        Ok(info) => Event::SessionLoaded {
                            session_id: info.session_id,
                            questions: info.questions,
                        },
                        Err(e) => Event::SessionLoadFailed { err: e.to_string() },
                    };
                    let _ = tx.send(event).await;
                });
            }

            Effect::Speak {
                id,
                text,
                question_index,
            } => {
                let synthesis = self.synthesis.clone();
                let playback = self.playback.clone();
                let metrics = self.metrics.clone();

                tokio::spawn(async move {
                    {
                        let mut m = metrics.lock().await;
                        m.start_cycle(id, question_index);
                    }

                    match synthesis.synthesize(&text).await {
                        Ok(bytes) => {
                            let tx_done = tx.clone();
                            let tx_err = tx.clone();
                            // Completion fires from the playback thread when
                            // the audio has fully played, never on fetch.
                            playback.play(
                                id,
                                bytes,
                                Box::new(move |id| {
                                    let _ = tx_done.blocking_send(Event::PlaybackFinished { id });
                                }),
                                Box::new(move |id, err| {
                                    let _ = tx_err.blocking_send(Event::PlaybackFailed {
                                        id,
                                        err: err.to_string(),
                                    });
                                }),
                            );
                        }
                        Err(e) => {
                            log::error!("Question synthesis failed: {}", e);
                            {
                                let mut m = metrics.lock().await;
                                m.cycle_failed("playback", e.to_string());
                            }
                            let _ = tx
                                .send(Event::PlaybackFailed {
                                    id,
                                    err: e.to_string(),
                                })
                                .await;
                        }
                    }
                });
            }

            Effect::StopPlayback => {
                self.playback.stop();
            }

            Effect::StartRecordDelay { id, delay } => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Event::RecordDelayElapsed { id }).await;
                });
            }

            Effect::StartCapture { id } => {
                let recorder = self.recorder.clone();
                let active = self.active.clone();
                let metrics = self.metrics.clone();
                let settings = self.settings.clone();
                let level_tx = self.level_tx.clone();

                tokio::spawn(async move {
                    // At most one recording session exists system-wide.
                    {
                        let guard = active.lock().await;
                        if guard.is_some() {
                            log::warn!("StartCapture refused: a recording is already active");
                            let _ = tx
                                .send(Event::CaptureStartFailed {
                                    id,
                                    err: "A recording is already in progress".to_string(),
                                })
                                .await;
                            return;
                        }
                    }

                    // Lazily (re)probe the device, then clone it out of the
                    // lock so the blocking start doesn't hold the mutex.
                    let rec = {
                        let mut guard = recorder.lock().await;
                        if guard.is_none() {
                            match AudioRecorder::new(&settings.audio) {
                                Ok(r) => *guard = Some(r),
                                Err(e) => {
                                    log::error!("Failed to initialize audio recorder: {}", e);
                                    let _ = tx
                                        .send(Event::CaptureStartFailed {
                                            id,
                                            err: e.to_string(),
                                        })
                                        .await;
                                    return;
                                }
                            }
                        }
                        guard.as_ref().cloned()
                    };

                    let Some(rec) = rec else {
                        let _ = tx
                            .send(Event::CaptureStartFailed {
                                id,
                                err: "Audio recorder unavailable".to_string(),
                            })
                            .await;
                        return;
                    };

                    let meter = LevelMeter::new(settings.vad.clone());
                    let tx_stop = tx.clone();
                    let on_auto_stop: Arc<dyn Fn(StopReason) + Send + Sync> =
                        Arc::new(move |reason| {
                            if tx_stop
                                .try_send(Event::AutoStopped { id, reason })
                                .is_err()
                            {
                                log::warn!("Auto-stop event dropped (channel closed or full)");
                            }
                        });
                    let on_level = level_tx.map(|ltx| {
                        Box::new(move |level: f32| {
                            let _ = ltx.try_send(level);
                        }) as Box<dyn Fn(f32) + Send>
                    });
                    let max_duration = settings.max_recording_duration();

                    let started = tokio::task::spawn_blocking(move || {
                        rec.start(
                            id,
                            meter,
                            CaptureCallbacks {
                                on_auto_stop,
                                on_level,
                            },
                            max_duration,
                        )
                    })
                    .await;

                    match started {
                        Ok(Ok(handle)) => {
                            let wav_path = handle.wav_path().to_path_buf();
                            {
                                let mut m = metrics.lock().await;
                                m.recording_started();
                            }
                            {
                                let mut guard = active.lock().await;
                                *guard = Some((id, handle));
                            }
                            let _ = tx.send(Event::CaptureStarted { id, wav_path }).await;
                        }
                        Ok(Err(e)) => {
                            log::error!("Failed to start recording: {}", e);
                            {
                                let mut m = metrics.lock().await;
                                m.cycle_failed("audio", e.to_string());
                            }
                            let _ = tx
                                .send(Event::CaptureStartFailed {
                                    id,
                                    err: e.to_string(),
                                })
                                .await;
                        }
                        Err(e) => {
                            log::error!("Capture start task failed: {}", e);
                            let _ = tx
                                .send(Event::CaptureStartFailed {
                                    id,
                                    err: "Audio capture task failed".to_string(),
                                })
                                .await;
                        }
                    }
                });
            }

            Effect::StopCapture { id, reason } => {
                let active = self.active.clone();
                let metrics = self.metrics.clone();

                tokio::spawn(async move {
                    let handle = {
                        let mut guard = active.lock().await;
                        match guard.take() {
                            Some((hid, h)) if hid == id => Some(h),
                            other => {
                                // Not ours (stale stop); leave it in place.
                                *guard = other;
                                None
                            }
                        }
                    };

                    let Some(handle) = handle else {
                        log::warn!("StopCapture: no active recording for id={}", id);
                        return;
                    };

                    let stopped = tokio::task::spawn_blocking(move || handle.stop()).await;
                    match stopped {
                        Ok(Ok(clip)) => {
                            {
                                let mut m = metrics.lock().await;
                                m.recording_stopped(clip.size_bytes);
                            }
                            log::info!(
                                "Capture stopped ({}): {}ms, {} bytes",
                                reason.as_str(),
                                clip.duration_ms,
                                clip.size_bytes
                            );
                            let _ = tx.send(Event::CaptureStopped { id, clip, reason }).await;
                        }
                        Ok(Err(e)) => {
                            log::error!("Failed to stop recording: {}", e);
                            {
                                let mut m = metrics.lock().await;
                                m.cycle_failed("audio", e.to_string());
                            }
                            let _ = tx
                                .send(Event::CaptureStopFailed {
                                    id,
                                    err: e.to_string(),
                                })
                                .await;
                        }
                        Err(e) => {
                            log::error!("Capture stop task failed: {}", e);
                            let _ = tx
                                .send(Event::CaptureStopFailed {
                                    id,
                                    err: "Audio capture task failed".to_string(),
                                })
                                .await;
                        }
                    }
                });
            }

            Effect::Transcribe {
                id,
                session_id,
                question_index,
                clip,
            } => {
                let gateway = self.transcription.clone();
                let metrics = self.metrics.clone();

                tokio::spawn(async move {
                    {
                        let mut m = metrics.lock().await;
                        m.transcription_started();
                    }

                    match gateway.transcribe(&clip, &session_id, question_index).await {
                        Ok(TranscriptOutcome::Text {
                            text,
                            transcript_id,
                        }) => {
                            {
                                let mut m = metrics.lock().await;
                                m.transcription_completed(text.len());
                            }
                            let _ = tx
                                .send(Event::TranscriptReady {
                                    id,
                                    text,
                                    transcript_id,
                                })
                                .await;
                        }
                        Ok(TranscriptOutcome::NoSpeech { message }) => {
                            log::info!("No speech in clip: {}", message);
                            let _ = tx.send(Event::TranscriptEmpty { id }).await;
                        }
                        Err(e) => {
                            log::error!("Transcription failed: {}", e);
                            {
                                let mut m = metrics.lock().await;
                                m.cycle_failed("transcription", e.to_string());
                            }
                            let _ = tx
                                .send(Event::TranscribeFailed {
                                    id,
                                    err: e.to_string(),
                                })
                                .await;
                        }
                    }
                });
            }

            Effect::SubmitAnswer {
                id,
                session_id,
                question_index,
                transcript_id,
            } => {
                let session = self.session.clone();
                let metrics = self.metrics.clone();

                tokio::spawn(async move {
                    match session
                        .submit_answer(&session_id, question_index, transcript_id.as_deref())
                        .await
                    {
                        Ok(ack) => {
                            {
                                let mut m = metrics.lock().await;
                                m.cycle_completed();
                            }
                            let _ = tx
                                .send(Event::SubmitOk {
                                    id,
                                    next_index: ack.next_question_index,
                                })
                                .await;
                        }
                        Err(e) => {
                            log::error!("Answer submit failed: {}", e);
                            {
                                let mut m = metrics.lock().await;
                                m.cycle_failed("session", e.to_string());
                            }
                            let _ = tx
                                .send(Event::SubmitFailed {
                                    id,
                                    err: e.to_string(),
                                })
                                .await;
                        }
                    }
                });
            }

            Effect::FetchResults { id, session_id } => {
                let session = self.session.clone();

                tokio::spawn(async move {
                    match session.fetch_results(&session_id).await {
                        Ok(results) => {
                            let _ = tx
                                .send(Event::ResultsReady {
                                    id,
                                    results: InterviewResultsView {
                                        average_score: results.average_score,
                                        summary: results.summary,
                                    },
                                })
                                .await;
                        }
                        Err(e) => {
                            let _ = tx
                                .send(Event::ResultsFailed {
                                    id,
                                    err: e.to_string(),
                                })
                                .await;
                        }
                    }
                });
            }

            Effect::Cleanup { id, wav_path } => {
                let metrics = self.metrics.clone();
                let keep = self.settings.audio.keep_recordings;

                tokio::spawn(async move {
                    {
                        let mut m = metrics.lock().await;
                        if m.is_active_cycle(id) {
                            m.cycle_cancelled();
                        }
                    }

                    match cleanup_old_recordings(keep) {
                        Ok(count) if count > 0 => {
                            log::info!("Cleaned up {} old recordings", count);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            log::warn!("Failed to cleanup old recordings: {}", e);
                        }
                    }

                    // The specific file is retained until the keep-last-N
                    // sweep catches it, which helps when debugging clips.
                    if let Some(path) = wav_path {
                        log::debug!("Recording file retained: {:?}", path);
                    }
                });
            }

            Effect::EmitUi => {
                // Handled in the main loop, not here
                unreachable!("EmitUi should be handled in run_state_loop");
            }
        }
    }
}

/// Stub effect runner simulating a happy-path interview (kept for demos and
/// as the base for scripted test fakes).
pub struct StubEffectRunner {
    pub questions: Vec<String>,
}

impl StubEffectRunner {
    pub fn new(questions: Vec<String>) -> Arc<Self> {
        Arc::new(Self { questions })
    }
}

impl EffectRunner for StubEffectRunner {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>) {
        match effect {
            Effect::LoadSession => {
                let questions = self.questions.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    let _ = tx
                        .send(Event::SessionLoaded {
                            session_id: "stub-session".to_string(),
                            questions,
                        })
                        .await;
                });
            }

            Effect::Speak { id, text, .. } => {
                tokio::spawn(async move {
                    log::info!("Stub: speaking {:?}", text);
                    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
                    let _ = tx.send(Event::PlaybackFinished { id }).await;
                });
            }

            Effect::StopPlayback => {
                log::info!("Stub: playback stopped");
            }

            Effect::StartRecordDelay { id, delay } => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Event::RecordDelayElapsed { id }).await;
                });
            }

            Effect::StartCapture { id } => {
                tokio::spawn(async move {
                    let wav_path = std::path::PathBuf::from(format!("/tmp/hirevox_{}.wav", id));
                    let _ = tx
                        .send(Event::CaptureStarted {
                            id,
                            wav_path,
                        })
                        .await;
                    // Simulate the candidate talking, then going silent.
                    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
                    let _ = tx
                        .send(Event::AutoStopped {
                            id,
                            reason: StopReason::Silence,
                        })
                        .await;
                });
            }

            Effect::StopCapture { id, reason } => {
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    let clip = crate::audio::Clip::new(
                        std::path::PathBuf::from(format!("/tmp/hirevox_{}.wav", id)),
                        2000,
                        64_000,
                    );
                    let _ = tx.send(Event::CaptureStopped { id, clip, reason }).await;
                });
            }

            Effect::Transcribe { id, .. } => {
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                    let _ = tx
                        .send(Event::TranscriptReady {
                            id,
                            text: "[Simulated answer transcript]".to_string(),
                            transcript_id: Some(format!("stub-{}", id)),
                        })
                        .await;
                });
            }

            Effect::SubmitAnswer {
                id, question_index, ..
            } => {
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    let _ = tx
                        .send(Event::SubmitOk {
                            id,
                            next_index: Some(question_index + 1),
                        })
                        .await;
                });
            }

            Effect::FetchResults { id, .. } => {
                tokio::spawn(async move {
                    let _ = tx
                        .send(Event::ResultsReady {
                            id,
                            results: InterviewResultsView::default(),
                        })
                        .await;
                });
            }

            Effect::Cleanup { wav_path, .. } => {
                if let Some(path) = wav_path {
                    log::debug!("Stub: would cleanup {}", path.display());
                }
            }

            Effect::EmitUi => {
                unreachable!("EmitUi should be handled in run_state_loop");
            }
        }
    }
}
