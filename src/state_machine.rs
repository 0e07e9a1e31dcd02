//! Interview sequencer state machine.
//!
//! Single-writer pattern: every transition goes through `reduce()`, which
//! returns the next state plus a list of effects for the runner to execute.
//! Async completions (playback, capture, transcription, submit) come back as
//! events carrying the attempt UUID they belong to; events with stale ids
//! are dropped so a replay or skip can never be corrupted by a straggler
//! callback from an abandoned attempt.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::audio::{Clip, StopReason};
use crate::settings::{AppSettings, ClipSettings};

/// One interview question. The list is fixed once the session starts.
#[derive(Debug, Clone)]
pub struct Question {
    pub index: usize,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// The single user-visible status surface. Every failure lands here; the UI
/// never shows disabled controls without an explanation.
#[derive(Debug, Clone)]
pub struct Banner {
    pub message: String,
    pub severity: Severity,
}

impl Banner {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Info,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Warning,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Error,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InterviewResultsView {
    pub average_score: Option<f64>,
    pub summary: Option<String>,
}

/// Where the sequencer is in the play → record → transcribe → decide cycle.
#[derive(Debug, Clone)]
pub enum Phase {
    Setup,
    QuestionReady {
        index: usize,
    },
    PlayingQuestion {
        attempt_id: Uuid,
        index: usize,
    },
    AwaitingRecording {
        attempt_id: Uuid,
        index: usize,
    },
    Recording {
        attempt_id: Uuid,
        index: usize,
        wav_path: PathBuf,
        started_at: Instant,
        stopping: bool,
    },
    ProcessingTranscript {
        attempt_id: Uuid,
        index: usize,
        clip: Clip,
    },
    AwaitingDecision {
        index: usize,
        transcript: String,
        transcript_id: Option<String>,
        wav_path: Option<PathBuf>,
    },
    Submitting {
        attempt_id: Uuid,
        index: usize,
        transcript: String,
        transcript_id: Option<String>,
    },
    Skipping {
        attempt_id: Uuid,
        index: usize,
    },
    Completed {
        results: Option<InterviewResultsView>,
    },
}

/// Authoritative sequencer state. Cloned on every transition; the question
/// list sits behind an Arc so clones stay cheap.
#[derive(Debug, Clone)]
pub struct InterviewState {
    pub phase: Phase,
    pub session_id: Option<String>,
    pub questions: Arc<Vec<Question>>,
    /// Auto-retry counts for too-short recordings, per question index.
    pub retries: HashMap<usize, u32>,
    pub banner: Option<Banner>,
}

impl Default for InterviewState {
    fn default() -> Self {
        Self {
            phase: Phase::Setup,
            session_id: None,
            questions: Arc::new(Vec::new()),
            retries: HashMap::new(),
            banner: None,
        }
    }
}

impl InterviewState {
    pub fn is_recording(&self) -> bool {
        matches!(self.phase, Phase::Recording { .. })
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.phase, Phase::Completed { .. })
    }

    fn question_text(&self, index: usize) -> String {
        self.questions
            .get(index)
            .map(|q| q.text.clone())
            .unwrap_or_default()
    }

    fn session(&self) -> String {
        self.session_id.clone().unwrap_or_default()
    }
}

/// Events that drive transitions: user actions, and completions reported by
/// the effect runner.
#[derive(Debug, Clone)]
pub enum Event {
    /// Kick off session loading; sent once by the host after spawn.
    Initialize,

    // User actions
    Play,
    StopRequested,
    Submit,
    Redo,
    Skip,
    Teardown,

    // Session events
    SessionLoaded {
        session_id: String,
        questions: Vec<String>,
    },
    SessionLoadFailed {
        err: String,
    },

    // Playback events
    PlaybackFinished {
        id: Uuid,
    },
    PlaybackFailed {
        id: Uuid,
        err: String,
    },
    RecordDelayElapsed {
        id: Uuid,
    },

    // Capture events
    CaptureStarted {
        id: Uuid,
        wav_path: PathBuf,
    },
    CaptureStartFailed {
        id: Uuid,
        err: String,
    },
    /// The level meter (or wall-clock cap) wants the recording stopped.
    AutoStopped {
        id: Uuid,
        reason: StopReason,
    },
    CaptureStopped {
        id: Uuid,
        clip: Clip,
        reason: StopReason,
    },
    CaptureStopFailed {
        id: Uuid,
        err: String,
    },

    // Transcription events
    TranscriptReady {
        id: Uuid,
        text: String,
        transcript_id: Option<String>,
    },
    TranscriptEmpty {
        id: Uuid,
    },
    TranscribeFailed {
        id: Uuid,
        err: String,
    },

    // Submission / finalization events
    SubmitOk {
        id: Uuid,
        next_index: Option<usize>,
    },
    SubmitFailed {
        id: Uuid,
        err: String,
    },
    ResultsReady {
        id: Uuid,
        results: InterviewResultsView,
    },
    ResultsFailed {
        id: Uuid,
        err: String,
    },
}

/// Effects to execute after a transition. The runner handles these
/// asynchronously and reports back via events.
#[derive(Debug, Clone)]
pub enum Effect {
    LoadSession,
    Speak {
        id: Uuid,
        text: String,
        question_index: usize,
    },
    StopPlayback,
    StartRecordDelay {
        id: Uuid,
        delay: Duration,
    },
    StartCapture {
        id: Uuid,
    },
    StopCapture {
        id: Uuid,
        reason: StopReason,
    },
    Transcribe {
        id: Uuid,
        session_id: String,
        question_index: usize,
        clip: Clip,
    },
    SubmitAnswer {
        id: Uuid,
        session_id: String,
        question_index: usize,
        transcript_id: Option<String>,
    },
    FetchResults {
        id: Uuid,
        session_id: String,
    },
    Cleanup {
        id: Uuid,
        wav_path: Option<PathBuf>,
    },
    /// Signal to emit the UI projection; handled by the state loop itself.
    EmitUi,
}

/// Flow tuning the reducer needs. Derived from `AppSettings`.
#[derive(Debug, Clone)]
pub struct SequencerConfig {
    pub auto_play: bool,
    pub record_delay: Duration,
    pub clip_policy: ClipSettings,
    pub max_auto_retries: u32,
}

impl From<&AppSettings> for SequencerConfig {
    fn from(s: &AppSettings) -> Self {
        Self {
            auto_play: s.flow.auto_play,
            record_delay: Duration::from_millis(s.flow.record_delay_ms),
            clip_policy: s.clip.clone(),
            max_auto_retries: s.flow.max_auto_retries,
        }
    }
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self::from(&AppSettings::default())
    }
}

fn current_attempt(phase: &Phase) -> Option<Uuid> {
    match phase {
        Phase::Setup | Phase::QuestionReady { .. } | Phase::AwaitingDecision { .. } => None,
        Phase::PlayingQuestion { attempt_id, .. }
        | Phase::AwaitingRecording { attempt_id, .. }
        | Phase::Recording { attempt_id, .. }
        | Phase::ProcessingTranscript { attempt_id, .. }
        | Phase::Submitting { attempt_id, .. }
        | Phase::Skipping { attempt_id, .. } => Some(*attempt_id),
        Phase::Completed { .. } => None,
    }
}

/// Enter a question: auto-play starts the attempt immediately, otherwise the
/// sequencer waits for an explicit Play.
fn enter_question(base: &InterviewState, index: usize, cfg: &SequencerConfig) -> (InterviewState, Vec<Effect>) {
    let mut next = base.clone();
    if cfg.auto_play {
        let id = Uuid::new_v4();
        let text = next.question_text(index);
        next.phase = Phase::PlayingQuestion {
            attempt_id: id,
            index,
        };
        (
            next,
            vec![
                Effect::Speak {
                    id,
                    text,
                    question_index: index,
                },
                Effect::EmitUi,
            ],
        )
    } else {
        next.phase = Phase::QuestionReady { index };
        (next, vec![Effect::EmitUi])
    }
}

/// Advance after a durable submit or skip. The index only ever moves forward
/// by exactly one, or jumps to Completed when the list is exhausted.
fn advance(base: &InterviewState, from_index: usize, id: Uuid, cfg: &SequencerConfig) -> (InterviewState, Vec<Effect>) {
    let next_index = from_index + 1;
    if next_index >= base.questions.len() {
        let mut next = base.clone();
        next.phase = Phase::Completed { results: None };
        next.banner = None;
        let session_id = next.session();
        (
            next,
            vec![Effect::FetchResults { id, session_id }, Effect::EmitUi],
        )
    } else {
        let mut next = base.clone();
        next.banner = None;
        enter_question(&next, next_index, cfg)
    }
}

fn start_skip(base: &InterviewState, index: usize, mut extra: Vec<Effect>) -> (InterviewState, Vec<Effect>) {
    let id = Uuid::new_v4();
    let mut next = base.clone();
    next.phase = Phase::Skipping {
        attempt_id: id,
        index,
    };
    next.banner = None;
    let session_id = next.session();
    extra.push(Effect::SubmitAnswer {
        id,
        session_id,
        question_index: index,
        transcript_id: None,
    });
    extra.push(Effect::EmitUi);
    (next, extra)
}

/// Reducer: (state, event) -> (next state, effects).
///
/// Key rules:
/// - Never mutate state in place; build the successor.
/// - Drop events whose attempt id doesn't match the current attempt.
/// - Emit EmitUi whenever anything user-visible changed.
pub fn reduce(state: &InterviewState, event: Event, cfg: &SequencerConfig) -> (InterviewState, Vec<Effect>) {
    use Event::*;

    let attempt = current_attempt(&state.phase);
    let is_stale = |eid: Uuid| attempt != Some(eid);

    match (&state.phase, event) {
        // -----------------
        // Setup
        // -----------------
        (Phase::Setup, Initialize) => (state.clone(), vec![Effect::LoadSession, Effect::EmitUi]),
        (Phase::Setup, SessionLoaded { session_id, questions }) => {
            if questions.is_empty() {
                let mut next = state.clone();
                next.banner = Some(Banner::error("The interview has no questions"));
                return (next, vec![Effect::EmitUi]);
            }
            log::info!(
                "Session {} loaded with {} questions",
                session_id,
                questions.len()
            );
            let mut next = state.clone();
            next.session_id = Some(session_id);
            next.questions = Arc::new(
                questions
                    .into_iter()
                    .enumerate()
                    .map(|(index, text)| Question { index, text })
                    .collect(),
            );
            next.banner = None;
            enter_question(&next, 0, cfg)
        }
        (Phase::Setup, SessionLoadFailed { err }) => {
            let mut next = state.clone();
            next.banner = Some(Banner::error(format!("Could not load the interview: {}", err)));
            (next, vec![Effect::EmitUi])
        }

        // -----------------
        // QuestionReady
        // -----------------
        (Phase::QuestionReady { index }, Play) => {
            let id = Uuid::new_v4();
            let text = state.question_text(*index);
            let mut next = state.clone();
            let question_index = *index;
            next.phase = Phase::PlayingQuestion {
                attempt_id: id,
                index: question_index,
            };
            next.banner = None;
            (
                next,
                vec![
                    Effect::Speak {
                        id,
                        text,
                        question_index,
                    },
                    Effect::EmitUi,
                ],
            )
        }
        (Phase::QuestionReady { index }, Skip) => start_skip(state, *index, vec![]),

        // -----------------
        // PlayingQuestion
        // -----------------
        (Phase::PlayingQuestion { attempt_id, index }, PlaybackFinished { id })
            if *attempt_id == id =>
        {
            let mut next = state.clone();
            next.phase = Phase::AwaitingRecording {
                attempt_id: id,
                index: *index,
            };
            (
                next,
                vec![
                    Effect::StartRecordDelay {
                        id,
                        delay: cfg.record_delay,
                    },
                    Effect::EmitUi,
                ],
            )
        }
        (Phase::PlayingQuestion { attempt_id, index }, PlaybackFailed { id, err })
            if *attempt_id == id =>
        {
            let mut next = state.clone();
            next.phase = Phase::QuestionReady { index: *index };
            next.banner = Some(Banner::error(format!(
                "Could not play the question: {}",
                err
            )));
            (next, vec![Effect::EmitUi])
        }
        // Replay: abandon the current playback and start over.
        (Phase::PlayingQuestion { index, .. }, Play) => {
            let id = Uuid::new_v4();
            let question_index = *index;
            let text = state.question_text(question_index);
            let mut next = state.clone();
            next.phase = Phase::PlayingQuestion {
                attempt_id: id,
                index: question_index,
            };
            (
                next,
                vec![
                    Effect::StopPlayback,
                    Effect::Speak {
                        id,
                        text,
                        question_index,
                    },
                    Effect::EmitUi,
                ],
            )
        }
        (Phase::PlayingQuestion { index, .. }, Skip) => {
            let index = *index;
            start_skip(state, index, vec![Effect::StopPlayback])
        }

        // -----------------
        // AwaitingRecording
        // -----------------
        (Phase::AwaitingRecording { attempt_id, .. }, RecordDelayElapsed { id })
            if *attempt_id == id =>
        {
            (state.clone(), vec![Effect::StartCapture { id }])
        }
        (Phase::AwaitingRecording { attempt_id, index }, CaptureStarted { id, wav_path })
            if *attempt_id == id =>
        {
            let mut next = state.clone();
            next.phase = Phase::Recording {
                attempt_id: id,
                index: *index,
                wav_path,
                started_at: Instant::now(),
                stopping: false,
            };
            (next, vec![Effect::EmitUi])
        }
        (Phase::AwaitingRecording { attempt_id, index }, CaptureStartFailed { id, err })
            if *attempt_id == id =>
        {
            let mut next = state.clone();
            next.phase = Phase::QuestionReady { index: *index };
            next.banner = Some(Banner::error(err));
            (next, vec![Effect::EmitUi])
        }
        (Phase::AwaitingRecording { attempt_id, index }, Skip) => {
            // Capture may start between the skip and the stop reaching the
            // runner; stop defensively so no live stream outlives the skip.
            let stop = Effect::StopCapture {
                id: *attempt_id,
                reason: StopReason::Skip,
            };
            let index = *index;
            start_skip(state, index, vec![stop])
        }

        // -----------------
        // Recording
        // -----------------
        (
            Phase::Recording {
                attempt_id,
                stopping: false,
                ..
            },
            StopRequested,
        ) => {
            let id = *attempt_id;
            let mut next = state.clone();
            if let Phase::Recording { stopping, .. } = &mut next.phase {
                *stopping = true;
            }
            (
                next,
                vec![
                    Effect::StopCapture {
                        id,
                        reason: StopReason::Manual,
                    },
                    Effect::EmitUi,
                ],
            )
        }
        // Stop already in flight: idempotent no-op.
        (Phase::Recording { stopping: true, .. }, StopRequested) => (state.clone(), vec![]),
        (
            Phase::Recording {
                attempt_id,
                stopping: false,
                ..
            },
            AutoStopped { id, reason },
        ) if *attempt_id == id => {
            log::info!("Auto-stop ({}) for attempt {}", reason.as_str(), id);
            let mut next = state.clone();
            if let Phase::Recording { stopping, .. } = &mut next.phase {
                *stopping = true;
            }
            (next, vec![Effect::StopCapture { id, reason }, Effect::EmitUi])
        }
        (Phase::Recording { stopping: true, .. }, AutoStopped { .. }) => (state.clone(), vec![]),
        (Phase::Recording { attempt_id, index, .. }, Skip) => {
            let stop = Effect::StopCapture {
                id: *attempt_id,
                reason: StopReason::Skip,
            };
            let index = *index;
            start_skip(state, index, vec![stop])
        }
        (Phase::Recording { attempt_id, index, .. }, CaptureStopped { id, clip, reason })
            if *attempt_id == id =>
        {
            let index = *index;
            if reason == StopReason::Skip {
                // Raced with a skip that was decided before the stop landed;
                // treat it as the skip path with no upload.
                return start_skip(
                    state,
                    index,
                    vec![Effect::Cleanup {
                        id,
                        wav_path: Some(clip.wav_path),
                    }],
                );
            }

            if clip.meets(&cfg.clip_policy) {
                let mut next = state.clone();
                next.retries.remove(&index);
                next.phase = Phase::ProcessingTranscript {
                    attempt_id: id,
                    index,
                    clip: clip.clone(),
                };
                let session_id = next.session();
                (
                    next,
                    vec![
                        Effect::Transcribe {
                            id,
                            session_id,
                            question_index: index,
                            clip,
                        },
                        Effect::EmitUi,
                    ],
                )
            } else {
                let mut next = state.clone();
                let attempts = next.retries.entry(index).or_insert(0);
                *attempts += 1;
                let attempts = *attempts;
                let cleanup = Effect::Cleanup {
                    id,
                    wav_path: Some(clip.wav_path),
                };
                log::warn!(
                    "Clip rejected ({}ms, {} bytes), auto-retry {}/{}",
                    clip.duration_ms,
                    clip.size_bytes,
                    attempts,
                    cfg.max_auto_retries
                );
                if attempts <= cfg.max_auto_retries {
                    next.banner = Some(Banner::warning(
                        "That recording was too short, so the question will repeat",
                    ));
                    let (replayed, mut effects) = enter_question(&next, index, cfg);
                    effects.insert(0, cleanup);
                    (replayed, effects)
                } else {
                    next.phase = Phase::QuestionReady { index };
                    next.banner = Some(Banner::error(
                        "The recording was too short to transcribe. Play the question and answer again",
                    ));
                    (next, vec![cleanup, Effect::EmitUi])
                }
            }
        }
        (Phase::Recording { attempt_id, index, .. }, CaptureStopFailed { id, err })
            if *attempt_id == id =>
        {
            let mut next = state.clone();
            next.phase = Phase::QuestionReady { index: *index };
            next.banner = Some(Banner::error(err));
            (next, vec![Effect::EmitUi])
        }

        // -----------------
        // ProcessingTranscript
        // -----------------
        (
            Phase::ProcessingTranscript { attempt_id, index, clip },
            TranscriptReady { id, text, transcript_id },
        ) if *attempt_id == id => {
            let mut next = state.clone();
            next.phase = Phase::AwaitingDecision {
                index: *index,
                transcript: text,
                transcript_id,
                wav_path: Some(clip.wav_path.clone()),
            };
            next.banner = None;
            (next, vec![Effect::EmitUi])
        }
        (Phase::ProcessingTranscript { attempt_id, index, clip }, TranscriptEmpty { id })
            if *attempt_id == id =>
        {
            let mut next = state.clone();
            next.phase = Phase::QuestionReady { index: *index };
            next.banner = Some(Banner::warning(
                "We couldn't hear an answer in that recording. Play the question and try again",
            ));
            (
                next,
                vec![
                    Effect::Cleanup {
                        id,
                        wav_path: Some(clip.wav_path.clone()),
                    },
                    Effect::EmitUi,
                ],
            )
        }
        (Phase::ProcessingTranscript { attempt_id, index, clip }, TranscribeFailed { id, err })
            if *attempt_id == id =>
        {
            let mut next = state.clone();
            next.phase = Phase::QuestionReady { index: *index };
            next.banner = Some(Banner::error(format!("Transcription failed: {}", err)));
            (
                next,
                vec![
                    Effect::Cleanup {
                        id,
                        wav_path: Some(clip.wav_path.clone()),
                    },
                    Effect::EmitUi,
                ],
            )
        }
        (Phase::ProcessingTranscript { clip, index, .. }, Skip) => {
            let cleanup = Effect::Cleanup {
                id: Uuid::new_v4(),
                wav_path: Some(clip.wav_path.clone()),
            };
            let index = *index;
            start_skip(state, index, vec![cleanup])
        }

        // -----------------
        // AwaitingDecision
        // -----------------
        (
            Phase::AwaitingDecision {
                index,
                transcript,
                transcript_id,
                wav_path,
            },
            Submit,
        ) => {
            let id = Uuid::new_v4();
            let mut next = state.clone();
            let session_id = next.session();
            let effects = vec![
                Effect::SubmitAnswer {
                    id,
                    session_id,
                    question_index: *index,
                    transcript_id: transcript_id.clone(),
                },
                Effect::Cleanup {
                    id,
                    wav_path: wav_path.clone(),
                },
                Effect::EmitUi,
            ];
            next.phase = Phase::Submitting {
                attempt_id: id,
                index: *index,
                transcript: transcript.clone(),
                transcript_id: transcript_id.clone(),
            };
            next.banner = None;
            (next, effects)
        }
        // Redo discards the pending transcript; same index, no network call.
        (Phase::AwaitingDecision { index, wav_path, .. }, Redo) => {
            let cleanup = Effect::Cleanup {
                id: Uuid::new_v4(),
                wav_path: wav_path.clone(),
            };
            let index = *index;
            let mut next = state.clone();
            next.banner = None;
            let (entered, mut effects) = enter_question(&next, index, cfg);
            effects.insert(0, cleanup);
            (entered, effects)
        }
        (Phase::AwaitingDecision { index, wav_path, .. }, Skip) => {
            let cleanup = Effect::Cleanup {
                id: Uuid::new_v4(),
                wav_path: wav_path.clone(),
            };
            let index = *index;
            start_skip(state, index, vec![cleanup])
        }

        // -----------------
        // Submitting / Skipping
        // -----------------
        (Phase::Submitting { attempt_id, index, .. }, SubmitOk { id, next_index })
            if *attempt_id == id =>
        {
            if let Some(server_next) = next_index {
                if server_next != index + 1 {
                    log::warn!(
                        "Server next_question_index {} disagrees with local {}",
                        server_next,
                        index + 1
                    );
                }
            }
            advance(state, *index, id, cfg)
        }
        (
            Phase::Submitting {
                attempt_id,
                index,
                transcript,
                transcript_id,
            },
            SubmitFailed { id, err },
        ) if *attempt_id == id => {
            // Keep the pending answer so the candidate can just hit submit
            // again once the network recovers.
            let mut next = state.clone();
            next.phase = Phase::AwaitingDecision {
                index: *index,
                transcript: transcript.clone(),
                transcript_id: transcript_id.clone(),
                wav_path: None,
            };
            next.banner = Some(Banner::error(format!("Could not submit the answer: {}", err)));
            (next, vec![Effect::EmitUi])
        }
        (Phase::Skipping { attempt_id, index }, SubmitOk { id, .. }) if *attempt_id == id => {
            advance(state, *index, id, cfg)
        }
        (Phase::Skipping { attempt_id, index }, SubmitFailed { id, err })
            if *attempt_id == id =>
        {
            let mut next = state.clone();
            next.phase = Phase::QuestionReady { index: *index };
            next.banner = Some(Banner::error(format!("Could not skip the question: {}", err)));
            (next, vec![Effect::EmitUi])
        }

        // -----------------
        // Completed: results fetch is best-effort
        // -----------------
        (Phase::Completed { .. }, ResultsReady { results, .. }) => {
            let mut next = state.clone();
            next.phase = Phase::Completed {
                results: Some(results),
            };
            (next, vec![Effect::EmitUi])
        }
        (Phase::Completed { .. }, ResultsFailed { err, .. }) => {
            // Completion stands; the candidate never sees this failure.
            log::warn!("Results fetch failed (ignored): {}", err);
            (state.clone(), vec![])
        }

        // -----------------
        // Teardown: stop everything, swallow all teardown errors.
        // -----------------
        (_, Teardown) => {
            let mut effects = vec![Effect::StopPlayback];
            if let Phase::Recording { attempt_id, .. } = state.phase {
                effects.push(Effect::StopCapture {
                    id: attempt_id,
                    reason: StopReason::Manual,
                });
            }
            (state.clone(), effects)
        }

        // -----------------
        // Stale events (drop silently)
        // -----------------
        (_, PlaybackFinished { id }) if is_stale(id) => (state.clone(), vec![]),
        (_, PlaybackFailed { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, RecordDelayElapsed { id }) if is_stale(id) => (state.clone(), vec![]),
        (_, CaptureStarted { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, CaptureStartFailed { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, AutoStopped { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, CaptureStopped { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, CaptureStopFailed { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, TranscriptReady { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, TranscriptEmpty { id }) if is_stale(id) => (state.clone(), vec![]),
        (_, TranscribeFailed { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, SubmitOk { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, SubmitFailed { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, ResultsReady { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, ResultsFailed { id, .. }) if is_stale(id) => (state.clone(), vec![]),

        // -----------------
        // Unhandled: no transition
        // -----------------
        _ => (state.clone(), vec![]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SequencerConfig {
        SequencerConfig::default()
    }

    fn manual_cfg() -> SequencerConfig {
        let mut c = SequencerConfig::default();
        c.auto_play = false;
        c
    }

    fn loaded_state(n: usize) -> InterviewState {
        let questions: Vec<String> = (0..n).map(|i| format!("Question {}", i + 1)).collect();
        let (state, _) = reduce(
            &InterviewState::default(),
            Event::SessionLoaded {
                session_id: "s-1".to_string(),
                questions,
            },
            &manual_cfg(),
        );
        state
    }

    fn clip(duration_ms: u64, size_bytes: u64) -> Clip {
        Clip::new(PathBuf::from("/tmp/a.wav"), duration_ms, size_bytes)
    }

    fn drive_to_recording(state: InterviewState) -> (InterviewState, Uuid) {
        let c = manual_cfg();
        let (state, effects) = reduce(&state, Event::Play, &c);
        let id = match effects.iter().find_map(|e| match e {
            Effect::Speak { id, .. } => Some(*id),
            _ => None,
        }) {
            Some(id) => id,
            None => panic!("expected Speak effect"),
        };
        let (state, _) = reduce(&state, Event::PlaybackFinished { id }, &c);
        let (state, _) = reduce(&state, Event::RecordDelayElapsed { id }, &c);
        let (state, _) = reduce(
            &state,
            Event::CaptureStarted {
                id,
                wav_path: PathBuf::from("/tmp/a.wav"),
            },
            &c,
        );
        assert!(state.is_recording());
        (state, id)
    }

    #[test]
    fn initialize_requests_session_load() {
        let (next, effects) = reduce(&InterviewState::default(), Event::Initialize, &cfg());
        assert!(matches!(next.phase, Phase::Setup));
        assert!(effects.iter().any(|e| matches!(e, Effect::LoadSession)));
    }

    #[test]
    fn empty_question_list_is_a_setup_error() {
        let (next, effects) = reduce(
            &InterviewState::default(),
            Event::SessionLoaded {
                session_id: "s-1".to_string(),
                questions: vec![],
            },
            &cfg(),
        );
        assert!(matches!(next.phase, Phase::Setup));
        let banner = next.banner.expect("banner");
        assert_eq!(banner.severity, Severity::Error);
        assert!(!effects.iter().any(|e| matches!(e, Effect::Speak { .. })));
    }

    #[test]
    fn session_load_auto_plays_first_question() {
        let (next, effects) = reduce(
            &InterviewState::default(),
            Event::SessionLoaded {
                session_id: "s-1".to_string(),
                questions: vec!["Q1".to_string(), "Q2".to_string()],
            },
            &cfg(),
        );
        assert!(matches!(next.phase, Phase::PlayingQuestion { index: 0, .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Speak { text, .. } if text == "Q1")));
    }

    #[test]
    fn manual_mode_waits_in_question_ready() {
        let state = loaded_state(2);
        assert!(matches!(state.phase, Phase::QuestionReady { index: 0 }));
    }

    #[test]
    fn playback_chains_into_capture_after_delay() {
        let state = loaded_state(1);
        let c = manual_cfg();
        let (state, effects) = reduce(&state, Event::Play, &c);
        let id = match state.phase {
            Phase::PlayingQuestion { attempt_id, .. } => attempt_id,
            ref p => panic!("unexpected phase {:?}", p),
        };
        assert!(effects.iter().any(|e| matches!(e, Effect::Speak { .. })));

        let (state, effects) = reduce(&state, Event::PlaybackFinished { id }, &c);
        assert!(matches!(state.phase, Phase::AwaitingRecording { .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StartRecordDelay { .. })));

        let (_, effects) = reduce(&state, Event::RecordDelayElapsed { id }, &c);
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StartCapture { .. })));
    }

    #[test]
    fn stale_playback_finished_is_ignored() {
        let state = loaded_state(1);
        let (state, _) = reduce(&state, Event::Play, &manual_cfg());
        let (next, effects) = reduce(
            &state,
            Event::PlaybackFinished { id: Uuid::new_v4() },
            &manual_cfg(),
        );
        assert!(matches!(next.phase, Phase::PlayingQuestion { .. }));
        assert!(effects.is_empty());
    }

    #[test]
    fn stop_requested_is_idempotent_while_stopping() {
        let (state, id) = drive_to_recording(loaded_state(1));
        let (state, effects) = reduce(&state, Event::StopRequested, &manual_cfg());
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StopCapture { reason: StopReason::Manual, .. })));

        // Second stop while the first is in flight: nothing happens.
        let (state, effects) = reduce(&state, Event::StopRequested, &manual_cfg());
        assert!(effects.is_empty());

        // Auto-stop arriving after a manual stop is also dropped.
        let (_, effects) = reduce(
            &state,
            Event::AutoStopped {
                id,
                reason: StopReason::Silence,
            },
            &manual_cfg(),
        );
        assert!(effects.is_empty());
    }

    #[test]
    fn stop_when_not_recording_is_a_noop() {
        let state = loaded_state(1);
        let (next, effects) = reduce(&state, Event::StopRequested, &manual_cfg());
        assert!(matches!(next.phase, Phase::QuestionReady { .. }));
        assert!(effects.is_empty());
    }

    #[test]
    fn auto_stop_triggers_capture_stop_with_reason() {
        let (state, id) = drive_to_recording(loaded_state(1));
        let (_, effects) = reduce(
            &state,
            Event::AutoStopped {
                id,
                reason: StopReason::Silence,
            },
            &manual_cfg(),
        );
        assert!(effects.iter().any(
            |e| matches!(e, Effect::StopCapture { reason: StopReason::Silence, .. })
        ));
    }

    #[test]
    fn valid_clip_goes_to_transcription() {
        let (state, id) = drive_to_recording(loaded_state(1));
        let (next, effects) = reduce(
            &state,
            Event::CaptureStopped {
                id,
                clip: clip(2000, 64_000),
                reason: StopReason::Silence,
            },
            &manual_cfg(),
        );
        assert!(matches!(next.phase, Phase::ProcessingTranscript { .. }));
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Transcribe { session_id, question_index: 0, .. } if session_id == "s-1"
        )));
    }

    #[test]
    fn clip_duration_boundary_is_inclusive_at_700() {
        let (state, id) = drive_to_recording(loaded_state(1));
        let (next, _) = reduce(
            &state,
            Event::CaptureStopped {
                id,
                clip: clip(700, 64_000),
                reason: StopReason::Manual,
            },
            &manual_cfg(),
        );
        assert!(matches!(next.phase, Phase::ProcessingTranscript { .. }));

        let (state, id) = drive_to_recording(loaded_state(1));
        let (next, _) = reduce(
            &state,
            Event::CaptureStopped {
                id,
                clip: clip(699, 64_000),
                reason: StopReason::Manual,
            },
            &manual_cfg(),
        );
        assert!(!matches!(next.phase, Phase::ProcessingTranscript { .. }));
    }

    #[test]
    fn short_clip_retries_then_hard_errors_at_cap() {
        let c = manual_cfg();
        let mut state = loaded_state(1);

        // Attempts 1 and 2: short clip, bounded auto-retry.
        for attempt in 1..=2u32 {
            let (s, id) = drive_to_recording(state);
            let (s, effects) = reduce(
                &s,
                Event::CaptureStopped {
                    id,
                    clip: clip(300, 500),
                    reason: StopReason::Silence,
                },
                &c,
            );
            assert_eq!(s.retries.get(&0), Some(&attempt));
            assert!(matches!(s.phase, Phase::QuestionReady { index: 0 }));
            assert_eq!(s.banner.as_ref().map(|b| b.severity), Some(Severity::Warning));
            assert!(effects.iter().any(|e| matches!(e, Effect::Cleanup { .. })));
            state = s;
        }

        // Attempt 3: cap reached, hard error, no more auto-retry.
        let (s, id) = drive_to_recording(state);
        let (s, effects) = reduce(
            &s,
            Event::CaptureStopped {
                id,
                clip: clip(300, 500),
                reason: StopReason::Silence,
            },
            &c,
        );
        assert!(matches!(s.phase, Phase::QuestionReady { index: 0 }));
        assert_eq!(s.banner.as_ref().map(|b| b.severity), Some(Severity::Error));
        assert!(!effects.iter().any(|e| matches!(e, Effect::Speak { .. })));
    }

    #[test]
    fn short_clip_retry_replays_question_when_auto_play() {
        let auto = cfg();
        let (state, _) = reduce(
            &InterviewState::default(),
            Event::SessionLoaded {
                session_id: "s-1".to_string(),
                questions: vec!["Q1".to_string()],
            },
            &auto,
        );
        let id = current_attempt(&state.phase).expect("attempt id");
        let (state, _) = reduce(&state, Event::PlaybackFinished { id }, &auto);
        let (state, _) = reduce(&state, Event::RecordDelayElapsed { id }, &auto);
        let (state, _) = reduce(
            &state,
            Event::CaptureStarted {
                id,
                wav_path: PathBuf::from("/tmp/a.wav"),
            },
            &auto,
        );
        let (state, effects) = reduce(
            &state,
            Event::CaptureStopped {
                id,
                clip: clip(300, 500),
                reason: StopReason::Silence,
            },
            &auto,
        );
        assert!(matches!(state.phase, Phase::PlayingQuestion { index: 0, .. }));
        assert!(effects.iter().any(|e| matches!(e, Effect::Speak { .. })));
    }

    #[test]
    fn valid_clip_resets_retry_counter() {
        let c = manual_cfg();
        let state = loaded_state(1);
        let (s, id) = drive_to_recording(state);
        let (s, _) = reduce(
            &s,
            Event::CaptureStopped {
                id,
                clip: clip(300, 500),
                reason: StopReason::Silence,
            },
            &c,
        );
        assert_eq!(s.retries.get(&0), Some(&1));

        let (s, id) = drive_to_recording(s);
        let (s, _) = reduce(
            &s,
            Event::CaptureStopped {
                id,
                clip: clip(2000, 64_000),
                reason: StopReason::Silence,
            },
            &c,
        );
        assert!(s.retries.get(&0).is_none());
    }

    #[test]
    fn transcript_ready_awaits_decision() {
        let (state, id) = drive_to_recording(loaded_state(1));
        let (state, _) = reduce(
            &state,
            Event::CaptureStopped {
                id,
                clip: clip(2000, 64_000),
                reason: StopReason::Manual,
            },
            &manual_cfg(),
        );
        let (state, _) = reduce(
            &state,
            Event::TranscriptReady {
                id,
                text: "Hello world".to_string(),
                transcript_id: Some("t-1".to_string()),
            },
            &manual_cfg(),
        );
        match &state.phase {
            Phase::AwaitingDecision {
                transcript,
                transcript_id,
                ..
            } => {
                assert_eq!(transcript, "Hello world");
                assert_eq!(transcript_id.as_deref(), Some("t-1"));
            }
            p => panic!("unexpected phase {:?}", p),
        }
    }

    #[test]
    fn empty_transcript_offers_redo_with_warning() {
        let (state, id) = drive_to_recording(loaded_state(1));
        let (state, _) = reduce(
            &state,
            Event::CaptureStopped {
                id,
                clip: clip(2000, 64_000),
                reason: StopReason::Manual,
            },
            &manual_cfg(),
        );
        let (state, _) = reduce(&state, Event::TranscriptEmpty { id }, &manual_cfg());
        assert!(matches!(state.phase, Phase::QuestionReady { index: 0 }));
        assert_eq!(
            state.banner.as_ref().map(|b| b.severity),
            Some(Severity::Warning)
        );
    }

    #[test]
    fn transcription_failure_returns_to_ready_with_error() {
        let (state, id) = drive_to_recording(loaded_state(1));
        let (state, _) = reduce(
            &state,
            Event::CaptureStopped {
                id,
                clip: clip(2000, 64_000),
                reason: StopReason::Manual,
            },
            &manual_cfg(),
        );
        let (state, _) = reduce(
            &state,
            Event::TranscribeFailed {
                id,
                err: "timeout".to_string(),
            },
            &manual_cfg(),
        );
        assert!(matches!(state.phase, Phase::QuestionReady { index: 0 }));
        assert_eq!(
            state.banner.as_ref().map(|b| b.severity),
            Some(Severity::Error)
        );
    }

    fn drive_to_decision(state: InterviewState) -> InterviewState {
        let (state, id) = drive_to_recording(state);
        let (state, _) = reduce(
            &state,
            Event::CaptureStopped {
                id,
                clip: clip(2000, 64_000),
                reason: StopReason::Manual,
            },
            &manual_cfg(),
        );
        let (state, _) = reduce(
            &state,
            Event::TranscriptReady {
                id,
                text: "An answer".to_string(),
                transcript_id: Some("t-9".to_string()),
            },
            &manual_cfg(),
        );
        state
    }

    #[test]
    fn submit_persists_then_advances() {
        let state = drive_to_decision(loaded_state(2));
        let (state, effects) = reduce(&state, Event::Submit, &manual_cfg());
        let id = match state.phase {
            Phase::Submitting { attempt_id, .. } => attempt_id,
            ref p => panic!("unexpected phase {:?}", p),
        };
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::SubmitAnswer { transcript_id: Some(t), question_index: 0, .. } if t == "t-9"
        )));

        let (state, _) = reduce(
            &state,
            Event::SubmitOk {
                id,
                next_index: Some(1),
            },
            &manual_cfg(),
        );
        assert!(matches!(state.phase, Phase::QuestionReady { index: 1 }));
    }

    #[test]
    fn submit_failure_restores_pending_answer() {
        let state = drive_to_decision(loaded_state(2));
        let (state, _) = reduce(&state, Event::Submit, &manual_cfg());
        let id = current_attempt(&state.phase).expect("attempt id");
        let (state, _) = reduce(
            &state,
            Event::SubmitFailed {
                id,
                err: "connection reset".to_string(),
            },
            &manual_cfg(),
        );
        match &state.phase {
            Phase::AwaitingDecision {
                transcript,
                transcript_id,
                ..
            } => {
                assert_eq!(transcript, "An answer");
                assert_eq!(transcript_id.as_deref(), Some("t-9"));
            }
            p => panic!("unexpected phase {:?}", p),
        }
        assert_eq!(
            state.banner.as_ref().map(|b| b.severity),
            Some(Severity::Error)
        );
    }

    #[test]
    fn redo_discards_transcript_without_network() {
        let state = drive_to_decision(loaded_state(2));
        let (state, effects) = reduce(&state, Event::Redo, &manual_cfg());
        assert!(matches!(state.phase, Phase::QuestionReady { index: 0 }));
        assert!(!effects
            .iter()
            .any(|e| matches!(e, Effect::SubmitAnswer { .. })));
        assert!(effects.iter().any(|e| matches!(e, Effect::Cleanup { .. })));
    }

    #[test]
    fn skip_while_recording_stops_without_upload() {
        let (state, id) = drive_to_recording(loaded_state(2));
        let (state, effects) = reduce(&state, Event::Skip, &manual_cfg());
        assert!(matches!(state.phase, Phase::Skipping { index: 0, .. }));
        assert!(effects.iter().any(
            |e| matches!(e, Effect::StopCapture { reason: StopReason::Skip, .. })
        ));
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::SubmitAnswer { transcript_id: None, question_index: 0, .. }
        )));
        assert!(!effects.iter().any(|e| matches!(e, Effect::Transcribe { .. })));

        // The late capture-stop for the abandoned attempt is stale-dropped.
        let (state, effects) = reduce(
            &state,
            Event::CaptureStopped {
                id,
                clip: clip(2000, 64_000),
                reason: StopReason::Skip,
            },
            &manual_cfg(),
        );
        assert!(matches!(state.phase, Phase::Skipping { .. }));
        assert!(effects.is_empty());

        let skip_id = current_attempt(&state.phase).expect("attempt id");
        let (state, _) = reduce(
            &state,
            Event::SubmitOk {
                id: skip_id,
                next_index: Some(1),
            },
            &manual_cfg(),
        );
        assert!(matches!(state.phase, Phase::QuestionReady { index: 1 }));
    }

    #[test]
    fn skip_from_question_ready_submits_empty_marker() {
        let state = loaded_state(3);
        let (state, effects) = reduce(&state, Event::Skip, &manual_cfg());
        assert!(matches!(state.phase, Phase::Skipping { index: 0, .. }));
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::SubmitAnswer { transcript_id: None, .. }
        )));
    }

    #[test]
    fn last_question_completes_and_fetches_results() {
        let state = drive_to_decision(loaded_state(1));
        let (state, _) = reduce(&state, Event::Submit, &manual_cfg());
        let id = current_attempt(&state.phase).expect("attempt id");
        let (state, effects) = reduce(
            &state,
            Event::SubmitOk {
                id,
                next_index: Some(1),
            },
            &manual_cfg(),
        );
        assert!(state.is_completed());
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::FetchResults { .. })));
    }

    #[test]
    fn results_failure_leaves_completed_untouched() {
        let state = drive_to_decision(loaded_state(1));
        let (state, _) = reduce(&state, Event::Submit, &manual_cfg());
        let id = current_attempt(&state.phase).expect("attempt id");
        let (state, _) = reduce(
            &state,
            Event::SubmitOk { id, next_index: None },
            &manual_cfg(),
        );
        let before_banner = state.banner.clone().map(|b| b.message);
        let (state, effects) = reduce(
            &state,
            Event::ResultsFailed {
                id,
                err: "boom".to_string(),
            },
            &manual_cfg(),
        );
        assert!(state.is_completed());
        assert_eq!(state.banner.map(|b| b.message), before_banner);
        assert!(effects.is_empty());
    }

    #[test]
    fn results_ready_attaches_scores() {
        let state = drive_to_decision(loaded_state(1));
        let (state, _) = reduce(&state, Event::Submit, &manual_cfg());
        let id = current_attempt(&state.phase).expect("attempt id");
        let (state, _) = reduce(
            &state,
            Event::SubmitOk { id, next_index: None },
            &manual_cfg(),
        );
        let (state, _) = reduce(
            &state,
            Event::ResultsReady {
                id,
                results: InterviewResultsView {
                    average_score: Some(8.0),
                    summary: Some("good".to_string()),
                },
            },
            &manual_cfg(),
        );
        match state.phase {
            Phase::Completed { results: Some(r) } => assert_eq!(r.average_score, Some(8.0)),
            p => panic!("unexpected phase {:?}", p),
        }
    }

    #[test]
    fn teardown_stops_playback_and_capture() {
        let (state, id) = drive_to_recording(loaded_state(1));
        let (_, effects) = reduce(&state, Event::Teardown, &manual_cfg());
        assert!(effects.iter().any(|e| matches!(e, Effect::StopPlayback)));
        assert!(effects.iter().any(
            |e| matches!(e, Effect::StopCapture { id: sid, .. } if *sid == id)
        ));
    }

    #[test]
    fn question_index_never_decreases() {
        // Walk a 3-question session front to back; indices are 0,1,2.
        let c = manual_cfg();
        let mut state = loaded_state(3);
        for expected in 0..3usize {
            match state.phase {
                Phase::QuestionReady { index } => assert_eq!(index, expected),
                ref p => panic!("unexpected phase {:?}", p),
            }
            state = drive_to_decision(state);
            let (s, _) = reduce(&state, Event::Submit, &c);
            let id = current_attempt(&s.phase).expect("attempt id");
            let (s, _) = reduce(&s, Event::SubmitOk { id, next_index: None }, &c);
            state = s;
        }
        assert!(state.is_completed());
    }
}
