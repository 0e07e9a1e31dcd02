//! End-to-end sequencer scenarios driven through the state loop with a
//! scripted effect runner. The fake stands in for playback, capture,
//! transcription, and session effects, so these tests exercise the full
//! event choreography without a microphone or a server.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use hirevox::audio::{Clip, StopReason};
use hirevox::effects::EffectRunner;
use hirevox::run_state_loop;
use hirevox::state_machine::{
    Effect, Event, InterviewState, InterviewResultsView, Phase, SequencerConfig, Severity,
};

/// Scripted effect runner: answers each effect from queues, recording what
/// the sequencer asked for along the way.
struct ScriptedRunner {
    questions: Vec<String>,
    /// (duration_ms, size_bytes) per capture stop; defaults to a valid clip.
    clips: Mutex<VecDeque<(u64, u64)>>,
    /// Transcript text per transcription; empty string means no speech.
    transcripts: Mutex<VecDeque<String>>,
    /// When set, the "meter" fires this auto-stop shortly after capture starts.
    auto_stop: Option<StopReason>,
    fail_results: bool,

    speaks: AtomicUsize,
    transcribe_calls: AtomicUsize,
    submitted_transcripts: Mutex<Vec<Option<String>>>,
    stop_reasons: Mutex<Vec<StopReason>>,
}

impl ScriptedRunner {
    fn new(questions: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            questions: questions.iter().map(|q| q.to_string()).collect(),
            clips: Mutex::new(VecDeque::new()),
            transcripts: Mutex::new(VecDeque::new()),
            auto_stop: None,
            fail_results: false,
            speaks: AtomicUsize::new(0),
            transcribe_calls: AtomicUsize::new(0),
            submitted_transcripts: Mutex::new(Vec::new()),
            stop_reasons: Mutex::new(Vec::new()),
        })
    }

    fn with_auto_stop(mut self: Arc<Self>, reason: StopReason) -> Arc<Self> {
        Arc::get_mut(&mut self).unwrap().auto_stop = Some(reason);
        self
    }

    fn with_failing_results(mut self: Arc<Self>) -> Arc<Self> {
        Arc::get_mut(&mut self).unwrap().fail_results = true;
        self
    }

    fn script_clips(self: &Arc<Self>, clips: &[(u64, u64)]) {
        self.clips.lock().unwrap().extend(clips.iter().copied());
    }

    fn script_transcripts(self: &Arc<Self>, texts: &[&str]) {
        self.transcripts
            .lock()
            .unwrap()
            .extend(texts.iter().map(|t| t.to_string()));
    }
}

impl EffectRunner for ScriptedRunner {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>) {
        match effect {
            Effect::LoadSession => {
                let questions = self.questions.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    let _ = tx
                        .send(Event::SessionLoaded {
                            session_id: "scripted-session".to_string(),
                            questions,
                        })
                        .await;
                });
            }

            Effect::Speak { id, .. } => {
                self.speaks.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    let _ = tx.send(Event::PlaybackFinished { id }).await;
                });
            }

            Effect::StartRecordDelay { id, delay } => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Event::RecordDelayElapsed { id }).await;
                });
            }

            Effect::StartCapture { id } => {
                let auto_stop = self.auto_stop;
                tokio::spawn(async move {
                    let _ = tx
                        .send(Event::CaptureStarted {
                            id,
                            wav_path: PathBuf::from(format!("/tmp/scripted_{}.wav", id)),
                        })
                        .await;
                    if let Some(reason) = auto_stop {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        let _ = tx.send(Event::AutoStopped { id, reason }).await;
                    }
                });
            }

            Effect::StopCapture { id, reason } => {
                self.stop_reasons.lock().unwrap().push(reason);
                let (duration_ms, size_bytes) = self
                    .clips
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or((2000, 64_000));
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    let clip = Clip::new(
                        PathBuf::from(format!("/tmp/scripted_{}.wav", id)),
                        duration_ms,
                        size_bytes,
                    );
                    let _ = tx.send(Event::CaptureStopped { id, clip, reason }).await;
                });
            }

            Effect::Transcribe { id, .. } => {
                let n = self.transcribe_calls.fetch_add(1, Ordering::SeqCst);
                let text = self
                    .transcripts
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_else(|| "Hello world".to_string());
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    let event = if text.trim().is_empty() {
                        Event::TranscriptEmpty { id }
                    } else {
                        Event::TranscriptReady {
                            id,
                            text,
                            transcript_id: Some(format!("t-{}", n + 1)),
                        }
                    };
                    let _ = tx.send(event).await;
                });
            }

            Effect::SubmitAnswer {
                id,
                question_index,
                transcript_id,
                ..
            } => {
                self.submitted_transcripts
                    .lock()
                    .unwrap()
                    .push(transcript_id);
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    let _ = tx
                        .send(Event::SubmitOk {
                            id,
                            next_index: Some(question_index + 1),
                        })
                        .await;
                });
            }

            Effect::FetchResults { id, .. } => {
                let fail = self.fail_results;
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    let event = if fail {
                        Event::ResultsFailed {
                            id,
                            err: "results backend down".to_string(),
                        }
                    } else {
                        Event::ResultsReady {
                            id,
                            results: InterviewResultsView {
                                average_score: Some(8.5),
                                summary: Some("strong answers".to_string()),
                            },
                        }
                    };
                    let _ = tx.send(event).await;
                });
            }

            Effect::StopPlayback | Effect::Cleanup { .. } => {}

            Effect::EmitUi => unreachable!("EmitUi is handled by the state loop"),
        }
    }
}

struct Harness {
    tx: mpsc::Sender<Event>,
    states: Arc<Mutex<Vec<InterviewState>>>,
    task: tokio::task::JoinHandle<InterviewState>,
}

fn fast_cfg() -> SequencerConfig {
    let mut cfg = SequencerConfig::default();
    cfg.record_delay = Duration::from_millis(1);
    cfg
}

fn spawn_harness(runner: Arc<ScriptedRunner>, cfg: SequencerConfig) -> Harness {
    let (tx, rx) = mpsc::channel::<Event>(64);
    let states: Arc<Mutex<Vec<InterviewState>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = states.clone();
    let runner: Arc<dyn EffectRunner> = runner;
    let task = tokio::spawn(run_state_loop(rx, tx.clone(), runner, cfg, move |state| {
        sink.lock().unwrap().push(state.clone());
    }));
    Harness { tx, states, task }
}

impl Harness {
    async fn start(&self) {
        self.tx.send(Event::Initialize).await.unwrap();
    }

    async fn send(&self, event: Event) {
        self.tx.send(event).await.unwrap();
    }

    /// Wait until some emitted state matches the predicate.
    async fn wait_for(
        &self,
        what: &str,
        pred: impl Fn(&InterviewState) -> bool,
    ) -> InterviewState {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            {
                let states = self.states.lock().unwrap();
                if let Some(state) = states.iter().rev().find(|s| pred(s)) {
                    return (*state).clone();
                }
            }
            if Instant::now() > deadline {
                panic!("timed out waiting for {}", what);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn latest(&self) -> InterviewState {
        self.states
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no states emitted")
    }

    async fn finish(self) -> InterviewState {
        let _ = self.tx.send(Event::Teardown).await;
        self.task.await.unwrap()
    }
}

/// Scenario A: speak, auto-stop on silence, transcribe, submit, advance.
#[tokio::test]
async fn full_answer_cycle_advances_to_next_question() {
    let runner =
        ScriptedRunner::new(&["Q1", "Q2", "Q3"]).with_auto_stop(StopReason::Silence);
    let h = spawn_harness(runner.clone(), fast_cfg());
    h.start().await;

    let state = h
        .wait_for("transcript review", |s| {
            matches!(s.phase, Phase::AwaitingDecision { .. })
        })
        .await;
    match &state.phase {
        Phase::AwaitingDecision { transcript, .. } => assert_eq!(transcript, "Hello world"),
        p => panic!("unexpected phase {:?}", p),
    }
    assert!(runner
        .stop_reasons
        .lock()
        .unwrap()
        .contains(&StopReason::Silence));

    h.send(Event::Submit).await;
    h.wait_for("question 2 playing", |s| {
        matches!(s.phase, Phase::PlayingQuestion { index: 1, .. })
    })
    .await;

    assert_eq!(
        runner.submitted_transcripts.lock().unwrap().as_slice(),
        &[Some("t-1".to_string())]
    );
    h.finish().await;
}

/// Scenario B: three short recordings exhaust the auto-retry budget and end
/// in a hard error with no transcription attempts.
#[tokio::test]
async fn short_recordings_retry_then_hard_error() {
    let runner = ScriptedRunner::new(&["Q1"]).with_auto_stop(StopReason::Silence);
    runner.script_clips(&[(300, 500), (300, 500), (300, 500)]);
    let h = spawn_harness(runner.clone(), fast_cfg());
    h.start().await;

    let state = h
        .wait_for("hard too-short error", |s| {
            matches!(s.phase, Phase::QuestionReady { index: 0 })
                && s.banner.as_ref().map(|b| b.severity) == Some(Severity::Error)
        })
        .await;

    assert_eq!(state.retries.get(&0), Some(&3));
    assert_eq!(runner.transcribe_calls.load(Ordering::SeqCst), 0);
    // Initial attempt plus two auto-retries, then no more replays.
    assert_eq!(runner.speaks.load(Ordering::SeqCst), 3);
    h.finish().await;
}

/// Scenario C: skip while recording stops immediately, uploads nothing, and
/// submits the empty skip marker.
#[tokio::test]
async fn skip_while_recording_submits_empty_marker() {
    let runner = ScriptedRunner::new(&["Q1", "Q2"]);
    let h = spawn_harness(runner.clone(), fast_cfg());
    h.start().await;

    h.wait_for("recording", |s| s.is_recording()).await;
    h.send(Event::Skip).await;

    h.wait_for("question 2 playing", |s| {
        matches!(s.phase, Phase::PlayingQuestion { index: 1, .. })
    })
    .await;

    assert_eq!(runner.transcribe_calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        runner.submitted_transcripts.lock().unwrap().as_slice(),
        &[None]
    );
    assert!(runner
        .stop_reasons
        .lock()
        .unwrap()
        .contains(&StopReason::Skip));
    h.finish().await;
}

/// Scenario D: the final submit completes the interview; a failing results
/// fetch is invisible to the candidate.
#[tokio::test]
async fn results_fetch_failure_does_not_disturb_completion() {
    let runner = ScriptedRunner::new(&["Only question"])
        .with_auto_stop(StopReason::Silence)
        .with_failing_results();
    let h = spawn_harness(runner.clone(), fast_cfg());
    h.start().await;

    h.wait_for("transcript review", |s| {
        matches!(s.phase, Phase::AwaitingDecision { .. })
    })
    .await;
    h.send(Event::Submit).await;

    h.wait_for("completed", |s| s.is_completed()).await;
    // Give the ResultsFailed event time to arrive and be ignored.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let state = h.latest().await;
    assert!(state.is_completed());
    assert!(state.banner.is_none());

    let final_state = h.finish().await;
    assert!(final_state.is_completed());
}

/// An empty transcript is a soft failure: back to the question with a
/// warning, ready for a manual retry.
#[tokio::test]
async fn empty_transcript_returns_to_question_with_warning() {
    let runner = ScriptedRunner::new(&["Q1"]).with_auto_stop(StopReason::Silence);
    runner.script_transcripts(&[""]);
    let h = spawn_harness(runner.clone(), fast_cfg());
    h.start().await;

    let state = h
        .wait_for("no-speech warning", |s| {
            matches!(s.phase, Phase::QuestionReady { index: 0 })
                && s.banner.as_ref().map(|b| b.severity) == Some(Severity::Warning)
        })
        .await;

    assert_eq!(runner.transcribe_calls.load(Ordering::SeqCst), 1);
    assert!(state.banner.unwrap().message.contains("hear"));
    h.finish().await;
}

/// Noise auto-stop flows through the same stop plumbing as silence.
#[tokio::test]
async fn noise_auto_stop_reaches_transcription() {
    let runner = ScriptedRunner::new(&["Q1"]).with_auto_stop(StopReason::Noise);
    let h = spawn_harness(runner.clone(), fast_cfg());
    h.start().await;

    h.wait_for("transcript review", |s| {
        matches!(s.phase, Phase::AwaitingDecision { .. })
    })
    .await;

    assert!(runner
        .stop_reasons
        .lock()
        .unwrap()
        .contains(&StopReason::Noise));
    h.finish().await;
}
