//! hirevox: native voice client for AI-assisted interview sessions.
//!
//! The library is the interview-recording core: a sequencer state machine
//! (`state_machine`) driven by a single-writer event loop, with playback,
//! capture, transcription, and session effects executed by an
//! [`effects::EffectRunner`]. Hosts subscribe to state changes through the
//! `on_ui` callback of [`run_state_loop`] and render [`UiSnapshot`]s.

pub mod audio;
pub mod effects;
pub mod metrics;
pub mod playback;
pub mod session;
pub mod settings;
pub mod state_machine;
pub mod synthesis;
pub mod transcription;

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use effects::EffectRunner;
use state_machine::{
    reduce, Effect, Event, InterviewState, Phase, SequencerConfig, Severity,
};

/// UI state projection. Tagged union format:
/// `{ "status": "recording", "elapsedSecs": 5 }` etc.
#[derive(Clone, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum UiState {
    Setup,
    QuestionReady {
        #[serde(rename = "questionIndex")]
        question_index: usize,
        #[serde(rename = "totalQuestions")]
        total_questions: usize,
        question: String,
    },
    PlayingQuestion {
        #[serde(rename = "questionIndex")]
        question_index: usize,
        question: String,
    },
    WaitingToRecord,
    Recording {
        #[serde(rename = "elapsedSecs")]
        elapsed_secs: u64,
    },
    Processing,
    AwaitingDecision {
        transcript: String,
    },
    Submitting,
    Skipping,
    Completed {
        #[serde(rename = "averageScore")]
        average_score: Option<f64>,
        summary: Option<String>,
    },
}

#[derive(Clone, Serialize)]
pub struct BannerView {
    pub message: String,
    pub severity: &'static str,
}

/// Everything a host needs to render one frame of the interview UI.
#[derive(Clone, Serialize)]
pub struct UiSnapshot {
    pub state: UiState,
    pub banner: Option<BannerView>,
}

/// Project the authoritative state into the UI snapshot.
pub fn snapshot(state: &InterviewState) -> UiSnapshot {
    let question = |index: usize| {
        state
            .questions
            .get(index)
            .map(|q| q.text.clone())
            .unwrap_or_default()
    };

    let ui = match &state.phase {
        Phase::Setup => UiState::Setup,
        Phase::QuestionReady { index } => UiState::QuestionReady {
            question_index: *index,
            total_questions: state.questions.len(),
            question: question(*index),
        },
        Phase::PlayingQuestion { index, .. } => UiState::PlayingQuestion {
            question_index: *index,
            question: question(*index),
        },
        Phase::AwaitingRecording { .. } => UiState::WaitingToRecord,
        Phase::Recording { started_at, .. } => UiState::Recording {
            elapsed_secs: started_at.elapsed().as_secs(),
        },
        Phase::ProcessingTranscript { .. } => UiState::Processing,
        Phase::AwaitingDecision { transcript, .. } => UiState::AwaitingDecision {
            transcript: transcript.clone(),
        },
        Phase::Submitting { .. } => UiState::Submitting,
        Phase::Skipping { .. } => UiState::Skipping,
        Phase::Completed { results } => UiState::Completed {
            average_score: results.as_ref().and_then(|r| r.average_score),
            summary: results.as_ref().and_then(|r| r.summary.clone()),
        },
    };

    let banner = state.banner.as_ref().map(|b| BannerView {
        message: b.message.clone(),
        severity: match b.severity {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        },
    });

    UiSnapshot { state: ui, banner }
}

/// Handle for dispatching events into the state loop.
pub struct SequencerHandle {
    tx: mpsc::Sender<Event>,
}

impl SequencerHandle {
    pub fn new(tx: mpsc::Sender<Event>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, event: Event) -> Result<(), mpsc::error::SendError<Event>> {
        self.tx.send(event).await
    }
}

/// Run the main state loop until Teardown (or the channel closes).
///
/// Effects returned by the reducer are handed to the runner; `EmitUi` is
/// handled here by invoking `on_ui` with the fresh state. Returns the final
/// state, which is what integration tests assert against.
pub async fn run_state_loop<F>(
    mut rx: mpsc::Receiver<Event>,
    tx: mpsc::Sender<Event>,
    effect_runner: Arc<dyn EffectRunner>,
    cfg: SequencerConfig,
    on_ui: F,
) -> InterviewState
where
    F: Fn(&InterviewState) + Send + 'static,
{
    let mut state = InterviewState::default();

    on_ui(&state);
    log::info!("State loop started");

    while let Some(event) = rx.recv().await {
        log::debug!("Received event: {:?}", event);

        let is_teardown = matches!(event, Event::Teardown);

        let old_discriminant = std::mem::discriminant(&state.phase);
        let (next, effects) = reduce(&state, event, &cfg);
        let new_discriminant = std::mem::discriminant(&next.phase);

        if old_discriminant != new_discriminant {
            log::info!("State transition: {:?} -> {:?}", state.phase, next.phase);
        }

        state = next;

        for eff in effects {
            match eff {
                Effect::EmitUi => on_ui(&state),
                other => effect_runner.spawn(other, tx.clone()),
            }
        }

        if is_teardown {
            log::info!("Teardown requested, shutting down state loop");
            break;
        }
    }

    log::info!("State loop ended");
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use state_machine::Banner;

    #[test]
    fn snapshot_serializes_with_status_tag() {
        let state = InterviewState::default();
        let snap = snapshot(&state);
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["state"]["status"], "setup");
        assert!(json["banner"].is_null());
    }

    #[test]
    fn snapshot_carries_banner_severity() {
        let mut state = InterviewState::default();
        state.banner = Some(Banner::error("mic denied"));
        let snap = snapshot(&state);
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["banner"]["severity"], "error");
        assert_eq!(json["banner"]["message"], "mic denied");
    }

    #[test]
    fn completed_snapshot_includes_scores() {
        let mut state = InterviewState::default();
        state.phase = Phase::Completed {
            results: Some(state_machine::InterviewResultsView {
                average_score: Some(7.2),
                summary: Some("decent".to_string()),
            }),
        };
        let json = serde_json::to_value(&snapshot(&state)).unwrap();
        assert_eq!(json["state"]["status"], "completed");
        assert_eq!(json["state"]["averageScore"], 7.2);
    }
}
