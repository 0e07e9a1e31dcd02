//! Transcription gateway.
//!
//! Uploads finalized answer clips to the interview server and returns the
//! transcript. Short clips are first screened by the local speech check so
//! obviously speechless audio never costs a network round trip. An empty
//! transcript from the service is a distinct `NoSpeech` outcome, never
//! conflated with a network failure.

use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;

use crate::audio::{vad, Clip};
use crate::settings::ClipSettings;
use crate::synthesis::api_error_message;

#[derive(Debug)]
pub enum TranscriptionError {
    FileReadError(String),
    NetworkError(String),
    ApiError { status: u16, message: String },
    ParseError(String),
}

impl std::fmt::Display for TranscriptionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranscriptionError::FileReadError(e) => write!(f, "Failed to read audio file: {}", e),
            TranscriptionError::NetworkError(e) => write!(f, "Network error: {}", e),
            TranscriptionError::ApiError { status, message } => {
                write!(f, "Transcription API error ({}): {}", status, message)
            }
            TranscriptionError::ParseError(e) => write!(f, "Failed to parse API response: {}", e),
        }
    }
}

impl std::error::Error for TranscriptionError {}

/// What came back for a clip: usable text, or a no-speech verdict (local or
/// from the service).
#[derive(Debug, Clone)]
pub enum TranscriptOutcome {
    Text {
        text: String,
        transcript_id: Option<String>,
    },
    NoSpeech {
        message: String,
    },
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    transcript: String,
    #[serde(default)]
    transcript_id: Option<String>,
}

pub struct TranscriptionGateway {
    http: reqwest::Client,
    base_url: String,
    policy: ClipSettings,
}

impl TranscriptionGateway {
    pub fn new(base_url: &str, policy: ClipSettings, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            policy,
        }
    }

    /// Transcribe a validated clip, tagging the upload with its session and
    /// question so the server stores the transcript against the answer.
    pub async fn transcribe(
        &self,
        clip: &Clip,
        session_id: &str,
        question_index: usize,
    ) -> Result<TranscriptOutcome, TranscriptionError> {
        if let Some(no_speech) = self.short_clip_gate(clip).await {
            return Ok(no_speech);
        }

        let file_bytes = tokio::fs::read(&clip.wav_path)
            .await
            .map_err(|e| TranscriptionError::FileReadError(e.to_string()))?;

        let filename = clip
            .wav_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("answer.wav")
            .to_string();

        log::info!(
            "Transcribing {} ({} bytes, {}ms) for question {}",
            filename,
            file_bytes.len(),
            clip.duration_ms,
            question_index
        );

        let file_part = Part::bytes(file_bytes)
            .file_name(filename)
            .mime_str(clip.mime_type)
            .map_err(|e| TranscriptionError::ParseError(e.to_string()))?;

        let form = Form::new()
            .part("audio", file_part)
            .text("session_id", session_id.to_string())
            .text("question_index", question_index.to_string());

        let response = self
            .http
            .post(format!("{}/transcribe", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| TranscriptionError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = api_error_message(&body);
            log::error!("Transcription API error ({}): {}", status.as_u16(), message);
            return Err(TranscriptionError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: TranscribeResponse = response
            .json()
            .await
            .map_err(|e| TranscriptionError::ParseError(e.to_string()))?;

        let trimmed = parsed.transcript.trim();
        if trimmed.is_empty() {
            log::info!("Transcription returned no text for question {}", question_index);
            return Ok(TranscriptOutcome::NoSpeech {
                message: "The transcription service heard no speech in the recording".to_string(),
            });
        }

        log::info!(
            "Transcription successful: {} chars (transcript_id={:?})",
            trimmed.len(),
            parsed.transcript_id
        );

        Ok(TranscriptOutcome::Text {
            text: parsed.transcript.trim().to_string(),
            transcript_id: parsed.transcript_id,
        })
    }

    /// Local speech screen for short clips. Analysis errors are inconclusive
    /// and let the upload proceed; a wasted upload beats dropping a real
    /// answer on a local analysis bug.
    async fn short_clip_gate(&self, clip: &Clip) -> Option<TranscriptOutcome> {
        if !self.policy.short_clip_vad_enabled || clip.duration_ms >= self.policy.vad_check_max_ms {
            return None;
        }

        let path = clip.wav_path.clone();
        let ignore_start_ms = self.policy.vad_ignore_start_ms;
        let stats = tokio::task::spawn_blocking(move || vad::speech_stats(&path, ignore_start_ms))
            .await;

        match stats {
            Ok(Ok(stats)) => {
                let verdict = vad::judge(&stats);
                log::debug!(
                    "Short-clip gate: speech_frames={}/{}, crest={:.1}, sounds_like_speech={}",
                    verdict.speech_frames,
                    verdict.total_frames,
                    verdict.crest_factor,
                    verdict.sounds_like_speech
                );
                if !verdict.sounds_like_speech {
                    return Some(TranscriptOutcome::NoSpeech {
                        message: format!(
                            "Short clip ({}ms) contains no detectable speech ({}/{} frames)",
                            clip.duration_ms, verdict.speech_frames, verdict.total_frames
                        ),
                    });
                }
                None
            }
            Ok(Err(e)) => {
                log::warn!("Short-clip speech check failed ({}), uploading anyway", e);
                None
            }
            Err(e) => {
                log::warn!("Short-clip speech check task failed ({}), uploading anyway", e);
                None
            }
        }
    }
}
