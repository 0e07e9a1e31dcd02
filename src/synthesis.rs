//! Speech-synthesis client.
//!
//! Fetches question audio from the interview server's `/synthesize`
//! endpoint as WAV bytes. The playback controller owns what happens next.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug)]
pub enum SynthesisError {
    NetworkError(String),
    ApiError { status: u16, message: String },
    EmptyAudio,
}

impl std::fmt::Display for SynthesisError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SynthesisError::NetworkError(e) => write!(f, "Network error: {}", e),
            SynthesisError::ApiError { status, message } => {
                write!(f, "Synthesis API error ({}): {}", status, message)
            }
            SynthesisError::EmptyAudio => write!(f, "Synthesis produced no audio"),
        }
    }
}

impl std::error::Error for SynthesisError {}

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    voice: &'a str,
}

/// FastAPI error body: `{ "detail": "..." }`.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    detail: String,
}

pub(crate) fn api_error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorResponse>(body) {
        Ok(e) => e.detail,
        Err(_) => body.to_string(),
    }
}

pub struct SynthesisClient {
    http: reqwest::Client,
    base_url: String,
    voice: String,
}

impl SynthesisClient {
    pub fn new(base_url: &str, voice: &str, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            voice: voice.to_string(),
        }
    }

    /// Synthesize `text` to WAV bytes. Header-only responses (44 bytes or
    /// fewer) count as failures, matching the server's own sanity check.
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SynthesisError> {
        let request = SynthesizeRequest {
            text,
            voice: &self.voice,
        };

        let response = self
            .http
            .post(format!("{}/synthesize", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| SynthesisError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = api_error_message(&body);
            log::error!("Synthesis API error ({}): {}", status.as_u16(), message);
            return Err(SynthesisError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SynthesisError::NetworkError(e.to_string()))?;

        if bytes.len() <= 44 {
            return Err(SynthesisError::EmptyAudio);
        }

        log::info!("Synthesized {} bytes for {} chars of text", bytes.len(), text.len());
        Ok(bytes.to_vec())
    }
}
