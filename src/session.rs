//! Session gateway: start/resume interviews, submit answers, fetch results.
//!
//! Thin HTTP façade over the interview server. Submitting without a
//! transcript id is the wire-level skip marker.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::synthesis::api_error_message;

#[derive(Debug)]
pub enum SessionError {
    NetworkError(String),
    ApiError { status: u16, message: String },
    ParseError(String),
    NoQuestions,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::NetworkError(e) => write!(f, "Network error: {}", e),
            SessionError::ApiError { status, message } => {
                write!(f, "Session API error ({}): {}", status, message)
            }
            SessionError::ParseError(e) => write!(f, "Failed to parse API response: {}", e),
            SessionError::NoQuestions => write!(f, "The interview session has no questions"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Payload for `/interview/start`. Either hand the server an explicit
/// question list or let it generate `num_questions` from the role/description.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StartRequest {
    pub candidate_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_questions: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub questions: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub questions: Vec<String>,
}

/// Submit acknowledgement. The server echoes where it thinks the session is,
/// which we log to cross-check local index advancement.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitAck {
    #[serde(default)]
    pub session_status: Option<String>,
    #[serde(default)]
    pub next_question_index: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InterviewResults {
    #[serde(default)]
    pub average_score: Option<f64>,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionRecord {
    #[serde(default)]
    questions: Vec<String>,
}

pub struct SessionClient {
    http: reqwest::Client,
    base_url: String,
}

impl SessionClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn check<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, SessionError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = api_error_message(&body);
            log::error!("Session API error ({}): {}", status.as_u16(), message);
            return Err(SessionError::ApiError {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| SessionError::ParseError(e.to_string()))
    }

    /// Start a new interview session. The question list is fixed for the
    /// session's lifetime; an empty list is a hard `NoQuestions` failure.
    pub async fn start_session(&self, request: &StartRequest) -> Result<SessionInfo, SessionError> {
        let response = self
            .http
            .post(format!("{}/interview/start", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| SessionError::NetworkError(e.to_string()))?;

        let info: SessionInfo = Self::check(response).await?;
        if info.questions.is_empty() {
            return Err(SessionError::NoQuestions);
        }
        log::info!(
            "Session {} started with {} questions",
            info.session_id,
            info.questions.len()
        );
        Ok(info)
    }

    /// Fetch an existing session, e.g. to resume after a reload.
    pub async fn fetch_session(&self, session_id: &str) -> Result<SessionInfo, SessionError> {
        let response = self
            .http
            .get(format!("{}/interview/{}", self.base_url, session_id))
            .send()
            .await
            .map_err(|e| SessionError::NetworkError(e.to_string()))?;

        let record: SessionRecord = Self::check(response).await?;
        if record.questions.is_empty() {
            return Err(SessionError::NoQuestions);
        }
        Ok(SessionInfo {
            session_id: session_id.to_string(),
            questions: record.questions,
        })
    }

    /// Submit one answer. `transcript_id: None` marks the question skipped.
    pub async fn submit_answer(
        &self,
        session_id: &str,
        question_index: usize,
        transcript_id: Option<&str>,
    ) -> Result<SubmitAck, SessionError> {
        let mut form = vec![
            ("session_id", session_id.to_string()),
            ("question_index", question_index.to_string()),
        ];
        if let Some(id) = transcript_id {
            form.push(("transcript_id", id.to_string()));
        }

        let response = self
            .http
            .post(format!("{}/interview/submit", self.base_url))
            .form(&form)
            .send()
            .await
            .map_err(|e| SessionError::NetworkError(e.to_string()))?;

        let ack: SubmitAck = Self::check(response).await?;
        log::info!(
            "Submitted answer for question {} (skip={}, server next_index={:?}, status={:?})",
            question_index,
            transcript_id.is_none(),
            ack.next_question_index,
            ack.session_status
        );
        Ok(ack)
    }

    /// Fetch aggregate results. Called once at completion, best-effort.
    pub async fn fetch_results(&self, session_id: &str) -> Result<InterviewResults, SessionError> {
        let response = self
            .http
            .get(format!("{}/interview/{}/results", self.base_url, session_id))
            .send()
            .await
            .map_err(|e| SessionError::NetworkError(e.to_string()))?;

        Self::check(response).await
    }
}
