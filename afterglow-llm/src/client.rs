//! Generation client: caption, chat and diary calls against the Afterglow
//! service, with retries, per-request timeouts and strict response parsing.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{GenerationError, Result};
use crate::types::{ChatReply, ChatRequest, ChatTurn, DiaryRequest, DiaryResponse, ImageAnalysis};

/// Default service address.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8787";

const ANALYZE_PATH: &str = "/api/analyze-image";
const CHAT_PATH: &str = "/api/chat";
const DIARY_PATH: &str = "/api/generate-diary";

/// Backend for text generation.
#[derive(Debug, Clone)]
pub enum GenerationProvider {
    /// The Afterglow HTTP service.
    Http { base_url: String },
    /// No service; every call fails and callers use local fallbacks.
    None,
}

/// Anything that can caption images, chat and write diaries.
///
/// The app depends on this trait so tests and offline builds can swap the
/// HTTP client out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Describe an image: vibe, caption and reflective questions.
    async fn analyze_image(&self, bytes: &[u8], mime: &str) -> Result<ImageAnalysis>;

    /// Continue the conversation; returns the reply text (may be empty).
    async fn chat(&self, contents: &[ChatTurn]) -> Result<String>;

    /// Write a diary entry from a transcript.
    async fn generate_diary(&self, transcript: &str, date_iso: &str) -> Result<DiaryResponse>;
}

/// HTTP client for the generation service.
pub struct GenerationClient {
    provider: GenerationProvider,
    http: Client,
    max_retries: u32,
    timeout_ms: u64,
}

impl GenerationClient {
    /// Create a new client.
    #[must_use]
    pub fn new(provider: GenerationProvider, max_retries: u32, timeout_ms: u64) -> Self {
        Self {
            provider,
            http: Client::new(),
            max_retries,
            timeout_ms,
        }
    }

    /// A client for the service at `base_url`.
    #[must_use]
    pub fn http(base_url: impl Into<String>, max_retries: u32, timeout_ms: u64) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self::new(GenerationProvider::Http { base_url }, max_retries, timeout_ms)
    }

    /// Create a client with no backend (all calls fail → local fallback).
    #[must_use]
    pub fn none() -> Self {
        Self::new(GenerationProvider::None, 0, 0)
    }

    /// Check if the client has a backend configured.
    #[must_use]
    pub fn is_available(&self) -> bool {
        !matches!(self.provider, GenerationProvider::None)
    }

    fn endpoint(&self, path: &str) -> Result<String> {
        match &self.provider {
            GenerationProvider::Http { base_url } => Ok(format!("{base_url}{path}")),
            GenerationProvider::None => Err(GenerationError::Unavailable(
                "No generation service configured".into(),
            )),
        }
    }

    /// Send a request built fresh for each attempt and parse the JSON body.
    ///
    /// Non-success statuses and transport errors are retried; a body that
    /// is not JSON is returned immediately as `ParseError`.
    async fn send_json<F>(&self, path: &str, build: F) -> Result<Value>
    where
        F: Fn(&Client, &str) -> RequestBuilder,
    {
        let url = self.endpoint(path)?;

        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                debug!(
                    path,
                    attempt = attempt + 1,
                    of = self.max_retries + 1,
                    "Retrying generation call"
                );
            }

            let start = Instant::now();
            let result = build(&self.http, &url)
                .timeout(Duration::from_millis(self.timeout_ms))
                .send()
                .await;
            let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

            match result {
                Ok(resp) if resp.status().is_success() => {
                    let json: Value = resp
                        .json()
                        .await
                        .map_err(|e| GenerationError::ParseError(e.to_string()))?;
                    debug!(path, latency_ms, "Generation call succeeded");
                    return Ok(json);
                }
                Ok(resp) => {
                    last_error = format!(
                        "HTTP {}: {}",
                        resp.status(),
                        resp.text().await.unwrap_or_default()
                    );
                    warn!(path, error = %last_error, "Generation service returned error");
                }
                Err(e) => {
                    last_error = e.to_string();
                    if e.is_timeout() {
                        warn!(path, timeout_ms = self.timeout_ms, "Generation request timed out");
                    } else {
                        warn!(path, error = %last_error, "Generation request failed");
                    }
                }
            }
        }

        Err(GenerationError::RetriesExhausted {
            attempts: self.max_retries + 1,
            last_error,
        })
    }
}

#[async_trait]
impl TextGenerator for GenerationClient {
    async fn analyze_image(&self, bytes: &[u8], mime: &str) -> Result<ImageAnalysis> {
        // Validate once up front; the form itself is rebuilt per attempt.
        Part::bytes(bytes.to_vec())
            .mime_str(mime)
            .map_err(|e| GenerationError::ConfigError(format!("bad mime {mime}: {e}")))?;

        let json = self
            .send_json(ANALYZE_PATH, |http, url| {
                let part = Part::bytes(bytes.to_vec())
                    .file_name("upload")
                    .mime_str(mime)
                    .unwrap_or_else(|_| Part::bytes(bytes.to_vec()).file_name("upload"));
                http.post(url).multipart(Form::new().part("image", part))
            })
            .await?;
        Ok(ImageAnalysis::from_json(&json))
    }

    async fn chat(&self, contents: &[ChatTurn]) -> Result<String> {
        let body = ChatRequest { contents };
        let json = self
            .send_json(CHAT_PATH, |http, url| http.post(url).json(&body))
            .await?;
        Ok(ChatReply::from_json(&json).text)
    }

    async fn generate_diary(&self, transcript: &str, date_iso: &str) -> Result<DiaryResponse> {
        let body = DiaryRequest {
            transcript_text: transcript,
            date_iso,
        };
        let json = self
            .send_json(DIARY_PATH, |http, url| http.post(url).json(&body))
            .await?;
        Ok(DiaryResponse::from_json(&json))
    }
}
