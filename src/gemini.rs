use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::constants;
use crate::error::AttemptError;

/// One network round-trip that turns a prompt into completion text.
///
/// The broker owns retry, caching and de-duplication; implementations only
/// make a single attempt.
#[async_trait]
pub trait CompletionTransport: Send + Sync + 'static {
    async fn complete(&self, prompt: &str) -> Result<String, AttemptError>;
}

// Structures matching Gemini's generateContent endpoint
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: &'a GenerationConfig,
}

#[derive(Serialize, Debug)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize, Debug)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_k: 40,
            top_p: 0.95,
            max_output_tokens: 2048,
        }
    }
}

#[derive(Deserialize, Debug, Default)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<RemoteErrorBody>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RemoteErrorBody {
    #[serde(default)]
    message: String,
}

/// What a response body turned out to be once decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionReply {
    Success(String),
    RemoteError(String),
    Malformed(String),
}

impl CompletionReply {
    /// Decode a raw response body. An `error` object wins over candidates;
    /// an empty or missing `candidates[0].content.parts[0].text` is malformed.
    pub fn decode(body: &str) -> Self {
        let response: GenerateResponse = match serde_json::from_str(body) {
            Ok(response) => response,
            Err(e) => return CompletionReply::Malformed(format!("invalid JSON: {}", e)),
        };

        if let Some(error) = response.error {
            return CompletionReply::RemoteError(error.message);
        }

        let text = response
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .and_then(|content| content.parts.into_iter().next())
            .and_then(|part| part.text);

        match text {
            Some(text) if !text.is_empty() => CompletionReply::Success(text),
            _ => CompletionReply::Malformed("Unexpected response format".to_string()),
        }
    }

    pub fn into_result(self) -> Result<String, AttemptError> {
        match self {
            CompletionReply::Success(text) => Ok(text),
            CompletionReply::RemoteError(message) => Err(AttemptError::Remote(message)),
            CompletionReply::Malformed(reason) => Err(AttemptError::Malformed(reason)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub request_timeout: Duration,
    pub generation: GenerationConfig,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: constants::GEMINI_API_KEY.clone(),
            model: constants::GEMINI_MODEL.clone(),
            base_url: constants::GEMINI_BASE_URL.clone(),
            request_timeout: Duration::from_secs(constants::REQUEST_TIMEOUT_SECS),
            generation: GenerationConfig::default(),
        }
    }
}

pub struct GeminiTransport {
    client: Client,
    config: GeminiConfig,
}

impl GeminiTransport {
    pub fn new(config: GeminiConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[async_trait]
impl CompletionTransport for GeminiTransport {
    #[instrument(skip(self, prompt), fields(model = %self.config.model, prompt_len = prompt.len()))]
    async fn complete(&self, prompt: &str) -> Result<String, AttemptError> {
        let payload = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: &self.config.generation,
        };

        let response = self
            .client
            .post(self.endpoint())
            .query(&[("key", self.config.api_key.as_str())])
            .json(&payload)
            .send()
            .await
            .map_err(|e| AttemptError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AttemptError::Transport(e.to_string()))?;

        debug!(%status, body_len = body.len(), "Received Gemini response");

        match CompletionReply::decode(&body) {
            // Non-2xx without an error payload still counts as a remote failure
            CompletionReply::Malformed(_) if !status.is_success() => {
                warn!(%status, "Gemini request failed without an error payload");
                Err(AttemptError::Remote(format!("HTTP {}", status)))
            }
            reply => reply.into_result(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_success() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"hi"}]}}]}"#;
        assert_eq!(CompletionReply::decode(body), CompletionReply::Success("hi".to_string()));
    }

    #[test]
    fn test_decode_remote_error_wins() {
        let body = r#"{"error":{"code":429,"message":"Resource exhausted"},"candidates":[]}"#;
        assert_eq!(
            CompletionReply::decode(body),
            CompletionReply::RemoteError("Resource exhausted".to_string())
        );
    }

    #[test]
    fn test_decode_missing_text_is_malformed() {
        for body in [
            r#"{}"#,
            r#"{"candidates":[]}"#,
            r#"{"candidates":[{"content":{"parts":[]}}]}"#,
            r#"{"candidates":[{"content":{"parts":[{"text":""}]}}]}"#,
            r#"{"candidates":[{"finishReason":"SAFETY"}]}"#,
        ] {
            assert!(
                matches!(CompletionReply::decode(body), CompletionReply::Malformed(_)),
                "expected malformed for {}",
                body
            );
        }
    }

    #[test]
    fn test_decode_non_json_is_malformed() {
        let reply = CompletionReply::decode("<html>Bad Gateway</html>");
        assert!(matches!(reply, CompletionReply::Malformed(reason) if reason.starts_with("invalid JSON")));
    }

    #[test]
    fn test_request_body_shape() {
        let generation = GenerationConfig::default();
        let payload = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: "Say hi" }],
            }],
            generation_config: &generation,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["contents"][0]["parts"][0]["text"], "Say hi");
        assert_eq!(value["generationConfig"]["topK"], 40);
        assert_eq!(value["generationConfig"]["maxOutputTokens"], 2048);
        assert!(value["generationConfig"]["temperature"].as_f64().is_some());
        assert!(value["generationConfig"]["topP"].as_f64().is_some());
    }
}
