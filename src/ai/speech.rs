//! Text-to-speech over an OpenAI-compatible `/audio/speech` endpoint.
//!
//! The LLM provider abstraction covers chat and vision but not speech, so
//! narration goes through this small reqwest client. Any server speaking the
//! same protocol (OpenAI, LocalAI, openedai-speech, a LiteLLM proxy) works.

use crate::config::PipelineConfig;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Why a speech request did not produce audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

/// Minimal client for the speech endpoint.
#[derive(Debug, Clone)]
pub struct SpeechClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    voice: String,
}

impl SpeechClient {
    /// Build a client from the pipeline config.
    ///
    /// The API key is read from `TTS_API_KEY`, falling back to `OPENAI_API_KEY`.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, String> {
        let api_key = ["TTS_API_KEY", "OPENAI_API_KEY"]
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()));
        Self::new(
            &config.tts_base_url,
            api_key,
            &config.tts_model,
            &config.tts_voice,
            Duration::from_secs(config.ai_timeout_secs),
        )
    }

    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: &str,
        voice: &str,
        timeout: Duration,
    ) -> Result<Self, String> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self {
            http,
            endpoint: format!("{}/audio/speech", base_url.trim_end_matches('/')),
            api_key,
            model: model.to_string(),
            voice: voice.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Synthesize `text` as MP3 bytes.
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SpeechError> {
        let body = SpeechRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            response_format: "mp3",
        };

        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| SpeechError {
            code: if e.is_timeout() { "timeout" } else { "http_error" }.to_string(),
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(SpeechError {
                code: status.as_u16().to_string(),
                message: if detail.is_empty() {
                    status.to_string()
                } else {
                    detail
                },
            });
        }

        let bytes = response.bytes().await.map_err(|e| SpeechError {
            code: "http_error".to_string(),
            message: e.to_string(),
        })?;
        debug!("speech: {} chars → {} bytes of audio", text.len(), bytes.len());
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_joined_without_double_slash() {
        let c = SpeechClient::new("http://localhost:8000/v1/", None, "tts-1", "alloy", Duration::from_secs(5))
            .unwrap();
        assert_eq!(c.endpoint(), "http://localhost:8000/v1/audio/speech");
    }

    #[test]
    fn request_body_asks_for_mp3() {
        let body = SpeechRequest {
            model: "tts-1",
            input: "Hallo",
            voice: "nova",
            response_format: "mp3",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["response_format"], "mp3");
        assert_eq!(json["voice"], "nova");
    }

    #[tokio::test]
    async fn unreachable_server_is_an_http_error() {
        let c = SpeechClient::new("http://127.0.0.1:9", None, "tts-1", "alloy", Duration::from_secs(2))
            .unwrap();
        let err = c.synthesize("hello").await.unwrap_err();
        assert!(err.code == "http_error" || err.code == "timeout", "got {err:?}");
    }
}
