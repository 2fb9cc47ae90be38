//! ElevenLabs speech synthesis client
//!
//! Wraps the two endpoints voxpipe needs:
//! - `POST /v1/text-to-speech/{voice_id}/stream` returning compressed audio as a byte stream
//! - `GET /v1/voices` returning the voices available to the account
//!
//! Everything downstream only sees the [`SpeechSynthesizer`] trait, so tests and
//! other providers can stand in for the HTTP client.

use crate::config::{ApiConfig, VoiceDefaults};
use crate::{Result, TtsError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

/// Ordered compressed-audio chunks, terminated by end of stream or an error
pub type AudioStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Voice tuning parameters, each in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    pub use_speaker_boost: bool,
}

impl VoiceSettings {
    /// Build settings, clamping into `[0, 1]`; NaN or infinite values are rejected
    pub fn new(stability: f32, similarity_boost: f32, style: f32) -> Result<Self> {
        Ok(Self {
            stability: unit_interval("stability", stability)?,
            similarity_boost: unit_interval("similarity_boost", similarity_boost)?,
            style: unit_interval("style", style)?,
            use_speaker_boost: true,
        })
    }

    pub fn with_speaker_boost(mut self, enabled: bool) -> Self {
        self.use_speaker_boost = enabled;
        self
    }
}

fn unit_interval(name: &str, value: f32) -> Result<f32> {
    if !value.is_finite() {
        return Err(TtsError::InvalidArgument(format!(
            "{} must be a finite number in [0, 1]",
            name
        )));
    }
    Ok(value.clamp(0.0, 1.0))
}

/// One synthesis call
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice_id: String,
    pub model_id: String,
    pub output_format: String,
    pub voice_settings: VoiceSettings,
}

impl SynthesisRequest {
    /// Request for `text` using the configured defaults
    pub fn from_defaults(text: impl Into<String>, defaults: &VoiceDefaults) -> Result<Self> {
        let voice_settings =
            VoiceSettings::new(defaults.stability, defaults.similarity_boost, defaults.style)?
                .with_speaker_boost(defaults.use_speaker_boost);
        Ok(Self {
            text: text.into(),
            voice_id: defaults.voice_id.clone(),
            model_id: defaults.model_id.clone(),
            output_format: defaults.output_format.clone(),
            voice_settings,
        })
    }
}

/// A voice available to the account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voice {
    pub voice_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
}

/// Source of synthesized audio
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Start synthesis and return the audio as an ordered byte stream
    async fn synthesize_stream(&self, request: &SynthesisRequest) -> Result<AudioStream>;

    /// List voices available for synthesis
    async fn list_voices(&self) -> Result<Vec<Voice>>;
}

#[derive(Serialize)]
struct TtsBody<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: &'a VoiceSettings,
}

#[derive(Deserialize)]
struct VoicesResponse {
    voices: Vec<Voice>,
}

/// HTTP client for the ElevenLabs API
pub struct ElevenLabsClient {
    http_client: reqwest::Client,
    base_url: Url,
    api_key: String,
}

impl ElevenLabsClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| TtsError::Config("ELEVENLABS_API_KEY is not set".into()))?;
        // Endpoints are joined as relative paths, so the base keeps any path prefix
        let base = format!("{}/", config.base_url.trim_end_matches('/'));
        let base_url = Url::parse(&base).map_err(|e| {
            TtsError::Config(format!("invalid base URL '{}': {}", config.base_url, e))
        })?;
        // No overall timeout: a streaming body may legitimately outlive any fixed budget
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.request_timeout_ms))
            .user_agent(concat!("voxpipe/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http_client,
            base_url,
            api_key,
        })
    }

    /// URL of the streaming synthesis endpoint for a voice
    pub fn stream_url(&self, voice_id: &str, output_format: &str) -> Result<Url> {
        validate_voice_id(voice_id)?;
        let mut url = self
            .base_url
            .join(&format!("v1/text-to-speech/{}/stream", voice_id))
            .map_err(|e| TtsError::Config(format!("invalid synthesis URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("output_format", output_format);
        Ok(url)
    }

    pub fn voices_url(&self) -> Result<Url> {
        self.base_url
            .join("v1/voices")
            .map_err(|e| TtsError::Config(format!("invalid voices URL: {}", e)))
    }
}

fn validate_voice_id(voice_id: &str) -> Result<()> {
    if voice_id.is_empty()
        || !voice_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(TtsError::InvalidArgument(format!(
            "invalid voice id: {:?}",
            voice_id
        )));
    }
    Ok(())
}

/// Pull a readable message out of an ElevenLabs error body
fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let detail = &value["detail"];
        if let Some(msg) = detail["message"].as_str() {
            return msg.to_string();
        }
        if let Some(msg) = detail.as_str() {
            return msg.to_string();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "empty response body".to_string()
    } else {
        trimmed.chars().take(500).collect()
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = error_message(&body);
    warn!(target: "elevenlabs", status = status.as_u16(), error = %message, "API request failed");
    Err(TtsError::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsClient {
    async fn synthesize_stream(&self, request: &SynthesisRequest) -> Result<AudioStream> {
        let url = self.stream_url(&request.voice_id, &request.output_format)?;
        debug!(
            target: "elevenlabs",
            voice = %request.voice_id,
            model = %request.model_id,
            chars = request.text.chars().count(),
            "Requesting speech stream"
        );

        let body = TtsBody {
            text: &request.text,
            model_id: &request.model_id,
            voice_settings: &request.voice_settings,
        };
        let resp = self
            .http_client
            .post(url)
            .header("xi-api-key", &self.api_key)
            .header(reqwest::header::ACCEPT, "audio/mpeg")
            .json(&body)
            .send()
            .await?;
        let resp = check_status(resp).await?;

        let stream = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TtsError::SourceStream(e.to_string())));
        Ok(Box::pin(stream))
    }

    async fn list_voices(&self) -> Result<Vec<Voice>> {
        let resp = self
            .http_client
            .get(self.voices_url()?)
            .header("xi-api-key", &self.api_key)
            .send()
            .await?;
        let data: VoicesResponse = check_status(resp).await?.json().await?;
        debug!(target: "elevenlabs", count = data.voices.len(), "Listed voices");
        Ok(data.voices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ElevenLabsClient {
        ElevenLabsClient::new(&ApiConfig {
            api_key: Some("sk-test".into()),
            base_url: "https://api.example.test/".into(),
            request_timeout_ms: 1_000,
        })
        .unwrap()
    }

    #[test]
    fn test_stream_url() {
        let url = client().stream_url("abc123", "mp3_44100_128").unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.test/v1/text-to-speech/abc123/stream?output_format=mp3_44100_128"
        );
    }

    #[test]
    fn test_base_url_path_prefix_is_kept() {
        for base_url in ["https://proxy.example.test/elevenlabs", "https://proxy.example.test/elevenlabs/"] {
            let client = ElevenLabsClient::new(&ApiConfig {
                api_key: Some("sk-test".into()),
                base_url: base_url.into(),
                request_timeout_ms: 1_000,
            })
            .unwrap();
            assert_eq!(
                client.voices_url().unwrap().as_str(),
                "https://proxy.example.test/elevenlabs/v1/voices"
            );
            assert_eq!(
                client.stream_url("abc123", "mp3_44100_128").unwrap().as_str(),
                "https://proxy.example.test/elevenlabs/v1/text-to-speech/abc123/stream?output_format=mp3_44100_128"
            );
        }
    }

    #[test]
    fn test_stream_url_rejects_path_injection() {
        let err = client().stream_url("../admin", "mp3_44100_128").unwrap_err();
        assert!(matches!(err, TtsError::InvalidArgument(_)));
    }

    #[test]
    fn test_missing_api_key() {
        let err = ElevenLabsClient::new(&ApiConfig {
            api_key: None,
            base_url: "https://api.example.test".into(),
            request_timeout_ms: 1_000,
        })
        .err()
        .unwrap();
        assert_eq!(err.phase(), "config");
    }

    #[test]
    fn test_voice_settings_clamped() {
        let s = VoiceSettings::new(1.5, -0.2, 0.3).unwrap();
        assert_eq!(s.stability, 1.0);
        assert_eq!(s.similarity_boost, 0.0);
        assert_eq!(s.style, 0.3);
        assert!(VoiceSettings::new(f32::NAN, 0.5, 0.5).is_err());
    }

    #[test]
    fn test_request_body_shape() {
        let settings = VoiceSettings::new(0.5, 0.75, 0.0).unwrap();
        let body = TtsBody {
            text: "hi",
            model_id: "eleven_multilingual_v2",
            voice_settings: &settings,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["text"], "hi");
        assert_eq!(json["voice_settings"]["similarity_boost"], 0.75);
        assert_eq!(json["voice_settings"]["use_speaker_boost"], true);
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(r#"{"detail":{"status":"invalid_api_key","message":"Invalid API key"}}"#),
            "Invalid API key"
        );
        assert_eq!(error_message(r#"{"detail":"Not found"}"#), "Not found");
        assert_eq!(error_message("  "), "empty response body");
        assert_eq!(error_message("gateway down"), "gateway down");
    }

    #[test]
    fn test_voice_deserialization_defaults() {
        let v: Voice =
            serde_json::from_str(r#"{"voice_id":"v1","name":"Rachel","category":"premade"}"#)
                .unwrap();
        assert_eq!(v.name, "Rachel");
        assert!(v.labels.is_empty());
        assert!(v.preview_url.is_none());
    }
}
