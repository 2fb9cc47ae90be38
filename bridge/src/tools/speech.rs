//! Speech tools backed by the generator and the voice cache

use super::error::{ToolError, ToolResult};
use super::traits::Tool;
use crate::protocol::{ResourceContents, ToolContent};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;
use voxpipe_audio::{GenerateOptions, SpeechGenerator};
use voxpipe_core::CachedVoices;

const AUDIO_MIME_TYPE: &str = "audio/mpeg";

fn parse_args<T: for<'de> Deserialize<'de>>(arguments: Value) -> ToolResult<T> {
    let arguments = if arguments.is_null() { json!({}) } else { arguments };
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct GenerateArgs {
    text: String,
    voice_id: Option<String>,
    model_id: Option<String>,
    output_format: Option<String>,
    #[serde(default = "default_true")]
    play_audio: bool,
    stability: Option<f32>,
    similarity_boost: Option<f32>,
    style: Option<f32>,
}

impl From<GenerateArgs> for GenerateOptions {
    fn from(args: GenerateArgs) -> Self {
        GenerateOptions {
            voice_id: args.voice_id,
            model_id: args.model_id,
            output_format: args.output_format,
            stability: args.stability,
            similarity_boost: args.similarity_boost,
            style: args.style,
            play_audio: args.play_audio,
        }
    }
}

/// Synthesize text, optionally playing it live, and return the audio
pub struct GenerateAudioTool {
    generator: Arc<SpeechGenerator>,
    counter: AtomicU64,
}

impl GenerateAudioTool {
    pub fn new(generator: Arc<SpeechGenerator>) -> Self {
        Self {
            generator,
            counter: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Tool for GenerateAudioTool {
    fn name(&self) -> String {
        "generate_audio".to_string()
    }

    fn description(&self) -> String {
        "Convert text to speech with ElevenLabs. Plays the audio while it streams \
         (unless play_audio is false) and returns the MP3 as a base64 resource."
            .to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "Text to speak" },
                "voice_id": { "type": "string", "description": "Voice to use instead of the default" },
                "model_id": { "type": "string", "description": "Model to use instead of the default" },
                "output_format": { "type": "string", "description": "Output format, e.g. mp3_44100_128" },
                "play_audio": { "type": "boolean", "default": true, "description": "Play through ffplay while streaming" },
                "stability": { "type": "number", "minimum": 0, "maximum": 1 },
                "similarity_boost": { "type": "number", "minimum": 0, "maximum": 1 },
                "style": { "type": "number", "minimum": 0, "maximum": 1 }
            },
            "required": ["text"]
        })
    }

    fn honors_timeout(&self, arguments: &Value) -> bool {
        // Playback runs for the length of the audio
        !arguments
            .get("play_audio")
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    async fn call(&self, arguments: Value) -> ToolResult<Vec<ToolContent>> {
        let args: GenerateArgs = parse_args(arguments)?;
        let text = args.text.clone();
        let options = GenerateOptions::from(args);

        let audio = self.generator.generate_audio(&text, &options).await?;

        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        info!(target: "mcp_server", bytes = audio.len(), played = options.play_audio, "generate_audio finished");

        let summary = if options.play_audio {
            format!("Generated and played {} bytes of audio for {} characters of text.", audio.len(), text.chars().count())
        } else {
            format!("Generated {} bytes of audio for {} characters of text.", audio.len(), text.chars().count())
        };

        Ok(vec![
            ToolContent::text(summary),
            ToolContent::Resource {
                resource: ResourceContents {
                    uri: format!("voxpipe://audio/{}.mp3", n),
                    mime_type: Some(AUDIO_MIME_TYPE.to_string()),
                    text: None,
                    blob: Some(STANDARD.encode(&audio)),
                },
            },
        ])
    }
}

#[derive(Debug, Deserialize)]
struct PlayArgs {
    audio_base64: String,
}

/// Play a complete MP3 buffer
pub struct PlayAudioTool {
    generator: Arc<SpeechGenerator>,
}

impl PlayAudioTool {
    pub fn new(generator: Arc<SpeechGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Tool for PlayAudioTool {
    fn name(&self) -> String {
        "play_audio".to_string()
    }

    fn description(&self) -> String {
        "Play base64-encoded MP3 audio through ffplay".to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "audio_base64": { "type": "string", "description": "MP3 data, base64 encoded" }
            },
            "required": ["audio_base64"]
        })
    }

    fn honors_timeout(&self, _arguments: &Value) -> bool {
        false
    }

    async fn call(&self, arguments: Value) -> ToolResult<Vec<ToolContent>> {
        let args: PlayArgs = parse_args(arguments)?;
        let audio = STANDARD
            .decode(args.audio_base64.trim())
            .map_err(|e| ToolError::InvalidArguments(format!("audio_base64: {}", e)))?;
        let len = audio.len();

        self.generator.play_audio(Bytes::from(audio)).await?;

        Ok(vec![ToolContent::text(format!("Played {} bytes of audio.", len))])
    }
}

/// List the voices available to the account
pub struct ListVoicesTool {
    voices: Arc<CachedVoices>,
}

impl ListVoicesTool {
    pub fn new(voices: Arc<CachedVoices>) -> Self {
        Self { voices }
    }
}

#[async_trait]
impl Tool for ListVoicesTool {
    fn name(&self) -> String {
        "list_voices".to_string()
    }

    fn description(&self) -> String {
        "List the ElevenLabs voices available for generate_audio".to_string()
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn call(&self, _arguments: Value) -> ToolResult<Vec<ToolContent>> {
        let voices = self.voices.voices().await?;
        let listing: Vec<Value> = voices
            .iter()
            .map(|v| {
                json!({
                    "voice_id": v.voice_id,
                    "name": v.name,
                    "category": v.category,
                    "description": v.description,
                    "labels": v.labels,
                })
            })
            .collect();
        let text = serde_json::to_string_pretty(&listing)
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(vec![ToolContent::text(text)])
    }
}
