// Voxpipe Core Library
// ElevenLabs speech synthesis client and shared building blocks

pub mod cache;
pub mod config;
pub mod elevenlabs;
pub mod text;

// Export core types
pub use cache::{CachedVoices, Clock, ExpiringCache, SystemClock};
pub use config::{ApiConfig, FlowSettings, PlayerSettings, ServerSettings, VoiceDefaults, VoxpipeConfig};
pub use elevenlabs::{
    AudioStream, ElevenLabsClient, SpeechSynthesizer, SynthesisRequest, Voice, VoiceSettings,
};
pub use text::split_sentences;

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TtsError {
    #[error("Source stream error: {0}")]
    SourceStream(String),

    #[error("Failed to spawn player '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Player exited with code {code}")]
    Playback { code: i32 },

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TtsError {
    /// Which phase of a call failed; callers use this to decide on retry
    pub fn phase(&self) -> &'static str {
        match self {
            TtsError::SourceStream(_) => "source",
            TtsError::Spawn { .. } => "spawn",
            TtsError::Playback { .. } => "playback",
            TtsError::Api { .. } | TtsError::Http(_) => "api",
            TtsError::Config(_) => "config",
            TtsError::InvalidArgument(_) => "input",
            TtsError::Io(_) | TtsError::Json(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, TtsError>;
