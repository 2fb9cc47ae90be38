// Voxpipe Bridge
// Speech tools exposed to MCP clients over stdio

pub mod protocol;
pub mod server;
pub mod tools;

use std::sync::Arc;
use std::time::Duration;

use voxpipe_audio::SpeechGenerator;
use voxpipe_core::{CachedVoices, VoxpipeConfig};

pub use server::McpServer;
pub use tools::{GenerateAudioTool, ListVoicesTool, PlayAudioTool, Tool, ToolError, ToolRegistry};

#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    #[error("startup failed: {0}")]
    Startup(#[from] voxpipe_core::TtsError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Registry holding the three speech tools around one generator
pub fn speech_registry(
    generator: Arc<SpeechGenerator>,
    voices: Arc<CachedVoices>,
    call_timeout: Duration,
) -> ToolRegistry {
    let registry = ToolRegistry::with_timeout(call_timeout);
    registry.register(Arc::new(GenerateAudioTool::new(generator.clone())));
    registry.register(Arc::new(PlayAudioTool::new(generator)));
    registry.register(Arc::new(ListVoicesTool::new(voices)));
    registry
}

/// Build the server from configuration: ElevenLabs client, ffplay playback,
/// cached voice listing
pub fn build_server(config: &VoxpipeConfig) -> Result<McpServer> {
    config.validate()?;
    config.require_api_key()?;
    let generator = Arc::new(SpeechGenerator::from_config(config)?);
    let voices = Arc::new(CachedVoices::new(
        generator.synthesizer(),
        Duration::from_secs(config.server.voice_cache_ttl_secs),
    ));
    let registry = speech_registry(
        generator,
        voices,
        Duration::from_secs(config.server.tool_timeout_secs),
    );
    Ok(McpServer::new(registry))
}
