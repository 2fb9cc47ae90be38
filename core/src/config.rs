use std::fs;
use std::path::{Path, PathBuf};

use crate::{Result, TtsError};

/// Top-level configuration for the client, the player and the MCP server
#[derive(Clone, Debug)]
pub struct VoxpipeConfig {
    pub api: ApiConfig,
    pub voice: VoiceDefaults,
    pub player: PlayerSettings,
    pub flow: FlowSettings,
    pub server: ServerSettings,
}

/// ElevenLabs connection settings
#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub request_timeout_ms: u64,
}

/// Defaults applied to every synthesis request unless overridden per call
#[derive(Clone, Debug)]
pub struct VoiceDefaults {
    pub voice_id: String,
    pub model_id: String,
    pub output_format: String,
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    pub use_speaker_boost: bool,
    /// Longest piece of text sent in a single synthesis request
    pub max_chunk_chars: usize,
}

/// External player process settings
#[derive(Clone, Debug)]
pub struct PlayerSettings {
    pub program: PathBuf,
    /// Chunks the stdin pipe holds before reporting saturation
    pub pipe_capacity: usize,
}

/// Watermarks for the streaming buffer
#[derive(Clone, Debug)]
pub struct FlowSettings {
    pub high_watermark: usize,
    pub low_watermark: usize,
    pub min_queue_slack: usize,
    pub gate_first_write: bool,
}

/// MCP server settings
#[derive(Clone, Debug)]
pub struct ServerSettings {
    pub voice_cache_ttl_secs: u64,
    pub tool_timeout_secs: u64,
}

pub const DEFAULT_BASE_URL: &str = "https://api.elevenlabs.io";
pub const DEFAULT_VOICE_ID: &str = "21m00Tcm4TlvDq8ikWAM";
pub const DEFAULT_MODEL_ID: &str = "eleven_multilingual_v2";
pub const DEFAULT_OUTPUT_FORMAT: &str = "mp3_44100_128";

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: env_string("ELEVENLABS_API_KEY"),
            base_url: env_string("ELEVENLABS_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            request_timeout_ms: env_parse("REQUEST_TIMEOUT_MS").unwrap_or(60_000),
        }
    }
}

impl Default for VoiceDefaults {
    fn default() -> Self {
        Self {
            voice_id: env_string("ELEVENLABS_VOICE_ID")
                .unwrap_or_else(|| DEFAULT_VOICE_ID.to_string()),
            model_id: env_string("ELEVENLABS_MODEL_ID")
                .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string()),
            output_format: env_string("ELEVENLABS_OUTPUT_FORMAT")
                .unwrap_or_else(|| DEFAULT_OUTPUT_FORMAT.to_string()),
            stability: env_parse("ELEVENLABS_STABILITY").unwrap_or(0.5),
            similarity_boost: env_parse("ELEVENLABS_SIMILARITY_BOOST").unwrap_or(0.75),
            style: env_parse("ELEVENLABS_STYLE").unwrap_or(0.0),
            use_speaker_boost: true,
            max_chunk_chars: 2500,
        }
    }
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            program: env_string("FFPLAY_BIN")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("ffplay")),
            pipe_capacity: 4,
        }
    }
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            high_watermark: 512 * 1024,
            low_watermark: 128 * 1024,
            min_queue_slack: 3,
            gate_first_write: false,
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            voice_cache_ttl_secs: env_parse("VOICE_CACHE_TTL_SECS").unwrap_or(3600),
            tool_timeout_secs: env_parse("TOOL_TIMEOUT_SECS").unwrap_or(300),
        }
    }
}

impl Default for VoxpipeConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            voice: VoiceDefaults::default(),
            player: PlayerSettings::default(),
            flow: FlowSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

impl VoxpipeConfig {
    /// Load configuration from a TOML file (path via VOXPIPE_CONFIG or ./voxpipe.toml),
    /// overlaying values onto env-driven defaults.
    pub fn load() -> Self {
        let path = std::env::var("VOXPIPE_CONFIG").unwrap_or_else(|_| "voxpipe.toml".into());
        Self::load_from(Path::new(&path))
    }

    /// Same as [`VoxpipeConfig::load`] with an explicit file path
    pub fn load_from(path: &Path) -> Self {
        let default = Self::default();
        if !path.exists() {
            tracing::info!(target: "config", path = %path.display(), "No TOML config found; using defaults/env");
            return default;
        }
        match fs::read_to_string(path) {
            Ok(s) => match toml::from_str::<VoxpipeToml>(&s) {
                Ok(t) => t.overlay(default),
                Err(e) => {
                    tracing::warn!(target: "config", error = %e, "Failed to parse TOML; using defaults");
                    default
                }
            },
            Err(e) => {
                tracing::warn!(target: "config", error = %e, "Failed to read TOML; using defaults");
                default
            }
        }
    }

    /// Parse a TOML document on top of the env-driven defaults
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let t: VoxpipeToml =
            toml::from_str(s).map_err(|e| TtsError::Config(format!("invalid TOML: {}", e)))?;
        Ok(t.overlay(Self::default()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.flow.low_watermark >= self.flow.high_watermark {
            return Err(TtsError::Config(format!(
                "low_watermark ({}) must be below high_watermark ({})",
                self.flow.low_watermark, self.flow.high_watermark
            )));
        }
        if self.player.pipe_capacity == 0 {
            return Err(TtsError::Config("pipe_capacity must be at least 1".into()));
        }
        if self.voice.max_chunk_chars == 0 {
            return Err(TtsError::Config("max_chunk_chars must be at least 1".into()));
        }
        if self.server.tool_timeout_secs == 0 {
            return Err(TtsError::Config("tool_timeout_secs must be at least 1".into()));
        }
        Ok(())
    }

    /// The API key, or a configuration error when synthesis is impossible
    pub fn require_api_key(&self) -> Result<&str> {
        self.api
            .api_key
            .as_deref()
            .ok_or_else(|| TtsError::Config("ELEVENLABS_API_KEY is not set".into()))
    }
}

// =========================
// TOML overlay definitions
// =========================

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct VoxpipeToml {
    pub api: Option<ApiToml>,
    pub voice: Option<VoiceToml>,
    pub player: Option<PlayerToml>,
    pub flow: Option<FlowToml>,
    pub server: Option<ServerToml>,
}

impl VoxpipeToml {
    fn overlay(self, mut base: VoxpipeConfig) -> VoxpipeConfig {
        if let Some(a) = self.api {
            a.apply(&mut base.api);
        }
        if let Some(v) = self.voice {
            v.apply(&mut base.voice);
        }
        if let Some(p) = self.player {
            p.apply(&mut base.player);
        }
        if let Some(f) = self.flow {
            f.apply(&mut base.flow);
        }
        if let Some(s) = self.server {
            s.apply(&mut base.server);
        }
        base
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct ApiToml {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub request_timeout_ms: Option<u64>,
}
impl ApiToml {
    fn apply(self, a: &mut ApiConfig) {
        if let Some(x) = self.api_key.filter(|k| !k.is_empty()) {
            a.api_key = Some(x);
        }
        if let Some(x) = self.base_url {
            a.base_url = x.trim_end_matches('/').to_string();
        }
        if let Some(x) = self.request_timeout_ms {
            a.request_timeout_ms = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct VoiceToml {
    pub voice_id: Option<String>,
    pub model_id: Option<String>,
    pub output_format: Option<String>,
    pub stability: Option<f32>,
    pub similarity_boost: Option<f32>,
    pub style: Option<f32>,
    pub use_speaker_boost: Option<bool>,
    pub max_chunk_chars: Option<usize>,
}
impl VoiceToml {
    fn apply(self, v: &mut VoiceDefaults) {
        if let Some(x) = self.voice_id {
            v.voice_id = x;
        }
        if let Some(x) = self.model_id {
            v.model_id = x;
        }
        if let Some(x) = self.output_format {
            v.output_format = x;
        }
        if let Some(x) = self.stability {
            v.stability = x.clamp(0.0, 1.0);
        }
        if let Some(x) = self.similarity_boost {
            v.similarity_boost = x.clamp(0.0, 1.0);
        }
        if let Some(x) = self.style {
            v.style = x.clamp(0.0, 1.0);
        }
        if let Some(x) = self.use_speaker_boost {
            v.use_speaker_boost = x;
        }
        if let Some(x) = self.max_chunk_chars {
            v.max_chunk_chars = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct PlayerToml {
    pub program: Option<PathBuf>,
    pub pipe_capacity: Option<usize>,
}
impl PlayerToml {
    fn apply(self, p: &mut PlayerSettings) {
        if let Some(x) = self.program {
            p.program = x;
        }
        if let Some(x) = self.pipe_capacity {
            p.pipe_capacity = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct FlowToml {
    pub high_watermark: Option<usize>,
    pub low_watermark: Option<usize>,
    pub min_queue_slack: Option<usize>,
    pub gate_first_write: Option<bool>,
}
impl FlowToml {
    fn apply(self, f: &mut FlowSettings) {
        if let Some(x) = self.high_watermark {
            f.high_watermark = x;
        }
        if let Some(x) = self.low_watermark {
            f.low_watermark = x;
        }
        if let Some(x) = self.min_queue_slack {
            f.min_queue_slack = x;
        }
        if let Some(x) = self.gate_first_write {
            f.gate_first_write = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct ServerToml {
    pub voice_cache_ttl_secs: Option<u64>,
    pub tool_timeout_secs: Option<u64>,
}
impl ServerToml {
    fn apply(self, s: &mut ServerSettings) {
        if let Some(x) = self.voice_cache_ttl_secs {
            s.voice_cache_ttl_secs = x;
        }
        if let Some(x) = self.tool_timeout_secs {
            s.tool_timeout_secs = x;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_flow_settings_are_valid() {
        let cfg = VoxpipeConfig::default();
        assert!(cfg.validate().is_ok());
        assert!(cfg.flow.low_watermark < cfg.flow.high_watermark);
    }

    #[test]
    fn test_toml_overlay() {
        let cfg = VoxpipeConfig::from_toml_str(
            r#"
            [api]
            api_key = "sk-test"
            base_url = "http://localhost:9000/"

            [voice]
            voice_id = "abc"
            stability = 1.7

            [flow]
            high_watermark = 2048
            low_watermark = 512
            "#,
        )
        .unwrap();

        assert_eq!(cfg.api.api_key.as_deref(), Some("sk-test"));
        assert_eq!(cfg.api.base_url, "http://localhost:9000");
        assert_eq!(cfg.voice.voice_id, "abc");
        assert_eq!(cfg.voice.stability, 1.0);
        assert_eq!(cfg.flow.high_watermark, 2048);
        assert_eq!(cfg.flow.low_watermark, 512);
        assert_eq!(cfg.require_api_key().unwrap(), "sk-test");
    }

    #[test]
    fn test_invalid_watermarks_rejected() {
        let cfg = VoxpipeConfig::from_toml_str(
            r#"
            [flow]
            high_watermark = 100
            low_watermark = 100
            "#,
        )
        .unwrap();
        assert!(matches!(cfg.validate(), Err(TtsError::Config(_))));
    }

    #[test]
    fn test_zero_tool_timeout_rejected() {
        let cfg = VoxpipeConfig::from_toml_str("[server]\ntool_timeout_secs = 0").unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, TtsError::Config(ref m) if m.contains("tool_timeout_secs")));
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let err = VoxpipeConfig::from_toml_str("[flow\nhigh_watermark = ").unwrap_err();
        assert_eq!(err.phase(), "config");
    }

    #[test]
    fn test_load_from_file_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voxpipe.toml");
        let mut f = fs::File::create(&path).unwrap();
        writeln!(f, "[server]\ntool_timeout_secs = 42").unwrap();

        let cfg = VoxpipeConfig::load_from(&path);
        assert_eq!(cfg.server.tool_timeout_secs, 42);

        let missing = VoxpipeConfig::load_from(&dir.path().join("nope.toml"));
        assert_eq!(
            missing.flow.high_watermark,
            FlowSettings::default().high_watermark
        );
    }
}
