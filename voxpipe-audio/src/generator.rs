//! Speech generation: synthesis fanned out to an in-memory buffer and, when
//! requested, to a live playback session.

use crate::flow::FlowConfig;
use crate::player::{PlayerConfig, PlayerLauncher};
use crate::session::{PlaybackSession, SourceEvent};
use crate::sink::SinkFactory;
use bytes::{Bytes, BytesMut};
use futures::{stream, StreamExt, TryStreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use voxpipe_core::config::{VoiceDefaults, VoxpipeConfig};
use voxpipe_core::elevenlabs::{ElevenLabsClient, SpeechSynthesizer, SynthesisRequest, VoiceSettings};
use voxpipe_core::{split_sentences, Result, TtsError};

/// Slice size used when replaying a finished buffer
const REPLAY_CHUNK_SIZE: usize = 64 * 1024;

/// How a producer run ended
enum Production {
    Complete(Bytes),
    /// The playback session went away before the source was exhausted
    Abandoned,
}

/// Per-call overrides; `None` falls back to the configured defaults
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub voice_id: Option<String>,
    pub model_id: Option<String>,
    pub output_format: Option<String>,
    pub stability: Option<f32>,
    pub similarity_boost: Option<f32>,
    pub style: Option<f32>,
    /// Play the audio while it is being synthesized
    pub play_audio: bool,
}

impl GenerateOptions {
    pub fn playing() -> Self {
        Self {
            play_audio: true,
            ..Self::default()
        }
    }
}

pub struct SpeechGenerator {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    sinks: Arc<dyn SinkFactory>,
    defaults: VoiceDefaults,
    flow: FlowConfig,
}

impl SpeechGenerator {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        sinks: Arc<dyn SinkFactory>,
        defaults: VoiceDefaults,
        flow: FlowConfig,
    ) -> Self {
        Self {
            synthesizer,
            sinks,
            defaults,
            flow,
        }
    }

    /// ElevenLabs client plus ffplay playback, both from configuration
    pub fn from_config(config: &VoxpipeConfig) -> Result<Self> {
        let flow = FlowConfig::from(&config.flow);
        flow.validate()?;
        let client = ElevenLabsClient::new(&config.api)?;
        let launcher = PlayerLauncher::new(PlayerConfig::from(&config.player));
        Ok(Self::new(
            Arc::new(client),
            Arc::new(launcher),
            config.voice.clone(),
            flow,
        ))
    }

    pub fn synthesizer(&self) -> Arc<dyn SpeechSynthesizer> {
        self.synthesizer.clone()
    }

    pub fn defaults(&self) -> &VoiceDefaults {
        &self.defaults
    }

    /// One request per text piece, in text order
    pub fn build_requests(&self, text: &str, options: &GenerateOptions) -> Result<Vec<SynthesisRequest>> {
        let pieces = split_sentences(text, self.defaults.max_chunk_chars)?;

        let voice_settings = VoiceSettings::new(
            options.stability.unwrap_or(self.defaults.stability),
            options.similarity_boost.unwrap_or(self.defaults.similarity_boost),
            options.style.unwrap_or(self.defaults.style),
        )?
        .with_speaker_boost(self.defaults.use_speaker_boost);

        let voice_id = options.voice_id.clone().unwrap_or_else(|| self.defaults.voice_id.clone());
        let model_id = options.model_id.clone().unwrap_or_else(|| self.defaults.model_id.clone());
        let output_format = options
            .output_format
            .clone()
            .unwrap_or_else(|| self.defaults.output_format.clone());

        Ok(pieces
            .into_iter()
            .map(|text| SynthesisRequest {
                text,
                voice_id: voice_id.clone(),
                model_id: model_id.clone(),
                output_format: output_format.clone(),
                voice_settings,
            })
            .collect())
    }

    /// Synthesize `text` and return the complete audio.
    ///
    /// With `play_audio` the player is started before the first request, and
    /// every chunk goes to both the buffer and the player in arrival order.
    /// The call returns once the whole stream is buffered and playback has
    /// finished. A source failure wins over a playback failure; a player that
    /// fails mid-stream stops any further synthesis requests.
    pub async fn generate_audio(&self, text: &str, options: &GenerateOptions) -> Result<Bytes> {
        let requests = self.build_requests(text, options)?;
        info!(
            target: "generator",
            pieces = requests.len(),
            chars = text.chars().count(),
            play = options.play_audio,
            "Generating audio"
        );

        if !options.play_audio {
            return match self.produce(requests, None).await? {
                Production::Complete(audio) => Ok(audio),
                Production::Abandoned => Err(TtsError::SourceStream("synthesis abandoned".into())),
            };
        }

        let sink = self.sinks.open()?;
        let session = PlaybackSession::new(sink, self.flow);
        let (tx, rx) = mpsc::unbounded_channel();

        let (produced, played) = tokio::join!(self.produce(requests, Some(tx)), session.run(rx));
        match produced? {
            Production::Complete(audio) => {
                played?;
                Ok(audio)
            }
            Production::Abandoned => {
                played?;
                Err(TtsError::SourceStream("playback stopped before synthesis finished".into()))
            }
        }
    }

    /// Play an already complete buffer through a fresh sink
    pub async fn play_audio(&self, audio: Bytes) -> Result<()> {
        if audio.is_empty() {
            return Err(TtsError::InvalidArgument("audio buffer is empty".into()));
        }
        let sink = self.sinks.open()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut offset = 0;
        while offset < audio.len() {
            let end = (offset + REPLAY_CHUNK_SIZE).min(audio.len());
            let _ = tx.send(SourceEvent::Chunk(audio.slice(offset..end)));
            offset = end;
        }
        let _ = tx.send(SourceEvent::End);
        drop(tx);

        let written = PlaybackSession::new(sink, self.flow).run(rx).await?;
        debug!(target: "generator", bytes = written, "Replay finished");
        Ok(())
    }

    /// Pull every request's stream in order, accumulating the audio and
    /// forwarding each chunk to the session when one is attached. Stops
    /// issuing requests as soon as the session has gone away.
    async fn produce(
        &self,
        requests: Vec<SynthesisRequest>,
        events: Option<mpsc::UnboundedSender<SourceEvent>>,
    ) -> Result<Production> {
        let synthesizer = self.synthesizer.clone();
        let mut source = stream::iter(requests)
            .then(move |request| {
                let synthesizer = synthesizer.clone();
                async move { synthesizer.synthesize_stream(&request).await }
            })
            .try_flatten()
            .boxed();

        let mut audio = BytesMut::new();
        while let Some(item) = source.next().await {
            match item {
                Ok(chunk) => {
                    audio.extend_from_slice(&chunk);
                    if let Some(tx) = &events {
                        if tx.send(SourceEvent::Chunk(chunk)).is_err() {
                            info!(target: "generator", bytes = audio.len(), "Playback ended; abandoning synthesis");
                            return Ok(Production::Abandoned);
                        }
                    }
                }
                Err(e) => {
                    warn!(target: "generator", error = %e, bytes = audio.len(), "Synthesis stream failed");
                    if let Some(tx) = &events {
                        let _ = tx.send(SourceEvent::Failed(e.to_string()));
                    }
                    return Err(e);
                }
            }
        }

        if let Some(tx) = &events {
            let _ = tx.send(SourceEvent::End);
        }
        debug!(target: "generator", bytes = audio.len(), "Synthesis complete");
        Ok(Production::Complete(audio.freeze()))
    }
}
