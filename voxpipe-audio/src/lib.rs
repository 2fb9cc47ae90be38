// Streaming playback: ffplay sink, buffer manager, generation orchestrator

pub mod flow;
pub mod generator;
pub mod player;
pub mod session;
pub mod sink;

pub use flow::{FlowConfig, FlowControl, FlowEvent, FlowState};
pub use generator::{GenerateOptions, SpeechGenerator};
pub use player::{PlayerConfig, PlayerLauncher, PlayerProcess};
pub use session::{PlaybackSession, SourceEvent};
pub use sink::{AudioSink, SinkFactory, SinkSignal};
