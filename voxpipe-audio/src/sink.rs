use async_trait::async_trait;
use bytes::Bytes;
use voxpipe_core::Result;

/// What woke a session waiting on its sink
#[derive(Debug)]
pub enum SinkSignal {
    /// Capacity came back after saturation
    Drained,
    /// The sink terminated on its own, with its exit outcome
    Exited(Result<()>),
}

/// Destination for one session's compressed audio
#[async_trait]
pub trait AudioSink: Send {
    /// Forward a chunk. Returns `true` when the sink's input buffer is saturated
    /// and no further writes should happen until [`AudioSink::drained`] resolves.
    async fn write(&mut self, chunk: Bytes) -> bool;

    /// Resolves once the sink can accept more data
    async fn drained(&mut self);

    /// Wait for capacity (only when `drain` is set) or for the sink to exit
    /// on its own, whichever comes first. Sinks that cannot exit early keep
    /// this default.
    async fn next_signal(&mut self, drain: bool) -> SinkSignal {
        if drain {
            self.drained().await;
            SinkSignal::Drained
        } else {
            futures::future::pending().await
        }
    }

    /// Close the input after the last chunk; a no-op if it is already closed
    async fn end(&mut self);

    /// Terminal outcome of the sink (the player's exit status)
    async fn wait(&mut self) -> Result<()>;

    /// Tear the sink down. Idempotent, safe after exit.
    fn kill(&mut self);
}

/// Creates one sink per playback session
pub trait SinkFactory: Send + Sync {
    fn open(&self) -> Result<Box<dyn AudioSink>>;
}
