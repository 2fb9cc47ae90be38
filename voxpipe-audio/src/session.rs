//! One playback session: source events in, paced writes out
//!
//! The session is the only owner of its [`FlowControl`] and its sink, so no
//! locking is involved. Source chunks arrive over an unbounded channel; the
//! producer never waits on playback, it only ever fills the queue.

use crate::flow::{FlowConfig, FlowControl, FlowEvent};
use crate::sink::{AudioSink, SinkSignal};
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use voxpipe_core::{Result, TtsError};

/// What the producer reports to the session
#[derive(Debug)]
pub enum SourceEvent {
    Chunk(Bytes),
    End,
    Failed(String),
}

enum Wake {
    Source(Option<SourceEvent>),
    Sink(SinkSignal),
}

pub struct PlaybackSession {
    flow: FlowControl,
    sink: Box<dyn AudioSink>,
    bytes_written: u64,
}

impl PlaybackSession {
    pub fn new(sink: Box<dyn AudioSink>, config: FlowConfig) -> Self {
        Self {
            flow: FlowControl::new(config),
            sink,
            bytes_written: 0,
        }
    }

    /// Drive the session until the source ends and the sink exits.
    ///
    /// Returns the number of bytes handed to the sink. A source failure kills
    /// the sink and is reported as `SourceStream`; otherwise the sink's exit
    /// outcome decides. A sink that fails while the source is still open ends
    /// the session at once, and dropping `events` tells the producer to stop.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<SourceEvent>) -> Result<u64> {
        loop {
            self.pump().await;

            if self.flow.take_end_signal() {
                debug!(target: "playback", bytes = self.bytes_written, "Source drained; closing sink input");
                self.sink.end().await;
                break;
            }

            let source_open = !self.flow.source_ended();
            let suspended = self.flow.is_suspended();

            let wake = tokio::select! {
                biased;
                signal = self.sink.next_signal(suspended) => Wake::Sink(signal),
                event = events.recv(), if source_open => Wake::Source(event),
            };

            match wake {
                Wake::Source(Some(SourceEvent::Chunk(chunk))) => {
                    self.flow.dispatch(FlowEvent::Data(chunk));
                }
                Wake::Source(Some(SourceEvent::End)) => {
                    self.flow.dispatch(FlowEvent::SourceEnded);
                }
                Wake::Source(None) => {
                    debug!(target: "playback", "Source channel closed without end; treating as end");
                    self.flow.dispatch(FlowEvent::SourceEnded);
                }
                Wake::Source(Some(SourceEvent::Failed(message))) => {
                    warn!(target: "playback", error = %message, bytes = self.bytes_written, "Source failed; stopping playback");
                    self.sink.kill();
                    let _ = self.sink.wait().await;
                    return Err(TtsError::SourceStream(message));
                }
                Wake::Sink(SinkSignal::Drained) => self.flow.dispatch(FlowEvent::SinkDrained),
                Wake::Sink(SinkSignal::Exited(Err(e))) => {
                    warn!(target: "playback", error = %e, bytes = self.bytes_written, "Player failed before the source ended");
                    return Err(e);
                }
                Wake::Sink(SinkSignal::Exited(Ok(()))) => {
                    info!(target: "playback", bytes = self.bytes_written, "Player finished early; draining source");
                    return self.drain_source(events).await;
                }
            }
        }

        self.sink.wait().await?;
        info!(target: "playback", bytes = self.bytes_written, "Playback finished");
        Ok(self.bytes_written)
    }

    /// Consume the rest of the source after a clean early exit, so the
    /// producer still completes its buffer
    async fn drain_source(self, mut events: mpsc::UnboundedReceiver<SourceEvent>) -> Result<u64> {
        if self.flow.source_ended() {
            return Ok(self.bytes_written);
        }
        while let Some(event) = events.recv().await {
            match event {
                SourceEvent::Chunk(_) => {}
                SourceEvent::End => break,
                SourceEvent::Failed(message) => return Err(TtsError::SourceStream(message)),
            }
        }
        Ok(self.bytes_written)
    }

    /// Write every chunk the flow currently allows, stopping on saturation
    async fn pump(&mut self) {
        while let Some(chunk) = self.flow.next_write() {
            let len = chunk.len() as u64;
            let saturated = self.sink.write(chunk).await;
            self.bytes_written += len;
            if saturated {
                self.flow.dispatch(FlowEvent::SinkSaturated);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Log {
        chunks: Vec<Bytes>,
        ended: usize,
        killed: usize,
    }

    struct MemorySink {
        log: Arc<Mutex<Log>>,
        saturate_every: usize,
        // Exit code reported as soon as the session waits on the sink
        early_exit: Option<i32>,
    }

    #[async_trait]
    impl AudioSink for MemorySink {
        async fn write(&mut self, chunk: Bytes) -> bool {
            let mut log = self.log.lock().unwrap();
            log.chunks.push(chunk);
            self.saturate_every > 0 && log.chunks.len() % self.saturate_every == 0
        }

        async fn drained(&mut self) {
            tokio::task::yield_now().await;
        }

        async fn next_signal(&mut self, drain: bool) -> SinkSignal {
            match self.early_exit {
                Some(0) => SinkSignal::Exited(Ok(())),
                Some(code) => SinkSignal::Exited(Err(TtsError::Playback { code })),
                None if drain => {
                    self.drained().await;
                    SinkSignal::Drained
                }
                None => futures::future::pending().await,
            }
        }

        async fn end(&mut self) {
            self.log.lock().unwrap().ended += 1;
        }

        async fn wait(&mut self) -> Result<()> {
            Ok(())
        }

        fn kill(&mut self) {
            self.log.lock().unwrap().killed += 1;
        }
    }

    fn session(saturate_every: usize) -> (PlaybackSession, Arc<Mutex<Log>>) {
        exiting_session(saturate_every, None)
    }

    fn exiting_session(saturate_every: usize, early_exit: Option<i32>) -> (PlaybackSession, Arc<Mutex<Log>>) {
        let log = Arc::new(Mutex::new(Log::default()));
        let sink = MemorySink {
            log: log.clone(),
            saturate_every,
            early_exit,
        };
        (PlaybackSession::new(Box::new(sink), FlowConfig::default()), log)
    }

    #[tokio::test]
    async fn test_writes_in_order_and_ends_once() {
        let (session, log) = session(2);
        let (tx, rx) = mpsc::unbounded_channel();
        for i in 0..7u8 {
            tx.send(SourceEvent::Chunk(Bytes::from(vec![i; 1000]))).unwrap();
        }
        tx.send(SourceEvent::End).unwrap();

        let written = session.run(rx).await.unwrap();
        assert_eq!(written, 7000);

        let log = log.lock().unwrap();
        let order: Vec<u8> = log.chunks.iter().map(|c| c[0]).collect();
        assert_eq!(order, (0..7).collect::<Vec<_>>());
        assert_eq!(log.ended, 1);
        assert_eq!(log.killed, 0);
    }

    #[tokio::test]
    async fn test_source_failure_kills_sink() {
        let (session, log) = session(0);
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(SourceEvent::Chunk(Bytes::from_static(b"abc"))).unwrap();
        tx.send(SourceEvent::Failed("connection reset".into())).unwrap();

        let err = session.run(rx).await.unwrap_err();
        assert!(matches!(err, TtsError::SourceStream(ref m) if m == "connection reset"));

        let log = log.lock().unwrap();
        assert_eq!(log.killed, 1);
        assert_eq!(log.ended, 0);
    }

    #[tokio::test]
    async fn test_closed_channel_counts_as_end() {
        let (session, log) = session(0);
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(SourceEvent::Chunk(Bytes::from_static(b"abc"))).unwrap();
        drop(tx);

        assert_eq!(session.run(rx).await.unwrap(), 3);
        assert_eq!(log.lock().unwrap().ended, 1);
    }

    #[tokio::test]
    async fn test_player_failure_ends_session_while_source_open() {
        let (session, log) = exiting_session(0, Some(2));
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(SourceEvent::Chunk(Bytes::from_static(b"abc"))).unwrap();

        let err = session.run(rx).await.unwrap_err();
        assert!(matches!(err, TtsError::Playback { code: 2 }));
        // The receiver is gone, so the producer sees a closed channel
        assert!(tx.send(SourceEvent::Chunk(Bytes::from_static(b"def"))).is_err());
        assert_eq!(log.lock().unwrap().ended, 0);
    }

    #[tokio::test]
    async fn test_clean_early_exit_keeps_draining_source() {
        let (session, log) = exiting_session(0, Some(0));
        let (tx, rx) = mpsc::unbounded_channel();
        let producer = tokio::spawn(async move {
            for i in 0..5u8 {
                tx.send(SourceEvent::Chunk(Bytes::from(vec![i; 10]))).unwrap();
                tokio::task::yield_now().await;
            }
            tx.send(SourceEvent::End).unwrap();
        });

        assert!(session.run(rx).await.is_ok());
        producer.await.unwrap();
        assert_eq!(log.lock().unwrap().ended, 0);
    }
}
