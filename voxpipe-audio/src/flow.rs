//! Flow control between network delivery and player consumption
//!
//! `FlowControl` is a synchronous state machine. It owns the pending queue and
//! the buffered byte count for one session and decides, chunk by chunk, whether
//! the next write may happen:
//!
//! - `Flowing -> Paused` when buffered bytes drop below the low watermark, the
//!   source is still open and at least `min_queue_slack` chunks remain queued
//! - `Paused -> Flowing` when buffered bytes reach the high watermark
//! - source end forces `Flowing` for the rest of the session
//!
//! Saturation of the sink suspends dequeues independently of the state until
//! the sink reports it drained.

use bytes::Bytes;
use std::collections::VecDeque;
use tracing::{debug, warn};
use voxpipe_core::config::FlowSettings;
use voxpipe_core::{Result, TtsError};

pub const DEFAULT_HIGH_WATERMARK: usize = 512 * 1024;
pub const DEFAULT_LOW_WATERMARK: usize = 128 * 1024;
pub const DEFAULT_MIN_QUEUE_SLACK: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowConfig {
    /// Buffered bytes needed to resume after a pause
    pub high_watermark: usize,
    /// Buffered bytes below which forwarding pauses
    pub low_watermark: usize,
    /// Queued chunks required before a low-watermark pause may trigger
    pub min_queue_slack: usize,
    /// Hold the first write until the high watermark is reached (or the source ends)
    pub gate_first_write: bool,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            high_watermark: DEFAULT_HIGH_WATERMARK,
            low_watermark: DEFAULT_LOW_WATERMARK,
            min_queue_slack: DEFAULT_MIN_QUEUE_SLACK,
            gate_first_write: false,
        }
    }
}

impl FlowConfig {
    pub fn validate(&self) -> Result<()> {
        if self.low_watermark >= self.high_watermark {
            return Err(TtsError::Config(format!(
                "low_watermark ({}) must be below high_watermark ({})",
                self.low_watermark, self.high_watermark
            )));
        }
        Ok(())
    }
}

impl From<&FlowSettings> for FlowConfig {
    fn from(s: &FlowSettings) -> Self {
        Self {
            high_watermark: s.high_watermark,
            low_watermark: s.low_watermark,
            min_queue_slack: s.min_queue_slack,
            gate_first_write: s.gate_first_write,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Flowing,
    Paused,
}

#[derive(Debug)]
pub enum FlowEvent {
    /// A chunk arrived from the source
    Data(Bytes),
    /// The last write filled the sink's input buffer
    SinkSaturated,
    /// The sink can take more data
    SinkDrained,
    /// No further chunks will arrive
    SourceEnded,
}

#[derive(Debug)]
pub struct FlowControl {
    config: FlowConfig,
    queue: VecDeque<Bytes>,
    buffered_bytes: usize,
    state: FlowState,
    suspended: bool,
    source_ended: bool,
    end_signalled: bool,
}

impl FlowControl {
    pub fn new(config: FlowConfig) -> Self {
        let state = if config.gate_first_write {
            FlowState::Paused
        } else {
            FlowState::Flowing
        };
        Self {
            config,
            queue: VecDeque::new(),
            buffered_bytes: 0,
            state,
            suspended: false,
            source_ended: false,
            end_signalled: false,
        }
    }

    /// Apply one event to the state machine
    pub fn dispatch(&mut self, event: FlowEvent) {
        match event {
            FlowEvent::Data(chunk) => self.on_data(chunk),
            FlowEvent::SinkSaturated => self.suspended = true,
            FlowEvent::SinkDrained => self.suspended = false,
            FlowEvent::SourceEnded => {
                self.source_ended = true;
                self.transition(FlowState::Flowing);
            }
        }
    }

    fn on_data(&mut self, chunk: Bytes) {
        if self.source_ended {
            warn!(target: "flow", bytes = chunk.len(), "Chunk after source end ignored");
            return;
        }
        if chunk.is_empty() {
            return;
        }
        self.buffered_bytes += chunk.len();
        self.queue.push_back(chunk);
        if self.state == FlowState::Paused && self.buffered_bytes >= self.config.high_watermark {
            self.transition(FlowState::Flowing);
        }
    }

    /// Dequeue the next chunk for the sink, if the flow allows a write now.
    /// The chunk's bytes leave the buffered count as it is handed out.
    pub fn next_write(&mut self) -> Option<Bytes> {
        if self.state == FlowState::Paused || self.suspended {
            return None;
        }
        let chunk = self.queue.pop_front()?;
        self.buffered_bytes -= chunk.len();
        if self.should_pause() {
            self.transition(FlowState::Paused);
        }
        Some(chunk)
    }

    fn should_pause(&self) -> bool {
        !self.source_ended
            && self.buffered_bytes < self.config.low_watermark
            && self.queue.len() >= self.config.min_queue_slack
    }

    fn transition(&mut self, next: FlowState) {
        if self.state != next {
            debug!(
                target: "flow",
                from = ?self.state,
                to = ?next,
                buffered = self.buffered_bytes,
                queued = self.queue.len(),
                "Flow state change"
            );
            self.state = next;
        }
    }

    /// `true` exactly once: when the source has ended and every chunk was handed out
    pub fn take_end_signal(&mut self) -> bool {
        if self.source_ended && self.queue.is_empty() && !self.end_signalled {
            self.end_signalled = true;
            return true;
        }
        false
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    pub fn queued_chunks(&self) -> usize {
        self.queue.len()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn source_ended(&self) -> bool {
        self.source_ended
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KB: usize = 1024;

    fn chunk(len: usize, fill: u8) -> Bytes {
        Bytes::from(vec![fill; len])
    }

    fn config(low: usize, high: usize, slack: usize) -> FlowConfig {
        FlowConfig {
            high_watermark: high,
            low_watermark: low,
            min_queue_slack: slack,
            gate_first_write: false,
        }
    }

    fn queued_sum(flow: &FlowControl) -> usize {
        flow.queue.iter().map(|c| c.len()).sum()
    }

    #[test]
    fn test_starts_flowing() {
        let flow = FlowControl::new(FlowConfig::default());
        assert_eq!(flow.state(), FlowState::Flowing);
        assert!(FlowConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_watermarks() {
        assert!(config(512, 512, 1).validate().is_err());
        assert!(config(600, 512, 1).validate().is_err());
    }

    #[test]
    fn test_buffered_counter_matches_queue() {
        let mut flow = FlowControl::new(config(10, 100, 1));
        for i in 0..5 {
            flow.dispatch(FlowEvent::Data(chunk(7 + i, i as u8)));
            assert_eq!(flow.buffered_bytes(), queued_sum(&flow));
        }
        flow.dispatch(FlowEvent::SinkSaturated);
        assert!(flow.next_write().is_none());
        assert_eq!(flow.buffered_bytes(), queued_sum(&flow));
        flow.dispatch(FlowEvent::SinkDrained);
        while flow.next_write().is_some() {
            assert_eq!(flow.buffered_bytes(), queued_sum(&flow));
            if flow.state() == FlowState::Paused {
                flow.dispatch(FlowEvent::SourceEnded);
            }
        }
        assert_eq!(flow.buffered_bytes(), 0);
    }

    #[test]
    fn test_fifo_order() {
        let mut flow = FlowControl::new(config(1, 2, 100));
        for i in 0..10u8 {
            flow.dispatch(FlowEvent::Data(chunk(3, i)));
        }
        flow.dispatch(FlowEvent::SourceEnded);
        let order: Vec<u8> = std::iter::from_fn(|| flow.next_write()).map(|c| c[0]).collect();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_watermark_hysteresis() {
        // 10-byte chunks, L = 25, H = 60
        let mut flow = FlowControl::new(config(25, 60, 1));
        for i in 0..3 {
            flow.dispatch(FlowEvent::Data(chunk(10, i)));
        }
        // 30 -> 20 buffered with 2 queued: below L with slack satisfied
        assert!(flow.next_write().is_some());
        assert_eq!(flow.buffered_bytes(), 20);
        assert_eq!(flow.state(), FlowState::Paused);
        assert!(flow.next_write().is_none());

        // Strictly between L and H does not resume
        for i in 3..6 {
            flow.dispatch(FlowEvent::Data(chunk(10, i)));
        }
        assert_eq!(flow.buffered_bytes(), 50);
        assert_eq!(flow.state(), FlowState::Paused);
        assert!(flow.next_write().is_none());

        // Reaching H resumes
        flow.dispatch(FlowEvent::Data(chunk(10, 6)));
        assert_eq!(flow.buffered_bytes(), 60);
        assert_eq!(flow.state(), FlowState::Flowing);
        assert!(flow.next_write().is_some());
    }

    #[test]
    fn test_no_pause_on_tail_chunks() {
        let mut flow = FlowControl::new(config(100, 200, 3));
        flow.dispatch(FlowEvent::Data(chunk(40, 0)));
        flow.dispatch(FlowEvent::Data(chunk(40, 1)));
        flow.dispatch(FlowEvent::Data(chunk(40, 2)));
        // 80 buffered, 2 queued: fewer than the slack, keeps flowing
        assert!(flow.next_write().is_some());
        assert_eq!(flow.state(), FlowState::Flowing);
        assert!(flow.next_write().is_some());
        assert!(flow.next_write().is_some());
        assert_eq!(flow.state(), FlowState::Flowing);
        assert_eq!(flow.buffered_bytes(), 0);
    }

    #[test]
    fn test_flush_on_end_never_repauses() {
        let mut flow = FlowControl::new(config(25, 60, 1));
        for i in 0..3 {
            flow.dispatch(FlowEvent::Data(chunk(10, i)));
        }
        assert!(flow.next_write().is_some());
        assert_eq!(flow.state(), FlowState::Paused);

        flow.dispatch(FlowEvent::SourceEnded);
        assert_eq!(flow.state(), FlowState::Flowing);
        assert!(!flow.take_end_signal());

        assert!(flow.next_write().is_some());
        assert_eq!(flow.state(), FlowState::Flowing);
        assert!(flow.next_write().is_some());
        assert_eq!(flow.state(), FlowState::Flowing);
        assert!(flow.next_write().is_none());

        assert!(flow.take_end_signal());
        assert!(!flow.take_end_signal());
    }

    #[test]
    fn test_end_waits_for_queue_even_when_suspended() {
        let mut flow = FlowControl::new(config(1, 2, 100));
        flow.dispatch(FlowEvent::Data(chunk(5, 0)));
        flow.dispatch(FlowEvent::SinkSaturated);
        flow.dispatch(FlowEvent::SourceEnded);
        assert!(flow.next_write().is_none());
        assert!(!flow.take_end_signal());
        flow.dispatch(FlowEvent::SinkDrained);
        assert!(flow.next_write().is_some());
        assert!(flow.take_end_signal());
    }

    #[test]
    fn test_data_after_end_ignored() {
        let mut flow = FlowControl::new(config(1, 2, 1));
        flow.dispatch(FlowEvent::SourceEnded);
        flow.dispatch(FlowEvent::Data(chunk(5, 0)));
        assert_eq!(flow.buffered_bytes(), 0);
        assert!(flow.take_end_signal());
    }

    #[test]
    fn test_single_chunk_below_high_watermark_written_at_once() {
        let mut flow = FlowControl::new(FlowConfig::default());
        flow.dispatch(FlowEvent::Data(chunk(300 * 1000, 1)));
        let first = flow.next_write().unwrap();
        assert_eq!(first.len(), 300 * 1000);
        assert_eq!(flow.state(), FlowState::Flowing);
    }

    #[test]
    fn test_hundred_kilobyte_chunks_with_slow_sink() {
        let mut flow = FlowControl::new(config(128 * KB, 512 * KB, 1));
        let mut written = 0usize;

        flow.dispatch(FlowEvent::Data(chunk(100_000, 1)));
        flow.dispatch(FlowEvent::Data(chunk(100_000, 2)));
        assert_eq!(flow.buffered_bytes(), 200_000);
        assert_eq!(flow.state(), FlowState::Flowing);

        // The sink takes one chunk: 100 000 < 128 KiB with one chunk queued
        written += flow.next_write().unwrap().len();
        assert_eq!(flow.state(), FlowState::Paused);

        for n in 3..=6 {
            flow.dispatch(FlowEvent::Data(chunk(100_000, n)));
        }
        assert_eq!(flow.buffered_bytes(), 500_000);
        assert_eq!(flow.state(), FlowState::Paused);

        flow.dispatch(FlowEvent::Data(chunk(100_000, 7)));
        assert_eq!(flow.state(), FlowState::Flowing);

        while let Some(c) = flow.next_write() {
            written += c.len();
        }
        for n in 8..=10 {
            flow.dispatch(FlowEvent::Data(chunk(100_000, n)));
        }
        flow.dispatch(FlowEvent::SourceEnded);
        while let Some(c) = flow.next_write() {
            written += c.len();
        }
        assert!(flow.take_end_signal());
        assert_eq!(written, 1_000_000);
    }

    #[test]
    fn test_gate_first_write() {
        let mut flow = FlowControl::new(FlowConfig {
            gate_first_write: true,
            ..config(10, 50, 1)
        });
        flow.dispatch(FlowEvent::Data(chunk(30, 0)));
        assert!(flow.next_write().is_none());
        flow.dispatch(FlowEvent::Data(chunk(30, 1)));
        assert_eq!(flow.state(), FlowState::Flowing);
        assert!(flow.next_write().is_some());
    }
}
