//! ffplay playback sink
//!
//! One `ffplay` process per session reads a single MP3 stream from stdin.
//! A writer task owns the child's stdin; the bounded channel in front of it is
//! the pipe buffer whose fullness is reported back as saturation.
//!
//! Env overrides (through `voxpipe_core::config`):
//! - FFPLAY_BIN

use crate::sink::{AudioSink, SinkFactory, SinkSignal};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use voxpipe_core::config::PlayerSettings;
use voxpipe_core::{Result, TtsError};

/// Fixed ffplay invocation: MP3 on stdin, no window, exit at end of stream,
/// errors only, small probesize for fast first audio, low-delay decode and an
/// unlimited input buffer.
const FFPLAY_ARGS: &[&str] = &[
    "-nodisp",
    "-autoexit",
    "-loglevel",
    "error",
    "-probesize",
    "32768",
    "-analyzeduration",
    "0",
    "-fflags",
    "nobuffer",
    "-flags",
    "low_delay",
    "-infbuf",
    "-f",
    "mp3",
    "-i",
    "pipe:0",
];

#[derive(Clone, Debug)]
pub struct PlayerConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Chunks buffered in front of stdin before writes report saturation
    pub pipe_capacity: usize,
}

impl PlayerConfig {
    /// ffplay at `program` with the fixed streaming flags
    pub fn ffplay(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: FFPLAY_ARGS.iter().map(|s| s.to_string()).collect(),
            pipe_capacity: 4,
        }
    }

    /// Any program reading the stream from stdin
    pub fn custom(program: impl Into<PathBuf>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|s| s.to_string()).collect(),
            pipe_capacity: 4,
        }
    }

    pub fn with_pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipe_capacity = capacity.max(1);
        self
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self::from(&PlayerSettings::default())
    }
}

impl From<&PlayerSettings> for PlayerConfig {
    fn from(settings: &PlayerSettings) -> Self {
        Self::ffplay(settings.program.clone()).with_pipe_capacity(settings.pipe_capacity)
    }
}

/// A running player process
pub struct PlayerProcess {
    program: String,
    child: Child,
    stdin_tx: Option<mpsc::Sender<Bytes>>,
    writer: Option<JoinHandle<()>>,
    status: Option<ExitStatus>,
    killed: bool,
}

impl PlayerProcess {
    /// Launch the player. A missing or non-executable program is a `Spawn` error.
    pub fn start(config: &PlayerConfig) -> Result<Self> {
        let program = config.program.to_string_lossy().to_string();
        let mut cmd = Command::new(&config.program);
        cmd.args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        debug!(target: "player", command = ?cmd, "Spawning player");
        let mut child = cmd.spawn().map_err(|source| {
            warn!(target: "player", program = %program, error = %source, "Failed to spawn player");
            TtsError::Spawn {
                program: program.clone(),
                source,
            }
        })?;

        let stdin = child.stdin.take().ok_or_else(|| TtsError::Spawn {
            program: program.clone(),
            source: std::io::Error::new(ErrorKind::BrokenPipe, "player stdin not captured"),
        })?;

        let (stdin_tx, stdin_rx) = mpsc::channel(config.pipe_capacity.max(1));
        let writer = tokio::spawn(pump_stdin(stdin, stdin_rx, program.clone()));

        info!(target: "player", program = %program, pid = ?child.id(), "Player started");

        Ok(Self {
            program,
            child,
            stdin_tx: Some(stdin_tx),
            writer: Some(writer),
            status: None,
            killed: false,
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Record the exit status and release the input side
    fn observe_exit(&mut self, status: ExitStatus) {
        self.status = Some(status);
        self.stdin_tx = None;
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        info!(target: "player", program = %self.program, code = ?status.code(), "Player exited");
    }
}

/// Copy queued chunks into the child's stdin until the session closes the channel
async fn pump_stdin(mut stdin: ChildStdin, mut rx: mpsc::Receiver<Bytes>, program: String) {
    while let Some(chunk) = rx.recv().await {
        if let Err(e) = stdin.write_all(&chunk).await {
            if e.kind() == ErrorKind::BrokenPipe {
                debug!(target: "player", program = %program, "Player closed its input early");
            } else {
                warn!(target: "player", program = %program, error = %e, "Error writing to player input");
            }
            // Keep accepting chunks so the session never blocks on a dead pipe;
            // the exit status decides the outcome.
            while rx.recv().await.is_some() {}
            return;
        }
    }
    if let Err(e) = stdin.shutdown().await {
        if e.kind() != ErrorKind::BrokenPipe {
            debug!(target: "player", program = %program, error = %e, "Error closing player input");
        }
    }
}

fn exit_outcome(status: ExitStatus, killed: bool) -> Result<()> {
    if status.success() {
        return Ok(());
    }
    match status.code() {
        Some(code) => Err(TtsError::Playback { code }),
        None if killed => Ok(()),
        None => signal_outcome(status),
    }
}

#[cfg(unix)]
fn signal_outcome(status: ExitStatus) -> Result<()> {
    use std::os::unix::process::ExitStatusExt;
    // SIGINT, SIGKILL, SIGPIPE, SIGTERM: torn down rather than failed
    const TEARDOWN_SIGNALS: [i32; 4] = [2, 9, 13, 15];
    match status.signal() {
        Some(sig) if TEARDOWN_SIGNALS.contains(&sig) => Ok(()),
        Some(sig) => Err(TtsError::Playback { code: 128 + sig }),
        None => Err(TtsError::Playback { code: -1 }),
    }
}

#[cfg(not(unix))]
fn signal_outcome(_status: ExitStatus) -> Result<()> {
    Ok(())
}

#[async_trait]
impl AudioSink for PlayerProcess {
    async fn write(&mut self, chunk: Bytes) -> bool {
        let Some(tx) = self.stdin_tx.as_ref() else {
            debug!(target: "player", "Write after input closed; dropping chunk");
            return false;
        };
        if tx.send(chunk).await.is_err() {
            debug!(target: "player", "Player input gone; dropping chunk");
            return false;
        }
        tx.capacity() == 0
    }

    async fn drained(&mut self) {
        if let Some(tx) = self.stdin_tx.as_ref() {
            // Capacity is handed back as soon as the permit drops
            let _ = tx.reserve().await;
        }
    }

    async fn next_signal(&mut self, drain: bool) -> SinkSignal {
        if let Some(status) = self.status {
            return SinkSignal::Exited(exit_outcome(status, self.killed));
        }
        let stdin_tx = self.stdin_tx.clone();
        let capacity = async move {
            match stdin_tx {
                Some(tx) => drop(tx.reserve().await),
                None => futures::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = capacity, if drain => SinkSignal::Drained,
            status = self.child.wait() => match status {
                Ok(status) => {
                    self.observe_exit(status);
                    SinkSignal::Exited(exit_outcome(status, self.killed))
                }
                Err(e) => SinkSignal::Exited(Err(e.into())),
            },
        }
    }

    async fn end(&mut self) {
        if self.stdin_tx.take().is_none() {
            debug!(target: "player", program = %self.program, "Player input already closed");
        }
    }

    async fn wait(&mut self) -> Result<()> {
        let status = match self.status {
            Some(status) => status,
            None => {
                let status = self.child.wait().await?;
                self.observe_exit(status);
                status
            }
        };
        exit_outcome(status, self.killed)
    }

    fn kill(&mut self) {
        if self.killed || self.status.is_some() {
            return;
        }
        if let Ok(Some(status)) = self.child.try_wait() {
            self.status = Some(status);
            return;
        }
        self.stdin_tx = None;
        match self.child.start_kill() {
            Ok(()) => {
                self.killed = true;
                debug!(target: "player", program = %self.program, "Player killed");
            }
            Err(e) => debug!(target: "player", program = %self.program, error = %e, "Kill failed"),
        }
    }
}

/// Production [`SinkFactory`]: one ffplay process per session
#[derive(Clone, Debug, Default)]
pub struct PlayerLauncher {
    config: PlayerConfig,
}

impl PlayerLauncher {
    pub fn new(config: PlayerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }
}

impl SinkFactory for PlayerLauncher {
    fn open(&self) -> Result<Box<dyn AudioSink>> {
        Ok(Box::new(PlayerProcess::start(&self.config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ffplay_flags() {
        let cfg = PlayerConfig::ffplay("ffplay");
        let args = cfg.args.join(" ");
        assert!(args.contains("-nodisp"));
        assert!(args.contains("-autoexit"));
        assert!(args.contains("-loglevel error"));
        assert!(args.contains("-probesize 32768"));
        assert!(args.contains("-f mp3"));
        assert!(args.ends_with("-i pipe:0"));
    }

    #[test]
    fn test_pipe_capacity_never_zero() {
        let cfg = PlayerConfig::custom("cat", &[]).with_pipe_capacity(0);
        assert_eq!(cfg.pipe_capacity, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_outcomes() {
        use std::os::unix::process::ExitStatusExt;
        assert!(exit_outcome(ExitStatus::from_raw(0), false).is_ok());
        // Exit code 1 is encoded in the high byte of the wait status
        assert!(matches!(
            exit_outcome(ExitStatus::from_raw(1 << 8), false),
            Err(TtsError::Playback { code: 1 })
        ));
        assert!(exit_outcome(ExitStatus::from_raw(9), true).is_ok());
        assert!(exit_outcome(ExitStatus::from_raw(15), false).is_ok());
        assert!(matches!(
            exit_outcome(ExitStatus::from_raw(11), false),
            Err(TtsError::Playback { code: 139 })
        ));
    }
}
