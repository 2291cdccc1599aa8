//! Launches the automation as a child process.
//!
//! Stdout and stderr are both piped and merged into one output stream, so the
//! log pipeline sees them interleaved roughly as the process wrote them.
//! Each pipe is cut at line boundaries before merging, so a line written in
//! pieces to one pipe is not split by output from the other. A trailing
//! partial line (such as a prompt) is forwarded once its pipe goes quiet.

use async_trait::async_trait;
use illuminator_core::{AutomationLauncher, LaunchedRun, RunHandle};
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

#[cfg(unix)]
use nix::sys::signal::{Signal, kill};
#[cfg(unix)]
use nix::unistd::Pid;

/// Environment variable carrying the 1-based run number to the child.
pub const RUN_ENV: &str = "ILLUMINATOR_RUN";

const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);
const CHUNK_SIZE: usize = 4096;
const CHANNEL_CAPACITY: usize = 64;
/// How long a partial line may wait for the rest of it.
const PARTIAL_LINE_WAIT: Duration = Duration::from_millis(50);
/// A partial line longer than this is forwarded without waiting.
const MAX_PARTIAL_LINE: usize = 64 * 1024;

/// Errors raised while starting the child process.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Child process has no {0} pipe")]
    MissingPipe(&'static str),
}

/// Spawns a fixed command line for every run.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: OsString,
    args: Vec<OsString>,
    current_dir: Option<PathBuf>,
    env: Vec<(OsString, OsString)>,
    grace_period: Duration,
}

impl CommandLauncher {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            env: Vec::new(),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// How long a terminated process gets between SIGTERM and SIGKILL.
    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    fn spawn(&self, run: u32) -> Result<CommandRun, LaunchError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .env(RUN_ENV, run.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| LaunchError::Spawn {
            program: self.program.to_string_lossy().into_owned(),
            source,
        })?;
        let stdout = child.stdout.take().ok_or(LaunchError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(LaunchError::MissingPipe("stderr"))?;
        debug!(pid = ?child.id(), run, "Spawned automation");

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let readers = vec![
            tokio::spawn(pump("stdout", stdout, tx.clone())),
            tokio::spawn(pump("stderr", stderr, tx)),
        ];

        Ok(CommandRun {
            output: MergedOutput {
                rx,
                pending: Vec::new(),
                offset: 0,
            },
            handle: CommandHandle {
                child,
                grace_period: self.grace_period,
                readers,
            },
        })
    }
}

struct CommandRun {
    output: MergedOutput,
    handle: CommandHandle,
}

#[async_trait]
impl AutomationLauncher for CommandLauncher {
    async fn launch(&mut self, run: u32) -> anyhow::Result<LaunchedRun> {
        let CommandRun { output, handle } = self.spawn(run)?;
        Ok(LaunchedRun {
            output: Box::pin(output),
            handle: Box::new(handle),
        })
    }
}

/// Forwards one pipe into the merged channel until EOF, whole lines at a time.
async fn pump<R>(stream: &'static str, mut reader: R, tx: mpsc::Sender<Vec<u8>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut partial = Vec::new();
    loop {
        let read = if partial.is_empty() {
            reader.read(&mut buf).await
        } else {
            match tokio::time::timeout(PARTIAL_LINE_WAIT, reader.read(&mut buf)).await {
                Ok(read) => read,
                Err(_) => {
                    if tx.send(std::mem::take(&mut partial)).await.is_err() {
                        break;
                    }
                    continue;
                }
            }
        };
        match read {
            Ok(0) => break,
            Ok(n) => {
                partial.extend_from_slice(&buf[..n]);
                let ready = match partial.iter().rposition(|&b| b == b'\n') {
                    Some(end) => partial.drain(..=end).collect(),
                    None if partial.len() >= MAX_PARTIAL_LINE => std::mem::take(&mut partial),
                    None => continue,
                };
                if tx.send(ready).await.is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                debug!(stream, error = %e, "Output pipe read failed");
                break;
            }
        }
    }
    if !partial.is_empty() {
        // The receiver may already be gone, in which case nobody wants it.
        let _ = tx.send(partial).await;
    }
    debug!(stream, "Output pipe closed");
}

/// Reader over the chunks both pipes forward. Ends once both pipes close.
struct MergedOutput {
    rx: mpsc::Receiver<Vec<u8>>,
    pending: Vec<u8>,
    offset: usize,
}

impl AsyncRead for MergedOutput {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.offset >= this.pending.len() {
            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => {
                    this.pending = chunk;
                    this.offset = 0;
                }
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
        let rest = &this.pending[this.offset..];
        let n = rest.len().min(buf.remaining());
        buf.put_slice(&rest[..n]);
        this.offset += n;
        Poll::Ready(Ok(()))
    }
}

/// Control over a spawned automation process.
struct CommandHandle {
    child: Child,
    grace_period: Duration,
    readers: Vec<JoinHandle<()>>,
}

#[async_trait]
impl RunHandle for CommandHandle {
    async fn terminate(&mut self) -> anyhow::Result<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        self.terminate_child().await?;
        Ok(())
    }

    async fn wait(&mut self) -> anyhow::Result<Option<i32>> {
        let status = self.child.wait().await?;
        debug!(?status, "Automation exited");
        Ok(status.code())
    }
}

impl CommandHandle {
    #[cfg(unix)]
    async fn terminate_child(&mut self) -> io::Result<()> {
        let Some(id) = self.child.id() else {
            return Ok(());
        };
        let pid = Pid::from_raw(id as i32);

        debug!(%pid, "Sending SIGTERM");
        if kill(pid, Signal::SIGTERM).is_ok()
            && tokio::time::timeout(self.grace_period, self.child.wait())
                .await
                .is_ok()
        {
            return Ok(());
        }

        debug!(%pid, "Grace period expired, sending SIGKILL");
        self.child.kill().await
    }

    #[cfg(not(unix))]
    async fn terminate_child(&mut self) -> io::Result<()> {
        self.child.kill().await
    }
}

impl Drop for CommandHandle {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
    }
}
