//! In-memory automation launcher for deterministic supervisor tests.

use crate::supervisor::{AutomationLauncher, LaunchedRun, RunHandle};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::time::Sleep;

#[derive(Debug, Clone)]
enum Step {
    Data(Vec<u8>),
    Pause(Duration),
}

/// Output and exit behaviour of one scripted run.
#[derive(Debug, Clone, Default)]
pub struct RunScript {
    steps: Vec<Step>,
    stall: bool,
    exit_code: Option<i32>,
}

impl RunScript {
    pub fn new() -> Self {
        Self {
            exit_code: Some(0),
            ..Self::default()
        }
    }

    /// Appends a raw output chunk, delivered by a single read.
    pub fn chunk(mut self, bytes: impl AsRef<[u8]>) -> Self {
        self.steps.push(Step::Data(bytes.as_ref().to_vec()));
        self
    }

    /// Stays silent for `duration` before the next chunk.
    pub fn pause(mut self, duration: Duration) -> Self {
        self.steps.push(Step::Pause(duration));
        self
    }

    /// Appends one line, newline included, as its own chunk.
    pub fn line(self, line: &str) -> Self {
        self.chunk(format!("{line}\n"))
    }

    /// Keeps the output open and silent after the last chunk.
    pub fn stall(mut self) -> Self {
        self.stall = true;
        self
    }

    /// Exit code reported when the run ends on its own.
    pub fn exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }
}

#[derive(Debug, Default)]
struct LaunchState {
    scripts: VecDeque<RunScript>,
    launched: Vec<u32>,
    terminated: Vec<u32>,
}

/// Launcher that plays back one [`RunScript`] per launch.
///
/// Clones share state, so a test can keep one to inspect what happened.
#[derive(Debug, Clone, Default)]
pub struct ScriptedLauncher {
    state: Arc<Mutex<LaunchState>>,
}

impl ScriptedLauncher {
    pub fn new(scripts: Vec<RunScript>) -> Self {
        Self {
            state: Arc::new(Mutex::new(LaunchState {
                scripts: scripts.into(),
                ..LaunchState::default()
            })),
        }
    }

    /// Run numbers passed to `launch`, in order.
    pub fn launched(&self) -> Vec<u32> {
        self.state.lock().unwrap().launched.clone()
    }

    /// Runs that were terminated by the supervisor.
    pub fn terminated(&self) -> Vec<u32> {
        self.state.lock().unwrap().terminated.clone()
    }
}

#[async_trait]
impl AutomationLauncher for ScriptedLauncher {
    async fn launch(&mut self, run: u32) -> anyhow::Result<LaunchedRun> {
        let script = {
            let mut state = self.state.lock().unwrap();
            state.launched.push(run);
            state.scripts.pop_front()
        };
        let script = script.ok_or_else(|| anyhow::anyhow!("no scripted output left for run {run}"))?;

        Ok(LaunchedRun {
            output: Box::pin(ScriptedOutput {
                steps: script.steps.into(),
                stall: script.stall,
                sleep: None,
            }),
            handle: Box::new(ScriptedHandle {
                run,
                exit_code: script.exit_code,
                terminated: false,
                state: Arc::clone(&self.state),
            }),
        })
    }
}

struct ScriptedOutput {
    steps: VecDeque<Step>,
    stall: bool,
    // Kept across reads so a cancelled read does not restart the pause.
    sleep: Option<Pin<Box<Sleep>>>,
}

impl AsyncRead for ScriptedOutput {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            match this.steps.front_mut() {
                Some(Step::Data(chunk)) => {
                    let n = chunk.len().min(buf.remaining());
                    buf.put_slice(&chunk[..n]);
                    chunk.drain(..n);
                    if chunk.is_empty() {
                        this.steps.pop_front();
                    }
                    return Poll::Ready(Ok(()));
                }
                Some(Step::Pause(duration)) => {
                    let duration = *duration;
                    let sleep = this
                        .sleep
                        .get_or_insert_with(|| Box::pin(tokio::time::sleep(duration)));
                    if Pin::as_mut(sleep).poll(cx).is_pending() {
                        return Poll::Pending;
                    }
                    this.sleep = None;
                    this.steps.pop_front();
                }
                // Never woken: only a timeout gets the reader out of here.
                None if this.stall => return Poll::Pending,
                None => return Poll::Ready(Ok(())),
            }
        }
    }
}

struct ScriptedHandle {
    run: u32,
    exit_code: Option<i32>,
    terminated: bool,
    state: Arc<Mutex<LaunchState>>,
}

#[async_trait]
impl RunHandle for ScriptedHandle {
    async fn terminate(&mut self) -> anyhow::Result<()> {
        if !self.terminated {
            self.terminated = true;
            self.state.lock().unwrap().terminated.push(self.run);
        }
        Ok(())
    }

    async fn wait(&mut self) -> anyhow::Result<Option<i32>> {
        Ok(if self.terminated { None } else { self.exit_code })
    }
}
