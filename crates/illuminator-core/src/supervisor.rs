//! Run supervision.
//!
//! The supervisor launches the automation, pumps its output through the
//! pipeline and decides what happens when something goes wrong. A restart
//! request, or silence before the automation has reported that it started,
//! terminates the process and starts a fresh run, up to `max_attempts`
//! launches. A fatal stop ends the loop at once; a non-fatal one is retried
//! only if the run never started. A run that reaches end of output ends the
//! loop whatever its exit code.

use crate::config::{ConfigError, PipelineConfig};
use crate::dispatcher::StartError;
use crate::pipeline::Pipeline;
use async_trait::async_trait;
use illuminator_proto::{Escalation, Signal};
use std::fmt;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// A launched automation process.
pub struct LaunchedRun {
    /// Combined output of the process.
    pub output: Pin<Box<dyn AsyncRead + Send>>,
    /// Control over the process.
    pub handle: Box<dyn RunHandle>,
}

impl fmt::Debug for LaunchedRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchedRun").finish_non_exhaustive()
    }
}

/// Control over one launched process.
#[async_trait]
pub trait RunHandle: Send {
    /// Stops the process. Must be safe to call on a process that already exited.
    async fn terminate(&mut self) -> anyhow::Result<()>;

    /// Waits for the process to exit and returns its exit code, if it has one.
    async fn wait(&mut self) -> anyhow::Result<Option<i32>>;
}

/// Starts the automation under test.
#[async_trait]
pub trait AutomationLauncher: Send {
    /// Launches attempt number `run` (1-based).
    async fn launch(&mut self, run: u32) -> anyhow::Result<LaunchedRun>;
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Output ended on its own.
    Natural { exit_code: Option<i32> },
    /// A listener asked for a restart.
    Escalated { reason: String },
    /// A listener asked for the run to stop.
    Stopped { fatal: bool, reason: String },
    /// No output arrived within the idle timeout before start-up completed.
    IdleTimeout,
}

impl Termination {
    /// The termination an ending signal calls for, `None` for `Started`.
    pub fn from_signal(signal: &Signal) -> Option<Self> {
        match signal {
            Signal::Restart { reason } => Some(Self::Escalated {
                reason: reason.clone(),
            }),
            Signal::Stop { fatal, reason } => Some(Self::Stopped {
                fatal: *fatal,
                reason: reason.clone(),
            }),
            Signal::Started => None,
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Natural {
                exit_code: Some(code),
            } => write!(f, "exited with code {code}"),
            Self::Natural { exit_code: None } => write!(f, "exited without a code"),
            Self::Escalated { reason } => write!(f, "escalated: {reason}"),
            Self::Stopped {
                fatal: true,
                reason,
            } => write!(f, "stopped (fatal): {reason}"),
            Self::Stopped {
                fatal: false,
                reason,
            } => write!(f, "stopped: {reason}"),
            Self::IdleTimeout => write!(f, "idle timeout"),
        }
    }
}

/// Summary of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub run: u32,
    pub termination: Termination,
    /// True if a listener reported that the automation started.
    pub started: bool,
    /// Every escalation observed during the run, `Started` included.
    pub escalations: Vec<Escalation>,
}

impl RunOutcome {
    /// True if this run calls for another attempt.
    pub fn wants_restart(&self) -> bool {
        match &self.termination {
            Termination::Natural { .. } => false,
            Termination::Escalated { .. } | Termination::IdleTimeout => true,
            Termination::Stopped { fatal, .. } => !fatal && !self.started,
        }
    }
}

/// Overall result of supervision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorOutcome {
    /// The last run ended naturally.
    Completed,
    /// A listener stopped the run and relaunching would not help.
    Stopped,
    /// Every allowed attempt asked for a restart.
    RetriesExhausted,
}

/// Everything the supervisor observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorReport {
    pub runs: Vec<RunOutcome>,
    pub outcome: SupervisorOutcome,
}

impl SupervisorReport {
    /// True if the automation eventually ran to completion.
    pub fn is_completed(&self) -> bool {
        self.outcome == SupervisorOutcome::Completed
    }

    /// The final run, if any run happened.
    pub fn last_run(&self) -> Option<&RunOutcome> {
        self.runs.last()
    }
}

/// Errors that stop supervision altogether.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Start(#[from] StartError),

    #[error("Failed to launch run {run}: {source}")]
    Launch {
        run: u32,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Failed to read output of run {run}: {source}")]
    Read {
        run: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed waiting for run {run} to exit: {source}")]
    Wait {
        run: u32,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Drives launches of the automation through a [`Pipeline`].
pub struct RunSupervisor<L> {
    pipeline: Pipeline,
    launcher: L,
    max_attempts: u32,
    idle_timeout: Option<Duration>,
}

impl<L: AutomationLauncher> RunSupervisor<L> {
    /// Creates a supervisor with the default attempt limit and idle timeout.
    pub fn new(pipeline: Pipeline, launcher: L) -> Self {
        let defaults = PipelineConfig::default();
        Self {
            pipeline,
            launcher,
            max_attempts: defaults.max_attempts,
            idle_timeout: defaults.idle_timeout(),
        }
    }

    /// Builds the standard pipeline and limits from a configuration.
    pub fn from_config(config: &PipelineConfig, launcher: L) -> Result<Self, ConfigError> {
        let pipeline = Pipeline::from_config(config)?;
        Ok(Self::new(pipeline, launcher)
            .with_max_attempts(config.max_attempts)
            .with_idle_timeout(config.idle_timeout()))
    }

    /// Sets the total number of launches, first one included. Zero means one.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Sets how long a run may stay silent before it has started. `None`
    /// disables the check.
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// The pipeline, for registering extra listeners.
    pub fn pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.pipeline
    }

    /// The launcher.
    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Launches until a run ends naturally or attempts run out.
    pub async fn run(&mut self) -> Result<SupervisorReport, SupervisorError> {
        let mut runs = Vec::new();

        for attempt in 1..=self.max_attempts {
            let run = self.pipeline.start()?;
            info!(run, attempt, max_attempts = self.max_attempts, "Launching automation");

            let result = self.drive(run).await;
            if let Err(e) = self.pipeline.finish() {
                warn!("{e}");
            }
            let outcome = result?;

            info!(run, termination = %outcome.termination, "Run ended");
            let restart = outcome.wants_restart();
            let stopped = matches!(outcome.termination, Termination::Stopped { .. });
            runs.push(outcome);
            if !restart {
                return Ok(SupervisorReport {
                    runs,
                    outcome: if stopped {
                        SupervisorOutcome::Stopped
                    } else {
                        SupervisorOutcome::Completed
                    },
                });
            }
        }

        warn!(max_attempts = self.max_attempts, "Giving up, every attempt was restarted");
        Ok(SupervisorReport {
            runs,
            outcome: SupervisorOutcome::RetriesExhausted,
        })
    }

    /// Runs one launch to its end.
    async fn drive(&mut self, run: u32) -> Result<RunOutcome, SupervisorError> {
        let LaunchedRun {
            mut output,
            mut handle,
        } = self
            .launcher
            .launch(run)
            .await
            .map_err(|e| SupervisorError::Launch {
                run,
                source: e.into(),
            })?;

        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut escalations = Vec::new();
        let mut started = false;

        loop {
            // Once the automation is up, long quiet stretches are normal.
            let limit = self.idle_timeout.filter(|_| !started);
            let read = match limit {
                Some(limit) => match tokio::time::timeout(limit, output.read(&mut buf)).await {
                    Ok(read) => read,
                    Err(_) => {
                        warn!(run, timeout_secs = limit.as_secs_f64(), "Start-up timeout triggered");
                        escalations.extend(self.pipeline.end_of_stream());
                        terminate(run, handle.as_mut()).await;
                        return Ok(RunOutcome {
                            run,
                            termination: Termination::IdleTimeout,
                            started,
                            escalations,
                        });
                    }
                },
                None => output.read(&mut buf).await,
            };

            let n = match read {
                Ok(n) => n,
                Err(source) => {
                    terminate(run, handle.as_mut()).await;
                    return Err(SupervisorError::Read { run, source });
                }
            };
            if n == 0 {
                debug!(run, "Output closed");
                break;
            }

            let raised = self.pipeline.feed(&buf[..n]);
            let seen = escalations.len();
            escalations.extend(raised);
            started |= note_start(run, &escalations[seen..]);
            if let Some((first, termination)) = first_ending(&escalations[seen..]) {
                warn!(run, listener = %first.listener, signal = %first.signal, "Ending run");
                // Whatever is still buffered belongs to this run's log.
                escalations.extend(self.pipeline.end_of_stream());
                terminate(run, handle.as_mut()).await;
                return Ok(RunOutcome {
                    run,
                    termination,
                    started,
                    escalations,
                });
            }
        }

        let seen = escalations.len();
        escalations.extend(self.pipeline.end_of_stream());
        started |= note_start(run, &escalations[seen..]);
        let exit_code = handle.wait().await.map_err(|e| SupervisorError::Wait {
            run,
            source: e.into(),
        })?;

        // The process is already gone, but a failure spotted in its last
        // lines still means the run is not trustworthy.
        let termination = match first_ending(&escalations) {
            Some((_, termination)) => termination,
            None => Termination::Natural { exit_code },
        };
        Ok(RunOutcome {
            run,
            termination,
            started,
            escalations,
        })
    }
}

/// True if any of the escalations reports a start.
fn note_start(run: u32, escalations: &[Escalation]) -> bool {
    let started = escalations.iter().any(|e| e.signal == Signal::Started);
    if started {
        info!(run, "Automation reported start, start-up timeout disarmed");
    }
    started
}

/// The first escalation that ends the run, with the matching termination.
fn first_ending(escalations: &[Escalation]) -> Option<(&Escalation, Termination)> {
    escalations
        .iter()
        .find_map(|e| Termination::from_signal(&e.signal).map(|t| (e, t)))
}

async fn terminate(run: u32, handle: &mut dyn RunHandle) {
    if let Err(e) = handle.terminate().await {
        warn!(run, error = %e, "Failed to terminate automation");
    }
}
