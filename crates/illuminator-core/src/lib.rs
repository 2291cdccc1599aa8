//! # illuminator-core
//!
//! Core log pipeline for Illuminator UI automation runs.
//!
//! This crate provides:
//! - Line assembly from raw subprocess output, with saltinel framing
//! - Ordered, failure-isolating dispatch to listeners
//! - The console logger, the failure, start, stop and trace error detectors,
//!   and the saltinel agent
//! - Run supervision: restart on escalation or a stalled start-up, stop on
//!   fatal conditions, bounded by attempts
//! - YAML configuration and tracing setup

mod assembler;
mod config;
mod console_logger;
mod detector;
mod dispatcher;
mod full_output;
pub mod logging;
mod pipeline;
mod saltinel;
mod saltinel_agent;
mod start_detector;
mod stop_detector;
mod supervisor;
pub mod testing;

pub use assembler::LineAssembler;
pub use config::{
    ConfigError, DEFAULT_SALTINEL, PipelineConfig, SaltinelMarkers, SignatureConfig,
};
pub use console_logger::{ConsoleLogger, console_log_path};
pub use detector::{FailureSignature, IntermittentFailureDetector, TARGET_GONE_AWOL};
pub use dispatcher::{Dispatcher, FinishError, ListenerFailure, StartError};
pub use full_output::FullOutput;
pub use pipeline::Pipeline;
pub use saltinel::{FramerState, SaltinelFramer, SaltinelHandler, SaltinelListener};
pub use saltinel_agent::{AgentFindings, AgentReport, RESTART_REQUESTED, SaltinelAgent};
pub use start_detector::StartDetector;
pub use stop_detector::{PERMISSION_PROMPT, StopDetector, TraceErrorDetector};
pub use supervisor::{
    AutomationLauncher, LaunchedRun, RunHandle, RunOutcome, RunSupervisor, SupervisorError,
    SupervisorOutcome, SupervisorReport, Termination,
};

pub use illuminator_proto::{
    Escalation, EscalationSender, EscalationSink, Frame, Listener, ListenerError, Message, Signal,
};
