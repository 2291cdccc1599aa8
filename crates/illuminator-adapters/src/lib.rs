//! # illuminator-adapters
//!
//! Process adapters for the Illuminator log pipeline.
//!
//! [`CommandLauncher`] implements the core `AutomationLauncher` trait by
//! spawning the automation tool as a child process. Its stdout and stderr are
//! merged into the single output stream the pipeline consumes, and a run that
//! must be restarted is stopped with SIGTERM, then SIGKILL once the grace
//! period runs out.

mod command_launcher;

pub use command_launcher::{CommandLauncher, LaunchError, RUN_ENV};
