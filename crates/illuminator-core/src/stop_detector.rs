//! Detection of runs that should stop rather than carry on.

use illuminator_proto::{EscalationSink, Listener, ListenerError, Message};
use std::sync::Arc;
use tracing::warn;

/// The tool blocks on an interactive credential prompt and never recovers.
pub const PERMISSION_PROMPT: &str = "instruments: Instruments wants permission to analyze other processes. Please enter an administrator username and password to allow this.";

const PERMISSION_REASON: &str =
    "Instruments needs permission to analyze other processes.  Please run instruments manually to permit this.";

const TARGET_FAILED: &str = "Instruments Trace Error : Target failed to run:";

const TRACE_ERROR: &str = "instruments trace error";

/// Listener that asks for a stop on conditions a relaunch cannot fix.
pub struct StopDetector {
    sink: Arc<dyn EscalationSink>,
}

impl StopDetector {
    pub fn new(sink: Arc<dyn EscalationSink>) -> Self {
        Self { sink }
    }
}

impl Listener for StopDetector {
    fn name(&self) -> &str {
        "stop-detector"
    }

    fn receive(&mut self, message: &Message) -> Result<(), ListenerError> {
        if message.full_line().contains(PERMISSION_PROMPT) {
            warn!("Automation is waiting for an administrator password");
            self.sink.stop_detector_triggered(true, PERMISSION_REASON);
        }
        Ok(())
    }
}

/// Listener that turns trace errors into non-fatal stops.
///
/// A trace error before start-up usually means the launch itself went wrong
/// (app failed to install and so on), which the orchestrator retries.
pub struct TraceErrorDetector {
    sink: Arc<dyn EscalationSink>,
}

impl TraceErrorDetector {
    pub fn new(sink: Arc<dyn EscalationSink>) -> Self {
        Self { sink }
    }

    /// Human-readable cause of a trace error line, if it is one.
    pub fn describe(line: &str) -> Option<String> {
        let last_part = || line.rsplit(": ").next().unwrap_or(line);
        if line.contains(&format!("{TARGET_FAILED} Unable to install app with path:")) {
            Some(format!("Failed to install app because {}", last_part()))
        } else if line.contains(&format!("{TARGET_FAILED} The operation couldn’t be completed")) {
            Some(format!(
                "An operation couldn't be completed because {}",
                last_part()
            ))
        } else if line.to_ascii_lowercase().contains(TRACE_ERROR) {
            Some(line.split(" : ").skip(1).collect())
        } else {
            None
        }
    }
}

impl Listener for TraceErrorDetector {
    fn name(&self) -> &str {
        "trace-error-detector"
    }

    fn receive(&mut self, message: &Message) -> Result<(), ListenerError> {
        if let Some(reason) = Self::describe(message.full_line()) {
            warn!(reason = %reason, "Trace error reported");
            self.sink.stop_detector_triggered(false, &reason);
        }
        Ok(())
    }
}
