//! Handler for the structured messages the automation harness emits inside
//! saltinel blocks.
//!
//! The harness announces where it saved its scenario list and definitions,
//! flags stack traces, and can ask for its own relaunch. Paths and hints are
//! collected in [`AgentFindings`], which the host keeps a clone of. Restart
//! requests go to the orchestrator as a `Restart` signal.

use crate::saltinel::{SaltinelHandler, SaltinelListener};
use illuminator_proto::{EscalationSink, ListenerError, Message};
use regex::Regex;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Reason reported when the harness asks to be relaunched.
pub const RESTART_REQUESTED: &str = "Automation requested a restart";

/// What the harness reported during the current run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentReport {
    /// Where the harness saved the scenarios it intends to run.
    pub scenario_list: Option<PathBuf>,
    /// Where the harness saved the scenario definitions.
    pub scenario_definitions: Option<PathBuf>,
    /// How many stack trace announcements were seen.
    pub stacktrace_hints: usize,
    /// True if the harness asked for a relaunch.
    pub restart_requested: bool,
}

/// Shared view of the agent's report. Clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct AgentFindings {
    report: Arc<Mutex<AgentReport>>,
}

impl AgentFindings {
    /// Copy of the report for the current (or last) run.
    pub fn snapshot(&self) -> AgentReport {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, AgentReport> {
        // The report is plain data, so a poisoned lock still holds a usable value.
        self.report.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Saltinel handler that recognizes harness messages.
pub struct SaltinelAgent {
    sink: Arc<dyn EscalationSink>,
    findings: AgentFindings,
    test_list: Regex,
    test_definitions: Regex,
}

impl SaltinelAgent {
    pub fn new(sink: Arc<dyn EscalationSink>) -> Result<Self, regex::Error> {
        Ok(Self {
            sink,
            findings: AgentFindings::default(),
            test_list: Regex::new(r"Saved intended test list to: (.*)")?,
            test_definitions: Regex::new(r"Saved scenario definitions to: (.*)")?,
        })
    }

    /// Handle for reading what the harness reported.
    pub fn findings(&self) -> AgentFindings {
        self.findings.clone()
    }

    /// Wraps the agent so it can be registered as a listener.
    pub fn into_listener(self) -> SaltinelListener<Self> {
        SaltinelListener::new(self)
    }

    fn captured_path(regex: &Regex, text: &str) -> Option<PathBuf> {
        regex
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| PathBuf::from(m.as_str()))
    }
}

impl SaltinelHandler for SaltinelAgent {
    fn name(&self) -> &str {
        "saltinel-agent"
    }

    fn on_init(&mut self) -> Result<(), ListenerError> {
        *self.findings.lock() = AgentReport::default();
        Ok(())
    }

    fn on_saltinel(&mut self, inner: &Message) -> Result<(), ListenerError> {
        let text = inner.full_line();
        let mut request_restart = false;
        {
            let mut report = self.findings.lock();
            if let Some(path) = Self::captured_path(&self.test_list, text) {
                debug!(path = %path.display(), "Harness saved its scenario list");
                report.scenario_list = Some(path);
            }
            if let Some(path) = Self::captured_path(&self.test_definitions, text) {
                debug!(path = %path.display(), "Harness saved its scenario definitions");
                report.scenario_definitions = Some(path);
            }
            if text.contains("Stack trace follows:") {
                report.stacktrace_hints += 1;
            }
            if text.contains("Request instruments restart") && !report.restart_requested {
                report.restart_requested = true;
                request_restart = true;
            }
        }

        if request_restart {
            info!("Harness asked for a relaunch");
            self.sink.intermittent_failure_detector_triggered(RESTART_REQUESTED);
        }
        Ok(())
    }
}
