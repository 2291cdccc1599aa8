//! Start-up detection.
//!
//! Until the automation reports that it is up, a silent run is presumed hung.
//! The start detector spots the first sign of life and tells the
//! orchestrator, which then stops applying the start-up timeout.

use crate::saltinel::{SaltinelHandler, SaltinelListener};
use illuminator_proto::{EscalationSink, ListenerError, Message};
use std::sync::Arc;
use tracing::info;

/// Inner block contents that mean the harness is running scenarios.
const START_MARKERS: [&str; 2] = ["Saved intended test list to", "Successful launch"];

/// A script error still means the automation got far enough to run it.
const UNCAUGHT_SCRIPT_ERROR: &str = "Script threw an uncaught JavaScript error:";

const USAGE_ERROR: &str = "Instruments Usage Error :";
const DEVICE_BOOT_TIMEOUT: &str = "Instruments Usage Error : Timed out waiting for device to boot:";

/// Saltinel handler that signals `Started` once per run.
pub struct StartDetector {
    sink: Arc<dyn EscalationSink>,
    already_started: bool,
}

impl StartDetector {
    pub fn new(sink: Arc<dyn EscalationSink>) -> Self {
        Self {
            sink,
            already_started: false,
        }
    }

    /// Wraps the detector so it can be registered as a listener.
    pub fn into_listener(self) -> SaltinelListener<Self> {
        SaltinelListener::new(self)
    }

    /// True once this run has been reported as started.
    pub fn has_started(&self) -> bool {
        self.already_started
    }

    fn trigger(&mut self, cause: &str) {
        if !self.already_started {
            self.already_started = true;
            info!(cause, "Automation started");
            self.sink.start_detector_triggered();
        }
    }
}

impl SaltinelHandler for StartDetector {
    fn name(&self) -> &str {
        "start-detector"
    }

    fn on_init(&mut self) -> Result<(), ListenerError> {
        self.already_started = false;
        Ok(())
    }

    fn on_saltinel(&mut self, inner: &Message) -> Result<(), ListenerError> {
        let line = inner.full_line();
        if let Some(marker) = START_MARKERS.iter().find(|m| line.contains(*m)) {
            self.trigger(marker);
        }
        Ok(())
    }

    // Errors a relaunch cannot fix still count as a start, so the run is
    // not retried because of them.
    fn on_unframed(&mut self, message: &Message) -> Result<(), ListenerError> {
        let line = message.full_line();
        if line.contains(UNCAUGHT_SCRIPT_ERROR) {
            self.trigger("uncaught script error");
        } else if line.starts_with(USAGE_ERROR) && !line.starts_with(DEVICE_BOOT_TIMEOUT) {
            self.trigger("usage error");
        }
        Ok(())
    }
}
