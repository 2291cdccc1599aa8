//! Escalation sink that remembers every signal.

use illuminator_proto::{EscalationSink, Signal};
use std::sync::Mutex;

/// Collects signals instead of forwarding them to a dispatcher.
#[derive(Debug, Default)]
pub struct RecordingSink {
    signals: Mutex<Vec<Signal>>,
}

impl RecordingSink {
    /// Every signal received so far, in order.
    pub fn signals(&self) -> Vec<Signal> {
        self.signals.lock().unwrap().clone()
    }

    /// Reasons of the received signals, skipping `Started`.
    pub fn reasons(&self) -> Vec<String> {
        self.signals()
            .iter()
            .filter(|signal| signal.ends_run())
            .map(|signal| signal.reason().to_string())
            .collect()
    }
}

impl EscalationSink for RecordingSink {
    fn signal(&self, signal: Signal) {
        self.signals.lock().unwrap().push(signal);
    }
}
