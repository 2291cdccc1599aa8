//! Escalation contract between listeners and the run orchestrator.
//!
//! A listener never owns the orchestrator. It is handed an [`EscalationSender`]
//! at construction and reports [`Signal`]s through it; the dispatcher drains
//! the matching [`EscalationReceiver`] after every delivery and stamps each
//! report with the listener name and run number.

use std::fmt;
use tokio::sync::mpsc;

/// What a listener can tell the orchestrator about the current run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// The run hit a transient failure; a fresh launch should fix it.
    Restart { reason: String },
    /// The automation is fully up. Silence is tolerated from here on.
    Started,
    /// The run should stop. `fatal` means relaunching will not help.
    Stop { fatal: bool, reason: String },
}

impl Signal {
    /// The human-readable cause, empty for [`Signal::Started`].
    pub fn reason(&self) -> &str {
        match self {
            Self::Restart { reason } | Self::Stop { reason, .. } => reason,
            Self::Started => "",
        }
    }

    /// True for signals that end the run early.
    pub fn ends_run(&self) -> bool {
        !matches!(self, Self::Started)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Restart { reason } => write!(f, "restart requested: {reason}"),
            Self::Started => write!(f, "started"),
            Self::Stop {
                fatal: true,
                reason,
            } => write!(f, "fatal stop: {reason}"),
            Self::Stop {
                fatal: false,
                reason,
            } => write!(f, "stop: {reason}"),
        }
    }
}

/// Receiver side of the listener-to-orchestrator signal.
pub trait EscalationSink: Send + Sync {
    /// Delivers one signal.
    fn signal(&self, signal: Signal);

    /// Reports that the current run hit a known transient failure.
    fn intermittent_failure_detector_triggered(&self, reason: &str) {
        self.signal(Signal::Restart {
            reason: reason.to_string(),
        });
    }

    /// Reports that the automation finished starting up.
    fn start_detector_triggered(&self) {
        self.signal(Signal::Started);
    }

    /// Reports that the run must stop.
    fn stop_detector_triggered(&self, fatal: bool, reason: &str) {
        self.signal(Signal::Stop {
            fatal,
            reason: reason.to_string(),
        });
    }
}

/// A signal observed during dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Escalation {
    /// The listener that raised it.
    pub listener: String,
    /// What was raised.
    pub signal: Signal,
    /// The run it was raised in.
    pub run: u32,
}

impl Escalation {
    /// Shorthand for `self.signal.reason()`.
    pub fn reason(&self) -> &str {
        self.signal.reason()
    }
}

impl fmt::Display for Escalation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run {} {} by {}", self.run, self.signal, self.listener)
    }
}

/// Cloneable sending half handed to listeners.
#[derive(Debug, Clone)]
pub struct EscalationSender {
    tx: mpsc::UnboundedSender<Signal>,
}

impl EscalationSink for EscalationSender {
    fn signal(&self, signal: Signal) {
        // The receiver lives as long as the dispatcher; a closed channel
        // only happens during teardown, when nobody is left to act on it.
        if let Err(e) = self.tx.send(signal) {
            tracing::debug!(signal = %e.0, "Signal dropped, receiver closed");
        }
    }
}

/// Receiving half owned by the dispatcher.
#[derive(Debug)]
pub struct EscalationReceiver {
    rx: mpsc::UnboundedReceiver<Signal>,
}

impl EscalationReceiver {
    /// Takes every pending signal without waiting.
    pub fn drain(&mut self) -> Vec<Signal> {
        let mut signals = Vec::new();
        while let Ok(signal) = self.rx.try_recv() {
            signals.push(signal);
        }
        signals
    }
}

/// Creates a connected sender/receiver pair.
pub fn escalation_channel() -> (EscalationSender, EscalationReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EscalationSender { tx }, EscalationReceiver { rx })
}
