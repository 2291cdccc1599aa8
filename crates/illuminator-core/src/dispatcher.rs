//! Listener registry and fan-out.
//!
//! The dispatcher owns an ordered set of listeners and drives them through the
//! per-run lifecycle. Delivery is synchronous and sequential: for a given
//! message every listener runs to completion, in registration order, before
//! the next message is looked at.
//!
//! Failure handling per phase:
//! - `on_init` errors are fatal to the run start.
//! - `receive` errors and panics kill only the offending listener, for the
//!   rest of the run.
//! - `on_automation_finished` errors are collected and returned together.
//!   Listeners isolated during the run still get this call so they can
//!   release what they hold, but their teardown errors are only logged.

use illuminator_proto::{
    Escalation, EscalationReceiver, EscalationSender, Listener, ListenerError, Message,
    escalation_channel,
};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Longest message excerpt included in warnings.
const PREVIEW_CHARS: usize = 80;

/// A listener refused to start, so the run cannot start.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("Listener '{listener}' failed to initialize for run {run}: {source}")]
    ListenerInit {
        listener: String,
        run: u32,
        #[source]
        source: ListenerError,
    },
}

/// One listener's teardown failure.
#[derive(Debug)]
pub struct ListenerFailure {
    pub listener: String,
    pub error: ListenerError,
}

/// Every teardown failure of a run.
#[derive(Debug, Error)]
#[error("{} listener(s) failed to finish run {run}: {}", .failures.len(), summarize(.failures))]
pub struct FinishError {
    pub run: u32,
    pub failures: Vec<ListenerFailure>,
}

fn summarize(failures: &[ListenerFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.listener, f.error))
        .collect::<Vec<_>>()
        .join(", ")
}

struct Slot {
    listener: Box<dyn Listener>,
    alive: bool,
}

/// Ordered fan-out of messages to listeners.
pub struct Dispatcher {
    slots: Vec<Slot>,
    run: u32,
    running: bool,
    escalation_tx: EscalationSender,
    escalation_rx: EscalationReceiver,
    pending: Vec<Escalation>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Creates an empty dispatcher. The first `start` begins run 1.
    pub fn new() -> Self {
        let (escalation_tx, escalation_rx) = escalation_channel();
        Self {
            slots: Vec::new(),
            run: 0,
            running: false,
            escalation_tx,
            escalation_rx,
            pending: Vec::new(),
        }
    }

    /// Handle for listeners that need to escalate.
    pub fn escalation_sender(&self) -> EscalationSender {
        self.escalation_tx.clone()
    }

    /// Appends a listener. It sees each message after all earlier listeners.
    pub fn register(&mut self, listener: impl Listener + 'static) {
        self.register_boxed(Box::new(listener));
    }

    /// Appends an already boxed listener.
    pub fn register_boxed(&mut self, listener: Box<dyn Listener>) {
        debug!(listener = listener.name(), "Registered listener");
        self.slots.push(Slot {
            listener,
            alive: false,
        });
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True if no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Current run number (0 before the first start).
    pub fn run(&self) -> u32 {
        self.run
    }

    /// True between a successful `start` and the matching `finish`.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Names of listeners that were isolated during the current run.
    pub fn dead_listeners(&self) -> Vec<&str> {
        self.slots
            .iter()
            .filter(|slot| self.running && !slot.alive)
            .map(|slot| slot.listener.name())
            .collect()
    }

    /// Begins a new run and initializes every listener in order.
    ///
    /// If any listener fails, the listeners already initialized are finished
    /// again and the run does not start.
    pub fn start(&mut self) -> Result<u32, StartError> {
        if self.running {
            warn!(run = self.run, "Starting a new run before the previous one finished");
            if let Err(e) = self.finish() {
                warn!("{e}");
            }
        }

        self.run += 1;
        let run = self.run;
        let stale = self.escalation_rx.drain();
        if !stale.is_empty() {
            debug!(count = stale.len(), "Discarding escalations from a finished run");
        }
        self.pending.clear();

        for index in 0..self.slots.len() {
            let slot = &mut self.slots[index];
            match guarded(slot.listener.as_mut(), |l| l.on_init()) {
                Ok(()) => slot.alive = true,
                Err(source) => {
                    let listener = slot.listener.name().to_string();
                    warn!(listener = %listener, run, error = %source, "Listener failed to initialize");
                    self.roll_back(index);
                    return Err(StartError::ListenerInit {
                        listener,
                        run,
                        source,
                    });
                }
            }
        }

        self.collect_escalations("on_init");
        self.running = true;
        info!(run, listeners = self.slots.len(), "Run started");
        Ok(run)
    }

    /// Delivers a message to every live listener, in registration order.
    ///
    /// Returns the escalations raised while handling this message. Escalation
    /// does not stop delivery to the remaining listeners.
    pub fn dispatch(&mut self, message: &Message) -> Vec<Escalation> {
        if !self.running {
            debug!(line = %preview(message), "Dropping message outside a run");
            return Vec::new();
        }

        let mut escalations = std::mem::take(&mut self.pending);
        for slot in self.slots.iter_mut().filter(|slot| slot.alive) {
            if let Err(error) = guarded(slot.listener.as_mut(), |l| l.receive(message)) {
                slot.alive = false;
                warn!(
                    listener = slot.listener.name(),
                    run = self.run,
                    error = %error,
                    line = %preview(message),
                    "Listener failed, isolating it for the rest of the run"
                );
            }
            for signal in self.escalation_rx.drain() {
                escalations.push(Escalation {
                    listener: slot.listener.name().to_string(),
                    signal,
                    run: self.run,
                });
            }
        }
        escalations
    }

    /// Ends the run, calling `on_automation_finished` on every listener.
    ///
    /// Only failures of listeners that were still live count toward the
    /// returned error. An isolated listener is torn down too, and its
    /// failure is logged.
    pub fn finish(&mut self) -> Result<(), FinishError> {
        if !self.running {
            debug!(run = self.run, "Finish called with no active run");
            return Ok(());
        }
        self.running = false;

        let mut failures = Vec::new();
        for slot in &mut self.slots {
            let was_alive = std::mem::replace(&mut slot.alive, false);
            let Err(error) = guarded(slot.listener.as_mut(), |l| l.on_automation_finished()) else {
                continue;
            };
            if was_alive {
                failures.push(ListenerFailure {
                    listener: slot.listener.name().to_string(),
                    error,
                });
            } else {
                warn!(
                    listener = slot.listener.name(),
                    run = self.run,
                    error = %error,
                    "Isolated listener failed to finish"
                );
            }
        }
        self.collect_escalations("on_automation_finished");
        if !self.pending.is_empty() {
            debug!(count = self.pending.len(), "Escalations raised during teardown ignored");
            self.pending.clear();
        }

        info!(run = self.run, failures = failures.len(), "Run finished");
        if failures.is_empty() {
            Ok(())
        } else {
            Err(FinishError {
                run: self.run,
                failures,
            })
        }
    }

    /// Finishes the first `count` listeners after a failed start.
    fn roll_back(&mut self, count: usize) {
        for slot in &mut self.slots[..count] {
            slot.alive = false;
            if let Err(error) = guarded(slot.listener.as_mut(), |l| l.on_automation_finished()) {
                warn!(listener = slot.listener.name(), error = %error, "Rollback teardown failed");
            }
        }
        self.escalation_rx.drain();
    }

    /// Keeps escalations raised outside `receive` for the next dispatch.
    fn collect_escalations(&mut self, phase: &str) {
        for signal in self.escalation_rx.drain() {
            debug!(phase, signal = %signal, "Escalation raised outside receive");
            self.pending.push(Escalation {
                listener: phase.to_string(),
                signal,
                run: self.run,
            });
        }
    }
}

/// Runs a listener call, turning a panic into a listener error.
fn guarded<F>(listener: &mut dyn Listener, call: F) -> Result<(), ListenerError>
where
    F: FnOnce(&mut dyn Listener) -> Result<(), ListenerError>,
{
    match panic::catch_unwind(AssertUnwindSafe(|| call(listener))) {
        Ok(result) => result,
        Err(payload) => Err(ListenerError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn preview(message: &Message) -> String {
    let line = message.full_line();
    if line.chars().count() <= PREVIEW_CHARS {
        line.to_string()
    } else {
        let cut: String = line.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}...")
    }
}
