//! The listener capability.

use crate::error::ListenerError;
use crate::message::Message;

/// A stateful stage of the log pipeline.
///
/// The dispatcher drives every listener through the same per-run lifecycle:
/// `on_init` once, `receive` zero or more times in stream order, then
/// `on_automation_finished` once. All calls come from a single dispatch loop,
/// so implementations need no internal locking.
///
/// Returning an error from `on_init` aborts the run start. Errors from
/// `receive` mark the listener dead for the rest of the run.
pub trait Listener: Send {
    /// Short name used in logs and error reports.
    fn name(&self) -> &str;

    /// Called once at the start of every run, before the first `receive`.
    fn on_init(&mut self) -> Result<(), ListenerError> {
        Ok(())
    }

    /// Called for every assembled message, in stream order.
    fn receive(&mut self, message: &Message) -> Result<(), ListenerError>;

    /// Called once when the run ends. Held resources must be released here.
    fn on_automation_finished(&mut self) -> Result<(), ListenerError> {
        Ok(())
    }
}
