//! Echoes the log stream to a writer.

use illuminator_proto::{Listener, ListenerError, Message};
use std::io::{self, Write};

/// Writes every message's full line to an output, stdout by default.
pub struct FullOutput {
    out: Box<dyn Write + Send>,
}

impl FullOutput {
    /// Echoes to standard output.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Echoes to any writer.
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self { out: Box::new(out) }
    }
}

impl Listener for FullOutput {
    fn name(&self) -> &str {
        "full-output"
    }

    fn receive(&mut self, message: &Message) -> Result<(), ListenerError> {
        writeln!(self.out, "{}", message.full_line())?;
        Ok(())
    }

    fn on_automation_finished(&mut self) -> Result<(), ListenerError> {
        self.out.flush()?;
        Ok(())
    }
}
