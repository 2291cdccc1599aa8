//! Listener that records every callback, with failure injection.

use illuminator_proto::{Listener, ListenerError, Message};
use std::sync::{Arc, Mutex};

/// Ordered log shared by several recording listeners.
///
/// Entries read `name:init`, `name:<full_line>` and `name:finish`.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    /// Snapshot of everything recorded so far.
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    /// Entries recorded by one listener, with the name prefix removed.
    pub fn entries_for(&self, name: &str) -> Vec<String> {
        let prefix = format!("{name}:");
        self.entries()
            .into_iter()
            .filter_map(|entry| entry.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    fn push(&self, entry: String) {
        self.entries.lock().unwrap().push(entry);
    }
}

/// Records callbacks into a [`CallLog`].
#[derive(Debug)]
pub struct RecordingListener {
    name: String,
    log: CallLog,
    fail_on: Option<String>,
    panic_on: Option<String>,
    fail_init: bool,
    fail_finish: bool,
}

impl RecordingListener {
    pub fn new(name: impl Into<String>, log: CallLog) -> Self {
        Self {
            name: name.into(),
            log,
            fail_on: None,
            panic_on: None,
            fail_init: false,
            fail_finish: false,
        }
    }

    /// Fails `receive` for messages whose full line equals `line`.
    pub fn fail_on(mut self, line: impl Into<String>) -> Self {
        self.fail_on = Some(line.into());
        self
    }

    /// Panics in `receive` for messages whose full line equals `line`.
    pub fn panic_on(mut self, line: impl Into<String>) -> Self {
        self.panic_on = Some(line.into());
        self
    }

    /// Fails every `on_init`.
    pub fn fail_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// Fails every `on_automation_finished`.
    pub fn fail_finish(mut self) -> Self {
        self.fail_finish = true;
        self
    }

    fn record(&self, what: &str) {
        self.log.push(format!("{}:{what}", self.name));
    }
}

impl Listener for RecordingListener {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_init(&mut self) -> Result<(), ListenerError> {
        self.record("init");
        if self.fail_init {
            return Err(ListenerError::failed("init refused"));
        }
        Ok(())
    }

    fn receive(&mut self, message: &Message) -> Result<(), ListenerError> {
        let line = message.full_line();
        self.record(line);
        if self.panic_on.as_deref() == Some(line) {
            panic!("recording listener told to panic on {line:?}");
        }
        if self.fail_on.as_deref() == Some(line) {
            return Err(ListenerError::failed(format!("told to fail on {line:?}")));
        }
        Ok(())
    }

    fn on_automation_finished(&mut self) -> Result<(), ListenerError> {
        self.record("finish");
        if self.fail_finish {
            return Err(ListenerError::failed("finish refused"));
        }
        Ok(())
    }
}
