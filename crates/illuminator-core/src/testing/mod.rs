//! Testing utilities for deterministic pipeline and supervisor tests.

pub mod recording_listener;
pub mod recording_sink;
pub mod scripted_launcher;

pub use recording_listener::{CallLog, RecordingListener};
pub use recording_sink::RecordingSink;
pub use scripted_launcher::{RunScript, ScriptedLauncher};
