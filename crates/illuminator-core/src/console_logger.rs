//! Per-run console log files.
//!
//! Every run gets its own `instrumentsNNN.log` in the artifact directory,
//! holding one message per line in delivery order.

use illuminator_proto::{Listener, ListenerError, Message};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Returns the console log path for a run number.
pub fn console_log_path(dir: &Path, run: u32) -> PathBuf {
    dir.join(format!("instruments{run:03}.log"))
}

/// Persists every message's full line to a rotated per-run file.
pub struct ConsoleLogger {
    dir: PathBuf,
    run: u32,
    file: Option<BufWriter<File>>,
}

impl ConsoleLogger {
    /// Creates a logger writing into `dir`. Nothing is opened until the
    /// first message arrives.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            run: 0,
            file: None,
        }
    }

    /// Number of files opened so far.
    pub fn run(&self) -> u32 {
        self.run
    }

    /// Path of the file for the current run, if one was opened.
    pub fn current_path(&self) -> Option<PathBuf> {
        self.file
            .as_ref()
            .map(|_| console_log_path(&self.dir, self.run))
    }

    /// Opens the next numbered file, replacing any leftover from earlier runs.
    fn prepare(&mut self) -> io::Result<&mut BufWriter<File>> {
        if self.file.is_none() {
            let run = self.run + 1;
            fs::create_dir_all(&self.dir)?;
            let path = console_log_path(&self.dir, run);
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed stale console log"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
            let file = File::create(&path)?;
            debug!(path = %path.display(), run, "Opened console log");
            self.run = run;
            self.file = Some(BufWriter::new(file));
        }
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("console log not open"))
    }
}

impl Listener for ConsoleLogger {
    fn name(&self) -> &str {
        "console-logger"
    }

    /// Closes a file left over from a run that never reached teardown, so
    /// the next message opens the next number.
    fn on_init(&mut self) -> Result<(), ListenerError> {
        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush() {
                debug!(run = self.run, error = %e, "Leftover console log failed to flush");
            }
        }
        Ok(())
    }

    fn receive(&mut self, message: &Message) -> Result<(), ListenerError> {
        let file = self.prepare()?;
        writeln!(file, "{}", message.full_line())?;
        Ok(())
    }

    fn on_automation_finished(&mut self) -> Result<(), ListenerError> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }
}
