//! Saltinel framing.
//!
//! The automation script embeds structured messages in its log output between
//! a pair of sentinel markers ("saltinels"). [`SaltinelFramer`] is the state
//! machine that recognizes those blocks in a line stream, and
//! [`SaltinelListener`] is the listener decorator that routes complete inner
//! blocks to a [`SaltinelHandler`].
//!
//! Two encodings are accepted:
//!
//! ```text
//! <<SALTINEL>>                         <<SALTINEL>> Successful launch <<SALTINEL>>
//! Saved intended test list to: x
//! <<SALTINEL>>
//! ```
//!
//! Out-of-order markers are line noise from an external process and are
//! tolerated, never reported as errors.

use crate::config::SaltinelMarkers;
use illuminator_proto::{Frame, Listener, ListenerError, Message};
use tracing::{debug, trace};

/// Where the framer is in the block protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramerState {
    /// Outside any block. Lines pass through as plain messages.
    Idle,
    /// Inside a block. Lines are buffered until the closing marker.
    Buffering,
}

/// Line-level state machine for saltinel blocks.
#[derive(Debug)]
pub struct SaltinelFramer {
    markers: SaltinelMarkers,
    state: FramerState,
    buffered: Vec<String>,
}

impl SaltinelFramer {
    /// Creates an idle framer.
    pub fn new(markers: SaltinelMarkers) -> Self {
        Self {
            markers,
            state: FramerState::Idle,
            buffered: Vec::new(),
        }
    }

    /// Current protocol state.
    pub fn state(&self) -> FramerState {
        self.state
    }

    /// The markers this framer recognizes.
    pub fn markers(&self) -> &SaltinelMarkers {
        &self.markers
    }

    /// Consumes one complete line.
    ///
    /// Returns the message the line completes, if any: a plain message for a
    /// line outside a block, or the inner message when a block closes.
    pub fn push_line(&mut self, line: String) -> Option<Message> {
        let trimmed = line.trim();
        let is_open = trimmed == self.markers.open;
        let is_close = trimmed == self.markers.close;

        match self.state {
            FramerState::Idle => {
                if is_open {
                    self.state = FramerState::Buffering;
                    return None;
                }
                if is_close {
                    trace!("Ignoring saltinel close marker outside a block");
                    return None;
                }
                if let Some(body) = self.inline_body(trimmed) {
                    return Message::saltinel(vec![body.to_string()]);
                }
                Some(Message::line(line))
            }
            FramerState::Buffering => {
                // Checked first so symmetric markers close rather than reopen.
                if is_close {
                    self.state = FramerState::Idle;
                    let lines = std::mem::take(&mut self.buffered);
                    if lines.is_empty() {
                        debug!("Dropping empty saltinel block");
                    }
                    return Message::saltinel(lines);
                }
                if is_open {
                    debug!(
                        discarded = self.buffered.len(),
                        "Saltinel reopened before close, restarting block"
                    );
                    self.buffered.clear();
                    return None;
                }
                self.buffered.push(line);
                None
            }
        }
    }

    /// Ends the stream.
    ///
    /// A block that never closed is returned as an [`Frame::Unterminated`]
    /// message so its text is not lost. Handlers never see it as a saltinel.
    pub fn finish(&mut self) -> Option<Message> {
        let was_buffering = self.state == FramerState::Buffering;
        self.state = FramerState::Idle;
        let lines = std::mem::take(&mut self.buffered);
        if !was_buffering {
            return None;
        }
        debug!(lines = lines.len(), "Stream ended inside a saltinel block");
        Message::from_lines(Frame::Unterminated, lines)
    }

    /// Returns to the idle state and forgets any partial block.
    pub fn reset(&mut self) {
        self.state = FramerState::Idle;
        self.buffered.clear();
    }

    /// Extracts `body` from `<open> body <close>` on a single line.
    ///
    /// The open marker may be preceded by a log prefix such as a timestamp.
    fn inline_body<'a>(&self, trimmed: &'a str) -> Option<&'a str> {
        let start = trimmed.find(self.markers.open.as_str())?;
        let rest = &trimmed[start + self.markers.open.len()..];
        let inner = rest.strip_suffix(self.markers.close.as_str())?;
        if !inner.starts_with(char::is_whitespace) || !inner.ends_with(char::is_whitespace) {
            return None;
        }
        let body = inner.trim();
        (!body.is_empty()).then_some(body)
    }
}

/// Behaviour plugged into a [`SaltinelListener`].
pub trait SaltinelHandler: Send {
    /// Name reported for the wrapping listener.
    fn name(&self) -> &str;

    /// Called once at the start of every run.
    fn on_init(&mut self) -> Result<(), ListenerError> {
        Ok(())
    }

    /// Called once per complete inner block.
    fn on_saltinel(&mut self, inner: &Message) -> Result<(), ListenerError>;

    /// Called for messages outside any block.
    fn on_unframed(&mut self, _message: &Message) -> Result<(), ListenerError> {
        Ok(())
    }

    /// Called once when the run ends.
    fn on_automation_finished(&mut self) -> Result<(), ListenerError> {
        Ok(())
    }
}

/// Listener decorator that hands inner blocks to its handler.
///
/// Marker lines are consumed during assembly, so the handler only ever sees
/// block contents. Unterminated blocks are not delivered to `on_saltinel`.
#[derive(Debug)]
pub struct SaltinelListener<H> {
    handler: H,
}

impl<H: SaltinelHandler> SaltinelListener<H> {
    /// Wraps a handler.
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    /// The wrapped handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }
}

impl<H: SaltinelHandler> Listener for SaltinelListener<H> {
    fn name(&self) -> &str {
        self.handler.name()
    }

    fn on_init(&mut self) -> Result<(), ListenerError> {
        self.handler.on_init()
    }

    fn receive(&mut self, message: &Message) -> Result<(), ListenerError> {
        match message.frame() {
            Frame::Saltinel => self.handler.on_saltinel(message),
            Frame::Plain => self.handler.on_unframed(message),
            Frame::Unterminated => {
                debug!(
                    listener = self.handler.name(),
                    "Skipping unterminated saltinel block"
                );
                Ok(())
            }
        }
    }

    fn on_automation_finished(&mut self) -> Result<(), ListenerError> {
        self.handler.on_automation_finished()
    }
}
