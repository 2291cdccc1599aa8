//! Parsed log units.

use std::fmt;

/// Where a message sat relative to the saltinel framing protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Frame {
    /// Ordinary output, outside any saltinel block.
    Plain,
    /// A complete inner block, closed by its marker.
    Saltinel,
    /// An inner block that was still open when the stream ended.
    Unterminated,
}

impl Frame {
    /// Returns the frame name used in log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Frame::Plain => "plain",
            Frame::Saltinel => "saltinel",
            Frame::Unterminated => "unterminated",
        }
    }
}

/// One unit of log output, possibly spanning several raw lines.
///
/// `lines` is never empty and `full_line` is always derived from it, so a
/// message cannot be built or mutated into an inconsistent state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    lines: Vec<String>,
    full_line: String,
    frame: Frame,
}

impl Message {
    /// Builds a message from raw lines.
    ///
    /// Returns `None` when `lines` is empty.
    pub fn from_lines(frame: Frame, lines: Vec<String>) -> Option<Self> {
        if lines.is_empty() {
            return None;
        }
        let full_line = lines.join(" ");
        Some(Self {
            lines,
            full_line,
            frame,
        })
    }

    /// Builds a plain single-line message.
    pub fn line(line: impl Into<String>) -> Self {
        let line = line.into();
        Self {
            full_line: line.clone(),
            lines: vec![line],
            frame: Frame::Plain,
        }
    }

    /// Builds a complete inner message from the lines between two markers.
    pub fn saltinel(lines: Vec<String>) -> Option<Self> {
        Self::from_lines(Frame::Saltinel, lines)
    }

    /// The raw lines, in stream order.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// The lines joined into one searchable string.
    pub fn full_line(&self) -> &str {
        &self.full_line
    }

    /// The framing this message was assembled under.
    pub fn frame(&self) -> Frame {
        self.frame
    }

    /// True for a complete saltinel inner block.
    pub fn is_saltinel(&self) -> bool {
        self.frame == Frame::Saltinel
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_line)
    }
}
