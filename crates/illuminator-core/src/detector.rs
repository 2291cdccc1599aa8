//! Intermittent failure detection.
//!
//! Some failures have nothing to do with the app under test: the automation
//! target disappears, the simulator loses its session, and so on. A fresh
//! launch usually fixes them, so the detector asks the orchestrator for a
//! restart the first time one shows up in a run.

use crate::config::{ConfigError, SignatureConfig};
use crate::saltinel::{SaltinelHandler, SaltinelListener};
use illuminator_proto::{EscalationSink, ListenerError, Message};
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info};

/// Name of the built-in signature for a vanished automation target.
pub const TARGET_GONE_AWOL: &str = "UIATargetHasGoneAWOLException";

#[derive(Debug, Clone)]
enum Matcher {
    Literal(String),
    Pattern(Regex),
}

/// A named pattern identifying a known transient failure.
#[derive(Debug, Clone)]
pub struct FailureSignature {
    name: String,
    matcher: Matcher,
}

impl FailureSignature {
    /// Compiles a signature from a regular expression.
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.into(),
            matcher: Matcher::Pattern(Regex::new(pattern)?),
        })
    }

    /// A signature matching its own name as a literal substring.
    pub fn literal(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            matcher: Matcher::Literal(name.clone()),
            name,
        }
    }

    /// The reason reported when this signature matches.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True if the text contains this failure.
    pub fn matches(&self, text: &str) -> bool {
        match &self.matcher {
            Matcher::Literal(needle) => text.contains(needle.as_str()),
            Matcher::Pattern(regex) => regex.is_match(text),
        }
    }

    /// Signatures every detector knows about.
    pub fn builtin() -> Vec<Self> {
        vec![Self::literal(TARGET_GONE_AWOL)]
    }

    /// Built-in signatures followed by configured ones.
    pub fn from_config(extra: &[SignatureConfig]) -> Result<Vec<Self>, ConfigError> {
        let mut signatures = Self::builtin();
        for entry in extra {
            let signature =
                Self::new(&entry.name, &entry.pattern).map_err(|source| ConfigError::Pattern {
                    name: entry.name.clone(),
                    source,
                })?;
            signatures.push(signature);
        }
        Ok(signatures)
    }
}

/// Saltinel handler that escalates on the first transient failure of a run.
pub struct IntermittentFailureDetector {
    signatures: Vec<FailureSignature>,
    sink: Arc<dyn EscalationSink>,
    already_triggered: bool,
}

impl IntermittentFailureDetector {
    /// Creates a detector with the built-in signatures.
    pub fn new(sink: Arc<dyn EscalationSink>) -> Self {
        Self::with_signatures(sink, FailureSignature::builtin())
    }

    /// Creates a detector with an explicit signature set.
    pub fn with_signatures(sink: Arc<dyn EscalationSink>, signatures: Vec<FailureSignature>) -> Self {
        Self {
            signatures,
            sink,
            already_triggered: false,
        }
    }

    /// Wraps the detector so it can be registered as a listener.
    pub fn into_listener(self) -> SaltinelListener<Self> {
        SaltinelListener::new(self)
    }

    /// True once this run has escalated.
    pub fn has_triggered(&self) -> bool {
        self.already_triggered
    }

    /// Reports a failure, once per run.
    pub fn trigger(&mut self, signature: &str) {
        if self.already_triggered {
            debug!(signature, "Suppressing repeated intermittent failure");
            return;
        }
        self.already_triggered = true;
        info!(signature, "Intermittent failure detected, requesting restart");
        self.sink.intermittent_failure_detector_triggered(signature);
    }

    fn inspect(&mut self, message: &Message) {
        let matched = self
            .signatures
            .iter()
            .find(|signature| signature.matches(message.full_line()))
            .map(|signature| signature.name().to_string());
        if let Some(name) = matched {
            self.trigger(&name);
        }
    }
}

impl SaltinelHandler for IntermittentFailureDetector {
    fn name(&self) -> &str {
        "intermittent-failure-detector"
    }

    fn on_init(&mut self) -> Result<(), ListenerError> {
        self.already_triggered = false;
        Ok(())
    }

    fn on_saltinel(&mut self, inner: &Message) -> Result<(), ListenerError> {
        self.inspect(inner);
        Ok(())
    }

    // The automation tool itself reports some of these outside any block.
    fn on_unframed(&mut self, message: &Message) -> Result<(), ListenerError> {
        self.inspect(message);
        Ok(())
    }
}
