//! The assembled log pipeline: bytes in, listener callbacks out.

use crate::assembler::LineAssembler;
use crate::config::{ConfigError, PipelineConfig};
use crate::console_logger::ConsoleLogger;
use crate::detector::{FailureSignature, IntermittentFailureDetector};
use crate::dispatcher::{Dispatcher, FinishError, StartError};
use crate::saltinel_agent::{AgentFindings, SaltinelAgent};
use crate::start_detector::StartDetector;
use crate::stop_detector::{StopDetector, TraceErrorDetector};
use illuminator_proto::{Escalation, EscalationSender, Listener, Message};
use std::sync::Arc;
use tracing::{debug, trace};

/// Owns line assembly and listener dispatch for one output stream at a time.
pub struct Pipeline {
    assembler: LineAssembler,
    dispatcher: Dispatcher,
    findings: Option<AgentFindings>,
}

impl Pipeline {
    /// Creates a pipeline with no listeners.
    pub fn new(assembler: LineAssembler) -> Self {
        Self {
            assembler,
            dispatcher: Dispatcher::new(),
            findings: None,
        }
    }

    /// Builds the standard pipeline for a configuration.
    ///
    /// Listeners, in order: console logger, intermittent failure detector,
    /// start detector, saltinel agent, stop detector, trace error detector.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let assembler =
            LineAssembler::new(config.saltinel.clone()).with_ansi_stripping(config.strip_ansi);
        let mut pipeline = Self::new(assembler);
        let sink = Arc::new(pipeline.escalation_sender());

        pipeline.register(ConsoleLogger::new(&config.console_dir));
        let signatures = FailureSignature::from_config(&config.signatures)?;
        pipeline.register(
            IntermittentFailureDetector::with_signatures(sink.clone(), signatures).into_listener(),
        );
        pipeline.register(StartDetector::new(sink.clone()).into_listener());
        let agent = SaltinelAgent::new(sink.clone()).map_err(|source| ConfigError::Pattern {
            name: "saltinel-agent".to_string(),
            source,
        })?;
        pipeline.findings = Some(agent.findings());
        pipeline.register(agent.into_listener());
        pipeline.register(StopDetector::new(sink.clone()));
        pipeline.register(TraceErrorDetector::new(sink));
        Ok(pipeline)
    }

    /// What the automation harness reported, for pipelines built by
    /// [`Pipeline::from_config`].
    pub fn agent_findings(&self) -> Option<AgentFindings> {
        self.findings.clone()
    }

    /// Appends a listener after those already registered.
    pub fn register(&mut self, listener: impl Listener + 'static) {
        self.dispatcher.register(listener);
    }

    /// Sink for listeners that escalate to the supervisor.
    pub fn escalation_sender(&self) -> EscalationSender {
        self.dispatcher.escalation_sender()
    }

    /// Current run number.
    pub fn run(&self) -> u32 {
        self.dispatcher.run()
    }

    /// Read access to the dispatcher, mostly for inspection.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Starts a run with a clean assembler.
    pub fn start(&mut self) -> Result<u32, StartError> {
        self.assembler.reset();
        self.dispatcher.start()
    }

    /// Feeds one output chunk and dispatches every message it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Escalation> {
        let messages = self.assembler.feed(chunk);
        trace!(bytes = chunk.len(), messages = messages.len(), "Fed chunk");
        self.dispatch_all(&messages)
    }

    /// Flushes the assembler at end of stream.
    pub fn end_of_stream(&mut self) -> Vec<Escalation> {
        let messages = self.assembler.finish();
        self.dispatch_all(&messages)
    }

    /// Ends the run. Input still buffered in the assembler is flushed to the
    /// listeners first, as at end of stream. Escalations raised by that flush
    /// are logged and dropped, so callers that act on them should call
    /// [`Pipeline::end_of_stream`] themselves.
    pub fn finish(&mut self) -> Result<(), FinishError> {
        let late = self.end_of_stream();
        if !late.is_empty() {
            debug!(count = late.len(), "Escalations raised while flushing at finish ignored");
        }
        self.dispatcher.finish()
    }

    fn dispatch_all(&mut self, messages: &[Message]) -> Vec<Escalation> {
        messages
            .iter()
            .flat_map(|message| self.dispatcher.dispatch(message))
            .collect()
    }
}
