//! # illuminator-proto
//!
//! Shared types, error definitions, and traits for the Illuminator log pipeline.
//!
//! This crate provides the foundational abstractions used across all Illuminator
//! crates, including:
//! - The [`Message`] value produced by line assembly
//! - The [`Listener`] capability every pipeline stage implements
//! - The escalation contract listeners use to signal start, stop or restart

mod error;
mod escalation;
mod listener;
mod message;

pub use error::ListenerError;
pub use escalation::{
    Escalation, EscalationReceiver, EscalationSender, EscalationSink, Signal, escalation_channel,
};
pub use listener::Listener;
pub use message::{Frame, Message};
