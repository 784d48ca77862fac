//! Instrumentation records emitted at engine milestones.
//!
//! The engine emits a `Record` when an event is triggered, after every
//! delivery attempt, and when a request is captured into the inbox. Hosts
//! plug in a sink to forward these to their metrics or audit pipeline; the
//! default sink drops them.

use std::{collections::HashMap, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

/// A single instrumentation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Dotted record name, e.g. `"webhook.delivered"`.
    pub name: String,

    /// Structured fields describing the milestone.
    pub fields: HashMap<String, serde_json::Value>,

    /// How long the instrumented operation took, when measured.
    pub duration: Option<Duration>,
}

impl Record {
    /// Creates a record with the given name and no fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: HashMap::new(),
            duration: None,
        }
    }

    /// Adds a structured field.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Sets the measured duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// Record name emitted when an event is created and fanned out.
pub const TRIGGERED: &str = "webhook.triggered";

/// Record name emitted after every delivery attempt, success or failure.
pub const DELIVERED: &str = "webhook.delivered";

/// Record name emitted when a request is captured into the inbox.
pub const INBOX_STORED: &str = "webhook.inbox_stored";

/// Destination for instrumentation records.
///
/// Implementations must be fast and must not fail; the engine calls `emit`
/// inline on the delivery path.
pub trait InstrumentationSink: Send + Sync + std::fmt::Debug {
    /// Delivers one record to the sink.
    fn emit(&self, record: Record);
}

/// Sink that discards every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpSink;

impl InstrumentationSink for NoOpSink {
    fn emit(&self, _record: Record) {}
}

/// Fans each record out to multiple sinks in registration order.
#[derive(Debug, Default)]
pub struct MulticastSink {
    sinks: Vec<Arc<dyn InstrumentationSink>>,
}

impl MulticastSink {
    /// Creates an empty multicast sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a downstream sink.
    pub fn push(&mut self, sink: Arc<dyn InstrumentationSink>) {
        self.sinks.push(sink);
    }
}

impl InstrumentationSink for MulticastSink {
    fn emit(&self, record: Record) {
        for sink in &self.sinks {
            sink.emit(record.clone());
        }
    }
}
