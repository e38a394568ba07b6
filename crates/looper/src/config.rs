//! Message loop configuration

use crate::clock::{Clock, MonotonicClock};
use crate::incoming::IncomingTaskQueue;
use std::fmt;
use std::sync::Arc;

/// Construction options for a message loop
#[derive(Clone)]
pub struct LoopConfig {
    /// Clock used for target times and wake deadlines
    pub clock: Arc<dyn Clock>,

    /// Incoming queue to attach (None = a fresh queue using `clock`)
    pub incoming: Option<Arc<IncomingTaskQueue>>,

    /// Label attached to the loop's log events
    pub label: Option<String>,
}

impl LoopConfig {
    /// Use `clock` for reading the current time
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attach an existing incoming queue instead of creating one
    pub fn with_incoming(mut self, incoming: Arc<IncomingTaskQueue>) -> Self {
        self.incoming = Some(incoming);
        self
    }

    /// Label the loop in log events
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            clock: Arc::new(MonotonicClock),
            incoming: None,
            label: None,
        }
    }
}

impl fmt::Debug for LoopConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopConfig")
            .field("incoming", &self.incoming)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}
