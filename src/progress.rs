//! Event reporting during a run.
//!
//! Every host transition and the final result or error is emitted as one
//! JSON object per line. The binary writes to **stdout**, which carries
//! nothing else; diagnostics go to stderr through `tracing`.

use std::io::Write;
use std::sync::Mutex;

use crate::models::HostStatus;
use crate::protocol::{Event, ProgressPayload};

/// Receives run events. Implementations must keep each event on one line.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);

    /// Convenience for a host lifecycle transition, stamped now.
    fn progress(&self, host_id: &str, status: HostStatus, message: &str) {
        self.emit(Event::Progress {
            payload: ProgressPayload {
                host_id: host_id.to_string(),
                status,
                message: message.to_string(),
                timestamp: chrono::Utc::now().to_rfc3339(),
            },
        });
    }
}

/// Newline-delimited JSON on any writer, flushed after every line so the
/// reading process sees progress as it happens.
pub struct NdjsonSink<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> NdjsonSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl NdjsonSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> EventSink for NdjsonSink<W> {
    fn emit(&self, event: Event) {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize event");
                return;
            }
        };
        let mut out = match self.out.lock() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            tracing::warn!(error = %e, "failed to write event");
        }
    }
}

/// Discards everything.
pub struct NoEvents;

impl EventSink for NoEvents {
    fn emit(&self, _event: Event) {}
}

/// Keeps events in memory; used by embedders and tests.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<Event>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// `(host_id, status)` of every progress event, in emission order.
    pub fn transitions(&self) -> Vec<(String, HostStatus)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Progress { payload } => Some((payload.host_id, payload.status)),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: Event) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
