use std::io::Write;
use std::sync::mpsc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::cancel::StopReason;

/// Notification emitted by the action loop, in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    Reasoning {
        text: String,
    },
    SafetyCheck {
        step: u32,
        call_id: String,
        code: Option<String>,
        message: Option<String>,
    },
    Action {
        step: u32,
        call_id: String,
        kind: String,
        description: String,
        action: Value,
    },
    ActionCompleted {
        step: u32,
        call_id: String,
    },
    Done {
        steps: u32,
        message: Option<String>,
    },
    Stopped {
        steps: u32,
        reason: StopReason,
        message: String,
    },
    Error {
        steps: u32,
        kind: String,
        message: String,
    },
}

impl LoopEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoopEvent::Done { .. } | LoopEvent::Stopped { .. } | LoopEvent::Error { .. }
        )
    }
}

/// Append-only destination for loop notifications.
pub trait EventSink {
    fn emit(&mut self, event: LoopEvent);
}

impl EventSink for Vec<LoopEvent> {
    fn emit(&mut self, event: LoopEvent) {
        self.push(event);
    }
}

impl EventSink for mpsc::Sender<LoopEvent> {
    fn emit(&mut self, event: LoopEvent) {
        if self.send(event).is_err() {
            warn!("event receiver dropped; notification discarded");
        }
    }
}

/// Writes one JSON object per line, stamped with the emission time.
pub struct JsonLinesSink<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> EventSink for JsonLinesSink<W> {
    fn emit(&mut self, event: LoopEvent) {
        let mut payload = match serde_json::to_value(&event) {
            Ok(v) => v,
            Err(err) => {
                warn!(error = %err, "failed to serialize loop event");
                return;
            }
        };
        if let Value::Object(map) = &mut payload {
            map.insert("at".to_string(), Value::String(Utc::now().to_rfc3339()));
        }
        let written = writeln!(self.out, "{payload}").and_then(|_| self.out.flush());
        if let Err(err) = written {
            warn!(error = %err, "failed to write loop event");
        }
    }
}
