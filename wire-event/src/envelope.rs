//! Envelope (ts, seq, threadID, taskID) stamped onto each observer event.
//!
//! `EnvelopeState` tracks the next sequence number for one thread; sequence
//! numbers start at 1 and are strictly monotonic within a thread.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::ObserverEvent;

/// One stamped event: envelope fields plus the kind and payload.
///
/// Wire shape of the SSE `data:` line and of WebSocket mirror frames:
/// `{ ts, seq, threadID, taskID?, payload: {...} }` with the kind carried
/// separately (SSE `event:` line, or a `kind` field on the WS mirror).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventFrame {
    /// Server-side UTC timestamp, ISO-8601 with millisecond precision.
    pub ts: String,
    /// Per-thread sequence number; strictly increasing, starts at 1.
    pub seq: u64,
    #[serde(rename = "threadID")]
    pub thread_id: String,
    #[serde(rename = "taskID", skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Snake-case event kind (same value as the SSE `event:` field).
    pub kind: String,
    /// Event payload with the type tag stripped.
    pub payload: Value,
}

impl EventFrame {
    /// Encodes this frame as one SSE message (`event:` + `data:` + blank line).
    pub fn to_sse(&self) -> String {
        let data = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("event: {}\ndata: {}\n\n", self.kind, data)
    }
}

/// Envelope state for one thread: thread id plus the next sequence number.
#[derive(Clone, Debug)]
pub struct EnvelopeState {
    thread_id: String,
    next_seq: u64,
}

impl EnvelopeState {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            next_seq: 1,
        }
    }

    /// Sequence number the next stamp will use.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Stamps an event with the current wall clock.
    pub fn stamp(&mut self, event: &ObserverEvent, task_id: Option<String>) -> EventFrame {
        self.stamp_at(event, task_id, Utc::now())
    }

    /// Stamps an event at an explicit instant (tests pin the clock with this).
    pub fn stamp_at(
        &mut self,
        event: &ObserverEvent,
        task_id: Option<String>,
        at: DateTime<Utc>,
    ) -> EventFrame {
        let seq = self.next_seq;
        self.next_seq += 1;
        EventFrame {
            ts: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            seq,
            thread_id: self.thread_id.clone(),
            task_id,
            kind: event.kind().to_string(),
            payload: event.payload().unwrap_or(Value::Null),
        }
    }
}
