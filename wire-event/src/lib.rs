//! Observer event wire protocol: event kinds + envelope + SSE frame encoding.
//!
//! This crate defines the wire shape of a single observer event and the per-thread
//! envelope (server timestamp, monotonic sequence number, thread/task ids).
//! It does not depend on the orchestrator core; the core stamps `ObserverEvent`
//! values into [`EventFrame`]s via [`EnvelopeState`] and transports encode them
//! (SSE via [`EventFrame::to_sse`], WebSocket as plain JSON).

pub mod envelope;
pub mod event;

pub use envelope::{EnvelopeState, EventFrame};
pub use event::{InterruptKind, ObserverEvent, PlanView, StepOutcome};
