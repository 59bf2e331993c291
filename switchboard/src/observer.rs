//! In-process observer bus with queued fan-out.
//!
//! The engine emits [`ObserverEvent`]s; the bus stamps them (server timestamp,
//! per-thread monotonic sequence starting at 1), keeps a bounded replay ring
//! per thread, and fans frames out to subscribers over bounded channels. A late
//! subscriber first receives the ring replay, then live frames. A subscriber
//! whose channel is gone or repeatedly full is dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use wire_event::{EnvelopeState, EventFrame, ObserverEvent};

/// Consecutive try_send failures before a subscriber is dropped.
const MAX_SUBSCRIBER_FAILURES: u8 = 3;

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<EventFrame>,
    failures: u8,
}

struct ThreadChannel {
    envelope: EnvelopeState,
    ring: VecDeque<EventFrame>,
    subscribers: Vec<Subscriber>,
}

/// Typed pub/sub for one process. Emission holds the thread's lock, so frames
/// for one thread are stamped and fanned out in engine order.
pub struct ObserverBus {
    ring_capacity: usize,
    next_subscriber_id: AtomicU64,
    threads: DashMap<String, Mutex<ThreadChannel>>,
}

impl ObserverBus {
    /// `ring_capacity` recent frames are kept per thread for catch-up replay
    /// (default 50).
    pub fn new(ring_capacity: usize) -> Self {
        Self {
            ring_capacity,
            next_subscriber_id: AtomicU64::new(1),
            threads: DashMap::new(),
        }
    }

    /// Stamps and publishes one event. Returns the stamped frame so the engine
    /// can reuse it (e.g. in RPC responses).
    pub fn emit(
        &self,
        thread_id: &str,
        task_id: Option<String>,
        event: &ObserverEvent,
    ) -> EventFrame {
        let channel = self
            .threads
            .entry(thread_id.to_string())
            .or_insert_with(|| {
                Mutex::new(ThreadChannel {
                    envelope: EnvelopeState::new(thread_id),
                    ring: VecDeque::new(),
                    subscribers: Vec::new(),
                })
            });
        let mut guard = channel.lock().unwrap_or_else(|e| e.into_inner());

        let frame = guard.envelope.stamp(event, task_id);
        guard.ring.push_back(frame.clone());
        while guard.ring.len() > self.ring_capacity {
            guard.ring.pop_front();
        }

        guard.subscribers.retain_mut(|sub| {
            match sub.tx.try_send(frame.clone()) {
                Ok(()) => {
                    sub.failures = 0;
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(thread = %thread_id, subscriber = sub.id, "subscriber closed, dropping");
                    false
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    sub.failures += 1;
                    if sub.failures >= MAX_SUBSCRIBER_FAILURES {
                        warn!(
                            thread = %thread_id,
                            subscriber = sub.id,
                            "subscriber buffer overflow, dropping"
                        );
                        false
                    } else {
                        true
                    }
                }
            }
        });
        frame
    }

    /// Subscribes to a thread. The returned receiver first yields the replay of
    /// up to `ring_capacity` recent frames, then live frames.
    pub fn subscribe(&self, thread_id: &str) -> mpsc::Receiver<EventFrame> {
        let (tx, rx) = mpsc::channel(self.ring_capacity + 64);
        let channel = self
            .threads
            .entry(thread_id.to_string())
            .or_insert_with(|| {
                Mutex::new(ThreadChannel {
                    envelope: EnvelopeState::new(thread_id),
                    ring: VecDeque::new(),
                    subscribers: Vec::new(),
                })
            });
        let mut guard = channel.lock().unwrap_or_else(|e| e.into_inner());

        for frame in guard.ring.iter() {
            // Replay fits by construction: capacity exceeds the ring bound.
            let _ = tx.try_send(frame.clone());
        }
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        guard.subscribers.push(Subscriber {
            id,
            tx,
            failures: 0,
        });
        rx
    }

    /// Subscriber count for one thread (diagnostics, shutdown draining).
    pub fn subscriber_count(&self, thread_id: &str) -> usize {
        self.threads
            .get(thread_id)
            .map(|c| c.lock().unwrap_or_else(|e| e.into_inner()).subscribers.len())
            .unwrap_or(0)
    }

    /// Drops a thread's channel entirely (thread GC).
    pub fn forget_thread(&self, thread_id: &str) {
        self.threads.remove(thread_id);
    }
}

impl Default for ObserverBus {
    fn default() -> Self {
        Self::new(50)
    }
}
