//! Per-endpoint circuit breaker with timed recovery.
//!
//! One breaker per endpoint, process-wide, shared through [`BreakerBoard`].
//! Transitions: `closed` opens after `fail_threshold` consecutive transport
//! failures; `open` admits exactly one probe after `reset` elapses (half-open);
//! `half_open` closes after `probe_successes` consecutive successes and reopens
//! on any failure. Breaker accounting is independent of the retry loop — each
//! attempt records individually.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, info, warn};

/// Breaker state, snapshot form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Breaker tuning. Defaults follow the orchestrator contract:
/// 5 consecutive failures to open, 60 s reset window, 1 probe success to close.
#[derive(Clone, Copy, Debug)]
pub struct BreakerConfig {
    pub fail_threshold: u32,
    pub reset: Duration,
    pub probe_successes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            fail_threshold: 5,
            reset: Duration::from_secs(60),
            probe_successes: 1,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    successes_in_half_open: u32,
    opened_at: Option<Instant>,
    /// Set while the single half-open probe is in flight (tie-break: racing
    /// callers in `open` past the reset window admit exactly one).
    probe_in_flight: bool,
}

/// Circuit breaker for one endpoint.
///
/// Callers ask [`admit`](Self::admit) before each attempt and record the
/// attempt's outcome afterwards. Snapshots are cheap (one short lock).
pub struct CircuitBreaker {
    endpoint: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

/// Read-only view of a breaker for callers and logs.
#[derive(Clone, Debug)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub successes_in_half_open: u32,
    pub opened_for: Option<Duration>,
}

impl CircuitBreaker {
    pub fn new(endpoint: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            endpoint: endpoint.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                successes_in_half_open: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Asks to run one attempt now. `Err(())` means fail fast without touching
    /// the socket; the caller maps it to `RpcError::CircuitOpen`.
    pub fn admit(&self) -> Result<(), ()> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.reset {
                    info!(endpoint = %self.endpoint, "circuit half-open, admitting probe");
                    inner.state = CircuitState::HalfOpen;
                    inner.successes_in_half_open = 0;
                    inner.probe_in_flight = true;
                    Ok(())
                } else {
                    Err(())
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(())
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Records one successful attempt.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.probe_in_flight = false;
                inner.successes_in_half_open += 1;
                if inner.successes_in_half_open >= self.config.probe_successes {
                    info!(endpoint = %self.endpoint, "circuit closed after successful probe");
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.successes_in_half_open = 0;
                    inner.opened_at = None;
                }
            }
            CircuitState::Open => {
                // A success can land here when the call started before the trip.
                debug!(endpoint = %self.endpoint, "success while open, ignored");
            }
        }
    }

    /// Records one failed attempt. Only transport failures belong here; the
    /// caller filters with `RpcError::is_transport_failure`.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.fail_threshold {
                    warn!(
                        endpoint = %self.endpoint,
                        failures = inner.consecutive_failures,
                        "circuit opened"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                warn!(endpoint = %self.endpoint, "probe failed, circuit reopened");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_in_flight = false;
                inner.successes_in_half_open = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            successes_in_half_open: inner.successes_in_half_open,
            opened_for: inner.opened_at.map(|at| at.elapsed()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        // A poisoned breaker lock would mean a panic mid-transition; recover
        // with the inner state as-is rather than propagating the poison.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Process-wide board of breakers keyed by endpoint.
pub struct BreakerBoard {
    config: BreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerBoard {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Returns the breaker for an endpoint, creating it closed on first use.
    pub fn for_endpoint(&self, endpoint: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(endpoint, self.config)))
            .clone()
    }

    /// Snapshots of every known breaker (for the agent card / diagnostics).
    pub fn snapshots(&self) -> Vec<(String, BreakerSnapshot)> {
        self.breakers
            .iter()
            .map(|e| (e.key().clone(), e.value().snapshot()))
            .collect()
    }
}

impl Default for BreakerBoard {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
