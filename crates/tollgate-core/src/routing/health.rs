//! Provider health tracking and circuit breaking.
//!
//! Health is passive: state is derived from real call outcomes rather than
//! active probing. The monitor is shared by all workers; each per-provider
//! transition happens under that provider's map entry, so claiming the
//! single half-open probe slot is atomic.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use tollgate_types::error::ProviderError;
use tollgate_types::tier::ProviderStatus;

/// Circuit breaker state for a provider.
#[derive(Debug, Clone)]
pub enum CircuitState {
    /// Normal operation. Tracks consecutive failures toward the threshold.
    Closed { consecutive_failures: u32 },
    /// Provider is removed from rotation until `wait_duration` elapses.
    Open {
        opened_at: Instant,
        wait_duration: Duration,
    },
    /// Probing: exactly one request is allowed through to test recovery.
    HalfOpen {
        probe_in_flight: bool,
        claimed_at: Option<Instant>,
    },
}

/// Whether a provider may be used for the next call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Circuit closed; route normally.
    Ready,
    /// Circuit half-open and this caller claimed the single probe slot.
    Probe,
    /// Circuit open, or another caller holds the probe slot.
    Unavailable,
}

impl Availability {
    pub fn is_usable(&self) -> bool {
        matches!(self, Availability::Ready | Availability::Probe)
    }
}

/// Health tracking for a single provider.
#[derive(Debug)]
pub struct ProviderHealth {
    pub id: String,
    pub state: CircuitState,
    pub last_error: Option<String>,
    pub last_latency_ms: Option<u64>,
    pub total_calls: u64,
    pub total_failures: u64,
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long to wait in Open before allowing a probe.
    pub open_duration: Duration,
}

impl ProviderHealth {
    pub fn new(id: impl Into<String>, failure_threshold: u32, open_duration: Duration) -> Self {
        Self {
            id: id.into(),
            state: CircuitState::Closed {
                consecutive_failures: 0,
            },
            last_error: None,
            last_latency_ms: None,
            total_calls: 0,
            total_failures: 0,
            failure_threshold,
            open_duration,
        }
    }

    /// Claim availability for one call, handling lazy Open -> HalfOpen
    /// transitions and the single-probe slot.
    ///
    /// A stale probe claim (prober vanished without recording an outcome)
    /// is reclaimable after another `open_duration`.
    pub fn try_acquire(&mut self) -> Availability {
        match &self.state {
            CircuitState::Closed { .. } => Availability::Ready,
            CircuitState::Open {
                opened_at,
                wait_duration,
            } => {
                if opened_at.elapsed() >= *wait_duration {
                    self.state = CircuitState::HalfOpen {
                        probe_in_flight: true,
                        claimed_at: Some(Instant::now()),
                    };
                    Availability::Probe
                } else {
                    Availability::Unavailable
                }
            }
            CircuitState::HalfOpen {
                probe_in_flight,
                claimed_at,
            } => {
                let stale = claimed_at.is_some_and(|t| t.elapsed() >= self.open_duration);
                if !probe_in_flight || stale {
                    self.state = CircuitState::HalfOpen {
                        probe_in_flight: true,
                        claimed_at: Some(Instant::now()),
                    };
                    Availability::Probe
                } else {
                    Availability::Unavailable
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&mut self, latency_ms: u64) {
        self.total_calls += 1;
        self.last_latency_ms = Some(latency_ms);
        // Probe success confirms recovery; any success zeroes the counter.
        self.state = CircuitState::Closed {
            consecutive_failures: 0,
        };
    }

    /// Record a failed call.
    pub fn record_failure(&mut self, error: &ProviderError, latency_ms: u64) {
        self.total_calls += 1;
        self.total_failures += 1;
        self.last_latency_ms = Some(latency_ms);
        self.last_error = Some(error.to_string());

        match &self.state {
            CircuitState::Closed {
                consecutive_failures,
            } => {
                let count = consecutive_failures + 1;
                if count >= self.failure_threshold {
                    self.state = CircuitState::Open {
                        opened_at: Instant::now(),
                        wait_duration: self.open_duration,
                    };
                } else {
                    self.state = CircuitState::Closed {
                        consecutive_failures: count,
                    };
                }
            }
            CircuitState::HalfOpen { .. } => {
                // Probe failed, reopen for a fresh wait.
                self.state = CircuitState::Open {
                    opened_at: Instant::now(),
                    wait_duration: self.open_duration,
                };
            }
            CircuitState::Open { .. } => {}
        }
    }

    fn to_status(&self) -> ProviderStatus {
        let circuit_state = match &self.state {
            CircuitState::Closed { .. } => "closed".to_string(),
            CircuitState::Open { .. } => "open".to_string(),
            CircuitState::HalfOpen { .. } => "half_open".to_string(),
        };
        ProviderStatus {
            id: self.id.clone(),
            circuit_state,
            last_error: self.last_error.clone(),
            last_latency_ms: self.last_latency_ms,
            total_calls: self.total_calls,
            total_failures: self.total_failures,
        }
    }
}

/// Default consecutive-failure threshold before opening a circuit.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Default wait before a half-open probe is allowed.
pub const DEFAULT_OPEN_DURATION: Duration = Duration::from_secs(30);

/// Shared circuit breaker state for all providers.
///
/// Backed by a concurrent map; each transition runs under the provider's
/// entry lock so concurrent callers cannot both claim a probe slot.
pub struct HealthMonitor {
    providers: DashMap<String, ProviderHealth>,
    failure_threshold: u32,
    open_duration: Duration,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_FAILURE_THRESHOLD, DEFAULT_OPEN_DURATION)
    }

    pub fn with_settings(failure_threshold: u32, open_duration: Duration) -> Self {
        Self {
            providers: DashMap::new(),
            failure_threshold,
            open_duration,
        }
    }

    /// Ensure a tracker exists for `provider_id`.
    pub fn register(&self, provider_id: &str) {
        self.providers
            .entry(provider_id.to_string())
            .or_insert_with(|| {
                ProviderHealth::new(provider_id, self.failure_threshold, self.open_duration)
            });
    }

    /// Claim availability for one call to `provider_id`.
    pub fn try_acquire(&self, provider_id: &str) -> Availability {
        self.register(provider_id);
        match self.providers.get_mut(provider_id) {
            Some(mut health) => health.try_acquire(),
            None => Availability::Unavailable,
        }
    }

    /// Record the outcome of a call.
    pub fn record_outcome(
        &self,
        provider_id: &str,
        outcome: Result<(), &ProviderError>,
        latency_ms: u64,
    ) {
        self.register(provider_id);
        if let Some(mut health) = self.providers.get_mut(provider_id) {
            match outcome {
                Ok(()) => health.record_success(latency_ms),
                Err(error) => {
                    health.record_failure(error, latency_ms);
                    if matches!(health.state, CircuitState::Open { .. }) {
                        tracing::warn!(
                            provider = provider_id,
                            error = %error,
                            "circuit opened"
                        );
                    }
                }
            }
        }
    }

    /// Snapshot of all tracked providers, sorted by id.
    pub fn status(&self) -> Vec<ProviderStatus> {
        let mut statuses: Vec<ProviderStatus> = self
            .providers
            .iter()
            .map(|entry| entry.value().to_status())
            .collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}
