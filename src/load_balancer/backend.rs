//! Backend abstraction.
//!
//! # Responsibilities
//! - Gateway-side view of one service instance
//! - Track active connections (for Least Connections LB)
//! - Enforce max connection limits
//! - Track health state and a latency EWMA

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::discovery::ServiceInstance;
use crate::health::state::{HealthState, HealthTracker, Thresholds};

/// Weight of the newest sample in the latency EWMA, in 1/8ths.
const EWMA_NEW_SAMPLE_EIGHTHS: u64 = 2;

/// A single backend instance.
#[derive(Debug)]
pub struct Backend {
    /// Registry instance id.
    pub id: String,
    /// `host:port` used as the upstream authority.
    pub address: String,
    pub weight: u32,
    /// Maximum concurrent requests allowed.
    pub max_connections: usize,
    /// Number of in-flight requests.
    pub active_connections: AtomicUsize,

    registry_up: AtomicBool,
    health: HealthTracker,
    latency_ewma_micros: AtomicU64,
}

impl Backend {
    pub fn new(id: impl Into<String>, address: impl Into<String>, weight: u32, max_connections: usize) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            weight,
            max_connections,
            active_connections: AtomicUsize::new(0),
            registry_up: AtomicBool::new(true),
            health: HealthTracker::new(),
            latency_ewma_micros: AtomicU64::new(0),
        }
    }

    pub fn from_instance(instance: &ServiceInstance) -> Self {
        let backend = Self::new(
            instance.id.clone(),
            instance.address(),
            instance.weight,
            instance.max_connections,
        );
        backend.set_registry_up(instance.is_up());
        backend
    }

    /// Get the current number of active connections.
    pub fn active(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Try to create a connection guard that increments count.
    pub fn try_create_guard(self: &Arc<Self>) -> Option<BackendConnectionGuard> {
        let mut prev = self.active_connections.load(Ordering::Relaxed);
        loop {
            if prev >= self.max_connections {
                return None;
            }
            match self.active_connections.compare_exchange_weak(
                prev,
                prev + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => prev = x,
            }
        }
        Some(BackendConnectionGuard {
            backend: self.clone(),
        })
    }

    // --- Registry + health ---

    pub fn set_registry_up(&self, up: bool) {
        self.registry_up.store(up, Ordering::Relaxed);
    }

    pub fn is_registry_up(&self) -> bool {
        self.registry_up.load(Ordering::Relaxed)
    }

    pub fn health(&self) -> HealthState {
        self.health.state()
    }

    /// Registry says up and local checks have not marked it unhealthy.
    pub fn is_available(&self) -> bool {
        self.is_registry_up() && self.health.is_available()
    }

    /// Claim the single trial request an unhealthy backend gets per cooldown.
    pub fn try_begin_trial(&self, cooldown: Duration) -> bool {
        self.is_registry_up() && self.health.try_begin_trial(cooldown)
    }

    /// Report a successful request or health check.
    pub fn mark_success(&self, thresholds: Thresholds) -> Option<HealthState> {
        let transition = self.health.record_success(thresholds);
        if let Some(state) = transition {
            tracing::info!(backend = %self.address, state = ?state, "Backend health changed");
        }
        transition
    }

    /// Report a failed request or health check.
    pub fn mark_failure(&self, thresholds: Thresholds) -> Option<HealthState> {
        let transition = self.health.record_failure(thresholds);
        if let Some(state) = transition {
            tracing::warn!(backend = %self.address, state = ?state, "Backend health changed");
        }
        transition
    }

    // --- Latency ---

    /// Fold a completed attempt's latency into the EWMA.
    pub fn record_latency(&self, elapsed: Duration) {
        let sample = elapsed.as_micros().min(u64::MAX as u128) as u64;
        let _ = self
            .latency_ewma_micros
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                if current == 0 {
                    Some(sample.max(1))
                } else {
                    let blended = (current * (8 - EWMA_NEW_SAMPLE_EIGHTHS)
                        + sample * EWMA_NEW_SAMPLE_EIGHTHS)
                        / 8;
                    Some(blended.max(1))
                }
            });
    }

    /// Smoothed latency in microseconds (0 when no sample yet).
    pub fn latency_micros(&self) -> u64 {
        self.latency_ewma_micros.load(Ordering::Relaxed)
    }
}

/// A RAII guard that manages the active connection count.
#[derive(Debug)]
pub struct BackendConnectionGuard {
    pub backend: Arc<Backend>,
}

impl Deref for BackendConnectionGuard {
    type Target = Backend;
    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl Drop for BackendConnectionGuard {
    fn drop(&mut self) {
        self.backend.active_connections.fetch_sub(1, Ordering::Relaxed);
    }
}
