//! Registration lifecycle of one service instance.
//!
//! # State Transitions
//! ```text
//! Unregistered → Registering:   process start
//! Registering → Registering:    registry unavailable, retry after backoff
//! Registering → Registered:     register succeeded, heartbeat loop starts
//!                               (or a retry hit our own id after a lost reply)
//! Registering → Unregistered:   conflict, attempts exhausted, or shutdown
//! Registered → Deregistering:   shutdown signal
//! Deregistering → Deregistered: deregister succeeded, or attempts/deadline spent
//! ```
//!
//! # Design Decisions
//! - One registration per manager; its id is never reused
//! - An in-flight register call is never cancelled, so a success racing with
//!   shutdown is still released
//! - Deregistration is best effort; the registry TTL covers the rest

use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::RegistrationConfig;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::registration::ServiceHealth;
use crate::registry::{Registration, RegistryClient, RegistryError};
use crate::resilience::backoff::calculate_backoff;

/// Where an instance is in its registration lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    Registering,
    Registered,
    Deregistering,
    Deregistered,
}

impl RegistrationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationState::Unregistered => "unregistered",
            RegistrationState::Registering => "registering",
            RegistrationState::Registered => "registered",
            RegistrationState::Deregistering => "deregistering",
            RegistrationState::Deregistered => "deregistered",
        }
    }
}

/// Registers an instance, keeps its heartbeat alive and releases it on shutdown.
#[derive(Debug)]
pub struct RegistrationManager {
    registry: Arc<dyn RegistryClient>,
    registration: Registration,
    config: RegistrationConfig,
    health: ServiceHealth,
    state: watch::Sender<RegistrationState>,
}

impl RegistrationManager {
    pub fn new(
        registry: Arc<dyn RegistryClient>,
        registration: Registration,
        config: RegistrationConfig,
        health: ServiceHealth,
    ) -> Self {
        let (state, _) = watch::channel(RegistrationState::Unregistered);
        Self {
            registry,
            registration,
            config,
            health,
            state,
        }
    }

    pub fn service_id(&self) -> &str {
        &self.registration.service_id
    }

    pub fn state(&self) -> RegistrationState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<RegistrationState> {
        self.state.subscribe()
    }

    /// Drive the whole lifecycle until `shutdown` fires. Returns the final state.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> RegistrationState {
        if !self.register(&mut shutdown).await {
            self.transition(RegistrationState::Unregistered);
            return RegistrationState::Unregistered;
        }

        self.renew_until_shutdown(&mut shutdown).await;

        self.transition(RegistrationState::Deregistering);
        self.deregister().await;
        self.transition(RegistrationState::Deregistered);
        RegistrationState::Deregistered
    }

    /// Register with backoff. `true` once the registry accepted the instance.
    async fn register(&self, shutdown: &mut broadcast::Receiver<()>) -> bool {
        self.transition(RegistrationState::Registering);
        let id = &self.registration.service_id;
        let mut attempt: u32 = 0;
        // A failed call may still have landed; the id is ours alone.
        let mut outcome_unknown = false;

        loop {
            attempt += 1;
            match self.registry.register(&self.registration, self.config.call_timeout()).await {
                Err(RegistryError::Conflict(_)) if outcome_unknown => {
                    tracing::info!(
                        instance_id = %id,
                        attempt,
                        "Earlier registration attempt reached the registry, adopting it"
                    );
                    self.transition(RegistrationState::Registered);
                    return true;
                }
                Ok(()) => {
                    tracing::info!(
                        service = %self.registration.service_name,
                        instance_id = %id,
                        address = %self.registration.address,
                        port = self.registration.port,
                        attempt,
                        "Registered with service registry"
                    );
                    self.transition(RegistrationState::Registered);
                    return true;
                }
                Err(RegistryError::Conflict(_)) => {
                    tracing::error!(instance_id = %id, "Instance id already registered, aborting registration");
                    return false;
                }
                Err(e) => {
                    outcome_unknown |= matches!(e, RegistryError::Unavailable(_));
                    if self.config.max_attempts > 0 && attempt >= self.config.max_attempts {
                        tracing::error!(
                            instance_id = %id,
                            attempts = attempt,
                            error = %e,
                            "Giving up on registration, instance stays invisible to discovery"
                        );
                        self.release_unconfirmed(outcome_unknown).await;
                        return false;
                    }

                    let delay = calculate_backoff(
                        attempt,
                        Duration::from_millis(self.config.base_delay_ms),
                        Duration::from_millis(self.config.max_delay_ms),
                    );
                    tracing::warn!(
                        instance_id = %id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Registration failed, retrying"
                    );

                    tokio::select! {
                        _ = time::sleep(delay) => {}
                        _ = shutdown.recv() => {
                            tracing::info!(instance_id = %id, "Shutdown before registration completed");
                            self.release_unconfirmed(outcome_unknown).await;
                            return false;
                        }
                    }
                }
            }
        }
    }

    /// Best-effort removal of a registration whose outcome was never confirmed.
    async fn release_unconfirmed(&self, outcome_unknown: bool) {
        if outcome_unknown {
            self.deregister().await;
        }
    }

    /// Report health every renew interval until shutdown.
    async fn renew_until_shutdown(&self, shutdown: &mut broadcast::Receiver<()>) {
        let period = self.config.renew_interval();
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let id = &self.registration.service_id;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let status = self.health.status();
                    match self.registry.report_health(id, status, self.config.call_timeout()).await {
                        Ok(()) => tracing::trace!(instance_id = %id, status = status.as_str(), "Heartbeat sent"),
                        Err(RegistryError::NotRegistered(_)) => {
                            tracing::error!(instance_id = %id, "Registry no longer knows this instance");
                        }
                        Err(e) => tracing::warn!(instance_id = %id, error = %e, "Heartbeat failed"),
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    }

    /// Deregister this instance, retrying within the shutdown deadline.
    async fn deregister(&self) {
        let id = &self.registration.service_id;
        let deadline = self.config.shutdown_deadline();

        let attempts = async {
            let max = self.config.deregister_attempts.max(1);
            for attempt in 1..=max {
                match self.registry.deregister(id, self.config.call_timeout()).await {
                    Ok(()) => return true,
                    Err(e) => {
                        tracing::warn!(instance_id = %id, attempt, error = %e, "Deregistration failed");
                        if attempt < max {
                            time::sleep(calculate_backoff(
                                attempt,
                                Duration::from_millis(self.config.base_delay_ms),
                                Duration::from_millis(self.config.max_delay_ms),
                            ))
                            .await;
                        }
                    }
                }
            }
            false
        };

        match time::timeout(deadline, attempts).await {
            Ok(true) => tracing::info!(instance_id = %id, "Deregistered from service registry"),
            Ok(false) => tracing::error!(instance_id = %id, "Deregistration abandoned, registry TTL will expire it"),
            Err(_) => tracing::error!(
                instance_id = %id,
                deadline_ms = deadline.as_millis() as u64,
                "Deregistration deadline exceeded, registry TTL will expire it"
            ),
        }
    }

    fn transition(&self, next: RegistrationState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = previous.as_str(), to = next.as_str(), "Registration state changed");
            metrics::record_registration_state(next.as_str());
        }
    }
}

/// Release the registration once the service has stopped serving, whether it
/// stopped on a shutdown signal or with an error, then hand back `served`.
///
/// `grace` bounds the wait for the registration task.
pub async fn release_after_serve(
    served: io::Result<()>,
    shutdown: &Shutdown,
    registration: JoinHandle<RegistrationState>,
    grace: Duration,
) -> io::Result<()> {
    if let Err(e) = &served {
        tracing::error!(error = %e, "Server failed, releasing registration");
    }
    shutdown.trigger();

    match time::timeout(grace, registration).await {
        Ok(Ok(state)) => tracing::info!(state = state.as_str(), "Registration released"),
        Ok(Err(e)) => tracing::error!(error = %e, "Registration task failed"),
        Err(_) => tracing::error!("Registration did not finish before the deadline"),
    }
    served
}
