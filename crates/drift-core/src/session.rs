//! The overlay session controller.
//!
//! Keeps one authenticated, logged-in session with the coordination server.
//! Unexpected disconnects enter a reconnect loop with exponential backoff
//! and jitter, capped at five minutes. Every attempt reads the credentials
//! current in the options store at that moment, so an operator who corrects
//! a bad password mid-loop is picked up on the next try. Shutdown, operator
//! disconnect, invalid credentials, and displacement end the loop.

use crate::config::ConfigSnapshot;
use crate::error::{CoreError, Result};
use crate::events::{Event, EventBus};
use crate::state::{ServerState, StateStore};
use arc_swap::ArcSwap;
use drift_index::SharesIndex;
use drift_proto::{Credentials, DisconnectReason, OverlayClient};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No connection.
    #[default]
    Disconnected,
    /// Transport connection being established.
    Connecting,
    /// Connected, not yet authenticated.
    Connected,
    /// Login in flight.
    LoggingIn,
    /// The working state.
    LoggedIn,
}

/// A point-in-time view of the session, published on the event bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Current phase.
    pub phase: SessionPhase,
    /// Username of the logged-in session.
    pub username: Option<String>,
    /// Server address in use.
    pub address: String,
}

/// Compute the delay before reconnect attempt `attempt` (zero-based),
/// without jitter.
#[must_use]
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 2u64.saturating_pow(attempt);
    let delay = base.saturating_mul(factor.min(u32::MAX as u64) as u32);
    delay.min(cap)
}

/// Add uniform jitter in `[0, 0.1 * delay)`.
fn with_jitter(delay: Duration) -> Duration {
    let jitter = rand::thread_rng().gen_range(0.0..0.1);
    delay + delay.mul_f64(jitter)
}

/// Owns the long-lived server connection.
pub struct SessionController {
    overlay: Arc<dyn OverlayClient>,
    config: Arc<ArcSwap<ConfigSnapshot>>,
    state: Arc<StateStore>,
    events: EventBus,
    index: Arc<SharesIndex>,
    shutdown: CancellationToken,
}

impl SessionController {
    /// Assemble a controller; nothing runs until [`run`](Self::run).
    #[must_use]
    pub fn new(
        overlay: Arc<dyn OverlayClient>,
        config: Arc<ArcSwap<ConfigSnapshot>>,
        state: Arc<StateStore>,
        events: EventBus,
        index: Arc<SharesIndex>,
        shutdown: CancellationToken,
    ) -> Self {
        SessionController {
            overlay,
            config,
            state,
            events,
            index,
            shutdown,
        }
    }

    /// Drive the session until a final disconnect cause or shutdown.
    pub async fn run(self: Arc<Self>) {
        let mut attempt: u32 = 0;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            match self.connect_and_login().await {
                Ok(()) => {
                    attempt = 0;
                    let reason = tokio::select! {
                        _ = self.shutdown.cancelled() => {
                            let _ = self.overlay.disconnect(DisconnectReason::Shutdown).await;
                            DisconnectReason::Shutdown
                        }
                        reason = self.overlay.wait_disconnected() => reason,
                    };

                    self.set_phase(SessionPhase::Disconnected, None);
                    if reason.is_final() {
                        tracing::info!(?reason, "session ended");
                        break;
                    }
                    tracing::warn!(?reason, "connection lost, entering reconnect loop");
                }
                Err(CoreError::Unauthorized(_)) => {
                    // Report and stop; retrying bad credentials hammers the
                    // server for nothing.
                    tracing::error!("login rejected: invalid credentials");
                    self.set_phase(SessionPhase::Disconnected, None);
                    break;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "connection attempt failed");
                    self.set_phase(SessionPhase::Disconnected, None);
                }
            }

            let config = self.config.load();
            let delay = with_jitter(backoff_delay(
                attempt,
                config.server.reconnect_base,
                config.server.reconnect_cap,
            ));
            attempt = attempt.saturating_add(1);
            tracing::info!(attempt, ?delay, "reconnecting after backoff");

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn connect_and_login(&self) -> Result<()> {
        // Credentials current at the moment of this attempt.
        let config = self.config.load_full();
        let credentials = Credentials {
            username: config.server.username.clone(),
            password: config.server.password.clone(),
        };

        self.set_phase(SessionPhase::Connecting, None);
        self.overlay.connect().await?;
        self.set_phase(SessionPhase::Connected, None);

        self.set_phase(SessionPhase::LoggingIn, None);
        let info = self.overlay.login(&credentials).await?;
        tracing::info!(username = %info.username, "logged in to overlay");
        self.set_phase(SessionPhase::LoggedIn, Some(info.username.clone()));

        // Advertise what we share; a failed push is not fatal to the session.
        let (directories, files) = self.index.visible_counts();
        if let Err(err) = self.overlay.set_shared_counts(directories, files).await {
            tracing::warn!(error = %err, "failed to push share counts");
        }

        self.spawn_event_pump();
        Ok(())
    }

    /// Forward server-pushed events onto the bus until the stream ends.
    fn spawn_event_pump(&self) {
        let mut receiver = self.overlay.server_events();
        let events = self.events.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = receiver.recv() => match received {
                        Ok(event) => events.publish(Event::Overlay(event)),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::warn!(missed, "server event pump lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
    }

    fn set_phase(&self, phase: SessionPhase, username: Option<String>) {
        let address = self.config.load().server.address.clone();
        self.state.update(|s| {
            s.with_server(ServerState {
                phase,
                address: address.clone(),
                username: username.clone(),
            })
        });
        self.events.publish(Event::SessionChanged(SessionSnapshot {
            phase,
            username,
            address,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_cap() {
        let base = Duration::from_secs(2);
        let cap = Duration::from_secs(300);

        assert_eq!(backoff_delay(0, base, cap), Duration::from_secs(2));
        assert_eq!(backoff_delay(1, base, cap), Duration::from_secs(4));
        assert_eq!(backoff_delay(2, base, cap), Duration::from_secs(8));
        assert_eq!(backoff_delay(6, base, cap), Duration::from_secs(128));
        // Capped at five minutes from here on.
        assert_eq!(backoff_delay(8, base, cap), cap);
        assert_eq!(backoff_delay(30, base, cap), cap);
    }

    #[test]
    fn test_backoff_survives_huge_attempt_counts() {
        let base = Duration::from_secs(2);
        let cap = Duration::from_secs(300);
        assert_eq!(backoff_delay(u32::MAX, base, cap), cap);
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let delay = Duration::from_secs(100);
        for _ in 0..100 {
            let jittered = with_jitter(delay);
            assert!(jittered >= delay);
            assert!(jittered < delay + Duration::from_secs(10));
        }
    }
}
