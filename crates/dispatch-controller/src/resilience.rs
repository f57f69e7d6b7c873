//! Connection resilience: the per-session connection state machine and
//! the reconnect backoff schedule.
//!
//! Transport loss does not destroy a session; it enters `Reconnecting`
//! and stays resumable for the configured grace window. The backoff
//! schedule is computed here and advertised to clients so retry behavior
//! is uniform across the fleet.

use dispatch_protocol::types::ReconnectPolicy;
use rand::Rng;
use std::time::Duration;

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    /// Whether moving to `next` is a legal transition.
    ///
    /// Legal paths: `Disconnected -> Connecting -> Connected ->
    /// Reconnecting -> Connected | Disconnected`, with `Disconnected`
    /// reachable from any live state on explicit close.
    #[must_use]
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::{Connected, Connecting, Disconnected, Reconnecting};
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected | Disconnected)
                | (Connected, Reconnecting | Disconnected)
                | (Reconnecting, Connected | Disconnected)
        )
    }

    /// True while the session can still send or resume.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Reconnecting)
    }
}

/// Exponential backoff schedule with jitter.
#[derive(Debug, Clone, Copy)]
pub struct BackoffSchedule {
    base: Duration,
    factor: u32,
    cap: Duration,
}

impl BackoffSchedule {
    #[must_use]
    pub fn new(base: Duration, factor: u32, cap: Duration) -> Self {
        Self { base, factor, cap }
    }

    #[must_use]
    pub fn from_policy(policy: ReconnectPolicy) -> Self {
        Self::new(
            Duration::from_millis(policy.base_ms),
            policy.factor,
            Duration::from_millis(policy.cap_ms),
        )
    }

    /// Deterministic delay for the given attempt: `base * factor^attempt`,
    /// capped.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let mut delay = self.base;
        for _ in 0..attempt {
            delay = delay.saturating_mul(self.factor);
            if delay >= self.cap {
                return self.cap;
            }
        }
        delay.min(self.cap)
    }

    /// Jittered delay: the deterministic delay plus up to 20% extra,
    /// still capped, so simultaneous reconnects spread out.
    #[must_use]
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.delay(attempt);
        let jitter_max = base.as_millis() / 5;
        if jitter_max == 0 {
            return base;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=jitter_max);
        let jitter = Duration::from_millis(u64::try_from(jitter_ms).unwrap_or(u64::MAX));
        (base + jitter).min(self.cap)
    }
}
