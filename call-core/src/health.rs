use chrono::{Duration, NaiveDateTime};

use crate::session::ConnectionHealth;

/// What the driver observed about the network path of the current attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathState {
    /// A usable path exists (ICE `connected` or `completed`).
    Connected,
    /// Transient loss (ICE `disconnected`), may recover on its own.
    Disconnected,
    /// No path left (ICE `failed`).
    Failed,
}

/// Verdict of a tick.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum HealthCheck {
    Fine,
    ProbeDue,
    Expired,
}

/// Tracks path health once a session has connected.
#[derive(Debug)]
pub(crate) struct HealthMonitor {
    health: ConnectionHealth,
    degraded_since: Option<NaiveDateTime>,
    last_probe: Option<NaiveDateTime>,
    probe_interval: Duration,
    degraded_timeout: Duration,
}

impl HealthMonitor {
    pub(crate) fn new(probe_interval: Duration, degraded_timeout: Duration) -> Self {
        Self {
            health: ConnectionHealth::Unknown,
            degraded_since: None,
            last_probe: None,
            probe_interval,
            degraded_timeout,
        }
    }

    pub(crate) fn health(&self) -> ConnectionHealth {
        self.health
    }

    /// Applies a path report and returns the resulting health.
    pub(crate) fn observe(&mut self, state: PathState, now: NaiveDateTime) -> ConnectionHealth {
        match state {
            PathState::Connected => {
                self.health = ConnectionHealth::Connected;
                self.degraded_since = None;
            }
            PathState::Disconnected => match self.health {
                ConnectionHealth::Connected => {
                    self.health = ConnectionHealth::Degraded;
                    self.degraded_since = Some(now);
                }
                // not connected yet, or already degraded: the clock keeps running
                ConnectionHealth::Unknown
                | ConnectionHealth::Degraded
                | ConnectionHealth::Failed => {}
            },
            PathState::Failed => {
                self.health = ConnectionHealth::Failed;
            }
        }
        self.health
    }

    pub(crate) fn check(&mut self, now: NaiveDateTime) -> HealthCheck {
        match self.health {
            ConnectionHealth::Unknown => HealthCheck::Fine,
            ConnectionHealth::Failed => HealthCheck::Expired,
            ConnectionHealth::Degraded
                if self
                    .degraded_since
                    .map_or(false, |since| now - since >= self.degraded_timeout) =>
            {
                HealthCheck::Expired
            }
            ConnectionHealth::Connected | ConnectionHealth::Degraded => {
                let due = self
                    .last_probe
                    .map_or(true, |last| now - last >= self.probe_interval);
                if due {
                    self.last_probe = Some(now);
                    HealthCheck::ProbeDue
                } else {
                    HealthCheck::Fine
                }
            }
        }
    }
}
