//! Reconnect scheduler state machine.
//!
//! A pure state machine: every input returns the [`Effect`]s the owner must
//! carry out (dial, publish connection flags, arm the retry timer, ...). It
//! holds no timers or sockets itself, which keeps the retry policy testable
//! without a runtime.
//!
//! ```text
//!   IDLE ──connect──► CONNECTING ──open──► OPEN
//!                         ▲   │              │
//!               retry     │   │ close        │ close
//!               elapsed   │   ▼              ▼
//!                         └── CLOSED ◄───────┘
//!
//!   any ──disconnect──► IDLE
//! ```
//!
//! There is no terminal failure state: every close re-arms the retry timer.

use std::time::Duration;

use crate::model::ConnectionState;

/// Scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Not trying to connect.
    Idle,
    /// Dial in flight.
    Connecting,
    /// Event channel open.
    Open,
    /// Waiting out the retry delay.
    Closed,
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Start a transport connection.
    Dial,
    /// Tear down the transport connection.
    Hangup,
    /// Write the connection domain.
    Publish(ConnectionState),
    /// Replace the status domain with the unavailable snapshot.
    MarkUnavailable,
    /// Re-fetch every domain.
    RefreshAll,
    /// Start the keep-alive probe.
    StartHeartbeat,
    /// Stop the keep-alive probe.
    StopHeartbeat,
    /// Schedule a retry after the delay.
    ArmRetry(Duration),
    /// Drop any scheduled retry.
    CancelRetry,
}

/// Drives the event channel through connect, failure and retry.
#[derive(Debug, Clone)]
pub struct ReconnectScheduler {
    state: LinkState,
    retry_delay: Duration,
    failures: u32,
}

impl ReconnectScheduler {
    /// Creates an idle scheduler retrying after `retry_delay`.
    pub fn new(retry_delay: Duration) -> Self {
        Self {
            state: LinkState::Idle,
            retry_delay,
            failures: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Consecutive failed attempts since the last successful open.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Operator or startup request to connect.
    pub fn connect(&mut self) -> Vec<Effect> {
        match self.state {
            LinkState::Idle | LinkState::Closed => self.begin_attempt(),
            LinkState::Connecting | LinkState::Open => Vec::new(),
        }
    }

    /// The transport finished its handshake.
    pub fn on_open(&mut self) -> Vec<Effect> {
        match self.state {
            LinkState::Connecting => {
                self.state = LinkState::Open;
                self.failures = 0;
                vec![
                    Effect::Publish(ConnectionState::CONNECTED),
                    Effect::RefreshAll,
                    Effect::StartHeartbeat,
                ]
            }
            other => {
                log::debug!("[Link] open ignored in {:?}", other);
                Vec::new()
            }
        }
    }

    /// The transport closed or failed to dial.
    pub fn on_close(&mut self) -> Vec<Effect> {
        let mut effects = match self.state {
            LinkState::Open => vec![Effect::StopHeartbeat],
            LinkState::Connecting => Vec::new(),
            LinkState::Idle | LinkState::Closed => {
                log::debug!("[Link] close ignored in {:?}", self.state);
                return Vec::new();
            }
        };

        self.state = LinkState::Closed;
        self.failures = self.failures.saturating_add(1);
        log::info!(
            "[Link] Event channel down (failure {}), retrying in {}ms",
            self.failures,
            self.retry_delay.as_millis()
        );
        effects.extend([
            Effect::Publish(ConnectionState::DISCONNECTED),
            Effect::MarkUnavailable,
            Effect::ArmRetry(self.retry_delay),
        ]);
        effects
    }

    /// The retry delay elapsed.
    pub fn on_retry_elapsed(&mut self) -> Vec<Effect> {
        match self.state {
            LinkState::Closed => self.begin_attempt(),
            _ => Vec::new(),
        }
    }

    /// Operator request to stop using the event channel.
    pub fn disconnect(&mut self) -> Vec<Effect> {
        let was_open = self.state == LinkState::Open;
        self.state = LinkState::Idle;
        self.failures = 0;

        let mut effects = vec![Effect::CancelRetry];
        if was_open {
            effects.push(Effect::StopHeartbeat);
        }
        effects.extend([
            Effect::Hangup,
            Effect::Publish(ConnectionState::DISCONNECTED),
            Effect::MarkUnavailable,
        ]);
        effects
    }

    fn begin_attempt(&mut self) -> Vec<Effect> {
        self.state = LinkState::Connecting;
        vec![
            Effect::CancelRetry,
            Effect::Publish(ConnectionState::ESTABLISHING),
            Effect::Dial,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_millis(4000);

    #[test]
    fn test_connect_from_idle_dials() {
        let mut scheduler = ReconnectScheduler::new(DELAY);
        let effects = scheduler.connect();
        assert_eq!(scheduler.state(), LinkState::Connecting);
        assert!(effects.contains(&Effect::Dial));
        assert!(effects.contains(&Effect::Publish(ConnectionState::ESTABLISHING)));
    }

    #[test]
    fn test_connect_while_connecting_or_open_is_noop() {
        let mut scheduler = ReconnectScheduler::new(DELAY);
        scheduler.connect();
        assert!(scheduler.connect().is_empty());
        scheduler.on_open();
        assert!(scheduler.connect().is_empty());
        assert_eq!(scheduler.state(), LinkState::Open);
    }

    #[test]
    fn test_open_publishes_refreshes_and_starts_heartbeat() {
        let mut scheduler = ReconnectScheduler::new(DELAY);
        scheduler.connect();
        let effects = scheduler.on_open();
        assert_eq!(
            effects,
            vec![
                Effect::Publish(ConnectionState::CONNECTED),
                Effect::RefreshAll,
                Effect::StartHeartbeat,
            ]
        );
    }

    #[test]
    fn test_close_after_open_stops_heartbeat_and_arms_retry() {
        let mut scheduler = ReconnectScheduler::new(DELAY);
        scheduler.connect();
        scheduler.on_open();
        let effects = scheduler.on_close();
        assert_eq!(scheduler.state(), LinkState::Closed);
        assert_eq!(
            effects,
            vec![
                Effect::StopHeartbeat,
                Effect::Publish(ConnectionState::DISCONNECTED),
                Effect::MarkUnavailable,
                Effect::ArmRetry(DELAY),
            ]
        );
    }

    #[test]
    fn test_every_failure_rearms_retry() {
        let mut scheduler = ReconnectScheduler::new(DELAY);
        scheduler.connect();
        for attempt in 1..=5 {
            let effects = scheduler.on_close();
            assert!(effects.contains(&Effect::ArmRetry(DELAY)), "attempt {attempt}");
            assert_eq!(scheduler.failures(), attempt);
            let effects = scheduler.on_retry_elapsed();
            assert!(effects.contains(&Effect::Dial));
            assert_eq!(scheduler.state(), LinkState::Connecting);
        }
        scheduler.on_open();
        assert_eq!(scheduler.failures(), 0);
    }

    #[test]
    fn test_disconnect_goes_idle_and_ignores_later_close() {
        let mut scheduler = ReconnectScheduler::new(DELAY);
        scheduler.connect();
        scheduler.on_open();
        let effects = scheduler.disconnect();
        assert_eq!(scheduler.state(), LinkState::Idle);
        assert!(effects.contains(&Effect::CancelRetry));
        assert!(effects.contains(&Effect::StopHeartbeat));
        assert!(effects.contains(&Effect::Hangup));
        assert!(effects.contains(&Effect::MarkUnavailable));

        assert!(scheduler.on_close().is_empty());
        assert!(scheduler.on_retry_elapsed().is_empty());
    }

    #[test]
    fn test_connect_during_backoff_dials_immediately() {
        let mut scheduler = ReconnectScheduler::new(DELAY);
        scheduler.connect();
        scheduler.on_close();
        let effects = scheduler.connect();
        assert_eq!(effects[0], Effect::CancelRetry);
        assert!(effects.contains(&Effect::Dial));
    }

    #[test]
    fn test_stray_open_is_ignored() {
        let mut scheduler = ReconnectScheduler::new(DELAY);
        assert!(scheduler.on_open().is_empty());
        assert_eq!(scheduler.state(), LinkState::Idle);
    }
}
