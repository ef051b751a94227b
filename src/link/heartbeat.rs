//! Keep-alive probe for an open event channel.
//!
//! The heartbeat is a stoppable interval timer polled from the owner's
//! `select!` loop. It never declares a link dead; failure detection belongs
//! to the transport's close event.

use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Fixed-interval probe timer.
#[derive(Debug)]
pub struct Heartbeat {
    period: Duration,
    timer: Option<Interval>,
}

impl Heartbeat {
    /// Creates a stopped heartbeat firing every `period` once started.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            timer: None,
        }
    }

    /// Starts (or restarts) the probe; the first tick is one period away.
    pub fn start(&mut self) {
        let mut timer = interval_at(Instant::now() + self.period, self.period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.timer = Some(timer);
    }

    /// Cancels the probe. Safe when already stopped.
    pub fn stop(&mut self) {
        self.timer = None;
    }

    /// Whether the probe is running.
    pub fn is_running(&self) -> bool {
        self.timer.is_some()
    }

    /// Completes at the next tick; never completes while stopped.
    pub async fn tick(&mut self) {
        match &mut self.timer {
            Some(timer) => {
                timer.tick().await;
            }
            None => std::future::pending().await,
        }
    }
}
