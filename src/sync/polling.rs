//! Polling fallback channels.
//!
//! Each feed is an independent fixed-cadence loop that re-fetches one domain
//! over the request/response API. Success writes the whole value into the
//! store and waits the normal interval; failure degrades the domain (so
//! renderers never show a frozen value as live) and waits the failure
//! backoff. A failed fetch is never retried without waiting first.
//!
//! # Design
//!
//! The fetch and degrade steps are regular functions (M-REGULAR-FN) shared
//! by the loops and by one-shot refreshes, making them independently
//! testable.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::api::Backend;
use crate::model::{ConnectionState, ControllerState, FileStatus, MachineStatus, Settings};
use crate::store::{Domain, StateStore};

/// A domain that can be re-fetched from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feed {
    /// Machine status.
    Status,
    /// Settings.
    Settings,
    /// File send progress.
    FileStatus,
}

impl Feed {
    /// Every refreshable feed.
    pub const ALL: [Self; 3] = [Self::Status, Self::Settings, Self::FileStatus];

    /// Store domain this feed writes.
    pub fn domain(self) -> Domain {
        match self {
            Self::Status => Domain::Status,
            Self::Settings => Domain::Settings,
            Self::FileStatus => Domain::FileStatus,
        }
    }
}

/// Cadence and failure backoff of one polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Wait after a successful fetch.
    pub interval: Duration,
    /// Wait after a failed fetch.
    pub failure_backoff: Duration,
}

impl PollPolicy {
    /// Wait before the next attempt given the last outcome.
    pub fn next_delay(&self, succeeded: bool) -> Duration {
        if succeeded {
            self.interval
        } else {
            self.failure_backoff
        }
    }
}

/// How a poll loop relates to the connection domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    /// The loop's outcome decides the connection flags (polling only).
    Publish,
    /// Results are written only while the event channel is connected.
    Follow,
    /// The connection flags play no part.
    Ignore,
}

/// Value returned by one fetch.
enum Fetched {
    Status(MachineStatus),
    Settings(Settings),
    FileStatus(FileStatus),
}

async fn fetch(feed: Feed, backend: &dyn Backend) -> Result<Fetched> {
    Ok(match feed {
        Feed::Status => Fetched::Status(backend.machine_status().await?),
        Feed::Settings => Fetched::Settings(backend.settings().await?),
        Feed::FileStatus => Fetched::FileStatus(backend.file_status().await?),
    })
}

fn store_fetched(fetched: Fetched, store: &StateStore) {
    match fetched {
        Fetched::Status(status) => store.replace_status(status),
        Fetched::Settings(settings) => store.replace_settings(settings),
        Fetched::FileStatus(file_status) => store.replace_file_status(file_status),
    }
}

/// Writes a fetch outcome, degrading the domain on failure.
fn settle(feed: Feed, outcome: Result<Fetched>, store: &StateStore) -> bool {
    match outcome {
        Ok(fetched) => {
            store_fetched(fetched, store);
            true
        }
        Err(e) => {
            log::warn!("[Poll] {} fetch failed: {:#}", feed.domain(), e);
            degrade(feed, store);
            false
        }
    }
}

/// Fetches one feed and replaces its domain value.
pub async fn refresh(feed: Feed, backend: &dyn Backend, store: &StateStore) -> Result<()> {
    store_fetched(fetch(feed, backend).await?, store);
    Ok(())
}

/// Pushes the synthetic value a feed shows after a failed fetch.
///
/// Settings keep their last known value.
pub fn degrade(feed: Feed, store: &StateStore) {
    match feed {
        Feed::Status => store.mark_status_unavailable(),
        Feed::FileStatus => store.replace_file_status(FileStatus::default()),
        Feed::Settings => {}
    }
}

/// Refresh once, degrading the domain on failure. Returns whether it succeeded.
pub async fn refresh_or_degrade(feed: Feed, backend: &dyn Backend, store: &StateStore) -> bool {
    settle(feed, fetch(feed, backend).await, store)
}

/// One loop iteration. `None` once `cancel` fired; nothing is written after
/// that, even for a fetch that was already in flight.
///
/// A [`ConnectionRole::Follow`] loop skips the fetch while the event channel
/// is down and reports success so the normal interval applies.
async fn poll_once(
    feed: Feed,
    role: ConnectionRole,
    backend: &dyn Backend,
    store: &StateStore,
    cancel: &CancellationToken,
) -> Option<bool> {
    if role == ConnectionRole::Follow && !store.connection().is_connected {
        return Some(true);
    }

    let outcome = tokio::select! {
        () = cancel.cancelled() => return None,
        outcome = fetch(feed, backend) => outcome,
    };

    let mut succeeded = true;
    store.write_gated(
        |connection| {
            !cancel.is_cancelled() && (role != ConnectionRole::Follow || connection.is_connected)
        },
        |store, connection| {
            succeeded = settle(feed, outcome, store);
            if role == ConnectionRole::Publish {
                *connection = if succeeded {
                    ConnectionState::CONNECTED
                } else {
                    ConnectionState::DISCONNECTED
                };
            }
        },
    );

    if cancel.is_cancelled() {
        None
    } else {
        Some(succeeded)
    }
}

/// Sleeps for `delay` unless cancelled first; returns `false` on cancel.
async fn wait(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

/// Resolves once the machine reports RUN; `false` if the store went away.
async fn wait_for_run(status_rx: &mut watch::Receiver<MachineStatus>) -> bool {
    loop {
        let running = status_rx.borrow_and_update().state == ControllerState::Run;
        if running {
            return true;
        }
        if status_rx.changed().await.is_err() {
            return false;
        }
    }
}

/// Fixed-cadence loop for one feed.
///
/// `role` decides whether the loop publishes the connection flags, writes
/// only while the event channel is up, or ignores the connection domain.
pub async fn run_poll_loop(
    feed: Feed,
    policy: PollPolicy,
    backend: Arc<dyn Backend>,
    store: StateStore,
    cancel: CancellationToken,
    role: ConnectionRole,
) {
    log::debug!(
        "[Poll] {} loop started (every {}ms, backoff {}ms, {:?})",
        feed.domain(),
        policy.interval.as_millis(),
        policy.failure_backoff.as_millis(),
        role
    );

    while let Some(succeeded) = poll_once(feed, role, &*backend, &store, &cancel).await {
        if !wait(policy.next_delay(succeeded), &cancel).await {
            break;
        }
    }

    log::debug!("[Poll] {} loop stopped", feed.domain());
}

/// File status loop that only polls while the machine is running a program.
///
/// Waits for status RUN, polls at the policy cadence while it lasts, then
/// refreshes once more so the final row counts land in the store.
pub async fn run_file_status_loop(
    policy: PollPolicy,
    backend: Arc<dyn Backend>,
    store: StateStore,
    cancel: CancellationToken,
) {
    let mut status_rx = store.subscribe_status();
    let poll = || poll_once(Feed::FileStatus, ConnectionRole::Ignore, &*backend, &store, &cancel);

    loop {
        let started = tokio::select! {
            () = cancel.cancelled() => false,
            running = wait_for_run(&mut status_rx) => running,
        };
        if !started {
            break;
        }
        log::debug!("[Poll] Machine running, polling file status");

        loop {
            let Some(succeeded) = poll().await else {
                return;
            };
            if !wait(policy.next_delay(succeeded), &cancel).await {
                return;
            }
            let running = status_rx.borrow_and_update().state == ControllerState::Run;
            if !running {
                break;
            }
        }

        log::debug!("[Poll] Machine left RUN, final file status refresh");
        if poll().await.is_none() {
            return;
        }
    }
}

/// Owner of at most one running loop for a feed.
///
/// Starting a loop cancels the previous one first, so there are never two
/// concurrent loops for the same domain.
#[derive(Debug, Default)]
pub struct Poller {
    cancel: Option<CancellationToken>,
}

impl Poller {
    /// Creates an idle poller.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels any running loop and spawns the one built by `make_loop`.
    pub fn start<F, Fut>(&mut self, make_loop: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.stop();
        let cancel = CancellationToken::new();
        tokio::spawn(make_loop(cancel.clone()));
        self.cancel = Some(cancel);
    }

    /// Cancels the running loop, if any.
    pub fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }

    /// Whether a loop is running.
    pub fn is_running(&self) -> bool {
        self.cancel.is_some()
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}
