//! Live state synchronization engine.
//!
//! # Architecture
//!
//! ```text
//!   SyncHandle ──Command──►┐
//!                          │
//!   Transport ──event─────►│   Synchronizer (one task, one select! loop)
//!   Debouncer ──fired─────►│     owns: Transport, ReconnectScheduler,
//!   Heartbeat ──tick──────►│           Heartbeat, Debouncer, Pollers
//!   retry timer ──────────►┘
//!                                    │ whole-value writes
//!                                    ▼
//!   polling loops ──────────────► StateStore ──watch──► renderers
//! ```
//!
//! The synchronizer never blocks on I/O itself: fetches run as short
//! spawned tasks (tracked in a `JoinSet` so they can be aborted when the
//! link drops) and polling loops run on their own tasks behind a
//! [`polling::Poller`].
//!
//! # Modes
//!
//! - [`SyncMode::Events`]: push channel plus the file status RUN loop.
//! - [`SyncMode::Polling`]: no push channel; status, settings and file
//!   status loops. The status loop owns the connection domain.
//! - [`SyncMode::Hybrid`]: push channel plus every polling loop.

// Rust guideline compliant 2026-02

pub mod debounce;
pub mod events;
pub mod polling;

use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Sleep;

use crate::api::Backend;
use crate::constants;
use crate::link::{Dialer, Effect, Heartbeat, ReconnectScheduler, Transport, TransportEvent};
use crate::model::ConnectionState;
use crate::store::StateStore;

use debounce::Debouncer;
use events::Routed;
use polling::{ConnectionRole, Feed, PollPolicy, Poller};

/// Which update mechanisms keep the store live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Push events, with file status polled only while running.
    #[default]
    Events,
    /// Fixed-cadence polling only.
    Polling,
    /// Push events and polling together.
    Hybrid,
}

impl SyncMode {
    /// Whether the push channel is used.
    pub fn uses_event_channel(self) -> bool {
        matches!(self, Self::Events | Self::Hybrid)
    }

    /// Whether status and settings are polled.
    pub fn polls_domains(self) -> bool {
        matches!(self, Self::Polling | Self::Hybrid)
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Events => "events",
            Self::Polling => "polling",
            Self::Hybrid => "hybrid",
        })
    }
}

impl FromStr for SyncMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "events" => Ok(Self::Events),
            "polling" => Ok(Self::Polling),
            "hybrid" => Ok(Self::Hybrid),
            other => anyhow::bail!("unknown sync mode {other:?} (expected events, polling or hybrid)"),
        }
    }
}

/// Everything the synchronizer needs to know up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// WebSocket URL of the push channel.
    pub event_url: String,
    /// Update mechanisms in use.
    pub mode: SyncMode,
    /// Keep-alive period on an open push channel.
    pub heartbeat_interval: Duration,
    /// Delay before every reconnect attempt.
    pub reconnect_delay: Duration,
    /// Status polling cadence.
    pub status: PollPolicy,
    /// Settings polling cadence.
    pub settings: PollPolicy,
    /// File status polling cadence while running.
    pub file_status: PollPolicy,
    /// Quiet period for change signals.
    pub debounce_quiet: Duration,
}

impl SyncConfig {
    /// Default timings for the push channel at `event_url`.
    pub fn new(event_url: impl Into<String>) -> Self {
        Self {
            event_url: event_url.into(),
            mode: SyncMode::default(),
            heartbeat_interval: constants::HEARTBEAT_INTERVAL,
            reconnect_delay: constants::RECONNECT_DELAY,
            status: PollPolicy {
                interval: constants::STATUS_POLL_INTERVAL,
                failure_backoff: constants::STATUS_FAILURE_BACKOFF,
            },
            settings: PollPolicy {
                interval: constants::SETTINGS_POLL_INTERVAL,
                failure_backoff: constants::SETTINGS_FAILURE_BACKOFF,
            },
            file_status: PollPolicy {
                interval: constants::FILE_STATUS_POLL_INTERVAL,
                failure_backoff: constants::FILE_STATUS_FAILURE_BACKOFF,
            },
            debounce_quiet: constants::DEBOUNCE_QUIET_PERIOD,
        }
    }

    /// Same config with a different mode.
    #[must_use]
    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Request from a [`SyncHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Connect,
    Disconnect,
    Shutdown,
}

/// Cloneable handle to a running [`Synchronizer`].
///
/// Renderers read the store through it and trigger connect, disconnect and
/// shutdown. When every handle is dropped the synchronizer shuts down.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    store: StateStore,
    commands_tx: mpsc::UnboundedSender<Command>,
}

impl SyncHandle {
    /// The store this synchronizer writes.
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Start (or resume) synchronization. No-op while already connected.
    pub fn connect(&self) {
        self.send(Command::Connect);
    }

    /// Stop synchronization and mark the machine unavailable.
    pub fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    /// Disconnect and end the synchronizer task.
    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    /// Whether the synchronizer task is still accepting commands.
    pub fn is_running(&self) -> bool {
        !self.commands_tx.is_closed()
    }

    fn send(&self, command: Command) {
        if self.commands_tx.send(command).is_err() {
            log::debug!("[Sync] {:?} ignored, synchronizer stopped", command);
        }
    }
}

/// Owner of every moving part of the synchronization core.
#[derive(Debug)]
pub struct Synchronizer {
    config: SyncConfig,
    backend: Arc<dyn Backend>,
    store: StateStore,
    transport: Transport,
    link_rx: mpsc::UnboundedReceiver<TransportEvent>,
    scheduler: ReconnectScheduler,
    heartbeat: Heartbeat,
    retry: Option<Pin<Box<Sleep>>>,
    debouncer: Debouncer<Feed>,
    fired_rx: mpsc::UnboundedReceiver<Feed>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
    status_poller: Poller,
    settings_poller: Poller,
    file_poller: Poller,
    fetches: JoinSet<()>,
}

impl Synchronizer {
    /// Builds a synchronizer and its handle. Nothing runs until [`Self::run`].
    pub fn new(
        config: SyncConfig,
        backend: Arc<dyn Backend>,
        dialer: Arc<dyn Dialer>,
    ) -> (Self, SyncHandle) {
        let store = StateStore::new();
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (debouncer, fired_rx) = Debouncer::new(config.debounce_quiet);

        let handle = SyncHandle {
            store: store.clone(),
            commands_tx,
        };
        let synchronizer = Self {
            transport: Transport::new(dialer, link_tx),
            link_rx,
            scheduler: ReconnectScheduler::new(config.reconnect_delay),
            heartbeat: Heartbeat::new(config.heartbeat_interval),
            retry: None,
            debouncer,
            fired_rx,
            commands_rx,
            status_poller: Poller::new(),
            settings_poller: Poller::new(),
            file_poller: Poller::new(),
            fetches: JoinSet::new(),
            config,
            backend,
            store,
        };
        (synchronizer, handle)
    }

    /// Connects and keeps the store in sync until shut down.
    pub async fn run(mut self) {
        log::info!(
            "[Sync] Starting in {} mode ({})",
            self.config.mode,
            self.config.event_url
        );
        self.on_connect();

        loop {
            tokio::select! {
                command = self.commands_rx.recv() => match command {
                    Some(Command::Connect) => self.on_connect(),
                    Some(Command::Disconnect) => self.on_disconnect(),
                    Some(Command::Shutdown) | None => break,
                },

                Some(event) = self.link_rx.recv() => self.on_transport_event(event),

                Some(feed) = self.fired_rx.recv() => self.spawn_refresh(feed),

                () = self.heartbeat.tick() => self.on_heartbeat(),

                () = retry_elapsed(&mut self.retry) => {
                    self.retry = None;
                    let effects = self.scheduler.on_retry_elapsed();
                    self.apply(effects);
                }

                Some(_) = self.fetches.join_next(), if !self.fetches.is_empty() => {}
            }
        }

        self.on_disconnect();
        log::info!("[Sync] Stopped");
    }

    fn on_connect(&mut self) {
        if self.config.mode.uses_event_channel() {
            let effects = self.scheduler.connect();
            self.apply(effects);
        } else if !self.status_poller.is_running() {
            self.store.set_connection(ConnectionState::ESTABLISHING);
        }
        self.ensure_polling();
    }

    fn on_disconnect(&mut self) {
        self.stop_polling();
        self.debouncer.cancel_all();
        while self.fired_rx.try_recv().is_ok() {}
        if self.config.mode.uses_event_channel() {
            let effects = self.scheduler.disconnect();
            self.apply(effects);
        } else {
            self.apply(vec![
                Effect::Publish(ConnectionState::DISCONNECTED),
                Effect::MarkUnavailable,
            ]);
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened { generation } => {
                if self.transport.is_current(generation) {
                    let effects = self.scheduler.on_open();
                    self.apply(effects);
                } else {
                    log::debug!("[Sync] Ignoring open of superseded link #{}", generation);
                }
            }
            TransportEvent::Message { generation, text } => {
                if self.transport.is_current(generation) {
                    let routed = events::route(&text);
                    self.apply_routed(routed);
                }
            }
            TransportEvent::Closed { generation, reason } => {
                if self.transport.release(generation) {
                    log::debug!("[Sync] Link #{} failed: {}", generation, reason);
                    let effects = self.scheduler.on_close();
                    self.apply(effects);
                } else {
                    log::debug!("[Sync] Ignoring close of link #{}", generation);
                }
            }
        }
    }

    fn apply_routed(&mut self, routed: Routed) {
        match routed {
            Routed::Status(status) => self.store.replace_status(status),
            Routed::FileStateChanged => self.spawn_refresh(Feed::FileStatus),
            Routed::SettingChanged => self.debouncer.signal(Feed::Settings),
            Routed::Dropped(_) => {}
        }
    }

    fn on_heartbeat(&mut self) {
        if !self.transport.is_connected() {
            log::debug!("[Sync] Heartbeat stopping, no link");
            self.heartbeat.stop();
            return;
        }
        if !self.transport.send(constants::KEEPALIVE_PAYLOAD) {
            log::trace!("[Sync] Keep-alive not sent");
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Dial => {
                    if !self.transport.connect(&self.config.event_url) {
                        log::warn!("[Sync] Dial skipped, a link is still active");
                    }
                }
                Effect::Hangup => self.transport.disconnect(),
                Effect::Publish(connection) => self.store.set_connection(connection),
                Effect::MarkUnavailable => {
                    // In-flight fetches must not resurrect a stale status.
                    self.fetches.abort_all();
                    self.store.mark_status_unavailable();
                }
                Effect::RefreshAll => {
                    for feed in Feed::ALL {
                        self.spawn_refresh(feed);
                    }
                }
                Effect::StartHeartbeat => self.heartbeat.start(),
                Effect::StopHeartbeat => self.heartbeat.stop(),
                Effect::ArmRetry(delay) => self.retry = Some(Box::pin(tokio::time::sleep(delay))),
                Effect::CancelRetry => self.retry = None,
            }
        }
    }

    /// One-shot fetch of `feed`, degrading the domain on failure.
    fn spawn_refresh(&mut self, feed: Feed) {
        let backend = Arc::clone(&self.backend);
        let store = self.store.clone();
        self.fetches.spawn(async move {
            polling::refresh_or_degrade(feed, &*backend, &store).await;
        });
    }

    /// Starts whichever loops this mode wants and are not running yet.
    fn ensure_polling(&mut self) {
        let mode = self.config.mode;

        if mode.polls_domains() {
            if !self.status_poller.is_running() {
                let (backend, store) = (Arc::clone(&self.backend), self.store.clone());
                let policy = self.config.status;
                // Hybrid status follows the event channel so a dropped link
                // keeps showing UNAVAILABLE.
                let role = if mode == SyncMode::Polling {
                    ConnectionRole::Publish
                } else {
                    ConnectionRole::Follow
                };
                self.status_poller.start(move |cancel| {
                    polling::run_poll_loop(Feed::Status, policy, backend, store, cancel, role)
                });
            }
            if !self.settings_poller.is_running() {
                let (backend, store) = (Arc::clone(&self.backend), self.store.clone());
                let policy = self.config.settings;
                self.settings_poller.start(move |cancel| {
                    polling::run_poll_loop(Feed::Settings, policy, backend, store, cancel, ConnectionRole::Ignore)
                });
            }
        }

        if !self.file_poller.is_running() {
            let (backend, store) = (Arc::clone(&self.backend), self.store.clone());
            let policy = self.config.file_status;
            self.file_poller
                .start(move |cancel| polling::run_file_status_loop(policy, backend, store, cancel));
        }
    }

    fn stop_polling(&mut self) {
        self.status_poller.stop();
        self.settings_poller.stop();
        self.file_poller.stop();
    }
}

/// Completes when the armed retry timer fires; pends while none is armed.
async fn retry_elapsed(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}
