//! Transport wrapper owning at most one live event channel connection.
//!
//! [`Transport::connect`] spawns a link task that dials, reports
//! [`TransportEvent::Opened`], forwards inbound text frames as
//! [`TransportEvent::Message`], writes queued outbound payloads, and reports
//! [`TransportEvent::Closed`] when the connection ends for any reason
//! (including a failed dial).
//!
//! Every link gets a generation number. Events carry it so the owner can
//! tell a live link's events from those of a link it already replaced or
//! hung up.

// Rust guideline compliant 2026-02

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Dialer, FrameSink, FrameSource};
use crate::ws::WsMessage;

/// Lifecycle notification from a link task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed.
    Opened {
        /// Link generation.
        generation: u64,
    },
    /// Inbound text frame.
    Message {
        /// Link generation.
        generation: u64,
        /// Frame payload.
        text: String,
    },
    /// Link ended (dial failure, server close, read/write error, hang-up).
    Closed {
        /// Link generation.
        generation: u64,
        /// Human-readable cause.
        reason: String,
    },
}

/// Handle to the running link task.
#[derive(Debug)]
struct ActiveLink {
    generation: u64,
    outbound_tx: mpsc::UnboundedSender<String>,
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
}

/// Owner of the single event channel connection.
#[derive(Debug)]
pub struct Transport {
    dialer: Arc<dyn Dialer>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    active: Option<ActiveLink>,
    /// Generation of the most recently started link.
    generation: u64,
    /// Set by [`Self::disconnect`]; a hung-up link's close is not a failure.
    hung_up: bool,
}

impl Transport {
    /// Creates a disconnected transport reporting to `events_tx`.
    pub fn new(dialer: Arc<dyn Dialer>, events_tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            dialer,
            events_tx,
            active: None,
            generation: 0,
            hung_up: false,
        }
    }

    /// Starts a connection to `address` unless one is already active.
    ///
    /// Returns `true` if a new link task was started.
    pub fn connect(&mut self, address: &str) -> bool {
        if let Some(active) = &self.active {
            log::debug!(
                "[Link] connect ignored, link #{} still active",
                active.generation
            );
            return false;
        }

        self.generation += 1;
        self.hung_up = false;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        log::info!("[Link] Connecting to {} (link #{})", address, self.generation);
        tokio::spawn(run_link(LinkTask {
            dialer: Arc::clone(&self.dialer),
            address: address.to_string(),
            generation: self.generation,
            events_tx: self.events_tx.clone(),
            outbound_rx,
            open: Arc::clone(&open),
            cancel: cancel.clone(),
        }));

        self.active = Some(ActiveLink {
            generation: self.generation,
            outbound_tx,
            open,
            cancel,
        });
        true
    }

    /// Closes and clears the active link. Safe to call when disconnected.
    pub fn disconnect(&mut self) {
        self.hung_up = true;
        if let Some(active) = self.active.take() {
            log::info!("[Link] Hanging up link #{}", active.generation);
            active.cancel.cancel();
        }
    }

    /// Whether a link handle is held (it may still be dialing).
    pub fn is_connected(&self) -> bool {
        self.active.is_some()
    }

    /// Whether the held link completed its handshake and is still up.
    pub fn is_open(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.open.load(Ordering::SeqCst))
    }

    /// Whether `generation` is the link currently held.
    pub fn is_current(&self, generation: u64) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.generation == generation)
    }

    /// Best-effort send.
    ///
    /// Dropped silently when there is no link or it is not open yet. If the
    /// link task has already ended, the stale handle is discarded. Returns
    /// whether the payload was queued.
    pub fn send(&mut self, payload: &str) -> bool {
        let Some(active) = &self.active else {
            log::trace!("[Link] send dropped, no link");
            return false;
        };

        if active.outbound_tx.is_closed() {
            log::debug!("[Link] Discarding stale link #{}", active.generation);
            self.active = None;
            return false;
        }

        if !active.open.load(Ordering::SeqCst) {
            log::trace!("[Link] send dropped, link #{} not open", active.generation);
            return false;
        }

        active.outbound_tx.send(payload.to_string()).is_ok()
    }

    /// Handles a `Closed` event for `generation`.
    ///
    /// Clears the handle if it belongs to that link and returns `true` when
    /// the close is a failure of the latest link (as opposed to a superseded
    /// or deliberately hung-up one).
    pub fn release(&mut self, generation: u64) -> bool {
        if self.is_current(generation) {
            self.active = None;
        }
        generation == self.generation && !self.hung_up
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
        }
    }
}

/// Everything a link task owns.
struct LinkTask {
    dialer: Arc<dyn Dialer>,
    address: String,
    generation: u64,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    outbound_rx: mpsc::UnboundedReceiver<String>,
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
}

/// Dial, then pump frames until the link ends. Always emits `Closed` last.
async fn run_link(task: LinkTask) {
    let LinkTask {
        dialer,
        address,
        generation,
        events_tx,
        mut outbound_rx,
        open,
        cancel,
    } = task;

    let dialed = tokio::select! {
        () = cancel.cancelled() => {
            let _ = events_tx.send(TransportEvent::Closed {
                generation,
                reason: "hung up while dialing".to_string(),
            });
            return;
        }
        result = dialer.dial(&address) => result,
    };

    let (mut sink, mut source) = match dialed {
        Ok(halves) => halves,
        Err(e) => {
            log::warn!("[Link] Link #{} failed to connect: {:#}", generation, e);
            let _ = events_tx.send(TransportEvent::Closed {
                generation,
                reason: format!("{e:#}"),
            });
            return;
        }
    };

    open.store(true, Ordering::SeqCst);
    log::info!("[Link] Link #{} open", generation);
    let _ = events_tx.send(TransportEvent::Opened { generation });

    let reason = pump(&mut *sink, &mut *source, &mut outbound_rx, &cancel, generation, &events_tx).await;

    open.store(false, Ordering::SeqCst);
    log::info!("[Link] Link #{} closed: {}", generation, reason);
    let _ = events_tx.send(TransportEvent::Closed { generation, reason });
}

/// Moves frames in both directions; returns why the link ended.
async fn pump(
    sink: &mut dyn FrameSink,
    source: &mut dyn FrameSource,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
    cancel: &CancellationToken,
    generation: u64,
    events_tx: &mpsc::UnboundedSender<TransportEvent>,
) -> String {
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = sink.close().await;
                return "hung up".to_string();
            }

            frame = source.recv() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    let _ = events_tx.send(TransportEvent::Message { generation, text });
                }
                Some(Ok(WsMessage::Ping(data))) => {
                    if let Err(e) = sink.send_pong(data).await {
                        return format!("{e:#}");
                    }
                }
                Some(Ok(WsMessage::Close { code, reason })) => {
                    return format!("closed by server ({code}) {reason}");
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    log::debug!("[Link] Ignoring {} byte binary frame", data.len());
                }
                Some(Ok(WsMessage::Pong(_))) => {}
                Some(Err(e)) => return format!("{e:#}"),
                None => return "stream ended".to_string(),
            },

            Some(payload) = outbound_rx.recv() => {
                if let Err(e) = sink.send_text(&payload).await {
                    return format!("{e:#}");
                }
            }
        }
    }
}
