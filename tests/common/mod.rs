// In-memory dialer and backend shared by the integration tests.
//
// FakeDialer fails a scripted number of dials, then hands out connections
// whose far end the test drives (push frames, drop the link, read what the
// client sent). FakeBackend serves canned values and counts every call.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use pendant_link::api::{Backend, ConnectionParam, FileCommand, MachineCommand};
use pendant_link::link::{Dialer, FrameSink, FrameSource};
use pendant_link::model::{ControllerState, FileStatus, MachineStatus, Settings};
use pendant_link::ws::WsMessage;

/// Far end of one fake connection.
#[derive(Debug)]
struct Remote {
    inbound_tx: mpsc::UnboundedSender<WsMessage>,
    outbound_rx: mpsc::UnboundedReceiver<String>,
}

/// Decrements the live connection count when the link drops its reader.
#[derive(Debug)]
struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct FakeSink(mpsc::UnboundedSender<String>);

struct FakeSource {
    inbound_rx: mpsc::UnboundedReceiver<WsMessage>,
    _live: LiveGuard,
}

#[async_trait]
impl FrameSink for FakeSink {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.0
            .send(text.to_string())
            .map_err(|_| anyhow::anyhow!("remote gone"))
    }

    async fn send_pong(&mut self, _data: Vec<u8>) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl FrameSource for FakeSource {
    async fn recv(&mut self) -> Option<Result<WsMessage>> {
        self.inbound_rx.recv().await.map(Ok)
    }
}

/// Scripted dialer.
#[derive(Debug, Default)]
pub struct FakeDialer {
    failures_remaining: AtomicU32,
    dial_times: Mutex<Vec<Instant>>,
    live: Arc<AtomicUsize>,
    max_live: AtomicUsize,
    remotes: Mutex<Vec<Remote>>,
}

impl FakeDialer {
    /// Dialer whose first `failures` dials are refused.
    pub fn failing(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures_remaining: AtomicU32::new(failures),
            ..Self::default()
        })
    }

    /// Dialer that always connects.
    pub fn reliable() -> Arc<Self> {
        Self::failing(0)
    }

    /// When each dial happened.
    pub fn dial_times(&self) -> Vec<Instant> {
        self.dial_times.lock().unwrap().clone()
    }

    pub fn dial_count(&self) -> usize {
        self.dial_times.lock().unwrap().len()
    }

    /// Connections currently held by the client.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Most connections ever held at once.
    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    /// Deliver a text frame on the newest connection.
    pub fn push(&self, text: &str) {
        if let Some(remote) = self.remotes.lock().unwrap().last() {
            let _ = remote.inbound_tx.send(WsMessage::Text(text.to_string()));
        }
    }

    /// Close the newest connection from the server side.
    pub fn drop_connection(&self) {
        if let Some(remote) = self.remotes.lock().unwrap().last() {
            let _ = remote.inbound_tx.send(WsMessage::Close {
                code: 1001,
                reason: "going away".to_string(),
            });
        }
    }

    /// Frames the client sent on the newest connection since the last call.
    pub fn sent(&self) -> Vec<String> {
        let mut sent = Vec::new();
        if let Some(remote) = self.remotes.lock().unwrap().last_mut() {
            while let Ok(text) = remote.outbound_rx.try_recv() {
                sent.push(text);
            }
        }
        sent
    }
}

#[async_trait]
impl Dialer for FakeDialer {
    async fn dial(&self, _address: &str) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>)> {
        self.dial_times.lock().unwrap().push(Instant::now());

        let refused = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            anyhow::bail!("connection refused");
        }

        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        self.remotes.lock().unwrap().push(Remote {
            inbound_tx,
            outbound_rx,
        });

        Ok((
            Box::new(FakeSink(outbound_tx)),
            Box::new(FakeSource {
                inbound_rx,
                _live: LiveGuard(Arc::clone(&self.live)),
            }),
        ))
    }
}

/// Canned backend with per-endpoint call counters.
#[derive(Debug)]
pub struct FakeBackend {
    pub status: Mutex<MachineStatus>,
    pub file_status: Mutex<FileStatus>,
    pub settings: Mutex<Settings>,
    pub status_down: AtomicBool,
    pub status_latency: Mutex<Duration>,
    pub status_calls: Mutex<Vec<Instant>>,
    pub file_status_calls: AtomicUsize,
    pub settings_calls: AtomicUsize,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            status: Mutex::new(MachineStatus {
                state: ControllerState::Idle,
                ..MachineStatus::default()
            }),
            file_status: Mutex::new(FileStatus::default()),
            settings: Mutex::new(Settings::default()),
            status_down: AtomicBool::new(false),
            status_latency: Mutex::new(Duration::ZERO),
            status_calls: Mutex::new(Vec::new()),
            file_status_calls: AtomicUsize::new(0),
            settings_calls: AtomicUsize::new(0),
        }
    }
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn status_call_times(&self) -> Vec<Instant> {
        self.status_calls.lock().unwrap().clone()
    }

    pub fn settings_calls(&self) -> usize {
        self.settings_calls.load(Ordering::SeqCst)
    }

    pub fn file_status_calls(&self) -> usize {
        self.file_status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn machine_status(&self) -> Result<MachineStatus> {
        self.status_calls.lock().unwrap().push(Instant::now());
        let latency = *self.status_latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.status_down.load(Ordering::SeqCst) {
            anyhow::bail!("status/getStatus returned 503 Service Unavailable");
        }
        Ok(self.status.lock().unwrap().clone())
    }

    async fn file_status(&self) -> Result<FileStatus> {
        self.file_status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.file_status.lock().unwrap().clone())
    }

    async fn settings(&self) -> Result<Settings> {
        self.settings_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.settings.lock().unwrap().clone())
    }

    async fn update_settings(&self, settings: &Settings) -> Result<()> {
        *self.settings.lock().unwrap() = settings.clone();
        Ok(())
    }

    async fn machine_command(&self, _command: &MachineCommand) -> Result<()> {
        Ok(())
    }

    async fn file_command(&self, _command: FileCommand) -> Result<()> {
        Ok(())
    }

    async fn open_file(&self, _file_name: &str, _contents: Vec<u8>) -> Result<()> {
        Ok(())
    }

    async fn connection_options(&self, _param: ConnectionParam) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn selected_connection_param(&self, _param: ConnectionParam) -> Result<String> {
        Ok(String::new())
    }

    async fn select_connection_param(&self, _param: ConnectionParam, _value: &str) -> Result<()> {
        Ok(())
    }
}

/// Waits (in paused time) until `rx` holds a value matching `predicate`.
pub async fn wait_until<T>(rx: &mut watch::Receiver<T>, predicate: impl FnMut(&T) -> bool) {
    tokio::time::timeout(Duration::from_secs(120), rx.wait_for(predicate))
        .await
        .expect("timed out waiting for store value")
        .expect("store dropped");
}
