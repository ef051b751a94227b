// End-to-end tests of the synchronizer against an in-memory event channel
// and backend. All timing runs on tokio's paused clock.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use common::{wait_until, FakeBackend, FakeDialer};
use pendant_link::link::Dialer;
use pendant_link::model::{ControllerState, FileStatus};
use pendant_link::{Backend, SyncConfig, SyncHandle, SyncMode, Synchronizer};

const KEEPALIVE: &str = r#"{"type":"ping"}"#;

fn start(mode: SyncMode, backend: &Arc<FakeBackend>, dialer: &Arc<FakeDialer>) -> (SyncHandle, JoinHandle<()>) {
    let config = SyncConfig::new("ws://pendant.test:8080/ws").with_mode(mode);
    let backend: Arc<dyn Backend> = Arc::clone(backend) as Arc<dyn Backend>;
    let dialer: Arc<dyn Dialer> = Arc::clone(dialer) as Arc<dyn Dialer>;
    let (synchronizer, handle) = Synchronizer::new(config, backend, dialer);
    (handle, tokio::spawn(synchronizer.run()))
}

fn status_event(state: &str) -> String {
    serde_json::json!({
        "eventType": "ControllerStatusEvent",
        "event": {"status": {"state": state, "workCoord": {"x": 0, "y": 0, "z": "NaN"}}}
    })
    .to_string()
}

async fn wait_connected(handle: &SyncHandle) {
    let mut rx = handle.store().subscribe_connection();
    wait_until(&mut rx, |c| c.is_connected).await;
}

#[tokio::test(start_paused = true)]
async fn test_alarm_event_reaches_store() {
    let backend = FakeBackend::new();
    let dialer = FakeDialer::reliable();
    let (handle, _task) = start(SyncMode::Events, &backend, &dialer);

    wait_connected(&handle).await;
    let mut status_rx = handle.store().subscribe_status();
    // Let the refresh triggered by the open land first.
    wait_until(&mut status_rx, |s| s.state == ControllerState::Idle).await;

    dialer.push(&status_event("ALARM"));
    wait_until(&mut status_rx, |s| s.state == ControllerState::Alarm).await;

    let status = handle.store().status();
    assert_eq!(status.work_coord.x, Some(0.0));
    assert_eq!(status.work_coord.z, None);
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_repeated_failures() {
    let backend = FakeBackend::new();
    let dialer = FakeDialer::failing(3);
    let started = Instant::now();
    let (handle, _task) = start(SyncMode::Events, &backend, &dialer);

    for checkpoint in [1000, 5000, 9000, 11_900] {
        tokio::time::sleep_until(started + Duration::from_millis(checkpoint)).await;
        assert!(!handle.store().connection().is_connected, "connected early at {checkpoint}ms");
        assert_eq!(handle.store().status().state, ControllerState::Unavailable);
    }

    wait_connected(&handle).await;
    assert!(started.elapsed() <= Duration::from_millis(3 * 4000 + 100));

    let dials = dialer.dial_times();
    assert_eq!(dials.len(), 4);
    for pair in dials.windows(2) {
        assert_eq!(pair[1] - pair[0], Duration::from_millis(4000));
    }
}

#[tokio::test(start_paused = true)]
async fn test_repeated_connect_keeps_one_link() {
    let backend = FakeBackend::new();
    let dialer = FakeDialer::reliable();
    let (handle, _task) = start(SyncMode::Events, &backend, &dialer);

    for _ in 0..5 {
        handle.connect();
    }
    wait_connected(&handle).await;
    for _ in 0..5 {
        handle.connect();
    }
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(dialer.dial_count(), 1);
    assert_eq!(dialer.max_live(), 1);

    dialer.drop_connection();
    tokio::time::sleep(Duration::from_millis(4100)).await;
    assert!(handle.store().connection().is_connected);
    assert_eq!(dialer.dial_count(), 2);
    assert_eq!(dialer.max_live(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_link_drop_marks_unavailable_and_retries() {
    let backend = FakeBackend::new();
    let dialer = FakeDialer::reliable();
    let (handle, _task) = start(SyncMode::Events, &backend, &dialer);
    wait_connected(&handle).await;

    let dropped_at = Instant::now();
    dialer.drop_connection();
    let mut connection_rx = handle.store().subscribe_connection();
    wait_until(&mut connection_rx, |c| !c.is_connected).await;
    assert_eq!(handle.store().status().state, ControllerState::Unavailable);
    assert_eq!(dialer.live(), 0);

    wait_until(&mut connection_rx, |c| c.is_connected).await;
    let waited = dropped_at.elapsed();
    assert!(waited >= Duration::from_millis(4000), "retried after {waited:?}");
    assert!(waited < Duration::from_millis(4100), "retried after {waited:?}");
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_sends_keepalive_while_open() {
    let backend = FakeBackend::new();
    let dialer = FakeDialer::reliable();
    let (handle, _task) = start(SyncMode::Events, &backend, &dialer);
    wait_connected(&handle).await;

    tokio::time::sleep(Duration::from_millis(8100)).await;
    assert_eq!(dialer.sent(), vec![KEEPALIVE, KEEPALIVE]);

    dialer.drop_connection();
    tokio::time::sleep(Duration::from_millis(3900)).await;
    assert!(dialer.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_setting_change_burst_fetches_once() {
    let backend = FakeBackend::new();
    let dialer = FakeDialer::reliable();
    let (handle, _task) = start(SyncMode::Events, &backend, &dialer);
    wait_connected(&handle).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(backend.settings_calls(), 1);

    let burst = r#"{"eventType":"SettingChangedEvent","event":{}}"#;
    dialer.push(burst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    dialer.push(burst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    dialer.push(burst);

    tokio::time::sleep(Duration::from_millis(450)).await;
    assert_eq!(backend.settings_calls(), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(backend.settings_calls(), 2);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(backend.settings_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_file_state_event_refreshes_file_status() {
    let backend = FakeBackend::new();
    let dialer = FakeDialer::reliable();
    let (handle, _task) = start(SyncMode::Events, &backend, &dialer);
    wait_connected(&handle).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    let before = backend.file_status_calls();

    *backend.file_status.lock().unwrap() = FileStatus {
        file_name: "bracket.nc".to_string(),
        row_count: Some(120),
        ..FileStatus::default()
    };
    dialer.push(r#"{"eventType":"FileStateEvent","event":{}}"#);

    let mut file_rx = handle.store().subscribe_file_status();
    wait_until(&mut file_rx, |f| f.file_name == "bracket.nc").await;
    assert_eq!(backend.file_status_calls(), before + 1);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_and_malformed_frames_are_ignored() {
    let backend = FakeBackend::new();
    let dialer = FakeDialer::reliable();
    let (handle, _task) = start(SyncMode::Events, &backend, &dialer);
    wait_connected(&handle).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    dialer.push("{{{ not json");
    dialer.push(r#"{"eventType":"ProbeEvent","event":{}}"#);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(handle.store().connection().is_connected);
    assert_eq!(handle.store().status().state, ControllerState::Idle);
    assert_eq!(dialer.dial_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_stops_retrying() {
    let backend = FakeBackend::new();
    let dialer = FakeDialer::reliable();
    let (handle, _task) = start(SyncMode::Events, &backend, &dialer);
    wait_connected(&handle).await;

    handle.disconnect();
    let mut connection_rx = handle.store().subscribe_connection();
    wait_until(&mut connection_rx, |c| !c.is_connected && !c.is_establishing_connection).await;
    assert_eq!(handle.store().status().state, ControllerState::Unavailable);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(dialer.dial_count(), 1);
    assert_eq!(dialer.live(), 0);

    handle.connect();
    wait_connected(&handle).await;
    assert_eq!(dialer.dial_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_polling_mode_degrades_and_backs_off() {
    let backend = FakeBackend::new();
    backend.status_down.store(true, Ordering::SeqCst);
    let dialer = FakeDialer::reliable();
    let (handle, _task) = start(SyncMode::Polling, &backend, &dialer);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!handle.store().connection().is_connected);
    assert_eq!(handle.store().status().state, ControllerState::Unavailable);

    tokio::time::sleep(Duration::from_millis(4800)).await;
    assert_eq!(backend.status_call_times().len(), 1);

    backend.status_down.store(false, Ordering::SeqCst);
    let mut connection_rx = handle.store().subscribe_connection();
    wait_until(&mut connection_rx, |c| c.is_connected).await;

    let calls = backend.status_call_times();
    assert!(calls[1] - calls[0] >= Duration::from_millis(5000));
    assert_eq!(handle.store().status().state, ControllerState::Idle);
    // Polling mode never touches the event channel.
    assert_eq!(dialer.dial_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_hybrid_mode_polls_and_listens() {
    let backend = FakeBackend::new();
    let dialer = FakeDialer::reliable();
    let (handle, _task) = start(SyncMode::Hybrid, &backend, &dialer);
    wait_connected(&handle).await;

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(dialer.dial_count(), 1);
    // Open refresh plus the 200 ms loop.
    assert!(backend.status_call_times().len() >= 5);
}

#[tokio::test(start_paused = true)]
async fn test_polling_disconnect_discards_in_flight_fetch() {
    let backend = FakeBackend::new();
    *backend.status_latency.lock().unwrap() = Duration::from_millis(100);
    let dialer = FakeDialer::reliable();
    let started = Instant::now();
    let (handle, _task) = start(SyncMode::Polling, &backend, &dialer);

    // Fetches run 0-100 and 300-400; disconnect lands mid-flight.
    tokio::time::sleep_until(started + Duration::from_millis(350)).await;
    assert!(handle.store().connection().is_connected);
    handle.disconnect();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!handle.store().connection().is_connected);
    assert_eq!(handle.store().status().state, ControllerState::Unavailable);
}

#[tokio::test(start_paused = true)]
async fn test_hybrid_link_drop_shows_unavailable() {
    let backend = FakeBackend::new();
    let dialer = FakeDialer::reliable();
    let (handle, _task) = start(SyncMode::Hybrid, &backend, &dialer);
    wait_connected(&handle).await;
    let mut status_rx = handle.store().subscribe_status();
    wait_until(&mut status_rx, |s| s.state == ControllerState::Idle).await;

    let dropped_at = Instant::now();
    dialer.drop_connection();
    let mut connection_rx = handle.store().subscribe_connection();
    wait_until(&mut connection_rx, |c| !c.is_connected).await;

    for checkpoint in [500, 1000, 3900] {
        tokio::time::sleep_until(dropped_at + Duration::from_millis(checkpoint)).await;
        assert!(!handle.store().connection().is_connected);
        assert_eq!(handle.store().status().state, ControllerState::Unavailable, "at {checkpoint}ms");
    }

    wait_until(&mut connection_rx, |c| c.is_connected).await;
    wait_until(&mut status_rx, |s| s.state == ControllerState::Idle).await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_ends_task() {
    let backend = FakeBackend::new();
    let dialer = FakeDialer::reliable();
    let (handle, task) = start(SyncMode::Events, &backend, &dialer);
    wait_connected(&handle).await;

    handle.shutdown();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("synchronizer did not stop")
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(!handle.is_running());
    assert!(!handle.store().connection().is_connected);
    assert_eq!(dialer.live(), 0);
}
