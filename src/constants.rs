//! Application-wide constants for pendant-link.
//!
//! Centralizes every timing value used by the synchronization layer so the
//! defaults are discoverable in one place. [`crate::config::Config`] copies
//! these into per-domain fields that can be overridden.
//!
//! # Categories
//!
//! - **Timeouts**: Network request timeouts
//! - **Event channel**: Heartbeat and reconnect timing
//! - **Polling**: Per-domain fetch cadence and failure backoff
//! - **Server**: Default endpoints

use std::time::Duration;

// ============================================================================
// Timeouts
// ============================================================================

/// HTTP client request timeout for backend API calls.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Event channel
// ============================================================================

/// Interval between keep-alive probes on an open event channel.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(4000);

/// Delay before re-dialing the event channel after a failure.
///
/// Applied after every failure with no cap on attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(4000);

/// Keep-alive payload sent by the heartbeat.
pub const KEEPALIVE_PAYLOAD: &str = r#"{"type":"ping"}"#;

/// Quiet period before a burst of change signals triggers one fetch.
pub const DEBOUNCE_QUIET_PERIOD: Duration = Duration::from_millis(500);

// ============================================================================
// Polling
// ============================================================================

/// Machine status polling cadence.
pub const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Wait after a failed machine status fetch.
pub const STATUS_FAILURE_BACKOFF: Duration = Duration::from_millis(5000);

/// Settings polling cadence.
pub const SETTINGS_POLL_INTERVAL: Duration = Duration::from_millis(5000);

/// Wait after a failed settings fetch.
pub const SETTINGS_FAILURE_BACKOFF: Duration = Duration::from_millis(10_000);

/// File status polling cadence while the machine is running a program.
pub const FILE_STATUS_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Wait after a failed file status fetch.
pub const FILE_STATUS_FAILURE_BACKOFF: Duration = Duration::from_millis(5000);

// ============================================================================
// Server
// ============================================================================

/// Default pendant server URL.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080";

/// Path prefix of the versioned REST API.
pub const API_PREFIX: &str = "/api/v1";

/// Default path of the WebSocket event channel.
pub const DEFAULT_EVENT_PATH: &str = "/ws";
