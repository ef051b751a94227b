//! Event demultiplexer for the pendant event channel.
//!
//! Every inbound frame is an envelope `{"eventType": ..., "event": ...}`.
//! [`route`] decodes one frame into a [`Routed`] instruction; the
//! synchronizer applies it. Nothing here is fatal: malformed frames and
//! unknown event types come back as [`Routed::Dropped`].

use serde::Deserialize;

use crate::model::MachineStatus;

/// Event type carrying a full machine status.
pub const CONTROLLER_STATUS_EVENT: &str = "ControllerStatusEvent";

/// Signal that the loaded file or its send state changed.
pub const FILE_STATE_EVENT: &str = "FileStateEvent";

/// Signal that a setting changed on the backend.
pub const SETTING_CHANGED_EVENT: &str = "SettingChangedEvent";

/// Raw envelope as it appears on the wire.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    event_type: String,
    #[serde(default)]
    event: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct StatusEvent {
    status: MachineStatus,
}

/// What the synchronizer should do with one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    /// Replace the status domain.
    Status(MachineStatus),
    /// Re-fetch file status now.
    FileStateChanged,
    /// Hand a settings change signal to the debouncer.
    SettingChanged,
    /// Frame was not applied.
    Dropped(String),
}

/// Decodes one inbound frame.
pub fn route(text: &str) -> Routed {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            log::warn!(
                "[Sync] Malformed envelope ({}): {}",
                e,
                text.chars().take(100).collect::<String>()
            );
            return Routed::Dropped(format!("malformed envelope: {e}"));
        }
    };

    match envelope.event_type.as_str() {
        CONTROLLER_STATUS_EVENT => match serde_json::from_value::<StatusEvent>(envelope.event) {
            Ok(event) => Routed::Status(event.status),
            Err(e) => {
                log::warn!("[Sync] Unreadable status event: {}", e);
                Routed::Dropped(format!("unreadable status event: {e}"))
            }
        },
        FILE_STATE_EVENT => Routed::FileStateChanged,
        SETTING_CHANGED_EVENT => Routed::SettingChanged,
        other => {
            log::debug!("[Sync] Ignoring event type {:?}", other);
            Routed::Dropped(format!("unknown event type: {other}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ControllerState;

    #[test]
    fn test_status_event_carries_full_status() {
        let frame = serde_json::json!({
            "eventType": "ControllerStatusEvent",
            "event": {"status": {"state": "ALARM", "feedSpeed": 0, "workCoord": {"x": 1.5}}}
        })
        .to_string();

        let Routed::Status(status) = route(&frame) else {
            panic!("expected status");
        };
        assert_eq!(status.state, ControllerState::Alarm);
        assert_eq!(status.work_coord.x, Some(1.5));
        assert_eq!(status.machine_coord.x, None);
    }

    #[test]
    fn test_status_event_with_nan_fields() {
        let frame = r#"{"eventType":"ControllerStatusEvent","event":{"status":{"state":"RUN","spindleSpeed":"NaN"}}}"#;
        let Routed::Status(status) = route(frame) else {
            panic!("expected status");
        };
        assert_eq!(status.spindle_speed, None);
    }

    #[test]
    fn test_signal_events() {
        assert_eq!(
            route(r#"{"eventType":"FileStateEvent","event":{}}"#),
            Routed::FileStateChanged
        );
        assert_eq!(
            route(r#"{"eventType":"SettingChangedEvent"}"#),
            Routed::SettingChanged
        );
    }

    #[test]
    fn test_unknown_event_type_is_dropped() {
        let routed = route(r#"{"eventType":"ProbeEvent","event":{}}"#);
        assert!(matches!(routed, Routed::Dropped(reason) if reason.contains("ProbeEvent")));
    }

    #[test]
    fn test_malformed_frames_are_dropped() {
        assert!(matches!(route("not json"), Routed::Dropped(_)));
        assert!(matches!(route(r#"{"event":{}}"#), Routed::Dropped(_)));
        assert!(matches!(
            route(r#"{"eventType":"ControllerStatusEvent","event":{"status":{"feedSpeed":"fast"}}}"#),
            Routed::Dropped(_)
        ));
    }
}
