//! Registry metrics.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! host process installs a recorder (see `capsule-link-telemetry`).
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `capsule_link_connect_attempts_total` | Counter | `endpoint` |
//! | `capsule_link_reconnects_scheduled_total` | Counter | `endpoint` |
//! | `capsule_link_state_transitions_total` | Counter | `endpoint`, `state` |
//! | `capsule_link_handshake_duration_seconds` | Histogram | `endpoint` |
//! | `capsule_link_messages_received_total` | Counter | `endpoint` |
//! | `capsule_link_message_decode_errors_total` | Counter | `endpoint` |
//! | `capsule_link_frames_sent_total` | Counter | `endpoint`, `command` |
//! | `capsule_link_active_endpoints` | Gauge | - |

use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

use crate::state::ConnectionState;
use crate::stomp::Command;

/// Connect attempts started, including automatic reconnects.
pub const CONNECT_ATTEMPTS: &str = "capsule_link_connect_attempts_total";
/// Reconnect timers armed.
pub const RECONNECTS_SCHEDULED: &str = "capsule_link_reconnects_scheduled_total";
/// State transitions broadcast to observers.
pub const STATE_TRANSITIONS: &str = "capsule_link_state_transitions_total";
/// Time from opening a transport to CONNECTED.
pub const HANDSHAKE_DURATION: &str = "capsule_link_handshake_duration_seconds";
/// MESSAGE frames routed to a subscription.
pub const MESSAGES_RECEIVED: &str = "capsule_link_messages_received_total";
/// MESSAGE frames whose body failed to decode.
pub const DECODE_ERRORS: &str = "capsule_link_message_decode_errors_total";
/// Frames queued on a transport.
pub const FRAMES_SENT: &str = "capsule_link_frames_sent_total";
/// Endpoints with a live connection record.
pub const ACTIVE_ENDPOINTS: &str = "capsule_link_active_endpoints";

/// Register descriptions for every registry metric.
///
/// Call once after installing a recorder.
pub fn describe_metrics() {
    describe_counter!(CONNECT_ATTEMPTS, "Connect attempts started per endpoint");
    describe_counter!(RECONNECTS_SCHEDULED, "Reconnect timers armed per endpoint");
    describe_counter!(STATE_TRANSITIONS, "Connection state transitions by target state");
    describe_histogram!(HANDSHAKE_DURATION, "STOMP handshake duration in seconds");
    describe_counter!(MESSAGES_RECEIVED, "Messages delivered to subscriptions");
    describe_counter!(DECODE_ERRORS, "Messages whose body could not be decoded");
    describe_counter!(FRAMES_SENT, "Frames queued for sending by command");
    describe_gauge!(ACTIVE_ENDPOINTS, "Endpoints with a live connection record");
}

pub(crate) fn record_connect_attempt(endpoint: &str) {
    counter!(CONNECT_ATTEMPTS, "endpoint" => endpoint.to_string()).increment(1);
}

pub(crate) fn record_reconnect_scheduled(endpoint: &str) {
    counter!(RECONNECTS_SCHEDULED, "endpoint" => endpoint.to_string()).increment(1);
}

pub(crate) fn record_transition(endpoint: &str, state: ConnectionState) {
    counter!(
        STATE_TRANSITIONS,
        "endpoint" => endpoint.to_string(),
        "state" => state.as_str()
    )
    .increment(1);
}

pub(crate) fn record_handshake(endpoint: &str, elapsed: Duration) {
    histogram!(HANDSHAKE_DURATION, "endpoint" => endpoint.to_string())
        .record(elapsed.as_secs_f64());
}

pub(crate) fn record_message(endpoint: &str, decoded: bool) {
    counter!(MESSAGES_RECEIVED, "endpoint" => endpoint.to_string()).increment(1);
    if !decoded {
        counter!(DECODE_ERRORS, "endpoint" => endpoint.to_string()).increment(1);
    }
}

pub(crate) fn record_frame_sent(endpoint: &str, command: Command) {
    counter!(
        FRAMES_SENT,
        "endpoint" => endpoint.to_string(),
        "command" => command.as_str()
    )
    .increment(1);
}

pub(crate) fn endpoint_opened() {
    gauge!(ACTIVE_ENDPOINTS).increment(1.0);
}

pub(crate) fn endpoint_closed() {
    gauge!(ACTIVE_ENDPOINTS).decrement(1.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    // Without an installed recorder every call is a no-op.
    #[test]
    fn test_recording_without_recorder() {
        describe_metrics();
        record_connect_attempt("/ws-x");
        record_transition("/ws-x", ConnectionState::Connected);
        record_handshake("/ws-x", Duration::from_millis(12));
        record_message("/ws-x", false);
        record_frame_sent("/ws-x", Command::Send);
        endpoint_opened();
        endpoint_closed();
    }
}
