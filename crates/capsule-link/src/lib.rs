//! Real-time connection registry for Capsule endpoints.
//!
//! This crate multiplexes many independent consumers over one STOMP session
//! per logical WebSocket endpoint. Consumers share a session through
//! reference counting, may subscribe before the session is up, and observe
//! every state change. Sessions that drop are re-established automatically
//! after a fixed delay for as long as someone holds a reference.
//!
//! # Features
//!
//! - **Reference counting** so unrelated features share one socket per endpoint
//! - **Queued subscriptions** replayed in order once the handshake completes
//! - **Automatic reconnect** with a fixed delay and one timer per endpoint
//! - **State broadcast** to observers, starting with the current state
//! - **Typed errors** for token validation, handshake, transport and decode failures
//! - **STOMP 1.2 codec** with heart-beats, built on `tokio-tungstenite`
//!
//! # Example
//!
//! ```ignore
//! use capsule_link::{ConnectionRegistry, ConnectionState, Headers, RegistryConfig};
//!
//! let registry = ConnectionRegistry::new(
//!     RegistryConfig::new().base_url("https://api.example.com"),
//! );
//!
//! let watch = registry.on_connection_state_change(
//!     |state| println!("capsule content: {state}"),
//!     "/ws-capsule-content",
//! );
//!
//! // Queued until the session is up.
//! let handle = registry.subscribe(
//!     "/topic/notifications/alice",
//!     |result| match result {
//!         Ok(message) => println!("{}", message.body),
//!         Err(e) => eprintln!("bad payload: {e}"),
//!     },
//!     Headers::new(),
//!     "/ws-capsule-content",
//! );
//!
//! registry.connect(&token, "/ws-capsule-content").await?;
//! registry
//!     .send(
//!         "/app/capsule-content/connect/42",
//!         Headers::new(),
//!         &serde_json::json!({ "capsuleId": 42 }),
//!         "/ws-capsule-content",
//!     )
//!     .await?;
//!
//! registry.unsubscribe(&handle);
//! watch.cancel();
//! registry.disconnect("/ws-capsule-content");
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    ConnectionRegistry                        │
//! │                                                              │
//! │  connect/disconnect ──► ConnectionRecord (per endpoint)      │
//! │  subscribe/unsubscribe      │ ref_count, state, epoch        │
//! │  send                       │ active / pending subscriptions │
//! │                             ▼                                │
//! │                    Connector::open() ──► TransportHandle     │
//! │                             │                                │
//! │          TransportEvent ◄───┘  (pump task per attempt)       │
//! │                             │                                │
//! │   state handlers ◄──────────┴──────► message callbacks       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Testing
//!
//! [`Connector`](transport::Connector) is the seam between the registry and
//! the network. Tests plug in a scripted connector and drive handshakes,
//! frames and closes by hand.

pub mod config;
pub mod error;
pub mod message;
pub mod metrics;
pub mod registry;
pub mod state;
pub mod stomp;
pub mod subscription;
pub mod token;
pub mod transport;

// Re-exports for convenience
pub use config::RegistryConfig;
pub use error::{MessageDecodeError, RegistryError, RegistryResult, StompError, TransportFailure};
pub use message::{Headers, InboundMessage, MessageCallback, MessageResult};
pub use registry::{ConnectionRegistry, StateSubscription};
pub use state::{ConnectionState, StateHandler};
pub use stomp::{Command, Frame, FrameDecoder, HeartBeat};
pub use subscription::SubscriptionHandle;
pub use token::validate_token;
pub use transport::{
    ConnectRequest, Connector, EventSink, Outbound, TransportEvent, TransportHandle, WsConnector,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exports() {
        let _config = RegistryConfig::default();
        let _state = ConnectionState::default();
        let _frame = Frame::new(Command::Send);
        let _headers = Headers::new();
        let _registry: ConnectionRegistry = ConnectionRegistry::default();
        assert!(validate_token("a.b.c").is_ok());
    }
}
