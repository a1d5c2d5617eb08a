//! The reference-counted connection registry.
//!
//! One [`ConnectionRecord`] exists per endpoint while at least one consumer
//! holds a reference to it. All records live behind a single mutex; every
//! public operation and every transport event takes the lock, mutates the
//! record, collects the callbacks it has to run, then releases the lock
//! before running them. Handlers and message callbacks may therefore call
//! back into the registry freely.
//!
//! ```text
//!               connect()                 CONNECTED
//! Disconnected ──────────► Connecting ──────────────► Connected
//!      ▲                    │    ▲                       │
//!      │        fail/timeout│    │reconnect timer        │peer close
//!      │                    ▼    │                       ▼
//!      │                   Error ┴──────────────── Disconnected
//!      │
//!      └──── disconnect() with ref count 0 destroys the record
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::error::{RegistryError, RegistryResult, TransportFailure};
use crate::message::{
    encode_body, with_default_auth, Headers, InboundMessage, MessageCallback, MessageResult,
};
use crate::metrics;
use crate::state::{ConnectionState, StateHandler};
use crate::stomp::{Command, Frame};
use crate::subscription::{ActiveSubscription, PendingSubscription, SubscriptionHandle};
use crate::token::{authorization_value, validate_token};
use crate::transport::{
    error_reason, ConnectRequest, Connector, TransportEvent, TransportHandle, WsConnector,
};

type Waiter = oneshot::Sender<RegistryResult<()>>;
type Observers = HashMap<String, IndexMap<u64, StateHandler>>;

/// Multiplexed, reference-counted, auto-reconnecting STOMP client.
///
/// Cloning is cheap; clones share the same connections.
///
/// # Example
///
/// ```rust,ignore
/// use capsule_link::{ConnectionRegistry, Headers, RegistryConfig};
///
/// let registry = ConnectionRegistry::new(RegistryConfig::new().base_url("https://api.example.com"));
/// registry.connect(&token, "/ws-capsule-content").await?;
///
/// let handle = registry.subscribe(
///     "/topic/notifications/alice",
///     |msg| println!("{msg:?}"),
///     Headers::new(),
///     "/ws-capsule-content",
/// );
///
/// registry.unsubscribe(&handle);
/// registry.disconnect("/ws-capsule-content");
/// ```
pub struct ConnectionRegistry<C: Connector = WsConnector> {
    shared: Arc<Shared<C>>,
}

struct Shared<C> {
    connector: C,
    config: RegistryConfig,
    inner: Arc<Mutex<Inner>>,
    next_subscription: AtomicU64,
    next_observer: AtomicU64,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, ConnectionRecord>,
    observers: Observers,
}

/// Per-endpoint bookkeeping.
struct ConnectionRecord {
    endpoint: String,
    ref_count: usize,
    state: ConnectionState,
    /// Bare token of the latest attempt; reused by automatic reconnects.
    token: String,
    /// Bumped on every attempt. Events and timers carry the epoch they were
    /// started under and are dropped once it moves on.
    epoch: u64,
    transport: Option<TransportHandle>,
    active: IndexMap<String, ActiveSubscription>,
    pending: IndexMap<String, PendingSubscription>,
    attempt: Option<Attempt>,
    deadline: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
}

/// An unsettled connect attempt and everyone waiting on it.
struct Attempt {
    token: String,
    started: Instant,
    waiters: Vec<Waiter>,
}

/// Callbacks collected under the lock and run after it is released.
#[derive(Default)]
struct Outbox {
    notices: Vec<(Vec<StateHandler>, ConnectionState)>,
    deliveries: Vec<(MessageCallback, MessageResult)>,
}

impl Outbox {
    fn notify(&mut self, observers: &Observers, endpoint: &str, state: ConnectionState) {
        if let Some(handlers) = observers.get(endpoint) {
            if !handlers.is_empty() {
                self.notices.push((handlers.values().cloned().collect(), state));
            }
        }
    }

    fn flush(self) {
        for (handlers, state) in self.notices {
            for handler in handlers {
                handler(state);
            }
        }
        for (callback, result) in self.deliveries {
            callback(result);
        }
    }
}

impl ConnectionRecord {
    fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            ref_count: 0,
            state: ConnectionState::Disconnected,
            token: String::new(),
            epoch: 0,
            transport: None,
            active: IndexMap::new(),
            pending: IndexMap::new(),
            attempt: None,
            deadline: None,
            reconnect: None,
            pump: None,
        }
    }

    fn cancel_deadline(&mut self) {
        if let Some(timer) = self.deadline.take() {
            timer.abort();
        }
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect.take() {
            timer.abort();
        }
    }

    fn teardown_transport(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(transport) = self.transport.take() {
            transport.shutdown();
        }
    }

    /// Move live subscriptions back to pending so the next session replays
    /// them, oldest first.
    fn requeue_active(&mut self) {
        if self.active.is_empty() {
            return;
        }
        let mut pending: IndexMap<String, PendingSubscription> = self
            .active
            .drain(..)
            .map(|(destination, sub)| (destination, sub.into()))
            .collect();
        pending.extend(self.pending.drain(..));
        self.pending = pending;
    }

    fn settle_attempt(&mut self, outcome: RegistryResult<()>) {
        if let Some(attempt) = self.attempt.take() {
            for waiter in attempt.waiters {
                let _ = waiter.send(outcome.clone());
            }
        }
    }

    fn send_frame(&self, frame: Frame) -> Result<(), TransportFailure> {
        let command = frame.command;
        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| TransportFailure::Io("no transport".to_string()))?;
        transport.send(frame)?;
        metrics::record_frame_sent(&self.endpoint, command);
        Ok(())
    }

    fn destroy(&mut self) {
        self.cancel_deadline();
        self.cancel_reconnect();
        self.teardown_transport();
        self.active.clear();
        self.pending.clear();
        let error = RegistryError::transport(
            self.endpoint.as_str(),
            "endpoint disconnected before the handshake completed",
        );
        self.settle_attempt(Err(error));
    }
}

fn transition(
    record: &mut ConnectionRecord,
    observers: &Observers,
    state: ConnectionState,
    outbox: &mut Outbox,
) {
    if record.state == state {
        return;
    }
    info!(
        endpoint = %record.endpoint,
        from = %record.state,
        to = %state,
        epoch = record.epoch,
        "Connection state changed"
    );
    record.state = state;
    metrics::record_transition(&record.endpoint, state);
    outbox.notify(observers, &record.endpoint, state);
}

fn route_message(record: &ConnectionRecord, frame: &Frame, outbox: &mut Outbox) {
    let Some(id) = frame.header("subscription") else {
        warn!(endpoint = %record.endpoint, "MESSAGE frame without subscription header");
        return;
    };
    let Some((destination, sub)) = record.active.iter().find(|(_, sub)| sub.id == id) else {
        debug!(endpoint = %record.endpoint, subscription = id, "MESSAGE for unknown subscription");
        return;
    };

    let result = InboundMessage::decode(frame, destination);
    if let Err(e) = &result {
        warn!(endpoint = %record.endpoint, destination = %destination, error = %e, "Message body failed to decode");
    }
    metrics::record_message(&record.endpoint, result.is_ok());
    outbox.deliveries.push((Arc::clone(&sub.callback), result));
}

impl<C: Connector> Shared<C> {
    fn connect_request(&self, endpoint: &str, token: &str) -> ConnectRequest {
        let url = self.config.endpoint_url(endpoint);
        let authorization = authorization_value(token);
        let host = host_of(&url).to_string();
        let marker = (self.config.endpoint_header.clone(), endpoint.to_string());

        ConnectRequest {
            endpoint: endpoint.to_string(),
            upgrade_headers: vec![
                ("Authorization".to_string(), authorization.clone()),
                marker.clone(),
            ],
            connect_headers: vec![
                (
                    "accept-version".to_string(),
                    self.config.accept_version.clone(),
                ),
                ("heart-beat".to_string(), self.config.heart_beat_header()),
                ("host".to_string(), host),
                ("Authorization".to_string(), authorization),
                marker,
            ],
            url,
            heartbeat_outgoing: self.config.heartbeat_outgoing,
            heartbeat_incoming: self.config.heartbeat_incoming,
            max_message_size: self.config.max_message_size,
        }
    }

    /// Start a fresh attempt, replacing whatever the record had in flight.
    fn begin_attempt(
        self: &Arc<Self>,
        record: &mut ConnectionRecord,
        observers: &Observers,
        token: &str,
        waiter: Option<Waiter>,
        outbox: &mut Outbox,
    ) {
        record.cancel_reconnect();
        record.cancel_deadline();
        if let Some(previous) = record.attempt.take() {
            let error = RegistryError::transport(
                record.endpoint.as_str(),
                "superseded by a newer connect attempt",
            );
            for waiter in previous.waiters {
                let _ = waiter.send(Err(error.clone()));
            }
        }
        record.teardown_transport();
        record.requeue_active();

        record.token = token.to_string();
        record.epoch += 1;
        let epoch = record.epoch;
        let endpoint = record.endpoint.clone();

        transition(record, observers, ConnectionState::Connecting, outbox);
        metrics::record_connect_attempt(&endpoint);
        debug!(endpoint = %endpoint, epoch, "Opening transport");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let request = self.connect_request(&endpoint, token);
        record.transport = Some(self.connector.open(request, events_tx));
        record.pump = Some(tokio::spawn(pump(
            Arc::downgrade(self),
            endpoint.clone(),
            epoch,
            events_rx,
        )));
        record.deadline = Some(self.spawn_deadline(endpoint, epoch));
        record.attempt = Some(Attempt {
            token: token.to_string(),
            started: Instant::now(),
            waiters: waiter.into_iter().collect(),
        });
    }

    fn spawn_deadline(self: &Arc<Self>, endpoint: String, epoch: u64) -> JoinHandle<()> {
        let shared = Arc::downgrade(self);
        let timeout = self.config.connect_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = shared.upgrade() {
                shared.on_deadline(&endpoint, epoch);
            }
        })
    }

    /// The only place a reconnect timer is armed.
    fn schedule_reconnect(self: &Arc<Self>, record: &mut ConnectionRecord) {
        if record.ref_count == 0 || record.reconnect.is_some() {
            return;
        }
        let delay = self.config.reconnect_delay;
        info!(
            endpoint = %record.endpoint,
            delay_ms = millis(delay),
            "Reconnect scheduled"
        );
        metrics::record_reconnect_scheduled(&record.endpoint);

        let shared = Arc::downgrade(self);
        let endpoint = record.endpoint.clone();
        let epoch = record.epoch;
        record.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = shared.upgrade() {
                shared.on_reconnect_due(&endpoint, epoch);
            }
        }));
    }

    fn on_reconnect_due(self: &Arc<Self>, endpoint: &str, epoch: u64) {
        let mut outbox = Outbox::default();
        {
            let mut guard = self.inner.lock();
            let Inner { records, observers } = &mut *guard;
            let Some(record) = records.get_mut(endpoint) else {
                return;
            };
            if record.epoch != epoch {
                return;
            }
            record.reconnect = None;
            if matches!(
                record.state,
                ConnectionState::Connected | ConnectionState::Connecting
            ) {
                return;
            }
            info!(endpoint, "Reconnecting");
            let token = record.token.clone();
            self.begin_attempt(record, observers, &token, None, &mut outbox);
        }
        outbox.flush();
    }

    fn on_deadline(self: &Arc<Self>, endpoint: &str, epoch: u64) {
        let mut outbox = Outbox::default();
        {
            let mut guard = self.inner.lock();
            let Inner { records, observers } = &mut *guard;
            let Some(record) = records.get_mut(endpoint) else {
                return;
            };
            if record.epoch != epoch || record.state != ConnectionState::Connecting {
                return;
            }
            record.deadline = None;

            // The transport is left running; a late CONNECTED still lands.
            let error = RegistryError::handshake_timeout(endpoint, millis(self.config.connect_timeout));
            warn!(endpoint, epoch, error = %error, "Connect deadline elapsed");
            transition(record, observers, ConnectionState::Error, &mut outbox);
            record.settle_attempt(Err(error));
            self.schedule_reconnect(record);
        }
        outbox.flush();
    }

    /// Apply one transport event. Returns `false` once the pump should stop.
    fn on_event(self: &Arc<Self>, endpoint: &str, epoch: u64, event: TransportEvent) -> bool {
        let mut outbox = Outbox::default();
        let keep_pumping = {
            let mut guard = self.inner.lock();
            let Inner { records, observers } = &mut *guard;
            match records.get_mut(endpoint) {
                Some(record) if record.epoch == epoch => {
                    self.apply_event(record, observers, event, &mut outbox)
                }
                _ => {
                    debug!(endpoint, epoch, "Dropping event from a stale transport");
                    false
                }
            }
        };
        outbox.flush();
        keep_pumping
    }

    fn apply_event(
        self: &Arc<Self>,
        record: &mut ConnectionRecord,
        observers: &Observers,
        event: TransportEvent,
        outbox: &mut Outbox,
    ) -> bool {
        match event {
            TransportEvent::Connected {
                version,
                server,
                heart_beat,
            } => {
                debug!(
                    endpoint = %record.endpoint,
                    ?version,
                    ?server,
                    ?heart_beat,
                    "STOMP session established"
                );
                self.on_handshake(record, observers, outbox);
                true
            }
            TransportEvent::Frame(frame) => match frame.command {
                Command::Message => {
                    route_message(record, &frame, outbox);
                    true
                }
                Command::Error => {
                    let failure = TransportFailure::Rejected(error_reason(&frame));
                    self.on_failure(record, observers, failure, outbox);
                    false
                }
                other => {
                    debug!(endpoint = %record.endpoint, command = %other, "Ignoring frame");
                    true
                }
            },
            TransportEvent::Failed(failure) => {
                self.on_failure(record, observers, failure, outbox);
                false
            }
            TransportEvent::Closed { code, reason } => {
                self.on_closed(record, observers, code, &reason, outbox);
                false
            }
        }
    }

    fn on_handshake(
        self: &Arc<Self>,
        record: &mut ConnectionRecord,
        observers: &Observers,
        outbox: &mut Outbox,
    ) {
        record.cancel_deadline();
        record.cancel_reconnect();

        let queued: Vec<(String, PendingSubscription)> = record.pending.drain(..).collect();
        for (destination, sub) in queued {
            if let Err((failure, sub)) = self.issue_subscribe(record, &destination, sub) {
                warn!(
                    endpoint = %record.endpoint,
                    destination = %destination,
                    error = %failure,
                    "Replaying subscription failed"
                );
                record.pending.insert(destination, sub);
            }
        }

        transition(record, observers, ConnectionState::Connected, outbox);
        match record.attempt.take() {
            Some(attempt) => {
                metrics::record_handshake(&record.endpoint, attempt.started.elapsed());
                for waiter in attempt.waiters {
                    let _ = waiter.send(Ok(()));
                }
            }
            None => debug!(endpoint = %record.endpoint, "Handshake completed after its attempt was settled"),
        }
    }

    fn on_failure(
        self: &Arc<Self>,
        record: &mut ConnectionRecord,
        observers: &Observers,
        failure: TransportFailure,
        outbox: &mut Outbox,
    ) {
        record.cancel_deadline();
        let error = failure.into_error(&record.endpoint);
        warn!(endpoint = %record.endpoint, epoch = record.epoch, error = %error, "Connection failed");

        record.teardown_transport();
        record.requeue_active();
        transition(record, observers, ConnectionState::Error, outbox);
        record.settle_attempt(Err(error));
        self.schedule_reconnect(record);
    }

    fn on_closed(
        self: &Arc<Self>,
        record: &mut ConnectionRecord,
        observers: &Observers,
        code: Option<u16>,
        reason: &str,
        outbox: &mut Outbox,
    ) {
        if record.state == ConnectionState::Connecting {
            let failure = TransportFailure::Io(format!("closed during handshake: {reason}"));
            self.on_failure(record, observers, failure, outbox);
            return;
        }

        info!(endpoint = %record.endpoint, ?code, reason, "Transport closed");
        record.cancel_deadline();
        record.teardown_transport();
        record.requeue_active();
        if record.state == ConnectionState::Connected {
            transition(record, observers, ConnectionState::Disconnected, outbox);
        }
        self.schedule_reconnect(record);
    }

    fn issue_subscribe(
        &self,
        record: &mut ConnectionRecord,
        destination: &str,
        sub: PendingSubscription,
    ) -> Result<String, (TransportFailure, PendingSubscription)> {
        let id = format!(
            "sub-{}",
            self.next_subscription.fetch_add(1, Ordering::Relaxed)
        );
        let frame = Frame::subscribe(&id, destination)
            .with_headers(with_default_auth(&sub.headers, &record.token));
        if let Err(failure) = record.send_frame(frame) {
            return Err((failure, sub));
        }

        debug!(endpoint = %record.endpoint, destination, subscription = %id, "Subscribed");
        record.active.insert(
            destination.to_string(),
            ActiveSubscription {
                id: id.clone(),
                callback: sub.callback,
                headers: sub.headers,
            },
        );
        Ok(id)
    }
}

async fn pump<C: Connector>(
    shared: Weak<Shared<C>>,
    endpoint: String,
    epoch: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(strong) = shared.upgrade() else {
            return;
        };
        if !strong.on_event(&endpoint, epoch, event) {
            return;
        }
    }

    // The transport went away without saying why.
    if let Some(shared) = shared.upgrade() {
        shared.on_event(
            &endpoint,
            epoch,
            TransportEvent::Closed {
                code: None,
                reason: "transport ended".to_string(),
            },
        );
    }
}

impl ConnectionRegistry<WsConnector> {
    /// Create a registry that connects over WebSocket.
    pub fn new(config: RegistryConfig) -> Self {
        Self::with_connector(config, WsConnector::new())
    }
}

impl Default for ConnectionRegistry<WsConnector> {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl<C: Connector> ConnectionRegistry<C> {
    /// Create a registry with a custom connector.
    pub fn with_connector(config: RegistryConfig, connector: C) -> Self {
        Self {
            shared: Arc::new(Shared {
                connector,
                config,
                inner: Arc::new(Mutex::new(Inner::default())),
                next_subscription: AtomicU64::new(0),
                next_observer: AtomicU64::new(0),
            }),
        }
    }

    /// The registry configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.shared.config
    }

    /// The connector used to open sessions.
    pub fn connector(&self) -> &C {
        &self.shared.connector
    }

    /// Acquire a reference to `endpoint` and wait until it is connected.
    ///
    /// The token is validated before anything else happens; a malformed
    /// token leaves the reference count untouched. Otherwise the reference
    /// count is incremented even when the attempt later fails, so every
    /// call must be paired with [`disconnect`](Self::disconnect).
    ///
    /// Concurrent calls with the same token share one handshake. A call
    /// with a different token replaces the session.
    ///
    /// # Errors
    ///
    /// `InvalidTokenFormat` or `InvalidEndpoint` without touching the
    /// network; `HandshakeTimeout`, `HandshakeRejected` or `TransportError`
    /// when the attempt fails.
    pub async fn connect(&self, token: &str, endpoint: &str) -> RegistryResult<()> {
        validate_endpoint(endpoint)?;
        let token = validate_token(token)?;

        let mut outbox = Outbox::default();
        let waiting = {
            let mut guard = self.shared.inner.lock();
            let Inner { records, observers } = &mut *guard;
            let record = records.entry(endpoint.to_string()).or_insert_with(|| {
                metrics::endpoint_opened();
                debug!(endpoint, "Connection record created");
                ConnectionRecord::new(endpoint)
            });
            record.ref_count += 1;
            debug!(endpoint, ref_count = record.ref_count, "Connect requested");

            if record.state.is_connected() && record.token == token {
                None
            } else {
                let (tx, rx) = oneshot::channel();
                let joinable = record.state == ConnectionState::Connecting
                    && record
                        .attempt
                        .as_ref()
                        .is_some_and(|attempt| attempt.token == token);
                if joinable {
                    debug!(endpoint, "Joining in-flight connect attempt");
                    if let Some(attempt) = record.attempt.as_mut() {
                        attempt.waiters.push(tx);
                    }
                } else {
                    self.shared
                        .begin_attempt(record, observers, token, Some(tx), &mut outbox);
                }
                Some(rx)
            }
        };
        outbox.flush();

        match waiting {
            None => Ok(()),
            Some(rx) => rx.await.unwrap_or_else(|_| {
                Err(RegistryError::transport(
                    endpoint,
                    "connect attempt was abandoned",
                ))
            }),
        }
    }

    /// Release a reference to `endpoint`.
    ///
    /// When the last reference goes, the transport is closed, timers are
    /// cancelled and the record is deleted. Unknown endpoints are ignored.
    pub fn disconnect(&self, endpoint: &str) {
        let mut outbox = Outbox::default();
        {
            let mut guard = self.shared.inner.lock();
            let Inner { records, observers } = &mut *guard;
            let Some(record) = records.get_mut(endpoint) else {
                debug!(endpoint, "Disconnect for unknown endpoint ignored");
                return;
            };
            record.ref_count = record.ref_count.saturating_sub(1);
            debug!(endpoint, ref_count = record.ref_count, "Disconnect requested");
            if record.ref_count > 0 {
                return;
            }

            if let Some(mut record) = records.remove(endpoint) {
                record.destroy();
                transition(
                    &mut record,
                    observers,
                    ConnectionState::Disconnected,
                    &mut outbox,
                );
                metrics::endpoint_closed();
                info!(endpoint, "Connection record destroyed");
            }
        }
        outbox.flush();
    }

    /// Subscribe `callback` to `destination` on `endpoint`.
    ///
    /// Issued immediately when connected, queued otherwise and replayed in
    /// subscription order on the next successful handshake. A second
    /// subscription to the same destination replaces the first.
    ///
    /// Without a record for `endpoint` nothing is stored and the handle
    /// carries a `NotConnected` error.
    pub fn subscribe<F>(
        &self,
        destination: &str,
        callback: F,
        headers: Headers,
        endpoint: &str,
    ) -> SubscriptionHandle
    where
        F: Fn(MessageResult) + Send + Sync + 'static,
    {
        let mut guard = self.shared.inner.lock();
        let Some(record) = guard.records.get_mut(endpoint) else {
            warn!(endpoint, destination, "Subscribe on an endpoint with no connection");
            return SubscriptionHandle::failed(
                endpoint,
                destination,
                RegistryError::not_connected(endpoint),
            );
        };

        record.pending.shift_remove(destination);
        if let Some(previous) = record.active.shift_remove(destination) {
            debug!(endpoint, destination, subscription = %previous.id, "Replacing subscription");
            if record.state.is_connected() {
                let _ = record.send_frame(Frame::unsubscribe(&previous.id));
            }
        }

        let callback: MessageCallback = Arc::new(callback);
        let sub = PendingSubscription { callback, headers };
        if !record.state.is_connected() {
            debug!(endpoint, destination, state = %record.state, "Subscription queued");
            record.pending.insert(destination.to_string(), sub);
            return SubscriptionHandle::pending(endpoint, destination);
        }

        match self.shared.issue_subscribe(record, destination, sub) {
            Ok(id) => SubscriptionHandle::live(endpoint, destination, id),
            Err((failure, sub)) => {
                warn!(endpoint, destination, error = %failure, "Subscribe failed, queued for replay");
                record.pending.insert(destination.to_string(), sub);
                SubscriptionHandle::failed(endpoint, destination, failure.into_error(endpoint))
            }
        }
    }

    /// Remove the subscription a handle refers to. Idempotent.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let endpoint = handle.endpoint();
        let destination = handle.destination();
        let mut guard = self.shared.inner.lock();
        let Some(record) = guard.records.get_mut(endpoint) else {
            return;
        };

        if record.pending.shift_remove(destination).is_some() {
            debug!(endpoint, destination, "Pending subscription dropped");
            return;
        }
        if let Some(active) = record.active.shift_remove(destination) {
            if record.state.is_connected() {
                if let Err(failure) = record.send_frame(Frame::unsubscribe(&active.id)) {
                    debug!(endpoint, destination, error = %failure, "UNSUBSCRIBE not sent");
                }
            }
            debug!(endpoint, destination, subscription = %active.id, "Unsubscribed");
        }
    }

    /// Publish a JSON body to `destination`.
    ///
    /// Never queued: the endpoint must be connected.
    ///
    /// # Errors
    ///
    /// `NotConnected` unless the endpoint is connected, `Encode` when the
    /// body cannot be serialized, `TransportError` when the session is gone.
    pub async fn send<T>(
        &self,
        destination: &str,
        headers: Headers,
        body: &T,
        endpoint: &str,
    ) -> RegistryResult<()>
    where
        T: Serialize + ?Sized,
    {
        let guard = self.shared.inner.lock();
        let record = guard
            .records
            .get(endpoint)
            .filter(|record| record.state.is_connected())
            .ok_or_else(|| RegistryError::not_connected(endpoint))?;

        let payload = encode_body(body)?;
        let mut merged = with_default_auth(&headers, &record.token);
        if !merged
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("content-type"))
        {
            merged.push(("content-type".to_string(), "application/json".to_string()));
        }

        let frame = Frame::send(destination, payload).with_headers(merged);
        record
            .send_frame(frame)
            .map_err(|failure| failure.into_error(endpoint))
    }

    /// Observe state transitions of `endpoint`.
    ///
    /// The handler runs once right away with the current state, then on
    /// every transition, in registration order.
    pub fn on_connection_state_change<F>(&self, handler: F, endpoint: &str) -> StateSubscription
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let handler: StateHandler = Arc::new(handler);
        let id = self.shared.next_observer.fetch_add(1, Ordering::Relaxed);
        let current = {
            let mut guard = self.shared.inner.lock();
            guard
                .observers
                .entry(endpoint.to_string())
                .or_default()
                .insert(id, Arc::clone(&handler));
            guard
                .records
                .get(endpoint)
                .map_or(ConnectionState::Disconnected, |record| record.state)
        };
        handler(current);

        StateSubscription {
            inner: Arc::downgrade(&self.shared.inner),
            endpoint: endpoint.to_string(),
            id,
        }
    }

    /// Current state of `endpoint`; `Disconnected` when it has no record.
    pub fn connection_state(&self, endpoint: &str) -> ConnectionState {
        self.shared
            .inner
            .lock()
            .records
            .get(endpoint)
            .map_or(ConnectionState::Disconnected, |record| record.state)
    }

    /// Number of consumers holding `endpoint`.
    pub fn ref_count(&self, endpoint: &str) -> usize {
        self.shared
            .inner
            .lock()
            .records
            .get(endpoint)
            .map_or(0, |record| record.ref_count)
    }

    /// Endpoints with a live record, sorted.
    pub fn endpoints(&self) -> Vec<String> {
        let mut endpoints: Vec<String> = self.shared.inner.lock().records.keys().cloned().collect();
        endpoints.sort();
        endpoints
    }

    /// Destinations subscribed on the current session, oldest first.
    pub fn active_destinations(&self, endpoint: &str) -> Vec<String> {
        self.shared
            .inner
            .lock()
            .records
            .get(endpoint)
            .map(|record| record.active.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Destinations waiting for the next handshake, in replay order.
    pub fn pending_destinations(&self, endpoint: &str) -> Vec<String> {
        self.shared
            .inner
            .lock()
            .records
            .get(endpoint)
            .map(|record| record.pending.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl<C: Connector> Clone for ConnectionRegistry<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connector> fmt::Debug for ConnectionRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("config", &self.shared.config)
            .field("endpoints", &self.endpoints())
            .finish_non_exhaustive()
    }
}

/// Registration of a state-change handler.
///
/// Dropping it leaves the handler registered; call
/// [`cancel`](Self::cancel) to remove it.
#[must_use = "the handler stays registered until cancel() is called"]
pub struct StateSubscription {
    inner: Weak<Mutex<Inner>>,
    endpoint: String,
    id: u64,
}

impl StateSubscription {
    /// The observed endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Remove the handler. No further calls are made once this returns.
    pub fn cancel(self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut guard = inner.lock();
        if let Some(handlers) = guard.observers.get_mut(&self.endpoint) {
            handlers.shift_remove(&self.id);
            if handlers.is_empty() {
                guard.observers.remove(&self.endpoint);
            }
        }
    }
}

impl fmt::Debug for StateSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateSubscription")
            .field("endpoint", &self.endpoint)
            .field("id", &self.id)
            .finish()
    }
}

fn validate_endpoint(endpoint: &str) -> RegistryResult<()> {
    if endpoint.trim().is_empty() {
        return Err(RegistryError::invalid_endpoint("endpoint is empty"));
    }
    if endpoint.chars().any(char::is_whitespace) {
        return Err(RegistryError::invalid_endpoint(format!(
            "endpoint contains whitespace: {endpoint:?}"
        )));
    }
    Ok(())
}

fn host_of(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    rest.split(|c: char| c == '/' || c == '?')
        .next()
        .unwrap_or(rest)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
