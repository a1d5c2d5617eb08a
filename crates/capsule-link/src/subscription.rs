//! Subscription bookkeeping.
//!
//! A destination lives in exactly one of two per-endpoint maps: `pending`
//! while the endpoint is not connected, `active` once a SUBSCRIBE frame has
//! been issued on the current session. Callers only ever see the opaque
//! [`SubscriptionHandle`].

use crate::error::RegistryError;
use crate::message::{Headers, MessageCallback};

/// Opaque handle returned by
/// [`ConnectionRegistry::subscribe`](crate::ConnectionRegistry::subscribe).
///
/// The handle is always valid input to
/// [`ConnectionRegistry::unsubscribe`](crate::ConnectionRegistry::unsubscribe),
/// whether the subscription is live, pending, or was never recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    destination: String,
    endpoint: String,
    subscription_id: Option<String>,
    error: Option<RegistryError>,
}

impl SubscriptionHandle {
    pub(crate) fn live(endpoint: &str, destination: &str, subscription_id: String) -> Self {
        Self {
            destination: destination.to_string(),
            endpoint: endpoint.to_string(),
            subscription_id: Some(subscription_id),
            error: None,
        }
    }

    pub(crate) fn pending(endpoint: &str, destination: &str) -> Self {
        Self {
            destination: destination.to_string(),
            endpoint: endpoint.to_string(),
            subscription_id: None,
            error: None,
        }
    }

    pub(crate) fn failed(endpoint: &str, destination: &str, error: RegistryError) -> Self {
        Self {
            destination: destination.to_string(),
            endpoint: endpoint.to_string(),
            subscription_id: None,
            error: Some(error),
        }
    }

    /// The subscribed destination.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// The endpoint the subscription belongs to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Transport subscription id at the time of subscribing.
    ///
    /// `None` when the subscription was queued. Ids are reissued when a
    /// queued subscription is replayed, so this value can go stale.
    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription_id.as_deref()
    }

    /// Why the subscription was not issued right away, if something failed.
    ///
    /// Set when the endpoint has no connection (nothing is stored) or when
    /// the transport refused the SUBSCRIBE frame (the subscription is queued
    /// for replay instead).
    pub fn error(&self) -> Option<&RegistryError> {
        self.error.as_ref()
    }

    /// Check if a SUBSCRIBE frame was issued immediately.
    pub fn is_live(&self) -> bool {
        self.subscription_id.is_some()
    }
}

/// A subscription issued on the current session.
pub(crate) struct ActiveSubscription {
    pub(crate) id: String,
    pub(crate) callback: MessageCallback,
    pub(crate) headers: Headers,
}

/// A subscription waiting for the next successful handshake.
pub(crate) struct PendingSubscription {
    pub(crate) callback: MessageCallback,
    pub(crate) headers: Headers,
}

impl From<ActiveSubscription> for PendingSubscription {
    fn from(active: ActiveSubscription) -> Self {
        Self {
            callback: active.callback,
            headers: active.headers,
        }
    }
}
