//! Booking document change streams.
//!
//! A [`ChangeFeed`] is the vendor-facing side: it opens a raw stream of JSON
//! documents for one booking and may fail. [`RealtimeAdapter`] wraps a feed,
//! absorbs transient failures and hands parsed [`SubscriptionEvent`]s to a
//! plain callback.

pub mod adapter;
pub mod feed;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::models::StatusPayload;

pub use adapter::RealtimeAdapter;
pub use feed::LocalFeed;

/// Raw change documents for a single booking. Closing means the connection dropped.
pub type ChangeStream = mpsc::UnboundedReceiver<Value>;

#[async_trait]
pub trait ChangeFeed: Send + Sync + 'static {
    async fn connect(&self, booking_id: &str) -> Result<ChangeStream>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    Update(StatusPayload),
    /// The subscription could not be kept alive; retries continue in the background.
    Error(String),
}

pub type SubscriptionCallback = Box<dyn Fn(SubscriptionEvent) + Send + Sync + 'static>;

pub trait RealtimeSubscriber: Send + Sync {
    /// Never fails synchronously: problems reach `callback` as
    /// [`SubscriptionEvent::Error`].
    fn subscribe(&self, booking_id: &str, callback: SubscriptionCallback) -> Subscription;
}

/// Live subscription. Unsubscribing is idempotent and also happens on drop.
#[derive(Debug)]
pub struct Subscription {
    booking_id: String,
    cancel_token: CancellationToken,
}

impl Subscription {
    pub fn new(booking_id: impl Into<String>, cancel_token: CancellationToken) -> Self {
        Self {
            booking_id: booking_id.into(),
            cancel_token,
        }
    }

    pub fn booking_id(&self) -> &str {
        &self.booking_id
    }

    pub fn unsubscribe(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_active(&self) -> bool {
        !self.cancel_token.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
