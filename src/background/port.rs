use std::future::Future;

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use tokio::{sync::mpsc, task::JoinHandle};

use super::{BackgroundSignal, ForegroundMessage};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

/// Creates the one-way link from the background context to the foreground.
pub fn message_channel() -> (BackgroundPort, ForegroundPort) {
    let (tx, rx) = mpsc::unbounded_channel();
    (BackgroundPort { tx }, ForegroundPort { rx })
}

/// Creates the link from the foreground to the background context. The
/// receiver feeds [`AlertingSurface::run`](super::AlertingSurface::run).
pub fn signal_channel() -> (SignalPort, mpsc::UnboundedReceiver<Value>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SignalPort { tx }, rx)
}

/// Foreground side of the signal channel.
#[derive(Clone)]
pub struct SignalPort {
    tx: mpsc::UnboundedSender<Value>,
}

impl SignalPort {
    pub fn post_message_to_background(&self, message_type: &str, payload: Value) -> Result<()> {
        self.tx
            .send(json!({ "type": message_type, "payload": payload }))
            .map_err(|_| anyhow!("background is not listening for {message_type}"))
    }

    pub fn post(&self, signal: &BackgroundSignal) -> Result<()> {
        let envelope = serde_json::to_value(signal)
            .with_context(|| format!("failed to encode {}", signal.message_type()))?;
        self.tx
            .send(envelope)
            .map_err(|_| anyhow!("background is not listening for {}", signal.message_type()))
    }
}

#[derive(Clone)]
pub struct BackgroundPort {
    tx: mpsc::UnboundedSender<Value>,
}

impl BackgroundPort {
    /// Sends `{"type": message_type, "payload": payload}`. Fails once the
    /// foreground has gone away.
    pub fn post_message_to_foreground(&self, message_type: &str, payload: Value) -> Result<()> {
        self.tx
            .send(json!({ "type": message_type, "payload": payload }))
            .map_err(|_| anyhow!("foreground is not listening for {message_type}"))
    }

    pub fn post(&self, message: &ForegroundMessage) -> Result<()> {
        let envelope = serde_json::to_value(message)
            .with_context(|| format!("failed to encode {}", message.message_type()))?;
        self.tx
            .send(envelope)
            .map_err(|_| anyhow!("foreground is not listening for {}", message.message_type()))
    }
}

pub struct ForegroundPort {
    rx: mpsc::UnboundedReceiver<Value>,
}

impl ForegroundPort {
    /// Next decodable message. Envelopes of unknown type are skipped.
    pub async fn recv(&mut self) -> Option<ForegroundMessage> {
        while let Some(envelope) = self.rx.recv().await {
            match serde_json::from_value::<ForegroundMessage>(envelope.clone()) {
                Ok(message) => return Some(message),
                Err(err) => log_warn!("skipping background message {envelope}: {err}"),
            }
        }
        None
    }

    /// Runs `handler` for each message, one at a time, until the background side closes.
    pub fn on_message_from_background<F, Fut>(mut self, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(ForegroundMessage) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(message) = self.recv().await {
                handler(message).await;
            }
            log_debug!("background message channel closed");
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::notify::SoundKind;

    #[tokio::test]
    async fn raw_envelopes_decode_on_the_foreground() {
        let (background, mut foreground) = message_channel();
        background
            .post_message_to_foreground("PLAY_NOTIFICATION_SOUND", json!({ "sound": "alert" }))
            .unwrap();

        assert_eq!(
            foreground.recv().await,
            Some(ForegroundMessage::PlayNotificationSound {
                sound: SoundKind::Alert
            })
        );
    }

    #[tokio::test]
    async fn unknown_envelopes_are_skipped() {
        let (background, mut foreground) = message_channel();
        background
            .post_message_to_foreground("NEW_CHAT_MESSAGE", json!({ "text": "hi" }))
            .unwrap();
        background
            .post(&ForegroundMessage::BookingExpired {
                booking_id: "b-1".into(),
            })
            .unwrap();
        drop(background);

        assert_eq!(
            foreground.recv().await,
            Some(ForegroundMessage::BookingExpired {
                booking_id: "b-1".into()
            })
        );
        assert_eq!(foreground.recv().await, None);
    }

    #[tokio::test]
    async fn handler_sees_messages_in_order() {
        let (background, foreground) = message_channel();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let listener = foreground.on_message_from_background(move |message| {
            let sink = sink.clone();
            async move { sink.lock().unwrap().push(message.message_type()) }
        });

        background
            .post(&ForegroundMessage::PlayNotificationSound {
                sound: SoundKind::Booking,
            })
            .unwrap();
        background
            .post(&ForegroundMessage::BookingExpired {
                booking_id: "b-1".into(),
            })
            .unwrap();
        drop(background);
        listener.await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["PLAY_NOTIFICATION_SOUND", "BOOKING_EXPIRED"]
        );
    }

    #[tokio::test]
    async fn signals_reach_the_background_as_envelopes() {
        let (signals, mut inbox) = signal_channel();
        signals
            .post(&BackgroundSignal::ClearAlert {
                booking_id: "b-1".into(),
            })
            .unwrap();
        signals
            .post_message_to_background("STOP_BOOKING_CHECK", Value::Null)
            .unwrap();

        assert_eq!(
            inbox.recv().await,
            Some(json!({ "type": "CLEAR_ALERT", "payload": { "bookingId": "b-1" } }))
        );
        let stop: BackgroundSignal = serde_json::from_value(inbox.recv().await.unwrap()).unwrap();
        assert_eq!(stop, BackgroundSignal::StopBookingCheck);
    }

    #[tokio::test]
    async fn posting_without_a_listener_fails() {
        let (background, foreground) = message_channel();
        drop(foreground);
        assert!(background
            .post_message_to_foreground("BOOKING_EXPIRED", json!({ "bookingId": "b-1" }))
            .is_err());
    }
}
