use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{ChangeFeed, ChangeStream};

type Listeners = HashMap<String, Vec<mpsc::UnboundedSender<Value>>>;

/// In-process change feed. Writers publish, every open stream for that
/// booking receives a copy.
#[derive(Clone, Default)]
pub struct LocalFeed {
    listeners: Arc<Mutex<Listeners>>,
}

impl LocalFeed {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Listeners> {
        match self.listeners.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Returns how many streams received the document.
    pub fn publish(&self, booking_id: &str, document: Value) -> usize {
        let mut listeners = self.lock();
        let Some(senders) = listeners.get_mut(booking_id) else {
            return 0;
        };

        senders.retain(|sender| sender.send(document.clone()).is_ok());
        let delivered = senders.len();
        if senders.is_empty() {
            listeners.remove(booking_id);
        }
        delivered
    }

    /// Ends every open stream for `booking_id`, as a dropped connection would.
    pub fn disconnect(&self, booking_id: &str) {
        self.lock().remove(booking_id);
    }

    pub fn listener_count(&self, booking_id: &str) -> usize {
        self.lock()
            .get(booking_id)
            .map(|senders| senders.iter().filter(|sender| !sender.is_closed()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ChangeFeed for LocalFeed {
    async fn connect(&self, booking_id: &str) -> Result<ChangeStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().entry(booking_id.to_string()).or_default().push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_reaches_every_stream_for_the_booking() {
        let feed = LocalFeed::new();
        let mut first = feed.connect("b-1").await.unwrap();
        let mut second = feed.connect("b-1").await.unwrap();
        let mut other = feed.connect("b-2").await.unwrap();

        assert_eq!(feed.publish("b-1", json!({ "status": "confirmed" })), 2);

        assert_eq!(first.recv().await, Some(json!({ "status": "confirmed" })));
        assert_eq!(second.recv().await, Some(json!({ "status": "confirmed" })));
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_streams_are_pruned() {
        let feed = LocalFeed::new();
        let stream = feed.connect("b-1").await.unwrap();
        drop(stream);

        assert_eq!(feed.publish("b-1", json!({ "status": "expired" })), 0);
        assert_eq!(feed.listener_count("b-1"), 0);
    }

    #[tokio::test]
    async fn disconnect_closes_streams() {
        let feed = LocalFeed::new();
        let mut stream = feed.connect("b-1").await.unwrap();
        feed.disconnect("b-1");
        assert_eq!(stream.recv().await, None);
    }
}
