use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::{models::BookingRecord, realtime::LocalFeed};

use super::Database;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

/// Backend document store for bookings.
#[async_trait]
pub trait BookingStore: Send + Sync + 'static {
    async fn get_booking(&self, booking_id: &str) -> Result<Option<BookingRecord>>;

    /// Merges `fields` into the booking document.
    async fn update_booking(&self, booking_id: &str, fields: Map<String, Value>) -> Result<()>;

    /// Bookings written after `since`, oldest write first.
    async fn bookings_updated_since(&self, since: DateTime<Utc>) -> Result<Vec<BookingRecord>>;
}

/// SQLite-backed store. Every write is published to the [`LocalFeed`] so
/// realtime subscribers see it, the way a hosted document database would.
#[derive(Clone)]
pub struct SqliteBookingStore {
    db: Database,
    feed: LocalFeed,
}

impl SqliteBookingStore {
    pub fn new(db: Database, feed: LocalFeed) -> Self {
        Self { db, feed }
    }

    pub async fn insert_booking(&self, record: &BookingRecord) -> Result<()> {
        self.db.insert_booking(record).await?;
        self.feed.publish(&record.booking_id, record.to_document());
        Ok(())
    }

    pub async fn open_bookings(&self) -> Result<Vec<BookingRecord>> {
        self.db.list_open_bookings().await
    }
}

#[async_trait]
impl BookingStore for SqliteBookingStore {
    async fn get_booking(&self, booking_id: &str) -> Result<Option<BookingRecord>> {
        self.db.get_booking(booking_id).await
    }

    async fn update_booking(&self, booking_id: &str, fields: Map<String, Value>) -> Result<()> {
        let updated = self
            .db
            .update_booking_fields(booking_id, fields, Utc::now())
            .await?;

        let Some(record) = updated else {
            log_warn!("update for unknown booking {}", booking_id);
            return Err(anyhow!("booking {booking_id} not found"));
        };

        let delivered = self.feed.publish(booking_id, record.to_document());
        log_debug!(
            "booking {} now {} ({} listeners notified)",
            booking_id,
            record.status,
            delivered
        );
        Ok(())
    }

    async fn bookings_updated_since(&self, since: DateTime<Utc>) -> Result<Vec<BookingRecord>> {
        self.db.list_bookings_updated_since(since).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;
    use crate::{models::BookingRequest, realtime::ChangeFeed};

    fn record(id: &str) -> BookingRecord {
        let request = BookingRequest {
            booking_id: id.to_string(),
            therapist_name: "Maya Sari".to_string(),
            duration: 60,
            price: 250_000.0,
            response_deadline: Utc::now() + Duration::minutes(5),
        };
        BookingRecord::from_request(&request, Utc::now())
    }

    #[tokio::test]
    async fn writes_are_published_to_subscribers() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("bookings.db")).unwrap();
        let feed = LocalFeed::new();
        let store = SqliteBookingStore::new(db, feed.clone());
        store.insert_booking(&record("b-1")).await.unwrap();

        let mut stream = feed.connect("b-1").await.unwrap();
        let mut fields = Map::new();
        fields.insert("status".into(), json!("broadcast_all"));
        store.update_booking("b-1", fields).await.unwrap();

        let document = stream.recv().await.unwrap();
        assert_eq!(document["status"], json!("broadcast_all"));
        assert_eq!(document["bookingId"], json!("b-1"));
    }

    #[tokio::test]
    async fn recent_writes_are_listed_in_write_order() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("bookings.db")).unwrap();
        let store = SqliteBookingStore::new(db, LocalFeed::new());
        store.insert_booking(&record("b-1")).await.unwrap();
        store.insert_booking(&record("b-2")).await.unwrap();

        let checkpoint = Utc::now();
        let mut fields = Map::new();
        fields.insert("status".into(), json!("confirmed"));
        store.update_booking("b-2", fields).await.unwrap();

        let recent: Vec<String> = store
            .bookings_updated_since(checkpoint)
            .await
            .unwrap()
            .into_iter()
            .map(|record| record.booking_id)
            .collect();
        assert_eq!(recent, vec!["b-2".to_string()]);

        let all = store
            .bookings_updated_since(checkpoint - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.last().map(|record| record.status.as_str()), Some("confirmed"));
    }

    #[tokio::test]
    async fn updating_an_unknown_booking_fails() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("bookings.db")).unwrap();
        let store = SqliteBookingStore::new(db, LocalFeed::new());

        assert!(store.update_booking("ghost", Map::new()).await.is_err());
    }
}
