use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};

use crate::{
    db::{
        helpers::{parse_datetime, parse_extra, to_u32},
        Database,
    },
    models::BookingRecord,
};

const SELECT_COLUMNS: &str = "id, therapist_name, duration_minutes, price, response_deadline, \
     status, therapist_id, extra, updated_at";

fn row_to_booking(row: &Row) -> Result<BookingRecord> {
    let duration: i64 = row.get("duration_minutes")?;
    let response_deadline: String = row.get("response_deadline")?;
    let updated_at: String = row.get("updated_at")?;
    let extra: String = row.get("extra")?;

    Ok(BookingRecord {
        booking_id: row.get("id")?,
        therapist_name: row.get("therapist_name")?,
        duration: to_u32(duration, "duration_minutes")?,
        price: row.get("price")?,
        response_deadline: parse_datetime(&response_deadline, "response_deadline")?,
        status: row.get("status")?,
        therapist_id: row.get("therapist_id")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
        extra: parse_extra(&extra)?,
    })
}

fn load_booking(conn: &Connection, booking_id: &str) -> Result<Option<BookingRecord>> {
    let sql = format!("SELECT {SELECT_COLUMNS} FROM bookings WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt
        .query_row(params![booking_id], |row| Ok(row_to_booking(row)))
        .optional()?;
    row.transpose()
}

/// Splits a partial document into column updates and the merged `extra` blob.
fn apply_fields(record: &mut BookingRecord, fields: Map<String, Value>) -> Result<()> {
    for (key, value) in fields {
        match key.as_str() {
            "status" => {
                record.status = value
                    .as_str()
                    .ok_or_else(|| anyhow!("status must be a string"))?
                    .to_string();
            }
            "therapistId" => {
                record.therapist_id = match value {
                    Value::Null => None,
                    Value::String(id) => Some(id),
                    other => return Err(anyhow!("therapistId must be a string, got {other}")),
                };
            }
            "bookingId" | "updatedAt" => {}
            _ => {
                record.extra.insert(key, value);
            }
        }
    }
    Ok(())
}

impl Database {
    pub async fn insert_booking(&self, record: &BookingRecord) -> Result<()> {
        let record = record.clone();
        self.execute(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO bookings (id, therapist_name, duration_minutes, price, response_deadline, status, therapist_id, extra, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.booking_id,
                    record.therapist_name,
                    i64::from(record.duration),
                    record.price,
                    record.response_deadline.to_rfc3339(),
                    record.status,
                    record.therapist_id,
                    Value::Object(record.extra.clone()).to_string(),
                    now,
                    record.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_booking(&self, booking_id: &str) -> Result<Option<BookingRecord>> {
        let booking_id = booking_id.to_string();
        self.execute(move |conn| load_booking(conn, &booking_id)).await
    }

    /// Merges `fields` into the stored document and returns the result.
    /// `Ok(None)` when the booking does not exist.
    pub async fn update_booking_fields(
        &self,
        booking_id: &str,
        fields: Map<String, Value>,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<BookingRecord>> {
        let booking_id = booking_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let Some(mut record) = load_booking(&tx, &booking_id)? else {
                return Ok(None);
            };

            apply_fields(&mut record, fields)?;
            record.updated_at = updated_at;

            tx.execute(
                "UPDATE bookings
                 SET status = ?1,
                     therapist_id = ?2,
                     extra = ?3,
                     updated_at = ?4
                 WHERE id = ?5",
                params![
                    record.status,
                    record.therapist_id,
                    Value::Object(record.extra.clone()).to_string(),
                    record.updated_at.to_rfc3339(),
                    booking_id,
                ],
            )?;
            tx.commit()?;
            Ok(Some(record))
        })
        .await
    }

    /// Bookings still awaiting an outcome, oldest deadline first.
    pub async fn list_open_bookings(&self) -> Result<Vec<BookingRecord>> {
        self.execute(|conn| {
            let sql = format!(
                "SELECT {SELECT_COLUMNS} FROM bookings
                 WHERE status NOT IN (?1, ?2, ?3)
                 ORDER BY response_deadline ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let [confirmed, cancelled, completed] = BookingRecord::CLOSED_STATUSES;
            let rows = stmt.query_map(
                params![confirmed, cancelled, completed],
                |row| Ok(row_to_booking(row)),
            )?;

            let mut bookings = Vec::new();
            for row in rows {
                bookings.push(row??);
            }
            Ok(bookings)
        })
        .await
    }

    pub async fn list_bookings_updated_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<BookingRecord>> {
        self.execute(move |conn| {
            let sql = format!("SELECT {SELECT_COLUMNS} FROM bookings");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], |row| Ok(row_to_booking(row)))?;

            // Stored timestamps vary in precision, so compare parsed values.
            let mut bookings = Vec::new();
            for row in rows {
                let record = row??;
                if record.updated_at > since {
                    bookings.push(record);
                }
            }
            bookings.sort_by_key(|record| record.updated_at);
            Ok(bookings)
        })
        .await
    }
}
