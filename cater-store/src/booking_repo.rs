use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use sqlx::PgPool;
use uuid::Uuid;

use cater_core::booking::{
    Booking, BookingChanges, BookingFilter, BookingState, BookingTag, NewBooking, Tag,
    TagAssignment, Timings,
};
use cater_core::repository::BookingRepository;
use cater_core::{CoreError, CoreResult, Entity};

use crate::database::map_sqlx_error;

const BOOKING_COLUMNS: &str = "id, state, covers, menu_price, commission_fee, service_fee, \
     timings, location, logistics, dietary_notes, vendor_id, customer_id, created_at, updated_at";

pub struct StoreBookingRepository {
    pool: PgPool,
}

impl StoreBookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    state: String,
    covers: i32,
    menu_price: Decimal,
    commission_fee: Decimal,
    service_fee: Decimal,
    timings: Value,
    location: Option<Value>,
    logistics: Option<Value>,
    dietary_notes: Option<String>,
    vendor_id: Uuid,
    customer_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = CoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let state = row
            .state
            .parse::<BookingState>()
            .map_err(|e| CoreError::StorageError(e.to_string()))?;
        let timings: Timings = serde_json::from_value(row.timings)
            .map_err(|e| CoreError::StorageError(format!("malformed timings on {}: {e}", row.id)))?;

        Ok(Booking {
            id: row.id,
            state,
            covers: row.covers,
            menu_price: row.menu_price,
            commission_fee: row.commission_fee,
            service_fee: row.service_fee,
            timings,
            location: row.location.unwrap_or(Value::Null),
            logistics: row.logistics.unwrap_or(Value::Null),
            dietary_notes: row.dietary_notes,
            vendor_id: row.vendor_id,
            customer_id: row.customer_id,
            created: row.created_at,
            updated: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BookingTagRow {
    id: i64,
    name: String,
    pid: i64,
    additional_data: Value,
}

impl From<BookingTagRow> for BookingTag {
    fn from(row: BookingTagRow) -> Self {
        let attributes = match row.additional_data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        BookingTag::new(
            Tag {
                id: row.id,
                name: row.name,
                pid: row.pid,
            },
            attributes,
        )
    }
}

fn timings_json(timings: &Timings) -> CoreResult<Value> {
    serde_json::to_value(timings).map_err(|e| CoreError::InternalError(e.to_string()))
}

#[async_trait]
impl BookingRepository for StoreBookingRepository {
    async fn create_booking(&self, booking: &NewBooking) -> CoreResult<Booking> {
        let sql = format!(
            r#"
            INSERT INTO bookings (id, state, covers, menu_price, commission_fee, service_fee,
                                  timings, location, logistics, dietary_notes, vendor_id, customer_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {BOOKING_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(booking.state.as_str())
            .bind(booking.covers)
            .bind(booking.menu_price)
            .bind(booking.fees.commission_fee)
            .bind(booking.fees.service_fee)
            .bind(timings_json(&booking.timings)?)
            .bind(&booking.location)
            .bind(&booking.logistics)
            .bind(booking.dietary_notes.as_deref())
            .bind(booking.vendor_id)
            .bind(booking.customer_id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.try_into()
    }

    async fn get_booking(&self, id: Uuid) -> CoreResult<Option<Booking>> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1");
        let row = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(Booking::try_from).transpose()
    }

    async fn update_booking(&self, id: Uuid, changes: &BookingChanges) -> CoreResult<Booking> {
        let timings = changes.timings.as_ref().map(timings_json).transpose()?;
        let sql = format!(
            r#"
            UPDATE bookings SET
                state = COALESCE($2, state),
                covers = COALESCE($3, covers),
                timings = COALESCE($4, timings),
                location = COALESCE($5, location),
                logistics = COALESCE($6, logistics),
                dietary_notes = COALESCE($7, dietary_notes),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {BOOKING_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(id)
            .bind(changes.state.map(|s| s.as_str()))
            .bind(changes.covers)
            .bind(timings)
            .bind(changes.location.as_ref())
            .bind(changes.logistics.as_ref())
            .bind(changes.dietary_notes.as_deref())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .ok_or_else(|| CoreError::not_found(Entity::Booking, id))?;

        row.try_into()
    }

    async fn delete_booking(&self, id: Uuid) -> CoreResult<()> {
        let result = sqlx::query("DELETE FROM bookings WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found(Entity::Booking, id));
        }
        Ok(())
    }

    async fn booking_tags(&self, id: Uuid) -> CoreResult<Vec<BookingTag>> {
        let rows = sqlx::query_as::<_, BookingTagRow>(
            r#"
            SELECT t.id, t.name, t.pid, bt.additional_data
            FROM booking_tags bt
            JOIN tags t ON t.id = bt.tag_id
            WHERE bt.booking_id = $1
            ORDER BY t.id
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(BookingTag::from).collect())
    }

    async fn replace_booking_tags(&self, id: Uuid, tags: &[TagAssignment]) -> CoreResult<()> {
        let tag_ids: Vec<i64> = tags.iter().map(|t| t.tag_id).collect();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let known: Vec<i64> = sqlx::query_scalar("SELECT id FROM tags WHERE id = ANY($1)")
            .bind(&tag_ids)
            .fetch_all(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        if let Some(unknown) = tag_ids.iter().find(|id| !known.contains(id)) {
            return Err(CoreError::ValidationError(format!("unknown tag id: {unknown}")));
        }

        sqlx::query("DELETE FROM booking_tags WHERE booking_id = $1 AND NOT (tag_id = ANY($2))")
            .bind(id)
            .bind(&tag_ids)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        for assignment in tags {
            match &assignment.attributes {
                Some(attributes) => {
                    sqlx::query(
                        r#"
                        INSERT INTO booking_tags (booking_id, tag_id, additional_data)
                        VALUES ($1, $2, $3)
                        ON CONFLICT (booking_id, tag_id)
                        DO UPDATE SET additional_data = EXCLUDED.additional_data
                        "#,
                    )
                    .bind(id)
                    .bind(assignment.tag_id)
                    .bind(Value::Object(attributes.clone()))
                    .execute(&mut *tx)
                    .await
                    .map_err(map_sqlx_error)?;
                }
                None => {
                    // Keep whatever attributes the association already has
                    sqlx::query(
                        r#"
                        INSERT INTO booking_tags (booking_id, tag_id)
                        VALUES ($1, $2)
                        ON CONFLICT (booking_id, tag_id) DO NOTHING
                        "#,
                    )
                    .bind(id)
                    .bind(assignment.tag_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_sqlx_error)?;
                }
            }
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn list_bookings(
        &self,
        filter: &BookingFilter,
        limit: u32,
        offset: u32,
    ) -> CoreResult<(Vec<Booking>, u64)> {
        let state = filter.state.map(|s| s.as_str());
        let sql = format!(
            r#"
            SELECT {BOOKING_COLUMNS} FROM bookings
            WHERE ($1::text IS NULL OR state = $1)
              AND ($2::uuid IS NULL OR vendor_id = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#
        );

        let rows = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(state)
            .bind(filter.vendor_id)
            .bind(i64::from(limit))
            .bind(i64::from(offset))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM bookings
            WHERE ($1::text IS NULL OR state = $1)
              AND ($2::uuid IS NULL OR vendor_id = $2)
            "#,
        )
        .bind(state)
        .bind(filter.vendor_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let bookings = rows
            .into_iter()
            .map(Booking::try_from)
            .collect::<CoreResult<Vec<_>>>()?;
        Ok((bookings, u64::try_from(total).unwrap_or_default()))
    }
}
