use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use cater_core::payment::{NewPayment, Payment, PaymentState, ProviderRef};
use cater_core::repository::PaymentRepository;
use cater_core::{CoreError, CoreResult, Entity};

use crate::database::map_sqlx_error;

const PAYMENT_COLUMNS: &str =
    "id, booking_id, total, currency, state, provider_name, provider_id, created_at, updated_at";

pub struct StorePaymentRepository {
    pool: PgPool,
}

impl StorePaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    booking_id: Uuid,
    total: Decimal,
    currency: String,
    state: String,
    provider_name: String,
    provider_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = CoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment {
            id: row.id,
            booking_id: row.booking_id,
            total: row.total,
            currency: row.currency,
            state: PaymentState::parse(&row.state)?,
            provider: ProviderRef {
                name: row.provider_name,
                id: row.provider_id,
            },
            created: row.created_at,
            updated: row.updated_at,
        })
    }
}

#[async_trait]
impl PaymentRepository for StorePaymentRepository {
    async fn create_payment(&self, payment: &NewPayment) -> CoreResult<Payment> {
        let sql = format!(
            r#"
            INSERT INTO payments (id, booking_id, total, currency, state, provider_name, provider_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {PAYMENT_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(payment.booking_id)
            .bind(payment.total)
            .bind(&payment.currency)
            .bind(PaymentState::Pending.as_str())
            .bind(&payment.provider.name)
            .bind(&payment.provider.id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.try_into()
    }

    async fn get_payment(&self, id: Uuid) -> CoreResult<Option<Payment>> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1");
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .map(Payment::try_from)
            .transpose()
    }

    async fn payments_for_booking(&self, booking_id: Uuid) -> CoreResult<Vec<Payment>> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE booking_id = $1 ORDER BY created_at"
        );
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(booking_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .into_iter()
            .map(Payment::try_from)
            .collect()
    }

    async fn set_payment_state(&self, id: Uuid, state: PaymentState) -> CoreResult<Payment> {
        let sql = format!(
            "UPDATE payments SET state = $2, updated_at = NOW() WHERE id = $1 RETURNING {PAYMENT_COLUMNS}"
        );
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(id)
            .bind(state.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .ok_or_else(|| CoreError::not_found(Entity::Payment, id))?
            .try_into()
    }
}
