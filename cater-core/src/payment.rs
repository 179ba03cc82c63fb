use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal::RoundingStrategy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CoreError, CoreResult};

pub const DEFAULT_CURRENCY: &str = "gbp";
pub const PROVIDER_NAME: &str = "Stripe";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentState {
    #[default]
    Pending,
    Approved,
    Declined,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Pending => "pending",
            PaymentState::Approved => "approved",
            PaymentState::Declined => "declined",
        }
    }

    pub fn parse(s: &str) -> CoreResult<Self> {
        match s {
            "pending" => Ok(PaymentState::Pending),
            "approved" => Ok(PaymentState::Approved),
            "declined" => Ok(PaymentState::Declined),
            other => Err(CoreError::StorageError(format!("unknown payment state: {other}"))),
        }
    }
}

/// Link between a payment and the provider's transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderRef {
    pub name: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub total: Decimal,
    pub currency: String,
    pub state: PaymentState,
    pub provider: ProviderRef,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub booking_id: Uuid,
    pub total: Decimal,
    pub currency: String,
    pub provider: ProviderRef,
}

/// Card data used to mint a test token with the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardDetails {
    pub number: String,
    pub exp_month: u32,
    pub exp_year: u32,
    pub cvc: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardToken {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    /// Amount in the currency's minor unit (pence for gbp).
    pub amount_minor: i64,
    pub currency: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub id: String,
    pub amount_minor: i64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCustomer {
    pub id: String,
}

/// Charge owed for a booking: total plus the snapshotted service fee percentage,
/// rounded to two decimal places.
pub fn charge_amount(total: Decimal, service_fee: Decimal) -> CoreResult<Decimal> {
    Decimal::ONE
        .checked_add(service_fee / Decimal::ONE_HUNDRED)
        .and_then(|multiplier| total.checked_mul(multiplier))
        .map(|amount| amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
        .ok_or_else(|| CoreError::ValidationError(format!("charge out of range for total {total}")))
}

pub fn to_minor_units(amount: Decimal) -> CoreResult<i64> {
    amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .map(|minor| minor.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|minor| minor.to_i64())
        .ok_or_else(|| CoreError::ValidationError(format!("amount out of range: {amount}")))
}

pub fn from_minor_units(amount_minor: i64) -> Decimal {
    Decimal::new(amount_minor, 2)
}

#[async_trait]
pub trait PaymentAdapter: Send + Sync {
    /// Exchange raw card details for a single-use token
    async fn create_token(&self, card: &CardDetails) -> CoreResult<CardToken>;

    /// Authorize a charge without capturing it
    async fn create_transaction(&self, request: &TransactionRequest) -> CoreResult<Transaction>;

    /// Capture a previously authorized charge
    async fn capture_transaction(&self, transaction_id: &str) -> CoreResult<()>;

    async fn create_customer(&self, email: &str) -> CoreResult<ProviderCustomer>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_charge_amount_includes_service_fee() {
        let amount = charge_amount(Decimal::from(106), Decimal::from(10)).unwrap();
        assert_eq!(amount, Decimal::from_str("116.60").unwrap());
        assert_eq!(to_minor_units(amount).unwrap(), 11660);
    }

    #[test]
    fn test_charge_amount_rounds_half_away_from_zero() {
        let amount = charge_amount(Decimal::from_str("10.05").unwrap(), Decimal::from(5)).unwrap();
        // 10.05 * 1.05 = 10.5525
        assert_eq!(amount, Decimal::from_str("10.55").unwrap());
    }

    #[test]
    fn test_oversized_amounts_are_errors() {
        assert!(charge_amount(Decimal::MAX, Decimal::from(10)).is_err());
        assert!(to_minor_units(Decimal::MAX).is_err());
    }

    #[test]
    fn test_minor_unit_round_trip() {
        assert_eq!(from_minor_units(11660), Decimal::from_str("116.60").unwrap());
        assert_eq!(to_minor_units(from_minor_units(1)).unwrap(), 1);
    }

    #[test]
    fn test_payment_state_wire_names() {
        assert_eq!(serde_json::to_string(&PaymentState::Approved).unwrap(), "\"approved\"");
        assert_eq!(PaymentState::parse("declined").unwrap(), PaymentState::Declined);
        assert!(PaymentState::parse("refunded").is_err());
    }
}
