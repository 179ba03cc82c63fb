use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing::info;
use uuid::Uuid;

use cater_core::booking::FilledBooking;
use cater_core::payment::{
    self, CardDetails, CardToken, PaymentAdapter, ProviderCustomer, Transaction,
    TransactionRequest,
};
use cater_core::{CoreError, CoreResult};
use rust_decimal::Decimal;

/// Authorization of a booking charge, returned before anything is persisted.
#[derive(Debug, Clone)]
pub struct Authorization {
    pub amount: Decimal,
    pub currency: String,
    pub transaction: Transaction,
}

pub struct PaymentOrchestrator {
    adapter: Arc<dyn PaymentAdapter>,
    currency: String,
}

impl PaymentOrchestrator {
    pub fn new(adapter: Arc<dyn PaymentAdapter>, currency: impl Into<String>) -> Self {
        Self {
            adapter,
            currency: currency.into(),
        }
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Authorize (without capturing) the booking total plus its service fee.
    pub async fn authorize(&self, booking: &FilledBooking, source: &str) -> CoreResult<Authorization> {
        let amount = payment::charge_amount(booking.total, booking.service_fee)?;
        let request = TransactionRequest {
            amount_minor: payment::to_minor_units(amount)?,
            currency: self.currency.clone(),
            source: source.to_string(),
        };
        let transaction = self.adapter.create_transaction(&request).await?;
        info!(
            booking_id = %booking.id,
            transaction_id = %transaction.id,
            amount_minor = request.amount_minor,
            "Charge authorized"
        );
        Ok(Authorization {
            amount,
            currency: request.currency,
            transaction,
        })
    }

    pub async fn capture(&self, transaction_id: &str) -> CoreResult<()> {
        self.adapter.capture_transaction(transaction_id).await
    }

    pub async fn create_token(&self, card: &CardDetails) -> CoreResult<CardToken> {
        self.adapter.create_token(card).await
    }

    pub async fn create_customer(&self, email: &str) -> CoreResult<ProviderCustomer> {
        self.adapter.create_customer(email).await
    }
}

#[derive(Debug, Default)]
struct MockLedger {
    transactions: Vec<TransactionRequest>,
    captured: Vec<String>,
    customers: Vec<String>,
    fail_transactions: bool,
    fail_capture: bool,
    fail_customers: bool,
}

/// Payment adapter that approves everything unless told otherwise.
#[derive(Default)]
pub struct MockPaymentAdapter {
    ledger: Mutex<MockLedger>,
}

impl MockPaymentAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn ledger(&self) -> std::sync::MutexGuard<'_, MockLedger> {
        self.ledger.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn fail_transactions(&self, fail: bool) {
        self.ledger().fail_transactions = fail;
    }

    pub fn fail_capture(&self, fail: bool) {
        self.ledger().fail_capture = fail;
    }

    pub fn fail_customers(&self, fail: bool) {
        self.ledger().fail_customers = fail;
    }

    pub fn transactions(&self) -> Vec<TransactionRequest> {
        self.ledger().transactions.clone()
    }

    pub fn captured(&self) -> Vec<String> {
        self.ledger().captured.clone()
    }

    pub fn customers(&self) -> Vec<String> {
        self.ledger().customers.clone()
    }
}

#[async_trait]
impl PaymentAdapter for MockPaymentAdapter {
    async fn create_token(&self, card: &CardDetails) -> CoreResult<CardToken> {
        let last4: String = card
            .number
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        Ok(CardToken {
            id: format!("tok_mock_{last4}"),
        })
    }

    async fn create_transaction(&self, request: &TransactionRequest) -> CoreResult<Transaction> {
        let mut ledger = self.ledger();
        if ledger.fail_transactions {
            return Err(CoreError::ProviderError("Your card was declined.".into()));
        }
        ledger.transactions.push(request.clone());
        Ok(Transaction {
            id: format!("ch_mock_{}", Uuid::new_v4().simple()),
            amount_minor: request.amount_minor,
            currency: request.currency.clone(),
        })
    }

    async fn capture_transaction(&self, transaction_id: &str) -> CoreResult<()> {
        let mut ledger = self.ledger();
        if ledger.fail_capture {
            return Err(CoreError::ProviderError(format!(
                "Charge {transaction_id} could not be captured"
            )));
        }
        ledger.captured.push(transaction_id.to_string());
        Ok(())
    }

    async fn create_customer(&self, email: &str) -> CoreResult<ProviderCustomer> {
        let mut ledger = self.ledger();
        if ledger.fail_customers {
            return Err(CoreError::ProviderError("customer creation failed".into()));
        }
        ledger.customers.push(email.to_string());
        Ok(ProviderCustomer {
            id: format!("cus_mock_{}", Uuid::new_v4().simple()),
        })
    }
}
