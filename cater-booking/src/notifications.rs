use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::join_all;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use cater_core::booking::FilledBooking;
use cater_core::notification::{
    self, DeliveryReceipt, Mailer, Recipient, StatusNotice, Template,
};
use cater_core::payment::Payment;
use cater_core::user::{User, Vendor};
use cater_core::{CoreError, CoreResult};
use cater_shared::pii::Masked;

use crate::models::{Delivery, DeliveryStatus};

/// The people a booking message can go to.
#[derive(Debug, Clone)]
pub struct Parties {
    pub customer: User,
    pub vendor: Vendor,
    /// Profile user behind the vendor; vendor messages go to this address.
    pub vendor_user: User,
}

impl Parties {
    fn user(&self, recipient: Recipient) -> &User {
        match recipient {
            Recipient::Customer => &self.customer,
            Recipient::Vendor => &self.vendor_user,
        }
    }
}

/// Renders template contexts and hands them to the mailer.
pub struct NotificationDispatcher {
    mailer: Arc<dyn Mailer>,
}

impl NotificationDispatcher {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }

    pub fn booking_context(booking: &FilledBooking, parties: &Parties, receiver: &User) -> Value {
        json!({
            "receiver": receiver.email,
            "username": receiver.display_name(),
            "booking_id": booking.id,
            "datetime": notification::format_event_datetime(booking.timings.date),
            "vendor": parties.vendor.name,
            "state": booking.state,
            "until": notification::until_days(booking.timings.date, Utc::now()),
        })
    }

    pub fn payment_context(payment: &Payment, receiver: &User) -> Value {
        json!({
            "receiver": receiver.email,
            "username": receiver.display_name(),
            "id": payment.id,
            "total": payment.total,
            "state": payment.state,
            "provider": {
                "name": payment.provider.name,
                "id": payment.provider.id,
            },
        })
    }

    /// Messages for the booking's current state.
    pub async fn booking_status(&self, booking: &FilledBooking, parties: &Parties) -> Vec<Delivery> {
        let notices = notification::status_notices(booking.state);
        self.deliver(&notices, parties, |user| {
            Self::booking_context(booking, parties, user)
        })
        .await
    }

    /// Messages for the payment's current state.
    pub async fn payment_status(&self, payment: &Payment, parties: &Parties) -> Vec<Delivery> {
        let notices = notification::payment_notices(payment.state);
        self.deliver(&notices, parties, |user| Self::payment_context(payment, user))
            .await
    }

    /// `booking_received` and `vendor_booking_received` for a fresh booking.
    pub async fn booking_created(&self, booking: &FilledBooking, parties: &Parties) -> Vec<Delivery> {
        let notices = [
            StatusNotice {
                template: Template::BookingReceived,
                recipient: Recipient::Customer,
            },
            StatusNotice {
                template: Template::VendorBookingReceived,
                recipient: Recipient::Vendor,
            },
        ];
        self.deliver(&notices, parties, |user| {
            Self::booking_context(booking, parties, user)
        })
        .await
    }

    pub async fn welcome(&self, user: &User) -> CoreResult<DeliveryReceipt> {
        let context = json!({
            "receiver": user.email,
            "username": user.display_name(),
        });
        self.mailer.send(Template::Welcome, &context).await
    }

    /// Send every notice concurrently; failures are recorded, never raised.
    async fn deliver<F>(&self, notices: &[StatusNotice], parties: &Parties, context: F) -> Vec<Delivery>
    where
        F: Fn(&User) -> Value,
    {
        let sends = notices.iter().map(|notice| {
            let receiver = parties.user(notice.recipient);
            let ctx = context(receiver);
            let mailer = self.mailer.clone();
            let notice = *notice;
            let email = receiver.email.clone();
            async move {
                let outcome = mailer.send(notice.template, &ctx).await;
                match outcome {
                    Ok(receipt) => {
                        info!(
                            template = notice.template.as_str(),
                            receiver = %Masked(&email),
                            receipt = %receipt.id,
                            "Notification sent"
                        );
                        Delivery {
                            template: notice.template,
                            recipient: notice.recipient,
                            status: DeliveryStatus::Sent,
                            error: None,
                        }
                    }
                    Err(err) => {
                        warn!(
                            template = notice.template.as_str(),
                            receiver = %Masked(&email),
                            "Notification failed: {}",
                            err
                        );
                        Delivery {
                            template: notice.template,
                            recipient: notice.recipient,
                            status: DeliveryStatus::Failed,
                            error: Some(err.to_string()),
                        }
                    }
                }
            }
        });
        join_all(sends).await
    }
}

/// A message captured by [`MockMailer`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub template: Template,
    pub context: Value,
}

/// Mailer that records messages instead of sending them.
#[derive(Default)]
pub struct MockMailer {
    sent: Mutex<Vec<SentMessage>>,
    failing: Mutex<bool>,
}

impl MockMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap_or_else(|p| p.into_inner()) = failing;
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn templates(&self) -> Vec<Template> {
        self.sent().into_iter().map(|m| m.template).collect()
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send(&self, template: Template, context: &Value) -> CoreResult<DeliveryReceipt> {
        if *self.failing.lock().unwrap_or_else(|p| p.into_inner()) {
            return Err(CoreError::DeliveryError("mock mailer offline".into()));
        }
        self.sent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(SentMessage {
                template,
                context: context.clone(),
            });
        Ok(DeliveryReceipt {
            id: format!("mock_msg_{}", Uuid::new_v4().simple()),
            status: "sent".into(),
        })
    }
}
