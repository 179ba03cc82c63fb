use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use cater_core::booking::{
    Booking, BookingChanges, BookingDraft, BookingFilter, BookingState, CustomerSummary,
    FilledBooking, NewBooking, TagAssignment, VendorSummary,
};
use cater_core::payment::{NewPayment, Payment, PaymentState};
use cater_core::repository::{
    BookingRepository, PaymentRepository, SettingsProvider, UserRepository, VendorRepository,
};
use cater_core::user::{User, Vendor};
use cater_core::{CoreError, CoreResult, Entity};

/// Relational side of the booking domain: CRUD plus hydration of filled bookings.
#[derive(Clone)]
pub struct PersistenceGateway {
    bookings: Arc<dyn BookingRepository>,
    payments: Arc<dyn PaymentRepository>,
    users: Arc<dyn UserRepository>,
    vendors: Arc<dyn VendorRepository>,
    settings: Arc<dyn SettingsProvider>,
}

impl PersistenceGateway {
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        payments: Arc<dyn PaymentRepository>,
        users: Arc<dyn UserRepository>,
        vendors: Arc<dyn VendorRepository>,
        settings: Arc<dyn SettingsProvider>,
    ) -> Self {
        Self {
            bookings,
            payments,
            users,
            vendors,
            settings,
        }
    }

    pub fn users(&self) -> &Arc<dyn UserRepository> {
        &self.users
    }

    /// Insert a pending booking with the vendor's current menu price and the
    /// current fee settings copied onto it.
    pub async fn create(&self, customer_id: Uuid, draft: BookingDraft) -> CoreResult<FilledBooking> {
        let vendor = self.vendor(draft.vendor_id).await?;
        self.user(customer_id).await?;
        let fees = self.settings.fee_settings().await?;

        let booking = self
            .bookings
            .create_booking(&NewBooking {
                customer_id,
                vendor_id: vendor.id,
                state: BookingState::Pending,
                covers: draft.covers,
                menu_price: vendor.menu_price,
                fees,
                timings: draft.timings,
                location: draft.location,
                logistics: draft.logistics,
                dietary_notes: draft.dietary_notes,
            })
            .await?;

        if !draft.tags.is_empty() {
            if let Err(err) = self.bookings.replace_booking_tags(booking.id, &draft.tags).await {
                // Tags are part of the insert; do not leave a half-written booking behind
                if let Err(cleanup) = self.bookings.delete_booking(booking.id).await {
                    warn!(booking_id = %booking.id, "Failed to roll back booking: {}", cleanup);
                }
                return Err(err);
            }
        }

        self.get_one_filled(booking.id).await
    }

    pub async fn get_one(&self, id: Uuid) -> CoreResult<Booking> {
        self.bookings
            .get_booking(id)
            .await?
            .ok_or_else(|| CoreError::not_found(Entity::Booking, id))
    }

    /// Booking with tags, payments, vendor and customer summaries and the derived total.
    pub async fn get_one_filled(&self, id: Uuid) -> CoreResult<FilledBooking> {
        let booking = self.get_one(id).await?;
        let tags = self.bookings.booking_tags(id).await?;
        let payments = self.payments.payments_for_booking(id).await?;
        let vendor = self.vendor(booking.vendor_id).await?;
        let customer = self.user(booking.customer_id).await?;

        FilledBooking::assemble(
            booking,
            tags,
            payments,
            VendorSummary {
                id: vendor.id,
                name: vendor.name,
            },
            CustomerSummary {
                id: customer.id,
                email: customer.email,
            },
        )
    }

    /// Apply column changes and, when given, the new tag set. The booking's
    /// vendor must still exist; the price snapshot is left alone.
    pub async fn update(
        &self,
        id: Uuid,
        changes: &BookingChanges,
        tags: Option<&[TagAssignment]>,
    ) -> CoreResult<FilledBooking> {
        let booking = self.get_one(id).await?;
        self.vendor(booking.vendor_id).await?;

        if !changes.is_empty() {
            self.bookings.update_booking(id, changes).await?;
        }
        if let Some(tags) = tags {
            self.bookings.replace_booking_tags(id, tags).await?;
        }

        self.get_one_filled(id).await
    }

    pub async fn remove(&self, id: Uuid) -> CoreResult<()> {
        self.bookings.delete_booking(id).await
    }

    pub async fn list(
        &self,
        filter: &BookingFilter,
        limit: u32,
        offset: u32,
    ) -> CoreResult<(Vec<Booking>, u64)> {
        self.bookings.list_bookings(filter, limit, offset).await
    }

    pub async fn payments(&self, booking_id: Uuid) -> CoreResult<Vec<Payment>> {
        self.payments.payments_for_booking(booking_id).await
    }

    pub async fn payment(&self, id: Uuid) -> CoreResult<Payment> {
        self.payments
            .get_payment(id)
            .await?
            .ok_or_else(|| CoreError::not_found(Entity::Payment, id))
    }

    pub async fn create_payment(&self, payment: &NewPayment) -> CoreResult<Payment> {
        self.payments.create_payment(payment).await
    }

    pub async fn set_payment_state(&self, id: Uuid, state: PaymentState) -> CoreResult<Payment> {
        self.payments.set_payment_state(id, state).await
    }

    pub async fn vendor(&self, id: Uuid) -> CoreResult<Vendor> {
        self.vendors
            .get_vendor(id)
            .await?
            .ok_or_else(|| CoreError::not_found(Entity::Vendor, id))
    }

    pub async fn vendor_by_user(&self, user_id: Uuid) -> CoreResult<Vendor> {
        self.vendors
            .get_vendor_by_user(user_id)
            .await?
            .ok_or_else(|| CoreError::not_found(Entity::Vendor, user_id))
    }

    pub async fn user(&self, id: Uuid) -> CoreResult<User> {
        self.users
            .get_user(id)
            .await?
            .ok_or_else(|| CoreError::not_found(Entity::User, id))
    }
}
