use futures_util::future::join_all;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use cater_core::booking::{
    Booking, BookingChanges, BookingFilter, BookingPayload, BookingState, FilledBooking,
};
use cater_core::identity::{Actor, Role};
use cater_core::payment::{
    CardDetails, CardToken, NewPayment, Payment, PaymentState, ProviderRef, PROVIDER_NAME,
};
use cater_core::search::{self, AggregateUpdate, IndexedDoc, BOOKINGS};
use cater_core::{CoreError, CoreResult, Entity};
use cater_shared::{Page, Paging};

use crate::gateway::PersistenceGateway;
use crate::mirror::MirrorSync;
use crate::models::{Acknowledgement, NotificationReport};
use crate::notifications::{NotificationDispatcher, Parties};
use crate::orchestrator::PaymentOrchestrator;

pub const BOOKING_REMOVED: &str = "Booking has been successfully removed.";
pub const NOTIFICATIONS_PROCESSED: &str = "Notifications have been processed.";

/// Booking lifecycle: relational writes first, then the search mirror and
/// notifications, which never fail the operation.
pub struct BookingManager {
    gateway: PersistenceGateway,
    mirror: Arc<MirrorSync>,
    notifier: Arc<NotificationDispatcher>,
    payments: Arc<PaymentOrchestrator>,
}

impl BookingManager {
    pub fn new(
        gateway: PersistenceGateway,
        mirror: Arc<MirrorSync>,
        notifier: Arc<NotificationDispatcher>,
        payments: Arc<PaymentOrchestrator>,
    ) -> Self {
        Self {
            gateway,
            mirror,
            notifier,
            payments,
        }
    }

    pub fn gateway(&self) -> &PersistenceGateway {
        &self.gateway
    }

    /// Customer owner, assigned vendor, or admin.
    async fn ensure_access(&self, booking: &Booking, actor: &Actor) -> CoreResult<()> {
        let allowed = match actor.role {
            Role::Admin => true,
            Role::Customer => booking.customer_id == actor.id,
            Role::Vendor => match self.gateway.vendor_by_user(actor.id).await {
                Ok(vendor) => vendor.id == booking.vendor_id,
                Err(err) if err.is_not_found() => false,
                Err(err) => return Err(err),
            },
        };
        if allowed {
            Ok(())
        } else {
            Err(CoreError::OwnershipViolation(booking.id.to_string()))
        }
    }

    /// Customer owner or admin.
    fn ensure_owner(booking: &Booking, actor: &Actor) -> CoreResult<()> {
        if actor.is_admin() || booking.customer_id == actor.id {
            Ok(())
        } else {
            Err(CoreError::OwnershipViolation(booking.id.to_string()))
        }
    }

    async fn parties(&self, booking: &FilledBooking) -> CoreResult<Parties> {
        let customer = self.gateway.user(booking.customer_id).await?;
        let vendor = self.gateway.vendor(booking.vendor_id).await?;
        let vendor_user = self.gateway.user(vendor.user_id).await?;
        Ok(Parties {
            customer,
            vendor,
            vendor_user,
        })
    }

    pub async fn create(&self, actor: &Actor, payload: &BookingPayload) -> CoreResult<FilledBooking> {
        let draft = payload.validate_for_create()?;
        let booking = self.gateway.create(actor.id, draft).await?;
        info!(
            booking_id = %booking.id,
            vendor_id = %booking.vendor_id,
            covers = booking.covers,
            "Booking created"
        );

        self.mirror.index_booking(booking.id).await;

        let parties = match self.parties(&booking).await {
            Ok(parties) => parties,
            Err(err) => {
                error!(
                    consistency_gap = true,
                    booking_id = %booking.id,
                    "Could not resolve booking parties after create: {}",
                    err
                );
                return Ok(booking);
            }
        };

        for user_id in [parties.customer.id, parties.vendor_user.id] {
            self.mirror
                .update_user_aggregate(
                    user_id,
                    AggregateUpdate::AppendBooking {
                        booking_id: booking.id,
                        date: booking.created,
                    },
                )
                .await;
        }

        let deliveries = self.notifier.booking_created(&booking, &parties).await;
        let failed = deliveries.iter().filter(|d| !d.is_sent()).count();
        if failed > 0 {
            warn!(booking_id = %booking.id, failed, "Creation notifications not delivered");
        }

        Ok(booking)
    }

    pub async fn get_one(&self, id: Uuid, actor: &Actor) -> CoreResult<FilledBooking> {
        let booking = self.gateway.get_one(id).await?;
        self.ensure_access(&booking, actor).await?;
        self.gateway.get_one_filled(id).await
    }

    /// Apply a partial update. State changes must follow the lifecycle;
    /// tags are replaced only when the payload mentions them.
    pub async fn update(
        &self,
        id: Uuid,
        payload: &BookingPayload,
        actor: &Actor,
    ) -> CoreResult<FilledBooking> {
        let booking = self.gateway.get_one(id).await?;
        Self::ensure_owner(&booking, actor)?;

        let changes = payload.validate_for_update()?;
        if let Some(next) = changes.state {
            booking.state.transition(next)?;
        }
        let tags = payload.tag_assignments();

        let updated = self.gateway.update(id, &changes, tags.as_deref()).await?;
        info!(booking_id = %id, state = %updated.state, "Booking updated");
        self.mirror.index_booking(id).await;
        Ok(updated)
    }

    pub async fn remove(&self, id: Uuid, actor: &Actor) -> CoreResult<Acknowledgement> {
        let booking = self.gateway.get_one(id).await?;
        Self::ensure_owner(&booking, actor)?;
        let filled = self.gateway.get_one_filled(id).await?;
        let vendor = self.gateway.vendor(filled.vendor_id).await?;

        self.gateway.remove(id).await?;
        info!(booking_id = %id, "Booking removed");

        for user_id in [filled.customer_id, vendor.user_id] {
            self.mirror
                .update_user_aggregate(user_id, AggregateUpdate::RemoveBooking { booking_id: id })
                .await;
        }
        self.mirror.remove_booking(id).await;

        Ok(Acknowledgement::new(BOOKING_REMOVED))
    }

    pub async fn get_payments(&self, booking_id: Uuid, actor: &Actor) -> CoreResult<Vec<Payment>> {
        let booking = self.gateway.get_one(booking_id).await?;
        self.ensure_access(&booking, actor).await?;
        self.gateway.payments(booking_id).await
    }

    pub async fn get_one_payment(
        &self,
        booking_id: Uuid,
        payment_id: Uuid,
        actor: &Actor,
    ) -> CoreResult<Payment> {
        let booking = self.gateway.get_one(booking_id).await?;
        self.ensure_access(&booking, actor).await?;
        self.payment_of(&booking, payment_id).await
    }

    async fn payment_of(&self, booking: &Booking, payment_id: Uuid) -> CoreResult<Payment> {
        let payment = self.gateway.payment(payment_id).await?;
        if payment.booking_id != booking.id {
            return Err(CoreError::not_found(Entity::Payment, payment_id));
        }
        Ok(payment)
    }

    /// Authorize the charge with the provider, then record the payment.
    pub async fn insert_payment(
        &self,
        booking_id: Uuid,
        card_token: &str,
        actor: &Actor,
    ) -> CoreResult<Payment> {
        let booking = self.gateway.get_one(booking_id).await?;
        Self::ensure_owner(&booking, actor)?;
        let filled = self.gateway.get_one_filled(booking_id).await?;

        let authorization = self.payments.authorize(&filled, card_token).await?;
        let new_payment = NewPayment {
            booking_id,
            total: authorization.amount,
            currency: authorization.currency,
            provider: ProviderRef {
                name: PROVIDER_NAME.to_string(),
                id: authorization.transaction.id.clone(),
            },
        };

        match self.gateway.create_payment(&new_payment).await {
            Ok(payment) => {
                info!(booking_id = %booking_id, payment_id = %payment.id, total = %payment.total, "Payment recorded");
                Ok(payment)
            }
            Err(err) => {
                error!(
                    consistency_gap = true,
                    booking_id = %booking_id,
                    transaction_id = %authorization.transaction.id,
                    "Charge authorized but payment record not saved: {}",
                    err
                );
                Err(err)
            }
        }
    }

    /// Capture the charge and approve the booking. Nothing changes when the
    /// capture fails.
    pub async fn accept_payment(
        &self,
        booking_id: Uuid,
        payment_id: Uuid,
        actor: &Actor,
    ) -> CoreResult<FilledBooking> {
        let booking = self.gateway.get_one(booking_id).await?;
        self.ensure_access(&booking, actor).await?;
        let payment = self.payment_of(&booking, payment_id).await?;
        booking.state.transition(BookingState::ApprovedVendor)?;

        if payment.state != PaymentState::Approved {
            self.payments.capture(&payment.provider.id).await?;
        }

        let approved = self
            .gateway
            .update(booking_id, &BookingChanges::state(BookingState::ApprovedVendor), None)
            .await;
        if let Err(err) = approved {
            error!(
                consistency_gap = true,
                booking_id = %booking_id,
                payment_id = %payment_id,
                transaction_id = %payment.provider.id,
                "Payment captured but booking not approved: {}",
                err
            );
            return Err(err);
        }
        self.mirror.index_booking(booking_id).await;

        if let Err(err) = self
            .gateway
            .set_payment_state(payment_id, PaymentState::Approved)
            .await
        {
            error!(
                consistency_gap = true,
                booking_id = %booking_id,
                payment_id = %payment_id,
                transaction_id = %payment.provider.id,
                "Payment captured but payment record not approved: {}",
                err
            );
            return Err(err);
        }
        info!(booking_id = %booking_id, payment_id = %payment_id, "Payment accepted");

        self.gateway.get_one_filled(booking_id).await
    }

    /// Decline the booking. The payment record is left as it is.
    pub async fn decline_payment(
        &self,
        booking_id: Uuid,
        payment_id: Uuid,
        actor: &Actor,
    ) -> CoreResult<FilledBooking> {
        let booking = self.gateway.get_one(booking_id).await?;
        self.ensure_access(&booking, actor).await?;
        booking.state.transition(BookingState::DeclinedVendor)?;

        let filled = self
            .gateway
            .update(booking_id, &BookingChanges::state(BookingState::DeclinedVendor), None)
            .await?;
        info!(booking_id = %booking_id, payment_id = %payment_id, "Booking declined by vendor");
        self.mirror.index_booking(booking_id).await;
        Ok(filled)
    }

    pub async fn send_status_notification(
        &self,
        booking_id: Uuid,
        actor: &Actor,
    ) -> CoreResult<NotificationReport> {
        let booking = self.gateway.get_one(booking_id).await?;
        self.ensure_access(&booking, actor).await?;
        let filled = self.gateway.get_one_filled(booking_id).await?;
        let parties = self.parties(&filled).await?;

        let deliveries = self.notifier.booking_status(&filled, &parties).await;
        Ok(NotificationReport {
            message: NOTIFICATIONS_PROCESSED.to_string(),
            deliveries,
        })
    }

    pub async fn send_payment_status_notification(
        &self,
        booking_id: Uuid,
        payment_id: Uuid,
        actor: &Actor,
    ) -> CoreResult<NotificationReport> {
        let booking = self.gateway.get_one(booking_id).await?;
        self.ensure_access(&booking, actor).await?;
        let payment = self.payment_of(&booking, payment_id).await?;
        let filled = self.gateway.get_one_filled(booking_id).await?;
        let parties = self.parties(&filled).await?;

        let deliveries = self.notifier.payment_status(&payment, &parties).await;
        Ok(NotificationReport {
            message: NOTIFICATIONS_PROCESSED.to_string(),
            deliveries,
        })
    }

    pub async fn create_token(&self, card: &CardDetails) -> CoreResult<CardToken> {
        self.payments.create_token(card).await
    }

    /// Query the booking mirror, restricted to what the actor may see.
    pub async fn search(
        &self,
        query: &str,
        paging: Paging,
        actor: &Actor,
    ) -> CoreResult<Page<FilledBooking>> {
        let query = match actor.role {
            Role::Admin => query.to_string(),
            Role::Customer => search::scoped_query(query, "customer.id", actor.id),
            Role::Vendor => {
                let vendor = self.gateway.vendor_by_user(actor.id).await?;
                search::scoped_query(query, "vendor.id", vendor.id)
            }
        };

        let (hits, total) = self
            .mirror
            .index()
            .query(BOOKINGS, &query, paging.limit, paging.offset)
            .await?;
        let results = self.hydrate_hits(&hits).await;
        Ok(Page::new(total, paging, results))
    }

    async fn hydrate_hits(&self, hits: &[IndexedDoc]) -> Vec<FilledBooking> {
        let ids: Vec<Uuid> = hits
            .iter()
            .filter_map(|hit| {
                let id = hit.entity_id();
                if id.is_none() {
                    warn!(internal_id = %hit.internal_id, "Search hit without a booking id");
                }
                id
            })
            .collect();
        self.hydrate(&ids).await
    }

    async fn hydrate(&self, ids: &[Uuid]) -> Vec<FilledBooking> {
        let loads = ids.iter().map(|id| self.gateway.get_one_filled(*id));
        join_all(loads)
            .await
            .into_iter()
            .zip(ids)
            .filter_map(|(result, id)| match result {
                Ok(booking) => Some(booking),
                Err(err) => {
                    warn!(booking_id = %id, "Dropping booking from results: {}", err);
                    None
                }
            })
            .collect()
    }

    /// Relational listing for admins.
    pub async fn list_bookings(
        &self,
        filter: &BookingFilter,
        paging: Paging,
        actor: &Actor,
    ) -> CoreResult<Page<FilledBooking>> {
        if !actor.is_admin() {
            return Err(CoreError::NotPermitted("listing bookings requires admin".into()));
        }
        let (bookings, total) = self
            .gateway
            .list(filter, paging.limit, paging.offset)
            .await?;
        let ids: Vec<Uuid> = bookings.iter().map(|b| b.id).collect();
        let results = self.hydrate(&ids).await;
        Ok(Page::new(total, paging, results))
    }
}
