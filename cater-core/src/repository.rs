use async_trait::async_trait;
use uuid::Uuid;

use crate::booking::{
    Booking, BookingChanges, BookingFilter, BookingTag, FeeSettings, NewBooking, TagAssignment,
};
use crate::payment::{NewPayment, Payment, PaymentState};
use crate::user::{NewUser, NewVendor, User, UserChanges, Vendor};
use crate::CoreResult;

/// Repository trait for booking records and their tag associations
#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn create_booking(&self, booking: &NewBooking) -> CoreResult<Booking>;

    async fn get_booking(&self, id: Uuid) -> CoreResult<Option<Booking>>;

    /// Apply column changes and bump `updated`. NotFound when the row is gone.
    async fn update_booking(&self, id: Uuid, changes: &BookingChanges) -> CoreResult<Booking>;

    async fn delete_booking(&self, id: Uuid) -> CoreResult<()>;

    /// Tags of a booking merged with their join attributes.
    async fn booking_tags(&self, id: Uuid) -> CoreResult<Vec<BookingTag>>;

    /// Replace the tag set. An assignment without attributes keeps the
    /// attributes already stored for that tag; unknown tag ids are a
    /// validation error.
    async fn replace_booking_tags(&self, id: Uuid, tags: &[TagAssignment]) -> CoreResult<()>;

    async fn list_bookings(
        &self,
        filter: &BookingFilter,
        limit: u32,
        offset: u32,
    ) -> CoreResult<(Vec<Booking>, u64)>;
}

/// Repository trait for payment records
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn create_payment(&self, payment: &NewPayment) -> CoreResult<Payment>;

    async fn get_payment(&self, id: Uuid) -> CoreResult<Option<Payment>>;

    async fn payments_for_booking(&self, booking_id: Uuid) -> CoreResult<Vec<Payment>>;

    async fn set_payment_state(&self, id: Uuid, state: PaymentState) -> CoreResult<Payment>;
}

/// Repository trait for user profiles
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Duplicate when the email is taken.
    async fn create_user(&self, user: &NewUser) -> CoreResult<User>;

    async fn get_user(&self, id: Uuid) -> CoreResult<Option<User>>;

    async fn update_user(&self, id: Uuid, changes: &UserChanges) -> CoreResult<User>;

    async fn delete_user(&self, id: Uuid) -> CoreResult<()>;

    /// Link the user to its customer record at the payment provider.
    async fn set_provider_customer(&self, id: Uuid, customer_id: &str) -> CoreResult<User>;
}

/// Repository trait for vendors
#[async_trait]
pub trait VendorRepository: Send + Sync {
    async fn get_vendor(&self, id: Uuid) -> CoreResult<Option<Vendor>>;

    async fn get_vendor_by_user(&self, user_id: Uuid) -> CoreResult<Option<Vendor>>;

    async fn create_vendor(&self, vendor: &NewVendor) -> CoreResult<Vendor>;

    async fn update_menu_price(
        &self,
        id: Uuid,
        menu_price: rust_decimal::Decimal,
    ) -> CoreResult<Vendor>;
}

/// Source of the global fee settings copied onto new bookings.
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    async fn fee_settings(&self) -> CoreResult<FeeSettings>;
}
