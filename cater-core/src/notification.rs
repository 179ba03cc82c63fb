use async_trait::async_trait;
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::booking::BookingState;
use crate::payment::PaymentState;
use crate::CoreResult;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    BookingConfirmed,
    BookingReceived,
    VendorBookingReceived,
    BookingAccepted,
    VendorBookingConfirmed,
    BookingRejected,
    BookingRejectedByAdmin,
    VendorBookingRejectedByAdmin,
    PaymentTaken,
    PaymentFailed,
    Welcome,
}

impl Template {
    pub fn as_str(&self) -> &'static str {
        match self {
            Template::BookingConfirmed => "booking_confirmed",
            Template::BookingReceived => "booking_received",
            Template::VendorBookingReceived => "vendor_booking_received",
            Template::BookingAccepted => "booking_accepted",
            Template::VendorBookingConfirmed => "vendor_booking_confirmed",
            Template::BookingRejected => "booking_rejected",
            Template::BookingRejectedByAdmin => "booking_rejected_by_admin",
            Template::VendorBookingRejectedByAdmin => "vendor_booking_rejected_by_admin",
            Template::PaymentTaken => "payment_taken",
            Template::PaymentFailed => "payment_failed",
            Template::Welcome => "welcome",
        }
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Recipient {
    Customer,
    /// The vendor's profile user.
    Vendor,
}

/// One message to send for a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusNotice {
    pub template: Template,
    pub recipient: Recipient,
}

const fn notice(template: Template, recipient: Recipient) -> StatusNotice {
    StatusNotice {
        template,
        recipient,
    }
}

/// Messages owed for a booking in `state`. `completed` sends nothing.
pub fn status_notices(state: BookingState) -> Vec<StatusNotice> {
    use Recipient::*;
    match state {
        BookingState::Booked => vec![notice(Template::BookingConfirmed, Customer)],
        BookingState::Pending => vec![
            notice(Template::BookingReceived, Customer),
            notice(Template::VendorBookingReceived, Vendor),
        ],
        BookingState::ApprovedVendor => vec![
            notice(Template::BookingAccepted, Customer),
            notice(Template::VendorBookingConfirmed, Vendor),
        ],
        BookingState::Completed => Vec::new(),
        BookingState::DeclinedVendor => vec![notice(Template::BookingRejected, Customer)],
        BookingState::DeclinedAdmin => vec![
            notice(Template::BookingRejectedByAdmin, Customer),
            notice(Template::VendorBookingRejectedByAdmin, Vendor),
        ],
    }
}

/// Messages owed for a payment in `state`; both parties get the same template.
pub fn payment_notices(state: PaymentState) -> Vec<StatusNotice> {
    let template = match state {
        PaymentState::Approved => Template::PaymentTaken,
        PaymentState::Declined => Template::PaymentFailed,
        PaymentState::Pending => return Vec::new(),
    };
    vec![
        notice(template, Recipient::Customer),
        notice(template, Recipient::Vendor),
    ]
}

/// Whole days until the event, rounded towards negative infinity.
pub fn until_days(event: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (event - now).num_milliseconds().div_euclid(86_400_000)
}

fn ordinal_suffix(day: u32) -> &'static str {
    match (day % 10, day % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    }
}

/// Long human date, e.g. "Friday, March 1st 2030, 7:30:00 pm".
pub fn format_event_datetime(date: DateTime<Utc>) -> String {
    let (is_pm, hour) = date.hour12();
    format!(
        "{}, {} {}{} {}, {}:{:02}:{:02} {}",
        date.format("%A"),
        date.format("%B"),
        date.day(),
        ordinal_suffix(date.day()),
        date.year(),
        hour,
        date.minute(),
        date.second(),
        if is_pm { "pm" } else { "am" }
    )
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub id: String,
    pub status: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send a templated message. `context` is a flat JSON object holding
    /// the receiver address and the merge variables.
    async fn send(&self, template: Template, context: &Value) -> CoreResult<DeliveryReceipt>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_every_state_has_a_mapping() {
        let counts: Vec<usize> = BookingState::ALL
            .into_iter()
            .map(|s| status_notices(s).len())
            .collect();
        // booked, pending, approvedVendor, completed, declinedVendor, declinedAdmin
        assert_eq!(counts, vec![1, 2, 2, 0, 1, 2]);
        assert_eq!(
            status_notices(BookingState::DeclinedAdmin)[1],
            notice(Template::VendorBookingRejectedByAdmin, Recipient::Vendor)
        );
    }

    #[test]
    fn test_payment_notices() {
        assert!(payment_notices(PaymentState::Pending).is_empty());
        let taken = payment_notices(PaymentState::Approved);
        assert_eq!(taken.len(), 2);
        assert!(taken.iter().all(|n| n.template == Template::PaymentTaken));
        assert_eq!(
            payment_notices(PaymentState::Declined)[0].template,
            Template::PaymentFailed
        );
    }

    #[test]
    fn test_human_date_format() {
        let date = Utc.with_ymd_and_hms(2030, 3, 1, 19, 30, 0).unwrap();
        assert_eq!(format_event_datetime(date), "Friday, March 1st 2030, 7:30:00 pm");

        let date = Utc.with_ymd_and_hms(2030, 3, 12, 0, 5, 9).unwrap();
        assert_eq!(format_event_datetime(date), "Tuesday, March 12th 2030, 12:05:09 am");

        let date = Utc.with_ymd_and_hms(2030, 3, 22, 12, 0, 0).unwrap();
        assert_eq!(format_event_datetime(date), "Friday, March 22nd 2030, 12:00:00 pm");
    }

    #[test]
    fn test_until_is_floor_of_days() {
        let now = Utc.with_ymd_and_hms(2030, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(until_days(now + Duration::hours(36), now), 1);
        assert_eq!(until_days(now - Duration::hours(12), now), -1);
        assert_eq!(until_days(now, now), 0);
    }
}
