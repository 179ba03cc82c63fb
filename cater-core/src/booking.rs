use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::payment::Payment;
use crate::{CoreError, CoreResult};

/// Largest accepted magnitude of a dietary `priceModifier` or `quantity`.
pub const MAX_DIETARY_ATTRIBUTE: i64 = 100_000;

/// Tag category holding the event type of a booking.
pub const EVENT_TAG_PID: i64 = 5;
/// Tag category holding dietary requirements.
pub const DIETARY_TAG_PID: i64 = 2;

/// Booking status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub enum BookingState {
    Booked,
    #[default]
    Pending,
    ApprovedVendor,
    Completed,
    DeclinedVendor,
    DeclinedAdmin,
}

impl BookingState {
    pub const ALL: [BookingState; 6] = [
        BookingState::Booked,
        BookingState::Pending,
        BookingState::ApprovedVendor,
        BookingState::Completed,
        BookingState::DeclinedVendor,
        BookingState::DeclinedAdmin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingState::Booked => "booked",
            BookingState::Pending => "pending",
            BookingState::ApprovedVendor => "approvedVendor",
            BookingState::Completed => "completed",
            BookingState::DeclinedVendor => "declinedVendor",
            BookingState::DeclinedAdmin => "declinedAdmin",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingState::Completed | BookingState::DeclinedVendor | BookingState::DeclinedAdmin
        )
    }

    /// Re-asserting the current state is always allowed.
    pub fn can_transition_to(&self, next: BookingState) -> bool {
        use BookingState::*;
        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (Pending, ApprovedVendor | DeclinedVendor | DeclinedAdmin) | (ApprovedVendor, Completed)
        )
    }

    pub fn transition(&self, next: BookingState) -> CoreResult<BookingState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidTransition {
                from: self.as_str().to_string(),
                to: next.as_str().to_string(),
            })
        }
    }
}

impl fmt::Display for BookingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BookingState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| CoreError::ValidationError(format!("unknown booking state: {s}")))
    }
}

/// Event date plus whatever scheduling metadata the client attaches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Timings {
    pub date: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Timings {
    pub fn at(date: DateTime<Utc>) -> Self {
        Self {
            date,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub pid: i64,
}

/// A tag as attached to one booking, with the per-booking attributes stored on the join row.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BookingTag {
    #[serde(flatten)]
    pub tag: Tag,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl BookingTag {
    pub fn new(tag: Tag, attributes: Map<String, Value>) -> Self {
        Self { tag, attributes }
    }

    /// Numeric join attribute; absent or non-numeric values count as zero.
    pub fn numeric(&self, key: &str) -> Decimal {
        attribute_decimal(self.attributes.get(key))
    }
}

fn attribute_decimal(value: Option<&Value>) -> Decimal {
    parse_attribute(value).unwrap_or(Decimal::ZERO)
}

fn parse_attribute(value: Option<&Value>) -> Option<Decimal> {
    let raw = match value {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .ok()
}

/// The single tag of the EVENT category, if any.
pub fn event_type(tags: &[BookingTag]) -> Option<&BookingTag> {
    tags.iter().find(|t| t.tag.pid == EVENT_TAG_PID)
}

/// All tags of the DIETARY category.
pub fn dietary_tags(tags: &[BookingTag]) -> Vec<&BookingTag> {
    tags.iter().filter(|t| t.tag.pid == DIETARY_TAG_PID).collect()
}

/// covers × menuPrice + Σ(priceModifier × quantity) over dietary tags.
/// Overflow is a validation error.
pub fn compute_total(covers: i32, menu_price: Decimal, dietary: &[&BookingTag]) -> CoreResult<Decimal> {
    let overflow = || CoreError::ValidationError("booking total is out of range".into());
    let base = Decimal::from(covers)
        .checked_mul(menu_price)
        .ok_or_else(overflow)?;
    dietary.iter().try_fold(base, |total, tag| {
        tag.numeric("priceModifier")
            .checked_mul(tag.numeric("quantity"))
            .and_then(|extra| total.checked_add(extra))
            .ok_or_else(overflow)
    })
}

/// Global fees in percent, copied onto each booking when it is created.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeeSettings {
    pub commission_fee: Decimal,
    pub service_fee: Decimal,
}

/// Relational booking record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: Uuid,
    pub state: BookingState,
    pub covers: i32,
    pub menu_price: Decimal,
    pub commission_fee: Decimal,
    pub service_fee: Decimal,
    pub timings: Timings,
    pub location: Value,
    pub logistics: Value,
    pub dietary_notes: Option<String>,
    pub vendor_id: Uuid,
    pub customer_id: Uuid,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// Insert payload handed to the repository, snapshots already resolved.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub customer_id: Uuid,
    pub vendor_id: Uuid,
    pub state: BookingState,
    pub covers: i32,
    pub menu_price: Decimal,
    pub fees: FeeSettings,
    pub timings: Timings,
    pub location: Value,
    pub logistics: Value,
    pub dietary_notes: Option<String>,
}

/// Column changes for an update; `None` leaves a column untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookingChanges {
    pub state: Option<BookingState>,
    pub covers: Option<i32>,
    pub timings: Option<Timings>,
    pub location: Option<Value>,
    pub logistics: Option<Value>,
    pub dietary_notes: Option<String>,
}

impl BookingChanges {
    pub fn state(state: BookingState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Association to write for one tag. `attributes: None` keeps whatever the
/// join row already carries.
#[derive(Debug, Clone, PartialEq)]
pub struct TagAssignment {
    pub tag_id: i64,
    pub attributes: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BookingFilter {
    pub state: Option<BookingState>,
    pub vendor_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagInput {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub pid: Option<i64>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DietaryInput {
    #[serde(default)]
    pub tags: Option<Vec<TagInput>>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Booking create/update body. Price fields sent by clients are ignored; they
/// are always resolved server side.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingPayload {
    #[serde(default, rename = "vendor_id", alias = "vendorId")]
    pub vendor_id: Option<Uuid>,
    #[serde(default)]
    pub covers: Option<i32>,
    #[serde(default)]
    pub timings: Option<Timings>,
    #[serde(default)]
    pub location: Option<Value>,
    #[serde(default)]
    pub logistics: Option<Value>,
    #[serde(default)]
    pub event_type: Option<TagInput>,
    #[serde(default)]
    pub dietary: Option<DietaryInput>,
    #[serde(default)]
    pub state: Option<BookingState>,
}

/// Fields required to create a booking, extracted from a validated payload.
#[derive(Debug, Clone)]
pub struct BookingDraft {
    pub vendor_id: Uuid,
    pub covers: i32,
    pub timings: Timings,
    pub location: Value,
    pub logistics: Value,
    pub dietary_notes: Option<String>,
    pub tags: Vec<TagAssignment>,
}

impl BookingPayload {
    pub fn validate_for_create(&self) -> CoreResult<BookingDraft> {
        let vendor_id = self
            .vendor_id
            .ok_or_else(|| CoreError::ValidationError("vendor_id is required".into()))?;
        let covers = self
            .covers
            .ok_or_else(|| CoreError::ValidationError("covers is required".into()))?;
        validate_covers(covers)?;
        self.validate_dietary_attributes()?;
        let timings = self
            .timings
            .clone()
            .ok_or_else(|| CoreError::ValidationError("timings.date is required".into()))?;

        Ok(BookingDraft {
            vendor_id,
            covers,
            timings,
            location: self.location.clone().unwrap_or(Value::Null),
            logistics: self.logistics.clone().unwrap_or(Value::Null),
            dietary_notes: self.dietary_notes(),
            tags: self.tag_assignments().unwrap_or_default(),
        })
    }

    pub fn validate_for_update(&self) -> CoreResult<BookingChanges> {
        if let Some(covers) = self.covers {
            validate_covers(covers)?;
        }
        self.validate_dietary_attributes()?;
        Ok(BookingChanges {
            state: self.state,
            covers: self.covers,
            timings: self.timings.clone(),
            location: self.location.clone(),
            logistics: self.logistics.clone(),
            dietary_notes: self.dietary_notes(),
        })
    }

    fn validate_dietary_attributes(&self) -> CoreResult<()> {
        let limit = Decimal::from(MAX_DIETARY_ATTRIBUTE);
        let tags = self
            .dietary
            .as_ref()
            .and_then(|d| d.tags.as_ref())
            .into_iter()
            .flatten();
        for tag in tags {
            for key in ["priceModifier", "quantity"] {
                let Some(raw) = tag.attributes.get(key) else {
                    continue;
                };
                match parse_attribute(Some(raw)) {
                    Some(value) if value.abs() <= limit => {}
                    _ => {
                        return Err(CoreError::ValidationError(format!(
                            "dietary tag {}: {key} must be a number within ±{MAX_DIETARY_ATTRIBUTE}",
                            tag.id
                        )))
                    }
                }
            }
        }
        Ok(())
    }

    fn dietary_notes(&self) -> Option<String> {
        self.dietary.as_ref().and_then(|d| d.notes.clone())
    }

    /// Event type plus dietary tags, first occurrence of an id wins.
    /// `None` when the payload does not mention tags at all.
    pub fn tag_assignments(&self) -> Option<Vec<TagAssignment>> {
        let dietary = self.dietary.as_ref().and_then(|d| d.tags.as_ref());
        if self.event_type.is_none() && dietary.is_none() {
            return None;
        }

        let mut seen = HashSet::new();
        let assignments = self
            .event_type
            .iter()
            .chain(dietary.into_iter().flatten())
            .filter(|input| seen.insert(input.id))
            .map(|input| TagAssignment {
                tag_id: input.id,
                attributes: if input.attributes.is_empty() {
                    None
                } else {
                    Some(input.attributes.clone())
                },
            })
            .collect();
        Some(assignments)
    }
}

fn validate_covers(covers: i32) -> CoreResult<()> {
    if covers <= 0 {
        return Err(CoreError::ValidationError(format!(
            "covers must be greater than zero, got {covers}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VendorSummary {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomerSummary {
    pub id: Uuid,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Dietary {
    pub tags: Vec<BookingTag>,
    pub notes: Option<String>,
}

/// Booking with relations resolved and derived fields computed.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FilledBooking {
    pub id: Uuid,
    pub state: BookingState,
    pub covers: i32,
    pub menu_price: Decimal,
    #[serde(rename = "commission_fee")]
    pub commission_fee: Decimal,
    #[serde(rename = "service_fee")]
    pub service_fee: Decimal,
    pub timings: Timings,
    pub location: Value,
    pub logistics: Value,
    pub event_type: Option<BookingTag>,
    pub dietary: Dietary,
    pub tags: Vec<BookingTag>,
    pub payments: Vec<Payment>,
    #[serde(rename = "vendor_id")]
    pub vendor_id: Uuid,
    #[serde(rename = "customer_id")]
    pub customer_id: Uuid,
    pub vendor: VendorSummary,
    pub customer: CustomerSummary,
    pub total: Decimal,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl FilledBooking {
    pub fn assemble(
        booking: Booking,
        tags: Vec<BookingTag>,
        payments: Vec<Payment>,
        vendor: VendorSummary,
        customer: CustomerSummary,
    ) -> CoreResult<Self> {
        let event = event_type(&tags).cloned();
        let dietary: Vec<&BookingTag> = dietary_tags(&tags);
        let total = compute_total(booking.covers, booking.menu_price, &dietary)?;
        let dietary = Dietary {
            tags: dietary.into_iter().cloned().collect(),
            notes: booking.dietary_notes.clone(),
        };

        Ok(Self {
            id: booking.id,
            state: booking.state,
            covers: booking.covers,
            menu_price: booking.menu_price,
            commission_fee: booking.commission_fee,
            service_fee: booking.service_fee,
            timings: booking.timings,
            location: booking.location,
            logistics: booking.logistics,
            event_type: event,
            dietary,
            tags,
            payments,
            vendor_id: booking.vendor_id,
            customer_id: booking.customer_id,
            vendor,
            customer,
            total,
            created: booking.created,
            updated: booking.updated,
        })
    }

    pub fn tag_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.tags.iter().map(|t| t.tag.id).collect();
        ids.sort_unstable();
        ids
    }
}
