pub mod booking;
pub mod identity;
pub mod notification;
pub mod outbox;
pub mod payment;
pub mod repository;
pub mod search;
pub mod user;

use std::fmt;

/// Record kinds used in not-found errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Booking,
    Payment,
    User,
    Vendor,
    Tag,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Entity::Booking => "Booking",
            Entity::Payment => "Payment",
            Entity::User => "User",
            Entity::Vendor => "Vendor",
            Entity::Tag => "Tag",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: Entity, id: String },
    #[error("You are not the owner of this booking: {0}")]
    OwnershipViolation(String),
    #[error("Operation not permitted: {0}")]
    NotPermitted(String),
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("{0} already in use")]
    Duplicate(String),
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
    #[error("Payment provider error: {0}")]
    ProviderError(String),
    #[error("Message delivery failed: {0}")]
    DeliveryError(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl CoreError {
    pub fn not_found(entity: Entity, id: impl ToString) -> Self {
        CoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable code exposed to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::NotFound { entity, .. } => match entity {
                Entity::Booking => "BOOKING_NOT_FOUND",
                Entity::Payment => "PAYMENT_NOT_FOUND",
                Entity::User => "USER_NOT_FOUND",
                Entity::Vendor => "VENDOR_NOT_FOUND",
                Entity::Tag => "TAG_NOT_FOUND",
            },
            CoreError::OwnershipViolation(_) => "YOU_DONOT_OWNER_OF_BOOKING",
            CoreError::NotPermitted(_) => "OPERATION_NOT_PERMITTED",
            CoreError::ValidationError(_) => "VALIDATION_ERRORS",
            CoreError::Duplicate(_) => "EMAIL_ALREADY_IN_USE",
            CoreError::InvalidTransition { .. } => "INVALID_STATE_TRANSITION",
            CoreError::ProviderError(_) => "PAYMENT_PROVIDER_ERROR",
            CoreError::DeliveryError(_) => "DELIVERY_ERROR",
            CoreError::StorageError(_) | CoreError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::NotFound { .. })
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
