use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::Role;
use crate::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    #[default]
    Customer,
    Vendor,
    Admin,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::Customer => "customer",
            UserType::Vendor => "vendor",
            UserType::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> CoreResult<Self> {
        match s {
            "customer" => Ok(UserType::Customer),
            "vendor" => Ok(UserType::Vendor),
            "admin" => Ok(UserType::Admin),
            other => Err(CoreError::ValidationError(format!("unknown user type: {other}"))),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            UserType::Customer => Role::Customer,
            UserType::Vendor => Role::Vendor,
            UserType::Admin => Role::Admin,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(rename = "type")]
    pub user_type: UserType,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    /// Customer id at the payment provider.
    pub customer_id: Option<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl User {
    /// "first last", skipping whichever half is missing.
    pub fn display_name(&self) -> String {
        [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Vendor {
    pub id: Uuid,
    pub name: String,
    pub menu_price: Decimal,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub email: String,
    #[serde(default, rename = "type")]
    pub user_type: UserType,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

impl NewUser {
    pub fn validate(&self) -> CoreResult<()> {
        validate_email(&self.email)?;
        if self.user_type == UserType::Admin {
            return Err(CoreError::ValidationError(
                "type must be one of customer, vendor".into(),
            ));
        }
        Ok(())
    }
}

/// Profile changes; `None` keeps the stored value.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserChanges {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, rename = "type")]
    pub user_type: Option<UserType>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

impl UserChanges {
    pub fn validate(&self) -> CoreResult<()> {
        if let Some(email) = &self.email {
            validate_email(email)?;
        }
        if self.user_type == Some(UserType::Admin) {
            return Err(CoreError::ValidationError(
                "type must be one of customer, vendor".into(),
            ));
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Partial mirror document holding only the changed fields.
    pub fn mirror_patch(&self) -> serde_json::Value {
        let mut patch = serde_json::Map::new();
        if let Some(email) = &self.email {
            patch.insert("email".into(), email.clone().into());
        }
        if let Some(user_type) = self.user_type {
            patch.insert("type".into(), user_type.as_str().into());
        }
        if let Some(first_name) = &self.first_name {
            patch.insert("firstName".into(), first_name.clone().into());
        }
        if let Some(last_name) = &self.last_name {
            patch.insert("lastName".into(), last_name.clone().into());
        }
        if let Some(phone) = &self.phone {
            patch.insert("phone".into(), phone.clone().into());
        }
        serde_json::Value::Object(patch)
    }
}

#[derive(Debug, Clone)]
pub struct NewVendor {
    pub name: String,
    pub menu_price: Decimal,
    pub user_id: Uuid,
}

fn validate_email(email: &str) -> CoreResult<()> {
    let trimmed = email.trim();
    match trimmed.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(CoreError::ValidationError(format!("invalid email: {trimmed}"))),
    }
}
