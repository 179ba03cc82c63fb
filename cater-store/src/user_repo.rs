use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use cater_core::repository::{UserRepository, VendorRepository};
use cater_core::user::{NewUser, NewVendor, User, UserChanges, UserType, Vendor};
use cater_core::{CoreError, CoreResult, Entity};

use crate::database::map_sqlx_error;

const USER_COLUMNS: &str =
    "id, email, user_type, first_name, last_name, phone, customer_id, created_at, updated_at";

pub struct StoreUserRepository {
    pool: PgPool,
}

impl StoreUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    user_type: String,
    first_name: Option<String>,
    last_name: Option<String>,
    phone: Option<String>,
    customer_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = CoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let user_type =
            UserType::parse(&row.user_type).map_err(|e| CoreError::StorageError(e.to_string()))?;
        Ok(User {
            id: row.id,
            email: row.email,
            user_type,
            first_name: row.first_name,
            last_name: row.last_name,
            phone: row.phone,
            customer_id: row.customer_id,
            created: row.created_at,
            updated: row.updated_at,
        })
    }
}

/// Email is the only unique column a caller can collide on.
fn email_conflict(err: sqlx::Error) -> CoreError {
    match map_sqlx_error(err) {
        CoreError::Duplicate(_) => CoreError::Duplicate("Email".into()),
        other => other,
    }
}

#[async_trait]
impl UserRepository for StoreUserRepository {
    async fn create_user(&self, user: &NewUser) -> CoreResult<User> {
        let sql = format!(
            r#"
            INSERT INTO users (id, email, user_type, first_name, last_name, phone)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {USER_COLUMNS}
            "#
        );

        sqlx::query_as::<_, UserRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(user.email.trim().to_lowercase())
            .bind(user.user_type.as_str())
            .bind(user.first_name.as_deref())
            .bind(user.last_name.as_deref())
            .bind(user.phone.as_deref())
            .fetch_one(&self.pool)
            .await
            .map_err(email_conflict)?
            .try_into()
    }

    async fn get_user(&self, id: Uuid) -> CoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .map(User::try_from)
            .transpose()
    }

    async fn update_user(&self, id: Uuid, changes: &UserChanges) -> CoreResult<User> {
        let sql = format!(
            r#"
            UPDATE users SET
                email = COALESCE($2, email),
                user_type = COALESCE($3, user_type),
                first_name = COALESCE($4, first_name),
                last_name = COALESCE($5, last_name),
                phone = COALESCE($6, phone),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );

        sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .bind(changes.email.as_ref().map(|e| e.trim().to_lowercase()))
            .bind(changes.user_type.map(|t| t.as_str()))
            .bind(changes.first_name.as_deref())
            .bind(changes.last_name.as_deref())
            .bind(changes.phone.as_deref())
            .fetch_optional(&self.pool)
            .await
            .map_err(email_conflict)?
            .ok_or_else(|| CoreError::not_found(Entity::User, id))?
            .try_into()
    }

    async fn delete_user(&self, id: Uuid) -> CoreResult<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found(Entity::User, id));
        }
        Ok(())
    }

    async fn set_provider_customer(&self, id: Uuid, customer_id: &str) -> CoreResult<User> {
        let sql = format!(
            "UPDATE users SET customer_id = $2, updated_at = NOW() WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .bind(customer_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .ok_or_else(|| CoreError::not_found(Entity::User, id))?
            .try_into()
    }
}

pub struct StoreVendorRepository {
    pool: PgPool,
}

impl StoreVendorRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct VendorRow {
    id: Uuid,
    name: String,
    menu_price: Decimal,
    user_id: Uuid,
}

impl From<VendorRow> for Vendor {
    fn from(row: VendorRow) -> Self {
        Vendor {
            id: row.id,
            name: row.name,
            menu_price: row.menu_price,
            user_id: row.user_id,
        }
    }
}

#[async_trait]
impl VendorRepository for StoreVendorRepository {
    async fn get_vendor(&self, id: Uuid) -> CoreResult<Option<Vendor>> {
        let row = sqlx::query_as::<_, VendorRow>(
            "SELECT id, name, menu_price, user_id FROM vendors WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(Vendor::from))
    }

    async fn get_vendor_by_user(&self, user_id: Uuid) -> CoreResult<Option<Vendor>> {
        let row = sqlx::query_as::<_, VendorRow>(
            "SELECT id, name, menu_price, user_id FROM vendors WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(Vendor::from))
    }

    async fn create_vendor(&self, vendor: &NewVendor) -> CoreResult<Vendor> {
        let row = sqlx::query_as::<_, VendorRow>(
            r#"
            INSERT INTO vendors (id, name, menu_price, user_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, menu_price, user_id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&vendor.name)
        .bind(vendor.menu_price)
        .bind(vendor.user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.into())
    }

    async fn update_menu_price(&self, id: Uuid, menu_price: Decimal) -> CoreResult<Vendor> {
        let row = sqlx::query_as::<_, VendorRow>(
            "UPDATE vendors SET menu_price = $2 WHERE id = $1 RETURNING id, name, menu_price, user_id",
        )
        .bind(id)
        .bind(menu_price)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .ok_or_else(|| CoreError::not_found(Entity::Vendor, id))?;

        Ok(row.into())
    }
}
