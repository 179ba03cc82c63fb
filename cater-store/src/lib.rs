pub mod app_config;
pub mod booking_repo;
pub mod database;
pub mod mail_client;
pub mod memory;
pub mod outbox_repo;
pub mod payment_client;
pub mod payment_repo;
pub mod redis_repo;
pub mod search_index;
pub mod user_repo;

pub use booking_repo::StoreBookingRepository;
pub use database::{DbClient, StoreSettingsProvider};
pub use mail_client::MandrillClient;
pub use outbox_repo::PgOutbox;
pub use payment_client::StripeClient;
pub use payment_repo::StorePaymentRepository;
pub use redis_repo::RedisClient;
pub use search_index::ElasticIndex;
pub use user_repo::{StoreUserRepository, StoreVendorRepository};
