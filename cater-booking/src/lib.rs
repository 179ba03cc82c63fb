pub mod accounts;
pub mod gateway;
pub mod manager;
pub mod mirror;
pub mod models;
pub mod notifications;
pub mod orchestrator;
pub mod worker;

pub use accounts::UserService;
pub use gateway::PersistenceGateway;
pub use manager::BookingManager;
pub use mirror::MirrorSync;
pub use models::{Acknowledgement, Delivery, DeliveryStatus, NotificationReport, PaymentRequest};
pub use notifications::{MockMailer, NotificationDispatcher, Parties};
pub use orchestrator::{MockPaymentAdapter, PaymentOrchestrator};
pub use worker::{MirrorWorker, RetryPolicy};
