pub mod models;
pub mod pii;

pub use models::paging::{Page, Paging};
pub use pii::Masked;
