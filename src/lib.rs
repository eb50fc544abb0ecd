pub mod api;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod service;
pub mod store;
pub mod types;

pub use error::{MailClientError, MailpoolError};
pub use service::pool::AccountPool;
pub use store::{AccountId, CredentialStore};
