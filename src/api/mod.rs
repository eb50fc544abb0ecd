pub mod cloud_mail;
pub mod mail_client;

pub use cloud_mail::CloudMailClient;
pub use mail_client::{DEFAULT_MAILBOX, MailClient};
