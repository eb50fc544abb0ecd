pub mod email_request;

pub use email_request::EmailRequest;
