//! Credential store: a directory of JSON records, one per account.
//!
//! Layout:
//! - `record.rs`: account identifier, record contents, live/retired state
//! - `fs.rs`: directory listing, loading, retirement rename and sweep

pub mod fs;
pub mod record;

pub use fs::{CredentialStore, RetireOutcome, SweepReport};
pub use record::{AccountId, CredentialRecord, RecordState};
