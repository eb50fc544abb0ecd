//! Lease lifecycle: the lease table, the pool operations built on it and the
//! background retirement reclaimer.

pub mod lease_table;
pub mod pool;
pub mod reclaimer;

pub use lease_table::{LeaseEntry, LeaseTable, ReleaseOutcome, RetireClaim};
pub use pool::{AccountPool, Allocation};
pub use reclaimer::RetirementReclaimer;
