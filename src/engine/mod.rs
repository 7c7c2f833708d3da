pub mod calendar;
pub mod error;
pub mod ledger;
pub mod penalty;
pub mod progress;
pub mod recurrence;
pub mod store;
pub mod sweep;
