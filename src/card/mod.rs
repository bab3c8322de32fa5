//! Alert card lifecycle for LP margin risk episodes.
//!
//! One card per (LP, active-risk-episode):
//! - Closed status state machine with centrally enforced transitions
//! - Append-only history ledger (the sole audit trail)
//! - Append-only report log from the external analysis service
//! - Concurrency-safe in-memory store owning all card instances

mod store;
mod types;

pub use store::CardStore;
pub use types::{
    Actor, AlertCard, CardError, CardStatus, HistoryEntry, ReportEntry, ReportKind,
};
