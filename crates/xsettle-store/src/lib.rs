//! # xsettle-store
//!
//! **Persistence Plane**: repository ports for purchases and issuances and
//! an in-memory implementation.
//!
//! Every mutating port is a single conditional update. Callers never read,
//! modify and write back; they state the expected current value and the
//! store applies the change atomically or reports what it found instead.

pub mod memory;
pub mod ports;

pub use memory::MemoryStore;
pub use ports::{CasOutcome, InsertOutcome, IssuanceRepository, PurchaseChange, PurchaseRepository};
