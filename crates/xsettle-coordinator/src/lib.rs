//! # xsettle-coordinator
//!
//! **Coordination Plane**: reconciles off-chain purchase and mint records
//! with an eventually-final ledger.
//!
//! ## Architecture
//!
//! ```text
//!   commit ──▶ PurchaseCoordinator ──▶ PurchaseRepository (CAS)
//!                  │
//!   confirm ───────┼── verify payment ──▶ LedgerClient
//!                  │
//!                  ├── SupplyLedger ──reserve/commit──▶ IssuanceRepository
//!                  │        │
//!                  └────────┴── ReliableSubmitter ──▶ LedgerClientPool
//! ```
//!
//! 1. `commit` persists an `INTENDED` purchase and returns payment
//!    instructions.
//! 2. `confirm` verifies the buyer's payment, moves the purchase to `PAID`,
//!    delivers the asset and ends in `SETTLED` or `COMPENSATION_REQUIRED`.
//! 3. `SupplyLedger` mints into the distribution account without ever
//!    exceeding the issuance cap, also under concurrent mints.

pub mod coordinator;
pub mod supply;
pub mod telemetry;
pub mod verification;

pub use coordinator::PurchaseCoordinator;
pub use supply::SupplyLedger;
pub use telemetry::init_tracing;
