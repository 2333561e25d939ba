//! # xsettle-types
//!
//! Shared types, errors, and configuration for the **XSettle** settlement
//! coordinator.
//!
//! This crate is the leaf dependency of the workspace — every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`PurchaseId`], [`IssuanceRef`], [`Network`], [`AccountAddress`], [`TxHash`]
//! - **Purchase model**: [`Purchase`], [`PurchaseStatus`], [`PurchaseIntent`]
//! - **Issuance model**: [`Issuance`], [`IssuanceStatus`], [`IssuanceAccounts`]
//! - **Payment model**: [`Currency`], [`PaymentMemo`], [`PaymentInstructions`], [`Quote`]
//! - **Ledger wire types**: [`EngineResult`], [`SignedTransaction`], [`TransferInstruction`], [`TxLookup`], [`ObservedPayment`]
//! - **API bodies**: [`CommitRequest`], [`ConfirmRequest`], [`MintRequest`], [`SettlementResult`], ...
//! - **Configuration**: [`CoordinatorConfig`], [`SubmitterConfig`], [`TelemetryConfig`]
//! - **Errors**: [`SettlementError`] with `XS_ERR_` prefix codes
//! - **Constants**: system-wide limits and defaults

pub mod amount;
pub mod config;
pub mod constants;
pub mod error;
pub mod ids;
pub mod issuance;
pub mod ledger;
pub mod payment;
pub mod purchase;
pub mod request;

pub use config::*;
pub use error::*;
pub use ids::*;
pub use issuance::*;
pub use ledger::*;
pub use payment::*;
pub use purchase::*;
pub use request::*;

// Constants and amount parsing are accessed via their modules
// (`xsettle_types::constants::FOO`, `xsettle_types::amount::parse_positive`).
