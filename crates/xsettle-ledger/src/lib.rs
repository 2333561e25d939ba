//! # xsettle-ledger
//!
//! **Submission Plane**: the outbound ports to a ledger network and the
//! [`ReliableSubmitter`] that drives a signed transaction to a final,
//! validated outcome.
//!
//! ## Architecture
//!
//! ```text
//!   SignedTransaction ──▶ ReliableSubmitter ──acquire──▶ LedgerClientPool
//!                              │                              │
//!                              │ submit (retry + backoff)     ▼
//!                              └──────────── poll ─────▶ LedgerClient
//!                                                             │
//!                        SubmissionReport ◀── validated / expired / timeout
//! ```
//!
//! The submitter never re-signs. A transaction that provably never entered
//! the ledger is reported as retryable so the caller can sign a fresh one;
//! every other failure is terminal or indeterminate.

pub mod backoff;
pub mod ports;
pub mod submitter;

#[cfg(any(test, feature = "test-helpers"))]
pub mod simulated;

pub use backoff::BackoffPolicy;
pub use ports::{LedgerClient, LedgerClientPool, LedgerHandle, TransactionSigner};
pub use submitter::{ReliableSubmitter, SubmissionOutcome, SubmissionReport};
