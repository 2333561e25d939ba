//! System-wide constants for the XSettle settlement coordinator.

/// Maximum decimal places accepted for quantities and prices.
pub const AMOUNT_PRECISION: u32 = 15;

/// Largest quantity, price or mint amount accepted. The product of two
/// such amounts stays inside the `Decimal` range.
pub const MAX_AMOUNT: u64 = 100_000_000_000_000;

/// Maximum submission attempts for a single signed blob (first try included).
pub const DEFAULT_MAX_SUBMIT_ATTEMPTS: u32 = 4;

/// Backoff before the first resubmission, in milliseconds.
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 250;

/// Ceiling for exponential backoff between resubmissions, in milliseconds.
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 4_000;

/// Interval between finality polls, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// How long to wait for a submitted transaction to reach a validated
/// ledger before declaring the outcome indeterminate, in milliseconds.
pub const DEFAULT_FINALITY_TIMEOUT_MS: u64 = 30_000;

/// Overall deadline for the settlement leg of `confirm`, in milliseconds.
pub const DEFAULT_SETTLEMENT_DEADLINE_MS: u64 = 60_000;

/// Signed settlement transactions tried per `confirm` when a previous one
/// provably never entered the ledger.
pub const DEFAULT_MAX_SETTLEMENT_ROUNDS: u32 = 2;

/// Ledgers a signed transaction stays valid for after signing.
pub const DEFAULT_LAST_LEDGER_OFFSET: u32 = 20;

/// Default log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Domain prefix embedded in every payment memo.
pub const MEMO_PREFIX: &str = "xsettle:v1:";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Service name used in logs.
pub const SERVICE_NAME: &str = "XSettle";
