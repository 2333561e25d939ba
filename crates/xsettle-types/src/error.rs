//! Error types for the XSettle settlement coordinator.
//!
//! All errors use the `XS_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Input validation
//! - 2xx: Business rules (authorization, availability, lookups)
//! - 3xx: Supply / mint
//! - 4xx: Payment verification
//! - 5xx: Ledger submission
//! - 6xx: Settlement compensation
//! - 7xx: Persistent store
//! - 9xx: General / internal errors
//!
//! Call sites branch on variants (or on [`SettlementError::class`]), never on
//! the rendered message.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::{EngineResult, IssuanceRef, Network, PurchaseId, PurchaseStatus, TxHash};

/// Central error enum for all XSettle operations.
#[derive(Debug, Clone, Error)]
pub enum SettlementError {
    // =================================================================
    // Validation Errors (1xx)
    // =================================================================
    /// Malformed input (bad decimal, unknown currency, stale quote, ...).
    #[error("XS_ERR_100: Validation failed: {reason}")]
    Validation { reason: String },

    /// An idempotency key was reused with different request parameters.
    #[error("XS_ERR_101: Purchase {purchase_id} already exists with different parameters")]
    IdempotencyConflict { purchase_id: PurchaseId },

    // =================================================================
    // Business Rule Errors (2xx)
    // =================================================================
    /// The buyer is not authorized to hold this asset.
    #[error("XS_ERR_200: Buyer {buyer} is not authorized for issuance {issuance}")]
    Authorization { buyer: String, issuance: IssuanceRef },

    /// The requested quantity is not currently available.
    #[error("XS_ERR_201: Issuance {issuance}: requested {requested}, available {available}")]
    Availability {
        issuance: IssuanceRef,
        requested: Decimal,
        available: Decimal,
    },

    #[error("XS_ERR_202: Issuance not found: {0}")]
    IssuanceNotFound(IssuanceRef),

    #[error("XS_ERR_203: Purchase not found: {0}")]
    PurchaseNotFound(PurchaseId),

    /// A status transition that the purchase state machine forbids.
    #[error("XS_ERR_204: Purchase {purchase_id} cannot move from {from} to {to}")]
    InvalidTransition {
        purchase_id: PurchaseId,
        from: PurchaseStatus,
        to: PurchaseStatus,
    },

    // =================================================================
    // Supply Errors (3xx)
    // =================================================================
    /// Minting `attempted_amount` would push the supply past the cap.
    /// Raised before any ledger submission; nothing was mutated.
    #[error(
        "XS_ERR_300: Cap exceeded for {issuance}: maximum {maximum_amount}, \
         minted {total_minted}, attempted {attempted_amount}"
    )]
    CapExceeded {
        issuance: IssuanceRef,
        maximum_amount: Decimal,
        total_minted: Decimal,
        attempted_amount: Decimal,
    },

    /// A mint transaction was submitted but its finality is unknown. The
    /// reservation stays held until the transaction is re-queried.
    #[error("XS_ERR_301: Mint for {issuance} pending ledger finality: {tx_hash}")]
    MintPending { issuance: IssuanceRef, tx_hash: TxHash },

    /// The distribution wallet cannot cover a transfer.
    #[error("XS_ERR_302: Distribution balance of {issuance} too low: need {needed}, have {available}")]
    InsufficientDistribution {
        issuance: IssuanceRef,
        needed: Decimal,
        available: Decimal,
    },

    // =================================================================
    // Payment Verification Errors (4xx)
    // =================================================================
    /// No validated inbound payment matches the purchase yet.
    #[error("XS_ERR_400: No validated payment found for purchase {purchase_id}")]
    PaymentNotFound { purchase_id: PurchaseId },

    /// A payment was found but does not satisfy the instructions.
    #[error("XS_ERR_401: Payment for purchase {purchase_id} does not match: {reason}")]
    PaymentMismatch {
        purchase_id: PurchaseId,
        reason: String,
    },

    /// The payment already backs a different purchase.
    #[error("XS_ERR_402: Payment {tx_hash} already claimed by purchase {claimed_by}")]
    PaymentAlreadyClaimed {
        tx_hash: TxHash,
        claimed_by: PurchaseId,
    },

    // =================================================================
    // Ledger Errors (5xx)
    // =================================================================
    /// A transient ledger failure; the transaction provably did not apply.
    #[error("XS_ERR_500: Retryable ledger failure ({}): {reason}", display_hash(.tx_hash))]
    RetryableLedger {
        tx_hash: Option<TxHash>,
        reason: String,
    },

    /// The ledger rejected the transaction, or the retry budget ran out.
    /// Never retried.
    #[error(
        "XS_ERR_501: Terminal ledger failure ({}, code {}): {reason}",
        display_hash(.tx_hash),
        display_code(.code)
    )]
    TerminalLedger {
        tx_hash: Option<TxHash>,
        code: Option<EngineResult>,
        reason: String,
    },

    /// No client could be acquired for the network.
    #[error("XS_ERR_502: Ledger unavailable on {network}: {reason}")]
    LedgerUnavailable { network: Network, reason: String },

    // =================================================================
    // Compensation Errors (6xx)
    // =================================================================
    /// Funds were received but the asset was not delivered. The purchase
    /// is in `COMPENSATION_REQUIRED`; retrying `commit` is the wrong fix.
    #[error(
        "XS_ERR_600: Compensation required for purchase {purchase_id} \
         (payment {}): {reason}",
        display_hash(.payment_tx_hash)
    )]
    CompensationRequired {
        purchase_id: PurchaseId,
        payment_tx_hash: Option<TxHash>,
        reason: String,
    },

    // =================================================================
    // Store Errors (7xx)
    // =================================================================
    #[error("XS_ERR_700: Store error: {0}")]
    Store(String),

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    #[error("XS_ERR_900: Internal error: {0}")]
    Internal(String),

    #[error("XS_ERR_901: Serialization error: {0}")]
    Serialization(String),

    #[error("XS_ERR_902: Configuration error: {0}")]
    Configuration(String),
}

/// Coarse grouping used for response mapping and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Bad input; surfaced as a client error.
    Client,
    /// Rejected by a business rule with no side effects.
    BusinessRule,
    /// Ledger-side failure or unknown finality.
    Ledger,
    /// Funds moved, asset not delivered.
    Compensation,
    /// Store or internal fault.
    Internal,
}

impl SettlementError {
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Validation { .. }
            | Self::IdempotencyConflict { .. }
            | Self::PurchaseNotFound(_)
            | Self::IssuanceNotFound(_)
            | Self::InvalidTransition { .. } => ErrorClass::Client,
            Self::Authorization { .. }
            | Self::Availability { .. }
            | Self::CapExceeded { .. }
            | Self::InsufficientDistribution { .. }
            | Self::PaymentNotFound { .. }
            | Self::PaymentMismatch { .. }
            | Self::PaymentAlreadyClaimed { .. } => ErrorClass::BusinessRule,
            Self::RetryableLedger { .. }
            | Self::TerminalLedger { .. }
            | Self::LedgerUnavailable { .. }
            | Self::MintPending { .. } => ErrorClass::Ledger,
            Self::CompensationRequired { .. } => ErrorClass::Compensation,
            Self::Store(_) | Self::Internal(_) | Self::Serialization(_) | Self::Configuration(_) => {
                ErrorClass::Internal
            }
        }
    }

    /// Whether repeating the same call later may succeed without any
    /// operator involvement.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RetryableLedger { .. }
                | Self::LedgerUnavailable { .. }
                | Self::PaymentNotFound { .. }
                | Self::Store(_)
        )
    }

    /// Whether an operator (or an automated remediation job) must act.
    #[must_use]
    pub fn requires_operator(&self) -> bool {
        matches!(
            self,
            Self::CompensationRequired { .. } | Self::MintPending { .. } | Self::Internal(_)
        )
    }

    /// Whether this error means funds were received but not settled.
    #[must_use]
    pub fn requires_compensation(&self) -> bool {
        matches!(self, Self::CompensationRequired { .. })
    }
}

#[allow(clippy::ref_option)]
fn display_hash(hash: &Option<TxHash>) -> String {
    hash.as_ref()
        .map_or_else(|| "no hash".to_string(), ToString::to_string)
}

#[allow(clippy::ref_option)]
fn display_code(code: &Option<EngineResult>) -> String {
    code.as_ref()
        .map_or_else(|| "none".to_string(), ToString::to_string)
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, SettlementError>;

impl From<serde_json::Error> for SettlementError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
