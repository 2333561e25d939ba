//! # Purchase — the off-chain intent record
//!
//! ## State Machine
//!
//! ```text
//!   QUOTED ──▶ INTENDED ──confirm──▶ PAID ──settle──▶ SETTLED
//!                 │                   │
//!                 │ abandon           ├──delivery failed──▶ COMPENSATION_REQUIRED
//!                 ▼                   │                              │ operator
//!               FAILED ◀──────────────┘                              ▼
//!                                                               COMPENSATED
//! ```
//!
//! Transitions are **monotonic**: a status is never revisited, and nothing
//! leaves a terminal status. Purchases are audit records and never deleted.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    AccountAddress, Currency, IssuanceRef, Network, PaymentInstructions, PaymentMemo, PurchaseId,
    Result, SignedTransaction, TxHash, amount,
};

/// Lifecycle status of a purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseStatus {
    /// Priced but not yet committed. Never persisted by `commit`, which
    /// creates records directly in `Intended`.
    Quoted,
    /// Committed; waiting for the buyer's payment.
    Intended,
    /// Payment verified; asset not yet delivered.
    Paid,
    /// Asset delivered. Terminal.
    Settled,
    /// Abandoned before any funds moved. Terminal.
    Failed,
    /// Funds received but delivery failed; an operator must act.
    CompensationRequired,
    /// The buyer was made whole after a failed delivery. Terminal.
    Compensated,
}

impl PurchaseStatus {
    /// Can a purchase in this status move to `target`?
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Quoted, Self::Intended | Self::Failed)
                | (Self::Intended, Self::Paid | Self::Failed)
                | (
                    Self::Paid,
                    Self::Settled | Self::Failed | Self::CompensationRequired
                )
                | (Self::CompensationRequired, Self::Compensated)
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Settled | Self::Failed | Self::Compensated)
    }

    /// Funds have been received from the buyer.
    #[must_use]
    pub fn funds_received(self) -> bool {
        matches!(
            self,
            Self::Paid | Self::Settled | Self::CompensationRequired | Self::Compensated
        )
    }
}

impl fmt::Display for PurchaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quoted => write!(f, "QUOTED"),
            Self::Intended => write!(f, "INTENDED"),
            Self::Paid => write!(f, "PAID"),
            Self::Settled => write!(f, "SETTLED"),
            Self::Failed => write!(f, "FAILED"),
            Self::CompensationRequired => write!(f, "COMPENSATION_REQUIRED"),
            Self::Compensated => write!(f, "COMPENSATED"),
        }
    }
}

/// Validated `commit` input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseIntent {
    pub purchase_id: Option<PurchaseId>,
    pub issuance_ref: IssuanceRef,
    pub quantity: Decimal,
    pub quoted_price: Decimal,
    pub currency: Currency,
    pub buyer_address: AccountAddress,
    pub network: Network,
}

/// A persisted purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    pub id: PurchaseId,
    pub issuance_ref: IssuanceRef,
    pub quantity: Decimal,
    pub quoted_price: Decimal,
    pub currency: Currency,
    pub buyer_address: AccountAddress,
    pub network: Network,
    /// Account the buyer pays into.
    pub destination: AccountAddress,
    pub memo: PaymentMemo,
    pub status: PurchaseStatus,
    /// Set by `confirm` when the payment is verified.
    pub payment_tx_hash: Option<TxHash>,
    /// The signed delivery transaction. Recorded *before* submission so a
    /// later confirm re-queries it instead of signing a second delivery.
    pub settlement_tx: Option<SignedTransaction>,
    /// Delivery transactions recorded so far, across every `confirm`.
    #[serde(default)]
    pub settlement_rounds: u32,
    /// Set by the operator compensation action.
    pub compensation_tx_hash: Option<TxHash>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Purchase {
    /// New purchase in `INTENDED` for a validated intent.
    #[must_use]
    pub fn intended(id: PurchaseId, intent: &PurchaseIntent, destination: AccountAddress) -> Self {
        let now = Utc::now();
        Self {
            memo: PaymentMemo::for_purchase(&id),
            id,
            issuance_ref: intent.issuance_ref.clone(),
            quantity: intent.quantity,
            quoted_price: intent.quoted_price,
            currency: intent.currency,
            buyer_address: intent.buyer_address.clone(),
            network: intent.network.clone(),
            destination,
            status: PurchaseStatus::Intended,
            payment_tx_hash: None,
            settlement_tx: None,
            settlement_rounds: 0,
            compensation_tx_hash: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn settlement_tx_hash(&self) -> Option<&TxHash> {
        self.settlement_tx.as_ref().map(|tx| &tx.hash)
    }

    /// Amount the buyer owes: `quantity * quoted_price`, exact.
    pub fn payment_amount(&self) -> Result<Decimal> {
        amount::checked_mul("payment amount", self.quantity, self.quoted_price)
    }

    pub fn instructions(&self) -> Result<PaymentInstructions> {
        Ok(PaymentInstructions {
            destination: self.destination.clone(),
            amount: self.payment_amount()?,
            currency: self.currency,
            memo: self.memo.clone(),
        })
    }

    /// Whether a repeated commit carries the same parameters as this record.
    #[must_use]
    pub fn matches_intent(&self, intent: &PurchaseIntent) -> bool {
        self.issuance_ref == intent.issuance_ref
            && self.quantity == intent.quantity
            && self.quoted_price == intent.quoted_price
            && self.currency == intent.currency
            && self.buyer_address == intent.buyer_address
            && self.network == intent.network
    }
}
