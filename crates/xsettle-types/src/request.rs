//! Request and response bodies for the three external operations:
//! `commit`, `confirm`, and `mintToDistribution`.
//!
//! Requests carry raw strings exactly as received; `validate()` turns them
//! into typed values or a `Validation` error.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    AccountAddress, IssuanceRef, IssuanceStatus, Network, PaymentInstructions, Purchase,
    PurchaseId, PurchaseIntent, PurchaseStatus, Result, SettlementError, TxHash, amount,
};

/// `commit` request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRequest {
    pub issuance_ref: String,
    pub quantity: String,
    pub quoted_price: String,
    pub currency: String,
    pub buyer_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_id: Option<String>,
    pub network: String,
}

impl CommitRequest {
    pub fn validate(&self) -> Result<PurchaseIntent> {
        let issuance_ref = self.issuance_ref.trim();
        if issuance_ref.is_empty() {
            return Err(SettlementError::Validation {
                reason: "issuanceRef is required".into(),
            });
        }
        let network = self.network.trim();
        if network.is_empty() {
            return Err(SettlementError::Validation {
                reason: "network is required".into(),
            });
        }
        Ok(PurchaseIntent {
            purchase_id: self
                .purchase_id
                .as_deref()
                .map(PurchaseId::parse)
                .transpose()?,
            issuance_ref: IssuanceRef::new(issuance_ref),
            quantity: amount::parse_positive("quantity", &self.quantity)?,
            quoted_price: amount::parse_positive("quotedPrice", &self.quoted_price)?,
            currency: self.currency.parse()?,
            buyer_address: AccountAddress::parse(&self.buyer_address)?,
            network: Network::new(network),
        })
    }
}

/// `commit` response body (status "created").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResponse {
    pub purchase_id: PurchaseId,
    pub payment_instructions: PaymentInstructions,
}

/// `confirm` request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    pub purchase_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_tx_hash: Option<String>,
    pub network: String,
}

impl ConfirmRequest {
    pub fn validate(&self) -> Result<(PurchaseId, Option<TxHash>, Network)> {
        let id = PurchaseId::parse(&self.purchase_id)?;
        let hash = match self.payment_tx_hash.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) if raw.bytes().all(|b| b.is_ascii_hexdigit()) => Some(TxHash::new(raw)),
            Some(raw) => {
                return Err(SettlementError::Validation {
                    reason: format!("paymentTxHash {raw:?} is not hex"),
                });
            }
        };
        let network = self.network.trim();
        if network.is_empty() {
            return Err(SettlementError::Validation {
                reason: "network is required".into(),
            });
        }
        Ok((id, hash, Network::new(network)))
    }
}

/// Outcome of `confirm`.
///
/// `status` is `PAID` when delivery is still awaiting ledger finality; a
/// later `confirm` resolves it. `requires_compensation` is set only for
/// `COMPENSATION_REQUIRED`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementResult {
    pub purchase_id: PurchaseId,
    pub status: PurchaseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement_tx_hash: Option<TxHash>,
    pub requires_compensation: bool,
}

impl SettlementResult {
    /// Current view of a purchase.
    #[must_use]
    pub fn for_purchase(purchase: &Purchase) -> Self {
        Self {
            purchase_id: purchase.id.clone(),
            status: purchase.status,
            settlement_tx_hash: purchase.settlement_tx_hash().cloned(),
            requires_compensation: purchase.status == PurchaseStatus::CompensationRequired,
        }
    }

    /// Response body for a `CompensationRequired` error.
    #[must_use]
    pub fn from_error(err: &SettlementError) -> Option<Self> {
        match err {
            SettlementError::CompensationRequired { purchase_id, .. } => Some(Self {
                purchase_id: purchase_id.clone(),
                status: PurchaseStatus::CompensationRequired,
                settlement_tx_hash: None,
                requires_compensation: true,
            }),
            _ => None,
        }
    }
}

/// `mintToDistribution` request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintRequest {
    pub issuance_ref: String,
    pub amount: String,
}

impl MintRequest {
    pub fn validate(&self) -> Result<(IssuanceRef, Decimal)> {
        let issuance_ref = self.issuance_ref.trim();
        if issuance_ref.is_empty() {
            return Err(SettlementError::Validation {
                reason: "issuanceRef is required".into(),
            });
        }
        Ok((
            IssuanceRef::new(issuance_ref),
            amount::parse_positive("amount", &self.amount)?,
        ))
    }
}

/// `mintToDistribution` response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintResponse {
    pub total_minted: Decimal,
    pub distribution_balance: Decimal,
    pub status: IssuanceStatus,
    pub tx_hash: TxHash,
}

/// Body returned when a mint is rejected by the cap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapViolation {
    pub maximum_amount: Decimal,
    pub total_minted: Decimal,
    pub attempted_amount: Decimal,
}

impl CapViolation {
    /// Extract the diagnostic body from a `CapExceeded` error.
    #[must_use]
    pub fn from_error(err: &SettlementError) -> Option<Self> {
        match err {
            SettlementError::CapExceeded {
                maximum_amount,
                total_minted,
                attempted_amount,
                ..
            } => Some(Self {
                maximum_amount: *maximum_amount,
                total_minted: *total_minted,
                attempted_amount: *attempted_amount,
            }),
            _ => None,
        }
    }
}
