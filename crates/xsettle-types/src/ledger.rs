//! Ledger wire-level types shared by the submitter, the ports and the
//! coordinator.
//!
//! Engine result codes are parsed exactly once into [`EngineResult`];
//! everything downstream matches on variants.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AccountAddress, Network, PaymentMemo, TxHash};

// ---------------------------------------------------------------------------
// EngineResult
// ---------------------------------------------------------------------------

/// Result code returned by the ledger for a submission or a validated
/// transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum EngineResult {
    /// `tesSUCCESS`: applied (provisionally at submit time).
    Success,
    /// `terQUEUED`: held in the open-ledger queue.
    Queued,
    /// `tefPAST_SEQ`: the sequence is already consumed, possibly by us.
    PastSequence,
    /// `tefALREADY`: this exact transaction was already applied.
    AlreadyApplied,
    /// `tefMAX_LEDGER`: `last_ledger_sequence` has passed; never applied.
    MaxLedger,
    /// Other `ter*` codes: retry may succeed.
    Retry(String),
    /// `tel*` codes: rejected by the local server only (fees, load).
    Local(String),
    /// Other `tef*` codes: cannot succeed.
    Failure(String),
    /// `tem*` codes: the transaction is malformed.
    Malformed(String),
    /// `tec*` codes: included in a ledger, fee claimed, no effect.
    Claimed(String),
    /// Anything the classifier does not know.
    Unknown(String),
}

/// What a submission result means for the next step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubmitDisposition {
    /// Accepted or possibly applied: wait for a validated ledger.
    AwaitValidation,
    /// Transient: resubmitting the same blob may succeed.
    Retryable,
    /// The blob can never apply; a freshly signed transaction could.
    Expired,
    /// Rejected for good. Never retry.
    Terminal,
}

impl EngineResult {
    #[must_use]
    pub fn parse(code: &str) -> Self {
        let code = code.trim();
        match code {
            "tesSUCCESS" => Self::Success,
            "terQUEUED" => Self::Queued,
            "tefPAST_SEQ" => Self::PastSequence,
            "tefALREADY" => Self::AlreadyApplied,
            "tefMAX_LEDGER" => Self::MaxLedger,
            _ => {
                let owned = code.to_string();
                match code.get(..3) {
                    Some("ter") => Self::Retry(owned),
                    Some("tel") => Self::Local(owned),
                    Some("tef") => Self::Failure(owned),
                    Some("tem") => Self::Malformed(owned),
                    Some("tec") => Self::Claimed(owned),
                    _ => Self::Unknown(owned),
                }
            }
        }
    }

    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::Success => "tesSUCCESS",
            Self::Queued => "terQUEUED",
            Self::PastSequence => "tefPAST_SEQ",
            Self::AlreadyApplied => "tefALREADY",
            Self::MaxLedger => "tefMAX_LEDGER",
            Self::Retry(c)
            | Self::Local(c)
            | Self::Failure(c)
            | Self::Malformed(c)
            | Self::Claimed(c)
            | Self::Unknown(c) => c,
        }
    }

    /// Classification of an immediate submission result.
    #[must_use]
    pub fn disposition(&self) -> SubmitDisposition {
        match self {
            Self::Success
            | Self::Queued
            | Self::PastSequence
            | Self::AlreadyApplied
            | Self::Claimed(_) => SubmitDisposition::AwaitValidation,
            Self::Retry(_) | Self::Local(_) => SubmitDisposition::Retryable,
            Self::MaxLedger => SubmitDisposition::Expired,
            Self::Failure(_) | Self::Malformed(_) | Self::Unknown(_) => SubmitDisposition::Terminal,
        }
    }

    /// For a validated transaction: did it take effect?
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for EngineResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl From<String> for EngineResult {
    fn from(code: String) -> Self {
        Self::parse(&code)
    }
}

impl From<EngineResult> for String {
    fn from(result: EngineResult) -> Self {
        result.code().to_string()
    }
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// Unsigned description of a value transfer. Both mints (issuer ->
/// distribution) and deliveries (distribution -> buyer) use this shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferInstruction {
    pub network: Network,
    pub source: AccountAddress,
    pub destination: AccountAddress,
    pub asset_code: String,
    /// Issuer of the asset; `None` for the native currency.
    pub asset_issuer: Option<AccountAddress>,
    pub amount: Decimal,
    pub memo: Option<PaymentMemo>,
}

/// A signed, ready-to-submit transaction.
///
/// Resubmitting the same blob is safe: the ledger applies a given
/// `(account, sequence)` at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub hash: TxHash,
    #[serde(with = "hex_blob")]
    pub blob: Vec<u8>,
    pub account: AccountAddress,
    pub sequence: u32,
    /// Last ledger index in which this transaction may be included.
    pub last_ledger_sequence: u32,
}

/// Immediate response to a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub engine_result: EngineResult,
    pub message: String,
}

/// What the ledger currently knows about a transaction hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxLookup {
    /// Unknown to the ledger (not yet seen, or never will be).
    NotFound,
    /// Seen but not yet in a validated ledger.
    Pending,
    /// In a validated, immutable ledger.
    Validated {
        engine_result: EngineResult,
        ledger_index: u32,
    },
}

/// An inbound payment as seen on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedPayment {
    pub tx_hash: TxHash,
    pub source: AccountAddress,
    pub destination: AccountAddress,
    pub currency_code: String,
    pub amount: Decimal,
    pub memo: Option<PaymentMemo>,
    /// `Some` once the payment is in a validated ledger.
    pub validated_result: Option<EngineResult>,
}

impl ObservedPayment {
    #[must_use]
    pub fn is_validated_success(&self) -> bool {
        self.validated_result
            .as_ref()
            .is_some_and(EngineResult::is_success)
    }
}

mod hex_blob {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(blob: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode_upper(blob))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(d)?;
        hex::decode(raw).map_err(serde::de::Error::custom)
    }
}
