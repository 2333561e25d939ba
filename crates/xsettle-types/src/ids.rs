//! Identifiers used throughout XSettle.
//!
//! Purchase IDs double as idempotency keys: callers may supply their own,
//! otherwise a UUIDv7 is generated so IDs sort by creation time.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{Result, SettlementError};

// ---------------------------------------------------------------------------
// PurchaseId
// ---------------------------------------------------------------------------

/// Purchase identifier and idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct PurchaseId(pub String);

impl PurchaseId {
    /// Maximum accepted length of a caller-supplied key.
    pub const MAX_LEN: usize = 64;

    /// Server-generated ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Validate a caller-supplied idempotency key.
    ///
    /// Keys must be non-empty, at most [`Self::MAX_LEN`] bytes, and use
    /// only ASCII alphanumerics, `-` and `_` so they embed cleanly in memos.
    pub fn parse(raw: &str) -> Result<Self> {
        let key = raw.trim();
        if key.is_empty() || key.len() > Self::MAX_LEN {
            return Err(SettlementError::Validation {
                reason: format!("purchase_id must be 1..={} characters", Self::MAX_LEN),
            });
        }
        if !key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(SettlementError::Validation {
                reason: format!("purchase_id {key:?} contains unsupported characters"),
            });
        }
        Ok(Self(key.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PurchaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// IssuanceRef
// ---------------------------------------------------------------------------

/// Reference to a mintable asset record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct IssuanceRef(pub String);

impl IssuanceRef {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl fmt::Display for IssuanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// Ledger network name (e.g., "mainnet", "testnet").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Network(pub String);

impl Network {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// AccountAddress
// ---------------------------------------------------------------------------

/// A ledger account address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct AccountAddress(pub String);

impl AccountAddress {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Reject blank addresses; format checks belong to the ledger client.
    pub fn parse(raw: &str) -> Result<Self> {
        let addr = raw.trim();
        if addr.is_empty() {
            return Err(SettlementError::Validation {
                reason: "account address must not be empty".to_string(),
            });
        }
        Ok(Self(addr.to_string()))
    }
}

impl fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// TxHash
// ---------------------------------------------------------------------------

/// Ledger transaction hash, upper-case hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct TxHash(pub String);

impl TxHash {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().to_ascii_uppercase())
    }

    /// Hash of a signed transaction blob. The same blob always yields the
    /// same hash, which is what makes resubmission safe to correlate.
    #[must_use]
    pub fn of_blob(blob: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"xsettle:tx:v1:");
        hasher.update(blob);
        Self(hex::encode_upper(hasher.finalize()))
    }

    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
