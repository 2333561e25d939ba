//! Payment-side types: settlement currencies, correlation memos, and the
//! instructions handed back to a buyer by `commit`.

use std::{fmt, str::FromStr};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AccountAddress, PurchaseId, Result, SettlementError, constants};

/// Currencies a buyer can settle a purchase in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// The ledger's native asset.
    Xrp,
    /// USD-pegged stablecoin issued on the same ledger.
    Rlusd,
}

impl Currency {
    pub const ALL: [Self; 2] = [Self::Xrp, Self::Rlusd];

    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Xrp => "XRP",
            Self::Rlusd => "RLUSD",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = SettlementError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.code().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| SettlementError::Validation {
                reason: format!("unsupported currency {s:?}"),
            })
    }
}

// ---------------------------------------------------------------------------
// PaymentMemo
// ---------------------------------------------------------------------------

/// Opaque correlation token attached to an inbound payment.
///
/// Hex of `xsettle:v1:<purchase_id>`, so a payment observed on the ledger
/// can be tied back to its purchase without an explicit confirm.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentMemo(pub String);

impl PaymentMemo {
    #[must_use]
    pub fn for_purchase(purchase_id: &PurchaseId) -> Self {
        let raw = format!("{}{}", constants::MEMO_PREFIX, purchase_id);
        Self(hex::encode_upper(raw.as_bytes()))
    }

    /// Decode the embedded purchase ID, if this is one of ours.
    #[must_use]
    pub fn purchase_id(&self) -> Option<PurchaseId> {
        let bytes = hex::decode(&self.0).ok()?;
        let text = String::from_utf8(bytes).ok()?;
        let id = text.strip_prefix(constants::MEMO_PREFIX)?;
        PurchaseId::parse(id).ok()
    }
}

impl fmt::Display for PaymentMemo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where and how much the buyer must pay. Derived from the purchase record;
/// never persisted separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInstructions {
    pub destination: AccountAddress,
    pub amount: Decimal,
    pub currency: Currency,
    pub memo: PaymentMemo,
}

/// Price of a quantity of an issuance in one currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub currency: Currency,
    pub total: Decimal,
}
