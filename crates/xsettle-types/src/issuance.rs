//! # Issuance — a capped, mintable asset
//!
//! Supply invariant maintained by every mutation in this module:
//!
//! ```text
//! maximum_amount == 0  ||  total_minted + reserved_amount <= maximum_amount
//! ```
//!
//! `reserved_amount` is the sum of [`PendingMint`]s: supply claimed by mint
//! transactions in flight on the ledger. A pending mint is either committed
//! (moved into `total_minted` and `distribution_balance`) or released; it is
//! never silently dropped.
//!
//! The `apply_*` methods are pure record mutations. Stores call them inside
//! a single atomic conditional update so check and write cannot interleave
//! with a concurrent mint.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    AccountAddress, Currency, IssuanceRef, Network, Quote, Result, SettlementError,
    SignedTransaction, TxHash,
    amount::{checked_add, checked_mul},
};

/// Lifecycle status of an issuance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssuanceStatus {
    /// Record exists, nothing minted yet.
    Created,
    /// At least one mint has been validated on the ledger.
    Minted,
    /// No further sales or mints.
    Closed,
}

impl fmt::Display for IssuanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "CREATED"),
            Self::Minted => write!(f, "MINTED"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

/// The three ledger accounts an issuance moves value between.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceAccounts {
    /// Issuing account; mints originate here.
    pub issuer: AccountAddress,
    /// Holds minted supply awaiting sale.
    pub distribution: AccountAddress,
    /// Receives buyer payments.
    pub treasury: AccountAddress,
}

/// A signed mint transaction holding a reservation against the cap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMint {
    pub tx: SignedTransaction,
    pub amount: Decimal,
    pub reserved_at: DateTime<Utc>,
}

impl PendingMint {
    #[must_use]
    pub fn new(tx: SignedTransaction, amount: Decimal) -> Self {
        Self {
            tx,
            amount,
            reserved_at: Utc::now(),
        }
    }
}

/// A persisted issuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issuance {
    pub issuance_ref: IssuanceRef,
    /// Ledger currency code of the asset.
    pub asset_code: String,
    pub network: Network,
    pub accounts: IssuanceAccounts,
    /// Supply cap. `0` means uncapped.
    pub maximum_amount: Decimal,
    /// Validated minted supply. Never decreases.
    pub total_minted: Decimal,
    /// Mint transactions submitted (or about to be) but not yet final.
    pub pending_mints: Vec<PendingMint>,
    /// Minted supply still held by the distribution account.
    pub distribution_balance: Decimal,
    pub status: IssuanceStatus,
    /// Mint the shortfall when distribution cannot cover a sale.
    pub mint_on_demand: bool,
    /// Buyers must be listed in `authorized_holders`.
    pub requires_authorization: bool,
    pub authorized_holders: BTreeSet<AccountAddress>,
    /// Unit price per accepted settlement currency.
    pub unit_prices: BTreeMap<Currency, Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Issuance {
    /// Create a fresh issuance in `CREATED` with nothing minted.
    #[must_use]
    pub fn new(
        issuance_ref: IssuanceRef,
        asset_code: impl Into<String>,
        network: Network,
        accounts: IssuanceAccounts,
        maximum_amount: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            issuance_ref,
            asset_code: asset_code.into(),
            network,
            accounts,
            maximum_amount,
            total_minted: Decimal::ZERO,
            pending_mints: Vec::new(),
            distribution_balance: Decimal::ZERO,
            status: IssuanceStatus::Created,
            mint_on_demand: true,
            requires_authorization: false,
            authorized_holders: BTreeSet::new(),
            unit_prices: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_price(mut self, currency: Currency, unit_price: Decimal) -> Self {
        self.unit_prices.insert(currency, unit_price);
        self
    }

    #[must_use]
    pub fn with_authorized_holder(mut self, holder: AccountAddress) -> Self {
        self.requires_authorization = true;
        self.authorized_holders.insert(holder);
        self
    }

    #[must_use]
    pub fn with_mint_on_demand(mut self, enabled: bool) -> Self {
        self.mint_on_demand = enabled;
        self
    }

    /// Seed an existing minted supply (e.g. when importing an issuance).
    #[must_use]
    pub fn with_minted(mut self, total_minted: Decimal, distribution_balance: Decimal) -> Self {
        self.total_minted = total_minted;
        self.distribution_balance = distribution_balance;
        if total_minted > Decimal::ZERO {
            self.status = IssuanceStatus::Minted;
        }
        self
    }

    /// Supply claimed by in-flight mint transactions.
    #[must_use]
    pub fn reserved_amount(&self) -> Decimal {
        self.pending_mints
            .iter()
            .fold(Decimal::ZERO, |acc, p| acc.saturating_add(p.amount))
    }

    #[must_use]
    pub fn pending_mint(&self, tx_hash: &TxHash) -> Option<&PendingMint> {
        self.pending_mints.iter().find(|p| &p.tx.hash == tx_hash)
    }

    #[must_use]
    pub fn is_capped(&self) -> bool {
        !self.maximum_amount.is_zero()
    }

    /// Supply that may still be minted, counting in-flight reservations.
    /// `None` when uncapped.
    #[must_use]
    pub fn remaining_mintable(&self) -> Option<Decimal> {
        self.is_capped().then(|| {
            self.maximum_amount
                .saturating_sub(self.total_minted)
                .saturating_sub(self.reserved_amount())
                .max(Decimal::ZERO)
        })
    }

    /// Quantity a buyer can currently purchase. `None` when unbounded.
    #[must_use]
    pub fn available_for_sale(&self) -> Option<Decimal> {
        if !self.mint_on_demand {
            return Some(self.distribution_balance);
        }
        self.remaining_mintable()
            .map(|remaining| self.distribution_balance.saturating_add(remaining))
    }

    #[must_use]
    pub fn accepts_purchases(&self) -> bool {
        self.status != IssuanceStatus::Closed
    }

    #[must_use]
    pub fn is_authorized(&self, buyer: &AccountAddress) -> bool {
        !self.requires_authorization || self.authorized_holders.contains(buyer)
    }

    pub fn unit_price(&self, currency: Currency) -> Result<Decimal> {
        self.unit_prices
            .get(&currency)
            .copied()
            .ok_or_else(|| SettlementError::Validation {
                reason: format!(
                    "issuance {} does not accept {currency}",
                    self.issuance_ref
                ),
            })
    }

    pub fn quote(&self, quantity: Decimal, currency: Currency) -> Result<Quote> {
        let unit_price = self.unit_price(currency)?;
        Ok(Quote {
            quantity,
            unit_price,
            currency,
            total: checked_mul("quote total", quantity, unit_price)?,
        })
    }

    /// Cap check for a prospective mint. Pure; mutates nothing.
    pub fn check_mint(&self, amount: Decimal) -> Result<()> {
        if self.status == IssuanceStatus::Closed {
            return Err(SettlementError::Availability {
                issuance: self.issuance_ref.clone(),
                requested: amount,
                available: Decimal::ZERO,
            });
        }
        let claimed = checked_add("total minted", self.total_minted, self.reserved_amount())?;
        let after = checked_add("mint amount", claimed, amount)?;
        if self.is_capped() && after > self.maximum_amount {
            return Err(SettlementError::CapExceeded {
                issuance: self.issuance_ref.clone(),
                maximum_amount: self.maximum_amount,
                total_minted: claimed,
                attempted_amount: amount,
            });
        }
        Ok(())
    }

    /// Claim headroom for an in-flight mint transaction.
    pub fn apply_reserve(&mut self, pending: PendingMint) -> Result<()> {
        if self.pending_mint(&pending.tx.hash).is_some() {
            return Err(SettlementError::Internal(format!(
                "issuance {}: mint {} already reserved",
                self.issuance_ref, pending.tx.hash
            )));
        }
        self.check_mint(pending.amount)?;
        self.pending_mints.push(pending);
        self.touch();
        Ok(())
    }

    /// The mint validated: move its reservation into circulating supply.
    /// Returns the committed amount.
    pub fn apply_commit(&mut self, tx_hash: &TxHash) -> Result<Decimal> {
        let reserved = self.pending_mint(tx_hash).map_or(Decimal::ZERO, |p| p.amount);
        let total_minted = checked_add("total minted", self.total_minted, reserved)?;
        let distribution_balance =
            checked_add("distribution balance", self.distribution_balance, reserved)?;
        let amount = self.take_reservation(tx_hash)?;
        self.total_minted = total_minted;
        self.distribution_balance = distribution_balance;
        if self.status == IssuanceStatus::Created {
            self.status = IssuanceStatus::Minted;
        }
        self.touch();
        Ok(amount)
    }

    /// The mint definitively failed: give the headroom back.
    pub fn apply_release(&mut self, tx_hash: &TxHash) -> Result<Decimal> {
        let amount = self.take_reservation(tx_hash)?;
        self.touch();
        Ok(amount)
    }

    /// Delivered `amount` out of the distribution account.
    pub fn apply_debit(&mut self, amount: Decimal) -> Result<()> {
        if self.distribution_balance < amount {
            return Err(SettlementError::InsufficientDistribution {
                issuance: self.issuance_ref.clone(),
                needed: amount,
                available: self.distribution_balance,
            });
        }
        self.distribution_balance -= amount;
        self.touch();
        Ok(())
    }

    fn take_reservation(&mut self, tx_hash: &TxHash) -> Result<Decimal> {
        let idx = self
            .pending_mints
            .iter()
            .position(|p| &p.tx.hash == tx_hash)
            .ok_or_else(|| {
                SettlementError::Internal(format!(
                    "issuance {}: no pending mint {tx_hash}",
                    self.issuance_ref
                ))
            })?;
        Ok(self.pending_mints.remove(idx).amount)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
