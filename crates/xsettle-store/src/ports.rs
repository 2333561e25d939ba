//! Repository ports.

use async_trait::async_trait;
use rust_decimal::Decimal;
use xsettle_types::{
    Issuance, IssuanceRef, PendingMint, Purchase, PurchaseId, PurchaseStatus, Result,
    SignedTransaction, TxHash,
};

/// Result of inserting a purchase under an idempotency key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(Purchase),
    /// A record with this id already existed; it is returned unchanged.
    Existing(Purchase),
}

/// Result of a conditional purchase update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    Applied(Purchase),
    /// The precondition did not hold. Carries the record as found.
    Conflict(Purchase),
}

/// A status transition plus the fields it records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseChange {
    pub status: PurchaseStatus,
    pub payment_tx_hash: Option<TxHash>,
    pub compensation_tx_hash: Option<TxHash>,
    pub failure_reason: Option<String>,
}

impl PurchaseChange {
    #[must_use]
    pub fn to(status: PurchaseStatus) -> Self {
        Self {
            status,
            payment_tx_hash: None,
            compensation_tx_hash: None,
            failure_reason: None,
        }
    }

    #[must_use]
    pub fn with_payment(mut self, tx_hash: TxHash) -> Self {
        self.payment_tx_hash = Some(tx_hash);
        self
    }

    #[must_use]
    pub fn with_compensation(mut self, tx_hash: TxHash) -> Self {
        self.compensation_tx_hash = Some(tx_hash);
        self
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }
}

/// Durable purchase records.
#[async_trait]
pub trait PurchaseRepository: Send + Sync {
    /// Insert unless a record with the same id exists.
    async fn insert_purchase(&self, purchase: Purchase) -> Result<InsertOutcome>;

    async fn load_purchase(&self, id: &PurchaseId) -> Result<Option<Purchase>>;

    /// Apply `change` only if the record is currently in `expected`.
    ///
    /// Errors with `InvalidTransition` when the state machine forbids the
    /// move, and with `PaymentAlreadyClaimed` when the change records a
    /// payment hash that backs another purchase.
    async fn transition(
        &self,
        id: &PurchaseId,
        expected: PurchaseStatus,
        change: PurchaseChange,
    ) -> Result<CasOutcome>;

    /// Record `next` as the delivery transaction, only if the purchase is
    /// `PAID` and its current delivery hash equals `expected`. Each applied
    /// claim increments `settlement_rounds`.
    async fn claim_settlement(
        &self,
        id: &PurchaseId,
        expected: Option<&TxHash>,
        next: SignedTransaction,
    ) -> Result<CasOutcome>;

    async fn list_by_status(&self, status: PurchaseStatus) -> Result<Vec<Purchase>>;
}

/// Durable issuance records. Each mutation runs the matching
/// `Issuance::apply_*` inside one atomic update; on error nothing changes.
#[async_trait]
pub trait IssuanceRepository: Send + Sync {
    async fn insert_issuance(&self, issuance: Issuance) -> Result<()>;

    async fn load_issuance(&self, issuance_ref: &IssuanceRef) -> Result<Option<Issuance>>;

    /// Reserve cap headroom for a signed mint.
    async fn reserve_mint(&self, issuance_ref: &IssuanceRef, pending: PendingMint)
    -> Result<Issuance>;

    /// Move a validated mint's reservation into circulating supply.
    async fn commit_mint(&self, issuance_ref: &IssuanceRef, tx_hash: &TxHash) -> Result<Issuance>;

    /// Drop a definitively failed mint's reservation.
    async fn release_mint(&self, issuance_ref: &IssuanceRef, tx_hash: &TxHash)
    -> Result<Issuance>;

    /// Record supply leaving the distribution account.
    async fn debit_distribution(
        &self,
        issuance_ref: &IssuanceRef,
        amount: Decimal,
    ) -> Result<Issuance>;
}
