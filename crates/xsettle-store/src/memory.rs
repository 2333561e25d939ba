//! In-memory store backed by a single `parking_lot` mutex.
//!
//! One lock covers purchases, issuances and the payment-claim index, so a
//! conditional update and the uniqueness checks it depends on are one
//! critical section.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::debug;
use xsettle_types::{
    Issuance, IssuanceRef, PendingMint, Purchase, PurchaseId, PurchaseStatus, Result,
    SettlementError, SignedTransaction, TxHash,
};

use crate::ports::{
    CasOutcome, InsertOutcome, IssuanceRepository, PurchaseChange, PurchaseRepository,
};

#[derive(Debug, Default)]
struct Inner {
    purchases: HashMap<PurchaseId, Purchase>,
    issuances: HashMap<IssuanceRef, Issuance>,
    /// Payment hash -> the purchase it settles.
    payment_claims: HashMap<TxHash, PurchaseId>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `apply` against a copy of the issuance and keep the copy only on
    /// success.
    fn update_issuance<T>(
        &self,
        issuance_ref: &IssuanceRef,
        apply: impl FnOnce(&mut Issuance) -> Result<T>,
    ) -> Result<Issuance> {
        let mut inner = self.inner.lock();
        let current = inner
            .issuances
            .get_mut(issuance_ref)
            .ok_or_else(|| SettlementError::IssuanceNotFound(issuance_ref.clone()))?;
        let mut next = current.clone();
        apply(&mut next)?;
        *current = next.clone();
        Ok(next)
    }
}

#[async_trait]
impl PurchaseRepository for MemoryStore {
    async fn insert_purchase(&self, purchase: Purchase) -> Result<InsertOutcome> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.purchases.get(&purchase.id) {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        inner.purchases.insert(purchase.id.clone(), purchase.clone());
        Ok(InsertOutcome::Inserted(purchase))
    }

    async fn load_purchase(&self, id: &PurchaseId) -> Result<Option<Purchase>> {
        Ok(self.inner.lock().purchases.get(id).cloned())
    }

    async fn transition(
        &self,
        id: &PurchaseId,
        expected: PurchaseStatus,
        change: PurchaseChange,
    ) -> Result<CasOutcome> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let current = inner
            .purchases
            .get_mut(id)
            .ok_or_else(|| SettlementError::PurchaseNotFound(id.clone()))?;
        if current.status != expected {
            return Ok(CasOutcome::Conflict(current.clone()));
        }
        if !expected.can_transition_to(change.status) {
            return Err(SettlementError::InvalidTransition {
                purchase_id: id.clone(),
                from: expected,
                to: change.status,
            });
        }
        if let Some(hash) = &change.payment_tx_hash {
            if let Some(owner) = inner.payment_claims.get(hash).filter(|owner| *owner != id) {
                return Err(SettlementError::PaymentAlreadyClaimed {
                    tx_hash: hash.clone(),
                    claimed_by: owner.clone(),
                });
            }
            inner.payment_claims.insert(hash.clone(), id.clone());
            current.payment_tx_hash = Some(hash.clone());
        }
        if change.compensation_tx_hash.is_some() {
            current.compensation_tx_hash = change.compensation_tx_hash;
        }
        if change.failure_reason.is_some() {
            current.failure_reason = change.failure_reason;
        }
        debug!(purchase_id = %id, from = %expected, to = %change.status, "Purchase transition");
        current.status = change.status;
        current.updated_at = Utc::now();
        Ok(CasOutcome::Applied(current.clone()))
    }

    async fn claim_settlement(
        &self,
        id: &PurchaseId,
        expected: Option<&TxHash>,
        next: SignedTransaction,
    ) -> Result<CasOutcome> {
        let mut inner = self.inner.lock();
        let current = inner
            .purchases
            .get_mut(id)
            .ok_or_else(|| SettlementError::PurchaseNotFound(id.clone()))?;
        if current.status != PurchaseStatus::Paid || current.settlement_tx_hash() != expected {
            return Ok(CasOutcome::Conflict(current.clone()));
        }
        current.settlement_tx = Some(next);
        current.settlement_rounds = current.settlement_rounds.saturating_add(1);
        current.updated_at = Utc::now();
        Ok(CasOutcome::Applied(current.clone()))
    }

    async fn list_by_status(&self, status: PurchaseStatus) -> Result<Vec<Purchase>> {
        let mut found: Vec<Purchase> = self
            .inner
            .lock()
            .purchases
            .values()
            .filter(|p| p.status == status)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.0.cmp(&b.id.0)));
        Ok(found)
    }
}

#[async_trait]
impl IssuanceRepository for MemoryStore {
    async fn insert_issuance(&self, issuance: Issuance) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.issuances.contains_key(&issuance.issuance_ref) {
            return Err(SettlementError::Validation {
                reason: format!("issuance {} already exists", issuance.issuance_ref),
            });
        }
        inner.issuances.insert(issuance.issuance_ref.clone(), issuance);
        Ok(())
    }

    async fn load_issuance(&self, issuance_ref: &IssuanceRef) -> Result<Option<Issuance>> {
        Ok(self.inner.lock().issuances.get(issuance_ref).cloned())
    }

    async fn reserve_mint(
        &self,
        issuance_ref: &IssuanceRef,
        pending: PendingMint,
    ) -> Result<Issuance> {
        self.update_issuance(issuance_ref, |iss| iss.apply_reserve(pending))
    }

    async fn commit_mint(&self, issuance_ref: &IssuanceRef, tx_hash: &TxHash) -> Result<Issuance> {
        self.update_issuance(issuance_ref, |iss| iss.apply_commit(tx_hash))
    }

    async fn release_mint(
        &self,
        issuance_ref: &IssuanceRef,
        tx_hash: &TxHash,
    ) -> Result<Issuance> {
        self.update_issuance(issuance_ref, |iss| iss.apply_release(tx_hash))
    }

    async fn debit_distribution(
        &self,
        issuance_ref: &IssuanceRef,
        amount: Decimal,
    ) -> Result<Issuance> {
        self.update_issuance(issuance_ref, |iss| iss.apply_debit(amount))
    }
}
