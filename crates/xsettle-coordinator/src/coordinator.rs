//! # Purchase Coordinator
//!
//! Two-leg purchase protocol over a ledger the coordinator does not
//! control:
//!
//! ```text
//!   commit ──▶ INTENDED ──confirm: payment verified──▶ PAID
//!                                                       │
//!                      ┌── delivery validated ──────────┤
//!                      ▼                                ▼
//!                   SETTLED          delivery failed: COMPENSATION_REQUIRED
//! ```
//!
//! ## Concurrency
//!
//! Every write is a compare-and-set in the store:
//! - `INTENDED -> PAID` admits one confirm; a loser returns the current
//!   state instead of racing.
//! - The delivery transaction is recorded on the purchase *before* it is
//!   submitted. Only the confirm that records it submits it; every later
//!   confirm re-queries that hash.
//! - A fresh delivery is signed only after the previous one provably never
//!   entered the ledger, and it replaces the old hash by CAS.
//!
//! ## Deadline
//!
//! The settlement leg runs under `settlement_deadline`. When it elapses, or
//! finality is unknown, the purchase stays `PAID` and a later `confirm`
//! resolves it.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{error, info, warn};
use xsettle_ledger::{ReliableSubmitter, SubmissionOutcome, SubmissionReport, TransactionSigner};
use xsettle_store::{CasOutcome, InsertOutcome, IssuanceRepository, PurchaseChange, PurchaseRepository};
use xsettle_types::{
    CommitRequest, CommitResponse, ConfirmRequest, CoordinatorConfig, Currency, Issuance,
    IssuanceRef, Network, Purchase, PurchaseId, PurchaseIntent, PurchaseStatus, Quote, Result,
    SettlementError, SettlementResult, SignedTransaction, TransferInstruction, TxHash, amount,
};

use crate::supply::SupplyLedger;
use crate::verification;

/// Outcome of trying to start a new delivery attempt.
enum Attempt {
    Submitted(Purchase, SubmissionReport),
    /// No submission from this confirm: another confirm recorded a delivery
    /// first, or supply can never cover the purchase.
    Finished(Result<SettlementResult>),
}

pub struct PurchaseCoordinator {
    purchases: Arc<dyn PurchaseRepository>,
    issuances: Arc<dyn IssuanceRepository>,
    submitter: Arc<ReliableSubmitter>,
    signer: Arc<dyn TransactionSigner>,
    supply: SupplyLedger,
    config: CoordinatorConfig,
}

impl PurchaseCoordinator {
    pub fn new(
        purchases: Arc<dyn PurchaseRepository>,
        issuances: Arc<dyn IssuanceRepository>,
        submitter: Arc<ReliableSubmitter>,
        signer: Arc<dyn TransactionSigner>,
        config: CoordinatorConfig,
    ) -> Result<Self> {
        config.validate()?;
        let supply = SupplyLedger::new(
            Arc::clone(&issuances),
            Arc::clone(&submitter),
            Arc::clone(&signer),
        );
        Ok(Self {
            purchases,
            issuances,
            submitter,
            signer,
            supply,
            config,
        })
    }

    #[must_use]
    pub fn supply(&self) -> &SupplyLedger {
        &self.supply
    }

    // =========================================================================
    // Quote / commit
    // =========================================================================

    /// Current price of `quantity` units in `currency`.
    pub async fn quote(
        &self,
        issuance_ref: &IssuanceRef,
        quantity: Decimal,
        currency: Currency,
    ) -> Result<Quote> {
        if quantity <= Decimal::ZERO {
            return Err(SettlementError::Validation {
                reason: format!("quantity must be positive, got {quantity}"),
            });
        }
        amount::ensure_bounded("quantity", quantity)?;
        self.load_issuance(issuance_ref).await?.quote(quantity, currency)
    }

    /// `commit` with raw request input.
    pub async fn commit(&self, request: &CommitRequest) -> Result<CommitResponse> {
        let intent = request.validate()?;
        self.commit_intent(&intent).await
    }

    /// Persist an `INTENDED` purchase and return its payment instructions.
    ///
    /// Repeating a commit with the same `purchase_id` and parameters returns
    /// the original instructions; different parameters fail with
    /// `IdempotencyConflict`.
    pub async fn commit_intent(&self, intent: &PurchaseIntent) -> Result<CommitResponse> {
        if let Some(id) = &intent.purchase_id {
            if let Some(existing) = self.purchases.load_purchase(id).await? {
                return Self::replay_commit(&existing, intent);
            }
        }

        let issuance = self.load_issuance(&intent.issuance_ref).await?;
        Self::check_commit(&issuance, intent)?;

        let id = intent.purchase_id.clone().unwrap_or_else(PurchaseId::generate);
        let purchase = Purchase::intended(id, intent, issuance.accounts.treasury.clone());
        let payment_instructions = purchase.instructions()?;
        match self.purchases.insert_purchase(purchase).await? {
            InsertOutcome::Inserted(purchase) => {
                info!(
                    purchase_id = %purchase.id,
                    issuance = %purchase.issuance_ref,
                    quantity = %purchase.quantity,
                    amount = %payment_instructions.amount,
                    currency = %purchase.currency,
                    "Purchase committed"
                );
                Ok(CommitResponse {
                    purchase_id: purchase.id,
                    payment_instructions,
                })
            }
            // Lost an insert race on the same idempotency key.
            InsertOutcome::Existing(existing) => Self::replay_commit(&existing, intent),
        }
    }

    fn replay_commit(existing: &Purchase, intent: &PurchaseIntent) -> Result<CommitResponse> {
        if !existing.matches_intent(intent) {
            return Err(SettlementError::IdempotencyConflict {
                purchase_id: existing.id.clone(),
            });
        }
        Ok(CommitResponse {
            purchase_id: existing.id.clone(),
            payment_instructions: existing.instructions()?,
        })
    }

    fn check_commit(issuance: &Issuance, intent: &PurchaseIntent) -> Result<()> {
        amount::ensure_bounded("quantity", intent.quantity)?;
        amount::ensure_bounded("quotedPrice", intent.quoted_price)?;
        if issuance.network != intent.network {
            return Err(SettlementError::Validation {
                reason: format!(
                    "issuance {} is on {}, not {}",
                    issuance.issuance_ref, issuance.network, intent.network
                ),
            });
        }
        let unit_price = issuance.unit_price(intent.currency)?;
        if unit_price != intent.quoted_price {
            return Err(SettlementError::Validation {
                reason: format!(
                    "stale quote: quoted {} {}, current price {unit_price}",
                    intent.quoted_price, intent.currency
                ),
            });
        }
        if !issuance.is_authorized(&intent.buyer_address) {
            return Err(SettlementError::Authorization {
                buyer: intent.buyer_address.to_string(),
                issuance: issuance.issuance_ref.clone(),
            });
        }
        if !issuance.accepts_purchases() {
            return Err(SettlementError::Availability {
                issuance: issuance.issuance_ref.clone(),
                requested: intent.quantity,
                available: Decimal::ZERO,
            });
        }
        if let Some(available) = issuance.available_for_sale() {
            if intent.quantity > available {
                return Err(SettlementError::Availability {
                    issuance: issuance.issuance_ref.clone(),
                    requested: intent.quantity,
                    available,
                });
            }
        }
        Ok(())
    }

    // =========================================================================
    // Confirm
    // =========================================================================

    /// `confirm` with raw request input.
    pub async fn confirm(&self, request: &ConfirmRequest) -> Result<SettlementResult> {
        let (id, payment_tx_hash, network) = request.validate()?;
        self.confirm_payment(&id, payment_tx_hash.as_ref(), &network)
            .await
    }

    /// Verify the buyer's payment and deliver the asset.
    ///
    /// Safe to call repeatedly: a settled purchase returns its recorded
    /// result, and a `PAID` purchase resumes settlement without ever
    /// submitting a second delivery that could also validate.
    pub async fn confirm_payment(
        &self,
        id: &PurchaseId,
        payment_tx_hash: Option<&TxHash>,
        network: &Network,
    ) -> Result<SettlementResult> {
        let purchase = self.load_purchase(id).await?;
        if &purchase.network != network {
            return Err(SettlementError::Validation {
                reason: format!("purchase {id} is on {}, not {network}", purchase.network),
            });
        }

        match purchase.status {
            PurchaseStatus::Intended => {}
            PurchaseStatus::Paid => return self.settle(purchase).await,
            _ => return Self::result_for(&purchase),
        }

        let payment = {
            let client = self.submitter.pool().acquire(network).await?;
            verification::verify_payment(client.as_ref(), &purchase, payment_tx_hash).await?
        };

        let change = PurchaseChange::to(PurchaseStatus::Paid).with_payment(payment.tx_hash.clone());
        match self
            .purchases
            .transition(id, PurchaseStatus::Intended, change)
            .await?
        {
            CasOutcome::Applied(paid) => {
                info!(
                    purchase_id = %id,
                    payment_tx_hash = %payment.tx_hash,
                    amount = %payment.amount,
                    "Payment verified"
                );
                self.settle(paid).await
            }
            CasOutcome::Conflict(current) => {
                info!(purchase_id = %id, status = %current.status, "Confirm already in progress");
                Self::result_for(&current)
            }
        }
    }

    /// What `confirm` reports for a purchase it will not advance.
    fn result_for(purchase: &Purchase) -> Result<SettlementResult> {
        match purchase.status {
            PurchaseStatus::CompensationRequired => Err(SettlementError::CompensationRequired {
                purchase_id: purchase.id.clone(),
                payment_tx_hash: purchase.payment_tx_hash.clone(),
                reason: purchase
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| "asset not delivered".into()),
            }),
            PurchaseStatus::Failed | PurchaseStatus::Quoted => {
                Err(SettlementError::InvalidTransition {
                    purchase_id: purchase.id.clone(),
                    from: purchase.status,
                    to: PurchaseStatus::Paid,
                })
            }
            _ => Ok(SettlementResult::for_purchase(purchase)),
        }
    }

    // -------------------------------------------------------------------------
    // Settlement leg
    // -------------------------------------------------------------------------

    async fn settle(&self, purchase: Purchase) -> Result<SettlementResult> {
        let id = purchase.id.clone();
        match tokio::time::timeout(self.config.settlement_deadline(), self.settle_paid(purchase))
            .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    purchase_id = %id,
                    deadline_ms = self.config.settlement_deadline_ms,
                    "Settlement deadline elapsed; purchase stays PAID"
                );
                Self::result_for(&self.load_purchase(&id).await?)
            }
        }
    }

    async fn settle_paid(&self, purchase: Purchase) -> Result<SettlementResult> {
        let (mut purchase, mut report) = match purchase.settlement_tx.clone() {
            Some(tx) => {
                info!(purchase_id = %purchase.id, tx_hash = %tx.hash, "Re-querying recorded delivery");
                let report = self.submitter.requery(&tx, &purchase.network).await?;
                (purchase, report)
            }
            None => match self.start_delivery(&purchase, None).await? {
                Attempt::Submitted(claimed, report) => (claimed, report),
                Attempt::Finished(result) => return result,
            },
        };

        loop {
            match &report.outcome {
                SubmissionOutcome::Success { .. } => {
                    return self.complete(&purchase, &report).await;
                }
                SubmissionOutcome::Indeterminate => {
                    warn!(
                        purchase_id = %purchase.id,
                        tx_hash = %report.tx_hash,
                        "Delivery finality unknown; purchase stays PAID"
                    );
                    return Ok(SettlementResult::for_purchase(&purchase));
                }
                SubmissionOutcome::TerminalFailure { .. } => {
                    let reason = report
                        .failure()
                        .map_or_else(|| "delivery failed".to_string(), |e| e.to_string());
                    return self.require_compensation(&purchase, reason).await;
                }
                SubmissionOutcome::RetryableFailure { reason } => {
                    // Rounds are counted on the purchase, across confirms.
                    let rounds = purchase.settlement_rounds;
                    if rounds >= self.config.max_settlement_rounds {
                        let reason = format!(
                            "delivery never entered the ledger after {rounds} attempts: {reason}"
                        );
                        return self.require_compensation(&purchase, reason).await;
                    }
                    warn!(
                        purchase_id = %purchase.id,
                        tx_hash = %report.tx_hash,
                        round = rounds + 1,
                        reason = %reason,
                        "Delivery never entered the ledger; signing a replacement"
                    );
                    let previous = report.tx_hash.clone();
                    match self.start_delivery(&purchase, Some(&previous)).await? {
                        Attempt::Submitted(claimed, next) => {
                            purchase = claimed;
                            report = next;
                        }
                        Attempt::Finished(result) => return result,
                    }
                }
            }
        }
    }

    /// Make sure supply is in place, sign a delivery, record it on the
    /// purchase and submit it.
    async fn start_delivery(
        &self,
        purchase: &Purchase,
        previous: Option<&TxHash>,
    ) -> Result<Attempt> {
        let issuance = self.load_issuance(&purchase.issuance_ref).await?;
        if let Err(err) = self.ensure_supply(&issuance, purchase.quantity).await {
            if Self::blocks_delivery(&err) {
                let reason = format!("supply unavailable: {err}");
                return Ok(Attempt::Finished(
                    self.require_compensation(purchase, reason).await,
                ));
            }
            return Err(err);
        }

        let tx = self.sign_delivery(&issuance, purchase).await?;
        let claimed = match self
            .purchases
            .claim_settlement(&purchase.id, previous, tx.clone())
            .await?
        {
            CasOutcome::Applied(claimed) => claimed,
            CasOutcome::Conflict(current) => {
                info!(purchase_id = %purchase.id, "Delivery already claimed by another confirm");
                return Ok(Attempt::Finished(Self::result_for(&current)));
            }
        };
        info!(
            purchase_id = %purchase.id,
            tx_hash = %tx.hash,
            buyer = %purchase.buyer_address,
            quantity = %purchase.quantity,
            "Submitting delivery"
        );
        let report = self.submitter.submit_and_wait(&tx, &purchase.network).await?;
        Ok(Attempt::Submitted(claimed, report))
    }

    /// Mint any distribution shortfall for a mint-on-demand issuance.
    ///
    /// Pending mints are resolved before anything new is minted: one cut off
    /// by the settlement deadline may already be on the ledger.
    async fn ensure_supply(&self, issuance: &Issuance, quantity: Decimal) -> Result<()> {
        if issuance.distribution_balance >= quantity {
            return Ok(());
        }
        let resolved;
        let issuance = if issuance.pending_mints.is_empty() {
            issuance
        } else {
            info!(
                issuance = %issuance.issuance_ref,
                pending = issuance.pending_mints.len(),
                "Resolving pending mints before minting a shortfall"
            );
            resolved = self
                .supply
                .resolve_pending_mints(&issuance.issuance_ref)
                .await?;
            if resolved.distribution_balance >= quantity {
                return Ok(());
            }
            &resolved
        };
        if !issuance.mint_on_demand {
            return Err(SettlementError::InsufficientDistribution {
                issuance: issuance.issuance_ref.clone(),
                needed: quantity,
                available: issuance.distribution_balance,
            });
        }
        let shortfall = quantity - issuance.distribution_balance;
        info!(issuance = %issuance.issuance_ref, shortfall = %shortfall, "Minting distribution shortfall");
        self.supply
            .mint_to_distribution(&issuance.issuance_ref, shortfall)
            .await
            .map(|_| ())
    }

    /// Supply failures that no later confirm can fix.
    fn blocks_delivery(err: &SettlementError) -> bool {
        matches!(
            err,
            SettlementError::CapExceeded { .. }
                | SettlementError::InsufficientDistribution { .. }
                | SettlementError::TerminalLedger { .. }
                | SettlementError::Availability { .. }
        )
    }

    async fn sign_delivery(
        &self,
        issuance: &Issuance,
        purchase: &Purchase,
    ) -> Result<SignedTransaction> {
        let instruction = TransferInstruction {
            network: purchase.network.clone(),
            source: issuance.accounts.distribution.clone(),
            destination: purchase.buyer_address.clone(),
            asset_code: issuance.asset_code.clone(),
            asset_issuer: Some(issuance.accounts.issuer.clone()),
            amount: purchase.quantity,
            memo: Some(purchase.memo.clone()),
        };
        let client = self.submitter.pool().acquire(&purchase.network).await?;
        self.signer.sign(client.as_ref(), &instruction).await
    }

    async fn complete(
        &self,
        purchase: &Purchase,
        report: &SubmissionReport,
    ) -> Result<SettlementResult> {
        let settled = match self
            .purchases
            .transition(
                &purchase.id,
                PurchaseStatus::Paid,
                PurchaseChange::to(PurchaseStatus::Settled),
            )
            .await?
        {
            CasOutcome::Applied(settled) => settled,
            CasOutcome::Conflict(current) => return Self::result_for(&current),
        };
        if let Err(err) = self
            .issuances
            .debit_distribution(&purchase.issuance_ref, purchase.quantity)
            .await
        {
            // The ledger is authoritative; the stored balance now overstates it.
            error!(
                purchase_id = %purchase.id,
                issuance = %purchase.issuance_ref,
                quantity = %purchase.quantity,
                error = %err,
                "Distribution debit failed after delivery; stored balance needs reconciliation"
            );
        }
        info!(
            purchase_id = %purchase.id,
            settlement_tx_hash = %report.tx_hash,
            "Purchase settled"
        );
        Ok(SettlementResult::for_purchase(&settled))
    }

    async fn require_compensation(
        &self,
        purchase: &Purchase,
        reason: String,
    ) -> Result<SettlementResult> {
        let change = PurchaseChange::to(PurchaseStatus::CompensationRequired).with_reason(&reason);
        let current = match self
            .purchases
            .transition(&purchase.id, PurchaseStatus::Paid, change)
            .await?
        {
            CasOutcome::Applied(current) => {
                error!(
                    purchase_id = %purchase.id,
                    payment_tx_hash = ?purchase.payment_tx_hash,
                    settlement_tx_hash = ?purchase.settlement_tx_hash(),
                    reason = %reason,
                    "Payment received but asset not delivered; compensation required"
                );
                current
            }
            CasOutcome::Conflict(current) => current,
        };
        Self::result_for(&current)
    }

    // =========================================================================
    // Operator actions
    // =========================================================================

    /// Record that the buyer was made whole after a failed delivery.
    pub async fn record_compensation(
        &self,
        id: &PurchaseId,
        compensation_tx_hash: TxHash,
    ) -> Result<Purchase> {
        let change = PurchaseChange::to(PurchaseStatus::Compensated)
            .with_compensation(compensation_tx_hash.clone());
        match self
            .purchases
            .transition(id, PurchaseStatus::CompensationRequired, change)
            .await?
        {
            CasOutcome::Applied(purchase) => {
                info!(purchase_id = %id, compensation_tx_hash = %compensation_tx_hash, "Purchase compensated");
                Ok(purchase)
            }
            CasOutcome::Conflict(current)
                if current.status == PurchaseStatus::Compensated
                    && current.compensation_tx_hash.as_ref() == Some(&compensation_tx_hash) =>
            {
                Ok(current)
            }
            CasOutcome::Conflict(current) => Err(SettlementError::InvalidTransition {
                purchase_id: id.clone(),
                from: current.status,
                to: PurchaseStatus::Compensated,
            }),
        }
    }

    /// Purchases waiting for an operator.
    pub async fn pending_compensations(&self) -> Result<Vec<Purchase>> {
        self.purchases
            .list_by_status(PurchaseStatus::CompensationRequired)
            .await
    }

    /// Give up on a purchase that was never paid.
    pub async fn abandon(&self, id: &PurchaseId, reason: &str) -> Result<Purchase> {
        let change = PurchaseChange::to(PurchaseStatus::Failed).with_reason(reason);
        match self
            .purchases
            .transition(id, PurchaseStatus::Intended, change)
            .await?
        {
            CasOutcome::Applied(purchase) => {
                info!(purchase_id = %id, reason, "Purchase abandoned");
                Ok(purchase)
            }
            CasOutcome::Conflict(current) if current.status == PurchaseStatus::Failed => Ok(current),
            CasOutcome::Conflict(current) => Err(SettlementError::InvalidTransition {
                purchase_id: id.clone(),
                from: current.status,
                to: PurchaseStatus::Failed,
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    pub async fn load_purchase(&self, id: &PurchaseId) -> Result<Purchase> {
        self.purchases
            .load_purchase(id)
            .await?
            .ok_or_else(|| SettlementError::PurchaseNotFound(id.clone()))
    }

    async fn load_issuance(&self, issuance_ref: &IssuanceRef) -> Result<Issuance> {
        self.issuances
            .load_issuance(issuance_ref)
            .await?
            .ok_or_else(|| SettlementError::IssuanceNotFound(issuance_ref.clone()))
    }
}
