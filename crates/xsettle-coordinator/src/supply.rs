//! # Supply Ledger
//!
//! Mints a capped asset into its distribution account.
//!
//! ## Two-phase mint
//!
//! 1. **Reserve**: one atomic store update claims headroom,
//!    `total_minted + reserved + amount <= maximum_amount`, and records the
//!    signed mint as pending. A cap violation stops here: nothing mutated,
//!    nothing submitted.
//! 2. **Submit** through the [`ReliableSubmitter`].
//! 3. **Resolve**: commit the reservation on success, release it on a
//!    definitive failure, keep it on an indeterminate outcome.
//!
//! Concurrent mints on the same issuance contend only at step 1, inside the
//! store, so no in-process lock is needed. A reservation left behind by a
//! cancelled caller is resolved later by re-querying its stored transaction
//! ([`SupplyLedger::resolve_pending_mints`]); it is never resubmitted.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, warn};
use xsettle_ledger::{ReliableSubmitter, SubmissionOutcome, SubmissionReport, TransactionSigner};
use xsettle_store::IssuanceRepository;
use xsettle_types::{
    Issuance, IssuanceRef, MintRequest, MintResponse, PendingMint, Result, SettlementError,
    SignedTransaction, TransferInstruction, TxHash, amount,
};

pub struct SupplyLedger {
    issuances: Arc<dyn IssuanceRepository>,
    submitter: Arc<ReliableSubmitter>,
    signer: Arc<dyn TransactionSigner>,
}

impl SupplyLedger {
    #[must_use]
    pub fn new(
        issuances: Arc<dyn IssuanceRepository>,
        submitter: Arc<ReliableSubmitter>,
        signer: Arc<dyn TransactionSigner>,
    ) -> Self {
        Self {
            issuances,
            submitter,
            signer,
        }
    }

    /// `mintToDistribution` with raw request input.
    pub async fn mint(&self, request: &MintRequest) -> Result<MintResponse> {
        let (issuance_ref, amount) = request.validate()?;
        self.mint_to_distribution(&issuance_ref, amount).await
    }

    /// Mint `amount` from the issuer into the distribution account.
    ///
    /// Fails with `CapExceeded` before any submission when the cap would be
    /// passed, and with `MintPending` when the mint's finality is unknown
    /// (its reservation stays held; see [`Self::resolve_pending_mint`]).
    pub async fn mint_to_distribution(
        &self,
        issuance_ref: &IssuanceRef,
        amount: Decimal,
    ) -> Result<MintResponse> {
        if amount <= Decimal::ZERO {
            return Err(SettlementError::Validation {
                reason: format!("mint amount must be positive, got {amount}"),
            });
        }
        amount::ensure_bounded("mint amount", amount)?;
        let issuance = self.load(issuance_ref).await?;
        // Cheap early rejection; the binding check is the reservation.
        issuance.check_mint(amount)?;

        let tx = self.sign_mint(&issuance, amount).await?;
        self.issuances
            .reserve_mint(issuance_ref, PendingMint::new(tx.clone(), amount))
            .await?;
        info!(
            issuance = %issuance_ref,
            amount = %amount,
            tx_hash = %tx.hash,
            "Mint reserved"
        );

        let report = match self.submitter.submit_and_wait(&tx, &issuance.network).await {
            Ok(report) => report,
            Err(err) => {
                // Nothing was submitted.
                self.issuances.release_mint(issuance_ref, &tx.hash).await?;
                return Err(err);
            }
        };
        self.resolve(issuance_ref, report).await
    }

    /// Re-query a mint that previously ended in `MintPending` and commit or
    /// release its reservation. Submits nothing.
    pub async fn resolve_pending_mint(
        &self,
        issuance_ref: &IssuanceRef,
        tx_hash: &TxHash,
    ) -> Result<MintResponse> {
        let issuance = self.load(issuance_ref).await?;
        let pending = issuance
            .pending_mint(tx_hash)
            .ok_or_else(|| SettlementError::Validation {
                reason: format!("issuance {issuance_ref} has no pending mint {tx_hash}"),
            })?;
        let report = self.submitter.requery(&pending.tx, &issuance.network).await?;
        self.resolve(issuance_ref, report).await
    }

    /// Re-query every pending mint of an issuance and return the updated
    /// record. Fails with `MintPending` while any mint is still
    /// indeterminate; definitive failures just release their reservation.
    pub async fn resolve_pending_mints(&self, issuance_ref: &IssuanceRef) -> Result<Issuance> {
        let issuance = self.load(issuance_ref).await?;
        let mut still_pending = None;
        for pending in &issuance.pending_mints {
            let report = self.submitter.requery(&pending.tx, &issuance.network).await?;
            match self.resolve(issuance_ref, report).await {
                Ok(_)
                | Err(
                    SettlementError::RetryableLedger { .. }
                    | SettlementError::TerminalLedger { .. },
                ) => {}
                Err(err @ SettlementError::MintPending { .. }) => {
                    if still_pending.is_none() {
                        still_pending = Some(err);
                    }
                }
                Err(err) => return Err(err),
            }
        }
        match still_pending {
            Some(err) => Err(err),
            None => self.load(issuance_ref).await,
        }
    }

    async fn resolve(
        &self,
        issuance_ref: &IssuanceRef,
        report: SubmissionReport,
    ) -> Result<MintResponse> {
        if let SubmissionOutcome::Success { ledger_index } = report.outcome {
            let issuance = match self.issuances.commit_mint(issuance_ref, &report.tx_hash).await {
                Ok(issuance) => issuance,
                Err(err) => self.resolved_elsewhere(issuance_ref, &report.tx_hash, err).await?,
            };
            info!(
                issuance = %issuance_ref,
                tx_hash = %report.tx_hash,
                ledger_index,
                total_minted = %issuance.total_minted,
                distribution_balance = %issuance.distribution_balance,
                "Mint committed"
            );
            return Ok(MintResponse {
                total_minted: issuance.total_minted,
                distribution_balance: issuance.distribution_balance,
                status: issuance.status,
                tx_hash: report.tx_hash,
            });
        }
        match report.failure() {
            Some(err) => {
                if let Err(release_err) =
                    self.issuances.release_mint(issuance_ref, &report.tx_hash).await
                {
                    self.resolved_elsewhere(issuance_ref, &report.tx_hash, release_err)
                        .await?;
                }
                warn!(issuance = %issuance_ref, tx_hash = %report.tx_hash, error = %err, "Mint released");
                Err(err)
            }
            None => {
                warn!(issuance = %issuance_ref, tx_hash = %report.tx_hash, "Mint pending finality");
                Err(SettlementError::MintPending {
                    issuance: issuance_ref.clone(),
                    tx_hash: report.tx_hash,
                })
            }
        }
    }

    /// A commit or release that lost to a concurrent resolver of the same
    /// mint is not an error: return the record it left behind.
    async fn resolved_elsewhere(
        &self,
        issuance_ref: &IssuanceRef,
        tx_hash: &TxHash,
        err: SettlementError,
    ) -> Result<Issuance> {
        let current = self.load(issuance_ref).await?;
        if current.pending_mint(tx_hash).is_some() {
            return Err(err);
        }
        Ok(current)
    }

    async fn load(&self, issuance_ref: &IssuanceRef) -> Result<Issuance> {
        self.issuances
            .load_issuance(issuance_ref)
            .await?
            .ok_or_else(|| SettlementError::IssuanceNotFound(issuance_ref.clone()))
    }

    async fn sign_mint(&self, issuance: &Issuance, amount: Decimal) -> Result<SignedTransaction> {
        let instruction = TransferInstruction {
            network: issuance.network.clone(),
            source: issuance.accounts.issuer.clone(),
            destination: issuance.accounts.distribution.clone(),
            asset_code: issuance.asset_code.clone(),
            asset_issuer: Some(issuance.accounts.issuer.clone()),
            amount,
            memo: None,
        };
        let client = self.submitter.pool().acquire(&issuance.network).await?;
        self.signer.sign(client.as_ref(), &instruction).await
    }
}
