//! # Reliable Submitter
//!
//! Drives one signed transaction to a final outcome:
//!
//! 1. **Submit** the blob, retrying transient engine results and transport
//!    errors with exponential backoff, up to `max_submit_attempts`.
//! 2. **Await finality** by polling until the transaction is in a validated
//!    ledger, provably never entered one, or `finality_timeout` elapses.
//!
//! Resubmitting the same blob is always safe; the submitter never signs.
//! A ledger client is acquired once per cycle and released when the cycle
//! ends, on every path.
//!
//! ## Proof of non-inclusion
//!
//! A transaction that is not found has provably never entered the ledger
//! when either:
//! - the validated ledger index is past its `last_ledger_sequence`, or
//! - its account's sequence has moved past the transaction's sequence.
//!
//! Both facts are read *before* the lookup, so an inclusion they cover is
//! already visible to it.

use std::sync::Arc;

use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};
use xsettle_types::{
    EngineResult, Network, Result, SettlementError, SignedTransaction, SubmitDisposition,
    SubmitterConfig, TxHash, TxLookup,
};

use crate::backoff::BackoffPolicy;
use crate::ports::{LedgerClient, LedgerClientPool};

/// Final classification of one submission cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Validated with `tesSUCCESS`.
    Success { ledger_index: u32 },
    /// Provably never entered the ledger. A freshly signed transaction may
    /// be tried.
    RetryableFailure { reason: String },
    /// Rejected, validated with a failure code, or the retry budget ran
    /// out. Never retried.
    TerminalFailure {
        code: Option<EngineResult>,
        reason: String,
    },
    /// Finality could not be established in time. The transaction may
    /// still validate; re-query by hash later.
    Indeterminate,
}

impl SubmissionOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// What the submitter reports back to its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReport {
    pub tx_hash: TxHash,
    pub outcome: SubmissionOutcome,
    /// Submissions made in this cycle. `0` for a pure re-query.
    pub attempts: u32,
}

impl SubmissionReport {
    /// The error a definitive failure surfaces as. `None` for success and
    /// for an indeterminate outcome, which callers handle explicitly.
    #[must_use]
    pub fn failure(&self) -> Option<SettlementError> {
        match &self.outcome {
            SubmissionOutcome::RetryableFailure { reason } => Some(SettlementError::RetryableLedger {
                tx_hash: Some(self.tx_hash.clone()),
                reason: reason.clone(),
            }),
            SubmissionOutcome::TerminalFailure { code, reason } => {
                Some(SettlementError::TerminalLedger {
                    tx_hash: Some(self.tx_hash.clone()),
                    code: code.clone(),
                    reason: reason.clone(),
                })
            }
            SubmissionOutcome::Success { .. } | SubmissionOutcome::Indeterminate => None,
        }
    }
}

enum SubmitPhase {
    /// Accepted, or delivery is uncertain: finality decides.
    Accepted,
    /// Settled without needing a lookup.
    Done(SubmissionOutcome),
}

enum Probe {
    Final(SubmissionOutcome),
    Waiting,
}

/// Submits signed transactions and waits for validation.
pub struct ReliableSubmitter {
    pool: Arc<dyn LedgerClientPool>,
    config: SubmitterConfig,
    backoff: BackoffPolicy,
}

impl ReliableSubmitter {
    pub fn new(pool: Arc<dyn LedgerClientPool>, config: SubmitterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            backoff: BackoffPolicy::from_config(&config),
            pool,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &SubmitterConfig {
        &self.config
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<dyn LedgerClientPool> {
        &self.pool
    }

    /// Submit `tx` on `network` and wait for a final outcome.
    ///
    /// Returns `Err` only when no ledger client could be acquired; nothing
    /// was submitted in that case.
    pub async fn submit_and_wait(
        &self,
        tx: &SignedTransaction,
        network: &Network,
    ) -> Result<SubmissionReport> {
        let client = self.pool.acquire(network).await?;
        let (phase, attempts) = self.submit_phase(client.as_ref(), tx).await;
        let outcome = match phase {
            SubmitPhase::Done(outcome) => outcome,
            SubmitPhase::Accepted => self.await_finality(client.as_ref(), tx).await,
        };
        drop(client);
        Ok(self.report(tx, network, outcome, attempts))
    }

    /// Establish the outcome of a transaction submitted earlier, without
    /// submitting anything.
    pub async fn requery(
        &self,
        tx: &SignedTransaction,
        network: &Network,
    ) -> Result<SubmissionReport> {
        let client = self.pool.acquire(network).await?;
        let outcome = self.await_finality(client.as_ref(), tx).await;
        drop(client);
        Ok(self.report(tx, network, outcome, 0))
    }

    fn report(
        &self,
        tx: &SignedTransaction,
        network: &Network,
        outcome: SubmissionOutcome,
        attempts: u32,
    ) -> SubmissionReport {
        match &outcome {
            SubmissionOutcome::Success { ledger_index } => info!(
                tx_hash = %tx.hash,
                network = %network,
                ledger_index,
                attempts,
                "Transaction validated"
            ),
            SubmissionOutcome::RetryableFailure { reason } => warn!(
                tx_hash = %tx.hash,
                network = %network,
                attempts,
                reason = %reason,
                "Transaction never entered the ledger"
            ),
            SubmissionOutcome::TerminalFailure { code, reason } => warn!(
                tx_hash = %tx.hash,
                network = %network,
                attempts,
                code = ?code,
                reason = %reason,
                "Transaction failed terminally"
            ),
            SubmissionOutcome::Indeterminate => warn!(
                tx_hash = %tx.hash,
                network = %network,
                attempts,
                timeout_ms = self.config.finality_timeout_ms,
                "Transaction finality unknown"
            ),
        }
        SubmissionReport {
            tx_hash: tx.hash.clone(),
            outcome,
            attempts,
        }
    }

    // -------------------------------------------------------------------------
    // Submit phase
    // -------------------------------------------------------------------------

    async fn submit_phase(
        &self,
        client: &dyn LedgerClient,
        tx: &SignedTransaction,
    ) -> (SubmitPhase, u32) {
        let max = self.config.max_submit_attempts;
        let mut last_code: Option<EngineResult> = None;
        let mut delivery_uncertain = false;
        let mut attempts = 0;

        while attempts < max {
            attempts += 1;
            match client.submit(tx).await {
                Ok(response) => {
                    let code = response.engine_result;
                    match code.disposition() {
                        SubmitDisposition::AwaitValidation => {
                            debug!(tx_hash = %tx.hash, attempt = attempts, code = %code, "Submission accepted");
                            return (SubmitPhase::Accepted, attempts);
                        }
                        SubmitDisposition::Expired => {
                            return (
                                SubmitPhase::Done(SubmissionOutcome::RetryableFailure {
                                    reason: format!(
                                        "{code}: last ledger sequence {} has passed",
                                        tx.last_ledger_sequence
                                    ),
                                }),
                                attempts,
                            );
                        }
                        SubmitDisposition::Terminal => {
                            return (
                                SubmitPhase::Done(SubmissionOutcome::TerminalFailure {
                                    reason: format!("rejected at submission: {}", response.message),
                                    code: Some(code),
                                }),
                                attempts,
                            );
                        }
                        SubmitDisposition::Retryable => {
                            warn!(tx_hash = %tx.hash, attempt = attempts, code = %code, "Transient submission result");
                            last_code = Some(code);
                        }
                    }
                }
                Err(err) => {
                    warn!(tx_hash = %tx.hash, attempt = attempts, error = %err, "Submission transport error");
                    delivery_uncertain = true;
                }
            }
            if attempts < max {
                sleep(self.backoff.delay(attempts)).await;
            }
        }

        // A lost response may hide an accepted submission.
        if delivery_uncertain {
            return (SubmitPhase::Accepted, attempts);
        }
        (
            SubmitPhase::Done(SubmissionOutcome::TerminalFailure {
                code: last_code,
                reason: format!("retry budget exhausted after {attempts} attempts"),
            }),
            attempts,
        )
    }

    // -------------------------------------------------------------------------
    // Finality
    // -------------------------------------------------------------------------

    async fn await_finality(
        &self,
        client: &dyn LedgerClient,
        tx: &SignedTransaction,
    ) -> SubmissionOutcome {
        let deadline = Instant::now() + self.config.finality_timeout();
        loop {
            match Self::probe(client, tx).await {
                Ok(Probe::Final(outcome)) => return outcome,
                Ok(Probe::Waiting) => {}
                Err(err) => {
                    warn!(tx_hash = %tx.hash, error = %err, "Finality probe failed");
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return SubmissionOutcome::Indeterminate;
            }
            sleep(self.config.poll_interval().min(deadline - now)).await;
        }
    }

    async fn probe(client: &dyn LedgerClient, tx: &SignedTransaction) -> Result<Probe> {
        let validated_index = client.validated_ledger_index().await?;
        let next_sequence = client.account_sequence(&tx.account).await?;
        let probe = match client.lookup(&tx.hash).await? {
            TxLookup::Validated {
                engine_result,
                ledger_index,
            } => Probe::Final(if engine_result.is_success() {
                SubmissionOutcome::Success { ledger_index }
            } else {
                SubmissionOutcome::TerminalFailure {
                    reason: format!("validated in ledger {ledger_index} with {engine_result}"),
                    code: Some(engine_result),
                }
            }),
            TxLookup::Pending => Probe::Waiting,
            TxLookup::NotFound if validated_index > tx.last_ledger_sequence => {
                Probe::Final(SubmissionOutcome::RetryableFailure {
                    reason: format!(
                        "not in any ledger through {validated_index}; last ledger sequence {}",
                        tx.last_ledger_sequence
                    ),
                })
            }
            TxLookup::NotFound if next_sequence > tx.sequence => {
                Probe::Final(SubmissionOutcome::RetryableFailure {
                    reason: format!(
                        "sequence {} of {} consumed by another transaction",
                        tx.sequence, tx.account
                    ),
                })
            }
            TxLookup::NotFound => Probe::Waiting,
        };
        Ok(probe)
    }
}
