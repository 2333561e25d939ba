//! In-process ledger, client pool and signer.
//!
//! [`SimulatedLedger`] models just enough of a validating ledger to drive
//! the submitter through every outcome: scripted submit responses, lost
//! submissions, transport failures, validation delays, per-account
//! sequences and `last_ledger_sequence` expiry.
//!
//! With `auto_close` on (the default) every call to
//! [`LedgerClient::validated_ledger_index`] closes one ledger, so a poll
//! loop advances the chain by itself.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use xsettle_types::{
    AccountAddress, Currency, EngineResult, Network, ObservedPayment, PaymentMemo, Result,
    SettlementError, SignedTransaction, SubmitDisposition, SubmitResponse, TransferInstruction,
    TxHash, TxLookup, constants,
};

use crate::ports::{LedgerClient, LedgerClientPool, LedgerHandle, TransactionSigner};

/// How the simulated ledger reacts to the next submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitStep {
    /// Respond with this engine result. Accepting codes enqueue the
    /// transaction for validation.
    Respond(EngineResult),
    /// Fail at the transport level; nothing reaches the ledger.
    TransportError,
    /// Respond `tesSUCCESS` but lose the transaction: it never validates.
    Lose,
}

#[derive(Debug, Clone)]
struct InFlight {
    tx: SignedTransaction,
    ready_at: u32,
    result: EngineResult,
}

#[derive(Debug)]
struct LedgerState {
    validated_index: u32,
    auto_close: bool,
    validation_delay: u32,
    next_sequence: HashMap<AccountAddress, u32>,
    in_flight: Vec<InFlight>,
    validated: HashMap<TxHash, (EngineResult, u32)>,
    validated_order: Vec<TxHash>,
    submit_script: VecDeque<SubmitStep>,
    outcome_script: VecDeque<EngineResult>,
    submissions: Vec<TxHash>,
    submitted_by: HashMap<TxHash, AccountAddress>,
    payments: Vec<ObservedPayment>,
    lookup_failures: u32,
    payment_counter: u64,
}

impl LedgerState {
    fn next_sequence(&self, account: &AccountAddress) -> u32 {
        self.next_sequence.get(account).copied().unwrap_or(1)
    }

    fn close_ledger(&mut self) {
        self.validated_index += 1;
        let index = self.validated_index;
        // Apply ready transactions in sequence order per account.
        while let Some(pos) = self.in_flight.iter().position(|f| {
            f.ready_at <= index
                && f.tx.last_ledger_sequence >= index
                && f.tx.sequence == self.next_sequence(&f.tx.account)
        }) {
            let applied = self.in_flight.remove(pos);
            self.next_sequence
                .insert(applied.tx.account.clone(), applied.tx.sequence + 1);
            self.validated_order.push(applied.tx.hash.clone());
            self.validated
                .insert(applied.tx.hash, (applied.result, index));
        }
        let next_sequence = &self.next_sequence;
        self.in_flight.retain(|f| {
            f.tx.last_ledger_sequence > index
                && f.tx.sequence >= next_sequence.get(&f.tx.account).copied().unwrap_or(1)
        });
    }

    fn knows(&self, hash: &TxHash) -> bool {
        self.validated.contains_key(hash) || self.in_flight.iter().any(|f| &f.tx.hash == hash)
    }
}

/// An in-memory ledger network.
#[derive(Debug)]
pub struct SimulatedLedger {
    network: Network,
    state: Mutex<LedgerState>,
}

impl SimulatedLedger {
    #[must_use]
    pub fn new(network: Network) -> Self {
        Self {
            network,
            state: Mutex::new(LedgerState {
                validated_index: 1,
                auto_close: true,
                validation_delay: 1,
                next_sequence: HashMap::new(),
                in_flight: Vec::new(),
                validated: HashMap::new(),
                validated_order: Vec::new(),
                submit_script: VecDeque::new(),
                outcome_script: VecDeque::new(),
                submissions: Vec::new(),
                submitted_by: HashMap::new(),
                payments: Vec::new(),
                lookup_failures: 0,
                payment_counter: 0,
            }),
        }
    }

    /// Ledgers that must close after acceptance before a transaction
    /// validates. Minimum 1.
    #[must_use]
    pub fn with_validation_delay(self, ledgers: u32) -> Self {
        self.state.lock().validation_delay = ledgers.max(1);
        self
    }

    /// Stop (or resume) closing a ledger on every index query.
    pub fn set_auto_close(&self, enabled: bool) {
        self.state.lock().auto_close = enabled;
    }

    pub fn close_ledgers(&self, count: u32) {
        let mut state = self.state.lock();
        for _ in 0..count {
            state.close_ledger();
        }
    }

    /// Queue reactions for the next submissions, in order. Unscripted
    /// submissions respond `tesSUCCESS`.
    pub fn script_submits(&self, steps: impl IntoIterator<Item = SubmitStep>) {
        self.state.lock().submit_script.extend(steps);
    }

    /// Queue validated results for the next accepted transactions.
    /// Unscripted transactions validate with `tesSUCCESS`.
    pub fn script_outcomes(&self, results: impl IntoIterator<Item = EngineResult>) {
        self.state.lock().outcome_script.extend(results);
    }

    /// Fail the next `count` lookups at the transport level.
    pub fn fail_lookups(&self, count: u32) {
        self.state.lock().lookup_failures = count;
    }

    pub fn set_account_sequence(&self, account: &AccountAddress, next: u32) {
        self.state.lock().next_sequence.insert(account.clone(), next);
    }

    /// Record an arbitrary observed payment.
    pub fn record_payment(&self, payment: ObservedPayment) {
        self.state.lock().payments.push(payment);
    }

    /// Record a validated, successful payment and return its hash.
    pub fn pay(
        &self,
        source: &AccountAddress,
        destination: &AccountAddress,
        currency: Currency,
        amount: Decimal,
        memo: Option<PaymentMemo>,
    ) -> TxHash {
        let mut state = self.state.lock();
        state.payment_counter += 1;
        let tx_hash = TxHash::of_blob(
            format!("payment:{}:{source}:{amount}", state.payment_counter).as_bytes(),
        );
        state.payments.push(ObservedPayment {
            tx_hash: tx_hash.clone(),
            source: source.clone(),
            destination: destination.clone(),
            currency_code: currency.code().to_string(),
            amount,
            memo,
            validated_result: Some(EngineResult::Success),
        });
        tx_hash
    }

    #[must_use]
    pub fn validated_index(&self) -> u32 {
        self.state.lock().validated_index
    }

    /// Hashes of every submission received, duplicates included.
    #[must_use]
    pub fn submissions(&self) -> Vec<TxHash> {
        self.state.lock().submissions.clone()
    }

    /// Validated transactions in ledger order.
    #[must_use]
    pub fn validated_transactions(&self) -> Vec<(TxHash, EngineResult)> {
        let state = self.state.lock();
        state
            .validated_order
            .iter()
            .filter_map(|h| state.validated.get(h).map(|(r, _)| (h.clone(), r.clone())))
            .collect()
    }

    /// Number of transactions from `account` that validated with
    /// `tesSUCCESS`.
    #[must_use]
    pub fn successful_from(&self, account: &AccountAddress) -> usize {
        let state = self.state.lock();
        state
            .validated_order
            .iter()
            .filter(|h| state.submitted_by.get(*h) == Some(account))
            .filter(|h| state.validated.get(*h).is_some_and(|(r, _)| r.is_success()))
            .count()
    }

    fn unavailable(&self, reason: &str) -> SettlementError {
        SettlementError::LedgerUnavailable {
            network: self.network.clone(),
            reason: reason.to_string(),
        }
    }

    fn respond(engine_result: EngineResult) -> SubmitResponse {
        SubmitResponse {
            message: format!("simulated {engine_result}"),
            engine_result,
        }
    }
}

#[async_trait]
impl LedgerClient for SimulatedLedger {
    fn network(&self) -> &Network {
        &self.network
    }

    async fn submit(&self, tx: &SignedTransaction) -> Result<SubmitResponse> {
        let mut state = self.state.lock();
        state.submissions.push(tx.hash.clone());
        let step = state
            .submit_script
            .pop_front()
            .unwrap_or(SubmitStep::Respond(EngineResult::Success));
        let scripted = match step {
            SubmitStep::TransportError => return Err(self.unavailable("connection reset")),
            SubmitStep::Lose => return Ok(Self::respond(EngineResult::Success)),
            SubmitStep::Respond(result) => result,
        };
        if scripted.disposition() != SubmitDisposition::AwaitValidation {
            return Ok(Self::respond(scripted));
        }
        if state.knows(&tx.hash) {
            return Ok(Self::respond(EngineResult::AlreadyApplied));
        }
        if tx.sequence < state.next_sequence(&tx.account) {
            return Ok(Self::respond(EngineResult::PastSequence));
        }
        if tx.last_ledger_sequence <= state.validated_index {
            return Ok(Self::respond(EngineResult::MaxLedger));
        }
        let result = match &scripted {
            EngineResult::Claimed(_) => scripted.clone(),
            _ => state
                .outcome_script
                .pop_front()
                .unwrap_or(EngineResult::Success),
        };
        let ready_at = state.validated_index + state.validation_delay;
        state.submitted_by.insert(tx.hash.clone(), tx.account.clone());
        state.in_flight.push(InFlight {
            tx: tx.clone(),
            ready_at,
            result,
        });
        Ok(Self::respond(scripted))
    }

    async fn lookup(&self, tx_hash: &TxHash) -> Result<TxLookup> {
        let mut state = self.state.lock();
        if state.lookup_failures > 0 {
            state.lookup_failures -= 1;
            return Err(self.unavailable("lookup timed out"));
        }
        if let Some((engine_result, ledger_index)) = state.validated.get(tx_hash) {
            return Ok(TxLookup::Validated {
                engine_result: engine_result.clone(),
                ledger_index: *ledger_index,
            });
        }
        if state.in_flight.iter().any(|f| &f.tx.hash == tx_hash) {
            return Ok(TxLookup::Pending);
        }
        Ok(TxLookup::NotFound)
    }

    async fn validated_ledger_index(&self) -> Result<u32> {
        let mut state = self.state.lock();
        if state.auto_close {
            state.close_ledger();
        }
        Ok(state.validated_index)
    }

    async fn account_sequence(&self, account: &AccountAddress) -> Result<u32> {
        Ok(self.state.lock().next_sequence(account))
    }

    async fn payment_by_hash(&self, tx_hash: &TxHash) -> Result<Option<ObservedPayment>> {
        Ok(self
            .state
            .lock()
            .payments
            .iter()
            .find(|p| &p.tx_hash == tx_hash)
            .cloned())
    }

    async fn find_payment(
        &self,
        destination: &AccountAddress,
        memo: &PaymentMemo,
    ) -> Result<Option<ObservedPayment>> {
        Ok(self
            .state
            .lock()
            .payments
            .iter()
            .rev()
            .find(|p| &p.destination == destination && p.memo.as_ref() == Some(memo))
            .cloned())
    }
}

// =============================================================================
// Pool
// =============================================================================

/// Pool over a fixed set of simulated ledgers.
#[derive(Debug, Default)]
pub struct SimulatedPool {
    ledgers: HashMap<Network, Arc<SimulatedLedger>>,
    offline: Mutex<HashSet<Network>>,
}

impl SimulatedPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<SimulatedLedger>) -> Self {
        self.ledgers.insert(ledger.network.clone(), ledger);
        self
    }

    /// Make `acquire` fail for `network`.
    pub fn set_offline(&self, network: &Network, offline: bool) {
        let mut set = self.offline.lock();
        if offline {
            set.insert(network.clone());
        } else {
            set.remove(network);
        }
    }
}

#[async_trait]
impl LedgerClientPool for SimulatedPool {
    async fn acquire(&self, network: &Network) -> Result<LedgerHandle> {
        if self.offline.lock().contains(network) {
            return Err(SettlementError::LedgerUnavailable {
                network: network.clone(),
                reason: "no healthy client".into(),
            });
        }
        let ledger = self
            .ledgers
            .get(network)
            .ok_or_else(|| SettlementError::LedgerUnavailable {
                network: network.clone(),
                reason: "unknown network".into(),
            })?;
        Ok(Arc::clone(ledger) as LedgerHandle)
    }
}

// =============================================================================
// Signer
// =============================================================================

#[derive(Serialize)]
struct SigningPayload<'a> {
    instruction: &'a TransferInstruction,
    sequence: u32,
    last_ledger_sequence: u32,
    public_key: String,
}

/// Signs with an in-memory ed25519 key. Sequence is taken from the ledger
/// at signing time; `last_ledger_sequence` is the validated index plus a
/// fixed offset.
pub struct LocalKeySigner {
    key: SigningKey,
    last_ledger_offset: u32,
}

impl LocalKeySigner {
    #[must_use]
    pub fn generate() -> Self {
        Self {
            key: SigningKey::generate(&mut rand::rngs::OsRng),
            last_ledger_offset: constants::DEFAULT_LAST_LEDGER_OFFSET,
        }
    }

    #[must_use]
    pub fn with_last_ledger_offset(mut self, offset: u32) -> Self {
        self.last_ledger_offset = offset;
        self
    }
}

#[async_trait]
impl TransactionSigner for LocalKeySigner {
    async fn sign(
        &self,
        client: &dyn LedgerClient,
        instruction: &TransferInstruction,
    ) -> Result<SignedTransaction> {
        let sequence = client.account_sequence(&instruction.source).await?;
        let last_ledger_sequence =
            client.validated_ledger_index().await? + self.last_ledger_offset;
        let payload = serde_json::to_vec(&SigningPayload {
            instruction,
            sequence,
            last_ledger_sequence,
            public_key: hex::encode_upper(self.key.verifying_key().as_bytes()),
        })?;
        let signature = self.key.sign(&payload);
        let mut blob = payload;
        blob.extend_from_slice(&signature.to_bytes());
        Ok(SignedTransaction {
            hash: TxHash::of_blob(&blob),
            blob,
            account: instruction.source.clone(),
            sequence,
            last_ledger_sequence,
        })
    }
}
