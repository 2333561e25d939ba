//! End-to-end tests: coordinator + memory store + simulated ledger.
//!
//! Covers commit idempotency, payment verification, settlement with its
//! compensation and re-query paths, and the mint cap under concurrency.

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use rust_decimal::Decimal;
use xsettle_coordinator::PurchaseCoordinator;
use xsettle_ledger::simulated::{LocalKeySigner, SimulatedLedger, SimulatedPool, SubmitStep};
use xsettle_ledger::{LedgerClientPool, ReliableSubmitter};
use xsettle_store::{CasOutcome, IssuanceRepository, MemoryStore, PurchaseRepository};
use xsettle_types::{
    AccountAddress, CommitRequest, CommitResponse, ConfirmRequest, CoordinatorConfig, Currency,
    EngineResult, Issuance, IssuanceAccounts, IssuanceRef, IssuanceStatus, Network, PendingMint,
    Purchase, PurchaseId, PurchaseIntent, PurchaseStatus, Result, SettlementError,
    SettlementResult, SignedTransaction, SubmitterConfig, TxHash,
};

// =============================================================================
// Fixtures
// =============================================================================

const NET: &str = "testnet";

fn net() -> Network {
    Network::new(NET)
}

fn dec(raw: &str) -> Decimal {
    raw.parse().unwrap()
}

fn gold_ref() -> IssuanceRef {
    IssuanceRef::new("gold")
}

fn buyer() -> AccountAddress {
    AccountAddress::new("addr1")
}

fn accounts() -> IssuanceAccounts {
    IssuanceAccounts {
        issuer: AccountAddress::new("rIssuer"),
        distribution: AccountAddress::new("rDist"),
        treasury: AccountAddress::new("rTreasury"),
    }
}

/// Gold priced at 10 XRP or 2.5 RLUSD per unit.
fn gold(max: &str, minted: &str, distribution: &str) -> Issuance {
    Issuance::new(gold_ref(), "GLD", net(), accounts(), dec(max))
        .with_minted(dec(minted), dec(distribution))
        .with_price(Currency::Xrp, dec("10"))
        .with_price(Currency::Rlusd, dec("2.5"))
}

fn config() -> CoordinatorConfig {
    CoordinatorConfig {
        submitter: SubmitterConfig {
            max_submit_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            backoff_jitter: false,
            poll_interval_ms: 1,
            finality_timeout_ms: 3_000,
        },
        settlement_deadline_ms: 10_000,
        max_settlement_rounds: 2,
        ..CoordinatorConfig::default()
    }
}

struct World {
    ledger: Arc<SimulatedLedger>,
    store: Arc<MemoryStore>,
    coordinator: Arc<PurchaseCoordinator>,
}

impl World {
    async fn new(issuance: Issuance, config: CoordinatorConfig) -> Self {
        Self::with_issuances(issuance, config, |store| store as Arc<dyn IssuanceRepository>).await
    }

    /// Like [`World::new`], with the coordinator's issuance repository
    /// wrapped around the shared store.
    async fn with_issuances(
        issuance: Issuance,
        config: CoordinatorConfig,
        wrap: impl FnOnce(Arc<MemoryStore>) -> Arc<dyn IssuanceRepository>,
    ) -> Self {
        let ledger = Arc::new(SimulatedLedger::new(net()));
        let pool: Arc<dyn LedgerClientPool> =
            Arc::new(SimulatedPool::new().with_ledger(Arc::clone(&ledger)));
        let submitter = Arc::new(ReliableSubmitter::new(pool, config.submitter.clone()).unwrap());
        let store = Arc::new(MemoryStore::new());
        store.insert_issuance(issuance).await.unwrap();
        let coordinator = PurchaseCoordinator::new(
            Arc::clone(&store) as Arc<dyn PurchaseRepository>,
            wrap(Arc::clone(&store)),
            submitter,
            Arc::new(LocalKeySigner::generate().with_last_ledger_offset(6)),
            config,
        )
        .unwrap();
        Self {
            ledger,
            store,
            coordinator: Arc::new(coordinator),
        }
    }

    async fn commit(&self, purchase_id: Option<&str>, quantity: &str) -> CommitResponse {
        self.coordinator
            .commit(&commit_request(purchase_id, quantity))
            .await
            .unwrap()
    }

    /// Pay exactly what the instructions ask, with the memo.
    fn pay(&self, committed: &CommitResponse) -> TxHash {
        let instr = &committed.payment_instructions;
        self.ledger.pay(
            &buyer(),
            &instr.destination,
            instr.currency,
            instr.amount,
            Some(instr.memo.clone()),
        )
    }

    async fn confirm(
        &self,
        committed: &CommitResponse,
        payment_tx_hash: Option<&TxHash>,
    ) -> Result<SettlementResult> {
        self.coordinator
            .confirm(&ConfirmRequest {
                purchase_id: committed.purchase_id.to_string(),
                payment_tx_hash: payment_tx_hash.map(ToString::to_string),
                network: NET.into(),
            })
            .await
    }

    async fn purchase(&self, id: &PurchaseId) -> Purchase {
        self.coordinator.load_purchase(id).await.unwrap()
    }

    async fn issuance(&self) -> Issuance {
        self.store.load_issuance(&gold_ref()).await.unwrap().unwrap()
    }

    fn deliveries(&self) -> usize {
        self.ledger.successful_from(&accounts().distribution)
    }
}

/// Issuance repository whose distribution debits always fail.
struct FailingDebits(Arc<MemoryStore>);

#[async_trait]
impl IssuanceRepository for FailingDebits {
    async fn insert_issuance(&self, issuance: Issuance) -> Result<()> {
        self.0.insert_issuance(issuance).await
    }

    async fn load_issuance(&self, issuance_ref: &IssuanceRef) -> Result<Option<Issuance>> {
        self.0.load_issuance(issuance_ref).await
    }

    async fn reserve_mint(&self, issuance_ref: &IssuanceRef, pending: PendingMint) -> Result<Issuance> {
        self.0.reserve_mint(issuance_ref, pending).await
    }

    async fn commit_mint(&self, issuance_ref: &IssuanceRef, tx_hash: &TxHash) -> Result<Issuance> {
        self.0.commit_mint(issuance_ref, tx_hash).await
    }

    async fn release_mint(&self, issuance_ref: &IssuanceRef, tx_hash: &TxHash) -> Result<Issuance> {
        self.0.release_mint(issuance_ref, tx_hash).await
    }

    async fn debit_distribution(&self, _: &IssuanceRef, _: Decimal) -> Result<Issuance> {
        Err(SettlementError::Store("write rejected".into()))
    }
}

fn commit_request(purchase_id: Option<&str>, quantity: &str) -> CommitRequest {
    CommitRequest {
        issuance_ref: "gold".into(),
        quantity: quantity.into(),
        quoted_price: "10".into(),
        currency: "XRP".into(),
        buyer_address: buyer().to_string(),
        purchase_id: purchase_id.map(Into::into),
        network: NET.into(),
    }
}

// =============================================================================
// Commit
// =============================================================================

#[tokio::test]
async fn commit_amount_is_quantity_times_price() {
    let w = World::new(gold("1000", "0", "0"), config()).await;
    let committed = w.commit(None, "50").await;
    let instr = &committed.payment_instructions;
    assert_eq!(instr.amount, dec("500"));
    assert_eq!(instr.currency, Currency::Xrp);
    assert_eq!(instr.destination, accounts().treasury);
    assert_eq!(instr.memo.purchase_id(), Some(committed.purchase_id.clone()));
}

#[tokio::test]
async fn commit_twice_with_same_key_creates_one_record() {
    let w = World::new(gold("1000", "0", "0"), config()).await;
    let first = w.commit(Some("order-42"), "50").await;
    let second = w.commit(Some("order-42"), "50").await;
    assert_eq!(first, second);
    let intended = w
        .store
        .list_by_status(PurchaseStatus::Intended)
        .await
        .unwrap();
    assert_eq!(intended.len(), 1);
}

#[tokio::test]
async fn commit_with_same_key_and_new_parameters_conflicts() {
    let w = World::new(gold("1000", "0", "0"), config()).await;
    w.commit(Some("order-42"), "50").await;
    let err = w
        .coordinator
        .commit(&commit_request(Some("order-42"), "51"))
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::IdempotencyConflict { .. }));
}

#[tokio::test]
async fn commit_rejects_unavailable_quantity() {
    let w = World::new(gold("1000", "800", "100"), config()).await;
    // 100 in distribution + 200 mintable headroom.
    w.commit(None, "300").await;
    let err = w
        .coordinator
        .commit(&commit_request(None, "301"))
        .await
        .unwrap_err();
    match err {
        SettlementError::Availability { available, .. } => assert_eq!(available, dec("300")),
        other => panic!("expected Availability, got {other:?}"),
    }
}

#[tokio::test]
async fn commit_requires_authorization_when_configured() {
    let gated = gold("0", "0", "0").with_authorized_holder(AccountAddress::new("someone-else"));
    let w = World::new(gated, config()).await;
    let err = w
        .coordinator
        .commit(&commit_request(None, "1"))
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::Authorization { .. }));
    assert!(w.store.list_by_status(PurchaseStatus::Intended).await.unwrap().is_empty());
}

#[tokio::test]
async fn commit_rejects_malformed_and_stale_input() {
    let w = World::new(gold("0", "0", "0"), config()).await;

    let mut stale = commit_request(None, "1");
    stale.quoted_price = "9.99".into();
    assert!(matches!(
        w.coordinator.commit(&stale).await,
        Err(SettlementError::Validation { .. })
    ));

    let mut float_like = commit_request(None, "1");
    float_like.quantity = "1e2".into();
    assert!(matches!(
        w.coordinator.commit(&float_like).await,
        Err(SettlementError::Validation { .. })
    ));

    let mut unknown = commit_request(None, "1");
    unknown.issuance_ref = "silver".into();
    assert!(matches!(
        w.coordinator.commit(&unknown).await,
        Err(SettlementError::IssuanceNotFound(_))
    ));
}

#[tokio::test]
async fn commit_rejects_closed_issuance() {
    let mut closed = gold("0", "0", "0");
    closed.status = IssuanceStatus::Closed;
    let w = World::new(closed, config()).await;
    assert!(matches!(
        w.coordinator.commit(&commit_request(None, "1")).await,
        Err(SettlementError::Availability { .. })
    ));
}

#[tokio::test]
async fn quote_prices_in_each_accepted_currency() {
    let w = World::new(gold("0", "0", "0"), config()).await;
    let q = w
        .coordinator
        .quote(&gold_ref(), dec("4"), Currency::Rlusd)
        .await
        .unwrap();
    assert_eq!(q.unit_price, dec("2.5"));
    assert_eq!(q.total, dec("10"));
    assert!(w
        .coordinator
        .quote(&gold_ref(), Decimal::ZERO, Currency::Xrp)
        .await
        .is_err());
}

#[tokio::test]
async fn oversized_amounts_are_rejected_without_panicking() {
    let w = World::new(gold("0", "0", "0"), config()).await;

    let err = w
        .coordinator
        .commit(&commit_request(None, "79228162514264337593543950335"))
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::Validation { .. }), "{err}");

    let intent = PurchaseIntent {
        purchase_id: None,
        issuance_ref: gold_ref(),
        quantity: Decimal::MAX,
        quoted_price: dec("10"),
        currency: Currency::Xrp,
        buyer_address: buyer(),
        network: net(),
    };
    assert!(matches!(
        w.coordinator.commit_intent(&intent).await,
        Err(SettlementError::Validation { .. })
    ));
    assert!(matches!(
        w.coordinator.quote(&gold_ref(), Decimal::MAX, Currency::Xrp).await,
        Err(SettlementError::Validation { .. })
    ));
    assert!(w.store.list_by_status(PurchaseStatus::Intended).await.unwrap().is_empty());
}

// =============================================================================
// Confirm: payment verification
// =============================================================================

#[tokio::test]
async fn confirm_without_payment_leaves_purchase_intended() {
    let w = World::new(gold("1000", "0", "0"), config()).await;
    let committed = w.commit(None, "50").await;
    let err = w.confirm(&committed, None).await.unwrap_err();
    assert!(matches!(err, SettlementError::PaymentNotFound { .. }));
    assert_eq!(
        w.purchase(&committed.purchase_id).await.status,
        PurchaseStatus::Intended
    );
    assert!(w.ledger.submissions().is_empty());
}

#[tokio::test]
async fn underpayment_is_a_mismatch() {
    let w = World::new(gold("1000", "0", "0"), config()).await;
    let committed = w.commit(None, "50").await;
    let instr = &committed.payment_instructions;
    let hash = w.ledger.pay(
        &buyer(),
        &instr.destination,
        instr.currency,
        dec("499.99"),
        Some(instr.memo.clone()),
    );
    let err = w.confirm(&committed, Some(&hash)).await.unwrap_err();
    assert!(matches!(err, SettlementError::PaymentMismatch { .. }));
    assert_eq!(
        w.purchase(&committed.purchase_id).await.status,
        PurchaseStatus::Intended
    );
}

#[tokio::test]
async fn one_payment_cannot_settle_two_purchases() {
    let w = World::new(gold("0", "0", "0"), config()).await;
    let first = w.commit(None, "5").await;
    let second = w.commit(None, "5").await;
    // Same amount, no memo: the hash alone identifies it.
    let hash = w.ledger.pay(
        &buyer(),
        &accounts().treasury,
        Currency::Xrp,
        dec("50"),
        None,
    );
    w.confirm(&first, Some(&hash)).await.unwrap();
    let err = w.confirm(&second, Some(&hash)).await.unwrap_err();
    assert!(matches!(err, SettlementError::PaymentAlreadyClaimed { .. }));
    assert_eq!(
        w.purchase(&second.purchase_id).await.status,
        PurchaseStatus::Intended
    );
}

// =============================================================================
// Confirm: settlement
// =============================================================================

#[tokio::test]
async fn happy_path_mints_shortfall_and_settles() {
    let w = World::new(gold("1000", "0", "0"), config()).await;
    let committed = w.commit(None, "50").await;
    let payment = w.pay(&committed);

    let result = w.confirm(&committed, None).await.unwrap();
    assert_eq!(result.status, PurchaseStatus::Settled);
    assert!(!result.requires_compensation);
    assert!(result.settlement_tx_hash.is_some());

    let purchase = w.purchase(&committed.purchase_id).await;
    assert_eq!(purchase.payment_tx_hash, Some(payment));
    let issuance = w.issuance().await;
    assert_eq!(issuance.total_minted, dec("50"));
    assert_eq!(issuance.distribution_balance, Decimal::ZERO);
    assert_eq!(issuance.status, IssuanceStatus::Minted);
    assert_eq!(w.deliveries(), 1);

    let body = serde_json::to_value(&result).unwrap();
    assert_eq!(body["status"], "SETTLED");
    assert_eq!(body["requiresCompensation"], false);
    assert!(body["settlementTxHash"].is_string());
}

#[tokio::test]
async fn confirm_after_settlement_is_idempotent() {
    let w = World::new(gold("1000", "0", "100"), config()).await;
    let committed = w.commit(None, "50").await;
    w.pay(&committed);

    let first = w.confirm(&committed, None).await.unwrap();
    let submissions = w.ledger.submissions().len();
    let second = w.confirm(&committed, None).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.settlement_tx_hash, second.settlement_tx_hash);
    assert_eq!(w.ledger.submissions().len(), submissions);
    assert_eq!(w.deliveries(), 1);
    assert_eq!(w.issuance().await.distribution_balance, dec("50"));
}

#[tokio::test]
async fn rejected_delivery_requires_compensation() {
    let w = World::new(gold("0", "0", "100"), config()).await;
    let committed = w.commit(None, "10").await;
    w.pay(&committed);
    w.ledger
        .script_submits([SubmitStep::Respond(EngineResult::parse("temBAD_AMOUNT"))]);

    let err = w.confirm(&committed, None).await.unwrap_err();
    assert!(err.requires_compensation(), "{err}");
    let body = SettlementResult::from_error(&err).unwrap();
    assert!(body.requires_compensation);

    let purchase = w.purchase(&committed.purchase_id).await;
    assert_eq!(purchase.status, PurchaseStatus::CompensationRequired);
    assert_eq!(w.issuance().await.distribution_balance, dec("100"));

    // Re-confirming keeps signalling and never resubmits.
    let submissions = w.ledger.submissions().len();
    let again = w.confirm(&committed, None).await.unwrap_err();
    assert!(again.requires_compensation());
    assert_eq!(w.ledger.submissions().len(), submissions);

    let pending = w.coordinator.pending_compensations().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, committed.purchase_id);
}

#[tokio::test]
async fn exhausted_retry_budget_surfaces_terminal_and_compensates() {
    let w = World::new(gold("0", "0", "100"), config()).await;
    let committed = w.commit(None, "10").await;
    w.pay(&committed);
    w.ledger.script_submits(std::iter::repeat_n(
        SubmitStep::Respond(EngineResult::parse("telCAN_NOT_QUEUE")),
        3,
    ));

    let err = w.confirm(&committed, None).await.unwrap_err();
    assert!(matches!(err, SettlementError::CompensationRequired { .. }));
    assert_eq!(w.ledger.submissions().len(), 3);
    let purchase = w.purchase(&committed.purchase_id).await;
    assert_eq!(purchase.status, PurchaseStatus::CompensationRequired);
    let reason = purchase.failure_reason.unwrap();
    assert!(reason.contains("XS_ERR_501"), "{reason}");
}

#[tokio::test]
async fn validated_failure_requires_compensation() {
    let w = World::new(gold("0", "0", "100"), config()).await;
    let committed = w.commit(None, "10").await;
    w.pay(&committed);
    w.ledger.script_outcomes([EngineResult::parse("tecPATH_PARTIAL")]);

    let err = w.confirm(&committed, None).await.unwrap_err();
    assert!(err.requires_compensation());
    assert_eq!(w.deliveries(), 0);
}

#[tokio::test]
async fn lost_delivery_is_replaced_once_proven_absent() {
    let w = World::new(gold("0", "0", "100"), config()).await;
    let committed = w.commit(None, "10").await;
    w.pay(&committed);
    w.ledger.script_submits([SubmitStep::Lose]);

    let result = w.confirm(&committed, None).await.unwrap();
    assert_eq!(result.status, PurchaseStatus::Settled);
    let submitted = w.ledger.submissions();
    assert_eq!(submitted.len(), 2);
    assert_ne!(submitted[0], submitted[1]);
    assert_eq!(result.settlement_tx_hash.as_ref(), Some(&submitted[1]));
    assert_eq!(w.deliveries(), 1);
}

#[tokio::test]
async fn replacement_rounds_are_bounded() {
    let w = World::new(gold("0", "0", "100"), config()).await;
    let committed = w.commit(None, "10").await;
    w.pay(&committed);
    w.ledger.script_submits([SubmitStep::Lose, SubmitStep::Lose]);

    let err = w.confirm(&committed, None).await.unwrap_err();
    assert!(err.requires_compensation());
    assert_eq!(w.ledger.submissions().len(), 2);
    assert_eq!(w.deliveries(), 0);
}

#[tokio::test]
async fn unknown_finality_stays_paid_then_resolves_by_requery() {
    let mut cfg = config();
    cfg.submitter.finality_timeout_ms = 30;
    let w = World::new(gold("0", "0", "100"), cfg).await;
    let committed = w.commit(None, "10").await;
    w.pay(&committed);
    w.ledger.set_auto_close(false);

    let pending = w.confirm(&committed, None).await.unwrap();
    assert_eq!(pending.status, PurchaseStatus::Paid);
    let recorded = pending.settlement_tx_hash.clone().unwrap();

    w.ledger.set_auto_close(true);
    let settled = w.confirm(&committed, None).await.unwrap();
    assert_eq!(settled.status, PurchaseStatus::Settled);
    assert_eq!(settled.settlement_tx_hash, Some(recorded));
    assert_eq!(w.ledger.submissions().len(), 1);
    assert_eq!(w.deliveries(), 1);
}

#[tokio::test]
async fn settlement_deadline_leaves_purchase_paid() {
    let mut cfg = config();
    cfg.settlement_deadline_ms = 25;
    let w = World::new(gold("0", "0", "100"), cfg).await;
    let committed = w.commit(None, "10").await;
    w.pay(&committed);
    w.ledger.set_auto_close(false);

    let result = w.confirm(&committed, None).await.unwrap();
    assert_eq!(result.status, PurchaseStatus::Paid);
    assert_eq!(
        w.purchase(&committed.purchase_id).await.status,
        PurchaseStatus::Paid
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_confirms_deliver_once() {
    let w = World::new(gold("0", "0", "100"), config()).await;
    let committed = w.commit(None, "10").await;
    w.pay(&committed);

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let coordinator = Arc::clone(&w.coordinator);
        let request = ConfirmRequest {
            purchase_id: committed.purchase_id.to_string(),
            payment_tx_hash: None,
            network: NET.into(),
        };
        tasks.push(tokio::spawn(async move { coordinator.confirm(&request).await }));
    }
    for task in tasks {
        let result = task.await.unwrap().unwrap();
        assert!(matches!(
            result.status,
            PurchaseStatus::Paid | PurchaseStatus::Settled
        ));
    }

    let settled = w.confirm(&committed, None).await.unwrap();
    assert_eq!(settled.status, PurchaseStatus::Settled);
    assert_eq!(w.deliveries(), 1);
    assert_eq!(w.issuance().await.distribution_balance, dec("90"));
}

#[tokio::test]
async fn exhausted_supply_at_delivery_requires_compensation() {
    let w = World::new(gold("100", "0", "0"), config()).await;
    let committed = w.commit(None, "60").await;
    w.pay(&committed);
    // The headroom is minted and sold elsewhere before the buyer confirms.
    w.coordinator
        .supply()
        .mint_to_distribution(&gold_ref(), dec("100"))
        .await
        .unwrap();
    w.store
        .debit_distribution(&gold_ref(), dec("100"))
        .await
        .unwrap();

    let err = w.confirm(&committed, None).await.unwrap_err();
    assert!(err.requires_compensation(), "{err}");
    assert_eq!(w.issuance().await.total_minted, dec("100"));
}

#[tokio::test]
async fn deadline_during_shortfall_mint_never_mints_twice() {
    let mut cfg = config();
    cfg.settlement_deadline_ms = 25;
    let w = World::new(gold("100", "0", "0"), cfg).await;
    let committed = w.commit(None, "10").await;
    w.pay(&committed);
    w.ledger.set_auto_close(false);

    // The deadline cuts the shortfall mint off after it was submitted.
    let first = w.confirm(&committed, None).await.unwrap();
    assert_eq!(first.status, PurchaseStatus::Paid);
    let issuance = w.issuance().await;
    assert_eq!(issuance.reserved_amount(), dec("10"));
    assert_eq!(issuance.total_minted, Decimal::ZERO);

    w.ledger.set_auto_close(true);
    let mut settled = false;
    for _ in 0..20 {
        match w.confirm(&committed, None).await {
            Ok(result) if result.status == PurchaseStatus::Settled => {
                settled = true;
                break;
            }
            Ok(result) => assert_eq!(result.status, PurchaseStatus::Paid),
            Err(SettlementError::MintPending { .. }) => {}
            Err(other) => panic!("unexpected confirm error: {other}"),
        }
    }
    assert!(settled, "purchase never settled");

    let issuance = w.issuance().await;
    assert_eq!(w.ledger.successful_from(&accounts().issuer), 1);
    assert_eq!(issuance.total_minted, dec("10"));
    assert!(issuance.pending_mints.is_empty());
    assert_eq!(issuance.distribution_balance, Decimal::ZERO);
    assert_eq!(w.deliveries(), 1);
}

#[tokio::test]
async fn replacement_rounds_are_counted_across_confirms() {
    let mut cfg = config();
    cfg.submitter.finality_timeout_ms = 30;
    let w = World::new(gold("0", "0", "100"), cfg).await;
    let committed = w.commit(None, "10").await;
    w.pay(&committed);
    w.ledger.set_auto_close(false);
    w.ledger.script_submits([SubmitStep::Lose]);

    let pending = w.confirm(&committed, None).await.unwrap();
    assert_eq!(pending.status, PurchaseStatus::Paid);
    let lost = pending.settlement_tx_hash.unwrap();

    // An earlier confirm already spent the second round on a replacement
    // that never reached the ledger either.
    let replacement = SignedTransaction {
        hash: TxHash::new("5EC0AD"),
        blob: b"never submitted".to_vec(),
        account: accounts().distribution,
        sequence: 1,
        last_ledger_sequence: w.ledger.validated_index() + 1,
    };
    let claimed = w
        .store
        .claim_settlement(&committed.purchase_id, Some(&lost), replacement)
        .await
        .unwrap();
    assert!(matches!(claimed, CasOutcome::Applied(ref p) if p.settlement_rounds == 2));

    w.ledger.set_auto_close(true);
    let err = w.confirm(&committed, None).await.unwrap_err();
    assert!(err.requires_compensation(), "{err}");
    assert_eq!(w.ledger.submissions().len(), 1);
    assert_eq!(w.deliveries(), 0);
}

#[tokio::test]
async fn failed_distribution_debit_does_not_undo_settlement() {
    let w = World::with_issuances(gold("0", "0", "100"), config(), |store| {
        Arc::new(FailingDebits(store)) as Arc<dyn IssuanceRepository>
    })
    .await;
    let committed = w.commit(None, "10").await;
    w.pay(&committed);

    let result = w.confirm(&committed, None).await.unwrap();
    assert_eq!(result.status, PurchaseStatus::Settled);
    assert_eq!(w.deliveries(), 1);
    // The stored balance overstates the ledger until reconciled.
    assert_eq!(w.issuance().await.distribution_balance, dec("100"));

    let again = w.confirm(&committed, None).await.unwrap();
    assert_eq!(again, result);
    assert_eq!(w.deliveries(), 1);
}

// =============================================================================
// Operator actions
// =============================================================================

#[tokio::test]
async fn compensation_is_recorded_once() {
    let w = World::new(gold("0", "0", "100"), config()).await;
    let committed = w.commit(None, "10").await;
    w.pay(&committed);
    w.ledger
        .script_submits([SubmitStep::Respond(EngineResult::parse("tefBAD_AUTH"))]);
    w.confirm(&committed, None).await.unwrap_err();

    let refund = TxHash::new("ABCDEF");
    let compensated = w
        .coordinator
        .record_compensation(&committed.purchase_id, refund.clone())
        .await
        .unwrap();
    assert_eq!(compensated.status, PurchaseStatus::Compensated);
    assert_eq!(compensated.compensation_tx_hash, Some(refund.clone()));

    // Same refund again is a no-op; a different one is refused.
    w.coordinator
        .record_compensation(&committed.purchase_id, refund)
        .await
        .unwrap();
    assert!(matches!(
        w.coordinator
            .record_compensation(&committed.purchase_id, TxHash::new("FF"))
            .await,
        Err(SettlementError::InvalidTransition { .. })
    ));

    let result = w.confirm(&committed, None).await.unwrap();
    assert_eq!(result.status, PurchaseStatus::Compensated);
    assert!(w.coordinator.pending_compensations().await.unwrap().is_empty());
}

#[tokio::test]
async fn compensation_requires_a_failed_delivery() {
    let w = World::new(gold("0", "0", "0"), config()).await;
    let committed = w.commit(None, "1").await;
    assert!(matches!(
        w.coordinator
            .record_compensation(&committed.purchase_id, TxHash::new("AA"))
            .await,
        Err(SettlementError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn abandoned_purchase_cannot_be_confirmed() {
    let w = World::new(gold("0", "0", "0"), config()).await;
    let committed = w.commit(None, "1").await;
    let failed = w
        .coordinator
        .abandon(&committed.purchase_id, "buyer walked away")
        .await
        .unwrap();
    assert_eq!(failed.status, PurchaseStatus::Failed);

    w.pay(&committed);
    assert!(matches!(
        w.confirm(&committed, None).await,
        Err(SettlementError::InvalidTransition { .. })
    ));
    assert!(w.ledger.submissions().is_empty());
}

// =============================================================================
// Supply
// =============================================================================

#[tokio::test]
async fn cap_scenario_from_eight_hundred() {
    let w = World::new(gold("1000", "800", "0"), config()).await;
    let supply = w.coordinator.supply();

    let err = supply
        .mint_to_distribution(&gold_ref(), dec("300"))
        .await
        .unwrap_err();
    match err {
        SettlementError::CapExceeded {
            maximum_amount,
            total_minted,
            attempted_amount,
            ..
        } => {
            assert_eq!(maximum_amount, dec("1000"));
            assert_eq!(total_minted, dec("800"));
            assert_eq!(attempted_amount, dec("300"));
        }
        other => panic!("expected CapExceeded, got {other:?}"),
    }
    assert_eq!(w.issuance().await.total_minted, dec("800"));

    let minted = supply
        .mint_to_distribution(&gold_ref(), dec("200"))
        .await
        .unwrap();
    assert_eq!(minted.total_minted, dec("1000"));
    assert_eq!(minted.status, IssuanceStatus::Minted);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_mints_never_exceed_cap() {
    let w = World::new(gold("1000", "0", "0"), config()).await;
    let amounts: Vec<Decimal> = {
        let mut rng = rand::thread_rng();
        (0..32)
            .map(|_| Decimal::new(rng.gen_range(1..=12_000), 2))
            .collect()
    };

    let mut tasks = Vec::new();
    for amount in amounts {
        let coordinator = Arc::clone(&w.coordinator);
        tasks.push(tokio::spawn(async move {
            let res = coordinator
                .supply()
                .mint_to_distribution(&gold_ref(), amount)
                .await;
            (amount, res)
        }));
    }

    let mut applied = Decimal::ZERO;
    let mut successes = 0;
    for task in tasks {
        let (amount, res) = task.await.unwrap();
        match res {
            Ok(_) => {
                applied += amount;
                successes += 1;
            }
            Err(
                SettlementError::CapExceeded { .. }
                | SettlementError::RetryableLedger { .. }
                | SettlementError::TerminalLedger { .. },
            ) => {}
            Err(other) => panic!("unexpected mint error: {other}"),
        }
    }

    let issuance = w.issuance().await;
    assert!(applied <= dec("1000"), "over-minted: {applied}");
    assert_eq!(issuance.total_minted, applied);
    assert_eq!(issuance.distribution_balance, applied);
    assert_eq!(issuance.reserved_amount(), Decimal::ZERO);
    assert_eq!(w.ledger.successful_from(&accounts().issuer), successes);
}
