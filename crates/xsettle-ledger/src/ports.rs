//! # Outbound Ports
//!
//! Traits for the ledger network and the signing service. Implementations
//! talk to real infrastructure; [`crate::simulated`] provides in-process
//! stand-ins for tests.
//!
//! Transport failures are reported as
//! [`SettlementError::LedgerUnavailable`](xsettle_types::SettlementError::LedgerUnavailable).

use std::sync::Arc;

use async_trait::async_trait;
use xsettle_types::{
    AccountAddress, Network, ObservedPayment, PaymentMemo, Result, SignedTransaction,
    SubmitResponse, TransferInstruction, TxHash, TxLookup,
};

/// A connection to one ledger network.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    fn network(&self) -> &Network;

    /// Submit a signed blob and return the immediate engine result.
    async fn submit(&self, tx: &SignedTransaction) -> Result<SubmitResponse>;

    /// Current knowledge about a transaction hash.
    async fn lookup(&self, tx_hash: &TxHash) -> Result<TxLookup>;

    /// Index of the most recent validated ledger.
    async fn validated_ledger_index(&self) -> Result<u32>;

    /// Next sequence number the account will consume, as of the most recent
    /// validated ledger.
    async fn account_sequence(&self, account: &AccountAddress) -> Result<u32>;

    /// An inbound payment by transaction hash.
    async fn payment_by_hash(&self, tx_hash: &TxHash) -> Result<Option<ObservedPayment>>;

    /// The most recent payment into `destination` carrying `memo`.
    async fn find_payment(
        &self,
        destination: &AccountAddress,
        memo: &PaymentMemo,
    ) -> Result<Option<ObservedPayment>>;
}

/// A client checked out of a pool. Dropping it returns the connection.
pub type LedgerHandle = Arc<dyn LedgerClient>;

/// Hands out ledger clients per network.
#[async_trait]
pub trait LedgerClientPool: Send + Sync {
    async fn acquire(&self, network: &Network) -> Result<LedgerHandle>;
}

/// Signs transfer instructions. Key material never leaves the signer.
///
/// The signer fills in the account sequence and last ledger sequence from
/// `client`; callers only describe the transfer.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    async fn sign(
        &self,
        client: &dyn LedgerClient,
        instruction: &TransferInstruction,
    ) -> Result<SignedTransaction>;
}
