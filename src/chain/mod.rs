//! Chain service facade
//!
//! Typed read access to the on-chain registries plus transaction
//! settlement lookups. The two mutations the SDK needs (data set
//! creation, piece addition) are relayed through this facade, which
//! answers with the transaction hash; the SDK never signs transactions
//! itself.

pub mod mock;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::config::TimingConfig;
use crate::error::{Result, SdkError};
use crate::piece::PieceCid;
use crate::types::{
    Address, ChainHead, CreateDataSetRequest, DataSetInfo, ProviderInfo, ProvingSchedule,
    TxHash, TxReceipt, TxStatus, TxSubmission,
};

/// Fixed epoch duration of the settlement chain
pub const EPOCH_DURATION: Duration = Duration::from_secs(30);

/// Read-only view of the chain state the SDK depends on
#[async_trait]
pub trait ChainService: Send + Sync {
    /// Look up one data set record
    async fn get_data_set(&self, data_set_id: u64) -> Result<Option<DataSetInfo>>;

    /// All data sets paid for by `client`
    async fn get_client_data_sets(&self, client: &Address) -> Result<Vec<DataSetInfo>>;

    /// Metadata recorded on a data set
    async fn get_data_set_metadata(
        &self,
        data_set_id: u64,
    ) -> Result<Option<HashMap<String, String>>>;

    /// Every provider currently approved in the registry
    async fn get_approved_providers(&self) -> Result<Vec<ProviderInfo>>;

    /// Registry entry by id
    async fn get_provider_by_id(&self, provider_id: u64) -> Result<Option<ProviderInfo>>;

    /// Registry entry by operator address
    async fn get_provider_by_address(&self, address: &Address) -> Result<Option<ProviderInfo>>;

    /// True while the provider remains approved
    async fn is_provider_approved(&self, provider_id: u64) -> Result<bool>;

    /// Current chain head
    async fn get_chain_head(&self) -> Result<ChainHead>;

    /// Proving schedule shared by every data set
    async fn get_proving_schedule(&self) -> Result<ProvingSchedule>;

    /// Relay a data set creation on chain
    async fn create_data_set(&self, request: CreateDataSetRequest) -> Result<TxSubmission>;

    /// Relay a piece addition on chain, carrying the client-scoped sequence
    async fn add_pieces(
        &self,
        data_set_id: u64,
        client_seq: u64,
        piece_cids: &[PieceCid],
    ) -> Result<TxSubmission>;

    /// Receipt for a settled transaction, `None` while unknown
    async fn get_transaction(&self, tx_hash: &TxHash) -> Result<Option<TxReceipt>>;

    /// Payments sub-surface, when the connected service exposes one
    fn payments(&self) -> Option<&dyn PaymentsService> {
        None
    }
}

/// Optional payments surface used by upload preflight
#[async_trait]
pub trait PaymentsService: Send + Sync {
    /// Funds the client has deposited
    async fn available_funds(&self, client: &Address) -> Result<u128>;

    /// Per-epoch rate the client has authorized
    async fn rate_allowance(&self, client: &Address) -> Result<u128>;

    /// Lockup total the client has authorized
    async fn lockup_allowance(&self, client: &Address) -> Result<u128>;
}

/// Poll the chain for a receipt until the transaction settles
///
/// Resolves as soon as the receipt leaves `Pending`. Times out with
/// [`SdkError::OnChainConfirmation`] after `timing.tx_timeout`.
pub async fn wait_for_transaction(
    chain: &dyn ChainService,
    tx_hash: &TxHash,
    timing: &TimingConfig,
) -> Result<TxReceipt> {
    let deadline = Instant::now() + timing.tx_timeout;
    loop {
        if let Some(receipt) = chain.get_transaction(tx_hash).await? {
            if receipt.status != TxStatus::Pending {
                debug!(tx_hash = %tx_hash, status = ?receipt.status, "Transaction settled");
                return Ok(receipt);
            }
        }
        if Instant::now() >= deadline {
            return Err(SdkError::OnChainConfirmation {
                tx_hash: tx_hash.to_string(),
                reason: format!("no receipt after {} ms", timing.tx_timeout.as_millis()),
            });
        }
        sleep(timing.tx_poll_interval).await;
    }
}
