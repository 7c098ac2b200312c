//! Mock chain service for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{Result, SdkError};
use crate::piece::PieceCid;
use crate::transport::mock::MockProviderTransport;
use crate::types::{
    Address, ChainHead, CreateDataSetRequest, DataSetInfo, PieceAdditionStatus, ProviderInfo,
    ProvingSchedule, TxHash, TxReceipt, TxStatus, TxSubmission,
};

use super::{ChainService, PaymentsService};

/// Outcome of one relayed piece addition
#[derive(Debug, Clone)]
pub enum AddPiecesMode {
    /// Confirm on chain and acknowledge through the provider
    Normal,
    /// Fail the submission itself
    FailSubmission(String),
    /// Confirm the submission but revert the transaction on chain
    Reverted,
    /// Confirm on chain, never acknowledge through the provider
    Unacknowledged,
    /// Accept the submission, never surface the transaction anywhere
    Lost,
}

/// Outcome of one relayed data set creation
#[derive(Debug, Clone)]
pub enum CreateMode {
    Normal,
    Fail(String),
    /// Accept the submission, never confirm the transaction
    Stalled,
}

/// One recorded piece addition submission
#[derive(Debug, Clone)]
pub struct RecordedAddPieces {
    pub data_set_id: u64,
    pub client_seq: u64,
    pub piece_cids: Vec<PieceCid>,
    pub tx_hash: TxHash,
}

/// Mock chain service for testing.
///
/// Scripted registry and data set state, with call counters for asserting
/// which lookups a flow performed. When linked to a
/// [`MockProviderTransport`] via [`MockChainService::with_relay`], relayed
/// piece additions feed the transport's addition-status endpoint the way a
/// provider watching the chain would.
pub struct MockChainService {
    data_sets: Mutex<HashMap<u64, DataSetInfo>>,
    providers: Mutex<Vec<ProviderInfo>>,
    receipts: Mutex<HashMap<TxHash, TxReceipt>>,
    head_epoch: Mutex<u64>,
    schedule: Mutex<ProvingSchedule>,
    payments: Option<MockPaymentsService>,
    relay: Mutex<Option<Arc<MockProviderTransport>>>,
    next_data_set_id: AtomicU64,
    tx_seq: AtomicU64,
    created_data_sets: Mutex<Vec<u64>>,
    add_pieces_requests: Mutex<Vec<RecordedAddPieces>>,
    add_modes: Mutex<VecDeque<AddPiecesMode>>,
    create_modes: Mutex<VecDeque<CreateMode>>,
    get_data_set_calls: AtomicU32,
    get_client_data_sets_calls: AtomicU32,
    get_approved_providers_calls: AtomicU32,
    get_transaction_calls: AtomicU32,
    create_data_set_calls: AtomicU32,
    add_pieces_calls: AtomicU32,
}

impl MockChainService {
    pub fn new() -> Self {
        Self {
            data_sets: Mutex::new(HashMap::new()),
            providers: Mutex::new(Vec::new()),
            receipts: Mutex::new(HashMap::new()),
            head_epoch: Mutex::new(1000),
            schedule: Mutex::new(ProvingSchedule {
                max_proving_period_epochs: 2880,
                challenge_window_epochs: 60,
            }),
            payments: None,
            relay: Mutex::new(None),
            next_data_set_id: AtomicU64::new(100),
            tx_seq: AtomicU64::new(0),
            created_data_sets: Mutex::new(Vec::new()),
            add_pieces_requests: Mutex::new(Vec::new()),
            add_modes: Mutex::new(VecDeque::new()),
            create_modes: Mutex::new(VecDeque::new()),
            get_data_set_calls: AtomicU32::new(0),
            get_client_data_sets_calls: AtomicU32::new(0),
            get_approved_providers_calls: AtomicU32::new(0),
            get_transaction_calls: AtomicU32::new(0),
            create_data_set_calls: AtomicU32::new(0),
            add_pieces_calls: AtomicU32::new(0),
        }
    }

    /// Add a data set record.
    pub fn with_data_set(self, data_set: DataSetInfo) -> Self {
        self.data_sets
            .lock()
            .unwrap()
            .insert(data_set.data_set_id, data_set);
        self
    }

    /// Add an approved provider.
    pub fn with_provider(self, provider: ProviderInfo) -> Self {
        self.providers.lock().unwrap().push(provider);
        self
    }

    /// Add a settled transaction receipt.
    pub fn with_receipt(self, receipt: TxReceipt) -> Self {
        self.receipts
            .lock()
            .unwrap()
            .insert(receipt.tx_hash.clone(), receipt);
        self
    }

    /// Set the current epoch.
    pub fn with_epoch(self, epoch: u64) -> Self {
        *self.head_epoch.lock().unwrap() = epoch;
        self
    }

    /// Set the proving schedule.
    pub fn with_schedule(self, schedule: ProvingSchedule) -> Self {
        *self.schedule.lock().unwrap() = schedule;
        self
    }

    /// Attach a payments surface.
    pub fn with_payments(mut self, payments: MockPaymentsService) -> Self {
        self.payments = Some(payments);
        self
    }

    /// Feed relayed addition outcomes into this transport.
    pub fn with_relay(self, transport: Arc<MockProviderTransport>) -> Self {
        *self.relay.lock().unwrap() = Some(transport);
        self
    }

    /// Queue an outcome for the next piece addition (defaults to `Normal`).
    pub fn queue_add_pieces_mode(&self, mode: AddPiecesMode) {
        self.add_modes.lock().unwrap().push_back(mode);
    }

    /// Queue an outcome for the next data set creation (defaults to `Normal`).
    pub fn queue_create_mode(&self, mode: CreateMode) {
        self.create_modes.lock().unwrap().push_back(mode);
    }

    /// Insert a data set after construction (for scripting mid-test).
    pub fn add_data_set(&self, data_set: DataSetInfo) {
        self.data_sets
            .lock()
            .unwrap()
            .insert(data_set.data_set_id, data_set);
    }

    /// Insert a receipt after construction.
    pub fn add_receipt(&self, receipt: TxReceipt) {
        self.receipts
            .lock()
            .unwrap()
            .insert(receipt.tx_hash.clone(), receipt);
    }

    /// Ids of data sets created through this service.
    pub fn created_data_sets(&self) -> Vec<u64> {
        self.created_data_sets.lock().unwrap().clone()
    }

    /// Every recorded piece addition submission, in order.
    pub fn add_pieces_requests(&self) -> Vec<RecordedAddPieces> {
        self.add_pieces_requests.lock().unwrap().clone()
    }

    pub fn get_data_set_calls(&self) -> u32 {
        self.get_data_set_calls.load(Ordering::SeqCst)
    }

    pub fn get_client_data_sets_calls(&self) -> u32 {
        self.get_client_data_sets_calls.load(Ordering::SeqCst)
    }

    pub fn get_approved_providers_calls(&self) -> u32 {
        self.get_approved_providers_calls.load(Ordering::SeqCst)
    }

    pub fn get_transaction_calls(&self) -> u32 {
        self.get_transaction_calls.load(Ordering::SeqCst)
    }

    pub fn create_data_set_calls(&self) -> u32 {
        self.create_data_set_calls.load(Ordering::SeqCst)
    }

    pub fn add_pieces_calls(&self) -> u32 {
        self.add_pieces_calls.load(Ordering::SeqCst)
    }

    fn next_tx_hash(&self, kind: &str) -> TxHash {
        let seq = self.tx_seq.fetch_add(1, Ordering::SeqCst);
        TxHash::new(format!("0x{}{:04x}", kind, seq))
    }
}

impl Default for MockChainService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainService for MockChainService {
    async fn get_data_set(&self, data_set_id: u64) -> Result<Option<DataSetInfo>> {
        self.get_data_set_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.data_sets.lock().unwrap().get(&data_set_id).cloned())
    }

    async fn get_client_data_sets(&self, client: &Address) -> Result<Vec<DataSetInfo>> {
        self.get_client_data_sets_calls.fetch_add(1, Ordering::SeqCst);
        let mut sets: Vec<DataSetInfo> = self
            .data_sets
            .lock()
            .unwrap()
            .values()
            .filter(|ds| &ds.payer == client)
            .cloned()
            .collect();
        sets.sort_by_key(|ds| ds.data_set_id);
        Ok(sets)
    }

    async fn get_data_set_metadata(
        &self,
        data_set_id: u64,
    ) -> Result<Option<HashMap<String, String>>> {
        Ok(self
            .data_sets
            .lock()
            .unwrap()
            .get(&data_set_id)
            .map(|ds| ds.metadata.clone()))
    }

    async fn get_approved_providers(&self) -> Result<Vec<ProviderInfo>> {
        self.get_approved_providers_calls
            .fetch_add(1, Ordering::SeqCst);
        Ok(self
            .providers
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.active)
            .cloned()
            .collect())
    }

    async fn get_provider_by_id(&self, provider_id: u64) -> Result<Option<ProviderInfo>> {
        Ok(self
            .providers
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == provider_id)
            .cloned())
    }

    async fn get_provider_by_address(&self, address: &Address) -> Result<Option<ProviderInfo>> {
        Ok(self
            .providers
            .lock()
            .unwrap()
            .iter()
            .find(|p| &p.address == address)
            .cloned())
    }

    async fn is_provider_approved(&self, provider_id: u64) -> Result<bool> {
        Ok(self
            .providers
            .lock()
            .unwrap()
            .iter()
            .any(|p| p.id == provider_id && p.active))
    }

    async fn get_chain_head(&self) -> Result<ChainHead> {
        Ok(ChainHead {
            epoch: *self.head_epoch.lock().unwrap(),
            timestamp: Utc::now(),
        })
    }

    async fn get_proving_schedule(&self) -> Result<ProvingSchedule> {
        Ok(self.schedule.lock().unwrap().clone())
    }

    async fn create_data_set(&self, request: CreateDataSetRequest) -> Result<TxSubmission> {
        self.create_data_set_calls.fetch_add(1, Ordering::SeqCst);
        let mode = self
            .create_modes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(CreateMode::Normal);

        if let CreateMode::Fail(msg) = mode {
            return Err(SdkError::Chain {
                operation: "create_data_set".to_string(),
                message: msg,
            });
        }

        let data_set_id = self.next_data_set_id.fetch_add(1, Ordering::SeqCst);
        let tx_hash = self.next_tx_hash("create");

        if matches!(mode, CreateMode::Normal) {
            self.add_receipt(TxReceipt {
                tx_hash: tx_hash.clone(),
                status: TxStatus::Confirmed,
                block_number: data_set_id,
            });
            self.add_data_set(DataSetInfo {
                data_set_id,
                provider_id: request.provider_id,
                payer: request.payer.clone(),
                payee: Address::new(format!("0xpayee{:02x}", request.provider_id)),
                live: true,
                with_cdn: request.with_cdn,
                piece_count: 0,
                next_piece_id: 0,
                client_seq: 0,
                metadata: request.metadata.clone(),
            });
            self.created_data_sets.lock().unwrap().push(data_set_id);
        }

        Ok(TxSubmission {
            tx_hash,
            status_url: None,
        })
    }

    async fn add_pieces(
        &self,
        data_set_id: u64,
        client_seq: u64,
        piece_cids: &[PieceCid],
    ) -> Result<TxSubmission> {
        self.add_pieces_calls.fetch_add(1, Ordering::SeqCst);
        let mode = self
            .add_modes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(AddPiecesMode::Normal);

        if let AddPiecesMode::FailSubmission(msg) = mode {
            return Err(SdkError::Chain {
                operation: "add_pieces".to_string(),
                message: msg,
            });
        }

        let tx_hash = self.next_tx_hash("add");
        self.add_pieces_requests.lock().unwrap().push(RecordedAddPieces {
            data_set_id,
            client_seq,
            piece_cids: piece_cids.to_vec(),
            tx_hash: tx_hash.clone(),
        });

        let relay = self.relay.lock().unwrap().clone();
        match mode {
            AddPiecesMode::Normal => {
                let piece_ids: Vec<u64> = {
                    let mut sets = self.data_sets.lock().unwrap();
                    match sets.get_mut(&data_set_id) {
                        Some(ds) => {
                            let start = ds.next_piece_id;
                            ds.next_piece_id += piece_cids.len() as u64;
                            ds.piece_count += piece_cids.len() as u64;
                            ds.client_seq += 1;
                            (start..start + piece_cids.len() as u64).collect()
                        }
                        None => (0..piece_cids.len() as u64).collect(),
                    }
                };
                self.add_receipt(TxReceipt {
                    tx_hash: tx_hash.clone(),
                    status: TxStatus::Confirmed,
                    block_number: 1,
                });
                if let Some(transport) = relay {
                    let confirmed: Vec<(u64, PieceCid)> = piece_ids
                        .iter()
                        .copied()
                        .zip(piece_cids.iter().copied())
                        .collect();
                    transport.add_confirmed_pieces(data_set_id, &confirmed);
                    transport.set_addition_status(
                        tx_hash.clone(),
                        PieceAdditionStatus {
                            tx_status: TxStatus::Confirmed,
                            add_message_ok: Some(true),
                            confirmed_piece_ids: Some(piece_ids),
                        },
                    );
                }
            }
            AddPiecesMode::Reverted => {
                self.add_receipt(TxReceipt {
                    tx_hash: tx_hash.clone(),
                    status: TxStatus::Failed,
                    block_number: 1,
                });
                if let Some(transport) = relay {
                    transport.set_addition_status(
                        tx_hash.clone(),
                        PieceAdditionStatus {
                            tx_status: TxStatus::Failed,
                            add_message_ok: None,
                            confirmed_piece_ids: None,
                        },
                    );
                }
            }
            AddPiecesMode::Unacknowledged => {
                self.add_receipt(TxReceipt {
                    tx_hash: tx_hash.clone(),
                    status: TxStatus::Confirmed,
                    block_number: 1,
                });
                if let Some(transport) = relay {
                    transport.set_addition_status(
                        tx_hash.clone(),
                        PieceAdditionStatus {
                            tx_status: TxStatus::Confirmed,
                            add_message_ok: None,
                            confirmed_piece_ids: None,
                        },
                    );
                }
            }
            AddPiecesMode::Lost => {}
            AddPiecesMode::FailSubmission(_) => unreachable!(),
        }

        Ok(TxSubmission {
            tx_hash,
            status_url: None,
        })
    }

    async fn get_transaction(&self, tx_hash: &TxHash) -> Result<Option<TxReceipt>> {
        self.get_transaction_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.receipts.lock().unwrap().get(tx_hash).cloned())
    }

    fn payments(&self) -> Option<&dyn PaymentsService> {
        self.payments.as_ref().map(|p| p as &dyn PaymentsService)
    }
}

/// Mock payments surface with fixed balances.
pub struct MockPaymentsService {
    pub funds: u128,
    pub rate_allowance: u128,
    pub lockup_allowance: u128,
}

#[async_trait]
impl PaymentsService for MockPaymentsService {
    async fn available_funds(&self, _client: &Address) -> Result<u128> {
        Ok(self.funds)
    }

    async fn rate_allowance(&self, _client: &Address) -> Result<u128> {
        Ok(self.rate_allowance)
    }

    async fn lockup_allowance(&self, _client: &Address) -> Result<u128> {
        Ok(self.lockup_allowance)
    }
}
