//! Upload batching engine
//!
//! Uploads are queued through an mpsc channel into a collector task that
//! flushes a batch once `upload_batch_size` tasks are queued or a quiet
//! debounce window passes, whichever comes first. Each flushed batch runs
//! on its own task: upload every member concurrently, wait for parking,
//! submit one combined piece addition carrying the client sequence, then
//! poll the provider until the addition settles. Every member settles its
//! own oneshot; only the shared addition steps fail a batch as a whole,
//! and then every member rejects with an identical message.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chain::{wait_for_transaction, ChainService};
use crate::config::{TimingConfig, UploadCallbacks};
use crate::error::{Result, SdkError};
use crate::piece::PieceCid;
use crate::transport::ProviderTransport;
use crate::types::{Address, CreateDataSetRequest, TxHash, TxStatus, UploadResult};

/// One caller's pending upload
pub(crate) struct UploadTask {
    pub data: Bytes,
    pub piece_cid: PieceCid,
    pub callbacks: UploadCallbacks,
    pub done: oneshot::Sender<Result<UploadResult>>,
}

/// State shared between the context, the collector, and batch pipelines
pub(crate) struct BatchShared {
    pub chain: Arc<dyn ChainService>,
    pub transport: Arc<dyn ProviderTransport>,
    pub provider_id: u64,
    pub payer: Address,
    pub with_cdn: bool,
    pub metadata: HashMap<String, String>,
    pub timing: TimingConfig,
    /// Bound data set id, `None` until the first batch creates one
    pub binding: RwLock<Option<u64>>,
    /// Client-scoped sequence carried by piece additions
    pub client_seq: AtomicU64,
    /// Serializes deferred data set creation across overlapping batches
    pub creation_lock: Mutex<()>,
}

/// Handle feeding the collector task
pub(crate) struct Batcher {
    tx: mpsc::UnboundedSender<UploadTask>,
}

impl Batcher {
    pub(crate) fn spawn(shared: Arc<BatchShared>, batch_size: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(collect(shared, rx, batch_size.max(1)));
        Batcher { tx }
    }

    pub(crate) fn submit(&self, task: UploadTask) -> Result<()> {
        self.tx
            .send(task)
            .map_err(|_| SdkError::Config("upload queue is closed".to_string()))
    }
}

/// Collector loop: size threshold flushes immediately, otherwise a quiet
/// debounce window (reset on every arrival) flushes a partial batch
async fn collect(
    shared: Arc<BatchShared>,
    mut rx: mpsc::UnboundedReceiver<UploadTask>,
    batch_size: usize,
) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while batch.len() < batch_size {
            tokio::select! {
                task = rx.recv() => match task {
                    Some(task) => batch.push(task),
                    None => break,
                },
                _ = sleep(shared.timing.batch_debounce) => break,
            }
        }
        // Each batch runs independently so flushed batches overlap freely
        tokio::spawn(process_batch(Arc::clone(&shared), batch));
    }
}

async fn process_batch(shared: Arc<BatchShared>, batch: Vec<UploadTask>) {
    let batch_id = Uuid::new_v4();
    debug!(batch_id = %batch_id, tasks = batch.len(), "Flushing upload batch");

    let data_set_id = match ensure_data_set(&shared).await {
        Ok(id) => id,
        Err(reason) => {
            for task in batch {
                settle(task, Err(SdkError::DataSetCreation(reason.clone())));
            }
            return;
        }
    };

    // Stage 1: upload every member's bytes concurrently; one member's
    // failure never blocks the others
    let uploads = batch.iter().map(|task| {
        let transport = Arc::clone(&shared.transport);
        let piece_cid = task.piece_cid;
        let data = task.data.clone();
        async move {
            match transport.upload_piece(data).await {
                Ok(response) if response.piece_cid == piece_cid => Ok(()),
                Ok(response) => Err(SdkError::UploadTransport {
                    piece_cid: piece_cid.to_string(),
                    endpoint: transport.endpoint().to_string(),
                    reason: format!(
                        "provider reported identifier {} for locally computed {}",
                        response.piece_cid, piece_cid
                    ),
                }),
                Err(e) => Err(SdkError::UploadTransport {
                    piece_cid: piece_cid.to_string(),
                    endpoint: transport.endpoint().to_string(),
                    reason: e.to_string(),
                }),
            }
        }
    });
    let upload_results = join_all(uploads).await;

    let mut uploaded = Vec::with_capacity(batch.len());
    for (task, result) in batch.into_iter().zip(upload_results) {
        match result {
            Ok(()) => uploaded.push(task),
            Err(e) => settle(task, Err(e)),
        }
    }
    if uploaded.is_empty() {
        return;
    }

    // Stage 2: poll until every uploaded piece reports parked
    let parks = join_all(
        uploaded
            .iter()
            .map(|task| wait_parked(&shared, task.piece_cid)),
    )
    .await;
    let mut parked = Vec::with_capacity(uploaded.len());
    for (mut task, result) in uploaded.into_iter().zip(parks) {
        match result {
            Ok(()) => {
                if let Some(cb) = task.callbacks.on_upload_complete.take() {
                    cb(&task.piece_cid);
                }
                parked.push(task);
            }
            Err(e) => settle(task, Err(e)),
        }
    }
    if parked.is_empty() {
        return;
    }

    // Stage 3: one combined addition for every parked member, in
    // submission order
    let piece_cids: Vec<PieceCid> = parked.iter().map(|task| task.piece_cid).collect();
    let client_seq = shared.client_seq.fetch_add(1, Ordering::SeqCst);
    let submission = match shared
        .chain
        .add_pieces(data_set_id, client_seq, &piece_cids)
        .await
    {
        Ok(submission) => submission,
        Err(e) => {
            // Same batch, same fate: identical message for every member
            let reason = e.to_string();
            let piece_count = piece_cids.len();
            for task in parked {
                settle(
                    task,
                    Err(SdkError::AddPieces {
                        data_set_id,
                        piece_count,
                        reason: reason.clone(),
                    }),
                );
            }
            return;
        }
    };
    info!(
        batch_id = %batch_id,
        data_set_id,
        client_seq,
        tx_hash = %submission.tx_hash,
        pieces = piece_cids.len(),
        "Submitted piece addition"
    );
    for task in parked.iter_mut() {
        if let Some(cb) = task.callbacks.on_piece_added.take() {
            cb(&submission.tx_hash);
        }
    }

    // Stage 4: poll the provider until the addition settles
    match wait_confirmed(&shared, data_set_id, &submission.tx_hash, piece_cids.len()).await {
        Ok(piece_ids) => {
            // Piece ids are assigned in submission order, so the zip
            // matches each id back to its task
            for (mut task, piece_id) in parked.into_iter().zip(piece_ids) {
                if let Some(cb) = task.callbacks.on_piece_confirmed.take() {
                    cb(piece_id);
                }
                let size = task.data.len() as u64;
                let piece_cid = task.piece_cid;
                settle(
                    task,
                    Ok(UploadResult {
                        piece_id,
                        piece_cid,
                        size,
                    }),
                );
            }
        }
        Err(failure) => {
            let piece_count = piece_cids.len();
            for task in parked {
                settle(task, Err(failure.clone().into_error(data_set_id, piece_count)));
            }
        }
    }
}

/// Bound data set id, creating one on first use
///
/// Creation is relayed through the chain facade; once the transaction
/// confirms, the assigned id is discovered from the client's data sets and
/// the client sequence is seeded from the fresh record. A failed creation
/// fails only the triggering batch; the next batch retries.
async fn ensure_data_set(shared: &BatchShared) -> std::result::Result<u64, String> {
    if let Some(id) = *shared.binding.read().await {
        return Ok(id);
    }
    let _guard = shared.creation_lock.lock().await;
    if let Some(id) = *shared.binding.read().await {
        return Ok(id);
    }

    info!(
        provider_id = shared.provider_id,
        "Creating data set for first upload"
    );
    let submission = shared
        .chain
        .create_data_set(CreateDataSetRequest {
            provider_id: shared.provider_id,
            payer: shared.payer.clone(),
            with_cdn: shared.with_cdn,
            metadata: shared.metadata.clone(),
        })
        .await
        .map_err(|e| format!("provider {}: {}", shared.provider_id, e))?;

    let receipt = wait_for_transaction(shared.chain.as_ref(), &submission.tx_hash, &shared.timing)
        .await
        .map_err(|e| e.to_string())?;
    if receipt.status != TxStatus::Confirmed {
        return Err(format!(
            "transaction {} reverted on chain",
            submission.tx_hash
        ));
    }

    let sets = shared
        .chain
        .get_client_data_sets(&shared.payer)
        .await
        .map_err(|e| e.to_string())?;
    let created = sets
        .into_iter()
        .filter(|ds| ds.provider_id == shared.provider_id && ds.live)
        .max_by_key(|ds| ds.data_set_id)
        .ok_or_else(|| {
            format!(
                "transaction {} confirmed but no data set appeared for provider {}",
                submission.tx_hash, shared.provider_id
            )
        })?;

    shared
        .client_seq
        .store(created.client_seq, Ordering::SeqCst);
    *shared.binding.write().await = Some(created.data_set_id);
    info!(
        data_set_id = created.data_set_id,
        provider_id = shared.provider_id,
        "Data set created"
    );
    Ok(created.data_set_id)
}

async fn wait_parked(shared: &BatchShared, piece_cid: PieceCid) -> Result<()> {
    let deadline = Instant::now() + shared.timing.parking_timeout;
    loop {
        match shared.transport.find_piece(&piece_cid).await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => {
                warn!(piece_cid = %piece_cid, error = %e, "Parking check failed, retrying")
            }
        }
        if Instant::now() >= deadline {
            return Err(SdkError::PieceParkingTimeout {
                piece_cid: piece_cid.to_string(),
                endpoint: shared.transport.endpoint().to_string(),
                timeout_ms: shared.timing.parking_timeout.as_millis() as u64,
            });
        }
        sleep(shared.timing.parking_poll_interval).await;
    }
}

/// Batch-wide addition failure, cloned into every member's rejection
#[derive(Debug, Clone)]
enum AdditionFailure {
    /// Provider rejected the addition or confirmed the wrong piece count
    Rejected { reason: String },
    /// Transaction reverted or never propagated
    OnChain { tx_hash: String, reason: String },
    /// Transaction confirmed but the provider never acknowledged
    Verification { tx_hash: String, timeout_ms: u64 },
}

impl AdditionFailure {
    fn into_error(self, data_set_id: u64, piece_count: usize) -> SdkError {
        match self {
            AdditionFailure::Rejected { reason } => SdkError::AddPieces {
                data_set_id,
                piece_count,
                reason,
            },
            AdditionFailure::OnChain { tx_hash, reason } => {
                SdkError::OnChainConfirmation { tx_hash, reason }
            }
            AdditionFailure::Verification {
                tx_hash,
                timeout_ms,
            } => SdkError::VerificationTimeout {
                tx_hash,
                timeout_ms,
            },
        }
    }
}

async fn wait_confirmed(
    shared: &BatchShared,
    data_set_id: u64,
    tx_hash: &TxHash,
    piece_count: usize,
) -> std::result::Result<Vec<u64>, AdditionFailure> {
    let started = Instant::now();
    let mut confirmed_at: Option<Instant> = None;
    loop {
        match shared
            .transport
            .piece_addition_status(data_set_id, tx_hash)
            .await
        {
            Ok(Some(status)) => match status.tx_status {
                TxStatus::Failed => {
                    return Err(AdditionFailure::OnChain {
                        tx_hash: tx_hash.to_string(),
                        reason: "transaction reverted on chain".to_string(),
                    });
                }
                TxStatus::Confirmed => {
                    confirmed_at.get_or_insert_with(Instant::now);
                    match (status.add_message_ok, status.confirmed_piece_ids) {
                        (Some(true), Some(ids)) => {
                            if ids.len() != piece_count {
                                return Err(AdditionFailure::Rejected {
                                    reason: format!(
                                        "provider confirmed {} piece ids for {} submitted pieces",
                                        ids.len(),
                                        piece_count
                                    ),
                                });
                            }
                            return Ok(ids);
                        }
                        (Some(false), _) => {
                            return Err(AdditionFailure::Rejected {
                                reason: format!(
                                    "provider reported the addition in transaction {} failed",
                                    tx_hash
                                ),
                            });
                        }
                        _ => {}
                    }
                }
                TxStatus::Pending => {}
            },
            Ok(None) => {}
            Err(e) => {
                warn!(tx_hash = %tx_hash, error = %e, "Addition status check failed, retrying")
            }
        }
        // Both deadlines apply regardless of what this poll answered: a
        // status endpoint that regresses after confirming must not keep
        // the loop alive
        match confirmed_at {
            Some(confirmed) => {
                if confirmed.elapsed() >= shared.timing.verification_timeout {
                    return Err(AdditionFailure::Verification {
                        tx_hash: tx_hash.to_string(),
                        timeout_ms: shared.timing.verification_timeout.as_millis() as u64,
                    });
                }
            }
            None => {
                if started.elapsed() >= shared.timing.propagation_timeout {
                    return Err(AdditionFailure::OnChain {
                        tx_hash: tx_hash.to_string(),
                        reason: format!(
                            "transaction not found on chain within {} ms",
                            shared.timing.propagation_timeout.as_millis()
                        ),
                    });
                }
            }
        }
        sleep(shared.timing.status_poll_interval).await;
    }
}

fn settle(task: UploadTask, result: Result<UploadResult>) {
    // The caller may have dropped its receiver; settlement is best effort
    let _ = task.done.send(result);
}
