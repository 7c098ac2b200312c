//! Storage context session
//!
//! A [`StorageContext`] binds one resolved provider and data set to a
//! client session. It owns the upload batcher and the provider transport;
//! uploads submitted through one context coalesce into shared on-chain
//! piece additions, while downloads, listing, and status queries read the
//! bound provider directly. The binding is immutable once created:
//! resolve a new context to change provider or data set.

mod batch;

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::debug;

use crate::abort::AbortSignal;
use crate::chain::{ChainService, EPOCH_DURATION};
use crate::config::{
    ContextCallbacks, ContextOptions, PieceListOptions, UploadCallbacks, MAX_UPLOAD_SIZE,
    MIN_UPLOAD_SIZE,
};
use crate::error::{Result, SdkError};
use crate::piece::PieceCid;
use crate::resolver::ContextResolver;
use crate::transport::{ProviderTransport, ProviderTransportFactory};
use crate::types::{
    Address, AllowanceCheck, ChainHead, CostEstimate, DataSetPiece, PieceStatus, PreflightResult,
    ProviderInfo, UploadResult,
};

use batch::{BatchShared, Batcher, UploadTask};

/// Bound session against one provider and data set
pub struct StorageContext {
    provider: ProviderInfo,
    payer: Address,
    chain: Arc<dyn ChainService>,
    transport: Arc<dyn ProviderTransport>,
    shared: Arc<BatchShared>,
    batcher: Batcher,
}

impl StorageContext {
    /// Resolve a provider and data set, then bind a session to them
    ///
    /// Resolution follows the precedence rules of [`ContextResolver`];
    /// the selection callbacks fire before this returns. When resolution
    /// ends without a reusable data set, creation is deferred to the
    /// first upload.
    pub async fn create(
        chain: Arc<dyn ChainService>,
        factory: Arc<dyn ProviderTransportFactory>,
        payer: Address,
        options: ContextOptions,
        callbacks: ContextCallbacks,
    ) -> Result<Self> {
        let resolver = ContextResolver::new(chain.as_ref(), factory.as_ref());
        let resolution = resolver.resolve(&payer, &options, callbacks).await?;

        let offering = resolution.provider.pdp().ok_or_else(|| {
            SdkError::ProviderNotFound(format!(
                "provider {} has no storage offering",
                resolution.provider.id
            ))
        })?;
        let transport = factory.connect(&offering.service_url)?;

        let shared = Arc::new(BatchShared {
            chain: Arc::clone(&chain),
            transport: Arc::clone(&transport),
            provider_id: resolution.provider.id,
            payer: payer.clone(),
            with_cdn: options.with_cdn,
            metadata: options.metadata.clone(),
            timing: options.timing.clone(),
            binding: RwLock::new(resolution.data_set.as_ref().map(|ds| ds.data_set_id)),
            client_seq: AtomicU64::new(
                resolution
                    .data_set
                    .as_ref()
                    .map(|ds| ds.client_seq)
                    .unwrap_or(0),
            ),
            creation_lock: Mutex::new(()),
        });
        let batcher = Batcher::spawn(Arc::clone(&shared), options.upload_batch_size);

        debug!(
            provider_id = resolution.provider.id,
            data_set_id = ?resolution.data_set.as_ref().map(|ds| ds.data_set_id),
            "Storage context created"
        );
        Ok(Self {
            provider: resolution.provider,
            payer,
            chain,
            transport,
            shared,
            batcher,
        })
    }

    /// Provider snapshot the context is bound to
    pub fn provider(&self) -> &ProviderInfo {
        &self.provider
    }

    /// Paying client address
    pub fn payer(&self) -> &Address {
        &self.payer
    }

    /// Bound data set id, `None` until the first upload creates one
    pub async fn data_set_id(&self) -> Option<u64> {
        *self.shared.binding.read().await
    }

    /// Upload one piece
    ///
    /// Size bounds are enforced before any network call. The upload joins
    /// the next batch; the returned future settles once the piece is
    /// confirmed on chain and acknowledged by the provider, with the
    /// chain-assigned piece id.
    pub async fn upload(
        &self,
        data: impl Into<Bytes>,
        callbacks: UploadCallbacks,
    ) -> Result<UploadResult> {
        let data = data.into();
        let size = data.len() as u64;
        if size < MIN_UPLOAD_SIZE || size > MAX_UPLOAD_SIZE {
            return Err(SdkError::SizeLimit {
                size,
                min: MIN_UPLOAD_SIZE,
                max: MAX_UPLOAD_SIZE,
            });
        }

        let piece_cid = PieceCid::from_data(&data);
        let (done_tx, done_rx) = oneshot::channel();
        self.batcher.submit(UploadTask {
            data,
            piece_cid,
            callbacks,
            done: done_tx,
        })?;
        done_rx
            .await
            .map_err(|_| SdkError::Config("upload task dropped without settling".to_string()))?
    }

    /// Download one piece from the bound provider, verifying its digest
    pub async fn download(
        &self,
        piece_cid: &PieceCid,
        abort: Option<&AbortSignal>,
    ) -> Result<Bytes> {
        let fetch = async {
            let bytes = self.transport.download_piece(piece_cid).await?;
            if !piece_cid.matches(&bytes) {
                return Err(SdkError::RetrievalFailed {
                    piece_cid: piece_cid.to_string(),
                    endpoint: self.transport.endpoint().to_string(),
                    reason: format!("digest mismatch in {} byte body", bytes.len()),
                });
            }
            Ok(bytes)
        };
        match abort {
            Some(abort) => tokio::select! {
                _ = abort.aborted() => Err(SdkError::Aborted(format!(
                    "download of piece {} aborted", piece_cid
                ))),
                result = fetch => result,
            },
            None => fetch.await,
        }
    }

    /// Full piece listing of the bound data set
    ///
    /// Empty while data set creation is still pending.
    pub async fn data_set_pieces(&self) -> Result<Vec<DataSetPiece>> {
        match self.data_set_id().await {
            Some(data_set_id) => Ok(self.transport.data_set_state(data_set_id).await?.pieces),
            None => Ok(Vec::new()),
        }
    }

    /// Cursor over the data set's pieces, one bounded page per pull
    pub async fn pieces(&self, options: PieceListOptions) -> PieceCursor {
        PieceCursor {
            transport: Arc::clone(&self.transport),
            data_set_id: self.data_set_id().await,
            offset: options.offset,
            page_size: options.page_size.max(1),
            total: None,
            abort: options.abort,
        }
    }

    /// Combined provider/chain status of one piece
    pub async fn piece_status(&self, piece_cid: &PieceCid) -> Result<PieceStatus> {
        let exists = self.transport.find_piece(piece_cid).await?;
        let mut status = PieceStatus {
            exists,
            data_set_live: false,
            piece_id: None,
            next_challenge_epoch: None,
            challenge_window_start: None,
            in_challenge_window: false,
            proof_overdue: false,
            window_opens_at: None,
            window_closes_at: None,
            retrieval_url: exists.then(|| self.transport.piece_url(piece_cid)),
        };
        let Some(data_set_id) = self.data_set_id().await else {
            return Ok(status);
        };

        status.data_set_live = self
            .chain
            .get_data_set(data_set_id)
            .await?
            .map(|ds| ds.live)
            .unwrap_or(false);

        let state = self.transport.data_set_state(data_set_id).await?;
        status.piece_id = state
            .pieces
            .iter()
            .find(|p| &p.piece_cid == piece_cid)
            .map(|p| p.piece_id);

        if state.next_challenge_epoch > 0 {
            let schedule = self.chain.get_proving_schedule().await?;
            let head = self.chain.get_chain_head().await?;
            let next = state.next_challenge_epoch;
            let window_start = next.saturating_sub(schedule.challenge_window_epochs);
            status.next_challenge_epoch = Some(next);
            status.challenge_window_start = Some(window_start);
            status.in_challenge_window = head.epoch >= window_start && head.epoch < next;
            status.proof_overdue = status.data_set_live && head.epoch >= next;
            status.window_opens_at = Some(epoch_to_time(&head, window_start));
            status.window_closes_at = Some(epoch_to_time(&head, next));
        }
        Ok(status)
    }

    /// Validate a planned upload and estimate its storage cost
    ///
    /// The allowance check consults the chain service's payments surface;
    /// when none is exposed the check reports unsupported instead of
    /// guessing.
    pub async fn preflight_upload(&self, size: u64) -> Result<PreflightResult> {
        if size < MIN_UPLOAD_SIZE || size > MAX_UPLOAD_SIZE {
            return Err(SdkError::SizeLimit {
                size,
                min: MIN_UPLOAD_SIZE,
                max: MAX_UPLOAD_SIZE,
            });
        }
        let offering = self.provider.pdp().ok_or_else(|| {
            SdkError::Unsupported(format!(
                "provider {} publishes no storage pricing",
                self.provider.id
            ))
        })?;

        const TIB: u128 = 1 << 40;
        const EPOCHS_PER_DAY: u128 = 86_400 / EPOCH_DURATION.as_secs() as u128;
        let per_month = offering.storage_price_per_tib_per_month * size as u128 / TIB;
        let per_day = per_month / 30;
        let per_epoch = per_day / EPOCHS_PER_DAY;
        let estimated_cost = CostEstimate {
            per_epoch,
            per_day,
            per_month,
        };

        let allowance_check = match self.chain.payments() {
            None => AllowanceCheck {
                sufficient: None,
                message: "chain service exposes no payments surface".to_string(),
            },
            Some(payments) => {
                let rate = payments.rate_allowance(&self.payer).await?;
                let lockup = payments.lockup_allowance(&self.payer).await?;
                let funds = payments.available_funds(&self.payer).await?;
                let sufficient = rate >= per_epoch && lockup >= per_month && funds >= per_month;
                AllowanceCheck {
                    sufficient: Some(sufficient),
                    message: format!(
                        "rate allowance {} (need {}), lockup allowance {} (need {}), funds {} (need {})",
                        rate, per_epoch, lockup, per_month, funds, per_month
                    ),
                }
            }
        };

        Ok(PreflightResult {
            estimated_cost,
            allowance_check,
        })
    }
}

/// Lazy, finite cursor over a data set's pieces
///
/// Each pull performs one bounded listing fetch. The consumer may stop
/// early; an attached abort signal terminates iteration between pulls and
/// during an in-flight fetch with [`SdkError::Aborted`].
pub struct PieceCursor {
    transport: Arc<dyn ProviderTransport>,
    data_set_id: Option<u64>,
    offset: u64,
    page_size: u64,
    total: Option<u64>,
    abort: Option<AbortSignal>,
}

impl PieceCursor {
    /// Next page of pieces, `None` once the listing is exhausted
    pub async fn next(&mut self) -> Result<Option<Vec<DataSetPiece>>> {
        if let Some(abort) = &self.abort {
            if abort.is_aborted() {
                return Err(SdkError::Aborted("piece listing aborted".to_string()));
            }
        }
        let Some(data_set_id) = self.data_set_id else {
            return Ok(None);
        };
        if let Some(total) = self.total {
            if self.offset >= total {
                return Ok(None);
            }
        }

        let fetch = self
            .transport
            .list_pieces(data_set_id, self.offset, self.page_size);
        let page = match &self.abort {
            Some(abort) => tokio::select! {
                _ = abort.aborted() => {
                    return Err(SdkError::Aborted("piece listing aborted".to_string()))
                }
                page = fetch => page?,
            },
            None => fetch.await?,
        };

        self.total = Some(page.total);
        self.offset = page.offset + page.pieces.len() as u64;
        if page.pieces.is_empty() {
            return Ok(None);
        }
        Ok(Some(page.pieces))
    }

    /// Offset the next pull starts from, usable to restart a cursor
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

fn epoch_to_time(head: &ChainHead, epoch: u64) -> DateTime<Utc> {
    let delta_epochs = epoch as i64 - head.epoch as i64;
    head.timestamp + ChronoDuration::seconds(delta_epochs * EPOCH_DURATION.as_secs() as i64)
}
