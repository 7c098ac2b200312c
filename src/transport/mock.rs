//! Mock provider transport for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Result, SdkError};
use crate::piece::PieceCid;
use crate::types::{
    DataSetPiece, PieceAdditionStatus, PiecePage, ProviderDataSetState, TxHash,
    UploadPieceResponse,
};

use super::{ProviderTransport, ProviderTransportFactory};

struct StatusScript {
    none_polls_remaining: u32,
    status: PieceAdditionStatus,
}

/// Mock provider for testing.
///
/// Scripted outcomes per endpoint: upload failures, parking delays
/// (counted in `find_piece` polls), addition-status scripts keyed by
/// transaction hash, and download latency/failure injection for racing
/// tests. Call counters expose how often each endpoint was hit.
pub struct MockProviderTransport {
    endpoint: String,
    available: AtomicBool,
    ping_delay: Mutex<Option<Duration>>,
    fail_next_uploads: AtomicU32,
    wrong_cid_on_upload: AtomicBool,
    parking_polls: u32,
    pending_parks: Mutex<HashMap<PieceCid, u32>>,
    parked: Mutex<HashMap<PieceCid, ()>>,
    pieces: Mutex<HashMap<PieceCid, Bytes>>,
    download_delay: Mutex<Option<Duration>>,
    download_failure: Mutex<Option<String>>,
    corrupt_downloads: AtomicBool,
    addition_statuses: Mutex<HashMap<TxHash, StatusScript>>,
    status_failures_after: Mutex<Option<u32>>,
    data_sets: Mutex<HashMap<u64, ProviderDataSetState>>,
    list_requests: Mutex<Vec<(u64, u64)>>,
    ping_calls: AtomicU32,
    upload_calls: AtomicU32,
    find_calls: AtomicU32,
    status_calls: AtomicU32,
    download_calls: AtomicU32,
}

impl MockProviderTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            available: AtomicBool::new(true),
            ping_delay: Mutex::new(None),
            fail_next_uploads: AtomicU32::new(0),
            wrong_cid_on_upload: AtomicBool::new(false),
            parking_polls: 0,
            pending_parks: Mutex::new(HashMap::new()),
            parked: Mutex::new(HashMap::new()),
            pieces: Mutex::new(HashMap::new()),
            download_delay: Mutex::new(None),
            download_failure: Mutex::new(None),
            corrupt_downloads: AtomicBool::new(false),
            addition_statuses: Mutex::new(HashMap::new()),
            status_failures_after: Mutex::new(None),
            data_sets: Mutex::new(HashMap::new()),
            list_requests: Mutex::new(Vec::new()),
            ping_calls: AtomicU32::new(0),
            upload_calls: AtomicU32::new(0),
            find_calls: AtomicU32::new(0),
            status_calls: AtomicU32::new(0),
            download_calls: AtomicU32::new(0),
        }
    }

    /// Set liveness.
    pub fn with_available(self, available: bool) -> Self {
        self.available.store(available, Ordering::SeqCst);
        self
    }

    /// Delay every ping by `delay` (for probe timeout tests).
    pub fn with_ping_delay(self, delay: Duration) -> Self {
        *self.ping_delay.lock().unwrap() = Some(delay);
        self
    }

    /// Fail the next `n` uploads.
    pub fn with_upload_failures(self, n: u32) -> Self {
        self.fail_next_uploads.store(n, Ordering::SeqCst);
        self
    }

    /// Answer uploads with an identifier that does not match the bytes.
    pub fn with_wrong_upload_cid(self) -> Self {
        self.wrong_cid_on_upload.store(true, Ordering::SeqCst);
        self
    }

    /// Require `polls` find_piece calls before a piece reports parked.
    pub fn with_parking_polls(mut self, polls: u32) -> Self {
        self.parking_polls = polls;
        self
    }

    /// Never report uploaded pieces as parked.
    pub fn with_never_park(mut self) -> Self {
        self.parking_polls = u32::MAX;
        self
    }

    /// Preload a piece as parked and downloadable.
    pub fn with_piece(self, data: &[u8]) -> Self {
        let cid = PieceCid::from_data(data);
        self.pieces
            .lock()
            .unwrap()
            .insert(cid, Bytes::copy_from_slice(data));
        self.parked.lock().unwrap().insert(cid, ());
        self
    }

    /// Delay every download by `delay` (for race ordering tests).
    pub fn with_download_delay(self, delay: Duration) -> Self {
        *self.download_delay.lock().unwrap() = Some(delay);
        self
    }

    /// Fail every download with `reason`.
    pub fn with_download_failure(self, reason: impl Into<String>) -> Self {
        *self.download_failure.lock().unwrap() = Some(reason.into());
        self
    }

    /// Serve downloads with bytes that do not match the identifier.
    pub fn with_corrupt_downloads(self) -> Self {
        self.corrupt_downloads.store(true, Ordering::SeqCst);
        self
    }

    /// Fail every addition-status call after the first `calls` answers.
    pub fn with_status_failures_after(self, calls: u32) -> Self {
        *self.status_failures_after.lock().unwrap() = Some(calls);
        self
    }

    /// Set the provider view of a data set.
    pub fn with_data_set_state(self, state: ProviderDataSetState) -> Self {
        self.data_sets.lock().unwrap().insert(state.id, state);
        self
    }

    /// Flip liveness after construction.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Script the addition status served for `tx_hash`.
    pub fn set_addition_status(&self, tx_hash: TxHash, status: PieceAdditionStatus) {
        self.set_addition_status_after(tx_hash, 0, status);
    }

    /// Script the addition status, preceded by `none_polls` unknown answers.
    pub fn set_addition_status_after(
        &self,
        tx_hash: TxHash,
        none_polls: u32,
        status: PieceAdditionStatus,
    ) {
        self.addition_statuses.lock().unwrap().insert(
            tx_hash,
            StatusScript {
                none_polls_remaining: none_polls,
                status,
            },
        );
    }

    /// Append confirmed pieces to the provider view of a data set.
    pub fn add_confirmed_pieces(&self, data_set_id: u64, confirmed: &[(u64, PieceCid)]) {
        let mut sets = self.data_sets.lock().unwrap();
        let state = sets.entry(data_set_id).or_insert(ProviderDataSetState {
            id: data_set_id,
            pieces: Vec::new(),
            next_challenge_epoch: 0,
        });
        for (piece_id, piece_cid) in confirmed {
            state.pieces.push(DataSetPiece {
                piece_id: *piece_id,
                piece_cid: *piece_cid,
            });
        }
    }

    /// Set the next challenge epoch reported for a data set.
    pub fn set_next_challenge_epoch(&self, data_set_id: u64, epoch: u64) {
        let mut sets = self.data_sets.lock().unwrap();
        let state = sets.entry(data_set_id).or_insert(ProviderDataSetState {
            id: data_set_id,
            pieces: Vec::new(),
            next_challenge_epoch: 0,
        });
        state.next_challenge_epoch = epoch;
    }

    /// Recorded (offset, limit) pairs from list_pieces calls.
    pub fn list_requests(&self) -> Vec<(u64, u64)> {
        self.list_requests.lock().unwrap().clone()
    }

    pub fn ping_calls(&self) -> u32 {
        self.ping_calls.load(Ordering::SeqCst)
    }

    pub fn upload_calls(&self) -> u32 {
        self.upload_calls.load(Ordering::SeqCst)
    }

    pub fn find_calls(&self) -> u32 {
        self.find_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> u32 {
        self.download_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderTransport for MockProviderTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn ping(&self) -> Result<()> {
        self.ping_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.ping_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(SdkError::Provider {
                status: 503,
                endpoint: self.endpoint.clone(),
                message: "ping failed".to_string(),
            });
        }
        Ok(())
    }

    async fn upload_piece(&self, data: Bytes) -> Result<UploadPieceResponse> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);

        if self
            .fail_next_uploads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SdkError::Provider {
                status: 500,
                endpoint: self.endpoint.clone(),
                message: "upload rejected".to_string(),
            });
        }

        let size = data.len() as u64;
        let piece_cid = PieceCid::from_data(&data);
        self.pieces.lock().unwrap().insert(piece_cid, data);
        if self.parking_polls == 0 {
            self.parked.lock().unwrap().insert(piece_cid, ());
        } else {
            self.pending_parks
                .lock()
                .unwrap()
                .insert(piece_cid, self.parking_polls);
        }

        let reported = if self.wrong_cid_on_upload.load(Ordering::SeqCst) {
            PieceCid::from_data(b"mock wrong cid")
        } else {
            piece_cid
        };
        Ok(UploadPieceResponse {
            piece_cid: reported,
            size,
        })
    }

    async fn find_piece(&self, piece_cid: &PieceCid) -> Result<bool> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);

        if self.parked.lock().unwrap().contains_key(piece_cid) {
            return Ok(true);
        }
        let mut pending = self.pending_parks.lock().unwrap();
        if let Some(remaining) = pending.get_mut(piece_cid) {
            if *remaining == u32::MAX {
                return Ok(false);
            }
            *remaining -= 1;
            if *remaining == 0 {
                pending.remove(piece_cid);
                self.parked.lock().unwrap().insert(*piece_cid, ());
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn piece_addition_status(
        &self,
        _data_set_id: u64,
        tx_hash: &TxHash,
    ) -> Result<Option<PieceAdditionStatus>> {
        let calls = self.status_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(limit) = *self.status_failures_after.lock().unwrap() {
            if calls > limit {
                return Err(SdkError::Provider {
                    status: 500,
                    endpoint: self.endpoint.clone(),
                    message: "status endpoint unavailable".to_string(),
                });
            }
        }

        let mut scripts = self.addition_statuses.lock().unwrap();
        match scripts.get_mut(tx_hash) {
            None => Ok(None),
            Some(script) if script.none_polls_remaining > 0 => {
                script.none_polls_remaining -= 1;
                Ok(None)
            }
            Some(script) => Ok(Some(script.status.clone())),
        }
    }

    async fn data_set_state(&self, data_set_id: u64) -> Result<ProviderDataSetState> {
        self.data_sets
            .lock()
            .unwrap()
            .get(&data_set_id)
            .cloned()
            .ok_or(SdkError::DataSetNotFound(data_set_id))
    }

    async fn list_pieces(&self, data_set_id: u64, offset: u64, limit: u64) -> Result<PiecePage> {
        self.list_requests.lock().unwrap().push((offset, limit));
        let sets = self.data_sets.lock().unwrap();
        let state = sets
            .get(&data_set_id)
            .ok_or(SdkError::DataSetNotFound(data_set_id))?;
        let total = state.pieces.len() as u64;
        let start = offset.min(total) as usize;
        let end = (offset + limit).min(total) as usize;
        Ok(PiecePage {
            pieces: state.pieces[start..end].to_vec(),
            total,
            offset,
            limit,
        })
    }

    async fn download_piece(&self, piece_cid: &PieceCid) -> Result<Bytes> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.download_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = self.download_failure.lock().unwrap().clone() {
            return Err(SdkError::RetrievalFailed {
                piece_cid: piece_cid.to_string(),
                endpoint: self.endpoint.clone(),
                reason,
            });
        }
        if self.corrupt_downloads.load(Ordering::SeqCst) {
            return Ok(Bytes::from_static(b"corrupt payload"));
        }
        self.pieces
            .lock()
            .unwrap()
            .get(piece_cid)
            .cloned()
            .ok_or_else(|| SdkError::RetrievalFailed {
                piece_cid: piece_cid.to_string(),
                endpoint: self.endpoint.clone(),
                reason: "piece not found".to_string(),
            })
    }
}

/// Factory serving pre-registered mock transports by endpoint.
pub struct MockTransportFactory {
    transports: Mutex<HashMap<String, Arc<MockProviderTransport>>>,
    connect_calls: AtomicU32,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self {
            transports: Mutex::new(HashMap::new()),
            connect_calls: AtomicU32::new(0),
        }
    }

    /// Register a transport under its own endpoint.
    pub fn register(&self, transport: Arc<MockProviderTransport>) {
        self.transports
            .lock()
            .unwrap()
            .insert(transport.endpoint().to_string(), transport);
    }

    /// Registered transport for an endpoint, if any.
    pub fn get(&self, endpoint: &str) -> Option<Arc<MockProviderTransport>> {
        self.transports
            .lock()
            .unwrap()
            .get(endpoint.trim_end_matches('/'))
            .cloned()
    }

    pub fn connect_calls(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockTransportFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderTransportFactory for MockTransportFactory {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn ProviderTransport>> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.transports
            .lock()
            .unwrap()
            .get(endpoint.trim_end_matches('/'))
            .cloned()
            .map(|t| t as Arc<dyn ProviderTransport>)
            .ok_or_else(|| {
                SdkError::Config(format!("no mock transport registered for {}", endpoint))
            })
    }
}
