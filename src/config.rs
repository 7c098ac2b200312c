//! Configuration for contexts, uploads, listing, and retrieval

use std::collections::HashMap;
use std::time::Duration;

use crate::abort::AbortSignal;
use crate::piece::PieceCid;
use crate::types::{Address, DataSetResolution, ProviderInfo, TxHash};

/// Smallest accepted upload in bytes
pub const MIN_UPLOAD_SIZE: u64 = 127;

/// Largest accepted upload in bytes (200 MiB)
pub const MAX_UPLOAD_SIZE: u64 = 200 * 1024 * 1024;

/// Default number of queued uploads coalesced into one piece addition
pub const DEFAULT_UPLOAD_BATCH_SIZE: usize = 32;

/// Default page size for paginated piece listing
pub const DEFAULT_PIECE_PAGE_SIZE: u64 = 64;

/// Timing knobs for the polling and batching loops
///
/// Defaults suit production chains; [`TimingConfig::for_tests`] shrinks
/// every knob to milliseconds so the full pipeline runs inside a unit test.
#[derive(Debug, Clone)]
pub struct TimingConfig {
    /// Quiet window before a partial batch is flushed
    pub batch_debounce: Duration,
    /// Interval between piece parking checks
    pub parking_poll_interval: Duration,
    /// Give-up bound for piece parking
    pub parking_timeout: Duration,
    /// Interval between piece addition status checks
    pub status_poll_interval: Duration,
    /// Give-up bound for on-chain propagation of a relayed transaction
    pub propagation_timeout: Duration,
    /// Give-up bound for provider acknowledgement after confirmation
    pub verification_timeout: Duration,
    /// Interval between chain receipt polls
    pub tx_poll_interval: Duration,
    /// Give-up bound for chain receipt polls
    pub tx_timeout: Duration,
    /// Per-probe bound for provider liveness pings
    pub ping_timeout: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            batch_debounce: Duration::from_millis(50),
            parking_poll_interval: Duration::from_secs(1),
            parking_timeout: Duration::from_secs(120),
            status_poll_interval: Duration::from_secs(2),
            propagation_timeout: Duration::from_secs(180),
            verification_timeout: Duration::from_secs(120),
            tx_poll_interval: Duration::from_secs(2),
            tx_timeout: Duration::from_secs(180),
            ping_timeout: Duration::from_secs(5),
        }
    }
}

impl TimingConfig {
    /// Millisecond-scale profile for exercising the pipeline in tests
    pub fn for_tests() -> Self {
        Self {
            batch_debounce: Duration::from_millis(20),
            parking_poll_interval: Duration::from_millis(5),
            parking_timeout: Duration::from_millis(200),
            status_poll_interval: Duration::from_millis(5),
            propagation_timeout: Duration::from_millis(300),
            verification_timeout: Duration::from_millis(150),
            tx_poll_interval: Duration::from_millis(5),
            tx_timeout: Duration::from_millis(250),
            ping_timeout: Duration::from_millis(50),
        }
    }
}

/// Options for resolving a storage context
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// Pin selection to a registry id
    pub provider_id: Option<u64>,
    /// Pin selection to an operator address
    pub provider_address: Option<Address>,
    /// Reuse a specific data set
    pub data_set_id: Option<u64>,
    /// Always create a fresh data set, never reuse
    pub force_create_data_set: bool,
    /// Require CDN-enabled storage
    pub with_cdn: bool,
    /// Require IPNI announcement
    pub with_ipni: bool,
    /// Extra metadata recorded when a data set is created
    pub metadata: HashMap<String, String>,
    /// Include dev-capability offerings in automatic selection
    pub allow_dev_providers: bool,
    /// Queued uploads per piece addition
    pub upload_batch_size: usize,
    /// Timing profile for the polling loops
    pub timing: TimingConfig,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            provider_id: None,
            provider_address: None,
            data_set_id: None,
            force_create_data_set: false,
            with_cdn: false,
            with_ipni: false,
            metadata: HashMap::new(),
            allow_dev_providers: false,
            upload_batch_size: DEFAULT_UPLOAD_BATCH_SIZE,
            timing: TimingConfig::default(),
        }
    }
}

/// Hooks fired once context resolution completes
///
/// Both fire synchronously before `create` returns, carrying the final
/// provider snapshot and the bound (or pending) data set. Observability
/// only, never control flow.
#[derive(Default)]
pub struct ContextCallbacks {
    pub on_provider_selected: Option<Box<dyn FnOnce(&ProviderInfo) + Send>>,
    pub on_data_set_resolved: Option<Box<dyn FnOnce(&DataSetResolution) + Send>>,
}

/// Per-upload progress hooks
///
/// Fired by the batching engine as one upload moves through its pipeline
/// stages. Observability only, never control flow.
#[derive(Default)]
pub struct UploadCallbacks {
    /// Piece bytes parked at the provider
    pub on_upload_complete: Option<Box<dyn FnOnce(&PieceCid) + Send>>,
    /// Piece included in a relayed addition transaction
    pub on_piece_added: Option<Box<dyn FnOnce(&TxHash) + Send>>,
    /// Chain-assigned piece id confirmed
    pub on_piece_confirmed: Option<Box<dyn FnOnce(u64) + Send>>,
}

/// Options for a single retrieval
#[derive(Debug, Clone, Default)]
pub struct RetrievalOptions {
    /// Pin retrieval to one provider instead of racing all candidates
    pub provider_address: Option<Address>,
    /// Cooperative cancellation
    pub abort: Option<AbortSignal>,
}

/// Options for paginated piece listing
#[derive(Debug, Clone)]
pub struct PieceListOptions {
    /// Pieces pulled per page
    pub page_size: u64,
    /// Starting offset into the data set
    pub offset: u64,
    /// Cooperative cancellation checked between pulls
    pub abort: Option<AbortSignal>,
}

impl Default for PieceListOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PIECE_PAGE_SIZE,
            offset: 0,
            abort: None,
        }
    }
}
