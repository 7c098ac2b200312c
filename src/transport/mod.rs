//! Provider transport
//!
//! HTTP surface of a storage provider: liveness, piece upload and parking
//! checks, relayed-transaction status, data set state, and byte retrieval.
//! The resolver and engines speak to providers only through this trait so
//! tests can script provider behavior without a network.

pub mod http;
pub mod mock;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::piece::PieceCid;
use crate::types::{
    PieceAdditionStatus, PiecePage, ProviderDataSetState, TxHash, UploadPieceResponse,
};

pub use http::{HttpProviderTransport, HttpTransportConfig, HttpTransportFactory};

/// Client for one provider endpoint
#[async_trait]
pub trait ProviderTransport: Send + Sync {
    /// Base URL this transport talks to
    fn endpoint(&self) -> &str;

    /// Direct retrieval URL for a piece on this provider
    fn piece_url(&self, piece_cid: &PieceCid) -> String {
        format!(
            "{}/piece/{}",
            self.endpoint().trim_end_matches('/'),
            piece_cid
        )
    }

    /// Cheap liveness check
    async fn ping(&self) -> Result<()>;

    /// Upload one piece; the provider answers with the identifier it
    /// computed from the received bytes
    async fn upload_piece(&self, data: Bytes) -> Result<UploadPieceResponse>;

    /// True once the piece is parked and retrievable
    async fn find_piece(&self, piece_cid: &PieceCid) -> Result<bool>;

    /// Provider view of a relayed piece addition, `None` while the
    /// provider has not yet seen the transaction
    async fn piece_addition_status(
        &self,
        data_set_id: u64,
        tx_hash: &TxHash,
    ) -> Result<Option<PieceAdditionStatus>>;

    /// Provider view of a data set
    async fn data_set_state(&self, data_set_id: u64) -> Result<ProviderDataSetState>;

    /// One page of the data set's piece listing
    async fn list_pieces(&self, data_set_id: u64, offset: u64, limit: u64) -> Result<PiecePage>;

    /// Download one piece
    async fn download_piece(&self, piece_cid: &PieceCid) -> Result<Bytes>;
}

/// Connects [`ProviderTransport`] instances to provider endpoints
pub trait ProviderTransportFactory: Send + Sync {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn ProviderTransport>>;
}
