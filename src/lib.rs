//! Client SDK for decentralized warm-storage networks
//!
//! Clients pay storage providers to hold pieces of data, settled through
//! on-chain payment rails and proven with a recurring proof-of-data-
//! possession protocol. This SDK covers the client side of that system:
//!
//! - **Context resolution** ([`StorageContext::create`]): bind a session
//!   to one provider and data set from optional hints (explicit ids,
//!   addresses, capability filters), probing candidate providers for
//!   liveness and reusing existing data sets where possible.
//! - **Batched uploads** ([`StorageContext::upload`]): concurrent uploads
//!   coalesce into shared on-chain piece additions, each caller settling
//!   independently with its chain-assigned piece id.
//! - **Raced retrieval** ([`PieceRetriever`]): concurrent downloads
//!   against every provider holding the client's data, first verified
//!   success wins, optional fallback retriever behind them.
//!
//! The chain and the provider HTTP API are reached through the
//! [`ChainService`] and [`ProviderTransport`] traits; mock
//! implementations of both ship in-crate for tests.
//!
//! ```no_run
//! use std::sync::Arc;
//! use warmstore_sdk::{
//!     ContextCallbacks, ContextOptions, HttpTransportFactory, StorageContext, UploadCallbacks,
//! };
//!
//! # async fn run(chain: Arc<dyn warmstore_sdk::ChainService>) -> warmstore_sdk::Result<()> {
//! let factory = Arc::new(HttpTransportFactory::default());
//! let context = StorageContext::create(
//!     chain,
//!     factory,
//!     "0xclient".into(),
//!     ContextOptions::default(),
//!     ContextCallbacks::default(),
//! )
//! .await?;
//!
//! let result = context
//!     .upload(vec![0u8; 1024], UploadCallbacks::default())
//!     .await?;
//! println!("stored piece {} as id {}", result.piece_cid, result.piece_id);
//! # Ok(())
//! # }
//! ```

pub mod abort;
pub mod chain;
pub mod config;
pub mod context;
pub mod error;
pub mod health;
pub mod piece;
pub mod resolver;
pub mod retrieval;
pub mod transport;
pub mod types;

// Session surface
pub use context::{PieceCursor, StorageContext};
pub use resolver::ContextResolver;
pub use retrieval::{PieceRetriever, Retriever};

// Options and callbacks
pub use config::{
    ContextCallbacks, ContextOptions, PieceListOptions, RetrievalOptions, TimingConfig,
    UploadCallbacks, DEFAULT_UPLOAD_BATCH_SIZE, MAX_UPLOAD_SIZE, MIN_UPLOAD_SIZE,
};

// Identifiers, errors, cancellation
pub use abort::{AbortHandle, AbortSignal};
pub use error::{Result, SdkError};
pub use piece::PieceCid;

// Data model records
pub use types::{
    Address, AllowanceCheck, ChainHead, CostEstimate, CreateDataSetRequest, DataSetInfo,
    DataSetPiece, DataSetResolution, PdpOffering, PieceAdditionStatus, PiecePage, PieceStatus,
    PreflightResult, ProviderDataSetState, ProviderInfo, ProviderProducts, ProvingSchedule,
    TxHash, TxReceipt, TxStatus, TxSubmission, UploadPieceResponse, UploadResult,
};

// Collaborator seams
pub use chain::{wait_for_transaction, ChainService, PaymentsService, EPOCH_DURATION};
pub use transport::{
    HttpProviderTransport, HttpTransportConfig, HttpTransportFactory, ProviderTransport,
    ProviderTransportFactory,
};
