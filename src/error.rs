//! Error types for warmstore-sdk

use thiserror::Error;

/// Result type for SDK operations
pub type Result<T> = std::result::Result<T, SdkError>;

/// SDK error types
///
/// Every message carries the concrete values involved (sizes, ids,
/// addresses) so non-interactive failures can be diagnosed from logs alone.
#[derive(Error, Debug)]
pub enum SdkError {
    /// Upload size outside the supported bounds
    #[error("Piece size {size} bytes is outside the supported range ({min} to {max} bytes)")]
    SizeLimit { size: u64, min: u64, max: u64 },

    /// Data set missing on chain
    #[error("Data set {0} not found")]
    DataSetNotFound(u64),

    /// Provider missing from the registry
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    /// Explicit selection hints disagree with each other
    #[error("Conflicting selection: {0}")]
    ProviderConflict(String),

    /// Registry has no provider matching the requested capabilities
    #[error("No providers available: {0}")]
    NoProvidersAvailable(String),

    /// Every candidate provider failed its liveness probe
    #[error("All {attempted} candidate providers failed the health check")]
    AllProvidersFailedHealthCheck { attempted: usize },

    /// Piece upload to a provider failed
    #[error("Upload of piece {piece_cid} to {endpoint} failed: {reason}")]
    UploadTransport {
        piece_cid: String,
        endpoint: String,
        reason: String,
    },

    /// Provider did not confirm piece parking in time
    #[error("Piece {piece_cid} was not parked on {endpoint} within {timeout_ms} ms")]
    PieceParkingTimeout {
        piece_cid: String,
        endpoint: String,
        timeout_ms: u64,
    },

    /// Data set creation through the provider failed
    #[error("Data set creation failed: {0}")]
    DataSetCreation(String),

    /// Piece addition submission failed for the whole batch
    #[error("Failed to add {piece_count} pieces to data set {data_set_id}: {reason}")]
    AddPieces {
        data_set_id: u64,
        piece_count: usize,
        reason: String,
    },

    /// The piece addition transaction failed or never confirmed on chain
    #[error("On-chain confirmation failed for transaction {tx_hash}: {reason}")]
    OnChainConfirmation { tx_hash: String, reason: String },

    /// Transaction confirmed but the provider never acknowledged the pieces
    #[error("Transaction {tx_hash} confirmed but piece addition was not acknowledged within {timeout_ms} ms")]
    VerificationTimeout { tx_hash: String, timeout_ms: u64 },

    /// Retrieval from a specific provider failed
    #[error("Failed to retrieve piece {piece_cid} from {endpoint}: {reason}")]
    RetrievalFailed {
        piece_cid: String,
        endpoint: String,
        reason: String,
    },

    /// Every candidate provider failed to serve the piece
    #[error("Failed to retrieve piece {piece_cid} from any provider: {attempts}")]
    AllRetrievalsFailed { piece_cid: String, attempts: String },

    /// Operation cancelled through its abort signal
    #[error("Operation aborted: {0}")]
    Aborted(String),

    /// Malformed piece identifier
    #[error("Invalid piece identifier: {0}")]
    InvalidPieceCid(String),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Chain service call failed
    #[error("Chain error during {operation}: {message}")]
    Chain { operation: String, message: String },

    /// Provider returned an error status
    #[error("Provider error {status} from {endpoint}: {message}")]
    Provider {
        status: u16,
        endpoint: String,
        message: String,
    },

    /// Operation not supported by the connected services
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<cid::Error> for SdkError {
    fn from(e: cid::Error) -> Self {
        SdkError::InvalidPieceCid(e.to_string())
    }
}

impl From<url::ParseError> for SdkError {
    fn from(e: url::ParseError) -> Self {
        SdkError::Config(format!("invalid URL: {}", e))
    }
}
