//! Types for the warm-storage data model and provider API

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::piece::PieceCid;

/// Metadata key marking a data set as CDN-enabled
pub const METADATA_KEY_WITH_CDN: &str = "withCDN";

/// Metadata key marking a data set as IPNI-indexed
pub const METADATA_KEY_WITH_IPNI: &str = "withIPNI";

/// Capability key marking an offering as non-production
pub const CAPABILITY_DEV: &str = "dev";

/// On-chain account address, normalized to lowercase hex
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    pub fn new(addr: impl Into<String>) -> Self {
        Address(addr.into().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address::new(s)
    }
}

/// Transaction hash, normalized to lowercase hex
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHash(String);

impl TxHash {
    pub fn new(hash: impl Into<String>) -> Self {
        TxHash(hash.into().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TxHash {
    fn from(s: &str) -> Self {
        TxHash::new(s)
    }
}

// ============================================================================
// Provider Registry Types
// ============================================================================

/// Approved storage provider from the on-chain registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    /// Registry id
    pub id: u64,
    /// Operator address
    pub address: Address,
    /// Payment recipient address
    pub payee: Address,
    /// Human-readable name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// False once the provider is deactivated in the registry
    pub active: bool,
    /// Product offerings published by the provider
    pub products: ProviderProducts,
}

impl ProviderInfo {
    /// Proof-of-data-possession offering, when published
    pub fn pdp(&self) -> Option<&PdpOffering> {
        self.products.pdp.as_ref()
    }
}

/// Product offerings attached to a registry entry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderProducts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdp: Option<PdpOffering>,
}

/// Proof-of-data-possession product offering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdpOffering {
    /// HTTP endpoint of the provider's storage API
    pub service_url: String,
    /// Smallest accepted piece in bytes
    pub min_piece_size: u64,
    /// Largest accepted piece in bytes
    pub max_piece_size: u64,
    /// Price in attofil per TiB per month
    pub storage_price_per_tib_per_month: u128,
    /// Shortest proving period the provider commits to
    pub min_proving_period_epochs: u64,
    /// Free-form location hint
    pub location: String,
    /// Provider serves pieces through a CDN
    pub with_cdn: bool,
    /// Provider announces pieces to IPNI
    pub with_ipni: bool,
    /// Open-ended capability map; the `dev` key marks test offerings
    #[serde(default)]
    pub capabilities: HashMap<String, String>,
}

impl PdpOffering {
    /// True when the offering carries the `dev` capability
    pub fn is_dev(&self) -> bool {
        self.capabilities.contains_key(CAPABILITY_DEV)
    }
}

// ============================================================================
// Data Set Types
// ============================================================================

/// On-chain data set record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSetInfo {
    /// Chain-assigned id
    pub data_set_id: u64,
    /// Registry id of the owning provider
    pub provider_id: u64,
    /// Paying client address
    pub payer: Address,
    /// Provider payment address
    pub payee: Address,
    /// True while the set participates in proving
    pub live: bool,
    /// Serves retrievals through a CDN
    pub with_cdn: bool,
    /// Number of live pieces
    pub piece_count: u64,
    /// Next piece id the chain will assign
    pub next_piece_id: u64,
    /// Client-scoped sequence number carried by piece additions
    pub client_seq: u64,
    /// Data set metadata (withCDN, withIPNI, application keys)
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl DataSetInfo {
    /// True when metadata marks the set CDN-enabled
    pub fn has_cdn(&self) -> bool {
        self.with_cdn || self.metadata.contains_key(METADATA_KEY_WITH_CDN)
    }

    /// True when metadata marks the set IPNI-indexed
    pub fn has_ipni(&self) -> bool {
        self.metadata.contains_key(METADATA_KEY_WITH_IPNI)
    }
}

/// Outcome of context resolution
#[derive(Debug, Clone)]
pub struct DataSetResolution {
    /// Selected provider snapshot
    pub provider: ProviderInfo,
    /// Existing data set, `None` when a new set will be created on the
    /// first upload
    pub data_set: Option<DataSetInfo>,
}

impl DataSetResolution {
    /// True when an existing data set was bound
    pub fn is_existing(&self) -> bool {
        self.data_set.is_some()
    }
}

// ============================================================================
// Chain Read Types
// ============================================================================

/// Chain head observation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainHead {
    pub epoch: u64,
    pub timestamp: DateTime<Utc>,
}

/// Proving schedule parameters shared by every data set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvingSchedule {
    /// Longest allowed gap between proofs
    pub max_proving_period_epochs: u64,
    /// Width of the challenge window at the end of each period
    pub challenge_window_epochs: u64,
}

/// Receipt for a settled transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub status: TxStatus,
    pub block_number: u64,
}

/// Settlement status of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

// ============================================================================
// Provider API Types
// ============================================================================

/// Response from the piece upload endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadPieceResponse {
    /// Identifier the provider computed for the received bytes
    pub piece_cid: PieceCid,
    /// Bytes received
    pub size: u64,
}

/// Response to a relayed write (data set creation, piece addition)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxSubmission {
    pub tx_hash: TxHash,
    /// Provider status endpoint for the relayed transaction, when served
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_url: Option<String>,
}

/// Parameters for data set creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDataSetRequest {
    /// Registry id of the provider that will own the set
    pub provider_id: u64,
    /// Paying client address
    pub payer: Address,
    /// Serve retrievals through a CDN
    pub with_cdn: bool,
    /// Metadata recorded on the new set
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Status of a relayed piece addition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PieceAdditionStatus {
    pub tx_status: TxStatus,
    /// Provider acknowledgement of the addition, absent until processed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub add_message_ok: Option<bool>,
    /// Chain-assigned piece ids in submission order, absent until acknowledged
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_piece_ids: Option<Vec<u64>>,
}

/// Settled outcome of one upload
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UploadResult {
    /// Chain-assigned piece id
    pub piece_id: u64,
    pub piece_cid: PieceCid,
    /// Piece size in bytes
    pub size: u64,
}

/// One piece of a data set as reported by the provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSetPiece {
    pub piece_id: u64,
    pub piece_cid: PieceCid,
}

/// Provider view of a data set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDataSetState {
    pub id: u64,
    pub pieces: Vec<DataSetPiece>,
    pub next_challenge_epoch: u64,
}

/// One page of a paginated piece listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiecePage {
    pub pieces: Vec<DataSetPiece>,
    /// Total pieces in the data set
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

// ============================================================================
// Status and Preflight Types
// ============================================================================

/// Combined provider/chain status of one piece
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PieceStatus {
    /// Provider has the piece
    pub exists: bool,
    /// The containing data set participates in proving
    pub data_set_live: bool,
    /// Chain-assigned piece id, when the piece is part of the set
    pub piece_id: Option<u64>,
    /// Epoch at which the current challenge window closes
    pub next_challenge_epoch: Option<u64>,
    /// Epoch at which the current challenge window opens
    pub challenge_window_start: Option<u64>,
    /// Chain head is inside the challenge window
    pub in_challenge_window: bool,
    /// Chain head has passed the window without a proof
    pub proof_overdue: bool,
    /// Estimated wall-clock open of the challenge window
    pub window_opens_at: Option<DateTime<Utc>>,
    /// Estimated wall-clock close of the challenge window
    pub window_closes_at: Option<DateTime<Utc>>,
    /// Direct retrieval URL on the provider, when the piece exists
    pub retrieval_url: Option<String>,
}

/// Storage cost estimate for a piece size
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CostEstimate {
    pub per_epoch: u128,
    pub per_day: u128,
    pub per_month: u128,
}

/// Result of an allowance check against the payments service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowanceCheck {
    /// None when the chain service exposes no payments surface
    pub sufficient: Option<bool>,
    pub message: String,
}

/// Result of an upload preflight
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightResult {
    pub estimated_cost: CostEstimate,
    pub allowance_check: AllowanceCheck,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_normalizes_case() {
        let a = Address::new("0xAbCd00");
        let b = Address::new("0xabcd00");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "0xabcd00");
    }

    #[test]
    fn test_dev_capability() {
        let mut offering = PdpOffering {
            service_url: "https://provider.example".to_string(),
            min_piece_size: 127,
            max_piece_size: 1 << 30,
            storage_price_per_tib_per_month: 0,
            min_proving_period_epochs: 2880,
            location: String::new(),
            with_cdn: false,
            with_ipni: false,
            capabilities: HashMap::new(),
        };
        assert!(!offering.is_dev());
        offering
            .capabilities
            .insert(CAPABILITY_DEV.to_string(), "true".to_string());
        assert!(offering.is_dev());
    }

    #[test]
    fn test_tx_status_serde() {
        let s: TxStatus = serde_json::from_str("\"confirmed\"").unwrap();
        assert_eq!(s, TxStatus::Confirmed);
        assert_eq!(serde_json::to_string(&TxStatus::Pending).unwrap(), "\"pending\"");
    }
}
