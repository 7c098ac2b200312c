//! Piece identifiers
//!
//! Pieces are content addressed with CIDv1 over SHA256 (raw codec), the
//! same identifier providers return from their upload endpoint. Parsing
//! accepts any CID string but requires a 32-byte SHA256 digest so every
//! identifier in the SDK can be re-verified against piece bytes.

use std::fmt;
use std::str::FromStr;

use cid::Cid;
use multihash_codetable::{Code, MultihashDigest};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::SdkError;

/// Multicodec code for raw binary content
const RAW_CODEC: u64 = 0x55;

/// SHA256 digest length in bytes
const SHA256_LEN: usize = 32;

/// Content identifier of a single piece
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PieceCid(Cid);

impl PieceCid {
    /// Compute the identifier for a slice of piece bytes
    pub fn from_data(data: &[u8]) -> Self {
        let hash = Code::Sha2_256.digest(data);
        PieceCid(Cid::new_v1(RAW_CODEC, hash))
    }

    /// Raw SHA256 digest carried by the identifier
    pub fn digest(&self) -> &[u8] {
        self.0.hash().digest()
    }

    /// Underlying CID
    pub fn as_cid(&self) -> &Cid {
        &self.0
    }

    /// True when `data` hashes to this identifier
    pub fn matches(&self, data: &[u8]) -> bool {
        Code::Sha2_256.digest(data).digest() == self.digest()
    }
}

impl fmt::Display for PieceCid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PieceCid {
    type Err = SdkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cid = Cid::from_str(s)
            .map_err(|e| SdkError::InvalidPieceCid(format!("{}: {}", s, e)))?;
        let digest = cid.hash().digest();
        if digest.len() != SHA256_LEN {
            return Err(SdkError::InvalidPieceCid(format!(
                "{}: unsupported hash (expected SHA256, got {} bytes)",
                s,
                digest.len()
            )));
        }
        Ok(PieceCid(cid))
    }
}

impl Serialize for PieceCid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for PieceCid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        PieceCid::from_str(&s).map_err(serde::de::Error::custom)
    }
}
