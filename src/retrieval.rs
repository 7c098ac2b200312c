//! Piece retrieval race engine
//!
//! Retrieval enumerates every provider holding pieces for the client and
//! races concurrent download attempts, resolving with the first verified
//! success. Losing attempts are dropped, which aborts their in-flight
//! requests; a slow provider never blocks a fast one, and one provider's
//! failure never fails the race. An optional fallback retriever is
//! consulted only once every provider attempt is exhausted.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, warn};

use crate::abort::AbortSignal;
use crate::chain::ChainService;
use crate::config::RetrievalOptions;
use crate::error::{Result, SdkError};
use crate::piece::PieceCid;
use crate::transport::{ProviderTransport, ProviderTransportFactory};
use crate::types::{Address, ProviderInfo};

/// Byte retrieval by piece identifier
///
/// Implemented by [`PieceRetriever`] and by fallback children chained
/// behind it.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Fetch the bytes of one piece on behalf of `client`
    async fn fetch_piece(
        &self,
        piece_cid: &PieceCid,
        client: &Address,
        options: &RetrievalOptions,
    ) -> Result<Bytes>;
}

/// Races piece downloads across the providers holding a client's data
pub struct PieceRetriever {
    chain: Arc<dyn ChainService>,
    factory: Arc<dyn ProviderTransportFactory>,
    fallback: Option<Arc<dyn Retriever>>,
}

impl PieceRetriever {
    pub fn new(chain: Arc<dyn ChainService>, factory: Arc<dyn ProviderTransportFactory>) -> Self {
        Self {
            chain,
            factory,
            fallback: None,
        }
    }

    /// Chain a child retriever consulted after every provider attempt fails
    pub fn with_fallback(mut self, fallback: Arc<dyn Retriever>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    async fn fetch_inner(
        &self,
        piece_cid: &PieceCid,
        client: &Address,
        options: &RetrievalOptions,
    ) -> Result<Bytes> {
        if let Some(address) = &options.provider_address {
            return self.fetch_pinned(piece_cid, client, address, options).await;
        }
        self.fetch_raced(piece_cid, client, options).await
    }

    /// Single-provider path: no race, fallback on any failure
    async fn fetch_pinned(
        &self,
        piece_cid: &PieceCid,
        client: &Address,
        address: &Address,
        options: &RetrievalOptions,
    ) -> Result<Bytes> {
        let provider = match self.chain.get_provider_by_address(address).await? {
            Some(provider) if self.chain.is_provider_approved(provider.id).await? => provider,
            _ => {
                if let Some(fallback) = &self.fallback {
                    debug!(address = %address, "Pinned provider unavailable, delegating to fallback");
                    return fallback
                        .fetch_piece(piece_cid, client, &child_options(options))
                        .await;
                }
                return Err(SdkError::ProviderNotFound(format!(
                    "{} is not an approved provider",
                    address
                )));
            }
        };

        match self.attempt(&provider, piece_cid).await {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                if let Some(fallback) = &self.fallback {
                    warn!(address = %address, error = %e, "Pinned retrieval failed, delegating to fallback");
                    return fallback
                        .fetch_piece(piece_cid, client, &child_options(options))
                        .await;
                }
                Err(e)
            }
        }
    }

    /// Raced path: concurrent attempts against every distinct provider
    /// owning a live, non-empty data set of the client
    async fn fetch_raced(
        &self,
        piece_cid: &PieceCid,
        client: &Address,
        options: &RetrievalOptions,
    ) -> Result<Bytes> {
        let sets = self.chain.get_client_data_sets(client).await?;
        let mut seen = HashSet::new();
        let mut candidates: Vec<ProviderInfo> = Vec::new();
        for data_set in sets.iter().filter(|ds| ds.live && ds.piece_count > 0) {
            if !seen.insert(data_set.provider_id) {
                continue;
            }
            match self.chain.get_provider_by_id(data_set.provider_id).await? {
                Some(provider) if provider.active => candidates.push(provider),
                _ => warn!(
                    provider_id = data_set.provider_id,
                    data_set_id = data_set.data_set_id,
                    "Data set owner missing from registry"
                ),
            }
        }

        let mut failures: Vec<String> = Vec::new();
        let mut attempts = FuturesUnordered::new();
        for provider in &candidates {
            let address = provider.address.clone();
            let attempt = self.attempt(provider, piece_cid);
            attempts.push(async move { (address, attempt.await) });
        }

        debug!(
            piece_cid = %piece_cid,
            providers = candidates.len(),
            "Racing retrieval attempts"
        );
        while let Some((address, result)) = attempts.next().await {
            match result {
                Ok(bytes) => {
                    // Dropping the remaining attempts aborts their
                    // in-flight requests
                    debug!(
                        piece_cid = %piece_cid,
                        address = %address,
                        size = bytes.len(),
                        "Retrieval race won"
                    );
                    return Ok(bytes);
                }
                Err(e) => {
                    warn!(piece_cid = %piece_cid, address = %address, error = %e, "Retrieval attempt failed");
                    failures.push(format!("{}: {}", address, e));
                }
            }
        }
        drop(attempts);

        if let Some(fallback) = &self.fallback {
            debug!(piece_cid = %piece_cid, "All provider attempts exhausted, delegating to fallback");
            return fallback
                .fetch_piece(piece_cid, client, &child_options(options))
                .await;
        }
        let attempts_summary = if failures.is_empty() {
            "no live data sets with pieces".to_string()
        } else {
            failures.join("; ")
        };
        Err(SdkError::AllRetrievalsFailed {
            piece_cid: piece_cid.to_string(),
            attempts: attempts_summary,
        })
    }

    async fn attempt(&self, provider: &ProviderInfo, piece_cid: &PieceCid) -> Result<Bytes> {
        let offering = provider.pdp().ok_or_else(|| SdkError::RetrievalFailed {
            piece_cid: piece_cid.to_string(),
            endpoint: provider.address.to_string(),
            reason: "provider has no storage offering".to_string(),
        })?;
        let transport =
            self.factory
                .connect(&offering.service_url)
                .map_err(|e| SdkError::RetrievalFailed {
                    piece_cid: piece_cid.to_string(),
                    endpoint: offering.service_url.clone(),
                    reason: e.to_string(),
                })?;
        verified_download(transport.as_ref(), piece_cid).await
    }
}

#[async_trait]
impl Retriever for PieceRetriever {
    async fn fetch_piece(
        &self,
        piece_cid: &PieceCid,
        client: &Address,
        options: &RetrievalOptions,
    ) -> Result<Bytes> {
        let abort = options.abort.clone().unwrap_or_else(AbortSignal::never);
        tokio::select! {
            _ = abort.aborted() => Err(SdkError::Aborted(format!(
                "retrieval of piece {} aborted", piece_cid
            ))),
            result = self.fetch_inner(piece_cid, client, options) => result,
        }
    }
}

fn child_options(options: &RetrievalOptions) -> RetrievalOptions {
    // The pin applies to this retriever only; a fallback child selects
    // its own source
    RetrievalOptions {
        provider_address: None,
        abort: options.abort.clone(),
    }
}

async fn verified_download(transport: &dyn ProviderTransport, piece_cid: &PieceCid) -> Result<Bytes> {
    let bytes = transport.download_piece(piece_cid).await?;
    if !piece_cid.matches(&bytes) {
        return Err(SdkError::RetrievalFailed {
            piece_cid: piece_cid.to_string(),
            endpoint: transport.endpoint().to_string(),
            reason: format!("digest mismatch in {} byte body", bytes.len()),
        });
    }
    Ok(bytes)
}
