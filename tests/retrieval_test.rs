//! Retrieval race engine: first verified success wins, failures recover
//! locally, fallback chains, and aborts surface distinguishably.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use warmstore_sdk::chain::mock::MockChainService;
use warmstore_sdk::transport::mock::{MockProviderTransport, MockTransportFactory};
use warmstore_sdk::{
    AbortHandle, Address, PieceCid, PieceRetriever, Result, RetrievalOptions, Retriever, SdkError,
};

use common::*;

const PIECE: &[u8] = b"retrieval race piece payload, comfortably over the minimum size for a piece";

struct StaticRetriever(Bytes);

#[async_trait]
impl Retriever for StaticRetriever {
    async fn fetch_piece(
        &self,
        _piece_cid: &PieceCid,
        _client: &Address,
        _options: &RetrievalOptions,
    ) -> Result<Bytes> {
        Ok(self.0.clone())
    }
}

/// Chain with one live, non-empty data set per provider id.
fn chain_for(provider_ids: &[u64]) -> MockChainService {
    let mut chain = MockChainService::new();
    for (i, id) in provider_ids.iter().enumerate() {
        chain = chain
            .with_provider(provider(*id))
            .with_data_set(data_set(10 + i as u64, *id, 3));
    }
    chain
}

#[tokio::test]
async fn test_race_returns_the_successful_provider_once() {
    let chain = Arc::new(chain_for(&[1, 2]));
    let factory = Arc::new(MockTransportFactory::new());
    // Provider 1 fails fast, provider 2 succeeds slowly
    factory.register(Arc::new(
        MockProviderTransport::new(endpoint(1)).with_download_failure("404 not found"),
    ));
    let winner = Arc::new(
        MockProviderTransport::new(endpoint(2))
            .with_piece(PIECE)
            .with_download_delay(Duration::from_millis(30)),
    );
    factory.register(winner.clone());

    let retriever = PieceRetriever::new(chain, factory);
    let cid = PieceCid::from_data(PIECE);
    let bytes = retriever
        .fetch_piece(&cid, &payer(), &RetrievalOptions::default())
        .await
        .unwrap();

    assert_eq!(bytes.as_ref(), PIECE);
    assert_eq!(winner.download_calls(), 1);
}

#[tokio::test]
async fn test_fast_success_cancels_the_slow_loser() {
    let chain = Arc::new(chain_for(&[1, 2]));
    let factory = Arc::new(MockTransportFactory::new());
    factory.register(Arc::new(
        MockProviderTransport::new(endpoint(1)).with_piece(PIECE),
    ));
    let slow = Arc::new(
        MockProviderTransport::new(endpoint(2))
            .with_piece(PIECE)
            .with_download_delay(Duration::from_secs(5)),
    );
    factory.register(slow);

    let retriever = PieceRetriever::new(chain, factory);
    let cid = PieceCid::from_data(PIECE);
    let started = std::time::Instant::now();
    let bytes = retriever
        .fetch_piece(&cid, &payer(), &RetrievalOptions::default())
        .await
        .unwrap();

    assert_eq!(bytes.as_ref(), PIECE);
    // The slow provider never held up the race
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_corrupt_body_counts_as_that_providers_failure() {
    let chain = Arc::new(chain_for(&[1, 2]));
    let factory = Arc::new(MockTransportFactory::new());
    factory.register(Arc::new(
        MockProviderTransport::new(endpoint(1)).with_corrupt_downloads(),
    ));
    factory.register(Arc::new(
        MockProviderTransport::new(endpoint(2))
            .with_piece(PIECE)
            .with_download_delay(Duration::from_millis(20)),
    ));

    let retriever = PieceRetriever::new(chain, factory);
    let cid = PieceCid::from_data(PIECE);
    let bytes = retriever
        .fetch_piece(&cid, &payer(), &RetrievalOptions::default())
        .await
        .unwrap();
    assert_eq!(bytes.as_ref(), PIECE);
}

#[tokio::test]
async fn test_all_failures_aggregate_and_name_every_provider() {
    let chain = Arc::new(chain_for(&[1, 2]));
    let factory = Arc::new(MockTransportFactory::new());
    factory.register(Arc::new(
        MockProviderTransport::new(endpoint(1)).with_download_failure("not found"),
    ));
    factory.register(Arc::new(
        MockProviderTransport::new(endpoint(2)).with_download_failure("timeout"),
    ));

    let retriever = PieceRetriever::new(chain, factory);
    let cid = PieceCid::from_data(PIECE);
    let err = retriever
        .fetch_piece(&cid, &payer(), &RetrievalOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, SdkError::AllRetrievalsFailed { .. }));
    let msg = err.to_string();
    assert!(msg.contains("0xprovider01"));
    assert!(msg.contains("0xprovider02"));
}

#[tokio::test]
async fn test_all_failures_delegate_to_the_fallback() {
    let chain = Arc::new(chain_for(&[1]));
    let factory = Arc::new(MockTransportFactory::new());
    factory.register(Arc::new(
        MockProviderTransport::new(endpoint(1)).with_download_failure("gone"),
    ));

    let fallback_bytes = Bytes::from_static(b"served by the fallback child");
    let retriever = PieceRetriever::new(chain, factory)
        .with_fallback(Arc::new(StaticRetriever(fallback_bytes.clone())));

    let cid = PieceCid::from_data(PIECE);
    let bytes = retriever
        .fetch_piece(&cid, &payer(), &RetrievalOptions::default())
        .await
        .unwrap();
    assert_eq!(bytes, fallback_bytes);
}

#[tokio::test]
async fn test_no_data_sets_without_fallback_is_an_aggregate_error() {
    let chain = Arc::new(MockChainService::new());
    let factory = Arc::new(MockTransportFactory::new());

    let retriever = PieceRetriever::new(chain, factory);
    let cid = PieceCid::from_data(PIECE);
    let err = retriever
        .fetch_piece(&cid, &payer(), &RetrievalOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SdkError::AllRetrievalsFailed { .. }));
}

#[tokio::test]
async fn test_empty_and_dead_data_sets_are_skipped() {
    let mut dead = data_set(11, 2, 5);
    dead.live = false;
    let chain = Arc::new(
        MockChainService::new()
            .with_provider(provider(1))
            .with_provider(provider(2))
            .with_data_set(data_set(10, 1, 0))
            .with_data_set(dead),
    );
    let factory = Arc::new(MockTransportFactory::new());
    let p1 = Arc::new(MockProviderTransport::new(endpoint(1)).with_piece(PIECE));
    let p2 = Arc::new(MockProviderTransport::new(endpoint(2)).with_piece(PIECE));
    factory.register(p1.clone());
    factory.register(p2.clone());

    let retriever = PieceRetriever::new(chain, factory);
    let cid = PieceCid::from_data(PIECE);
    retriever
        .fetch_piece(&cid, &payer(), &RetrievalOptions::default())
        .await
        .unwrap_err();

    assert_eq!(p1.download_calls(), 0);
    assert_eq!(p2.download_calls(), 0);
}

#[tokio::test]
async fn test_pinned_provider_is_the_only_one_tried() {
    let chain = Arc::new(chain_for(&[1, 2]));
    let factory = Arc::new(MockTransportFactory::new());
    let p1 = Arc::new(MockProviderTransport::new(endpoint(1)).with_piece(PIECE));
    let p2 = Arc::new(MockProviderTransport::new(endpoint(2)).with_piece(PIECE));
    factory.register(p1.clone());
    factory.register(p2.clone());

    let retriever = PieceRetriever::new(chain, factory);
    let cid = PieceCid::from_data(PIECE);
    let options = RetrievalOptions {
        provider_address: Some(Address::new("0xprovider02")),
        abort: None,
    };
    let bytes = retriever.fetch_piece(&cid, &payer(), &options).await.unwrap();

    assert_eq!(bytes.as_ref(), PIECE);
    assert_eq!(p1.download_calls(), 0);
    assert_eq!(p2.download_calls(), 1);
}

#[tokio::test]
async fn test_unknown_pinned_provider_names_the_address() {
    let chain = Arc::new(chain_for(&[1]));
    let factory = Arc::new(MockTransportFactory::new());

    let retriever = PieceRetriever::new(chain, factory);
    let cid = PieceCid::from_data(PIECE);
    let options = RetrievalOptions {
        provider_address: Some(Address::new("0xdeadbeef")),
        abort: None,
    };
    let err = retriever
        .fetch_piece(&cid, &payer(), &options)
        .await
        .unwrap_err();

    assert!(matches!(err, SdkError::ProviderNotFound(_)));
    assert!(err.to_string().contains("0xdeadbeef"));
}

#[tokio::test]
async fn test_pinned_failure_delegates_to_the_fallback() {
    let chain = Arc::new(chain_for(&[1]));
    let factory = Arc::new(MockTransportFactory::new());
    factory.register(Arc::new(
        MockProviderTransport::new(endpoint(1)).with_download_failure("disk gone"),
    ));

    let fallback_bytes = Bytes::from_static(b"fallback wins again");
    let retriever = PieceRetriever::new(chain, factory)
        .with_fallback(Arc::new(StaticRetriever(fallback_bytes.clone())));

    let cid = PieceCid::from_data(PIECE);
    let options = RetrievalOptions {
        provider_address: Some(Address::new("0xprovider01")),
        abort: None,
    };
    let bytes = retriever.fetch_piece(&cid, &payer(), &options).await.unwrap();
    assert_eq!(bytes, fallback_bytes);
}

#[tokio::test]
async fn test_abort_surfaces_as_aborted_not_a_network_failure() {
    let chain = Arc::new(chain_for(&[1]));
    let factory = Arc::new(MockTransportFactory::new());
    factory.register(Arc::new(
        MockProviderTransport::new(endpoint(1))
            .with_piece(PIECE)
            .with_download_delay(Duration::from_secs(5)),
    ));

    let retriever = PieceRetriever::new(chain, factory);
    let cid = PieceCid::from_data(PIECE);
    let client = payer();
    let (handle, signal) = AbortHandle::new();
    let options = RetrievalOptions {
        provider_address: None,
        abort: Some(signal),
    };

    let (result, ()) = tokio::join!(retriever.fetch_piece(&cid, &client, &options), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.abort();
    });

    let err = result.unwrap_err();
    assert!(matches!(err, SdkError::Aborted(_)));
    assert!(err.to_string().contains(&cid.to_string()));
}
