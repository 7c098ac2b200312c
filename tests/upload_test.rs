//! Upload batching engine behavior: size bounds, batch coalescing, order
//! stability, shared batch failures, and the confirmation outcomes.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use warmstore_sdk::chain::mock::{AddPiecesMode, CreateMode};
use warmstore_sdk::transport::mock::MockProviderTransport;
use warmstore_sdk::{SdkError, UploadCallbacks, MAX_UPLOAD_SIZE};

use common::*;

#[tokio::test]
async fn test_undersize_upload_fails_before_any_network_call() {
    let (fixture, context) = upload_context(2).await;

    let err = context
        .upload(vec![0u8; 126], UploadCallbacks::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SdkError::SizeLimit { size: 126, .. }));
    let msg = err.to_string();
    assert!(msg.contains("126"));
    assert!(msg.contains("127"));
    assert_eq!(fixture.transport.upload_calls(), 0);
}

#[tokio::test]
async fn test_oversize_upload_fails_before_any_network_call() {
    let (fixture, context) = upload_context(2).await;

    let size = MAX_UPLOAD_SIZE + 1;
    let err = context
        .upload(vec![0u8; size as usize], UploadCallbacks::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SdkError::SizeLimit { .. }));
    let msg = err.to_string();
    assert!(msg.contains(&size.to_string()));
    assert!(msg.contains(&MAX_UPLOAD_SIZE.to_string()));
    assert_eq!(fixture.transport.upload_calls(), 0);
}

#[tokio::test]
async fn test_minimum_size_upload_succeeds() {
    let (_fixture, context) = upload_context(1).await;

    let result = context
        .upload(vec![7u8; 127], UploadCallbacks::default())
        .await
        .unwrap();
    assert_eq!(result.size, 127);
    assert_eq!(result.piece_id, 0);
}

#[tokio::test]
async fn test_three_uploads_with_batch_size_two_yield_two_additions() {
    let (fixture, context) = upload_context(2).await;

    let (a, b, c) = tokio::join!(
        context.upload(piece_bytes(0), UploadCallbacks::default()),
        context.upload(piece_bytes(1), UploadCallbacks::default()),
        context.upload(piece_bytes(2), UploadCallbacks::default()),
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();
    assert_eq!(fixture.chain.add_pieces_calls(), 2);
}

#[tokio::test]
async fn test_five_simultaneous_uploads_fill_one_batch_of_five() {
    let (fixture, context) = upload_context(5).await;

    let uploads = (0..5).map(|i| context.upload(piece_bytes(i), UploadCallbacks::default()));
    let results = futures::future::join_all(uploads).await;
    for result in results {
        result.unwrap();
    }
    assert_eq!(fixture.chain.add_pieces_calls(), 1);
    assert_eq!(fixture.chain.add_pieces_requests()[0].piece_cids.len(), 5);
}

#[tokio::test]
async fn test_piece_ids_are_contiguous_and_order_stable() {
    let (fixture, context) = upload_context(3).await;

    // Three distinct sizes submitted together
    let (a, b, c) = tokio::join!(
        context.upload(vec![1u8; 130], UploadCallbacks::default()),
        context.upload(vec![2u8; 140], UploadCallbacks::default()),
        context.upload(vec![3u8; 150], UploadCallbacks::default()),
    );
    let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());

    assert_eq!((a.piece_id, b.piece_id, c.piece_id), (0, 1, 2));
    assert_eq!((a.size, b.size, c.size), (130, 140, 150));

    // The submitted identifier list follows submission order
    let recorded = fixture.chain.add_pieces_requests();
    assert_eq!(recorded.len(), 1);
    assert_eq!(
        recorded[0].piece_cids,
        vec![a.piece_cid, b.piece_cid, c.piece_cid]
    );
}

#[tokio::test]
async fn test_batch_size_one_confirms_each_upload_independently() {
    let (fixture, context) = upload_context(1).await;

    let first = context
        .upload(piece_bytes(0), UploadCallbacks::default())
        .await
        .unwrap();
    let second = context
        .upload(piece_bytes(1), UploadCallbacks::default())
        .await
        .unwrap();

    assert_eq!(first.piece_id, 0);
    assert_eq!(second.piece_id, 1);
    assert_eq!(fixture.chain.add_pieces_calls(), 2);
}

#[tokio::test]
async fn test_failed_addition_rejects_every_member_identically() {
    let (fixture, context) = upload_context(2).await;
    fixture
        .chain
        .queue_add_pieces_mode(AddPiecesMode::FailSubmission(
            "signature rejected".to_string(),
        ));

    let (a, b) = tokio::join!(
        context.upload(piece_bytes(0), UploadCallbacks::default()),
        context.upload(piece_bytes(1), UploadCallbacks::default()),
    );
    let (a, b) = (a.unwrap_err(), b.unwrap_err());

    assert!(matches!(a, SdkError::AddPieces { .. }));
    // Same batch, same fate: byte-identical messages
    assert_eq!(a.to_string(), b.to_string());
    assert!(a.to_string().contains("signature rejected"));
}

#[tokio::test]
async fn test_sibling_batch_survives_a_failed_batch() {
    let (fixture, context) = upload_context(2).await;
    fixture
        .chain
        .queue_add_pieces_mode(AddPiecesMode::FailSubmission("out of gas".to_string()));

    let (a, b) = tokio::join!(
        context.upload(piece_bytes(0), UploadCallbacks::default()),
        context.upload(piece_bytes(1), UploadCallbacks::default()),
    );
    a.unwrap_err();
    b.unwrap_err();

    // The next batch runs on the default (successful) mode
    let (c, d) = tokio::join!(
        context.upload(piece_bytes(2), UploadCallbacks::default()),
        context.upload(piece_bytes(3), UploadCallbacks::default()),
    );
    assert_eq!(c.unwrap().piece_id, 0);
    assert_eq!(d.unwrap().piece_id, 1);
    assert_eq!(fixture.chain.add_pieces_calls(), 2);
}

#[tokio::test]
async fn test_one_failed_upload_does_not_block_batch_mates() {
    let transport = MockProviderTransport::new(endpoint(1)).with_upload_failures(1);
    let (fixture, context) = upload_context_with(3, transport, false).await;

    let (a, b, c) = tokio::join!(
        context.upload(piece_bytes(0), UploadCallbacks::default()),
        context.upload(piece_bytes(1), UploadCallbacks::default()),
        context.upload(piece_bytes(2), UploadCallbacks::default()),
    );

    let results = [a, b, c];
    let failures: Vec<_> = results.iter().filter(|r| r.is_err()).collect();
    assert_eq!(failures.len(), 1);
    let mut ids: Vec<u64> = results
        .iter()
        .filter_map(|r| r.as_ref().ok().map(|u| u.piece_id))
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![0, 1]);
    assert_eq!(fixture.chain.add_pieces_requests()[0].piece_cids.len(), 2);
}

#[tokio::test]
async fn test_upload_cid_mismatch_fails_the_task() {
    let transport = MockProviderTransport::new(endpoint(1)).with_wrong_upload_cid();
    let (fixture, context) = upload_context_with(1, transport, false).await;

    let err = context
        .upload(piece_bytes(0), UploadCallbacks::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SdkError::UploadTransport { .. }));
    assert!(err.to_string().contains("locally computed"));
    assert_eq!(fixture.chain.add_pieces_calls(), 0);
}

#[tokio::test]
async fn test_parking_timeout_fails_without_an_addition() {
    let transport = MockProviderTransport::new(endpoint(1)).with_never_park();
    let (fixture, context) = upload_context_with(1, transport, false).await;

    let err = context
        .upload(piece_bytes(0), UploadCallbacks::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SdkError::PieceParkingTimeout { .. }));
    assert_eq!(fixture.chain.add_pieces_calls(), 0);
    assert!(fixture.transport.find_calls() > 1);
}

#[tokio::test]
async fn test_slow_parking_is_polled_until_found() {
    let transport = MockProviderTransport::new(endpoint(1)).with_parking_polls(3);
    let (_fixture, context) = upload_context_with(1, transport, false).await;

    let result = context
        .upload(piece_bytes(0), UploadCallbacks::default())
        .await
        .unwrap();
    assert_eq!(result.piece_id, 0);
}

#[tokio::test]
async fn test_reverted_transaction_rejects_the_batch() {
    let (fixture, context) = upload_context(1).await;
    fixture.chain.queue_add_pieces_mode(AddPiecesMode::Reverted);

    let err = context
        .upload(piece_bytes(0), UploadCallbacks::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SdkError::OnChainConfirmation { .. }));
    assert!(err.to_string().contains("reverted"));
}

#[tokio::test]
async fn test_unacknowledged_confirmation_times_out_as_verification() {
    let (fixture, context) = upload_context(1).await;
    fixture
        .chain
        .queue_add_pieces_mode(AddPiecesMode::Unacknowledged);

    let err = context
        .upload(piece_bytes(0), UploadCallbacks::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SdkError::VerificationTimeout { .. }));
}

#[tokio::test]
async fn test_confirmation_stays_bounded_when_the_status_endpoint_degrades() {
    // One Confirmed-without-acknowledgement answer, then the status
    // endpoint starts erroring: the verification deadline must still fire
    let transport = MockProviderTransport::new(endpoint(1)).with_status_failures_after(1);
    let (fixture, context) = upload_context_with(1, transport, false).await;
    fixture
        .chain
        .queue_add_pieces_mode(AddPiecesMode::Unacknowledged);

    let result = tokio::time::timeout(
        Duration::from_secs(2),
        context.upload(piece_bytes(0), UploadCallbacks::default()),
    )
    .await
    .expect("upload settled within the verification deadline");
    assert!(matches!(
        result.unwrap_err(),
        SdkError::VerificationTimeout { .. }
    ));
    assert!(fixture.transport.status_calls() > 1);
}

#[tokio::test]
async fn test_lost_transaction_times_out_as_propagation_failure() {
    let (fixture, context) = upload_context(1).await;
    fixture.chain.queue_add_pieces_mode(AddPiecesMode::Lost);

    let err = context
        .upload(piece_bytes(0), UploadCallbacks::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SdkError::OnChainConfirmation { .. }));
    assert!(err.to_string().contains("not found"));
}

#[tokio::test]
async fn test_first_upload_creates_the_pending_data_set() {
    let (fixture, context) =
        upload_context_with(1, MockProviderTransport::new(endpoint(1)), true).await;
    assert_eq!(context.data_set_id().await, None);

    let result = context
        .upload(piece_bytes(0), UploadCallbacks::default())
        .await
        .unwrap();
    assert_eq!(result.piece_id, 0);

    let created = fixture.chain.created_data_sets();
    assert_eq!(created.len(), 1);
    assert_eq!(context.data_set_id().await, Some(created[0]));

    // A second upload reuses the set instead of creating another
    context
        .upload(piece_bytes(1), UploadCallbacks::default())
        .await
        .unwrap();
    assert_eq!(fixture.chain.create_data_set_calls(), 1);
}

#[tokio::test]
async fn test_failed_creation_fails_the_batch_and_the_next_batch_retries() {
    let (fixture, context) =
        upload_context_with(1, MockProviderTransport::new(endpoint(1)), true).await;
    fixture
        .chain
        .queue_create_mode(CreateMode::Fail("insufficient funds".to_string()));

    let err = context
        .upload(piece_bytes(0), UploadCallbacks::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SdkError::DataSetCreation(_)));
    assert!(err.to_string().contains("insufficient funds"));
    assert_eq!(context.data_set_id().await, None);

    // Retried by the next batch, now on the default successful mode
    let result = context
        .upload(piece_bytes(1), UploadCallbacks::default())
        .await
        .unwrap();
    assert_eq!(result.piece_id, 0);
    assert_eq!(fixture.chain.create_data_set_calls(), 2);
}

#[tokio::test]
async fn test_upload_callbacks_fire_in_stage_order() {
    let (_fixture, context) = upload_context(1).await;

    let stages = Arc::new(AtomicUsize::new(0));
    let data = piece_bytes(0);
    let expected_cid = warmstore_sdk::PieceCid::from_data(&data);

    let parked = stages.clone();
    let added = stages.clone();
    let confirmed = stages.clone();
    let callbacks = UploadCallbacks {
        on_upload_complete: Some(Box::new(move |cid| {
            assert_eq!(*cid, expected_cid);
            assert_eq!(parked.fetch_add(1, Ordering::SeqCst), 0);
        })),
        on_piece_added: Some(Box::new(move |_tx| {
            assert_eq!(added.fetch_add(1, Ordering::SeqCst), 1);
        })),
        on_piece_confirmed: Some(Box::new(move |piece_id| {
            assert_eq!(piece_id, 0);
            assert_eq!(confirmed.fetch_add(1, Ordering::SeqCst), 2);
        })),
    };

    context.upload(data, callbacks).await.unwrap();
    assert_eq!(stages.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_lone_upload_flushes_after_the_debounce_window() {
    let (fixture, context) = upload_context(8).await;

    let started = std::time::Instant::now();
    context
        .upload(piece_bytes(0), UploadCallbacks::default())
        .await
        .unwrap();
    // Flushed by the idle debounce, not by filling the batch
    assert!(started.elapsed() >= Duration::from_millis(20));
    assert_eq!(fixture.chain.add_pieces_calls(), 1);
}
