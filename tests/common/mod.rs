//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use warmstore_sdk::chain::mock::MockChainService;
use warmstore_sdk::transport::mock::{MockProviderTransport, MockTransportFactory};
use warmstore_sdk::{
    Address, ContextCallbacks, ContextOptions, DataSetInfo, PdpOffering, ProviderInfo,
    ProviderProducts, StorageContext, TimingConfig,
};

pub const PAYER: &str = "0xc11e47";

pub fn payer() -> Address {
    Address::new(PAYER)
}

pub fn endpoint(provider_id: u64) -> String {
    format!("mock://provider-{}", provider_id)
}

pub fn offering(provider_id: u64) -> PdpOffering {
    PdpOffering {
        service_url: endpoint(provider_id),
        min_piece_size: 127,
        max_piece_size: 1 << 30,
        storage_price_per_tib_per_month: 0,
        min_proving_period_epochs: 2880,
        location: String::new(),
        with_cdn: false,
        with_ipni: false,
        capabilities: HashMap::new(),
    }
}

pub fn provider(id: u64) -> ProviderInfo {
    ProviderInfo {
        id,
        address: Address::new(format!("0xprovider{:02x}", id)),
        payee: Address::new(format!("0xpayee{:02x}", id)),
        name: format!("provider-{}", id),
        description: String::new(),
        active: true,
        products: ProviderProducts {
            pdp: Some(offering(id)),
        },
    }
}

pub fn provider_with(id: u64, with_cdn: bool, with_ipni: bool) -> ProviderInfo {
    let mut info = provider(id);
    let pdp = info.products.pdp.as_mut().unwrap();
    pdp.with_cdn = with_cdn;
    pdp.with_ipni = with_ipni;
    info
}

pub fn dev_provider(id: u64) -> ProviderInfo {
    let mut info = provider(id);
    info.products
        .pdp
        .as_mut()
        .unwrap()
        .capabilities
        .insert("dev".to_string(), "true".to_string());
    info
}

pub fn data_set(id: u64, provider_id: u64, piece_count: u64) -> DataSetInfo {
    DataSetInfo {
        data_set_id: id,
        provider_id,
        payer: payer(),
        payee: Address::new(format!("0xpayee{:02x}", provider_id)),
        live: true,
        with_cdn: false,
        piece_count,
        next_piece_id: piece_count,
        client_seq: 0,
        metadata: HashMap::new(),
    }
}

pub fn test_options() -> ContextOptions {
    ContextOptions {
        timing: TimingConfig::for_tests(),
        ..Default::default()
    }
}

/// Piece payload of a given index, always above the minimum size.
pub fn piece_bytes(index: usize) -> Vec<u8> {
    vec![index as u8; 127 + index]
}

pub struct UploadFixture {
    pub chain: Arc<MockChainService>,
    pub factory: Arc<MockTransportFactory>,
    pub transport: Arc<MockProviderTransport>,
}

/// Context bound to provider 1 with an empty reusable data set (id 10),
/// relay wired so confirmed additions surface through the transport.
pub async fn upload_context(batch_size: usize) -> (UploadFixture, StorageContext) {
    upload_context_with(batch_size, MockProviderTransport::new(endpoint(1)), false).await
}

/// Like [`upload_context`], with a custom transport and optionally no
/// pre-existing data set (forcing deferred creation).
pub async fn upload_context_with(
    batch_size: usize,
    transport: MockProviderTransport,
    force_create: bool,
) -> (UploadFixture, StorageContext) {
    let transport = Arc::new(transport);
    let mut chain = MockChainService::new()
        .with_provider(provider(1))
        .with_relay(transport.clone());
    if !force_create {
        chain = chain.with_data_set(data_set(10, 1, 0));
    }
    let chain = Arc::new(chain);
    let factory = Arc::new(MockTransportFactory::new());
    factory.register(transport.clone());

    let options = ContextOptions {
        provider_id: Some(1),
        force_create_data_set: force_create,
        upload_batch_size: batch_size,
        timing: TimingConfig::for_tests(),
        ..Default::default()
    };
    let context = StorageContext::create(
        chain.clone(),
        factory.clone(),
        payer(),
        options,
        ContextCallbacks::default(),
    )
    .await
    .expect("context creation");

    (
        UploadFixture {
            chain,
            factory,
            transport,
        },
        context,
    )
}
