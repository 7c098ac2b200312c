//! Provider liveness probing
//!
//! A probe is a bounded ping against a provider's service endpoint. Probe
//! results are deduplicated through an explicit [`ProbeCache`] scoped to
//! one resolution pass, so candidate ordering never pings the same
//! provider twice.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, warn};

use crate::transport::ProviderTransportFactory;
use crate::types::ProviderInfo;

/// Probe results for one resolution pass, keyed by provider id
#[derive(Debug, Default)]
pub struct ProbeCache {
    results: HashMap<u64, bool>,
}

impl ProbeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached result for a provider, if already probed
    pub fn get(&self, provider_id: u64) -> Option<bool> {
        self.results.get(&provider_id).copied()
    }

    /// Number of distinct providers probed
    pub fn probes(&self) -> usize {
        self.results.len()
    }

    fn record(&mut self, provider_id: u64, live: bool) {
        self.results.insert(provider_id, live);
    }
}

/// Probe a provider's liveness, consulting the cache first
pub async fn probe_provider(
    factory: &dyn ProviderTransportFactory,
    provider: &ProviderInfo,
    ping_timeout: Duration,
    cache: &mut ProbeCache,
) -> bool {
    if let Some(live) = cache.get(provider.id) {
        return live;
    }
    let live = probe_uncached(factory, provider, ping_timeout).await;
    cache.record(provider.id, live);
    live
}

async fn probe_uncached(
    factory: &dyn ProviderTransportFactory,
    provider: &ProviderInfo,
    ping_timeout: Duration,
) -> bool {
    let offering = match provider.pdp() {
        Some(offering) => offering,
        None => {
            debug!(provider_id = provider.id, "Provider has no offering, treating as down");
            return false;
        }
    };

    let transport = match factory.connect(&offering.service_url) {
        Ok(transport) => transport,
        Err(e) => {
            warn!(
                provider_id = provider.id,
                endpoint = %offering.service_url,
                error = %e,
                "Could not connect to provider"
            );
            return false;
        }
    };

    match tokio::time::timeout(ping_timeout, transport.ping()).await {
        Ok(Ok(())) => {
            debug!(provider_id = provider.id, endpoint = %offering.service_url, "Provider ping ok");
            true
        }
        Ok(Err(e)) => {
            warn!(
                provider_id = provider.id,
                endpoint = %offering.service_url,
                error = %e,
                "Provider ping failed"
            );
            false
        }
        Err(_) => {
            warn!(
                provider_id = provider.id,
                endpoint = %offering.service_url,
                timeout_ms = ping_timeout.as_millis() as u64,
                "Provider ping timed out"
            );
            false
        }
    }
}
