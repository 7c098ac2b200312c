//! Provider and data set resolution
//!
//! Turns a [`ContextOptions`] request into a bound provider + data set
//! pair. Precedence: an explicit data set id pins everything; an explicit
//! provider with forced creation skips reuse lookups entirely; an explicit
//! provider otherwise reuses its most populated live set; with no explicit
//! provider, candidate sets are filtered by capability metadata, ordered
//! by piece count, and probed for liveness before falling back to the
//! approved-provider registry.

use tracing::{info, warn};

use crate::chain::ChainService;
use crate::config::{ContextCallbacks, ContextOptions};
use crate::error::{Result, SdkError};
use crate::health::{probe_provider, ProbeCache};
use crate::transport::ProviderTransportFactory;
use crate::types::{Address, DataSetInfo, DataSetResolution, ProviderInfo};

/// Resolves storage contexts against the chain and provider registry
pub struct ContextResolver<'a> {
    chain: &'a dyn ChainService,
    factory: &'a dyn ProviderTransportFactory,
}

impl<'a> ContextResolver<'a> {
    pub fn new(chain: &'a dyn ChainService, factory: &'a dyn ProviderTransportFactory) -> Self {
        Self { chain, factory }
    }

    /// Resolve a provider and data set for `payer`
    ///
    /// Selection callbacks fire synchronously once resolution completes,
    /// before the result is returned.
    pub async fn resolve(
        &self,
        payer: &Address,
        options: &ContextOptions,
        mut callbacks: ContextCallbacks,
    ) -> Result<DataSetResolution> {
        let resolution = self.resolve_inner(payer, options).await?;
        if let Some(cb) = callbacks.on_provider_selected.take() {
            cb(&resolution.provider);
        }
        if let Some(cb) = callbacks.on_data_set_resolved.take() {
            cb(&resolution);
        }
        Ok(resolution)
    }

    async fn resolve_inner(
        &self,
        payer: &Address,
        options: &ContextOptions,
    ) -> Result<DataSetResolution> {
        // Rule 1: an explicit data set id pins provider and set together
        if let Some(data_set_id) = options.data_set_id {
            return self.resolve_explicit_data_set(data_set_id, options).await;
        }

        let explicit = self.resolve_explicit_provider(options).await?;

        if let Some(provider) = explicit {
            if options.force_create_data_set {
                // Rule 2: forced creation opts out of reuse, so existing
                // sets are never even fetched
                info!(
                    provider_id = provider.id,
                    "Resolved provider for forced data set creation"
                );
                return Ok(DataSetResolution {
                    provider,
                    data_set: None,
                });
            }
            // Rule 3: reuse the most populated live set on that provider
            return self.resolve_on_provider(payer, provider).await;
        }

        // Rule 4: automatic selection with liveness probing
        self.resolve_automatic(payer, options).await
    }

    async fn resolve_explicit_data_set(
        &self,
        data_set_id: u64,
        options: &ContextOptions,
    ) -> Result<DataSetResolution> {
        let data_set = self
            .chain
            .get_data_set(data_set_id)
            .await?
            .ok_or(SdkError::DataSetNotFound(data_set_id))?;
        if !data_set.live {
            return Err(SdkError::DataSetNotFound(data_set_id));
        }

        if let Some(requested) = self.resolve_explicit_provider(options).await? {
            if requested.id != data_set.provider_id {
                return Err(SdkError::ProviderConflict(format!(
                    "data set {} belongs to provider {} but provider {} was requested",
                    data_set_id, data_set.provider_id, requested.id
                )));
            }
        }

        let provider = self
            .chain
            .get_provider_by_id(data_set.provider_id)
            .await?
            .ok_or_else(|| SdkError::ProviderNotFound(format!("id {}", data_set.provider_id)))?;

        info!(
            data_set_id,
            provider_id = provider.id,
            "Resolved explicitly pinned data set"
        );
        Ok(DataSetResolution {
            provider,
            data_set: Some(data_set),
        })
    }

    /// Resolve provider hints, failing when id and address disagree
    async fn resolve_explicit_provider(
        &self,
        options: &ContextOptions,
    ) -> Result<Option<ProviderInfo>> {
        let by_id = match options.provider_id {
            Some(id) => Some(
                self.chain
                    .get_provider_by_id(id)
                    .await?
                    .ok_or_else(|| SdkError::ProviderNotFound(format!("id {}", id)))?,
            ),
            None => None,
        };
        let by_address = match options.provider_address {
            Some(ref addr) => Some(
                self.chain
                    .get_provider_by_address(addr)
                    .await?
                    .ok_or_else(|| SdkError::ProviderNotFound(addr.to_string()))?,
            ),
            None => None,
        };

        let provider = match (by_id, by_address) {
            (Some(a), Some(b)) if a.id != b.id => {
                return Err(SdkError::ProviderConflict(format!(
                    "provider id {} and provider address {} name different providers ({} vs {})",
                    a.id, b.address, a.id, b.id
                )));
            }
            (Some(a), _) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };

        if let Some(ref provider) = provider {
            if !self.chain.is_provider_approved(provider.id).await? {
                return Err(SdkError::ProviderNotFound(format!(
                    "provider {} is not approved",
                    provider.id
                )));
            }
        }
        Ok(provider)
    }

    async fn resolve_on_provider(
        &self,
        payer: &Address,
        provider: ProviderInfo,
    ) -> Result<DataSetResolution> {
        let sets = self.chain.get_client_data_sets(payer).await?;
        let best = sets
            .into_iter()
            .filter(|ds| ds.provider_id == provider.id && ds.live)
            .max_by_key(|ds| (ds.piece_count, ds.data_set_id));

        match best {
            Some(data_set) => {
                info!(
                    provider_id = provider.id,
                    data_set_id = data_set.data_set_id,
                    piece_count = data_set.piece_count,
                    "Reusing existing data set"
                );
                Ok(DataSetResolution {
                    provider,
                    data_set: Some(data_set),
                })
            }
            None => {
                info!(
                    provider_id = provider.id,
                    "No reusable data set, marking for creation"
                );
                Ok(DataSetResolution {
                    provider,
                    data_set: None,
                })
            }
        }
    }

    async fn resolve_automatic(
        &self,
        payer: &Address,
        options: &ContextOptions,
    ) -> Result<DataSetResolution> {
        let mut cache = ProbeCache::new();

        if !options.force_create_data_set {
            let sets = self.chain.get_client_data_sets(payer).await?;
            // Capability filter runs before any probe; liveness never
            // resurrects a filtered-out set
            let mut candidates: Vec<DataSetInfo> = sets
                .into_iter()
                .filter(|ds| ds.live)
                .filter(|ds| ds.has_cdn() == options.with_cdn)
                .filter(|ds| ds.has_ipni() == options.with_ipni)
                .collect();
            candidates.sort_by(|a, b| {
                b.piece_count
                    .cmp(&a.piece_count)
                    .then(b.data_set_id.cmp(&a.data_set_id))
            });

            for data_set in candidates {
                let provider = match self.chain.get_provider_by_id(data_set.provider_id).await? {
                    Some(provider) => provider,
                    None => {
                        warn!(
                            provider_id = data_set.provider_id,
                            data_set_id = data_set.data_set_id,
                            "Data set owner missing from registry"
                        );
                        continue;
                    }
                };
                if !self.eligible(&provider, options, false) {
                    continue;
                }
                if probe_provider(
                    self.factory,
                    &provider,
                    options.timing.ping_timeout,
                    &mut cache,
                )
                .await
                {
                    info!(
                        provider_id = provider.id,
                        data_set_id = data_set.data_set_id,
                        "Reusing existing data set"
                    );
                    return Ok(DataSetResolution {
                        provider,
                        data_set: Some(data_set),
                    });
                }
            }
        }

        // Fall back to the approved registry
        let approved = self.chain.get_approved_providers().await?;
        let eligible: Vec<ProviderInfo> = approved
            .into_iter()
            .filter(|p| self.eligible(p, options, true))
            .collect();

        for provider in eligible {
            if probe_provider(
                self.factory,
                &provider,
                options.timing.ping_timeout,
                &mut cache,
            )
            .await
            {
                info!(provider_id = provider.id, "Selected approved provider");
                return Ok(DataSetResolution {
                    provider,
                    data_set: None,
                });
            }
        }

        if cache.probes() > 0 {
            Err(SdkError::AllProvidersFailedHealthCheck {
                attempted: cache.probes(),
            })
        } else {
            Err(SdkError::NoProvidersAvailable(format!(
                "no approved providers match (with_cdn={}, with_ipni={}, allow_dev={})",
                options.with_cdn, options.with_ipni, options.allow_dev_providers
            )))
        }
    }

    /// Offering-level eligibility shared by both selection phases
    ///
    /// `check_capabilities` additionally requires the offering to carry
    /// the requested CDN/IPNI flags (used for registry fallback, where no
    /// data set metadata exists yet).
    fn eligible(
        &self,
        provider: &ProviderInfo,
        options: &ContextOptions,
        check_capabilities: bool,
    ) -> bool {
        if !provider.active {
            return false;
        }
        let offering = match provider.pdp() {
            Some(offering) => offering,
            None => return false,
        };
        if offering.is_dev() && !options.allow_dev_providers {
            return false;
        }
        if check_capabilities {
            if options.with_cdn && !offering.with_cdn {
                return false;
            }
            if options.with_ipni && !offering.with_ipni {
                return false;
            }
        }
        true
    }
}
