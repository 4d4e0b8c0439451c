//! Token metadata resolution with a shared, single-flight cache
//!
//! Decimals never change for a deployed token, so a resolved value is cached
//! for the lifetime of the resolver. The cache is keyed by the parsed address,
//! which makes checksummed and lowercase spellings share one entry.

use crate::chain::{parse_address, DecimalsSource};
use crate::error::{MetadataError, RemoteError};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ethers::types::Address;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::Arc;
use tracing::{debug, info};

/// Resolved, immutable token facts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenMetadata {
    pub address: Address,
    pub decimals: u8,
}

type InFlight = Shared<BoxFuture<'static, Result<u8, MetadataError>>>;

/// Resolves token decimals, collapsing concurrent lookups of one address
pub struct MetadataResolver {
    source: Arc<dyn DecimalsSource>,
    /// Resolved entries; never evicted
    cache: DashMap<Address, TokenMetadata>,
    /// Lookups currently waiting on the remote
    in_flight: DashMap<Address, InFlight>,
}

impl MetadataResolver {
    pub fn new(source: Arc<dyn DecimalsSource>) -> Self {
        Self {
            source,
            cache: DashMap::new(),
            in_flight: DashMap::new(),
        }
    }

    /// Resolve decimals for `token`, querying the remote at most once per address
    pub async fn resolve(&self, token: &str) -> Result<TokenMetadata, MetadataError> {
        let address =
            parse_address(token).ok_or_else(|| MetadataError::MalformedAddress(token.to_string()))?;

        if let Some(cached) = self.cache.get(&address) {
            crate::metrics::record_metadata_lookup(true);
            return Ok(*cached);
        }
        crate::metrics::record_metadata_lookup(false);

        let lookup = match self.in_flight.entry(address) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                // A lookup may have completed since the cache was checked
                if let Some(cached) = self.cache.get(&address) {
                    return Ok(*cached);
                }
                debug!("Querying decimals for {:?}", address);
                entry.insert(self.query(address)).clone()
            }
        };

        // Await a clone; a polled-to-completion Shared no longer compares by pointer
        let result = lookup.clone().await;

        // Publish before retiring the in-flight entry so late callers hit one or the other
        if let Ok(decimals) = result {
            self.cache.entry(address).or_insert_with(|| {
                info!("Resolved {:?}: {} decimals", address, decimals);
                TokenMetadata { address, decimals }
            });
        }
        // A newer lookup may already occupy the slot after a failure
        self.in_flight
            .remove_if(&address, |_, current| current.ptr_eq(&lookup));

        result.map(|decimals| TokenMetadata { address, decimals })
    }

    fn query(&self, address: Address) -> InFlight {
        let source = self.source.clone();
        async move {
            crate::metrics::record_remote_call("query_decimals");
            source
                .query_decimals(address)
                .await
                .map_err(|e| match e {
                    RemoteError::Rejected { reason } => {
                        MetadataError::NotAToken { address, reason }
                    }
                    RemoteError::Transport { message } => {
                        MetadataError::Network { address, message }
                    }
                })
        }
        .boxed()
        .shared()
    }

    /// Cached metadata for `token`, without touching the remote
    pub fn cached(&self, token: &str) -> Option<TokenMetadata> {
        let address = parse_address(token)?;
        self.cache.get(&address).map(|entry| *entry)
    }

    /// Number of resolved tokens
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Drop a cached entry so the next lookup queries the remote again
    pub fn invalidate(&self, token: &str) -> bool {
        parse_address(token)
            .and_then(|address| self.cache.remove(&address))
            .is_some()
    }
}
