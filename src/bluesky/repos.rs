// Repository snapshots: `com.atproto.sync.getRepo` against the owner's PDS.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::client::XrpcClient;
use super::rate_limit::{with_retry, RateLimiter};

/// Fetches the full CAR snapshot of a repository.
#[async_trait]
pub trait RepoFetcher: Send + Sync {
    async fn fetch_repo(&self, did: &str) -> Result<Vec<u8>>;
}

/// Resolves the DID's PDS and downloads the repo from it.
pub struct PdsRepoFetcher {
    client: XrpcClient,
    plc_url: String,
    limiter: Arc<RateLimiter>,
}

impl PdsRepoFetcher {
    pub fn new(client: XrpcClient, plc_url: &str, limiter: Arc<RateLimiter>) -> Self {
        Self {
            client,
            plc_url: plc_url.to_string(),
            limiter,
        }
    }
}

#[async_trait]
impl RepoFetcher for PdsRepoFetcher {
    async fn fetch_repo(&self, did: &str) -> Result<Vec<u8>> {
        let pds = self.client.resolve_pds_url(&self.plc_url, did).await?;
        debug!(did = did, pds = %pds, "Fetching repository snapshot");

        let pds_client = self.client.for_host(&pds);
        let params = [("did", did)];
        let car = with_retry(&self.limiter, || {
            pds_client.xrpc_get_bytes("com.atproto.sync.getRepo", &params)
        })
        .await
        .with_context(|| format!("Failed to fetch repository {did} from {pds}"))?;

        debug!(did = did, bytes = car.len(), "Fetched repository snapshot");
        Ok(car)
    }
}
