// XRPC client: thin reqwest wrapper for AT Protocol endpoints.
//
// One client type serves every remote call the pipeline makes: profile
// lookups against the session's PDS host (bearer auth), session
// create/refresh, `com.atproto.sync.getRepo` against a user's PDS, and DID
// document resolution.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default host for session endpoints and authenticated reads.
pub const DEFAULT_PDS_HOST: &str = "https://bsky.social";

/// Default PLC directory for `did:plc` resolution.
pub const DEFAULT_PLC_URL: &str = "https://plc.directory";

const USER_AGENT: &str = "skyhose/0.1 (firehose-watch)";

/// A non-success XRPC response.
///
/// Kept as a typed error so callers (rate limiting, session refresh) can
/// inspect the status instead of parsing message text.
#[derive(Debug, thiserror::Error)]
#[error("XRPC {nsid} returned {status}: {body}")]
pub struct XrpcError {
    pub nsid: String,
    pub status: StatusCode,
    pub body: String,
}

/// HTTP client for XRPC endpoints on one host, optionally authenticated.
///
/// Cloning is cheap: the underlying `reqwest::Client` is reference counted.
#[derive(Clone)]
pub struct XrpcClient {
    client: reqwest::Client,
    base_url: String,
    bearer: Option<String>,
}

impl XrpcClient {
    /// Create an unauthenticated client for `base_url`.
    ///
    /// `timeout` bounds every request so a hung remote cannot stall a
    /// pipeline worker indefinitely.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer: None,
        })
    }

    /// A copy of this client that sends `token` as a bearer credential.
    pub fn with_bearer(&self, token: &str) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            bearer: Some(token.to_string()),
        }
    }

    /// A copy of this client pointed at another host, without credentials.
    pub fn for_host(&self, base_url: &str) -> Self {
        Self {
            client: self.client.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer: None,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: reqwest::Method, nsid: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/xrpc/{}", self.base_url, nsid);
        let builder = self.client.request(method, url);
        match &self.bearer {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, nsid: &str, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = builder
            .send()
            .await
            .with_context(|| format!("XRPC request failed: {nsid}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(XrpcError {
                nsid: nsid.to_string(),
                status,
                body,
            }
            .into());
        }
        Ok(response)
    }

    /// GET an XRPC query and deserialize the JSON response.
    pub async fn xrpc_get<T: DeserializeOwned>(
        &self,
        nsid: &str,
        params: &[(&str, &str)],
    ) -> Result<T> {
        debug!(nsid = nsid, "XRPC GET request");

        let builder = self.request(reqwest::Method::GET, nsid).query(params);
        self.send(nsid, builder)
            .await?
            .json::<T>()
            .await
            .with_context(|| format!("Failed to deserialize {nsid} response"))
    }

    /// GET an XRPC query that returns raw bytes (e.g. a CAR file).
    pub async fn xrpc_get_bytes(&self, nsid: &str, params: &[(&str, &str)]) -> Result<Vec<u8>> {
        debug!(nsid = nsid, "XRPC GET (bytes) request");

        let builder = self.request(reqwest::Method::GET, nsid).query(params);
        let bytes = self
            .send(nsid, builder)
            .await?
            .bytes()
            .await
            .with_context(|| format!("Failed to read {nsid} response body"))?;
        Ok(bytes.to_vec())
    }

    /// POST an XRPC procedure with an optional JSON body.
    pub async fn xrpc_post<B: Serialize, T: DeserializeOwned>(
        &self,
        nsid: &str,
        body: Option<&B>,
    ) -> Result<T> {
        debug!(nsid = nsid, "XRPC POST request");

        let mut builder = self.request(reqwest::Method::POST, nsid);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        self.send(nsid, builder)
            .await?
            .json::<T>()
            .await
            .with_context(|| format!("Failed to deserialize {nsid} response"))
    }

    /// Look up the PDS service endpoint for a DID.
    ///
    /// `did:plc` identities are resolved through the PLC directory at
    /// `plc_url`; `did:web` identities through their `.well-known` document.
    pub async fn resolve_pds_url(&self, plc_url: &str, did: &str) -> Result<String> {
        let url = if let Some(domain) = did.strip_prefix("did:web:") {
            format!("https://{domain}/.well-known/did.json")
        } else if did.starts_with("did:plc:") {
            format!("{}/{did}", plc_url.trim_end_matches('/'))
        } else {
            anyhow::bail!("Unsupported DID method: {did}");
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch DID document for {did}"))?;

        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("DID resolution returned {status} for {did}");
        }

        let doc: DidDocument = response
            .json()
            .await
            .context("Failed to parse DID document")?;

        pds_endpoint(&doc).ok_or_else(|| anyhow::anyhow!("No PDS service found in DID document for {did}"))
    }
}

/// True when an error chain carries an XRPC response with the given status.
pub fn has_status(err: &anyhow::Error, status: StatusCode) -> bool {
    err.chain()
        .filter_map(|e| e.downcast_ref::<XrpcError>())
        .any(|e| e.status == status)
}

// -- Serde types for identity resolution --

#[derive(Debug, Deserialize)]
pub struct DidDocument {
    #[serde(default)]
    pub service: Vec<DidService>,
}

#[derive(Debug, Deserialize)]
pub struct DidService {
    pub id: String,
    #[serde(rename = "serviceEndpoint")]
    pub service_endpoint: String,
}

/// The `#atproto_pds` endpoint of a DID document.
pub fn pds_endpoint(doc: &DidDocument) -> Option<String> {
    doc.service
        .iter()
        .find(|s| s.id == "#atproto_pds" || s.id.ends_with("#atproto_pds"))
        .map(|s| s.service_endpoint.clone())
}
