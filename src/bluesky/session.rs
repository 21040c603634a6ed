// Authenticated session: credential bundle, on-disk store, refresh.
//
// The session is one process-wide resource, but it is never global: the
// `SessionHandle` is created in main and passed to whatever needs an
// authenticated client. Refresh is single-writer. Callers report the
// generation of the client that failed, and a refresh is skipped when a newer
// generation is already in place.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context, Result};
use atrium_api::com::atproto::server::{create_session, refresh_session};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::client::XrpcClient;

/// Default location of the saved credential bundle.
pub const DEFAULT_AUTH_FILE: &str = "bsky.auth";

/// The credential bundle persisted between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub access_jwt: String,
    pub refresh_jwt: String,
    pub handle: String,
    pub did: String,
}

impl From<&create_session::OutputData> for SessionData {
    fn from(out: &create_session::OutputData) -> Self {
        Self {
            access_jwt: out.access_jwt.clone(),
            refresh_jwt: out.refresh_jwt.clone(),
            handle: out.handle.as_str().to_string(),
            did: out.did.as_str().to_string(),
        }
    }
}

impl From<&refresh_session::OutputData> for SessionData {
    fn from(out: &refresh_session::OutputData) -> Self {
        Self {
            access_jwt: out.access_jwt.clone(),
            refresh_jwt: out.refresh_jwt.clone(),
            handle: out.handle.as_str().to_string(),
            did: out.did.as_str().to_string(),
        }
    }
}

#[derive(Serialize)]
struct CreateSessionBody<'a> {
    identifier: &'a str,
    password: &'a str,
}

/// Reads and writes the credential bundle as pretty JSON at a fixed path.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the saved bundle; `Ok(None)` when no file exists yet.
    pub fn load(&self) -> Result<Option<SessionData>> {
        if !self.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let data = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse session file {}", self.path.display()))?;
        Ok(Some(data))
    }

    /// Write the bundle, replacing the file atomically.
    pub fn save(&self, data: &SessionData) -> Result<()> {
        let json = serde_json::to_string_pretty(data).context("Failed to serialize session")?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

/// `com.atproto.server.createSession` with a handle and app password.
pub async fn create_session(
    base: &XrpcClient,
    identifier: &str,
    password: &str,
) -> Result<SessionData> {
    let output: create_session::Output = base
        .xrpc_post(
            "com.atproto.server.createSession",
            Some(&CreateSessionBody {
                identifier,
                password,
            }),
        )
        .await
        .with_context(|| format!("Failed to create session for {identifier}"))?;
    Ok(SessionData::from(&*output))
}

/// `com.atproto.server.refreshSession`, presenting the refresh token as the
/// bearer credential.
pub async fn refresh_session(base: &XrpcClient, refresh_jwt: &str) -> Result<SessionData> {
    let output: refresh_session::Output = base
        .with_bearer(refresh_jwt)
        .xrpc_post::<(), _>("com.atproto.server.refreshSession", None)
        .await
        .context("Failed to refresh session")?;
    Ok(SessionData::from(&*output))
}

/// A client bound to one generation of the session.
#[derive(Clone)]
pub struct AuthedClient {
    pub client: XrpcClient,
    pub generation: u64,
}

struct SessionState {
    data: SessionData,
    client: XrpcClient,
    generation: u64,
}

/// Owner of the live session and its authenticated client.
pub struct SessionHandle {
    base: XrpcClient,
    store: SessionStore,
    state: RwLock<SessionState>,
    refresh_lock: Mutex<()>,
}

impl SessionHandle {
    pub fn new(base: XrpcClient, store: SessionStore, data: SessionData) -> Self {
        let client = base.with_bearer(&data.access_jwt);
        Self {
            base,
            store,
            state: RwLock::new(SessionState {
                data,
                client,
                generation: 0,
            }),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Load the saved session, or create one from `credentials` and save it.
    ///
    /// A saved session always wins; credentials are only needed the first time.
    pub async fn open(
        base: XrpcClient,
        store: SessionStore,
        credentials: Option<(&str, &str)>,
    ) -> Result<Self> {
        if let Some(data) = store.load()? {
            info!(handle = %data.handle, "Loaded saved session");
            return Ok(Self::new(base, store, data));
        }

        let (identifier, password) = credentials.ok_or_else(|| {
            anyhow::anyhow!(
                "No saved session at {}. Please provide username and password.",
                store.path().display()
            )
        })?;

        let data = create_session(&base, identifier, password).await?;
        store.save(&data)?;
        info!(handle = %data.handle, path = %store.path().display(), "Created and saved session");
        Ok(Self::new(base, store, data))
    }

    /// The current authenticated client and its generation.
    pub fn current(&self) -> AuthedClient {
        let state = self.read();
        AuthedClient {
            client: state.client.clone(),
            generation: state.generation,
        }
    }

    /// A copy of the current credential bundle.
    pub fn session(&self) -> SessionData {
        self.read().data.clone()
    }

    /// Refresh the session if `seen_generation` is still current.
    ///
    /// Returns `Ok(true)` when this call rotated the tokens and `Ok(false)`
    /// when another caller already had. The new bundle is persisted; a
    /// failure to persist is logged and the in-memory session still swaps.
    pub async fn refresh(&self, seen_generation: u64) -> Result<bool> {
        let _writer = self.refresh_lock.lock().await;

        let (refresh_jwt, generation) = {
            let state = self.read();
            (state.data.refresh_jwt.clone(), state.generation)
        };
        if generation != seen_generation {
            debug!(
                seen = seen_generation,
                current = generation,
                "Session already refreshed"
            );
            return Ok(false);
        }

        let data = refresh_session(&self.base, &refresh_jwt).await?;
        if let Err(e) = self.store.save(&data) {
            warn!(error = %e, "Failed to persist refreshed session");
        }

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.client = self.base.with_bearer(&data.access_jwt);
        state.data = data;
        state.generation += 1;
        info!(generation = state.generation, "Session refreshed");
        Ok(true)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }
}
