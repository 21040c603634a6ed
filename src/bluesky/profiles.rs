// Profile enrichment: `app.bsky.actor.getProfile` with refresh-on-failure.
//
// A lookup that fails triggers one session refresh. The failed lookup itself
// is not retried: the event goes out without that profile and the repaired
// session serves the lookups that follow.

use std::sync::Arc;

use async_trait::async_trait;
use atrium_api::app::bsky::actor::{defs::ProfileViewDetailedData, get_profile};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::client::has_status;
use super::rate_limit::{with_retry, RateLimiter};
use super::session::SessionHandle;

/// The public profile fields attached to output records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorProfile {
    pub did: String,
    pub handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followers_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follows_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posts_count: Option<i64>,
}

impl ActorProfile {
    pub fn new(did: &str, handle: &str, followers_count: Option<i64>) -> Self {
        Self {
            did: did.to_string(),
            handle: handle.to_string(),
            display_name: None,
            followers_count,
            follows_count: None,
            posts_count: None,
        }
    }
}

impl From<&ProfileViewDetailedData> for ActorProfile {
    fn from(view: &ProfileViewDetailedData) -> Self {
        Self {
            did: view.did.as_str().to_string(),
            handle: view.handle.as_str().to_string(),
            display_name: view.display_name.clone(),
            followers_count: view.followers_count,
            follows_count: view.follows_count,
            posts_count: view.posts_count,
        }
    }
}

/// Anything that can look up an actor's profile.
///
/// `None` means "no profile for this event", whatever the cause.
#[async_trait]
pub trait ProfileLookup: Send + Sync {
    async fn fetch(&self, actor: &str) -> Option<ActorProfile>;
}

/// Authenticated profile lookups through the shared session.
pub struct ProfileEnricher {
    session: Arc<SessionHandle>,
    limiter: Arc<RateLimiter>,
}

impl ProfileEnricher {
    pub fn new(session: Arc<SessionHandle>, limiter: Arc<RateLimiter>) -> Self {
        Self { session, limiter }
    }
}

#[async_trait]
impl ProfileLookup for ProfileEnricher {
    async fn fetch(&self, actor: &str) -> Option<ActorProfile> {
        let authed = self.session.current();
        let params = [("actor", actor)];

        let result = with_retry(&self.limiter, || {
            authed
                .client
                .xrpc_get::<get_profile::Output>("app.bsky.actor.getProfile", &params)
        })
        .await;

        let err = match result {
            Ok(output) => return Some(ActorProfile::from(&*output)),
            Err(e) => e,
        };
        warn!(actor = actor, error = %err, "Profile lookup failed");

        // Retries are already exhausted for 429s; a new token won't help.
        if has_status(&err, StatusCode::TOO_MANY_REQUESTS) {
            return None;
        }

        match self.session.refresh(authed.generation).await {
            Ok(true) => debug!(actor = actor, "Session refreshed after failed lookup"),
            Ok(false) => debug!(actor = actor, "Session was refreshed by another worker"),
            Err(e) => warn!(error = %e, "Session refresh failed"),
        }
        None
    }
}
