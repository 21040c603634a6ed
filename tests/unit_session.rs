// Session lifecycle tests against a mock XRPC server.
//
// Covers create-and-save, saved-session reuse, single-writer refresh, and
// the profile enricher's refresh-on-failure behavior.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use skyhose::bluesky::client::XrpcClient;
use skyhose::bluesky::profiles::{ProfileEnricher, ProfileLookup};
use skyhose::bluesky::rate_limit::RateLimiter;
use skyhose::bluesky::session::{SessionData, SessionHandle, SessionStore};

fn tokens(n: u32) -> serde_json::Value {
    json!({
        "accessJwt": format!("access-{n}"),
        "refreshJwt": format!("refresh-{n}"),
        "handle": "alice.bsky.social",
        "did": "did:plc:alice",
    })
}

fn saved(n: u32) -> SessionData {
    serde_json::from_value(tokens(n)).unwrap()
}

fn client(server: &MockServer) -> XrpcClient {
    XrpcClient::new(&server.uri(), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn open_creates_and_saves_a_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/xrpc/com.atproto.server.createSession"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tokens(1)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path().join("bsky.auth"));
    let handle = SessionHandle::open(
        client(&server),
        store.clone(),
        Some(("alice.bsky.social", "app-password")),
    )
    .await
    .unwrap();

    assert_eq!(handle.session(), saved(1));
    assert_eq!(handle.current().generation, 0);
    assert_eq!(store.load().unwrap(), Some(saved(1)));

    // Saved as pretty JSON with camelCase keys.
    let raw = std::fs::read_to_string(store.path()).unwrap();
    assert!(raw.contains("\n  \"accessJwt\": \"access-1\""));
}

#[tokio::test]
async fn saved_session_wins_over_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/xrpc/com.atproto.server.createSession"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tokens(9)))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path().join("bsky.auth"));
    store.save(&saved(1)).unwrap();

    let handle = SessionHandle::open(client(&server), store, Some(("alice.bsky.social", "pw")))
        .await
        .unwrap();
    assert_eq!(handle.session().access_jwt, "access-1");
}

#[tokio::test]
async fn missing_credentials_without_saved_session_is_fatal() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path().join("bsky.auth"));

    let err = SessionHandle::open(client(&server), store, None)
        .await
        .err()
        .unwrap();
    assert!(err.to_string().contains("username and password"));
}

#[tokio::test]
async fn failed_create_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/xrpc/com.atproto.server.createSession"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "AuthenticationRequired"})))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path().join("bsky.auth"));
    let result = SessionHandle::open(client(&server), store.clone(), Some(("alice.bsky.social", "bad"))).await;

    assert!(result.is_err());
    assert!(!store.exists());
}

#[tokio::test]
async fn refresh_rotates_tokens_once_per_generation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/xrpc/com.atproto.server.refreshSession"))
        .and(header("authorization", "Bearer refresh-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tokens(2)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path().join("bsky.auth"));
    store.save(&saved(1)).unwrap();
    let handle = SessionHandle::open(client(&server), store.clone(), None)
        .await
        .unwrap();

    assert!(handle.refresh(0).await.unwrap());
    assert_eq!(handle.current().generation, 1);
    assert_eq!(handle.session().access_jwt, "access-2");
    assert_eq!(store.load().unwrap(), Some(saved(2)));

    // A second failure observed on the old client must not refresh again.
    assert!(!handle.refresh(0).await.unwrap());
    assert_eq!(handle.current().generation, 1);
}

#[tokio::test]
async fn concurrent_refreshes_hit_the_server_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/xrpc/com.atproto.server.refreshSession"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tokens(2)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path().join("bsky.auth"));
    let handle = Arc::new(SessionHandle::new(client(&server), store, saved(1)));

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let h = Arc::clone(&handle);
            tokio::spawn(async move { h.refresh(0).await.unwrap() })
        })
        .collect();
    let mut rotated = 0;
    for t in tasks {
        if t.await.unwrap() {
            rotated += 1;
        }
    }
    assert_eq!(rotated, 1);
    assert_eq!(handle.current().generation, 1);
}

#[tokio::test]
async fn enricher_refreshes_after_failure_without_retrying() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/xrpc/app.bsky.actor.getProfile"))
        .and(header("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "ExpiredToken"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/xrpc/app.bsky.actor.getProfile"))
        .and(header("authorization", "Bearer access-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "did": "did:plc:bob",
            "handle": "bob.bsky.social",
            "displayName": "Bob",
            "followersCount": 1500,
            "followsCount": 20,
            "postsCount": 300,
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/xrpc/com.atproto.server.refreshSession"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tokens(2)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path().join("bsky.auth"));
    let session = Arc::new(SessionHandle::new(client(&server), store, saved(1)));
    let enricher = ProfileEnricher::new(
        Arc::clone(&session),
        Arc::new(RateLimiter::new(100, 60, 0)),
    );

    // The failed lookup is not retried inline.
    assert!(enricher.fetch("did:plc:bob").await.is_none());
    assert_eq!(session.current().generation, 1);

    // The next lookup uses the refreshed token.
    let profile = enricher.fetch("did:plc:bob").await.unwrap();
    assert_eq!(profile.handle, "bob.bsky.social");
    assert_eq!(profile.display_name.as_deref(), Some("Bob"));
    assert_eq!(profile.followers_count, Some(1500));
}
