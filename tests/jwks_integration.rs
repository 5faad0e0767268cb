//! JWKS resolution integration tests
//!
//! A local axum server publishes the public half of `fixtures/rsa_private.pem`
//! so key lookup, caching, retries and token validation run over real HTTP.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::json;
use tokio::task::JoinSet;
use tower::ServiceExt;

use service_common::auth::{
    AuthError, BackoffConfig, JwksResolver, JwksTokenValidator, JwtAuthPayload,
    KeyResolutionError, PayloadClaims, TokenRejection, TokenVerifier,
};
use service_common::config::JwksConfig;
use service_common::server::{auth_middleware, ClaimPayload, Gatekeeper};

const KID: &str = "test-key-1";
const NEXT_KID: &str = "test-key-2";
/// Published only after `KeyServer::publish_rotated_keys`
const ROTATED_KID: &str = "test-key-3";
const FRESH_KID: &str = "test-key-4";
const MODULUS: &str = "qUlAV0nIDfxs7SpECpmVgyPJbOtZXa_KKdnsZsftHsyuwDeht7JWLTXZYB4sJoiXuCEEJrpLcyUvvMi9z2NaMTPKxFEagHi5m1EGTzM9q07Gr8urk22hzE_-1ehlPbiwtWHQxmJUzIJ5nCLXvxA56bP76xFPiYzfR_RZSFoqtIhlCZ-6FBgj_6mtR8Vu2BjYcNZBKvP5GHgd4m1teD76izxf-Fy0rF67zfuyJm3Kj7ykqUD3foP4Ny2hrWOyFs_TO_DlI-WfIGXPw9psgBzKj-zBv2OYh698drOLXNROa8O25q4gaOqfJ_gIduL0bxOS42SMQp_fgzIDu_csDx4NVQ";
const EXPONENT: &str = "AQAB";
const PRIVATE_KEY: &[u8] = include_bytes!("fixtures/rsa_private.pem");

#[derive(Clone)]
struct KeyServerState {
    hits: Arc<AtomicUsize>,
    failures: usize,
    rotated: Arc<AtomicBool>,
}

struct KeyServer {
    url: String,
    hits: Arc<AtomicUsize>,
    rotated: Arc<AtomicBool>,
}

impl KeyServer {
    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    fn publish_rotated_keys(&self) {
        self.rotated.store(true, Ordering::SeqCst);
    }
}

fn rsa_entry(kid: &str) -> serde_json::Value {
    json!({ "kty": "RSA", "kid": kid, "use": "sig", "alg": "RS256", "n": MODULUS, "e": EXPONENT })
}

async fn jwks_document(State(state): State<KeyServerState>) -> Response {
    let hit = state.hits.fetch_add(1, Ordering::SeqCst);
    if hit < state.failures {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let mut keys = vec![
        json!({ "kty": "EC", "kid": "ec-key", "crv": "P-256", "x": "abc", "y": "def" }),
        rsa_entry(KID),
        rsa_entry(NEXT_KID),
    ];
    if state.rotated.load(Ordering::SeqCst) {
        keys.push(rsa_entry(ROTATED_KID));
        keys.push(rsa_entry(FRESH_KID));
    }

    Json(json!({ "keys": keys })).into_response()
}

/// Serve the key set, answering the first `failures` requests with HTTP 500.
async fn spawn_key_server(failures: usize) -> KeyServer {
    let hits = Arc::new(AtomicUsize::new(0));
    let rotated = Arc::new(AtomicBool::new(false));
    let state = KeyServerState {
        hits: hits.clone(),
        failures,
        rotated: rotated.clone(),
    };
    let app = Router::new()
        .route("/.well-known/jwks.json", get(jwks_document))
        .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    KeyServer {
        url: format!("http://{addr}/.well-known/jwks.json"),
        hits,
        rotated,
    }
}

fn fast_backoff() -> BackoffConfig {
    BackoffConfig {
        initial_delay_ms: 1,
        max_delay_ms: 5,
        multiplier: 2.0,
        jitter_factor: 0.0,
    }
}

fn resolver_for(url: &str, max_retries: u32) -> Arc<JwksResolver> {
    let mut config = JwksConfig::new(url);
    config.max_retries = max_retries;
    config.timeout = Duration::from_secs(2);
    Arc::new(
        JwksResolver::new(&config)
            .unwrap()
            .with_backoff(fast_backoff()),
    )
}

fn sign_rs256(kid: Option<&str>, ttl_seconds: i64) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = kid.map(str::to_string);
    let claims = PayloadClaims::expiring_in(
        JwtAuthPayload {
            tid: "tenant-1".to_string(),
            token_type: "access".to_string(),
        },
        ttl_seconds,
    );
    encode(
        &header,
        &claims,
        &EncodingKey::from_rsa_pem(PRIVATE_KEY).unwrap(),
    )
    .unwrap()
}

// ============================================================================
// Key resolution
// ============================================================================

#[tokio::test]
async fn test_resolve_public_key() {
    let server = spawn_key_server(0).await;
    let resolver = resolver_for(&server.url, 2);

    let key = resolver.resolve_public_key(&server.url, KID).await.unwrap();

    assert_eq!(key.exponent(), 65537);
    assert_eq!(key.modulus().len(), 256);
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn test_resolved_keys_are_cached() {
    let server = spawn_key_server(0).await;
    let resolver = resolver_for(&server.url, 2);

    for _ in 0..5 {
        resolver.resolve_public_key(&server.url, KID).await.unwrap();
    }

    assert_eq!(server.hits(), 1);
    assert_eq!(resolver.fetch_count(), 1);

    resolver.invalidate_all();
    resolver.resolve_public_key(&server.url, KID).await.unwrap();
    assert_eq!(server.hits(), 2);
}

#[tokio::test]
async fn test_whole_key_set_is_cached() {
    let server = spawn_key_server(0).await;
    let resolver = resolver_for(&server.url, 2);

    resolver.resolve_public_key(&server.url, KID).await.unwrap();
    let next = resolver
        .resolve_public_key(&server.url, NEXT_KID)
        .await
        .unwrap();

    assert_eq!(next.exponent(), 65537);
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn test_concurrent_lookups_share_one_fetch() {
    let server = spawn_key_server(0).await;
    let resolver = resolver_for(&server.url, 2);

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let resolver = resolver.clone();
        let url = server.url.clone();
        tasks.spawn(async move { resolver.resolve_public_key(&url, KID).await });
    }
    while let Some(result) = tasks.join_next().await {
        assert!(result.unwrap().is_ok());
    }

    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn test_unknown_kid_is_remembered() {
    let server = spawn_key_server(0).await;
    let resolver = resolver_for(&server.url, 2);

    let err = resolver
        .resolve_public_key(&server.url, "rotated-away")
        .await
        .unwrap_err();
    assert!(matches!(err, KeyResolutionError::KeyNotFound { ref kid } if kid == "rotated-away"));

    let err = resolver
        .resolve_public_key(&server.url, "rotated-away")
        .await
        .unwrap_err();
    assert!(matches!(err, KeyResolutionError::KeyNotFound { .. }));
    assert_eq!(server.hits(), 1);

    // Non-RSA entries never match
    let err = resolver
        .resolve_public_key(&server.url, "ec-key")
        .await
        .unwrap_err();
    assert!(matches!(err, KeyResolutionError::KeyNotFound { .. }));
}

#[tokio::test]
async fn test_rotated_key_clears_earlier_miss() {
    let server = spawn_key_server(0).await;
    let resolver = resolver_for(&server.url, 2);

    let err = resolver
        .resolve_public_key(&server.url, ROTATED_KID)
        .await
        .unwrap_err();
    assert!(matches!(err, KeyResolutionError::KeyNotFound { .. }));

    server.publish_rotated_keys();

    // Fetching any new kid refreshes its siblings, including the missed one
    resolver
        .resolve_public_key(&server.url, FRESH_KID)
        .await
        .unwrap();
    assert_eq!(server.hits(), 2);

    let key = resolver
        .resolve_public_key(&server.url, ROTATED_KID)
        .await
        .unwrap();
    assert_eq!(key.exponent(), 65537);
    assert_eq!(server.hits(), 2);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let server = spawn_key_server(2).await;
    let resolver = resolver_for(&server.url, 2);

    let key = resolver.resolve_public_key(&server.url, KID).await;

    assert!(key.is_ok());
    assert_eq!(server.hits(), 3);
    assert_eq!(resolver.fetch_count(), 3);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let server = spawn_key_server(10).await;
    let resolver = resolver_for(&server.url, 1);

    let err = resolver
        .resolve_public_key(&server.url, KID)
        .await
        .unwrap_err();

    assert!(matches!(err, KeyResolutionError::HttpStatus(500)));
    assert_eq!(server.hits(), 2);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let server = spawn_key_server(0).await;
    let missing_url = server.url.replace("/.well-known/jwks.json", "/missing");
    let resolver = resolver_for(&missing_url, 3);

    let err = resolver
        .resolve_public_key(&missing_url, KID)
        .await
        .unwrap_err();

    assert!(matches!(err, KeyResolutionError::HttpStatus(404)));
    assert_eq!(resolver.fetch_count(), 1);
}

#[tokio::test]
async fn test_unreachable_endpoint_is_fetch_error() {
    let resolver = resolver_for("http://127.0.0.1:1/jwks", 0);

    let err = resolver
        .resolve_public_key("http://127.0.0.1:1/jwks", KID)
        .await
        .unwrap_err();

    assert!(matches!(err, KeyResolutionError::Fetch(_)));
}

// ============================================================================
// Token validation
// ============================================================================

#[tokio::test]
async fn test_validate_rs256_token() {
    let server = spawn_key_server(0).await;
    let validator = JwksTokenValidator::new(resolver_for(&server.url, 2), server.url.clone());

    let payload: JwtAuthPayload = validator
        .validate(&sign_rs256(Some(KID), 3600))
        .await
        .unwrap();

    assert_eq!(payload.tid, "tenant-1");
    assert_eq!(payload.token_type, "access");
}

#[tokio::test]
async fn test_token_without_kid_is_rejected() {
    let server = spawn_key_server(0).await;
    let validator = JwksTokenValidator::new(resolver_for(&server.url, 2), server.url.clone());

    let err = validator
        .validate::<JwtAuthPayload>(&sign_rs256(None, 3600))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AuthError::InvalidToken(TokenRejection::MissingKeyId)
    ));
    assert_eq!(server.hits(), 0);
}

#[tokio::test]
async fn test_expired_rs256_token_is_rejected() {
    let server = spawn_key_server(0).await;
    let validator = JwksTokenValidator::new(resolver_for(&server.url, 2), server.url.clone());

    let err = validator
        .validate::<JwtAuthPayload>(&sign_rs256(Some(KID), -60))
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::InvalidToken(TokenRejection::Expired)));
}

#[tokio::test]
async fn test_unknown_kid_token_is_rejected() {
    let server = spawn_key_server(0).await;
    let validator = JwksTokenValidator::new(resolver_for(&server.url, 2), server.url.clone());

    let err = validator
        .validate::<JwtAuthPayload>(&sign_rs256(Some("other"), 3600))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AuthError::KeyResolution(KeyResolutionError::KeyNotFound { .. })
    ));
}

#[tokio::test]
async fn test_garbage_token_is_malformed() {
    let server = spawn_key_server(0).await;
    let validator = JwksTokenValidator::new(resolver_for(&server.url, 2), server.url.clone());

    let err = validator
        .validate::<JwtAuthPayload>("not-a-jwt")
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::InvalidToken(TokenRejection::Malformed)));
    assert_eq!(server.hits(), 0);
}

// ============================================================================
// Gatekeeper backed by JWKS
// ============================================================================

async fn tenant(ClaimPayload(payload): ClaimPayload<JwtAuthPayload>) -> String {
    payload.tid
}

fn jwks_app(resolver: Arc<JwksResolver>, url: &str) -> Router {
    let verifier = TokenVerifier::from(JwksTokenValidator::new(resolver, url));
    let gate = Arc::new(Gatekeeper::<JwtAuthPayload>::new(verifier));
    Router::new()
        .route("/tenant", get(tenant))
        .layer(from_fn_with_state(gate, auth_middleware::<JwtAuthPayload>))
}

#[tokio::test]
async fn test_gatekeeper_accepts_jwks_token() {
    let server = spawn_key_server(0).await;
    let app = jwks_app(resolver_for(&server.url, 2), &server.url);

    let request = Request::builder()
        .uri("/tenant")
        .header(
            header::AUTHORIZATION,
            format!("Bearer {}", sign_rs256(Some(KID), 3600)),
        )
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"tenant-1");
}

#[tokio::test]
async fn test_empty_bearer_never_reaches_key_server() {
    let server = spawn_key_server(0).await;
    let resolver = resolver_for(&server.url, 2);
    let app = jwks_app(resolver.clone(), &server.url);

    for value in ["Bearer ", "Bearer    ", ""] {
        let request = Request::builder()
            .uri("/tenant")
            .header(header::AUTHORIZATION, value)
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    assert_eq!(resolver.fetch_count(), 0);
    assert_eq!(server.hits(), 0);
}
